//! Rendering collaborator seam.
//!
//! Turning diagram source into a graphic is somebody else's job; this module
//! only defines the contract and two adapters around it.

use std::io::{self, Write};
use std::process::{Command, Stdio};
use std::thread;

use log::debug;

use crate::document::{self, Element};
use crate::error::SyntaxError;
use crate::geometry::BoundingBox;
use crate::theme::Theme;

/// A rendered diagram as produced by the rendering collaborator.
#[derive(Debug, Clone, PartialEq)]
pub struct VectorDiagram {
    pub document: Element,
    /// Canvas declared by the renderer (`viewBox`, else `width`/`height`).
    pub bounds: BoundingBox,
}

impl VectorDiagram {
    pub fn from_markup(markup: &str) -> Result<Self, SyntaxError> {
        let document = document::parse(markup)?;
        let bounds = declared_bounds(&document);
        Ok(Self { document, bounds })
    }
}

pub trait DiagramRenderer {
    fn render(&self, source: &str, theme: &Theme) -> Result<VectorDiagram, SyntaxError>;
}

impl<R: DiagramRenderer + ?Sized> DiagramRenderer for &R {
    fn render(&self, source: &str, theme: &Theme) -> Result<VectorDiagram, SyntaxError> {
        (**self).render(source, theme)
    }
}

/// Treats the source text as already-rendered SVG markup.
#[derive(Debug, Clone, Copy, Default)]
pub struct SvgSourceRenderer;

impl DiagramRenderer for SvgSourceRenderer {
    fn render(&self, source: &str, _theme: &Theme) -> Result<VectorDiagram, SyntaxError> {
        VectorDiagram::from_markup(source)
    }
}

/// Pipes the source through an external renderer process (for example
/// `mmdr -e svg`) and reads SVG from its stdout. `{theme}` in any argument is
/// replaced by the theme name.
#[derive(Debug, Clone)]
pub struct CommandRenderer {
    pub program: String,
    pub args: Vec<String>,
}

impl CommandRenderer {
    pub fn new(program: impl Into<String>, args: Vec<String>) -> Self {
        Self {
            program: program.into(),
            args,
        }
    }

    /// Splits a command line on whitespace: `"mmdr -e svg"`.
    pub fn from_command_line(line: &str) -> Option<Self> {
        let mut parts = line.split_whitespace().map(str::to_string);
        let program = parts.next()?;
        Some(Self::new(program, parts.collect()))
    }
}

impl DiagramRenderer for CommandRenderer {
    fn render(&self, source: &str, theme: &Theme) -> Result<VectorDiagram, SyntaxError> {
        let args: Vec<String> = self
            .args
            .iter()
            .map(|arg| arg.replace("{theme}", &theme.name))
            .collect();
        debug!(program = self.program.as_str(), args:?; "Running external renderer");

        let mut child = Command::new(&self.program)
            .args(&args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|err| SyntaxError::new(format!("failed to start {}: {err}", self.program)))?;

        // Stdin is fed from its own thread while stdout and stderr drain here;
        // a renderer that streams output before reading all input would
        // otherwise block on a full pipe.
        let stdin = child.stdin.take();
        let (sent, output) = thread::scope(|scope| {
            let writer = scope.spawn(move || match stdin {
                Some(mut stdin) => stdin.write_all(source.as_bytes()),
                None => Ok(()),
            });
            let output = child.wait_with_output();
            let sent = writer
                .join()
                .unwrap_or_else(|_| Err(io::Error::other("stdin writer panicked")));
            (sent, output)
        });
        let output =
            output.map_err(|err| SyntaxError::new(format!("renderer did not finish: {err}")))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            let message = stderr.trim();
            return Err(SyntaxError::new(if message.is_empty() {
                format!("{} exited with {}", self.program, output.status)
            } else {
                message.strip_prefix("error: ").unwrap_or(message).to_string()
            }));
        }
        sent.map_err(|err| SyntaxError::new(format!("failed to send diagram source: {err}")))?;
        let markup = String::from_utf8(output.stdout)
            .map_err(|_| SyntaxError::new("renderer produced non UTF-8 output"))?;
        VectorDiagram::from_markup(&markup)
    }
}

fn declared_bounds(root: &Element) -> BoundingBox {
    if let Some(view_box) = root.attr("viewBox") {
        let values: Vec<f32> = view_box
            .split(|c: char| c == ',' || c.is_ascii_whitespace())
            .filter(|part| !part.is_empty())
            .filter_map(|part| part.parse().ok())
            .collect();
        if let [x, y, width, height] = values[..] {
            return BoundingBox::new(x, y, width, height);
        }
    }
    let length = |name: &str| {
        root.attr(name)
            .map(|v| v.trim().trim_end_matches("px"))
            .and_then(|v| v.parse::<f32>().ok())
            .unwrap_or(0.0)
    };
    BoundingBox::new(0.0, 0.0, length("width"), length("height"))
}
