//! Export dispatch: vector passthrough or raster cascade, file naming and
//! saving, one export at a time.

use std::cell::Cell;
use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use log::{debug, info, warn};
use tempfile::NamedTempFile;

use crate::color::Color;
use crate::config::ExportConfig;
use crate::error::{ExportError, TitleError};
use crate::raster::{Attempt, Cascade, RasterEngine, RasterKind, cascade_for};
use crate::renderer::VectorDiagram;
use crate::sanitize::sanitize;
use crate::theme::Theme;
use crate::title::{FALLBACK_TITLE, TitleSuggester, sanitize_title};

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ExportFormat {
    Vector,
    Raster { kind: RasterKind, quality: f32 },
}

impl ExportFormat {
    pub fn png() -> Self {
        ExportFormat::Raster {
            kind: RasterKind::Png,
            quality: 1.0,
        }
    }

    pub fn jpeg(quality: f32) -> Self {
        ExportFormat::Raster {
            kind: RasterKind::Jpeg,
            quality,
        }
    }

    pub fn extension(&self) -> &'static str {
        match self {
            ExportFormat::Vector => "svg",
            ExportFormat::Raster { kind, .. } => kind.extension(),
        }
    }
}

/// One export action. Built fresh each time.
#[derive(Debug, Clone, PartialEq)]
pub struct ExportRequest {
    pub format: ExportFormat,
    pub desired_scale: f32,
    /// Overrides the theme background.
    pub background_color: Option<String>,
    /// Overrides the configured fallback file name.
    pub fallback_name: Option<String>,
}

impl ExportRequest {
    pub fn new(format: ExportFormat) -> Self {
        Self {
            format,
            desired_scale: 2.0,
            background_color: None,
            fallback_name: None,
        }
    }

    pub fn with_scale(mut self, scale: f32) -> Self {
        self.desired_scale = scale;
        self
    }

    pub fn with_background(mut self, color: impl Into<String>) -> Self {
        self.background_color = Some(color.into());
        self
    }

    pub fn with_fallback_name(mut self, name: impl Into<String>) -> Self {
        self.fallback_name = Some(name.into());
        self
    }
}

/// What an export reads from the session.
#[derive(Debug, Clone, Copy)]
pub struct ExportContext<'a> {
    pub source: &'a str,
    pub diagram: Option<&'a VectorDiagram>,
    pub theme: &'a Theme,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SavedExport {
    pub path: PathBuf,
    pub format: ExportFormat,
    pub width: u32,
    pub height: u32,
    pub scale: f32,
    pub attempts: Vec<Attempt>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ExportOutcome {
    Saved(SavedExport),
    /// Another export was still running.
    Skipped,
}

/// Where finished artifacts go.
pub trait ArtifactSink {
    fn save(&self, file_name: &str, bytes: Vec<u8>) -> Result<PathBuf, ExportError>;
}

impl<S: ArtifactSink + ?Sized> ArtifactSink for &S {
    fn save(&self, file_name: &str, bytes: Vec<u8>) -> Result<PathBuf, ExportError> {
        (**self).save(file_name, bytes)
    }
}

/// Saves into a directory. Bytes are staged in a temporary file next to the
/// destination and renamed into place; existing files are never replaced
/// (`name (2).png`, `name (3).png`, ...).
#[derive(Debug, Clone)]
pub struct DirectorySink {
    dir: PathBuf,
}

impl DirectorySink {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn free_path(&self, file_name: &str) -> PathBuf {
        let candidate = self.dir.join(file_name);
        if !candidate.exists() {
            return candidate;
        }
        let (stem, ext) = match file_name.rsplit_once('.') {
            Some((stem, ext)) => (stem, format!(".{ext}")),
            None => (file_name, String::new()),
        };
        (2..)
            .map(|n| self.dir.join(format!("{stem} ({n}){ext}")))
            .find(|path| !path.exists())
            .unwrap_or(candidate)
    }
}

impl ArtifactSink for DirectorySink {
    fn save(&self, file_name: &str, bytes: Vec<u8>) -> Result<PathBuf, ExportError> {
        fs::create_dir_all(&self.dir).map_err(save_error(&self.dir))?;

        let dest = self.free_path(file_name);
        let mut staged = NamedTempFile::new_in(&self.dir).map_err(save_error(&dest))?;
        staged.write_all(&bytes).map_err(save_error(&dest))?;
        staged.flush().map_err(save_error(&dest))?;
        staged
            .persist(&dest)
            .map_err(|err| save_error(&dest)(err.error))?;
        Ok(dest)
    }
}

fn save_error(path: &Path) -> impl FnOnce(io::Error) -> ExportError + use<> {
    let path = path.to_path_buf();
    move |source| ExportError::Save { path, source }
}

struct InFlight<'a>(&'a Cell<bool>);

impl<'a> InFlight<'a> {
    fn acquire(flag: &'a Cell<bool>) -> Option<Self> {
        if flag.replace(true) {
            None
        } else {
            Some(Self(flag))
        }
    }
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.0.set(false);
    }
}

/// Runs exports against a title collaborator and a sink. Not `Sync`: one
/// dispatcher belongs to one single-threaded session.
pub struct ExportDispatcher<T, S> {
    suggester: T,
    sink: S,
    engine: RasterEngine,
    settings: ExportConfig,
    in_flight: Cell<bool>,
}

impl<T: TitleSuggester, S: ArtifactSink> ExportDispatcher<T, S> {
    pub fn new(suggester: T, sink: S, settings: ExportConfig) -> Self {
        Self {
            suggester,
            sink,
            engine: RasterEngine::new(settings.max_surface_px),
            settings,
            in_flight: Cell::new(false),
        }
    }

    pub fn suggester(&self) -> &T {
        &self.suggester
    }

    pub fn sink(&self) -> &S {
        &self.sink
    }

    pub fn settings(&self) -> &ExportConfig {
        &self.settings
    }

    pub fn is_busy(&self) -> bool {
        self.in_flight.get()
    }

    pub async fn export(
        &self,
        context: ExportContext<'_>,
        request: ExportRequest,
    ) -> Result<ExportOutcome, ExportError> {
        let Some(_guard) = InFlight::acquire(&self.in_flight) else {
            info!("Export already in progress; request skipped");
            return Ok(ExportOutcome::Skipped);
        };

        let diagram = match context.diagram {
            Some(diagram) if !context.source.trim().is_empty() => diagram,
            _ => return Err(ExportError::EmptyDiagram),
        };
        let background = request
            .background_color
            .clone()
            .unwrap_or_else(|| context.theme.background.clone());
        let fill = Color::new(&background).map_err(ExportError::InvalidDocument)?;
        let document = sanitize(diagram, context.theme, &background)?;

        let (bytes, width, height, scale, attempts) = match request.format {
            ExportFormat::Vector => {
                let (width, height) = document.bounds().pixel_size(1.0);
                let svg = document.to_svg_string();
                (svg.into_bytes(), width as u32, height as u32, 1.0, Vec::new())
            }
            ExportFormat::Raster { kind, quality } => {
                let scales = cascade_for(request.desired_scale, &self.settings.scales);
                debug!(scales:?; "Rasterization candidates");
                let report = self
                    .engine
                    .rasterize(&document, &scales, kind, quality, fill)
                    .await;
                match report.outcome {
                    Cascade::Success(artifact) => (
                        artifact.bytes,
                        artifact.width,
                        artifact.height,
                        artifact.scale,
                        report.attempts,
                    ),
                    Cascade::Exhausted(last) => return Err(ExportError::Failed { last }),
                }
            }
        };
        drop(document);

        let stem = self
            .resolve_title(context.source, request.fallback_name.as_deref())
            .await;
        let file_name = format!("{stem}.{}", request.format.extension());
        let path = self.sink.save(&file_name, bytes)?;
        info!(path:? = path, width, height, scale; "Exported diagram");

        Ok(ExportOutcome::Saved(SavedExport {
            path,
            format: request.format,
            width,
            height,
            scale,
            attempts,
        }))
    }

    async fn resolve_title(&self, source: &str, fallback: Option<&str>) -> String {
        let max_len = self.settings.max_title_length;
        let fallback = sanitize_title(fallback.unwrap_or(&self.settings.fallback_name), max_len)
            .unwrap_or_else(|| FALLBACK_TITLE.to_string());

        match self.suggester.suggest_title(source).await {
            Ok(raw) => sanitize_title(&raw, max_len).unwrap_or_else(|| {
                warn!(raw = raw.as_str(); "Suggested title is unusable; using fallback name");
                fallback
            }),
            Err(TitleError::Unavailable) => fallback,
            Err(err) => {
                warn!(err:err; "Title suggestion failed; using fallback name");
                fallback
            }
        }
    }
}
