use crate::config::load_config;
use crate::error::{ConfigError, TitleError};
use crate::export::{DirectorySink, ExportDispatcher, ExportFormat, ExportOutcome, ExportRequest};
use crate::renderer::{CommandRenderer, DiagramRenderer, SvgSourceRenderer};
use crate::session::Session;
use crate::theme::Theme;
use crate::title::TitleSuggester;
use anyhow::{Context, Result};
use clap::{Parser, ValueEnum};
use log::{info, warn};
use std::io::{self, Read};
use std::path::{Path, PathBuf};

#[derive(Parser, Debug)]
#[command(
    name = "mmdx",
    version,
    about = "Export rendered Mermaid diagrams as standalone SVG, PNG or JPEG files"
)]
pub struct Args {
    /// Input file (.svg, .mmd or .md) or '-' for stdin
    #[arg(short = 'i', long = "input")]
    pub input: Option<PathBuf>,

    /// Directory the exported files are written to
    #[arg(short = 'o', long = "outputDir", default_value = ".")]
    pub output_dir: PathBuf,

    /// Output format
    #[arg(short = 'e', long = "outputFormat", value_enum, default_value = "svg")]
    pub output_format: OutputFormat,

    /// Config JSON file
    #[arg(short = 'c', long = "configFile")]
    pub config: Option<PathBuf>,

    /// Theme preset: default, neutral, dark, forest or base
    #[arg(short = 't', long = "theme")]
    pub theme: Option<String>,

    /// JPEG quality between 0 and 1
    #[arg(short = 'q', long = "quality")]
    pub quality: Option<f32>,

    /// Raster scale to try first
    #[arg(short = 's', long = "scale", default_value_t = 2.0)]
    pub scale: f32,

    /// Background color; defaults to the theme background
    #[arg(short = 'b', long = "backgroundColor")]
    pub background: Option<String>,

    /// External renderer turning diagram source into SVG, e.g. "mmdr -e svg"
    #[arg(long = "renderer")]
    pub renderer: Option<String>,

    /// Log level (off, error, warn, info, debug, trace)
    #[arg(long = "log-level", default_value = "warn")]
    pub log_level: String,
}

#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputFormat {
    Svg,
    Png,
    #[value(alias = "jpeg")]
    Jpg,
}

impl OutputFormat {
    fn export_format(self, quality: f32) -> ExportFormat {
        match self {
            OutputFormat::Svg => ExportFormat::Vector,
            OutputFormat::Png => ExportFormat::png(),
            OutputFormat::Jpg => ExportFormat::jpeg(quality),
        }
    }
}

/// Title source for the command line: Gemini when a key is configured.
enum Titles {
    #[cfg(feature = "gemini")]
    Gemini(crate::title::GeminiTitleSuggester),
    Off,
}

impl TitleSuggester for Titles {
    #[cfg_attr(not(feature = "gemini"), allow(unused_variables))]
    async fn suggest_title(&self, source: &str) -> Result<String, TitleError> {
        match self {
            #[cfg(feature = "gemini")]
            Titles::Gemini(gemini) => gemini.suggest_title(source).await,
            Titles::Off => Err(TitleError::Unavailable),
        }
    }
}

pub fn run(args: &Args) -> Result<()> {
    let mut config = load_config(args.config.as_deref())?;
    if let Some(name) = args.theme.as_deref() {
        config.theme =
            Theme::from_name(name).ok_or_else(|| ConfigError::UnknownTheme(name.to_string()))?;
    }
    let quality = args.quality.unwrap_or(config.export.quality).clamp(0.0, 1.0);

    let (input, is_markdown) = read_input(args.input.as_deref())?;
    let diagrams = if is_markdown {
        extract_mermaid_blocks(&input)
    } else {
        vec![input]
    };

    if diagrams.is_empty() {
        return Err(anyhow::anyhow!("No Mermaid diagrams found in input"));
    }

    let command = args.renderer.as_deref().or(config.renderer.command.as_deref());
    let renderer: Box<dyn DiagramRenderer> = match command {
        Some(line) => Box::new(
            CommandRenderer::from_command_line(line)
                .ok_or_else(|| anyhow::anyhow!("Renderer command is empty"))?,
        ),
        None => Box::new(SvgSourceRenderer),
    };
    let titles = title_source(&config.title);

    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()?;
    let mut session = Session::new(renderer.as_ref(), config.theme.clone());
    let dispatcher = ExportDispatcher::new(
        titles,
        DirectorySink::new(&args.output_dir),
        config.export.clone(),
    );

    let multiple = diagrams.len() > 1;
    for (idx, source) in diagrams.iter().enumerate() {
        if command.is_none() && !source.trim_start().starts_with('<') {
            return Err(anyhow::anyhow!(
                "Input is not SVG markup; pass --renderer (for example \"mmdr -e svg\") to render diagram source"
            ));
        }
        session
            .set_source(source.as_str())
            .with_context(|| format!("Failed to render diagram {}", idx + 1))?;

        let mut request = ExportRequest::new(args.output_format.export_format(quality))
            .with_scale(args.scale);
        if let Some(background) = &args.background {
            request = request.with_background(background.clone());
        }
        if multiple {
            request = request.with_fallback_name(format!("diagram-{}", idx + 1));
        }

        match runtime.block_on(dispatcher.export(session.export_context(), request))? {
            ExportOutcome::Saved(saved) => {
                info!(path:? = saved.path, scale = saved.scale; "Saved diagram");
                println!("{}", saved.path.display());
            }
            ExportOutcome::Skipped => warn!("Export skipped"),
        }
    }

    Ok(())
}

#[cfg(feature = "gemini")]
fn title_source(config: &crate::config::TitleConfig) -> Titles {
    match crate::title::GeminiTitleSuggester::from_env(config) {
        Some(gemini) => Titles::Gemini(gemini),
        None => Titles::Off,
    }
}

#[cfg(not(feature = "gemini"))]
fn title_source(_config: &crate::config::TitleConfig) -> Titles {
    Titles::Off
}

fn read_input(path: Option<&Path>) -> Result<(String, bool)> {
    if let Some(path) = path {
        if path == Path::new("-") {
            let mut buf = String::new();
            io::stdin().read_to_string(&mut buf)?;
            return Ok((buf, false));
        }
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read {}", path.display()))?;
        let is_md = path
            .extension()
            .and_then(|e| e.to_str())
            .map(|ext| matches!(ext, "md" | "markdown"))
            .unwrap_or(false);
        return Ok((content, is_md));
    }

    let mut buf = String::new();
    io::stdin().read_to_string(&mut buf)?;
    Ok((buf, false))
}

fn extract_mermaid_blocks(input: &str) -> Vec<String> {
    let mut blocks = Vec::new();
    let mut fence: Option<&str> = None;
    let mut current = Vec::new();

    for line in input.lines() {
        let trimmed = line.trim();
        match fence {
            None => fence = detect_mermaid_fence(trimmed),
            Some(open) if is_fence_end(trimmed, open) => {
                fence = None;
                blocks.push(current.join("\n"));
                current.clear();
            }
            Some(_) => current.push(line),
        }
    }

    blocks
}

fn detect_mermaid_fence(line: &str) -> Option<&'static str> {
    ["```", "~~~", ":::"].into_iter().find(|fence| {
        line.starts_with(fence)
            && line
                .trim_start_matches(fence.as_bytes()[0] as char)
                .trim()
                .starts_with("mermaid")
    })
}

fn is_fence_end(line: &str, fence: &str) -> bool {
    line.strip_prefix(fence)
        .is_some_and(|rest| rest.trim().is_empty())
}
