use std::path::Path;

use serde::Deserialize;

use crate::error::ConfigError;
use crate::raster::{DEFAULT_JPEG_QUALITY, DEFAULT_SCALES, MAX_SURFACE_PX};
use crate::theme::Theme;
use crate::title::{DEFAULT_MAX_TITLE_LENGTH, FALLBACK_TITLE};

#[derive(Debug, Clone)]
pub struct ExportConfig {
    /// Default candidate scales, largest first.
    pub scales: Vec<f32>,
    pub max_surface_px: u32,
    /// JPEG quality in `0.0..=1.0`.
    pub quality: f32,
    pub fallback_name: String,
    pub max_title_length: usize,
}

impl Default for ExportConfig {
    fn default() -> Self {
        Self {
            scales: DEFAULT_SCALES.to_vec(),
            max_surface_px: MAX_SURFACE_PX,
            quality: DEFAULT_JPEG_QUALITY,
            fallback_name: FALLBACK_TITLE.to_string(),
            max_title_length: DEFAULT_MAX_TITLE_LENGTH,
        }
    }
}

#[derive(Debug, Clone)]
pub struct TitleConfig {
    pub endpoint: String,
    pub model: String,
    /// Environment variable holding the API key.
    pub api_key_env: String,
    pub timeout_ms: u64,
}

impl Default for TitleConfig {
    fn default() -> Self {
        Self {
            endpoint: "https://generativelanguage.googleapis.com/v1beta".to_string(),
            model: "gemini-2.5-flash".to_string(),
            api_key_env: "GEMINI_API_KEY".to_string(),
            timeout_ms: 10_000,
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RendererConfig {
    /// External renderer command line, e.g. `mmdr -e svg`. Without one the
    /// input is expected to be SVG already.
    pub command: Option<String>,
}

#[derive(Debug, Clone, Default)]
pub struct Config {
    pub theme: Theme,
    pub export: ExportConfig,
    pub title: TitleConfig,
    pub renderer: RendererConfig,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ThemeVariables {
    background: Option<String>,
    text_color: Option<String>,
}

#[derive(Debug, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
struct ExportConfigFile {
    scales: Option<Vec<f32>>,
    max_surface_px: Option<u32>,
    quality: Option<f32>,
    fallback_name: Option<String>,
    max_title_length: Option<usize>,
}

#[derive(Debug, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
struct TitleConfigFile {
    endpoint: Option<String>,
    model: Option<String>,
    api_key_env: Option<String>,
    timeout_ms: Option<u64>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ConfigFile {
    theme: Option<String>,
    theme_variables: Option<ThemeVariables>,
    /// Extra CSS appended to the theme stylesheet.
    stylesheet: Option<String>,
    export: Option<ExportConfigFile>,
    title: Option<TitleConfigFile>,
    renderer: Option<RendererConfig>,
}

pub fn load_config(path: Option<&Path>) -> Result<Config, ConfigError> {
    let mut config = Config::default();
    let Some(path) = path else {
        return Ok(config);
    };

    let contents = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
        path: path.to_path_buf(),
        source,
    })?;
    let parsed: ConfigFile =
        serde_json::from_str(&contents).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })?;

    if let Some(theme_name) = parsed.theme.as_deref() {
        config.theme = Theme::from_name(theme_name)
            .ok_or_else(|| ConfigError::UnknownTheme(theme_name.to_string()))?;
    }
    if let Some(vars) = parsed.theme_variables {
        if let Some(v) = vars.background {
            config.theme.background = v;
        }
        if let Some(v) = vars.text_color {
            config.theme.text_color = v;
        }
    }
    if let Some(css) = parsed.stylesheet {
        config.theme.presentation_source.push('\n');
        config.theme.presentation_source.push_str(&css);
    }

    if let Some(export) = parsed.export {
        if let Some(v) = export.scales {
            config.export.scales = v;
        }
        if let Some(v) = export.max_surface_px {
            config.export.max_surface_px = v;
        }
        if let Some(v) = export.quality {
            config.export.quality = v.clamp(0.0, 1.0);
        }
        if let Some(v) = export.fallback_name {
            config.export.fallback_name = v;
        }
        if let Some(v) = export.max_title_length {
            config.export.max_title_length = v;
        }
    }

    if let Some(title) = parsed.title {
        if let Some(v) = title.endpoint {
            config.title.endpoint = v;
        }
        if let Some(v) = title.model {
            config.title.model = v;
        }
        if let Some(v) = title.api_key_env {
            config.title.api_key_env = v;
        }
        if let Some(v) = title.timeout_ms {
            config.title.timeout_ms = v;
        }
    }

    if let Some(renderer) = parsed.renderer {
        config.renderer = renderer;
    }

    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn write_config(contents: &str) -> tempfile::NamedTempFile {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(contents.as_bytes()).unwrap();
        file
    }

    #[test]
    fn no_path_gives_defaults() {
        let config = load_config(None).unwrap();
        assert_eq!(config.theme.name, "default");
        assert_eq!(config.export.scales, DEFAULT_SCALES);
        assert_eq!(config.export.max_surface_px, 16384);
        assert_eq!(config.export.fallback_name, "diagram");
        assert!(config.renderer.command.is_none());
    }

    #[test]
    fn file_overrides_selected_fields() {
        let file = write_config(
            r##"{
                "theme": "dark",
                "themeVariables": { "textColor": "#eeeeee" },
                "stylesheet": ".note rect { fill: #fff5ad; }",
                "export": { "scales": [3, 1], "maxSurfacePx": 8192, "quality": 1.5 },
                "title": { "model": "gemini-2.0-flash" },
                "renderer": { "command": "mmdr -e svg" }
            }"##,
        );
        let config = load_config(Some(file.path())).unwrap();
        assert_eq!(config.theme.name, "dark");
        assert_eq!(config.theme.background, "#0f172a");
        assert_eq!(config.theme.text_color, "#eeeeee");
        assert!(config.theme.presentation_source.ends_with(".note rect { fill: #fff5ad; }"));
        assert_eq!(config.export.scales, [3.0, 1.0]);
        assert_eq!(config.export.max_surface_px, 8192);
        assert_eq!(config.export.quality, 1.0);
        assert_eq!(config.export.max_title_length, 50);
        assert_eq!(config.title.model, "gemini-2.0-flash");
        assert_eq!(config.title.api_key_env, "GEMINI_API_KEY");
        assert_eq!(config.renderer.command.as_deref(), Some("mmdr -e svg"));
    }

    #[test]
    fn unknown_theme_is_an_error() {
        let file = write_config(r#"{ "theme": "solarized" }"#);
        let err = load_config(Some(file.path())).unwrap_err();
        assert_eq!(
            err.to_string(),
            "unknown theme `solarized` (expected one of: default, neutral, dark, forest, base)"
        );
        assert!(matches!(err, ConfigError::UnknownTheme(name) if name == "solarized"));
    }

    #[test]
    fn malformed_file_reports_path() {
        let file = write_config("{ theme: ");
        let err = load_config(Some(file.path())).unwrap_err();
        assert!(matches!(err, ConfigError::Parse { .. }));
        assert!(err.to_string().contains(&file.path().display().to_string()));
    }
}
