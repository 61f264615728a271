use once_cell::sync::Lazy;
use regex::Regex;

static INIT_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?m)^\s*%%\{\s*init\s*:\s*(\{.*\})\s*\}%%").unwrap());

pub const THEME_NAMES: [&str; 5] = ["default", "neutral", "dark", "forest", "base"];

/// Export-relevant part of a diagram theme: the page background, the color
/// used for plain labels, and the stylesheet the live preview is styled with.
#[derive(Debug, Clone, PartialEq)]
pub struct Theme {
    pub name: String,
    pub background: String,
    pub text_color: String,
    pub presentation_source: String,
}

impl Default for Theme {
    fn default() -> Self {
        Self::mermaid_default()
    }
}

impl Theme {
    pub fn mermaid_default() -> Self {
        Self {
            name: "default".to_string(),
            background: "#ffffff".to_string(),
            text_color: "#333333".to_string(),
            presentation_source: stylesheet("#333333", "#333333", "#ECECFF", "#9370DB"),
        }
    }

    pub fn neutral() -> Self {
        Self {
            name: "neutral".to_string(),
            background: "#ffffff".to_string(),
            text_color: "#333333".to_string(),
            presentation_source: stylesheet("#333333", "#666666", "#EEEEEE", "#999999"),
        }
    }

    pub fn dark() -> Self {
        Self {
            name: "dark".to_string(),
            background: "#0f172a".to_string(),
            text_color: "#CCCCCC".to_string(),
            presentation_source: stylesheet("#CCCCCC", "#D3D3D3", "#1F2020", "#CCCCCC"),
        }
    }

    pub fn forest() -> Self {
        Self {
            name: "forest".to_string(),
            background: "#ffffff".to_string(),
            text_color: "#000000".to_string(),
            presentation_source: stylesheet("#000000", "#000000", "#CDE498", "#13540C"),
        }
    }

    pub fn base() -> Self {
        Self {
            name: "base".to_string(),
            background: "#ffffff".to_string(),
            text_color: "#333333".to_string(),
            presentation_source: stylesheet("#333333", "#333333", "#FFF4DD", "#9D9D9D"),
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        match name.trim().to_ascii_lowercase().as_str() {
            "default" | "mermaid" => Some(Self::mermaid_default()),
            "neutral" => Some(Self::neutral()),
            "dark" => Some(Self::dark()),
            "forest" => Some(Self::forest()),
            "base" => Some(Self::base()),
            _ => None,
        }
    }
}

fn stylesheet(text: &str, line: &str, node_fill: &str, node_stroke: &str) -> String {
    format!(
        "text {{ fill: {text}; }}\n\
         .node rect, .node circle, .node polygon, .node path {{ fill: {node_fill}; stroke: {node_stroke}; stroke-width: 1px; }}\n\
         .flowchart-link, .edgePath .path, .messageLine0, .messageLine1 {{ stroke: {line}; fill: none; }}\n\
         .marker, .arrowheadPath {{ fill: {line}; stroke: {line}; }}\n"
    )
}

/// Theme named by a Mermaid `%%{init: {"theme": "..."}}%%` directive, if any.
pub fn theme_from_directive(source: &str) -> Option<Theme> {
    let captures = INIT_RE.captures(source)?;
    let payload = captures.get(1)?.as_str();
    let value = json5::from_str::<serde_json::Value>(payload).ok()?;
    value
        .get("theme")
        .and_then(|v| v.as_str())
        .and_then(Theme::from_name)
}
