//! The state one editing session works on: source text, the diagram rendered
//! from it, the viewport and the theme.

use log::{debug, info};
use once_cell::sync::Lazy;
use regex::Regex;

use crate::error::SyntaxError;
use crate::export::ExportContext;
use crate::renderer::{DiagramRenderer, VectorDiagram};
use crate::theme::{Theme, theme_from_directive};
use crate::viewport::ViewportController;

static FENCE_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"```(?:mermaid)?").unwrap());
static DIRECTIVE_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?s)%%\{.*?\}%%").unwrap());
static FRONTMATTER_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?s)\A\s*---\r?\n.*?\n---").unwrap());

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DiagramKind {
    Flowchart,
    Sequence,
    Class,
    State,
    Er,
    Journey,
    Gantt,
    Pie,
    Quadrant,
    Mindmap,
    Timeline,
    GitGraph,
    Architecture,
    Other,
}

impl DiagramKind {
    /// Kind named by the first meaningful line of a source.
    pub fn detect(source: &str) -> Self {
        let body = FRONTMATTER_RE.replace(source, "");
        let stripped = DIRECTIVE_RE.replace_all(&body, "");
        let Some(header) = stripped
            .lines()
            .map(str::trim)
            .find(|line| !line.is_empty() && !line.starts_with("%%"))
        else {
            return DiagramKind::Other;
        };
        let keyword = header
            .split(|c: char| c.is_whitespace() || c == ';')
            .next()
            .unwrap_or("")
            .to_ascii_lowercase();
        match keyword.as_str() {
            "flowchart" | "graph" | "flowchart-elk" => DiagramKind::Flowchart,
            "sequencediagram" => DiagramKind::Sequence,
            "classdiagram" | "classdiagram-v2" => DiagramKind::Class,
            "statediagram" | "statediagram-v2" => DiagramKind::State,
            "erdiagram" => DiagramKind::Er,
            "journey" => DiagramKind::Journey,
            "gantt" => DiagramKind::Gantt,
            "pie" => DiagramKind::Pie,
            "quadrantchart" => DiagramKind::Quadrant,
            "mindmap" => DiagramKind::Mindmap,
            "timeline" => DiagramKind::Timeline,
            "gitgraph" => DiagramKind::GitGraph,
            "architecture" | "architecture-beta" => DiagramKind::Architecture,
            _ => DiagramKind::Other,
        }
    }

    /// Zoom a freshly generated diagram of this kind opens at.
    pub fn initial_scale(self) -> f32 {
        match self {
            DiagramKind::Flowchart
            | DiagramKind::Er
            | DiagramKind::Class
            | DiagramKind::Architecture
            | DiagramKind::Quadrant => 1.0,
            DiagramKind::Timeline | DiagramKind::Gantt => 3.0,
            _ => 2.0,
        }
    }
}

/// Removes Markdown code fences that generated sources often arrive wrapped in.
pub fn strip_code_fences(raw: &str) -> String {
    FENCE_RE.replace_all(raw, "").trim().to_string()
}

pub struct Session<R> {
    renderer: R,
    source: String,
    diagram: Option<VectorDiagram>,
    render_error: Option<SyntaxError>,
    viewport: ViewportController,
    theme: Theme,
    directive_theme: Option<Theme>,
}

impl<R: DiagramRenderer> Session<R> {
    pub fn new(renderer: R, theme: Theme) -> Self {
        Self {
            renderer,
            source: String::new(),
            diagram: None,
            render_error: None,
            viewport: ViewportController::new(),
            theme,
            directive_theme: None,
        }
    }

    pub fn source(&self) -> &str {
        &self.source
    }

    pub fn diagram(&self) -> Option<&VectorDiagram> {
        self.diagram.as_ref()
    }

    pub fn render_error(&self) -> Option<&SyntaxError> {
        self.render_error.as_ref()
    }

    pub fn viewport(&self) -> &ViewportController {
        &self.viewport
    }

    pub fn viewport_mut(&mut self) -> &mut ViewportController {
        &mut self.viewport
    }

    /// Theme the current diagram is drawn with: an init directive in the
    /// source wins over the session theme.
    pub fn theme(&self) -> &Theme {
        self.directive_theme.as_ref().unwrap_or(&self.theme)
    }

    /// Replaces the source and renders it from scratch. The previous diagram
    /// is dropped whether or not the new source renders.
    pub fn set_source(&mut self, source: impl Into<String>) -> Result<(), SyntaxError> {
        self.source = source.into();
        self.directive_theme = theme_from_directive(&self.source);
        self.rerender()
    }

    /// Takes a generated source: strips code fences, renders it and opens the
    /// viewport at the zoom suited to its kind.
    pub fn load_generated(&mut self, raw: &str) -> Result<(), SyntaxError> {
        let source = strip_code_fences(raw);
        let kind = DiagramKind::detect(&source);
        self.viewport.reset_view();
        self.viewport.set_scale(kind.initial_scale());
        debug!(kind:? = kind, scale = self.viewport.scale(); "Loaded generated diagram");
        self.set_source(source)
    }

    pub fn set_theme(&mut self, theme: Theme) -> Result<(), SyntaxError> {
        info!(theme = theme.name.as_str(); "Switching theme");
        self.theme = theme;
        self.rerender()
    }

    /// Back to a blank session: no source, no diagram, default view. The
    /// selected theme and pan tool are kept.
    pub fn reset_all(&mut self) {
        self.source.clear();
        self.diagram = None;
        self.render_error = None;
        self.directive_theme = None;
        self.viewport.reset();
    }

    pub fn export_context(&self) -> ExportContext<'_> {
        ExportContext {
            source: &self.source,
            diagram: self.diagram.as_ref(),
            theme: self.theme(),
        }
    }

    fn rerender(&mut self) -> Result<(), SyntaxError> {
        self.diagram = None;
        self.render_error = None;
        if self.source.trim().is_empty() {
            return Ok(());
        }
        let theme = self.directive_theme.as_ref().unwrap_or(&self.theme);
        match self.renderer.render(&self.source, theme) {
            Ok(diagram) => {
                debug!(
                    width = diagram.bounds.width,
                    height = diagram.bounds.height;
                    "Rendered diagram"
                );
                self.diagram = Some(diagram);
                Ok(())
            }
            Err(err) => {
                self.render_error = Some(err.clone());
                Err(err)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::renderer::SvgSourceRenderer;
    use crate::viewport::Tool;
    use std::cell::RefCell;

    const SQUARE: &str = r#"<svg><rect width="10" height="10"/></svg>"#;

    /// Records the theme each render was asked for.
    #[derive(Default)]
    struct Recording {
        themes: RefCell<Vec<String>>,
    }

    impl DiagramRenderer for Recording {
        fn render(&self, _source: &str, theme: &Theme) -> Result<VectorDiagram, SyntaxError> {
            self.themes.borrow_mut().push(theme.name.clone());
            VectorDiagram::from_markup(SQUARE)
        }
    }

    #[test]
    fn detects_kind_past_directives_and_comments() {
        assert_eq!(DiagramKind::detect("graph TD; A-->B"), DiagramKind::Flowchart);
        assert_eq!(
            DiagramKind::detect("%%{init: {'theme': 'dark'}}%%\n%% note\ngantt\n  title Plan"),
            DiagramKind::Gantt
        );
        assert_eq!(DiagramKind::detect("erDiagram\n  A ||--o{ B : has"), DiagramKind::Er);
        assert_eq!(DiagramKind::detect("sequenceDiagram"), DiagramKind::Sequence);
        assert_eq!(
            DiagramKind::detect("---\ntitle: Orders\n---\nclassDiagram\n  class A"),
            DiagramKind::Class
        );
        assert_eq!(DiagramKind::detect(""), DiagramKind::Other);
    }

    #[test]
    fn initial_scale_by_kind() {
        assert_eq!(DiagramKind::Flowchart.initial_scale(), 1.0);
        assert_eq!(DiagramKind::Timeline.initial_scale(), 3.0);
        assert_eq!(DiagramKind::Mindmap.initial_scale(), 2.0);
    }

    #[test]
    fn strips_fences() {
        assert_eq!(strip_code_fences("```mermaid\ngraph TD\n```\n"), "graph TD");
        assert_eq!(strip_code_fences("pie\n"), "pie");
    }

    #[test]
    fn syntax_error_discards_previous_diagram() {
        let mut session = Session::new(SvgSourceRenderer, Theme::default());
        session.set_source(SQUARE).unwrap();
        assert!(session.diagram().is_some());

        assert!(session.set_source("<svg><g></svg>").is_err());
        assert!(session.diagram().is_none());
        assert!(session.render_error().is_some());
        assert!(session.export_context().diagram.is_none());
    }

    #[test]
    fn generated_source_sets_initial_view() {
        let mut session = Session::new(Recording::default(), Theme::default());
        session.viewport_mut().begin_drag();
        session.viewport_mut().update_drag(12.0, -4.0);
        session.viewport_mut().end_drag();
        session.viewport_mut().set_scale(4.0);
        session.load_generated("```mermaid\ntimeline\n  2024 : start\n```").unwrap();

        assert_eq!(session.source(), "timeline\n  2024 : start");
        assert_eq!(session.viewport().scale(), 3.0);
        assert_eq!(session.viewport().pan().x, 0.0);
    }

    #[test]
    fn theme_changes_rerender_and_directives_win() {
        let mut session = Session::new(Recording::default(), Theme::default());
        session.set_source("graph TD; A-->B").unwrap();
        session.set_theme(Theme::dark()).unwrap();
        session
            .set_source("%%{init: {\"theme\": \"forest\"}}%%\ngraph TD; A-->B")
            .unwrap();

        assert_eq!(*session.renderer.themes.borrow(), ["default", "dark", "forest"]);
        assert_eq!(session.export_context().theme.name, "forest");
    }

    #[test]
    fn reset_all_clears_content_and_view() {
        let mut session = Session::new(SvgSourceRenderer, Theme::dark());
        session.set_source(SQUARE).unwrap();
        session.viewport_mut().set_scale(2.5);
        session.viewport_mut().set_active_tool(Tool::None);

        session.reset_all();
        assert_eq!(session.source(), "");
        assert!(session.diagram().is_none());
        assert_eq!(session.viewport().scale(), 1.0);
        assert_eq!(session.viewport().active_tool(), Tool::None);
        assert_eq!(session.theme().name, "dark");
    }
}
