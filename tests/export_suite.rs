use std::cell::{Cell, RefCell};
use std::path::{Path, PathBuf};

use mermaid_rs_export::config::ExportConfig;
use mermaid_rs_export::document::{Element, parse};
use mermaid_rs_export::error::{ExportError, RasterError, TitleError};
use mermaid_rs_export::export::{
    ArtifactSink, DirectorySink, ExportContext, ExportDispatcher, ExportFormat, ExportOutcome,
    ExportRequest, SavedExport,
};
use mermaid_rs_export::renderer::{SvgSourceRenderer, VectorDiagram};
use mermaid_rs_export::sanitize::{measure, sanitize};
use mermaid_rs_export::session::Session;
use mermaid_rs_export::theme::Theme;
use mermaid_rs_export::title::TitleSuggester;

fn fixture(name: &str) -> String {
    let path = Path::new(env!("CARGO_MANIFEST_DIR"))
        .join("tests")
        .join("fixtures")
        .join(name);
    std::fs::read_to_string(path).expect("fixture read failed")
}

fn plain_theme() -> Theme {
    Theme {
        presentation_source: String::new(),
        ..Theme::default()
    }
}

#[derive(Default)]
struct MemorySink {
    saved: RefCell<Vec<(String, Vec<u8>)>>,
}

impl ArtifactSink for MemorySink {
    fn save(&self, file_name: &str, bytes: Vec<u8>) -> Result<PathBuf, ExportError> {
        self.saved.borrow_mut().push((file_name.to_string(), bytes));
        Ok(PathBuf::from(file_name))
    }
}

/// Counts lookups and yields a few times before answering.
#[derive(Default)]
struct SlowTitles {
    calls: Cell<usize>,
}

impl TitleSuggester for SlowTitles {
    async fn suggest_title(&self, _source: &str) -> Result<String, TitleError> {
        self.calls.set(self.calls.get() + 1);
        for _ in 0..3 {
            tokio::task::yield_now().await;
        }
        Ok("Review Flow".to_string())
    }
}

/// Never answers.
struct StuckTitles;

impl TitleSuggester for StuckTitles {
    async fn suggest_title(&self, _source: &str) -> Result<String, TitleError> {
        std::future::pending::<()>().await;
        Err(TitleError::Timeout)
    }
}

fn saved(outcome: ExportOutcome) -> SavedExport {
    match outcome {
        ExportOutcome::Saved(saved) => saved,
        ExportOutcome::Skipped => panic!("export was skipped"),
    }
}

fn all_elements(root: &Element) -> Vec<&Element> {
    root.find_all(&|_: &Element| true)
}

#[tokio::test]
async fn cascade_saves_exactly_one_artifact_at_half_scale() {
    let diagram =
        VectorDiagram::from_markup(r#"<svg><rect width="100" height="100"/></svg>"#).unwrap();
    let theme = plain_theme();
    let settings = ExportConfig {
        max_surface_px: 60,
        ..ExportConfig::default()
    };
    let dispatcher = ExportDispatcher::new(SlowTitles::default(), MemorySink::default(), settings);
    let context = ExportContext {
        source: "graph TD; A",
        diagram: Some(&diagram),
        theme: &theme,
    };

    let result = saved(
        dispatcher
            .export(context, ExportRequest::new(ExportFormat::png()).with_scale(2.0))
            .await
            .unwrap(),
    );

    assert_eq!(result.scale, 0.5);
    assert_eq!((result.width, result.height), (50, 50));
    let tried: Vec<f32> = result.attempts.iter().map(|a| a.scale).collect();
    assert_eq!(tried, [2.0, 1.0, 0.5]);
    assert!(matches!(
        result.attempts[1].error,
        Some(RasterError::SurfaceTooLarge {
            width: 100,
            height: 100,
            max: 60
        })
    ));
    assert!(result.attempts[2].error.is_none());

    let sink = dispatcher.sink().saved.borrow();
    assert_eq!(sink.len(), 1);
    assert_eq!(sink[0].0, "Review Flow.png");
    let png = image::load_from_memory(&sink[0].1).unwrap();
    assert_eq!((png.width(), png.height()), (50, 50));
}

#[tokio::test]
async fn exhausted_cascade_surfaces_guidance() {
    let diagram =
        VectorDiagram::from_markup(r#"<svg><rect width="100" height="100"/></svg>"#).unwrap();
    let theme = plain_theme();
    let settings = ExportConfig {
        max_surface_px: 10,
        ..ExportConfig::default()
    };
    let dispatcher = ExportDispatcher::new(SlowTitles::default(), MemorySink::default(), settings);
    let context = ExportContext {
        source: "graph TD; A",
        diagram: Some(&diagram),
        theme: &theme,
    };

    let err = dispatcher
        .export(context, ExportRequest::new(ExportFormat::jpeg(0.95)))
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        ExportError::Failed {
            last: RasterError::SurfaceTooLarge { width: 50, .. }
        }
    ));
    assert!(err.to_string().contains("export as SVG"));
    assert!(dispatcher.sink().saved.borrow().is_empty());
    assert!(!dispatcher.is_busy());
}

#[tokio::test]
async fn empty_diagram_fails_before_title_or_raster() {
    let theme = Theme::default();
    let dispatcher =
        ExportDispatcher::new(SlowTitles::default(), MemorySink::default(), ExportConfig::default());

    let no_source = ExportContext {
        source: "",
        diagram: None,
        theme: &theme,
    };
    let err = dispatcher
        .export(no_source, ExportRequest::new(ExportFormat::png()))
        .await
        .unwrap_err();
    assert!(matches!(err, ExportError::EmptyDiagram));

    let blank = VectorDiagram::from_markup(r#"<svg viewBox="0 0 400 300"><g/></svg>"#).unwrap();
    let nothing_drawn = ExportContext {
        source: "graph TD",
        diagram: Some(&blank),
        theme: &theme,
    };
    let err = dispatcher
        .export(nothing_drawn, ExportRequest::new(ExportFormat::Vector))
        .await
        .unwrap_err();
    assert!(matches!(err, ExportError::EmptyDiagram));

    let mut session = Session::new(SvgSourceRenderer, theme.clone());
    session.set_source("   ").unwrap();
    let err = dispatcher
        .export(session.export_context(), ExportRequest::new(ExportFormat::png()))
        .await
        .unwrap_err();
    assert!(matches!(err, ExportError::EmptyDiagram));

    assert_eq!(dispatcher.suggester().calls.get(), 0);
    assert!(dispatcher.sink().saved.borrow().is_empty());
}

#[tokio::test]
async fn vector_export_is_self_contained() {
    let mut session = Session::new(SvgSourceRenderer, Theme::default());
    session.set_source(fixture("flowchart.svg")).unwrap();
    let live = session.diagram().unwrap().clone();
    let expected = sanitize(&live, session.theme(), &session.theme().background)
        .unwrap()
        .bounds();

    let dispatcher = ExportDispatcher::new(
        None::<SlowTitles>,
        MemorySink::default(),
        ExportConfig::default(),
    );
    let result = saved(
        dispatcher
            .export(session.export_context(), ExportRequest::new(ExportFormat::Vector))
            .await
            .unwrap(),
    );
    assert_eq!(result.path, PathBuf::from("diagram.svg"));
    assert_eq!(session.diagram(), Some(&live));

    let sink = dispatcher.sink().saved.borrow();
    let markup = String::from_utf8(sink[0].1.clone()).unwrap();
    let reopened = parse(&markup).unwrap();
    let elements = all_elements(&reopened);

    assert!(elements.iter().all(|e| e.local_name() != "style"));
    assert!(elements.iter().all(|e| e.local_name() != "foreignObject"));
    assert!(elements.iter().all(|e| e.attr("style").is_none()));
    let labels: Vec<String> = elements
        .iter()
        .filter(|e| e.local_name() == "text")
        .map(|e| e.text_content())
        .collect();
    assert_eq!(labels, ["A", "Review ✓"]);

    assert_eq!(reopened.attr("viewBox"), Some(expected.view_box().as_str()));
    let remeasured = measure(&reopened, &plain_theme()).unwrap();
    assert!(
        remeasured.approx_eq(&expected, 0.01),
        "{remeasured:?} != {expected:?}"
    );
}

#[tokio::test]
async fn second_export_while_first_runs_is_skipped() {
    let diagram =
        VectorDiagram::from_markup(r#"<svg><rect width="20" height="20"/></svg>"#).unwrap();
    let theme = plain_theme();
    let dispatcher =
        ExportDispatcher::new(SlowTitles::default(), MemorySink::default(), ExportConfig::default());
    let context = ExportContext {
        source: "graph TD; A",
        diagram: Some(&diagram),
        theme: &theme,
    };
    let request = ExportRequest::new(ExportFormat::Vector);

    let (first, second) = tokio::join!(
        dispatcher.export(context, request.clone()),
        dispatcher.export(context, request.clone()),
    );
    let outcomes = [first.unwrap(), second.unwrap()];
    let skipped = outcomes
        .iter()
        .filter(|o| matches!(o, ExportOutcome::Skipped))
        .count();
    assert_eq!(skipped, 1);
    assert_eq!(dispatcher.sink().saved.borrow().len(), 1);
    assert!(!dispatcher.is_busy());

    let third = dispatcher.export(context, request).await.unwrap();
    assert!(matches!(third, ExportOutcome::Saved(_)));
}

#[tokio::test]
async fn dropping_an_export_releases_it() {
    let diagram =
        VectorDiagram::from_markup(r#"<svg><rect width="20" height="20"/></svg>"#).unwrap();
    let theme = plain_theme();
    let dispatcher =
        ExportDispatcher::new(StuckTitles, MemorySink::default(), ExportConfig::default());
    let context = ExportContext {
        source: "graph TD; A",
        diagram: Some(&diagram),
        theme: &theme,
    };

    tokio::select! {
        biased;
        _ = dispatcher.export(context, ExportRequest::new(ExportFormat::Vector)) => {
            panic!("stuck title lookup finished");
        }
        _ = async {
            for _ in 0..4 {
                tokio::task::yield_now().await;
            }
        } => {}
    }

    assert!(!dispatcher.is_busy());
    assert!(dispatcher.sink().saved.borrow().is_empty());
}

#[tokio::test]
async fn directory_export_leaves_only_the_artifact() {
    let dir = tempfile::tempdir().unwrap();
    let mut session = Session::new(SvgSourceRenderer, Theme::dark());
    session.set_source(fixture("flowchart.svg")).unwrap();
    let dispatcher = ExportDispatcher::new(
        None::<SlowTitles>,
        DirectorySink::new(dir.path()),
        ExportConfig::default(),
    );

    let result = saved(
        dispatcher
            .export(
                session.export_context(),
                ExportRequest::new(ExportFormat::png()).with_scale(1.0),
            )
            .await
            .unwrap(),
    );
    assert_eq!(result.path, dir.path().join("diagram.png"));
    assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 1);

    let png = image::open(&result.path).unwrap().to_rgba8();
    assert_eq!(png.dimensions(), (result.width, result.height));
    // Above the edge, between the two nodes.
    assert_eq!(png.get_pixel(104, 5).0, [0x0f, 0x17, 0x2a, 255]);
}
