//! Turns a live, stylesheet-dependent diagram into a self-contained document.

use log::debug;

use crate::document::{Element, Node};
use crate::error::SanitizeError;
use crate::geometry::{BoundingBox, fmt_num};
use crate::raster;
use crate::renderer::VectorDiagram;
use crate::style::{self, StyleSheet};
use crate::theme::Theme;

const XHTML_NS: &str = "http://www.w3.org/1999/xhtml";
const HTML_ELEMENTS: &[&str] = &[
    "html", "body", "div", "span", "p", "br", "b", "i", "em", "strong", "ul", "li", "table",
];

/// An exportable copy of a diagram. Only readable once built.
#[derive(Debug, Clone, PartialEq)]
pub struct SanitizedDocument {
    document: Element,
    bounds: BoundingBox,
}

impl SanitizedDocument {
    pub fn bounds(&self) -> BoundingBox {
        self.bounds
    }

    pub fn document(&self) -> &Element {
        &self.document
    }

    pub fn to_svg_string(&self) -> String {
        self.document.to_svg_string()
    }
}

/// Tight, stroke-inclusive bounds of the visible content of `document` in
/// user units, as styled by `theme` and the document's own stylesheets.
pub fn measure(document: &Element, theme: &Theme) -> Result<BoundingBox, SanitizeError> {
    let mut probe = document.clone();
    for name in ["width", "height", "viewBox"] {
        probe.remove_attr(name);
    }
    frame_foreign_objects(&mut probe);
    if !theme.presentation_source.trim().is_empty() {
        let style = Element::new("style").with_text(theme.presentation_source.clone());
        probe.children.insert(0, Node::Element(style));
    }

    let tree = raster::parse_tree(&probe.to_svg_string())
        .map_err(|err| SanitizeError::Measure(err.to_string()))?;
    let root = tree.root();
    if !root.has_children() {
        return Ok(BoundingBox::default());
    }
    let rect = root.abs_stroke_bounding_box();
    Ok(BoundingBox::new(
        rect.x(),
        rect.y(),
        rect.width(),
        rect.height(),
    ))
}

/// Builds the self-contained export copy of `diagram`. The live document is
/// only read.
pub fn sanitize(
    diagram: &VectorDiagram,
    theme: &Theme,
    background: &str,
) -> Result<SanitizedDocument, SanitizeError> {
    let bounds = measure(&diagram.document, theme)?;
    if bounds.is_empty() {
        return Err(SanitizeError::EmptyDiagram);
    }

    let mut copy = diagram.document.clone();
    let mut removed = 0usize;
    strip_unsupported(&mut copy, &theme.text_color, &mut removed);

    let mut sheet = StyleSheet::parse(&theme.presentation_source);
    sheet.extend(StyleSheet::parse(&style::embedded_css(&copy)));
    let mut document = style::resolve(&copy, &sheet);

    let backdrop = Element::new("rect")
        .with_attr("x", fmt_num(bounds.x))
        .with_attr("y", fmt_num(bounds.y))
        .with_attr("width", fmt_num(bounds.width))
        .with_attr("height", fmt_num(bounds.height))
        .with_attr("fill", background)
        .with_attr("stroke", "none");
    document.children.insert(0, Node::Element(backdrop));

    document.set_attr("width", fmt_num(bounds.width));
    document.set_attr("height", fmt_num(bounds.height));
    document.set_attr("viewBox", bounds.view_box());

    debug!(
        removed,
        rules = sheet.rules.len(),
        width = bounds.width,
        height = bounds.height;
        "Sanitized diagram"
    );
    Ok(SanitizedDocument { document, bounds })
}

/// usvg skips `<foreignObject>`, so each one is measured as an opaque box of
/// the same geometry. Label text overflowing that box is not covered.
fn frame_foreign_objects(element: &mut Element) {
    for node in &mut element.children {
        let Node::Element(child) = node else {
            continue;
        };
        if child.local_name() != "foreignObject" {
            frame_foreign_objects(child);
            continue;
        }
        let mut frame = Element::new("rect").with_attr("style", "fill:#000;stroke:none");
        for name in ["x", "y", "width", "height", "transform"] {
            if let Some(value) = child.attr(name) {
                frame.set_attr(name, value);
            }
        }
        *child = frame;
    }
}

fn strip_unsupported(element: &mut Element, text_color: &str, removed: &mut usize) {
    let children = std::mem::take(&mut element.children);
    for node in children {
        match node {
            Node::Element(child) if child.local_name() == "foreignObject" => {
                *removed += 1;
                if let Some(label) = label_fallback(&child, text_color) {
                    element.children.push(Node::Element(label));
                }
            }
            Node::Element(child) if is_xhtml(&child) || is_external_image(&child) => {
                *removed += 1;
            }
            Node::Element(mut child) => {
                strip_unsupported(&mut child, text_color, removed);
                element.children.push(Node::Element(child));
            }
            text => element.children.push(text),
        }
    }
}

fn is_xhtml(element: &Element) -> bool {
    element.attr("xmlns") == Some(XHTML_NS)
        || element.name.starts_with("xhtml:")
        || element.name.starts_with("html:")
        || HTML_ELEMENTS.contains(&element.name.as_str())
}

fn is_external_image(element: &Element) -> bool {
    element.local_name() == "image"
        && !element
            .href()
            .is_some_and(|href| href.trim_start().starts_with("data:"))
}

/// Plain `<text>` standing in for an HTML label, centered in its box.
fn label_fallback(object: &Element, text_color: &str) -> Option<Element> {
    let label = object
        .text_content()
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ");
    if label.is_empty() {
        return None;
    }
    let length = |name: &str| {
        object
            .attr(name)
            .and_then(|v| v.trim().trim_end_matches("px").parse::<f32>().ok())
            .unwrap_or(0.0)
    };
    let x = length("x") + length("width") / 2.0;
    let y = length("y") + length("height") / 2.0;

    let mut text = Element::new("text")
        .with_attr("x", fmt_num(x))
        .with_attr("y", fmt_num(y))
        .with_attr("text-anchor", "middle")
        .with_attr("dominant-baseline", "central")
        .with_attr("fill", text_color);
    if let Some(transform) = object.attr("transform") {
        text.set_attr("transform", transform);
    }
    Some(text.with_text(label))
}
