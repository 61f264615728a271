//! Owned SVG element tree.
//!
//! The tree is what flows between the rendering collaborator, the style
//! resolver and the sanitizer. It keeps element order, attribute order and
//! text exactly; comments, processing instructions and the doctype are dropped.

use quick_xml::Reader;
use quick_xml::events::{BytesStart, Event};

use crate::error::DocumentError;

pub const SVG_NS: &str = "http://www.w3.org/2000/svg";
pub const XLINK_NS: &str = "http://www.w3.org/1999/xlink";

/// Elements whose whitespace-only text children are significant.
const TEXT_CONTAINERS: &[&str] = &["text", "tspan", "textPath", "title", "desc", "style"];

#[derive(Debug, Clone, PartialEq)]
pub enum Node {
    Element(Element),
    Text(String),
}

#[derive(Debug, Clone, PartialEq)]
pub struct Element {
    pub name: String,
    pub attributes: Vec<(String, String)>,
    pub children: Vec<Node>,
}

impl Element {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            attributes: Vec::new(),
            children: Vec::new(),
        }
    }

    pub fn with_attr(mut self, name: &str, value: impl Into<String>) -> Self {
        self.set_attr(name, value);
        self
    }

    pub fn with_child(mut self, child: Element) -> Self {
        self.children.push(Node::Element(child));
        self
    }

    pub fn with_text(mut self, text: impl Into<String>) -> Self {
        self.children.push(Node::Text(text.into()));
        self
    }

    /// Local name without a namespace prefix (`svg:rect` → `rect`).
    pub fn local_name(&self) -> &str {
        local(&self.name)
    }

    pub fn attr(&self, name: &str) -> Option<&str> {
        self.attributes
            .iter()
            .find(|(key, _)| key == name)
            .map(|(_, value)| value.as_str())
    }

    pub fn set_attr(&mut self, name: &str, value: impl Into<String>) {
        let value = value.into();
        match self.attributes.iter_mut().find(|(key, _)| key == name) {
            Some(slot) => slot.1 = value,
            None => self.attributes.push((name.to_string(), value)),
        }
    }

    pub fn remove_attr(&mut self, name: &str) -> Option<String> {
        let index = self.attributes.iter().position(|(key, _)| key == name)?;
        Some(self.attributes.remove(index).1)
    }

    pub fn id(&self) -> Option<&str> {
        self.attr("id")
    }

    pub fn classes(&self) -> impl Iterator<Item = &str> {
        self.attr("class").unwrap_or("").split_ascii_whitespace()
    }

    pub fn has_class(&self, class: &str) -> bool {
        self.classes().any(|c| c == class)
    }

    /// `href` or the legacy `xlink:href`.
    pub fn href(&self) -> Option<&str> {
        self.attr("href").or_else(|| self.attr("xlink:href"))
    }

    pub fn child_elements(&self) -> impl Iterator<Item = &Element> {
        self.children.iter().filter_map(|node| match node {
            Node::Element(element) => Some(element),
            Node::Text(_) => None,
        })
    }

    /// Concatenated text of all descendants.
    pub fn text_content(&self) -> String {
        let mut out = String::new();
        collect_text(self, &mut out);
        out
    }

    /// Depth-first search over descendants (not including `self`).
    pub fn find_all<'a>(&'a self, predicate: &dyn Fn(&Element) -> bool) -> Vec<&'a Element> {
        let mut found = Vec::new();
        for child in self.child_elements() {
            if predicate(child) {
                found.push(child);
            }
            found.extend(child.find_all(predicate));
        }
        found
    }

    pub fn to_svg_string(&self) -> String {
        let mut out = String::from("<?xml version=\"1.0\" encoding=\"UTF-8\"?>\n");
        let mut root = self.clone();
        if root.attr("xmlns").is_none() {
            root.set_attr("xmlns", SVG_NS);
        }
        if root.attr("xmlns:xlink").is_none() && uses_xlink(&root) {
            root.set_attr("xmlns:xlink", XLINK_NS);
        }
        write_element(&root, &mut out);
        out
    }
}

/// Parses SVG markup into an element tree rooted at `<svg>`.
pub fn parse(markup: &str) -> Result<Element, DocumentError> {
    let mut reader = Reader::from_str(markup);
    reader.config_mut().trim_text(false);

    let mut stack: Vec<Element> = Vec::new();
    let mut root: Option<Element> = None;

    loop {
        let event = reader.read_event().map_err(|err| DocumentError::Xml {
            position: reader.error_position(),
            message: err.to_string(),
        })?;
        match event {
            Event::Start(start) => {
                stack.push(element_from_start(&start, &reader)?);
            }
            Event::Empty(start) => {
                let element = element_from_start(&start, &reader)?;
                attach(&mut stack, &mut root, element);
            }
            Event::End(end) => {
                let name = String::from_utf8_lossy(end.name().as_ref()).into_owned();
                let element = stack
                    .pop()
                    .ok_or_else(|| DocumentError::UnbalancedClose(name.clone()))?;
                if element.name != name {
                    return Err(DocumentError::UnbalancedClose(name));
                }
                attach(&mut stack, &mut root, element);
            }
            Event::Text(text) => {
                let raw = String::from_utf8_lossy(&text).into_owned();
                let value = match text.unescape() {
                    Ok(unescaped) => unescaped.into_owned(),
                    // Entities outside the XML set (e.g. `&nbsp;`) stay as written.
                    Err(_) => raw,
                };
                push_text(&mut stack, value);
            }
            Event::CData(data) => {
                let value = String::from_utf8_lossy(&data.into_inner()).into_owned();
                push_text(&mut stack, value);
            }
            Event::Eof => break,
            _ => {}
        }
    }

    if let Some(open) = stack.pop() {
        return Err(DocumentError::Unclosed(open.name));
    }
    let root = root.ok_or(DocumentError::NoRoot)?;
    if root.local_name() != "svg" {
        return Err(DocumentError::NotSvg(root.name));
    }
    Ok(root)
}

fn element_from_start(
    start: &BytesStart<'_>,
    reader: &Reader<&[u8]>,
) -> Result<Element, DocumentError> {
    let name = String::from_utf8_lossy(start.name().as_ref()).into_owned();
    let mut element = Element::new(name);
    for attr in start.attributes() {
        let attr = attr.map_err(|err| DocumentError::Xml {
            position: reader.buffer_position(),
            message: err.to_string(),
        })?;
        let key = String::from_utf8_lossy(attr.key.as_ref()).into_owned();
        let value = match attr.unescape_value() {
            Ok(value) => value.into_owned(),
            Err(_) => String::from_utf8_lossy(&attr.value).into_owned(),
        };
        element.attributes.push((key, value));
    }
    Ok(element)
}

fn attach(stack: &mut [Element], root: &mut Option<Element>, element: Element) {
    match stack.last_mut() {
        Some(parent) => parent.children.push(Node::Element(element)),
        None => {
            if root.is_none() {
                *root = Some(element);
            }
        }
    }
}

fn push_text(stack: &mut [Element], value: String) {
    let Some(parent) = stack.last_mut() else {
        return;
    };
    if value.trim().is_empty() && !TEXT_CONTAINERS.contains(&parent.local_name()) {
        return;
    }
    if let Some(Node::Text(previous)) = parent.children.last_mut() {
        previous.push_str(&value);
    } else {
        parent.children.push(Node::Text(value));
    }
}

fn local(name: &str) -> &str {
    name.rsplit(':').next().unwrap_or(name)
}

fn collect_text(element: &Element, out: &mut String) {
    for child in &element.children {
        match child {
            Node::Text(text) => out.push_str(text),
            Node::Element(inner) => collect_text(inner, out),
        }
    }
}

fn uses_xlink(element: &Element) -> bool {
    element
        .attributes
        .iter()
        .any(|(key, _)| key.starts_with("xlink:"))
        || element.child_elements().any(uses_xlink)
}

fn write_element(element: &Element, out: &mut String) {
    out.push('<');
    out.push_str(&element.name);
    for (key, value) in &element.attributes {
        out.push(' ');
        out.push_str(key);
        out.push_str("=\"");
        out.push_str(&escape_xml(value));
        out.push('"');
    }
    if element.children.is_empty() {
        out.push_str("/>");
        return;
    }
    out.push('>');
    for child in &element.children {
        match child {
            Node::Element(inner) => write_element(inner, out),
            Node::Text(text) => out.push_str(&escape_xml(text)),
        }
    }
    out.push_str("</");
    out.push_str(&element.name);
    out.push('>');
}

pub fn escape_xml(input: &str) -> String {
    input
        .replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
        .replace('\'', "&apos;")
}
