//! Stylesheet parsing and cascade resolution.
//!
//! Diagram renderers style their output through an embedded `<style>` block
//! and theme CSS. [`resolve`] runs the cascade over a document tree without
//! any rendering surface and returns a detached copy in which every
//! presentation property is written as an attribute.
//!
//! Supported selectors: type, `*`, `.class`, `#id`, `[attr]`, `[attr=value]`,
//! combined into compounds and joined by descendant (` `) or child (`>`)
//! combinators. Selectors with pseudo-classes or other combinators never match.

use std::collections::BTreeMap;

use once_cell::sync::Lazy;
use regex::Regex;

use crate::document::{Element, Node};

static COMMENT_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?s)/\*.*?\*/").unwrap());

/// SVG presentation attributes. Only these are written back as attributes.
pub const PRESENTATION_PROPERTIES: &[&str] = &[
    "alignment-baseline",
    "baseline-shift",
    "clip-path",
    "clip-rule",
    "color",
    "display",
    "dominant-baseline",
    "fill",
    "fill-opacity",
    "fill-rule",
    "filter",
    "font-family",
    "font-size",
    "font-style",
    "font-variant",
    "font-weight",
    "letter-spacing",
    "marker-end",
    "marker-mid",
    "marker-start",
    "mask",
    "opacity",
    "paint-order",
    "shape-rendering",
    "stop-color",
    "stop-opacity",
    "stroke",
    "stroke-dasharray",
    "stroke-dashoffset",
    "stroke-linecap",
    "stroke-linejoin",
    "stroke-miterlimit",
    "stroke-opacity",
    "stroke-width",
    "text-anchor",
    "text-decoration",
    "visibility",
    "word-spacing",
];

/// Properties whose computed value flows from parent to child.
pub const INHERITED_PROPERTIES: &[&str] = &[
    "clip-rule",
    "color",
    "dominant-baseline",
    "fill",
    "fill-opacity",
    "fill-rule",
    "font-family",
    "font-size",
    "font-style",
    "font-variant",
    "font-weight",
    "letter-spacing",
    "marker-end",
    "marker-mid",
    "marker-start",
    "paint-order",
    "shape-rendering",
    "stroke",
    "stroke-dasharray",
    "stroke-dashoffset",
    "stroke-linecap",
    "stroke-linejoin",
    "stroke-miterlimit",
    "stroke-opacity",
    "stroke-width",
    "text-anchor",
    "visibility",
    "word-spacing",
];

#[derive(Debug, Clone, PartialEq)]
pub struct Declaration {
    pub property: String,
    pub value: String,
    pub important: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default)]
pub struct Specificity(pub u32, pub u32, pub u32);

#[derive(Debug, Clone, PartialEq, Default)]
struct Compound {
    tag: Option<String>,
    id: Option<String>,
    classes: Vec<String>,
    attributes: Vec<(String, Option<String>)>,
}

#[derive(Debug, Clone, Copy, PartialEq)]
enum Combinator {
    Descendant,
    Child,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Selector {
    /// Rightmost compound first.
    parts: Vec<(Compound, Option<Combinator>)>,
    specificity: Specificity,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Rule {
    pub selectors: Vec<Selector>,
    pub declarations: Vec<Declaration>,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct StyleSheet {
    pub rules: Vec<Rule>,
}

impl StyleSheet {
    pub fn parse(css: &str) -> Self {
        let css = COMMENT_RE.replace_all(css, "");
        let mut rules = Vec::new();
        let mut rest: &str = &css;

        while let Some(open) = rest.find('{') {
            let prelude = rest[..open].trim();
            let Some(close) = matching_brace(rest, open) else {
                break;
            };
            let body = &rest[open + 1..close];
            rest = &rest[close + 1..];

            // @media, @keyframes, @font-face and friends do not style static output.
            if prelude.starts_with('@') {
                continue;
            }
            let selectors: Vec<Selector> = prelude
                .split(',')
                .filter_map(|s| Selector::parse(s.trim()))
                .collect();
            if selectors.is_empty() {
                continue;
            }
            let declarations = parse_declarations(body);
            if !declarations.is_empty() {
                rules.push(Rule {
                    selectors,
                    declarations,
                });
            }
        }
        Self { rules }
    }

    pub fn extend(&mut self, other: StyleSheet) {
        self.rules.extend(other.rules);
    }
}

fn matching_brace(text: &str, open: usize) -> Option<usize> {
    let mut depth = 0usize;
    for (offset, ch) in text[open..].char_indices() {
        match ch {
            '{' => depth += 1,
            '}' => {
                depth -= 1;
                if depth == 0 {
                    return Some(open + offset);
                }
            }
            _ => {}
        }
    }
    None
}

/// Parses `prop: value; prop: value !important` lists, as found in rule
/// bodies and `style` attributes. Property names are lowercased.
pub fn parse_declarations(body: &str) -> Vec<Declaration> {
    body.split(';')
        .filter_map(|decl| {
            let (property, value) = decl.split_once(':')?;
            let property = property.trim().to_ascii_lowercase();
            let (value, important) = split_important(value.trim());
            if property.is_empty() || value.is_empty() {
                return None;
            }
            Some(Declaration {
                property,
                value: value.to_string(),
                important,
            })
        })
        .collect()
}

/// Splits a trailing `!important` off a value. CSS allows whitespace after
/// the `!` and any letter case in the keyword.
fn split_important(value: &str) -> (&str, bool) {
    let lower = value.to_ascii_lowercase();
    let bang = lower
        .strip_suffix("important")
        .map(str::trim_end)
        .and_then(|head| head.strip_suffix('!'));
    match bang {
        Some(head) => (value[..head.len()].trim_end(), true),
        None => (value, false),
    }
}

impl Selector {
    pub fn parse(text: &str) -> Option<Self> {
        if text.is_empty() {
            return None;
        }
        let spaced = text.replace('>', " > ");
        let mut compounds: Vec<(Compound, Option<Combinator>)> = Vec::new();
        let mut pending = Combinator::Descendant;
        for token in spaced.split_ascii_whitespace() {
            if token == ">" {
                if compounds.is_empty() {
                    return None;
                }
                pending = Combinator::Child;
                continue;
            }
            let compound = parse_compound(token)?;
            let combinator = if compounds.is_empty() {
                None
            } else {
                Some(pending)
            };
            compounds.push((compound, combinator));
            pending = Combinator::Descendant;
        }
        if compounds.is_empty() {
            return None;
        }

        let mut specificity = Specificity::default();
        for (compound, _) in &compounds {
            specificity.0 += u32::from(compound.id.is_some());
            specificity.1 += (compound.classes.len() + compound.attributes.len()) as u32;
            specificity.2 += u32::from(compound.tag.is_some());
        }

        // Store right-to-left; each entry carries the combinator linking it to
        // the compound on its left.
        let parts = compounds.into_iter().rev().collect();
        Some(Self { parts, specificity })
    }

    pub fn specificity(&self) -> Specificity {
        self.specificity
    }

    /// `ancestors` runs from the root down to the parent of `element`.
    pub fn matches(&self, element: &Element, ancestors: &[&Element]) -> bool {
        let Some(((subject, link), rest)) = self.parts.split_first() else {
            return false;
        };
        if !compound_matches(subject, element) {
            return false;
        }
        match_remaining(rest, *link, ancestors)
    }
}

fn match_remaining(
    parts: &[(Compound, Option<Combinator>)],
    link: Option<Combinator>,
    ancestors: &[&Element],
) -> bool {
    let Some(((compound, next_link), rest)) = parts.split_first() else {
        return true;
    };
    match link {
        Some(Combinator::Child) => match ancestors.split_last() {
            Some((parent, above)) => {
                compound_matches(compound, parent) && match_remaining(rest, *next_link, above)
            }
            None => false,
        },
        Some(Combinator::Descendant) | None => {
            for depth in (0..ancestors.len()).rev() {
                if compound_matches(compound, ancestors[depth])
                    && match_remaining(rest, *next_link, &ancestors[..depth])
                {
                    return true;
                }
            }
            false
        }
    }
}

fn parse_compound(token: &str) -> Option<Compound> {
    let mut compound = Compound::default();
    let name_end = token
        .find(|c: char| matches!(c, '.' | '#' | '[' | ':'))
        .unwrap_or(token.len());
    let tag = &token[..name_end];
    if !tag.is_empty() && tag != "*" {
        compound.tag = Some(tag.to_string());
    }
    let mut rest = &token[name_end..];
    while let Some(first) = rest.chars().next() {
        match first {
            '.' | '#' => {
                let body = &rest[1..];
                let end = body
                    .find(|c: char| matches!(c, '.' | '#' | '[' | ':'))
                    .unwrap_or(body.len());
                let ident = &body[..end];
                if ident.is_empty() {
                    return None;
                }
                if first == '.' {
                    compound.classes.push(ident.to_string());
                } else {
                    compound.id = Some(ident.to_string());
                }
                rest = &body[end..];
            }
            '[' => {
                let close = rest.find(']')?;
                let inner = &rest[1..close];
                let attribute = match inner.split_once('=') {
                    Some((name, value)) => (
                        name.trim().to_string(),
                        Some(value.trim().trim_matches(['"', '\'']).to_string()),
                    ),
                    None => (inner.trim().to_string(), None),
                };
                compound.attributes.push(attribute);
                rest = &rest[close + 1..];
            }
            // Pseudo-classes and pseudo-elements (:hover, ::before) have no
            // static meaning.
            _ => return None,
        }
    }
    Some(compound)
}

fn compound_matches(compound: &Compound, element: &Element) -> bool {
    if let Some(tag) = &compound.tag {
        if !tag.eq_ignore_ascii_case(element.local_name()) {
            return false;
        }
    }
    if let Some(id) = &compound.id {
        if element.id() != Some(id.as_str()) {
            return false;
        }
    }
    if !compound.classes.iter().all(|class| element.has_class(class)) {
        return false;
    }
    compound
        .attributes
        .iter()
        .all(|(name, expected)| match (element.attr(name), expected) {
            (Some(actual), Some(expected)) => actual == expected,
            (Some(_), None) => true,
            (None, _) => false,
        })
}

/// Cascaded (declared) values for one element, before inheritance.
fn cascade(element: &Element, ancestors: &[&Element], sheet: &StyleSheet) -> BTreeMap<String, String> {
    // (important, origin, specificity, order) decides the winner; higher wins.
    type Rank = (bool, u8, Specificity, usize);
    let mut winners: BTreeMap<String, (Rank, String)> = BTreeMap::new();
    let mut offer = |property: &str, value: &str, rank: Rank| {
        let replace = winners
            .get(property)
            .is_none_or(|(current, _)| rank >= *current);
        if replace {
            winners.insert(property.to_string(), (rank, value.to_string()));
        }
    };

    for (order, (name, value)) in element.attributes.iter().enumerate() {
        if PRESENTATION_PROPERTIES.contains(&name.as_str()) {
            offer(name, value, (false, 0, Specificity::default(), order));
        }
    }

    let mut order = 0usize;
    for rule in &sheet.rules {
        let best = rule
            .selectors
            .iter()
            .filter(|selector| selector.matches(element, ancestors))
            .map(Selector::specificity)
            .max();
        if let Some(specificity) = best {
            for declaration in &rule.declarations {
                offer(
                    &declaration.property,
                    &declaration.value,
                    (declaration.important, 1, specificity, order),
                );
                order += 1;
            }
        } else {
            order += rule.declarations.len();
        }
    }

    if let Some(inline) = element.attr("style") {
        for (index, declaration) in parse_declarations(inline).into_iter().enumerate() {
            offer(
                &declaration.property,
                &declaration.value,
                (declaration.important, 2, Specificity::default(), index),
            );
        }
    }

    winners
        .into_iter()
        .filter(|(property, _)| PRESENTATION_PROPERTIES.contains(&property.as_str()))
        .map(|(property, (_, value))| (property, value))
        .collect()
}

/// Runs the cascade over `root` and returns a detached copy in which every
/// element carries its resolved presentation as attributes. `<style>` elements
/// and `style` attributes are gone from the copy.
pub fn resolve(root: &Element, sheet: &StyleSheet) -> Element {
    let mut ancestors = Vec::new();
    resolve_element(root, &mut ancestors, &BTreeMap::new(), sheet)
}

fn resolve_element<'a>(
    element: &'a Element,
    ancestors: &mut Vec<&'a Element>,
    inherited: &BTreeMap<String, String>,
    sheet: &StyleSheet,
) -> Element {
    let declared = cascade(element, ancestors, sheet);

    let mut computed: BTreeMap<String, String> = inherited.clone();
    for (property, value) in &declared {
        if value == "inherit" {
            continue;
        }
        if value == "initial" || value == "unset" {
            computed.remove(property);
            continue;
        }
        computed.insert(property.clone(), value.clone());
    }

    let mut resolved = Element::new(element.name.clone());
    for (name, value) in &element.attributes {
        if name == "style" || PRESENTATION_PROPERTIES.contains(&name.as_str()) {
            continue;
        }
        resolved.attributes.push((name.clone(), value.clone()));
    }
    for (property, value) in &computed {
        let inherits = INHERITED_PROPERTIES.contains(&property.as_str());
        if inherits || declared.contains_key(property) {
            resolved.attributes.push((property.clone(), value.clone()));
        }
    }

    let passed_down: BTreeMap<String, String> = computed
        .into_iter()
        .filter(|(property, _)| INHERITED_PROPERTIES.contains(&property.as_str()))
        .collect();

    ancestors.push(element);
    for child in &element.children {
        match child {
            Node::Element(inner) if inner.local_name() == "style" => {}
            Node::Element(inner) => {
                let child = resolve_element(inner, ancestors, &passed_down, sheet);
                resolved.children.push(Node::Element(child));
            }
            Node::Text(text) => resolved.children.push(Node::Text(text.clone())),
        }
    }
    ancestors.pop();
    resolved
}

/// Concatenated text of every `<style>` element in the tree, in document order.
pub fn embedded_css(root: &Element) -> String {
    root.find_all(&|e: &Element| e.local_name() == "style")
        .into_iter()
        .map(Element::text_content)
        .collect::<Vec<_>>()
        .join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::document::parse;

    fn first<'a>(root: &'a Element, name: &str) -> &'a Element {
        root.find_all(&|e: &Element| e.local_name() == name)[0]
    }

    #[test]
    fn parses_rules_and_skips_at_rules() {
        let sheet = StyleSheet::parse(
            "/* theme */ #m .node rect, .cluster { fill: #fff; stroke-width: 2px !important }
             @keyframes dash { to { stroke-dashoffset: 0; } }
             a:hover { fill: red }
             text { font-family: \"trebuchet ms\", verdana; }",
        );
        assert_eq!(sheet.rules.len(), 2);
        assert_eq!(sheet.rules[0].selectors.len(), 2);
        assert_eq!(sheet.rules[0].selectors[0].specificity(), Specificity(1, 1, 1));
        assert!(sheet.rules[0].declarations[1].important);
        assert_eq!(
            sheet.rules[1].declarations[0].value,
            "\"trebuchet ms\", verdana"
        );
    }

    #[test]
    fn descendant_and_child_combinators() {
        let root = parse(
            r#"<svg id="m"><g class="node"><g><rect class="x"/></g></g></svg>"#,
        )
        .unwrap();
        let g_outer = first(&root, "g");
        let g_inner = g_outer.child_elements().next().unwrap();
        let rect = first(&root, "rect");
        let chain = [&root, g_outer, g_inner];

        assert!(Selector::parse("#m .node rect").unwrap().matches(rect, &chain));
        assert!(Selector::parse(".node > g > rect.x").unwrap().matches(rect, &chain));
        assert!(!Selector::parse(".node > rect").unwrap().matches(rect, &chain));
        assert!(Selector::parse("svg rect[class=x]").unwrap().matches(rect, &chain));
        assert!(!Selector::parse("#other rect").unwrap().matches(rect, &chain));
    }

    #[test]
    fn cascade_order_attribute_sheet_inline() {
        let root = parse(
            r##"<svg id="m">
                <style>#m .node rect { fill: #111; stroke: #222; } rect { fill: #999; stroke-width: 3 }</style>
                <g class="node"><rect fill="#000" style="stroke: #333" width="4" height="4"/></g>
            </svg>"##,
        )
        .unwrap();
        let sheet = StyleSheet::parse(&embedded_css(&root));
        let resolved = resolve(&root, &sheet);
        let rect = first(&resolved, "rect");
        assert_eq!(rect.attr("fill"), Some("#111"));
        assert_eq!(rect.attr("stroke"), Some("#333"));
        assert_eq!(rect.attr("stroke-width"), Some("3"));
        assert_eq!(rect.attr("width"), Some("4"));
        assert_eq!(rect.attr("style"), None);
        assert!(resolved.find_all(&|e: &Element| e.name == "style").is_empty());
    }

    #[test]
    fn important_beats_inline() {
        let root = parse(r#"<svg><rect style="fill: blue"/></svg>"#).unwrap();
        let sheet = StyleSheet::parse("rect { fill: red !important }");
        let resolved = resolve(&root, &sheet);
        assert_eq!(first(&resolved, "rect").attr("fill"), Some("red"));
    }

    #[test]
    fn important_tolerates_spacing_and_case() {
        let root = parse(r#"<svg><rect style="fill: blue; stroke: green"/></svg>"#).unwrap();
        let sheet = StyleSheet::parse("rect { fill: red ! important; stroke: black !IMPORTANT }");
        assert_eq!(sheet.rules[0].declarations[0].value, "red");
        let resolved = resolve(&root, &sheet);
        let rect = first(&resolved, "rect");
        assert_eq!(rect.attr("fill"), Some("red"));
        assert_eq!(rect.attr("stroke"), Some("black"));

        let plain = parse_declarations("font-family: important-sans");
        assert!(!plain[0].important);
        assert_eq!(plain[0].value, "important-sans");
    }

    #[test]
    fn inherited_properties_reach_leaves_but_opacity_does_not() {
        let root = parse(r#"<svg><g class="label"><text>hi</text></g></svg>"#).unwrap();
        let sheet = StyleSheet::parse(".label { fill: #333; font-size: 14px; opacity: 0.5 }");
        let resolved = resolve(&root, &sheet);
        let group = first(&resolved, "g");
        let text = first(&resolved, "text");
        assert_eq!(group.attr("opacity"), Some("0.5"));
        assert_eq!(text.attr("fill"), Some("#333"));
        assert_eq!(text.attr("font-size"), Some("14px"));
        assert_eq!(text.attr("opacity"), None);
        assert_eq!(text.text_content(), "hi");
    }

    #[test]
    fn non_presentation_properties_are_dropped() {
        let root = parse(r#"<svg style="max-width: 300px; background-color: white"/>"#).unwrap();
        let resolved = resolve(&root, &StyleSheet::default());
        assert_eq!(resolved.attr("style"), None);
        assert_eq!(resolved.attr("max-width"), None);
    }

    #[test]
    fn live_tree_is_not_modified() {
        let root = parse(r#"<svg><style>rect{fill:red}</style><rect/></svg>"#).unwrap();
        let before = root.clone();
        let sheet = StyleSheet::parse(&embedded_css(&root));
        let _ = resolve(&root, &sheet);
        assert_eq!(root, before);
    }
}
