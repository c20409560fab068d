//! Markup Module
//!
//! Parses view markup with xml5ever into an owned element tree. The DOM does not
//! keep source positions, so locations are recovered with a forward-only scan of
//! the original text while the tree is converted in document order.

use markup5ever_rcdom::{Handle, NodeData, RcDom};
use serde::{Deserialize, Serialize};
use std::fmt::Write as _;
use tendril::TendrilSink;
use xml5ever::driver::{parse_document, XmlParseOpts};

use crate::diagnostics::{CompilerError, LineIndex, SourceLocation, ERR_MALFORMED_MARKUP};

// ═══════════════════════════════════════════════════════════════════════════════
// MARKUP TREE
// ═══════════════════════════════════════════════════════════════════════════════

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MarkupAttribute {
    pub name: String,
    pub value: String,
    #[serde(default)]
    pub location: SourceLocation,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MarkupText {
    pub value: String,
    #[serde(default)]
    pub location: SourceLocation,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MarkupElement {
    pub tag: String,
    pub attributes: Vec<MarkupAttribute>,
    pub children: Vec<MarkupNode>,
    #[serde(default)]
    pub location: SourceLocation,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum MarkupNode {
    Element(MarkupElement),
    Text(MarkupText),
}

impl MarkupElement {
    pub fn attribute(&self, name: &str) -> Option<&MarkupAttribute> {
        self.attributes.iter().find(|a| a.name == name)
    }

    pub fn attribute_value(&self, name: &str) -> Option<&str> {
        self.attribute(name).map(|a| a.value.as_str())
    }

    pub fn child_elements(&self) -> impl Iterator<Item = &MarkupElement> {
        self.children.iter().filter_map(|c| match c {
            MarkupNode::Element(e) => Some(e),
            MarkupNode::Text(_) => None,
        })
    }

    /// The only child, when it is a text node.
    pub fn sole_text(&self) -> Option<&MarkupText> {
        match self.children.as_slice() {
            [MarkupNode::Text(t)] => Some(t),
            _ => None,
        }
    }

    /// Text of a property element such as `<Label.Text>...</Label.Text>`.
    pub fn text_content(&self) -> String {
        let mut out = String::new();
        for child in &self.children {
            if let MarkupNode::Text(t) = child {
                out.push_str(&t.value);
            }
        }
        out
    }

    /// Location-free serialization used for content hashing.
    pub fn canonical_text(&self) -> String {
        let mut out = String::new();
        write_canonical(self, &mut out);
        out
    }
}

fn write_canonical(element: &MarkupElement, out: &mut String) {
    out.push('<');
    out.push_str(&element.tag);
    for attr in &element.attributes {
        let _ = write!(out, " {}=\"{}\"", attr.name, escape(&attr.value));
    }
    if element.children.is_empty() {
        out.push_str("/>");
        return;
    }
    out.push('>');
    for child in &element.children {
        match child {
            MarkupNode::Element(e) => write_canonical(e, out),
            MarkupNode::Text(t) => out.push_str(&escape(t.value.trim())),
        }
    }
    let _ = write!(out, "</{}>", element.tag);
}

fn escape(text: &str) -> String {
    text.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
}

// ═══════════════════════════════════════════════════════════════════════════════
// SOURCE LOCATOR
// ═══════════════════════════════════════════════════════════════════════════════

struct Locator<'s> {
    source: &'s str,
    index: LineIndex,
    cursor: usize,
}

impl<'s> Locator<'s> {
    fn new(source: &'s str) -> Self {
        Self {
            source,
            index: LineIndex::new(source),
            cursor: 0,
        }
    }

    /// Finds the next `<tag` open tag and returns its byte offset.
    fn open_tag(&mut self, tag: &str) -> Option<usize> {
        let needle = format!("<{}", tag);
        let mut from = self.cursor;
        while let Some(rel) = self.source[from..].find(&needle) {
            let start = from + rel;
            let after = start + needle.len();
            let boundary = self.source[after..]
                .chars()
                .next()
                .map_or(true, |c| c.is_whitespace() || c == '/' || c == '>');
            if boundary {
                self.cursor = after;
                return Some(start);
            }
            from = after;
        }
        None
    }

    fn attribute(&self, tag_start: usize, name: &str) -> Option<usize> {
        let end = self.source[tag_start..]
            .find('>')
            .map_or(self.source.len(), |e| tag_start + e);
        let region = &self.source[tag_start..end];
        let mut from = 0;
        while let Some(rel) = region[from..].find(name) {
            let start = from + rel;
            let before_ok = region[..start]
                .chars()
                .last()
                .map_or(false, char::is_whitespace);
            let after_ok = region[start + name.len()..].trim_start().starts_with('=');
            if before_ok && after_ok {
                return Some(tag_start + start);
            }
            from = start + name.len();
        }
        None
    }

    fn text(&mut self, value: &str) -> Option<usize> {
        let needle = value.trim();
        if needle.is_empty() {
            return None;
        }
        let start = self.cursor + self.source[self.cursor..].find(needle)?;
        self.cursor = start + needle.len();
        Some(start)
    }

    fn location(&self, offset: usize) -> SourceLocation {
        self.index.location(offset)
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// PARSING
// ═══════════════════════════════════════════════════════════════════════════════

/// Parses markup and returns its root element.
pub fn parse_markup(source: &str, file_path: &str) -> Result<MarkupElement, CompilerError> {
    let dom: RcDom = parse_document(RcDom::default(), XmlParseOpts::default())
        .from_utf8()
        .read_from(&mut source.as_bytes())
        .map_err(|e| {
            CompilerError::new(
                ERR_MALFORMED_MARKUP,
                &format!("Failed to read markup: {}", e),
                file_path,
                SourceLocation::default(),
            )
        })?;

    if let Some(first) = dom.errors.first() {
        return Err(CompilerError::new(
            ERR_MALFORMED_MARKUP,
            &format!("Malformed markup: {}", first),
            file_path,
            SourceLocation::default(),
        ));
    }

    let root = dom
        .document
        .children
        .borrow()
        .iter()
        .find(|c| matches!(c.data, NodeData::Element { .. }))
        .cloned();

    let mut locator = Locator::new(source);
    root.and_then(|handle| convert_element(&handle, &mut locator))
        .ok_or_else(|| {
            CompilerError::new(
                ERR_MALFORMED_MARKUP,
                "Markup has no root element",
                file_path,
                SourceLocation::default(),
            )
        })
}

fn convert_element(handle: &Handle, locator: &mut Locator) -> Option<MarkupElement> {
    let NodeData::Element { name, attrs, .. } = &handle.data else {
        return None;
    };

    let tag = match &name.prefix {
        Some(prefix) => format!("{}:{}", prefix, name.local),
        None => name.local.to_string(),
    };
    let tag_start = locator.open_tag(&tag);
    let location = tag_start.map_or_else(SourceLocation::default, |o| locator.location(o));

    let mut attributes = Vec::new();
    for attr in attrs.borrow().iter() {
        let is_namespace_decl = &*attr.name.local == "xmlns"
            || attr.name.prefix.as_ref().map_or(false, |p| &**p == "xmlns");
        if is_namespace_decl {
            continue;
        }
        let attr_name = attr.name.local.to_string();
        let attr_location = tag_start
            .and_then(|start| locator.attribute(start, &attr_name))
            .map_or(location, |o| locator.location(o));
        attributes.push(MarkupAttribute {
            name: attr_name,
            value: attr.value.to_string(),
            location: attr_location,
        });
    }

    let mut children = Vec::new();
    for child in handle.children.borrow().iter() {
        match &child.data {
            NodeData::Element { .. } => {
                if let Some(el) = convert_element(child, locator) {
                    children.push(MarkupNode::Element(el));
                }
            }
            NodeData::Text { contents } => {
                let value = contents.borrow().to_string();
                if value.trim().is_empty() {
                    continue;
                }
                let text_location = locator
                    .text(&value)
                    .map_or(location, |o| locator.location(o));
                children.push(MarkupNode::Text(MarkupText {
                    value,
                    location: text_location,
                }));
            }
            _ => {}
        }
    }

    Some(MarkupElement {
        tag,
        attributes,
        children,
        location,
    })
}
