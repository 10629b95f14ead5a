//! Positioned XML element tree
//!
//! The model never needs a full DOM; it needs element names, attributes,
//! direct text, and the source position of each element so validation
//! findings can point at them. This module builds exactly that from
//! quick-xml's namespace-aware event stream, tracking byte offsets and
//! translating them to line/character positions.

use quick_xml::NsReader;
use quick_xml::events::Event;
use quick_xml::name::ResolveResult;

use crate::location::{Position, Range};

pub const NS_CNXML: &str = "http://cnx.rice.edu/cnxml";
pub const NS_COLLXML: &str = "http://cnx.rice.edu/collxml";
pub const NS_MDML: &str = "http://cnx.rice.edu/mdml";
pub const NS_CONTAINER: &str = "https://openstax.org/namespaces/book-container";

/// A syntax error encountered while reading a document
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct XmlError {
    pub message: String,
    /// Where the reader gave up, when it could tell us
    pub position: Option<Position>,
}

/// One attribute on an element. The owning element's range doubles as the
/// attribute's range.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct XmlAttribute {
    pub local_name: String,
    pub value: String,
}

/// An element with its children, direct text content, and the range of its
/// start tag.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct XmlElement {
    pub namespace: Option<String>,
    pub local_name: String,
    pub attributes: Vec<XmlAttribute>,
    pub children: Vec<XmlElement>,
    text: String,
    pub range: Range,
}

impl XmlElement {
    /// Does this element have the given namespace and local name?
    pub fn is(&self, namespace: &str, local_name: &str) -> bool {
        self.local_name == local_name && self.namespace.as_deref() == Some(namespace)
    }

    pub fn attr(&self, local_name: &str) -> Option<&str> {
        self.attributes
            .iter()
            .find(|a| a.local_name == local_name)
            .map(|a| a.value.as_str())
    }

    /// Attribute value with the empty string treated as absent; optional
    /// attributes in these documents show up both ways.
    pub fn attr_non_empty(&self, local_name: &str) -> Option<&str> {
        self.attr(local_name).filter(|v| !v.is_empty())
    }

    /// Direct text content (child element text excluded), trimmed
    pub fn text_trim(&self) -> &str {
        self.text.trim()
    }

    pub fn child(&self, namespace: &str, local_name: &str) -> Option<&XmlElement> {
        self.children.iter().find(|c| c.is(namespace, local_name))
    }

    pub fn children_named<'a>(
        &'a self,
        namespace: &'a str,
        local_name: &'a str,
    ) -> impl Iterator<Item = &'a XmlElement> {
        self.children.iter().filter(|c| c.is(namespace, local_name))
    }

    /// Depth-first traversal of every element below this one
    pub fn descendants(&self) -> Descendants<'_> {
        Descendants {
            stack: self.children.iter().rev().collect(),
        }
    }
}

pub struct Descendants<'a> {
    stack: Vec<&'a XmlElement>,
}

impl<'a> Iterator for Descendants<'a> {
    type Item = &'a XmlElement;

    fn next(&mut self) -> Option<Self::Item> {
        let next = self.stack.pop()?;
        self.stack.extend(next.children.iter().rev());
        Some(next)
    }
}

/// Byte offset to line/character translation table
struct LineIndex {
    /// Byte offset at which each line starts
    line_starts: Vec<usize>,
}

impl LineIndex {
    fn new(content: &str) -> Self {
        let mut line_starts = vec![0];
        line_starts.extend(memchr::memchr_iter(b'\n', content.as_bytes()).map(|i| i + 1));
        Self { line_starts }
    }

    fn position(&self, content: &str, offset: usize) -> Position {
        let offset = offset.min(content.len());
        let line = self.line_starts.partition_point(|&start| start <= offset) - 1;
        let character = content[self.line_starts[line]..offset].chars().count();
        Position::new(line as u32, character as u32)
    }
}

fn resolve_entity(name: &str) -> Option<&'static str> {
    match name {
        "amp" => Some("&"),
        "lt" => Some("<"),
        "gt" => Some(">"),
        "quot" => Some("\""),
        "apos" => Some("'"),
        _ => None,
    }
}

/// Parse a complete document and return its root element.
pub fn parse_document(content: &str) -> Result<XmlElement, XmlError> {
    let index = LineIndex::new(content);
    let mut reader = NsReader::from_str(content);

    let mut stack: Vec<XmlElement> = Vec::new();
    let mut root: Option<XmlElement> = None;

    loop {
        let event_start = reader.buffer_position() as usize;
        match reader.read_event() {
            Ok(Event::Start(e)) => {
                let element = build_element(&reader, &e, content, &index, event_start)?;
                stack.push(element);
            }
            Ok(Event::Empty(e)) => {
                let element = build_element(&reader, &e, content, &index, event_start)?;
                attach(&mut stack, &mut root, element, content, &index, event_start)?;
            }
            Ok(Event::End(_)) => {
                let element = stack.pop().ok_or_else(|| XmlError {
                    message: "unexpected closing tag".to_string(),
                    position: Some(index.position(content, event_start)),
                })?;
                attach(&mut stack, &mut root, element, content, &index, event_start)?;
            }
            Ok(Event::Text(e)) => {
                if let Some(top) = stack.last_mut() {
                    top.text.push_str(&String::from_utf8_lossy(e.as_ref()));
                }
            }
            Ok(Event::CData(e)) => {
                if let Some(top) = stack.last_mut() {
                    top.text.push_str(&String::from_utf8_lossy(e.as_ref()));
                }
            }
            Ok(Event::GeneralRef(e)) => {
                if let Some(top) = stack.last_mut() {
                    let entity = String::from_utf8_lossy(e.as_ref()).into_owned();
                    if let Some(resolved) = resolve_entity(&entity) {
                        top.text.push_str(resolved);
                    }
                }
            }
            Ok(Event::Eof) => break,
            Ok(_) => {}
            Err(err) => {
                let offset = reader.error_position() as usize;
                return Err(XmlError {
                    message: err.to_string(),
                    position: Some(index.position(content, offset)),
                });
            }
        }
    }

    if !stack.is_empty() {
        return Err(XmlError {
            message: "unclosed element at end of document".to_string(),
            position: Some(index.position(content, content.len())),
        });
    }
    root.ok_or(XmlError {
        message: "document has no root element".to_string(),
        position: None,
    })
}

fn build_element<R>(
    reader: &NsReader<R>,
    e: &quick_xml::events::BytesStart<'_>,
    content: &str,
    index: &LineIndex,
    event_start: usize,
) -> Result<XmlElement, XmlError> {
    let (resolved, local) = reader.resolve_element(e.name());
    let namespace = match resolved {
        ResolveResult::Bound(ns) => Some(String::from_utf8_lossy(ns.as_ref()).into_owned()),
        _ => None,
    };
    let mut attributes = Vec::new();
    for attr in e.attributes() {
        let attr = attr.map_err(|err| XmlError {
            message: format!("malformed attribute: {err}"),
            position: Some(index.position(content, event_start)),
        })?;
        attributes.push(XmlAttribute {
            local_name: String::from_utf8_lossy(attr.key.local_name().as_ref()).into_owned(),
            value: String::from_utf8_lossy(&attr.value).into_owned(),
        });
    }
    let event_end = reader.buffer_position() as usize;
    Ok(XmlElement {
        namespace,
        local_name: String::from_utf8_lossy(local.as_ref()).into_owned(),
        attributes,
        children: Vec::new(),
        text: String::new(),
        range: Range::new(
            index.position(content, event_start),
            index.position(content, event_end),
        ),
    })
}

fn attach(
    stack: &mut Vec<XmlElement>,
    root: &mut Option<XmlElement>,
    element: XmlElement,
    content: &str,
    index: &LineIndex,
    offset: usize,
) -> Result<(), XmlError> {
    if let Some(parent) = stack.last_mut() {
        parent.children.push(element);
    } else if root.is_none() {
        *root = Some(element);
    } else {
        return Err(XmlError {
            message: "document has more than one root element".to_string(),
            position: Some(index.position(content, offset)),
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::location::Position;

    #[test]
    fn parses_namespaced_tree_with_positions() {
        let doc = parse_document(
            "<document xmlns=\"http://cnx.rice.edu/cnxml\">\n  <title>Physics</title>\n</document>",
        )
        .unwrap();
        assert!(doc.is(NS_CNXML, "document"));
        let title = doc.child(NS_CNXML, "title").unwrap();
        assert_eq!(title.text_trim(), "Physics");
        assert_eq!(title.range.start, Position::new(1, 2));
    }

    #[test]
    fn empty_elements_become_children() {
        let doc =
            parse_document("<a xmlns=\"urn:x\"><b href=\"one\"/><b href=\"two\"/></a>").unwrap();
        let hrefs: Vec<_> = doc
            .children_named("urn:x", "b")
            .map(|b| b.attr("href").unwrap())
            .collect();
        assert_eq!(hrefs, vec!["one", "two"]);
    }

    #[test]
    fn attr_non_empty_filters_blank_values() {
        let doc = parse_document("<a x=\"\" y=\"v\"/>").unwrap();
        assert_eq!(doc.attr_non_empty("x"), None);
        assert_eq!(doc.attr_non_empty("y"), Some("v"));
        assert_eq!(doc.attr("missing"), None);
    }

    #[test]
    fn descendants_walk_depth_first() {
        let doc = parse_document("<a><b><c/></b><d/></a>").unwrap();
        let names: Vec<_> = doc.descendants().map(|e| e.local_name.clone()).collect();
        assert_eq!(names, vec!["b", "c", "d"]);
    }

    #[test]
    fn text_entities_are_resolved() {
        let doc = parse_document("<a>Tom &amp; Jerry</a>").unwrap();
        assert_eq!(doc.text_trim(), "Tom & Jerry");
    }

    #[test]
    fn malformed_document_reports_a_position() {
        let err = parse_document("<a>\n  <b>\n</a>").unwrap_err();
        assert!(err.position.is_some());
    }

    #[test]
    fn missing_root_is_an_error() {
        assert!(parse_document("   ").is_err());
        assert!(parse_document("<?xml version=\"1.0\"?>").is_err());
    }

    #[test]
    fn multi_line_positions_count_characters_per_line() {
        let doc = parse_document("<a>\n<b/>\n  <c/>\n</a>").unwrap();
        assert_eq!(doc.children[0].range.start, Position::new(1, 0));
        assert_eq!(doc.children[1].range.start, Position::new(2, 2));
    }
}
