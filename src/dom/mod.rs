//! Paragraph structure extraction.
//!
//! Converts a chapter's content fragment into an owned tree of
//! [`ParagraphNode`]s, preserving mixed text/element order exactly as
//! encountered. The DOM order is what the site serves, deliberately
//! untrustworthy for order-keyed children; the renderer later
//! overrides it using the compiled rule table.
//!
//! Decoy markup (elements carrying the `review` class) is pruned here and
//! never contributes text.

use std::collections::HashMap;

use html5ever::ParseOpts;
use html5ever::parse_document;
use html5ever::tendril::TendrilSink;
use markup5ever_rcdom::{Handle, NodeData, RcDom};

use crate::util;

/// Class token marking injected decoy spans.
pub const DECOY_CLASS: &str = "review";

/// One node of the extracted chapter tree.
///
/// Built once per chapter and immutable thereafter; the renderer performs a
/// single top-down pass, so no parent back-references are kept.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ParagraphNode {
    Text(String),
    Element(ParagraphElement),
}

/// An element node: tag, normalized class tokens, remaining attributes and
/// children in document order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParagraphElement {
    pub tag: String,
    pub classes: Vec<String>,
    pub attrs: HashMap<String, String>,
    pub children: Vec<ParagraphNode>,
}

impl ParagraphElement {
    /// First class token with the given prefix, if any.
    pub fn class_starting_with(&self, prefix: &str) -> Option<&str> {
        self.classes
            .iter()
            .map(String::as_str)
            .find(|c| c.starts_with(prefix))
    }

    pub fn has_class(&self, name: &str) -> bool {
        self.classes.iter().any(|c| c == name)
    }

    /// The element's first direct text child, or the empty string.
    pub fn first_text(&self) -> &str {
        self.children
            .iter()
            .find_map(|child| match child {
                ParagraphNode::Text(t) => Some(t.as_str()),
                ParagraphNode::Element(_) => None,
            })
            .unwrap_or("")
    }

    pub fn attr(&self, name: &str) -> Option<&str> {
        self.attrs.get(name).map(String::as_str)
    }
}

/// Extract the chapter's paragraph tree from a markup fragment.
///
/// When an element whose `id` ends with `chapter_id` exists, extraction is
/// scoped to it; otherwise the whole fragment is used. Whitespace-only text
/// nodes between elements are dropped; everything else keeps its order.
pub fn extract_paragraphs(html: &str, chapter_id: &str) -> Vec<ParagraphNode> {
    let dom = parse_fragment(html);
    let root = if chapter_id.is_empty() {
        None
    } else {
        find_scoped_root(&dom.document, chapter_id)
    };
    let root = root
        .or_else(|| find_first_element(&dom.document, "body"))
        .unwrap_or_else(|| dom.document.clone());

    let mut nodes = Vec::new();
    for child in root.children.borrow().iter() {
        if let Some(node) = convert(child) {
            nodes.push(node);
        }
    }
    nodes
}

/// Full text of a node's subtree, in document order.
pub fn node_text(node: &ParagraphNode) -> String {
    match node {
        ParagraphNode::Text(t) => t.clone(),
        ParagraphNode::Element(e) => {
            let mut text = String::new();
            for child in &e.children {
                text.push_str(&node_text(child));
            }
            text
        }
    }
}

/// Parse a fragment by wrapping it in a minimal document.
fn parse_fragment(html: &str) -> RcDom {
    let wrapped = format!("<!DOCTYPE html><html><head></head><body>{html}</body></html>");
    parse_document(RcDom::default(), ParseOpts::default())
        .from_utf8()
        .one(wrapped.as_bytes())
}

fn find_scoped_root(handle: &Handle, chapter_id: &str) -> Option<Handle> {
    if let NodeData::Element { ref attrs, .. } = handle.data {
        for attr in attrs.borrow().iter() {
            if attr.name.local.as_ref() == "id" && attr.value.ends_with(chapter_id) {
                return Some(handle.clone());
            }
        }
    }

    for child in handle.children.borrow().iter() {
        if let Some(found) = find_scoped_root(child, chapter_id) {
            return Some(found);
        }
    }
    None
}

fn find_first_element(handle: &Handle, name: &str) -> Option<Handle> {
    if let NodeData::Element { name: ref qname, .. } = handle.data
        && qname.local.as_ref() == name
    {
        return Some(handle.clone());
    }

    for child in handle.children.borrow().iter() {
        if let Some(found) = find_first_element(child, name) {
            return Some(found);
        }
    }
    None
}

/// Convert one DOM node, pruning decoys and non-content nodes.
fn convert(handle: &Handle) -> Option<ParagraphNode> {
    match handle.data {
        NodeData::Text { ref contents } => {
            let text = contents.borrow().to_string();
            if text.trim().is_empty() {
                None
            } else {
                Some(ParagraphNode::Text(text))
            }
        }
        NodeData::Element {
            ref name,
            ref attrs,
            ..
        } => {
            let mut classes = Vec::new();
            let mut attr_map = HashMap::new();
            for attr in attrs.borrow().iter() {
                let key = attr.name.local.as_ref();
                if key == "class" {
                    classes = util::class_tokens(&attr.value);
                } else {
                    attr_map.insert(key.to_string(), attr.value.to_string());
                }
            }

            if classes.iter().any(|c| c == DECOY_CLASS) {
                return None;
            }

            let mut children = Vec::new();
            for child in handle.children.borrow().iter() {
                if let Some(node) = convert(child) {
                    children.push(node);
                }
            }

            Some(ParagraphNode::Element(ParagraphElement {
                tag: name.local.as_ref().to_string(),
                classes,
                attrs: attr_map,
                children,
            }))
        }
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn element(node: &ParagraphNode) -> &ParagraphElement {
        match node {
            ParagraphNode::Element(e) => e,
            ParagraphNode::Text(t) => panic!("expected element, got text {t:?}"),
        }
    }

    #[test]
    fn test_mixed_children_preserve_order() {
        let html = r#"<p class="p1">head<span attr="x">mid</span>tail</p>"#;
        let nodes = extract_paragraphs(html, "");
        assert_eq!(nodes.len(), 1);

        let p = element(&nodes[0]);
        assert_eq!(p.tag, "p");
        assert_eq!(p.classes, vec!["p1"]);
        assert_eq!(p.children.len(), 3);
        assert_eq!(p.children[0], ParagraphNode::Text("head".to_string()));
        let span = element(&p.children[1]);
        assert_eq!(span.first_text(), "mid");
        assert_eq!(span.attr("attr"), Some("x"));
        assert_eq!(p.children[2], ParagraphNode::Text("tail".to_string()));
    }

    #[test]
    fn test_decoy_elements_are_pruned() {
        let html = r#"<p class="p1">keep<span class="review">DECOY</span>also</p>"#;
        let nodes = extract_paragraphs(html, "");
        let p = element(&nodes[0]);
        assert_eq!(p.children.len(), 2);
        assert!(!node_text(&nodes[0]).contains("DECOY"));
    }

    #[test]
    fn test_scoped_to_chapter_container() {
        let html = r#"
            <div id="decoy-1"><p class="p1">wrong</p></div>
            <main id="c-7749"><p class="p1">right</p></main>
        "#;
        let nodes = extract_paragraphs(html, "7749");
        assert_eq!(nodes.len(), 1);
        assert_eq!(node_text(&nodes[0]), "right");
    }

    #[test]
    fn test_unscoped_when_container_missing() {
        let html = r#"<p class="p1">a</p><p class="p2">b</p>"#;
        let nodes = extract_paragraphs(html, "9999");
        assert_eq!(nodes.len(), 2);
    }

    #[test]
    fn test_empty_fragment() {
        assert!(extract_paragraphs("", "").is_empty());
        assert!(extract_paragraphs("   \n  ", "").is_empty());
    }
}
