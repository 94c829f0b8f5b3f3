//! Compiled style rules for the obfuscation dialect.
//!
//! The chapter stylesheet is not general CSS: it is a narrow, adversarial
//! dialect whose declarations encode text edits: deletions, mirroring,
//! pseudo-element insertions and an explicit render order. This module
//! holds the compiled form; [`compiler`] produces it.

use std::collections::HashMap;

mod compiler;

pub use compiler::compile;

/// Text inserted by a `content` declaration: either a literal string or the
/// value of a named attribute on the matched element.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Append {
    Literal(String),
    Attr(String),
}

/// One compiled rule: the set of effects its declarations map to.
///
/// Effects are explicit fields rather than a flag map so the renderer gets
/// compile-time guarantees over which effects exist.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct StyleRule {
    /// `font-size: 0` on the element itself: the value is discarded.
    pub delete_all: bool,
    /// `font-size: 0` on `::first-letter`: drop the first character.
    pub delete_first: bool,
    /// `transform: scaleX(-1)`: the produced text reads mirrored.
    pub mirror: bool,
    /// `content` on `::before`.
    pub append_start: Option<Append>,
    /// `content` on `::after`.
    pub append_end: Option<Append>,
}

impl StyleRule {
    /// Merge another rule into this one (recurring selector keys merge
    /// their declarations; `other` takes precedence where both are set).
    pub fn merge(&mut self, other: &StyleRule) {
        self.delete_all |= other.delete_all;
        self.delete_first |= other.delete_first;
        self.mirror |= other.mirror;
        if other.append_start.is_some() {
            self.append_start.clone_from(&other.append_start);
        }
        if other.append_end.is_some() {
            self.append_end.clone_from(&other.append_end);
        }
    }

    pub fn is_empty(&self) -> bool {
        !self.delete_all
            && !self.delete_first
            && !self.mirror
            && self.append_start.is_none()
            && self.append_end.is_none()
    }
}

/// The compiled rule table for one chapter.
#[derive(Debug, Default, Clone, PartialEq)]
pub struct RuleTable {
    /// Inline substitution rules, keyed by `sy-*` class name.
    pub sy: HashMap<String, StyleRule>,
    /// Paragraph rules: class key → tag key → rule.
    pub paragraph: HashMap<String, HashMap<String, StyleRule>>,
    /// Render order for ordinary paragraph-class children, sorted ascending
    /// by numeric key. This list, not DOM order, is authoritative.
    pub order: Vec<(String, i64)>,
}

impl RuleTable {
    /// Whether a tag key participates in order-buffered rendering.
    pub fn has_order(&self, tag_key: &str) -> bool {
        self.order.iter().any(|(key, _)| key == tag_key)
    }

    pub(crate) fn sort_order(&mut self) {
        // Stable: equal keys keep appearance order.
        self.order.sort_by_key(|(_, n)| *n);
    }
}
