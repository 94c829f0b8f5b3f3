//! Paragraph rendering.
//!
//! Applies the compiled rule table to the paragraph tree, reproducing the
//! site's intended reading order from unordered DOM fragments. Raw text and
//! inline `sy-*` substitutions are emitted in place; order-listed children
//! are buffered and flushed in ascending `order` sequence, because DOM
//! order is untrustworthy for them.
//!
//! Also hosts the end-number disambiguator: a statistical helper resolving
//! the numeric tag-name suffix that varies release to release.

use std::collections::{BTreeSet, HashMap};

use log::debug;

use crate::css::{Append, RuleTable, StyleRule};
use crate::dom::{DECOY_CLASS, ParagraphElement, ParagraphNode};

/// Result of rendering one chapter tree: the joined text stream (still in
/// obfuscated codepoints) plus the set of glyphs that must be read mirrored.
#[derive(Debug, Default)]
pub struct Rendered {
    pub text: String,
    pub refl_set: BTreeSet<char>,
}

impl Rendered {
    /// Characters that need upright recognition: every non-whitespace
    /// character of the text stream that is not in the mirrored set.
    ///
    /// Keeping the two sets disjoint by construction means a glyph is never
    /// rendered both ways in one chapter pass.
    pub fn upright_chars(&self) -> BTreeSet<char> {
        self.text
            .chars()
            .filter(|c| !c.is_whitespace() && !self.refl_set.contains(c))
            .collect()
    }
}

/// Resolve the numeric tag-name suffix for this chapter.
///
/// Takes the compiled paragraph tag keys as known prefixes (longest first,
/// so `span` cannot shadow a longer key) and tallies the purely-numeric
/// remainder of every matching element tag in the tree. The most common
/// remainder wins only when it accounts for strictly more than half of all
/// prefix matches; otherwise the suffix is empty.
pub fn detect_end_number(table: &RuleTable, paragraphs: &[ParagraphNode]) -> String {
    let mut prefixes: Vec<&str> = table
        .paragraph
        .values()
        .flat_map(|rules| rules.keys())
        .map(String::as_str)
        .collect();
    prefixes.sort_unstable();
    prefixes.dedup();
    prefixes.sort_by(|a, b| b.len().cmp(&a.len()).then(a.cmp(b)));

    let mut tallies: HashMap<String, usize> = HashMap::new();
    let mut total = 0usize;
    tally_tags(paragraphs, &prefixes, &mut tallies, &mut total);

    let winner = tallies
        .iter()
        .filter(|(suffix, _)| !suffix.is_empty())
        .max_by(|a, b| a.1.cmp(b.1).then(a.0.cmp(b.0)));

    match winner {
        Some((suffix, &count)) if count * 2 > total => suffix.clone(),
        _ => String::new(),
    }
}

fn tally_tags(
    nodes: &[ParagraphNode],
    prefixes: &[&str],
    tallies: &mut HashMap<String, usize>,
    total: &mut usize,
) {
    for node in nodes {
        let ParagraphNode::Element(element) = node else {
            continue;
        };
        for prefix in prefixes {
            if let Some(rest) = element.tag.strip_prefix(prefix)
                && (rest.is_empty() || rest.chars().all(|c| c.is_ascii_digit()))
            {
                *total += 1;
                *tallies.entry(rest.to_string()).or_insert(0) += 1;
                break;
            }
        }
        tally_tags(&element.children, prefixes, tallies, total);
    }
}

/// Render the whole paragraph tree to the final text stream.
///
/// Paragraphs are separated by a blank line.
pub fn render_paragraphs(
    paragraphs: &[ParagraphNode],
    table: &RuleTable,
    end_number: &str,
) -> Rendered {
    let mut refl_set = BTreeSet::new();
    let mut parts = Vec::new();

    for node in paragraphs {
        match node {
            ParagraphNode::Text(text) => parts.push(text.clone()),
            ParagraphNode::Element(element) => {
                parts.push(render_paragraph(element, table, end_number, &mut refl_set));
            }
        }
    }

    Rendered {
        text: parts.join("\n\n"),
        refl_set,
    }
}

/// Render one top-level paragraph node.
///
/// Children are walked in DOM order. Raw text is appended verbatim, decoy
/// spans are skipped, `sy-*` substitutions resolve in place, and children
/// whose tag key is on the order list are buffered until the walk finishes.
fn render_paragraph(
    paragraph: &ParagraphElement,
    table: &RuleTable,
    end_number: &str,
    refl_set: &mut BTreeSet<char>,
) -> String {
    let class_key = paragraph.class_starting_with("p");
    let rules = class_key.and_then(|key| table.paragraph.get(key));

    let mut out = String::new();
    let mut buffered: HashMap<&str, Vec<String>> = HashMap::new();

    for child in &paragraph.children {
        let element = match child {
            ParagraphNode::Text(text) => {
                out.push_str(text);
                continue;
            }
            ParagraphNode::Element(element) => element,
        };

        if element.has_class(DECOY_CLASS) {
            continue;
        }

        // Inline single-glyph substitution, not subject to the order list.
        if let Some(sy_class) = element.class_starting_with("sy-") {
            match table.sy.get(sy_class) {
                Some(rule) => {
                    let value = apply_rule(element, rule, end_number, refl_set);
                    out.push_str(&value);
                }
                None => debug!("no sy rule for class {sy_class:?}"),
            }
            continue;
        }

        // Ordinary children match rule key + end number against their tag.
        let base_tag = match strip_end_number(&element.tag, end_number) {
            Some(base) => base,
            None => {
                debug!("skipping element <{}> without end number {end_number:?}", element.tag);
                continue;
            }
        };
        match rules.and_then(|map| map.get_key_value(base_tag)) {
            Some((tag_key, rule)) => {
                let value = apply_rule(element, rule, end_number, refl_set);
                if table.has_order(tag_key) {
                    buffered.entry(tag_key.as_str()).or_default().push(value);
                } else {
                    out.push_str(&value);
                }
            }
            None => debug!(
                "skipping element <{}> with no paragraph rule under {class_key:?}",
                element.tag
            ),
        }
    }

    // Buffered values land in ascending order sequence, not DOM order.
    for (tag_key, _) in &table.order {
        if let Some(values) = buffered.remove(tag_key.as_str()) {
            for value in values {
                out.push_str(&value);
            }
        }
    }

    out
}

/// Strip the detected end-number suffix from an element tag, yielding the
/// rule key it matches. With an empty suffix the tag is its own key.
fn strip_end_number<'a>(tag: &'a str, end_number: &str) -> Option<&'a str> {
    if end_number.is_empty() {
        Some(tag)
    } else {
        tag.strip_suffix(end_number)
    }
}

/// Render a single node through a rule.
///
/// Starts from the node's first direct text child; `delete_all` discards
/// the value entirely (it still occupies its order slot), `delete_first`
/// drops the leading character, then literal or attribute-sourced text is
/// prepended/appended. A `mirror` rule records the resulting characters
/// into the reflected set instead of the upright one.
fn apply_rule(
    element: &ParagraphElement,
    rule: &StyleRule,
    end_number: &str,
    refl_set: &mut BTreeSet<char>,
) -> String {
    let mut value = if rule.delete_all {
        String::new()
    } else {
        let text = element.first_text();
        if rule.delete_first {
            let mut chars = text.chars();
            chars.next();
            chars.as_str().to_string()
        } else {
            text.to_string()
        }
    };

    if let Some(append) = &rule.append_start {
        value.insert_str(0, &append_text(element, append, end_number));
    }
    if let Some(append) = &rule.append_end {
        value.push_str(&append_text(element, append, end_number));
    }

    if rule.mirror {
        for c in value.chars().filter(|c| !c.is_whitespace()) {
            refl_set.insert(c);
        }
    }

    value
}

/// Text contributed by a `content` effect. Attribute lookups carry the
/// end-number suffix, falling back to the bare name.
fn append_text(element: &ParagraphElement, append: &Append, end_number: &str) -> String {
    match append {
        Append::Literal(text) => text.clone(),
        Append::Attr(name) => {
            let suffixed = format!("{name}{end_number}");
            element
                .attr(&suffixed)
                .or_else(|| element.attr(name))
                .unwrap_or_default()
                .to_string()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::css::compile;
    use crate::dom::extract_paragraphs;

    fn render(html: &str, css: &str) -> Rendered {
        let paragraphs = extract_paragraphs(html, "");
        let table = compile(css);
        let end_number = detect_end_number(&table, &paragraphs);
        render_paragraphs(&paragraphs, &table, &end_number)
    }

    #[test]
    fn test_order_list_overrides_dom_order() {
        // Matching elements arrive in reverse DOM order.
        let html = r#"<p class="p1"><i>second</i><span>first</span></p>"#;
        let css = ".p1 span { order: 1; } .p1 i { order: 2; }";
        assert_eq!(render(html, css).text, "firstsecond");
    }

    #[test]
    fn test_raw_text_is_never_reordered() {
        let html = r#"<p class="p1">AA<i>zz</i>BB<span>yy</span>CC</p>"#;
        let css = ".p1 span { order: 1; } .p1 i { order: 2; }";
        assert_eq!(render(html, css).text, "AABBCCyyzz");
    }

    #[test]
    fn test_delete_all_still_occupies_order_slot() {
        let html = r#"<p class="p1"><i>keep</i><span>gone</span></p>"#;
        let css = ".p1 span { order: 1; font-size: 0; } .p1 i { order: 2; }";
        // The span slot is consumed (empty), i still follows it.
        assert_eq!(render(html, css).text, "keep");
    }

    #[test]
    fn test_delete_first() {
        let html = r#"<p class="p1"><span>abc</span><i>x</i></p>"#;
        let css = ".p1 span::first-letter { font-size: 0; } .p1 i::first-letter { font-size: 0; }";
        assert_eq!(render(html, css).text, "bc");
    }

    #[test]
    fn test_sy_substitution_resolves_in_place() {
        let html = r#"<p class="p1">a<y class="sy-k"></y>b</p>"#;
        let css = r#".sy-k::after { content: "中"; }"#;
        assert_eq!(render(html, css).text, "a中b");
    }

    #[test]
    fn test_append_attr_with_end_number() {
        let html = r#"<p class="p1"><span3 d3="尾">body</span3></p>"#;
        let css = ".p1 span::after { content: attr(d); } .p1 i { order: 9; }";
        // A lone numbered tag: 1 of 1 matches carries suffix "3".
        let rendered = render(html, css);
        assert_eq!(rendered.text, "body尾");
    }

    #[test]
    fn test_mirror_bookkeeping_keeps_sets_disjoint() {
        let html = r#"<p class="p1"><span>甲乙</span><i>乙丙</i></p>"#;
        let css = ".p1 span { transform: scaleX(-1); } .p1 i { order: 1; }";
        let rendered = render(html, css);

        assert_eq!(rendered.text, "甲乙乙丙");
        assert!(rendered.refl_set.contains(&'甲'));
        assert!(rendered.refl_set.contains(&'乙'));

        let upright = rendered.upright_chars();
        assert!(upright.contains(&'丙'));
        // '乙' went through the mirror rule; it must not appear upright too.
        assert!(!upright.contains(&'乙'));
        assert!(upright.is_disjoint(&rendered.refl_set));
    }

    #[test]
    fn test_unknown_markup_is_tolerated() {
        let html = r#"<p class="p1"><blink>???</blink><span>ok</span></p>"#;
        let css = ".p1 span { order: 1; }";
        assert_eq!(render(html, css).text, "ok");
    }

    #[test]
    fn test_paragraphs_separated_by_blank_line() {
        let html = r#"<p class="p1"><span>one</span></p><p class="p1"><span>two</span></p>"#;
        let css = ".p1 span { order: 1; }";
        assert_eq!(render(html, css).text, "one\n\ntwo");
    }

    #[test]
    fn test_end_number_majority_rule() {
        let table = compile(".p1 span { order: 1; } .p1 i { order: 2; }");

        // 8 tags with suffix "1", 2 with suffix "2": 8 > 10/2, winner "1".
        let mut html = String::from(r#"<p class="p1">"#);
        for _ in 0..4 {
            html.push_str("<span1>a</span1><i1>b</i1>");
        }
        html.push_str("<span2>c</span2><i2>d</i2></p>");
        let paragraphs = extract_paragraphs(&html, "");
        assert_eq!(detect_end_number(&table, &paragraphs), "1");

        // A 5/5 split has no strict majority: suffix forced empty.
        let mut html = String::from(r#"<p class="p1">"#);
        for _ in 0..2 {
            html.push_str("<span1>a</span1><i1>b</i1>");
        }
        html.push_str("<span1>a</span1>");
        for _ in 0..2 {
            html.push_str("<span2>c</span2><i2>d</i2>");
        }
        html.push_str("<span2>c</span2></p>");
        let paragraphs = extract_paragraphs(&html, "");
        assert_eq!(detect_end_number(&table, &paragraphs), "");
    }

    #[test]
    fn test_wrong_end_number_decoys_are_dropped() {
        let html = r#"<p class="p1"><span7>real</span7><span2>decoy</span2><span7>tail</span7></p>"#;
        let css = ".p1 span { order: 1; }";
        let rendered = render(html, css);
        assert_eq!(rendered.text, "realtail");
    }
}
