//! SSR context extraction and access classification.
//!
//! Chapter pages embed their server-side-rendered state as a JSON blob
//! inside a `<script>` element. Everything the pipeline needs (content
//! markup, stylesheet, font payloads, access flags) lives in the
//! `chapterInfo` record of that blob.
//!
//! Extraction never fails: malformed or missing JSON returns an empty map,
//! which callers treat as "nothing to extract here".

use std::collections::VecDeque;

use html5ever::ParseOpts;
use html5ever::parse_document;
use html5ever::tendril::TendrilSink;
use markup5ever_rcdom::{Handle, NodeData, RcDom};
use memchr::memmem;
use serde::Deserialize;
use serde_json::{Map, Value};

/// How a chapter may be read, derived from the SSR access flags.
///
/// `Restricted` terminates processing immediately; the other two states
/// select between direct text extraction and the full font pipeline.
/// (The transient "viewable" state of the site's own model is implicit:
/// any non-restricted chapter is viewable one way or the other.)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Access {
    /// Paywalled and not purchased; no content is available.
    Restricted,
    /// Content renders directly; no font recovery needed.
    PlainText,
    /// Glyphs are swapped through a per-chapter font; run the full pipeline.
    FontEncrypted,
}

/// Encryption status code meaning "font-encrypted".
const CES_FONT_ENCRYPTED: i64 = 2;

/// Extract the `chapterInfo` record from a raw chapter page.
///
/// Returns an empty map on any failure; a page without SSR state is not an
/// error condition for the caller.
pub fn extract_chapter_info(html: &str) -> Map<String, Value> {
    for script in script_bodies(html) {
        if memmem::find(script.as_bytes(), b"chapterInfo").is_none() {
            continue;
        }
        if let Some(value) = parse_embedded_json(&script)
            && let Some(info) = find_object(&value, "chapterInfo")
        {
            return info.clone();
        }
    }
    Map::new()
}

/// Classify chapter access from the SSR flags.
///
/// `vipStatus == 1` without `isBuy == 1` means paywalled-and-unpurchased;
/// otherwise the `cES` code decides between plaintext and font encryption.
pub fn classify(info: &Map<String, Value>) -> Access {
    let vip = json_i64(info, "vipStatus").unwrap_or(0);
    let bought = json_i64(info, "isBuy").unwrap_or(0);
    if vip == 1 && bought == 0 {
        return Access::Restricted;
    }
    match json_i64(info, "cES") {
        Some(CES_FONT_ENCRYPTED) => Access::FontEncrypted,
        _ => Access::PlainText,
    }
}

/// Collect the text content of every `<script>` element in the page.
fn script_bodies(html: &str) -> Vec<String> {
    let dom: RcDom = parse_document(RcDom::default(), ParseOpts::default())
        .from_utf8()
        .one(html.as_bytes());

    let mut scripts = Vec::new();
    collect_scripts(&dom.document, &mut scripts);
    scripts
}

fn collect_scripts(handle: &Handle, out: &mut Vec<String>) {
    if let NodeData::Element { ref name, .. } = handle.data
        && name.local.as_ref() == "script"
    {
        let mut text = String::new();
        for child in handle.children.borrow().iter() {
            if let NodeData::Text { ref contents } = child.data {
                text.push_str(&contents.borrow());
            }
        }
        if !text.is_empty() {
            out.push(text);
        }
        return;
    }

    for child in handle.children.borrow().iter() {
        collect_scripts(child, out);
    }
}

/// Parse the first JSON object embedded in a script body.
///
/// Handles both assignment form (`window.name = {...};`) and bare
/// `<script type="application/json">` payloads by parsing a single value
/// from the first `{` and ignoring whatever trails it.
fn parse_embedded_json(script: &str) -> Option<Value> {
    let start = memchr::memchr(b'{', script.as_bytes())?;
    let mut deserializer = serde_json::Deserializer::from_str(&script[start..]);
    Value::deserialize(&mut deserializer).ok()
}

/// Breadth-first search for an object-valued `key` at any nesting depth.
fn find_object<'a>(root: &'a Value, key: &str) -> Option<&'a Map<String, Value>> {
    let mut queue: VecDeque<&Value> = VecDeque::new();
    queue.push_back(root);

    while let Some(value) = queue.pop_front() {
        match value {
            Value::Object(map) => {
                if let Some(Value::Object(found)) = map.get(key) {
                    return Some(found);
                }
                queue.extend(map.values());
            }
            Value::Array(items) => queue.extend(items.iter()),
            _ => {}
        }
    }
    None
}

/// Read an integer field, tolerating numeric strings.
pub(crate) fn json_i64(map: &Map<String, Value>, key: &str) -> Option<i64> {
    match map.get(key)? {
        Value::Number(n) => n.as_i64(),
        Value::String(s) => s.trim().parse().ok(),
        Value::Bool(b) => Some(i64::from(*b)),
        _ => None,
    }
}

/// Read a string field.
pub(crate) fn json_str<'a>(map: &'a Map<String, Value>, key: &str) -> Option<&'a str> {
    map.get(key).and_then(Value::as_str)
}

/// Read a boolean-ish field (`true`, `1`, `"1"` all count).
pub(crate) fn json_bool(map: &Map<String, Value>, key: &str) -> bool {
    json_i64(map, key).unwrap_or(0) != 0
}
