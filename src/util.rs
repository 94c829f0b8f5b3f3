//! Small shared helpers.

use std::path::Path;

use percent_encoding::percent_decode_str;

/// Split a `class` attribute value into its ordered tokens.
pub(crate) fn class_tokens(value: &str) -> Vec<String> {
    value.split_whitespace().map(str::to_string).collect()
}

/// Derive a cache filename from a font URL: the final path segment,
/// percent-decoded, with query/fragment stripped.
///
/// Returns `None` when the URL has no usable final segment.
pub(crate) fn cache_file_name(url: &str) -> Option<String> {
    let without_fragment = url.split('#').next().unwrap_or(url);
    let without_query = without_fragment.split('?').next().unwrap_or(without_fragment);
    let rest = without_query
        .split_once("://")
        .map(|(_, r)| r)
        .unwrap_or(without_query);
    let (_, path) = rest.split_once('/')?;
    let segment = path.rsplit('/').next()?;
    if segment.is_empty() {
        return None;
    }

    let decoded = percent_decode_str(segment).decode_utf8().ok()?;
    // A decoded segment could smuggle path separators back in.
    let name: String = decoded
        .chars()
        .map(|c| if c == '/' || c == '\\' { '_' } else { c })
        .collect();
    if name.is_empty() { None } else { Some(name) }
}

/// Stable identifier for a fixed font: its filename stem.
///
/// Fixed fonts are shared, content-stable assets, so the stem is enough to
/// namespace the persistent glyph map.
pub(crate) fn font_key(path: &Path) -> String {
    path.file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| "font".to_string())
}
