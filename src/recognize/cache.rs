//! Persistent font map cache.
//!
//! Recognition is the expensive step of the pipeline, and fixed fonts are
//! shared, content-stable assets, so every resolved glyph is persisted in
//! a per-fixed-font table and reused across chapters and books. Once a
//! character is present here it is never re-rendered or re-queried.
//!
//! On-disk format is a flat JSON object `{obfuscated_char: resolved_char}`,
//! one file per fixed-font filename stem. The format is stable and must
//! round-trip through repeated load/flush cycles.
//!
//! The cache is a plain value with single-writer semantics: callers running
//! chapter pipelines in parallel must serialize flushes per fixed-font key,
//! or concurrent last-writer-wins flushes can lose updates.

use std::collections::BTreeMap;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use log::{debug, warn};

use crate::error::Result;
use crate::util;

pub struct FontMapCache {
    path: PathBuf,
    map: BTreeMap<char, char>,
    dirty: bool,
}

impl FontMapCache {
    /// Load the cache for a fixed font, starting empty when no cache file
    /// exists yet (or when an existing file fails to parse).
    pub fn load(cache_dir: &Path, fixed_font: &Path) -> Self {
        let key = util::font_key(fixed_font);
        let path = cache_dir.join(format!("{key}.json"));

        let map = match fs::read_to_string(&path) {
            Ok(text) => match parse_map(&text) {
                Some(map) => map,
                None => {
                    warn!("unreadable font map cache {}, starting empty", path.display());
                    BTreeMap::new()
                }
            },
            Err(_) => BTreeMap::new(),
        };
        debug!("font map cache {}: {} entries", path.display(), map.len());

        FontMapCache {
            path,
            map,
            dirty: false,
        }
    }

    pub fn get(&self, obfuscated: char) -> Option<char> {
        self.map.get(&obfuscated).copied()
    }

    pub fn insert(&mut self, obfuscated: char, resolved: char) {
        if self.map.insert(obfuscated, resolved) != Some(resolved) {
            self.dirty = true;
        }
    }

    pub fn len(&self) -> usize {
        self.map.len()
    }

    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }

    /// Flush the in-memory table to disk. No-op when nothing changed.
    ///
    /// The write goes through a temp file in the same directory so a
    /// crashed flush never truncates an existing cache.
    pub fn flush(&mut self) -> Result<()> {
        if !self.dirty {
            return Ok(());
        }

        let dir = self.path.parent().unwrap_or_else(|| Path::new("."));
        fs::create_dir_all(dir)?;

        let serializable: BTreeMap<String, String> = self
            .map
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        let text = serde_json::to_string(&serializable)?;

        let mut tmp = tempfile::NamedTempFile::new_in(dir)?;
        tmp.write_all(text.as_bytes())?;
        tmp.persist(&self.path).map_err(|e| e.error)?;

        self.dirty = false;
        Ok(())
    }
}

fn parse_map(text: &str) -> Option<BTreeMap<char, char>> {
    let raw: BTreeMap<String, String> = serde_json::from_str(text).ok()?;
    let mut map = BTreeMap::new();
    for (k, v) in raw {
        let (mut ks, mut vs) = (k.chars(), v.chars());
        match (ks.next(), ks.next(), vs.next(), vs.next()) {
            (Some(key), None, Some(value), None) => {
                map.insert(key, value);
            }
            _ => return None,
        }
    }
    Some(map)
}
