//! Font asset resolution.
//!
//! An encrypted chapter references two fonts: an ephemeral per-chapter
//! "random" font embedded in the SSR payload as base64, and a shared
//! "fixed" reference font served by URL. Both must exist on local disk
//! before glyph recognition can run; failing to obtain either is fatal for
//! the chapter (the caller logs and moves on).

use std::fs;
use std::path::{Path, PathBuf};

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use log::debug;

use crate::error::{Error, Result};
use crate::util;

/// Capability that retrieves a font blob by URL into a destination file.
///
/// Implemented by the surrounding application's HTTP stack; timeout and
/// retry policy belong to the implementation, not to this crate.
pub trait FontFetcher {
    fn fetch(&self, url: &str, dest: &Path) -> Result<()>;
}

/// Materializes the chapter's font pair onto local storage.
pub struct FontResolver<'a> {
    fetcher: &'a dyn FontFetcher,
    fonts_dir: PathBuf,
}

impl<'a> FontResolver<'a> {
    pub fn new(fetcher: &'a dyn FontFetcher, fonts_dir: impl Into<PathBuf>) -> Self {
        FontResolver {
            fetcher,
            fonts_dir: fonts_dir.into(),
        }
    }

    /// Decode the embedded base64 payload into the per-chapter scratch file.
    ///
    /// The scratch path is overwritten on every call; random fonts are
    /// single-use and never shared across chapters. Accepts an optional
    /// `data:...;base64,` prefix and embedded whitespace.
    pub fn write_random_font(&self, payload: &str) -> Result<PathBuf> {
        let raw = match payload.find("base64,") {
            Some(idx) => &payload[idx + "base64,".len()..],
            None => payload,
        };
        let cleaned: String = raw.chars().filter(|c| !c.is_ascii_whitespace()).collect();
        let data = STANDARD.decode(cleaned)?;
        if data.is_empty() {
            return Err(Error::InvalidFont("empty random font payload".to_string()));
        }

        fs::create_dir_all(&self.fonts_dir)?;
        let path = self.fonts_dir.join("random.ttf");
        fs::write(&path, data)?;
        Ok(path)
    }

    /// Ensure the shared fixed font is present in the cache directory,
    /// downloading it only when a file of the derived name does not
    /// already exist.
    pub fn ensure_fixed_font(&self, url: &str) -> Result<PathBuf> {
        let name = util::cache_file_name(url)
            .ok_or_else(|| Error::FontUnavailable(format!("no filename in url {url}")))?;
        let path = self.fonts_dir.join(name);
        if path.exists() {
            debug!("fixed font already cached: {}", path.display());
            return Ok(path);
        }

        fs::create_dir_all(&self.fonts_dir)?;
        self.fetcher.fetch(url, &path)?;
        if !path.exists() {
            return Err(Error::FontUnavailable(format!(
                "fetcher produced no file for {url}"
            )));
        }
        Ok(path)
    }
}
