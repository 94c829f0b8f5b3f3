//! Chapter orchestration.
//!
//! Sequences the whole pipeline for one chapter: SSR extraction, access
//! classification, structure extraction (with an external decryption
//! round-trip for VIP chapters whose markup is withheld), CSS compilation,
//! rendering, glyph recognition and final assembly.
//!
//! No failure here propagates as a fault: every unrecoverable condition
//! degrades to "this chapter produced no usable content" and the caller
//! moves on to the next chapter.

use std::collections::BTreeMap;
use std::path::PathBuf;

use log::{debug, info, warn};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::css;
use crate::dom::{self, ParagraphNode};
use crate::error::{Error, Result};
use crate::fonts::{FontFetcher, FontResolver};
use crate::recognize::{FontMapCache, GlyphSources, LoadedFont, RecognitionService};
use crate::render;
use crate::ssr::{self, Access};

/// Keywords whose presence marks placeholder markup standing in for the
/// real (withheld) chapter body.
const PLACEHOLDER_KEYWORDS: &[&str] = &["订阅本章", "购买本章", "本章为VIP章节", "继续阅读请购买"];

/// Capability that turns withheld chapter ciphertext into renderable HTML.
pub trait ChapterDecryptor {
    fn decrypt(
        &self,
        ciphertext: &str,
        chapter_id: &str,
        auth_key: &str,
        user_id: &str,
    ) -> Result<String>;
}

/// Credentials forwarded to the [`ChapterDecryptor`].
#[derive(Debug, Clone)]
pub struct AuthParams {
    pub auth_key: String,
    pub user_id: String,
}

/// Filesystem locations the pipeline writes to.
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    /// Scratch and cache directory for font blobs.
    pub fonts_dir: PathBuf,
    /// Directory of persistent per-fixed-font glyph maps.
    pub cache_dir: PathBuf,
}

/// The finished chapter record handed to the storage/export side.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChapterContentResult {
    pub id: String,
    pub title: String,
    pub content: String,
    pub metadata: ChapterMetadata,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ChapterMetadata {
    pub author_note: Option<String>,
    pub update_time: Option<String>,
    pub update_timestamp: Option<i64>,
    pub word_count: Option<u64>,
    pub volume: Option<String>,
    pub duplicated: bool,
    pub encrypted: bool,
}

/// One chapter pipeline, wired to its external capabilities.
///
/// The pipeline itself is synchronous; callers may run one per chapter
/// concurrently as long as flushes of a shared fixed-font cache file are
/// serialized (see [`FontMapCache`]).
pub struct ChapterPipeline<'a> {
    recognition: &'a RecognitionService,
    fetcher: &'a dyn FontFetcher,
    decryptor: Option<&'a dyn ChapterDecryptor>,
    auth: Option<AuthParams>,
    config: PipelineConfig,
}

impl<'a> ChapterPipeline<'a> {
    pub fn new(
        recognition: &'a RecognitionService,
        fetcher: &'a dyn FontFetcher,
        config: PipelineConfig,
    ) -> Self {
        ChapterPipeline {
            recognition,
            fetcher,
            decryptor: None,
            auth: None,
            config,
        }
    }

    pub fn with_decryptor(mut self, decryptor: &'a dyn ChapterDecryptor, auth: AuthParams) -> Self {
        self.decryptor = Some(decryptor);
        self.auth = Some(auth);
        self
    }

    /// Process one raw chapter page into its content record.
    ///
    /// Returns `None` when the page has no extractable chapter, is
    /// paywalled, or fails irrecoverably; the error is logged, never
    /// raised.
    pub fn process(&self, html: &str) -> Option<ChapterContentResult> {
        let info = ssr::extract_chapter_info(html);
        if info.is_empty() {
            debug!("page carries no chapter info, skipping");
            return None;
        }
        let chapter_id = chapter_id(&info);

        match ssr::classify(&info) {
            Access::Restricted => {
                info!("chapter {chapter_id} is paywalled and not purchased, skipping");
                None
            }
            Access::PlainText => Some(self.plain_chapter(&info, chapter_id)),
            Access::FontEncrypted => match self.encrypted_chapter(&info, &chapter_id) {
                Ok(result) => Some(result),
                Err(e) => {
                    warn!("chapter {chapter_id}: {e}");
                    None
                }
            },
        }
    }

    /// Direct extraction for chapters that render as-is.
    fn plain_chapter(&self, info: &Map<String, Value>, chapter_id: String) -> ChapterContentResult {
        let content_html = ssr::json_str(info, "content").unwrap_or_default();
        let paragraphs = dom::extract_paragraphs(content_html, &chapter_id);
        let text = join_paragraph_text(&paragraphs);
        assemble(info, chapter_id, text, false)
    }

    /// The full font pipeline.
    fn encrypted_chapter(
        &self,
        info: &Map<String, Value>,
        chapter_id: &str,
    ) -> Result<ChapterContentResult> {
        let content_html = ssr::json_str(info, "content").unwrap_or_default();
        let mut paragraphs = dom::extract_paragraphs(content_html, chapter_id);

        // VIP chapters may ship placeholder markup; the real body comes
        // back from the external decryption capability.
        if needs_decryption(&paragraphs) && ssr::json_i64(info, "vipStatus") == Some(1) {
            let decrypted = self.decrypt_content(info, chapter_id, content_html)?;
            paragraphs = dom::extract_paragraphs(&decrypted, chapter_id);
        }

        let table = css::compile(ssr::json_str(info, "css").unwrap_or_default());

        let resolver = FontResolver::new(self.fetcher, &self.config.fonts_dir);
        let random_payload = ssr::json_str(info, "randomFont")
            .ok_or_else(|| Error::FontUnavailable("no random font payload".to_string()))?;
        let random_path = resolver.write_random_font(random_payload)?;
        let fixed_url = ssr::json_str(info, "fixedFontWoff2")
            .ok_or_else(|| Error::FontUnavailable("no fixed font url".to_string()))?;
        let fixed_path = resolver.ensure_fixed_font(fixed_url)?;

        let end_number = render::detect_end_number(&table, &paragraphs);
        if !end_number.is_empty() {
            debug!("chapter {chapter_id}: end number {end_number:?}");
        }
        let rendered = render::render_paragraphs(&paragraphs, &table, &end_number);

        let fixed = LoadedFont::load(&fixed_path)?;
        let random = LoadedFont::load(&random_path)?;
        let fonts = GlyphSources {
            fixed: &fixed,
            random: &random,
        };

        let mut cache = FontMapCache::load(&self.config.cache_dir, &fixed_path);
        let map = self.recognition.resolve(
            &fonts,
            &rendered.upright_chars(),
            &rendered.refl_set,
            &mut cache,
        );
        if let Err(e) = cache.flush() {
            warn!("chapter {chapter_id}: font map flush failed: {e}");
        }

        let text = translate(&rendered.text, &map);
        Ok(assemble(info, chapter_id.to_string(), text, true))
    }

    fn decrypt_content(
        &self,
        info: &Map<String, Value>,
        chapter_id: &str,
        ciphertext: &str,
    ) -> Result<String> {
        let decryptor = self
            .decryptor
            .ok_or_else(|| Error::DecryptFailed("no decryptor configured".to_string()))?;
        let auth = self
            .auth
            .as_ref()
            .ok_or_else(|| Error::DecryptFailed("no auth parameters".to_string()))?;
        let ciphertext = ssr::json_str(info, "cipherText").unwrap_or(ciphertext);
        decryptor.decrypt(ciphertext, chapter_id, &auth.auth_key, &auth.user_id)
    }
}

fn chapter_id(info: &Map<String, Value>) -> String {
    ssr::json_i64(info, "chapterId")
        .map(|id| id.to_string())
        .or_else(|| ssr::json_str(info, "chapterId").map(str::to_string))
        .unwrap_or_default()
}

/// Extraction yielded nothing usable: an empty tree, or placeholder markup
/// from the denylist.
fn needs_decryption(paragraphs: &[ParagraphNode]) -> bool {
    if paragraphs.is_empty() {
        return true;
    }
    let text: String = paragraphs.iter().map(dom::node_text).collect();
    PLACEHOLDER_KEYWORDS.iter().any(|k| text.contains(k))
}

fn join_paragraph_text(paragraphs: &[ParagraphNode]) -> String {
    let parts: Vec<String> = paragraphs.iter().map(dom::node_text).collect();
    parts.join("\n\n")
}

/// Map the rendered text through the resolved glyph table. Unresolved
/// characters pass through unchanged; a gap is not a pipeline failure.
fn translate(text: &str, map: &BTreeMap<char, char>) -> String {
    text.chars().map(|c| map.get(&c).copied().unwrap_or(c)).collect()
}

/// Duplicated-content heuristic: the site doubles the body, so drop the
/// trailing half of the line count.
fn truncate_duplicated(text: &str) -> String {
    let lines: Vec<&str> = text.lines().collect();
    let keep = lines.len() - lines.len() / 2;
    lines[..keep].join("\n")
}

fn assemble(
    info: &Map<String, Value>,
    chapter_id: String,
    mut content: String,
    encrypted: bool,
) -> ChapterContentResult {
    let duplicated = ssr::json_bool(info, "duplicated") || ssr::json_bool(info, "isDuplicate");
    if duplicated {
        content = truncate_duplicated(&content);
    }

    let author_note = ssr::json_str(info, "authorSay")
        .map(str::to_string)
        .or_else(|| {
            info.get("authorWords")
                .and_then(Value::as_object)
                .and_then(|words| ssr::json_str(words, "content"))
                .map(str::to_string)
        });

    ChapterContentResult {
        id: chapter_id,
        title: ssr::json_str(info, "chapterName").unwrap_or_default().to_string(),
        content,
        metadata: ChapterMetadata {
            author_note,
            update_time: ssr::json_str(info, "updateTime").map(str::to_string),
            update_timestamp: ssr::json_i64(info, "updateTimestamp"),
            word_count: ssr::json_i64(info, "wordsCount").and_then(|n| u64::try_from(n).ok()),
            volume: ssr::json_str(info, "volumeName").map(str::to_string),
            duplicated,
            encrypted,
        },
    }
}
