//! # deglyph
//!
//! Recovers plaintext from web-novel chapters that defeat scraping by
//! swapping glyph codepoints through a per-chapter "random" font, while a
//! shared "fixed" reference font carries the true glyph shapes.
//!
//! The pipeline per chapter:
//!
//! 1. [`ssr`] pulls the embedded `chapterInfo` record out of the page and
//!    classifies access (paywalled / plaintext / font-encrypted).
//! 2. [`fonts`] materializes the chapter's font pair onto local storage.
//! 3. [`dom`] extracts the paragraph tree, pruning decoy markup.
//! 4. [`css`] compiles the chapter's adversarial stylesheet dialect into a
//!    rule table with an explicit render order.
//! 5. [`render`] replays the rules over the tree, reproducing the intended
//!    reading order and collecting the mirrored-glyph set.
//! 6. [`recognize`] resolves obfuscated glyphs to real characters through
//!    external recognizer capabilities, amortized by a persistent
//!    per-fixed-font map cache.
//!
//! Network fetching, the OCR backend and ciphertext decryption are consumed
//! through narrow traits ([`fonts::FontFetcher`], [`recognize::Recognizer`],
//! [`chapter::ChapterDecryptor`]) and implemented by the surrounding
//! application.
//!
//! ## Quick start
//!
//! ```no_run
//! use std::path::{Path, PathBuf};
//!
//! use deglyph::chapter::{ChapterPipeline, PipelineConfig};
//! use deglyph::fonts::FontFetcher;
//! use deglyph::recognize::{RecognitionConfig, RecognitionService, Recognizer};
//! use image::GrayImage;
//!
//! struct MyOcr;
//! impl Recognizer for MyOcr {
//!     fn query_batch(&self, images: &[GrayImage]) -> Vec<Vec<(char, f32)>> {
//!         images.iter().map(|_| Vec::new()).collect()
//!     }
//! }
//!
//! struct MyFetcher;
//! impl FontFetcher for MyFetcher {
//!     fn fetch(&self, _url: &str, _dest: &Path) -> deglyph::Result<()> {
//!         unimplemented!("download url into dest")
//!     }
//! }
//!
//! let service = RecognitionService::new(RecognitionConfig::default())
//!     .with_recognizer(Box::new(MyOcr), 1.0);
//! let fetcher = MyFetcher;
//! let pipeline = ChapterPipeline::new(&service, &fetcher, PipelineConfig {
//!     fonts_dir: PathBuf::from("fonts"),
//!     cache_dir: PathBuf::from("font-maps"),
//! });
//!
//! let page = std::fs::read_to_string("chapter.html").unwrap();
//! if let Some(chapter) = pipeline.process(&page) {
//!     println!("{}\n\n{}", chapter.title, chapter.content);
//! }
//! ```

pub mod chapter;
pub mod css;
pub mod dom;
pub mod error;
pub mod fonts;
pub mod recognize;
pub mod render;
pub mod ssr;
pub(crate) mod util;

pub use chapter::{ChapterContentResult, ChapterMetadata, ChapterPipeline, PipelineConfig};
pub use error::{Error, Result};
pub use ssr::Access;
