//! Glyph recognition engine.
//!
//! Renders unresolved glyphs to bitmaps and resolves them through external
//! recognizer capabilities, fusing candidate scores across strategies. The
//! expensive path is bracketed on both sides by cheaper ones: a persistent
//! per-fixed-font [`cache::FontMapCache`] ahead of any rendering, and a
//! perceptual-hash lookup ahead of each recognizer submission.
//!
//! All model-ish state (recognizer backends, hash store, character
//! frequencies) lives in one [`RecognitionService`] constructed per process
//! and passed by reference, never in ambient globals.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::path::PathBuf;

use image::GrayImage;
use log::{debug, warn};

pub mod cache;
pub mod raster;

pub use cache::FontMapCache;
pub use raster::{GlyphSources, LoadedFont};

/// Capability that ranks character candidates for glyph images.
///
/// One batch in, one candidate list per image out, each candidate a
/// `(character, confidence)` pair with confidence in `0.0..=1.0`. Backends
/// are typically OCR-style recognition or embedding-similarity lookup.
pub trait Recognizer {
    fn query_batch(&self, images: &[GrayImage]) -> Vec<Vec<(char, f32)>>;
}

/// Capability answering nearest-neighbor lookups over perceptual hashes of
/// previously resolved glyph images. A close hit short-circuits the
/// recognizer path entirely.
pub trait PerceptualHashStore {
    fn query(&self, image: &GrayImage, k: usize) -> Vec<(char, u32)>;
}

/// Tuning knobs for rendering and candidate fusion.
#[derive(Debug, Clone)]
pub struct RecognitionConfig {
    /// Square canvas edge for glyph renders, in pixels.
    pub canvas_size: u32,
    /// Font size glyphs are rasterized at.
    pub font_px: f32,
    /// Images per recognizer submission; bounds memory, not concurrency.
    pub batch_size: usize,
    /// Candidates fused below this score are dropped.
    pub min_confidence: f32,
    /// Maximum hash distance accepted as a perceptual-hash hit.
    pub phash_max_distance: u32,
    /// Weight of the character-frequency bias added to fused scores.
    pub freq_weight: f32,
    /// Where to dump renders of unresolved glyphs for manual inspection.
    pub debug_dir: Option<PathBuf>,
}

impl Default for RecognitionConfig {
    fn default() -> Self {
        RecognitionConfig {
            canvas_size: 64,
            font_px: 52.0,
            batch_size: 32,
            min_confidence: 0.35,
            phash_max_distance: 5,
            freq_weight: 0.15,
            debug_dir: None,
        }
    }
}

/// Process-wide recognition state: recognizer backends with their fusion
/// weights, the optional perceptual-hash store, and an optional character
/// frequency table biasing fused scores toward common characters.
pub struct RecognitionService {
    recognizers: Vec<(Box<dyn Recognizer>, f32)>,
    phash_store: Option<Box<dyn PerceptualHashStore>>,
    char_freq: HashMap<char, f32>,
    config: RecognitionConfig,
}

struct PendingGlyph {
    ch: char,
    mirrored: bool,
    image: GrayImage,
}

impl RecognitionService {
    pub fn new(config: RecognitionConfig) -> Self {
        RecognitionService {
            recognizers: Vec::new(),
            phash_store: None,
            char_freq: HashMap::new(),
            config,
        }
    }

    /// Add a recognizer strategy with its fusion weight. Two independent
    /// strategies (recognition + similarity lookup) is the usual setup.
    pub fn with_recognizer(mut self, recognizer: Box<dyn Recognizer>, weight: f32) -> Self {
        self.recognizers.push((recognizer, weight));
        self
    }

    pub fn with_phash_store(mut self, store: Box<dyn PerceptualHashStore>) -> Self {
        self.phash_store = Some(store);
        self
    }

    pub fn with_char_frequencies(mut self, freq: HashMap<char, f32>) -> Self {
        self.char_freq = freq;
        self
    }

    pub fn config(&self) -> &RecognitionConfig {
        &self.config
    }

    /// Resolve the chapter's working set of glyphs to plain characters.
    ///
    /// Characters already present in the cache are returned without any
    /// rendering or recognizer traffic; everything newly resolved is
    /// written back into the cache (the caller flushes it). Characters
    /// with no surviving candidate are simply absent from the result.
    pub fn resolve(
        &self,
        fonts: &GlyphSources<'_>,
        upright: &BTreeSet<char>,
        mirrored: &BTreeSet<char>,
        cache: &mut FontMapCache,
    ) -> BTreeMap<char, char> {
        let mut resolved = BTreeMap::new();
        let mut pending = Vec::new();

        for (set, is_mirrored) in [(upright, false), (mirrored, true)] {
            for &ch in set.iter() {
                if let Some(known) = cache.get(ch) {
                    resolved.insert(ch, known);
                    continue;
                }
                self.prepare_glyph(fonts, ch, is_mirrored, cache, &mut resolved, &mut pending);
            }
        }

        if !pending.is_empty() && self.recognizers.is_empty() {
            debug!("{} glyphs pending but no recognizer configured", pending.len());
        }

        for batch in pending.chunks(self.config.batch_size.max(1)) {
            self.recognize_batch(batch, cache, &mut resolved);
        }

        resolved
    }

    /// Render one glyph and try the cheap perceptual-hash path; queue it
    /// for batched recognition otherwise.
    fn prepare_glyph(
        &self,
        fonts: &GlyphSources<'_>,
        ch: char,
        mirrored: bool,
        cache: &mut FontMapCache,
        resolved: &mut BTreeMap<char, char>,
        pending: &mut Vec<PendingGlyph>,
    ) {
        let Some(font) = fonts.font_for(ch) else {
            debug!("no glyph table contains U+{:04X}", u32::from(ch));
            return;
        };
        let Some(image) = raster::render_glyph(
            font,
            ch,
            self.config.canvas_size,
            self.config.font_px,
            mirrored,
        ) else {
            debug!("blank render for U+{:04X}, skipping", u32::from(ch));
            return;
        };

        if let Some(store) = &self.phash_store {
            let hits = store.query(&image, 3);
            if let Some(&(candidate, distance)) = hits.first()
                && distance <= self.config.phash_max_distance
            {
                resolved.insert(ch, candidate);
                cache.insert(ch, candidate);
                return;
            }
        }

        pending.push(PendingGlyph {
            ch,
            mirrored,
            image,
        });
    }

    /// Submit one batch to every strategy and fuse the candidate scores.
    fn recognize_batch(
        &self,
        batch: &[PendingGlyph],
        cache: &mut FontMapCache,
        resolved: &mut BTreeMap<char, char>,
    ) {
        let images: Vec<GrayImage> = batch.iter().map(|g| g.image.clone()).collect();

        let mut fused: Vec<HashMap<char, f32>> = vec![HashMap::new(); batch.len()];
        for (recognizer, weight) in &self.recognizers {
            let answers = recognizer.query_batch(&images);
            if answers.len() != batch.len() {
                warn!(
                    "recognizer answered {} of {} images",
                    answers.len(),
                    batch.len()
                );
            }
            for (scores, candidates) in fused.iter_mut().zip(answers) {
                for (candidate, confidence) in candidates {
                    *scores.entry(candidate).or_insert(0.0) += weight * confidence;
                }
            }
        }

        for (glyph, scores) in batch.iter().zip(fused) {
            let best = scores
                .into_iter()
                .map(|(candidate, score)| (candidate, score + self.frequency_bias(candidate)))
                .filter(|(_, score)| *score >= self.config.min_confidence)
                .max_by(|a, b| a.1.total_cmp(&b.1).then(a.0.cmp(&b.0)));

            match best {
                Some((candidate, _)) => {
                    resolved.insert(glyph.ch, candidate);
                    cache.insert(glyph.ch, candidate);
                }
                None => {
                    debug!(
                        "no candidate above threshold for U+{:04X}{}",
                        u32::from(glyph.ch),
                        if glyph.mirrored { " (mirrored)" } else { "" }
                    );
                    self.dump_debug_image(glyph);
                }
            }
        }
    }

    /// Rarer characters are penalized relative to commoner ones; characters
    /// absent from the table get no boost at all.
    fn frequency_bias(&self, candidate: char) -> f32 {
        self.config.freq_weight * self.char_freq.get(&candidate).copied().unwrap_or(0.0)
    }

    fn dump_debug_image(&self, glyph: &PendingGlyph) {
        let Some(dir) = &self.config.debug_dir else {
            return;
        };
        if let Err(e) = std::fs::create_dir_all(dir) {
            warn!("cannot create debug dir {}: {e}", dir.display());
            return;
        }
        let suffix = if glyph.mirrored { "-mirrored" } else { "" };
        let path = dir.join(format!("U{:04X}{suffix}.png", u32::from(glyph.ch)));
        if let Err(e) = glyph.image.save(&path) {
            warn!("cannot save debug glyph {}: {e}", path.display());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;
    use std::path::PathBuf;
    use std::rc::Rc;

    fn fixture_font() -> LoadedFont {
        let path = PathBuf::from(concat!(
            env!("CARGO_MANIFEST_DIR"),
            "/tests/fixtures/obfuscated.ttf"
        ));
        LoadedFont::load(&path).expect("fixture font should load")
    }

    fn ink_count(image: &GrayImage) -> usize {
        image.pixels().filter(|p| p[0] < 128).count()
    }

    /// Classifies fixture glyphs by ink coverage: the box glyph reads as
    /// '甲', the thin bar as '乙'.
    struct ShapeRecognizer {
        calls: Rc<Cell<usize>>,
        confidence: f32,
    }

    impl Recognizer for ShapeRecognizer {
        fn query_batch(&self, images: &[GrayImage]) -> Vec<Vec<(char, f32)>> {
            self.calls.set(self.calls.get() + images.len());
            images
                .iter()
                .map(|image| {
                    let c = if ink_count(image) > 600 { '甲' } else { '乙' };
                    vec![(c, self.confidence), ('错', 0.1)]
                })
                .collect()
        }
    }

    struct FixedAnswer(char, f32);

    impl Recognizer for FixedAnswer {
        fn query_batch(&self, images: &[GrayImage]) -> Vec<Vec<(char, f32)>> {
            images.iter().map(|_| vec![(self.0, self.1)]).collect()
        }
    }

    struct AlwaysHitStore;

    impl PerceptualHashStore for AlwaysHitStore {
        fn query(&self, _image: &GrayImage, _k: usize) -> Vec<(char, u32)> {
            vec![('快', 0)]
        }
    }

    fn sets(upright: &[char], mirrored: &[char]) -> (BTreeSet<char>, BTreeSet<char>) {
        (
            upright.iter().copied().collect(),
            mirrored.iter().copied().collect(),
        )
    }

    #[test]
    fn test_resolve_by_shape() {
        let dir = tempfile::tempdir().unwrap();
        let font = fixture_font();
        let fonts = GlyphSources {
            fixed: &font,
            random: &font,
        };
        let calls = Rc::new(Cell::new(0));
        let service = RecognitionService::new(RecognitionConfig::default()).with_recognizer(
            Box::new(ShapeRecognizer {
                calls: calls.clone(),
                confidence: 0.9,
            }),
            1.0,
        );

        let (upright, mirrored) = sets(&['\u{E001}', '\u{E002}'], &[]);
        let mut cache = FontMapCache::load(dir.path(), &dir.path().join("F.ttf"));
        let map = service.resolve(&fonts, &upright, &mirrored, &mut cache);

        assert_eq!(map.get(&'\u{E001}'), Some(&'甲'));
        assert_eq!(map.get(&'\u{E002}'), Some(&'乙'));
        assert_eq!(calls.get(), 2);
    }

    #[test]
    fn test_cache_short_circuits_recognition() {
        let dir = tempfile::tempdir().unwrap();
        let font = fixture_font();
        let fonts = GlyphSources {
            fixed: &font,
            random: &font,
        };
        let calls = Rc::new(Cell::new(0));
        let service = RecognitionService::new(RecognitionConfig::default()).with_recognizer(
            Box::new(ShapeRecognizer {
                calls: calls.clone(),
                confidence: 0.9,
            }),
            1.0,
        );

        let fixed_path = dir.path().join("F.ttf");
        let (upright, mirrored) = sets(&['\u{E001}'], &[]);

        let mut cache = FontMapCache::load(dir.path(), &fixed_path);
        let first = service.resolve(&fonts, &upright, &mirrored, &mut cache);
        cache.flush().unwrap();
        assert_eq!(first.get(&'\u{E001}'), Some(&'甲'));
        assert_eq!(calls.get(), 1);

        // Second pass over the same fixed font: zero recognizer traffic.
        let mut cache = FontMapCache::load(dir.path(), &fixed_path);
        let second = service.resolve(&fonts, &upright, &mirrored, &mut cache);
        assert_eq!(second.get(&'\u{E001}'), Some(&'甲'));
        assert_eq!(calls.get(), 1);
    }

    #[test]
    fn test_phash_hit_skips_recognizers() {
        let dir = tempfile::tempdir().unwrap();
        let font = fixture_font();
        let fonts = GlyphSources {
            fixed: &font,
            random: &font,
        };
        let calls = Rc::new(Cell::new(0));
        let service = RecognitionService::new(RecognitionConfig::default())
            .with_recognizer(
                Box::new(ShapeRecognizer {
                    calls: calls.clone(),
                    confidence: 0.9,
                }),
                1.0,
            )
            .with_phash_store(Box::new(AlwaysHitStore));

        let (upright, mirrored) = sets(&['\u{E001}'], &[]);
        let mut cache = FontMapCache::load(dir.path(), &dir.path().join("F.ttf"));
        let map = service.resolve(&fonts, &upright, &mirrored, &mut cache);

        assert_eq!(map.get(&'\u{E001}'), Some(&'快'));
        assert_eq!(calls.get(), 0, "hash hit must bypass the recognizers");
        assert_eq!(cache.get('\u{E001}'), Some('快'));
    }

    #[test]
    fn test_low_confidence_leaves_glyph_unresolved() {
        let dir = tempfile::tempdir().unwrap();
        let font = fixture_font();
        let fonts = GlyphSources {
            fixed: &font,
            random: &font,
        };
        let service = RecognitionService::new(RecognitionConfig::default())
            .with_recognizer(Box::new(FixedAnswer('甲', 0.1)), 1.0);

        let (upright, mirrored) = sets(&['\u{E001}'], &[]);
        let mut cache = FontMapCache::load(dir.path(), &dir.path().join("F.ttf"));
        let map = service.resolve(&fonts, &upright, &mirrored, &mut cache);

        assert!(map.is_empty(), "0.1 is below the confidence floor");
        assert_eq!(cache.get('\u{E001}'), None);
    }

    #[test]
    fn test_fusion_weights_decide_between_strategies() {
        let dir = tempfile::tempdir().unwrap();
        let font = fixture_font();
        let fonts = GlyphSources {
            fixed: &font,
            random: &font,
        };
        // Strategy A says '甲' at 0.6, strategy B says '乙' at 0.9, but A
        // carries three times the weight.
        let service = RecognitionService::new(RecognitionConfig::default())
            .with_recognizer(Box::new(FixedAnswer('甲', 0.6)), 0.9)
            .with_recognizer(Box::new(FixedAnswer('乙', 0.9)), 0.3);

        let (upright, mirrored) = sets(&['\u{E001}'], &[]);
        let mut cache = FontMapCache::load(dir.path(), &dir.path().join("F.ttf"));
        let map = service.resolve(&fonts, &upright, &mirrored, &mut cache);

        assert_eq!(map.get(&'\u{E001}'), Some(&'甲'));
    }

    #[test]
    fn test_frequency_bias_breaks_near_ties() {
        let dir = tempfile::tempdir().unwrap();
        let font = fixture_font();
        let fonts = GlyphSources {
            fixed: &font,
            random: &font,
        };
        let freq = HashMap::from([('的', 1.0f32)]);
        let service = RecognitionService::new(RecognitionConfig::default())
            .with_recognizer(Box::new(FixedAnswer('罕', 0.60)), 1.0)
            .with_recognizer(Box::new(FixedAnswer('的', 0.55)), 1.0)
            .with_char_frequencies(freq);

        let (upright, mirrored) = sets(&['\u{E001}'], &[]);
        let mut cache = FontMapCache::load(dir.path(), &dir.path().join("F.ttf"));
        let map = service.resolve(&fonts, &upright, &mirrored, &mut cache);

        // 0.55 + 0.15 bias beats the rarer 0.60 candidate.
        assert_eq!(map.get(&'\u{E001}'), Some(&'的'));
    }

    #[test]
    fn test_glyph_missing_from_both_fonts_is_skipped() {
        let dir = tempfile::tempdir().unwrap();
        let font = fixture_font();
        let fonts = GlyphSources {
            fixed: &font,
            random: &font,
        };
        let calls = Rc::new(Cell::new(0));
        let service = RecognitionService::new(RecognitionConfig::default()).with_recognizer(
            Box::new(ShapeRecognizer {
                calls: calls.clone(),
                confidence: 0.9,
            }),
            1.0,
        );

        let (upright, mirrored) = sets(&['X'], &[]);
        let mut cache = FontMapCache::load(dir.path(), &dir.path().join("F.ttf"));
        let map = service.resolve(&fonts, &upright, &mirrored, &mut cache);

        assert!(map.is_empty());
        assert_eq!(calls.get(), 0);
    }

    #[test]
    fn test_unresolved_glyph_saved_for_inspection() {
        let dir = tempfile::tempdir().unwrap();
        let debug_dir = dir.path().join("debug");
        let font = fixture_font();
        let fonts = GlyphSources {
            fixed: &font,
            random: &font,
        };
        let config = RecognitionConfig {
            debug_dir: Some(debug_dir.clone()),
            ..RecognitionConfig::default()
        };
        let service =
            RecognitionService::new(config).with_recognizer(Box::new(FixedAnswer('甲', 0.0)), 1.0);

        let (upright, mirrored) = sets(&['\u{E001}'], &[]);
        let mut cache = FontMapCache::load(dir.path(), &dir.path().join("F.ttf"));
        service.resolve(&fonts, &upright, &mirrored, &mut cache);

        assert!(debug_dir.join("UE001.png").exists());
    }
}
