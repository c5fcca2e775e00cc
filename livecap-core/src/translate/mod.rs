//! Translation contract and context buffer.
//!
//! Translation is strictly best-effort: a failing or slow translator never
//! fails transcription. The orchestrator and file pipeline call
//! [`translate_with_timeout`], which runs the backend on a helper thread
//! and abandons it past the deadline (the result of an abandoned call is
//! discarded).

pub mod http;

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use tracing::warn;

use crate::error::TranslationError;
use crate::results::TranslationResult;

pub use http::HttpTranslator;

/// Most finalized texts kept for translation context.
pub const MAX_CONTEXT_ENTRIES: usize = 100;

/// Contract for translation backends.
///
/// `translate` takes `&self` so a shared handle can be driven from the
/// timeout helper thread; backends use interior mutability where needed.
pub trait Translator: Send + Sync {
    fn translator_name(&self) -> &str;

    /// Translate `text`; `context` holds recent source-language sentences,
    /// oldest first.
    fn translate(
        &self,
        text: &str,
        source_lang: &str,
        target_lang: &str,
        context: &[String],
    ) -> Result<TranslationResult, TranslationError>;

    /// Supported `(source, target)` pairs; empty means "all pairs".
    fn supported_pairs(&self) -> Vec<(String, String)> {
        Vec::new()
    }

    /// How many context sentences this backend wants.
    fn default_context_sentences(&self) -> usize {
        3
    }

    fn load_model(&mut self) -> Result<(), TranslationError> {
        Ok(())
    }

    fn cleanup(&mut self) {}

    fn is_initialized(&self) -> bool {
        true
    }
}

/// Bounded FIFO of recent finalized texts.
///
/// New entries evict the oldest past [`MAX_CONTEXT_ENTRIES`]. One buffer is
/// scoped to one streaming session or one batch file.
#[derive(Debug, Clone)]
pub struct ContextBuffer {
    entries: VecDeque<String>,
    capacity: usize,
}

impl ContextBuffer {
    pub fn new() -> Self {
        Self::with_capacity(MAX_CONTEXT_ENTRIES)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            entries: VecDeque::with_capacity(capacity.min(MAX_CONTEXT_ENTRIES)),
            capacity,
        }
    }

    pub fn push(&mut self, text: impl Into<String>) {
        if self.entries.len() >= self.capacity {
            self.entries.pop_front();
        }
        self.entries.push_back(text.into());
    }

    /// The most recent `n` entries, oldest first.
    pub fn recent(&self, n: usize) -> Vec<String> {
        let skip = self.entries.len().saturating_sub(n);
        self.entries.iter().skip(skip).cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }
}

impl Default for ContextBuffer {
    fn default() -> Self {
        Self::new()
    }
}

/// Translate with a hard deadline.
///
/// Guards shared by all call sites: empty input short-circuits to an empty
/// result without touching the backend; identical source/target is an
/// [`TranslationError::UnsupportedPair`]. The backend call runs on a helper
/// thread; on timeout the call is abandoned and its eventual result dropped.
pub fn translate_with_timeout(
    translator: &Arc<dyn Translator>,
    text: &str,
    source_lang: &str,
    target_lang: &str,
    context: &[String],
    timeout: Duration,
) -> Result<TranslationResult, TranslationError> {
    if text.is_empty() {
        return Ok(TranslationResult {
            text: String::new(),
            original_text: String::new(),
            source_lang: source_lang.to_string(),
            target_lang: target_lang.to_string(),
            confidence: None,
            source_id: String::new(),
        });
    }
    if source_lang == target_lang {
        return Err(TranslationError::UnsupportedPair {
            source_lang: source_lang.to_string(),
            target_lang: target_lang.to_string(),
        });
    }

    let (tx, rx) = crossbeam_channel::bounded(1);
    let translator = Arc::clone(translator);
    let text = text.to_string();
    let source = source_lang.to_string();
    let target = target_lang.to_string();
    let context = context.to_vec();

    std::thread::spawn(move || {
        let result = translator.translate(&text, &source, &target, &context);
        let _ = tx.send(result);
    });

    match rx.recv_timeout(timeout) {
        Ok(result) => result,
        Err(_) => Err(TranslationError::Timeout(timeout)),
    }
}

/// Log a pair warning when the translator declares pairs and this one is
/// absent. Returns whether the pair is declared (or declarations are open).
pub fn check_language_pair(translator: &dyn Translator, source: &str, target: &str) -> bool {
    let pairs = translator.supported_pairs();
    if pairs.is_empty() {
        return true;
    }
    let supported = pairs
        .iter()
        .any(|(s, t)| s.as_str() == source && t.as_str() == target);
    if !supported {
        warn!(
            translator = translator.translator_name(),
            source, target, "language pair not declared by translator"
        );
    }
    supported
}

/// Static metadata for the CLI `translators` listing.
pub struct TranslatorInfo {
    pub id: &'static str,
    pub display_name: &'static str,
}

/// Registered translator backends.
pub fn translator_registry() -> &'static [TranslatorInfo] {
    &[TranslatorInfo {
        id: "libretranslate",
        display_name: "LibreTranslate (HTTP)",
    }]
}

/// Construct a translator by registry id.
pub fn create_translator(id: &str) -> Result<Box<dyn Translator>, TranslationError> {
    match id {
        "libretranslate" => Ok(Box::new(HttpTranslator::from_env())),
        other => Err(TranslationError::Model(format!(
            "unknown translator: '{other}'"
        ))),
    }
}
