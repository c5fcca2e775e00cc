//! Stream orchestrator: audio source → VAD → engine → result records.
//!
//! One [`StreamTranscriber`] is one session. It owns the VAD processor and
//! the translation context; the engine is shared through an
//! [`EngineHandle`] so worker threads can serialise calls against it.
//!
//! Three consumption surfaces over the same core:
//!
//! | Surface | Module | Engine calls run on |
//! |---------|--------|---------------------|
//! | blocking iterator | [`blocking`] | the driving thread |
//! | async iterator | [`task`] | a `max_workers` thread pool |
//! | callback | [`callback`] | the caller's thread |
//!
//! Ordering within a session: finals are yielded in segment-end order, and
//! every interim of a segment is yielded before that segment's final.

pub mod blocking;
pub mod callback;
pub mod diagnostics;
pub mod task;

use std::sync::Arc;
use std::time::Duration;

use tracing::warn;

use crate::engine::{EngineHandle, Transcription};
use crate::error::{EngineError, TranscriptionError};
use crate::results::{InterimResult, TranscriptionResult};
use crate::translate::{check_language_pair, translate_with_timeout, ContextBuffer, Translator};
use crate::vad::config::VadConfig;
use crate::vad::processor::VadProcessor;
use crate::vad::{BackendKind, VadSegment, VAD_SAMPLE_RATE};

pub use blocking::SyncTranscription;
pub use callback::CallbackTranscriber;
pub use diagnostics::{DiagnosticsSnapshot, SessionDiagnostics};
pub use task::AsyncTranscription;

/// Poll interval for blocking source reads.
const READ_TIMEOUT: Duration = Duration::from_millis(100);

pub(crate) struct TranslationState {
    translator: Arc<dyn Translator>,
    source_lang: String,
    target_lang: String,
    timeout: Duration,
    context: ContextBuffer,
}

/// Builder for a transcription session.
pub struct StreamTranscriberBuilder {
    engine: EngineHandle,
    vad_config: Option<VadConfig>,
    processor: Option<VadProcessor>,
    backend_kind: BackendKind,
    source_id: String,
    max_workers: usize,
    translator: Option<Arc<dyn Translator>>,
    source_lang: Option<String>,
    target_lang: Option<String>,
    translation_timeout: Option<Duration>,
}

impl StreamTranscriberBuilder {
    pub fn new(engine: EngineHandle) -> Self {
        Self {
            engine,
            vad_config: None,
            processor: None,
            backend_kind: BackendKind::Auto,
            source_id: "default".into(),
            max_workers: 1,
            translator: None,
            source_lang: None,
            target_lang: None,
            translation_timeout: None,
        }
    }

    pub fn vad_config(mut self, config: VadConfig) -> Self {
        self.vad_config = Some(config);
        self
    }

    /// Use a fully built processor instead of `vad_config` + backend kind.
    pub fn vad_processor(mut self, processor: VadProcessor) -> Self {
        self.processor = Some(processor);
        self
    }

    pub fn vad_backend(mut self, kind: BackendKind) -> Self {
        self.backend_kind = kind;
        self
    }

    pub fn source_id(mut self, id: impl Into<String>) -> Self {
        self.source_id = id.into();
        self
    }

    /// Worker threads for the async surface (engine calls still serialise
    /// through the engine mutex unless the engine declares thread safety).
    pub fn max_workers(mut self, n: usize) -> Self {
        self.max_workers = n.max(1);
        self
    }

    /// Attach a translator; requires both language codes.
    pub fn translator(
        mut self,
        translator: Arc<dyn Translator>,
        source_lang: impl Into<String>,
        target_lang: impl Into<String>,
    ) -> Self {
        self.translator = Some(translator);
        self.source_lang = Some(source_lang.into());
        self.target_lang = Some(target_lang.into());
        self
    }

    pub fn translation_timeout(mut self, timeout: Duration) -> Self {
        self.translation_timeout = Some(timeout);
        self
    }

    pub fn build(self) -> Result<StreamTranscriber, TranscriptionError> {
        let processor = match self.processor {
            Some(p) => p,
            None => VadProcessor::with_backend_kind(
                self.backend_kind,
                self.vad_config.unwrap_or_default(),
            )?,
        };

        let translation = match self.translator {
            None => None,
            Some(translator) => {
                let (Some(source), Some(target)) = (self.source_lang, self.target_lang) else {
                    return Err(TranscriptionError::Engine(EngineError::InvalidOption(
                        "translator requires source_lang and target_lang".into(),
                    )));
                };
                check_language_pair(translator.as_ref(), &source, &target);
                Some(TranslationState {
                    translator,
                    source_lang: source,
                    target_lang: target,
                    timeout: self
                        .translation_timeout
                        .unwrap_or_else(crate::resources::translation_timeout),
                    context: ContextBuffer::new(),
                })
            }
        };

        let language = self
            .engine
            .0
            .lock()
            .params()
            .get_str("language")
            .unwrap_or("en")
            .to_string();

        Ok(StreamTranscriber {
            engine: self.engine,
            processor,
            source_id: self.source_id,
            language,
            max_workers: self.max_workers,
            translation,
            diagnostics: Arc::new(SessionDiagnostics::default()),
            closed: false,
        })
    }
}

/// One transcription session over the three surfaces.
pub struct StreamTranscriber {
    pub(crate) engine: EngineHandle,
    pub(crate) processor: VadProcessor,
    pub(crate) source_id: String,
    pub(crate) language: String,
    pub(crate) max_workers: usize,
    pub(crate) translation: Option<TranslationState>,
    pub(crate) diagnostics: Arc<SessionDiagnostics>,
    closed: bool,
}

impl StreamTranscriber {
    pub fn builder(engine: EngineHandle) -> StreamTranscriberBuilder {
        StreamTranscriberBuilder::new(engine)
    }

    pub fn source_id(&self) -> &str {
        &self.source_id
    }

    /// Blocking iterator surface. Consumes chunks from `source` on the
    /// calling thread; engine calls are synchronous suspension points.
    pub fn transcribe_sync<S: crate::audio::AudioSource>(
        &mut self,
        source: S,
    ) -> SyncTranscription<'_, S> {
        SyncTranscription::new(self, source)
    }

    /// Cooperative async iterator surface; engine calls are offloaded to a
    /// worker pool of `max_workers` threads.
    pub fn transcribe_async<S: crate::audio::AudioSource>(
        &mut self,
        source: S,
    ) -> AsyncTranscription<'_, S> {
        AsyncTranscription::new(self, source)
    }

    /// Callback surface; the caller feeds chunks and registers handlers.
    pub fn into_callback(self) -> CallbackTranscriber {
        CallbackTranscriber::new(self)
    }

    /// Counter snapshot for logs and status displays.
    pub fn diagnostics_snapshot(&self) -> DiagnosticsSnapshot {
        self.diagnostics.snapshot()
    }

    /// Clear VAD state (and its clock). Usable after an engine error.
    pub fn reset(&mut self) {
        self.processor.reset();
        self.diagnostics.reset();
    }

    /// End the session. Idempotent.
    pub fn close(&mut self) {
        if self.closed {
            return;
        }
        self.closed = true;
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }

    // ── shared segment handling ─────────────────────────────────────────

    pub(crate) fn transcribe_segment(
        &self,
        segment: &VadSegment,
    ) -> Result<Transcription, EngineError> {
        self.diagnostics.bump(&self.diagnostics.engine_calls);
        let result = self
            .engine
            .0
            .lock()
            .transcribe(&segment.audio, VAD_SAMPLE_RATE);
        if result.is_err() {
            self.diagnostics.bump(&self.diagnostics.engine_errors);
        }
        result
    }

    /// Build the final record for a transcribed segment, running the
    /// translation hook. Empty text means "no speech" — yields nothing.
    pub(crate) fn build_final(
        &mut self,
        segment: &VadSegment,
        transcription: Transcription,
    ) -> Option<TranscriptionResult> {
        self.diagnostics.bump(&self.diagnostics.segments_final);
        if transcription.text.is_empty() {
            return None;
        }
        let mut result = TranscriptionResult {
            text: transcription.text,
            start_time_s: segment.start_time_s,
            end_time_s: segment.end_time_s,
            is_final: true,
            confidence: transcription.confidence.clamp(0.0, 1.0),
            language: self.language.clone(),
            source_id: self.source_id.clone(),
            translated_text: None,
            target_language: None,
        };
        self.apply_translation(&mut result);
        self.diagnostics.bump(&self.diagnostics.results_emitted);
        Some(result)
    }

    pub(crate) fn build_interim(
        &self,
        segment: &VadSegment,
        transcription: Transcription,
    ) -> Option<InterimResult> {
        self.diagnostics.bump(&self.diagnostics.segments_interim);
        if transcription.text.is_empty() {
            return None;
        }
        self.diagnostics.bump(&self.diagnostics.results_emitted);
        Some(InterimResult {
            text: transcription.text,
            accumulated_time_s: segment.duration_s(),
            source_id: self.source_id.clone(),
        })
    }

    /// Translate a successful final in place; failures and timeouts degrade
    /// to "no translation" with a warning. The source text always enters
    /// the context buffer.
    fn apply_translation(&mut self, result: &mut TranscriptionResult) {
        let Some(state) = &mut self.translation else {
            return;
        };
        let wanted = state.translator.default_context_sentences();
        let context = state.context.recent(wanted);
        match translate_with_timeout(
            &state.translator,
            &result.text,
            &state.source_lang,
            &state.target_lang,
            &context,
            state.timeout,
        ) {
            Ok(translation) if !translation.text.is_empty() => {
                result.translated_text = Some(translation.text);
                result.target_language = Some(state.target_lang.clone());
                self.diagnostics.bump(&self.diagnostics.translations_ok);
            }
            Ok(_) => {}
            Err(e) => {
                self.diagnostics.bump(&self.diagnostics.translations_failed);
                warn!(error = %e, "translation failed — yielding untranslated result");
            }
        }
        state.context.push(result.text.clone());
    }
}
