//! `StubEngine` — deterministic echo backend without model files.
//!
//! Used by tests and as a development path to exercise the full pipeline
//! before real models are installed. Returns either a fixed text (param
//! `"text"`), a scripted sequence of responses, or a description of the
//! audio it received.

use std::collections::VecDeque;
use std::path::PathBuf;

use tracing::debug;

use crate::engine::registry::EngineParams;
use crate::engine::{SpeechEngine, Transcription};
use crate::error::EngineError;

/// Echo-style engine: no downloads, loads instantly.
pub struct StubEngine {
    params: EngineParams,
    /// Scripted responses consumed front to back.
    script: VecDeque<String>,
    /// Scripted engines answer empty once the script runs out instead of
    /// falling back to the audio description.
    scripted: bool,
    call_count: u32,
    loaded: bool,
}

impl StubEngine {
    pub fn new() -> Self {
        Self::from_params(EngineParams::empty())
    }

    pub fn from_params(params: EngineParams) -> Self {
        Self {
            params,
            script: VecDeque::new(),
            scripted: false,
            call_count: 0,
            loaded: false,
        }
    }

    /// Engine that answers with `responses` in order, then empty text.
    pub fn with_responses(responses: impl IntoIterator<Item = impl Into<String>>) -> Self {
        let mut engine = Self::new();
        engine.script = responses.into_iter().map(Into::into).collect();
        engine.scripted = true;
        engine
    }

    /// Skip the lifecycle in tests that construct directly.
    pub fn pre_loaded(mut self) -> Self {
        self.loaded = true;
        self
    }

    pub fn calls(&self) -> u32 {
        self.call_count
    }
}

impl Default for StubEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl SpeechEngine for StubEngine {
    fn engine_name(&self) -> &str {
        "stub"
    }

    fn supported_languages(&self) -> Vec<&'static str> {
        crate::lang::WHISPER_LANGUAGES.to_vec()
    }

    fn params(&self) -> &EngineParams {
        &self.params
    }

    fn is_loaded(&self) -> bool {
        self.loaded
    }

    fn check_deps(&mut self) -> Result<(), EngineError> {
        Ok(())
    }

    fn prepare_model_dir(&mut self) -> Result<PathBuf, EngineError> {
        Ok(std::env::temp_dir())
    }

    fn download_if_missing(
        &mut self,
        _progress: &mut dyn FnMut(u8, &str),
    ) -> Result<(), EngineError> {
        Ok(())
    }

    fn load_from_path(&mut self) -> Result<(), EngineError> {
        self.loaded = true;
        Ok(())
    }

    fn transcribe(
        &mut self,
        audio: &[f32],
        sample_rate: u32,
    ) -> Result<Transcription, EngineError> {
        self.call_count += 1;
        let confidence = self
            .params
            .get_float("confidence")
            .map(|c| c as f32)
            .unwrap_or(1.0);

        if let Some(text) = self.script.pop_front() {
            debug!(call = self.call_count, "stub scripted response");
            return Ok(Transcription { text, confidence });
        }
        if self.scripted {
            return Ok(Transcription::empty());
        }
        if let Some(text) = self.params.get_str("text") {
            return Ok(Transcription {
                text: text.to_string(),
                confidence,
            });
        }
        if audio.len() < 160 {
            return Ok(Transcription::empty());
        }
        Ok(Transcription {
            text: format!("[stub: {} samples @ {} Hz]", audio.len(), sample_rate),
            confidence,
        })
    }

    fn cleanup(&mut self) {
        self.loaded = false;
        self.script.clear();
    }
}
