//! ASR engine contract and lifecycle.
//!
//! An engine owns its loaded model for its lifetime. Construction (via the
//! factory in [`registry`]) is cheap and never touches the network; the
//! heavy lifting happens in [`load_model`], which drives the five lifecycle
//! steps every engine implements:
//!
//! ```text
//! check_deps → prepare_model_dir → download_if_missing → load_from_path → configure
//! ```
//!
//! [`load_model`] reports an ascending percent (0 → 100) with a short
//! message per step and polls a [`CancelToken`] between steps, so a UI can
//! abort a slow download without killing the process.
//!
//! `&mut self` on `transcribe` expresses that decoders are stateful. All
//! mutation is serialised through [`EngineHandle`]'s `parking_lot::Mutex`.

pub mod registry;
pub mod stub;

#[cfg(feature = "onnx")]
pub mod ctc;
#[cfg(feature = "onnx")]
pub mod whisper;

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::info;

use crate::engine::registry::EngineParams;
use crate::error::EngineError;

/// Text and confidence for one transcribed segment.
#[derive(Debug, Clone, PartialEq)]
pub struct Transcription {
    /// May be empty — treated as "no speech".
    pub text: String,
    /// In [0.0, 1.0].
    pub confidence: f32,
}

impl Transcription {
    pub fn empty() -> Self {
        Self {
            text: String::new(),
            confidence: 0.0,
        }
    }
}

/// One step of model-load progress.
#[derive(Debug, Clone)]
pub struct ProgressUpdate {
    /// 0–100, monotone over one `load_model` call.
    pub percent: u8,
    pub message: String,
}

/// Cooperative cancellation flag polled between lifecycle steps.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Contract for speech recognition backends.
pub trait SpeechEngine: Send {
    fn engine_name(&self) -> &str;

    /// Rate `transcribe` expects its audio at.
    fn required_sample_rate(&self) -> u32 {
        16_000
    }

    /// ISO 639-1 codes this engine can transcribe.
    fn supported_languages(&self) -> Vec<&'static str>;

    /// Merged construction parameters (defaults ∪ overrides).
    fn params(&self) -> &EngineParams;

    /// Whether `load_model` completed successfully.
    fn is_loaded(&self) -> bool;

    // ── lifecycle steps, driven by `load_model` ──────────────────────────

    /// Verify build features / native dependencies.
    fn check_deps(&mut self) -> Result<(), EngineError>;

    /// Create and return the model directory.
    fn prepare_model_dir(&mut self) -> Result<PathBuf, EngineError>;

    /// Fetch missing model files, reporting percent within [0, 100].
    fn download_if_missing(
        &mut self,
        progress: &mut dyn FnMut(u8, &str),
    ) -> Result<(), EngineError>;

    /// Build sessions/tokenizers from the prepared directory.
    fn load_from_path(&mut self) -> Result<(), EngineError>;

    /// Post-load tuning; default is a no-op.
    fn configure(&mut self) -> Result<(), EngineError> {
        Ok(())
    }

    // ── inference ────────────────────────────────────────────────────────

    /// Transcribe mono f32 audio.
    ///
    /// `sample_rate` must equal [`required_sample_rate`](Self::required_sample_rate).
    /// The engine may copy `audio` but must not retain it.
    fn transcribe(&mut self, audio: &[f32], sample_rate: u32)
        -> Result<Transcription, EngineError>;

    /// Release model memory. Must be called before drop; idempotent.
    fn cleanup(&mut self);
}

/// Drive the full load lifecycle with progress and cancellation.
pub fn load_model(
    engine: &mut dyn SpeechEngine,
    mut progress: impl FnMut(ProgressUpdate),
    cancel: &CancelToken,
) -> Result<(), EngineError> {
    let mut emit = |percent: u8, message: &str| {
        progress(ProgressUpdate {
            percent,
            message: message.to_string(),
        });
    };
    let check = |cancel: &CancelToken| {
        if cancel.is_cancelled() {
            Err(EngineError::Cancelled)
        } else {
            Ok(())
        }
    };

    info!(engine = engine.engine_name(), "loading model");

    emit(0, "checking dependencies");
    engine.check_deps()?;
    check(cancel)?;

    emit(10, "preparing model directory");
    let dir = engine.prepare_model_dir()?;
    check(cancel)?;

    emit(15, "checking model files");
    engine.download_if_missing(&mut |pct, msg| {
        // Map the download's own 0–100 into the 15–80 band.
        let overall = 15 + (pct.min(100) as u32 * 65 / 100) as u8;
        emit(overall, msg);
    })?;
    check(cancel)?;

    emit(80, "loading model");
    engine.load_from_path()?;
    check(cancel)?;

    emit(95, "configuring");
    engine.configure()?;

    emit(100, "ready");
    info!(engine = engine.engine_name(), dir = ?dir, "model loaded");
    Ok(())
}

/// Thread-safe reference-counted handle to any [`SpeechEngine`].
///
/// `parking_lot::Mutex` keeps the lock non-poisoning on panic; worker
/// threads and the driver serialise engine calls through it.
#[derive(Clone)]
pub struct EngineHandle(pub Arc<Mutex<Box<dyn SpeechEngine>>>);

impl EngineHandle {
    pub fn new<E: SpeechEngine + 'static>(engine: E) -> Self {
        Self(Arc::new(Mutex::new(Box::new(engine))))
    }

    pub fn from_boxed(engine: Box<dyn SpeechEngine>) -> Self {
        Self(Arc::new(Mutex::new(engine)))
    }
}

impl std::fmt::Debug for EngineHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EngineHandle").finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Records every lifecycle step and progress update.
    struct ScriptedEngine {
        params: EngineParams,
        steps: Vec<&'static str>,
        fail_download: bool,
        loaded: bool,
    }

    impl ScriptedEngine {
        fn new(fail_download: bool) -> Self {
            Self {
                params: EngineParams::empty(),
                steps: Vec::new(),
                fail_download,
                loaded: false,
            }
        }
    }

    impl SpeechEngine for ScriptedEngine {
        fn engine_name(&self) -> &str {
            "scripted"
        }

        fn supported_languages(&self) -> Vec<&'static str> {
            vec!["en"]
        }

        fn params(&self) -> &EngineParams {
            &self.params
        }

        fn is_loaded(&self) -> bool {
            self.loaded
        }

        fn check_deps(&mut self) -> Result<(), EngineError> {
            self.steps.push("check_deps");
            Ok(())
        }

        fn prepare_model_dir(&mut self) -> Result<PathBuf, EngineError> {
            self.steps.push("prepare");
            Ok(PathBuf::from("/tmp/scripted"))
        }

        fn download_if_missing(
            &mut self,
            progress: &mut dyn FnMut(u8, &str),
        ) -> Result<(), EngineError> {
            self.steps.push("download");
            if self.fail_download {
                return Err(EngineError::ModelDownload("offline".into()));
            }
            progress(50, "halfway");
            progress(100, "done");
            Ok(())
        }

        fn load_from_path(&mut self) -> Result<(), EngineError> {
            self.steps.push("load");
            self.loaded = true;
            Ok(())
        }

        fn transcribe(
            &mut self,
            _audio: &[f32],
            _sample_rate: u32,
        ) -> Result<Transcription, EngineError> {
            Ok(Transcription::empty())
        }

        fn cleanup(&mut self) {
            self.loaded = false;
        }
    }

    #[test]
    fn load_model_runs_steps_in_order_with_monotone_progress() {
        let mut engine = ScriptedEngine::new(false);
        let mut percents = Vec::new();
        load_model(
            &mut engine,
            |u| percents.push(u.percent),
            &CancelToken::new(),
        )
        .unwrap();

        assert_eq!(engine.steps, vec!["check_deps", "prepare", "download", "load"]);
        assert!(engine.is_loaded());
        assert_eq!(percents.first(), Some(&0));
        assert_eq!(percents.last(), Some(&100));
        assert!(percents.windows(2).all(|w| w[0] <= w[1]), "{percents:?}");
    }

    #[test]
    fn download_failure_propagates() {
        let mut engine = ScriptedEngine::new(true);
        let err = load_model(&mut engine, |_| {}, &CancelToken::new()).unwrap_err();
        assert!(matches!(err, EngineError::ModelDownload(_)));
        assert!(!engine.is_loaded());
    }

    #[test]
    fn cancellation_stops_between_steps() {
        let mut engine = ScriptedEngine::new(false);
        let cancel = CancelToken::new();
        cancel.cancel();
        let err = load_model(&mut engine, |_| {}, &cancel).unwrap_err();
        assert!(matches!(err, EngineError::Cancelled));
        // First step ran; nothing after the first cancel poll did.
        assert_eq!(engine.steps, vec!["check_deps"]);
    }
}
