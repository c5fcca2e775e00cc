//! Error taxonomies for livecap-core.
//!
//! One enum per subsystem so callers can match on the failure domain that
//! actually concerns them. Every message starts with a short grep-friendly
//! kind tag; causes are preserved for debug output where available.

use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

/// Errors produced by audio sources (file / microphone capture).
#[derive(Debug, Error)]
pub enum AudioSourceError {
    #[error("device unavailable: {reason}")]
    DeviceUnavailable { reason: String },

    #[error("decode failed: {0}")]
    DecodeFailed(String),

    #[error("source closed")]
    Closed,
}

/// Errors produced by the VAD processor and its backends.
#[derive(Debug, Error)]
pub enum VadError {
    #[error("unsupported language: '{lang}' (supported: {})", supported.join(", "))]
    UnsupportedLanguage {
        lang: String,
        supported: Vec<&'static str>,
    },

    #[error("resample failed: {0}")]
    ResampleFailed(String),

    #[error("invalid vad config: {0}")]
    InvalidConfig(String),

    #[error("vad backend error: {0}")]
    Backend(String),
}

/// Errors produced by ASR engines and the engine factory.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("unknown engine: '{0}'")]
    UnknownEngine(String),

    #[error("engine id 'auto' is deprecated — use engines_for_language() to pick an engine")]
    AutoDeprecated,

    #[error("dependency missing: {0}")]
    DependencyMissing(String),

    #[error("model download failed: {0}")]
    ModelDownload(String),

    #[error("model load failed: {0}")]
    ModelLoad(String),

    #[error("model file not found: {path}")]
    ModelNotFound { path: PathBuf },

    #[error("inference error: {0}")]
    Inference(String),

    #[error("invalid option: {0}")]
    InvalidOption(String),

    #[error("model load cancelled")]
    Cancelled,
}

/// Errors surfaced to consumers of the stream orchestrator.
#[derive(Debug, Error)]
pub enum TranscriptionError {
    #[error("engine: {0}")]
    Engine(#[from] EngineError),

    #[error("audio source: {0}")]
    Audio(#[from] AudioSourceError),

    #[error("vad: {0}")]
    Vad(#[from] VadError),

    /// Informational — the driving source ran out of chunks.
    #[error("source exhausted")]
    SourceExhausted,
}

/// Errors produced by the batch file pipeline.
#[derive(Debug, Error)]
pub enum FileError {
    #[error("decode failed: {0}")]
    Decode(String),

    #[error("transcription failed: {0}")]
    Transcription(#[from] EngineError),

    #[error("subtitle write failed: {path}: {source}")]
    WriteSubtitle {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("batch cancelled")]
    Cancelled,
}

/// Errors produced by translation backends.
#[derive(Debug, Error)]
pub enum TranslationError {
    #[error("translation network error: {0}")]
    Network(String),

    #[error("translation model error: {0}")]
    Model(String),

    #[error("unsupported language pair: {source_lang} -> {target_lang}")]
    UnsupportedPair {
        source_lang: String,
        target_lang: String,
    },

    #[error("translation timed out after {0:?}")]
    Timeout(Duration),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

pub type Result<T, E = TranscriptionError> = std::result::Result<T, E>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn messages_carry_grep_friendly_kind_tags() {
        let e = EngineError::UnknownEngine("nope".into());
        assert!(e.to_string().contains("unknown engine"));

        let e = VadError::UnsupportedLanguage {
            lang: "tlh".into(),
            supported: vec!["en", "ja"],
        };
        assert!(e.to_string().contains("unsupported language"));
        assert!(e.to_string().contains("en, ja"));

        let e = TranslationError::Timeout(Duration::from_secs(5));
        assert!(e.to_string().contains("timed out"));

        let e = FileError::Transcription(EngineError::Inference("boom".into()));
        assert!(e.to_string().starts_with("transcription failed:"));
        let e = FileError::Decode("bad container".into());
        assert!(e.to_string().starts_with("decode failed:"));
    }

    #[test]
    fn engine_errors_wrap_into_transcription_errors() {
        let e: TranscriptionError = EngineError::Inference("boom".into()).into();
        assert!(matches!(e, TranscriptionError::Engine(_)));
    }
}
