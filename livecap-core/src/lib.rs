//! # livecap-core
//!
//! Real-time speech transcription runtime.
//!
//! ## Architecture
//!
//! ```text
//! AudioSource ──chunks──► VadProcessor ──frames──► VadBackend (probability)
//!                              │                        │
//!                              └──► VadStateMachine ◄───┘
//!                                        │ segments
//!                              StreamTranscriber ──► SpeechEngine
//!                                        │                │
//!                              (context) │          (text, confidence)
//!                                Translator?              │
//!                                        └──► TranscriptEvent ──► consumer
//! ```
//!
//! Streaming results reach the consumer through a blocking iterator, a
//! cooperative async iterator, or callbacks; the batch pipeline in [`file`]
//! reuses the same engine contract to turn whole files into subtitle
//! tracks.

#![forbid(unsafe_code)]
#![warn(clippy::all)]

pub mod audio;
pub mod engine;
pub mod error;
pub mod file;
pub mod lang;
pub mod resources;
pub mod results;
pub mod stream;
pub mod translate;
pub mod vad;

// Convenience re-exports for downstream crates
pub use audio::{AudioChunk, AudioSource, SourceRead};
pub use engine::registry::{create_engine, engines_for_language, Device, ParamValue};
pub use engine::{load_model, CancelToken, EngineHandle, ProgressUpdate, SpeechEngine};
pub use error::{
    AudioSourceError, EngineError, FileError, TranscriptionError, TranslationError, VadError,
};
pub use results::{
    FileSubtitleSegment, InterimResult, TranscriptEvent, TranscriptionResult, TranslationResult,
};
pub use stream::{CallbackTranscriber, StreamTranscriber};
pub use translate::{ContextBuffer, Translator};
pub use vad::{config::VadConfig, processor::VadProcessor, BackendKind, VadSegment};
