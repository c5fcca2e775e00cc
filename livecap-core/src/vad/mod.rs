//! Voice Activity Detection.
//!
//! Three cooperating layers, each swappable on its own:
//!
//! - **Backend** ([`VadBackend`]): maps one 32 ms frame to a speech
//!   probability in [0, 1]. Neural (Silero), DSP-binary (WebRTC-style), or
//!   lightweight spectral (TEN) — chosen by configuration.
//! - **State machine** ([`state_machine::VadStateMachine`]): turns per-frame
//!   probabilities into padded speech segments with interim emission.
//! - **Processor** ([`processor::VadProcessor`]): frames and resamples a
//!   chunk stream and drives the other two.

pub mod config;
pub mod processor;
pub mod state_machine;

#[cfg(feature = "onnx")]
pub mod silero;
pub mod tenvad;
pub mod webrtc;

use std::str::FromStr;

use crate::error::VadError;

#[cfg(feature = "onnx")]
pub use silero::SileroBackend;
pub use tenvad::TenVadBackend;
pub use webrtc::WebRtcBackend;

/// Samples per VAD frame at [`VAD_SAMPLE_RATE`].
pub const FRAME_SIZE: usize = 512;
/// The fixed internal rate of the VAD stage.
pub const VAD_SAMPLE_RATE: u32 = 16_000;
/// Frame duration in milliseconds (512 / 16000).
pub const FRAME_MS: u32 = 32;

/// A contiguous speech span produced by the state machine.
#[derive(Debug, Clone)]
pub struct VadSegment {
    /// Mono 16 kHz f32 audio, pre/post padding included.
    pub audio: Vec<f32>,
    pub start_time_s: f64,
    pub end_time_s: f64,
    /// `false` for interim snapshots of a still-open segment.
    pub is_final: bool,
}

impl VadSegment {
    pub fn duration_s(&self) -> f64 {
        self.end_time_s - self.start_time_s
    }
}

/// Per-frame speech probability estimator.
///
/// Implementations may be stateful (RNN hidden states, smoothing filters);
/// `reset()` must return them to their initial condition between
/// independent sessions.
pub trait VadBackend: Send {
    /// Speech probability in [0, 1] for one [`FRAME_SIZE`]-sample frame.
    ///
    /// Deterministic given internal state.
    fn process(&mut self, frame: &[f32]) -> Result<f32, VadError>;

    /// Return internal state to its initial condition.
    fn reset(&mut self);

    fn name(&self) -> &'static str;

    /// `true` when the backend only ever emits exactly 0.0 or 1.0.
    fn is_binary(&self) -> bool {
        false
    }
}

/// Which backend the processor should use.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackendKind {
    /// Silero when its model is available, otherwise WebRTC.
    Auto,
    Silero,
    TenVad,
    WebRtc,
}

impl FromStr for BackendKind {
    type Err = VadError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "auto" => Ok(Self::Auto),
            "silero" => Ok(Self::Silero),
            "tenvad" | "ten" => Ok(Self::TenVad),
            "webrtc" => Ok(Self::WebRtc),
            other => Err(VadError::Backend(format!("unknown vad backend: '{other}'"))),
        }
    }
}

impl std::fmt::Display for BackendKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Auto => "auto",
            Self::Silero => "silero",
            Self::TenVad => "tenvad",
            Self::WebRtc => "webrtc",
        };
        f.write_str(s)
    }
}

/// Backend ids selectable from configuration.
pub fn registered_backends() -> Vec<&'static str> {
    let mut ids = vec!["auto"];
    #[cfg(feature = "onnx")]
    ids.push("silero");
    ids.extend(["tenvad", "webrtc"]);
    ids
}

/// Construct a backend for `kind`.
///
/// `Auto` prefers Silero and falls back to WebRTC when the model cannot be
/// loaded (or the crate was built without `onnx`).
pub fn create_backend(kind: BackendKind) -> Result<Box<dyn VadBackend>, VadError> {
    match kind {
        BackendKind::Auto => {
            #[cfg(feature = "onnx")]
            match SileroBackend::from_default_model() {
                Ok(backend) => return Ok(Box::new(backend)),
                Err(e) => {
                    tracing::warn!("silero vad unavailable ({e}), falling back to webrtc");
                }
            }
            Ok(Box::new(WebRtcBackend::default()))
        }
        BackendKind::Silero => {
            #[cfg(feature = "onnx")]
            {
                Ok(Box::new(SileroBackend::from_default_model()?))
            }
            #[cfg(not(feature = "onnx"))]
            {
                Err(VadError::Backend(
                    "silero backend requires the 'onnx' feature".into(),
                ))
            }
        }
        BackendKind::TenVad => Ok(Box::new(TenVadBackend::default())),
        BackendKind::WebRtc => Ok(Box::new(WebRtcBackend::default())),
    }
}
