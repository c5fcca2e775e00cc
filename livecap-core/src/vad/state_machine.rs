//! Frame-level segmentation state machine.
//!
//! ## States
//!
//! ```text
//! Silence ──p≥thr──► PotentialSpeech ──min_speech──► Speech ──min_silence──► Ending
//!    ▲                     │                           │  ▲                    │
//!    └──────min_silence────┘                           │  └───────p≥neg────────┤
//!    └───────────────padding elapsed (final segment) ──┴──────────────────────┘
//! ```
//!
//! Entering speech requires `p ≥ threshold`; an open segment only counts a
//! frame as silence once `p` drops below the (lower) negative threshold.
//! With a binary 0/1 backend and default thresholds both comparisons reduce
//! to a strict `p ≥ 0.5` branch.
//!
//! A ring of `padding_frames` pre-roll frames is prepended when speech
//! opens; trailing silence collected before `Ending` completes acts as the
//! post-roll. Interim snapshots never drain the buffer.

use std::collections::VecDeque;

use tracing::debug;

use crate::vad::config::VadConfig;
use crate::vad::{VadSegment, FRAME_SIZE, VAD_SAMPLE_RATE};

/// Seconds per frame.
const FRAME_SECS: f64 = FRAME_SIZE as f64 / VAD_SAMPLE_RATE as f64;

/// Segmentation phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VadState {
    /// No open segment.
    Silence,
    /// Speech started but has not yet lasted `min_speech_ms`.
    PotentialSpeech,
    /// A confirmed open segment.
    Speech,
    /// Silence observed for `min_silence_ms`; waiting out the padding.
    Ending,
}

/// Converts per-frame `(audio, probability, timestamp)` into speech segments.
pub struct VadStateMachine {
    config: VadConfig,
    min_speech_frames: usize,
    min_silence_frames: usize,
    padding_frames: usize,
    max_speech_frames: usize,

    state: VadState,
    speech_frames: usize,
    silence_frames: usize,
    /// Ring of the most recent non-speech frames (pre-roll).
    pre_buffer: VecDeque<Vec<f32>>,
    /// Flat audio of the open segment, pre-roll included.
    speech_buffer: Vec<f32>,
    segment_start_s: f64,
    last_interim_time_s: Option<f64>,
    last_interim_len: usize,
}

impl VadStateMachine {
    pub fn new(config: VadConfig) -> Result<Self, crate::error::VadError> {
        config.validate()?;
        Ok(Self {
            min_speech_frames: config.min_speech_frames(),
            min_silence_frames: config.min_silence_frames(),
            padding_frames: config.padding_frames(),
            max_speech_frames: config.max_speech_frames(),
            config,
            state: VadState::Silence,
            speech_frames: 0,
            silence_frames: 0,
            pre_buffer: VecDeque::new(),
            speech_buffer: Vec::new(),
            segment_start_s: 0.0,
            last_interim_time_s: None,
            last_interim_len: 0,
        })
    }

    pub fn state(&self) -> VadState {
        self.state
    }

    pub fn config(&self) -> &VadConfig {
        &self.config
    }

    /// Advance by one frame.
    ///
    /// `time_s` is the stream time at which `frame` starts. Returns zero or
    /// more segments: at most one interim and/or one final per call.
    pub fn process_frame(&mut self, frame: &[f32], prob: f32, time_s: f64) -> Vec<VadSegment> {
        debug_assert_eq!(frame.len(), FRAME_SIZE);
        let mut out = Vec::new();

        let is_speech = match self.state {
            VadState::Silence | VadState::PotentialSpeech => prob >= self.config.threshold,
            VadState::Speech | VadState::Ending => prob >= self.config.effective_neg_threshold(),
        };

        match self.state {
            VadState::Silence => {
                if is_speech {
                    self.open_segment(frame, time_s);
                } else {
                    self.push_pre_roll(frame);
                }
            }

            VadState::PotentialSpeech => {
                self.speech_buffer.extend_from_slice(frame);
                if is_speech {
                    self.speech_frames += 1;
                    self.silence_frames = 0;
                    if self.speech_frames >= self.min_speech_frames {
                        self.state = VadState::Speech;
                        debug!(start_s = self.segment_start_s, "speech confirmed");
                    }
                } else {
                    self.silence_frames += 1;
                    if self.silence_frames >= self.min_silence_frames {
                        self.abort_candidate();
                    }
                }
            }

            VadState::Speech => {
                self.speech_buffer.extend_from_slice(frame);
                if is_speech {
                    self.speech_frames += 1;
                    self.silence_frames = 0;
                } else {
                    self.silence_frames += 1;
                }

                if self.max_speech_frames > 0 && self.buffered_frames() >= self.max_speech_frames {
                    debug!(
                        buffered_s = self.buffered_secs(),
                        "max speech length reached — forcing split"
                    );
                    out.push(self.emit_final());
                } else if self.silence_frames >= self.min_silence_frames {
                    self.state = VadState::Ending;
                } else if let Some(interim) = self.maybe_interim(time_s) {
                    out.push(interim);
                }
            }

            VadState::Ending => {
                if is_speech {
                    self.state = VadState::Speech;
                    self.speech_buffer.extend_from_slice(frame);
                    self.speech_frames += 1;
                    self.silence_frames = 0;
                } else {
                    self.silence_frames += 1;
                    if self.silence_frames >= self.padding_frames {
                        out.push(self.emit_final());
                    }
                }
            }
        }

        out
    }

    /// Flush the open segment, if any. Idempotent from `Silence`.
    pub fn finalize(&mut self) -> Option<VadSegment> {
        if self.state == VadState::Silence || self.speech_buffer.is_empty() {
            return None;
        }
        Some(self.emit_final())
    }

    /// Return to the initial condition, dropping all buffers.
    pub fn reset(&mut self) {
        self.state = VadState::Silence;
        self.speech_frames = 0;
        self.silence_frames = 0;
        self.pre_buffer.clear();
        self.speech_buffer.clear();
        self.segment_start_s = 0.0;
        self.last_interim_time_s = None;
        self.last_interim_len = 0;
    }

    fn buffered_frames(&self) -> usize {
        self.speech_buffer.len() / FRAME_SIZE
    }

    fn buffered_secs(&self) -> f64 {
        self.speech_buffer.len() as f64 / VAD_SAMPLE_RATE as f64
    }

    fn push_pre_roll(&mut self, frame: &[f32]) {
        if self.pre_buffer.len() >= self.padding_frames {
            self.pre_buffer.pop_front();
        }
        self.pre_buffer.push_back(frame.to_vec());
    }

    fn open_segment(&mut self, frame: &[f32], time_s: f64) {
        self.segment_start_s = (time_s - self.pre_buffer.len() as f64 * FRAME_SECS).max(0.0);
        self.speech_buffer.clear();
        for pre in self.pre_buffer.drain(..) {
            self.speech_buffer.extend_from_slice(&pre);
        }
        self.speech_buffer.extend_from_slice(frame);
        self.speech_frames = 1;
        self.silence_frames = 0;
        self.last_interim_time_s = None;
        self.last_interim_len = 0;
        self.state = VadState::PotentialSpeech;
    }

    /// Candidate never reached `min_speech_ms` — drop it, keeping the tail
    /// as fresh pre-roll.
    fn abort_candidate(&mut self) {
        let buf = std::mem::take(&mut self.speech_buffer);
        let frames: Vec<&[f32]> = buf.chunks_exact(FRAME_SIZE).collect();
        let keep_from = frames.len().saturating_sub(self.padding_frames);
        self.pre_buffer.clear();
        for frame in &frames[keep_from..] {
            self.pre_buffer.push_back(frame.to_vec());
        }
        self.speech_frames = 0;
        self.silence_frames = 0;
        self.state = VadState::Silence;
    }

    fn maybe_interim(&mut self, time_s: f64) -> Option<VadSegment> {
        if self.config.interim_min_duration_ms == 0 {
            return None;
        }
        let buffered_ms = self.buffered_secs() * 1000.0;
        if buffered_ms < self.config.interim_min_duration_ms as f64 {
            return None;
        }
        if let Some(last) = self.last_interim_time_s {
            if (time_s - last) * 1000.0 < self.config.interim_interval_ms as f64 {
                return None;
            }
        }
        if self.speech_buffer.len() <= self.last_interim_len {
            return None;
        }

        self.last_interim_time_s = Some(time_s);
        self.last_interim_len = self.speech_buffer.len();
        Some(VadSegment {
            audio: self.speech_buffer.clone(),
            start_time_s: self.segment_start_s,
            end_time_s: self.segment_start_s + self.buffered_secs(),
            is_final: false,
        })
    }

    fn emit_final(&mut self) -> VadSegment {
        let audio = std::mem::take(&mut self.speech_buffer);
        let start = self.segment_start_s;
        let end = start + audio.len() as f64 / VAD_SAMPLE_RATE as f64;
        debug!(start, end, samples = audio.len(), "segment finalized");
        self.reset();
        VadSegment {
            audio,
            start_time_s: start,
            end_time_s: end,
            is_final: true,
        }
    }
}
