//! WebRTC-style DSP voice gate.
//!
//! Energy + zero-crossing decision with a hangover counter, in the spirit
//! of the classic WebRTC VAD. Output is **binary**: exactly 0.0 or 1.0 per
//! frame. The state machine's probability thresholds therefore reduce to a
//! strict `p ≥ 0.5` branch; tuning `threshold` has no effect on this
//! backend.

use crate::error::VadError;
use crate::vad::VadBackend;

/// Binary energy/zero-crossing gate.
#[derive(Debug, Clone)]
pub struct WebRtcBackend {
    /// RMS above which a frame is voiced.
    rms_threshold: f32,
    /// Zero-crossing rate above this marks fricative noise, not voice.
    max_zcr: f32,
    /// Silent frames still reported as speech after voice ends.
    hangover_frames: u32,
    hangover_counter: u32,
}

impl WebRtcBackend {
    pub fn new(rms_threshold: f32, hangover_frames: u32) -> Self {
        Self {
            rms_threshold,
            max_zcr: 0.35,
            hangover_frames,
            hangover_counter: 0,
        }
    }

    fn rms(samples: &[f32]) -> f32 {
        if samples.is_empty() {
            return 0.0;
        }
        let sum_sq: f32 = samples.iter().map(|s| s * s).sum();
        (sum_sq / samples.len() as f32).sqrt()
    }

    fn zero_crossing_rate(samples: &[f32]) -> f32 {
        if samples.len() < 2 {
            return 0.0;
        }
        let crossings = samples
            .windows(2)
            .filter(|w| (w[0] >= 0.0) != (w[1] >= 0.0))
            .count();
        crossings as f32 / (samples.len() - 1) as f32
    }
}

impl Default for WebRtcBackend {
    fn default() -> Self {
        Self::new(0.012, 4)
    }
}

impl VadBackend for WebRtcBackend {
    fn process(&mut self, frame: &[f32]) -> Result<f32, VadError> {
        let rms = Self::rms(frame);
        let zcr = Self::zero_crossing_rate(frame);

        let voiced = rms >= self.rms_threshold && zcr <= self.max_zcr;
        if voiced {
            self.hangover_counter = self.hangover_frames;
            return Ok(1.0);
        }
        if self.hangover_counter > 0 {
            self.hangover_counter -= 1;
            return Ok(1.0);
        }
        Ok(0.0)
    }

    fn reset(&mut self) {
        self.hangover_counter = 0;
    }

    fn name(&self) -> &'static str {
        "webrtc"
    }

    fn is_binary(&self) -> bool {
        true
    }
}
