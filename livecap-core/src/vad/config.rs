//! Segmentation configuration for the VAD state machine.

use crate::error::VadError;
use crate::vad::FRAME_MS;

/// Margin subtracted from `threshold` when `neg_threshold` is absent.
const NEG_THRESHOLD_MARGIN: f32 = 0.15;

/// Immutable segmentation parameters.
///
/// Durations are milliseconds; probability fields are in [0, 1]. All
/// millisecond fields that gate frame counters must be at least one frame
/// (32 ms) — `validate()` enforces the invariants.
#[derive(Debug, Clone)]
pub struct VadConfig {
    /// Probability at or above which a frame opens/extends speech.
    pub threshold: f32,
    /// Probability below which an open segment counts silence. Absent means
    /// `threshold - 0.15`.
    pub neg_threshold: Option<f32>,
    /// Shorter potential segments are discarded.
    pub min_speech_ms: u32,
    /// Silence needed before an open segment starts ending.
    pub min_silence_ms: u32,
    /// Pre-roll kept before the first speech frame (and post-roll counted
    /// after the last).
    pub speech_pad_ms: u32,
    /// Force-split segments that exceed this length. 0 = unbounded.
    pub max_speech_ms: u32,
    /// Minimum buffered audio before the first interim of a segment.
    pub interim_min_duration_ms: u32,
    /// Minimum spacing between interims of the same segment.
    pub interim_interval_ms: u32,
}

impl Default for VadConfig {
    fn default() -> Self {
        Self {
            threshold: 0.5,
            neg_threshold: None,
            min_speech_ms: 250,
            min_silence_ms: 100,
            speech_pad_ms: 100,
            max_speech_ms: 0,
            interim_min_duration_ms: 2000,
            interim_interval_ms: 1000,
        }
    }
}

impl VadConfig {
    pub fn validate(&self) -> Result<(), VadError> {
        if !(0.0..=1.0).contains(&self.threshold) {
            return Err(VadError::InvalidConfig(format!(
                "threshold must be in [0, 1], got {}",
                self.threshold
            )));
        }
        if let Some(neg) = self.neg_threshold {
            if !(0.0..=1.0).contains(&neg) {
                return Err(VadError::InvalidConfig(format!(
                    "neg_threshold must be in [0, 1], got {neg}"
                )));
            }
        }
        for (name, value) in [
            ("min_speech_ms", self.min_speech_ms),
            ("min_silence_ms", self.min_silence_ms),
            ("speech_pad_ms", self.speech_pad_ms),
        ] {
            if value < FRAME_MS {
                return Err(VadError::InvalidConfig(format!(
                    "{name} must be at least one frame ({FRAME_MS} ms), got {value}"
                )));
            }
        }
        Ok(())
    }

    /// Silence threshold actually used while a segment is open.
    pub fn effective_neg_threshold(&self) -> f32 {
        self.neg_threshold
            .unwrap_or((self.threshold - NEG_THRESHOLD_MARGIN).max(0.0))
    }

    pub fn min_speech_frames(&self) -> usize {
        (self.min_speech_ms / FRAME_MS).max(1) as usize
    }

    pub fn min_silence_frames(&self) -> usize {
        (self.min_silence_ms / FRAME_MS).max(1) as usize
    }

    pub fn padding_frames(&self) -> usize {
        (self.speech_pad_ms / FRAME_MS).max(1) as usize
    }

    /// 0 means unbounded.
    pub fn max_speech_frames(&self) -> usize {
        (self.max_speech_ms / FRAME_MS) as usize
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_satisfy_invariants() {
        let cfg = VadConfig::default();
        cfg.validate().unwrap();
        assert_eq!(cfg.min_speech_frames(), 7); // 250 / 32
        assert_eq!(cfg.min_silence_frames(), 3); // 100 / 32
        assert_eq!(cfg.padding_frames(), 3);
        assert_eq!(cfg.max_speech_frames(), 0);
    }

    #[test]
    fn neg_threshold_defaults_to_threshold_minus_margin() {
        let cfg = VadConfig::default();
        assert!((cfg.effective_neg_threshold() - 0.35).abs() < 1e-6);

        let explicit = VadConfig {
            neg_threshold: Some(0.2),
            ..VadConfig::default()
        };
        assert_eq!(explicit.effective_neg_threshold(), 0.2);
    }

    #[test]
    fn rejects_out_of_range_threshold() {
        let cfg = VadConfig {
            threshold: 1.5,
            ..VadConfig::default()
        };
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn rejects_sub_frame_durations() {
        let cfg = VadConfig {
            min_silence_ms: 10,
            ..VadConfig::default()
        };
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn padding_is_at_least_one_frame() {
        let cfg = VadConfig {
            speech_pad_ms: 32,
            ..VadConfig::default()
        };
        assert_eq!(cfg.padding_frames(), 1);
    }
}
