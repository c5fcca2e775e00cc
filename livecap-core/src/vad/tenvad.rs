//! Lightweight probabilistic detector ("TEN" profile).
//!
//! No model files: combines frame energy against an adaptive noise floor
//! with spectral flatness (voice is tonal, broadband noise is flat) and
//! squashes the score through a sigmoid. Cheaper than the neural backend,
//! smoother than the binary gate.

use crate::error::VadError;
use crate::vad::{VadBackend, FRAME_SIZE};

/// Exponential smoothing factor for the noise-floor estimate.
const NOISE_ALPHA: f32 = 0.05;
/// Exponential smoothing of the emitted probability.
const PROB_ALPHA: f32 = 0.6;
/// Initial noise floor (RMS) before any frames are seen.
const INITIAL_NOISE_RMS: f32 = 0.005;

/// Energy + spectral-flatness detector with smoothed output.
#[derive(Debug, Clone)]
pub struct TenVadBackend {
    noise_rms: f32,
    smoothed_prob: f32,
}

impl TenVadBackend {
    pub fn new() -> Self {
        Self {
            noise_rms: INITIAL_NOISE_RMS,
            smoothed_prob: 0.0,
        }
    }

    fn rms(samples: &[f32]) -> f32 {
        if samples.is_empty() {
            return 0.0;
        }
        let sum_sq: f32 = samples.iter().map(|s| s * s).sum();
        (sum_sq / samples.len() as f32).sqrt()
    }

    /// Spectral flatness proxy from a coarse 8-band energy split.
    ///
    /// Geometric/arithmetic mean ratio of band energies: ~1 for white
    /// noise, near 0 for tonal (voiced) content.
    fn band_flatness(samples: &[f32]) -> f32 {
        const BANDS: usize = 8;
        let band_len = samples.len() / BANDS;
        if band_len == 0 {
            return 1.0;
        }
        let mut energies = [0f32; BANDS];
        for (i, band) in samples.chunks_exact(band_len).take(BANDS).enumerate() {
            energies[i] = band.iter().map(|s| s * s).sum::<f32>() / band_len as f32 + 1e-10;
        }
        let log_mean = energies.iter().map(|e| e.ln()).sum::<f32>() / BANDS as f32;
        let arith_mean = energies.iter().sum::<f32>() / BANDS as f32;
        (log_mean.exp() / arith_mean).clamp(0.0, 1.0)
    }
}

impl Default for TenVadBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl VadBackend for TenVadBackend {
    fn process(&mut self, frame: &[f32]) -> Result<f32, VadError> {
        debug_assert_eq!(frame.len(), FRAME_SIZE);
        let rms = Self::rms(frame);

        // Signal-to-noise in dB against the tracked floor.
        let snr_db = 20.0 * (rms / self.noise_rms.max(1e-6)).max(1e-6).log10();
        // Track the floor during quiet frames only.
        if snr_db < 6.0 {
            self.noise_rms += NOISE_ALPHA * (rms - self.noise_rms);
            self.noise_rms = self.noise_rms.max(1e-5);
        }

        let flatness = Self::band_flatness(frame);
        // Voiced frames: strong SNR, low flatness. Map to a logistic score.
        let score = 0.35 * snr_db - 3.0 * flatness;
        let raw_prob = 1.0 / (1.0 + (-score).exp());

        self.smoothed_prob += PROB_ALPHA * (raw_prob - self.smoothed_prob);
        Ok(self.smoothed_prob.clamp(0.0, 1.0))
    }

    fn reset(&mut self) {
        self.noise_rms = INITIAL_NOISE_RMS;
        self.smoothed_prob = 0.0;
    }

    fn name(&self) -> &'static str {
        "tenvad"
    }
}
