//! Sample-rate conversion for mono f32 audio.
//!
//! Capture devices and media files arrive at arbitrary rates; the VAD and
//! every bundled engine want 16 kHz. The common broadcast rates
//! (48 kHz, 44.1 kHz, 32 kHz) go through rubato's fixed-ratio polyphase
//! `FastFixedIn`; anything else uses the windowed-sinc `SincFixedIn`.
//! Equal rates are a zero-copy passthrough — no rubato session exists.
//!
//! Input is accumulated internally until a full rubato chunk is available;
//! the remainder waits for the next call.

use rubato::{
    FastFixedIn, PolynomialDegree, Resampler, SincFixedIn, SincInterpolationParameters,
    SincInterpolationType, WindowFunction,
};

use crate::error::VadError;

/// Rates served by the fixed-ratio polyphase path.
const POLYPHASE_RATES: &[u32] = &[48_000, 44_100, 32_000];

enum Inner {
    Passthrough,
    Fast(FastFixedIn<f32>),
    Sinc(SincFixedIn<f32>),
}

/// Converts f32 mono audio from one fixed sample rate to another.
pub struct RateConverter {
    inner: Inner,
    /// Accumulation buffer — holds partial input chunks between calls.
    input_buf: Vec<f32>,
    /// How many input samples rubato expects per process call.
    chunk_size: usize,
    /// Pre-allocated output buffer: `[1][output_frames_max]`.
    output_buf: Vec<Vec<f32>>,
    from_rate: u32,
    to_rate: u32,
}

impl RateConverter {
    /// Create a converter from `from_rate` to `to_rate` Hz.
    ///
    /// `chunk_size` is the input frame count per rubato call; callers that
    /// feed irregular chunk lengths can pick anything reasonable (the
    /// converter accumulates internally).
    pub fn new(from_rate: u32, to_rate: u32, chunk_size: usize) -> Result<Self, VadError> {
        if from_rate == to_rate {
            return Ok(Self {
                inner: Inner::Passthrough,
                input_buf: Vec::new(),
                chunk_size,
                output_buf: Vec::new(),
                from_rate,
                to_rate,
            });
        }

        let ratio = to_rate as f64 / from_rate as f64;

        let inner = if POLYPHASE_RATES.contains(&from_rate) {
            let fast = FastFixedIn::<f32>::new(
                ratio,
                1.0, // fixed ratio — no dynamic adjustment
                PolynomialDegree::Cubic,
                chunk_size,
                1, // mono
            )
            .map_err(|e| VadError::ResampleFailed(e.to_string()))?;
            Inner::Fast(fast)
        } else {
            let params = SincInterpolationParameters {
                sinc_len: 128,
                f_cutoff: 0.95,
                interpolation: SincInterpolationType::Linear,
                oversampling_factor: 128,
                window: WindowFunction::BlackmanHarris2,
            };
            let sinc = SincFixedIn::<f32>::new(ratio, 1.0, params, chunk_size, 1)
                .map_err(|e| VadError::ResampleFailed(e.to_string()))?;
            Inner::Sinc(sinc)
        };

        let max_out = match &inner {
            Inner::Fast(r) => r.output_frames_max(),
            Inner::Sinc(r) => r.output_frames_max(),
            Inner::Passthrough => 0,
        };

        tracing::debug!(from_rate, to_rate, chunk_size, max_out, "resampling enabled");

        Ok(Self {
            inner,
            input_buf: Vec::new(),
            chunk_size,
            output_buf: vec![vec![0f32; max_out]; 1],
            from_rate,
            to_rate,
        })
    }

    /// Process incoming samples, returning resampled output (may be empty
    /// while accumulating a partial chunk). Passthrough mode copies input.
    pub fn process(&mut self, samples: &[f32]) -> Result<Vec<f32>, VadError> {
        if matches!(self.inner, Inner::Passthrough) {
            return Ok(samples.to_vec());
        }

        self.input_buf.extend_from_slice(samples);

        let mut result = Vec::new();
        while self.input_buf.len() >= self.chunk_size {
            let input_slice = &self.input_buf[..self.chunk_size];
            let produced = match &mut self.inner {
                Inner::Fast(r) => r
                    .process_into_buffer(&[input_slice], &mut self.output_buf, None)
                    .map_err(|e| VadError::ResampleFailed(e.to_string()))?
                    .1,
                Inner::Sinc(r) => r
                    .process_into_buffer(&[input_slice], &mut self.output_buf, None)
                    .map_err(|e| VadError::ResampleFailed(e.to_string()))?
                    .1,
                Inner::Passthrough => unreachable!(),
            };
            result.extend_from_slice(&self.output_buf[0][..produced]);
            self.input_buf.drain(..self.chunk_size);
        }

        Ok(result)
    }

    /// Returns `true` when no resampling occurs.
    pub fn is_passthrough(&self) -> bool {
        matches!(self.inner, Inner::Passthrough)
    }

    pub fn from_rate(&self) -> u32 {
        self.from_rate
    }

    pub fn to_rate(&self) -> u32 {
        self.to_rate
    }
}

/// One-shot conversion of a whole buffer (batch decode path).
pub fn resample_buffer(samples: &[f32], from_rate: u32, to_rate: u32) -> Result<Vec<f32>, VadError> {
    if from_rate == to_rate {
        return Ok(samples.to_vec());
    }
    let chunk = 1024.min(samples.len().max(64));
    let mut converter = RateConverter::new(from_rate, to_rate, chunk)?;
    let mut out = converter.process(samples)?;
    // Flush with silence until the resampler's internal delay has drained.
    let expected = (samples.len() as u64 * to_rate as u64 / from_rate as u64) as usize;
    let pad = vec![0.0f32; chunk];
    let mut flushes = 0;
    while out.len() < expected && flushes < 16 {
        out.extend(converter.process(&pad)?);
        flushes += 1;
    }
    out.truncate(expected);
    Ok(out)
}
