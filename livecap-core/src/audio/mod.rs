//! Audio sources: lazy sequences of fixed-duration PCM chunks.
//!
//! A source yields mono f32 chunks of roughly `chunk_ms` at a declared
//! sample rate. File sources are finite; microphone sources run until
//! closed. The pipeline consumes sources through the [`AudioSource`]
//! contract and never touches device APIs directly.

pub mod device;
pub mod file;
#[cfg(feature = "audio-cpal")]
pub mod mic;
pub mod resample;

use std::time::Duration;

use crate::error::AudioSourceError;

pub use file::FileSource;
#[cfg(feature = "audio-cpal")]
pub use mic::MicSource;
pub use resample::RateConverter;

/// Default chunk duration handed to the pipeline.
pub const DEFAULT_CHUNK_MS: u32 = 100;

/// A contiguous block of mono PCM samples at a known sample rate.
#[derive(Debug, Clone)]
pub struct AudioChunk {
    /// Mono f32 samples in [-1.0, 1.0].
    pub samples: Vec<f32>,
    /// Sample rate in Hz (e.g. 16000, 44100, 48000).
    pub sample_rate: u32,
}

impl AudioChunk {
    pub fn new(samples: Vec<f32>, sample_rate: u32) -> Self {
        Self {
            samples,
            sample_rate,
        }
    }

    /// Duration of this chunk in seconds.
    pub fn duration_secs(&self) -> f64 {
        self.samples.len() as f64 / self.sample_rate as f64
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }
}

/// Outcome of one [`AudioSource::read`] call.
#[derive(Debug)]
pub enum SourceRead {
    /// The next chunk.
    Chunk(AudioChunk),
    /// Nothing arrived within the timeout; the source may still produce more.
    Timeout,
    /// The source is finite and has no more chunks.
    Exhausted,
}

/// Contract for audio chunk producers.
///
/// `start()` is idempotent; `close()` is safe in any state, after which
/// `read` returns [`AudioSourceError::Closed`].
pub trait AudioSource {
    /// Begin producing. Safe to call more than once.
    fn start(&mut self) -> Result<(), AudioSourceError>;

    /// Next chunk, waiting up to `timeout`.
    fn read(&mut self, timeout: Duration) -> Result<SourceRead, AudioSourceError>;

    /// Release the underlying device/file. Safe in any state.
    fn close(&mut self);

    /// Declared rate of yielded chunks, Hz.
    fn sample_rate(&self) -> u32;
}

/// Scoped acquisition: start `source`, run `f`, and close the source on
/// every exit path.
pub fn with_source<S, T, E>(mut source: S, f: impl FnOnce(&mut S) -> Result<T, E>) -> Result<T, E>
where
    S: AudioSource,
    E: From<AudioSourceError>,
{
    source.start()?;
    let result = f(&mut source);
    source.close();
    result
}

/// Downmix interleaved frames to mono by channel averaging.
pub(crate) fn downmix_to_mono(interleaved: &[f32], channels: usize) -> Vec<f32> {
    if channels <= 1 {
        return interleaved.to_vec();
    }
    interleaved
        .chunks_exact(channels)
        .map(|frame| frame.iter().sum::<f32>() / channels as f32)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    struct CountingSource {
        started: usize,
        closed: usize,
        remaining: usize,
    }

    impl AudioSource for CountingSource {
        fn start(&mut self) -> Result<(), AudioSourceError> {
            self.started += 1;
            Ok(())
        }

        fn read(&mut self, _timeout: Duration) -> Result<SourceRead, AudioSourceError> {
            if self.remaining == 0 {
                return Ok(SourceRead::Exhausted);
            }
            self.remaining -= 1;
            Ok(SourceRead::Chunk(AudioChunk::new(vec![0.0; 160], 16_000)))
        }

        fn close(&mut self) {
            self.closed += 1;
        }

        fn sample_rate(&self) -> u32 {
            16_000
        }
    }

    #[test]
    fn with_source_closes_on_success_and_error() {
        let source = CountingSource {
            started: 0,
            closed: 0,
            remaining: 1,
        };
        let ok: Result<usize, AudioSourceError> = with_source(source, |s| {
            let mut n = 0;
            while let SourceRead::Chunk(_) = s.read(Duration::ZERO)? {
                n += 1;
            }
            assert_eq!(s.started, 1);
            Ok(n)
        });
        assert_eq!(ok.unwrap(), 1);

        let source = CountingSource {
            started: 0,
            closed: 0,
            remaining: 0,
        };
        let err: Result<(), AudioSourceError> =
            with_source(source, |_| Err(AudioSourceError::Closed));
        assert!(err.is_err());
    }

    #[test]
    fn downmix_averages_channels() {
        let stereo = [1.0, 0.0, 0.5, 0.5, -1.0, 1.0];
        assert_eq!(downmix_to_mono(&stereo, 2), vec![0.5, 0.5, 0.0]);
        let mono = [0.25, 0.75];
        assert_eq!(downmix_to_mono(&mono, 1), vec![0.25, 0.75]);
    }

    #[test]
    fn chunk_duration() {
        let chunk = AudioChunk::new(vec![0.0; 1600], 16_000);
        approx::assert_relative_eq!(chunk.duration_secs(), 0.1);
    }
}
