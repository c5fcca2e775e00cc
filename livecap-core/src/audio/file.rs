//! File-backed audio source.
//!
//! WAV files decode through hound; other containers go through the external
//! demux binary (see `file::demux`). Audio is downmixed to mono and
//! resampled to the declared rate at open time, then yielded as `chunk_ms`
//! chunks. With `realtime` set, reads pace themselves against the wall
//! clock so the stream behaves like live capture.

use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use tracing::debug;

use crate::audio::resample::resample_buffer;
use crate::audio::{downmix_to_mono, AudioChunk, AudioSource, SourceRead, DEFAULT_CHUNK_MS};
use crate::error::AudioSourceError;

/// Finite source yielding a decoded file as fixed-duration chunks.
#[derive(Debug)]
pub struct FileSource {
    path: PathBuf,
    samples: Vec<f32>,
    sample_rate: u32,
    chunk_samples: usize,
    position: usize,
    realtime: bool,
    next_deadline: Option<Instant>,
    closed: bool,
}

impl FileSource {
    /// Decode `path` and prepare a source at `sample_rate` Hz (mono).
    pub fn open(path: impl AsRef<Path>, sample_rate: u32, realtime: bool) -> Result<Self, AudioSourceError> {
        Self::open_with_chunk_ms(path, sample_rate, realtime, DEFAULT_CHUNK_MS)
    }

    pub fn open_with_chunk_ms(
        path: impl AsRef<Path>,
        sample_rate: u32,
        realtime: bool,
        chunk_ms: u32,
    ) -> Result<Self, AudioSourceError> {
        let path = path.as_ref().to_path_buf();
        let samples = decode_to_rate(&path, sample_rate)?;
        debug!(
            path = ?path,
            samples = samples.len(),
            sample_rate,
            realtime,
            "file source ready"
        );
        Ok(Self {
            path,
            samples,
            sample_rate,
            chunk_samples: (sample_rate as usize * chunk_ms as usize / 1000).max(1),
            position: 0,
            realtime,
            next_deadline: None,
            closed: false,
        })
    }

    /// Wrap already-decoded PCM (test fixtures, in-memory audio).
    pub fn from_samples(samples: Vec<f32>, sample_rate: u32, realtime: bool) -> Self {
        Self {
            path: PathBuf::new(),
            samples,
            sample_rate,
            chunk_samples: (sample_rate as usize * DEFAULT_CHUNK_MS as usize / 1000).max(1),
            position: 0,
            realtime,
            next_deadline: None,
            closed: false,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Total duration of the decoded file in seconds.
    pub fn duration_secs(&self) -> f64 {
        self.samples.len() as f64 / self.sample_rate as f64
    }
}

impl AudioSource for FileSource {
    fn start(&mut self) -> Result<(), AudioSourceError> {
        if self.closed {
            return Err(AudioSourceError::Closed);
        }
        // Idempotent — the decode already happened at open.
        Ok(())
    }

    fn read(&mut self, _timeout: Duration) -> Result<SourceRead, AudioSourceError> {
        if self.closed {
            return Err(AudioSourceError::Closed);
        }
        if self.position >= self.samples.len() {
            return Ok(SourceRead::Exhausted);
        }

        let end = (self.position + self.chunk_samples).min(self.samples.len());
        let chunk = AudioChunk::new(self.samples[self.position..end].to_vec(), self.sample_rate);
        self.position = end;

        if self.realtime {
            let now = Instant::now();
            let deadline = self.next_deadline.unwrap_or(now);
            if deadline > now {
                std::thread::sleep(deadline - now);
            }
            self.next_deadline =
                Some(deadline.max(now) + Duration::from_secs_f64(chunk.duration_secs()));
        }

        Ok(SourceRead::Chunk(chunk))
    }

    fn close(&mut self) {
        self.closed = true;
        self.samples.clear();
        self.position = 0;
    }

    fn sample_rate(&self) -> u32 {
        self.sample_rate
    }
}

/// Decode `path` to mono f32 at `target_rate`.
///
/// WAV decodes locally; everything else is handed to the demux binary.
pub fn decode_to_rate(path: &Path, target_rate: u32) -> Result<Vec<f32>, AudioSourceError> {
    let is_wav = path
        .extension()
        .map(|e| e.eq_ignore_ascii_case("wav"))
        .unwrap_or(false);
    if is_wav {
        return decode_wav(path, target_rate);
    }
    crate::file::demux::demux_with_ffmpeg(path, target_rate)
        .map_err(|e| AudioSourceError::DecodeFailed(e.to_string()))
}

/// Decode a WAV file to mono f32 at `target_rate` via hound.
pub fn decode_wav(path: &Path, target_rate: u32) -> Result<Vec<f32>, AudioSourceError> {
    let mut reader =
        hound::WavReader::open(path).map_err(|e| AudioSourceError::DecodeFailed(e.to_string()))?;
    let spec = reader.spec();

    let interleaved: Vec<f32> = match spec.sample_format {
        hound::SampleFormat::Float => reader
            .samples::<f32>()
            .collect::<Result<_, _>>()
            .map_err(|e| AudioSourceError::DecodeFailed(e.to_string()))?,
        hound::SampleFormat::Int => {
            let scale = (1i64 << (spec.bits_per_sample - 1)) as f32;
            reader
                .samples::<i32>()
                .map(|s| s.map(|v| v as f32 / scale))
                .collect::<Result<_, _>>()
                .map_err(|e| AudioSourceError::DecodeFailed(e.to_string()))?
        }
    };

    let mono = downmix_to_mono(&interleaved, spec.channels as usize);
    resample_buffer(&mono, spec.sample_rate, target_rate)
        .map_err(|e| AudioSourceError::DecodeFailed(e.to_string()))
}
