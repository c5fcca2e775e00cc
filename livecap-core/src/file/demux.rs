//! Container demux/decode to 16 kHz mono f32.
//!
//! WAV decodes in-process via hound; every other container shells out to
//! the resolved ffmpeg binary and reads raw `f32le` PCM from its stdout.
//! Tests inject a stub [`Demuxer`] and never touch either path.

use std::path::Path;
use std::process::Command;

use tracing::debug;

use crate::error::FileError;

/// Output rate of every demuxer.
pub const DEMUX_SAMPLE_RATE: u32 = 16_000;

/// Decodes a media file into 16 kHz mono f32 PCM.
pub trait Demuxer: Send + Sync {
    fn decode(&self, path: &Path) -> Result<Vec<f32>, FileError>;
}

/// ffmpeg-backed demuxer for arbitrary containers.
pub struct FfmpegDemuxer;

impl Demuxer for FfmpegDemuxer {
    fn decode(&self, path: &Path) -> Result<Vec<f32>, FileError> {
        demux_with_ffmpeg(path, DEMUX_SAMPLE_RATE)
    }
}

/// hound-backed demuxer for WAV files (no external binary needed).
pub struct WavDemuxer;

impl Demuxer for WavDemuxer {
    fn decode(&self, path: &Path) -> Result<Vec<f32>, FileError> {
        crate::audio::file::decode_wav(path, DEMUX_SAMPLE_RATE)
            .map_err(|e| FileError::Decode(e.to_string()))
    }
}

/// Picks WAV or ffmpeg per file extension.
pub struct AutoDemuxer;

impl Demuxer for AutoDemuxer {
    fn decode(&self, path: &Path) -> Result<Vec<f32>, FileError> {
        crate::audio::file::decode_to_rate(path, DEMUX_SAMPLE_RATE)
            .map_err(|e| FileError::Decode(e.to_string()))
    }
}

/// Run the demux binary and parse its raw f32le output.
pub fn demux_with_ffmpeg(path: &Path, sample_rate: u32) -> Result<Vec<f32>, FileError> {
    let ffmpeg = crate::resources::ffmpeg_executable()?;
    debug!(ffmpeg = ?ffmpeg, path = ?path, "demuxing via ffmpeg");

    let output = Command::new(&ffmpeg)
        .arg("-nostdin")
        .arg("-i")
        .arg(path)
        .args(["-f", "f32le", "-acodec", "pcm_f32le", "-ac", "1"])
        .args(["-ar", &sample_rate.to_string()])
        .arg("-")
        .output()
        .map_err(|e| FileError::Decode(format!("failed to run ffmpeg: {e}")))?;

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        let tail: String = stderr.lines().rev().take(4).collect::<Vec<_>>().join(" | ");
        return Err(FileError::Decode(format!(
            "ffmpeg exited with {}: {tail}",
            output.status
        )));
    }

    Ok(bytes_to_f32le(&output.stdout))
}

fn bytes_to_f32le(bytes: &[u8]) -> Vec<f32> {
    bytes
        .chunks_exact(4)
        .map(|b| f32::from_le_bytes([b[0], b[1], b[2], b[3]]))
        .collect()
}
