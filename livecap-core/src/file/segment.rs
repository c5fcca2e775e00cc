//! Whole-file segmenters for the batch pipeline.
//!
//! Either variant maps decoded PCM to an ordered list of `(start, end)`
//! spans; the pipeline transcribes each span independently.

use crate::error::FileError;
use crate::vad::config::VadConfig;
use crate::vad::processor::VadProcessor;
use crate::vad::BackendKind;

/// One span of a file, seconds.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SegmentSpan {
    pub start_s: f64,
    pub end_s: f64,
}

impl SegmentSpan {
    pub fn duration_s(&self) -> f64 {
        self.end_s - self.start_s
    }
}

/// Splits decoded PCM into speech spans.
pub trait Segmenter: Send {
    fn segment(&mut self, pcm: &[f32], sample_rate: u32) -> Result<Vec<SegmentSpan>, FileError>;
}

/// Segmenter driving the streaming VAD over the whole file.
pub struct VadSegmenter {
    processor: VadProcessor,
    /// Samples fed per processor call.
    chunk: usize,
}

impl VadSegmenter {
    pub fn new(processor: VadProcessor) -> Self {
        Self {
            processor,
            chunk: 4_096,
        }
    }

    /// Auto backend with default segmentation config.
    pub fn with_defaults() -> Result<Self, FileError> {
        let processor = VadProcessor::with_backend_kind(BackendKind::Auto, VadConfig::default())
            .map_err(|e| FileError::Decode(e.to_string()))?;
        Ok(Self::new(processor))
    }
}

impl Segmenter for VadSegmenter {
    fn segment(&mut self, pcm: &[f32], sample_rate: u32) -> Result<Vec<SegmentSpan>, FileError> {
        self.processor.reset();
        let mut spans = Vec::new();
        for chunk in pcm.chunks(self.chunk) {
            let segments = self
                .processor
                .process_chunk(chunk, sample_rate)
                .map_err(|e| FileError::Decode(e.to_string()))?;
            spans.extend(segments.iter().filter(|s| s.is_final).map(|s| SegmentSpan {
                start_s: s.start_time_s,
                end_s: s.end_time_s,
            }));
        }
        if let Some(residual) = self.processor.finalize() {
            spans.push(SegmentSpan {
                start_s: residual.start_time_s,
                end_s: residual.end_time_s,
            });
        }
        Ok(spans)
    }
}

/// Energy-threshold splitter with minimum/maximum span bounds.
///
/// Cheaper than the VAD segmenter and model-free; used when the caller
/// wants fixed-cost segmentation of long recordings.
pub struct SilenceSegmenter {
    /// RMS under this (per 32 ms window) counts as silence.
    pub silence_threshold: f32,
    /// Silence shorter than this does not split, seconds.
    pub min_silence_s: f64,
    /// Spans shorter than this are dropped, seconds.
    pub min_segment_s: f64,
    /// Spans longer than this are cut, seconds.
    pub max_segment_s: f64,
}

impl Default for SilenceSegmenter {
    fn default() -> Self {
        Self {
            silence_threshold: 0.01,
            min_silence_s: 0.3,
            min_segment_s: 0.25,
            max_segment_s: 30.0,
        }
    }
}

impl Segmenter for SilenceSegmenter {
    fn segment(&mut self, pcm: &[f32], sample_rate: u32) -> Result<Vec<SegmentSpan>, FileError> {
        let window = (sample_rate as usize * 32 / 1000).max(1);
        let windows_per_s = sample_rate as f64 / window as f64;
        let min_silence_w = (self.min_silence_s * windows_per_s).round() as usize;
        let max_segment_w = (self.max_segment_s * windows_per_s).round() as usize;

        let mut spans = Vec::new();
        let mut open: Option<usize> = None; // window index of span start
        let mut silent_run = 0usize;

        let total_windows = pcm.len() / window;
        for w in 0..total_windows {
            let slice = &pcm[w * window..(w + 1) * window];
            let rms = (slice.iter().map(|s| s * s).sum::<f32>() / window as f32).sqrt();
            let is_silent = rms < self.silence_threshold;

            match open {
                None => {
                    if !is_silent {
                        open = Some(w);
                        silent_run = 0;
                    }
                }
                Some(start) => {
                    if is_silent {
                        silent_run += 1;
                        if silent_run >= min_silence_w.max(1) {
                            spans.push((start, w + 1 - silent_run));
                            open = None;
                        }
                    } else {
                        silent_run = 0;
                        if max_segment_w > 0 && w - start + 1 >= max_segment_w {
                            spans.push((start, w + 1));
                            open = Some(w + 1);
                        }
                    }
                }
            }
        }
        if let Some(start) = open {
            spans.push((start, total_windows));
        }

        let to_secs = |w: usize| w as f64 * window as f64 / sample_rate as f64;
        Ok(spans
            .into_iter()
            .map(|(a, b)| SegmentSpan {
                start_s: to_secs(a),
                end_s: to_secs(b),
            })
            .filter(|s| s.duration_s() >= self.min_segment_s)
            .collect())
    }
}
