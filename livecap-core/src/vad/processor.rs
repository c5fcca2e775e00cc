//! Chunk-stream driver for the VAD stage.
//!
//! Accepts arbitrary-length mono chunks at any sample rate, converts to the
//! fixed internal rate, slices 512-sample frames, asks the backend for a
//! speech probability per frame, and forwards everything to the state
//! machine. Stream time advances by exactly one frame per processed frame,
//! so timestamps are independent of chunk sizing.

use tracing::debug;

use crate::audio::resample::RateConverter;
use crate::error::VadError;
use crate::vad::config::VadConfig;
use crate::vad::state_machine::VadStateMachine;
use crate::vad::{
    create_backend, BackendKind, VadBackend, VadSegment, FRAME_SIZE, VAD_SAMPLE_RATE,
};

/// Languages with tuned presets in [`VadProcessor::from_language`].
pub const PRESET_LANGUAGES: &[&str] = &["en", "ja", "zh", "ko", "de", "es", "fr"];

/// Drives a [`VadBackend`] and [`VadStateMachine`] over a chunk stream.
pub struct VadProcessor {
    backend: Box<dyn VadBackend>,
    machine: VadStateMachine,
    converter: Option<RateConverter>,
    /// Residual 16 kHz samples shorter than one frame.
    frame_buf: Vec<f32>,
    current_time_s: f64,
}

impl VadProcessor {
    pub fn new(backend: Box<dyn VadBackend>, config: VadConfig) -> Result<Self, VadError> {
        Ok(Self {
            backend,
            machine: VadStateMachine::new(config)?,
            converter: None,
            frame_buf: Vec::new(),
            current_time_s: 0.0,
        })
    }

    /// Backend chosen by kind (`Auto` resolves per availability).
    pub fn with_backend_kind(kind: BackendKind, config: VadConfig) -> Result<Self, VadError> {
        Self::new(create_backend(kind)?, config)
    }

    /// Processor preconfigured for `lang` from the preset table.
    pub fn from_language(lang: &str) -> Result<Self, VadError> {
        let normalized = crate::lang::normalize(lang).unwrap_or_default();
        let config = match normalized.as_str() {
            "en" | "de" | "es" | "fr" => VadConfig::default(),
            // CJK phrasing pauses run longer; splitting mid-phrase hurts
            // downstream ASR more than the added latency.
            "ja" | "zh" | "ko" => VadConfig {
                min_silence_ms: 200,
                speech_pad_ms: 150,
                ..VadConfig::default()
            },
            _ => {
                return Err(VadError::UnsupportedLanguage {
                    lang: lang.to_string(),
                    supported: PRESET_LANGUAGES.to_vec(),
                })
            }
        };
        Self::with_backend_kind(BackendKind::Auto, config)
    }

    /// Monotonic stream time in seconds (frames processed × 32 ms).
    pub fn current_time_s(&self) -> f64 {
        self.current_time_s
    }

    pub fn backend_name(&self) -> &'static str {
        self.backend.name()
    }

    /// Feed one chunk; returns every segment completed (or snapshotted)
    /// within it.
    pub fn process_chunk(
        &mut self,
        samples: &[f32],
        sample_rate: u32,
    ) -> Result<Vec<VadSegment>, VadError> {
        let converted: Vec<f32> = if sample_rate == VAD_SAMPLE_RATE {
            samples.to_vec()
        } else {
            match &mut self.converter {
                Some(c) if c.from_rate() == sample_rate => c.process(samples)?,
                _ => {
                    debug!(sample_rate, "initialising vad resampler");
                    let mut c = RateConverter::new(sample_rate, VAD_SAMPLE_RATE, FRAME_SIZE)?;
                    let out = c.process(samples)?;
                    self.converter = Some(c);
                    out
                }
            }
        };

        self.frame_buf.extend_from_slice(&converted);

        let mut segments = Vec::new();
        while self.frame_buf.len() >= FRAME_SIZE {
            let frame: Vec<f32> = self.frame_buf.drain(..FRAME_SIZE).collect();
            let prob = self.backend.process(&frame)?;
            segments.extend(self.machine.process_frame(&frame, prob, self.current_time_s));
            self.current_time_s += FRAME_SIZE as f64 / VAD_SAMPLE_RATE as f64;
        }
        Ok(segments)
    }

    /// Flush the open segment, if any.
    pub fn finalize(&mut self) -> Option<VadSegment> {
        self.machine.finalize()
    }

    /// Rebuild segmentation state and zero the clock.
    pub fn reset(&mut self) {
        self.backend.reset();
        self.machine.reset();
        self.converter = None;
        self.frame_buf.clear();
        self.current_time_s = 0.0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Backend scripted by amplitude: loud frames are speech.
    struct AmplitudeBackend;

    impl VadBackend for AmplitudeBackend {
        fn process(&mut self, frame: &[f32]) -> Result<f32, VadError> {
            let peak = frame.iter().fold(0f32, |m, s| m.max(s.abs()));
            Ok(if peak > 0.1 { 1.0 } else { 0.0 })
        }

        fn reset(&mut self) {}

        fn name(&self) -> &'static str {
            "amplitude-test"
        }
    }

    fn processor() -> VadProcessor {
        VadProcessor::new(Box::new(AmplitudeBackend), VadConfig::default()).unwrap()
    }

    #[test]
    fn time_advances_one_frame_per_frame_regardless_of_chunking() {
        let mut p = processor();
        // 3 chunks of uneven sizes totalling 4 frames
        p.process_chunk(&vec![0.0; 700], VAD_SAMPLE_RATE).unwrap();
        p.process_chunk(&vec![0.0; 1000], VAD_SAMPLE_RATE).unwrap();
        p.process_chunk(&vec![0.0; 348], VAD_SAMPLE_RATE).unwrap();
        let expected = 4.0 * FRAME_SIZE as f64 / VAD_SAMPLE_RATE as f64;
        assert!((p.current_time_s() - expected).abs() < 1e-9);
    }

    #[test]
    fn detects_speech_burst_between_silences() {
        let mut p = processor();
        let mut segments = Vec::new();
        segments.extend(p.process_chunk(&vec![0.0; 16_000], VAD_SAMPLE_RATE).unwrap());
        segments.extend(p.process_chunk(&vec![0.5; 16_000], VAD_SAMPLE_RATE).unwrap());
        segments.extend(p.process_chunk(&vec![0.0; 16_000], VAD_SAMPLE_RATE).unwrap());
        let finals: Vec<_> = segments.iter().filter(|s| s.is_final).collect();
        assert_eq!(finals.len(), 1);
        let seg = finals[0];
        assert!(seg.start_time_s > 0.8 && seg.start_time_s < 1.0, "{}", seg.start_time_s);
        assert!(seg.end_time_s > 2.0 && seg.end_time_s < 2.3, "{}", seg.end_time_s);
    }

    #[test]
    fn resamples_48k_input() {
        let mut p = processor();
        let mut segments = Vec::new();
        // 1 s silence, 1 s tone, 1 s silence at 48 kHz
        segments.extend(p.process_chunk(&vec![0.0; 48_000], 48_000).unwrap());
        segments.extend(p.process_chunk(&vec![0.5; 48_000], 48_000).unwrap());
        segments.extend(p.process_chunk(&vec![0.0; 48_000], 48_000).unwrap());
        if let Some(seg) = p.finalize() {
            segments.push(seg);
        }
        let finals = segments.iter().filter(|s| s.is_final).count();
        assert_eq!(finals, 1);
    }

    #[test]
    fn reset_zeroes_clock_and_state() {
        let mut p = processor();
        p.process_chunk(&vec![0.5; 16_000], VAD_SAMPLE_RATE).unwrap();
        p.reset();
        assert_eq!(p.current_time_s(), 0.0);
        assert!(p.finalize().is_none());
    }

    #[test]
    fn from_language_rejects_unknown() {
        let err = match VadProcessor::from_language("tlh") {
            Err(e) => e,
            Ok(_) => panic!("expected from_language(\"tlh\") to fail"),
        };
        match err {
            VadError::UnsupportedLanguage { lang, supported } => {
                assert_eq!(lang, "tlh");
                assert!(supported.contains(&"ja"));
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn from_language_normalizes_region_tags() {
        // zh-CN normalizes to zh, which has a preset.
        assert!(VadProcessor::from_language("zh-CN").is_ok());
    }
}
