//! End-to-end streaming scenarios over scripted backends and stub engines.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use livecap_core::audio::FileSource;
use livecap_core::engine::registry::{EngineParams, ParamValue};
use livecap_core::engine::stub::StubEngine;
use livecap_core::engine::EngineHandle;
use livecap_core::error::{TranslationError, VadError};
use livecap_core::results::TranslationResult;
use livecap_core::translate::Translator;
use livecap_core::vad::processor::VadProcessor;
use livecap_core::vad::tenvad::TenVadBackend;
use livecap_core::vad::{VadBackend, VAD_SAMPLE_RATE};
use livecap_core::{StreamTranscriber, TranscriptEvent, VadConfig};

/// Scripted backend: frame amplitude decides speech, like a well-behaved
/// neural VAD on clean audio.
struct AmplitudeBackend;

impl VadBackend for AmplitudeBackend {
    fn process(&mut self, frame: &[f32]) -> Result<f32, VadError> {
        let peak = frame.iter().fold(0f32, |m, s| m.max(s.abs()));
        Ok(if peak > 0.1 { 1.0 } else { 0.0 })
    }

    fn reset(&mut self) {}

    fn name(&self) -> &'static str {
        "amplitude-scripted"
    }
}

fn amplitude_processor() -> VadProcessor {
    VadProcessor::new(Box::new(AmplitudeBackend), VadConfig::default()).unwrap()
}

fn constant_text_engine(text: &str) -> StubEngine {
    let params = EngineParams::merged(
        &[
            ("text", ParamValue::from(text)),
            ("language", ParamValue::from("ja")),
        ],
        &[],
    );
    StubEngine::from_params(params).pre_loaded()
}

fn collect_sync(
    transcriber: &mut StreamTranscriber,
    pcm: Vec<f32>,
) -> Vec<TranscriptEvent> {
    let source = FileSource::from_samples(pcm, VAD_SAMPLE_RATE, false);
    transcriber
        .transcribe_sync(source)
        .collect::<Result<Vec<_>, _>>()
        .unwrap()
}

#[test]
fn single_japanese_clip_yields_one_final_with_expected_bounds() {
    let reference = "水をマレーシアから買わなくてはならないのです。";
    let mut transcriber = StreamTranscriber::builder(EngineHandle::new(constant_text_engine(
        reference,
    )))
    .vad_processor(amplitude_processor())
    .build()
    .unwrap();

    // 3.19 s of voiced audio from t = 0.
    let pcm = vec![0.5f32; (3.19 * VAD_SAMPLE_RATE as f64) as usize];
    let events = collect_sync(&mut transcriber, pcm);

    let finals: Vec<_> = events.iter().filter_map(|e| e.as_final()).collect();
    assert_eq!(finals.len(), 1, "expected exactly one final result");
    let result = finals[0];
    assert_eq!(result.text, reference);
    assert!(result.start_time_s.abs() <= 0.1, "start {}", result.start_time_s);
    assert!(
        (result.end_time_s - 3.19).abs() <= 0.2,
        "end {}",
        result.end_time_s
    );
}

#[test]
fn near_silent_noise_yields_nothing() {
    // 10 s of white noise at 1e-6 amplitude through the real DSP backend.
    let mut transcriber = StreamTranscriber::builder(EngineHandle::new(constant_text_engine(
        "should never appear",
    )))
    .vad_processor(VadProcessor::new(Box::new(TenVadBackend::new()), VadConfig::default()).unwrap())
    .build()
    .unwrap();

    let pcm: Vec<f32> = (0..10 * VAD_SAMPLE_RATE as usize)
        .map(|i| if i % 2 == 0 { 1e-6 } else { -1e-6 })
        .collect();
    let events = collect_sync(&mut transcriber, pcm);
    assert!(events.is_empty(), "silence produced {} events", events.len());
}

#[test]
fn two_tones_split_into_two_ordered_finals() {
    let mut transcriber = StreamTranscriber::builder(EngineHandle::new(constant_text_engine(
        "tone",
    )))
    .vad_processor(amplitude_processor())
    .build()
    .unwrap();

    let mut pcm = vec![0.0f32; 8_000]; // 0.5 s lead-in
    pcm.extend(vec![0.5f32; 16_000]); // tone 1
    pcm.extend(vec![0.0f32; 8_000]); // 0.5 s gap > min_silence
    pcm.extend(vec![0.5f32; 16_000]); // tone 2
    pcm.extend(vec![0.0f32; 8_000]);

    let events = collect_sync(&mut transcriber, pcm);
    let finals: Vec<_> = events.iter().filter_map(|e| e.as_final()).collect();
    assert_eq!(finals.len(), 2);
    assert!(
        finals[1].start_time_s > finals[0].end_time_s,
        "second segment must start after the first ends: {} vs {}",
        finals[1].start_time_s,
        finals[0].end_time_s
    );
}

#[test]
fn segment_durations_never_exceed_input_duration() {
    let mut transcriber = StreamTranscriber::builder(EngineHandle::new(constant_text_engine(
        "seg",
    )))
    .vad_processor(amplitude_processor())
    .build()
    .unwrap();

    let mut pcm = Vec::new();
    for _ in 0..4 {
        pcm.extend(vec![0.0f32; 9_000]);
        pcm.extend(vec![0.5f32; 20_000]);
    }
    pcm.extend(vec![0.0f32; 9_000]);
    let total_duration = pcm.len() as f64 / VAD_SAMPLE_RATE as f64;

    let events = collect_sync(&mut transcriber, pcm);
    let summed: f64 = events
        .iter()
        .filter_map(|e| e.as_final())
        .map(|r| r.end_time_s - r.start_time_s)
        .sum();
    assert!(
        summed <= total_duration,
        "segments ({summed:.2}s) exceed input ({total_duration:.2}s)"
    );

    let snap = transcriber.diagnostics_snapshot();
    assert_eq!(snap.segments_final, 4);
    assert!(snap.engine_calls >= 4);
    assert_eq!(snap.engine_errors, 0);
}

#[test]
fn final_start_times_are_monotone_over_a_session() {
    let mut transcriber = StreamTranscriber::builder(EngineHandle::new(constant_text_engine(
        "seg",
    )))
    .vad_processor(amplitude_processor())
    .build()
    .unwrap();

    let mut pcm = Vec::new();
    for _ in 0..5 {
        pcm.extend(vec![0.0f32; 10_000]);
        pcm.extend(vec![0.5f32; 12_000]);
    }
    pcm.extend(vec![0.0f32; 10_000]);

    let events = collect_sync(&mut transcriber, pcm);
    let finals: Vec<_> = events.iter().filter_map(|e| e.as_final()).collect();
    assert!(finals.len() >= 4, "got {}", finals.len());
    for pair in finals.windows(2) {
        assert!(pair[1].start_time_s >= pair[0].start_time_s);
        assert!(pair[1].end_time_s >= pair[0].end_time_s);
    }
}

#[test]
fn interims_precede_their_final_and_grow_monotonically() {
    let config = VadConfig {
        interim_min_duration_ms: 640,
        interim_interval_ms: 320,
        ..VadConfig::default()
    };
    let mut transcriber = StreamTranscriber::builder(EngineHandle::new(constant_text_engine(
        "ongoing",
    )))
    .vad_processor(VadProcessor::new(Box::new(AmplitudeBackend), config).unwrap())
    .build()
    .unwrap();

    let mut pcm = vec![0.5f32; 48_000]; // 3 s of speech
    pcm.extend(vec![0.0f32; 12_000]);

    let events = collect_sync(&mut transcriber, pcm);
    let final_pos = events
        .iter()
        .position(|e| e.is_final())
        .expect("one final");
    let interim_durations: Vec<f64> = events[..final_pos]
        .iter()
        .filter_map(|e| e.as_interim())
        .map(|i| i.accumulated_time_s)
        .collect();
    assert!(
        interim_durations.len() >= 2,
        "expected interims before the final"
    );
    for pair in interim_durations.windows(2) {
        assert!(pair[1] > pair[0], "interims must strictly grow: {pair:?}");
    }
    // No interim events after the final of the segment.
    assert!(events[final_pos + 1..].iter().all(|e| e.is_final()));
}

// ── translation behavior ────────────────────────────────────────────────────

struct FailingTranslator;

impl Translator for FailingTranslator {
    fn translator_name(&self) -> &str {
        "failing"
    }

    fn translate(
        &self,
        _text: &str,
        _source: &str,
        _target: &str,
        _context: &[String],
    ) -> Result<TranslationResult, TranslationError> {
        Err(TranslationError::Model("always broken".into()))
    }
}

struct SleepyTranslator;

impl Translator for SleepyTranslator {
    fn translator_name(&self) -> &str {
        "sleepy"
    }

    fn translate(
        &self,
        text: &str,
        source: &str,
        target: &str,
        _context: &[String],
    ) -> Result<TranslationResult, TranslationError> {
        std::thread::sleep(Duration::from_secs(10));
        Ok(TranslationResult {
            text: text.to_string(),
            original_text: text.to_string(),
            source_lang: source.to_string(),
            target_lang: target.to_string(),
            confidence: None,
            source_id: String::new(),
        })
    }
}

/// Records the context handed to every call and answers uppercased text.
struct RecordingTranslator {
    contexts: Arc<Mutex<Vec<Vec<String>>>>,
}

impl Translator for RecordingTranslator {
    fn translator_name(&self) -> &str {
        "recording"
    }

    fn translate(
        &self,
        text: &str,
        source: &str,
        target: &str,
        context: &[String],
    ) -> Result<TranslationResult, TranslationError> {
        self.contexts.lock().unwrap().push(context.to_vec());
        Ok(TranslationResult {
            text: text.to_uppercase(),
            original_text: text.to_string(),
            source_lang: source.to_string(),
            target_lang: target.to_string(),
            confidence: Some(1.0),
            source_id: String::new(),
        })
    }
}

fn bursts(n: usize) -> Vec<f32> {
    let mut pcm = Vec::new();
    for _ in 0..n {
        pcm.extend(vec![0.0f32; 10_000]);
        pcm.extend(vec![0.5f32; 12_000]);
    }
    pcm.extend(vec![0.0f32; 10_000]);
    pcm
}

#[test]
fn failing_translator_degrades_to_untranslated_results() {
    let mut transcriber = StreamTranscriber::builder(EngineHandle::new(constant_text_engine(
        "hello",
    )))
    .vad_processor(amplitude_processor())
    .translator(Arc::new(FailingTranslator), "en", "ja")
    .build()
    .unwrap();

    let events = collect_sync(&mut transcriber, bursts(3));
    let finals: Vec<_> = events.iter().filter_map(|e| e.as_final()).collect();
    assert_eq!(finals.len(), 3);
    for result in finals {
        assert_eq!(result.text, "hello");
        assert!(result.translated_text.is_none());
        assert!(result.target_language.is_none());
    }
}

#[test]
fn slow_translator_times_out_without_delaying_transcription() {
    let mut transcriber = StreamTranscriber::builder(EngineHandle::new(constant_text_engine(
        "fast",
    )))
    .vad_processor(amplitude_processor())
    .translator(Arc::new(SleepyTranslator), "en", "ja")
    .translation_timeout(Duration::from_millis(100))
    .build()
    .unwrap();

    let started = Instant::now();
    let events = collect_sync(&mut transcriber, bursts(2));
    let elapsed = started.elapsed();

    let finals: Vec<_> = events.iter().filter_map(|e| e.as_final()).collect();
    assert_eq!(finals.len(), 2);
    for result in finals {
        assert_eq!(result.text, "fast");
        assert!(result.translated_text.is_none());
    }
    assert!(
        elapsed < Duration::from_secs(5),
        "timeouts must bound translation: {elapsed:?}"
    );
}

#[test]
fn context_grows_with_finalized_results_and_is_passed_in_order() {
    let contexts = Arc::new(Mutex::new(Vec::new()));
    let translator = RecordingTranslator {
        contexts: Arc::clone(&contexts),
    };
    let mut transcriber = StreamTranscriber::builder(EngineHandle::new(constant_text_engine(
        "line",
    )))
    .vad_processor(amplitude_processor())
    .translator(Arc::new(translator), "en", "ja")
    .build()
    .unwrap();

    let events = collect_sync(&mut transcriber, bursts(4));
    let finals = events.iter().filter(|e| e.is_final()).count();
    assert_eq!(finals, 4);

    let recorded = contexts.lock().unwrap();
    assert_eq!(recorded.len(), 4);
    // Call N sees min(N-1, default window) previous sentences.
    assert!(recorded[0].is_empty());
    assert_eq!(recorded[1].len(), 1);
    assert_eq!(recorded[2].len(), 2);
    assert_eq!(recorded[3].len(), 3);
    for result in events.iter().filter_map(|e| e.as_final()) {
        assert_eq!(result.translated_text.as_deref(), Some("LINE"));
        assert_eq!(result.target_language.as_deref(), Some("ja"));
    }
}

#[test]
fn engine_failure_surfaces_but_session_recovers_after_reset() {
    struct FlakyBackendEngine {
        inner: StubEngine,
        fail_next: Arc<AtomicUsize>,
    }

    // Wrap the stub: first transcription fails, later ones succeed.
    impl livecap_core::SpeechEngine for FlakyBackendEngine {
        fn engine_name(&self) -> &str {
            "flaky"
        }
        fn supported_languages(&self) -> Vec<&'static str> {
            self.inner.supported_languages()
        }
        fn params(&self) -> &EngineParams {
            self.inner.params()
        }
        fn is_loaded(&self) -> bool {
            true
        }
        fn check_deps(&mut self) -> Result<(), livecap_core::EngineError> {
            Ok(())
        }
        fn prepare_model_dir(&mut self) -> Result<std::path::PathBuf, livecap_core::EngineError> {
            Ok(std::env::temp_dir())
        }
        fn download_if_missing(
            &mut self,
            _progress: &mut dyn FnMut(u8, &str),
        ) -> Result<(), livecap_core::EngineError> {
            Ok(())
        }
        fn load_from_path(&mut self) -> Result<(), livecap_core::EngineError> {
            Ok(())
        }
        fn transcribe(
            &mut self,
            audio: &[f32],
            sample_rate: u32,
        ) -> Result<livecap_core::engine::Transcription, livecap_core::EngineError> {
            if self.fail_next.fetch_update(Ordering::SeqCst, Ordering::SeqCst, |v| {
                (v > 0).then(|| v - 1)
            }).is_ok()
            {
                return Err(livecap_core::EngineError::Inference("transient".into()));
            }
            self.inner.transcribe(audio, sample_rate)
        }
        fn cleanup(&mut self) {}
    }

    let engine = FlakyBackendEngine {
        inner: constant_text_engine("recovered"),
        fail_next: Arc::new(AtomicUsize::new(1)),
    };
    let mut transcriber = StreamTranscriber::builder(EngineHandle::new(engine))
        .vad_processor(amplitude_processor())
        .build()
        .unwrap();

    let source = FileSource::from_samples(bursts(2), VAD_SAMPLE_RATE, false);
    let events: Vec<_> = transcriber.transcribe_sync(source).collect();

    let errors = events.iter().filter(|e| e.is_err()).count();
    let finals = events
        .iter()
        .filter(|e| matches!(e, Ok(ev) if ev.is_final()))
        .count();
    assert_eq!(errors, 1, "first segment fails");
    assert_eq!(finals, 1, "second segment succeeds after the error");

    // The session object remains usable.
    transcriber.reset();
    let events = collect_sync(&mut transcriber, bursts(1));
    assert_eq!(events.iter().filter(|e| e.is_final()).count(), 1);
}
