//! Batch pipeline scenarios with injected demuxer/segmenter stubs.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use livecap_core::engine::Transcription;
use livecap_core::error::{FileError, TranslationError};
use livecap_core::file::{
    Demuxer, FileOptions, FilePipeline, SegmentSpan, Segmenter, DEMUX_SAMPLE_RATE,
};
use livecap_core::results::{parse_srt_entry, TranslationResult};
use livecap_core::translate::Translator;

struct StaticDemuxer(Vec<f32>);

impl Demuxer for StaticDemuxer {
    fn decode(&self, _path: &Path) -> Result<Vec<f32>, FileError> {
        Ok(self.0.clone())
    }
}

struct StaticSegmenter(Vec<SegmentSpan>);

impl Segmenter for StaticSegmenter {
    fn segment(&mut self, _pcm: &[f32], _sr: u32) -> Result<Vec<SegmentSpan>, FileError> {
        Ok(self.0.clone())
    }
}

fn thirty_second_pipeline() -> FilePipeline {
    FilePipeline::new(
        Box::new(StaticDemuxer(vec![0.1; 30 * DEMUX_SAMPLE_RATE as usize])),
        Box::new(StaticSegmenter(vec![
            SegmentSpan { start_s: 0.0, end_s: 10.0 },
            SegmentSpan { start_s: 10.0, end_s: 20.0 },
            SegmentSpan { start_s: 20.0, end_s: 30.0 },
        ])),
    )
}

fn scripted_transcriber(
    texts: &'static [&'static str],
) -> impl FnMut(&[f32], u32) -> Result<Transcription, livecap_core::EngineError> {
    let mut i = 0;
    move |_audio, _sr| {
        let text = texts.get(i).copied().unwrap_or_default().to_string();
        i += 1;
        Ok(Transcription {
            text,
            confidence: 1.0,
        })
    }
}

#[test]
fn thirty_second_file_produces_three_indexed_subtitles() {
    let mut pipeline = thirty_second_pipeline();
    let mut transcriber = scripted_transcriber(&["a", "b", "c"]);
    let result = pipeline
        .process_file(
            Path::new("clip.mp4"),
            &mut transcriber,
            &FileOptions {
                write_subtitles: false,
                ..FileOptions::default()
            },
        )
        .unwrap();

    assert!(result.success);
    assert_eq!(
        result.subtitles.iter().map(|s| s.index).collect::<Vec<_>>(),
        vec![1, 2, 3]
    );
    for (subtitle, (start, end, text)) in result
        .subtitles
        .iter()
        .zip([(0.0, 10.0, "a"), (10.0, 20.0, "b"), (20.0, 30.0, "c")])
    {
        assert_eq!(subtitle.start_s, start);
        assert_eq!(subtitle.end_s, end);
        assert_eq!(subtitle.text, text);
    }
    assert_eq!(
        result.subtitles[0].to_srt_entry(),
        "1\n00:00:00,000 --> 00:00:10,000\na\n"
    );
}

#[test]
fn srt_entries_round_trip_through_the_parser() {
    let mut pipeline = thirty_second_pipeline();
    let mut transcriber = scripted_transcriber(&["first line", "second", "third"]);
    let result = pipeline
        .process_file(
            Path::new("clip.mp4"),
            &mut transcriber,
            &FileOptions {
                write_subtitles: false,
                ..FileOptions::default()
            },
        )
        .unwrap();

    for subtitle in &result.subtitles {
        let (index, start, end, text) = parse_srt_entry(&subtitle.to_srt_entry()).unwrap();
        assert_eq!(index, subtitle.index);
        assert_eq!(start, subtitle.start_s);
        assert_eq!(end, subtitle.end_s);
        assert_eq!(text, subtitle.text);
    }
}

struct UppercaseTranslator;

impl Translator for UppercaseTranslator {
    fn translator_name(&self) -> &str {
        "uppercase"
    }

    fn translate(
        &self,
        text: &str,
        source: &str,
        target: &str,
        _context: &[String],
    ) -> Result<TranslationResult, TranslationError> {
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
        Err(TranslationError::Network("no backend".into()))
    }
}

#[test]
fn translated_subtitles_write_a_language_suffixed_file() {
    let dir = tempfile::tempdir().unwrap();
    let out = dir.path().join("clip.srt");
    let mut pipeline = thirty_second_pipeline();
    let mut transcriber = scripted_transcriber(&["a", "b", "c"]);
    let options = FileOptions {
        translator: Some(Arc::new(UppercaseTranslator)),
        source_lang: Some("en".into()),
        target_lang: Some("ja".into()),
        write_subtitles: true,
        write_translated_subtitles: true,
        output_path: Some(out.clone()),
        ..FileOptions::default()
    };
    let result = pipeline
        .process_file(Path::new("clip.mp4"), &mut transcriber, &options)
        .unwrap();

    assert_eq!(result.output_path.as_deref(), Some(out.as_path()));
    let translated = result.translated_output_path.expect("translated path");
    assert_eq!(translated, PathBuf::from(dir.path().join("clip.ja.srt")));

    let original = std::fs::read_to_string(&out).unwrap();
    assert!(original.contains("\na\n"));
    let translated_body = std::fs::read_to_string(&translated).unwrap();
    assert!(translated_body.contains("\nA\n"));
    for subtitle in &result.subtitles {
        assert_eq!(subtitle.target_language.as_deref(), Some("ja"));
    }
}

#[test]
fn translation_errors_degrade_per_segment_without_failing_the_file() {
    let mut pipeline = thirty_second_pipeline();
    let mut transcriber = scripted_transcriber(&["a", "b", "c"]);
    let options = FileOptions {
        translator: Some(Arc::new(FailingTranslator)),
        source_lang: Some("en".into()),
        target_lang: Some("ja".into()),
        write_subtitles: false,
        ..FileOptions::default()
    };
    let result = pipeline
        .process_file(Path::new("clip.mp4"), &mut transcriber, &options)
        .unwrap();

    assert!(result.success);
    assert_eq!(result.subtitles.len(), 3);
    for subtitle in &result.subtitles {
        assert!(subtitle.translated_text.is_none());
        assert!(subtitle.target_language.is_none());
        assert!(!subtitle.text.is_empty());
    }
}
