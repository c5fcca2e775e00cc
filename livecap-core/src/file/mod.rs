//! Batch file pipeline: demux → segment → transcribe → subtitle track.
//!
//! The pipeline shares the engine contract and translation hook with the
//! streaming path but owns nothing long-lived: every `process_file` call
//! decodes, segments, transcribes span by span, optionally translates with
//! a fresh per-file context buffer, and assembles a 1-based subtitle list.

pub mod demux;
pub mod segment;

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use tracing::{info, warn};

use crate::engine::Transcription;
use crate::error::{EngineError, FileError};
use crate::results::FileSubtitleSegment;
use crate::translate::{translate_with_timeout, ContextBuffer, Translator};

pub use demux::{AutoDemuxer, Demuxer, FfmpegDemuxer, WavDemuxer, DEMUX_SAMPLE_RATE};
pub use segment::{SegmentSpan, Segmenter, SilenceSegmenter, VadSegmenter};

/// Per-span transcriber: `(audio, sample_rate) -> transcription`.
pub type SegmentTranscriber<'a> =
    dyn FnMut(&[f32], u32) -> Result<Transcription, EngineError> + 'a;

/// Options for one `process_file` call.
pub struct FileOptions {
    pub translator: Option<Arc<dyn Translator>>,
    pub source_lang: Option<String>,
    pub target_lang: Option<String>,
    /// Per-segment translation deadline; `None` uses the resource default.
    pub translation_timeout: Option<Duration>,
    pub write_subtitles: bool,
    pub write_translated_subtitles: bool,
    /// Explicit `.srt` path; `None` derives from the input stem.
    pub output_path: Option<PathBuf>,
}

impl Default for FileOptions {
    fn default() -> Self {
        Self {
            translator: None,
            source_lang: None,
            target_lang: None,
            translation_timeout: None,
            write_subtitles: true,
            write_translated_subtitles: false,
            output_path: None,
        }
    }
}

/// Outcome of one file.
#[derive(Debug)]
pub struct FileProcessingResult {
    pub success: bool,
    pub subtitles: Vec<FileSubtitleSegment>,
    pub output_path: Option<PathBuf>,
    pub translated_output_path: Option<PathBuf>,
}

/// Callbacks for the multi-file driver. All optional.
#[derive(Default)]
pub struct BatchCallbacks<'a> {
    /// `(index, total, path)` before each file.
    pub on_progress: Option<&'a mut dyn FnMut(usize, usize, &Path)>,
    /// Free-form status lines.
    pub on_status: Option<&'a mut dyn FnMut(&str)>,
    /// After each successfully processed file.
    pub on_result: Option<&'a mut dyn FnMut(&Path, &FileProcessingResult)>,
    /// After each failed file; the batch continues.
    pub on_error: Option<&'a mut dyn FnMut(&Path, &FileError)>,
    /// Polled between files only — never between segments of one file.
    pub should_cancel: Option<&'a dyn Fn() -> bool>,
}

/// Demux + segment + transcribe pipeline.
pub struct FilePipeline {
    demuxer: Box<dyn Demuxer>,
    segmenter: Box<dyn Segmenter>,
}

impl FilePipeline {
    pub fn new(demuxer: Box<dyn Demuxer>, segmenter: Box<dyn Segmenter>) -> Self {
        Self { demuxer, segmenter }
    }

    /// Auto demuxer (WAV in-process, ffmpeg otherwise) + VAD segmenter.
    pub fn with_defaults() -> Result<Self, FileError> {
        Ok(Self::new(
            Box::new(AutoDemuxer),
            Box::new(VadSegmenter::with_defaults()?),
        ))
    }

    /// Transcribe one file into a subtitle track.
    pub fn process_file(
        &mut self,
        path: &Path,
        transcriber: &mut SegmentTranscriber<'_>,
        options: &FileOptions,
    ) -> Result<FileProcessingResult, FileError> {
        info!(path = ?path, "processing file");
        let pcm = self.demuxer.decode(path)?;
        let spans = self.segmenter.segment(&pcm, DEMUX_SAMPLE_RATE)?;
        info!(spans = spans.len(), seconds = pcm.len() / DEMUX_SAMPLE_RATE as usize, "file segmented");

        // Transcribe each span in order.
        let mut rows: Vec<(SegmentSpan, String)> = Vec::with_capacity(spans.len());
        for span in spans {
            let a = ((span.start_s * DEMUX_SAMPLE_RATE as f64) as usize).min(pcm.len());
            let b = ((span.end_s * DEMUX_SAMPLE_RATE as f64) as usize).clamp(a, pcm.len());
            let transcription = transcriber(&pcm[a..b], DEMUX_SAMPLE_RATE)?;
            rows.push((span, transcription.text));
        }

        // Optional per-file translation with its own context window.
        let translations = self.translate_rows(&rows, options);

        let mut subtitles = Vec::with_capacity(rows.len());
        for (index, ((span, text), translated)) in
            rows.into_iter().zip(translations).enumerate()
        {
            let target_language = translated
                .is_some()
                .then(|| options.target_lang.clone())
                .flatten();
            subtitles.push(FileSubtitleSegment {
                index: index + 1,
                start_s: span.start_s,
                end_s: span.end_s,
                text,
                metadata: HashMap::new(),
                translated_text: translated,
                target_language,
            });
        }

        let output_path = if options.write_subtitles {
            let out = options
                .output_path
                .clone()
                .unwrap_or_else(|| path.with_extension("srt"));
            write_srt(&out, &subtitles, false)?;
            Some(out)
        } else {
            None
        };

        let translated_output_path = if options.write_translated_subtitles {
            let target = options.target_lang.as_deref().unwrap_or("translated");
            let base = options
                .output_path
                .clone()
                .unwrap_or_else(|| path.with_extension("srt"));
            let out = with_stem_suffix(&base, target);
            write_srt(&out, &subtitles, true)?;
            Some(out)
        } else {
            None
        };

        Ok(FileProcessingResult {
            success: true,
            subtitles,
            output_path,
            translated_output_path,
        })
    }

    /// Process many files, reporting through `callbacks`.
    ///
    /// A failing file is reported and skipped; the batch only stops when
    /// `should_cancel` returns true between files.
    pub fn process_files(
        &mut self,
        paths: &[PathBuf],
        transcriber: &mut SegmentTranscriber<'_>,
        options: &FileOptions,
        callbacks: &mut BatchCallbacks<'_>,
    ) -> Result<Vec<FileProcessingResult>, FileError> {
        let mut results = Vec::with_capacity(paths.len());
        for (i, path) in paths.iter().enumerate() {
            if let Some(should_cancel) = callbacks.should_cancel {
                if should_cancel() {
                    warn!(processed = i, total = paths.len(), "batch cancelled");
                    return Err(FileError::Cancelled);
                }
            }
            if let Some(on_progress) = callbacks.on_progress.as_deref_mut() {
                on_progress(i, paths.len(), path);
            }
            if let Some(on_status) = callbacks.on_status.as_deref_mut() {
                on_status(&format!("processing {}", path.display()));
            }

            match self.process_file(path, transcriber, options) {
                Ok(result) => {
                    if let Some(on_result) = callbacks.on_result.as_deref_mut() {
                        on_result(path, &result);
                    }
                    results.push(result);
                }
                Err(e) => {
                    warn!(path = ?path, error = %e, "file failed — continuing batch");
                    if let Some(on_error) = callbacks.on_error.as_deref_mut() {
                        on_error(path, &e);
                    }
                }
            }
        }
        Ok(results)
    }

    fn translate_rows(
        &self,
        rows: &[(SegmentSpan, String)],
        options: &FileOptions,
    ) -> Vec<Option<String>> {
        let (Some(translator), Some(source), Some(target)) = (
            options.translator.as_ref(),
            options.source_lang.as_deref(),
            options.target_lang.as_deref(),
        ) else {
            return vec![None; rows.len()];
        };

        let timeout = options
            .translation_timeout
            .unwrap_or_else(crate::resources::translation_timeout);
        let wanted = translator.default_context_sentences();
        let mut context = ContextBuffer::new();

        rows.iter()
            .map(|(_, text)| {
                if text.is_empty() {
                    return None;
                }
                let recent = context.recent(wanted);
                let translated = match translate_with_timeout(
                    translator, text, source, target, &recent, timeout,
                ) {
                    Ok(t) if !t.text.is_empty() => Some(t.text),
                    Ok(_) => None,
                    Err(e) => {
                        warn!(error = %e, "segment translation failed — leaving untranslated");
                        None
                    }
                };
                context.push(text.clone());
                translated
            })
            .collect()
    }
}

/// Write a subtitle list as UTF-8 SRT with LF endings and a blank line
/// between entries.
pub fn write_srt(
    path: &Path,
    subtitles: &[FileSubtitleSegment],
    translated: bool,
) -> Result<(), FileError> {
    let body: String = subtitles
        .iter()
        .map(|s| {
            if translated {
                s.to_srt_entry_translated()
            } else {
                s.to_srt_entry()
            }
        })
        .collect::<Vec<_>>()
        .join("\n");
    std::fs::write(path, body).map_err(|source| FileError::WriteSubtitle {
        path: path.to_path_buf(),
        source,
    })
}

fn with_stem_suffix(path: &Path, suffix: &str) -> PathBuf {
    let stem = path
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default();
    let ext = path
        .extension()
        .map(|e| e.to_string_lossy().into_owned())
        .unwrap_or_else(|| "srt".into());
    path.with_file_name(format!("{stem}.{suffix}.{ext}"))
}

#[cfg(test)]
mod tests {
    use super::*;

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

    fn spans_30s() -> Vec<SegmentSpan> {
        vec![
            SegmentSpan { start_s: 0.0, end_s: 10.0 },
            SegmentSpan { start_s: 10.0, end_s: 20.0 },
            SegmentSpan { start_s: 20.0, end_s: 30.0 },
        ]
    }

    fn pipeline_30s() -> FilePipeline {
        FilePipeline::new(
            Box::new(StaticDemuxer(vec![0.1; 30 * DEMUX_SAMPLE_RATE as usize])),
            Box::new(StaticSegmenter(spans_30s())),
        )
    }

    #[test]
    fn subtitles_are_indexed_and_bounded() {
        let mut pipeline = pipeline_30s();
        let texts = ["a", "b", "c"];
        let mut i = 0;
        let mut transcriber = |_audio: &[f32], _sr: u32| {
            let t = Transcription {
                text: texts[i].to_string(),
                confidence: 1.0,
            };
            i += 1;
            Ok(t)
        };
        let options = FileOptions {
            write_subtitles: false,
            ..FileOptions::default()
        };
        let result = pipeline
            .process_file(Path::new("clip.mp4"), &mut transcriber, &options)
            .unwrap();

        assert!(result.success);
        let idx: Vec<_> = result.subtitles.iter().map(|s| s.index).collect();
        assert_eq!(idx, vec![1, 2, 3]);
        assert_eq!(result.subtitles[0].text, "a");
        assert_eq!(result.subtitles[2].end_s, 30.0);
        assert_eq!(
            result.subtitles[0].to_srt_entry(),
            "1\n00:00:00,000 --> 00:00:10,000\na\n"
        );
        assert!(result.output_path.is_none());
    }

    #[test]
    fn srt_file_is_written_with_blank_lines_between_entries() {
        let dir = tempfile::tempdir().unwrap();
        let out = dir.path().join("clip.srt");
        let mut pipeline = pipeline_30s();
        let mut transcriber =
            |_a: &[f32], _sr: u32| Ok(Transcription { text: "x".into(), confidence: 1.0 });
        let options = FileOptions {
            output_path: Some(out.clone()),
            ..FileOptions::default()
        };
        pipeline
            .process_file(Path::new("clip.mp4"), &mut transcriber, &options)
            .unwrap();

        let written = std::fs::read_to_string(&out).unwrap();
        assert!(written.contains("1\n00:00:00,000 --> 00:00:10,000\nx\n\n2\n"));
        assert!(!written.contains('\r'));
    }

    #[test]
    fn segment_transcription_failure_fails_the_file() {
        let mut pipeline = pipeline_30s();
        let mut transcriber =
            |_a: &[f32], _sr: u32| Err(EngineError::Inference("broken".into()));
        let err = pipeline
            .process_file(
                Path::new("clip.mp4"),
                &mut transcriber,
                &FileOptions {
                    write_subtitles: false,
                    ..FileOptions::default()
                },
            )
            .unwrap_err();
        assert!(matches!(
            err,
            FileError::Transcription(EngineError::Inference(_))
        ));
        assert!(err.to_string().starts_with("transcription failed:"));
    }

    #[test]
    fn batch_reports_errors_and_continues() {
        let mut pipeline = FilePipeline::new(
            Box::new(StaticDemuxer(vec![0.1; DEMUX_SAMPLE_RATE as usize])),
            Box::new(StaticSegmenter(vec![SegmentSpan { start_s: 0.0, end_s: 1.0 }])),
        );
        let mut call = 0usize;
        let mut transcriber = |_a: &[f32], _sr: u32| {
            call += 1;
            if call == 1 {
                Err(EngineError::Inference("first file breaks".into()))
            } else {
                Ok(Transcription { text: "fine".into(), confidence: 1.0 })
            }
        };
        let paths = vec![PathBuf::from("a.wav"), PathBuf::from("b.wav")];
        let mut errors = 0usize;
        let mut oks = 0usize;
        let mut on_error = |_p: &Path, _e: &FileError| errors += 1;
        let mut on_result = |_p: &Path, _r: &FileProcessingResult| oks += 1;
        let mut callbacks = BatchCallbacks {
            on_error: Some(&mut on_error),
            on_result: Some(&mut on_result),
            ..BatchCallbacks::default()
        };
        let results = pipeline
            .process_files(
                &paths,
                &mut transcriber,
                &FileOptions {
                    write_subtitles: false,
                    ..FileOptions::default()
                },
                &mut callbacks,
            )
            .unwrap();
        assert_eq!(results.len(), 1);
        assert_eq!(errors, 1);
        assert_eq!(oks, 1);
    }

    #[test]
    fn cancel_between_files_stops_the_batch() {
        let mut pipeline = FilePipeline::new(
            Box::new(StaticDemuxer(vec![0.1; DEMUX_SAMPLE_RATE as usize])),
            Box::new(StaticSegmenter(vec![])),
        );
        let mut transcriber =
            |_a: &[f32], _sr: u32| Ok(Transcription { text: String::new(), confidence: 0.0 });
        let cancel = || true;
        let mut callbacks = BatchCallbacks {
            should_cancel: Some(&cancel),
            ..BatchCallbacks::default()
        };
        let err = pipeline
            .process_files(
                &[PathBuf::from("a.wav")],
                &mut transcriber,
                &FileOptions::default(),
                &mut callbacks,
            )
            .unwrap_err();
        assert!(matches!(err, FileError::Cancelled));
    }

    #[test]
    fn stem_suffix_inserts_language() {
        assert_eq!(
            with_stem_suffix(Path::new("/x/clip.srt"), "ja"),
            PathBuf::from("/x/clip.ja.srt")
        );
    }
}
