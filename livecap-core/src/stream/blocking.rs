//! Blocking iterator surface.
//!
//! Drives the source, the VAD, the engine, and the translation hook all on
//! the calling thread. Interim records for a segment always precede its
//! final; on source exhaustion the VAD is flushed and the residual segment
//! dispatched before iteration ends.

use std::collections::VecDeque;

use crate::audio::{AudioSource, SourceRead};
use crate::error::TranscriptionError;
use crate::results::TranscriptEvent;
use crate::stream::{StreamTranscriber, READ_TIMEOUT};
use crate::vad::VadSegment;

/// Lazy blocking sequence of transcript events.
///
/// Engine errors are yielded as items; iteration continues afterwards and
/// the session stays usable (callers typically `reset()` on error).
pub struct SyncTranscription<'a, S: AudioSource> {
    transcriber: &'a mut StreamTranscriber,
    source: S,
    pending: VecDeque<TranscriptEvent>,
    started: bool,
    finished: bool,
}

impl<'a, S: AudioSource> SyncTranscription<'a, S> {
    pub(crate) fn new(transcriber: &'a mut StreamTranscriber, source: S) -> Self {
        Self {
            transcriber,
            source,
            pending: VecDeque::new(),
            started: false,
            finished: false,
        }
    }

    fn dispatch_segment(&mut self, segment: VadSegment) -> Result<(), TranscriptionError> {
        let transcription = self.transcriber.transcribe_segment(&segment)?;
        if segment.is_final {
            if let Some(result) = self.transcriber.build_final(&segment, transcription) {
                self.pending.push_back(TranscriptEvent::Final(result));
            }
        } else if let Some(interim) = self.transcriber.build_interim(&segment, transcription) {
            self.pending.push_back(TranscriptEvent::Interim(interim));
        }
        Ok(())
    }

    fn flush_residual(&mut self) -> Result<(), TranscriptionError> {
        if let Some(segment) = self.transcriber.processor.finalize() {
            self.dispatch_segment(segment)?;
        }
        Ok(())
    }
}

impl<S: AudioSource> Iterator for SyncTranscription<'_, S> {
    type Item = Result<TranscriptEvent, TranscriptionError>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            if let Some(event) = self.pending.pop_front() {
                return Some(Ok(event));
            }
            if self.finished {
                return None;
            }
            if !self.started {
                self.started = true;
                if let Err(e) = self.source.start() {
                    self.finished = true;
                    return Some(Err(e.into()));
                }
            }

            match self.source.read(READ_TIMEOUT) {
                Err(e) => {
                    self.finished = true;
                    self.source.close();
                    return Some(Err(e.into()));
                }
                Ok(SourceRead::Timeout) => continue,
                Ok(SourceRead::Exhausted) => {
                    self.finished = true;
                    let flush = self.flush_residual();
                    self.source.close();
                    if let Err(e) = flush {
                        return Some(Err(e));
                    }
                }
                Ok(SourceRead::Chunk(chunk)) => {
                    self.transcriber
                        .diagnostics
                        .bump(&self.transcriber.diagnostics.chunks_in);
                    let segments = match self
                        .transcriber
                        .processor
                        .process_chunk(&chunk.samples, chunk.sample_rate)
                    {
                        Ok(segments) => segments,
                        Err(e) => return Some(Err(e.into())),
                    };
                    for segment in segments {
                        if let Err(e) = self.dispatch_segment(segment) {
                            return Some(Err(e));
                        }
                    }
                }
            }
        }
    }
}

impl<S: AudioSource> Drop for SyncTranscription<'_, S> {
    fn drop(&mut self) {
        if !self.finished {
            self.source.close();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::FileSource;
    use crate::engine::stub::StubEngine;
    use crate::engine::EngineHandle;
    use crate::stream::StreamTranscriber;
    use crate::vad::config::VadConfig;
    use crate::vad::processor::VadProcessor;
    use crate::vad::{VadBackend, VAD_SAMPLE_RATE};
    use crate::error::VadError;

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

    fn session(engine: StubEngine) -> StreamTranscriber {
        let processor =
            VadProcessor::new(Box::new(AmplitudeBackend), VadConfig::default()).unwrap();
        StreamTranscriber::builder(EngineHandle::new(engine.pre_loaded()))
            .vad_processor(processor)
            .source_id("test")
            .build()
            .unwrap()
    }

    /// 1 s silence, 1.5 s tone, 1 s silence.
    fn tone_burst() -> Vec<f32> {
        let mut pcm = vec![0.0f32; 16_000];
        pcm.extend(vec![0.5f32; 24_000]);
        pcm.extend(vec![0.0f32; 16_000]);
        pcm
    }

    #[test]
    fn yields_one_final_for_one_burst() {
        let mut t = session(StubEngine::with_responses(["hello world"]));
        let source = FileSource::from_samples(tone_burst(), VAD_SAMPLE_RATE, false);
        let events: Vec<_> = t
            .transcribe_sync(source)
            .collect::<Result<Vec<_>, _>>()
            .unwrap();
        let finals: Vec<_> = events.iter().filter_map(|e| e.as_final()).collect();
        assert_eq!(finals.len(), 1);
        assert_eq!(finals[0].text, "hello world");
        assert_eq!(finals[0].source_id, "test");
        assert!(finals[0].start_time_s < finals[0].end_time_s);
    }

    #[test]
    fn residual_segment_flushes_on_exhaustion() {
        // Tone runs to the end of the file: no trailing silence to close it.
        let mut pcm = vec![0.0f32; 16_000];
        pcm.extend(vec![0.5f32; 24_000]);
        let mut t = session(StubEngine::with_responses(["tail"]));
        let source = FileSource::from_samples(pcm, VAD_SAMPLE_RATE, false);
        let events: Vec<_> = t
            .transcribe_sync(source)
            .collect::<Result<Vec<_>, _>>()
            .unwrap();
        let finals: Vec<_> = events.iter().filter_map(|e| e.as_final()).collect();
        assert_eq!(finals.len(), 1);
        assert_eq!(finals[0].text, "tail");
    }

    #[test]
    fn empty_transcriptions_are_skipped() {
        // Scripted stub returns empty after the script runs out.
        let mut t = session(StubEngine::with_responses(Vec::<String>::new()));
        let source = FileSource::from_samples(tone_burst(), VAD_SAMPLE_RATE, false);
        let events: Vec<_> = t
            .transcribe_sync(source)
            .collect::<Result<Vec<_>, _>>()
            .unwrap();
        assert!(events.is_empty());
    }

    #[test]
    fn silence_only_yields_nothing() {
        let mut t = session(StubEngine::with_responses(["never"]));
        let source = FileSource::from_samples(vec![0.0; 48_000], VAD_SAMPLE_RATE, false);
        let events: Vec<_> = t
            .transcribe_sync(source)
            .collect::<Result<Vec<_>, _>>()
            .unwrap();
        assert!(events.is_empty());
    }
}
