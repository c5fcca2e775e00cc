//! Cooperative async iterator surface.
//!
//! The driving task owns the VAD (cheap); engine calls are offloaded to a
//! pool of `max_workers` threads. Jobs carry a monotone sequence number and
//! results re-order through a buffer before yielding, so:
//!
//! - finals surface in segment-end order,
//! - every interim of a segment surfaces before that segment's final
//!   (its job was enqueued first, hence the smaller sequence number).
//!
//! Dropping the iterator cancels the session: queued segments are
//! discarded, the in-flight engine call finishes and its result is thrown
//! away.
//!
//! Suspension points: awaiting the next chunk, awaiting worker output, and
//! the cancellation poll inside workers. Engines that declare themselves
//! single-threaded still serialise through the engine mutex no matter how
//! many workers exist.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

use crossbeam_channel::{unbounded, Receiver, Sender};
use tracing::debug;

use crate::audio::{AudioSource, SourceRead};
use crate::engine::{EngineHandle, Transcription};
use crate::error::{EngineError, TranscriptionError};
use crate::results::TranscriptEvent;
use crate::stream::StreamTranscriber;
use crate::vad::{VadSegment, VAD_SAMPLE_RATE};

/// Driver-side poll interval while waiting for audio or workers.
const POLL_SLEEP: Duration = Duration::from_millis(2);

struct Job {
    seq: u64,
    segment: VadSegment,
}

type WorkerResult = (u64, VadSegment, Result<Transcription, EngineError>);

struct WorkerPool {
    job_tx: Option<Sender<Job>>,
    result_rx: Receiver<WorkerResult>,
    cancel: Arc<AtomicBool>,
    handles: Vec<JoinHandle<()>>,
}

impl WorkerPool {
    fn spawn(engine: EngineHandle, workers: usize) -> Self {
        let (job_tx, job_rx) = unbounded::<Job>();
        let (result_tx, result_rx) = unbounded::<WorkerResult>();
        let cancel = Arc::new(AtomicBool::new(false));

        let handles = (0..workers.max(1))
            .map(|i| {
                let job_rx = job_rx.clone();
                let result_tx = result_tx.clone();
                let cancel = Arc::clone(&cancel);
                let engine = engine.clone();
                std::thread::Builder::new()
                    .name(format!("livecap-asr-{i}"))
                    .spawn(move || {
                        while let Ok(job) = job_rx.recv() {
                            if cancel.load(Ordering::Relaxed) {
                                // Pending segments are dropped on cancel.
                                continue;
                            }
                            let result = engine
                                .0
                                .lock()
                                .transcribe(&job.segment.audio, VAD_SAMPLE_RATE);
                            let _ = result_tx.send((job.seq, job.segment, result));
                        }
                    })
                    .expect("spawn asr worker")
            })
            .collect();

        Self {
            job_tx: Some(job_tx),
            result_rx,
            cancel,
            handles,
        }
    }

    fn dispatch(&self, job: Job) {
        if let Some(tx) = &self.job_tx {
            let _ = tx.send(job);
        }
    }

    fn shutdown(&mut self) {
        self.cancel.store(true, Ordering::SeqCst);
        // Closing the job channel lets workers drain out of recv().
        self.job_tx = None;
        for handle in self.handles.drain(..) {
            let _ = handle.join();
        }
    }
}

impl Drop for WorkerPool {
    fn drop(&mut self) {
        self.shutdown();
    }
}

/// Channel-backed lazy async sequence of transcript events.
pub struct AsyncTranscription<'a, S: AudioSource> {
    transcriber: &'a mut StreamTranscriber,
    source: S,
    pool: WorkerPool,
    next_seq: u64,
    emit_seq: u64,
    /// seq → completed entry; `None` marks a job that yielded no event.
    reorder: BTreeMap<u64, Option<Result<TranscriptEvent, TranscriptionError>>>,
    outstanding: usize,
    started: bool,
    source_done: bool,
}

impl<'a, S: AudioSource> AsyncTranscription<'a, S> {
    pub(crate) fn new(transcriber: &'a mut StreamTranscriber, source: S) -> Self {
        let pool = WorkerPool::spawn(transcriber.engine.clone(), transcriber.max_workers);
        Self {
            transcriber,
            source,
            pool,
            next_seq: 0,
            emit_seq: 0,
            reorder: BTreeMap::new(),
            outstanding: 0,
            started: false,
            source_done: false,
        }
    }

    fn dispatch_segment(&mut self, segment: VadSegment) {
        let seq = self.next_seq;
        self.next_seq += 1;
        self.outstanding += 1;
        debug!(seq, is_final = segment.is_final, "dispatching segment");
        self.pool.dispatch(Job { seq, segment });
    }

    fn drain_workers(&mut self) {
        while let Ok((seq, segment, result)) = self.pool.result_rx.try_recv() {
            self.outstanding -= 1;
            let entry = match result {
                Ok(transcription) => {
                    if segment.is_final {
                        self.transcriber
                            .build_final(&segment, transcription)
                            .map(|r| Ok(TranscriptEvent::Final(r)))
                    } else {
                        self.transcriber
                            .build_interim(&segment, transcription)
                            .map(|r| Ok(TranscriptEvent::Interim(r)))
                    }
                }
                // The failed segment is cancelled; later segments proceed.
                Err(e) => Some(Err(TranscriptionError::Engine(e))),
            };
            self.reorder.insert(seq, entry);
        }
    }

    fn pop_ready(&mut self) -> Option<Result<TranscriptEvent, TranscriptionError>> {
        while let Some(entry) = self.reorder.remove(&self.emit_seq) {
            self.emit_seq += 1;
            if let Some(event) = entry {
                return Some(event);
            }
        }
        None
    }

    /// Next transcript event, or `None` when the source is exhausted and
    /// every dispatched segment has surfaced.
    pub async fn next(&mut self) -> Option<Result<TranscriptEvent, TranscriptionError>> {
        loop {
            self.drain_workers();
            if let Some(event) = self.pop_ready() {
                return Some(event);
            }

            if !self.started {
                self.started = true;
                if let Err(e) = self.source.start() {
                    self.source_done = true;
                    return Some(Err(e.into()));
                }
            }

            if !self.source_done {
                match self.source.read(Duration::ZERO) {
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
                            self.dispatch_segment(segment);
                        }
                        continue;
                    }
                    Ok(SourceRead::Timeout) => {}
                    Ok(SourceRead::Exhausted) => {
                        self.source_done = true;
                        if let Some(segment) = self.transcriber.processor.finalize() {
                            self.dispatch_segment(segment);
                        }
                        self.source.close();
                        continue;
                    }
                    Err(e) => {
                        self.source_done = true;
                        self.source.close();
                        return Some(Err(e.into()));
                    }
                }
            }

            if self.source_done && self.outstanding == 0 && self.reorder.is_empty() {
                return None;
            }

            tokio::time::sleep(POLL_SLEEP).await;
        }
    }
}

impl<S: AudioSource> Drop for AsyncTranscription<'_, S> {
    fn drop(&mut self) {
        // Cancel: queued jobs are discarded, the in-flight call finishes
        // and its result is dropped with the channel.
        self.pool.shutdown();
        if !self.source_done {
            self.source.close();
        }
    }
}
