//! Callback surface.
//!
//! The caller pushes chunks with `feed_audio`; chunks that do not finalize
//! a segment return immediately. A finalized segment is transcribed
//! synchronously on the caller's thread, queued for `get_result`, and
//! delivered to the registered `on_final` handler (interims mirror this
//! through `on_interim` and their own queue).

use std::time::Duration;

use crossbeam_channel::{unbounded, Receiver, Sender};
use tracing::debug;

use crate::error::{AudioSourceError, TranscriptionError};
use crate::results::{InterimResult, TranscriptionResult};
use crate::stream::StreamTranscriber;
use crate::vad::VadSegment;

type FinalHandler = Box<dyn Fn(&TranscriptionResult) + Send>;
type InterimHandler = Box<dyn Fn(&InterimResult) + Send>;

/// Push-style transcription session.
pub struct CallbackTranscriber {
    inner: StreamTranscriber,
    on_final: Option<FinalHandler>,
    on_interim: Option<InterimHandler>,
    final_tx: Sender<TranscriptionResult>,
    final_rx: Receiver<TranscriptionResult>,
    interim_tx: Sender<InterimResult>,
    interim_rx: Receiver<InterimResult>,
    closed: bool,
}

impl CallbackTranscriber {
    pub(crate) fn new(inner: StreamTranscriber) -> Self {
        let (final_tx, final_rx) = unbounded();
        let (interim_tx, interim_rx) = unbounded();
        Self {
            inner,
            on_final: None,
            on_interim: None,
            final_tx,
            final_rx,
            interim_tx,
            interim_rx,
            closed: false,
        }
    }

    /// Register the final-result handler (replaces any previous one).
    pub fn on_final(&mut self, handler: impl Fn(&TranscriptionResult) + Send + 'static) {
        self.on_final = Some(Box::new(handler));
    }

    /// Register the interim-result handler (replaces any previous one).
    pub fn on_interim(&mut self, handler: impl Fn(&InterimResult) + Send + 'static) {
        self.on_interim = Some(Box::new(handler));
    }

    /// Feed one chunk. Non-blocking unless a segment finalizes, in which
    /// case the engine runs synchronously on this thread.
    pub fn feed_audio(&mut self, samples: &[f32], sample_rate: u32) -> Result<(), TranscriptionError> {
        if self.closed {
            return Err(TranscriptionError::Audio(AudioSourceError::Closed));
        }
        self.inner.diagnostics.bump(&self.inner.diagnostics.chunks_in);
        let segments = self.inner.processor.process_chunk(samples, sample_rate)?;
        for segment in segments {
            self.dispatch(segment)?;
        }
        Ok(())
    }

    /// Next queued final result, waiting up to `timeout`.
    pub fn get_result(&self, timeout: Duration) -> Option<TranscriptionResult> {
        self.final_rx.recv_timeout(timeout).ok()
    }

    /// Next queued interim result, waiting up to `timeout`.
    pub fn get_interim(&self, timeout: Duration) -> Option<InterimResult> {
        self.interim_rx.recv_timeout(timeout).ok()
    }

    /// Flush the VAD; returns the residual final result if one is produced.
    pub fn finalize(&mut self) -> Result<Option<TranscriptionResult>, TranscriptionError> {
        if self.closed {
            return Err(TranscriptionError::Audio(AudioSourceError::Closed));
        }
        let Some(segment) = self.inner.processor.finalize() else {
            return Ok(None);
        };
        let transcription = self.inner.transcribe_segment(&segment)?;
        let Some(result) = self.inner.build_final(&segment, transcription) else {
            return Ok(None);
        };
        self.deliver_final(result.clone());
        Ok(Some(result))
    }

    /// Clear both queues and reset the VAD. The session stays open.
    pub fn reset(&mut self) {
        while self.final_rx.try_recv().is_ok() {}
        while self.interim_rx.try_recv().is_ok() {}
        self.inner.reset();
        debug!("callback transcriber reset");
    }

    /// End the session. Idempotent; feeding after close is an error.
    pub fn close(&mut self) {
        if self.closed {
            return;
        }
        self.closed = true;
        self.inner.close();
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }

    fn dispatch(&mut self, segment: VadSegment) -> Result<(), TranscriptionError> {
        let transcription = self.inner.transcribe_segment(&segment)?;
        if segment.is_final {
            if let Some(result) = self.inner.build_final(&segment, transcription) {
                self.deliver_final(result);
            }
        } else if let Some(interim) = self.inner.build_interim(&segment, transcription) {
            if let Some(handler) = &self.on_interim {
                handler(&interim);
            }
            let _ = self.interim_tx.send(interim);
        }
        Ok(())
    }

    fn deliver_final(&self, result: TranscriptionResult) {
        let _ = self.final_tx.send(result.clone());
        if let Some(handler) = &self.on_final {
            handler(&result);
        }
    }
}
