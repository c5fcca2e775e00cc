//! Microphone capture source via cpal.
//!
//! The cpal input callback runs on an OS audio thread at elevated priority.
//! It downmixes to mono, slices into ~`chunk_ms` chunks, and hands them to a
//! bounded channel of [`QUEUE_SLOTS`] slots. On overflow the *oldest* queued
//! chunk is dropped so a stalled consumer resumes at the live edge rather
//! than replaying stale audio.
//!
//! `cpal::Stream` is bound to its creation thread on Windows/macOS, so
//! `MicSource` must be started and closed on the same thread. The blocking
//! orchestrator surface satisfies this by driving the source on its own
//! thread.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{SampleFormat, SampleRate, Stream, StreamConfig};
use crossbeam_channel::{bounded, Receiver, Sender, TryRecvError};
use tracing::{error, info, warn};

use crate::audio::{AudioChunk, AudioSource, SourceRead, DEFAULT_CHUNK_MS};
use crate::error::AudioSourceError;

/// Bounded queue depth between the audio callback and the consumer.
pub const QUEUE_SLOTS: usize = 100;

/// Infinite source capturing from a system input device.
pub struct MicSource {
    device_index: Option<usize>,
    chunk_ms: u32,
    stream: Option<Stream>,
    running: Arc<AtomicBool>,
    dropped: Arc<AtomicUsize>,
    rx: Receiver<Vec<f32>>,
    tx: Sender<Vec<f32>>,
    sample_rate: u32,
    closed: bool,
}

impl MicSource {
    /// Prepare a source for the capture device at `device_index`
    /// (`None` = system default). The device opens on `start()`.
    pub fn new(device_index: Option<usize>) -> Self {
        Self::with_chunk_ms(device_index, DEFAULT_CHUNK_MS)
    }

    pub fn with_chunk_ms(device_index: Option<usize>, chunk_ms: u32) -> Self {
        let (tx, rx) = bounded(QUEUE_SLOTS);
        Self {
            device_index,
            chunk_ms: chunk_ms.max(1),
            stream: None,
            running: Arc::new(AtomicBool::new(false)),
            dropped: Arc::new(AtomicUsize::new(0)),
            rx,
            tx,
            sample_rate: 0,
            closed: false,
        }
    }

    /// Chunks dropped due to queue overflow since `start()`.
    pub fn dropped_chunks(&self) -> usize {
        self.dropped.load(Ordering::Relaxed)
    }

    fn select_device(&self) -> Result<cpal::Device, AudioSourceError> {
        let host = cpal::default_host();
        match self.device_index {
            Some(index) => {
                let mut devices = host.input_devices().map_err(|e| {
                    AudioSourceError::DeviceUnavailable {
                        reason: e.to_string(),
                    }
                })?;
                devices
                    .nth(index)
                    .ok_or_else(|| AudioSourceError::DeviceUnavailable {
                        reason: format!("no input device at index {index}"),
                    })
            }
            None => host
                .default_input_device()
                .ok_or_else(|| AudioSourceError::DeviceUnavailable {
                    reason: "no default input device".into(),
                }),
        }
    }
}

/// Forward a finished mono chunk, evicting the oldest on overflow.
fn push_chunk(
    tx: &Sender<Vec<f32>>,
    rx: &Receiver<Vec<f32>>,
    dropped: &AtomicUsize,
    chunk: Vec<f32>,
) {
    if let Err(err) = tx.try_send(chunk) {
        match rx.try_recv() {
            Ok(_) | Err(TryRecvError::Empty) => {}
            Err(TryRecvError::Disconnected) => return,
        }
        let n = dropped.fetch_add(1, Ordering::Relaxed) + 1;
        if n == 1 || n % 100 == 0 {
            warn!(dropped = n, "capture queue full — dropping oldest chunk");
        }
        let _ = tx.try_send(err.into_inner());
    }
}

/// Accumulates mono samples in the callback and emits whole chunks.
struct ChunkAssembler {
    buf: Vec<f32>,
    chunk_samples: usize,
    channels: usize,
}

impl ChunkAssembler {
    fn new(chunk_samples: usize, channels: usize) -> Self {
        Self {
            buf: Vec::with_capacity(chunk_samples * 2),
            chunk_samples,
            channels,
        }
    }

    fn feed(
        &mut self,
        interleaved: &[f32],
        tx: &Sender<Vec<f32>>,
        rx: &Receiver<Vec<f32>>,
        dropped: &AtomicUsize,
    ) {
        if self.channels <= 1 {
            self.buf.extend_from_slice(interleaved);
        } else {
            for frame in interleaved.chunks_exact(self.channels) {
                self.buf
                    .push(frame.iter().sum::<f32>() / self.channels as f32);
            }
        }
        while self.buf.len() >= self.chunk_samples {
            let chunk: Vec<f32> = self.buf.drain(..self.chunk_samples).collect();
            push_chunk(tx, rx, dropped, chunk);
        }
    }
}

impl AudioSource for MicSource {
    fn start(&mut self) -> Result<(), AudioSourceError> {
        if self.closed {
            return Err(AudioSourceError::Closed);
        }
        if self.stream.is_some() {
            return Ok(());
        }

        let device = self.select_device()?;
        let name = device.name().unwrap_or_else(|_| "<unnamed>".into());
        let supported =
            device
                .default_input_config()
                .map_err(|e| AudioSourceError::DeviceUnavailable {
                    reason: e.to_string(),
                })?;
        let sample_rate = supported.sample_rate().0;
        let channels = supported.channels() as usize;
        info!(device = name.as_str(), sample_rate, channels, "opening input device");

        let config = StreamConfig {
            channels: supported.channels(),
            sample_rate: SampleRate(sample_rate),
            buffer_size: cpal::BufferSize::Default,
        };

        let chunk_samples = (sample_rate as usize * self.chunk_ms as usize / 1000).max(1);
        self.running.store(true, Ordering::SeqCst);

        let running = Arc::clone(&self.running);
        let dropped = Arc::clone(&self.dropped);
        let tx = self.tx.clone();
        let rx = self.rx.clone();
        let mut assembler = ChunkAssembler::new(chunk_samples, channels);

        let err_fn = |err| error!("audio stream error: {err}");
        let stream = match supported.sample_format() {
            SampleFormat::F32 => device.build_input_stream(
                &config,
                move |data: &[f32], _info| {
                    if !running.load(Ordering::Relaxed) {
                        return;
                    }
                    assembler.feed(data, &tx, &rx, &dropped);
                },
                err_fn,
                None,
            ),
            SampleFormat::I16 => {
                let mut scaled: Vec<f32> = Vec::new();
                device.build_input_stream(
                    &config,
                    move |data: &[i16], _info| {
                        if !running.load(Ordering::Relaxed) {
                            return;
                        }
                        scaled.clear();
                        scaled.extend(data.iter().map(|s| *s as f32 / 32768.0));
                        assembler.feed(&scaled, &tx, &rx, &dropped);
                    },
                    err_fn,
                    None,
                )
            }
            SampleFormat::U8 => {
                let mut scaled: Vec<f32> = Vec::new();
                device.build_input_stream(
                    &config,
                    move |data: &[u8], _info| {
                        if !running.load(Ordering::Relaxed) {
                            return;
                        }
                        scaled.clear();
                        scaled.extend(data.iter().map(|s| (*s as f32 - 128.0) / 128.0));
                        assembler.feed(&scaled, &tx, &rx, &dropped);
                    },
                    err_fn,
                    None,
                )
            }
            fmt => {
                return Err(AudioSourceError::DeviceUnavailable {
                    reason: format!("unsupported sample format: {fmt:?}"),
                })
            }
        }
        .map_err(|e| AudioSourceError::DeviceUnavailable {
            reason: e.to_string(),
        })?;

        stream
            .play()
            .map_err(|e| AudioSourceError::DeviceUnavailable {
                reason: e.to_string(),
            })?;

        self.sample_rate = sample_rate;
        self.stream = Some(stream);
        Ok(())
    }

    fn read(&mut self, timeout: Duration) -> Result<SourceRead, AudioSourceError> {
        if self.closed {
            return Err(AudioSourceError::Closed);
        }
        match self.rx.recv_timeout(timeout) {
            Ok(samples) => Ok(SourceRead::Chunk(AudioChunk::new(samples, self.sample_rate))),
            Err(crossbeam_channel::RecvTimeoutError::Timeout) => Ok(SourceRead::Timeout),
            Err(crossbeam_channel::RecvTimeoutError::Disconnected) => Ok(SourceRead::Exhausted),
        }
    }

    fn close(&mut self) {
        self.running.store(false, Ordering::SeqCst);
        // Stream drops here, releasing the device on this thread.
        self.stream = None;
        self.closed = true;
        let n = self.dropped.load(Ordering::Relaxed);
        if n > 0 {
            info!(dropped = n, "capture closed with dropped chunks");
        }
    }

    fn sample_rate(&self) -> u32 {
        self.sample_rate
    }
}

impl Drop for MicSource {
    fn drop(&mut self) {
        if !self.closed {
            self.close();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn overflow_drops_oldest_chunk() {
        let (tx, rx) = bounded(3);
        let dropped = AtomicUsize::new(0);
        for i in 0..5 {
            push_chunk(&tx, &rx, &dropped, vec![i as f32]);
        }
        assert_eq!(dropped.load(Ordering::Relaxed), 2);
        // Oldest two chunks (0, 1) were evicted.
        let first = rx.try_recv().unwrap();
        assert_eq!(first[0], 2.0);
    }

    #[test]
    fn assembler_emits_fixed_chunks_and_downmixes() {
        let (tx, rx) = bounded(10);
        let dropped = AtomicUsize::new(0);
        let mut asm = ChunkAssembler::new(4, 2);
        // 6 stereo frames → 6 mono samples → one 4-chunk, 2 residual
        let interleaved: Vec<f32> = (0..12).map(|i| if i % 2 == 0 { 1.0 } else { 0.0 }).collect();
        asm.feed(&interleaved, &tx, &rx, &dropped);
        let chunk = rx.try_recv().unwrap();
        assert_eq!(chunk, vec![0.5; 4]);
        assert!(rx.try_recv().is_err());
        assert_eq!(asm.buf.len(), 2);
    }
}
