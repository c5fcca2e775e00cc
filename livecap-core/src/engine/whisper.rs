//! Whisper-family engine via the `ort` crate.
//!
//! Targets the HuggingFace `optimum` separate encoder + decoder export:
//! - `encoder_model.onnx` — `input_features [1,80,3000]` → `last_hidden_state`
//! - `decoder_model.onnx` — `input_ids [1,seq]` + `encoder_hidden_states`
//!   → `logits [1,seq,vocab]`
//! - `tokenizer.json`     — HuggingFace fast tokenizer
//!
//! ## Mel spectrogram parameters (must match training)
//!
//! | Parameter       | Value          |
//! |-----------------|----------------|
//! | Hann window     | 400 samples    |
//! | FFT size        | 400            |
//! | Frequency bins  | 201 (400/2+1)  |
//! | Hop length      | 160 (10 ms)    |
//! | Mel bands       | 80             |
//! | Mel range       | 0–8 000 Hz     |
//! | Frames          | 3 000 (30 s)   |
//!
//! ## Decoder
//!
//! Greedy (argmax) decode over the prompt
//! `<|startoftranscript|><|{lang}|><|transcribe|><|notimestamps|>`,
//! stopping at `<|endoftext|>` or 224 tokens. Special and timestamp tokens
//! are suppressed; confidence is the mean softmax probability of the
//! selected tokens.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use ndarray::Array3;
use ort::session::builder::{GraphOptimizationLevel, SessionBuilder};
use ort::session::Session;
use ort::value::{TensorRef, Value};
use ort::{ep, Error as OrtError};
use rustfft::{num_complex::Complex, FftPlanner};
use tokenizers::Tokenizer;
use tracing::{debug, info, warn};

use crate::engine::registry::{Device, EngineParams};
use crate::engine::{SpeechEngine, Transcription};
use crate::error::EngineError;
use crate::lang;

// ── Mel frontend constants ───────────────────────────────────────────────────
const N_FFT: usize = 400;
const N_FREQS: usize = N_FFT / 2 + 1; // 201
const HOP: usize = 160;
const N_MELS: usize = 80;
const N_FRAMES: usize = 3_000;
/// 30 s at 16 kHz — the fixed encoder input length.
const MEL_SAMPLES: usize = 480_000;

// ── Decoder constants ────────────────────────────────────────────────────────
const MAX_TOKENS: usize = 224;
const EOT_FALLBACK: i64 = 50257;

const REQUIRED_FILES: &[&str] = &["encoder_model.onnx", "decoder_model.onnx", "tokenizer.json"];

/// HuggingFace repo per model size (optimum ONNX exports).
fn model_repo(size: &str) -> String {
    format!("onnx-community/whisper-{size}")
}

fn download_url(size: &str, file: &str) -> String {
    let subdir = if file.ends_with(".onnx") { "onnx/" } else { "" };
    format!(
        "https://huggingface.co/{}/resolve/main/{subdir}{file}",
        model_repo(size)
    )
}

/// Whisper ASR engine (ONNX export, 99 languages).
pub struct WhisperEngine {
    params: EngineParams,
    device: Device,
    language: String,
    model_size: String,
    model_dir: PathBuf,

    encoder: Option<Session>,
    decoder: Option<Session>,
    tokenizer: Option<Tokenizer>,

    mel_filters: Vec<Vec<f32>>,
    hann_window: Vec<f32>,
    fft: Arc<dyn rustfft::Fft<f32>>,
}

impl WhisperEngine {
    pub fn new(params: EngineParams, device: Device) -> Result<Self, EngineError> {
        let raw_language = params.get_str("language").unwrap_or("en");
        let language = lang::normalize(raw_language).ok_or_else(|| {
            EngineError::InvalidOption(format!("unrecognised language: '{raw_language}'"))
        })?;
        if !lang::WHISPER_LANGUAGES.contains(&language.as_str()) {
            return Err(EngineError::InvalidOption(format!(
                "language '{language}' is not in whisper's supported set"
            )));
        }
        let model_size = params.get_str("model_size").unwrap_or("small").to_string();

        Ok(Self {
            model_dir: crate::resources::models_dir("whisper").join(&model_size),
            params,
            device,
            language,
            model_size,
            encoder: None,
            decoder: None,
            tokenizer: None,
            mel_filters: build_mel_filterbank(N_FFT, 16_000, N_MELS, 0.0, 8_000.0),
            hann_window: build_hann_window(N_FFT),
            fft: Arc::from(FftPlanner::<f32>::new().plan_fft_forward(N_FFT)),
        })
    }

    fn build_session(&self, model_path: &Path) -> Result<Session, EngineError> {
        let ort_err = |e: OrtError| EngineError::ModelLoad(e.to_string());
        let cores = std::thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(4);

        let builder = SessionBuilder::new()
            .map_err(ort_err)?
            .with_intra_threads(cores.clamp(2, 12))
            .map_err(ort_err)?
            .with_optimization_level(GraphOptimizationLevel::All)
            .map_err(ort_err)?;

        // The bundled runtime ships the CPU provider; a CUDA preference is
        // soft and falls back with a warning rather than failing the load.
        if self.device == Device::Cuda {
            warn!("cuda execution provider not bundled in this build; using cpu");
        }
        let builder = builder
            .with_execution_providers([ep::CPU::default().build()])
            .map_err(ort_err)?;

        builder.commit_from_file(model_path).map_err(ort_err)
    }

    /// Log-mel features per the table in the module docs: centered STFT
    /// columns every [`HOP`] samples, mel filterbank, log10 compression
    /// clamped to an 8 dB window under the peak, scaled by `(x + 4) / 4`.
    ///
    /// `voiced_len` is how much of `samples` is real audio; columns whose
    /// window sits entirely inside the zero padding stay at zero energy and
    /// fall onto the dynamic-range floor during compression.
    fn log_mel_spectrogram(&self, samples: &[f32], voiced_len: usize) -> Array3<f32> {
        let padded = reflect_pad(samples, N_FFT / 2);
        // Column c reads padded[c·HOP .. c·HOP + N_FFT], i.e. original
        // samples from c·HOP − N_FFT/2 on. Columns starting past the voiced
        // region see only padding.
        let voiced_cols = (voiced_len.min(MEL_SAMPLES) + N_FFT / 2) / HOP + 1;
        let voiced_cols = voiced_cols.clamp(1, N_FRAMES);

        let mut features = Array3::<f32>::zeros((1, N_MELS, N_FRAMES));
        let mut spectrum: Vec<Complex<f32>> = vec![Complex::new(0.0, 0.0); N_FFT];
        let mut power = [0f32; N_FREQS];

        for col in 0..voiced_cols {
            let window = &padded[col * HOP..col * HOP + N_FFT];
            for ((slot, &sample), &weight) in
                spectrum.iter_mut().zip(window).zip(&self.hann_window)
            {
                *slot = Complex::new(sample * weight, 0.0);
            }
            self.fft.process(&mut spectrum);

            for (bin, out) in power.iter_mut().enumerate() {
                *out = spectrum[bin].norm_sqr();
            }
            for (band, filter) in self.mel_filters.iter().enumerate() {
                features[[0, band, col]] =
                    filter.iter().zip(&power).map(|(w, p)| w * p).sum();
            }
        }

        features.mapv_inplace(|e| e.max(1e-10).log10());
        let peak = features.iter().copied().fold(f32::NEG_INFINITY, f32::max);
        features.mapv_inplace(|v| (v.max(peak - 8.0) + 4.0) / 4.0);
        features
    }

    fn prompt_tokens(&self, tokenizer: &Tokenizer) -> Vec<i64> {
        let mut prompt = Vec::with_capacity(4);
        for tok in [
            "<|startoftranscript|>".to_string(),
            format!("<|{}|>", self.language),
            "<|transcribe|>".to_string(),
            "<|notimestamps|>".to_string(),
        ] {
            if let Some(id) = tokenizer.token_to_id(&tok) {
                prompt.push(id as i64);
            }
        }
        prompt
    }

    fn suppressed_tokens(tokenizer: &Tokenizer) -> Vec<i64> {
        let mut ids = Vec::new();
        for tok in [
            "<|startoftranscript|>",
            "<|translate|>",
            "<|transcribe|>",
            "<|notimestamps|>",
            "<|nospeech|>",
        ] {
            if let Some(id) = tokenizer.token_to_id(tok) {
                ids.push(id as i64);
            }
        }
        ids
    }
}

impl SpeechEngine for WhisperEngine {
    fn engine_name(&self) -> &str {
        "whisper"
    }

    fn supported_languages(&self) -> Vec<&'static str> {
        lang::WHISPER_LANGUAGES.to_vec()
    }

    fn params(&self) -> &EngineParams {
        &self.params
    }

    fn is_loaded(&self) -> bool {
        self.encoder.is_some() && self.decoder.is_some() && self.tokenizer.is_some()
    }

    fn check_deps(&mut self) -> Result<(), EngineError> {
        // ort links (or downloads) its runtime at build time; nothing to
        // probe beyond being compiled in.
        Ok(())
    }

    fn prepare_model_dir(&mut self) -> Result<PathBuf, EngineError> {
        std::fs::create_dir_all(&self.model_dir)
            .map_err(|e| EngineError::ModelLoad(format!("{}: {e}", self.model_dir.display())))?;
        Ok(self.model_dir.clone())
    }

    fn download_if_missing(
        &mut self,
        progress: &mut dyn FnMut(u8, &str),
    ) -> Result<(), EngineError> {
        let missing: Vec<&str> = REQUIRED_FILES
            .iter()
            .copied()
            .filter(|f| !self.model_dir.join(f).exists())
            .collect();
        if missing.is_empty() {
            progress(100, "model files present");
            return Ok(());
        }

        for (i, file) in missing.iter().enumerate() {
            let url = download_url(&self.model_size, file);
            let pct = (i * 100 / missing.len()) as u8;
            progress(pct, &format!("downloading {file}"));
            info!(url = url.as_str(), "downloading model file");

            let response = reqwest::blocking::get(&url)
                .map_err(|e| EngineError::ModelDownload(format!("{file}: {e}")))?;
            if !response.status().is_success() {
                return Err(EngineError::ModelDownload(format!(
                    "{file}: HTTP {}",
                    response.status()
                )));
            }
            let bytes = response
                .bytes()
                .map_err(|e| EngineError::ModelDownload(format!("{file}: {e}")))?;

            // Write to a temp name first so a cut connection never leaves a
            // half-written file that passes the existence check.
            let tmp = self.model_dir.join(format!("{file}.part"));
            std::fs::write(&tmp, &bytes)
                .map_err(|e| EngineError::ModelDownload(format!("{file}: {e}")))?;
            std::fs::rename(&tmp, self.model_dir.join(file))
                .map_err(|e| EngineError::ModelDownload(format!("{file}: {e}")))?;
        }
        progress(100, "download complete");
        Ok(())
    }

    fn load_from_path(&mut self) -> Result<(), EngineError> {
        for file in REQUIRED_FILES {
            let path = self.model_dir.join(file);
            if !path.exists() {
                return Err(EngineError::ModelNotFound { path });
            }
        }

        self.encoder = Some(self.build_session(&self.model_dir.join("encoder_model.onnx"))?);
        self.decoder = Some(self.build_session(&self.model_dir.join("decoder_model.onnx"))?);
        self.tokenizer = Some(
            Tokenizer::from_file(self.model_dir.join("tokenizer.json"))
                .map_err(|e| EngineError::ModelLoad(e.to_string()))?,
        );
        info!(
            size = self.model_size.as_str(),
            language = self.language.as_str(),
            "whisper sessions ready"
        );
        Ok(())
    }

    fn configure(&mut self) -> Result<(), EngineError> {
        // Dummy encoder pass to populate kernels and CPU caches.
        let dummy = Array3::<f32>::zeros((1, N_MELS, N_FRAMES));
        let dummy_val =
            Value::from_array(dummy).map_err(|e: OrtError| EngineError::ModelLoad(e.to_string()))?;
        let encoder = self
            .encoder
            .as_mut()
            .ok_or_else(|| EngineError::ModelLoad("encoder not loaded".into()))?;
        encoder
            .run(ort::inputs!["input_features" => dummy_val])
            .map_err(|e| EngineError::ModelLoad(e.to_string()))?;
        Ok(())
    }

    fn transcribe(
        &mut self,
        audio: &[f32],
        sample_rate: u32,
    ) -> Result<Transcription, EngineError> {
        if sample_rate != self.required_sample_rate() {
            return Err(EngineError::Inference(format!(
                "expected {} Hz audio, got {sample_rate}",
                self.required_sample_rate()
            )));
        }
        if !self.is_loaded() {
            return Err(EngineError::Inference(
                "model not loaded — call load_model() first".into(),
            ));
        }

        // Pad / trim to the fixed 30 s window.
        let active_samples = audio.len().min(MEL_SAMPLES);
        let mut samples = audio[..active_samples].to_vec();
        samples.resize(MEL_SAMPLES, 0.0);

        let mel = self.log_mel_spectrogram(&samples, active_samples);
        let mel_val =
            Value::from_array(mel).map_err(|e: OrtError| EngineError::Inference(e.to_string()))?;

        let encoder = self.encoder.as_mut().expect("checked is_loaded");
        let decoder = self.decoder.as_mut().expect("checked is_loaded");
        let tokenizer = self.tokenizer.as_ref().expect("checked is_loaded");

        let enc_out = encoder
            .run(ort::inputs!["input_features" => mel_val])
            .map_err(|e| EngineError::Inference(e.to_string()))?;
        let (enc_shape, enc_data) = enc_out["last_hidden_state"]
            .try_extract_tensor::<f32>()
            .map_err(|e| EngineError::Inference(e.to_string()))?;
        let (enc_frames, enc_dim) = if enc_shape.len() >= 3 {
            (enc_shape[1] as usize, enc_shape[2] as usize)
        } else {
            (1_500, enc_data.len() / 1_500)
        };

        let eot = tokenizer
            .token_to_id("<|endoftext|>")
            .map(|id| id as i64)
            .unwrap_or(EOT_FALLBACK);
        let timestamp_begin = tokenizer.token_to_id("<|0.00|>").map(|id| id as i64);
        let suppressed = Self::suppressed_tokens(tokenizer);
        let prompt = self.prompt_tokens(tokenizer);
        let prompt_len = prompt.len();

        let mut tokens = prompt;
        let mut token_probs: Vec<f32> = Vec::new();

        for _step in 0..MAX_TOKENS {
            let seq = tokens.len();
            let input_ids = TensorRef::from_array_view(([1_i64, seq as i64], tokens.as_slice()))
                .map_err(|e| EngineError::Inference(e.to_string()))?;
            let hidden = TensorRef::from_array_view((
                [1_i64, enc_frames as i64, enc_dim as i64],
                enc_data,
            ))
            .map_err(|e| EngineError::Inference(e.to_string()))?;

            let dec_out = decoder
                .run(ort::inputs![
                    "input_ids"             => input_ids,
                    "encoder_hidden_states" => hidden,
                ])
                .map_err(|e| EngineError::Inference(e.to_string()))?;

            let (logits_shape, logits) = dec_out["logits"]
                .try_extract_tensor::<f32>()
                .map_err(|e| EngineError::Inference(e.to_string()))?;
            let vocab = *logits_shape.last().unwrap_or(&0) as usize;
            if vocab == 0 {
                return Err(EngineError::Inference("decoder returned empty logits".into()));
            }
            let last = &logits[(seq - 1) * vocab..seq * vocab];

            let (next, prob) = argmax_with_prob(last, |id| {
                suppressed.contains(&id)
                    || timestamp_begin.map(|tb| id >= tb).unwrap_or(false)
            });

            if next == eot {
                break;
            }
            tokens.push(next);
            token_probs.push(prob);
        }

        let text_tokens: Vec<u32> = tokens[prompt_len..].iter().map(|&t| t as u32).collect();
        if text_tokens.is_empty() {
            debug!("decode produced no text tokens");
            return Ok(Transcription::empty());
        }
        let decoded = tokenizer
            .decode(&text_tokens, true)
            .map_err(|e| EngineError::Inference(e.to_string()))?;
        let text = tidy_transcript(&decoded);

        let confidence = if token_probs.is_empty() {
            0.0
        } else {
            (token_probs.iter().sum::<f32>() / token_probs.len() as f32).clamp(0.0, 1.0)
        };

        debug!(
            seconds = active_samples as f32 / 16_000.0,
            tokens = text_tokens.len(),
            confidence,
            "whisper transcription"
        );

        Ok(Transcription { text, confidence })
    }

    fn cleanup(&mut self) {
        self.encoder = None;
        self.decoder = None;
        self.tokenizer = None;
    }
}

/// Normalise decoder output: collapse runs of whitespace, strip the
/// bracketed non-speech annotations Whisper likes to emit on noise
/// (`[BLANK_AUDIO]`, `(music)`, `♪`), and trim.
fn tidy_transcript(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    let mut depth = 0usize;
    let mut last_space = true;
    for c in raw.chars() {
        match c {
            '[' | '(' => depth += 1,
            ']' | ')' => depth = depth.saturating_sub(1),
            '♪' => {}
            _ if depth > 0 => {}
            c if c.is_whitespace() => {
                if !last_space {
                    out.push(' ');
                    last_space = true;
                }
            }
            c => {
                out.push(c);
                last_space = false;
            }
        }
    }
    out.trim().to_string()
}

/// Argmax over one logit row with softmax probability of the winner.
/// `banned` tokens are excluded.
fn argmax_with_prob(logits: &[f32], banned: impl Fn(i64) -> bool) -> (i64, f32) {
    let mut best_id = 0i64;
    let mut best_logit = f32::NEG_INFINITY;
    for (id, &logit) in logits.iter().enumerate() {
        if banned(id as i64) {
            continue;
        }
        if logit > best_logit {
            best_logit = logit;
            best_id = id as i64;
        }
    }
    // Stable softmax of the winner only.
    let max = logits.iter().copied().fold(f32::NEG_INFINITY, f32::max);
    let denom: f32 = logits.iter().map(|l| (l - max).exp()).sum();
    let prob = if denom > 0.0 {
        (best_logit - max).exp() / denom
    } else {
        0.0
    };
    (best_id, prob)
}

fn build_hann_window(n: usize) -> Vec<f32> {
    use std::f32::consts::PI;
    (0..n)
        .map(|i| 0.5 * (1.0 - (2.0 * PI * i as f32 / n as f32).cos()))
        .collect()
}

/// Slaney-style triangular mel filterbank, area-normalised.
fn build_mel_filterbank(
    fft_size: usize,
    sr: u32,
    n_mels: usize,
    fmin: f32,
    fmax: f32,
) -> Vec<Vec<f32>> {
    let n_freqs = fft_size / 2 + 1;
    let mel_min = hz_to_mel(fmin);
    let mel_max = hz_to_mel(fmax);

    let mel_pts: Vec<f32> = (0..=(n_mels + 1))
        .map(|i| mel_min + (mel_max - mel_min) * i as f32 / (n_mels + 1) as f32)
        .collect();
    let hz_pts: Vec<f32> = mel_pts.iter().map(|&m| mel_to_hz(m)).collect();
    let fft_freqs: Vec<f32> = (0..n_freqs)
        .map(|k| k as f32 * sr as f32 / fft_size as f32)
        .collect();

    let mut filters = vec![vec![0f32; n_freqs]; n_mels];
    for m in 0..n_mels {
        let (lower, center, upper) = (hz_pts[m], hz_pts[m + 1], hz_pts[m + 2]);
        let down = (center - lower).max(1e-10);
        let up = (upper - center).max(1e-10);
        let enorm = 2.0 / (upper - lower).max(1e-10);
        for (k, &freq) in fft_freqs.iter().enumerate() {
            let w = if freq >= lower && freq <= center {
                (freq - lower) / down
            } else if freq > center && freq <= upper {
                (upper - freq) / up
            } else {
                0.0
            };
            filters[m][k] = (w * enorm).max(0.0);
        }
    }
    filters
}

fn hz_to_mel(hz: f32) -> f32 {
    let f_sp = 200.0 / 3.0;
    let min_log_hz = 1_000.0;
    let min_log_mel = min_log_hz / f_sp;
    let logstep = (6.4_f32).ln() / 27.0;
    if hz >= min_log_hz {
        min_log_mel + (hz / min_log_hz).ln() / logstep
    } else {
        hz / f_sp
    }
}

fn mel_to_hz(mel: f32) -> f32 {
    let f_sp = 200.0 / 3.0;
    let min_log_hz = 1_000.0;
    let min_log_mel = min_log_hz / f_sp;
    let logstep = (6.4_f32).ln() / 27.0;
    if mel >= min_log_mel {
        min_log_hz * (logstep * (mel - min_log_mel)).exp()
    } else {
        mel * f_sp
    }
}

/// Reflect-pad `samples` by `pad` on both sides (Whisper's STFT centering).
fn reflect_pad(samples: &[f32], pad: usize) -> Vec<f32> {
    if pad == 0 {
        return samples.to_vec();
    }
    if samples.is_empty() {
        return vec![0.0; pad * 2];
    }
    if samples.len() == 1 {
        return vec![samples[0]; 1 + pad * 2];
    }
    let n = samples.len() as isize;
    let mut out = Vec::with_capacity(samples.len() + 2 * pad);
    for i in -(pad as isize)..(n + pad as isize) {
        out.push(samples[reflect_index(i, samples.len())]);
    }
    out
}

fn reflect_index(mut i: isize, len: usize) -> usize {
    let max = len as isize - 1;
    while i < 0 || i > max {
        if i < 0 {
            i = -i;
        } else {
            i = 2 * max - i;
        }
    }
    i as usize
}
