//! Shared encoder + CTC greedy-decode engine.
//!
//! The Parakeet, Canary, and ReazonSpeech registry variants all wrap NeMo
//! CTC exports with the same I/O shape, so one implementation serves all
//! three, parameterized by a static [`CtcEngineSpec`]:
//!
//! - `model.onnx` — `audio_signal [1, samples]` + `length [1]`
//!   → `logprobs [1, frames, vocab+1]` (blank is the last class)
//! - `tokenizer.json` — HuggingFace fast tokenizer for id → text
//!
//! Greedy CTC: per-frame argmax, collapse repeats, drop blanks. Confidence
//! is the mean probability of the surviving frames.

use std::path::PathBuf;

use ort::session::builder::{GraphOptimizationLevel, SessionBuilder};
use ort::session::Session;
use ort::value::Value;
use ort::{ep, Error as OrtError};
use tokenizers::Tokenizer;
use tracing::{debug, info};

use crate::engine::registry::{Device, EngineInfo, EngineKind, EngineParams};
use crate::engine::{SpeechEngine, Transcription};
use crate::error::EngineError;
use crate::lang;

const REQUIRED_FILES: &[&str] = &["model.onnx", "tokenizer.json"];

/// Static description of one CTC engine variant.
pub struct CtcEngineSpec {
    pub engine_id: &'static str,
    pub languages: &'static [&'static str],
    /// HuggingFace repo holding the ONNX export.
    pub repo: &'static str,
}

fn spec_for(info: &EngineInfo) -> Result<&'static CtcEngineSpec, EngineError> {
    static SPECS: &[CtcEngineSpec] = &[
        CtcEngineSpec {
            engine_id: "parakeet-en",
            languages: &["en"],
            repo: "istupakov/parakeet-ctc-0.6b-onnx",
        },
        CtcEngineSpec {
            engine_id: "parakeet-ja",
            languages: &["ja"],
            repo: "istupakov/parakeet-tdt_ctc-0.6b-ja-onnx",
        },
        CtcEngineSpec {
            engine_id: "canary",
            languages: &["en", "de", "es", "fr"],
            repo: "istupakov/canary-1b-onnx",
        },
        CtcEngineSpec {
            engine_id: "reazonspeech",
            languages: &["ja"],
            repo: "reazon-research/reazonspeech-nemo-onnx",
        },
    ];
    SPECS
        .iter()
        .find(|s| s.engine_id == info.id)
        .ok_or_else(|| EngineError::UnknownEngine(info.id.to_string()))
}

/// NeMo-style CTC engine.
pub struct CtcEngine {
    spec: &'static CtcEngineSpec,
    params: EngineParams,
    device: Device,
    language: String,
    model_dir: PathBuf,
    session: Option<Session>,
    tokenizer: Option<Tokenizer>,
}

impl CtcEngine {
    pub fn from_registry(
        info: &'static EngineInfo,
        params: EngineParams,
        device: Device,
    ) -> Result<Self, EngineError> {
        debug_assert!(matches!(
            info.kind,
            EngineKind::Parakeet | EngineKind::Canary | EngineKind::ReazonSpeech
        ));
        let spec = spec_for(info)?;

        let raw_language = params.get_str("language").unwrap_or(spec.languages[0]);
        let language = lang::normalize(raw_language).ok_or_else(|| {
            EngineError::InvalidOption(format!("unrecognised language: '{raw_language}'"))
        })?;
        if !spec.languages.contains(&language.as_str()) {
            return Err(EngineError::InvalidOption(format!(
                "engine '{}' does not support language '{language}' (supported: {})",
                spec.engine_id,
                spec.languages.join(", ")
            )));
        }

        Ok(Self {
            model_dir: crate::resources::models_dir(spec.engine_id),
            spec,
            params,
            device,
            language,
            session: None,
            tokenizer: None,
        })
    }

    fn build_session(&self, path: &PathBuf) -> Result<Session, EngineError> {
        let ort_err = |e: OrtError| EngineError::ModelLoad(e.to_string());
        let builder = SessionBuilder::new()
            .map_err(ort_err)?
            .with_optimization_level(GraphOptimizationLevel::All)
            .map_err(ort_err)?;
        if self.device == Device::Cuda {
            tracing::warn!("cuda execution provider not bundled in this build; using cpu");
        }
        let builder = builder
            .with_execution_providers([ep::CPU::default().build()])
            .map_err(ort_err)?;
        builder.commit_from_file(path).map_err(ort_err)
    }
}

impl SpeechEngine for CtcEngine {
    fn engine_name(&self) -> &str {
        self.spec.engine_id
    }

    fn supported_languages(&self) -> Vec<&'static str> {
        self.spec.languages.to_vec()
    }

    fn params(&self) -> &EngineParams {
        &self.params
    }

    fn is_loaded(&self) -> bool {
        self.session.is_some() && self.tokenizer.is_some()
    }

    fn check_deps(&mut self) -> Result<(), EngineError> {
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
            let url = format!(
                "https://huggingface.co/{}/resolve/main/{file}",
                self.spec.repo
            );
            progress((i * 100 / missing.len()) as u8, &format!("downloading {file}"));
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
        self.session = Some(self.build_session(&self.model_dir.join("model.onnx"))?);
        self.tokenizer = Some(
            Tokenizer::from_file(self.model_dir.join("tokenizer.json"))
                .map_err(|e| EngineError::ModelLoad(e.to_string()))?,
        );
        info!(
            engine = self.spec.engine_id,
            language = self.language.as_str(),
            "ctc session ready"
        );
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
        let session = self.session.as_mut().expect("checked is_loaded");
        let tokenizer = self.tokenizer.as_ref().expect("checked is_loaded");

        let signal = ndarray::Array2::<f32>::from_shape_vec((1, audio.len()), audio.to_vec())
            .map_err(|e| EngineError::Inference(e.to_string()))?;
        let signal_val =
            Value::from_array(signal).map_err(|e: OrtError| EngineError::Inference(e.to_string()))?;
        let length = ndarray::Array1::<i64>::from_elem(1, audio.len() as i64);
        let length_val =
            Value::from_array(length).map_err(|e: OrtError| EngineError::Inference(e.to_string()))?;

        let outputs = session
            .run(ort::inputs![
                "audio_signal" => signal_val,
                "length"       => length_val,
            ])
            .map_err(|e| EngineError::Inference(e.to_string()))?;

        let (shape, logprobs) = outputs[0]
            .try_extract_tensor::<f32>()
            .map_err(|e| EngineError::Inference(e.to_string()))?;
        if shape.len() < 3 {
            return Err(EngineError::Inference(format!(
                "unexpected ctc output rank: {shape:?}"
            )));
        }
        let frames = shape[1] as usize;
        let classes = shape[2] as usize;
        let blank = (classes - 1) as u32;

        let (ids, confidence) = ctc_collapse(logprobs, frames, classes, blank);
        if ids.is_empty() {
            return Ok(Transcription::empty());
        }
        let text = tokenizer
            .decode(&ids, true)
            .map_err(|e| EngineError::Inference(e.to_string()))?
            .trim()
            .to_string();

        debug!(frames, tokens = ids.len(), confidence, "ctc transcription");
        Ok(Transcription { text, confidence })
    }

    fn cleanup(&mut self) {
        self.session = None;
        self.tokenizer = None;
    }
}

/// Greedy CTC collapse: per-frame argmax, merge repeats, drop blanks.
///
/// Returns surviving token ids and the mean (exp) probability of the frames
/// that produced them.
fn ctc_collapse(logprobs: &[f32], frames: usize, classes: usize, blank: u32) -> (Vec<u32>, f32) {
    let mut ids = Vec::new();
    let mut prob_sum = 0f32;
    let mut prev: Option<u32> = None;

    for frame in 0..frames {
        let row = &logprobs[frame * classes..(frame + 1) * classes];
        let (mut best, mut best_lp) = (0u32, f32::NEG_INFINITY);
        for (i, &lp) in row.iter().enumerate() {
            if lp > best_lp {
                best_lp = lp;
                best = i as u32;
            }
        }
        if best != blank && prev != Some(best) {
            ids.push(best);
            prob_sum += best_lp.exp().clamp(0.0, 1.0);
        }
        prev = Some(best);
    }

    let confidence = if ids.is_empty() {
        0.0
    } else {
        prob_sum / ids.len() as f32
    };
    (ids, confidence)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::registry::{engine_info, ParamValue};

    fn make(id: &str, overrides: &[(&str, ParamValue)]) -> Result<CtcEngine, EngineError> {
        let info = engine_info(id).unwrap();
        CtcEngine::from_registry(info, EngineParams::merged(&info.default_params, overrides), Device::Cpu)
    }

    #[test]
    fn parakeet_variants_pin_their_language() {
        assert!(make("parakeet-en", &[]).is_ok());
        assert!(make("parakeet-ja", &[]).is_ok());
        let err = make("parakeet-en", &[("language", ParamValue::from("ja"))]).unwrap_err();
        assert!(matches!(err, EngineError::InvalidOption(_)));
    }

    #[test]
    fn canary_accepts_its_small_language_set() {
        assert!(make("canary", &[("language", ParamValue::from("de"))]).is_ok());
        assert!(make("canary", &[("language", ParamValue::from("ja"))]).is_err());
    }

    #[test]
    fn reazonspeech_is_japanese_only() {
        let engine = make("reazonspeech", &[]).unwrap();
        assert_eq!(engine.supported_languages(), vec!["ja"]);
    }

    #[test]
    fn ctc_collapse_merges_repeats_and_drops_blanks() {
        // 3 classes, blank = 2; frames argmax: [0, 0, 2, 1, 1, 2, 0]
        let hi = 0.0f32; // ln(1.0)
        let lo = -10.0f32;
        #[rustfmt::skip]
        let logprobs = vec![
            hi, lo, lo,
            hi, lo, lo,
            lo, lo, hi,
            lo, hi, lo,
            lo, hi, lo,
            lo, lo, hi,
            hi, lo, lo,
        ];
        let (ids, confidence) = ctc_collapse(&logprobs, 7, 3, 2);
        assert_eq!(ids, vec![0, 1, 0]);
        assert!((confidence - 1.0).abs() < 1e-5);
    }

    #[test]
    fn ctc_collapse_empty_on_all_blank() {
        let frame = [-10.0f32, -10.0, 0.0];
        let logprobs: Vec<f32> = frame.iter().copied().cycle().take(12).collect();
        let (ids, confidence) = ctc_collapse(&logprobs, 4, 3, 2);
        assert!(ids.is_empty());
        assert_eq!(confidence, 0.0);
    }
}
