//! Silero neural VAD backend.
//!
//! Wraps the Silero VAD ONNX model (<https://github.com/snakers4/silero-vad>)
//! and emits one speech probability per 512-sample frame. Both published
//! interfaces are supported, resolved by tensor names at load time:
//!
//! | Interface | State tensors |
//! |-----------|---------------|
//! | v3/v4 LSTM | `h` + `c`, each `[2,1,64]`, outputs `hn`/`cn` |
//! | v5 GRU | single `state` `[2,1,128]`, output `stateN` |
//!
//! The recurrent state carries across frames; `reset()` zeroes it between
//! independent sessions.

use std::path::{Path, PathBuf};

use ndarray::{Array1, Array2, Array3};
use ort::session::builder::SessionBuilder;
use ort::session::{Session, SessionInputValue};
use ort::value::Value;
use tracing::{debug, info};

use crate::error::VadError;
use crate::vad::{VadBackend, FRAME_SIZE, VAD_SAMPLE_RATE};

/// v3/v4 LSTM state size: 2 layers × 1 batch × 64 units.
const LSTM_STATE: usize = 128;
/// v5 GRU state size: 2 layers × 1 batch × 128 units.
const GRU_STATE: usize = 256;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum IoMode {
    /// Separate `h`/`c` tensors (v3/v4).
    Lstm,
    /// Single combined `state` tensor (v5).
    Gru,
}

/// Neural VAD over a Silero ONNX model.
pub struct SileroBackend {
    session: Session,
    io_mode: IoMode,
    input_name: String,
    sr_name: Option<String>,
    output_name: String,
    state_in_names: Vec<String>,
    state_out_names: Vec<String>,
    /// Flat recurrent state buffers, row-major.
    h: Vec<f32>,
    c: Vec<f32>,
    state: Vec<f32>,
}

impl SileroBackend {
    /// Load the model from `path`.
    pub fn new(path: impl AsRef<Path>) -> Result<Self, VadError> {
        let path = path.as_ref();
        if !path.exists() {
            return Err(VadError::Backend(format!(
                "silero model not found: {}",
                path.display()
            )));
        }

        let session = SessionBuilder::new()
            .map_err(|e| VadError::Backend(e.to_string()))?
            .commit_from_file(path)
            .map_err(|e| VadError::Backend(e.to_string()))?;

        let input_names: Vec<String> = session
            .inputs()
            .iter()
            .map(|outlet| outlet.name().to_string())
            .collect();
        let output_names: Vec<String> = session
            .outputs()
            .iter()
            .map(|outlet| outlet.name().to_string())
            .collect();

        let input_name = resolve_name(&input_names, &["input", "audio", "x"])
            .or_else(|| input_names.first().cloned())
            .ok_or_else(|| VadError::Backend("silero model has no inputs".into()))?;
        let sr_name = resolve_name(&input_names, &["sr", "sample_rate"]);
        let output_name = resolve_name(&output_names, &["output", "speech_prob", "prob"])
            .or_else(|| output_names.first().cloned())
            .ok_or_else(|| VadError::Backend("silero model has no outputs".into()))?;

        let h_name = resolve_name(&input_names, &["h", "state_h"]);
        let c_name = resolve_name(&input_names, &["c", "state_c"]);
        let hn_name = resolve_name(&output_names, &["hn", "state_hn", "h_out"]);
        let cn_name = resolve_name(&output_names, &["cn", "state_cn", "c_out"]);
        let state_name = resolve_name(&input_names, &["state", "h_0", "hidden"]);
        let state_out_name = resolve_name(&output_names, &["stateN", "state_out", "hn_out"]);

        let (io_mode, state_in_names, state_out_names) = match (h_name, c_name, hn_name, cn_name) {
            (Some(h), Some(c), Some(hn), Some(cn)) => (IoMode::Lstm, vec![h, c], vec![hn, cn]),
            _ => {
                let state_in = state_name.ok_or_else(|| {
                    VadError::Backend("silero model has no recognisable state tensors".into())
                })?;
                let state_out = state_out_name.ok_or_else(|| {
                    VadError::Backend("silero model has no state output tensor".into())
                })?;
                (IoMode::Gru, vec![state_in], vec![state_out])
            }
        };

        info!(path = ?path, ?io_mode, "silero vad loaded");

        Ok(Self {
            session,
            io_mode,
            input_name,
            sr_name,
            output_name,
            state_in_names,
            state_out_names,
            h: vec![0.0; LSTM_STATE],
            c: vec![0.0; LSTM_STATE],
            state: vec![0.0; GRU_STATE],
        })
    }

    /// Load from the default models directory.
    pub fn from_default_model() -> Result<Self, VadError> {
        Self::new(Self::default_model_path())
    }

    /// Default location of the model file.
    pub fn default_model_path() -> PathBuf {
        crate::resources::models_dir("silero-vad").join("silero_vad.onnx")
    }
}

fn resolve_name(candidates: &[String], preferred: &[&str]) -> Option<String> {
    preferred.iter().find_map(|needle| {
        candidates
            .iter()
            .find(|name| name.eq_ignore_ascii_case(needle))
            .cloned()
    })
}

impl VadBackend for SileroBackend {
    fn process(&mut self, frame: &[f32]) -> Result<f32, VadError> {
        debug_assert_eq!(frame.len(), FRAME_SIZE);

        let input_arr = Array2::<f32>::from_shape_vec((1, FRAME_SIZE), frame.to_vec())
            .map_err(|e| VadError::Backend(e.to_string()))?;
        let input_val =
            Value::from_array(input_arr).map_err(|e: ort::Error| VadError::Backend(e.to_string()))?;

        let mut inputs: Vec<(String, SessionInputValue<'_>)> =
            vec![(self.input_name.clone(), input_val.into())];

        if let Some(sr_name) = &self.sr_name {
            let sr_arr = Array1::<i64>::from_elem(1, VAD_SAMPLE_RATE as i64);
            let sr_val = Value::from_array(sr_arr)
                .map_err(|e: ort::Error| VadError::Backend(e.to_string()))?;
            inputs.push((sr_name.clone(), sr_val.into()));
        }

        match self.io_mode {
            IoMode::Lstm => {
                for (name, buf) in self.state_in_names.iter().zip([&self.h, &self.c]) {
                    let arr = Array3::<f32>::from_shape_vec((2, 1, 64), buf.clone())
                        .map_err(|e| VadError::Backend(e.to_string()))?;
                    let val = Value::from_array(arr)
                        .map_err(|e: ort::Error| VadError::Backend(e.to_string()))?;
                    inputs.push((name.clone(), val.into()));
                }
            }
            IoMode::Gru => {
                let arr = Array3::<f32>::from_shape_vec((2, 1, 128), self.state.clone())
                    .map_err(|e| VadError::Backend(e.to_string()))?;
                let val = Value::from_array(arr)
                    .map_err(|e: ort::Error| VadError::Backend(e.to_string()))?;
                inputs.push((self.state_in_names[0].clone(), val.into()));
            }
        }

        let outputs = self
            .session
            .run(inputs)
            .map_err(|e| VadError::Backend(e.to_string()))?;

        let prob_output = outputs
            .get(self.output_name.as_str())
            .unwrap_or(&outputs[0]);
        let (_, prob_data) = prob_output
            .try_extract_tensor::<f32>()
            .map_err(|e| VadError::Backend(e.to_string()))?;
        let prob = prob_data.first().copied().unwrap_or(0.0);

        // Carry the recurrent state into the next frame.
        match self.io_mode {
            IoMode::Lstm => {
                for (name, buf) in self
                    .state_out_names
                    .iter()
                    .zip([&mut self.h, &mut self.c])
                {
                    if let Some(out) = outputs.get(name.as_str()) {
                        let (_, data) = out
                            .try_extract_tensor::<f32>()
                            .map_err(|e| VadError::Backend(e.to_string()))?;
                        *buf = data.to_vec();
                    }
                }
            }
            IoMode::Gru => {
                if let Some(out) = outputs.get(self.state_out_names[0].as_str()) {
                    let (_, data) = out
                        .try_extract_tensor::<f32>()
                        .map_err(|e| VadError::Backend(e.to_string()))?;
                    self.state = data.to_vec();
                }
            }
        }

        debug!(prob, "silero frame");
        Ok(prob.clamp(0.0, 1.0))
    }

    fn reset(&mut self) {
        self.h.iter_mut().for_each(|v| *v = 0.0);
        self.c.iter_mut().for_each(|v| *v = 0.0);
        self.state.iter_mut().for_each(|v| *v = 0.0);
    }

    fn name(&self) -> &'static str {
        "silero"
    }
}
