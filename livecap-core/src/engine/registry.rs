//! Static engine registry and factory.
//!
//! Every engine is a registry entry (metadata + defaults) plus a variant
//! constructor keyed by [`EngineKind`]. Adding an engine means adding one
//! entry and one `match` arm — there is no runtime discovery.

use std::collections::HashMap;
use std::str::FromStr;
use std::sync::OnceLock;

use serde::Serialize;
use tracing::warn;

use crate::engine::stub::StubEngine;
use crate::engine::SpeechEngine;
use crate::error::EngineError;
use crate::lang;

/// Compute device preference.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Device {
    /// Try CUDA, fall back to CPU.
    Auto,
    Cpu,
    Cuda,
}

impl FromStr for Device {
    type Err = EngineError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "auto" => Ok(Self::Auto),
            "cpu" => Ok(Self::Cpu),
            // `gpu` is the CLI-facing alias.
            "cuda" | "gpu" => Ok(Self::Cuda),
            other => Err(EngineError::InvalidOption(format!(
                "unknown device: '{other}' (expected auto, cpu, or cuda)"
            ))),
        }
    }
}

impl std::fmt::Display for Device {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Auto => "auto",
            Self::Cpu => "cpu",
            Self::Cuda => "cuda",
        };
        f.write_str(s)
    }
}

/// A typed engine parameter value.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum ParamValue {
    Str(String),
    Int(i64),
    Float(f64),
    Bool(bool),
}

impl ParamValue {
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::Str(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_int(&self) -> Option<i64> {
        match self {
            Self::Int(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_float(&self) -> Option<f64> {
        match self {
            Self::Float(v) => Some(*v),
            Self::Int(v) => Some(*v as f64),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Self::Bool(v) => Some(*v),
            _ => None,
        }
    }
}

impl From<&str> for ParamValue {
    fn from(v: &str) -> Self {
        Self::Str(v.to_string())
    }
}

impl From<i64> for ParamValue {
    fn from(v: i64) -> Self {
        Self::Int(v)
    }
}

impl From<f64> for ParamValue {
    fn from(v: f64) -> Self {
        Self::Float(v)
    }
}

impl From<bool> for ParamValue {
    fn from(v: bool) -> Self {
        Self::Bool(v)
    }
}

/// Merged construction parameters: registry defaults with caller overrides
/// on top (overrides win).
#[derive(Debug, Clone, Default)]
pub struct EngineParams {
    map: HashMap<String, ParamValue>,
}

impl EngineParams {
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn merged(defaults: &[(&str, ParamValue)], overrides: &[(&str, ParamValue)]) -> Self {
        let mut map: HashMap<String, ParamValue> = defaults
            .iter()
            .map(|(k, v)| (k.to_string(), v.clone()))
            .collect();
        for (k, v) in overrides {
            map.insert(k.to_string(), v.clone());
        }
        Self { map }
    }

    pub fn get(&self, key: &str) -> Option<&ParamValue> {
        self.map.get(key)
    }

    pub fn get_str(&self, key: &str) -> Option<&str> {
        self.map.get(key).and_then(ParamValue::as_str)
    }

    pub fn get_int(&self, key: &str) -> Option<i64> {
        self.map.get(key).and_then(ParamValue::as_int)
    }

    pub fn get_float(&self, key: &str) -> Option<f64> {
        self.map.get(key).and_then(ParamValue::as_float)
    }

    pub fn get_bool(&self, key: &str) -> Option<bool> {
        self.map.get(key).and_then(ParamValue::as_bool)
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.map.keys().map(String::as_str)
    }
}

/// Implementation variant tag.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum EngineKind {
    Whisper,
    Parakeet,
    Canary,
    ReazonSpeech,
    Stub,
}

/// Static metadata describing one registered engine.
pub struct EngineInfo {
    pub id: &'static str,
    pub display_name: &'static str,
    pub description: &'static str,
    pub kind: EngineKind,
    pub supported_languages: &'static [&'static str],
    pub requires_download: bool,
    pub device_support: &'static [Device],
    /// Whether the engine is usable for interim (streaming) transcription.
    pub streaming: bool,
    /// Engines declaring `false` are serialised by the worker pool.
    pub thread_safe: bool,
    pub available_model_sizes: &'static [&'static str],
    pub default_params: Vec<(&'static str, ParamValue)>,
}

/// The immutable engine registry, built once per process.
pub fn registry() -> &'static [EngineInfo] {
    static REGISTRY: OnceLock<Vec<EngineInfo>> = OnceLock::new();
    REGISTRY.get_or_init(|| {
        vec![
            EngineInfo {
                id: "whisper",
                display_name: "Whisper",
                description: "OpenAI Whisper (ONNX export), 99 languages",
                kind: EngineKind::Whisper,
                supported_languages: lang::WHISPER_LANGUAGES,
                requires_download: true,
                device_support: &[Device::Cpu, Device::Cuda],
                streaming: true,
                thread_safe: false,
                available_model_sizes: &["tiny", "base", "small", "medium", "large-v3"],
                default_params: vec![
                    ("model_size", ParamValue::from("small")),
                    ("language", ParamValue::from("en")),
                    ("temperature", ParamValue::from(0.0)),
                ],
            },
            EngineInfo {
                id: "parakeet-en",
                display_name: "Parakeet (English)",
                description: "NVIDIA Parakeet CTC, English",
                kind: EngineKind::Parakeet,
                supported_languages: &["en"],
                requires_download: true,
                device_support: &[Device::Cpu, Device::Cuda],
                streaming: true,
                thread_safe: false,
                available_model_sizes: &[],
                default_params: vec![("language", ParamValue::from("en"))],
            },
            EngineInfo {
                id: "parakeet-ja",
                display_name: "Parakeet (Japanese)",
                description: "NVIDIA Parakeet CTC, Japanese",
                kind: EngineKind::Parakeet,
                supported_languages: &["ja"],
                requires_download: true,
                device_support: &[Device::Cpu, Device::Cuda],
                streaming: true,
                thread_safe: false,
                available_model_sizes: &[],
                default_params: vec![("language", ParamValue::from("ja"))],
            },
            EngineInfo {
                id: "canary",
                display_name: "Canary",
                description: "NVIDIA Canary multilingual CTC",
                kind: EngineKind::Canary,
                supported_languages: &["en", "de", "es", "fr"],
                requires_download: true,
                device_support: &[Device::Cpu, Device::Cuda],
                streaming: false,
                thread_safe: false,
                available_model_sizes: &[],
                default_params: vec![("language", ParamValue::from("en"))],
            },
            EngineInfo {
                id: "reazonspeech",
                display_name: "ReazonSpeech",
                description: "ReazonSpeech Japanese CTC",
                kind: EngineKind::ReazonSpeech,
                supported_languages: &["ja"],
                requires_download: true,
                device_support: &[Device::Cpu],
                streaming: false,
                thread_safe: false,
                available_model_sizes: &[],
                default_params: vec![("language", ParamValue::from("ja"))],
            },
            EngineInfo {
                id: "stub",
                display_name: "Stub (development)",
                description: "Deterministic echo engine, no model files",
                kind: EngineKind::Stub,
                supported_languages: lang::WHISPER_LANGUAGES,
                requires_download: false,
                device_support: &[Device::Cpu],
                streaming: true,
                thread_safe: false,
                available_model_sizes: &[],
                default_params: vec![
                    ("language", ParamValue::from("en")),
                    ("confidence", ParamValue::from(1.0)),
                ],
            },
        ]
    })
}

/// Look up one registry entry.
pub fn engine_info(id: &str) -> Option<&'static EngineInfo> {
    registry().iter().find(|info| info.id == id)
}

/// Every registered engine id whose supported set contains `language`
/// (after normalization).
pub fn engines_for_language(language: &str) -> Vec<&'static str> {
    let Some(code) = lang::normalize(language) else {
        return Vec::new();
    };
    registry()
        .iter()
        .filter(|info| info.supported_languages.contains(&code.as_str()))
        .map(|info| info.id)
        .collect()
}

/// Construct an engine from the registry.
///
/// Parameters are `default_params ∪ overrides` with overrides winning. The
/// model is *not* loaded — call [`super::load_model`] before transcribing.
pub fn create_engine(
    engine_id: &str,
    device: Device,
    overrides: &[(&str, ParamValue)],
) -> Result<Box<dyn SpeechEngine>, EngineError> {
    if engine_id == "auto" {
        return Err(EngineError::AutoDeprecated);
    }
    let info =
        engine_info(engine_id).ok_or_else(|| EngineError::UnknownEngine(engine_id.to_string()))?;

    if device != Device::Auto && !info.device_support.contains(&device) {
        warn!(
            engine = engine_id,
            %device,
            "requested device not in engine's declared support; will fall back at load"
        );
    }

    let params = EngineParams::merged(&info.default_params, overrides);

    match info.kind {
        EngineKind::Stub => Ok(Box::new(StubEngine::from_params(params))),
        #[cfg(feature = "onnx")]
        EngineKind::Whisper => Ok(Box::new(super::whisper::WhisperEngine::new(
            params, device,
        )?)),
        #[cfg(feature = "onnx")]
        EngineKind::Parakeet | EngineKind::Canary | EngineKind::ReazonSpeech => Ok(Box::new(
            super::ctc::CtcEngine::from_registry(info, params, device)?,
        )),
        #[cfg(not(feature = "onnx"))]
        _ => Err(EngineError::DependencyMissing(format!(
            "engine '{engine_id}' requires the 'onnx' build feature"
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn auto_is_rejected_as_deprecated() {
        let err = match create_engine("auto", Device::Auto, &[]) {
            Err(e) => e,
            Ok(_) => panic!("expected create_engine(\"auto\", ..) to fail"),
        };
        assert!(matches!(err, EngineError::AutoDeprecated));
    }

    #[test]
    fn unknown_engine_is_reported() {
        let err = match create_engine("nope", Device::Auto, &[]) {
            Err(e) => e,
            Ok(_) => panic!("expected create_engine(\"nope\", ..) to fail"),
        };
        match err {
            EngineError::UnknownEngine(id) => assert_eq!(id, "nope"),
            other => panic!("unexpected: {other}"),
        }
    }

    #[test]
    fn overrides_win_and_defaults_fill_gaps() {
        let engine = create_engine(
            "stub",
            Device::Cpu,
            &[("language", ParamValue::from("ja"))],
        )
        .unwrap();
        // Overridden key
        assert_eq!(engine.params().get_str("language"), Some("ja"));
        // Untouched default
        assert_eq!(engine.params().get_float("confidence"), Some(1.0));
    }

    #[test]
    fn merged_params_property() {
        let defaults = [
            ("a", ParamValue::from(1i64)),
            ("b", ParamValue::from("x")),
            ("c", ParamValue::from(true)),
        ];
        let overrides = [("b", ParamValue::from("y")), ("d", ParamValue::from(2.5))];
        let merged = EngineParams::merged(&defaults, &overrides);
        for (k, v) in &defaults {
            if overrides.iter().all(|(ok, _)| ok != k) {
                assert_eq!(merged.get(k), Some(v));
            }
        }
        for (k, v) in &overrides {
            assert_eq!(merged.get(k), Some(v));
        }
    }

    #[test]
    fn engines_for_language_normalizes_region_codes() {
        let zh = engines_for_language("zh-CN");
        // whisper + stub both claim the whisper language set
        assert!(zh.contains(&"whisper"));
        assert!(zh.contains(&"stub"));
        assert!(!zh.contains(&"parakeet-en"));

        let ja = engines_for_language("ja");
        assert!(ja.contains(&"parakeet-ja"));
        assert!(ja.contains(&"reazonspeech"));
        assert!(!ja.contains(&"canary"));
    }

    #[test]
    fn gpu_parses_as_cuda_alias() {
        assert_eq!("gpu".parse::<Device>().unwrap(), Device::Cuda);
        assert_eq!("auto".parse::<Device>().unwrap(), Device::Auto);
        assert!("tpu".parse::<Device>().is_err());
    }

    #[test]
    fn registry_ids_are_unique() {
        let mut ids: Vec<_> = registry().iter().map(|i| i.id).collect();
        ids.sort_unstable();
        let len = ids.len();
        ids.dedup();
        assert_eq!(ids.len(), len);
    }
}
