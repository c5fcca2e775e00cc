//! Resource locators: model cache, general cache, and the demux binary.
//!
//! All accessors are idempotent and cheap after the first call — path
//! resolution is guarded by `OnceLock` so concurrent first use resolves
//! exactly once. Environment overrides:
//!
//! | Variable | Meaning |
//! |----------|---------|
//! | `LIVECAP_MODELS_DIR` | Root for per-engine model directories |
//! | `LIVECAP_CACHE_DIR` | Root for the general cache |
//! | `LIVECAP_FFMPEG_BIN` | Directory containing the ffmpeg binary |
//! | `LIVECAP_TRANSLATION_TIMEOUT` | Translator per-call timeout (seconds) |

use std::path::{Path, PathBuf};
use std::sync::OnceLock;
use std::time::Duration;

use tracing::warn;

use crate::error::FileError;

/// Default translator per-call timeout.
pub const DEFAULT_TRANSLATION_TIMEOUT: Duration = Duration::from_secs(5);

fn env_dir(name: &str) -> Option<PathBuf> {
    std::env::var(name)
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
        .map(PathBuf::from)
}

fn platform_data_dir() -> PathBuf {
    #[cfg(target_os = "windows")]
    {
        std::env::var_os("APPDATA")
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from("."))
            .join("livecap")
    }
    #[cfg(not(target_os = "windows"))]
    {
        std::env::var_os("XDG_DATA_HOME")
            .map(PathBuf::from)
            .unwrap_or_else(|| {
                std::env::var_os("HOME")
                    .map(PathBuf::from)
                    .unwrap_or_else(|| PathBuf::from("/tmp"))
                    .join(".local")
                    .join("share")
            })
            .join("livecap")
    }
}

fn models_root() -> &'static Path {
    static ROOT: OnceLock<PathBuf> = OnceLock::new();
    ROOT.get_or_init(|| {
        env_dir("LIVECAP_MODELS_DIR").unwrap_or_else(|| platform_data_dir().join("models"))
    })
}

fn cache_root() -> &'static Path {
    static ROOT: OnceLock<PathBuf> = OnceLock::new();
    ROOT.get_or_init(|| {
        env_dir("LIVECAP_CACHE_DIR").unwrap_or_else(|| platform_data_dir().join("cache"))
    })
}

/// Directory holding the model files for `engine_name`.
///
/// The layout below this directory is chosen by the engine and opaque here.
pub fn models_dir(engine_name: &str) -> PathBuf {
    models_root().join(engine_name)
}

/// Scoped cache directory for `purpose` (e.g. `"ffmpeg"`), created on demand.
pub fn cache_dir(purpose: &str) -> PathBuf {
    let dir = cache_root().join(purpose);
    if let Err(e) = std::fs::create_dir_all(&dir) {
        warn!(dir = ?dir, error = %e, "failed to create cache dir");
    }
    dir
}

#[cfg(windows)]
const FFMPEG_BINARY: &str = "ffmpeg.exe";
#[cfg(not(windows))]
const FFMPEG_BINARY: &str = "ffmpeg";

/// Resolve the demux (ffmpeg) binary.
///
/// Resolution order: `LIVECAP_FFMPEG_BIN` directory, then `PATH`, then the
/// `ffmpeg` cache dir. Resolved once per process.
pub fn ffmpeg_executable() -> Result<PathBuf, FileError> {
    static RESOLVED: OnceLock<Option<PathBuf>> = OnceLock::new();
    RESOLVED
        .get_or_init(|| {
            if let Some(dir) = env_dir("LIVECAP_FFMPEG_BIN") {
                let candidate = dir.join(FFMPEG_BINARY);
                if candidate.is_file() {
                    return Some(candidate);
                }
                warn!(dir = ?dir, "LIVECAP_FFMPEG_BIN set but no ffmpeg binary inside");
            }
            if let Some(path) = search_path(FFMPEG_BINARY) {
                return Some(path);
            }
            let cached = cache_dir("ffmpeg").join(FFMPEG_BINARY);
            cached.is_file().then_some(cached)
        })
        .clone()
        .ok_or_else(|| FileError::Decode("ffmpeg binary not found".into()))
}

fn search_path(binary: &str) -> Option<PathBuf> {
    let path = std::env::var_os("PATH")?;
    std::env::split_paths(&path)
        .map(|dir| dir.join(binary))
        .find(|candidate| candidate.is_file())
}

/// Translator per-call timeout, `LIVECAP_TRANSLATION_TIMEOUT` override in
/// (possibly fractional) seconds.
pub fn translation_timeout() -> Duration {
    std::env::var("LIVECAP_TRANSLATION_TIMEOUT")
        .ok()
        .and_then(|v| v.trim().parse::<f64>().ok())
        .filter(|s| *s > 0.0)
        .map(Duration::from_secs_f64)
        .unwrap_or(DEFAULT_TRANSLATION_TIMEOUT)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn models_dir_is_per_engine() {
        let a = models_dir("whisper");
        let b = models_dir("canary");
        assert_ne!(a, b);
        assert!(a.ends_with("whisper"));
    }

    #[test]
    fn models_dir_is_idempotent() {
        assert_eq!(models_dir("whisper"), models_dir("whisper"));
    }

    #[test]
    fn default_translation_timeout_is_five_seconds() {
        // The env override is process-wide; only assert the default constant.
        assert_eq!(DEFAULT_TRANSLATION_TIMEOUT, Duration::from_secs(5));
    }
}
