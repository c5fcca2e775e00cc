//! Result records emitted by the streaming and batch pipelines.
//!
//! All timestamps are `f64` seconds; conversion to integer milliseconds
//! happens only at SRT serialization time so rounding never accumulates.
//! Records serialize camelCase for downstream consumers.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

/// A committed, final transcription of one speech segment.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TranscriptionResult {
    /// Recognised text.
    pub text: String,
    /// Segment start within the session, seconds.
    pub start_time_s: f64,
    /// Segment end within the session, seconds.
    pub end_time_s: f64,
    /// Always `true` for this record type.
    pub is_final: bool,
    /// Model confidence in [0.0, 1.0].
    pub confidence: f32,
    /// ISO 639-1 language the engine transcribed in.
    pub language: String,
    /// Which session/source produced this result.
    pub source_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub translated_text: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub target_language: Option<String>,
}

impl TranscriptionResult {
    pub fn duration_s(&self) -> f64 {
        self.end_time_s - self.start_time_s
    }

    /// Format as one SRT entry: index line, timecode line, text line,
    /// trailing newline.
    pub fn to_srt_entry(&self, index: usize) -> String {
        format_srt_entry(index, self.start_time_s, self.end_time_s, &self.text)
    }
}

/// A non-final transcription of a still-open segment.
///
/// Carries no start/end — only how much audio of the open segment had been
/// accumulated when the interim was produced.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InterimResult {
    pub text: String,
    /// Elapsed duration of the open segment, seconds.
    pub accumulated_time_s: f64,
    pub source_id: String,
}

/// One entry of a batch-transcribed subtitle track.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FileSubtitleSegment {
    /// 1-based monotone index.
    pub index: usize,
    pub start_s: f64,
    pub end_s: f64,
    pub text: String,
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub metadata: HashMap<String, String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub translated_text: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub target_language: Option<String>,
}

impl FileSubtitleSegment {
    pub fn to_srt_entry(&self) -> String {
        format_srt_entry(self.index, self.start_s, self.end_s, &self.text)
    }

    /// Same entry but preferring `translated_text` when present.
    pub fn to_srt_entry_translated(&self) -> String {
        let text = self.translated_text.as_deref().unwrap_or(&self.text);
        format_srt_entry(self.index, self.start_s, self.end_s, text)
    }
}

/// Output of a translator backend.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TranslationResult {
    pub text: String,
    pub original_text: String,
    pub source_lang: String,
    pub target_lang: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub confidence: Option<f32>,
    pub source_id: String,
}

/// One item of the streaming result sequence.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase", tag = "kind")]
pub enum TranscriptEvent {
    Interim(InterimResult),
    Final(TranscriptionResult),
}

impl TranscriptEvent {
    pub fn is_final(&self) -> bool {
        matches!(self, TranscriptEvent::Final(_))
    }

    pub fn as_final(&self) -> Option<&TranscriptionResult> {
        match self {
            TranscriptEvent::Final(r) => Some(r),
            TranscriptEvent::Interim(_) => None,
        }
    }

    pub fn as_interim(&self) -> Option<&InterimResult> {
        match self {
            TranscriptEvent::Interim(r) => Some(r),
            TranscriptEvent::Final(_) => None,
        }
    }
}

/// `HH:MM:SS,mmm` with milliseconds as floor-of `t * 1000`.
pub fn format_srt_timestamp(seconds: f64) -> String {
    let total_ms = (seconds.max(0.0) * 1000.0).floor() as u64;
    let ms = total_ms % 1000;
    let total_s = total_ms / 1000;
    let h = total_s / 3600;
    let m = (total_s % 3600) / 60;
    let s = total_s % 60;
    format!("{h:02}:{m:02}:{s:02},{ms:03}")
}

fn format_srt_entry(index: usize, start_s: f64, end_s: f64, text: &str) -> String {
    format!(
        "{index}\n{} --> {}\n{text}\n",
        format_srt_timestamp(start_s),
        format_srt_timestamp(end_s),
    )
}

/// Parse one SRT entry produced by [`format_srt_entry`].
///
/// Returns `(index, start_s, end_s, text)`. Used by round-trip tests and
/// subtitle tooling; tolerant of a trailing blank line.
pub fn parse_srt_entry(entry: &str) -> Option<(usize, f64, f64, String)> {
    let mut lines = entry.lines();
    let index: usize = lines.next()?.trim().parse().ok()?;
    let timecodes = lines.next()?;
    let (start_raw, end_raw) = timecodes.split_once(" --> ")?;
    let start = parse_srt_timestamp(start_raw.trim())?;
    let end = parse_srt_timestamp(end_raw.trim())?;
    let text = lines.collect::<Vec<_>>().join("\n");
    let text = text.trim_end_matches('\n').to_string();
    Some((index, start, end, text))
}

fn parse_srt_timestamp(raw: &str) -> Option<f64> {
    let (hms, ms_raw) = raw.split_once(',')?;
    let mut parts = hms.splitn(3, ':');
    let h: u64 = parts.next()?.parse().ok()?;
    let m: u64 = parts.next()?.parse().ok()?;
    let s: u64 = parts.next()?.parse().ok()?;
    let ms: u64 = ms_raw.parse().ok()?;
    Some((h * 3600 + m * 60 + s) as f64 + ms as f64 / 1000.0)
}
