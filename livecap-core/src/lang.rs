//! Language-code normalization.
//!
//! Engines accept BCP-47-ish input ("zh-CN", "pt_BR", "jpn") at construction
//! and internally work with bare ISO 639-1 codes. Normalization here is a
//! lowercase fold, region stripping, and a small 639-2 alias table — enough
//! for every code the bundled engines declare.

/// The 99 languages understood by the Whisper family, as ISO 639-1
/// (or Whisper's extended codes where no two-letter code exists).
pub const WHISPER_LANGUAGES: &[&str] = &[
    "en", "zh", "de", "es", "ru", "ko", "fr", "ja", "pt", "tr", "pl", "ca", "nl", "ar", "sv",
    "it", "id", "hi", "fi", "vi", "he", "uk", "el", "ms", "cs", "ro", "da", "hu", "ta", "no",
    "th", "ur", "hr", "bg", "lt", "la", "mi", "ml", "cy", "sk", "te", "fa", "lv", "bn", "sr",
    "az", "sl", "kn", "et", "mk", "br", "eu", "is", "hy", "ne", "mn", "bs", "kk", "sq", "sw",
    "gl", "mr", "pa", "si", "km", "sn", "yo", "so", "af", "oc", "ka", "be", "tg", "sd", "gu",
    "am", "yi", "lo", "uz", "fo", "ht", "ps", "tk", "nn", "mt", "sa", "lb", "my", "bo", "tl",
    "mg", "as", "tt", "haw", "ln", "ha", "ba", "jw", "su",
];

/// ISO 639-2 (B and T) aliases for the codes the bundled engines care about.
const ALIASES: &[(&str, &str)] = &[
    ("eng", "en"),
    ("jpn", "ja"),
    ("chi", "zh"),
    ("zho", "zh"),
    ("cmn", "zh"),
    ("yue", "zh"),
    ("ger", "de"),
    ("deu", "de"),
    ("fre", "fr"),
    ("fra", "fr"),
    ("spa", "es"),
    ("kor", "ko"),
    ("rus", "ru"),
    ("por", "pt"),
    ("ita", "it"),
    ("dut", "nl"),
    ("nld", "nl"),
    ("ara", "ar"),
    ("hin", "hi"),
    ("tur", "tr"),
    ("pol", "pl"),
    ("ukr", "uk"),
    ("vie", "vi"),
    ("tha", "th"),
    ("ind", "id"),
];

/// Normalize a BCP-47-ish language tag to a bare lowercase primary subtag.
///
/// `"zh-CN"` and `"zh_Hans"` become `"zh"`, `"JPN"` becomes `"ja"`.
/// Returns `None` for empty or structurally hopeless input.
pub fn normalize(tag: &str) -> Option<String> {
    let primary = tag
        .trim()
        .split(['-', '_'])
        .next()
        .unwrap_or_default()
        .to_ascii_lowercase();
    if primary.is_empty() || !primary.chars().all(|c| c.is_ascii_alphabetic()) {
        return None;
    }
    if let Some((_, iso1)) = ALIASES.iter().find(|(alias, _)| *alias == primary) {
        return Some((*iso1).to_string());
    }
    // Bare 2-letter codes (and Whisper's few 3-letter extras) pass through.
    if primary.len() == 2 || WHISPER_LANGUAGES.contains(&primary.as_str()) {
        return Some(primary);
    }
    None
}

/// Whether `tag` normalizes into the Whisper language set.
pub fn is_whisper_language(tag: &str) -> bool {
    normalize(tag)
        .map(|code| WHISPER_LANGUAGES.contains(&code.as_str()))
        .unwrap_or(false)
}
