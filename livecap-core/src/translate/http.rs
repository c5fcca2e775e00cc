//! LibreTranslate-compatible HTTP translation backend.
//!
//! Speaks the `POST /translate` JSON API served by LibreTranslate and its
//! self-hosted clones. Context sentences are joined with newlines and
//! prepended to the query; the last line of the response is taken as the
//! translation of the input itself.

use serde::Deserialize;
use tracing::debug;

use crate::error::TranslationError;
use crate::results::TranslationResult;
use crate::translate::Translator;

const DEFAULT_ENDPOINT: &str = "http://127.0.0.1:5000/translate";

/// HTTP client for a LibreTranslate-style endpoint.
pub struct HttpTranslator {
    endpoint: String,
    api_key: Option<String>,
    client: reqwest::blocking::Client,
}

#[derive(Deserialize)]
struct TranslateResponse {
    #[serde(rename = "translatedText")]
    translated_text: String,
}

impl HttpTranslator {
    pub fn new(endpoint: impl Into<String>, api_key: Option<String>) -> Self {
        Self {
            endpoint: endpoint.into(),
            api_key,
            client: reqwest::blocking::Client::new(),
        }
    }

    /// Endpoint from `LIVECAP_TRANSLATE_URL` / key from
    /// `LIVECAP_TRANSLATE_API_KEY`, with the local default otherwise.
    pub fn from_env() -> Self {
        let endpoint = std::env::var("LIVECAP_TRANSLATE_URL")
            .ok()
            .filter(|v| !v.trim().is_empty())
            .unwrap_or_else(|| DEFAULT_ENDPOINT.to_string());
        let api_key = std::env::var("LIVECAP_TRANSLATE_API_KEY")
            .ok()
            .filter(|v| !v.trim().is_empty());
        Self::new(endpoint, api_key)
    }
}

impl Translator for HttpTranslator {
    fn translator_name(&self) -> &str {
        "libretranslate"
    }

    fn translate(
        &self,
        text: &str,
        source_lang: &str,
        target_lang: &str,
        context: &[String],
    ) -> Result<TranslationResult, TranslationError> {
        if text.is_empty() {
            return Ok(TranslationResult {
                text: String::new(),
                original_text: String::new(),
                source_lang: source_lang.to_string(),
                target_lang: target_lang.to_string(),
                confidence: None,
                source_id: String::new(),
            });
        }
        if source_lang == target_lang {
            return Err(TranslationError::UnsupportedPair {
                source_lang: source_lang.to_string(),
                target_lang: target_lang.to_string(),
            });
        }

        // NMT context injection: prior sentences ahead of the input, one per
        // line, so the model sees the discourse it is continuing.
        let query = if context.is_empty() {
            text.to_string()
        } else {
            format!("{}\n{}", context.join("\n"), text)
        };

        let mut body = serde_json::json!({
            "q": query,
            "source": source_lang,
            "target": target_lang,
            "format": "text",
        });
        if let Some(key) = &self.api_key {
            body["api_key"] = serde_json::Value::String(key.clone());
        }

        debug!(endpoint = self.endpoint.as_str(), source_lang, target_lang, "translate request");
        let response = self
            .client
            .post(&self.endpoint)
            .json(&body)
            .send()
            .map_err(|e| TranslationError::Network(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            return Err(TranslationError::Model(format!(
                "translate endpoint returned HTTP {status}"
            )));
        }

        let parsed: TranslateResponse = response
            .json()
            .map_err(|e| TranslationError::Model(e.to_string()))?;

        // The response covers context + input; the input's translation is
        // the final line.
        let translated = parsed
            .translated_text
            .lines()
            .last()
            .unwrap_or_default()
            .trim()
            .to_string();

        Ok(TranslationResult {
            text: translated,
            original_text: text.to_string(),
            source_lang: source_lang.to_string(),
            target_lang: target_lang.to_string(),
            confidence: None,
            source_id: String::new(),
        })
    }
}
