//! Writing assistant
//!
//! Note enhancement, one-line summaries and read-aloud audio through the
//! generative language API.

use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use serde::Deserialize;
use serde_json::{json, Value};
use thiserror::Error;
use tracing::{debug, warn};

use crate::config::Config;
use crate::models::Language;

const DEFAULT_BASE_URL: &str = "https://generativelanguage.googleapis.com/v1beta";

/// Voice used for read-aloud audio
const SPEECH_VOICE: &str = "Kore";

/// Sample rate of the PCM the speech model returns
pub const SPEECH_SAMPLE_RATE: u32 = 24_000;

/// Errors from the assistant
#[derive(Error, Debug)]
pub enum AssistError {
    #[error("No AI API key configured. Set INSIGHTS_AI_API_KEY (or API_KEY).")]
    MissingKey,

    #[error("The AI API key was rejected: {0}")]
    InvalidKey(String),

    #[error("AI quota exceeded, try again later: {0}")]
    QuotaExceeded(String),

    #[error("AI request failed with status {status}: {message}")]
    Http { status: u16, message: String },

    #[error("AI request failed: {0}")]
    Request(#[from] reqwest::Error),

    #[error("The AI service returned no content")]
    EmptyResponse,

    #[error("Unexpected AI response: {0}")]
    Decode(String),
}

impl AssistError {
    /// Map a failed response to an error kind
    pub fn from_status(status: u16, body: &str) -> Self {
        let message = serde_json::from_str::<Value>(body)
            .ok()
            .and_then(|v| v["error"]["message"].as_str().map(str::to_string))
            .unwrap_or_else(|| body.chars().take(300).collect());

        let lowered = message.to_lowercase();
        if status == 401 || status == 403 || lowered.contains("api key not valid") {
            AssistError::InvalidKey(message)
        } else if status == 429 || lowered.contains("quota") || body.contains("RESOURCE_EXHAUSTED")
        {
            AssistError::QuotaExceeded(message)
        } else {
            AssistError::Http { status, message }
        }
    }
}

#[derive(Debug, Deserialize)]
struct GenerateResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
}

#[derive(Debug, Deserialize)]
struct Candidate {
    #[serde(default)]
    content: Option<Content>,
}

#[derive(Debug, Deserialize)]
struct Content {
    #[serde(default)]
    parts: Vec<Part>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Part {
    #[serde(default)]
    text: Option<String>,
    #[serde(default)]
    inline_data: Option<InlineData>,
}

#[derive(Debug, Deserialize)]
struct InlineData {
    data: String,
}

impl GenerateResponse {
    fn parts(&self) -> impl Iterator<Item = &Part> {
        self.candidates
            .iter()
            .filter_map(|c| c.content.as_ref())
            .flat_map(|c| c.parts.iter())
    }

    /// Concatenated text of the first candidate
    fn text(&self) -> Option<String> {
        let text: String = self.parts().filter_map(|p| p.text.as_deref()).collect();
        let text = text.trim();
        (!text.is_empty()).then(|| text.to_string())
    }

    fn audio(&self) -> Option<&str> {
        self.parts()
            .find_map(|p| p.inline_data.as_ref())
            .map(|d| d.data.as_str())
    }
}

/// Synthesized speech as mono 16-bit PCM
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SpeechAudio {
    pub samples: Vec<i16>,
    pub sample_rate: u32,
}

impl SpeechAudio {
    /// Decode base64 little-endian PCM
    pub fn from_base64(data: &str, sample_rate: u32) -> Result<Self, AssistError> {
        let bytes = STANDARD
            .decode(data.trim())
            .map_err(|e| AssistError::Decode(e.to_string()))?;
        let samples = bytes
            .chunks_exact(2)
            .map(|pair| i16::from_le_bytes([pair[0], pair[1]]))
            .collect();
        Ok(Self {
            samples,
            sample_rate,
        })
    }

    pub fn duration_secs(&self) -> f64 {
        self.samples.len() as f64 / f64::from(self.sample_rate)
    }

    /// Wrap the samples in a WAV container
    pub fn to_wav(&self) -> Vec<u8> {
        let data_len = (self.samples.len() * 2) as u32;
        let byte_rate = self.sample_rate * 2;

        let mut wav = Vec::with_capacity(44 + data_len as usize);
        wav.extend_from_slice(b"RIFF");
        wav.extend_from_slice(&(36 + data_len).to_le_bytes());
        wav.extend_from_slice(b"WAVE");
        wav.extend_from_slice(b"fmt ");
        wav.extend_from_slice(&16u32.to_le_bytes());
        wav.extend_from_slice(&1u16.to_le_bytes()); // PCM
        wav.extend_from_slice(&1u16.to_le_bytes()); // mono
        wav.extend_from_slice(&self.sample_rate.to_le_bytes());
        wav.extend_from_slice(&byte_rate.to_le_bytes());
        wav.extend_from_slice(&2u16.to_le_bytes());
        wav.extend_from_slice(&16u16.to_le_bytes());
        wav.extend_from_slice(b"data");
        wav.extend_from_slice(&data_len.to_le_bytes());
        for sample in &self.samples {
            wav.extend_from_slice(&sample.to_le_bytes());
        }
        wav
    }
}

/// Prompt asking for a clearer version of a note
pub fn enhance_prompt(content: &str, language: Language) -> String {
    format!(
        "Improve this sticky note text. Make it more organized and clear, but keep the \
         original tone. REPLY ONLY WITH THE IMPROVED TEXT IN {}:\n\n\"{}\"",
        language.prompt_name().to_uppercase(),
        content
    )
}

/// Prompt asking for a one-sentence summary
pub fn summarize_prompt(content: &str, language: Language) -> String {
    format!(
        "Summarize this note in a single short sentence in {}:\n\n\"{}\"",
        language.prompt_name(),
        content
    )
}

/// Client for the generative language API
pub struct Assistant {
    http: reqwest::Client,
    base_url: String,
    api_key: String,
    model: String,
    speech_model: String,
    language: Language,
}

impl Assistant {
    pub fn new(api_key: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            http: reqwest::Client::new(),
            base_url: DEFAULT_BASE_URL.to_string(),
            api_key: api_key.into(),
            model: model.into(),
            speech_model: crate::config::default_speech_model(),
            language: Language::default(),
        }
    }

    /// Build from configuration; fails when no key is set
    pub fn from_config(config: &Config) -> Result<Self, AssistError> {
        let key = config
            .ai_api_key
            .as_deref()
            .filter(|k| !k.trim().is_empty())
            .ok_or(AssistError::MissingKey)?;
        Ok(Self::new(key, config.ai_model.clone()).with_speech_model(config.speech_model.clone()))
    }

    pub fn with_language(mut self, language: Language) -> Self {
        self.language = language;
        self
    }

    pub fn with_speech_model(mut self, model: impl Into<String>) -> Self {
        self.speech_model = model.into();
        self
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into().trim_end_matches('/').to_string();
        self
    }

    fn endpoint(&self, model: &str) -> String {
        format!("{}/models/{}:generateContent", self.base_url, model)
    }

    async fn generate(&self, model: &str, body: Value) -> Result<GenerateResponse, AssistError> {
        debug!("Calling {} on the AI service", model);
        let response = self
            .http
            .post(self.endpoint(model))
            .header("x-goog-api-key", &self.api_key)
            .json(&body)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            let error = AssistError::from_status(status.as_u16(), &body);
            warn!("AI request failed: {}", error);
            return Err(error);
        }

        response
            .json()
            .await
            .map_err(|e| AssistError::Decode(e.to_string()))
    }

    async fn generate_text(&self, prompt: String) -> Result<String, AssistError> {
        let body = json!({ "contents": [{ "parts": [{ "text": prompt }] }] });
        self.generate(&self.model, body)
            .await?
            .text()
            .ok_or(AssistError::EmptyResponse)
    }

    /// Rewrite a note more clearly in the same tone
    pub async fn enhance(&self, content: &str) -> Result<String, AssistError> {
        self.generate_text(enhance_prompt(content, self.language))
            .await
    }

    /// One short sentence describing a note
    pub async fn summarize(&self, content: &str) -> Result<String, AssistError> {
        self.generate_text(summarize_prompt(content, self.language))
            .await
    }

    /// Read text aloud
    pub async fn speak(&self, text: &str) -> Result<SpeechAudio, AssistError> {
        let body = json!({
            "contents": [{ "parts": [{ "text": text }] }],
            "generationConfig": {
                "responseModalities": ["AUDIO"],
                "speechConfig": {
                    "voiceConfig": { "prebuiltVoiceConfig": { "voiceName": SPEECH_VOICE } }
                }
            }
        });
        let response = self.generate(&self.speech_model, body).await?;
        let data = response.audio().ok_or(AssistError::EmptyResponse)?;
        SpeechAudio::from_base64(data, SPEECH_SAMPLE_RATE)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_prompts_name_language() {
        let prompt = enhance_prompt("buy milk", Language::PtBr);
        assert!(prompt.contains("BRAZILIAN PORTUGUESE"));
        assert!(prompt.ends_with("\"buy milk\""));

        let prompt = summarize_prompt("long text", Language::Es);
        assert!(prompt.contains("Spanish"));
    }

    #[test]
    fn test_response_text_joined_and_trimmed() {
        let response: GenerateResponse = serde_json::from_value(json!({
            "candidates": [{ "content": { "parts": [{ "text": " Buy " }, { "text": "milk \n" }] } }]
        }))
        .unwrap();
        assert_eq!(response.text().as_deref(), Some("Buy milk"));

        let empty: GenerateResponse = serde_json::from_value(json!({ "candidates": [] })).unwrap();
        assert!(empty.text().is_none());
    }

    #[test]
    fn test_response_audio() {
        let response: GenerateResponse = serde_json::from_value(json!({
            "candidates": [{ "content": { "parts": [{ "inlineData": { "mimeType": "audio/L16", "data": "AQD//w==" } }] } }]
        }))
        .unwrap();
        let audio = SpeechAudio::from_base64(response.audio().unwrap(), SPEECH_SAMPLE_RATE).unwrap();
        assert_eq!(audio.samples, vec![1, -1]);
    }

    #[test]
    fn test_error_classification() {
        let body = r#"{"error":{"code":400,"message":"API key not valid. Please pass a valid API key.","status":"INVALID_ARGUMENT"}}"#;
        assert!(matches!(
            AssistError::from_status(400, body),
            AssistError::InvalidKey(_)
        ));

        let body = r#"{"error":{"code":429,"message":"Resource has been exhausted","status":"RESOURCE_EXHAUSTED"}}"#;
        assert!(matches!(
            AssistError::from_status(429, body),
            AssistError::QuotaExceeded(_)
        ));

        assert!(matches!(
            AssistError::from_status(500, "oops"),
            AssistError::Http { status: 500, .. }
        ));
    }

    #[test]
    fn test_wav_header() {
        let audio = SpeechAudio {
            samples: vec![0, 1, -1],
            sample_rate: SPEECH_SAMPLE_RATE,
        };
        let wav = audio.to_wav();
        assert_eq!(wav.len(), 44 + 6);
        assert_eq!(&wav[0..4], b"RIFF");
        assert_eq!(&wav[8..12], b"WAVE");
        assert_eq!(u32::from_le_bytes([wav[24], wav[25], wav[26], wav[27]]), 24_000);
        assert_eq!(u32::from_le_bytes([wav[40], wav[41], wav[42], wav[43]]), 6);
    }

    #[test]
    fn test_from_config_requires_key() {
        let config = Config {
            ai_api_key: Some("  ".to_string()),
            ..Config::default()
        };
        assert!(matches!(
            Assistant::from_config(&config),
            Err(AssistError::MissingKey)
        ));

        let config = Config {
            ai_api_key: Some("key".to_string()),
            ..Config::default()
        };
        let assistant = Assistant::from_config(&config).unwrap();
        assert!(assistant
            .endpoint(&assistant.model)
            .ends_with(":generateContent"));
    }
}
