//! Completion, transcription and speech API client.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::multipart::{Form, Part};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::chatbot::history::ConversationTurn;

pub const DEFAULT_API_BASE_URL: &str = "https://api.openai.com/v1";

/// Sampling parameters shared by every completion call.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct GenerationSettings {
    pub max_tokens: u32,
    /// Voice replies are read aloud, so they get a tighter budget.
    pub voice_max_tokens: u32,
    pub temperature: f32,
    pub presence_penalty: f32,
    pub frequency_penalty: f32,
}

impl Default for GenerationSettings {
    fn default() -> Self {
        Self {
            max_tokens: 600,
            voice_max_tokens: 500,
            temperature: 0.8,
            presence_penalty: 0.6,
            frequency_penalty: 0.3,
        }
    }
}

/// One chat-completions request.
#[derive(Debug, Clone, Serialize)]
pub struct CompletionRequest {
    pub model: String,
    pub messages: Vec<ConversationTurn>,
    pub max_tokens: u32,
    pub temperature: f32,
    pub presence_penalty: f32,
    pub frequency_penalty: f32,
}

impl CompletionRequest {
    pub fn new(model: impl Into<String>, messages: Vec<ConversationTurn>, settings: &GenerationSettings) -> Self {
        Self {
            model: model.into(),
            messages,
            max_tokens: settings.max_tokens,
            temperature: settings.temperature,
            presence_penalty: settings.presence_penalty,
            frequency_penalty: settings.frequency_penalty,
        }
    }

    pub fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = max_tokens;
        self
    }
}

#[derive(Debug)]
pub enum ProviderError {
    Http(String),
    Api(String),
    Parse(String),
    Empty,
    Timeout,
}

impl std::fmt::Display for ProviderError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ProviderError::Http(e) => write!(f, "HTTP error: {e}"),
            ProviderError::Api(e) => write!(f, "API error: {e}"),
            ProviderError::Parse(e) => write!(f, "Parse error: {e}"),
            ProviderError::Empty => write!(f, "Empty response"),
            ProviderError::Timeout => write!(f, "Request timed out"),
        }
    }
}

impl std::error::Error for ProviderError {}

/// The external model API.
#[async_trait]
pub trait CompletionProvider: Send + Sync {
    /// Run a chat completion and return the assistant text.
    async fn complete(&self, request: &CompletionRequest) -> Result<String, ProviderError>;

    /// Speech-to-text for a voice note.
    async fn transcribe(&self, audio: Vec<u8>, file_name: &str) -> Result<String, ProviderError>;

    /// Text-to-speech. Returns OGG/Opus bytes.
    async fn synthesize(&self, text: &str) -> Result<Vec<u8>, ProviderError>;
}

/// Run a provider call under a deadline; expiry maps to [`ProviderError::Timeout`].
pub async fn with_timeout<T, F>(timeout: Duration, call: F) -> Result<T, ProviderError>
where
    F: std::future::Future<Output = Result<T, ProviderError>>,
{
    match tokio::time::timeout(timeout, call).await {
        Ok(result) => result,
        Err(_) => Err(ProviderError::Timeout),
    }
}

/// Models used for the voice pipeline.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct VoiceSettings {
    pub transcription_model: String,
    pub tts_model: String,
    pub tts_voice: String,
}

impl Default for VoiceSettings {
    fn default() -> Self {
        Self {
            transcription_model: "gpt-4o-mini-transcribe".to_string(),
            tts_model: "gpt-4o-mini-tts".to_string(),
            tts_voice: "alloy".to_string(),
        }
    }
}

/// OpenAI-compatible HTTP client.
pub struct OpenAiClient {
    api_key: String,
    base_url: String,
    voice: VoiceSettings,
    http: reqwest::Client,
}

#[derive(Deserialize)]
struct ChatResponse {
    choices: Vec<Choice>,
}

#[derive(Deserialize)]
struct Choice {
    message: ChoiceMessage,
}

#[derive(Deserialize)]
struct ChoiceMessage {
    content: Option<String>,
}

#[derive(Deserialize)]
struct TranscriptionResponse {
    text: String,
}

#[derive(Serialize)]
struct SpeechRequest<'a> {
    model: &'a str,
    input: &'a str,
    voice: &'a str,
    response_format: &'static str,
}

impl OpenAiClient {
    pub fn new(
        api_key: String,
        base_url: impl Into<String>,
        voice: VoiceSettings,
        timeout: Duration,
    ) -> Result<Self, ProviderError> {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| ProviderError::Http(e.to_string()))?;

        Ok(Self {
            api_key,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            voice,
            http,
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{}", self.base_url, path)
    }

    async fn check(response: reqwest::Response) -> Result<reqwest::Response, ProviderError> {
        if response.status().is_success() {
            return Ok(response);
        }
        let status = response.status();
        let body = response.text().await.unwrap_or_default();
        Err(ProviderError::Api(format!("{status}: {body}")))
    }
}

#[async_trait]
impl CompletionProvider for OpenAiClient {
    async fn complete(&self, request: &CompletionRequest) -> Result<String, ProviderError> {
        debug!("Completion request: model={} messages={}", request.model, request.messages.len());

        let response = self
            .http
            .post(self.url("chat/completions"))
            .bearer_auth(&self.api_key)
            .json(request)
            .send()
            .await
            .map_err(|e| ProviderError::Http(e.to_string()))?;

        let parsed: ChatResponse = Self::check(response)
            .await?
            .json()
            .await
            .map_err(|e| ProviderError::Parse(e.to_string()))?;

        parsed
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .filter(|text| !text.trim().is_empty())
            .ok_or(ProviderError::Empty)
    }

    async fn transcribe(&self, audio: Vec<u8>, file_name: &str) -> Result<String, ProviderError> {
        info!("Transcribing {} bytes of audio", audio.len());

        let part = Part::bytes(audio)
            .file_name(file_name.to_string())
            .mime_str("audio/ogg")
            .map_err(|e| ProviderError::Http(e.to_string()))?;
        let form = Form::new()
            .text("model", self.voice.transcription_model.clone())
            .part("file", part);

        let response = self
            .http
            .post(self.url("audio/transcriptions"))
            .bearer_auth(&self.api_key)
            .multipart(form)
            .send()
            .await
            .map_err(|e| ProviderError::Http(e.to_string()))?;

        let parsed: TranscriptionResponse = Self::check(response)
            .await?
            .json()
            .await
            .map_err(|e| ProviderError::Parse(e.to_string()))?;

        Ok(parsed.text.trim().to_string())
    }

    async fn synthesize(&self, text: &str) -> Result<Vec<u8>, ProviderError> {
        let preview: String = text.chars().take(50).collect();
        info!("TTS: \"{}\"", preview);

        let request = SpeechRequest {
            model: &self.voice.tts_model,
            input: text,
            voice: &self.voice.tts_voice,
            response_format: "opus",
        };

        let response = self
            .http
            .post(self.url("audio/speech"))
            .bearer_auth(&self.api_key)
            .json(&request)
            .send()
            .await
            .map_err(|e| ProviderError::Http(e.to_string()))?;

        let audio = Self::check(response)
            .await?
            .bytes()
            .await
            .map_err(|e| ProviderError::Parse(e.to_string()))?;

        if audio.is_empty() {
            return Err(ProviderError::Empty);
        }
        debug!("Got {} bytes of speech audio", audio.len());
        Ok(audio.to_vec())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_serializes_to_chat_shape() {
        let request = CompletionRequest::new(
            "gpt-4o-mini",
            vec![ConversationTurn::system("sys"), ConversationTurn::user("hi")],
            &GenerationSettings::default(),
        );
        let json = serde_json::to_value(&request).unwrap();
        assert_eq!(json["model"], "gpt-4o-mini");
        assert_eq!(json["max_tokens"], 600);
        assert_eq!(json["messages"][0]["role"], "system");
        assert_eq!(json["messages"][1]["content"], "hi");
    }

    #[test]
    fn test_voice_budget_override() {
        let settings = GenerationSettings::default();
        let request = CompletionRequest::new("m", vec![], &settings).with_max_tokens(settings.voice_max_tokens);
        assert_eq!(request.max_tokens, 500);
    }

    #[test]
    fn test_base_url_trailing_slash() {
        let client = OpenAiClient::new(
            "key".to_string(),
            "https://example.test/v1/",
            VoiceSettings::default(),
            Duration::from_secs(5),
        )
        .unwrap();
        assert_eq!(client.url("chat/completions"), "https://example.test/v1/chat/completions");
    }

    #[tokio::test]
    async fn test_timeout_maps_to_provider_error() {
        let result: Result<(), ProviderError> = with_timeout(Duration::from_millis(10), async {
            tokio::time::sleep(Duration::from_millis(200)).await;
            Ok(())
        })
        .await;
        assert!(matches!(result, Err(ProviderError::Timeout)));
    }
}
