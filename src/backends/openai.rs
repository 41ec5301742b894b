//! OpenAI-compatible HTTP clients: chat completions (OpenAI and Groq),
//! speech and image generation.

use super::{
    check_status, AudioProvider, ImageProvider, Provider, SpeechJob, TextProvider, TextRequest,
};
use crate::error::ProviderError;
use async_trait::async_trait;
use base64::Engine;
use reqwest::Client;
use serde_json::json;

pub const OPENAI_BASE_URL: &str = "https://api.openai.com/v1";
pub const GROQ_BASE_URL: &str = "https://api.groq.com/openai/v1";

pub struct ChatCompletions {
    id: &'static str,
    client: Client,
    base_url: String,
    api_key: String,
    model: String,
}

impl ChatCompletions {
    pub fn openai(client: Client, api_key: &str) -> Self {
        Self::with_base_url("openai", client, OPENAI_BASE_URL, api_key, "gpt-4o-mini")
    }

    pub fn groq(client: Client, api_key: &str) -> Self {
        Self::with_base_url("groq", client, GROQ_BASE_URL, api_key, "llama3-8b-8192")
    }

    pub fn with_base_url(
        id: &'static str,
        client: Client,
        base_url: &str,
        api_key: &str,
        model: &str,
    ) -> Self {
        Self {
            id,
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key: api_key.to_string(),
            model: model.to_string(),
        }
    }
}

impl Provider for ChatCompletions {
    fn id(&self) -> &'static str {
        self.id
    }
}

#[async_trait]
impl TextProvider for ChatCompletions {
    async fn complete(&self, request: &TextRequest) -> Result<String, ProviderError> {
        let mut body = json!({
            "model": self.model,
            "messages": [
                {"role": "system", "content": request.system},
                {"role": "user", "content": request.user},
            ],
            "temperature": 0.7,
        });
        if request.expect_json {
            body["response_format"] = json!({"type": "json_object"});
        }

        let resp = self
            .client
            .post(format!("{}/chat/completions", self.base_url))
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await?;
        let json: serde_json::Value = check_status(self.id, resp).await?.json().await?;

        json["choices"][0]["message"]["content"]
            .as_str()
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .ok_or_else(|| ProviderError::Malformed(format!("{}: no message content", self.id)))
    }
}

pub struct OpenAiSpeech {
    client: Client,
    base_url: String,
    api_key: String,
}

impl OpenAiSpeech {
    pub fn new(client: Client, api_key: &str) -> Self {
        Self::with_base_url(client, OPENAI_BASE_URL, api_key)
    }

    pub fn with_base_url(client: Client, base_url: &str, api_key: &str) -> Self {
        Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key: api_key.to_string(),
        }
    }

    /// The speech endpoint takes an absolute multiplier.
    pub fn speed_multiplier(speed: f32) -> f32 {
        speed.clamp(0.25, 4.0)
    }

    pub fn voice_for(preset: &str) -> &'static str {
        match preset {
            "alloy" => "alloy",
            "ana" | "aria" => "nova",
            _ => "shimmer",
        }
    }
}

impl Provider for OpenAiSpeech {
    fn id(&self) -> &'static str {
        "openai"
    }
}

#[async_trait]
impl AudioProvider for OpenAiSpeech {
    async fn synthesize(&self, job: &SpeechJob) -> Result<Vec<u8>, ProviderError> {
        let resp = self
            .client
            .post(format!("{}/audio/speech", self.base_url))
            .bearer_auth(&self.api_key)
            .json(&json!({
                "model": "tts-1",
                "input": job.text,
                "voice": Self::voice_for(&job.voice),
                "speed": Self::speed_multiplier(job.speed),
                "response_format": "mp3",
            }))
            .send()
            .await?;

        let bytes = check_status("openai", resp).await?.bytes().await?;
        if bytes.is_empty() {
            return Err(ProviderError::Malformed("openai: empty audio body".into()));
        }
        Ok(bytes.to_vec())
    }
}

pub struct OpenAiImages {
    client: Client,
    base_url: String,
    api_key: String,
}

impl OpenAiImages {
    pub fn new(client: Client, api_key: &str) -> Self {
        Self::with_base_url(client, OPENAI_BASE_URL, api_key)
    }

    pub fn with_base_url(client: Client, base_url: &str, api_key: &str) -> Self {
        Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key: api_key.to_string(),
        }
    }
}

impl Provider for OpenAiImages {
    fn id(&self) -> &'static str {
        "openai"
    }
}

#[async_trait]
impl ImageProvider for OpenAiImages {
    async fn render(&self, prompt: &str) -> Result<Vec<u8>, ProviderError> {
        let resp = self
            .client
            .post(format!("{}/images/generations", self.base_url))
            .bearer_auth(&self.api_key)
            .json(&json!({
                "model": "dall-e-3",
                "prompt": prompt,
                "n": 1,
                "size": "1024x1024",
                "response_format": "b64_json",
            }))
            .send()
            .await?;
        let json: serde_json::Value = check_status("openai", resp).await?.json().await?;

        let encoded = json["data"][0]["b64_json"]
            .as_str()
            .ok_or_else(|| ProviderError::Malformed("openai: no image data".into()))?;
        base64::engine::general_purpose::STANDARD
            .decode(encoded)
            .map_err(|e| ProviderError::Malformed(format!("openai: bad base64: {}", e)))
    }
}
