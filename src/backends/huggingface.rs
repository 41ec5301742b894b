use super::{check_status, ImageProvider, Provider};
use crate::error::ProviderError;
use async_trait::async_trait;
use reqwest::Client;
use serde_json::json;

pub const FLUX_URL: &str =
    "https://router.huggingface.co/hf-inference/models/black-forest-labs/FLUX.1-schnell";

/// FLUX.1-schnell through the Hugging Face inference router; the reply body
/// is the image itself.
pub struct FluxImages {
    client: Client,
    url: String,
    token: String,
}

impl FluxImages {
    pub fn new(client: Client, token: &str) -> Self {
        Self::with_url(client, FLUX_URL, token)
    }

    pub fn with_url(client: Client, url: &str, token: &str) -> Self {
        Self {
            client,
            url: url.to_string(),
            token: token.to_string(),
        }
    }
}

impl Provider for FluxImages {
    fn id(&self) -> &'static str {
        "huggingface"
    }
}

#[async_trait]
impl ImageProvider for FluxImages {
    async fn render(&self, prompt: &str) -> Result<Vec<u8>, ProviderError> {
        let resp = self
            .client
            .post(&self.url)
            .bearer_auth(&self.token)
            .json(&json!({"inputs": prompt}))
            .send()
            .await?;
        let resp = check_status("huggingface", resp).await?;

        // A cold model answers 200 with a JSON status document
        let is_json = resp
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .is_some_and(|v| v.starts_with("application/json"));
        let bytes = resp.bytes().await?;
        if is_json || bytes.is_empty() {
            return Err(ProviderError::Malformed(format!(
                "huggingface: expected image bytes, got {}",
                String::from_utf8_lossy(&bytes[..bytes.len().min(120)])
            )));
        }
        Ok(bytes.to_vec())
    }
}
