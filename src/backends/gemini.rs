use super::{check_status, ImageProvider, Provider, TextProvider, TextRequest};
use crate::error::ProviderError;
use async_trait::async_trait;
use base64::Engine;
use reqwest::Client;
use serde_json::json;

pub const GEMINI_BASE_URL: &str = "https://generativelanguage.googleapis.com/v1beta";

/// Tried in order; a model that is unavailable for the key falls through to the next.
pub const GEMINI_MODELS: [&str; 3] = ["gemini-2.0-flash", "gemini-1.5-flash", "gemini-1.5-pro"];

pub struct GeminiText {
    client: Client,
    base_url: String,
    api_key: String,
}

impl GeminiText {
    pub fn new(client: Client, api_key: &str) -> Self {
        Self::with_base_url(client, GEMINI_BASE_URL, api_key)
    }

    pub fn with_base_url(client: Client, base_url: &str, api_key: &str) -> Self {
        Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key: api_key.to_string(),
        }
    }

    async fn generate_with(
        &self,
        model: &str,
        request: &TextRequest,
    ) -> Result<String, ProviderError> {
        let mut body = json!({
            "systemInstruction": {"parts": [{"text": request.system}]},
            "contents": [{"role": "user", "parts": [{"text": request.user}]}],
        });
        if request.expect_json {
            body["generationConfig"] = json!({"responseMimeType": "application/json"});
        }

        let resp = self
            .client
            .post(format!("{}/models/{}:generateContent", self.base_url, model))
            .query(&[("key", self.api_key.as_str())])
            .json(&body)
            .send()
            .await?;
        let json: serde_json::Value = check_status("gemini", resp).await?.json().await?;

        let parts = json["candidates"][0]["content"]["parts"]
            .as_array()
            .ok_or_else(|| ProviderError::Malformed(format!("gemini/{}: no candidates", model)))?;
        let text: String = parts.iter().filter_map(|p| p["text"].as_str()).collect();
        if text.trim().is_empty() {
            return Err(ProviderError::Malformed(format!("gemini/{}: empty text", model)));
        }
        Ok(text.trim().to_string())
    }
}

impl Provider for GeminiText {
    fn id(&self) -> &'static str {
        "gemini"
    }
}

#[async_trait]
impl TextProvider for GeminiText {
    async fn complete(&self, request: &TextRequest) -> Result<String, ProviderError> {
        let mut last_error = None;
        for model in GEMINI_MODELS {
            match self.generate_with(model, request).await {
                Ok(text) => return Ok(text),
                Err(e) => {
                    tracing::debug!(model, error = %e, "gemini model failed, trying next");
                    last_error = Some(e);
                }
            }
        }
        Err(last_error.unwrap_or_else(|| ProviderError::Transient("gemini: no models".into())))
    }
}

/// Imagen text-to-image through the same API key.
pub struct GeminiImagen {
    client: Client,
    base_url: String,
    api_key: String,
}

impl GeminiImagen {
    pub fn new(client: Client, api_key: &str) -> Self {
        Self::with_base_url(client, GEMINI_BASE_URL, api_key)
    }

    pub fn with_base_url(client: Client, base_url: &str, api_key: &str) -> Self {
        Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key: api_key.to_string(),
        }
    }
}

impl Provider for GeminiImagen {
    fn id(&self) -> &'static str {
        "gemini"
    }
}

#[async_trait]
impl ImageProvider for GeminiImagen {
    async fn render(&self, prompt: &str) -> Result<Vec<u8>, ProviderError> {
        let resp = self
            .client
            .post(format!("{}/models/imagen-3.0-generate-001:predict", self.base_url))
            .query(&[("key", self.api_key.as_str())])
            .json(&json!({
                "instances": [{"prompt": prompt}],
                "parameters": {"sampleCount": 1, "aspectRatio": "4:3"},
            }))
            .send()
            .await?;
        let json: serde_json::Value = check_status("gemini", resp).await?.json().await?;

        let encoded = json["predictions"][0]["bytesBase64Encoded"]
            .as_str()
            .ok_or_else(|| ProviderError::Malformed("gemini: no image prediction".into()))?;
        base64::engine::general_purpose::STANDARD
            .decode(encoded)
            .map_err(|e| ProviderError::Malformed(format!("gemini: bad base64: {}", e)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mockito::Matcher;

    fn request() -> TextRequest {
        TextRequest {
            system: "sys".into(),
            user: "write".into(),
            expect_json: true,
        }
    }

    #[tokio::test]
    async fn test_falls_through_model_list() {
        let mut server = mockito::Server::new_async().await;
        let first = server
            .mock("POST", "/models/gemini-2.0-flash:generateContent")
            .match_query(Matcher::UrlEncoded("key".into(), "g-key".into()))
            .with_status(404)
            .create_async()
            .await;
        let second = server
            .mock("POST", "/models/gemini-1.5-flash:generateContent")
            .match_query(Matcher::Any)
            .match_body(Matcher::PartialJson(json!({
                "generationConfig": {"responseMimeType": "application/json"}
            })))
            .with_status(200)
            .with_body(
                r#"{"candidates":[{"content":{"parts":[
                    {"text":"{\"title\":"},{"text":"\"x\"}"}]}}]}"#,
            )
            .create_async()
            .await;

        let gemini = GeminiText::with_base_url(Client::new(), &server.url(), "g-key");
        assert_eq!(gemini.complete(&request()).await.unwrap(), r#"{"title":"x"}"#);
        first.assert_async().await;
        second.assert_async().await;
    }

    #[tokio::test]
    async fn test_all_models_failing_reports_last_error() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("POST", Matcher::Regex(r"^/models/.*:generateContent$".into()))
            .match_query(Matcher::Any)
            .with_status(500)
            .expect(3)
            .create_async()
            .await;

        let gemini = GeminiText::with_base_url(Client::new(), &server.url(), "k");
        assert!(matches!(gemini.complete(&request()).await, Err(ProviderError::Transient(_))));
    }

    #[tokio::test]
    async fn test_imagen_prediction() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("POST", "/models/imagen-3.0-generate-001:predict")
            .match_query(Matcher::Any)
            .with_status(200)
            .with_body(r#"{"predictions":[{"bytesBase64Encoded":"iVBORw=="}]}"#)
            .create_async()
            .await;

        let imagen = GeminiImagen::with_base_url(Client::new(), &server.url(), "k");
        let bytes = imagen.render("a cat").await.unwrap();
        assert_eq!(&bytes[..2], &[0x89, b'P']);
    }
}
