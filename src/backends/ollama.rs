//! Small local story model served by Ollama.

use super::{check_status, PromptStyle, Provider, TextProvider, TextRequest};
use crate::error::ProviderError;
use async_trait::async_trait;
use reqwest::Client;
use serde_json::json;
use std::sync::Arc;
use tokio::sync::Mutex;

/// Lets the model finish a story instead of stopping mid-sentence.
const MAX_NEW_TOKENS: u32 = 400;

#[derive(Debug, Clone, PartialEq)]
pub struct ModelInfo {
    pub name: String,
    pub family: Option<String>,
}

struct SessionInner {
    client: Client,
    base_url: String,
    model: String,
    ready: Mutex<Option<ModelInfo>>,
}

/// Owned handle to the local model. The model is probed on first use and
/// the result kept until `reset()`; clones share one session.
#[derive(Clone)]
pub struct LocalModelSession {
    inner: Arc<SessionInner>,
}

impl LocalModelSession {
    pub fn new(client: Client, base_url: &str, model: &str) -> Self {
        Self {
            inner: Arc::new(SessionInner {
                client,
                base_url: base_url.trim_end_matches('/').to_string(),
                model: model.to_string(),
                ready: Mutex::new(None),
            }),
        }
    }

    /// Probes the model once; later calls reuse the cached answer.
    pub async fn ensure_ready(&self) -> Result<ModelInfo, ProviderError> {
        let mut ready = self.inner.ready.lock().await;
        if let Some(info) = ready.as_ref() {
            return Ok(info.clone());
        }

        tracing::info!(model = %self.inner.model, "probing local story model");
        let resp = self
            .inner
            .client
            .post(format!("{}/api/show", self.inner.base_url))
            .json(&json!({"model": self.inner.model}))
            .send()
            .await?;
        let json: serde_json::Value = check_status("tinystories", resp).await?.json().await?;

        let info = ModelInfo {
            name: self.inner.model.clone(),
            family: json["details"]["family"].as_str().map(str::to_string),
        };
        *ready = Some(info.clone());
        Ok(info)
    }

    pub async fn is_ready(&self) -> bool {
        self.inner.ready.lock().await.is_some()
    }

    /// Drops the cached probe so the next call re-initialises the session.
    pub async fn reset(&self) {
        if self.inner.ready.lock().await.take().is_some() {
            tracing::info!(model = %self.inner.model, "local story model session reset");
        }
    }

    pub async fn generate(&self, prompt: &str) -> Result<String, ProviderError> {
        self.ensure_ready().await?;

        let resp = self
            .inner
            .client
            .post(format!("{}/api/generate", self.inner.base_url))
            .json(&json!({
                "model": self.inner.model,
                "prompt": prompt,
                "stream": false,
                "options": {
                    "temperature": 0.7,
                    "repeat_penalty": 1.1,
                    "num_predict": MAX_NEW_TOKENS,
                }
            }))
            .send()
            .await;

        let resp = match resp {
            Ok(resp) => resp,
            Err(e) => {
                // Daemon may have restarted; probe again next time
                self.reset().await;
                return Err(e.into());
            }
        };
        let json: serde_json::Value = check_status("tinystories", resp).await?.json().await?;

        json["response"]
            .as_str()
            .map(str::to_string)
            .ok_or_else(|| ProviderError::Malformed("tinystories: no response field".into()))
    }
}

/// Completion-style text provider over a `LocalModelSession`.
pub struct OllamaText {
    session: LocalModelSession,
}

impl OllamaText {
    pub fn new(session: LocalModelSession) -> Self {
        Self { session }
    }
}

impl Provider for OllamaText {
    fn id(&self) -> &'static str {
        "tinystories"
    }
}

#[async_trait]
impl TextProvider for OllamaText {
    fn supports_bilingual(&self) -> bool {
        false
    }

    fn prompt_style(&self) -> PromptStyle {
        PromptStyle::Completion
    }

    /// The model continues the opening in `user`; the reply includes it.
    async fn complete(&self, request: &TextRequest) -> Result<String, ProviderError> {
        let continuation = self.session.generate(&request.user).await?;
        let text = format!("{}{}", request.user, continuation);
        if continuation.trim().is_empty() {
            return Err(ProviderError::Malformed("tinystories: empty continuation".into()));
        }
        Ok(text.trim().to_string())
    }
}
