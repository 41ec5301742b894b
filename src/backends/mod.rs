pub mod azure;
pub mod espeak;
pub mod gemini;
pub mod huggingface;
pub mod ollama;
pub mod openai;
pub mod placeholder;

use crate::chain::FallbackChain;
use crate::config_loader::Settings;
use crate::error::ProviderError;
use crate::preferences::ProviderPreferences;
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;

/// Common identity of every capability provider.
pub trait Provider: Send + Sync {
    /// Returns the unique ID of the provider (e.g., "gemini")
    fn id(&self) -> &'static str;
}

/// How a text provider expects to be prompted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PromptStyle {
    /// Follows system/user instructions and can emit labelled or JSON output.
    Instruct,
    /// Plain continuation of a story opening.
    Completion,
}

#[derive(Debug, Clone, PartialEq)]
pub struct TextRequest {
    pub system: String,
    pub user: String,
    /// Ask the provider for a JSON document when it has a native switch for it.
    pub expect_json: bool,
}

/// "Given text, return text."
#[async_trait]
pub trait TextProvider: Provider {
    /// Whether the provider can emit paired sentence/translation structures.
    fn supports_bilingual(&self) -> bool {
        true
    }

    fn prompt_style(&self) -> PromptStyle {
        PromptStyle::Instruct
    }

    async fn complete(&self, request: &TextRequest) -> Result<String, ProviderError>;
}

#[derive(Debug, Clone, PartialEq)]
pub struct SpeechJob {
    pub text: String,
    pub language: String,
    /// Voice preset name from the persisted preferences ("default", "ana", ...).
    pub voice: String,
    /// Relative speaking rate, 1.0 = normal.
    pub speed: f32,
}

/// "Given text, return audio bytes."
#[async_trait]
pub trait AudioProvider: Provider {
    async fn synthesize(&self, job: &SpeechJob) -> Result<Vec<u8>, ProviderError>;
}

/// "Given prompt, return image bytes."
#[async_trait]
pub trait ImageProvider: Provider {
    async fn render(&self, prompt: &str) -> Result<Vec<u8>, ProviderError>;
}

/// Every provider the process knows about, in registration order.
#[derive(Default, Clone)]
pub struct ProviderRegistry {
    pub text: Vec<Arc<dyn TextProvider>>,
    pub audio: Vec<Arc<dyn AudioProvider>>,
    pub image: Vec<Arc<dyn ImageProvider>>,
    pub timeout: Duration,
}

impl ProviderRegistry {
    pub fn new(timeout: Duration) -> Self {
        Self {
            timeout,
            ..Default::default()
        }
    }

    pub fn with_text(mut self, provider: Arc<dyn TextProvider>) -> Self {
        self.text.push(provider);
        self
    }

    pub fn with_audio(mut self, provider: Arc<dyn AudioProvider>) -> Self {
        self.audio.push(provider);
        self
    }

    pub fn with_image(mut self, provider: Arc<dyn ImageProvider>) -> Self {
        self.image.push(provider);
        self
    }

    /// Registers each provider whose credentials are configured. The local
    /// zero-configuration providers are always registered, last.
    pub fn from_settings(
        settings: &Settings,
        client: reqwest::Client,
        session: ollama::LocalModelSession,
    ) -> Self {
        let mut registry = ProviderRegistry::new(settings.provider_timeout());

        let gemini_key = &settings.gemini_api_key;
        if !gemini_key.is_empty() {
            registry = registry
                .with_text(Arc::new(gemini::GeminiText::new(client.clone(), gemini_key)))
                .with_image(Arc::new(gemini::GeminiImagen::new(client.clone(), gemini_key)));
        }
        let openai_key = &settings.openai_api_key;
        if !openai_key.is_empty() {
            registry = registry
                .with_text(Arc::new(openai::ChatCompletions::openai(client.clone(), openai_key)))
                .with_audio(Arc::new(openai::OpenAiSpeech::new(client.clone(), openai_key)))
                .with_image(Arc::new(openai::OpenAiImages::new(client.clone(), openai_key)));
        }
        if !settings.groq_api_key.is_empty() {
            let groq = openai::ChatCompletions::groq(client.clone(), &settings.groq_api_key);
            registry = registry.with_text(Arc::new(groq));
        }
        if !settings.ollama_url.is_empty() {
            registry = registry.with_text(Arc::new(ollama::OllamaText::new(session)));
        }
        if !settings.azure_speech_key.is_empty() {
            registry = registry.with_audio(Arc::new(azure::AzureSpeech::new(
                client.clone(),
                &settings.azure_speech_key,
                &settings.azure_speech_region,
            )));
        }
        if !settings.hf_token.is_empty() {
            let flux = huggingface::FluxImages::new(client, &settings.hf_token);
            registry = registry.with_image(Arc::new(flux));
        }

        registry
            .with_audio(Arc::new(espeak::EspeakBackend::new(&settings.espeak_binary)))
            .with_image(Arc::new(placeholder::PlaceholderImages::new()))
    }

    /// Preferred TTS provider first, the others after it in registration order.
    pub fn audio_chain(&self, prefs: &ProviderPreferences) -> FallbackChain<dyn AudioProvider> {
        FallbackChain::new(preferred_first(&self.audio, &prefs.tts_provider), self.timeout)
    }

    pub fn image_chain(&self, prefs: &ProviderPreferences) -> FallbackChain<dyn ImageProvider> {
        FallbackChain::new(preferred_first(&self.image, &prefs.image_provider), self.timeout)
    }
}

fn preferred_first<P: ?Sized + Provider>(providers: &[Arc<P>], preferred: &str) -> Vec<Arc<P>> {
    let mut ordered: Vec<Arc<P>> =
        providers.iter().filter(|p| p.id() == preferred).cloned().collect();
    ordered.extend(providers.iter().filter(|p| p.id() != preferred).cloned());
    ordered
}

/// Keeps the tail of an HTTP error body short enough for a log line.
pub(crate) fn error_excerpt(body: &str) -> String {
    let trimmed = body.trim();
    if trimmed.chars().count() > 200 {
        format!("{}...", trimmed.chars().take(200).collect::<String>())
    } else {
        trimmed.to_string()
    }
}

/// Maps a non-success HTTP status to a transient provider failure.
pub(crate) async fn check_status(
    provider: &str,
    resp: reqwest::Response,
) -> Result<reqwest::Response, ProviderError> {
    if resp.status().is_success() {
        return Ok(resp);
    }
    let status = resp.status();
    let body = resp.text().await.unwrap_or_default();
    Err(ProviderError::Transient(format!(
        "{} returned {}: {}",
        provider,
        status,
        error_excerpt(&body)
    )))
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Named(&'static str);

    impl Provider for Named {
        fn id(&self) -> &'static str {
            self.0
        }
    }

    #[async_trait]
    impl AudioProvider for Named {
        async fn synthesize(&self, _job: &SpeechJob) -> Result<Vec<u8>, ProviderError> {
            Ok(Vec::new())
        }
    }

    #[test]
    fn test_preferred_provider_moves_to_front() {
        let registry = ProviderRegistry::new(Duration::from_secs(1))
            .with_audio(Arc::new(Named("openai")))
            .with_audio(Arc::new(Named("azure")))
            .with_audio(Arc::new(Named("espeak")));

        let prefs = ProviderPreferences {
            tts_provider: "azure".to_string(),
            ..ProviderPreferences::default()
        };
        assert_eq!(registry.audio_chain(&prefs).ids(), vec!["azure", "openai", "espeak"]);

        // Unknown preference keeps registration order
        assert_eq!(
            registry.audio_chain(&ProviderPreferences::default()).ids(),
            vec!["openai", "azure", "espeak"]
        );
    }

    #[test]
    fn test_registry_uses_supplied_client_and_keys() {
        let settings = Settings {
            openai_api_key: "sk-test".to_string(),
            provider_timeout_secs: 7,
            ..Settings::default()
        };
        let client = reqwest::Client::builder()
            .timeout(settings.provider_timeout())
            .build()
            .unwrap();
        let session = ollama::LocalModelSession::new(client.clone(), "", "tinystories");

        let registry = ProviderRegistry::from_settings(&settings, client, session);
        let text: Vec<&str> = registry.text.iter().map(|p| p.id()).collect();
        assert_eq!(text, vec!["openai"]);
        assert_eq!(registry.timeout, Duration::from_secs(7));
        let prefs = ProviderPreferences::default();
        assert_eq!(registry.audio_chain(&prefs).ids(), vec!["openai", "espeak"]);
        assert_eq!(registry.image_chain(&prefs).ids(), vec!["openai", "placeholder"]);
    }

    #[test]
    fn test_error_excerpt_truncates() {
        let long = "x".repeat(500);
        assert_eq!(error_excerpt(&long).len(), 203);
        assert_eq!(error_excerpt("  short  "), "short");
    }
}
