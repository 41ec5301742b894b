use config::{Config, File};
use serde::Deserialize;
use std::path::PathBuf;
use std::time::Duration;

#[derive(Debug, Clone, Deserialize)]
pub struct Settings {
    // Storage
    pub data_dir: String,   // sled database + asset cache
    pub public_dir: String, // published audio/images
    pub public_url_prefix: String,
    // Local small model (Ollama)
    pub ollama_url: String,
    pub ollama_model: String,
    // Cloud credentials (empty = provider not registered)
    pub gemini_api_key: String,
    pub openai_api_key: String,
    pub groq_api_key: String,
    pub azure_speech_key: String,
    pub azure_speech_region: String,
    pub hf_token: String,
    // Local TTS
    pub espeak_binary: String,
    // Pipeline behaviour
    pub provider_timeout_secs: u64,
    pub sentence_pause_ms: u64,
    pub default_speed: f32,
}

impl Default for Settings {
    fn default() -> Self {
        let data_dir = default_data_dir();
        Self {
            public_dir: format!("{}/public", data_dir),
            data_dir,
            public_url_prefix: "/assets".to_string(),
            ollama_url: String::new(),
            ollama_model: "tinystories".to_string(),
            gemini_api_key: String::new(),
            openai_api_key: String::new(),
            groq_api_key: String::new(),
            azure_speech_key: String::new(),
            azure_speech_region: "eastus".to_string(),
            hf_token: String::new(),
            espeak_binary: "espeak-ng".to_string(),
            provider_timeout_secs: 60,
            sentence_pause_ms: 400,
            default_speed: 0.8,
        }
    }
}

fn default_data_dir() -> String {
    dirs::data_local_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("readalong")
        .to_string_lossy()
        .into_owned()
}

impl Settings {
    pub fn new() -> Result<Self, config::ConfigError> {
        let defaults = Settings::default();
        let builder = Config::builder()
            .set_default("data_dir", defaults.data_dir.clone())?
            .set_default("public_dir", defaults.public_dir.clone())?
            .set_default("public_url_prefix", defaults.public_url_prefix.clone())?
            // Local model is opt-in: no URL, no provider
            .set_default("ollama_url", "")?
            .set_default("ollama_model", defaults.ollama_model.clone())?
            .set_default("gemini_api_key", "")?
            .set_default("openai_api_key", "")?
            .set_default("groq_api_key", "")?
            .set_default("azure_speech_key", "")?
            .set_default("azure_speech_region", defaults.azure_speech_region.clone())?
            .set_default("hf_token", "")?
            .set_default("espeak_binary", defaults.espeak_binary.clone())?
            .set_default("provider_timeout_secs", defaults.provider_timeout_secs)?
            .set_default("sentence_pause_ms", defaults.sentence_pause_ms)?
            .set_default("default_speed", defaults.default_speed as f64)?
            // Merge with local config file (if exists)
            .add_source(File::with_name("Readalong").required(false))
            .add_source(
                File::with_name(&format!(
                    "{}/.config/readalong/Readalong",
                    std::env::var("HOME").unwrap_or_default()
                ))
                .required(false),
            )
            // Merge with environment variables (e.g. READALONG_OPENAI_API_KEY)
            .add_source(config::Environment::with_prefix("READALONG"));

        let settings: Settings = builder.build()?.try_deserialize()?;
        settings.validate()?;
        Ok(settings)
    }

    pub fn validate(&self) -> Result<(), config::ConfigError> {
        if self.provider_timeout_secs == 0 {
            return Err(config::ConfigError::Message(
                "provider_timeout_secs must be greater than 0".to_string(),
            ));
        }
        if !(0.5..=1.5).contains(&self.default_speed) {
            return Err(config::ConfigError::Message(format!(
                "Invalid default_speed: {}. Must be between 0.5 and 1.5",
                self.default_speed
            )));
        }
        if !self.public_url_prefix.starts_with('/') {
            return Err(config::ConfigError::Message(format!(
                "public_url_prefix must start with '/': {}",
                self.public_url_prefix
            )));
        }
        Ok(())
    }

    pub fn provider_timeout(&self) -> Duration {
        Duration::from_secs(self.provider_timeout_secs)
    }

    pub fn sentence_pause(&self) -> Duration {
        Duration::from_millis(self.sentence_pause_ms)
    }

    pub fn database_path(&self) -> PathBuf {
        PathBuf::from(&self.data_dir).join("stories.db")
    }

    pub fn cache_dir(&self) -> PathBuf {
        PathBuf::from(&self.data_dir).join("cache")
    }
}
