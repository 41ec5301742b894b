//! Operator-editable provider preferences, persisted in the database and
//! re-read on every use.

use crate::error::StoreError;
use serde::{Deserialize, Serialize};

/// Value meaning "no explicit choice".
pub const DEFAULT_CHOICE: &str = "default";

/// Writable preference keys.
pub const KEYS: [&str; 5] = [
    "llm_provider",
    "tts_provider",
    "image_provider",
    "voice_preset",
    "story_tone",
];

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProviderPreferences {
    /// `default` means no content provider: stories come from templates.
    pub llm_provider: String,
    pub tts_provider: String,
    pub image_provider: String,
    pub voice_preset: String,
    pub story_tone: String,
}

impl Default for ProviderPreferences {
    fn default() -> Self {
        Self {
            llm_provider: DEFAULT_CHOICE.to_string(),
            tts_provider: DEFAULT_CHOICE.to_string(),
            image_provider: DEFAULT_CHOICE.to_string(),
            voice_preset: DEFAULT_CHOICE.to_string(),
            story_tone: DEFAULT_CHOICE.to_string(),
        }
    }
}

impl ProviderPreferences {
    pub fn get(&self, key: &str) -> Option<&str> {
        match key {
            "llm_provider" => Some(&self.llm_provider),
            "tts_provider" => Some(&self.tts_provider),
            "image_provider" => Some(&self.image_provider),
            "voice_preset" => Some(&self.voice_preset),
            "story_tone" => Some(&self.story_tone),
            _ => None,
        }
    }

    /// Sets one whitelisted key. Values are normalised to trimmed lowercase;
    /// an empty value resets the key to `default`.
    pub fn set(&mut self, key: &str, value: &str) -> Result<(), StoreError> {
        let value = match value.trim().to_lowercase() {
            v if v.is_empty() => DEFAULT_CHOICE.to_string(),
            v => v,
        };
        let slot = match key {
            "llm_provider" => &mut self.llm_provider,
            "tts_provider" => &mut self.tts_provider,
            "image_provider" => &mut self.image_provider,
            "voice_preset" => &mut self.voice_preset,
            "story_tone" => &mut self.story_tone,
            other => return Err(StoreError::InvalidSetting(format!("unknown key '{}'", other))),
        };
        *slot = value;
        Ok(())
    }

    pub fn pairs(&self) -> Vec<(&'static str, &str)> {
        KEYS.iter()
            .filter_map(|k| self.get(k).map(|v| (*k, v)))
            .collect()
    }

    pub fn uses_templates(&self) -> bool {
        self.llm_provider == DEFAULT_CHOICE
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_set_whitelisted_key() {
        let mut prefs = ProviderPreferences::default();
        assert!(prefs.uses_templates());

        prefs.set("llm_provider", "  Gemini ").unwrap();
        assert_eq!(prefs.llm_provider, "gemini");
        assert!(!prefs.uses_templates());

        prefs.set("llm_provider", "").unwrap();
        assert!(prefs.uses_templates());
    }

    #[test]
    fn test_unknown_key_rejected() {
        let mut prefs = ProviderPreferences::default();
        let err = prefs.set("reader_layout", "grid").unwrap_err();
        assert!(matches!(err, StoreError::InvalidSetting(_)));
        assert_eq!(prefs, ProviderPreferences::default());
    }

    #[test]
    fn test_pairs_cover_all_keys() {
        let prefs = ProviderPreferences::default();
        let keys: Vec<_> = prefs.pairs().into_iter().map(|(k, _)| k).collect();
        assert_eq!(keys, KEYS.to_vec());
    }
}
