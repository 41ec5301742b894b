//! Process-level wiring: one store, one provider registry, one cache.

use crate::assembler::{Assembled, StoryAssembler};
use crate::assets::{AssetPublisher, AssetSlot};
use crate::backends::{ollama::LocalModelSession, ProviderRegistry};
use crate::cache::AssetCache;
use crate::config_loader::Settings;
use crate::content::ContentProvider;
use crate::error::{AssemblyError, AssetError, SetupError, StoreError};
use crate::orchestrator::{AssetOrchestrator, BatchReport};
use crate::preferences::ProviderPreferences;
use crate::store::StoryStore;
use crate::synth::{AudioSynthesizer, ImageSynthesizer};
use crate::story::{MasteryStatus, Story, StoryId, StoryRequest, StorySummary, VocabularyEntry};
use std::collections::BTreeMap;
use std::sync::Arc;

pub struct StoryPipeline {
    settings: Arc<Settings>,
    store: StoryStore,
    cache: AssetCache,
    publisher: AssetPublisher,
    assembler: StoryAssembler,
    orchestrator: AssetOrchestrator,
}

impl StoryPipeline {
    /// Opens the database under `data_dir` and registers every configured
    /// provider. One HTTP client, bounded by the provider timeout, is
    /// shared by all of them.
    pub fn open(settings: Arc<Settings>) -> Result<Self, SetupError> {
        let store = StoryStore::open(&settings.database_path())?;
        let client = reqwest::Client::builder()
            .timeout(settings.provider_timeout())
            .build()?;
        let session =
            LocalModelSession::new(client.clone(), &settings.ollama_url, &settings.ollama_model);
        let registry = ProviderRegistry::from_settings(&settings, client, session);

        tracing::info!(
            text = ?registry.text.iter().map(|p| p.id()).collect::<Vec<_>>(),
            audio = ?registry.audio.iter().map(|p| p.id()).collect::<Vec<_>>(),
            image = ?registry.image.iter().map(|p| p.id()).collect::<Vec<_>>(),
            "providers registered"
        );
        Ok(Self::with_registry(settings, store, registry))
    }

    /// Builds the pipeline over an explicit store and registry.
    pub fn with_registry(
        settings: Arc<Settings>,
        store: StoryStore,
        registry: ProviderRegistry,
    ) -> Self {
        let cache = AssetCache::new(settings.cache_dir());
        let publisher = AssetPublisher::new(&settings.public_dir, &settings.public_url_prefix);
        let registry = Arc::new(registry);

        let orchestrator = AssetOrchestrator::new(
            store.clone(),
            registry.clone(),
            AudioSynthesizer::new(
                cache.clone(),
                publisher.clone(),
                settings.sentence_pause(),
            ),
            ImageSynthesizer::new(cache.clone(), publisher.clone()),
        );
        let content = Arc::new(ContentProvider::new(registry.text.clone(), registry.timeout));
        let assembler = StoryAssembler::new(content, store.clone(), orchestrator.clone());

        Self {
            settings,
            store,
            cache,
            publisher,
            assembler,
            orchestrator,
        }
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    pub fn store(&self) -> &StoryStore {
        &self.store
    }

    /// A request with the configured default narration speed.
    pub fn request(&self, topic: &str) -> StoryRequest {
        StoryRequest::new(topic).with_speed(self.settings.default_speed)
    }

    pub async fn generate(&self, request: &StoryRequest) -> Result<Assembled, AssemblyError> {
        self.assembler.assemble(request).await
    }

    pub async fn regenerate(&self, id: StoryId) -> Result<BatchReport, AssetError> {
        self.orchestrator.regenerate(id).await
    }

    pub fn show(&self, id: StoryId) -> Result<Story, StoreError> {
        self.store.load_story(id)
    }

    pub fn assets(&self, id: StoryId) -> Result<BTreeMap<AssetSlot, String>, StoreError> {
        self.store.asset_refs(id)
    }

    pub fn list(&self) -> Result<Vec<StorySummary>, StoreError> {
        self.store.list_stories()
    }

    pub fn mark_read(&self, id: StoryId) -> Result<(), StoreError> {
        self.store.mark_read(id)
    }

    /// Removes the rows first, then the cached and published files.
    pub fn delete(&self, id: StoryId) -> Result<(), AssetError> {
        self.store.delete_story(id)?;
        self.cache.purge(id)?;
        self.publisher.remove(id)?;
        Ok(())
    }

    pub fn preferences(&self) -> Result<ProviderPreferences, StoreError> {
        self.store.preferences()
    }

    pub fn set_preference(
        &self,
        key: &str,
        value: &str,
    ) -> Result<ProviderPreferences, StoreError> {
        self.store.set_preference(key, value)
    }

    pub fn vocabulary(&self) -> Result<Vec<VocabularyEntry>, StoreError> {
        self.store.vocabulary()
    }

    pub fn set_mastery(
        &self,
        word: &str,
        status: MasteryStatus,
    ) -> Result<VocabularyEntry, StoreError> {
        self.store.set_mastery(word, status)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_open_creates_database() {
        let dir = tempdir().unwrap();
        let settings = Arc::new(Settings {
            data_dir: dir.path().join("data").to_string_lossy().into_owned(),
            public_dir: dir.path().join("public").to_string_lossy().into_owned(),
            ..Settings::default()
        });

        let pipeline = StoryPipeline::open(settings.clone()).unwrap();
        assert!(settings.database_path().exists());
        assert!(pipeline.list().unwrap().is_empty());
        assert!(pipeline.preferences().unwrap().uses_templates());
    }
}
