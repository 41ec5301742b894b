//! Request -> text -> persisted story -> queued assets.

use crate::content::{templates, ContentProvider};
use crate::error::{AssemblyError, GenerationError};
use crate::orchestrator::{AssetBatch, AssetOrchestrator};
use crate::store::{NewStory, StoryStore};
use crate::story::{
    determine_theme, PayloadOrigin, StoryId, StoryPayload, StoryRequest, SOURCE_LANGUAGE,
};
use std::fmt;
use std::sync::Arc;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Requested,
    TextGenerated,
    Persisted,
    AssetsQueued,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Stage::Requested => "requested",
            Stage::TextGenerated => "text_generated",
            Stage::Persisted => "persisted",
            Stage::AssetsQueued => "assets_queued",
        };
        f.write_str(name)
    }
}

/// What the caller gets back as soon as the story is stored.
pub struct Assembled {
    pub id: StoryId,
    pub title: String,
    pub origin: PayloadOrigin,
    /// Background asset work; may be awaited or dropped.
    pub assets: AssetBatch,
}

pub struct StoryAssembler {
    content: Arc<ContentProvider>,
    store: StoryStore,
    orchestrator: AssetOrchestrator,
}

impl StoryAssembler {
    pub fn new(
        content: Arc<ContentProvider>,
        store: StoryStore,
        orchestrator: AssetOrchestrator,
    ) -> Self {
        Self {
            content,
            store,
            orchestrator,
        }
    }

    /// Normalises and checks a request before any provider is called.
    pub fn validate(request: &StoryRequest) -> Result<StoryRequest, AssemblyError> {
        let topic = request.topic.trim();
        if topic.is_empty() {
            return Err(AssemblyError::InvalidRequest("topic must not be empty".into()));
        }
        if topic.chars().count() > 200 {
            return Err(AssemblyError::InvalidRequest("topic is too long".into()));
        }

        let language = match request.language.trim().to_lowercase() {
            l if l.is_empty() => SOURCE_LANGUAGE.to_string(),
            l => l,
        };
        if language.len() > 8 || !language.chars().all(|c| c.is_ascii_alphabetic() || c == '-') {
            return Err(AssemblyError::InvalidRequest(format!(
                "invalid language code '{}'",
                language
            )));
        }
        if !(0.5..=1.5).contains(&request.speed) {
            return Err(AssemblyError::InvalidRequest(format!(
                "speed {} outside 0.5..=1.5",
                request.speed
            )));
        }

        Ok(StoryRequest {
            topic: topic.to_string(),
            length: request.length,
            language,
            speed: request.speed,
        })
    }

    /// Assembles and persists a story, queues its assets and returns
    /// without waiting for them.
    pub async fn assemble(&self, request: &StoryRequest) -> Result<Assembled, AssemblyError> {
        let request = Self::validate(request)?;
        tracing::info!(
            topic = %request.topic,
            language = %request.language,
            stage = %Stage::Requested,
            "story requested"
        );

        let payload = self.generate_text(&request).await?;
        tracing::info!(origin = %payload.origin, stage = %Stage::TextGenerated, "story text ready");

        let id = self.persist(&request, &payload)?;
        tracing::info!(story = %id, stage = %Stage::Persisted, "story stored");

        let assets = self.orchestrator.spawn(id);
        tracing::info!(story = %id, stage = %Stage::AssetsQueued, "assets queued");

        Ok(Assembled {
            id,
            title: payload.title,
            origin: payload.origin,
            assets,
        })
    }

    /// Provider text when possible, template text otherwise. Only a failure
    /// to read preferences surfaces as an error.
    pub async fn generate_text(
        &self,
        request: &StoryRequest,
    ) -> Result<StoryPayload, AssemblyError> {
        let prefs = self.store.preferences()?;

        let payload = match self.content.generate(request, &prefs).await {
            Ok(payload) if is_well_formed(&payload) => payload,
            Ok(payload) => {
                tracing::warn!(
                    origin = %payload.origin,
                    "provider payload failed validation, using templates"
                );
                templates::build(request)
            }
            Err(GenerationError::Unavailable) => {
                tracing::info!("no content provider configured, using templates");
                templates::build(request)
            }
            Err(GenerationError::Exhausted(e)) => {
                tracing::warn!(
                    attempted = ?e.attempted(),
                    "content providers exhausted, using templates"
                );
                templates::build(request)
            }
        };
        Ok(payload)
    }

    /// Writes the story and its sentences in one transaction, then records
    /// vocabulary progress.
    pub fn persist(
        &self,
        request: &StoryRequest,
        payload: &StoryPayload,
    ) -> Result<StoryId, AssemblyError> {
        let story = NewStory {
            title: payload.title.trim().to_string(),
            translated_title: payload.translated_title.clone(),
            language: request.language.clone(),
            moral: payload.moral.clone(),
            translated_moral: payload.translated_moral.clone(),
            vocabulary: payload.vocabulary.clone(),
            quiz: payload.quiz.clone(),
            theme: determine_theme(&request.topic).to_string(),
            audio_speed: request.speed,
            origin: payload.origin.to_string(),
            sentences: payload.sentences.clone(),
        };
        let id = self.store.insert_story(&story)?;

        if let Err(e) = self.store.record_vocabulary(&payload.vocabulary) {
            tracing::warn!(story = %id, error = %e, "could not update vocabulary progress");
        }
        Ok(id)
    }
}

/// Structural check shared by every payload origin.
fn is_well_formed(payload: &StoryPayload) -> bool {
    !payload.title.trim().is_empty()
        && !payload.sentences.is_empty()
        && payload.sentences.iter().all(|s| !s.text.trim().is_empty())
}
