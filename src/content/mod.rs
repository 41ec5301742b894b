//! Story text generation over the configured text providers.

pub mod parse;
pub mod prompt;
pub mod templates;

use crate::backends::{PromptStyle, TextProvider};
use crate::chain::FallbackChain;
use crate::error::{GenerationError, ProviderError};
use crate::preferences::ProviderPreferences;
use crate::story::{PayloadOrigin, SentencePair, StoryPayload, StoryRequest};
use parse::ParsedStory;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

/// Default moral when metadata extraction for a plain story fails.
pub const EXTRACTED_MORAL_FALLBACK: &str = "Always be kind and good.";

/// What one provider attempt produced before it becomes a payload.
enum Draft {
    Structured(ParsedStory),
    Plain(Vec<String>),
}

pub struct ContentProvider {
    providers: Vec<Arc<dyn TextProvider>>,
    timeout: Duration,
}

impl ContentProvider {
    pub fn new(providers: Vec<Arc<dyn TextProvider>>, timeout: Duration) -> Self {
        Self { providers, timeout }
    }

    /// Chain for one request: the selected provider first, then the other
    /// registered providers. Bilingual requests drop every provider that
    /// cannot emit sentence/translation pairs.
    pub fn chain_for(
        &self,
        request: &StoryRequest,
        prefs: &ProviderPreferences,
    ) -> Result<FallbackChain<dyn TextProvider>, GenerationError> {
        if prefs.uses_templates() {
            return Err(GenerationError::Unavailable);
        }
        let selected = prefs.llm_provider.as_str();

        let mut ordered: Vec<Arc<dyn TextProvider>> =
            self.providers.iter().filter(|p| p.id() == selected).cloned().collect();
        if ordered.is_empty() {
            tracing::warn!(provider = selected, "selected content provider is not configured");
        }
        ordered.extend(self.providers.iter().filter(|p| p.id() != selected).cloned());

        if request.is_bilingual() {
            if let Some(head) = ordered.first().filter(|p| !p.supports_bilingual()) {
                tracing::info!(
                    requested = head.id(),
                    language = %request.language,
                    "provider cannot produce bilingual output, substituting"
                );
            }
            ordered.retain(|p| p.supports_bilingual());
        }

        if ordered.is_empty() {
            return Err(GenerationError::Unavailable);
        }
        Ok(FallbackChain::new(ordered, self.timeout))
    }

    /// Produces a structured payload or reports why none could be made.
    /// `Unavailable` means "use the template builder", not a failure.
    pub async fn generate(
        &self,
        request: &StoryRequest,
        prefs: &ProviderPreferences,
    ) -> Result<StoryPayload, GenerationError> {
        let chain = self.chain_for(request, prefs)?;
        let bilingual = request.is_bilingual();
        let tone = prefs.story_tone.as_str();

        let won = chain
            .run("story text", |provider| {
                let style = provider.prompt_style();
                let text_request = match (style, bilingual) {
                    (PromptStyle::Completion, _) => prompt::completion(request),
                    (PromptStyle::Instruct, true) => prompt::bilingual(request, tone),
                    (PromptStyle::Instruct, false) => prompt::monolingual(request, tone),
                };
                async move {
                    let raw = provider.complete(&text_request).await?;
                    match style {
                        PromptStyle::Completion => {
                            let sentences = parse::split_sentences(&raw);
                            if sentences.is_empty() {
                                let reason = "no sentences in completion".to_string();
                                return Err(ProviderError::Malformed(reason));
                            }
                            Ok(Draft::Plain(sentences))
                        }
                        PromptStyle::Instruct if bilingual => {
                            Ok(Draft::Structured(parse::parse_story_json(&raw, true)?))
                        }
                        PromptStyle::Instruct => {
                            Ok(Draft::Structured(parse::parse_monolingual(&raw)?))
                        }
                    }
                }
            })
            .await?;

        let origin = PayloadOrigin::Provider(won.provider);
        let payload = match won.output {
            Draft::Structured(parsed) => StoryPayload {
                title: parsed.title.unwrap_or_else(|| templates::title_for(&request.topic)),
                translated_title: parsed.translated_title,
                sentences: parsed.sentences,
                vocabulary: parsed.vocabulary,
                moral: parsed.moral,
                translated_moral: parsed.translated_moral,
                quiz: Vec::new(),
                origin,
            },
            Draft::Plain(sentences) => self.enrich_plain(request, sentences, origin).await,
        };

        tracing::info!(
            provider = won.provider,
            sentences = payload.sentences.len(),
            "story text generated"
        );
        Ok(payload)
    }

    /// Fills moral, vocabulary and quiz of a completion-style story through
    /// the instruction-following providers. Never fails.
    async fn enrich_plain(
        &self,
        request: &StoryRequest,
        sentences: Vec<String>,
        origin: PayloadOrigin,
    ) -> StoryPayload {
        let mut payload = StoryPayload {
            title: templates::title_for(&request.topic),
            translated_title: None,
            sentences: sentences.into_iter().map(SentencePair::plain).collect(),
            vocabulary: BTreeMap::new(),
            moral: EXTRACTED_MORAL_FALLBACK.to_string(),
            translated_moral: None,
            quiz: Vec::new(),
            origin,
        };

        let extractors: Vec<Arc<dyn TextProvider>> = self
            .providers
            .iter()
            .filter(|p| p.prompt_style() == PromptStyle::Instruct)
            .cloned()
            .collect();
        let chain = FallbackChain::new(extractors, self.timeout);
        let metadata_request = prompt::metadata(&payload.content());

        match chain
            .run("story metadata", |provider| {
                let metadata_request = metadata_request.clone();
                async move { parse::parse_metadata(&provider.complete(&metadata_request).await?) }
            })
            .await
        {
            Ok(won) => {
                let meta = won.output;
                if let Some(corrected) = meta.corrected_story {
                    let corrected = parse::split_sentences(&corrected);
                    if !corrected.is_empty() {
                        payload.sentences =
                            corrected.into_iter().map(SentencePair::plain).collect();
                    }
                }
                if let Some(moral) = meta.moral {
                    payload.moral = moral;
                }
                payload.vocabulary = meta.vocabulary;
                payload.quiz = meta.quiz;
            }
            Err(e) => tracing::warn!(error = %e, "metadata extraction failed, using defaults"),
        }
        payload
    }
}
