//! Background fan-out of every audio and image unit of one story.
//!
//! The cover, the per-sentence images and the sentence-audio unit run in a
//! joined task set. Whole-story narration runs in tasks of its own that
//! `AssetBatch::wait` does not block on; `wait_all` and regeneration await
//! them too. Units never affect each other: a failure leaves its slot empty
//! and is logged.

use crate::assets::AssetSlot;
use crate::backends::{AudioProvider, ImageProvider, ProviderRegistry, SpeechJob};
use crate::chain::FallbackChain;
use crate::error::{AssetError, StoreError};
use crate::preferences::ProviderPreferences;
use crate::store::StoryStore;
use crate::story::{Sentence, Story, StoryId, SOURCE_LANGUAGE};
use crate::synth::{AssetRef, AudioSynthesizer, ImageSynthesizer, StyleContext};
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::task::{JoinHandle, JoinSet};

/// Outcome of one asset slot.
#[derive(Debug, Clone, PartialEq)]
pub struct SlotReport {
    pub slot: AssetSlot,
    pub public_path: Option<String>,
    /// Provider that generated the asset; `None` for cache hits and failures.
    pub provider: Option<&'static str>,
    pub cached: bool,
    pub error: Option<String>,
}

impl SlotReport {
    fn from_result(slot: AssetSlot, result: Result<AssetRef, AssetError>) -> Self {
        match result {
            Ok(asset) => Self {
                cached: asset.cached(),
                provider: asset.provider,
                public_path: Some(asset.public_path),
                slot,
                error: None,
            },
            Err(e) => Self {
                slot,
                public_path: None,
                provider: None,
                cached: false,
                error: Some(e.to_string()),
            },
        }
    }

    pub fn succeeded(&self) -> bool {
        self.public_path.is_some()
    }
}

#[derive(Debug, Clone, Default)]
pub struct BatchReport {
    pub slots: Vec<SlotReport>,
}

impl BatchReport {
    fn sort(&mut self) {
        self.slots.sort_by(|a, b| a.slot.cmp(&b.slot));
    }

    pub fn failed(&self) -> impl Iterator<Item = &SlotReport> {
        self.slots.iter().filter(|s| !s.succeeded())
    }

    /// Number of assets a provider had to generate.
    pub fn generated(&self) -> usize {
        self.slots.iter().filter(|s| s.provider.is_some()).count()
    }

    pub fn refs(&self) -> BTreeMap<AssetSlot, String> {
        self.slots
            .iter()
            .filter_map(|s| s.public_path.clone().map(|p| (s.slot.clone(), p)))
            .collect()
    }
}

/// Core units are done; whole-story narration may still be running.
struct CoreDone {
    story: StoryId,
    report: BatchReport,
    full_audio: Vec<JoinHandle<SlotReport>>,
}

impl CoreDone {
    async fn finish(self) -> BatchReport {
        let mut report = self.report;
        for joined in futures_util::future::join_all(self.full_audio).await {
            match joined {
                Ok(slot) => report.slots.push(slot),
                Err(e) => {
                    tracing::error!(story = %self.story, error = %e, "full audio unit panicked")
                }
            }
        }
        report.sort();
        tracing::info!(
            story = %self.story,
            completed = report.slots.len() - report.failed().count(),
            failed = report.failed().count(),
            generated = report.generated(),
            "asset batch finished"
        );
        report
    }
}

/// Handle on a running batch. Dropping it does not cancel anything, but
/// tasks still running when the runtime shuts down are lost.
pub struct AssetBatch {
    pub story: StoryId,
    handle: JoinHandle<Result<CoreDone, AssetError>>,
}

impl AssetBatch {
    async fn core(self) -> Result<CoreDone, AssetError> {
        self.handle.await.map_err(|e| AssetError::Task(e.to_string()))?
    }

    /// Waits for the cover, sentence images and sentence audio. Whole-story
    /// narration keeps running in the background.
    pub async fn wait(self) -> Result<BatchReport, AssetError> {
        let mut report = self.core().await?.report;
        report.sort();
        Ok(report)
    }

    /// Waits for every unit, whole-story narration included.
    pub async fn wait_all(self) -> Result<BatchReport, AssetError> {
        Ok(self.core().await?.finish().await)
    }
}

#[derive(Clone)]
pub struct AssetOrchestrator {
    store: StoryStore,
    registry: Arc<ProviderRegistry>,
    audio: AudioSynthesizer,
    images: ImageSynthesizer,
}

/// Per-batch inputs shared by every unit.
#[derive(Clone)]
struct BatchContext {
    story: StoryId,
    voice: String,
    speed: f32,
    style: StyleContext,
    audio_chain: FallbackChain<dyn AudioProvider>,
    image_chain: FallbackChain<dyn ImageProvider>,
}

impl AssetOrchestrator {
    pub fn new(
        store: StoryStore,
        registry: Arc<ProviderRegistry>,
        audio: AudioSynthesizer,
        images: ImageSynthesizer,
    ) -> Self {
        Self {
            store,
            registry,
            audio,
            images,
        }
    }

    /// Starts the batch in the background and returns at once.
    pub fn spawn(&self, story: StoryId) -> AssetBatch {
        let this = self.clone();
        AssetBatch {
            story,
            handle: tokio::spawn(async move { this.run(story).await }),
        }
    }

    /// Runs every unit, whole-story narration included, and waits for all
    /// of them. Filled slots come back from the cache without provider calls.
    pub async fn regenerate(&self, story: StoryId) -> Result<BatchReport, AssetError> {
        Ok(self.run(story).await?.finish().await)
    }

    fn context(&self, story: &Story, prefs: &ProviderPreferences) -> BatchContext {
        BatchContext {
            story: story.id,
            voice: prefs.voice_preset.clone(),
            speed: story.audio_speed,
            style: StyleContext::for_story(&story.title, &story.theme),
            audio_chain: self.registry.audio_chain(prefs),
            image_chain: self.registry.image_chain(prefs),
        }
    }

    async fn run(&self, id: StoryId) -> Result<CoreDone, AssetError> {
        // Preferences may change between batches
        let story = self.store.load_story(id)?;
        let prefs = self.store.preferences()?;
        let ctx = self.context(&story, &prefs);
        tracing::info!(story = %id, sentences = story.sentences.len(), "asset batch started");

        let full_audio: Vec<JoinHandle<SlotReport>> = full_audio_texts(&story)
            .into_iter()
            .map(|(lang, text)| {
                let this = self.clone();
                let ctx = ctx.clone();
                tokio::spawn(async move { this.full_audio(&ctx, lang, text).await })
            })
            .collect();

        let mut core = JoinSet::new();
        {
            let this = self.clone();
            let ctx = ctx.clone();
            let scene = cover_scene(&story);
            core.spawn(async move { vec![this.image(&ctx, AssetSlot::Cover, scene).await] });
        }
        for sentence in &story.sentences {
            let this = self.clone();
            let ctx = ctx.clone();
            let slot = AssetSlot::SentenceImage(sentence.index);
            let scene = sentence.text.clone();
            core.spawn(async move { vec![this.image(&ctx, slot, scene).await] });
        }
        {
            let this = self.clone();
            let ctx = ctx.clone();
            let sentences = story.sentences.clone();
            let target = story.language.clone();
            core.spawn(async move { this.sentence_audio(&ctx, &sentences, &target).await });
        }

        let mut report = BatchReport::default();
        while let Some(joined) = core.join_next().await {
            match joined {
                Ok(slots) => report.slots.extend(slots),
                Err(e) => tracing::error!(story = %id, error = %e, "asset unit panicked"),
            }
        }

        tracing::debug!(story = %id, slots = report.slots.len(), "core asset units finished");
        Ok(CoreDone {
            story: id,
            report,
            full_audio,
        })
    }

    /// Resolves one slot and writes its reference back. The row write is
    /// the unit's own single-row update.
    fn record(
        &self,
        story: StoryId,
        slot: AssetSlot,
        result: Result<AssetRef, AssetError>,
    ) -> SlotReport {
        let result = result.and_then(|asset| {
            self.store.set_asset(story, &slot, &asset.public_path)?;
            Ok(asset)
        });
        if let Err(AssetError::Store(StoreError::NotFound(_))) = &result {
            // Deleted mid-batch: drop what this unit just cached and published
            if let Err(e) = self.images.discard(story) {
                tracing::warn!(%story, error = %e, "could not clean up after deleted story");
            }
        }
        if let Err(e) = &result {
            tracing::warn!(%story, %slot, error = %e, "asset unit failed, slot left empty");
        }
        SlotReport::from_result(slot, result)
    }

    async fn image(&self, ctx: &BatchContext, slot: AssetSlot, scene: String) -> SlotReport {
        let result = self
            .images
            .synthesize(&ctx.image_chain, ctx.story, &slot, &scene, &ctx.style)
            .await;
        self.record(ctx.story, slot, result)
    }

    async fn speak(
        &self,
        ctx: &BatchContext,
        slot: AssetSlot,
        text: String,
        language: String,
    ) -> SlotReport {
        let job = SpeechJob {
            text,
            language,
            voice: ctx.voice.clone(),
            speed: ctx.speed,
        };
        let result = self.audio.synthesize(&ctx.audio_chain, ctx.story, &slot, job).await;
        self.record(ctx.story, slot, result)
    }

    async fn full_audio(&self, ctx: &BatchContext, language: String, text: String) -> SlotReport {
        self.speak(ctx, AssetSlot::FullAudio(language.clone()), text, language).await
    }

    /// Narration for every sentence in both languages, addressed by the
    /// stored order index.
    async fn sentence_audio(
        &self,
        ctx: &BatchContext,
        sentences: &[Sentence],
        target: &str,
    ) -> Vec<SlotReport> {
        let mut set = JoinSet::new();
        for sentence in sentences {
            for (lang, text) in sentence_texts(sentence, target) {
                let this = self.clone();
                let ctx = ctx.clone();
                let slot = AssetSlot::SentenceAudio(sentence.index, lang.clone());
                set.spawn(async move { this.speak(&ctx, slot, text, lang).await });
            }
        }

        let mut reports = Vec::new();
        while let Some(joined) = set.join_next().await {
            match joined {
                Ok(report) => reports.push(report),
                Err(e) => {
                    tracing::error!(story = %ctx.story, error = %e, "sentence audio task panicked")
                }
            }
        }
        reports
    }
}

fn is_target(language: &str) -> bool {
    !language.is_empty() && !language.eq_ignore_ascii_case(SOURCE_LANGUAGE)
}

/// Whole-story narration per language: source always, target when every
/// sentence is translated.
fn full_audio_texts(story: &Story) -> Vec<(String, String)> {
    let mut texts = vec![(SOURCE_LANGUAGE.to_string(), story.content.clone())];
    if is_target(&story.language) {
        if let Some(translated) = story.translated_content() {
            texts.push((story.language.clone(), translated));
        }
    }
    texts
}

fn sentence_texts(sentence: &Sentence, target: &str) -> Vec<(String, String)> {
    let mut texts = vec![(SOURCE_LANGUAGE.to_string(), sentence.text.clone())];
    if is_target(target) {
        let translation = sentence.translation.as_deref().filter(|t| !t.trim().is_empty());
        if let Some(translation) = translation {
            texts.push((target.to_string(), translation.to_string()));
        }
    }
    texts
}

fn cover_scene(story: &Story) -> String {
    let opening = story.sentences.first().map(|s| s.text.as_str()).unwrap_or_default();
    format!("Cover picture for \"{}\". {}", story.title, opening)
}
