//! Audio and image synthesis: cache lookup first, provider chain second.
//!
//! Cache entries are keyed on the provider that rendered them. Lookup walks
//! the chain in order, so a fallback's entry is served only while every
//! provider ahead of it keeps failing.

use crate::assets::{AssetPublisher, AssetSlot};
use crate::backends::{AudioProvider, ImageProvider, Provider, SpeechJob};
use crate::cache::{fingerprint, AssetCache, CacheKey, ContentHash, Modality, VariantKey};
use crate::chain::FallbackChain;
use crate::error::{AssetError, ProviderError};
use crate::story::StoryId;
use std::future::Future;
use std::io::{self, Cursor};
use std::sync::Arc;
use std::time::Duration;

/// A resolved asset and how it was obtained.
#[derive(Debug, Clone, PartialEq)]
pub struct AssetRef {
    pub slot: AssetSlot,
    pub public_path: String,
    /// `None` on a cache hit.
    pub provider: Option<&'static str>,
}

impl AssetRef {
    pub fn cached(&self) -> bool {
        self.provider.is_none()
    }
}

enum Produced {
    Cached(Vec<u8>),
    Fresh(Vec<u8>),
}

#[derive(Debug, Clone)]
struct AssetSink {
    cache: AssetCache,
    publisher: AssetPublisher,
}

impl AssetSink {
    fn cached(&self, key: &CacheKey) -> Option<Vec<u8>> {
        if !self.cache.exists(key) {
            return None;
        }
        match self.cache.read(key) {
            Ok(bytes) => Some(bytes),
            Err(e) => {
                tracing::warn!(error = %e, "unreadable cache entry, asking the provider");
                None
            }
        }
    }

    /// Tries each provider in chain order. A provider with an entry of its
    /// own in the cache is answered from it without being called.
    async fn resolve<P, K, F, Fut>(
        &self,
        story: StoryId,
        slot: &AssetSlot,
        chain: &FallbackChain<P>,
        key_for: K,
        mut call: F,
    ) -> Result<AssetRef, AssetError>
    where
        P: ?Sized + Provider,
        K: Fn(&str) -> CacheKey,
        F: FnMut(Arc<P>) -> Fut,
        Fut: Future<Output = Result<Vec<u8>, ProviderError>>,
    {
        let won = chain
            .run(&slot.to_string(), |provider| {
                let hit = self.cached(&key_for(provider.id()));
                let render = call(provider);
                async move {
                    match hit {
                        Some(bytes) => Ok(Produced::Cached(bytes)),
                        None => render.await.map(Produced::Fresh),
                    }
                }
            })
            .await?;

        let (bytes, provider) = match won.output {
            Produced::Cached(bytes) => {
                tracing::debug!(%story, %slot, provider = won.provider, "asset cache hit");
                (bytes, None)
            }
            Produced::Fresh(bytes) => {
                self.cache.write(&key_for(won.provider), &bytes)?;
                tracing::info!(%story, %slot, provider = won.provider, "asset generated");
                (bytes, Some(won.provider))
            }
        };
        let public_path = self.publisher.publish(story, slot, &bytes)?;
        Ok(AssetRef {
            slot: slot.clone(),
            public_path,
            provider,
        })
    }

    fn discard(&self, story: StoryId) -> io::Result<()> {
        self.cache.purge(story)?;
        self.publisher.remove(story)
    }
}

#[derive(Debug, Clone)]
pub struct AudioSynthesizer {
    sink: AssetSink,
    sentence_pause: Duration,
}

impl AudioSynthesizer {
    pub fn new(cache: AssetCache, publisher: AssetPublisher, sentence_pause: Duration) -> Self {
        Self {
            sink: AssetSink { cache, publisher },
            sentence_pause,
        }
    }

    /// Narrates `job.text` into `slot`. The variant covers the provider,
    /// voice, language and speed.
    pub async fn synthesize(
        &self,
        chain: &FallbackChain<dyn AudioProvider>,
        story: StoryId,
        slot: &AssetSlot,
        job: SpeechJob,
    ) -> Result<AssetRef, AssetError> {
        let owner = slot.owner(story);
        let content = ContentHash::of(&job.text);
        let pause = match slot {
            AssetSlot::SentenceAudio(..) => self.sentence_pause,
            _ => Duration::ZERO,
        };
        let key_for = |provider: &str| {
            let variant = VariantKey::audio(provider, &job.voice, &job.language, job.speed);
            fingerprint(owner, Modality::Audio, &variant, &content)
        };

        self.sink
            .resolve(story, slot, chain, key_for, |provider| {
                let job = job.clone();
                async move {
                    let bytes = provider.synthesize(&job).await?;
                    Ok::<_, ProviderError>(pad_with_silence(bytes, pause))
                }
            })
            .await
    }

    /// Removes every cached and published file of `story`.
    pub fn discard(&self, story: StoryId) -> io::Result<()> {
        self.sink.discard(story)
    }
}

/// Appends `pause` of silence to WAV audio. Anything hound cannot read
/// (mp3, streamed WAV headers) is returned unchanged.
pub fn pad_with_silence(bytes: Vec<u8>, pause: Duration) -> Vec<u8> {
    if pause.is_zero() || !bytes.starts_with(b"RIFF") {
        return bytes;
    }
    match try_pad(&bytes, pause) {
        Ok(padded) => padded,
        Err(e) => {
            tracing::debug!(error = %e, "could not pad audio, keeping original");
            bytes
        }
    }
}

fn try_pad(bytes: &[u8], pause: Duration) -> Result<Vec<u8>, hound::Error> {
    let mut reader = hound::WavReader::new(Cursor::new(bytes))?;
    let spec = reader.spec();
    let frames = (spec.sample_rate as f64 * pause.as_secs_f64()).round() as usize;
    let silence = frames * spec.channels as usize;

    let mut out = Vec::new();
    {
        let mut writer = hound::WavWriter::new(Cursor::new(&mut out), spec)?;
        match spec.sample_format {
            hound::SampleFormat::Int => {
                for sample in reader.samples::<i32>() {
                    writer.write_sample(sample?)?;
                }
                for _ in 0..silence {
                    writer.write_sample(0i32)?;
                }
            }
            hound::SampleFormat::Float => {
                for sample in reader.samples::<f32>() {
                    writer.write_sample(sample?)?;
                }
                for _ in 0..silence {
                    writer.write_sample(0.0f32)?;
                }
            }
        }
        writer.finalize()?;
    }
    Ok(out)
}

/// Shared art direction for every illustration of one story.
#[derive(Debug, Clone, PartialEq)]
pub struct StyleContext {
    pub description: String,
}

impl StyleContext {
    pub fn for_story(title: &str, theme: &str) -> Self {
        Self {
            description: format!(
                "Children's story book illustration, gentle, colorful, simple. \
                 All pictures belong to the story \"{}\" ({} theme): keep the same characters, \
                 clothing, colours and art style in every picture.",
                title, theme
            ),
        }
    }

    pub fn prompt(&self, scene: &str) -> String {
        format!("{} Scene: {}", self.description, scene.trim())
    }
}

#[derive(Debug, Clone)]
pub struct ImageSynthesizer {
    sink: AssetSink,
}

impl ImageSynthesizer {
    pub fn new(cache: AssetCache, publisher: AssetPublisher) -> Self {
        Self {
            sink: AssetSink { cache, publisher },
        }
    }

    /// Illustrates `scene` into `slot`. Every provider receives the same
    /// style-prefixed prompt, and the cache hash covers all of it.
    pub async fn synthesize(
        &self,
        chain: &FallbackChain<dyn ImageProvider>,
        story: StoryId,
        slot: &AssetSlot,
        scene: &str,
        style: &StyleContext,
    ) -> Result<AssetRef, AssetError> {
        let prompt = style.prompt(scene);
        let owner = slot.owner(story);
        let content = ContentHash::of(&prompt);
        let key_for = |provider: &str| {
            fingerprint(owner, Modality::Image, &VariantKey::image(provider, "storybook"), &content)
        };

        self.sink
            .resolve(story, slot, chain, key_for, |provider| {
                let prompt = prompt.clone();
                async move { provider.render(&prompt).await }
            })
            .await
    }

    /// Removes every cached and published file of `story`.
    pub fn discard(&self, story: StoryId) -> io::Result<()> {
        self.sink.discard(story)
    }
}
