//! Content-addressed storage for generated audio and images.
//!
//! Entries live at `<root>/<story id>/<sha256 of fingerprint>` and are never
//! rewritten with different bytes: same fingerprint, same asset. The only
//! invalidation is `purge`, called when the owning story is deleted.

use crate::story::StoryId;
use sha2::{Digest, Sha256};
use std::fs;
use std::io;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};

static TMP_COUNTER: AtomicU64 = AtomicU64::new(0);

/// Entity an asset belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AssetOwner {
    Story(StoryId),
    Sentence(StoryId, u32),
}

impl AssetOwner {
    pub fn story(&self) -> StoryId {
        match self {
            AssetOwner::Story(id) | AssetOwner::Sentence(id, _) => *id,
        }
    }

    fn tag(&self) -> String {
        match self {
            AssetOwner::Story(id) => format!("story:{}", id),
            AssetOwner::Sentence(id, idx) => format!("sentence:{}:{}", id, idx),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Modality {
    Audio,
    Image,
}

impl Modality {
    pub fn as_str(self) -> &'static str {
        match self {
            Modality::Audio => "audio",
            Modality::Image => "image",
        }
    }
}

/// Everything besides the literal text that changes the rendered output.
#[derive(Debug, Clone, PartialEq)]
pub struct VariantKey {
    pub provider: String,
    /// Voice preset for audio, style id for images.
    pub style: String,
    pub language: String,
    /// Speaking speed or image quality setting.
    pub setting: String,
}

impl VariantKey {
    pub fn audio(provider: &str, voice: &str, language: &str, speed: f32) -> Self {
        Self {
            provider: provider.to_string(),
            style: voice.to_string(),
            language: language.to_string(),
            // Two decimals so 0.8 and 0.80000001 share entries
            setting: format!("{:.2}", speed),
        }
    }

    pub fn image(provider: &str, style: &str) -> Self {
        Self {
            provider: provider.to_string(),
            style: style.to_string(),
            language: String::new(),
            setting: "standard".to_string(),
        }
    }

    fn tag(&self) -> String {
        format!("{}|{}|{}|{}", self.provider, self.style, self.language, self.setting)
    }
}

/// SHA-256 of the exact text or prompt being rendered.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ContentHash(String);

impl ContentHash {
    pub fn of(content: &str) -> Self {
        Self(hex::encode(Sha256::digest(content.as_bytes())))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

/// Cache address of one asset.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey {
    story: StoryId,
    digest: String,
}

pub fn fingerprint(
    owner: AssetOwner,
    modality: Modality,
    variant: &VariantKey,
    content: &ContentHash,
) -> CacheKey {
    let mut hasher = Sha256::new();
    for part in [owner.tag(), modality.as_str().to_string(), variant.tag(), content.0.clone()] {
        hasher.update(part.as_bytes());
        // Separator keeps ("ab","c") and ("a","bc") apart
        hasher.update([0u8]);
    }
    CacheKey {
        story: owner.story(),
        digest: hex::encode(hasher.finalize()),
    }
}

#[derive(Debug, Clone)]
pub struct AssetCache {
    root: PathBuf,
}

impl AssetCache {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn story_dir(&self, story: StoryId) -> PathBuf {
        self.root.join(story.to_string())
    }

    pub fn path_of(&self, key: &CacheKey) -> PathBuf {
        self.story_dir(key.story).join(&key.digest)
    }

    pub fn exists(&self, key: &CacheKey) -> bool {
        self.path_of(key).is_file()
    }

    pub fn read(&self, key: &CacheKey) -> io::Result<Vec<u8>> {
        fs::read(self.path_of(key))
    }

    /// Writes through a unique temp file and renames it into place, so a
    /// reader never sees a partial entry. Concurrent writers of the same key
    /// both succeed; the last rename wins with identical bytes.
    pub fn write(&self, key: &CacheKey, bytes: &[u8]) -> io::Result<()> {
        let dir = self.story_dir(key.story);
        fs::create_dir_all(&dir)?;

        let tmp = dir.join(format!(
            ".{}.{}.{}.tmp",
            key.digest,
            std::process::id(),
            TMP_COUNTER.fetch_add(1, Ordering::Relaxed)
        ));
        fs::write(&tmp, bytes)?;
        if let Err(e) = fs::rename(&tmp, self.path_of(key)) {
            let _ = fs::remove_file(&tmp);
            return Err(e);
        }
        Ok(())
    }

    /// Removes every entry owned by `story`.
    pub fn purge(&self, story: StoryId) -> io::Result<()> {
        match fs::remove_dir_all(self.story_dir(story)) {
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            other => other,
        }
    }
}
