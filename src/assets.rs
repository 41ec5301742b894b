//! Asset slots and their stable public paths.

use crate::cache::{AssetOwner, Modality};
use crate::story::StoryId;
use std::fmt;
use std::fs;
use std::io;
use std::path::PathBuf;

/// One addressable asset position of a story. The sentence index is the
/// persisted order index, the join key between text, audio and image.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum AssetSlot {
    Cover,
    FullAudio(String),
    SentenceImage(u32),
    SentenceAudio(u32, String),
}

impl AssetSlot {
    /// Row key suffix in the asset table.
    pub fn key(&self) -> String {
        match self {
            AssetSlot::Cover => "cover".to_string(),
            AssetSlot::FullAudio(lang) => format!("audio/{}", lang),
            AssetSlot::SentenceImage(idx) => format!("sentence/{:05}/image", idx),
            AssetSlot::SentenceAudio(idx, lang) => format!("sentence/{:05}/audio/{}", idx, lang),
        }
    }

    pub fn parse(key: &str) -> Option<Self> {
        let parts: Vec<&str> = key.split('/').collect();
        match parts.as_slice() {
            ["cover"] => Some(AssetSlot::Cover),
            ["audio", lang] if !lang.is_empty() => Some(AssetSlot::FullAudio(lang.to_string())),
            ["sentence", idx, "image"] => idx.parse().ok().map(AssetSlot::SentenceImage),
            ["sentence", idx, "audio", lang] if !lang.is_empty() => {
                idx.parse().ok().map(|i| AssetSlot::SentenceAudio(i, lang.to_string()))
            }
            _ => None,
        }
    }

    pub fn modality(&self) -> Modality {
        match self {
            AssetSlot::Cover | AssetSlot::SentenceImage(_) => Modality::Image,
            AssetSlot::FullAudio(_) | AssetSlot::SentenceAudio(..) => Modality::Audio,
        }
    }

    pub fn owner(&self, story: StoryId) -> AssetOwner {
        match self {
            AssetSlot::Cover | AssetSlot::FullAudio(_) => AssetOwner::Story(story),
            AssetSlot::SentenceImage(idx) | AssetSlot::SentenceAudio(idx, _) => {
                AssetOwner::Sentence(story, *idx)
            }
        }
    }

    fn file_stem(&self) -> String {
        match self {
            AssetSlot::Cover => "cover".to_string(),
            AssetSlot::FullAudio(lang) => format!("story-{}", lang),
            AssetSlot::SentenceImage(idx) => format!("sentence-{}", idx),
            AssetSlot::SentenceAudio(idx, lang) => format!("sentence-{}-{}", idx, lang),
        }
    }
}

impl fmt::Display for AssetSlot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.key())
    }
}

/// File extension guessed from magic bytes.
pub fn sniff_extension(bytes: &[u8], modality: Modality) -> &'static str {
    if bytes.starts_with(b"RIFF") {
        "wav"
    } else if bytes.starts_with(b"ID3")
        || bytes.starts_with(&[0xFF, 0xFB])
        || bytes.starts_with(&[0xFF, 0xF3])
    {
        "mp3"
    } else if bytes.starts_with(&[0x89, b'P', b'N', b'G']) {
        "png"
    } else if bytes.starts_with(&[0xFF, 0xD8, 0xFF]) {
        "jpg"
    } else {
        match modality {
            Modality::Audio => "mp3",
            Modality::Image => "png",
        }
    }
}

/// Copies finished assets to the public directory and names them.
#[derive(Debug, Clone)]
pub struct AssetPublisher {
    public_dir: PathBuf,
    url_prefix: String,
}

impl AssetPublisher {
    pub fn new(public_dir: impl Into<PathBuf>, url_prefix: &str) -> Self {
        Self {
            public_dir: public_dir.into(),
            url_prefix: url_prefix.trim_end_matches('/').to_string(),
        }
    }

    fn story_dir(&self, story: StoryId) -> PathBuf {
        self.public_dir.join("stories").join(story.to_string())
    }

    pub fn public_path(&self, story: StoryId, slot: &AssetSlot, bytes: &[u8]) -> String {
        format!(
            "{}/stories/{}/{}.{}",
            self.url_prefix,
            story,
            slot.file_stem(),
            sniff_extension(bytes, slot.modality())
        )
    }

    /// Writes `bytes` under the slot's stable name and returns its public path.
    pub fn publish(&self, story: StoryId, slot: &AssetSlot, bytes: &[u8]) -> io::Result<String> {
        let dir = self.story_dir(story);
        fs::create_dir_all(&dir)?;

        let file = format!("{}.{}", slot.file_stem(), sniff_extension(bytes, slot.modality()));
        let tmp = dir.join(format!(".{}.{}.tmp", file, std::process::id()));
        fs::write(&tmp, bytes)?;
        fs::rename(&tmp, dir.join(&file))?;

        Ok(self.public_path(story, slot, bytes))
    }

    /// Removes every published file of `story`.
    pub fn remove(&self, story: StoryId) -> io::Result<()> {
        match fs::remove_dir_all(self.story_dir(story)) {
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            other => other,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_slot_key_parse() {
        let slots = [
            AssetSlot::Cover,
            AssetSlot::FullAudio("hi".into()),
            AssetSlot::SentenceImage(3),
            AssetSlot::SentenceAudio(12, "en".into()),
        ];
        for slot in slots {
            assert_eq!(AssetSlot::parse(&slot.key()), Some(slot));
        }
        assert_eq!(AssetSlot::parse("sentence/x/image"), None);
        assert_eq!(AssetSlot::parse("audio/"), None);
    }

    #[test]
    fn test_sentence_keys_sort_by_index() {
        assert!(AssetSlot::SentenceImage(2).key() < AssetSlot::SentenceImage(10).key());
    }

    #[test]
    fn test_sniff_extension() {
        assert_eq!(sniff_extension(b"RIFF\0\0\0\0WAVE", Modality::Audio), "wav");
        assert_eq!(sniff_extension(b"ID3\x04", Modality::Audio), "mp3");
        assert_eq!(sniff_extension(&[0xFF, 0xD8, 0xFF, 0xE0], Modality::Image), "jpg");
        assert_eq!(sniff_extension(b"????", Modality::Image), "png");
    }

    #[test]
    fn test_publish_stable_path() {
        let dir = tempfile::tempdir().unwrap();
        let publisher = AssetPublisher::new(dir.path(), "/assets/");
        let slot = AssetSlot::SentenceAudio(0, "en".into());

        let path = publisher.publish(StoryId(5), &slot, b"RIFFdata").unwrap();
        assert_eq!(path, "/assets/stories/5/sentence-0-en.wav");
        assert!(dir.path().join("stories/5/sentence-0-en.wav").is_file());

        publisher.remove(StoryId(5)).unwrap();
        assert!(!dir.path().join("stories/5").exists());
    }
}
