//! sled-backed persistence for stories, sentences, asset references,
//! preferences and vocabulary progress.
//!
//! Key layout:
//! - `stories`:    story id (8 bytes, big endian)
//! - `sentences`:  story id ++ order index (4 bytes, big endian)
//! - `assets`:     story id ++ slot key (`cover`, `sentence/00003/image`, ...)
//! - `settings`:   preference key
//! - `vocabulary`: lowercase word

use crate::assets::AssetSlot;
use crate::error::StoreError;
use crate::preferences::{ProviderPreferences, KEYS};
use crate::story::{
    join_sentences, MasteryStatus, QuizQuestion, Sentence, SentencePair, Story, StoryId,
    StorySummary, VocabularyEntry,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sled::transaction::ConflictableTransactionError;
use sled::Transactional;
use std::collections::BTreeMap;
use std::path::Path;

/// A story ready to be persisted. Content is always derived from the
/// sentences, never stored independently of them.
#[derive(Debug, Clone)]
pub struct NewStory {
    pub title: String,
    pub translated_title: Option<String>,
    pub language: String,
    pub moral: String,
    pub translated_moral: Option<String>,
    pub vocabulary: BTreeMap<String, String>,
    pub quiz: Vec<QuizQuestion>,
    pub theme: String,
    pub audio_speed: f32,
    pub origin: String,
    pub sentences: Vec<SentencePair>,
}

#[derive(Serialize, Deserialize)]
struct StoryRow {
    title: String,
    translated_title: Option<String>,
    language: String,
    content: String,
    moral: String,
    translated_moral: Option<String>,
    vocabulary: BTreeMap<String, String>,
    /// Stored as a JSON array of structured questions.
    quiz: Vec<QuizQuestion>,
    theme: String,
    audio_speed: f32,
    origin: String,
    created_at: DateTime<Utc>,
    last_read: Option<DateTime<Utc>>,
}

#[derive(Serialize, Deserialize)]
struct SentenceRow {
    text: String,
    translation: Option<String>,
}

fn sentence_key(story: StoryId, index: u32) -> Vec<u8> {
    let mut key = story.to_key().to_vec();
    key.extend_from_slice(&index.to_be_bytes());
    key
}

fn asset_key(story: StoryId, slot: &AssetSlot) -> Vec<u8> {
    let mut key = story.to_key().to_vec();
    key.extend_from_slice(slot.key().as_bytes());
    key
}

fn abort(e: impl Into<StoreError>) -> ConflictableTransactionError<StoreError> {
    ConflictableTransactionError::Abort(e.into())
}

fn vocab_key(word: &str) -> String {
    word.trim().to_lowercase()
}

/// Cheap to clone; every clone shares the same database.
#[derive(Clone)]
pub struct StoryStore {
    db: sled::Db,
    stories: sled::Tree,
    sentences: sled::Tree,
    assets: sled::Tree,
    settings: sled::Tree,
    vocabulary: sled::Tree,
}

impl StoryStore {
    pub fn open(path: &Path) -> Result<Self, StoreError> {
        Self::from_db(sled::open(path)?)
    }

    /// In-memory database removed on drop.
    pub fn temporary() -> Result<Self, StoreError> {
        Self::from_db(sled::Config::new().temporary(true).open()?)
    }

    pub fn from_db(db: sled::Db) -> Result<Self, StoreError> {
        Ok(Self {
            stories: db.open_tree("stories")?,
            sentences: db.open_tree("sentences")?,
            assets: db.open_tree("assets")?,
            settings: db.open_tree("settings")?,
            vocabulary: db.open_tree("vocabulary")?,
            db,
        })
    }

    /// Writes the story row and all its sentence rows in one transaction.
    pub fn insert_story(&self, story: &NewStory) -> Result<StoryId, StoreError> {
        if story.sentences.is_empty() || story.sentences.iter().any(|s| s.text.trim().is_empty()) {
            return Err(StoreError::EmptyStory);
        }

        let id = StoryId(self.db.generate_id()? + 1);
        let row = StoryRow {
            title: story.title.clone(),
            translated_title: story.translated_title.clone(),
            language: story.language.clone(),
            content: join_sentences(story.sentences.iter().map(|s| s.text.as_str())),
            moral: story.moral.clone(),
            translated_moral: story.translated_moral.clone(),
            vocabulary: story.vocabulary.clone(),
            quiz: story.quiz.clone(),
            theme: story.theme.clone(),
            audio_speed: story.audio_speed,
            origin: story.origin.clone(),
            created_at: Utc::now(),
            last_read: None,
        };
        let story_bytes = serde_json::to_vec(&row)?;
        let mut sentence_rows = Vec::with_capacity(story.sentences.len());
        for (index, pair) in story.sentences.iter().enumerate() {
            let row = SentenceRow {
                text: pair.text.clone(),
                translation: pair.translation.clone(),
            };
            sentence_rows.push((sentence_key(id, index as u32), serde_json::to_vec(&row)?));
        }

        (&self.stories, &self.sentences)
            .transaction(|(stories, sentences)| {
                stories.insert(&id.to_key()[..], story_bytes.as_slice())?;
                for (key, bytes) in &sentence_rows {
                    sentences.insert(key.as_slice(), bytes.as_slice())?;
                }
                Ok::<(), ConflictableTransactionError<StoreError>>(())
            })
            .map_err(StoreError::from)?;
        self.db.flush()?;

        tracing::info!(story = %id, sentences = sentence_rows.len(), "story persisted");
        Ok(id)
    }

    fn story_row(&self, id: StoryId) -> Result<StoryRow, StoreError> {
        let bytes = self.stories.get(id.to_key())?.ok_or(StoreError::NotFound(id))?;
        Ok(serde_json::from_slice(&bytes)?)
    }

    pub fn contains(&self, id: StoryId) -> Result<bool, StoreError> {
        Ok(self.stories.contains_key(id.to_key())?)
    }

    /// Loads a story with its sentences and hydrated asset references.
    /// Refuses to return a story whose sentence order or content is broken.
    pub fn load_story(&self, id: StoryId) -> Result<Story, StoreError> {
        let row = self.story_row(id)?;

        let mut sentences = Vec::new();
        for item in self.sentences.scan_prefix(id.to_key()) {
            let (key, value) = item?;
            let index = key
                .get(8..12)
                .and_then(|b| b.try_into().ok())
                .map(u32::from_be_bytes)
                .ok_or_else(|| StoreError::Desync {
                    story: id,
                    reason: "malformed sentence key".to_string(),
                })?;
            if index as usize != sentences.len() {
                return Err(StoreError::Desync {
                    story: id,
                    reason: format!("expected sentence index {}, found {}", sentences.len(), index),
                });
            }
            let sentence: SentenceRow = serde_json::from_slice(&value)?;
            sentences.push(Sentence {
                index,
                text: sentence.text,
                translation: sentence.translation,
                image: None,
                audio: BTreeMap::new(),
            });
        }

        if sentences.is_empty() {
            return Err(StoreError::Desync {
                story: id,
                reason: "story has no sentences".to_string(),
            });
        }
        if join_sentences(sentences.iter().map(|s| s.text.as_str())) != row.content {
            return Err(StoreError::Desync {
                story: id,
                reason: "content does not match joined sentences".to_string(),
            });
        }

        let mut story = Story {
            id,
            title: row.title,
            translated_title: row.translated_title,
            language: row.language,
            content: row.content,
            moral: row.moral,
            translated_moral: row.translated_moral,
            vocabulary: row.vocabulary,
            quiz: row.quiz,
            theme: row.theme,
            audio_speed: row.audio_speed,
            origin: row.origin,
            created_at: row.created_at,
            last_read: row.last_read,
            cover_image: None,
            full_audio: BTreeMap::new(),
            sentences,
        };

        for (slot, path) in self.asset_refs(id)? {
            match slot {
                AssetSlot::Cover => story.cover_image = Some(path),
                AssetSlot::FullAudio(lang) => {
                    story.full_audio.insert(lang, path);
                }
                AssetSlot::SentenceImage(idx) => {
                    if let Some(s) = story.sentences.get_mut(idx as usize) {
                        s.image = Some(path);
                    }
                }
                AssetSlot::SentenceAudio(idx, lang) => {
                    if let Some(s) = story.sentences.get_mut(idx as usize) {
                        s.audio.insert(lang, path);
                    }
                }
            }
        }

        Ok(story)
    }

    /// Every stored asset reference of a story, keyed by slot.
    pub fn asset_refs(&self, id: StoryId) -> Result<BTreeMap<AssetSlot, String>, StoreError> {
        let mut refs = BTreeMap::new();
        for item in self.assets.scan_prefix(id.to_key()) {
            let (key, value) = item?;
            let slot_key = String::from_utf8_lossy(&key[8..]).into_owned();
            match AssetSlot::parse(&slot_key) {
                Some(slot) => {
                    refs.insert(slot, String::from_utf8_lossy(&value).into_owned());
                }
                None => tracing::warn!(story = %id, key = %slot_key, "ignoring unknown asset row"),
            }
        }
        Ok(refs)
    }

    /// Narrow single-row write of one asset reference. Aborts when the
    /// story row is gone, so a concurrent delete never leaves an orphan.
    pub fn set_asset(
        &self,
        id: StoryId,
        slot: &AssetSlot,
        public_path: &str,
    ) -> Result<(), StoreError> {
        let key = asset_key(id, slot);
        (&self.stories, &self.assets)
            .transaction(|(stories, assets)| {
                if stories.get(&id.to_key()[..])?.is_none() {
                    return Err(abort(StoreError::NotFound(id)));
                }
                assets.insert(key.as_slice(), public_path.as_bytes())?;
                Ok(())
            })
            .map_err(StoreError::from)
    }

    pub fn list_stories(&self) -> Result<Vec<StorySummary>, StoreError> {
        let mut out = Vec::new();
        for item in self.stories.iter() {
            let (key, value) = item?;
            let id = match key.as_ref().try_into() {
                Ok(bytes) => StoryId(u64::from_be_bytes(bytes)),
                Err(_) => continue,
            };
            let row: StoryRow = serde_json::from_slice(&value)?;
            out.push(StorySummary {
                id,
                title: row.title,
                language: row.language,
                theme: row.theme,
                created_at: row.created_at,
                last_read: row.last_read,
            });
        }
        // Newest first
        out.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(b.id.cmp(&a.id)));
        Ok(out)
    }

    pub fn mark_read(&self, id: StoryId) -> Result<(), StoreError> {
        let mut row = self.story_row(id)?;
        row.last_read = Some(Utc::now());
        self.stories.insert(id.to_key(), serde_json::to_vec(&row)?)?;
        Ok(())
    }

    /// Removes the story, its sentences and its asset rows atomically.
    pub fn delete_story(&self, id: StoryId) -> Result<(), StoreError> {
        if !self.contains(id)? {
            return Err(StoreError::NotFound(id));
        }
        let sentence_keys = self
            .sentences
            .scan_prefix(id.to_key())
            .keys()
            .collect::<Result<Vec<_>, _>>()?;
        let asset_keys = self
            .assets
            .scan_prefix(id.to_key())
            .keys()
            .collect::<Result<Vec<_>, _>>()?;

        (&self.stories, &self.sentences, &self.assets)
            .transaction(|(stories, sentences, assets)| {
                stories.remove(&id.to_key()[..])?;
                for key in &sentence_keys {
                    sentences.remove(key.clone())?;
                }
                for key in &asset_keys {
                    assets.remove(key.clone())?;
                }
                Ok::<(), ConflictableTransactionError<StoreError>>(())
            })
            .map_err(StoreError::from)?;
        // Rows committed between the scan and the delete; none can follow it
        for key in self.assets.scan_prefix(id.to_key()).keys() {
            self.assets.remove(key?)?;
        }
        self.db.flush()?;

        tracing::info!(story = %id, "story deleted");
        Ok(())
    }

    /// Current provider preferences; unset keys keep their defaults.
    pub fn preferences(&self) -> Result<ProviderPreferences, StoreError> {
        let mut prefs = ProviderPreferences::default();
        for key in KEYS {
            if let Some(value) = self.settings.get(key)? {
                prefs.set(key, &String::from_utf8_lossy(&value))?;
            }
        }
        Ok(prefs)
    }

    pub fn set_preference(
        &self,
        key: &str,
        value: &str,
    ) -> Result<ProviderPreferences, StoreError> {
        let mut prefs = self.preferences()?;
        prefs.set(key, value)?;
        let stored = prefs.get(key).unwrap_or_default().to_string();
        self.settings.insert(key, stored.as_bytes())?;
        Ok(prefs)
    }

    /// Upserts the vocabulary of a freshly persisted story in one
    /// transaction; concurrent stories sharing a word both count.
    pub fn record_vocabulary(&self, words: &BTreeMap<String, String>) -> Result<(), StoreError> {
        let now = Utc::now();
        let words: Vec<(String, &str)> = words
            .iter()
            .map(|(word, meaning)| (vocab_key(word), meaning.trim()))
            .filter(|(key, _)| !key.is_empty())
            .collect();

        self.vocabulary
            .transaction(|vocabulary| {
                for (key, meaning) in &words {
                    let entry = match vocabulary.get(key.as_bytes())? {
                        Some(bytes) => {
                            let mut entry: VocabularyEntry =
                                serde_json::from_slice(&bytes).map_err(abort)?;
                            entry.occurrences += 1;
                            entry.last_seen = now;
                            if !meaning.is_empty() {
                                entry.meaning = meaning.to_string();
                            }
                            if entry.status == MasteryStatus::New {
                                entry.status = MasteryStatus::Learning;
                            }
                            entry
                        }
                        None => VocabularyEntry {
                            word: key.clone(),
                            meaning: meaning.to_string(),
                            last_seen: now,
                            occurrences: 1,
                            status: MasteryStatus::New,
                        },
                    };
                    let bytes = serde_json::to_vec(&entry).map_err(abort)?;
                    vocabulary.insert(key.as_bytes(), bytes)?;
                }
                Ok::<(), ConflictableTransactionError<StoreError>>(())
            })
            .map_err(StoreError::from)
    }

    pub fn vocabulary(&self) -> Result<Vec<VocabularyEntry>, StoreError> {
        let mut entries = Vec::new();
        for value in self.vocabulary.iter().values() {
            entries.push(serde_json::from_slice(&value?)?);
        }
        Ok(entries)
    }

    pub fn set_mastery(
        &self,
        word: &str,
        status: MasteryStatus,
    ) -> Result<VocabularyEntry, StoreError> {
        let key = vocab_key(word);
        let bytes = self
            .vocabulary
            .get(&key)?
            .ok_or_else(|| StoreError::UnknownWord(word.to_string()))?;
        let mut entry: VocabularyEntry = serde_json::from_slice(&bytes)?;
        entry.status = status;
        self.vocabulary.insert(key.as_bytes(), serde_json::to_vec(&entry)?)?;
        Ok(entry)
    }

    #[cfg(test)]
    pub(crate) fn raw_sentences(&self) -> &sled::Tree {
        &self.sentences
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::story::QuizKind;

    fn new_story(sentences: &[&str]) -> NewStory {
        NewStory {
            title: "The Red Car".into(),
            translated_title: None,
            language: "en".into(),
            moral: "Be good and kind.".into(),
            translated_moral: None,
            vocabulary: BTreeMap::from([("red".to_string(), "a colour".to_string())]),
            quiz: vec![QuizQuestion {
                kind: QuizKind::Mcq,
                question: "What colour is the car?".into(),
                options: vec!["Red".into(), "Blue".into()],
                answer: "Red".into(),
            }],
            theme: "vehicles".into(),
            audio_speed: 0.8,
            origin: "template".into(),
            sentences: sentences.iter().map(|s| SentencePair::plain(*s)).collect(),
        }
    }

    #[test]
    fn test_insert_and_load() {
        let store = StoryStore::temporary().unwrap();
        let id = store
            .insert_story(&new_story(&["A car.", "It is red.", "It goes home."]))
            .unwrap();

        let story = store.load_story(id).unwrap();
        assert_eq!(story.content, "A car. It is red. It goes home.");
        let indices: Vec<u32> = story.sentences.iter().map(|s| s.index).collect();
        assert_eq!(indices, vec![0, 1, 2]);
        assert_eq!(story.quiz[0].options, vec!["Red", "Blue"]);
        assert!(story.cover_image.is_none());
    }

    #[test]
    fn test_empty_story_rejected_without_rows() {
        let store = StoryStore::temporary().unwrap();
        assert!(matches!(store.insert_story(&new_story(&[])), Err(StoreError::EmptyStory)));
        assert!(matches!(
            store.insert_story(&new_story(&["ok", "  "])),
            Err(StoreError::EmptyStory)
        ));
        assert!(store.list_stories().unwrap().is_empty());
    }

    #[test]
    fn test_assets_hydrate_by_index() {
        let store = StoryStore::temporary().unwrap();
        let id = store.insert_story(&new_story(&["One.", "Two."])).unwrap();

        store.set_asset(id, &AssetSlot::Cover, "/a/cover.png").unwrap();
        store.set_asset(id, &AssetSlot::SentenceImage(1), "/a/s1.png").unwrap();
        store.set_asset(id, &AssetSlot::SentenceAudio(0, "en".into()), "/a/s0.wav").unwrap();
        store.set_asset(id, &AssetSlot::FullAudio("en".into()), "/a/full.wav").unwrap();

        let story = store.load_story(id).unwrap();
        assert_eq!(story.cover_image.as_deref(), Some("/a/cover.png"));
        assert_eq!(story.sentences[0].image, None);
        assert_eq!(story.sentences[1].image.as_deref(), Some("/a/s1.png"));
        assert_eq!(story.sentences[0].audio.get("en").map(String::as_str), Some("/a/s0.wav"));
        assert_eq!(story.full_audio.get("en").map(String::as_str), Some("/a/full.wav"));
    }

    #[test]
    fn test_gap_in_order_is_desync() {
        let store = StoryStore::temporary().unwrap();
        let id = store.insert_story(&new_story(&["One.", "Two.", "Three."])).unwrap();
        store.raw_sentences().remove(sentence_key(id, 1)).unwrap();

        assert!(matches!(store.load_story(id), Err(StoreError::Desync { .. })));
    }

    #[test]
    fn test_rewritten_sentence_text_is_desync() {
        let store = StoryStore::temporary().unwrap();
        let id = store.insert_story(&new_story(&["One.", "Two.", "Three."])).unwrap();
        let row = SentenceRow {
            text: "Something else.".into(),
            translation: None,
        };
        store
            .raw_sentences()
            .insert(sentence_key(id, 1), serde_json::to_vec(&row).unwrap())
            .unwrap();

        match store.load_story(id) {
            Err(StoreError::Desync { story, reason }) => {
                assert_eq!(story, id);
                assert!(reason.contains("content"));
            }
            other => panic!("expected desync, got {:?}", other.map(|s| s.content)),
        }
    }

    #[test]
    fn test_set_asset_after_delete_writes_nothing() {
        let store = StoryStore::temporary().unwrap();
        let id = store.insert_story(&new_story(&["One."])).unwrap();
        store.delete_story(id).unwrap();

        let result = store.set_asset(id, &AssetSlot::SentenceImage(0), "/a/s0.png");
        assert!(matches!(result, Err(StoreError::NotFound(found)) if found == id));
        assert!(store.assets.scan_prefix(id.to_key()).next().is_none());
    }

    #[test]
    fn test_concurrent_vocabulary_counts_every_story() {
        let store = StoryStore::temporary().unwrap();
        let words = BTreeMap::from([
            ("Star".to_string(), "a light in the sky".to_string()),
            ("moon".to_string(), String::new()),
        ]);

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let store = store.clone();
                let words = words.clone();
                std::thread::spawn(move || {
                    for _ in 0..25 {
                        store.record_vocabulary(&words).unwrap();
                    }
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }

        let entries = store.vocabulary().unwrap();
        assert_eq!(entries.len(), 2);
        for entry in entries {
            assert_eq!(entry.occurrences, 200);
            assert_eq!(entry.status, MasteryStatus::Learning);
        }
    }

    #[test]
    fn test_delete_removes_everything() {
        let store = StoryStore::temporary().unwrap();
        let id = store.insert_story(&new_story(&["One."])).unwrap();
        store.set_asset(id, &AssetSlot::Cover, "/a/cover.png").unwrap();

        store.delete_story(id).unwrap();
        assert!(matches!(store.load_story(id), Err(StoreError::NotFound(_))));
        assert!(store.asset_refs(id).unwrap().is_empty());
        assert!(store.raw_sentences().scan_prefix(id.to_key()).next().is_none());
        assert!(matches!(
            store.set_asset(id, &AssetSlot::Cover, "/x"),
            Err(StoreError::NotFound(_))
        ));
    }

    #[test]
    fn test_list_newest_first_and_mark_read() {
        let store = StoryStore::temporary().unwrap();
        let first = store.insert_story(&new_story(&["One."])).unwrap();
        let second = store.insert_story(&new_story(&["Two."])).unwrap();

        let ids: Vec<StoryId> = store.list_stories().unwrap().iter().map(|s| s.id).collect();
        assert_eq!(ids, vec![second, first]);

        store.mark_read(first).unwrap();
        assert!(store.load_story(first).unwrap().last_read.is_some());
    }

    #[test]
    fn test_preferences_persist() {
        let store = StoryStore::temporary().unwrap();
        assert!(store.preferences().unwrap().uses_templates());

        store.set_preference("tts_provider", "Azure").unwrap();
        assert_eq!(store.preferences().unwrap().tts_provider, "azure");
        assert!(store.set_preference("api_key", "x").is_err());
    }

    #[test]
    fn test_vocabulary_progress() {
        let store = StoryStore::temporary().unwrap();
        let words = BTreeMap::from([("Red".to_string(), "a colour".to_string())]);

        store.record_vocabulary(&words).unwrap();
        let entry = &store.vocabulary().unwrap()[0];
        assert_eq!(
            (entry.word.as_str(), entry.occurrences, entry.status),
            ("red", 1, MasteryStatus::New)
        );

        store.record_vocabulary(&words).unwrap();
        let entry = &store.vocabulary().unwrap()[0];
        assert_eq!((entry.occurrences, entry.status), (2, MasteryStatus::Learning));

        store.set_mastery("RED", MasteryStatus::Mastered).unwrap();
        store.record_vocabulary(&words).unwrap();
        let entry = &store.vocabulary().unwrap()[0];
        assert_eq!((entry.occurrences, entry.status), (3, MasteryStatus::Mastered));

        assert!(matches!(
            store.set_mastery("blue", MasteryStatus::Mastered),
            Err(StoreError::UnknownWord(_))
        ));
    }
}
