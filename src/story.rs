//! Story, sentence and vocabulary types shared across the pipeline.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

/// Language stories are written in before translation.
pub const SOURCE_LANGUAGE: &str = "en";

pub const DEFAULT_MORAL: &str = "Be good and kind.";

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct StoryId(pub u64);

impl StoryId {
    pub fn to_key(self) -> [u8; 8] {
        self.0.to_be_bytes()
    }
}

impl fmt::Display for StoryId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for StoryId {
    type Err = std::num::ParseIntError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        s.parse().map(StoryId)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum StoryLength {
    #[default]
    Short,
    Medium,
    Long,
}

impl StoryLength {
    /// Target word-count band handed to the text providers.
    pub fn word_band(self) -> &'static str {
        match self {
            StoryLength::Short => "50-60",
            StoryLength::Medium => "100-120",
            StoryLength::Long => "150-180",
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            StoryLength::Short => "short",
            StoryLength::Medium => "medium",
            StoryLength::Long => "long",
        }
    }
}

impl FromStr for StoryLength {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "short" => Ok(StoryLength::Short),
            "medium" => Ok(StoryLength::Medium),
            "long" => Ok(StoryLength::Long),
            other => Err(format!("unknown story length '{}'", other)),
        }
    }
}

/// Inbound request to create a story.
#[derive(Debug, Clone, PartialEq)]
pub struct StoryRequest {
    pub topic: String,
    pub length: StoryLength,
    pub language: String,
    pub speed: f32,
}

impl StoryRequest {
    pub fn new(topic: impl Into<String>) -> Self {
        Self {
            topic: topic.into(),
            length: StoryLength::Short,
            language: SOURCE_LANGUAGE.to_string(),
            speed: 0.8,
        }
    }

    pub fn with_length(mut self, length: StoryLength) -> Self {
        self.length = length;
        self
    }

    pub fn with_language(mut self, language: impl Into<String>) -> Self {
        self.language = language.into();
        self
    }

    pub fn with_speed(mut self, speed: f32) -> Self {
        self.speed = speed;
        self
    }

    /// True when the story must be generated with paired translations.
    pub fn is_bilingual(&self) -> bool {
        let lang = self.language.trim();
        !lang.is_empty() && !lang.eq_ignore_ascii_case(SOURCE_LANGUAGE)
    }
}

/// One sentence of a generated payload, before persistence.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SentencePair {
    pub text: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub translation: Option<String>,
}

impl SentencePair {
    pub fn plain(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            translation: None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QuizKind {
    Mcq,
    FillInBlank,
    Moral,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QuizQuestion {
    pub kind: QuizKind,
    pub question: String,
    pub options: Vec<String>,
    pub answer: String,
}

/// Where a payload came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PayloadOrigin {
    Provider(&'static str),
    Template,
}

impl fmt::Display for PayloadOrigin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PayloadOrigin::Provider(id) => write!(f, "provider:{}", id),
            PayloadOrigin::Template => write!(f, "template"),
        }
    }
}

/// Structured story text, identical in shape whichever producer made it.
#[derive(Debug, Clone, PartialEq)]
pub struct StoryPayload {
    pub title: String,
    pub translated_title: Option<String>,
    pub sentences: Vec<SentencePair>,
    pub vocabulary: BTreeMap<String, String>,
    pub moral: String,
    pub translated_moral: Option<String>,
    pub quiz: Vec<QuizQuestion>,
    pub origin: PayloadOrigin,
}

impl StoryPayload {
    /// Canonical content: the sentence texts joined in order.
    pub fn content(&self) -> String {
        join_sentences(self.sentences.iter().map(|s| s.text.as_str()))
    }
}

pub fn join_sentences<'a>(parts: impl Iterator<Item = &'a str>) -> String {
    parts.collect::<Vec<_>>().join(" ")
}

/// A persisted sentence with its hydrated asset references.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Sentence {
    pub index: u32,
    pub text: String,
    pub translation: Option<String>,
    pub image: Option<String>,
    /// Narration per language code.
    pub audio: BTreeMap<String, String>,
}

/// A persisted story with its sentences and hydrated asset references.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Story {
    pub id: StoryId,
    pub title: String,
    pub translated_title: Option<String>,
    pub language: String,
    pub content: String,
    pub moral: String,
    pub translated_moral: Option<String>,
    pub vocabulary: BTreeMap<String, String>,
    pub quiz: Vec<QuizQuestion>,
    pub theme: String,
    pub audio_speed: f32,
    pub origin: String,
    pub created_at: DateTime<Utc>,
    pub last_read: Option<DateTime<Utc>>,
    pub cover_image: Option<String>,
    /// Whole-story narration per language code.
    pub full_audio: BTreeMap<String, String>,
    pub sentences: Vec<Sentence>,
}

impl Story {
    pub fn has_translation(&self) -> bool {
        !self.sentences.is_empty()
            && self
                .sentences
                .iter()
                .all(|s| s.translation.as_deref().is_some_and(|t| !t.trim().is_empty()))
    }

    /// Translated sentences joined in order, when every sentence has one.
    pub fn translated_content(&self) -> Option<String> {
        if !self.has_translation() {
            return None;
        }
        Some(join_sentences(
            self.sentences.iter().filter_map(|s| s.translation.as_deref()),
        ))
    }
}

/// Listing row.
#[derive(Debug, Clone, Serialize)]
pub struct StorySummary {
    pub id: StoryId,
    pub title: String,
    pub language: String,
    pub theme: String,
    pub created_at: DateTime<Utc>,
    pub last_read: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MasteryStatus {
    New,
    Learning,
    Mastered,
}

impl FromStr for MasteryStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "new" => Ok(MasteryStatus::New),
            "learning" => Ok(MasteryStatus::Learning),
            "mastered" => Ok(MasteryStatus::Mastered),
            other => Err(format!("unknown mastery status '{}'", other)),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VocabularyEntry {
    pub word: String,
    pub meaning: String,
    pub last_seen: DateTime<Utc>,
    pub occurrences: u32,
    pub status: MasteryStatus,
}

/// Coarse topic category, used for listings and illustration style.
pub fn determine_theme(topic: &str) -> &'static str {
    let topic = topic.to_lowercase();
    let has_any = |words: &[&str]| words.iter().any(|w| topic.contains(w));

    if has_any(&["dog", "cat", "elephant", "lion", "bird", "animal", "monkey", "tiger", "owl"]) {
        "animals"
    } else if has_any(&["car", "bus", "train", "plane", "vehicle", "truck", "bicycle"]) {
        "vehicles"
    } else if has_any(&["family", "mother", "father", "friend", "teacher", "people"]) {
        "family"
    } else if has_any(&["tree", "flower", "sun", "moon", "star", "nature", "rain", "cloud"]) {
        "nature"
    } else if has_any(&["apple", "banana", "mango", "food", "fruit", "vegetable"]) {
        "food"
    } else {
        "general"
    }
}
