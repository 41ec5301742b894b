//! Defensive parsing of provider replies into story payload parts.

use crate::error::ProviderError;
use crate::story::{QuizKind, QuizQuestion, SentencePair, DEFAULT_MORAL};
use lazy_static::lazy_static;
use regex::Regex;
use serde::Deserialize;
use serde_json::Value;
use std::collections::BTreeMap;

lazy_static! {
    // A run of text up to and including terminal punctuation and any
    // closing quotes/brackets, or the unterminated tail.
    static ref SENTENCE: Regex = Regex::new(r#"[^.!?।]+(?:[.!?।]+["'”’)\]]*|$)"#).unwrap();
    static ref WHITESPACE: Regex = Regex::new(r"\s+").unwrap();
}

/// Story text parts common to every reply format.
#[derive(Debug, Clone, PartialEq)]
pub struct ParsedStory {
    pub title: Option<String>,
    pub translated_title: Option<String>,
    pub sentences: Vec<SentencePair>,
    pub vocabulary: BTreeMap<String, String>,
    pub moral: String,
    pub translated_moral: Option<String>,
}

/// Moral, vocabulary and quiz pulled out of a plain story.
#[derive(Debug, Clone, PartialEq)]
pub struct StoryMetadata {
    pub corrected_story: Option<String>,
    pub moral: Option<String>,
    pub vocabulary: BTreeMap<String, String>,
    pub quiz: Vec<QuizQuestion>,
}

fn malformed(msg: impl Into<String>) -> ProviderError {
    ProviderError::Malformed(msg.into())
}

fn non_empty(s: Option<String>) -> Option<String> {
    s.map(|s| s.trim().to_string()).filter(|s| !s.is_empty())
}

/// Slice from the first `{` to the last `}`, so prose or code fences around
/// a JSON document are ignored.
pub fn extract_braces(raw: &str) -> Option<&str> {
    let start = raw.find('{')?;
    let end = raw.rfind('}')?;
    (end > start).then(|| &raw[start..=end])
}

/// Splits free text into trimmed sentences with collapsed whitespace.
pub fn split_sentences(text: &str) -> Vec<String> {
    SENTENCE
        .find_iter(text)
        .map(|m| WHITESPACE.replace_all(m.as_str(), " ").trim().to_string())
        .filter(|s| s.chars().any(char::is_alphanumeric))
        .collect()
}

#[derive(Deserialize)]
struct SentenceDoc {
    #[serde(default)]
    text: String,
    #[serde(default)]
    translation: Option<String>,
}

#[derive(Deserialize)]
struct StoryDoc {
    #[serde(default)]
    title: Option<String>,
    #[serde(default)]
    translated_title: Option<String>,
    #[serde(default)]
    sentences: Vec<SentenceDoc>,
    #[serde(default, alias = "vocabulary")]
    vocab: Value,
    #[serde(default)]
    moral: Option<String>,
    #[serde(default)]
    translated_moral: Option<String>,
}

/// Vocabulary as either `{"word": "meaning"}` or `[{"word":..,"meaning":..}]`.
fn vocabulary_from(value: &Value) -> BTreeMap<String, String> {
    let mut out = BTreeMap::new();
    match value {
        Value::Object(map) => {
            for (word, meaning) in map {
                if let Some(meaning) = meaning.as_str() {
                    out.insert(word.trim().to_string(), meaning.trim().to_string());
                }
            }
        }
        Value::Array(items) => {
            for item in items {
                let word = item["word"].as_str().unwrap_or_default().trim();
                let meaning = item["meaning"].as_str().unwrap_or_default().trim();
                if !word.is_empty() {
                    out.insert(word.to_string(), meaning.to_string());
                }
            }
        }
        _ => {}
    }
    out.retain(|word, _| !word.is_empty());
    out
}

/// Parses the structured JSON story document. With `require_translations`
/// every sentence must carry a non-empty translation. Any separate
/// full-text field is ignored: content is rebuilt from the sentence list.
pub fn parse_story_json(
    raw: &str,
    require_translations: bool,
) -> Result<ParsedStory, ProviderError> {
    let json = extract_braces(raw).ok_or_else(|| malformed("no JSON object in reply"))?;
    let doc: StoryDoc = serde_json::from_str(json)
        .map_err(|e| malformed(format!("invalid story JSON: {}", e)))?;

    if doc.sentences.is_empty() {
        return Err(malformed("story JSON has no sentences"));
    }
    let mut sentences = Vec::with_capacity(doc.sentences.len());
    for (i, s) in doc.sentences.into_iter().enumerate() {
        let text = WHITESPACE.replace_all(s.text.trim(), " ").to_string();
        if text.is_empty() {
            return Err(malformed(format!("sentence {} is empty", i)));
        }
        let translation = non_empty(s.translation);
        if require_translations && translation.is_none() {
            return Err(malformed(format!("sentence {} has no translation", i)));
        }
        sentences.push(SentencePair { text, translation });
    }

    let translated_title = non_empty(doc.translated_title);
    if require_translations && translated_title.is_none() {
        return Err(malformed("missing translated_title"));
    }

    Ok(ParsedStory {
        title: non_empty(doc.title),
        translated_title,
        sentences,
        vocabulary: vocabulary_from(&doc.vocab),
        moral: non_empty(doc.moral).unwrap_or_else(|| DEFAULT_MORAL.to_string()),
        translated_moral: non_empty(doc.translated_moral),
    })
}

#[derive(Clone, Copy, PartialEq)]
enum Section {
    Preamble,
    Content,
    Vocab,
    Moral,
}

/// Recognises `LABEL:` at the start of a line, tolerating markdown bold
/// or heading markers around the label.
fn label(line: &str) -> Option<(&'static str, &str)> {
    let stripped = line.trim_start_matches(['#', '*', ' ']);
    for name in ["TITLE", "CONTENT", "VOCAB", "MORAL"] {
        if stripped.get(..name.len()).is_some_and(|head| head.eq_ignore_ascii_case(name)) {
            let rest = stripped[name.len()..].trim_start_matches('*');
            if let Some(rest) = rest.strip_prefix(':') {
                return Some((name, rest.trim_start_matches('*').trim()));
            }
        }
    }
    None
}

/// Parses the labelled `TITLE:/CONTENT:/VOCAB:/MORAL:` format. Vocabulary
/// and moral are optional; a reply without story text is malformed.
pub fn parse_labeled(raw: &str) -> Result<ParsedStory, ProviderError> {
    let mut title = None;
    let mut content = Vec::new();
    let mut vocabulary = BTreeMap::new();
    let mut moral_lines: Vec<&str> = Vec::new();
    let mut section = Section::Preamble;

    for line in raw.lines().map(str::trim).filter(|l| !l.is_empty()) {
        if line.starts_with("```") {
            continue;
        }
        match label(line) {
            Some(("TITLE", rest)) => {
                if !rest.is_empty() {
                    title = Some(rest.to_string());
                }
                section = Section::Content;
            }
            Some(("CONTENT", rest)) => {
                if !rest.is_empty() {
                    content.push(rest);
                }
                section = Section::Content;
            }
            Some(("VOCAB", _)) => section = Section::Vocab,
            Some((_, rest)) => {
                if !rest.is_empty() {
                    moral_lines.push(rest);
                }
                section = Section::Moral;
            }
            None => match section {
                Section::Preamble => {}
                Section::Content => content.push(line),
                Section::Vocab => {
                    if let Some((word, meaning)) = line.split_once(':') {
                        let word = word
                            .trim()
                            .trim_start_matches(['-', '*', '•', ' '])
                            .trim_matches('*')
                            .trim();
                        if !word.is_empty() {
                            vocabulary.insert(word.to_string(), meaning.trim().to_string());
                        }
                    }
                }
                Section::Moral => moral_lines.push(line),
            },
        }
    }

    let sentences: Vec<SentencePair> = split_sentences(&content.join(" "))
        .into_iter()
        .map(SentencePair::plain)
        .collect();
    if sentences.is_empty() {
        return Err(malformed("labelled reply has no story content"));
    }

    let moral = moral_lines.join(" ");
    Ok(ParsedStory {
        title,
        translated_title: None,
        sentences,
        vocabulary,
        moral: if moral.trim().is_empty() {
            DEFAULT_MORAL.to_string()
        } else {
            moral.trim().to_string()
        },
        translated_moral: None,
    })
}

/// Monolingual replies: the labelled format first, a JSON document second.
pub fn parse_monolingual(raw: &str) -> Result<ParsedStory, ProviderError> {
    match parse_labeled(raw) {
        Ok(parsed) => Ok(parsed),
        Err(labeled_err) => parse_story_json(raw, false).map_err(|_| labeled_err),
    }
}

#[derive(Deserialize)]
struct QuizDoc {
    #[serde(default, alias = "sentence")]
    question: String,
    #[serde(default)]
    options: Vec<Value>,
    #[serde(default, alias = "correct_answer")]
    answer: Value,
}

fn quiz_from(items: &[Value], kind: QuizKind) -> Vec<QuizQuestion> {
    items
        .iter()
        .filter_map(|item| serde_json::from_value::<QuizDoc>(item.clone()).ok())
        .filter_map(|doc| {
            let scalar = |v: &Value| match v {
                Value::String(s) => Some(s.trim().to_string()),
                Value::Number(n) => Some(n.to_string()),
                Value::Bool(b) => Some(b.to_string()),
                _ => None,
            };
            let question = doc.question.trim().to_string();
            let answer = scalar(&doc.answer)?;
            if question.is_empty() || answer.is_empty() {
                return None;
            }
            Some(QuizQuestion {
                kind,
                question,
                options: doc.options.iter().filter_map(scalar).collect(),
                answer,
            })
        })
        .collect()
}

/// Parses the metadata document produced for plain stories.
pub fn parse_metadata(raw: &str) -> Result<StoryMetadata, ProviderError> {
    let json = extract_braces(raw).ok_or_else(|| malformed("no JSON object in metadata reply"))?;
    let doc: Value = serde_json::from_str(json)
        .map_err(|e| malformed(format!("invalid metadata JSON: {}", e)))?;
    if !doc.is_object() {
        return Err(malformed("metadata is not an object"));
    }

    let list = |key: &str| doc[key].as_array().cloned().unwrap_or_default();
    let mut quiz = quiz_from(&list("mcqs"), QuizKind::Mcq);
    quiz.extend(quiz_from(&list("fill_in_blanks"), QuizKind::FillInBlank));
    quiz.extend(quiz_from(&list("moral_questions"), QuizKind::Moral));

    Ok(StoryMetadata {
        corrected_story: non_empty(doc["corrected_story"].as_str().map(str::to_string)),
        moral: non_empty(doc["moral"].as_str().map(str::to_string)),
        vocabulary: vocabulary_from(&doc["vocab"]),
        quiz,
    })
}
