use crate::backends::TextRequest;
use crate::story::StoryRequest;

pub fn tone_instruction(tone: &str) -> &'static str {
    match tone {
        "happy" => "Make the story warm, cheerful, and pleasant.",
        "calm" => "Make the story slow, gentle, and peaceful.",
        "funny" => "Make the story light, playful, and softly funny.",
        _ => "",
    }
}

/// Strict JSON schema request with paired sentence translations.
pub fn bilingual(request: &StoryRequest, tone: &str) -> TextRequest {
    let lang = request.language.trim();
    let system = format!(
        r#"You are a gentle children's story writer.
Write a simple story for a young child about: {topic}.
Tone: {tone}
Target length: {band} words.

Rules:
1. The story must be simple, safe, and flow naturally.
2. Output strictly VALID JSON and nothing else.
3. Translate every sentence into {lang}.

JSON schema:
{{
  "title": "English title",
  "translated_title": "{lang} title",
  "sentences": [
    {{"text": "English sentence 1.", "translation": "{lang} translation."}},
    {{"text": "English sentence 2.", "translation": "{lang} translation."}}
  ],
  "vocab": {{"word": "simple definition"}},
  "moral": "English moral",
  "translated_moral": "{lang} moral"
}}"#,
        topic = request.topic.trim(),
        tone = tone_instruction(tone),
        band = request.length.word_band(),
        lang = lang,
    );
    TextRequest {
        system,
        user: format!(
            "Write a bilingual story about {} in English and {}.",
            request.topic.trim(),
            lang
        ),
        expect_json: true,
    }
}

/// Labelled-section request for source-language stories.
pub fn monolingual(request: &StoryRequest, tone: &str) -> TextRequest {
    let system = format!(
        r#"You are a gentle children's story writer for a young child.
Focus on one main character, use short and medium sentences with easy,
familiar words, add small concrete descriptions (colours, weather, sounds),
keep the story safe and calm, and end it gently.

FORMAT THE OUTPUT EXACTLY AS:

TITLE: [simple, story-like title]
CONTENT:
[2-4 short paragraphs of 2-4 sentences each]
VOCAB:
- [word]: [very simple definition]
MORAL:
[one very simple sentence]

{tone}
Target word count: {band} words."#,
        tone = tone_instruction(tone),
        band = request.length.word_band(),
    );
    TextRequest {
        system,
        user: format!("Write a story about: {}", request.topic.trim()),
        expect_json: false,
    }
}

/// Opening line a completion model continues.
pub fn completion(request: &StoryRequest) -> TextRequest {
    TextRequest {
        system: String::new(),
        user: format!("Once upon a time, there was a {}.", request.topic.trim()),
        expect_json: false,
    }
}

/// Asks an instruct model for moral, vocabulary and quiz of a plain story.
pub fn metadata(story_text: &str) -> TextRequest {
    let system = r#"You are a teacher helping a young child understand stories.
The story below was written by a small model and may have grammar slips or
lost context. Output ONLY valid JSON with:
1. "corrected_story": the same story with grammar and logic fixed, same length.
2. "moral": one sentence.
3. "vocab": 3-5 important words as {"word": "...", "meaning": "..."}.
4. "mcqs": at least 2 questions as {"question": "...", "options": ["A", "B", "C", "D"], "correct_answer": "A"}.
5. "fill_in_blanks": at least 2 as {"sentence": "The dog was very ____.", "answer": "happy", "options": ["sad", "happy", "angry"]}.
6. "moral_questions": at least 1 as {"question": "...", "options": ["A", "B"], "correct_answer": "A"}.
Never return empty arrays."#;
    TextRequest {
        system: system.to_string(),
        user: format!("Story: {}", story_text),
        expect_json: true,
    }
}
