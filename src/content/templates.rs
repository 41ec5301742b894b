//! Deterministic template stories, used when no content provider is
//! configured or every provider failed.

use super::parse::split_sentences;
use crate::story::{
    PayloadOrigin, SentencePair, StoryLength, StoryPayload, StoryRequest, DEFAULT_MORAL,
};
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;

const SHORT: [&str; 3] = [
    "There was {subject}. {Subject} was very {adjective}. {Subject} liked to {action}. Every day, {subject} would {action}. {Subject} was always happy.",
    "{Subject} lived in a {place}. The {place} was {adjective}. {Subject} had many friends. They would {action} together. Everyone loved {subject}.",
    "One day, {subject} woke up early. {Subject} wanted to {action}. The day was {adjective}. {Subject} felt very happy. It was a good day.",
];

const MEDIUM: [&str; 2] = [
    "There was {subject}. {Subject} was very {adjective}. Every morning, {subject} would wake up early. {Subject} liked to {action}. All the friends loved {subject}. One day, {subject} decided to {action2}. It was a {adjective2} day. {Subject} felt very happy. The sun was shining bright. {Subject} played all day long. When evening came, {subject} went home. {Subject} had a wonderful day. {Subject} slept with a big smile.",
    "{Subject} lived in a beautiful {place}. The {place} was very {adjective}. {Subject} had many good friends. Every day they would {action} together. {Subject} was always kind and helpful. One sunny day, {subject} found something special. It was a {adjective2} surprise. {Subject} shared it with everyone. All the friends were very happy. They thanked {subject} for being so nice. {Subject} felt proud and joyful. That night, {subject} dreamed happy dreams.",
];

const LONG: [&str; 2] = [
    "Once upon a time, there was {subject}. {Subject} lived in a {place} with many friends. {Subject} was known for being very {adjective}. Every morning, {subject} would wake up with the sunrise. {Subject} loved to {action} in the morning. All the friends would come to visit {subject}. They enjoyed spending time together. One beautiful day, something special happened. {Subject} decided to {action2} for the very first time. At first, {subject} felt a little nervous. But the friends encouraged {subject} to try. With their support, {subject} felt brave. {Subject} took a deep breath and started. It was {adjective2} and exciting! Everyone cheered for {subject}. {Subject} felt so happy and proud. From that day on, {subject} knew that with good friends, anything is possible. {Subject} learned that trying new things can be fun. Every day became an adventure. {Subject} and the friends lived happily, always helping each other. They learned, played, and grew together. And {subject} was grateful for every moment.",
    "In a {adjective} {place}, there lived {subject}. {Subject} was special because {subject} was very {adjective2}. Every day was an adventure for {subject}. In the morning, {subject} would {action} with great joy. Everyone in the {place} admired {subject}. {Subject} had a best friend who was also very kind. Together, they would explore and discover new things. One day, they decided to {action2} together. It was something they had never done before. {Subject} felt excited but also a little scared. The friend said, 'Don't worry, we can do this together!' With courage in their hearts, they began their journey. The path was {adjective} and full of surprises. They saw beautiful sights along the way. They helped each other when things got difficult. {Subject} realized that friendship makes everything better. When they finally reached their goal, they were so happy! They celebrated their success together. {Subject} learned an important lesson that day. With determination and good friends, dreams come true. From then on, {subject} faced every challenge with confidence. The {place} became even more wonderful. And {subject} lived each day with joy and gratitude.",
];

const ADJECTIVES: [(&str, &str); 10] = [
    ("happy", "feeling good and glad"),
    ("kind", "nice and caring to others"),
    ("brave", "not afraid to try"),
    ("smart", "quick to learn and understand"),
    ("friendly", "nice to be with"),
    ("gentle", "soft and careful"),
    ("cheerful", "full of smiles"),
    ("helpful", "happy to help others"),
    ("bright", "full of light"),
    ("wonderful", "very, very good"),
];
const ACTIONS: [&str; 10] = [
    "play",
    "sing",
    "dance",
    "run",
    "jump",
    "laugh",
    "explore",
    "learn",
    "help others",
    "make friends",
];
const ACTIONS2: [&str; 5] = [
    "try something new",
    "help a friend",
    "learn a skill",
    "go on an adventure",
    "solve a problem",
];
const PLACES: [&str; 8] = [
    "village",
    "forest",
    "garden",
    "park",
    "town",
    "meadow",
    "valley",
    "neighborhood",
];

fn capitalize_first(text: &str) -> String {
    let mut chars = text.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}

/// Lowercased topic with an article in front when it has none.
pub fn subject_for(topic: &str) -> String {
    let subject = topic.trim().to_lowercase();
    if ["a ", "an ", "the "].iter().any(|a| subject.starts_with(a)) {
        return subject;
    }
    let article = if subject.starts_with(['a', 'e', 'i', 'o', 'u']) { "an" } else { "a" };
    format!("{} {}", article, subject)
}

pub fn title_for(topic: &str) -> String {
    format!("The Story of {}", capitalize_first(topic.trim()))
}

fn pick<T: Copy>(bank: &[T], byte: u8) -> T {
    bank[byte as usize % bank.len()]
}

/// Builds a story from the templates. The same topic and length always
/// yield the same story.
pub fn build(request: &StoryRequest) -> StoryPayload {
    let key = format!("{}|{}", request.topic.trim().to_lowercase(), request.length.as_str());
    let seed = Sha256::digest(key.as_bytes());
    let templates: &[&str] = match request.length {
        StoryLength::Short => &SHORT,
        StoryLength::Medium => &MEDIUM,
        StoryLength::Long => &LONG,
    };

    let subject = subject_for(&request.topic);
    let (adjective, meaning) = pick(&ADJECTIVES, seed[1]);
    let (adjective2, _) = pick(&ADJECTIVES, seed[2]);

    let text = pick(templates, seed[0])
        .replace("{Subject}", &capitalize_first(&subject))
        .replace("{subject}", &subject)
        .replace("{adjective2}", adjective2)
        .replace("{adjective}", adjective)
        .replace("{action2}", pick(&ACTIONS2, seed[3]))
        .replace("{action}", pick(&ACTIONS, seed[4]))
        .replace("{place}", pick(&PLACES, seed[5]));

    StoryPayload {
        title: title_for(&request.topic),
        translated_title: None,
        sentences: split_sentences(&text).into_iter().map(SentencePair::plain).collect(),
        vocabulary: BTreeMap::from([(adjective.to_string(), meaning.to_string())]),
        moral: DEFAULT_MORAL.to_string(),
        translated_moral: None,
        quiz: Vec::new(),
        origin: PayloadOrigin::Template,
    }
}
