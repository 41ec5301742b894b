use async_trait::async_trait;
use readalong::assets::AssetSlot;
use readalong::backends::{
    AudioProvider, ImageProvider, PromptStyle, Provider, ProviderRegistry, SpeechJob, TextProvider,
    TextRequest,
};
use readalong::config_loader::Settings;
use readalong::error::{ProviderError, StoreError};
use readalong::story::{PayloadOrigin, StoryLength, StoryRequest, DEFAULT_MORAL};
use readalong::StoryPipeline;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tempfile::{tempdir, TempDir};

mockall::mock! {
    pub Text {}
    impl Provider for Text {
        fn id(&self) -> &'static str;
    }
    #[async_trait::async_trait]
    impl TextProvider for Text {
        fn supports_bilingual(&self) -> bool;
        fn prompt_style(&self) -> PromptStyle;
        async fn complete(&self, request: &TextRequest) -> Result<String, ProviderError>;
    }
}

fn text_mock(id: &'static str, bilingual: bool, style: PromptStyle) -> MockText {
    let mut mock = MockText::new();
    mock.expect_id().return_const(id);
    mock.expect_supports_bilingual().return_const(bilingual);
    mock.expect_prompt_style().return_const(style);
    mock
}

/// Audio fake that counts calls and echoes the text back as bytes.
/// Whole-story narration takes `story_delay`.
struct CountingAudio {
    calls: AtomicUsize,
    story_delay: Duration,
}

impl Provider for CountingAudio {
    fn id(&self) -> &'static str {
        "openai"
    }
}

#[async_trait]
impl AudioProvider for CountingAudio {
    async fn synthesize(&self, job: &SpeechJob) -> Result<Vec<u8>, ProviderError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if !self.story_delay.is_zero() && job.text.contains(". ") {
            tokio::time::sleep(self.story_delay).await;
        }
        Ok(format!("ID3 {}|{}", job.language, job.text).into_bytes())
    }
}

/// Image fake that fails for any prompt containing `fail_on`.
struct CountingImages {
    calls: AtomicUsize,
    fail_on: Option<&'static str>,
    delay: Duration,
}

impl Provider for CountingImages {
    fn id(&self) -> &'static str {
        "placeholder"
    }
}

#[async_trait]
impl ImageProvider for CountingImages {
    async fn render(&self, prompt: &str) -> Result<Vec<u8>, ProviderError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        if self.fail_on.is_some_and(|needle| prompt.contains(needle)) {
            return Err(ProviderError::Transient("render failed".into()));
        }
        let mut png = vec![0x89, b'P', b'N', b'G'];
        png.extend_from_slice(prompt.as_bytes());
        Ok(png)
    }
}

struct Harness {
    _dir: TempDir,
    settings: Arc<Settings>,
    pipeline: StoryPipeline,
    audio: Arc<CountingAudio>,
    images: Arc<CountingImages>,
}

impl Harness {
    fn calls(&self) -> (usize, usize) {
        (
            self.audio.calls.load(Ordering::SeqCst),
            self.images.calls.load(Ordering::SeqCst),
        )
    }
}

#[derive(Default)]
struct Delays {
    story_audio: Duration,
    images: Duration,
}

fn harness(text: Vec<Arc<dyn TextProvider>>, fail_image_on: Option<&'static str>) -> Harness {
    harness_with(text, fail_image_on, Delays::default())
}

fn harness_with(
    text: Vec<Arc<dyn TextProvider>>,
    fail_image_on: Option<&'static str>,
    delays: Delays,
) -> Harness {
    let dir = tempdir().unwrap();
    let settings = Arc::new(Settings {
        data_dir: dir.path().join("data").to_string_lossy().into_owned(),
        public_dir: dir.path().join("public").to_string_lossy().into_owned(),
        ..Settings::default()
    });
    let audio = Arc::new(CountingAudio {
        calls: AtomicUsize::new(0),
        story_delay: delays.story_audio,
    });
    let images = Arc::new(CountingImages {
        calls: AtomicUsize::new(0),
        fail_on: fail_image_on,
        delay: delays.images,
    });

    let mut registry = ProviderRegistry::new(Duration::from_secs(5))
        .with_audio(audio.clone())
        .with_image(images.clone());
    for provider in text {
        registry = registry.with_text(provider);
    }
    let store = readalong::store::StoryStore::temporary().unwrap();
    let pipeline = StoryPipeline::with_registry(settings.clone(), store, registry);

    Harness {
        _dir: dir,
        settings,
        pipeline,
        audio,
        images,
    }
}

const COUNTING_STORY: &str = "TITLE: Counting Stars
CONTENT:
Sentence one is here. Sentence two follows. Sentence three is tricky. Sentence four is calm. Sentence five ends it.
VOCAB:
- star: a light in the night sky
MORAL:
Count your blessings.";

#[tokio::test]
async fn test_red_car_without_providers_uses_templates() {
    let h = harness(Vec::new(), None);

    let assembled = h.pipeline.generate(&StoryRequest::new("a red car")).await.unwrap();
    assert_eq!(assembled.origin, PayloadOrigin::Template);
    assert_eq!(assembled.title, "The Story of A red car");

    let report = assembled.assets.wait().await.unwrap();
    // Cover, five sentence images, five sentence clips
    assert_eq!(report.slots.len(), 11);
    assert_eq!(report.failed().count(), 0);

    let story = h.pipeline.show(assembled.id).unwrap();
    assert_eq!(story.sentences.len(), 5);
    assert_eq!(story.theme, "vehicles");
    assert_eq!(story.moral, DEFAULT_MORAL);
    assert_eq!(story.vocabulary.len(), 1);
    assert!(story.cover_image.is_some());
    for (i, sentence) in story.sentences.iter().enumerate() {
        assert_eq!(sentence.index, i as u32);
        assert!(sentence.image.is_some());
        assert!(sentence.audio.contains_key("en"));
    }
    assert_eq!(
        story.content,
        story.sentences.iter().map(|s| s.text.as_str()).collect::<Vec<_>>().join(" ")
    );

    let words = h.pipeline.vocabulary().unwrap();
    assert_eq!(words.len(), 1);
}

#[tokio::test]
async fn test_kindness_in_hindi_is_bilingual() {
    let mut gemini = text_mock("gemini", true, PromptStyle::Instruct);
    gemini
        .expect_complete()
        .withf(|r| {
            r.expect_json
                && r.system.contains("Translate every sentence into hi.")
                && r.system.contains("100-120")
        })
        .times(1)
        .returning(|_| {
            Ok(r#"{"title":"Kindness","translated_title":"दया",
                "sentences":[{"text":"Mira shared her lunch.","translation":"मीरा ने अपना खाना बाँटा।"},
                             {"text":"Her friend smiled.","translation":"उसकी सहेली मुस्कुराई।"}],
                "vocab":{"share":"give part to others"},
                "moral":"Sharing is caring.","translated_moral":"बाँटना अच्छा है।"}"#
                .to_string())
        });
    let h = harness(vec![Arc::new(gemini)], None);
    h.pipeline.set_preference("llm_provider", "gemini").unwrap();

    let request = StoryRequest::new("kindness")
        .with_length(StoryLength::Medium)
        .with_language("hi");
    let assembled = h.pipeline.generate(&request).await.unwrap();
    assert_eq!(assembled.origin, PayloadOrigin::Provider("gemini"));
    assembled.assets.wait_all().await.unwrap();

    let report = h.pipeline.regenerate(assembled.id).await.unwrap();
    assert_eq!(report.failed().count(), 0);
    assert!(report.refs().contains_key(&AssetSlot::FullAudio("hi".into())));

    let story = h.pipeline.show(assembled.id).unwrap();
    assert_eq!(story.translated_title.as_deref(), Some("दया"));
    assert_eq!(story.translated_moral.as_deref(), Some("बाँटना अच्छा है।"));
    assert!(story.has_translation());
    assert_eq!(story.content, "Mira shared her lunch. Her friend smiled.");
    for sentence in &story.sentences {
        assert!(sentence.audio.contains_key("en"));
        assert!(sentence.audio.contains_key("hi"));
    }
    assert!(story.full_audio.contains_key("en"));
    assert!(story.full_audio.contains_key("hi"));
}

#[tokio::test]
async fn test_bilingual_request_skips_incapable_selection() {
    let mut local = text_mock("tinystories", false, PromptStyle::Completion);
    local.expect_complete().times(0);

    let mut gemini = text_mock("gemini", true, PromptStyle::Instruct);
    gemini.expect_complete().times(1).returning(|_| {
        Ok(r#"{"title":"Sun","translated_title":"Sol",
            "sentences":[{"text":"The sun rose.","translation":"El sol salió."}],
            "moral":"Wake up early."}"#
            .to_string())
    });

    let h = harness(vec![Arc::new(local), Arc::new(gemini)], None);
    h.pipeline.set_preference("llm_provider", "tinystories").unwrap();

    let assembled = h
        .pipeline
        .generate(&StoryRequest::new("sun").with_language("es"))
        .await
        .unwrap();
    assert_eq!(assembled.origin, PayloadOrigin::Provider("gemini"));
    assembled.assets.wait_all().await.unwrap();
}

#[tokio::test]
async fn test_exhausted_text_chain_falls_back_to_templates() {
    let failing = |id: &'static str| {
        let mut mock = text_mock(id, true, PromptStyle::Instruct);
        mock.expect_complete()
            .times(1)
            .returning(|_| Err(ProviderError::Transient("503 service unavailable".into())));
        Arc::new(mock) as Arc<dyn TextProvider>
    };
    let h = harness(vec![failing("openai"), failing("groq"), failing("gemini")], None);
    h.pipeline.set_preference("llm_provider", "openai").unwrap();

    let assembled = h.pipeline.generate(&StoryRequest::new("a wise owl")).await.unwrap();
    assert_eq!(assembled.origin, PayloadOrigin::Template);
    assert_eq!(h.pipeline.show(assembled.id).unwrap().origin, "template");
    assembled.assets.wait_all().await.unwrap();
}

#[tokio::test]
async fn test_failed_image_leaves_only_its_slot_empty() {
    let mut gemini = text_mock("gemini", true, PromptStyle::Instruct);
    gemini
        .expect_complete()
        .times(1)
        .returning(|_| Ok(COUNTING_STORY.to_string()));
    let h = harness(vec![Arc::new(gemini)], Some("Sentence three is tricky."));
    h.pipeline.set_preference("llm_provider", "gemini").unwrap();

    let assembled = h.pipeline.generate(&StoryRequest::new("stars")).await.unwrap();
    let report = assembled.assets.wait().await.unwrap();

    let failed: Vec<_> = report.failed().map(|s| s.slot.clone()).collect();
    assert_eq!(failed, vec![AssetSlot::SentenceImage(2)]);

    let story = h.pipeline.show(assembled.id).unwrap();
    assert_eq!(story.sentences.len(), 5);
    assert!(story.cover_image.is_some());
    for sentence in &story.sentences {
        assert_eq!(sentence.image.is_none(), sentence.index == 2);
        assert!(sentence.audio.contains_key("en"));
    }
}

#[tokio::test]
async fn test_regenerate_is_served_from_cache() {
    let h = harness(Vec::new(), None);
    let assembled = h.pipeline.generate(&StoryRequest::new("a red car")).await.unwrap();
    let id = assembled.id;
    assembled.assets.wait_all().await.unwrap();

    let first = h.pipeline.regenerate(id).await.unwrap();
    let calls = h.calls();
    let refs = h.pipeline.assets(id).unwrap();

    let second = h.pipeline.regenerate(id).await.unwrap();
    assert_eq!(h.calls(), calls);
    assert_eq!(second.generated(), 0);
    assert!(second.slots.iter().all(|s| s.cached));
    assert_eq!(first.refs(), second.refs());
    assert_eq!(h.pipeline.assets(id).unwrap(), refs);
}

#[tokio::test]
async fn test_voice_change_misses_the_cache() {
    let h = harness(Vec::new(), None);
    let assembled = h.pipeline.generate(&StoryRequest::new("a red car")).await.unwrap();
    let id = assembled.id;
    assembled.assets.wait_all().await.unwrap();
    h.pipeline.regenerate(id).await.unwrap();
    let (audio_before, images_before) = h.calls();

    h.pipeline.set_preference("voice_preset", "aria").unwrap();
    let report = h.pipeline.regenerate(id).await.unwrap();
    let (audio_after, images_after) = h.calls();

    assert_eq!(images_after, images_before);
    // Five sentence clips plus the whole-story narration
    assert_eq!(audio_after - audio_before, 6);
    assert_eq!(report.generated(), 6);
}

#[tokio::test]
async fn test_delete_removes_rows_and_files() {
    let h = harness(Vec::new(), None);
    let assembled = h.pipeline.generate(&StoryRequest::new("a red car")).await.unwrap();
    let id = assembled.id;
    assembled.assets.wait_all().await.unwrap();
    h.pipeline.regenerate(id).await.unwrap();

    let published = std::path::Path::new(&h.settings.public_dir)
        .join("stories")
        .join(id.to_string());
    assert!(published.is_dir());

    h.pipeline.delete(id).unwrap();
    assert!(matches!(h.pipeline.show(id), Err(StoreError::NotFound(_))));
    assert!(!published.exists());
    assert!(!h.settings.cache_dir().join(id.to_string()).exists());
    assert!(h.pipeline.list().unwrap().is_empty());
}

#[tokio::test]
async fn test_invalid_request_touches_nothing() {
    let mut gemini = text_mock("gemini", true, PromptStyle::Instruct);
    gemini.expect_complete().times(0);
    let h = harness(vec![Arc::new(gemini)], None);

    assert!(h.pipeline.generate(&StoryRequest::new("   ")).await.is_err());
    assert!(h.pipeline.list().unwrap().is_empty());
    assert_eq!(h.calls(), (0, 0));
}

#[test]
fn test_waiting_for_all_units_keeps_story_narration() {
    let h = harness_with(
        Vec::new(),
        None,
        Delays {
            story_audio: Duration::from_millis(300),
            ..Delays::default()
        },
    );
    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .unwrap();

    let id = runtime.block_on(async {
        let assembled = h.pipeline.generate(&StoryRequest::new("a red car")).await.unwrap();
        let id = assembled.id;
        let report = assembled.assets.wait_all().await.unwrap();
        // Cover, five images, five clips and the whole-story narration
        assert_eq!(report.slots.len(), 12);
        assert!(report.refs().contains_key(&AssetSlot::FullAudio("en".into())));
        id
    });
    // Same as the process exiting
    drop(runtime);

    let story = h.pipeline.show(id).unwrap();
    assert!(story.full_audio.contains_key("en"));
    assert!(story.sentences.iter().all(|s| s.audio.contains_key("en")));
}

#[tokio::test]
async fn test_delete_during_batch_leaves_no_files() {
    let h = harness_with(
        Vec::new(),
        None,
        Delays {
            images: Duration::from_millis(200),
            ..Delays::default()
        },
    );
    let assembled = h.pipeline.generate(&StoryRequest::new("a red car")).await.unwrap();
    let id = assembled.id;

    tokio::time::sleep(Duration::from_millis(50)).await;
    h.pipeline.delete(id).unwrap();
    let report = assembled.assets.wait_all().await.unwrap();

    let failed_images = report
        .failed()
        .filter(|s| matches!(s.slot, AssetSlot::Cover | AssetSlot::SentenceImage(_)))
        .count();
    assert_eq!(failed_images, 6);
    assert!(h.pipeline.assets(id).unwrap().is_empty());

    let published = std::path::Path::new(&h.settings.public_dir)
        .join("stories")
        .join(id.to_string());
    assert!(!published.exists());
    assert!(!h.settings.cache_dir().join(id.to_string()).exists());
}
