//! readalong - story and narration asset pipeline
//!
//! Generates children's stories and their per-sentence images and audio.

use clap::{Parser, Subcommand};
use readalong::config_loader::Settings;
use readalong::story::{MasteryStatus, StoryId, StoryLength};
use readalong::StoryPipeline;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "readalong")]
#[command(author = "StarTuz")]
#[command(version)]
#[command(
    about = "Generate read-along stories with narration and illustrations",
    long_about = None
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Generate a new story
    Generate {
        /// What the story is about
        topic: String,
        /// short, medium or long
        #[arg(short, long, default_value = "short")]
        length: StoryLength,
        /// Target language code for a bilingual story (e.g. hi, es)
        #[arg(long, default_value = "en")]
        language: String,
        /// Narration speed (0.5-1.5); defaults to the configured speed
        #[arg(short, long)]
        speed: Option<f32>,
        /// Print the story id as soon as it is stored and skip the asset
        /// report; assets still finish before the command exits
        #[arg(short, long)]
        quiet: bool,
    },

    /// Re-run asset generation for a story and wait for every asset
    Regenerate {
        id: StoryId,
    },

    /// Print a story with its asset paths
    Show {
        id: StoryId,
    },

    /// List stories, newest first
    List,

    /// Delete a story and its assets
    Delete {
        id: StoryId,
    },

    /// Show provider preferences
    Settings,

    /// Change a provider preference ("default" resets it)
    Set {
        key: String,
        value: String,
    },

    /// List vocabulary progress
    Vocab,

    /// Set the mastery status of a word
    Master {
        word: String,
        /// new, learning or mastered
        status: MasteryStatus,
    },
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let settings = Arc::new(Settings::new()?);
    let pipeline = StoryPipeline::open(settings)?;

    match cli.command {
        Commands::Generate {
            topic,
            length,
            language,
            speed,
            quiet,
        } => {
            let mut request = pipeline
                .request(&topic)
                .with_length(length)
                .with_language(language);
            if let Some(speed) = speed {
                request = request.with_speed(speed);
            }
            let assembled = pipeline.generate(&request).await?;
            println!("Story {}: {} ({})", assembled.id, assembled.title, assembled.origin);

            // The runtime drops unfinished tasks on exit
            let report = assembled.assets.wait_all().await?;
            if !quiet {
                println!(
                    "Assets: {} ready, {} failed",
                    report.slots.len() - report.failed().count(),
                    report.failed().count()
                );
            }
        }

        Commands::Regenerate { id } => {
            let report = pipeline.regenerate(id).await?;
            println!("Assets for story {}", id);
            println!("─────────────────");
            for slot in &report.slots {
                match (&slot.public_path, &slot.error) {
                    (Some(path), _) => println!(
                        "  {:<28} {} {}",
                        slot.slot.to_string(),
                        path,
                        if slot.cached { "(cached)" } else { "" }
                    ),
                    (None, Some(e)) => println!("  {:<28} failed: {}", slot.slot.to_string(), e),
                    (None, None) => println!("  {:<28} missing", slot.slot.to_string()),
                }
            }
        }

        Commands::Show { id } => {
            let story = pipeline.show(id)?;
            pipeline.mark_read(id)?;

            println!("{}", story.title);
            if let Some(title) = &story.translated_title {
                println!("{}", title);
            }
            println!("─────────────────");
            if let Some(cover) = &story.cover_image {
                println!("Cover: {}", cover);
            }
            for (lang, path) in &story.full_audio {
                println!("Audio [{}]: {}", lang, path);
            }
            for sentence in &story.sentences {
                println!("{:>3}. {}", sentence.index + 1, sentence.text);
                if let Some(translation) = &sentence.translation {
                    println!("     {}", translation);
                }
                if let Some(image) = &sentence.image {
                    println!("     image: {}", image);
                }
                for (lang, path) in &sentence.audio {
                    println!("     audio [{}]: {}", lang, path);
                }
            }
            println!("Moral: {}", story.moral);
            if !story.vocabulary.is_empty() {
                println!("Words:");
                for (word, meaning) in &story.vocabulary {
                    println!("  {} - {}", word, meaning);
                }
            }
            for (i, q) in story.quiz.iter().enumerate() {
                println!("Q{}: {} [{}]", i + 1, q.question, q.options.join(" / "));
            }
        }

        Commands::List => {
            let stories = pipeline.list()?;
            if stories.is_empty() {
                println!("No stories yet");
            } else {
                for s in stories {
                    println!(
                        "{:>4}  {}  [{}|{}]  {}",
                        s.id.to_string(),
                        s.created_at.format("%Y-%m-%d %H:%M"),
                        s.language,
                        s.theme,
                        s.title
                    );
                }
            }
        }

        Commands::Delete { id } => {
            pipeline.delete(id)?;
            println!("Deleted story {}", id);
        }

        Commands::Settings => {
            let prefs = pipeline.preferences()?;
            println!("Provider Preferences");
            println!("────────────────────");
            for (key, value) in prefs.pairs() {
                println!("  {:<16} {}", key, value);
            }
        }

        Commands::Set { key, value } => {
            let prefs = pipeline.set_preference(&key, &value)?;
            println!("{} = {}", key, prefs.get(&key).unwrap_or_default());
        }

        Commands::Vocab => {
            let entries = pipeline.vocabulary()?;
            if entries.is_empty() {
                println!("No words yet");
            } else {
                for e in entries {
                    println!(
                        "  {:<16} {:<9} x{:<3} {}",
                        e.word,
                        format!("{:?}", e.status),
                        e.occurrences,
                        e.meaning
                    );
                }
            }
        }

        Commands::Master { word, status } => {
            let entry = pipeline.set_mastery(&word, status)?;
            println!("{} is now {:?}", entry.word, entry.status);
        }
    }

    Ok(())
}
