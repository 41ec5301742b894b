pub mod assembler;
pub mod assets;
pub mod backends;
pub mod cache;
pub mod chain;
pub mod config_loader;
pub mod content;
pub mod error;
pub mod orchestrator;
pub mod pipeline;
pub mod preferences;
pub mod store;
pub mod story;
pub mod synth;

pub use pipeline::StoryPipeline;
