//! Error types for the story pipeline.
//!
//! Provider-level failures are absorbed by the fallback chains; only
//! `AssemblyError` ever reaches a caller of the assembler.

use crate::story::StoryId;
use std::time::Duration;

/// A single provider attempt that did not produce a usable result.
#[derive(Debug, thiserror::Error)]
pub enum ProviderError {
    /// Network, quota, auth or a non-success status.
    #[error("provider request failed: {0}")]
    Transient(String),

    #[error("provider timed out after {0:?}")]
    Timeout(Duration),

    /// The provider answered but the reply did not have the required shape.
    #[error("malformed provider output: {0}")]
    Malformed(String),
}

impl From<reqwest::Error> for ProviderError {
    fn from(e: reqwest::Error) -> Self {
        ProviderError::Transient(e.to_string())
    }
}

impl From<std::io::Error> for ProviderError {
    fn from(e: std::io::Error) -> Self {
        ProviderError::Transient(e.to_string())
    }
}

/// One entry in the failure log of an exhausted chain.
#[derive(Debug)]
pub struct ProviderFailure {
    pub provider: &'static str,
    pub error: ProviderError,
}

/// Every provider in a fallback chain failed (or the chain was empty).
#[derive(Debug, thiserror::Error)]
#[error("all providers exhausted after {} attempt(s)", .failures.len())]
pub struct ChainExhausted {
    pub failures: Vec<ProviderFailure>,
}

impl ChainExhausted {
    /// Ids of the providers that were tried, in order.
    pub fn attempted(&self) -> Vec<&'static str> {
        self.failures.iter().map(|f| f.provider).collect()
    }
}

/// Outcome of the story-text chain when no payload could be produced.
#[derive(Debug, thiserror::Error)]
pub enum GenerationError {
    /// No content provider is configured; callers use the template builder.
    #[error("no content provider configured")]
    Unavailable,

    #[error("content generation failed: {0}")]
    Exhausted(#[from] ChainExhausted),
}

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(#[from] sled::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("story {0} not found")]
    NotFound(StoryId),

    #[error("refusing to persist a story without sentences")]
    EmptyStory,

    /// Sentence order or content/sentence alignment is broken.
    #[error("story {story} is desynchronized: {reason}")]
    Desync { story: StoryId, reason: String },

    #[error("invalid setting: {0}")]
    InvalidSetting(String),

    #[error("unknown vocabulary word '{0}'")]
    UnknownWord(String),
}

impl From<sled::transaction::TransactionError<StoreError>> for StoreError {
    fn from(e: sled::transaction::TransactionError<StoreError>) -> Self {
        match e {
            sled::transaction::TransactionError::Abort(inner) => inner,
            sled::transaction::TransactionError::Storage(e) => StoreError::Database(e),
        }
    }
}

/// Failure to produce a single audio or image asset.
#[derive(Debug, thiserror::Error)]
pub enum AssetError {
    #[error(transparent)]
    Exhausted(#[from] ChainExhausted),

    #[error("asset cache error: {0}")]
    Cache(#[from] std::io::Error),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("asset task failed: {0}")]
    Task(String),
}

/// The only errors a story request can surface to its caller.
#[derive(Debug, thiserror::Error)]
pub enum AssemblyError {
    #[error("invalid story request: {0}")]
    InvalidRequest(String),

    #[error("could not persist story: {0}")]
    Persistence(#[from] StoreError),
}

/// Failure to bring up the pipeline for a process.
#[derive(Debug, thiserror::Error)]
pub enum SetupError {
    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("could not build HTTP client: {0}")]
    Http(#[from] reqwest::Error),
}
