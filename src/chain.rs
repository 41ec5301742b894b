//! Ordered fallback over interchangeable providers.

use crate::backends::Provider;
use crate::error::{ChainExhausted, ProviderError, ProviderFailure};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

/// Winning attempt of a chain run.
#[derive(Debug)]
pub struct Attempted<O> {
    pub provider: &'static str,
    pub output: O,
}

/// Providers tried in sequence until one succeeds. Each attempt is bounded
/// by `timeout`; a timeout counts as a failure and the chain advances.
pub struct FallbackChain<P: ?Sized> {
    providers: Vec<Arc<P>>,
    timeout: Duration,
}

impl<P: ?Sized> Clone for FallbackChain<P> {
    fn clone(&self) -> Self {
        Self {
            providers: self.providers.clone(),
            timeout: self.timeout,
        }
    }
}

impl<P: ?Sized + Provider> FallbackChain<P> {
    pub fn new(providers: Vec<Arc<P>>, timeout: Duration) -> Self {
        Self { providers, timeout }
    }

    pub fn ids(&self) -> Vec<&'static str> {
        self.providers.iter().map(|p| p.id()).collect()
    }

    /// Runs `call` against each provider in order and returns the first
    /// success. `what` only labels log lines.
    pub async fn run<O, F, Fut>(
        &self,
        what: &str,
        mut call: F,
    ) -> Result<Attempted<O>, ChainExhausted>
    where
        F: FnMut(Arc<P>) -> Fut,
        Fut: Future<Output = Result<O, ProviderError>>,
    {
        let mut failures = Vec::new();

        for provider in &self.providers {
            let id = provider.id();
            tracing::debug!(provider = id, "{}: attempting", what);

            let result = match tokio::time::timeout(self.timeout, call(provider.clone())).await {
                Ok(result) => result,
                Err(_) => Err(ProviderError::Timeout(self.timeout)),
            };

            match result {
                Ok(output) => {
                    if !failures.is_empty() {
                        tracing::info!(
                            provider = id,
                            skipped = failures.len(),
                            "{}: succeeded after fallback",
                            what
                        );
                    }
                    return Ok(Attempted { provider: id, output });
                }
                Err(error) => {
                    tracing::warn!(
                        provider = id,
                        %error,
                        "{}: provider failed, advancing chain",
                        what
                    );
                    failures.push(ProviderFailure { provider: id, error });
                }
            }
        }

        Err(ChainExhausted { failures })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct Step {
        id: &'static str,
        ok: bool,
        delay: Duration,
        calls: AtomicUsize,
    }

    impl Provider for Step {
        fn id(&self) -> &'static str {
            self.id
        }
    }

    impl Step {
        fn new(id: &'static str, ok: bool) -> Arc<Self> {
            Arc::new(Self {
                id,
                ok,
                delay: Duration::ZERO,
                calls: AtomicUsize::new(0),
            })
        }

        async fn go(&self) -> Result<&'static str, ProviderError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            tokio::time::sleep(self.delay).await;
            if self.ok {
                Ok(self.id)
            } else {
                Err(ProviderError::Transient("down".into()))
            }
        }
    }

    #[tokio::test]
    async fn test_last_provider_wins_after_failures() {
        let a = Step::new("a", false);
        let b = Step::new("b", false);
        let c = Step::new("c", true);
        let chain =
            FallbackChain::new(vec![a.clone(), b.clone(), c.clone()], Duration::from_secs(1));

        let won = chain.run("test", |p| async move { p.go().await }).await.unwrap();
        assert_eq!(won.provider, "c");
        assert_eq!(won.output, "c");
        assert_eq!(a.calls.load(Ordering::SeqCst), 1);
        assert_eq!(b.calls.load(Ordering::SeqCst), 1);
        assert_eq!(c.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_first_success_short_circuits() {
        let a = Step::new("a", true);
        let b = Step::new("b", true);
        let chain = FallbackChain::new(vec![a.clone(), b.clone()], Duration::from_secs(1));

        let won = chain.run("test", |p| async move { p.go().await }).await.unwrap();
        assert_eq!(won.provider, "a");
        assert_eq!(b.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_timeout_advances_chain() {
        let slow = Arc::new(Step {
            id: "slow",
            ok: true,
            delay: Duration::from_secs(5),
            calls: AtomicUsize::new(0),
        });
        let fast = Step::new("fast", true);
        let chain = FallbackChain::new(vec![slow, fast], Duration::from_millis(50));

        let won = chain.run("test", |p| async move { p.go().await }).await.unwrap();
        assert_eq!(won.provider, "fast");
    }

    #[tokio::test]
    async fn test_exhausted_lists_attempts_in_order() {
        let chain = FallbackChain::new(
            vec![Step::new("a", false), Step::new("b", false)],
            Duration::from_secs(1),
        );
        let err = chain.run("test", |p| async move { p.go().await }).await.unwrap_err();
        assert_eq!(err.attempted(), vec!["a", "b"]);
    }
}
