//! Per-run metadata cache.
//!
//! Every package is fetched at most once per resolution run. Independent
//! packages are prefetched concurrently; each result is an immutable list
//! shared by reference afterwards. Transient failures are retried here with
//! exponential backoff so the solver only ever sees final answers.

use futures_util::stream::{self, StreamExt};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tern_core::name::PackageName;

use crate::provider::{MetadataError, PackageCandidate, PackageMetadataProvider};

pub type Candidates = Arc<Vec<PackageCandidate>>;

/// Retry and concurrency settings for metadata fetches.
#[derive(Debug, Clone, Copy)]
pub struct FetchPolicy {
    pub retries: u32,
    pub backoff: Duration,
    pub concurrency: usize,
}

impl Default for FetchPolicy {
    fn default() -> Self {
        Self {
            retries: 3,
            backoff: Duration::from_millis(50),
            concurrency: 8,
        }
    }
}

pub struct MetadataCache<'p, P> {
    provider: &'p P,
    policy: FetchPolicy,
    entries: HashMap<PackageName, Result<Candidates, MetadataError>>,
}

impl<'p, P: PackageMetadataProvider> MetadataCache<'p, P> {
    pub fn new(provider: &'p P, policy: FetchPolicy) -> Self {
        Self {
            provider,
            policy,
            entries: HashMap::new(),
        }
    }

    pub fn provider(&self) -> &'p P {
        self.provider
    }

    pub fn contains(&self, name: &PackageName) -> bool {
        self.entries.contains_key(name)
    }

    /// Candidates for `name`, fetching on first use.
    pub async fn get(&mut self, name: &PackageName) -> Result<Candidates, MetadataError> {
        if let Some(entry) = self.entries.get(name) {
            return entry.clone();
        }
        let result = fetch_with_retry(self.provider, name, self.policy).await;
        self.entries.insert(name.clone(), result.clone());
        result
    }

    /// Fetch every uncached name concurrently, at most
    /// `policy.concurrency` in flight. Errors are cached and surface when
    /// the package is actually needed.
    pub async fn prefetch<I>(&mut self, names: I)
    where
        I: IntoIterator<Item = PackageName>,
    {
        let mut missing: Vec<PackageName> = names
            .into_iter()
            .filter(|name| !self.entries.contains_key(name))
            .collect();
        missing.sort();
        missing.dedup();
        if missing.is_empty() {
            return;
        }
        tracing::debug!(count = missing.len(), "prefetching package metadata");

        let provider = self.provider;
        let policy = self.policy;
        let results: Vec<(PackageName, Result<Candidates, MetadataError>)> =
            stream::iter(missing)
                .map(|name| async move {
                    let result = fetch_with_retry(provider, &name, policy).await;
                    (name, result)
                })
                .buffer_unordered(policy.concurrency.max(1))
                .collect()
                .await;
        self.entries.extend(results);
    }
}

async fn fetch_with_retry<P: PackageMetadataProvider>(
    provider: &P,
    name: &PackageName,
    policy: FetchPolicy,
) -> Result<Candidates, MetadataError> {
    let mut attempt = 0u32;
    loop {
        match provider.candidates_for(name).await {
            Ok(candidates) => {
                tracing::trace!(package = %name, versions = candidates.len(), "fetched metadata");
                return Ok(Arc::new(candidates));
            }
            Err(err) if err.is_transient() && attempt < policy.retries => {
                let delay = policy.backoff.saturating_mul(1u32 << attempt.min(16));
                tracing::warn!(
                    package = %name,
                    attempt = attempt + 1,
                    delay_ms = delay.as_millis() as u64,
                    "transient metadata failure, retrying: {err}"
                );
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
            Err(err) => return Err(err),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::provider::StaticProvider;

    fn name(s: &str) -> PackageName {
        PackageName::new(s).unwrap()
    }

    fn fast() -> FetchPolicy {
        FetchPolicy {
            retries: 3,
            backoff: Duration::from_millis(1),
            concurrency: 4,
        }
    }

    #[tokio::test]
    async fn fetches_each_package_once() {
        let mut provider = StaticProvider::new();
        provider.add_simple("a", "1.0", &[]).unwrap();
        provider.add_simple("b", "1.0", &[]).unwrap();
        let mut cache = MetadataCache::new(&provider, fast());
        cache.prefetch([name("a"), name("b"), name("a")]).await;
        assert_eq!(provider.fetch_count(), 2);
        assert_eq!(cache.get(&name("a")).await.unwrap().len(), 1);
        assert_eq!(provider.fetch_count(), 2);
    }

    #[tokio::test]
    async fn retries_transient_failures() {
        let mut provider = StaticProvider::new();
        provider.add_simple("flaky", "1.0", &[]).unwrap();
        provider.fail(
            &name("flaky"),
            2,
            MetadataError::Transient {
                name: name("flaky"),
                message: "timeout".to_string(),
            },
        );
        let mut cache = MetadataCache::new(&provider, fast());
        assert!(cache.get(&name("flaky")).await.is_ok());
        assert_eq!(provider.fetch_count(), 3);
    }

    #[tokio::test]
    async fn gives_up_after_bounded_retries() {
        let mut provider = StaticProvider::new();
        provider.add_simple("down", "1.0", &[]).unwrap();
        provider.fail(
            &name("down"),
            10,
            MetadataError::Transient {
                name: name("down"),
                message: "503".to_string(),
            },
        );
        let mut cache = MetadataCache::new(&provider, fast());
        assert!(matches!(
            cache.get(&name("down")).await,
            Err(MetadataError::Transient { .. })
        ));
        assert_eq!(provider.fetch_count(), 4);
    }

    #[tokio::test]
    async fn permanent_failures_are_not_retried() {
        let provider = StaticProvider::new();
        provider.fail(
            &name("gone"),
            1,
            MetadataError::Permanent {
                name: name("gone"),
                message: "410".to_string(),
            },
        );
        let mut cache = MetadataCache::new(&provider, fast());
        assert!(cache.get(&name("gone")).await.is_err());
        assert_eq!(provider.fetch_count(), 1);
    }
}
