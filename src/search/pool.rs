//! Search provider pool with failover
//!
//! Providers are tried in order; one with an open circuit is skipped. The
//! first provider that returns hits wins. When every provider answers with
//! nothing the pool returns an empty list; when every provider errors it
//! returns the last error.

use std::collections::BTreeMap;
use std::sync::Arc;

use dashmap::DashMap;
use serde::Serialize;
use tracing::{debug, info, warn};

use super::{SearchHit, SharedSearchProvider};
use crate::ai::provider::{CircuitBreaker, CircuitBreakerConfig, CircuitBreakerStats, CircuitState};
use crate::types::{ForgeError, Result};

#[derive(Debug, Clone, Serialize)]
pub struct SearchProviderStatus {
    pub available: bool,
    pub circuit: CircuitBreakerStats,
}

#[derive(Clone)]
pub struct SearchPool {
    providers: Vec<SharedSearchProvider>,
    breakers: Arc<DashMap<String, CircuitBreaker>>,
}

impl SearchPool {
    pub fn new(providers: Vec<SharedSearchProvider>, breaker: CircuitBreakerConfig) -> Self {
        let breakers = DashMap::new();
        for provider in &providers {
            let name = provider.name().to_string();
            breakers
                .entry(name.clone())
                .or_insert_with(|| CircuitBreaker::new(name, breaker.clone()));
        }
        Self {
            providers,
            breakers: Arc::new(breakers),
        }
    }

    /// Pool with no providers; every search yields an error
    pub fn empty() -> Self {
        Self::new(Vec::new(), CircuitBreakerConfig::default())
    }

    pub fn len(&self) -> usize {
        self.providers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.providers.is_empty()
    }

    pub async fn search(&self, query: &str, max_results: usize) -> Result<Vec<SearchHit>> {
        let mut last_error = None;
        let mut answered = false;

        for provider in &self.providers {
            let name = provider.name();
            let allowed = self
                .breakers
                .get(name)
                .map(|cb| cb.allow_request())
                .unwrap_or(true);
            if !allowed {
                debug!(provider = %name, "Skipping search provider (circuit open)");
                continue;
            }

            match provider.search(query, max_results).await {
                Ok(hits) => {
                    if let Some(cb) = self.breakers.get(name) {
                        cb.record_success();
                    }
                    if !hits.is_empty() {
                        info!(provider = %name, hits = hits.len(), "Search succeeded");
                        return Ok(hits);
                    }
                    debug!(provider = %name, "Search returned no hits, trying next");
                    answered = true;
                }
                Err(e) => {
                    warn!(provider = %name, error = %e, "Search provider failed");
                    if let Some(cb) = self.breakers.get(name) {
                        cb.record_failure(e.to_string());
                    }
                    last_error = Some(e);
                }
            }
        }

        if answered {
            return Ok(Vec::new());
        }
        Err(last_error.unwrap_or_else(|| {
            ForgeError::Search("No search providers available".to_string())
        }))
    }

    pub fn status(&self) -> BTreeMap<String, SearchProviderStatus> {
        self.providers
            .iter()
            .filter_map(|provider| {
                let cb = self.breakers.get(provider.name())?;
                let circuit = cb.stats();
                Some((
                    provider.name().to_string(),
                    SearchProviderStatus {
                        available: circuit.state != CircuitState::Open,
                        circuit,
                    },
                ))
            })
            .collect()
    }

    pub fn available_count(&self) -> usize {
        self.breakers.iter().filter(|cb| cb.is_available()).count()
    }

    /// Clear error state for one provider or all; returns how many changed
    pub fn reset_errors(&self, provider: Option<&str>) -> usize {
        self.breakers
            .iter()
            .filter(|entry| provider.is_none_or(|wanted| entry.key() == wanted))
            .map(|entry| entry.value().reset())
            .filter(|changed| *changed)
            .count()
    }

    pub fn has_provider(&self, name: &str) -> bool {
        self.breakers.contains_key(name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::search::tests::StaticSearch;
    use std::time::Duration;

    fn hit(n: u32) -> SearchHit {
        SearchHit::new(format!("t{n}"), format!("https://s{n}.com.br"), "")
    }

    #[tokio::test]
    async fn test_fails_over_to_next_provider() {
        let pool = SearchPool::new(
            vec![
                Arc::new(StaticSearch::failing("serper")),
                Arc::new(StaticSearch::with_hits("searxng", vec![hit(1), hit(2)])),
            ],
            CircuitBreakerConfig::default(),
        );
        let hits = pool.search("mercado", 10).await.unwrap();
        assert_eq!(hits.len(), 2);
        assert_eq!(pool.status()["serper"].circuit.total_failures, 1);
    }

    #[tokio::test]
    async fn test_empty_answers_are_not_errors() {
        let pool = SearchPool::new(
            vec![
                Arc::new(StaticSearch::failing("a")),
                Arc::new(StaticSearch::with_hits("b", Vec::new())),
            ],
            CircuitBreakerConfig::default(),
        );
        assert!(pool.search("q", 5).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_all_failing_is_error() {
        let pool = SearchPool::new(
            vec![Arc::new(StaticSearch::failing("a"))],
            CircuitBreakerConfig::default(),
        );
        assert!(matches!(pool.search("q", 5).await, Err(ForgeError::Search(_))));
        assert!(SearchPool::empty().search("q", 5).await.is_err());
    }

    #[tokio::test]
    async fn test_open_circuit_skipped_until_reset() {
        let failing = Arc::new(StaticSearch::failing("a"));
        let pool = SearchPool::new(
            vec![
                failing.clone() as SharedSearchProvider,
                Arc::new(StaticSearch::with_hits("b", vec![hit(1)])),
            ],
            CircuitBreakerConfig::new(1, Duration::from_secs(60)),
        );
        pool.search("q1", 5).await.unwrap();
        pool.search("q2", 5).await.unwrap();
        assert_eq!(failing.queries.lock().unwrap().len(), 1);
        assert_eq!(pool.available_count(), 1);
        assert!(!pool.status()["a"].available);

        assert_eq!(pool.reset_errors(Some("a")), 1);
        assert_eq!(pool.available_count(), 2);
    }
}
