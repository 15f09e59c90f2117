//! Web Search and Content Extraction
//!
//! The research stage asks the [`SearchPool`] for hits, then fetches a handful
//! of pages through a [`ContentExtractor`]. Both sit behind traits so tests and
//! alternative backends can be injected.

mod extractor;
mod pool;
mod searxng;
mod serper;

pub use extractor::{ContentExtractor, HttpContentExtractor, SharedExtractor};
pub use pool::{SearchPool, SearchProviderStatus};
pub use searxng::SearxngProvider;
pub use serper::SerperProvider;

use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::config::SearchProviderConfig;
use crate::types::{ForgeError, Result};

/// One organic search result
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchHit {
    pub title: String,
    pub url: String,
    #[serde(default)]
    pub snippet: String,
}

impl SearchHit {
    pub fn new(title: impl Into<String>, url: impl Into<String>, snippet: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            url: url.into(),
            snippet: snippet.into(),
        }
    }

    /// Host of the hit's URL, lowercased
    pub fn host(&self) -> Option<String> {
        url::Url::parse(&self.url)
            .ok()
            .and_then(|u| u.host_str().map(str::to_lowercase))
    }
}

#[async_trait]
pub trait SearchProvider: Send + Sync {
    async fn search(&self, query: &str, max_results: usize) -> Result<Vec<SearchHit>>;

    fn name(&self) -> &str;
}

pub type SharedSearchProvider = Arc<dyn SearchProvider>;

/// Create a search provider from configuration
pub fn create_search_provider(config: &SearchProviderConfig) -> Result<SharedSearchProvider> {
    match config.kind.as_str() {
        "searxng" => Ok(Arc::new(SearxngProvider::new(config)?)),
        "serper" => Ok(Arc::new(SerperProvider::new(config)?)),
        other => Err(ForgeError::Config(format!(
            "Unknown search provider: {}. Supported: searxng, serper",
            other
        ))),
    }
}

/// Build every configured search provider, skipping the ones that cannot start
pub fn create_search_providers(configs: &[SearchProviderConfig]) -> Vec<SharedSearchProvider> {
    configs
        .iter()
        .filter_map(|config| match create_search_provider(config) {
            Ok(provider) => Some(provider),
            Err(e) => {
                warn!("Search provider '{}' unavailable: {}", config.display_name(), e);
                None
            }
        })
        .collect()
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    pub(crate) use super::extractor::tests::StaticExtractor;
    use std::sync::Mutex;

    /// Scripted search backend for pool and stage tests
    pub(crate) struct StaticSearch {
        name: String,
        hits: Vec<SearchHit>,
        fail: bool,
        pub(crate) queries: Mutex<Vec<String>>,
    }

    impl StaticSearch {
        pub(crate) fn with_hits(name: &str, hits: Vec<SearchHit>) -> Self {
            Self {
                name: name.to_string(),
                hits,
                fail: false,
                queries: Mutex::new(Vec::new()),
            }
        }

        pub(crate) fn failing(name: &str) -> Self {
            Self {
                fail: true,
                ..Self::with_hits(name, Vec::new())
            }
        }
    }

    #[async_trait]
    impl SearchProvider for StaticSearch {
        async fn search(&self, query: &str, max_results: usize) -> Result<Vec<SearchHit>> {
            self.queries.lock().unwrap().push(query.to_string());
            if self.fail {
                return Err(ForgeError::Search(format!("{} offline", self.name)));
            }
            Ok(self.hits.iter().take(max_results).cloned().collect())
        }

        fn name(&self) -> &str {
            &self.name
        }
    }

    #[test]
    fn test_hit_host() {
        let hit = SearchHit::new("t", "https://WWW.Exemplo.com.br/a?b=1", "");
        assert_eq!(hit.host().as_deref(), Some("www.exemplo.com.br"));
        assert!(SearchHit::new("t", "not a url", "").host().is_none());
    }

    #[test]
    fn test_unknown_kind_rejected() {
        let config = SearchProviderConfig {
            kind: "bing".into(),
            ..Default::default()
        };
        assert!(create_search_provider(&config).is_err());
    }

    #[test]
    fn test_searxng_requires_endpoint() {
        let providers = create_search_providers(&[
            SearchProviderConfig::default(),
            SearchProviderConfig {
                endpoint: Some("http://localhost:8888".into()),
                ..Default::default()
            },
        ]);
        assert_eq!(providers.len(), 1);
        assert_eq!(providers[0].name(), "searxng");
    }
}
