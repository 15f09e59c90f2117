//! SearXNG JSON API client

use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use tracing::debug;

use super::{SearchHit, SearchProvider};
use crate::config::SearchProviderConfig;
use crate::types::{ForgeError, Result};

pub struct SearxngProvider {
    name: String,
    endpoint: String,
    client: reqwest::Client,
}

impl SearxngProvider {
    pub fn new(config: &SearchProviderConfig) -> Result<Self> {
        let endpoint = config.endpoint.as_deref().ok_or_else(|| {
            ForgeError::Config("searxng provider requires an endpoint".to_string())
        })?;
        let url = url::Url::parse(endpoint)
            .map_err(|e| ForgeError::Config(format!("Invalid searxng endpoint '{}': {}", endpoint, e)))?;
        if !matches!(url.scheme(), "http" | "https") {
            return Err(ForgeError::Config(format!(
                "searxng endpoint must use http or https, got: {}",
                url.scheme()
            )));
        }

        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;

        Ok(Self {
            name: config.display_name().to_string(),
            endpoint: url.as_str().trim_end_matches('/').to_string(),
            client,
        })
    }
}

#[async_trait]
impl SearchProvider for SearxngProvider {
    async fn search(&self, query: &str, max_results: usize) -> Result<Vec<SearchHit>> {
        let url = format!("{}/search", self.endpoint);
        debug!(provider = %self.name, %query, "SearXNG search");

        let response = self
            .client
            .get(&url)
            .query(&[("q", query), ("format", "json"), ("language", "pt-BR")])
            .send()
            .await
            .map_err(|e| ForgeError::Search(format!("{}: {}", self.name, e)))?;

        if !response.status().is_success() {
            return Err(ForgeError::Search(format!(
                "{}: HTTP {}",
                self.name,
                response.status()
            )));
        }

        let body: SearxngResponse = response
            .json()
            .await
            .map_err(|e| ForgeError::Search(format!("{}: invalid response: {}", self.name, e)))?;

        Ok(body.into_hits(max_results))
    }

    fn name(&self) -> &str {
        &self.name
    }
}

#[derive(Debug, Deserialize)]
struct SearxngResponse {
    #[serde(default)]
    results: Vec<SearxngResult>,
}

#[derive(Debug, Deserialize)]
struct SearxngResult {
    #[serde(default)]
    title: String,
    #[serde(default)]
    url: String,
    #[serde(default)]
    content: String,
}

impl SearxngResponse {
    fn into_hits(self, max_results: usize) -> Vec<SearchHit> {
        self.results
            .into_iter()
            .filter(|r| !r.url.is_empty())
            .take(max_results)
            .map(|r| SearchHit::new(r.title, r.url, r.content))
            .collect()
    }
}
