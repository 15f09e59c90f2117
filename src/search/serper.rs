//! Serper (Google results) API client

use std::time::Duration;

use async_trait::async_trait;
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::{SearchHit, SearchProvider};
use crate::config::SearchProviderConfig;
use crate::types::{ForgeError, Result};

const DEFAULT_ENDPOINT: &str = "https://google.serper.dev/search";

pub struct SerperProvider {
    name: String,
    endpoint: String,
    api_key: SecretString,
    client: reqwest::Client,
}

impl std::fmt::Debug for SerperProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SerperProvider")
            .field("name", &self.name)
            .field("endpoint", &self.endpoint)
            .field("api_key", &"[REDACTED]")
            .finish()
    }
}

impl SerperProvider {
    pub fn new(config: &SearchProviderConfig) -> Result<Self> {
        let api_key = config.resolve_api_key().ok_or_else(|| {
            ForgeError::Config(format!(
                "Serper API key not found. Set {} or provide api_key in config",
                config.api_key_env.as_deref().unwrap_or("SERPER_API_KEY")
            ))
        })?;

        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;

        Ok(Self {
            name: config.display_name().to_string(),
            endpoint: config
                .endpoint
                .clone()
                .unwrap_or_else(|| DEFAULT_ENDPOINT.to_string()),
            api_key: SecretString::from(api_key),
            client,
        })
    }
}

#[async_trait]
impl SearchProvider for SerperProvider {
    async fn search(&self, query: &str, max_results: usize) -> Result<Vec<SearchHit>> {
        debug!(provider = %self.name, %query, "Serper search");

        let request = SerperRequest {
            q: query,
            num: max_results,
            gl: "br",
            hl: "pt",
        };

        let response = self
            .client
            .post(&self.endpoint)
            .header("X-API-KEY", self.api_key.expose_secret())
            .json(&request)
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

        let body: SerperResponse = response
            .json()
            .await
            .map_err(|e| ForgeError::Search(format!("{}: invalid response: {}", self.name, e)))?;

        Ok(body.into_hits(max_results))
    }

    fn name(&self) -> &str {
        &self.name
    }
}

#[derive(Debug, Serialize)]
struct SerperRequest<'a> {
    q: &'a str,
    num: usize,
    gl: &'a str,
    hl: &'a str,
}

#[derive(Debug, Deserialize)]
struct SerperResponse {
    #[serde(default)]
    organic: Vec<SerperOrganic>,
}

#[derive(Debug, Deserialize)]
struct SerperOrganic {
    #[serde(default)]
    title: String,
    #[serde(default)]
    link: String,
    #[serde(default)]
    snippet: String,
}

impl SerperResponse {
    fn into_hits(self, max_results: usize) -> Vec<SearchHit> {
        self.organic
            .into_iter()
            .filter(|r| !r.link.is_empty())
            .take(max_results)
            .map(|r| SearchHit::new(r.title, r.link, r.snippet))
            .collect()
    }
}
