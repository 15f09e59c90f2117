//! Supabase database tier (PostgREST over HTTPS)

use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use reqwest::{Method, RequestBuilder, StatusCode};
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;
use tracing::debug;

use super::{AnalysisRecord, AnalysisSummary, DatabaseTier, StoreStats};
use crate::constants::storage::RECENT_WINDOW_DAYS;
use crate::types::{ForgeError, Result};

const SUMMARY_SELECT: &str = "id,session_id,segmento,produto,status,created_at,local_files_path";

pub struct SupabaseTier {
    base: String,
    table: String,
    key: SecretString,
    client: reqwest::Client,
}

impl std::fmt::Debug for SupabaseTier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SupabaseTier")
            .field("base", &self.base)
            .field("table", &self.table)
            .field("key", &"[REDACTED]")
            .finish()
    }
}

impl SupabaseTier {
    pub fn new(url: &str, key: &str, table: &str) -> Result<Self> {
        let parsed = url::Url::parse(url)
            .map_err(|e| ForgeError::Config(format!("Invalid supabase_url '{}': {}", url, e)))?;
        if !matches!(parsed.scheme(), "http" | "https") {
            return Err(ForgeError::Config(format!(
                "supabase_url must use http or https, got: {}",
                parsed.scheme()
            )));
        }
        if key.trim().is_empty() {
            return Err(ForgeError::Config("supabase_key is empty".to_string()));
        }

        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(20))
            .build()?;

        Ok(Self {
            base: parsed.as_str().trim_end_matches('/').to_string(),
            table: table.to_string(),
            key: SecretString::from(key.to_string()),
            client,
        })
    }

    fn endpoint(&self) -> String {
        format!("{}/rest/v1/{}", self.base, self.table)
    }

    fn request(&self, method: Method) -> RequestBuilder {
        let key = self.key.expose_secret();
        self.client
            .request(method, self.endpoint())
            .header("apikey", key)
            .bearer_auth(key)
    }

    async fn send(&self, request: RequestBuilder) -> Result<reqwest::Response> {
        let response = request
            .send()
            .await
            .map_err(|e| ForgeError::Store(format!("supabase: {}", e)))?;
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let body = response.text().await.unwrap_or_default();
        Err(ForgeError::Store(format!(
            "supabase: HTTP {}: {}",
            status,
            crate::types::truncate_chars(&body, 200)
        )))
    }

    async fn rows<T: for<'de> Deserialize<'de>>(&self, request: RequestBuilder) -> Result<Vec<T>> {
        self.send(request)
            .await?
            .json()
            .await
            .map_err(|e| ForgeError::Store(format!("supabase: invalid response: {}", e)))
    }
}

#[derive(Deserialize)]
struct StatusRow {
    status: String,
    created_at: String,
}

#[async_trait]
impl DatabaseTier for SupabaseTier {
    fn name(&self) -> &'static str {
        "supabase"
    }

    async fn insert(&self, record: &AnalysisRecord) -> Result<()> {
        let request = self
            .request(Method::POST)
            .header("Prefer", "return=minimal")
            .json(record);
        self.send(request).await?;
        debug!("Inserted analysis '{}' into supabase", record.id);
        Ok(())
    }

    async fn get(&self, id: &str) -> Result<Option<AnalysisRecord>> {
        let request = self
            .request(Method::GET)
            .query(&[("id", format!("eq.{}", id)), ("select", "*".to_string())]);
        let mut rows: Vec<AnalysisRecord> = self.rows(request).await?;
        Ok(rows.pop())
    }

    async fn list(&self, limit: usize, offset: usize) -> Result<Vec<AnalysisSummary>> {
        let request = self.request(Method::GET).query(&[
            ("select", SUMMARY_SELECT.to_string()),
            ("order", "created_at.desc".to_string()),
            ("limit", limit.to_string()),
            ("offset", offset.to_string()),
        ]);
        self.rows(request).await
    }

    async fn delete(&self, id: &str) -> Result<bool> {
        let request = self
            .request(Method::DELETE)
            .header("Prefer", "return=representation")
            .query(&[("id", format!("eq.{}", id)), ("select", "id".to_string())]);
        let deleted: Vec<serde_json::Value> = self.rows(request).await?;
        Ok(!deleted.is_empty())
    }

    async fn stats(&self) -> Result<StoreStats> {
        let request = self
            .request(Method::GET)
            .query(&[("select", "id,segmento,status,created_at")]);
        let rows: Vec<StatusRow> = self.rows(request).await?;
        let summaries: Vec<AnalysisSummary> = rows
            .into_iter()
            .map(|row| AnalysisSummary {
                id: String::new(),
                session_id: None,
                segment: String::new(),
                product: None,
                status: row.status,
                created_at: row.created_at,
                local_files_path: None,
            })
            .collect();
        let since = Utc::now() - chrono::Duration::days(RECENT_WINDOW_DAYS);
        Ok(StoreStats::from_summaries(self.name(), &summaries, since))
    }

    async fn ping(&self) -> Result<()> {
        let request = self
            .request(Method::GET)
            .query(&[("select", "id"), ("limit", "1")]);
        let response = self.send(request).await?;
        if response.status() == StatusCode::OK || response.status() == StatusCode::PARTIAL_CONTENT {
            Ok(())
        } else {
            Err(ForgeError::Store(format!(
                "supabase: unexpected status {}",
                response.status()
            )))
        }
    }
}
