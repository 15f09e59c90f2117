//! Analysis Storage
//!
//! Two tiers: a local file tree that is always attempted first, and an
//! optional database tier (SQLite or a Supabase/PostgREST table). The tiers
//! succeed or fail independently; a save only fails when every configured
//! tier failed.

pub mod database;
mod local;
mod sqlite_tier;
mod supabase;
mod tiered;

pub use database::{Database, PoolConfig, SharedDatabase};
pub use local::LocalFileTier;
pub use sqlite_tier::SqliteTier;
pub use supabase::SupabaseTier;
pub use tiered::{TieredStore, create_store, open_shared_database};

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::types::{AnalysisResult, Result, StorageReport, prefixed_id};

// =============================================================================
// Records
// =============================================================================

/// One persisted analysis, shaped like the `analyses` table row.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnalysisRecord {
    pub id: String,
    #[serde(default)]
    pub session_id: Option<String>,
    #[serde(rename = "segmento")]
    pub segment: String,
    #[serde(rename = "produto", default)]
    pub product: Option<String>,
    #[serde(rename = "publico", default)]
    pub audience: Option<String>,
    #[serde(rename = "preco", default)]
    pub price: Option<f64>,
    #[serde(rename = "objetivo_receita", default)]
    pub revenue_goal: Option<f64>,
    #[serde(rename = "orcamento_marketing", default)]
    pub marketing_budget: Option<f64>,
    #[serde(rename = "prazo_lancamento", default)]
    pub launch_window: Option<String>,
    #[serde(rename = "concorrentes", default)]
    pub competitors: Option<String>,
    #[serde(rename = "dados_adicionais", default)]
    pub extra_data: Option<String>,
    #[serde(rename = "query_text", default)]
    pub query: Option<String>,
    pub status: String,
    #[serde(default, skip_serializing_if = "Value::is_null")]
    pub comprehensive_analysis: Value,
    #[serde(default)]
    pub local_files_path: Option<String>,
    pub created_at: String,
    pub updated_at: String,
}

impl AnalysisRecord {
    pub const STATUS_COMPLETED: &'static str = "completed";

    /// Fresh record with a new `analysis_{unix}_{hex8}` id.
    pub fn from_result(result: &AnalysisResult) -> Result<Self> {
        let now = timestamp(Utc::now());
        let request = result.project_data.as_ref();
        Ok(Self {
            id: prefixed_id("analysis"),
            session_id: result.session_id().map(|s| s.to_string()),
            segment: request.map(|r| r.segment.clone()).unwrap_or_default(),
            product: request.and_then(|r| r.product.clone()),
            audience: request.and_then(|r| r.audience.clone()),
            price: request.and_then(|r| r.price),
            revenue_goal: request.and_then(|r| r.revenue_goal),
            marketing_budget: request.and_then(|r| r.marketing_budget),
            launch_window: request.and_then(|r| r.launch_window.clone()),
            competitors: request.and_then(|r| r.competitors.clone()),
            extra_data: request.and_then(|r| r.extra_data.clone()),
            query: request.map(|r| r.query.clone()),
            status: Self::STATUS_COMPLETED.to_string(),
            comprehensive_analysis: serde_json::to_value(result)?,
            local_files_path: None,
            created_at: now.clone(),
            updated_at: now,
        })
    }

    pub fn summary(&self) -> AnalysisSummary {
        AnalysisSummary {
            id: self.id.clone(),
            session_id: self.session_id.clone(),
            segment: self.segment.clone(),
            product: self.product.clone(),
            status: self.status.clone(),
            created_at: self.created_at.clone(),
            local_files_path: self.local_files_path.clone(),
        }
    }

    /// Copy without the (large) analysis body
    pub fn without_body(&self) -> Self {
        Self {
            comprehensive_analysis: Value::Null,
            ..self.clone()
        }
    }
}

/// Listing row.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnalysisSummary {
    pub id: String,
    #[serde(default)]
    pub session_id: Option<String>,
    #[serde(rename = "segmento")]
    pub segment: String,
    #[serde(rename = "produto", default)]
    pub product: Option<String>,
    pub status: String,
    pub created_at: String,
    #[serde(default)]
    pub local_files_path: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StoreStats {
    pub backend: String,
    pub total_analyses: usize,
    pub status_counts: BTreeMap<String, usize>,
    /// Analyses created within the recent window
    pub recent_analyses: usize,
}

impl StoreStats {
    /// Aggregate stats over summaries, counting those created at or after `since`.
    pub fn from_summaries<'a>(
        backend: &str,
        summaries: impl IntoIterator<Item = &'a AnalysisSummary>,
        since: DateTime<Utc>,
    ) -> Self {
        let mut stats = Self {
            backend: backend.to_string(),
            ..Default::default()
        };
        for summary in summaries {
            stats.total_analyses += 1;
            *stats.status_counts.entry(summary.status.clone()).or_insert(0) += 1;
            let recent = DateTime::parse_from_rfc3339(&summary.created_at)
                .is_ok_and(|created| created.with_timezone(&Utc) >= since);
            if recent {
                stats.recent_analyses += 1;
            }
        }
        stats
    }
}

// =============================================================================
// Save Outcome
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StorageLocation {
    LocalOnly,
    DatabaseOnly,
    Both,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SaveOutcome {
    pub stored_id: String,
    pub location: StorageLocation,
    pub local_path: Option<PathBuf>,
    /// Why the database tier did not store the record, when it did not
    pub database_warning: Option<String>,
}

impl SaveOutcome {
    /// Storage block for the result metadata
    pub fn report(&self) -> StorageReport {
        let stored_in_database = matches!(
            self.location,
            StorageLocation::Both | StorageLocation::DatabaseOnly
        );
        StorageReport {
            database_id: stored_in_database.then(|| self.stored_id.clone()),
            local_only: self.location == StorageLocation::LocalOnly,
            local_files: self.local_path.as_ref().map(|p| p.display().to_string()),
            database_warning: self.database_warning.clone(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TierHealth {
    pub name: String,
    pub available: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StoreHealth {
    pub healthy: bool,
    pub local: Option<TierHealth>,
    pub database: Option<TierHealth>,
}

// =============================================================================
// Contracts
// =============================================================================

/// Persistence for finished analyses.
///
/// `save` receives the result by reference and never mutates it.
#[async_trait]
pub trait AnalysisStore: Send + Sync {
    async fn save(&self, result: &AnalysisResult) -> Result<SaveOutcome>;

    async fn get(&self, id: &str) -> Result<Option<AnalysisRecord>>;

    async fn list(&self, limit: usize, offset: usize) -> Result<Vec<AnalysisSummary>>;

    /// True when at least one tier held the record
    async fn delete(&self, id: &str) -> Result<bool>;

    async fn stats(&self) -> Result<StoreStats>;

    async fn health(&self) -> StoreHealth;
}

pub type SharedStore = Arc<dyn AnalysisStore>;

/// The remote half of the store.
#[async_trait]
pub trait DatabaseTier: Send + Sync {
    fn name(&self) -> &'static str;

    async fn insert(&self, record: &AnalysisRecord) -> Result<()>;

    async fn get(&self, id: &str) -> Result<Option<AnalysisRecord>>;

    /// Newest first
    async fn list(&self, limit: usize, offset: usize) -> Result<Vec<AnalysisSummary>>;

    async fn delete(&self, id: &str) -> Result<bool>;

    async fn stats(&self) -> Result<StoreStats>;

    async fn ping(&self) -> Result<()>;
}

pub type SharedDatabaseTier = Arc<dyn DatabaseTier>;

/// Second-precision UTC timestamp; lexicographic order equals time order.
pub fn timestamp(at: DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Secs, true)
}

/// Ids only ever contain `[A-Za-z0-9_-]`
pub(crate) fn is_valid_id(id: &str) -> bool {
    !id.is_empty()
        && id
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
}
