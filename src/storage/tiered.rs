//! Two-tier analysis store
//!
//! The local tier is written first and its success is independent of the
//! database tier. Reads prefer the database and fall back to local files.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::{info, warn};

use super::{
    AnalysisRecord, AnalysisStore, AnalysisSummary, Database, DatabaseTier, LocalFileTier,
    SaveOutcome, SharedDatabase, SharedDatabaseTier, SqliteTier, StorageLocation, StoreHealth,
    StoreStats, SupabaseTier, TierHealth,
};
use crate::config::{Config, DatabaseBackend, RecorderBackend};
use crate::types::{AnalysisResult, ForgeError, Result};

pub struct TieredStore {
    local: Option<LocalFileTier>,
    database: Option<SharedDatabaseTier>,
}

impl TieredStore {
    pub fn new(local: Option<LocalFileTier>, database: Option<SharedDatabaseTier>) -> Self {
        Self { local, database }
    }

    pub fn local_only(local: LocalFileTier) -> Self {
        Self::new(Some(local), None)
    }

    pub fn database_name(&self) -> Option<&'static str> {
        self.database.as_ref().map(|db| db.name())
    }
}

#[async_trait]
impl AnalysisStore for TieredStore {
    async fn save(&self, result: &AnalysisResult) -> Result<SaveOutcome> {
        let mut record = AnalysisRecord::from_result(result)?;

        let mut local_error = None;
        let local_path = match &self.local {
            Some(local) => match local.save(&record, result).await {
                Ok(path) => Some(path),
                Err(e) => {
                    warn!("Local save of '{}' failed: {}", record.id, e);
                    local_error = Some(e.to_string());
                    None
                }
            },
            None => None,
        };
        record.local_files_path = local_path.as_ref().map(|p| p.display().to_string());

        let database_warning = match &self.database {
            Some(db) => match db.insert(&record).await {
                Ok(()) => None,
                Err(e) => {
                    warn!("Database save of '{}' failed ({}): {}", record.id, db.name(), e);
                    Some(e.to_string())
                }
            },
            None => Some("no database configured".to_string()),
        };

        let location = match (local_path.is_some(), database_warning.is_none()) {
            (true, true) => StorageLocation::Both,
            (true, false) => StorageLocation::LocalOnly,
            (false, true) => StorageLocation::DatabaseOnly,
            (false, false) => {
                return Err(ForgeError::Store(format!(
                    "all storage tiers failed (local: {}; database: {})",
                    local_error.as_deref().unwrap_or("not configured"),
                    database_warning.as_deref().unwrap_or_default()
                )));
            }
        };

        info!("Stored analysis '{}' ({:?})", record.id, location);
        Ok(SaveOutcome {
            stored_id: record.id,
            location,
            local_path,
            database_warning,
        })
    }

    async fn get(&self, id: &str) -> Result<Option<AnalysisRecord>> {
        if let Some(db) = &self.database {
            match db.get(id).await {
                Ok(Some(record)) => return Ok(Some(record)),
                Ok(None) => {}
                Err(e) => warn!("Database lookup of '{}' failed, trying local: {}", id, e),
            }
        }
        match &self.local {
            Some(local) => local.get(id).await,
            None => Ok(None),
        }
    }

    async fn list(&self, limit: usize, offset: usize) -> Result<Vec<AnalysisSummary>> {
        if let Some(db) = &self.database {
            match db.list(limit, offset).await {
                Ok(rows) => return Ok(rows),
                Err(e) => warn!("Database listing failed, using local files: {}", e),
            }
        }
        match &self.local {
            Some(local) => local.list(limit, offset).await,
            None => Ok(Vec::new()),
        }
    }

    async fn delete(&self, id: &str) -> Result<bool> {
        let mut deleted = false;
        let mut last_error = None;

        if let Some(db) = &self.database {
            match db.delete(id).await {
                Ok(hit) => deleted |= hit,
                Err(e) => {
                    warn!("Database delete of '{}' failed: {}", id, e);
                    last_error = Some(e);
                }
            }
        }
        if let Some(local) = &self.local {
            match local.delete(id).await {
                Ok(hit) => deleted |= hit,
                Err(e) => last_error = Some(e),
            }
        }

        match last_error {
            Some(e) if !deleted => Err(e),
            _ => Ok(deleted),
        }
    }

    async fn stats(&self) -> Result<StoreStats> {
        if let Some(db) = &self.database {
            match db.stats().await {
                Ok(stats) => return Ok(stats),
                Err(e) => warn!("Database stats failed, using local files: {}", e),
            }
        }
        match &self.local {
            Some(local) => local.stats().await,
            None => Ok(StoreStats::default()),
        }
    }

    async fn health(&self) -> StoreHealth {
        let local = match &self.local {
            Some(tier) => Some(tier_health("local", tier.probe().await)),
            None => None,
        };
        let database = match &self.database {
            Some(db) => Some(tier_health(db.name(), db.ping().await)),
            None => None,
        };
        let healthy = local.as_ref().is_some_and(|t| t.available)
            || database.as_ref().is_some_and(|t| t.available);
        StoreHealth {
            healthy,
            local,
            database,
        }
    }
}

fn tier_health(name: &str, probe: Result<()>) -> TierHealth {
    TierHealth {
        name: name.to_string(),
        available: probe.is_ok(),
        error: probe.err().map(|e| e.to_string()),
    }
}

/// Build the configured store. A database tier that cannot start is logged and
/// left out; the local tier is always present.
pub fn create_store(config: &Config, db: Option<SharedDatabase>) -> TieredStore {
    let local = LocalFileTier::new(config.analyses_dir());

    let database: Option<SharedDatabaseTier> = match config.storage.database {
        DatabaseBackend::None => None,
        DatabaseBackend::Sqlite => {
            let db = match db {
                Some(db) => Ok(db),
                None => Database::open(config.sqlite_path()).map(Arc::new),
            };
            match db {
                Ok(db) => Some(Arc::new(SqliteTier::new(db)) as SharedDatabaseTier),
                Err(e) => {
                    warn!("SQLite tier unavailable, storing locally only: {}", e);
                    None
                }
            }
        }
        DatabaseBackend::Supabase => {
            let key = config
                .storage
                .supabase_key
                .clone()
                .or_else(|| std::env::var("SUPABASE_KEY").ok())
                .unwrap_or_default();
            let url = config.storage.supabase_url.as_deref().unwrap_or_default();
            match SupabaseTier::new(url, &key, &config.storage.supabase_table) {
                Ok(tier) => Some(Arc::new(tier) as SharedDatabaseTier),
                Err(e) => {
                    warn!("Supabase tier unavailable, storing locally only: {}", e);
                    None
                }
            }
        }
    };

    TieredStore::new(Some(local), database)
}

/// Open the SQLite file once when the store or the recorder needs it, so both
/// share one pool. Failure is logged; callers fall back to their own handling.
pub fn open_shared_database(config: &Config) -> Option<SharedDatabase> {
    let needed = config.storage.database == DatabaseBackend::Sqlite
        || config.recorder.backend == RecorderBackend::Sqlite;
    if !needed {
        return None;
    }
    match Database::open(config.sqlite_path()) {
        Ok(db) => Some(Arc::new(db)),
        Err(e) => {
            warn!("Could not open {}: {}", config.sqlite_path().display(), e);
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::tests::sample_result;

    /// Database tier that rejects everything
    struct OfflineTier;

    #[async_trait]
    impl DatabaseTier for OfflineTier {
        fn name(&self) -> &'static str {
            "offline"
        }
        async fn insert(&self, _: &AnalysisRecord) -> Result<()> {
            Err(ForgeError::Store("connection refused".into()))
        }
        async fn get(&self, _: &str) -> Result<Option<AnalysisRecord>> {
            Err(ForgeError::Store("connection refused".into()))
        }
        async fn list(&self, _: usize, _: usize) -> Result<Vec<AnalysisSummary>> {
            Err(ForgeError::Store("connection refused".into()))
        }
        async fn delete(&self, _: &str) -> Result<bool> {
            Err(ForgeError::Store("connection refused".into()))
        }
        async fn stats(&self) -> Result<StoreStats> {
            Err(ForgeError::Store("connection refused".into()))
        }
        async fn ping(&self) -> Result<()> {
            Err(ForgeError::Store("connection refused".into()))
        }
    }

    fn sqlite() -> SharedDatabaseTier {
        Arc::new(SqliteTier::new(Arc::new(Database::open_in_memory().unwrap())))
    }

    #[tokio::test]
    async fn test_save_to_both_tiers() {
        let dir = tempfile::tempdir().unwrap();
        let store = TieredStore::new(Some(LocalFileTier::new(dir.path())), Some(sqlite()));
        let result = sample_result("consultoria");
        let before = result.clone();

        let outcome = store.save(&result).await.unwrap();
        assert_eq!(outcome.location, StorageLocation::Both);
        assert!(outcome.database_warning.is_none());
        assert_eq!(result, before);

        let record = store.get(&outcome.stored_id).await.unwrap().unwrap();
        assert_eq!(record.local_files_path, outcome.local_path.map(|p| p.display().to_string()));
        assert_eq!(store.list(10, 0).await.unwrap().len(), 1);
        assert_eq!(store.stats().await.unwrap().backend, "sqlite");
    }

    #[tokio::test]
    async fn test_offline_database_keeps_local_copy() {
        let dir = tempfile::tempdir().unwrap();
        let store = TieredStore::new(
            Some(LocalFileTier::new(dir.path())),
            Some(Arc::new(OfflineTier)),
        );

        let outcome = store.save(&sample_result("varejo")).await.unwrap();
        assert_eq!(outcome.location, StorageLocation::LocalOnly);
        assert!(outcome.report().local_only);
        assert!(outcome.database_warning.unwrap().contains("connection refused"));

        let record = store.get(&outcome.stored_id).await.unwrap().unwrap();
        assert_eq!(record.segment, "varejo");
        assert_eq!(store.list(10, 0).await.unwrap().len(), 1);
        assert_eq!(store.stats().await.unwrap().backend, "local");
        assert!(store.delete(&outcome.stored_id).await.unwrap());

        let health = store.health().await;
        assert!(health.healthy);
        assert!(!health.database.unwrap().available);
    }

    #[tokio::test]
    async fn test_database_only_when_local_fails() {
        let dir = tempfile::tempdir().unwrap();
        let blocker = dir.path().join("file");
        std::fs::write(&blocker, "x").unwrap();
        let store = TieredStore::new(Some(LocalFileTier::new(blocker.join("sub"))), Some(sqlite()));

        let outcome = store.save(&sample_result("x")).await.unwrap();
        assert_eq!(outcome.location, StorageLocation::DatabaseOnly);
        assert!(outcome.local_path.is_none());
    }

    #[tokio::test]
    async fn test_fails_only_when_every_tier_fails() {
        let dir = tempfile::tempdir().unwrap();
        let blocker = dir.path().join("file");
        std::fs::write(&blocker, "x").unwrap();
        let store = TieredStore::new(
            Some(LocalFileTier::new(blocker.join("sub"))),
            Some(Arc::new(OfflineTier)),
        );
        assert!(matches!(
            store.save(&sample_result("x")).await,
            Err(ForgeError::Store(_))
        ));
    }

    #[test]
    fn test_create_store_backends() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = Config::default();
        config.storage.data_dir = Some(dir.path().to_path_buf());

        config.storage.database = DatabaseBackend::None;
        assert_eq!(create_store(&config, None).database_name(), None);

        config.storage.database = DatabaseBackend::Sqlite;
        assert_eq!(create_store(&config, None).database_name(), Some("sqlite"));

        config.storage.database = DatabaseBackend::Supabase;
        config.storage.supabase_url = Some("https://x.supabase.co".into());
        config.storage.supabase_key = Some("k".into());
        assert_eq!(create_store(&config, None).database_name(), Some("supabase"));
    }
}
