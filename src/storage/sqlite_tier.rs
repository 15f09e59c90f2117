//! SQLite database tier over the `analyses` table

use std::collections::BTreeMap;

use async_trait::async_trait;
use chrono::{Duration, Utc};
use rusqlite::{OptionalExtension, Row, params};

use super::{
    AnalysisRecord, AnalysisSummary, DatabaseTier, SharedDatabase, StoreStats, timestamp,
};
use crate::constants::storage::RECENT_WINDOW_DAYS;
use crate::types::{Result, StageKind};

const RECORD_COLUMNS: &str = "id, session_id, segmento, produto, publico, preco, objetivo_receita,
    orcamento_marketing, prazo_lancamento, concorrentes, dados_adicionais, query_text, status,
    comprehensive_analysis, local_files_path, created_at, updated_at";

const SUMMARY_COLUMNS: &str = "id, session_id, segmento, produto, status, created_at, local_files_path";

pub struct SqliteTier {
    db: SharedDatabase,
}

impl SqliteTier {
    pub fn new(db: SharedDatabase) -> Self {
        Self { db }
    }
}

fn summary_from_row(row: &Row<'_>) -> rusqlite::Result<AnalysisSummary> {
    Ok(AnalysisSummary {
        id: row.get(0)?,
        session_id: row.get(1)?,
        segment: row.get(2)?,
        product: row.get(3)?,
        status: row.get(4)?,
        created_at: row.get(5)?,
        local_files_path: row.get(6)?,
    })
}

type RecordRow = (AnalysisRecord, String);

fn record_from_row(row: &Row<'_>) -> rusqlite::Result<RecordRow> {
    let body: String = row.get(13)?;
    Ok((
        AnalysisRecord {
            id: row.get(0)?,
            session_id: row.get(1)?,
            segment: row.get(2)?,
            product: row.get(3)?,
            audience: row.get(4)?,
            price: row.get(5)?,
            revenue_goal: row.get(6)?,
            marketing_budget: row.get(7)?,
            launch_window: row.get(8)?,
            competitors: row.get(9)?,
            extra_data: row.get(10)?,
            query: row.get(11)?,
            status: row.get(12)?,
            comprehensive_analysis: serde_json::Value::Null,
            local_files_path: row.get(14)?,
            created_at: row.get(15)?,
            updated_at: row.get(16)?,
        },
        body,
    ))
}

#[async_trait]
impl DatabaseTier for SqliteTier {
    fn name(&self) -> &'static str {
        "sqlite"
    }

    async fn insert(&self, record: &AnalysisRecord) -> Result<()> {
        let body = serde_json::to_string(&record.comprehensive_analysis)?;
        self.db.transaction(|conn| {
            conn.execute(
                &format!(
                    "INSERT INTO analyses ({}) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16, ?17)",
                    RECORD_COLUMNS
                ),
                params![
                    record.id,
                    record.session_id,
                    record.segment,
                    record.product,
                    record.audience,
                    record.price,
                    record.revenue_goal,
                    record.marketing_budget,
                    record.launch_window,
                    record.competitors,
                    record.extra_data,
                    record.query,
                    record.status,
                    body,
                    record.local_files_path,
                    record.created_at,
                    record.updated_at,
                ],
            )?;

            if let Some(dir) = &record.local_files_path {
                let mut stmt = conn.prepare(
                    "INSERT INTO analysis_files (analysis_id, section, file_path, created_at)
                     VALUES (?1, ?2, ?3, ?4)",
                )?;
                for kind in StageKind::ALL {
                    let key = kind.wire_key();
                    if record.comprehensive_analysis.get(key).is_some() {
                        let path = format!("{}/{}.json", dir, key);
                        stmt.execute(params![record.id, key, path, record.created_at])?;
                    }
                }
            }
            Ok(())
        })
    }

    async fn get(&self, id: &str) -> Result<Option<AnalysisRecord>> {
        let conn = self.db.connection()?;
        let row = conn
            .query_row(
                &format!("SELECT {} FROM analyses WHERE id = ?1", RECORD_COLUMNS),
                [id],
                record_from_row,
            )
            .optional()?;

        match row {
            Some((mut record, body)) => {
                record.comprehensive_analysis = serde_json::from_str(&body)?;
                Ok(Some(record))
            }
            None => Ok(None),
        }
    }

    async fn list(&self, limit: usize, offset: usize) -> Result<Vec<AnalysisSummary>> {
        let conn = self.db.connection()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM analyses ORDER BY created_at DESC, id DESC LIMIT ?1 OFFSET ?2",
            SUMMARY_COLUMNS
        ))?;
        let rows = stmt
            .query_map(params![limit as i64, offset as i64], summary_from_row)?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    async fn delete(&self, id: &str) -> Result<bool> {
        let affected = self
            .db
            .execute("DELETE FROM analyses WHERE id = ?1", &[&id])?;
        Ok(affected > 0)
    }

    async fn stats(&self) -> Result<StoreStats> {
        let conn = self.db.connection()?;
        let total: i64 = conn.query_row("SELECT COUNT(*) FROM analyses", [], |r| r.get(0))?;

        let mut stmt = conn.prepare("SELECT status, COUNT(*) FROM analyses GROUP BY status")?;
        let status_counts: BTreeMap<String, usize> = stmt
            .query_map([], |row| {
                Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)? as usize))
            })?
            .collect::<std::result::Result<_, _>>()?;

        let since = timestamp(Utc::now() - Duration::days(RECENT_WINDOW_DAYS));
        let recent: i64 = conn.query_row(
            "SELECT COUNT(*) FROM analyses WHERE created_at >= ?1",
            [since],
            |r| r.get(0),
        )?;

        Ok(StoreStats {
            backend: self.name().to_string(),
            total_analyses: total as usize,
            status_counts,
            recent_analyses: recent as usize,
        })
    }

    async fn ping(&self) -> Result<()> {
        self.db.ping()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::Database;
    use crate::storage::tests::sample_result;
    use std::sync::Arc;

    fn tier() -> SqliteTier {
        SqliteTier::new(Arc::new(Database::open_in_memory().unwrap()))
    }

    fn record(segment: &str) -> AnalysisRecord {
        AnalysisRecord::from_result(&sample_result(segment)).unwrap()
    }

    #[tokio::test]
    async fn test_insert_get_round_trip() {
        let tier = tier();
        let mut record = record("consultoria");
        record.local_files_path = Some("/data/analyses/x".into());
        tier.insert(&record).await.unwrap();

        let loaded = tier.get(&record.id).await.unwrap().unwrap();
        assert_eq!(loaded, record);

        let conn = tier.db.connection().unwrap();
        let files: i64 = conn
            .query_row(
                "SELECT COUNT(*) FROM analysis_files WHERE analysis_id = ?1",
                [&record.id],
                |r| r.get(0),
            )
            .unwrap();
        assert_eq!(files, 2);
    }

    #[tokio::test]
    async fn test_list_stats_delete() {
        let tier = tier();
        let mut old = record("antigo");
        old.created_at = "2020-01-01T00:00:00Z".into();
        let new = record("novo");
        tier.insert(&old).await.unwrap();
        tier.insert(&new).await.unwrap();

        let listed = tier.list(10, 0).await.unwrap();
        assert_eq!(listed[0].segment, "novo");
        assert_eq!(tier.list(10, 1).await.unwrap().len(), 1);

        let stats = tier.stats().await.unwrap();
        assert_eq!(stats.total_analyses, 2);
        assert_eq!(stats.status_counts["completed"], 2);
        assert_eq!(stats.recent_analyses, 1);

        assert!(tier.delete(&old.id).await.unwrap());
        assert!(!tier.delete(&old.id).await.unwrap());
        assert!(tier.get(&old.id).await.unwrap().is_none());
        tier.ping().await.unwrap();
    }
}
