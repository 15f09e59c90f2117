//! SQLite step recorder backed by the `pipeline_steps` table

use chrono::{DateTime, Utc};
use rusqlite::params;
use serde_json::Value;

use super::{StepCategory, StepKind, StepRecord, StepRecorder};
use crate::storage::SharedDatabase;
use crate::types::{ForgeError, Result};

pub struct SqliteStepRecorder {
    db: SharedDatabase,
}

impl SqliteStepRecorder {
    pub fn new(db: SharedDatabase) -> Self {
        Self { db }
    }
}

type StepRow = (i64, String, String, String, String, String, String);

impl StepRecorder for SqliteStepRecorder {
    fn append(
        &self,
        session_id: &str,
        stage: &str,
        category: StepCategory,
        kind: StepKind,
        payload: &Value,
    ) -> Result<u64> {
        let payload = serde_json::to_string(payload)?;
        let now = Utc::now().to_rfc3339();
        let seq = self.db.transaction(|conn| {
            conn.execute(
                "INSERT INTO pipeline_steps (session_id, stage, category, kind, payload, recorded_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                params![session_id, stage, category.as_str(), kind.as_str(), payload, now],
            )?;
            Ok(conn.last_insert_rowid())
        })?;
        Ok(seq as u64)
    }

    fn steps(&self, session_id: &str) -> Result<Vec<StepRecord>> {
        let conn = self.db.connection()?;
        let mut stmt = conn.prepare(
            "SELECT seq, session_id, stage, category, kind, payload, recorded_at
             FROM pipeline_steps WHERE session_id = ?1 ORDER BY seq",
        )?;
        let rows: Vec<StepRow> = stmt
            .query_map([session_id], |row| {
                Ok((
                    row.get(0)?,
                    row.get(1)?,
                    row.get(2)?,
                    row.get(3)?,
                    row.get(4)?,
                    row.get(5)?,
                    row.get(6)?,
                ))
            })?
            .collect::<std::result::Result<_, _>>()?;

        rows.into_iter()
            .map(|(seq, session_id, stage, category, kind, payload, recorded_at)| -> Result<StepRecord> {
                Ok(StepRecord {
                    seq: seq as u64,
                    session_id,
                    stage,
                    category: category.parse()?,
                    kind: kind.parse()?,
                    payload: serde_json::from_str(&payload)?,
                    recorded_at: DateTime::parse_from_rfc3339(&recorded_at)
                        .map_err(|e| ForgeError::Recorder(format!("bad timestamp: {}", e)))?
                        .with_timezone(&Utc),
                })
            })
            .collect()
    }

    fn sessions(&self) -> Result<Vec<String>> {
        let conn = self.db.connection()?;
        let mut stmt =
            conn.prepare("SELECT DISTINCT session_id FROM pipeline_steps ORDER BY session_id")?;
        let sessions = stmt
            .query_map([], |row| row.get(0))?
            .collect::<std::result::Result<Vec<String>, _>>()?;
        Ok(sessions)
    }

    fn backend(&self) -> &'static str {
        "sqlite"
    }

    fn step_count(&self, session_id: &str) -> Result<usize> {
        let conn = self.db.connection()?;
        let count: i64 = conn.query_row(
            "SELECT COUNT(*) FROM pipeline_steps WHERE session_id = ?1",
            [session_id],
            |row| row.get(0),
        )?;
        Ok(count as usize)
    }
}
