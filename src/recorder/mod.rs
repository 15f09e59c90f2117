//! Step Recorder
//!
//! Append-only log of every intermediate pipeline step, keyed by session and
//! category. The orchestrator records stage outputs, progress and errors here
//! so a crashed or rejected run can be reassembled with [`StepRecorder::consolidate`].
//!
//! Consolidation only reads: calling it twice without new records in between
//! yields identical bundles.

mod file;
mod sqlite;

pub use file::FileStepRecorder;
pub use sqlite::SqliteStepRecorder;

use std::collections::BTreeMap;
use std::str::FromStr;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};

use crate::config::{Config, RecorderBackend};
use crate::storage::{Database, SharedDatabase};
use crate::types::{ForgeError, RecoverySummary, Result, StageKind};

// =============================================================================
// Step Types
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepCategory {
    Analysis,
    Research,
    Avatar,
    Drivers,
    AntiObjection,
    Insights,
    PrePitch,
    VisualProofs,
    Predictions,
    Progress,
    Error,
}

impl StepCategory {
    pub const ALL: [StepCategory; 11] = [
        Self::Analysis,
        Self::Research,
        Self::Avatar,
        Self::Drivers,
        Self::AntiObjection,
        Self::Insights,
        Self::PrePitch,
        Self::VisualProofs,
        Self::Predictions,
        Self::Progress,
        Self::Error,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Analysis => "analysis",
            Self::Research => "research",
            Self::Avatar => "avatar",
            Self::Drivers => "drivers",
            Self::AntiObjection => "anti_objection",
            Self::Insights => "insights",
            Self::PrePitch => "pre_pitch",
            Self::VisualProofs => "visual_proofs",
            Self::Predictions => "predictions",
            Self::Progress => "progress",
            Self::Error => "error",
        }
    }

    /// Category a stage's output is filed under
    pub fn for_stage(kind: StageKind) -> Self {
        match kind {
            StageKind::ProjectData => Self::Analysis,
            StageKind::Research => Self::Research,
            StageKind::Avatar => Self::Avatar,
            StageKind::Drivers => Self::Drivers,
            StageKind::AntiObjection => Self::AntiObjection,
            StageKind::Insights => Self::Insights,
            StageKind::PrePitch => Self::PrePitch,
            StageKind::VisualProofs => Self::VisualProofs,
            StageKind::FuturePredictions => Self::Predictions,
        }
    }
}

impl std::fmt::Display for StepCategory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for StepCategory {
    type Err = ForgeError;

    fn from_str(s: &str) -> Result<Self> {
        Self::ALL
            .into_iter()
            .find(|c| c.as_str() == s)
            .ok_or_else(|| ForgeError::Recorder(format!("unknown step category '{}'", s)))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepKind {
    Output,
    Error,
}

impl StepKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Output => "output",
            Self::Error => "error",
        }
    }
}

impl FromStr for StepKind {
    type Err = ForgeError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "output" => Ok(Self::Output),
            "error" => Ok(Self::Error),
            other => Err(ForgeError::Recorder(format!("unknown step kind '{}'", other))),
        }
    }
}

/// One recorded step. `seq` is strictly increasing within a session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StepRecord {
    pub seq: u64,
    pub session_id: String,
    pub stage: String,
    pub category: StepCategory,
    pub kind: StepKind,
    pub payload: Value,
    pub recorded_at: DateTime<Utc>,
}

// =============================================================================
// Recovery Bundle
// =============================================================================

/// Every step of a session reassembled into one document.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RecoveryBundle {
    pub session_id: String,
    pub total_steps: usize,
    pub steps: Vec<StepRecord>,
    pub errors: Vec<StepRecord>,
    pub categories: BTreeMap<String, usize>,
    /// Stage name -> last output payload recorded for it
    pub latest: BTreeMap<String, Value>,
}

impl RecoveryBundle {
    pub fn from_steps(session_id: &str, mut steps: Vec<StepRecord>) -> Self {
        steps.sort_by_key(|s| s.seq);

        let mut categories = BTreeMap::new();
        let mut latest = BTreeMap::new();
        let mut errors = Vec::new();
        for step in &steps {
            *categories.entry(step.category.as_str().to_string()).or_insert(0) += 1;
            match step.kind {
                StepKind::Error => errors.push(step.clone()),
                StepKind::Output if step.category != StepCategory::Progress => {
                    latest.insert(step.stage.clone(), step.payload.clone());
                }
                StepKind::Output => {}
            }
        }

        Self {
            session_id: session_id.to_string(),
            total_steps: steps.len(),
            steps,
            errors,
            categories,
            latest,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    pub fn summary(&self) -> RecoverySummary {
        RecoverySummary {
            session_id: self.session_id.clone(),
            total_steps: self.total_steps,
            error_count: self.errors.len(),
            categories: self.categories.clone(),
        }
    }
}

// =============================================================================
// Recorder Contract
// =============================================================================

/// Append-only step log.
///
/// Writes for one session are durable before `append` returns. Concurrent
/// writers on distinct sessions never interfere.
pub trait StepRecorder: Send + Sync {
    /// Append one step and return its sequence number.
    fn append(
        &self,
        session_id: &str,
        stage: &str,
        category: StepCategory,
        kind: StepKind,
        payload: &Value,
    ) -> Result<u64>;

    /// All steps of a session ordered by sequence.
    fn steps(&self, session_id: &str) -> Result<Vec<StepRecord>>;

    /// Sessions with at least one recorded step.
    fn sessions(&self) -> Result<Vec<String>>;

    fn backend(&self) -> &'static str;

    fn record(
        &self,
        session_id: &str,
        stage: &str,
        payload: &Value,
        category: StepCategory,
    ) -> Result<u64> {
        self.append(session_id, stage, category, StepKind::Output, payload)
    }

    fn record_error(
        &self,
        session_id: &str,
        stage: &str,
        error: &str,
        context: &Value,
    ) -> Result<u64> {
        let payload = json!({ "error": error, "context": context });
        self.append(session_id, stage, StepCategory::Error, StepKind::Error, &payload)
    }

    fn consolidate(&self, session_id: &str) -> Result<RecoveryBundle> {
        Ok(RecoveryBundle::from_steps(session_id, self.steps(session_id)?))
    }

    fn step_count(&self, session_id: &str) -> Result<usize> {
        Ok(self.steps(session_id)?.len())
    }
}

pub type SharedRecorder = Arc<dyn StepRecorder>;

/// Build the configured recorder. The SQLite backend reuses `db` when given.
pub fn create_recorder(config: &Config, db: Option<SharedDatabase>) -> Result<SharedRecorder> {
    match config.recorder.backend {
        RecorderBackend::File => Ok(Arc::new(FileStepRecorder::new(config.steps_dir()))),
        RecorderBackend::Sqlite => {
            let db = match db {
                Some(db) => db,
                None => Arc::new(Database::open(config.sqlite_path())?),
            };
            Ok(Arc::new(SqliteStepRecorder::new(db)))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn step(seq: u64, stage: &str, category: StepCategory, kind: StepKind, payload: Value) -> StepRecord {
        StepRecord {
            seq,
            session_id: "s".into(),
            stage: stage.into(),
            category,
            kind,
            payload,
            recorded_at: DateTime::<Utc>::from_timestamp(1_700_000_000, 0).unwrap(),
        }
    }

    #[test]
    fn test_bundle_orders_and_counts() {
        let bundle = RecoveryBundle::from_steps(
            "s",
            vec![
                step(3, "avatar", StepCategory::Avatar, StepKind::Output, json!({"v": 2})),
                step(1, "avatar", StepCategory::Avatar, StepKind::Output, json!({"v": 1})),
                step(2, "avatar", StepCategory::Error, StepKind::Error, json!({"error": "x"})),
                step(4, "progress", StepCategory::Progress, StepKind::Output, json!({"step": 1})),
            ],
        );
        assert_eq!(bundle.steps.iter().map(|s| s.seq).collect::<Vec<_>>(), vec![1, 2, 3, 4]);
        assert_eq!(bundle.errors.len(), 1);
        assert_eq!(bundle.latest["avatar"], json!({"v": 2}));
        assert!(!bundle.latest.contains_key("progress"));
        assert_eq!(bundle.categories["avatar"], 2);

        let summary = bundle.summary();
        assert_eq!(summary.total_steps, 4);
        assert_eq!(summary.error_count, 1);
    }

    #[test]
    fn test_category_names_round_trip() {
        for category in StepCategory::ALL {
            assert_eq!(category.as_str().parse::<StepCategory>().unwrap(), category);
            assert_eq!(
                serde_json::to_value(category).unwrap(),
                Value::String(category.as_str().to_string())
            );
        }
        assert!("bogus".parse::<StepCategory>().is_err());
        assert_eq!(StepCategory::for_stage(StageKind::FuturePredictions), StepCategory::Predictions);
        assert_eq!(StepCategory::for_stage(StageKind::ProjectData), StepCategory::Analysis);
    }

    #[test]
    fn test_create_recorder_backends() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = Config::default();
        config.storage.data_dir = Some(dir.path().to_path_buf());
        assert_eq!(create_recorder(&config, None).unwrap().backend(), "file");

        config.recorder.backend = RecorderBackend::Sqlite;
        let db = Arc::new(Database::open_in_memory().unwrap());
        assert_eq!(create_recorder(&config, Some(db)).unwrap().backend(), "sqlite");
    }
}
