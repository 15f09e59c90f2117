//! Local file tier
//!
//! One directory per analysis:
//!
//! ```text
//! {root}/{analysis_id}/
//!   analysis.json      full result
//!   metadata.json      record without the body
//!   {section}.json     one file per present section
//! ```

use std::path::{Path, PathBuf};

use chrono::{Duration, Utc};
use tracing::{debug, info, warn};

use super::{AnalysisRecord, AnalysisSummary, StoreStats, is_valid_id};
use crate::constants::storage::RECENT_WINDOW_DAYS;
use crate::types::{AnalysisResult, ForgeError, Result, StageKind};

const ANALYSIS_FILE: &str = "analysis.json";
const METADATA_FILE: &str = "metadata.json";

pub struct LocalFileTier {
    root: PathBuf,
}

impl LocalFileTier {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn dir_for(&self, id: &str) -> Result<PathBuf> {
        if !is_valid_id(id) {
            return Err(ForgeError::NotFound(format!("analysis '{}'", id)));
        }
        Ok(self.root.join(id))
    }

    /// Write every file for `record`; returns the analysis directory.
    pub async fn save(&self, record: &AnalysisRecord, result: &AnalysisResult) -> Result<PathBuf> {
        let dir = self.dir_for(&record.id)?;
        tokio::fs::create_dir_all(&dir).await?;

        let full = serde_json::to_string_pretty(&record.comprehensive_analysis)?;
        tokio::fs::write(dir.join(ANALYSIS_FILE), &full).await?;

        let mut sections = 0;
        for kind in StageKind::ALL {
            if let Some(value) = result.section_value(kind) {
                let content = serde_json::to_string_pretty(&value)?;
                tokio::fs::write(dir.join(format!("{}.json", kind.wire_key())), content).await?;
                sections += 1;
            }
        }

        let mut meta = record.without_body();
        meta.local_files_path = Some(dir.display().to_string());
        tokio::fs::write(dir.join(METADATA_FILE), serde_json::to_string_pretty(&meta)?).await?;

        info!(
            "Saved analysis '{}' locally ({} sections, {} bytes)",
            record.id,
            sections,
            full.len()
        );
        Ok(dir)
    }

    pub async fn get(&self, id: &str) -> Result<Option<AnalysisRecord>> {
        let Ok(dir) = self.dir_for(id) else {
            return Ok(None);
        };

        let meta = match tokio::fs::read_to_string(dir.join(METADATA_FILE)).await {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        let mut record: AnalysisRecord = serde_json::from_str(&meta)?;

        match tokio::fs::read_to_string(dir.join(ANALYSIS_FILE)).await {
            Ok(content) => record.comprehensive_analysis = serde_json::from_str(&content)?,
            Err(e) => warn!("Analysis '{}' has metadata but no body: {}", id, e),
        }
        Ok(Some(record))
    }

    /// Newest first
    pub async fn list(&self, limit: usize, offset: usize) -> Result<Vec<AnalysisSummary>> {
        let mut summaries = self.all_summaries().await?;
        summaries.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(b.id.cmp(&a.id)));
        Ok(summaries.into_iter().skip(offset).take(limit).collect())
    }

    pub async fn delete(&self, id: &str) -> Result<bool> {
        let Ok(dir) = self.dir_for(id) else {
            return Ok(false);
        };
        match tokio::fs::remove_dir_all(&dir).await {
            Ok(()) => {
                info!("Deleted local analysis '{}'", id);
                Ok(true)
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e.into()),
        }
    }

    pub async fn stats(&self) -> Result<StoreStats> {
        let summaries = self.all_summaries().await?;
        let since = Utc::now() - Duration::days(RECENT_WINDOW_DAYS);
        Ok(StoreStats::from_summaries("local", &summaries, since))
    }

    /// The root can be created and written
    pub async fn probe(&self) -> Result<()> {
        tokio::fs::create_dir_all(&self.root).await?;
        let probe = self.root.join(".probe");
        tokio::fs::write(&probe, b"ok").await?;
        tokio::fs::remove_file(&probe).await?;
        Ok(())
    }

    async fn all_summaries(&self) -> Result<Vec<AnalysisSummary>> {
        let mut entries = match tokio::fs::read_dir(&self.root).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };

        let mut summaries = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path().join(METADATA_FILE);
            let Ok(content) = tokio::fs::read_to_string(&path).await else {
                continue;
            };
            match serde_json::from_str::<AnalysisRecord>(&content) {
                Ok(record) => summaries.push(record.summary()),
                Err(e) => debug!("Skipping unreadable {}: {}", path.display(), e),
            }
        }
        Ok(summaries)
    }
}
