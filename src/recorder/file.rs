//! File-tree step recorder
//!
//! Layout: `{root}/{session}/{category}/{seq:04}_{stage}.json`, one record per
//! file, fsynced before `append` returns. Session directory names are
//! percent-encoded so distinct session ids never share a directory.

use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use chrono::Utc;
use dashmap::DashMap;
use serde_json::Value;
use tracing::{debug, warn};

use super::{StepCategory, StepKind, StepRecord, StepRecorder};
use crate::constants::MAX_TRACKED_SEQUENCES;
use crate::types::{ForgeError, Result};

pub struct FileStepRecorder {
    root: PathBuf,
    /// Next free sequence number per session; the lock also serializes writes
    sequences: DashMap<String, Arc<Mutex<u64>>>,
}

impl FileStepRecorder {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            sequences: DashMap::new(),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn session_dir(&self, session_id: &str) -> PathBuf {
        self.root.join(encode_session(session_id))
    }

    /// Sequence lock for a session about to be written, created on first write
    fn sequence(&self, session_id: &str) -> Arc<Mutex<u64>> {
        self.sequences
            .entry(session_id.to_string())
            .or_insert_with(|| {
                let next = self.max_seq_on_disk(session_id).map_or(1, |max| max + 1);
                Arc::new(Mutex::new(next))
            })
            .clone()
    }

    /// Drop sequence locks nobody holds once too many accumulate. A dropped
    /// session resumes from the highest sequence on disk.
    fn prune_idle_sequences(&self) {
        if self.sequences.len() > MAX_TRACKED_SEQUENCES {
            self.sequences.retain(|_, lock| Arc::strong_count(lock) > 1);
        }
    }

    fn max_seq_on_disk(&self, session_id: &str) -> Option<u64> {
        self.record_files(session_id)
            .iter()
            .filter_map(|path| {
                let name = path.file_name()?.to_str()?;
                name.split('_').next()?.parse::<u64>().ok()
            })
            .max()
    }

    fn record_files(&self, session_id: &str) -> Vec<PathBuf> {
        let Ok(categories) = fs::read_dir(self.session_dir(session_id)) else {
            return Vec::new();
        };
        categories
            .filter_map(|entry| entry.ok())
            .filter(|entry| entry.path().is_dir())
            .filter_map(|entry| fs::read_dir(entry.path()).ok())
            .flat_map(|files| files.filter_map(|f| f.ok()).map(|f| f.path()))
            .filter(|path| path.extension().is_some_and(|ext| ext == "json"))
            .collect()
    }
}

impl StepRecorder for FileStepRecorder {
    fn append(
        &self,
        session_id: &str,
        stage: &str,
        category: StepCategory,
        kind: StepKind,
        payload: &Value,
    ) -> Result<u64> {
        let sequence = self.sequence(session_id);
        let mut next = sequence.lock().unwrap_or_else(|e| e.into_inner());
        let seq = *next;

        let record = StepRecord {
            seq,
            session_id: session_id.to_string(),
            stage: stage.to_string(),
            category,
            kind,
            payload: payload.clone(),
            recorded_at: Utc::now(),
        };

        let dir = self.session_dir(session_id).join(category.as_str());
        let path = dir.join(format!("{:04}_{}.json", seq, safe_component(stage)));
        let bytes = serde_json::to_vec_pretty(&record)?;
        off_executor(|| write_durable(&dir, &path, &bytes))
            .map_err(|e| ForgeError::Recorder(format!("{}: {}", path.display(), e)))?;

        *next = seq + 1;
        drop(next);
        drop(sequence);
        self.prune_idle_sequences();
        debug!(session = %session_id, %stage, %category, seq, "Step recorded");
        Ok(seq)
    }

    fn steps(&self, session_id: &str) -> Result<Vec<StepRecord>> {
        // Hold the session lock, when one exists, so a concurrent append is either
        // fully visible or absent. Reads never register a sequence.
        let sequence = self.sequences.get(session_id).map(|s| s.value().clone());
        let _guard = sequence
            .as_ref()
            .map(|s| s.lock().unwrap_or_else(|e| e.into_inner()));

        let mut steps: Vec<StepRecord> = self
            .record_files(session_id)
            .into_iter()
            .filter_map(|path| {
                let bytes = match fs::read(&path) {
                    Ok(bytes) => bytes,
                    Err(e) => {
                        warn!("Unreadable step file {}: {}", path.display(), e);
                        return None;
                    }
                };
                match serde_json::from_slice::<StepRecord>(&bytes) {
                    Ok(record) if record.session_id == session_id => Some(record),
                    Ok(record) => {
                        warn!(
                            "Step file {} belongs to session {}",
                            path.display(),
                            record.session_id
                        );
                        None
                    }
                    Err(e) => {
                        warn!("Corrupt step file {}: {}", path.display(), e);
                        None
                    }
                }
            })
            .collect();
        steps.sort_by_key(|s| s.seq);
        Ok(steps)
    }

    fn sessions(&self) -> Result<Vec<String>> {
        let entries = match fs::read_dir(&self.root) {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };
        let mut sessions: Vec<String> = entries
            .filter_map(|entry| entry.ok())
            .filter(|entry| entry.path().is_dir())
            .filter_map(|entry| entry.file_name().to_str().and_then(decode_session))
            .collect();
        sessions.sort();
        Ok(sessions)
    }

    fn backend(&self) -> &'static str {
        "file"
    }
}

/// Run blocking file I/O without stalling other tasks on a multi-threaded runtime.
fn off_executor<T>(f: impl FnOnce() -> T) -> T {
    match tokio::runtime::Handle::try_current() {
        Ok(handle) if handle.runtime_flavor() == tokio::runtime::RuntimeFlavor::MultiThread => {
            tokio::task::block_in_place(f)
        }
        _ => f(),
    }
}

fn write_durable(dir: &Path, path: &Path, bytes: &[u8]) -> std::io::Result<()> {
    fs::create_dir_all(dir)?;
    let mut file = fs::File::create(path)?;
    file.write_all(bytes)?;
    file.sync_all()
}

/// Directory name for a session: `[A-Za-z0-9_-]` kept, every other byte as `%XX`
fn encode_session(session_id: &str) -> String {
    let mut encoded = String::with_capacity(session_id.len());
    for byte in session_id.bytes() {
        if byte.is_ascii_alphanumeric() || byte == b'_' || byte == b'-' {
            encoded.push(byte as char);
        } else {
            encoded.push_str(&format!("%{:02X}", byte));
        }
    }
    if encoded.is_empty() {
        encoded.push('%');
    }
    encoded
}

fn decode_session(name: &str) -> Option<String> {
    if name == "%" {
        return Some(String::new());
    }
    let bytes = name.as_bytes();
    let mut decoded = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'%' {
            let hex = name.get(i + 1..i + 3)?;
            decoded.push(u8::from_str_radix(hex, 16).ok()?);
            i += 3;
        } else {
            decoded.push(bytes[i]);
            i += 1;
        }
    }
    String::from_utf8(decoded).ok()
}

/// Path-safe form of a stage name
fn safe_component(name: &str) -> String {
    let cleaned: String = name
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '_' || c == '-' { c } else { '_' })
        .collect();
    if cleaned.is_empty() {
        "unknown".to_string()
    } else {
        cleaned
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_append_writes_layout() {
        let dir = tempfile::tempdir().unwrap();
        let recorder = FileStepRecorder::new(dir.path());

        let seq = recorder
            .record("session_1_ab", "avatar", &json!({"nome": "x"}), StepCategory::Avatar)
            .unwrap();
        assert_eq!(seq, 1);
        assert!(dir.path().join("session_1_ab/avatar/0001_avatar.json").exists());

        recorder
            .record_error("session_1_ab", "avatar", "timeout", &json!({"segmento": "x"}))
            .unwrap();
        assert!(dir.path().join("session_1_ab/error/0002_avatar.json").exists());
    }

    #[test]
    fn test_consolidate_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let recorder = FileStepRecorder::new(dir.path());
        recorder
            .record("s1", "web_research", &json!({"q": 1}), StepCategory::Research)
            .unwrap();
        recorder
            .record_error("s1", "avatar", "boom", &json!({}))
            .unwrap();

        let first = recorder.consolidate("s1").unwrap();
        let second = recorder.consolidate("s1").unwrap();
        assert_eq!(first, second);
        assert_eq!(first.total_steps, 2);
        assert_eq!(first.errors[0].payload["error"], "boom");

        recorder
            .record("s1", "insights", &json!(["a"]), StepCategory::Insights)
            .unwrap();
        assert_eq!(recorder.consolidate("s1").unwrap().total_steps, 3);
    }

    #[test]
    fn test_sequence_resumes_from_disk() {
        let dir = tempfile::tempdir().unwrap();
        {
            let recorder = FileStepRecorder::new(dir.path());
            for _ in 0..3 {
                recorder
                    .record("s", "progress", &json!({}), StepCategory::Progress)
                    .unwrap();
            }
        }
        let recorder = FileStepRecorder::new(dir.path());
        let seq = recorder
            .record("s", "avatar", &json!({}), StepCategory::Avatar)
            .unwrap();
        assert_eq!(seq, 4);
    }

    #[test]
    fn test_missing_session_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        let recorder = FileStepRecorder::new(dir.path().join("never-created"));
        assert!(recorder.consolidate("nope").unwrap().is_empty());
        assert!(recorder.sessions().unwrap().is_empty());
        assert_eq!(recorder.step_count("nope").unwrap(), 0);
    }

    #[test]
    fn test_session_names_are_encoded() {
        let dir = tempfile::tempdir().unwrap();
        let recorder = FileStepRecorder::new(dir.path());
        recorder
            .record("../escape", "a/b", &json!({}), StepCategory::Analysis)
            .unwrap();
        assert!(dir.path().join("%2E%2E%2Fescape/analysis/0001_a_b.json").exists());
        assert_eq!(recorder.sessions().unwrap(), vec!["../escape"]);
    }

    #[test]
    fn test_lookalike_sessions_stay_apart() {
        let dir = tempfile::tempdir().unwrap();
        let recorder = FileStepRecorder::new(dir.path());
        recorder
            .record("client.a", "avatar", &json!({"who": "dot"}), StepCategory::Avatar)
            .unwrap();
        recorder
            .record("client_a", "avatar", &json!({"who": "underscore"}), StepCategory::Avatar)
            .unwrap();

        let bundle = recorder.consolidate("client.a").unwrap();
        assert_eq!(bundle.total_steps, 1);
        assert!(bundle.steps.iter().all(|s| s.session_id == "client.a"));
        assert_eq!(bundle.latest["avatar"]["who"], "dot");
        assert_eq!(recorder.consolidate("client_a").unwrap().latest["avatar"]["who"], "underscore");
        assert_eq!(recorder.sessions().unwrap(), vec!["client.a", "client_a"]);
    }

    #[test]
    fn test_foreign_records_are_skipped() {
        let dir = tempfile::tempdir().unwrap();
        let recorder = FileStepRecorder::new(dir.path());
        recorder
            .record("s1", "avatar", &json!({}), StepCategory::Avatar)
            .unwrap();
        std::fs::create_dir_all(dir.path().join("s2/avatar")).unwrap();
        std::fs::copy(
            dir.path().join("s1/avatar/0001_avatar.json"),
            dir.path().join("s2/avatar/0001_avatar.json"),
        )
        .unwrap();

        assert!(recorder.steps("s2").unwrap().is_empty());
    }

    #[test]
    fn test_reads_do_not_register_sessions() {
        let dir = tempfile::tempdir().unwrap();
        let recorder = FileStepRecorder::new(dir.path());
        recorder.consolidate("never-written").unwrap();
        recorder.steps("never-written").unwrap();
        assert!(recorder.sequences.is_empty());

        recorder
            .record("written", "avatar", &json!({}), StepCategory::Avatar)
            .unwrap();
        assert_eq!(recorder.sequences.len(), 1);
    }

    #[test]
    fn test_idle_sequences_are_pruned() {
        let dir = tempfile::tempdir().unwrap();
        let recorder = FileStepRecorder::new(dir.path());
        for i in 0..=MAX_TRACKED_SEQUENCES {
            recorder
                .record(&format!("s{i}"), "progress", &json!({}), StepCategory::Progress)
                .unwrap();
        }
        assert!(recorder.sequences.is_empty());

        let seq = recorder
            .record("s0", "avatar", &json!({}), StepCategory::Avatar)
            .unwrap();
        assert_eq!(seq, 2);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_append_inside_multi_thread_runtime() {
        let dir = tempfile::tempdir().unwrap();
        let recorder = FileStepRecorder::new(dir.path());
        let seq = recorder
            .record("s", "avatar", &json!({}), StepCategory::Avatar)
            .unwrap();
        assert_eq!(seq, 1);
        assert_eq!(recorder.steps("s").unwrap().len(), 1);
    }

    #[test]
    fn test_concurrent_sessions_do_not_interfere() {
        let dir = tempfile::tempdir().unwrap();
        let recorder = Arc::new(FileStepRecorder::new(dir.path()));

        let handles: Vec<_> = (0..4)
            .map(|i| {
                let recorder = recorder.clone();
                std::thread::spawn(move || {
                    let session = format!("s{i}");
                    for n in 0..10 {
                        recorder
                            .record(&session, "progress", &json!({"n": n}), StepCategory::Progress)
                            .unwrap();
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        for i in 0..4 {
            let steps = recorder.steps(&format!("s{i}")).unwrap();
            assert_eq!(steps.iter().map(|s| s.seq).collect::<Vec<_>>(), (1..=10).collect::<Vec<_>>());
        }
    }
}
