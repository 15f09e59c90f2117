//! Real-Time Progress Reporting
//!
//! The orchestrator reports progress through a synchronous [`ProgressSink`]
//! callback, so notifications arrive in exactly the order stages complete.
//! [`ProgressTracker`] is the sink the server and CLI use: it keeps a history
//! per session and fans updates out over a broadcast channel.

use std::sync::{Arc, RwLock};
use std::time::Duration;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::broadcast;

use crate::constants::pipeline::{ANALYSIS_TIMEOUT_SECS, OUTER_GUARD_GRACE_SECS, TOTAL_PROGRESS_STEPS};
use crate::constants::{PROGRESS_CHANNEL_CAPACITY, PROGRESS_RETENTION_SECS};

/// One progress notification
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProgressUpdate {
    pub session_id: String,
    pub step: u32,
    pub total_steps: u32,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<Value>,
    pub at: DateTime<Utc>,
}

impl ProgressUpdate {
    pub fn new(session_id: impl Into<String>, step: u32, message: impl Into<String>) -> Self {
        Self {
            session_id: session_id.into(),
            step,
            total_steps: TOTAL_PROGRESS_STEPS,
            message: message.into(),
            details: None,
            at: Utc::now(),
        }
    }

    pub fn with_details(mut self, details: Value) -> Self {
        self.details = Some(details);
        self
    }

    /// Completion ratio in `0.0..=1.0`
    pub fn fraction(&self) -> f32 {
        if self.total_steps == 0 {
            return 0.0;
        }
        (self.step as f32 / self.total_steps as f32).min(1.0)
    }
}

/// Receiver of progress notifications. Called inline by the orchestrator.
pub trait ProgressSink: Send + Sync {
    fn report(&self, update: &ProgressUpdate);
}

impl<F> ProgressSink for F
where
    F: Fn(&ProgressUpdate) + Send + Sync,
{
    fn report(&self, update: &ProgressUpdate) {
        self(update)
    }
}

/// Sink that drops every update
pub struct NoProgress;

impl ProgressSink for NoProgress {
    fn report(&self, _update: &ProgressUpdate) {}
}

// =============================================================================
// Tracker
// =============================================================================

/// Progress history for one session plus a live broadcast of new updates.
pub struct ProgressTracker {
    session_id: String,
    created_at: DateTime<Utc>,
    history: Arc<RwLock<Vec<ProgressUpdate>>>,
    sender: broadcast::Sender<ProgressUpdate>,
}

impl ProgressTracker {
    pub fn new(session_id: impl Into<String>) -> Self {
        let (sender, _) = broadcast::channel(PROGRESS_CHANNEL_CAPACITY);
        Self {
            session_id: session_id.into(),
            created_at: Utc::now(),
            history: Arc::new(RwLock::new(Vec::new())),
            sender,
        }
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ProgressUpdate> {
        self.sender.subscribe()
    }

    pub fn history(&self) -> Vec<ProgressUpdate> {
        self.history
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    pub fn latest(&self) -> Option<ProgressUpdate> {
        self.history
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .last()
            .cloned()
    }

    pub fn is_finished(&self) -> bool {
        self.latest().is_some_and(|u| u.step >= u.total_steps)
    }

    /// Time of the latest update, or of creation when nothing was reported yet
    pub fn last_activity(&self) -> DateTime<Utc> {
        self.latest().map_or(self.created_at, |u| u.at)
    }
}

impl ProgressSink for ProgressTracker {
    fn report(&self, update: &ProgressUpdate) {
        self.history
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .push(update.clone());
        // No receivers is the normal case when nobody is watching
        let _ = self.sender.send(update.clone());
    }
}

/// Trackers of recent sessions.
///
/// Finished sessions stay readable for the retention window; unfinished ones are
/// dropped once they have been silent longer than an analysis may run.
pub struct ProgressRegistry {
    trackers: DashMap<String, Arc<ProgressTracker>>,
    retention: Duration,
    stale_after: Duration,
}

impl Default for ProgressRegistry {
    fn default() -> Self {
        Self::with_retention(Duration::from_secs(PROGRESS_RETENTION_SECS))
    }
}

impl ProgressRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_retention(retention: Duration) -> Self {
        Self {
            trackers: DashMap::new(),
            retention,
            stale_after: Duration::from_secs(ANALYSIS_TIMEOUT_SECS + OUTER_GUARD_GRACE_SECS),
        }
    }

    /// Tracker for `session_id`, created on first use. Creating a tracker also
    /// evicts expired ones.
    pub fn tracker(&self, session_id: &str) -> Arc<ProgressTracker> {
        if let Some(tracker) = self.get(session_id) {
            return tracker;
        }
        self.prune_at(Utc::now());
        self.trackers
            .entry(session_id.to_string())
            .or_insert_with(|| Arc::new(ProgressTracker::new(session_id)))
            .clone()
    }

    pub fn get(&self, session_id: &str) -> Option<Arc<ProgressTracker>> {
        self.trackers.get(session_id).map(|t| t.value().clone())
    }

    pub fn remove(&self, session_id: &str) -> Option<Arc<ProgressTracker>> {
        self.trackers.remove(session_id).map(|(_, t)| t)
    }

    /// Evict trackers expired as of `now`; returns how many were removed.
    pub fn prune_at(&self, now: DateTime<Utc>) -> usize {
        let before = self.trackers.len();
        self.trackers.retain(|_, tracker| {
            let limit = if tracker.is_finished() {
                self.retention
            } else {
                self.stale_after
            };
            let idle = (now - tracker.last_activity()).to_std().unwrap_or_default();
            idle <= limit
        });
        before - self.trackers.len()
    }

    pub fn len(&self) -> usize {
        self.trackers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.trackers.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    #[test]
    fn test_closure_sink() {
        let seen = Mutex::new(Vec::new());
        let sink = |u: &ProgressUpdate| seen.lock().unwrap().push(u.step);
        sink.report(&ProgressUpdate::new("s", 1, "a"));
        sink.report(&ProgressUpdate::new("s", 3, "b"));
        assert_eq!(*seen.lock().unwrap(), vec![1, 3]);
    }

    #[tokio::test]
    async fn test_tracker_history_and_broadcast() {
        let tracker = ProgressTracker::new("session_1_ab");
        let mut rx = tracker.subscribe();

        tracker.report(&ProgressUpdate::new("session_1_ab", 1, "Dados do projeto salvos"));
        tracker.report(&ProgressUpdate::new("session_1_ab", 13, "Componentes opcionais adicionados"));

        assert_eq!(rx.recv().await.unwrap().step, 1);
        assert_eq!(rx.recv().await.unwrap().step, 13);
        assert_eq!(tracker.history().len(), 2);
        assert!(tracker.is_finished());
        assert_eq!(tracker.latest().unwrap().fraction(), 1.0);
    }

    #[test]
    fn test_report_without_subscribers() {
        let tracker = ProgressTracker::new("s");
        tracker.report(&ProgressUpdate::new("s", 5, "Avatar ultra-detalhado criado"));
        assert_eq!(tracker.latest().unwrap().message, "Avatar ultra-detalhado criado");
        assert!(!tracker.is_finished());
    }

    #[test]
    fn test_registry_reuses_trackers() {
        let registry = ProgressRegistry::new();
        let a = registry.tracker("s1");
        let b = registry.tracker("s1");
        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(registry.len(), 1);
        assert!(registry.get("s2").is_none());
        assert!(registry.remove("s1").is_some());
        assert!(registry.is_empty());
    }

    #[test]
    fn test_registry_evicts_expired_trackers() {
        let registry = ProgressRegistry::with_retention(Duration::from_secs(60));
        let done = registry.tracker("done");
        done.report(&ProgressUpdate::new("done", TOTAL_PROGRESS_STEPS, "Concluído"));
        let running = registry.tracker("running");
        running.report(&ProgressUpdate::new("running", 5, "Avatar ultra-detalhado criado"));

        let now = Utc::now();
        assert_eq!(registry.prune_at(now), 0);

        let later = now + chrono::Duration::seconds(120);
        assert_eq!(registry.prune_at(later), 1);
        assert!(registry.get("done").is_none());
        assert!(registry.get("running").is_some());

        let much_later =
            now + chrono::Duration::seconds((ANALYSIS_TIMEOUT_SECS + OUTER_GUARD_GRACE_SECS + 1) as i64);
        assert_eq!(registry.prune_at(much_later), 1);
        assert!(registry.is_empty());
    }

    #[test]
    fn test_new_tracker_triggers_eviction() {
        let registry = ProgressRegistry::with_retention(Duration::ZERO);
        let done = registry.tracker("old");
        done.report(&ProgressUpdate::new("old", TOTAL_PROGRESS_STEPS, "Concluído"));
        std::thread::sleep(Duration::from_millis(5));

        registry.tracker("new");
        assert!(registry.get("old").is_none());
        assert_eq!(registry.len(), 1);
    }
}
