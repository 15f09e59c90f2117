//! Shared fixtures for pipeline tests

use std::sync::Arc;
use std::time::Duration;

use tokio::time::Instant;

use super::stages::StageContext;
use crate::ai::SharedProvider;
use crate::ai::provider::MockProvider;
use crate::config::StageTokenBudgets;
use crate::recorder::{SharedRecorder, SqliteStepRecorder};
use crate::search::tests::StaticExtractor;
use crate::search::{SearchPool, SharedExtractor, SharedSearchProvider};
use crate::storage::Database;
use crate::types::{AnalysisRequest, AnalysisResult, ErrorCategory, RequestDraft};

pub(crate) struct Harness {
    pub request: AnalysisRequest,
    pub upstream: AnalysisResult,
    pub provider: SharedProvider,
    pub search: SearchPool,
    pub extractor: SharedExtractor,
    pub recorder: SharedRecorder,
    pub budgets: StageTokenBudgets,
    pub deadline: Instant,
}

impl Harness {
    /// Segment "consultoria", a provider that always fails and no search backends.
    pub fn new() -> Self {
        let request =
            AnalysisRequest::from_draft(RequestDraft::for_segment("consultoria")).unwrap();
        let upstream = AnalysisResult::new(&request);
        Self {
            request,
            upstream,
            provider: down_provider(),
            search: SearchPool::empty(),
            extractor: Arc::new(StaticExtractor::new(&[])),
            recorder: memory_recorder(),
            budgets: StageTokenBudgets::default(),
            deadline: Instant::now() + Duration::from_secs(60),
        }
    }

    pub fn answering(self, answer: &str) -> Self {
        self.with_provider(Arc::new(MockProvider::ok("mock", answer)))
    }

    pub fn with_provider(mut self, provider: SharedProvider) -> Self {
        self.provider = provider;
        self
    }

    pub fn with_search(mut self, provider: SharedSearchProvider) -> Self {
        self.search = SearchPool::new(vec![provider], Default::default());
        self
    }

    pub fn with_extractor(mut self, extractor: SharedExtractor) -> Self {
        self.extractor = extractor;
        self
    }

    pub fn context(&self) -> StageContext<'_> {
        StageContext {
            request: &self.request,
            upstream: &self.upstream,
            provider: self.provider.as_ref(),
            search: &self.search,
            extractor: self.extractor.as_ref(),
            recorder: self.recorder.as_ref(),
            budgets: &self.budgets,
            call_timeout: Duration::from_secs(5),
            deadline: self.deadline,
        }
    }

    pub fn session(&self) -> &str {
        self.request.session_id.as_str()
    }
}

pub(crate) fn down_provider() -> SharedProvider {
    Arc::new(MockProvider::failing("down", u32::MAX, ErrorCategory::Unavailable))
}

pub(crate) fn memory_recorder() -> SharedRecorder {
    Arc::new(SqliteStepRecorder::new(Arc::new(
        Database::open_in_memory().unwrap(),
    )))
}

/// Wrap `value` the way models usually answer.
pub(crate) fn fenced(value: &serde_json::Value) -> String {
    format!("Segue a análise:\n```json\n{}\n```\nFim.", value)
}
