//! Stage Generators
//!
//! Each stage turns the request plus upstream sections into one section of the
//! result. A stage either produces a live payload or fails; [`run_stage`] is
//! the isolation boundary that turns a failure into the stage's deterministic
//! fallback, so the orchestrator only ever sees a [`StageResult`].

pub mod anti_objection;
pub mod avatar;
pub mod drivers;
pub mod helpers;
pub mod insights;
pub mod pre_pitch;
pub mod predictions;
pub mod research;
pub mod visual_proofs;

pub use anti_objection::AntiObjectionStage;
pub use avatar::AvatarStage;
pub use drivers::DriversStage;
pub use helpers::{GenerationConfig, project_brief, run_generation, run_stage};
pub use insights::InsightsStage;
pub use pre_pitch::PrePitchStage;
pub use predictions::PredictionsStage;
pub use research::ResearchStage;
pub use visual_proofs::VisualProofsStage;

use std::time::Duration;

use serde::Serialize;
use tokio::time::Instant;

use crate::ai::provider::LlmProvider;
use crate::config::StageTokenBudgets;
use crate::recorder::StepRecorder;
use crate::search::{ContentExtractor, SearchPool};
use crate::types::{AnalysisRequest, AnalysisResult, Result, StageKind, StagePayload};

/// Everything a stage may read while it runs.
pub struct StageContext<'a> {
    pub request: &'a AnalysisRequest,
    /// Sections produced so far in this run
    pub upstream: &'a AnalysisResult,
    pub provider: &'a dyn LlmProvider,
    pub search: &'a SearchPool,
    pub extractor: &'a dyn ContentExtractor,
    pub recorder: &'a dyn StepRecorder,
    pub budgets: &'a StageTokenBudgets,
    /// Ceiling for a single external call
    pub call_timeout: Duration,
    /// End of the whole analysis
    pub deadline: Instant,
}

impl StageContext<'_> {
    pub fn segment(&self) -> &str {
        &self.request.segment
    }

    pub fn session_id(&self) -> &str {
        self.request.session_id.as_str()
    }
}

/// One generation stage
#[async_trait::async_trait]
pub trait Stage: Send + Sync {
    type Output: StagePayload + Serialize + Send;

    fn kind(&self) -> StageKind;

    /// Live generation. Errors never escape [`run_stage`].
    async fn generate(&self, context: &StageContext<'_>) -> Result<Self::Output>;

    /// Deterministic payload templated from the request. Same request, same payload.
    fn fallback(&self, request: &AnalysisRequest) -> Self::Output;
}
