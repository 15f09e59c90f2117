//! Pipeline Orchestrator
//!
//! Runs the stage chain for one request and assembles the result:
//!
//! 1. Project data -> 2. Research -> 3. Avatar -> 4. Drivers + Anti-objection
//!    -> 5. Insights -> 6. Optional stages -> 7. Completeness -> 8. Quality -> 9. Store
//!
//! Stage failures never leave [`run_stage`]. Anything that escapes the chain
//! (an error, a panic, the overall timeout or a cancellation) ends in the
//! guaranteed-minimum result instead.

use std::panic::AssertUnwindSafe;
use std::time::{Duration, Instant};

use futures::FutureExt;
use serde_json::{Value, json};
use tracing::{error, info, warn};

use super::cancel::CancellationFlag;
use super::completeness::ensure_completeness;
use super::emergency::guaranteed_minimum;
use super::progress::{ProgressSink, ProgressUpdate};
use super::quality::{SharedQualityController, StructuralQualityController};
use super::stages::{
    AntiObjectionStage, AvatarStage, DriversStage, InsightsStage, PrePitchStage, PredictionsStage,
    ResearchStage, StageContext, VisualProofsStage, run_stage,
};
use crate::ai::SharedProvider;
use crate::config::PipelineConfig;
use crate::constants::{engine, pipeline::OUTER_GUARD_GRACE_SECS};
use crate::recorder::{RecoveryBundle, SharedRecorder, StepCategory};
use crate::search::{SearchPool, SharedExtractor};
use crate::storage::SharedStore;
use crate::types::{
    AnalysisMetadata, AnalysisRequest, AnalysisResult, ForgeError, QualityVerdict, Result,
    StageKind, StageResult, StorageReport, format_minutes_seconds, log_filter_warn,
};

// =============================================================================
// Outcome
// =============================================================================

/// What a run hands back to its caller.
#[derive(Debug)]
pub enum AnalysisOutcome {
    Accepted(AnalysisResult),
    /// The verdict was invalid and below the rejection floor
    Rejected(Box<LowQuality>),
}

#[derive(Debug)]
pub struct LowQuality {
    pub result: AnalysisResult,
    pub verdict: QualityVerdict,
    /// Everything recorded for the session up to the rejection
    pub partial: RecoveryBundle,
}

impl AnalysisOutcome {
    pub fn result(&self) -> &AnalysisResult {
        match self {
            Self::Accepted(result) => result,
            Self::Rejected(rejection) => &rejection.result,
        }
    }

    pub fn into_result(self) -> AnalysisResult {
        match self {
            Self::Accepted(result) => result,
            Self::Rejected(rejection) => rejection.result,
        }
    }

    pub fn is_rejected(&self) -> bool {
        matches!(self, Self::Rejected(_))
    }
}

// =============================================================================
// Orchestrator
// =============================================================================

pub struct Orchestrator {
    provider: SharedProvider,
    search: SearchPool,
    extractor: SharedExtractor,
    recorder: SharedRecorder,
    store: Option<SharedStore>,
    quality: SharedQualityController,
    config: PipelineConfig,
}

impl Orchestrator {
    pub fn new(provider: SharedProvider, extractor: SharedExtractor, recorder: SharedRecorder) -> Self {
        Self {
            provider,
            search: SearchPool::empty(),
            extractor,
            recorder,
            store: None,
            quality: std::sync::Arc::new(StructuralQualityController),
            config: PipelineConfig::default(),
        }
    }

    pub fn with_search(mut self, search: SearchPool) -> Self {
        self.search = search;
        self
    }

    pub fn with_store(mut self, store: SharedStore) -> Self {
        self.store = Some(store);
        self
    }

    pub fn with_quality(mut self, quality: SharedQualityController) -> Self {
        self.quality = quality;
        self
    }

    pub fn with_config(mut self, config: PipelineConfig) -> Self {
        self.config = config;
        self
    }

    pub fn recorder(&self) -> &SharedRecorder {
        &self.recorder
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    /// Run the full analysis. Never fails: the worst case is the guaranteed minimum.
    pub async fn run(
        &self,
        request: &AnalysisRequest,
        progress: &dyn ProgressSink,
        cancel: &CancellationFlag,
    ) -> AnalysisOutcome {
        let started = Instant::now();
        info!(
            "Starting analysis for segment '{}' (session {})",
            request.segment, request.session_id
        );

        let guard = self.config.analysis_timeout() + Duration::from_secs(OUTER_GUARD_GRACE_SECS);
        let pipeline = AssertUnwindSafe(self.run_pipeline(request, progress, cancel, started))
            .catch_unwind();

        let failure = match tokio::time::timeout(guard, pipeline).await {
            Ok(Ok(Ok(outcome))) => return outcome,
            Ok(Ok(Err(e))) => e.to_string(),
            Ok(Err(panic)) => format!("pipeline panicked: {}", panic_message(panic.as_ref())),
            Err(_) => ForgeError::timeout("analysis", guard).to_string(),
        };

        AnalysisOutcome::Accepted(self.emergency(request, &failure, started, cancel))
    }

    async fn run_pipeline(
        &self,
        request: &AnalysisRequest,
        progress: &dyn ProgressSink,
        cancel: &CancellationFlag,
        started: Instant,
    ) -> Result<AnalysisOutcome> {
        let session = request.session_id.as_str();
        let deadline = tokio::time::Instant::now() + self.config.analysis_timeout();
        let mut result = AnalysisResult::new(request);

        self.record(
            session,
            StageKind::ProjectData.name(),
            &serde_json::to_value(request)?,
            StepCategory::Analysis,
        );
        self.report(progress, session, 1, "Dados do projeto salvos", None);

        // Required chain
        cancel.check(StageKind::Research.name())?;
        let research = run_stage(&ResearchStage, &self.context(request, &result, deadline)).await;
        let research = settle(&mut result.metadata, StageKind::Research, research);
        let details = json!({
            "fontes": research.sources.len(),
            "documentos": research.extracted.len(),
        });
        result.web_research = Some(research);
        self.report(progress, session, 3, "Pesquisa web concluída", Some(details));

        cancel.check(StageKind::Avatar.name())?;
        let avatar = run_stage(&AvatarStage, &self.context(request, &result, deadline)).await;
        result.avatar = Some(settle(&mut result.metadata, StageKind::Avatar, avatar));
        self.report(progress, session, 5, "Avatar ultra-detalhado criado", None);

        cancel.check(StageKind::Drivers.name())?;
        let (drivers, anti_objection) = {
            let context = self.context(request, &result, deadline);
            if self.config.parallel_branches {
                tokio::join!(
                    run_stage(&DriversStage, &context),
                    run_stage(&AntiObjectionStage, &context)
                )
            } else {
                let drivers = run_stage(&DriversStage, &context).await;
                cancel.check(StageKind::AntiObjection.name())?;
                (drivers, run_stage(&AntiObjectionStage, &context).await)
            }
        };
        result.drivers = Some(settle(&mut result.metadata, StageKind::Drivers, drivers));
        self.report(progress, session, 7, "Drivers mentais customizados", None);
        result.anti_objection = Some(settle(
            &mut result.metadata,
            StageKind::AntiObjection,
            anti_objection,
        ));
        self.report(progress, session, 9, "Sistema anti-objeção construído", None);

        cancel.check(StageKind::Insights.name())?;
        let insights = run_stage(&InsightsStage, &self.context(request, &result, deadline)).await;
        result.insights = Some(settle(&mut result.metadata, StageKind::Insights, insights));
        self.report(progress, session, 11, "Insights exclusivos consolidados", None);

        // Optional stages
        if self.config.skip_optional_stages {
            self.report(progress, session, 13, "Componentes opcionais ignorados", None);
        } else {
            self.report(progress, session, 12, "Gerando pré-pitch invisível...", None);

            cancel.check(StageKind::PrePitch.name())?;
            let pre_pitch = run_stage(&PrePitchStage, &self.context(request, &result, deadline)).await;
            result.pre_pitch = Some(settle(&mut result.metadata, StageKind::PrePitch, pre_pitch));

            cancel.check(StageKind::VisualProofs.name())?;
            let proofs = run_stage(&VisualProofsStage, &self.context(request, &result, deadline)).await;
            result.visual_proofs = Some(settle(&mut result.metadata, StageKind::VisualProofs, proofs));

            cancel.check(StageKind::FuturePredictions.name())?;
            let predictions =
                run_stage(&PredictionsStage, &self.context(request, &result, deadline)).await;
            result.future_predictions = Some(settle(
                &mut result.metadata,
                StageKind::FuturePredictions,
                predictions,
            ));

            self.report(progress, session, 13, "Componentes opcionais adicionados", None);
        }

        ensure_completeness(&mut result, request);

        let verdict = match self.quality.evaluate(&result).await {
            Ok(verdict) => verdict,
            Err(e) => {
                warn!("Quality validation failed, applying permissive verdict: {}", e);
                QualityVerdict::permissive(format!("simplified validation applied: {}", e))
            }
        };
        result.metadata.quality_guaranteed = verdict.valid;
        result.metadata.quality = Some(verdict.clone());

        if verdict.rejects() {
            warn!(
                "Analysis rejected: quality score {:.1} with {} errors",
                verdict.quality_score,
                verdict.errors.len()
            );
            let partial = self.consolidate(session).unwrap_or_default();
            return Ok(AnalysisOutcome::Rejected(Box::new(LowQuality {
                result,
                verdict,
                partial,
            })));
        }

        self.finalize_metadata(&mut result, request, started);
        self.persist(&mut result).await;

        self.record(
            session,
            "analysis_complete",
            &json!({
                "componentes": result.metadata.components_generated,
                "degradados": result.metadata.degraded_stages,
                "quality_score": verdict.quality_score,
            }),
            StepCategory::Analysis,
        );
        result.metadata.recovery = self.consolidate(session).map(|b| b.summary());

        info!(
            "Analysis completed in {} ({} sections, {} degraded)",
            result.metadata.processing_time_formatted,
            result.metadata.components_generated.len(),
            result.metadata.degraded_stages.len()
        );
        Ok(AnalysisOutcome::Accepted(result))
    }

    fn context<'a>(
        &'a self,
        request: &'a AnalysisRequest,
        upstream: &'a AnalysisResult,
        deadline: tokio::time::Instant,
    ) -> StageContext<'a> {
        StageContext {
            request,
            upstream,
            provider: self.provider.as_ref(),
            search: &self.search,
            extractor: self.extractor.as_ref(),
            recorder: self.recorder.as_ref(),
            budgets: &self.config.max_tokens,
            call_timeout: self.config.stage_timeout(),
            deadline,
        }
    }

    fn finalize_metadata(&self, result: &mut AnalysisResult, request: &AnalysisRequest, started: Instant) {
        let elapsed = started.elapsed();
        let metadata = &mut result.metadata;
        metadata.version = engine::VERSION.to_string();
        metadata.engine = engine::STANDARD.to_string();
        metadata.processing_time_seconds = elapsed.as_secs_f64();
        metadata.processing_time_formatted = format_minutes_seconds(elapsed);
        metadata.input_data = Some(request.input_summary());
        result.metadata.components_generated = result.present_sections();
    }

    /// Best-effort save. A store failure becomes a warning on the result.
    async fn persist(&self, result: &mut AnalysisResult) {
        let Some(store) = &self.store else {
            return;
        };
        let report = match store.save(result).await {
            Ok(outcome) => outcome.report(),
            Err(e) => {
                warn!("Failed to store analysis: {}", e);
                StorageReport {
                    database_warning: Some(e.to_string()),
                    ..Default::default()
                }
            }
        };
        result.metadata.storage = Some(report);
    }

    fn emergency(
        &self,
        request: &AnalysisRequest,
        failure: &str,
        started: Instant,
        cancel: &CancellationFlag,
    ) -> AnalysisResult {
        let session = request.session_id.as_str();
        if cancel.is_cancelled() {
            warn!("Analysis {} cancelled: {}", session, failure);
        } else {
            error!("Pipeline failed, returning guaranteed minimum: {}", failure);
        }
        log_filter_warn(
            self.recorder.record_error(
                session,
                "pipeline",
                failure,
                &json!({ "segmento": request.segment, "emergency": true }),
            ),
            "Failed to record pipeline failure",
        );

        let mut result = guaranteed_minimum(request, failure, started.elapsed());
        result.metadata.cancelled = cancel.is_cancelled();
        result.metadata.recovery = self.consolidate(session).map(|b| b.summary());
        result
    }

    fn report(
        &self,
        sink: &dyn ProgressSink,
        session: &str,
        step: u32,
        message: &str,
        details: Option<Value>,
    ) {
        let mut update = ProgressUpdate::new(session, step, message);
        if let Some(details) = details {
            update = update.with_details(details);
        }
        info!("[{}/{}] {}", update.step, update.total_steps, message);
        sink.report(&update);
        self.record(
            session,
            "progress",
            &json!({ "step": step, "message": message, "details": update.details }),
            StepCategory::Progress,
        );
    }

    fn record(&self, session: &str, stage: &str, payload: &Value, category: StepCategory) {
        log_filter_warn(
            self.recorder.record(session, stage, payload, category),
            "Failed to record step",
        );
    }

    fn consolidate(&self, session: &str) -> Option<RecoveryBundle> {
        log_filter_warn(self.recorder.consolidate(session), "Failed to consolidate steps")
    }
}

/// Store the stage's degradation reason, if any, and hand back its payload.
fn settle<T>(metadata: &mut AnalysisMetadata, kind: StageKind, outcome: StageResult<T>) -> T {
    if let Some(reason) = outcome.reason() {
        metadata
            .degraded_stages
            .insert(kind.wire_key().to_string(), reason.to_string());
    }
    outcome.into_payload()
}

fn panic_message(panic: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};

    use async_trait::async_trait;

    use crate::ai::provider::{LlmProvider, LlmResponse, MockProvider};
    use crate::pipeline::progress::NoProgress;
    use crate::pipeline::quality::QualityController;
    use crate::pipeline::stages::Stage;
    use crate::pipeline::test_support::{fenced, memory_recorder};
    use crate::search::tests::StaticExtractor;
    use crate::storage::{LocalFileTier, TieredStore};
    use crate::types::{ErrorCategory, ProcessingMode, RequestDraft};

    struct PanickingProvider;

    #[async_trait]
    impl LlmProvider for PanickingProvider {
        async fn generate(&self, _prompt: &str, _max_tokens: usize) -> Result<LlmResponse> {
            panic!("provider exploded")
        }

        fn name(&self) -> &str {
            "panicking"
        }

        fn model(&self) -> &str {
            "none"
        }

        async fn health_check(&self) -> Result<bool> {
            Ok(false)
        }
    }

    /// Never answers.
    struct HangingProvider;

    #[async_trait]
    impl LlmProvider for HangingProvider {
        async fn generate(&self, _prompt: &str, _max_tokens: usize) -> Result<LlmResponse> {
            std::future::pending().await
        }

        fn name(&self) -> &str {
            "hanging"
        }

        fn model(&self) -> &str {
            "none"
        }

        async fn health_check(&self) -> Result<bool> {
            Ok(true)
        }
    }

    /// Answers with the first scripted reply whose marker appears in the prompt.
    struct RoutingProvider {
        routes: Vec<(&'static str, String)>,
    }

    #[async_trait]
    impl LlmProvider for RoutingProvider {
        async fn generate(&self, prompt: &str, _max_tokens: usize) -> Result<LlmResponse> {
            self.routes
                .iter()
                .find(|(marker, _)| prompt.contains(marker))
                .map(|(_, answer)| LlmResponse::text(answer.clone()))
                .ok_or_else(|| ForgeError::llm_with_category(ErrorCategory::BadRequest, "no route"))
        }

        fn name(&self) -> &str {
            "routing"
        }

        fn model(&self) -> &str {
            "scripted"
        }

        async fn health_check(&self) -> Result<bool> {
            Ok(true)
        }
    }

    struct FixedVerdict(Option<QualityVerdict>);

    #[async_trait]
    impl QualityController for FixedVerdict {
        async fn evaluate(&self, _result: &AnalysisResult) -> Result<QualityVerdict> {
            self.0
                .clone()
                .ok_or_else(|| ForgeError::Pipeline("quality service offline".into()))
        }
    }

    fn request(segment: &str) -> AnalysisRequest {
        AnalysisRequest::from_draft(RequestDraft::for_segment(segment)).unwrap()
    }

    fn orchestrator(provider: SharedProvider) -> Orchestrator {
        Orchestrator::new(
            provider,
            Arc::new(StaticExtractor::new(&[])),
            memory_recorder(),
        )
    }

    fn down() -> Arc<MockProvider> {
        Arc::new(MockProvider::failing("down", u32::MAX, ErrorCategory::Unavailable))
    }

    #[tokio::test]
    async fn test_failing_provider_yields_exact_fallbacks() {
        let provider = down();
        let orchestrator = orchestrator(provider.clone());
        let request = request("consultoria");

        let outcome = orchestrator
            .run(&request, &NoProgress, &CancellationFlag::new())
            .await;
        assert!(!outcome.is_rejected());
        let result = outcome.into_result();

        assert_eq!(result.web_research, Some(ResearchStage.fallback(&request)));
        assert_eq!(result.avatar, Some(AvatarStage.fallback(&request)));
        assert_eq!(result.drivers, Some(DriversStage.fallback(&request)));
        assert_eq!(result.anti_objection, Some(AntiObjectionStage.fallback(&request)));
        assert_eq!(result.insights, Some(InsightsStage.fallback(&request)));
        assert_eq!(result.pre_pitch, Some(PrePitchStage.fallback(&request)));
        assert_eq!(result.visual_proofs, Some(VisualProofsStage.fallback(&request)));
        assert_eq!(result.future_predictions, Some(PredictionsStage.fallback(&request)));

        assert_eq!(result.metadata.degraded_stages.len(), 8);
        assert!(!result.is_emergency());
        assert_eq!(result.metadata.engine, "resilient_pipeline");
        assert_eq!(result.metadata.components_generated.len(), 9);
        assert!(result.completeness.as_ref().unwrap().fully_complete);
        assert_eq!(provider.calls(), 7);

        let session = request.session_id.as_str();
        let first = orchestrator.recorder().consolidate(session).unwrap();
        let second = orchestrator.recorder().consolidate(session).unwrap();
        assert_eq!(first, second);
        assert_eq!(first.errors.len(), 8);
        assert_eq!(result.metadata.recovery.unwrap().total_steps, first.total_steps);
    }

    #[tokio::test]
    async fn test_panicking_provider_reaches_guaranteed_minimum() {
        let orchestrator = orchestrator(Arc::new(PanickingProvider));
        let request = request("odontologia");

        let result = orchestrator
            .run(&request, &NoProgress, &CancellationFlag::new())
            .await
            .into_result();

        assert!(result.is_emergency());
        assert_eq!(result.metadata.engine, "guaranteed_minimum");
        assert_eq!(result.present_sections().len(), 4);
        assert_eq!(result.avatar, Some(AvatarStage.fallback(&request)));
        assert_eq!(result.insights, Some(InsightsStage.fallback(&request)));
        assert!(result.drivers.is_none());
        assert!(result.metadata.failure.unwrap().contains("provider exploded"));

        let bundle = orchestrator
            .recorder()
            .consolidate(request.session_id.as_str())
            .unwrap();
        assert!(bundle.errors.iter().any(|e| e.stage == "pipeline"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_stalled_provider_times_out_per_stage() {
        let orchestrator = orchestrator(Arc::new(HangingProvider)).with_config(PipelineConfig {
            stage_timeout_secs: 5,
            ..PipelineConfig::default()
        });
        let request = request("consultoria");
        let started = tokio::time::Instant::now();

        let result = orchestrator
            .run(&request, &NoProgress, &CancellationFlag::new())
            .await
            .into_result();

        assert_eq!(result.metadata.processing_mode, ProcessingMode::Standard);
        assert!(!result.is_emergency());
        assert_eq!(result.metadata.degraded_stages.len(), 8);
        for kind in [
            StageKind::Avatar,
            StageKind::Drivers,
            StageKind::AntiObjection,
            StageKind::Insights,
            StageKind::PrePitch,
            StageKind::VisualProofs,
            StageKind::FuturePredictions,
        ] {
            let reason = &result.metadata.degraded_stages[kind.wire_key()];
            assert!(reason.starts_with("Timeout"), "{kind}: {reason}");
        }
        assert_eq!(result.avatar, Some(AvatarStage.fallback(&request)));
        assert!(result.completeness.as_ref().unwrap().fully_complete);

        // Seven model calls at five seconds each
        assert!(started.elapsed() <= Duration::from_secs(40));
    }

    #[tokio::test]
    async fn test_segment_only_request_end_to_end() {
        let draft: RequestDraft =
            serde_json::from_value(json!({"segmento": "consultoria financeira"})).unwrap();
        let request = AnalysisRequest::from_draft(draft).unwrap();

        let result = orchestrator(down())
            .run(&request, &NoProgress, &CancellationFlag::new())
            .await
            .into_result();
        let value = serde_json::to_value(&result).unwrap();

        let name = value["avatar_ultra_detalhado"]["nome_ficticio"].as_str().unwrap();
        assert!(name.contains("consultoria financeira"));
        assert!(value["insights_exclusivos"].as_array().unwrap().len() >= 5);
        let session = value["metadata"]["session_id"].as_str().unwrap();
        let pattern = regex::Regex::new(r"^session_\d+_[0-9a-f]+$").unwrap();
        assert!(pattern.is_match(session));
        assert_eq!(value["completude_documento"]["taxa_completude"], 100.0);
    }

    #[tokio::test]
    async fn test_live_answers_are_kept() {
        let provider = RoutingProvider {
            routes: vec![
                (
                    "construir o avatar do cliente ideal",
                    fenced(&json!({
                        "nome_ficticio": "Carla, a planejadora",
                        "dores_viscerais": ["Dívidas", "Falta de controle", "Ansiedade"],
                        "desejos_secretos": ["Aposentar cedo", "Viajar", "Paz"]
                    })),
                ),
                (
                    "insights exclusivos",
                    fenced(&json!(["a", "b", "c", "d", "e"])),
                ),
            ],
        };
        let orchestrator = orchestrator(Arc::new(provider));
        let request = request("consultoria financeira");

        let result = orchestrator
            .run(&request, &NoProgress, &CancellationFlag::new())
            .await
            .into_result();

        assert_eq!(result.avatar.as_ref().unwrap().fictional_name, "Carla, a planejadora");
        assert_eq!(result.insights.as_ref().unwrap().len(), 5);
        let degraded = &result.metadata.degraded_stages;
        assert!(!degraded.contains_key("avatar_ultra_detalhado"));
        assert!(!degraded.contains_key("insights_exclusivos"));
        assert!(degraded.contains_key("drivers_mentais_customizados"));
    }

    #[tokio::test]
    async fn test_cancellation_returns_guaranteed_minimum() {
        let provider = down();
        let orchestrator = orchestrator(provider.clone());
        let request = request("advocacia");
        let cancel = CancellationFlag::new();
        cancel.cancel();

        let result = orchestrator.run(&request, &NoProgress, &cancel).await.into_result();

        assert!(result.is_emergency());
        assert!(result.metadata.cancelled);
        assert_eq!(result.present_sections().len(), 4);
        assert_eq!(provider.calls(), 0);
    }

    #[tokio::test]
    async fn test_progress_order_is_preserved() {
        for parallel in [true, false] {
            let steps = Mutex::new(Vec::new());
            let sink = |u: &ProgressUpdate| steps.lock().unwrap().push(u.step);
            let orchestrator = orchestrator(down()).with_config(PipelineConfig {
                parallel_branches: parallel,
                ..PipelineConfig::default()
            });

            orchestrator
                .run(&request("moda"), &sink, &CancellationFlag::new())
                .await;
            assert_eq!(*steps.lock().unwrap(), vec![1, 3, 5, 7, 9, 11, 12, 13]);
        }
    }

    #[tokio::test]
    async fn test_skipping_optional_stages() {
        let orchestrator = orchestrator(down()).with_config(PipelineConfig {
            skip_optional_stages: true,
            ..PipelineConfig::default()
        });
        let result = orchestrator
            .run(&request("moda"), &NoProgress, &CancellationFlag::new())
            .await
            .into_result();
        assert!(result.pre_pitch.is_none());
        assert!(result.future_predictions.is_none());
        assert!(result.metadata.all_required_sections_present);
    }

    #[tokio::test]
    async fn test_low_quality_is_rejected_with_partial_bundle() {
        let verdict = QualityVerdict {
            valid: false,
            quality_score: 12.0,
            errors: vec!["incoherent".into()],
            ..QualityVerdict::default()
        };
        let orchestrator =
            orchestrator(down()).with_quality(Arc::new(FixedVerdict(Some(verdict))));
        let request = request("estética");

        let outcome = orchestrator
            .run(&request, &NoProgress, &CancellationFlag::new())
            .await;
        let AnalysisOutcome::Rejected(rejection) = outcome else {
            panic!("expected a rejection");
        };
        assert_eq!(rejection.verdict.quality_score, 12.0);
        assert_eq!(rejection.partial.session_id, request.session_id.as_str());
        assert!(rejection.partial.latest.contains_key("avatar"));
    }

    #[tokio::test]
    async fn test_invalid_verdict_at_floor_is_accepted() {
        let verdict = QualityVerdict {
            valid: false,
            quality_score: 30.0,
            ..QualityVerdict::default()
        };
        let outcome = orchestrator(down())
            .with_quality(Arc::new(FixedVerdict(Some(verdict))))
            .run(&request("estética"), &NoProgress, &CancellationFlag::new())
            .await;
        assert!(!outcome.is_rejected());
    }

    #[tokio::test]
    async fn test_failing_quality_controller_is_permissive() {
        let result = orchestrator(down())
            .with_quality(Arc::new(FixedVerdict(None)))
            .run(&request("estética"), &NoProgress, &CancellationFlag::new())
            .await
            .into_result();
        let quality = result.metadata.quality.unwrap();
        assert!(quality.valid);
        assert_eq!(quality.quality_score, 75.0);
        assert!(quality.warnings[0].contains("quality service offline"));
    }

    #[tokio::test]
    async fn test_result_is_stored_locally() {
        let dir = tempfile::tempdir().unwrap();
        let store = TieredStore::local_only(LocalFileTier::new(dir.path()));
        let result = orchestrator(down())
            .with_store(Arc::new(store))
            .run(&request("imobiliária"), &NoProgress, &CancellationFlag::new())
            .await
            .into_result();

        let storage = result.metadata.storage.unwrap();
        assert!(storage.local_only);
        assert!(storage.local_files.is_some());
    }
}
