use axum::{
    Json,
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use tracing::{error, warn};

use super::{ApiError, AppState};
use crate::constants::{engine, server};
use crate::pipeline::{AnalysisOutcome, CancellationFlag, completeness_report, score_structure};
use crate::storage::{SharedStore, is_valid_id};
use crate::types::{AnalysisRequest, AnalysisResult, RequestDraft};

type ApiResult = std::result::Result<Response, ApiError>;

/// Cancels the run when the client goes away before it finishes.
struct CancelOnDrop(CancellationFlag);

impl Drop for CancelOnDrop {
    fn drop(&mut self) {
        self.0.cancel();
    }
}

pub async fn analyze(
    State(state): State<AppState>,
    Json(draft): Json<RequestDraft>,
) -> ApiResult {
    let request = AnalysisRequest::from_draft(draft)?;
    let session_id = request.session_id.to_string();

    let tracker = state.progress.tracker(&session_id);
    let cancel = CancellationFlag::new();
    let _guard = CancelOnDrop(cancel.clone());
    let orchestrator = state.orchestrator.clone();

    let task = tokio::spawn(async move {
        orchestrator.run(&request, tracker.as_ref(), &cancel).await
    });

    match task.await {
        Ok(AnalysisOutcome::Accepted(result)) => {
            Ok((StatusCode::OK, Json(result)).into_response())
        }
        Ok(AnalysisOutcome::Rejected(low)) => {
            warn!(
                "Analysis {} rejected with score {:.1}",
                session_id, low.verdict.quality_score
            );
            let body = json!({
                "error": "low_quality",
                "message": "Analysis did not reach the minimum quality",
                "session_id": session_id,
                "verdict": low.verdict,
                "partial_results": low.partial,
            });
            Ok((StatusCode::UNPROCESSABLE_ENTITY, Json(body)).into_response())
        }
        Err(e) => Ok(recover_partial(&state, &session_id, &e.to_string())),
    }
}

/// Map a crashed run to 206 with whatever the recorder captured, or 500.
pub(crate) fn recover_partial(state: &AppState, session_id: &str, message: &str) -> Response {
    error!("Analysis task for {} failed: {}", session_id, message);

    let bundle = state
        .recorder
        .consolidate(session_id)
        .inspect_err(|e| warn!("Recovery of {} failed: {}", session_id, e))
        .ok()
        .filter(|bundle| !bundle.is_empty());

    match bundle {
        Some(bundle) => {
            let body = json!({
                "status": "partial",
                "message": "Analysis stopped early; returning recorded steps",
                "session_id": session_id,
                "partial_results": bundle,
            });
            (StatusCode::PARTIAL_CONTENT, Json(body)).into_response()
        }
        None => {
            let body = json!({
                "error": "analysis_failed",
                "message": message,
                "debug_info": {
                    "error_type": "task_failure",
                    "message": message,
                    "session_id": session_id,
                    "timestamp": Utc::now(),
                },
            });
            (StatusCode::INTERNAL_SERVER_ERROR, Json(body)).into_response()
        }
    }
}

pub async fn status(State(state): State<AppState>) -> Json<Value> {
    Json(status_snapshot(&state).await)
}

/// Health of both provider pools, the store and the recorder.
pub async fn status_snapshot(state: &AppState) -> Value {
    let ai_available = state.providers.available_count();
    let storage = match &state.store {
        Some(store) => Some(store.health().await),
        None => None,
    };
    let storage_ok = storage.as_ref().is_none_or(|h| h.healthy);
    let overall = if ai_available > 0 && storage_ok {
        "healthy"
    } else {
        "degraded"
    };

    json!({
        "status": overall,
        "version": engine::VERSION,
        "ai_providers": {
            "available": ai_available,
            "providers": state.providers.status(),
        },
        "search_providers": {
            "available": state.search.available_count(),
            "providers": state.search.status(),
        },
        "storage": storage,
        "recorder": state.recorder.backend(),
        "active_sessions": state.progress.len(),
        "timestamp": Utc::now(),
    })
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProviderPool {
    Ai,
    Search,
}

#[derive(Debug, Deserialize)]
pub struct ResetRequest {
    #[serde(rename = "type")]
    pool: ProviderPool,
    #[serde(default)]
    provider: Option<String>,
}

pub async fn reset_providers(
    State(state): State<AppState>,
    Json(payload): Json<ResetRequest>,
) -> ApiResult {
    let provider = payload.provider.as_deref();
    let known = |name: &str| match payload.pool {
        ProviderPool::Ai => state.providers.has_provider(name),
        ProviderPool::Search => state.search.has_provider(name),
    };
    if let Some(name) = provider
        && !known(name)
    {
        return Err(ApiError::not_found(format!("Unknown provider '{}'", name)));
    }

    let reset = match payload.pool {
        ProviderPool::Ai => state.providers.reset_errors(provider),
        ProviderPool::Search => state.search.reset_errors(provider),
    };

    Ok(Json(json!({
        "success": true,
        "type": payload.pool,
        "provider": provider,
        "reset": reset,
    }))
    .into_response())
}

pub async fn validate_analysis(Json(body): Json<Value>) -> ApiResult {
    let result: AnalysisResult = serde_json::from_value(body)
        .map_err(|e| ApiError::bad_request(format!("Not an analysis document: {}", e)))?;

    let verdict = score_structure(&result);
    let completeness = completeness_report(&result);
    Ok(Json(json!({
        "accepted": !verdict.rejects(),
        "verdict": verdict,
        "completeness": completeness,
    }))
    .into_response())
}

#[derive(Debug, Default, Deserialize)]
pub struct ListParams {
    limit: Option<usize>,
    offset: Option<usize>,
}

fn require_store(state: &AppState) -> std::result::Result<&SharedStore, ApiError> {
    state
        .store
        .as_ref()
        .ok_or_else(|| ApiError::unavailable("No analysis store configured"))
}

pub async fn list_analyses(
    State(state): State<AppState>,
    Query(params): Query<ListParams>,
) -> ApiResult {
    let store = require_store(&state)?;
    let limit = params
        .limit
        .unwrap_or(server::DEFAULT_LIST_LIMIT)
        .clamp(1, server::MAX_LIST_LIMIT);
    let offset = params.offset.unwrap_or(0);

    let analyses = store.list(limit, offset).await?;
    Ok(Json(json!({
        "count": analyses.len(),
        "limit": limit,
        "offset": offset,
        "analyses": analyses,
    }))
    .into_response())
}

pub async fn get_analysis(State(state): State<AppState>, Path(id): Path<String>) -> ApiResult {
    if !is_valid_id(&id) {
        return Err(ApiError::bad_request(format!("Invalid analysis id '{}'", id)));
    }
    let store = require_store(&state)?;
    match store.get(&id).await? {
        Some(record) => Ok(Json(record).into_response()),
        None => Err(ApiError::not_found(format!("Analysis '{}' not found", id))),
    }
}

pub async fn stats(State(state): State<AppState>) -> ApiResult {
    let store = require_store(&state)?;
    Ok(Json(store.stats().await?).into_response())
}

pub async fn progress(
    State(state): State<AppState>,
    Path(session_id): Path<String>,
) -> ApiResult {
    let tracker = state
        .progress
        .get(&session_id)
        .ok_or_else(|| ApiError::not_found(format!("No progress for session '{}'", session_id)))?;

    let latest = tracker.latest();
    Ok(Json(json!({
        "session_id": session_id,
        "finished": tracker.is_finished(),
        "fraction": latest.as_ref().map_or(0.0, |u| u.fraction()),
        "latest": latest,
        "history": tracker.history(),
    }))
    .into_response())
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use axum::{
        Router,
        body::Body,
        http::{Method, Request},
    };
    use tempfile::TempDir;
    use tower::ServiceExt;

    use super::*;
    use crate::ai::provider::MockProvider;
    use crate::ai::{ChainConfig, ProviderChain, SharedProvider};
    use crate::config::PipelineConfig;
    use crate::pipeline::test_support::memory_recorder;
    use crate::pipeline::{Orchestrator, ProgressRegistry, QualityController};
    use crate::recorder::StepCategory;
    use crate::search::SearchPool;
    use crate::search::tests::StaticExtractor;
    use crate::server::build_router;
    use crate::storage::{LocalFileTier, TieredStore};
    use crate::types::{ErrorCategory, QualityVerdict, Result};

    struct FailingQuality;

    #[async_trait::async_trait]
    impl QualityController for FailingQuality {
        async fn evaluate(&self, _result: &AnalysisResult) -> Result<QualityVerdict> {
            Ok(QualityVerdict {
                valid: false,
                quality_score: 10.0,
                errors: vec!["empty".into()],
                ..QualityVerdict::default()
            })
        }
    }

    struct Fixture {
        state: AppState,
        _dir: TempDir,
    }

    fn fixture(quality: Option<Arc<dyn QualityController>>) -> Fixture {
        let dir = TempDir::new().unwrap();
        let mock: SharedProvider =
            Arc::new(MockProvider::failing("primary", u32::MAX, ErrorCategory::Network));
        let providers = ProviderChain::from_providers(vec![mock], ChainConfig::default());
        let recorder = memory_recorder();
        let store: SharedStore = Arc::new(TieredStore::local_only(LocalFileTier::new(dir.path())));
        let config = PipelineConfig {
            parallel_branches: false,
            ..PipelineConfig::default()
        };

        let mut orchestrator = Orchestrator::new(
            Arc::new(providers.clone()),
            Arc::new(StaticExtractor::new(&[])),
            recorder.clone(),
        )
        .with_store(store.clone())
        .with_config(config);
        if let Some(quality) = quality {
            orchestrator = orchestrator.with_quality(quality);
        }

        Fixture {
            state: AppState {
                providers,
                search: SearchPool::empty(),
                recorder,
                store: Some(store),
                orchestrator: Arc::new(orchestrator),
                progress: Arc::new(ProgressRegistry::new()),
            },
            _dir: dir,
        }
    }

    fn app(fixture: &Fixture) -> Router {
        build_router(fixture.state.clone(), &[])
    }

    async fn json_request(
        app: Router,
        method: Method,
        path: &str,
        body: Option<Value>,
    ) -> (StatusCode, Value) {
        let body = match body {
            Some(json) => Body::from(serde_json::to_string(&json).unwrap()),
            None => Body::empty(),
        };

        let req = Request::builder()
            .method(method)
            .uri(path)
            .header("content-type", "application/json")
            .body(body)
            .unwrap();
        let resp = app.oneshot(req).await.unwrap();
        let status = resp.status();
        let body_bytes = axum::body::to_bytes(resp.into_body(), 4 * 1024 * 1024)
            .await
            .unwrap();
        let json: Value = serde_json::from_slice(&body_bytes).unwrap_or(json!({}));
        (status, json)
    }

    #[tokio::test]
    async fn test_analyze_without_segment_is_rejected_before_any_stage() {
        let fixture = fixture(None);
        let (status, json) = json_request(
            app(&fixture),
            Method::POST,
            "/analyze",
            Some(json!({"produto": "Curso", "session_id": "session_1_abcdef01"})),
        )
        .await;

        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(json["error"], "validation");
        assert!(fixture.state.recorder.sessions().unwrap().is_empty());
        assert!(fixture.state.progress.is_empty());
    }

    #[tokio::test]
    async fn test_analyze_rejects_unsafe_session_id() {
        let fixture = fixture(None);
        let (status, json) = json_request(
            app(&fixture),
            Method::POST,
            "/analyze",
            Some(json!({"segmento": "pet", "session_id": "client.a"})),
        )
        .await;

        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(json["error"], "validation");
        assert!(fixture.state.recorder.sessions().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_analyze_returns_complete_result_with_providers_down() {
        let fixture = fixture(None);
        let (status, json) = json_request(
            app(&fixture),
            Method::POST,
            "/analyze",
            Some(json!({"segmento": "consultoria financeira", "preco": 497.0})),
        )
        .await;

        assert_eq!(status, StatusCode::OK);
        for key in [
            "projeto_dados",
            "pesquisa_web_massiva",
            "avatar_ultra_detalhado",
            "insights_exclusivos",
        ] {
            assert!(json.get(key).is_some(), "missing {key}");
        }
        assert_eq!(json["metadata"]["processing_mode"], "standard");
        assert_eq!(json["metadata"]["all_required_sections_present"], true);
        assert_eq!(json["metadata"]["storage"]["local_only"], true);

        let session = json["metadata"]["session_id"].as_str().unwrap().to_string();
        let (status, progress) =
            json_request(app(&fixture), Method::GET, &format!("/progress/{session}"), None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(progress["finished"], true);
        assert_eq!(progress["latest"]["step"], 13);
    }

    #[tokio::test]
    async fn test_low_quality_is_422_with_partial_results() {
        let fixture = fixture(Some(Arc::new(FailingQuality)));
        let (status, json) = json_request(
            app(&fixture),
            Method::POST,
            "/analyze",
            Some(json!({"segmento": "odontologia"})),
        )
        .await;

        assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
        assert_eq!(json["error"], "low_quality");
        assert_eq!(json["verdict"]["quality_score"], 10.0);
        assert!(json["partial_results"]["total_steps"].as_u64().unwrap() > 0);
    }

    #[tokio::test]
    async fn test_crashed_task_recovers_recorded_steps() {
        let fixture = fixture(None);
        fixture
            .state
            .recorder
            .record("session_9_deadbeef", "avatar", &json!({"nome": "Ana"}), StepCategory::Avatar)
            .unwrap();

        let resp = recover_partial(&fixture.state, "session_9_deadbeef", "task panicked");
        assert_eq!(resp.status(), StatusCode::PARTIAL_CONTENT);

        let resp = recover_partial(&fixture.state, "session_unknown", "task panicked");
        assert_eq!(resp.status(), StatusCode::INTERNAL_SERVER_ERROR);
    }

    #[tokio::test]
    async fn test_status_reports_pools_and_store() {
        let fixture = fixture(None);
        let (status, json) = json_request(app(&fixture), Method::GET, "/status", None).await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(json["ai_providers"]["available"], 1);
        assert!(json["ai_providers"]["providers"]["primary"].is_object());
        assert_eq!(json["search_providers"]["available"], 0);
        assert_eq!(json["storage"]["healthy"], true);
        assert_eq!(json["recorder"], "sqlite");
    }

    #[tokio::test]
    async fn test_reset_providers() {
        let fixture = fixture(None);
        let (status, json) = json_request(
            app(&fixture),
            Method::POST,
            "/reset_providers",
            Some(json!({"type": "ai"})),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(json["reset"], 0);

        let (status, _) = json_request(
            app(&fixture),
            Method::POST,
            "/reset_providers",
            Some(json!({"type": "search", "provider": "bing"})),
        )
        .await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_validate_analysis() {
        let fixture = fixture(None);
        let (status, json) = json_request(
            app(&fixture),
            Method::POST,
            "/validate_analysis",
            Some(json!({"insights_exclusivos": ["a"]})),
        )
        .await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(json["accepted"], false);
        assert_eq!(json["verdict"]["valid"], false);
        assert_eq!(json["completeness"]["present_count"], 1);

        let (status, _) = json_request(
            app(&fixture),
            Method::POST,
            "/validate_analysis",
            Some(json!({"insights_exclusivos": "not a list"})),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_list_get_and_stats() {
        let fixture = fixture(None);
        let (status, _) = json_request(
            app(&fixture),
            Method::POST,
            "/analyze",
            Some(json!({"segmento": "pet shop"})),
        )
        .await;
        assert_eq!(status, StatusCode::OK);

        let (status, list) =
            json_request(app(&fixture), Method::GET, "/list_analyses?limit=500", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(list["limit"], 100);
        assert_eq!(list["count"], 1);
        let id = list["analyses"][0]["id"].as_str().unwrap().to_string();

        let (status, record) =
            json_request(app(&fixture), Method::GET, &format!("/get_analysis/{id}"), None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(record["segmento"], "pet shop");

        let (status, _) =
            json_request(app(&fixture), Method::GET, "/get_analysis/analysis_0_missing", None)
                .await;
        assert_eq!(status, StatusCode::NOT_FOUND);

        let (status, _) =
            json_request(app(&fixture), Method::GET, "/get_analysis/bad.id", None).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        let (status, stats) = json_request(app(&fixture), Method::GET, "/stats", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(stats["total_analyses"], 1);
    }

    #[tokio::test]
    async fn test_unknown_progress_is_404() {
        let fixture = fixture(None);
        let (status, _) =
            json_request(app(&fixture), Method::GET, "/progress/session_nope", None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }
}
