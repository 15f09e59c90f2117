//! Guaranteed-Minimum Path
//!
//! Last-resort assembly used when the pipeline itself fails. Built only from
//! stage fallbacks, so it performs no I/O and cannot fail.

use std::time::Duration;

use chrono::Utc;

use super::completeness::completeness_report;
use super::stages::{AvatarStage, InsightsStage, ResearchStage, Stage};
use crate::constants::engine;
use crate::types::{
    AnalysisMetadata, AnalysisRequest, AnalysisResult, ProcessingMode, StageKind,
    format_minutes_seconds,
};

/// Result holding exactly the required sections, each from its fallback.
pub fn guaranteed_minimum(
    request: &AnalysisRequest,
    failure: &str,
    elapsed: Duration,
) -> AnalysisResult {
    let mut result = AnalysisResult {
        project_data: Some(request.clone()),
        web_research: Some(ResearchStage.fallback(request)),
        avatar: Some(AvatarStage.fallback(request)),
        insights: Some(InsightsStage.fallback(request)),
        metadata: AnalysisMetadata {
            generated_at: Some(Utc::now()),
            version: engine::VERSION.to_string(),
            engine: engine::GUARANTEED_MINIMUM.to_string(),
            session_id: Some(request.session_id.clone()),
            processing_mode: ProcessingMode::EmergencyFallback,
            processing_time_seconds: elapsed.as_secs_f64(),
            processing_time_formatted: format_minutes_seconds(elapsed),
            components_generated: StageKind::REQUIRED
                .iter()
                .map(|k| k.wire_key().to_string())
                .collect(),
            degraded_stages: StageKind::REQUIRED
                .iter()
                .filter(|k| **k != StageKind::ProjectData)
                .map(|k| (k.wire_key().to_string(), failure.to_string()))
                .collect(),
            input_data: Some(request.input_summary()),
            failure: Some(failure.to_string()),
            ..Default::default()
        },
        ..Default::default()
    };

    let report = completeness_report(&result);
    result.metadata.all_required_sections_present = report.fully_complete;
    result.metadata.quality_guaranteed = report.fully_complete;
    result.completeness = Some(report);
    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::RequestDraft;

    #[test]
    fn test_contains_only_required_fallbacks() {
        let request = AnalysisRequest::from_draft(RequestDraft::for_segment("pet shop")).unwrap();
        let result = guaranteed_minimum(&request, "boom", Duration::from_secs(75));

        assert_eq!(
            result.present_sections(),
            vec![
                "projeto_dados",
                "pesquisa_web_massiva",
                "avatar_ultra_detalhado",
                "insights_exclusivos"
            ]
        );
        assert!(result.drivers.is_none());
        assert!(result.pre_pitch.is_none());
        assert_eq!(result.avatar, Some(AvatarStage.fallback(&request)));
        assert!(result.is_emergency());
        assert_eq!(result.metadata.engine, "guaranteed_minimum");
        assert_eq!(result.metadata.processing_time_formatted, "1m 15s");
        assert_eq!(result.metadata.failure.as_deref(), Some("boom"));
        assert_eq!(result.completeness.unwrap().completeness_rate, 100.0);

        let value = serde_json::to_value(&result.metadata).unwrap();
        assert_eq!(value["processing_mode"], "emergency_fallback");
    }

    #[test]
    fn test_is_deterministic_apart_from_timestamps() {
        let request = AnalysisRequest::from_draft(RequestDraft::for_segment("pet shop")).unwrap();
        let a = guaranteed_minimum(&request, "x", Duration::ZERO);
        let b = guaranteed_minimum(&request, "x", Duration::ZERO);
        assert_eq!(a.web_research, b.web_research);
        assert_eq!(a.insights, b.insights);
        assert_eq!(a.metadata.degraded_stages, b.metadata.degraded_stages);
    }
}
