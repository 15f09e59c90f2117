//! Completeness Guarantee
//!
//! Every returned result holds the four required sections. A section that is
//! missing or blank after the stage chain is rebuilt from the same fallback
//! its stage would have produced, never from an empty placeholder.

use tracing::warn;

use super::stages::{AvatarStage, InsightsStage, ResearchStage, Stage};
use crate::types::{AnalysisRequest, AnalysisResult, CompletenessReport, StageKind};

/// Reason stored in `degraded_stages` for a backfilled section
pub const BACKFILLED: &str = "backfilled";

/// Backfill missing required sections, then attach and return the report.
pub fn ensure_completeness(
    result: &mut AnalysisResult,
    request: &AnalysisRequest,
) -> CompletenessReport {
    let mut backfilled = Vec::new();

    for kind in StageKind::REQUIRED {
        if result.has_section(kind) {
            continue;
        }
        warn!("Required section '{}' missing, backfilling", kind.wire_key());
        match kind {
            StageKind::ProjectData => result.project_data = Some(request.clone()),
            StageKind::Research => result.web_research = Some(ResearchStage.fallback(request)),
            StageKind::Avatar => result.avatar = Some(AvatarStage.fallback(request)),
            StageKind::Insights => result.insights = Some(InsightsStage.fallback(request)),
            _ => continue,
        }
        result
            .metadata
            .degraded_stages
            .entry(kind.wire_key().to_string())
            .or_insert_with(|| BACKFILLED.to_string());
        backfilled.push(kind.wire_key().to_string());
    }

    let report = CompletenessReport {
        backfilled,
        ..completeness_report(result)
    };
    result.metadata.all_required_sections_present = report.fully_complete;
    result.completeness = Some(report.clone());
    report
}

/// Coverage of the required sections as they stand. Never modifies `result`.
pub fn completeness_report(result: &AnalysisResult) -> CompletenessReport {
    let required: Vec<String> = StageKind::REQUIRED
        .iter()
        .map(|k| k.wire_key().to_string())
        .collect();
    let (present, missing): (Vec<String>, Vec<String>) = required
        .iter()
        .cloned()
        .partition(|key| StageKind::from_wire_key(key).is_some_and(|k| result.has_section(k)));

    let rate = if required.is_empty() {
        100.0
    } else {
        present.len() as f64 / required.len() as f64 * 100.0
    };

    CompletenessReport {
        required_count: required.len(),
        present_count: present.len(),
        completeness_rate: rate,
        fully_complete: missing.is_empty(),
        required,
        present,
        missing,
        backfilled: Vec::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::RequestDraft;

    fn request() -> AnalysisRequest {
        AnalysisRequest::from_draft(RequestDraft::for_segment("educação")).unwrap()
    }

    #[test]
    fn test_backfills_every_missing_section() {
        let request = request();
        let mut result = AnalysisResult::default();

        let before = completeness_report(&result);
        assert_eq!(before.present_count, 0);
        assert_eq!(before.completeness_rate, 0.0);

        let report = ensure_completeness(&mut result, &request);
        assert!(report.missing.is_empty());
        assert_eq!(report.completeness_rate, 100.0);
        assert!(report.fully_complete);
        assert_eq!(report.backfilled.len(), 4);

        assert_eq!(result.avatar, Some(AvatarStage.fallback(&request)));
        assert_eq!(result.insights, Some(InsightsStage.fallback(&request)));
        assert_eq!(result.web_research, Some(ResearchStage.fallback(&request)));
        assert_eq!(result.project_data.as_ref(), Some(&request));
        assert_eq!(result.metadata.degraded_stages["avatar_ultra_detalhado"], BACKFILLED);
        assert!(result.metadata.all_required_sections_present);
        assert_eq!(result.completeness.as_ref(), Some(&report));
    }

    #[test]
    fn test_blank_section_is_replaced() {
        let request = request();
        let mut result = AnalysisResult::new(&request);
        result.web_research = Some(ResearchStage.fallback(&request));
        result.avatar = Some(AvatarStage.fallback(&request));
        result.insights = Some(vec!["   ".into()]);

        let report = ensure_completeness(&mut result, &request);
        assert_eq!(report.backfilled, vec!["insights_exclusivos"]);
        assert_eq!(result.insights.unwrap().len(), 6);
    }

    #[test]
    fn test_complete_result_is_untouched() {
        let request = request();
        let mut result = AnalysisResult::new(&request);
        result.web_research = Some(ResearchStage.fallback(&request));
        result.avatar = Some(AvatarStage.fallback(&request));
        result.insights = Some(vec!["um".into(); 5]);
        let before = result.clone();

        let report = ensure_completeness(&mut result, &request);
        assert!(report.backfilled.is_empty());
        assert_eq!(report.present_count, 4);
        assert_eq!(result.insights, before.insights);
        assert!(result.metadata.degraded_stages.is_empty());
    }

    #[test]
    fn test_existing_degradation_reason_is_kept() {
        let request = request();
        let mut result = AnalysisResult::new(&request);
        result
            .metadata
            .degraded_stages
            .insert("avatar_ultra_detalhado".into(), "timeout".into());

        ensure_completeness(&mut result, &request);
        assert_eq!(result.metadata.degraded_stages["avatar_ultra_detalhado"], "timeout");
    }
}
