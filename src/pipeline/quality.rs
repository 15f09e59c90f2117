//! Quality Control
//!
//! A quality controller scores an assembled result. Evaluation is best-effort:
//! the orchestrator replaces a failing controller's verdict with
//! [`QualityVerdict::permissive`].

use std::sync::Arc;

use crate::constants::pipeline::MIN_INSIGHTS;
use crate::constants::quality::*;
use crate::types::{AnalysisResult, QualityVerdict, Result, StageKind};

#[async_trait::async_trait]
pub trait QualityController: Send + Sync {
    async fn evaluate(&self, result: &AnalysisResult) -> Result<QualityVerdict>;
}

pub type SharedQualityController = Arc<dyn QualityController>;

/// Avatar lists shorter than this count as thin
const MIN_AVATAR_ITEMS: usize = 3;

/// Scores structure only: which sections exist, which degraded, how full they are.
#[derive(Debug, Default, Clone, Copy)]
pub struct StructuralQualityController;

#[async_trait::async_trait]
impl QualityController for StructuralQualityController {
    async fn evaluate(&self, result: &AnalysisResult) -> Result<QualityVerdict> {
        Ok(score_structure(result))
    }
}

/// Pure scoring used by [`StructuralQualityController`] and `validate_analysis`.
pub fn score_structure(result: &AnalysisResult) -> QualityVerdict {
    let mut penalty: f64 = 0.0;
    let mut errors = Vec::new();
    let mut warnings = Vec::new();
    let mut recommendations = Vec::new();

    for kind in StageKind::REQUIRED {
        if !result.has_section(kind) {
            penalty += MISSING_REQUIRED_PENALTY;
            errors.push(format!("Missing required section '{}'", kind.wire_key()));
        }
    }

    for (key, reason) in &result.metadata.degraded_stages {
        let required = StageKind::from_wire_key(key).is_some_and(|k| k.is_required());
        penalty += if required {
            DEGRADED_REQUIRED_PENALTY
        } else {
            DEGRADED_OPTIONAL_PENALTY
        };
        warnings.push(format!("Section '{}' uses fallback content ({})", key, reason));
        let title = StageKind::from_wire_key(key).map_or(key.as_str(), |k| k.title());
        recommendations.push(format!("Regenerate '{}' once the provider is available", title));
    }

    if let Some(insights) = &result.insights
        && insights.len() < MIN_INSIGHTS
    {
        penalty += THIN_INSIGHTS_PENALTY;
        warnings.push(format!(
            "Only {} insights, expected at least {}",
            insights.len(),
            MIN_INSIGHTS
        ));
    }

    if let Some(avatar) = &result.avatar
        && (avatar.pains.len() < MIN_AVATAR_ITEMS || avatar.desires.len() < MIN_AVATAR_ITEMS)
    {
        penalty += THIN_AVATAR_PENALTY;
        warnings.push("Avatar has few pains or desires".to_string());
    }

    QualityVerdict {
        valid: errors.is_empty(),
        quality_score: (100.0 - penalty).clamp(0.0, 100.0),
        errors,
        warnings,
        recommendations,
    }
}
