//! Stage identities, stage outcomes and the accumulated analysis result.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use super::SessionId;
use super::payload::{
    AntiObjection, Avatar, FuturePredictions, MentalDrivers, PrePitch, StagePayload, VisualProof,
    WebResearch,
};
use super::request::AnalysisRequest;

// =============================================================================
// Stage Kind
// =============================================================================

/// Every section a result can hold, in pipeline order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StageKind {
    ProjectData,
    Research,
    Avatar,
    Drivers,
    AntiObjection,
    Insights,
    PrePitch,
    VisualProofs,
    FuturePredictions,
}

impl StageKind {
    pub const ALL: [StageKind; 9] = [
        Self::ProjectData,
        Self::Research,
        Self::Avatar,
        Self::Drivers,
        Self::AntiObjection,
        Self::Insights,
        Self::PrePitch,
        Self::VisualProofs,
        Self::FuturePredictions,
    ];

    /// Sections that must be present in every returned result.
    pub const REQUIRED: [StageKind; 4] = [
        Self::ProjectData,
        Self::Research,
        Self::Avatar,
        Self::Insights,
    ];

    /// Stages that run after the required chain and never affect acceptance.
    pub const OPTIONAL: [StageKind; 3] = [Self::PrePitch, Self::VisualProofs, Self::FuturePredictions];

    /// Internal snake_case name used in logs and step records.
    pub fn name(&self) -> &'static str {
        match self {
            Self::ProjectData => "project_data",
            Self::Research => "web_research",
            Self::Avatar => "avatar",
            Self::Drivers => "mental_drivers",
            Self::AntiObjection => "anti_objection",
            Self::Insights => "insights",
            Self::PrePitch => "pre_pitch",
            Self::VisualProofs => "visual_proofs",
            Self::FuturePredictions => "future_predictions",
        }
    }

    /// Top-level key of this section in the serialized result.
    pub fn wire_key(&self) -> &'static str {
        match self {
            Self::ProjectData => "projeto_dados",
            Self::Research => "pesquisa_web_massiva",
            Self::Avatar => "avatar_ultra_detalhado",
            Self::Drivers => "drivers_mentais_customizados",
            Self::AntiObjection => "sistema_anti_objecao",
            Self::Insights => "insights_exclusivos",
            Self::PrePitch => "pre_pitch_invisivel",
            Self::VisualProofs => "provas_visuais_sugeridas",
            Self::FuturePredictions => "predicoes_futuro_completas",
        }
    }

    /// Human-readable section title used by reports.
    pub fn title(&self) -> &'static str {
        match self {
            Self::ProjectData => "Dados do Projeto",
            Self::Research => "Pesquisa Web Massiva",
            Self::Avatar => "Avatar Ultra-Detalhado",
            Self::Drivers => "Drivers Mentais Customizados",
            Self::AntiObjection => "Sistema Anti-Objeção",
            Self::Insights => "Insights Exclusivos",
            Self::PrePitch => "Pré-Pitch Invisível",
            Self::VisualProofs => "Provas Visuais Sugeridas",
            Self::FuturePredictions => "Predições do Futuro",
        }
    }

    pub fn is_required(&self) -> bool {
        Self::REQUIRED.contains(self)
    }

    pub fn from_wire_key(key: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|k| k.wire_key() == key)
    }
}

impl std::fmt::Display for StageKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

// =============================================================================
// Stage Result
// =============================================================================

/// Outcome of one stage. Both variants carry a complete payload; `Degraded`
/// means the payload came from the stage's deterministic fallback.
#[derive(Debug, Clone, PartialEq)]
pub enum StageResult<T> {
    Success(T),
    Degraded { payload: T, reason: String },
}

impl<T> StageResult<T> {
    pub fn degraded(payload: T, reason: impl Into<String>) -> Self {
        Self::Degraded {
            payload,
            reason: reason.into(),
        }
    }

    pub fn payload(&self) -> &T {
        match self {
            Self::Success(payload) | Self::Degraded { payload, .. } => payload,
        }
    }

    pub fn into_payload(self) -> T {
        match self {
            Self::Success(payload) | Self::Degraded { payload, .. } => payload,
        }
    }

    pub fn is_degraded(&self) -> bool {
        matches!(self, Self::Degraded { .. })
    }

    pub fn reason(&self) -> Option<&str> {
        match self {
            Self::Success(_) => None,
            Self::Degraded { reason, .. } => Some(reason),
        }
    }
}

// =============================================================================
// Completeness & Quality
// =============================================================================

/// Coverage of the required sections, computed after backfill.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CompletenessReport {
    #[serde(rename = "componentes_requeridos")]
    pub required: Vec<String>,
    #[serde(rename = "componentes_presentes")]
    pub present: Vec<String>,
    #[serde(rename = "componentes_ausentes")]
    pub missing: Vec<String>,
    #[serde(rename = "componentes_recompostos")]
    pub backfilled: Vec<String>,
    #[serde(rename = "total_requeridos")]
    pub required_count: usize,
    #[serde(rename = "total_presentes")]
    pub present_count: usize,
    #[serde(rename = "taxa_completude")]
    pub completeness_rate: f64,
    #[serde(rename = "todos_componentes_incluidos")]
    pub fully_complete: bool,
}

/// Verdict produced by a quality controller.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct QualityVerdict {
    pub valid: bool,
    pub quality_score: f64,
    pub errors: Vec<String>,
    pub warnings: Vec<String>,
    pub recommendations: Vec<String>,
}

impl Default for QualityVerdict {
    fn default() -> Self {
        Self::permissive("simplified validation applied")
    }
}

impl QualityVerdict {
    /// Scores strictly below this floor are rejected when the verdict is also invalid.
    pub const REJECTION_FLOOR: f64 = 30.0;

    /// Verdict used whenever the quality controller itself fails.
    pub fn permissive(warning: impl Into<String>) -> Self {
        Self {
            valid: true,
            quality_score: 75.0,
            errors: Vec::new(),
            warnings: vec![warning.into()],
            recommendations: Vec::new(),
        }
    }

    /// A run is rejected only when the verdict is invalid AND below the floor.
    pub fn rejects(&self) -> bool {
        !self.valid && self.quality_score < Self::REJECTION_FLOOR
    }
}

// =============================================================================
// Metadata
// =============================================================================

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProcessingMode {
    #[default]
    Standard,
    EmergencyFallback,
}

/// Where the analysis was persisted, or why it was not.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageReport {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub database_id: Option<String>,
    pub local_only: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub local_files: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub database_warning: Option<String>,
}

/// Short digest of the step log for a session.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RecoverySummary {
    pub session_id: String,
    pub total_steps: usize,
    pub error_count: usize,
    pub categories: BTreeMap<String, usize>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AnalysisMetadata {
    pub generated_at: Option<DateTime<Utc>>,
    pub version: String,
    pub engine: String,
    pub session_id: Option<SessionId>,
    pub processing_mode: ProcessingMode,
    pub processing_time_seconds: f64,
    pub processing_time_formatted: String,
    pub components_generated: Vec<String>,
    /// Stage wire key -> reason the stage fell back
    pub degraded_stages: BTreeMap<String, String>,
    pub all_required_sections_present: bool,
    pub quality_guaranteed: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub quality: Option<QualityVerdict>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub input_data: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub storage: Option<StorageReport>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub recovery: Option<RecoverySummary>,
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    pub cancelled: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub failure: Option<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

// =============================================================================
// Analysis Result
// =============================================================================

/// Accumulating result of one run. Sections are `None` until their stage runs.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AnalysisResult {
    #[serde(rename = "projeto_dados", skip_serializing_if = "Option::is_none")]
    pub project_data: Option<AnalysisRequest>,
    #[serde(rename = "pesquisa_web_massiva", skip_serializing_if = "Option::is_none")]
    pub web_research: Option<WebResearch>,
    #[serde(rename = "avatar_ultra_detalhado", skip_serializing_if = "Option::is_none")]
    pub avatar: Option<Avatar>,
    #[serde(
        rename = "drivers_mentais_customizados",
        skip_serializing_if = "Option::is_none"
    )]
    pub drivers: Option<MentalDrivers>,
    #[serde(rename = "sistema_anti_objecao", skip_serializing_if = "Option::is_none")]
    pub anti_objection: Option<AntiObjection>,
    #[serde(rename = "insights_exclusivos", skip_serializing_if = "Option::is_none")]
    pub insights: Option<Vec<String>>,
    #[serde(rename = "pre_pitch_invisivel", skip_serializing_if = "Option::is_none")]
    pub pre_pitch: Option<PrePitch>,
    #[serde(
        rename = "provas_visuais_sugeridas",
        skip_serializing_if = "Option::is_none"
    )]
    pub visual_proofs: Option<Vec<VisualProof>>,
    #[serde(
        rename = "predicoes_futuro_completas",
        skip_serializing_if = "Option::is_none"
    )]
    pub future_predictions: Option<FuturePredictions>,
    #[serde(rename = "completude_documento", skip_serializing_if = "Option::is_none")]
    pub completeness: Option<CompletenessReport>,
    pub metadata: AnalysisMetadata,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl AnalysisResult {
    pub fn new(request: &AnalysisRequest) -> Self {
        Self {
            project_data: Some(request.clone()),
            metadata: AnalysisMetadata {
                generated_at: Some(Utc::now()),
                session_id: Some(request.session_id.clone()),
                ..Default::default()
            },
            ..Default::default()
        }
    }

    /// Present and not blank. A blank section counts as missing.
    pub fn has_section(&self, kind: StageKind) -> bool {
        match kind {
            StageKind::ProjectData => self
                .project_data
                .as_ref()
                .is_some_and(|p| !p.segment.trim().is_empty()),
            StageKind::Research => present(&self.web_research),
            StageKind::Avatar => present(&self.avatar),
            StageKind::Drivers => present(&self.drivers),
            StageKind::AntiObjection => present(&self.anti_objection),
            StageKind::Insights => present(&self.insights),
            StageKind::PrePitch => present(&self.pre_pitch),
            StageKind::VisualProofs => present(&self.visual_proofs),
            StageKind::FuturePredictions => present(&self.future_predictions),
        }
    }

    /// Wire keys of every section currently present, in pipeline order.
    pub fn present_sections(&self) -> Vec<String> {
        StageKind::ALL
            .into_iter()
            .filter(|k| self.has_section(*k))
            .map(|k| k.wire_key().to_string())
            .collect()
    }

    pub fn session_id(&self) -> Option<&SessionId> {
        self.metadata
            .session_id
            .as_ref()
            .or_else(|| self.project_data.as_ref().map(|p| &p.session_id))
    }

    pub fn segment(&self) -> Option<&str> {
        self.project_data.as_ref().map(|p| p.segment.as_str())
    }

    pub fn is_emergency(&self) -> bool {
        self.metadata.processing_mode == ProcessingMode::EmergencyFallback
    }

    /// Serialized value of a single section, if present.
    pub fn section_value(&self, kind: StageKind) -> Option<Value> {
        let value = match kind {
            StageKind::ProjectData => serde_json::to_value(self.project_data.as_ref()?),
            StageKind::Research => serde_json::to_value(self.web_research.as_ref()?),
            StageKind::Avatar => serde_json::to_value(self.avatar.as_ref()?),
            StageKind::Drivers => serde_json::to_value(self.drivers.as_ref()?),
            StageKind::AntiObjection => serde_json::to_value(self.anti_objection.as_ref()?),
            StageKind::Insights => serde_json::to_value(self.insights.as_ref()?),
            StageKind::PrePitch => serde_json::to_value(self.pre_pitch.as_ref()?),
            StageKind::VisualProofs => serde_json::to_value(self.visual_proofs.as_ref()?),
            StageKind::FuturePredictions => {
                serde_json::to_value(self.future_predictions.as_ref()?)
            }
        };
        value.ok()
    }
}

fn present<T: StagePayload>(section: &Option<T>) -> bool {
    section.as_ref().is_some_and(|s| !s.is_blank())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::RequestDraft;

    fn request() -> AnalysisRequest {
        AnalysisRequest::from_draft(RequestDraft::for_segment("consultoria")).unwrap()
    }

    #[test]
    fn test_rejection_threshold_edges() {
        let verdict = |valid, score| QualityVerdict {
            valid,
            quality_score: score,
            ..QualityVerdict::default()
        };
        assert!(verdict(false, 29.0).rejects());
        assert!(verdict(false, 29.99).rejects());
        assert!(!verdict(false, 30.0).rejects());
        assert!(!verdict(true, 0.0).rejects());
        assert!(!verdict(true, 100.0).rejects());
    }

    #[test]
    fn test_permissive_verdict() {
        let verdict = QualityVerdict::default();
        assert!(verdict.valid);
        assert_eq!(verdict.quality_score, 75.0);
        assert!(verdict.errors.is_empty());
        assert_eq!(verdict.warnings.len(), 1);
    }

    #[test]
    fn test_new_result_has_only_project_data() {
        let result = AnalysisResult::new(&request());
        assert!(result.has_section(StageKind::ProjectData));
        assert!(!result.has_section(StageKind::Avatar));
        assert_eq!(result.present_sections(), vec!["projeto_dados"]);
        assert_eq!(result.segment(), Some("consultoria"));
    }

    #[test]
    fn test_blank_section_counts_as_missing() {
        let mut result = AnalysisResult::new(&request());
        result.insights = Some(Vec::new());
        result.avatar = Some(Avatar::default());
        assert!(!result.has_section(StageKind::Insights));
        assert!(!result.has_section(StageKind::Avatar));
    }

    #[test]
    fn test_wire_keys_are_unique_and_resolvable() {
        for kind in StageKind::ALL {
            assert_eq!(StageKind::from_wire_key(kind.wire_key()), Some(kind));
        }
        assert_eq!(StageKind::from_wire_key("nope"), None);
        assert!(StageKind::Insights.is_required());
        assert!(!StageKind::Drivers.is_required());
    }

    #[test]
    fn test_result_serializes_with_wire_keys() {
        let mut result = AnalysisResult::new(&request());
        result.insights = Some(vec!["a".into()]);
        let value = serde_json::to_value(&result).unwrap();
        assert_eq!(value["projeto_dados"]["segmento"], "consultoria");
        assert_eq!(value["insights_exclusivos"][0], "a");
        assert_eq!(value["metadata"]["processing_mode"], "standard");
        assert!(value.get("avatar_ultra_detalhado").is_none());

        let back: AnalysisResult = serde_json::from_value(value).unwrap();
        assert_eq!(back.insights, result.insights);
    }
}
