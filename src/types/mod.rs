pub mod error;
pub mod payload;
pub mod request;
pub mod result;
pub mod utils;

pub use error::{
    ErrorCategory, ErrorClassifier, ForgeError, LlmError, Result, ResultExt, ValidationError,
    ValidationErrorKind,
};
pub use payload::{
    ActivationScript, AntiObjection, Avatar, Demographics, Driver, ExtractedContent,
    FuturePredictions, MentalDrivers, Objection, PitchBeat, PitchScript, PrePitch, Psychographics,
    ResearchSource, ResearchStats, StagePayload, VisualProof, WebResearch,
};
pub use request::{AnalysisRequest, RequestDraft, synthesize_query};
pub use result::{
    AnalysisMetadata, AnalysisResult, CompletenessReport, ProcessingMode, QualityVerdict,
    RecoverySummary, StageKind, StageResult, StorageReport,
};
pub use utils::{
    capitalize_first, format_minutes_seconds, log_filter_warn, prefixed_id, title_case_key,
    truncate_chars, value_to_text,
};

// =============================================================================
// Domain Newtypes
// =============================================================================

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::constants::pipeline::MAX_SESSION_ID_LEN;

/// Type-safe wrapper for session IDs
///
/// Generated ids look like `session_1718900000_9f86d081`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SessionId(String);

impl SessionId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Fresh `session_{unix}_{hex}` id
    pub fn generate() -> Self {
        Self(prefixed_id("session"))
    }

    /// Whether `id` is usable as a client-supplied session id: ASCII
    /// alphanumerics, `_` and `-` only, so it maps one-to-one onto a directory name.
    pub fn is_valid(id: &str) -> bool {
        !id.is_empty()
            && id.len() <= MAX_SESSION_ID_LEN
            && id
                .bytes()
                .all(|b| b.is_ascii_alphanumeric() || b == b'_' || b == b'-')
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn into_inner(self) -> String {
        self.0
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<String> for SessionId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for SessionId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl AsRef<str> for SessionId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}
