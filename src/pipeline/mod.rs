//! Analysis Pipeline
//!
//! Stage generators, the orchestrator that sequences them, and the safety nets
//! around it: per-stage fallbacks, the completeness guarantee, best-effort
//! quality control and the guaranteed-minimum path.
//!
//! ```text
//! request -> [research -> avatar -> drivers | anti-objection -> insights]
//!         -> [pre-pitch -> visual proofs -> predictions]
//!         -> completeness -> quality -> store -> result
//! ```

pub mod cancel;
pub mod completeness;
pub mod emergency;
pub mod orchestrator;
pub mod progress;
pub mod quality;
pub mod stages;

#[cfg(test)]
pub(crate) mod test_support;

pub use cancel::CancellationFlag;
pub use completeness::{completeness_report, ensure_completeness};
pub use emergency::guaranteed_minimum;
pub use orchestrator::{AnalysisOutcome, LowQuality, Orchestrator};
pub use progress::{NoProgress, ProgressRegistry, ProgressSink, ProgressTracker, ProgressUpdate};
pub use quality::{
    QualityController, SharedQualityController, StructuralQualityController, score_structure,
};
pub use stages::{Stage, StageContext, run_stage};
