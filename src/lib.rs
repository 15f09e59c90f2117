//! copyforge - Resilient Marketing-Copy Analysis Pipeline
//!
//! Turns a short product description into a multi-section persuasion bundle
//! (market research, customer avatar, mental drivers, anti-objection system,
//! insights, pre-pitch, visual proofs and predictions) by chaining LLM stages.
//!
//! ## Core Features
//!
//! - **Stage Isolation**: every stage has a deterministic fallback; one failing
//!   stage never aborts the run
//! - **Completeness Guarantee**: required sections are always present in an
//!   accepted result
//! - **Guaranteed Minimum**: a pipeline-level failure still yields a usable result
//! - **Step Recorder**: every intermediate output is persisted for recovery
//! - **Two-Tier Store**: local files first, then SQLite or Supabase
//! - **Provider Chain**: multiple LLM backends with circuit breakers
//!
//! ## Quick Start
//!
//! ```ignore
//! use copyforge::{AnalysisRequest, Config, RequestDraft, server::AppState};
//! use copyforge::pipeline::{CancellationFlag, NoProgress};
//!
//! let state = AppState::from_config(&Config::default())?;
//! let request = AnalysisRequest::from_draft(RequestDraft::for_segment("consultoria"))?;
//! let outcome = state.orchestrator().run(&request, &NoProgress, &CancellationFlag::new()).await;
//! ```
//!
//! ## Modules
//!
//! - [`ai`]: generation providers, fallback chain, structured-output parsing
//! - [`search`]: web search providers and page extraction for the research stage
//! - [`pipeline`]: stages, orchestrator, completeness, quality and emergency paths
//! - [`recorder`]: per-session step log with consolidation
//! - [`storage`]: local and database tiers for finished analyses
//! - [`report`]: markdown rendering
//! - [`server`]: axum HTTP surface
//! - [`config`]: layered configuration

pub mod ai;
pub mod cli;
pub mod config;
pub mod constants;
pub mod pipeline;
pub mod recorder;
pub mod report;
pub mod search;
pub mod server;
pub mod storage;
pub mod types;

// =============================================================================
// Core Re-exports
// =============================================================================

// Configuration
pub use config::{Config, ConfigLoader, PipelineConfig};

// Error Types
pub use types::error::{ErrorCategory, ForgeError, Result, ResultExt};

// Domain
pub use types::{
    AnalysisMetadata, AnalysisRequest, AnalysisResult, CompletenessReport, ProcessingMode,
    QualityVerdict, RequestDraft, SessionId, StageKind, StageResult,
};

// Storage
pub use storage::{AnalysisStore, Database, SharedDatabase, SharedStore, TieredStore};

// Recorder
pub use recorder::{RecoveryBundle, SharedRecorder, StepRecorder};

// =============================================================================
// Pipeline Re-exports
// =============================================================================

pub use pipeline::{
    AnalysisOutcome, CancellationFlag, Orchestrator, ProgressSink, ProgressUpdate,
    QualityController,
};

// =============================================================================
// AI Re-exports
// =============================================================================

pub use ai::{LlmProvider, LlmResponse, ProviderChain, with_timeout};
