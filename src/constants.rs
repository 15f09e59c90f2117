//! Global Constants
//!
//! Centralized constants for configuration and tuning.

/// Engine identity written into result metadata
pub mod engine {
    /// Result schema version
    pub const VERSION: &str = "2.0.0";

    /// Engine tag for a normal run
    pub const STANDARD: &str = "resilient_pipeline";

    /// Engine tag for the guaranteed-minimum path
    pub const GUARANTEED_MINIMUM: &str = "guaranteed_minimum";
}

/// Pipeline timing and progress
pub mod pipeline {
    /// Overall ceiling for one analysis (seconds)
    pub const ANALYSIS_TIMEOUT_SECS: u64 = 1800;

    /// Default per-call budget for a single generation (seconds)
    pub const STAGE_TIMEOUT_SECS: u64 = 300;

    /// Extra time granted to the outer guard beyond the analysis ceiling (seconds)
    pub const OUTER_GUARD_GRACE_SECS: u64 = 30;

    /// Total progress steps reported to clients
    pub const TOTAL_PROGRESS_STEPS: u32 = 13;

    /// Minimum entries for a live insights payload to be accepted
    pub const MIN_INSIGHTS: usize = 5;

    /// Longest client-supplied session id accepted
    pub const MAX_SESSION_ID_LEN: usize = 128;
}

/// Per-stage completion budgets (max tokens)
pub mod stage_tokens {
    pub const AVATAR: usize = 1500;
    pub const DRIVERS: usize = 2000;
    pub const ANTI_OBJECTION: usize = 2000;
    pub const INSIGHTS: usize = 1500;
    pub const PRE_PITCH: usize = 2000;
    pub const VISUAL_PROOFS: usize = 1500;
    pub const FUTURE_PREDICTIONS: usize = 1500;
}

/// Research stage limits
pub mod research {
    /// Results requested from the search pool
    pub const MAX_RESULTS: usize = 10;

    /// Results inspected for content extraction
    pub const INSPECTED_RESULTS: usize = 5;

    /// Extracted documents kept
    pub const MAX_DOCUMENTS: usize = 3;

    /// Extracted text shorter than this is discarded (chars)
    pub const MIN_CONTENT_CHARS: usize = 100;

    /// Extracted text is truncated to this length (chars)
    pub const MAX_CONTENT_CHARS: usize = 2000;

    /// Quality score assigned to an extracted document
    pub const CONTENT_QUALITY: f64 = 85.0;

    /// Average quality reported when nothing could be extracted
    pub const EMPTY_QUALITY: f64 = 50.0;

    /// Domains that block scraping or return login walls
    pub const BLOCKED_DOMAINS: &[&str] = &[
        "instagram.com",
        "facebook.com",
        "linkedin.com",
        "twitter.com",
        "eaesp.fgv.br",
        "workdayjobs.com",
        "guiatelemedicina.com.br",
    ];

    /// Timeout for a single page fetch (seconds)
    pub const FETCH_TIMEOUT_SECS: u64 = 15;
}

/// Provider chain constants
pub mod chain {
    /// Default attempts per provider; one attempt keeps stages single-shot
    pub const DEFAULT_MAX_RETRIES: u8 = 1;

    /// Base delay for exponential backoff (milliseconds)
    pub const BASE_DELAY_MS: u64 = 500;

    /// Maximum delay between retries (seconds)
    pub const MAX_DELAY_SECS: u64 = 20;

    /// Backoff multiplier
    pub const BACKOFF_FACTOR: f32 = 2.0;
}

/// Circuit breaker constants
pub mod circuit_breaker {
    /// Number of failures before opening circuit
    pub const FAILURE_THRESHOLD: u32 = 5;

    /// Duration to wait before attempting recovery (seconds)
    pub const RECOVERY_TIMEOUT_SECS: u64 = 60;

    /// Maximum requests allowed in half-open state
    pub const HALF_OPEN_MAX_REQUESTS: u32 = 1;

    /// Success threshold to close circuit from half-open
    pub const SUCCESS_THRESHOLD: u32 = 1;
}

/// Quality controller penalties (points out of 100)
pub mod quality {
    pub const MISSING_REQUIRED_PENALTY: f64 = 25.0;
    pub const DEGRADED_REQUIRED_PENALTY: f64 = 10.0;
    pub const DEGRADED_OPTIONAL_PENALTY: f64 = 5.0;
    pub const THIN_INSIGHTS_PENALTY: f64 = 10.0;
    pub const THIN_AVATAR_PENALTY: f64 = 5.0;
}

/// HTTP surface defaults
pub mod server {
    pub const DEFAULT_HOST: &str = "0.0.0.0";
    pub const DEFAULT_PORT: u16 = 5000;

    /// Default and maximum page size for listing analyses
    pub const DEFAULT_LIST_LIMIT: usize = 20;
    pub const MAX_LIST_LIMIT: usize = 100;

    /// Maximum accepted request body (bytes)
    pub const MAX_BODY_BYTES: usize = 2 * 1024 * 1024;
}

/// Storage layout
pub mod storage {
    /// Application directory name for project-local configuration
    pub const APP_DIR: &str = ".copyforge";

    /// Subdirectory holding per-analysis snapshots
    pub const ANALYSES_DIR: &str = "analyses";

    /// Subdirectory holding per-session step logs
    pub const STEPS_DIR: &str = "steps";

    /// SQLite file name inside the data directory
    pub const DATABASE_FILE: &str = "copyforge.db";

    /// Window for "recent analyses" in stats (days)
    pub const RECENT_WINDOW_DAYS: i64 = 7;
}

/// Progress broadcast channel capacity
pub const PROGRESS_CHANNEL_CAPACITY: usize = 256;

/// How long a finished session stays visible at `/progress/{id}` (seconds)
pub const PROGRESS_RETENTION_SECS: u64 = 600;

/// Idle sequence locks kept by the file recorder before pruning
pub const MAX_TRACKED_SEQUENCES: usize = 1024;
