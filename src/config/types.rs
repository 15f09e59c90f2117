//! Configuration Types
//!
//! All configuration structures with sensible defaults.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

use crate::ai::provider::ProviderConfig;
use crate::constants::{chain, circuit_breaker, pipeline, server, stage_tokens, storage};
use crate::types::{ForgeError, Result, StageKind};

/// Root configuration structure
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Configuration version
    pub version: String,

    /// Generation providers, tried in order
    pub providers: Vec<ProviderConfig>,

    /// Retry and circuit breaker tuning for the provider chain
    pub chain: ChainSettings,

    /// Research stage search providers
    pub search: SearchConfig,

    /// Pipeline timing and token budgets
    pub pipeline: PipelineConfig,

    /// Step recorder backend
    pub recorder: RecorderConfig,

    /// Analysis store tiers
    pub storage: StorageConfig,

    /// HTTP surface
    pub server: ServerConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            version: "1.0".to_string(),
            providers: vec![
                ProviderConfig {
                    name: Some("openai".to_string()),
                    provider: "openai".to_string(),
                    model: Some("gpt-4o-mini".to_string()),
                    api_key_env: Some("OPENAI_API_KEY".to_string()),
                    ..ProviderConfig::default()
                },
                ProviderConfig {
                    name: Some("ollama".to_string()),
                    provider: "ollama".to_string(),
                    model: Some("llama3.1".to_string()),
                    ..ProviderConfig::default()
                },
            ],
            chain: ChainSettings::default(),
            search: SearchConfig::default(),
            pipeline: PipelineConfig::default(),
            recorder: RecorderConfig::default(),
            storage: StorageConfig::default(),
            server: ServerConfig::default(),
        }
    }
}

impl Config {
    /// Validate configuration values are within acceptable ranges.
    pub fn validate(&self) -> Result<()> {
        for provider in &self.providers {
            if !(0.0..=2.0).contains(&provider.temperature) {
                return Err(ForgeError::Config(format!(
                    "Provider '{}' temperature must be between 0.0 and 2.0, got {}",
                    provider.display_name(),
                    provider.temperature
                )));
            }
            if provider.timeout_secs == 0 {
                return Err(ForgeError::Config(format!(
                    "Provider '{}' timeout_secs must be greater than 0",
                    provider.display_name()
                )));
            }
        }

        if self.chain.max_retries == 0 {
            return Err(ForgeError::Config(
                "chain.max_retries must be at least 1".to_string(),
            ));
        }

        if self.pipeline.analysis_timeout_secs == 0 || self.pipeline.stage_timeout_secs == 0 {
            return Err(ForgeError::Config(
                "pipeline timeouts must be greater than 0".to_string(),
            ));
        }

        if self.pipeline.stage_timeout_secs > self.pipeline.analysis_timeout_secs {
            return Err(ForgeError::Config(format!(
                "pipeline.stage_timeout_secs ({}) exceeds analysis_timeout_secs ({})",
                self.pipeline.stage_timeout_secs, self.pipeline.analysis_timeout_secs
            )));
        }

        if self.storage.database == DatabaseBackend::Supabase && self.storage.supabase_url.is_none()
        {
            return Err(ForgeError::Config(
                "storage.supabase_url is required when storage.database = \"supabase\"".to_string(),
            ));
        }

        Ok(())
    }

    /// Root directory for snapshots, step logs and the SQLite file
    pub fn data_dir(&self) -> PathBuf {
        self.storage.data_dir.clone().unwrap_or_else(|| {
            directories::ProjectDirs::from("", "", "copyforge")
                .map(|dirs| dirs.data_dir().to_path_buf())
                .unwrap_or_else(|| PathBuf::from(storage::APP_DIR).join("data"))
        })
    }

    pub fn analyses_dir(&self) -> PathBuf {
        self.data_dir().join(storage::ANALYSES_DIR)
    }

    pub fn steps_dir(&self) -> PathBuf {
        self.recorder
            .directory
            .clone()
            .unwrap_or_else(|| self.data_dir().join(storage::STEPS_DIR))
    }

    pub fn sqlite_path(&self) -> PathBuf {
        self.storage
            .sqlite_path
            .clone()
            .unwrap_or_else(|| self.data_dir().join(storage::DATABASE_FILE))
    }
}

// =============================================================================
// Provider Chain
// =============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ChainSettings {
    /// Attempts per provider before failing over
    pub max_retries: u8,
    /// Base delay for exponential backoff (milliseconds)
    pub base_delay_ms: u64,
    /// Maximum delay between retries (seconds)
    pub max_delay_secs: u64,
    /// Consecutive failures before a provider's circuit opens
    pub failure_threshold: u32,
    /// Seconds an open circuit waits before probing again
    pub recovery_timeout_secs: u64,
}

impl Default for ChainSettings {
    fn default() -> Self {
        Self {
            max_retries: chain::DEFAULT_MAX_RETRIES,
            base_delay_ms: chain::BASE_DELAY_MS,
            max_delay_secs: chain::MAX_DELAY_SECS,
            failure_threshold: circuit_breaker::FAILURE_THRESHOLD,
            recovery_timeout_secs: circuit_breaker::RECOVERY_TIMEOUT_SECS,
        }
    }
}

// =============================================================================
// Search
// =============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SearchConfig {
    /// Search providers, tried in order
    pub providers: Vec<SearchProviderConfig>,
    /// Timeout for a single page fetch (seconds)
    pub fetch_timeout_secs: u64,
    /// User agent sent when fetching pages
    pub user_agent: String,
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            providers: vec![SearchProviderConfig {
                kind: "serper".to_string(),
                name: None,
                endpoint: None,
                api_key: None,
                api_key_env: Some("SERPER_API_KEY".to_string()),
                timeout_secs: 20,
            }],
            fetch_timeout_secs: crate::constants::research::FETCH_TIMEOUT_SECS,
            user_agent: format!("copyforge/{}", env!("CARGO_PKG_VERSION")),
        }
    }
}

#[derive(Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SearchProviderConfig {
    /// Provider type: "searxng", "serper"
    pub kind: String,
    /// Display name (defaults to kind)
    pub name: Option<String>,
    /// Base URL (required for searxng)
    pub endpoint: Option<String>,
    /// Never serialized to output
    #[serde(skip_serializing)]
    pub api_key: Option<String>,
    /// Environment variable holding the API key
    pub api_key_env: Option<String>,
    pub timeout_secs: u64,
}

impl SearchProviderConfig {
    pub fn display_name(&self) -> &str {
        self.name.as_deref().unwrap_or(&self.kind)
    }

    /// Inline key, falling back to the configured environment variable
    pub fn resolve_api_key(&self) -> Option<String> {
        self.api_key.clone().or_else(|| {
            self.api_key_env
                .as_deref()
                .and_then(|var| std::env::var(var).ok())
                .filter(|v| !v.is_empty())
        })
    }
}

impl Default for SearchProviderConfig {
    fn default() -> Self {
        Self {
            kind: "searxng".to_string(),
            name: None,
            endpoint: None,
            api_key: None,
            api_key_env: None,
            timeout_secs: 20,
        }
    }
}

impl std::fmt::Debug for SearchProviderConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SearchProviderConfig")
            .field("kind", &self.kind)
            .field("name", &self.name)
            .field("endpoint", &self.endpoint)
            .field("api_key", &self.api_key.as_ref().map(|_| "[REDACTED]"))
            .field("api_key_env", &self.api_key_env)
            .field("timeout_secs", &self.timeout_secs)
            .finish()
    }
}

// =============================================================================
// Pipeline
// =============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Ceiling for a whole analysis (seconds)
    pub analysis_timeout_secs: u64,
    /// Ceiling for one generation call (seconds)
    pub stage_timeout_secs: u64,
    /// Run mental drivers and anti-objection concurrently
    pub parallel_branches: bool,
    /// Skip pre-pitch, visual proofs and predictions
    pub skip_optional_stages: bool,
    /// Completion budgets per stage
    pub max_tokens: StageTokenBudgets,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            analysis_timeout_secs: pipeline::ANALYSIS_TIMEOUT_SECS,
            stage_timeout_secs: pipeline::STAGE_TIMEOUT_SECS,
            parallel_branches: false,
            skip_optional_stages: false,
            max_tokens: StageTokenBudgets::default(),
        }
    }
}

impl PipelineConfig {
    pub fn analysis_timeout(&self) -> Duration {
        Duration::from_secs(self.analysis_timeout_secs)
    }

    pub fn stage_timeout(&self) -> Duration {
        Duration::from_secs(self.stage_timeout_secs)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StageTokenBudgets {
    pub avatar: usize,
    pub drivers: usize,
    pub anti_objection: usize,
    pub insights: usize,
    pub pre_pitch: usize,
    pub visual_proofs: usize,
    pub future_predictions: usize,
}

impl Default for StageTokenBudgets {
    fn default() -> Self {
        Self {
            avatar: stage_tokens::AVATAR,
            drivers: stage_tokens::DRIVERS,
            anti_objection: stage_tokens::ANTI_OBJECTION,
            insights: stage_tokens::INSIGHTS,
            pre_pitch: stage_tokens::PRE_PITCH,
            visual_proofs: stage_tokens::VISUAL_PROOFS,
            future_predictions: stage_tokens::FUTURE_PREDICTIONS,
        }
    }
}

impl StageTokenBudgets {
    /// Budget for a generation stage; research and project data never call a model.
    pub fn for_stage(&self, kind: StageKind) -> usize {
        match kind {
            StageKind::Avatar => self.avatar,
            StageKind::Drivers => self.drivers,
            StageKind::AntiObjection => self.anti_objection,
            StageKind::Insights => self.insights,
            StageKind::PrePitch => self.pre_pitch,
            StageKind::VisualProofs => self.visual_proofs,
            StageKind::FuturePredictions => self.future_predictions,
            StageKind::ProjectData | StageKind::Research => 0,
        }
    }
}

// =============================================================================
// Recorder & Storage
// =============================================================================

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum RecorderBackend {
    #[default]
    File,
    Sqlite,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct RecorderConfig {
    pub backend: RecorderBackend,
    /// Root for file-backed step logs (defaults to `{data_dir}/steps`)
    pub directory: Option<PathBuf>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum DatabaseBackend {
    #[default]
    Sqlite,
    Supabase,
    None,
}

#[derive(Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// Root data directory (defaults to the platform data dir)
    pub data_dir: Option<PathBuf>,
    /// Database tier backing the local files
    pub database: DatabaseBackend,
    pub sqlite_path: Option<PathBuf>,
    pub supabase_url: Option<String>,
    /// Never serialized to output
    #[serde(skip_serializing)]
    pub supabase_key: Option<String>,
    pub supabase_table: String,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            data_dir: None,
            database: DatabaseBackend::Sqlite,
            sqlite_path: None,
            supabase_url: None,
            supabase_key: None,
            supabase_table: "analyses".to_string(),
        }
    }
}

impl std::fmt::Debug for StorageConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StorageConfig")
            .field("data_dir", &self.data_dir)
            .field("database", &self.database)
            .field("sqlite_path", &self.sqlite_path)
            .field("supabase_url", &self.supabase_url)
            .field("supabase_key", &self.supabase_key.as_ref().map(|_| "[REDACTED]"))
            .field("supabase_table", &self.supabase_table)
            .finish()
    }
}

// =============================================================================
// Server
// =============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    /// Allowed CORS origins; empty allows any origin
    pub cors_origins: Vec<String>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: server::DEFAULT_HOST.to_string(),
            port: server::DEFAULT_PORT,
            cors_origins: Vec::new(),
        }
    }
}

impl ServerConfig {
    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        let config = Config::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.pipeline.analysis_timeout_secs, 1800);
        assert_eq!(config.chain.max_retries, 1);
        assert_eq!(config.providers.len(), 2);
    }

    #[test]
    fn test_rejects_bad_temperature() {
        let mut config = Config::default();
        config.providers[0].temperature = 3.5;
        assert!(matches!(config.validate(), Err(ForgeError::Config(_))));
    }

    #[test]
    fn test_rejects_stage_timeout_above_ceiling() {
        let mut config = Config::default();
        config.pipeline.stage_timeout_secs = 4000;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_supabase_requires_url() {
        let mut config = Config::default();
        config.storage.database = DatabaseBackend::Supabase;
        assert!(config.validate().is_err());
        config.storage.supabase_url = Some("https://x.supabase.co".into());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_paths_follow_data_dir() {
        let mut config = Config::default();
        config.storage.data_dir = Some(PathBuf::from("/tmp/cf"));
        assert_eq!(config.analyses_dir(), PathBuf::from("/tmp/cf/analyses"));
        assert_eq!(config.steps_dir(), PathBuf::from("/tmp/cf/steps"));
        assert_eq!(config.sqlite_path(), PathBuf::from("/tmp/cf/copyforge.db"));
    }

    #[test]
    fn test_token_budgets_per_stage() {
        let budgets = StageTokenBudgets::default();
        assert_eq!(budgets.for_stage(StageKind::Avatar), 1500);
        assert_eq!(budgets.for_stage(StageKind::Research), 0);
    }

    #[test]
    fn test_secrets_are_not_serialized() {
        let mut config = Config::default();
        config.storage.supabase_key = Some("secret-key".into());
        config.providers[0].api_key = Some("sk-test".into());
        let rendered = toml::to_string(&config).unwrap();
        assert!(!rendered.contains("secret-key"));
        assert!(!rendered.contains("sk-test"));
        assert!(format!("{:?}", config.storage).contains("[REDACTED]"));
    }
}
