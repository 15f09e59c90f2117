//! Text Generation Providers
//!
//! Defines the [`LlmProvider`] trait every pipeline stage generates through.
//! Providers return raw text; turning it into structured data is the job of
//! [`crate::ai::json`].
//!
//! ## Modules
//!
//! - `chain`: Fallback provider chain with cascading attempts
//! - `circuit_breaker`: Circuit breaker pattern for provider resilience

mod chain;
mod circuit_breaker;
mod ollama;
mod openai;

pub use chain::{ChainConfig, ChainStats, ChainedProvider, ProviderChain, ProviderStatus};
pub use circuit_breaker::{
    CircuitBreaker, CircuitBreakerConfig, CircuitBreakerStats, CircuitState,
};
pub use ollama::OllamaProvider;
pub use openai::OpenAiProvider;

pub use crate::types::{ErrorCategory, ErrorClassifier, LlmError};

#[cfg(test)]
pub(crate) use chain::tests::MockProvider;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::warn;

use crate::types::{ForgeError, Result};

// =============================================================================
// LLM Response
// =============================================================================

/// Generated text plus usage and timing
#[derive(Debug, Clone)]
pub struct LlmResponse {
    /// Generated text, possibly wrapping a fenced JSON block
    pub content: String,
    pub usage: TokenUsage,
    pub timing: ResponseTiming,
    pub metadata: ResponseMetadata,
}

impl LlmResponse {
    /// Response with content only (usage unknown)
    pub fn text(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            usage: TokenUsage::default(),
            timing: ResponseTiming::default(),
            metadata: ResponseMetadata::default(),
        }
    }

    pub fn with_metrics(
        content: String,
        usage: TokenUsage,
        timing: ResponseTiming,
        metadata: ResponseMetadata,
    ) -> Self {
        Self {
            content,
            usage,
            timing,
            metadata,
        }
    }
}

/// Token usage reported by the provider
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TokenUsage {
    pub input_tokens: u32,
    pub output_tokens: u32,
}

impl TokenUsage {
    pub fn new(input_tokens: u32, output_tokens: u32) -> Self {
        Self {
            input_tokens,
            output_tokens,
        }
    }

    pub fn total(&self) -> u32 {
        self.input_tokens + self.output_tokens
    }
}

/// Response timing metrics
#[derive(Debug, Clone, Default)]
pub struct ResponseTiming {
    /// Wall clock time in milliseconds
    pub total_ms: u64,
}

impl ResponseTiming {
    pub fn from_duration(duration: std::time::Duration) -> Self {
        Self {
            total_ms: duration.as_millis() as u64,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct ResponseMetadata {
    pub model: String,
    pub provider: String,
}

/// Shared provider handle injected into the pipeline.
pub type SharedProvider = Arc<dyn LlmProvider + Send + Sync>;

// =============================================================================
// Provider Configuration
// =============================================================================

/// Configuration for one generation provider
///
/// API keys are never serialized and are redacted in debug output. Each
/// provider converts the key to `SecretString` internally.
#[derive(Clone, Serialize, Deserialize)]
pub struct ProviderConfig {
    /// Display name used in status reports (defaults to `provider`)
    #[serde(default)]
    pub name: Option<String>,
    /// Provider type: "openai", "ollama"
    pub provider: String,
    /// Model name (provider-specific)
    #[serde(default)]
    pub model: Option<String>,
    /// Request timeout in seconds
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default = "default_temperature")]
    pub temperature: f32,
    /// Never serialized to output
    #[serde(default, skip_serializing)]
    pub api_key: Option<String>,
    /// Environment variable holding the API key
    #[serde(default)]
    pub api_key_env: Option<String>,
    /// API base URL (for compatible endpoints)
    #[serde(default)]
    pub api_base: Option<String>,
    /// Upper bound on completion tokens; stages ask for less
    #[serde(default = "default_max_tokens")]
    pub max_tokens: usize,
}

impl ProviderConfig {
    pub fn display_name(&self) -> &str {
        self.name.as_deref().unwrap_or(&self.provider)
    }

    /// Inline key, falling back to the configured environment variable
    pub fn resolve_api_key(&self) -> Option<String> {
        self.api_key.clone().filter(|k| !k.is_empty()).or_else(|| {
            self.api_key_env
                .as_deref()
                .and_then(|var| std::env::var(var).ok())
                .filter(|v| !v.is_empty())
        })
    }
}

impl std::fmt::Debug for ProviderConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProviderConfig")
            .field("name", &self.name)
            .field("provider", &self.provider)
            .field("model", &self.model)
            .field("timeout_secs", &self.timeout_secs)
            .field("temperature", &self.temperature)
            .field("api_key", &self.api_key.as_ref().map(|_| "[REDACTED]"))
            .field("api_key_env", &self.api_key_env)
            .field("api_base", &self.api_base)
            .field("max_tokens", &self.max_tokens)
            .finish()
    }
}

fn default_timeout_secs() -> u64 {
    crate::constants::pipeline::STAGE_TIMEOUT_SECS
}

fn default_temperature() -> f32 {
    0.7
}

fn default_max_tokens() -> usize {
    4096
}

impl Default for ProviderConfig {
    fn default() -> Self {
        Self {
            name: None,
            provider: "openai".to_string(),
            model: None,
            timeout_secs: default_timeout_secs(),
            temperature: default_temperature(),
            api_key: None,
            api_key_env: None,
            api_base: None,
            max_tokens: default_max_tokens(),
        }
    }
}

// =============================================================================
// LLM Provider Trait
// =============================================================================

/// Text generation provider
#[async_trait]
pub trait LlmProvider: Send + Sync {
    /// Generate a completion for `prompt`, bounded by `max_tokens`.
    async fn generate(&self, prompt: &str, max_tokens: usize) -> Result<LlmResponse>;

    /// Provider name for logging and status reports
    fn name(&self) -> &str;

    /// Model name currently in use
    fn model(&self) -> &str;

    /// Check if the provider is reachable
    async fn health_check(&self) -> Result<bool>;
}

/// Create a shared provider from configuration
pub fn create_provider(config: &ProviderConfig) -> Result<SharedProvider> {
    match config.provider.as_str() {
        "openai" => Ok(Arc::new(OpenAiProvider::new(config.clone())?)),
        "ollama" => Ok(Arc::new(OllamaProvider::new(config.clone())?)),
        _ => Err(ForgeError::Config(format!(
            "Unknown provider: {}. Supported: openai, ollama",
            config.provider
        ))),
    }
}

/// Build every configured provider, skipping the ones that cannot start
/// (missing key, bad endpoint).
pub fn create_providers(configs: &[ProviderConfig]) -> Vec<SharedProvider> {
    configs
        .iter()
        .filter_map(|config| match create_provider(config) {
            Ok(provider) => Some(provider),
            Err(e) => {
                warn!("Provider '{}' unavailable: {}", config.display_name(), e);
                None
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unknown_provider_rejected() {
        let config = ProviderConfig {
            provider: "gemini".into(),
            ..Default::default()
        };
        assert!(matches!(create_provider(&config), Err(ForgeError::Config(_))));
    }

    #[test]
    fn test_create_providers_skips_broken_entries() {
        let configs = vec![
            ProviderConfig {
                provider: "ollama".into(),
                api_base: Some("ftp://nope".into()),
                ..Default::default()
            },
            ProviderConfig {
                provider: "ollama".into(),
                ..Default::default()
            },
        ];
        let providers = create_providers(&configs);
        assert_eq!(providers.len(), 1);
        assert_eq!(providers[0].name(), "ollama");
    }

    #[test]
    fn test_resolve_api_key_prefers_inline() {
        let config = ProviderConfig {
            api_key: Some("sk-inline".into()),
            api_key_env: Some("COPYFORGE_TEST_UNSET_KEY".into()),
            ..Default::default()
        };
        assert_eq!(config.resolve_api_key().as_deref(), Some("sk-inline"));

        let config = ProviderConfig {
            api_key_env: Some("COPYFORGE_TEST_UNSET_KEY".into()),
            ..Default::default()
        };
        assert!(config.resolve_api_key().is_none());
        assert_eq!(config.display_name(), "openai");
    }

    #[test]
    fn test_debug_redacts_key() {
        let config = ProviderConfig {
            api_key: Some("sk-secret".into()),
            ..Default::default()
        };
        let rendered = format!("{:?}", config);
        assert!(!rendered.contains("sk-secret"));
        assert!(rendered.contains("[REDACTED]"));
    }
}
