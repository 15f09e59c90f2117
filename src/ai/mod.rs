//! Generation Layer
//!
//! Providers, the fallback chain, structured-output extraction and timeout
//! helpers used by every pipeline stage.

pub mod json;
pub mod provider;
pub mod timeout;

pub use json::{JsonRepairer, extract_fenced_block, parse_structured};
pub use provider::{
    ChainConfig, CircuitBreaker, CircuitBreakerConfig, CircuitBreakerStats, CircuitState,
    LlmProvider, LlmResponse, ProviderChain, ProviderConfig, ProviderStatus, SharedProvider,
    create_provider, create_providers,
};
pub use timeout::{remaining_budget, with_timeout, with_timeout_map};
