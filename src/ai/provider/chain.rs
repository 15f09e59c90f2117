//! Fallback Provider Chain with Circuit Breaker
//!
//! The chain is what the pipeline generates through. It tries providers in
//! configured order and routes each failure by [`ErrorCategory`]:
//!
//! 1. Skip providers whose circuit is open
//! 2. Try the provider (up to `max_retries` attempts, default one)
//! 3. On failure, classify the error and update the circuit breaker
//! 4. Rate limits and transient errors back off before retrying
//! 5. Auth, token limit and unavailable errors fall over to the next provider
//! 6. Bad requests stop the chain; the next provider would fail the same way
//!
//! A chain that fails completely returns the last error. Stage isolation above
//! turns it into a fallback payload.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use dashmap::DashMap;
use rand::Rng;
use serde::Serialize;
use tokio::time::sleep;
use tracing::{debug, info, instrument, warn};

use super::circuit_breaker::{CircuitBreaker, CircuitBreakerConfig, CircuitBreakerStats, CircuitState};
use super::{LlmProvider, LlmResponse, SharedProvider};
use crate::config::ChainSettings;
use crate::constants::chain as chain_constants;
use crate::types::{ErrorCategory, ErrorClassifier, ForgeError, LlmError, Result};

/// Provider with its retry budget
#[derive(Clone)]
pub struct ChainedProvider {
    pub provider: SharedProvider,
    pub max_retries: u8,
}

impl ChainedProvider {
    pub fn new(provider: SharedProvider) -> Self {
        Self {
            provider,
            max_retries: chain_constants::DEFAULT_MAX_RETRIES,
        }
    }

    pub fn with_max_retries(mut self, retries: u8) -> Self {
        self.max_retries = retries.max(1);
        self
    }
}

#[derive(Debug, Clone)]
pub struct ChainConfig {
    /// Attempts per provider
    pub max_retries: u8,
    pub base_delay: Duration,
    pub max_delay: Duration,
    pub backoff_factor: f32,
    pub circuit_breaker: CircuitBreakerConfig,
}

impl Default for ChainConfig {
    fn default() -> Self {
        Self {
            max_retries: chain_constants::DEFAULT_MAX_RETRIES,
            base_delay: Duration::from_millis(chain_constants::BASE_DELAY_MS),
            max_delay: Duration::from_secs(chain_constants::MAX_DELAY_SECS),
            backoff_factor: chain_constants::BACKOFF_FACTOR,
            circuit_breaker: CircuitBreakerConfig::default(),
        }
    }
}

impl ChainConfig {
    pub fn from_settings(settings: &ChainSettings) -> Self {
        Self {
            max_retries: settings.max_retries.max(1),
            base_delay: Duration::from_millis(settings.base_delay_ms),
            max_delay: Duration::from_secs(settings.max_delay_secs),
            backoff_factor: chain_constants::BACKOFF_FACTOR,
            circuit_breaker: CircuitBreakerConfig::new(
                settings.failure_threshold,
                Duration::from_secs(settings.recovery_timeout_secs),
            ),
        }
    }
}

/// One attempt against one provider
#[derive(Debug)]
pub struct ChainAttempt {
    pub provider_name: String,
    pub attempt_number: u8,
    pub error: Option<LlmError>,
    pub duration_ms: u64,
}

/// Execution record for one chain call
#[derive(Debug, Default)]
pub struct ChainStats {
    pub total_attempts: usize,
    pub successful_provider: Option<String>,
    pub attempts: Vec<ChainAttempt>,
    pub skipped_circuit_open: usize,
}

/// Provider health as reported by `/status`
#[derive(Debug, Clone, Serialize)]
pub struct ProviderStatus {
    pub available: bool,
    pub model: String,
    pub circuit: CircuitBreakerStats,
}

/// Ordered generation providers with per-provider circuit breakers
///
/// Clones share breaker state.
#[derive(Clone)]
pub struct ProviderChain {
    providers: Vec<ChainedProvider>,
    config: ChainConfig,
    circuit_breakers: Arc<DashMap<String, CircuitBreaker>>,
}

impl ProviderChain {
    pub fn new(config: ChainConfig) -> Self {
        Self {
            providers: Vec::new(),
            config,
            circuit_breakers: Arc::new(DashMap::new()),
        }
    }

    /// Chain over already-built providers, in order
    pub fn from_providers(providers: Vec<SharedProvider>, config: ChainConfig) -> Self {
        providers
            .into_iter()
            .fold(Self::new(config), |chain, provider| chain.add_provider(provider))
    }

    pub fn add_provider(self, provider: SharedProvider) -> Self {
        let retries = self.config.max_retries;
        self.add_chained(ChainedProvider::new(provider).with_max_retries(retries))
    }

    pub fn add_chained(mut self, entry: ChainedProvider) -> Self {
        let name = entry.provider.name().to_string();
        self.circuit_breakers
            .entry(name.clone())
            .or_insert_with(|| CircuitBreaker::new(name, self.config.circuit_breaker.clone()));
        self.providers.push(entry);
        self
    }

    pub fn len(&self) -> usize {
        self.providers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.providers.is_empty()
    }

    fn breaker_allows(&self, name: &str) -> bool {
        self.circuit_breakers
            .get(name)
            .map(|cb| cb.allow_request())
            .unwrap_or(true)
    }

    fn breaker_state(&self, name: &str) -> CircuitState {
        self.circuit_breakers
            .get(name)
            .map(|cb| cb.state())
            .unwrap_or(CircuitState::Closed)
    }

    /// Generate through the chain, returning the response and attempt record
    #[instrument(skip(self, prompt), fields(providers = self.providers.len()))]
    pub async fn execute(&self, prompt: &str, max_tokens: usize) -> Result<(LlmResponse, ChainStats)> {
        let mut stats = ChainStats::default();

        if self.providers.is_empty() {
            return Err(LlmError::new(
                ErrorCategory::Unavailable,
                "No generation providers available",
            )
            .into());
        }

        let mut last_error: Option<ForgeError> = None;

        for entry in &self.providers {
            let provider = &entry.provider;
            let name = provider.name().to_string();
            let mut delay = self.config.base_delay;

            if self.breaker_state(&name) == CircuitState::Open {
                debug!(provider = %name, "Skipping provider (circuit open)");
                stats.skipped_circuit_open += 1;
                continue;
            }

            for attempt in 1..=entry.max_retries {
                if !self.breaker_allows(&name) {
                    debug!(provider = %name, "Circuit breaker blocked request");
                    break;
                }

                stats.total_attempts += 1;
                let started = std::time::Instant::now();

                match provider.generate(prompt, max_tokens).await {
                    Ok(response) => {
                        if let Some(cb) = self.circuit_breakers.get(&name) {
                            cb.record_success();
                        }
                        stats.attempts.push(ChainAttempt {
                            provider_name: name.clone(),
                            attempt_number: attempt,
                            error: None,
                            duration_ms: started.elapsed().as_millis() as u64,
                        });
                        info!(provider = %name, attempts = stats.total_attempts, "Generation succeeded");
                        stats.successful_provider = Some(name);
                        return Ok((response, stats));
                    }
                    Err(err) => {
                        let classified = ErrorClassifier::classify_forge_error(&err, &name);
                        if let Some(cb) = self.circuit_breakers.get(&name) {
                            cb.record_failure(classified.message.clone());
                        }
                        stats.attempts.push(ChainAttempt {
                            provider_name: name.clone(),
                            attempt_number: attempt,
                            error: Some(classified.clone()),
                            duration_ms: started.elapsed().as_millis() as u64,
                        });

                        warn!(
                            provider = %name,
                            attempt,
                            category = %classified.category,
                            error = %err,
                            "Provider failed"
                        );
                        last_error = Some(err);

                        if self.breaker_state(&name) == CircuitState::Open {
                            break;
                        }

                        let more_attempts = attempt < entry.max_retries;
                        match classified.category {
                            ErrorCategory::BadRequest => {
                                warn!("Bad request, stopping chain");
                                break;
                            }
                            ErrorCategory::Auth
                            | ErrorCategory::TokenLimit
                            | ErrorCategory::Unavailable => {
                                info!(provider = %name, "Falling over to next provider");
                                break;
                            }
                            ErrorCategory::RateLimit if more_attempts => {
                                let wait = classified
                                    .retry_after
                                    .or_else(|| parse_rate_limit_delay(&classified.message))
                                    .unwrap_or(self.config.max_delay)
                                    .min(self.config.max_delay);
                                info!(wait_secs = wait.as_secs(), "Rate limited, waiting before retry");
                                sleep(wait).await;
                            }
                            ErrorCategory::Network
                            | ErrorCategory::Transient
                            | ErrorCategory::ParseError
                            | ErrorCategory::Unknown
                                if more_attempts =>
                            {
                                let wait = delay + random_jitter(delay);
                                debug!(wait_ms = wait.as_millis(), "Retrying after backoff");
                                sleep(wait).await;
                                delay = calculate_backoff(
                                    delay,
                                    self.config.backoff_factor,
                                    self.config.max_delay,
                                );
                            }
                            _ => {}
                        }
                    }
                }
            }

            if matches!(
                stats.attempts.last().and_then(|a| a.error.as_ref()).map(|e| e.category),
                Some(ErrorCategory::BadRequest)
            ) {
                break;
            }
        }

        Err(last_error.unwrap_or_else(|| {
            LlmError::new(
                ErrorCategory::Unavailable,
                "All generation providers are unavailable (circuits open)",
            )
            .into()
        }))
    }

    /// Per-provider availability and breaker counters, keyed by provider name
    pub fn status(&self) -> BTreeMap<String, ProviderStatus> {
        self.providers
            .iter()
            .map(|entry| {
                let name = entry.provider.name().to_string();
                let circuit = self
                    .circuit_breakers
                    .get(&name)
                    .map(|cb| cb.stats())
                    .unwrap_or_else(|| CircuitBreaker::with_defaults(name.clone()).stats());
                let status = ProviderStatus {
                    available: circuit.state != CircuitState::Open,
                    model: entry.provider.model().to_string(),
                    circuit,
                };
                (name, status)
            })
            .collect()
    }

    /// Providers whose circuit currently admits requests
    pub fn available_count(&self) -> usize {
        self.providers
            .iter()
            .filter(|entry| self.breaker_state(entry.provider.name()) != CircuitState::Open)
            .count()
    }

    /// Clear error state for one provider or all of them; returns how many
    /// breakers were reset.
    pub fn reset_errors(&self, provider: Option<&str>) -> usize {
        self.circuit_breakers
            .iter()
            .filter(|entry| provider.is_none_or(|wanted| entry.key() == wanted))
            .map(|entry| entry.value().reset())
            .filter(|changed| *changed)
            .count()
    }

    pub fn circuit_state(&self, provider_name: &str) -> Option<CircuitState> {
        self.circuit_breakers.get(provider_name).map(|cb| cb.state())
    }

    pub fn has_provider(&self, name: &str) -> bool {
        self.circuit_breakers.contains_key(name)
    }

    pub fn providers(&self) -> impl Iterator<Item = &SharedProvider> {
        self.providers.iter().map(|p| &p.provider)
    }
}

#[async_trait]
impl LlmProvider for ProviderChain {
    async fn generate(&self, prompt: &str, max_tokens: usize) -> Result<LlmResponse> {
        let (response, _stats) = self.execute(prompt, max_tokens).await?;
        Ok(response)
    }

    fn name(&self) -> &str {
        "provider-chain"
    }

    fn model(&self) -> &str {
        self.providers
            .first()
            .map(|p| p.provider.model())
            .unwrap_or("none")
    }

    async fn health_check(&self) -> Result<bool> {
        for entry in &self.providers {
            if entry.provider.health_check().await.unwrap_or(false) {
                return Ok(true);
            }
        }
        Ok(false)
    }
}

/// Retry-after seconds from common rate limit messages, capped at five minutes.
fn parse_rate_limit_delay(message: &str) -> Option<Duration> {
    let lower = message.to_lowercase();

    ["retry", "wait ", "in "]
        .iter()
        .filter_map(|pattern| lower.find(pattern).map(|idx| &lower[idx + pattern.len()..]))
        .find_map(|rest| {
            rest.split_whitespace()
                .map(|word| word.trim_matches(|c: char| !c.is_ascii_digit()))
                .find_map(|word| word.parse::<u64>().ok())
        })
        .map(|secs| Duration::from_secs(secs.min(300)))
}

fn random_jitter(base_delay: Duration) -> Duration {
    let max_jitter_ms = (base_delay.as_millis() as u64) / 4;
    if max_jitter_ms == 0 {
        return Duration::ZERO;
    }
    Duration::from_millis(rand::rng().random_range(0..max_jitter_ms))
}

fn calculate_backoff(current: Duration, factor: f32, max: Duration) -> Duration {
    let next = Duration::from_secs_f32(current.as_secs_f32() * factor);
    std::cmp::min(next, max)
}
