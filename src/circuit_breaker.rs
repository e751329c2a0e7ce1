//! Circuit breaker shared by the remote embedding and compression backends
//!
//! After `failure_threshold` consecutive failures a provider is skipped
//! outright until `reset_timeout` has elapsed; the next call is then let
//! through as a probe.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};

/// Breaker state for a single provider
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BreakerState {
    Closed,
    Open,
    HalfOpen,
}

#[derive(Debug, Clone)]
struct ProviderHealth {
    state: BreakerState,
    consecutive_failures: usize,
    opened_at: Option<Instant>,
}

impl ProviderHealth {
    fn healthy() -> Self {
        Self {
            state: BreakerState::Closed,
            consecutive_failures: 0,
            opened_at: None,
        }
    }
}

/// Circuit breaker configuration
#[derive(Debug, Clone)]
pub struct CircuitBreakerConfig {
    pub failure_threshold: usize,
    pub reset_timeout: Duration,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            reset_timeout: Duration::from_secs(30),
        }
    }
}

/// Tracks provider health keyed by provider name
#[derive(Clone)]
pub struct CircuitBreaker {
    providers: Arc<Mutex<HashMap<String, ProviderHealth>>>,
    config: CircuitBreakerConfig,
}

impl CircuitBreaker {
    pub fn new(config: CircuitBreakerConfig) -> Self {
        Self {
            providers: Arc::new(Mutex::new(HashMap::new())),
            config,
        }
    }

    fn providers(&self) -> MutexGuard<'_, HashMap<String, ProviderHealth>> {
        // Health bookkeeping stays usable even if a holder panicked.
        self.providers.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Whether a call to `provider` may go out right now
    pub fn allow(&self, provider: &str) -> bool {
        let mut providers = self.providers();
        let health = providers
            .entry(provider.to_string())
            .or_insert_with(ProviderHealth::healthy);

        match health.state {
            BreakerState::Closed | BreakerState::HalfOpen => true,
            BreakerState::Open => match health.opened_at {
                Some(opened_at) if opened_at.elapsed() >= self.config.reset_timeout => {
                    health.state = BreakerState::HalfOpen;
                    true
                }
                _ => false,
            },
        }
    }

    pub fn record_success(&self, provider: &str) {
        self.providers()
            .insert(provider.to_string(), ProviderHealth::healthy());
    }

    pub fn record_failure(&self, provider: &str) {
        let mut providers = self.providers();
        let health = providers
            .entry(provider.to_string())
            .or_insert_with(ProviderHealth::healthy);

        health.consecutive_failures += 1;
        // A failed probe re-opens immediately.
        if health.state == BreakerState::HalfOpen
            || health.consecutive_failures >= self.config.failure_threshold
        {
            health.state = BreakerState::Open;
            health.opened_at = Some(Instant::now());
        }
    }

    pub fn state(&self, provider: &str) -> BreakerState {
        self.providers()
            .get(provider)
            .map(|h| h.state)
            .unwrap_or(BreakerState::Closed)
    }

    pub fn consecutive_failures(&self, provider: &str) -> usize {
        self.providers()
            .get(provider)
            .map(|h| h.consecutive_failures)
            .unwrap_or(0)
    }
}

impl Default for CircuitBreaker {
    fn default() -> Self {
        Self::new(CircuitBreakerConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn breaker(threshold: usize, reset: Duration) -> CircuitBreaker {
        CircuitBreaker::new(CircuitBreakerConfig {
            failure_threshold: threshold,
            reset_timeout: reset,
        })
    }

    #[test]
    fn test_closed_by_default() {
        let breaker = CircuitBreaker::default();
        assert!(breaker.allow("llm"));
        assert_eq!(breaker.state("llm"), BreakerState::Closed);
    }

    #[test]
    fn test_opens_after_threshold() {
        let breaker = breaker(2, Duration::from_secs(30));
        breaker.record_failure("llm");
        assert!(breaker.allow("llm"));
        breaker.record_failure("llm");
        assert!(!breaker.allow("llm"));
        assert_eq!(breaker.state("llm"), BreakerState::Open);
        // other providers are unaffected
        assert!(breaker.allow("embedding"));
    }

    #[test]
    fn test_success_resets_failures() {
        let breaker = breaker(3, Duration::from_secs(30));
        breaker.record_failure("llm");
        breaker.record_failure("llm");
        breaker.record_success("llm");
        assert_eq!(breaker.consecutive_failures("llm"), 0);
        assert_eq!(breaker.state("llm"), BreakerState::Closed);
    }

    #[test]
    fn test_half_open_probe_after_timeout() {
        let breaker = breaker(1, Duration::from_millis(50));
        breaker.record_failure("llm");
        assert!(!breaker.allow("llm"));

        std::thread::sleep(Duration::from_millis(80));
        assert!(breaker.allow("llm"));
        assert_eq!(breaker.state("llm"), BreakerState::HalfOpen);

        breaker.record_failure("llm");
        assert!(!breaker.allow("llm"));
    }
}
