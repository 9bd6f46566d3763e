use crate::types::{RateLimitConfig, Result};
use std::collections::HashMap;
use tokio::sync::Mutex;
use tokio::time::{sleep, sleep_until, Duration, Instant};
use tracing::debug;

/// Global token bucket plus per-domain minimum spacing.
///
/// All counters sit behind one mutex so any number of concurrent fetchers
/// observe a single, consistent pacing state. The lock is never held while
/// sleeping.
pub struct DomainRateLimiter {
    config: RateLimitConfig,
    state: Mutex<LimiterState>,
}

struct LimiterState {
    tokens: f64,
    last_refill: Instant,
    last_request: HashMap<String, Instant>,
}

impl LimiterState {
    fn refill(&mut self, now: Instant, config: &RateLimitConfig) {
        let elapsed = now.saturating_duration_since(self.last_refill).as_secs_f64();
        self.tokens = (self.tokens + elapsed * config.refill_per_second).min(config.capacity as f64);
        self.last_refill = now;
    }
}

impl DomainRateLimiter {
    pub fn new(config: RateLimitConfig) -> Result<Self> {
        config.validate()?;
        let state = LimiterState {
            tokens: config.capacity as f64,
            last_refill: Instant::now(),
            last_request: HashMap::new(),
        };

        Ok(Self {
            config,
            state: Mutex::new(state),
        })
    }

    pub fn config(&self) -> &RateLimitConfig {
        &self.config
    }

    /// Suspends until both the global bucket and the domain spacing allow a
    /// request to `domain`.
    pub async fn acquire(&self, domain: &str) {
        self.take_token().await;
        self.wait_for_domain(domain).await;
    }

    async fn take_token(&self) {
        loop {
            let wait = {
                let mut state = self.state.lock().await;
                state.refill(Instant::now(), &self.config);
                if state.tokens >= 1.0 {
                    state.tokens -= 1.0;
                    return;
                }
                let missing = 1.0 - state.tokens;
                Duration::from_secs_f64(missing / self.config.refill_per_second)
            };

            debug!("Global request budget exhausted, waiting {:?}", wait);
            sleep(wait).await;
        }
    }

    async fn wait_for_domain(&self, domain: &str) {
        let slot = {
            let mut state = self.state.lock().await;
            let now = Instant::now();
            let slot = match state.last_request.get(domain) {
                Some(&last) => (last + self.config.domain_delay).max(now),
                None => now,
            };
            // The slot is reserved before sleeping so that concurrent callers
            // for the same domain queue up behind it.
            state.last_request.insert(domain.to_string(), slot);
            slot
        };

        if slot > Instant::now() {
            debug!(
                "Rate limiting {}: waiting {:?}",
                domain,
                slot.saturating_duration_since(Instant::now())
            );
            sleep_until(slot).await;
        }
    }
}
