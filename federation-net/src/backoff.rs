//! Exponential backoff with jitter, parameterised from configuration (§5).
//!
//! Mirrors the delay computation in `_send_heartbeat`: `base * factor^attempt`,
//! capped, then jittered by a uniform fraction in `[-jitter_frac, jitter_frac]`.

use rand::Rng;
use std::time::Duration;

#[derive(Clone, Copy, Debug)]
pub struct BackoffPolicy {
    pub base_delay: Duration,
    pub factor: f64,
    pub max_delay: Duration,
    pub jitter_frac: f64,
    pub max_attempts: u32,
}

impl BackoffPolicy {
    /// The release backoff defaults from §5: base 5s, factor 2, cap 30s, 5 attempts.
    pub fn release_default() -> Self {
        BackoffPolicy {
            base_delay: Duration::from_secs(5),
            factor: 2.0,
            max_delay: Duration::from_secs(30),
            jitter_frac: 0.1,
            max_attempts: 5,
        }
    }

    /// The delay to sleep before retry number `attempt` (0-indexed).
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let raw = self.base_delay.as_secs_f64() * self.factor.powi(attempt as i32);
        let capped = raw.min(self.max_delay.as_secs_f64());
        let jitter = rand::thread_rng().gen_range(-self.jitter_frac..self.jitter_frac);
        let jittered = (capped * (1.0 + jitter)).max(0.0);
        Duration::from_secs_f64(jittered)
    }
}
