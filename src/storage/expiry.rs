//! Active Expiry
//!
//! Lazy expiry (checking on access) never reclaims a key that is not read
//! again. The active cycle fixes that: on every cron tick it samples keys
//! that carry a TTL and deletes the ones whose deadline has passed.
//!
//! ## Adaptive Effort
//!
//! One round samples up to `samples_per_round` keys. If more than
//! `repeat_threshold` of a round was expired, many more are probably waiting,
//! so another round runs right away, until the time budget is spent.

use super::db::{unix_time_ms, Database};
use std::time::{Duration, Instant};
use tracing::{debug, trace};

/// Configuration for the active expiry cycle.
#[derive(Debug, Clone)]
pub struct ExpiryConfig {
    /// Keys sampled per round (default: 20)
    pub samples_per_round: usize,

    /// If this fraction of a round is expired, run another round (default: 0.25)
    pub repeat_threshold: f64,

    /// Wall-clock budget of one cycle (default: 1ms)
    pub time_budget: Duration,
}

impl Default for ExpiryConfig {
    fn default() -> Self {
        Self {
            samples_per_round: 20,
            repeat_threshold: 0.25,
            time_budget: Duration::from_millis(1),
        }
    }
}

/// Runs one active expiry cycle and returns the number of keys removed.
pub fn active_expire_cycle(db: &mut Database, config: &ExpiryConfig) -> usize {
    let start = Instant::now();
    let mut total = 0;
    let mut rounds = 0;

    loop {
        let candidates = db.expires_len().min(config.samples_per_round);
        if candidates == 0 {
            break;
        }
        rounds += 1;

        let now = unix_time_ms();
        let mut expired = 0;
        for _ in 0..candidates {
            let Some((key, when)) = db.random_expiring() else {
                break;
            };
            if when <= now {
                db.evict_expired(&key);
                expired += 1;
            }
        }
        total += expired;

        let rate = expired as f64 / candidates as f64;
        trace!(round = rounds, sampled = candidates, expired = expired, "Expiry round");
        if rate <= config.repeat_threshold || start.elapsed() >= config.time_budget {
            break;
        }
    }

    if total > 0 {
        debug!(
            expired = total,
            rounds = rounds,
            keys_remaining = db.len(),
            "Expired keys cleaned up"
        );
    }
    total
}
