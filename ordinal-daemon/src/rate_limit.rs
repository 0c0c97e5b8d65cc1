//! Fixed-window limiter for `save_order`, keyed by caller.

use std::collections::HashMap;
use std::time::Duration;

use tokio::time::Instant;

use ordinal_core::config::RateLimitConfig;

use crate::error::DaemonError;

#[derive(Debug, Clone, Copy)]
struct Window {
    started: Instant,
    count: u32,
}

/// Allows `max` calls per caller per `window`. A `max` of zero disables limiting.
#[derive(Debug)]
pub struct RateLimiter {
    max: u32,
    window: Duration,
    windows: HashMap<String, Window>,
}

impl RateLimiter {
    pub fn new(max: u32, window: Duration) -> Self {
        Self {
            max,
            window,
            windows: HashMap::new(),
        }
    }

    pub fn from_config(config: &RateLimitConfig) -> Self {
        Self::new(config.max_saves, config.window())
    }

    /// Count one call for `caller` at `now`, or reject it.
    pub fn check(&mut self, caller: &str, now: Instant) -> Result<(), DaemonError> {
        if self.max == 0 {
            return Ok(());
        }
        let window = self.window;
        self.windows
            .retain(|_, w| now.duration_since(w.started) < window);

        let entry = self.windows.entry(caller.to_string()).or_insert(Window {
            started: now,
            count: 0,
        });
        if entry.count >= self.max {
            let elapsed = now.duration_since(entry.started);
            let retry_after = window.saturating_sub(elapsed);
            return Err(DaemonError::RateLimited {
                caller: caller.to_string(),
                retry_after_secs: retry_after.as_secs().max(1),
            });
        }
        entry.count += 1;
        Ok(())
    }
}
