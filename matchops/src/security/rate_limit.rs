//! Sliding-window rate limiting keyed by client

use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};

/// Limit of one limiter
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LimiterConfig {
    pub window_secs: u64,

    /// Requests allowed per window
    pub max: u32,

    /// Successful requests are refunded and do not count
    #[serde(default)]
    pub skip_successful: bool,

    /// Reported when the limit is hit
    pub message: String,
}

impl LimiterConfig {
    /// 5 failed attempts per hour
    pub fn auth_default() -> Self {
        Self {
            window_secs: 60 * 60,
            max: 5,
            skip_successful: true,
            message: "Too many authentication attempts, please try again later".to_string(),
        }
    }

    /// 100 requests per 15 minutes
    pub fn general_default() -> Self {
        Self {
            window_secs: 15 * 60,
            max: 100,
            skip_successful: false,
            message: "Too many requests, please try again later".to_string(),
        }
    }
}

/// Outcome of one hit
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateDecision {
    pub allowed: bool,
    pub remaining: u32,
    pub retry_after: Option<Duration>,
}

/// Per-key hit log over a sliding window
///
/// Rejected hits are not recorded, so a blocked client is released once
/// its oldest counted hit leaves the window.
pub struct RateLimiter {
    name: String,
    config: LimiterConfig,
    hits: Mutex<HashMap<String, VecDeque<Instant>>>,
}

impl RateLimiter {
    pub fn new(name: impl Into<String>, config: LimiterConfig) -> Self {
        Self {
            name: name.into(),
            config,
            hits: Mutex::new(HashMap::new()),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn config(&self) -> &LimiterConfig {
        &self.config
    }

    fn window(&self) -> Duration {
        Duration::from_secs(self.config.window_secs)
    }

    /// Count a request from `key`
    pub fn hit(&self, key: &str) -> RateDecision {
        self.hit_at(key, Instant::now())
    }

    pub fn hit_at(&self, key: &str, now: Instant) -> RateDecision {
        let window = self.window();
        let mut hits = self.hits.lock().unwrap_or_else(|e| e.into_inner());
        let log = hits.entry(key.to_string()).or_default();

        while let Some(oldest) = log.front() {
            if now.saturating_duration_since(*oldest) >= window {
                log.pop_front();
            } else {
                break;
            }
        }

        if log.len() as u32 >= self.config.max {
            let retry_after = log
                .front()
                .map(|oldest| window.saturating_sub(now.saturating_duration_since(*oldest)));
            return RateDecision {
                allowed: false,
                remaining: 0,
                retry_after,
            };
        }

        log.push_back(now);
        RateDecision {
            allowed: true,
            remaining: self.config.max - log.len() as u32,
            retry_after: None,
        }
    }

    /// Give back the most recent hit of `key` if successes are not counted
    pub fn refund(&self, key: &str) {
        if !self.config.skip_successful {
            return;
        }
        let mut hits = self.hits.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(log) = hits.get_mut(key) {
            log.pop_back();
            if log.is_empty() {
                hits.remove(key);
            }
        }
    }

    /// Drop keys whose hits have all left the window
    pub fn prune(&self) -> usize {
        let now = Instant::now();
        let window = self.window();
        let mut hits = self.hits.lock().unwrap_or_else(|e| e.into_inner());
        let before = hits.len();
        hits.retain(|_, log| {
            log.back()
                .is_some_and(|last| now.saturating_duration_since(*last) < window)
        });
        before - hits.len()
    }
}

/// Auth limiter for the authentication path prefix, general limiter elsewhere
pub struct RateLimiters {
    auth_prefix: String,
    auth: RateLimiter,
    general: RateLimiter,
}

impl RateLimiters {
    pub fn new(auth_prefix: impl Into<String>, auth: LimiterConfig, general: LimiterConfig) -> Self {
        Self {
            auth_prefix: auth_prefix.into(),
            auth: RateLimiter::new("auth", auth),
            general: RateLimiter::new("general", general),
        }
    }

    pub fn for_path(&self, path: &str) -> &RateLimiter {
        if path.starts_with(&self.auth_prefix) {
            &self.auth
        } else {
            &self.general
        }
    }

    pub fn prune(&self) -> usize {
        self.auth.prune() + self.general.prune()
    }
}

impl Default for RateLimiters {
    fn default() -> Self {
        Self::new("/api/auth", LimiterConfig::auth_default(), LimiterConfig::general_default())
    }
}
