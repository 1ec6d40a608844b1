//! Shared state for HTTP handlers

use std::collections::HashSet;
use std::sync::Arc;

use super::rate_limit::RateLimiter;
use crate::config::ServerConfig;
use crate::tracker::Tracker;
use crate::utils::{Clock, SystemClock};

pub struct AppState {
    pub tracker: Arc<Tracker>,
    pub limiter: Arc<RateLimiter>,
    pub blocked_ips: HashSet<String>,
    /// Allowed CORS origins; empty allows any
    pub cors_origins: Vec<String>,
}

impl AppState {
    pub fn new(tracker: Arc<Tracker>, config: &ServerConfig) -> Self {
        Self::with_clock(tracker, config, Arc::new(SystemClock))
    }

    pub fn with_clock(tracker: Arc<Tracker>, config: &ServerConfig, clock: Arc<dyn Clock>) -> Self {
        Self {
            tracker,
            limiter: Arc::new(RateLimiter::new(
                config.rate_limit,
                config.rate_limit_window,
                clock,
            )),
            blocked_ips: config.blocked_ips.iter().cloned().collect(),
            cors_origins: config.cors_origins.clone(),
        }
    }

    /// Start the rate limiter cleanup
    pub fn start(&self) {
        self.limiter.start();
    }

    pub fn stop(&self) {
        self.limiter.stop();
    }
}
