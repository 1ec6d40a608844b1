//! Per-IP gate: blocklist plus fixed-window rate limit

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::extract::{ConnectInfo, Request, State};
use axum::http::HeaderMap;
use axum::middleware::Next;
use axum::response::Response;
use parking_lot::Mutex;

use super::error::ApiError;
use super::state::AppState;
use crate::utils::{duration_millis, Clock, PeriodicTask};

/// Client address as seen by the gate, available to handlers as an extension
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientIp(pub String);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    Allowed { remaining: u32 },
    Limited { retry_after_ms: i64 },
}

#[derive(Debug, Clone, Copy)]
struct Window {
    started: i64,
    count: u32,
}

/// Fixed-window request counter keyed by client IP
pub struct RateLimiter {
    /// Requests allowed per window; 0 disables limiting
    limit: u32,
    window_ms: i64,
    clock: Arc<dyn Clock>,
    windows: Mutex<HashMap<String, Window>>,
    cleanup: PeriodicTask,
}

impl RateLimiter {
    pub fn new(limit: u32, window: Duration, clock: Arc<dyn Clock>) -> Self {
        Self {
            limit,
            window_ms: duration_millis(window).max(1),
            clock,
            windows: Mutex::new(HashMap::new()),
            cleanup: PeriodicTask::new("rate-limit-cleanup", window.max(Duration::from_secs(1))),
        }
    }

    /// Start dropping expired windows once per window length
    pub fn start(self: &Arc<Self>) {
        let weak = Arc::downgrade(self);
        self.cleanup.start(move || {
            let weak = weak.clone();
            async move {
                if let Some(limiter) = weak.upgrade() {
                    limiter.purge_expired();
                }
            }
        });
    }

    pub fn stop(&self) {
        self.cleanup.stop();
    }

    pub fn check(&self, key: &str) -> Decision {
        if self.limit == 0 {
            return Decision::Allowed { remaining: u32::MAX };
        }

        let now = self.clock.now_millis();
        let mut windows = self.windows.lock();
        let window = windows.entry(key.to_string()).or_insert(Window {
            started: now,
            count: 0,
        });
        if now - window.started >= self.window_ms {
            *window = Window {
                started: now,
                count: 0,
            };
        }

        if window.count >= self.limit {
            return Decision::Limited {
                retry_after_ms: window.started + self.window_ms - now,
            };
        }
        window.count += 1;
        Decision::Allowed {
            remaining: self.limit - window.count,
        }
    }

    pub fn purge_expired(&self) -> usize {
        let now = self.clock.now_millis();
        let mut windows = self.windows.lock();
        let before = windows.len();
        windows.retain(|_, w| now - w.started < self.window_ms);
        before - windows.len()
    }

    pub fn tracked_clients(&self) -> usize {
        self.windows.lock().len()
    }
}

/// First `X-Forwarded-For` hop, then `X-Real-IP`, then the socket peer
pub fn client_ip(headers: &HeaderMap, peer: Option<&ConnectInfo<SocketAddr>>) -> String {
    let forwarded = headers
        .get("x-forwarded-for")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.split(',').next())
        .map(str::trim)
        .filter(|v| !v.is_empty());
    let real_ip = headers
        .get("x-real-ip")
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|v| !v.is_empty());

    forwarded
        .or(real_ip)
        .map(str::to_string)
        .or_else(|| peer.map(|ConnectInfo(addr)| addr.ip().to_string()))
        .unwrap_or_else(|| "unknown".to_string())
}

/// Middleware rejecting blocked and over-limit clients
pub async fn ip_gate(
    State(state): State<Arc<AppState>>,
    mut request: Request,
    next: Next,
) -> Result<Response, ApiError> {
    let ip = client_ip(
        request.headers(),
        request.extensions().get::<ConnectInfo<SocketAddr>>(),
    );

    if state.blocked_ips.contains(&ip) {
        tracing::warn!(ip = %ip, "blocked client");
        return Err(ApiError::Forbidden);
    }

    if let Decision::Limited { retry_after_ms } = state.limiter.check(&ip) {
        tracing::debug!(ip = %ip, "rate limited");
        let retry_after_secs = (retry_after_ms.max(0) as u64).div_ceil(1000);
        return Err(ApiError::RateLimited { retry_after_secs });
    }

    request.extensions_mut().insert(ClientIp(ip));
    Ok(next.run(request).await)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::utils::ManualClock;

    #[test]
    fn test_limit_resets_after_window() {
        let clock = Arc::new(ManualClock::new(0));
        let limiter = RateLimiter::new(2, Duration::from_secs(60), clock.clone());

        assert_eq!(limiter.check("1.2.3.4"), Decision::Allowed { remaining: 1 });
        assert_eq!(limiter.check("1.2.3.4"), Decision::Allowed { remaining: 0 });
        assert_eq!(
            limiter.check("1.2.3.4"),
            Decision::Limited {
                retry_after_ms: 60_000
            }
        );
        assert!(matches!(limiter.check("5.6.7.8"), Decision::Allowed { .. }));

        clock.advance(Duration::from_secs(60));
        assert_eq!(limiter.check("1.2.3.4"), Decision::Allowed { remaining: 1 });
    }

    #[test]
    fn test_zero_limit_disables() {
        let limiter = RateLimiter::new(0, Duration::from_secs(60), Arc::new(ManualClock::new(0)));
        for _ in 0..1000 {
            assert!(matches!(limiter.check("ip"), Decision::Allowed { .. }));
        }
        assert_eq!(limiter.tracked_clients(), 0);
    }

    #[test]
    fn test_purge_expired() {
        let clock = Arc::new(ManualClock::new(0));
        let limiter = RateLimiter::new(5, Duration::from_secs(10), clock.clone());
        limiter.check("a");
        clock.advance(Duration::from_secs(5));
        limiter.check("b");
        clock.advance(Duration::from_secs(6));

        assert_eq!(limiter.purge_expired(), 1);
        assert_eq!(limiter.tracked_clients(), 1);
    }

    #[test]
    fn test_client_ip_prefers_forwarded_header() {
        let mut headers = HeaderMap::new();
        let peer = ConnectInfo("10.0.0.9:5000".parse::<SocketAddr>().unwrap());
        assert_eq!(client_ip(&headers, Some(&peer)), "10.0.0.9");
        assert_eq!(client_ip(&headers, None), "unknown");

        headers.insert("x-real-ip", "192.168.1.1".parse().unwrap());
        assert_eq!(client_ip(&headers, Some(&peer)), "192.168.1.1");

        headers.insert("x-forwarded-for", "203.0.113.7, 10.0.0.1".parse().unwrap());
        assert_eq!(client_ip(&headers, Some(&peer)), "203.0.113.7");
    }
}
