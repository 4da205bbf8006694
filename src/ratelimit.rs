//! Per-client sliding window rate limiter for the public checkout route.
//!
//! The estimate for a key is `previous * (1 - elapsed / window) + current`,
//! where `previous` is the count of the last full window. Keys idle for two
//! windows are evicted, and the map never grows past `max_keys`.

use {
    crate::config::RateLimitConfig,
    axum::{
        Json,
        extract::{ConnectInfo, Request, State},
        http::{StatusCode, header::RETRY_AFTER},
        middleware::Next,
        response::{IntoResponse, Response},
    },
    std::{
        collections::HashMap,
        net::SocketAddr,
        sync::{Arc, Mutex, MutexGuard, PoisonError},
        time::{Duration, Instant},
    },
    tokio::sync::watch,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    Allowed { remaining: u32 },
    Limited { retry_after: Duration },
}

#[derive(Debug, Clone, Copy)]
struct WindowState {
    window_start: Instant,
    previous: u32,
    current: u32,
    last_seen: Instant,
}

impl WindowState {
    fn new(now: Instant) -> Self {
        Self {
            window_start: now,
            previous: 0,
            current: 0,
            last_seen: now,
        }
    }

    fn roll(&mut self, now: Instant, window: Duration) {
        let elapsed = now.saturating_duration_since(self.window_start);
        if elapsed >= window * 2 {
            self.previous = 0;
            self.current = 0;
            self.window_start = now;
        } else if elapsed >= window {
            self.previous = self.current;
            self.current = 0;
            self.window_start += window;
        }
    }
}

pub struct SlidingWindowLimiter {
    config: RateLimitConfig,
    windows: Mutex<HashMap<String, WindowState>>,
}

impl SlidingWindowLimiter {
    pub fn new(config: RateLimitConfig) -> Self {
        Self {
            config,
            windows: Mutex::new(HashMap::new()),
        }
    }

    pub fn config(&self) -> &RateLimitConfig {
        &self.config
    }

    fn windows(&self) -> MutexGuard<'_, HashMap<String, WindowState>> {
        self.windows.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn check(&self, key: &str) -> Decision {
        self.check_at(key, Instant::now())
    }

    pub fn check_at(&self, key: &str, now: Instant) -> Decision {
        let window = self.config.window;
        let max = self.config.max_requests;
        let mut windows = self.windows();

        if !windows.contains_key(key) && windows.len() >= self.config.max_keys {
            evict_idle_locked(&mut windows, now, window);
            if windows.len() >= self.config.max_keys {
                let oldest = windows
                    .iter()
                    .min_by_key(|(_, state)| state.last_seen)
                    .map(|(k, _)| k.clone());
                if let Some(oldest) = oldest {
                    windows.remove(&oldest);
                }
            }
        }

        let state = windows
            .entry(key.to_string())
            .or_insert_with(|| WindowState::new(now));
        state.roll(now, window);
        state.last_seen = now;

        let elapsed = now.saturating_duration_since(state.window_start);
        let weight = 1.0 - (elapsed.as_secs_f64() / window.as_secs_f64()).min(1.0);
        let estimate = f64::from(state.previous) * weight + f64::from(state.current);

        if estimate >= f64::from(max) {
            let retry_after = window.saturating_sub(elapsed).max(Duration::from_secs(1));
            return Decision::Limited { retry_after };
        }

        state.current += 1;
        let used = (estimate + 1.0).ceil() as u32;
        Decision::Allowed {
            remaining: max.saturating_sub(used),
        }
    }

    /// Drop keys idle for at least two windows. Returns how many were removed.
    pub fn evict_idle(&self, now: Instant) -> usize {
        let mut windows = self.windows();
        evict_idle_locked(&mut windows, now, self.config.window)
    }

    pub fn tracked_keys(&self) -> usize {
        self.windows().len()
    }
}

fn evict_idle_locked(
    windows: &mut HashMap<String, WindowState>,
    now: Instant,
    window: Duration,
) -> usize {
    let before = windows.len();
    windows.retain(|_, state| now.saturating_duration_since(state.last_seen) < window * 2);
    before - windows.len()
}

/// Client identity: first `X-Forwarded-For` hop behind a trusted proxy,
/// otherwise the peer address.
pub fn client_key(req: &Request, trust_proxy: bool) -> String {
    if trust_proxy {
        let forwarded = req
            .headers()
            .get("x-forwarded-for")
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.split(',').next())
            .map(str::trim)
            .filter(|v| !v.is_empty());
        if let Some(ip) = forwarded {
            return ip.to_string();
        }
    }
    req.extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| addr.ip().to_string())
        .unwrap_or_else(|| "anonymous".to_string())
}

pub async fn rate_limit(
    State(limiter): State<Arc<SlidingWindowLimiter>>,
    req: Request,
    next: Next,
) -> Response {
    let key = client_key(&req, limiter.config().trust_proxy);
    match limiter.check(&key) {
        Decision::Allowed { .. } => next.run(req).await,
        Decision::Limited { retry_after } => {
            let secs = retry_after.as_secs().max(1);
            tracing::warn!(client = %key, retry_after = secs, "rate limit exceeded");
            (
                StatusCode::TOO_MANY_REQUESTS,
                [(RETRY_AFTER, secs.to_string())],
                Json(serde_json::json!({
                    "error_code": "rate_limited",
                    "message": "too many requests",
                    "retry_after": secs,
                })),
            )
                .into_response()
        }
    }
}

/// Periodic eviction so idle clients do not pin memory between requests.
pub async fn run_eviction(limiter: Arc<SlidingWindowLimiter>, mut shutdown: watch::Receiver<bool>) {
    let period = limiter.config().window;
    loop {
        tokio::select! {
            _ = shutdown.changed() => return,
            _ = tokio::time::sleep(period) => {}
        }

        let evicted = limiter.evict_idle(Instant::now());
        if evicted > 0 {
            tracing::debug!(evicted, remaining = limiter.tracked_keys(), "evicted idle rate limit keys");
        }
    }
}
