//! Per-client rate limiting for the public invitation endpoints.
//!
//! Token verification and acceptance are unauthenticated, so limits are keyed
//! by client address rather than by credential.

use axum::{
    body::Body,
    extract::{ConnectInfo, State},
    http::{header, HeaderValue, Request, StatusCode},
    middleware::Next,
    response::{IntoResponse, Response},
    Json,
};
use governor::{
    clock::{Clock, DefaultClock},
    state::{InMemoryState, NotKeyed},
    Quota, RateLimiter as GovRateLimiter,
};
use serde_json::json;
use std::{
    collections::HashMap,
    net::SocketAddr,
    num::NonZeroU32,
    sync::{Arc, RwLock},
};

use crate::app::AppState;

type ClientRateLimiter = GovRateLimiter<NotKeyed, InMemoryState, DefaultClock>;

/// Once this many clients are tracked the table is reset.
const MAX_TRACKED_CLIENTS: usize = 10_000;

const FORWARDED_FOR_HEADER: &str = "x-forwarded-for";

pub struct RateLimiterState {
    limiters: RwLock<HashMap<String, Arc<ClientRateLimiter>>>,
    rate_limit_per_minute: u32,
    clock: DefaultClock,
}

impl RateLimiterState {
    pub fn new(rate_limit_per_minute: u32) -> Self {
        Self {
            limiters: RwLock::new(HashMap::new()),
            rate_limit_per_minute,
            clock: DefaultClock::default(),
        }
    }

    pub fn rate_limit_per_minute(&self) -> u32 {
        self.rate_limit_per_minute
    }

    fn get_or_create_limiter(&self, client: &str) -> Arc<ClientRateLimiter> {
        {
            let limiters = self.limiters.read().unwrap_or_else(|e| e.into_inner());
            if let Some(limiter) = limiters.get(client) {
                return limiter.clone();
            }
        }

        let mut limiters = self.limiters.write().unwrap_or_else(|e| e.into_inner());

        // Another request may have created it between the two locks.
        if let Some(limiter) = limiters.get(client) {
            return limiter.clone();
        }

        if limiters.len() >= MAX_TRACKED_CLIENTS {
            tracing::debug!(tracked = limiters.len(), "Resetting rate limiter table");
            limiters.clear();
        }

        let quota = Quota::per_minute(
            NonZeroU32::new(self.rate_limit_per_minute).unwrap_or(NonZeroU32::MIN),
        );
        let limiter = Arc::new(GovRateLimiter::direct(quota));
        limiters.insert(client.to_string(), limiter.clone());
        limiter
    }

    /// `Err` carries the Retry-After value in seconds (at least 1).
    pub fn check(&self, client: &str) -> Result<(), u64> {
        let limiter = self.get_or_create_limiter(client);

        match limiter.check() {
            Ok(_) => Ok(()),
            Err(not_until) => {
                let wait_time = not_until.wait_time_from(self.clock.now());
                Err(wait_time.as_secs().max(1))
            }
        }
    }

    fn tracked_clients(&self) -> usize {
        self.limiters
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .len()
    }
}

impl std::fmt::Debug for RateLimiterState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RateLimiterState")
            .field("rate_limit_per_minute", &self.rate_limit_per_minute)
            .field("tracked_clients", &self.tracked_clients())
            .finish()
    }
}

/// Client key: the peer address, or the first `X-Forwarded-For` hop when
/// the socket address is not available.
fn client_key(req: &Request<Body>) -> String {
    if let Some(ConnectInfo(addr)) = req.extensions().get::<ConnectInfo<SocketAddr>>() {
        return addr.ip().to_string();
    }

    req.headers()
        .get(FORWARDED_FOR_HEADER)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.split(',').next())
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
        .unwrap_or_else(|| "unknown".to_string())
}

pub async fn rate_limit_middleware(
    State(state): State<AppState>,
    req: Request<Body>,
    next: Next,
) -> Response {
    if let Some(ref rate_limiter) = state.rate_limiter {
        let client = client_key(&req);
        if let Err(retry_after) = rate_limiter.check(&client) {
            tracing::warn!(
                client = %client,
                path = %req.uri().path(),
                retry_after,
                "Rate limit exceeded"
            );
            return rate_limited_response(rate_limiter.rate_limit_per_minute(), retry_after);
        }
    }

    next.run(req).await
}

fn rate_limited_response(limit: u32, retry_after: u64) -> Response {
    let body = json!({
        "error": "rate_limit_exceeded",
        "message": format!("Rate limit of {} requests/minute exceeded", limit),
        "retryAfter": retry_after
    });

    let mut response = (StatusCode::TOO_MANY_REQUESTS, Json(body)).into_response();
    response
        .headers_mut()
        .insert(header::RETRY_AFTER, HeaderValue::from(retry_after));

    response
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rate_limiter_allows_up_to_quota() {
        let state = RateLimiterState::new(5);
        for i in 0..5 {
            assert!(state.check("10.0.0.1").is_ok(), "Request {} should pass", i);
        }
        let retry_after = state.check("10.0.0.1").unwrap_err();
        assert!(retry_after >= 1);
    }

    #[test]
    fn test_rate_limiter_clients_are_independent() {
        let state = RateLimiterState::new(1);
        assert!(state.check("10.0.0.1").is_ok());
        assert!(state.check("10.0.0.2").is_ok());
        assert!(state.check("10.0.0.1").is_err());
        assert!(state.check("10.0.0.2").is_err());
        assert_eq!(state.tracked_clients(), 2);
    }

    #[test]
    fn test_client_key_prefers_connect_info() {
        let mut req = Request::builder()
            .header(FORWARDED_FOR_HEADER, "203.0.113.9")
            .body(Body::empty())
            .unwrap();
        req.extensions_mut()
            .insert(ConnectInfo(SocketAddr::from(([192, 0, 2, 1], 4000))));

        assert_eq!(client_key(&req), "192.0.2.1");
    }

    #[test]
    fn test_client_key_falls_back_to_forwarded_for() {
        let req = Request::builder()
            .header(FORWARDED_FOR_HEADER, "203.0.113.9, 10.0.0.1")
            .body(Body::empty())
            .unwrap();
        assert_eq!(client_key(&req), "203.0.113.9");

        let bare = Request::builder().body(Body::empty()).unwrap();
        assert_eq!(client_key(&bare), "unknown");
    }

    #[tokio::test]
    async fn test_rate_limited_response_headers() {
        let response = rate_limited_response(30, 12);
        assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
        assert_eq!(response.headers()[header::RETRY_AFTER], "12");

        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let body: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(body["error"], "rate_limit_exceeded");
        assert_eq!(body["retryAfter"], 12);
    }
}
