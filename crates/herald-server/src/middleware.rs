//! HTTP middleware: bearer-token enforcement, security headers, and
//! token-bucket rate limiting.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use std::time::Instant;

use axum::extract::{ConnectInfo, Request, State};
use axum::http::header::{HeaderName, HeaderValue, AUTHORIZATION, WWW_AUTHENTICATE};
use axum::http::StatusCode;
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use tracing::debug;

use herald_auth::OAuthServer;

/// Applied to every response.
pub async fn security_headers(req: Request, next: Next) -> Response {
    let mut response = next.run(req).await;
    let headers = response.headers_mut();
    headers.insert(
        HeaderName::from_static("x-content-type-options"),
        HeaderValue::from_static("nosniff"),
    );
    headers.insert(
        HeaderName::from_static("x-frame-options"),
        HeaderValue::from_static("DENY"),
    );
    headers.insert(
        HeaderName::from_static("referrer-policy"),
        HeaderValue::from_static("no-referrer"),
    );
    response
}

/// State for [`bearer_auth`].
#[derive(Clone)]
pub struct BearerState {
    pub oauth: Arc<OAuthServer>,
    /// Advertised in the `WWW-Authenticate` challenge (RFC 9728).
    pub resource_metadata_url: String,
}

/// Requires `Authorization: Bearer <token>` with a valid access token.
pub async fn bearer_auth(
    State(state): State<BearerState>,
    req: Request,
    next: Next,
) -> Response {
    let header = req
        .headers()
        .get(AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("");

    if header.is_empty() {
        return challenge(&state.resource_metadata_url, "missing Authorization header");
    }

    let Some((scheme, token)) = header.split_once(' ') else {
        return challenge(
            &state.resource_metadata_url,
            "invalid Authorization header format",
        );
    };
    if !scheme.eq_ignore_ascii_case("bearer") || token.is_empty() {
        return challenge(
            &state.resource_metadata_url,
            "invalid Authorization header format",
        );
    }

    if let Err(e) = state.oauth.validate_access_token(token) {
        debug!(error = %e, "token validation failed");
        return invalid_token();
    }

    next.run(req).await
}

fn challenge(resource_metadata_url: &str, message: &str) -> Response {
    let challenge = format!("Bearer resource_metadata=\"{resource_metadata_url}\"");
    (
        StatusCode::UNAUTHORIZED,
        [(WWW_AUTHENTICATE, challenge)],
        message.to_string(),
    )
        .into_response()
}

fn invalid_token() -> Response {
    (
        StatusCode::UNAUTHORIZED,
        [(WWW_AUTHENTICATE, "Bearer error=\"invalid_token\"".to_string())],
        "invalid or expired token".to_string(),
    )
        .into_response()
}

/// Token bucket per key (client IP or bearer token).
pub struct RateLimiter {
    rate_per_minute: f64,
    burst: f64,
    buckets: Mutex<HashMap<String, Bucket>>,
}

struct Bucket {
    tokens: f64,
    last_refill: Instant,
}

impl RateLimiter {
    pub fn new(rate_per_minute: u32, burst: u32) -> Self {
        Self {
            rate_per_minute: rate_per_minute.max(1) as f64,
            burst: burst.max(1) as f64,
            buckets: Mutex::new(HashMap::new()),
        }
    }

    /// Take one token for `key`, refilling by elapsed time first.
    pub fn allow(&self, key: &str) -> bool {
        let mut buckets = self.buckets.lock().unwrap();
        let now = Instant::now();
        let bucket = buckets.entry(key.to_string()).or_insert(Bucket {
            tokens: self.burst,
            last_refill: now,
        });

        let elapsed = now.duration_since(bucket.last_refill).as_secs_f64();
        bucket.tokens = (bucket.tokens + elapsed * self.rate_per_minute / 60.0).min(self.burst);
        bucket.last_refill = now;

        if bucket.tokens >= 1.0 {
            bucket.tokens -= 1.0;
            true
        } else {
            false
        }
    }
}

/// State for the rate-limit middlewares.
#[derive(Clone)]
pub struct RateLimitState {
    pub limiter: Arc<RateLimiter>,
}

/// Rate limit keyed by client IP (OAuth endpoints, brute-force guard).
pub async fn ip_rate_limit(
    State(state): State<RateLimitState>,
    req: Request,
    next: Next,
) -> Response {
    let key = req
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|info| info.0.ip().to_string())
        .unwrap_or_else(|| "unknown".to_string());

    if !state.limiter.allow(&key) {
        return (StatusCode::TOO_MANY_REQUESTS, "rate limit exceeded").into_response();
    }
    next.run(req).await
}

/// Rate limit keyed by bearer token, falling back to client IP.
pub async fn client_rate_limit(
    State(state): State<RateLimitState>,
    req: Request,
    next: Next,
) -> Response {
    let key = req
        .headers()
        .get(AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .map(|v| v.to_string())
        .or_else(|| {
            req.extensions()
                .get::<ConnectInfo<SocketAddr>>()
                .map(|info| info.0.ip().to_string())
        })
        .unwrap_or_else(|| "unknown".to_string());

    if !state.limiter.allow(&key) {
        return (StatusCode::TOO_MANY_REQUESTS, "rate limit exceeded").into_response();
    }
    next.run(req).await
}
