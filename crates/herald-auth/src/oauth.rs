//! OAuth 2.1 authorization server (authorization-code grant, PKCE
//! mandatory, refresh-token rotation).
//!
//! The grant logic lives in transport-free methods on [`OAuthServer`] so
//! it is testable without an HTTP stack; thin axum handlers wrap those
//! methods in [`routes`].

use std::sync::Arc;
use std::time::Duration;

use axum::extract::{Query, State};
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Form, Json, Router};
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use chrono::Utc;
use rand::rngs::OsRng;
use rand::RngCore;
use serde::Deserialize;
use serde_json::{json, Value};
use sha2::{Digest, Sha256};
use tracing::{info, warn};

use herald_store::{AuthCodeRecord, TokenRecord};
use herald_types::{AuthConfig, HeraldError};

use crate::constant_time_eq;
use crate::store::AuthStore;
use crate::token::{derive_key, hash_token, hex_encode, sign_token, verify_token, TokenClaims};

const CODE_TTL_MINUTES: i64 = 10;
const CLEANUP_INTERVAL: Duration = Duration::from_secs(15 * 60);

/// The authorization server. One configured client identity; tokens are
/// HMAC-signed with a key derived from the client secret.
pub struct OAuthServer {
    client_id: String,
    client_secret: String,
    public_url: String,
    key: [u8; 32],
    redirect_uris: Vec<String>,
    access_ttl: chrono::Duration,
    refresh_ttl: chrono::Duration,
    store: Arc<dyn AuthStore>,
}

/// Query parameters of `GET /oauth/authorize`.
#[derive(Debug, Default, Clone, Deserialize)]
pub struct AuthorizeParams {
    #[serde(default)]
    pub response_type: String,
    #[serde(default)]
    pub client_id: String,
    #[serde(default)]
    pub redirect_uri: String,
    #[serde(default)]
    pub code_challenge: String,
    #[serde(default)]
    pub code_challenge_method: String,
    #[serde(default)]
    pub state: String,
    #[serde(default)]
    pub scope: String,
}

/// Form body of `POST /oauth/token`.
#[derive(Debug, Default, Clone, Deserialize)]
pub struct TokenRequest {
    #[serde(default)]
    pub grant_type: String,
    #[serde(default)]
    pub code: String,
    #[serde(default)]
    pub client_id: String,
    #[serde(default)]
    pub client_secret: String,
    #[serde(default)]
    pub redirect_uri: String,
    #[serde(default)]
    pub code_verifier: String,
    #[serde(default)]
    pub refresh_token: String,
}

/// Result of an authorization request. An invalid redirect URI never
/// redirects; every later failure goes back to the validated URI.
#[derive(Debug, PartialEq)]
pub enum AuthorizeOutcome {
    /// 302 to the given URL.
    Redirect(String),
    /// 400 with a JSON error body.
    BadRequest(Value),
}

type TokenError = (StatusCode, Value);

impl OAuthServer {
    pub fn new(cfg: &AuthConfig, public_url: &str, store: Arc<dyn AuthStore>) -> Self {
        let access_ttl = if cfg.access_token_ttl_secs > 0 {
            chrono::Duration::seconds(cfg.access_token_ttl_secs as i64)
        } else {
            chrono::Duration::hours(1)
        };
        let refresh_ttl = if cfg.refresh_token_ttl_secs > 0 {
            chrono::Duration::seconds(cfg.refresh_token_ttl_secs as i64)
        } else {
            chrono::Duration::days(30)
        };

        Self {
            client_id: cfg.client_id.clone(),
            client_secret: cfg.client_secret.clone(),
            public_url: public_url.trim_end_matches('/').to_string(),
            key: derive_key(&cfg.client_secret),
            redirect_uris: cfg.redirect_uris.clone(),
            access_ttl,
            refresh_ttl,
            store,
        }
    }

    /// OAuth 2.1 server metadata (RFC 8414).
    pub fn metadata(&self) -> Value {
        json!({
            "issuer": self.public_url,
            "authorization_endpoint": format!("{}/oauth/authorize", self.public_url),
            "token_endpoint": format!("{}/oauth/token", self.public_url),
            "response_types_supported": ["code"],
            "grant_types_supported": ["authorization_code", "refresh_token"],
            "code_challenge_methods_supported": ["S256"],
            "token_endpoint_auth_methods_supported": ["client_secret_post"],
        })
    }

    /// Protected resource metadata (RFC 9728).
    pub fn protected_resource_metadata(&self) -> Value {
        json!({
            "resource": format!("{}/mcp", self.public_url),
            "authorization_servers": [self.public_url],
            "bearer_methods_supported": ["header"],
        })
    }

    fn is_valid_redirect_uri(&self, uri: &str) -> bool {
        self.redirect_uris.iter().any(|allowed| allowed == uri)
    }

    /// Handle an authorization request.
    pub fn authorize(&self, params: &AuthorizeParams) -> AuthorizeOutcome {
        // The redirect URI is validated before anything else. An
        // unregistered URI must never receive a redirect.
        if params.redirect_uri.is_empty() || !self.is_valid_redirect_uri(&params.redirect_uri) {
            warn!(
                redirect_uri = %params.redirect_uri,
                client_id = %params.client_id,
                "authorization request with invalid redirect_uri"
            );
            return AuthorizeOutcome::BadRequest(json!({
                "error": "invalid_request",
                "error_description": "redirect_uri is missing or not registered",
            }));
        }

        if params.response_type != "code" {
            return self.redirect_error(
                params,
                "unsupported_response_type",
                "only 'code' is supported",
            );
        }

        if params.client_id != self.client_id {
            return self.redirect_error(params, "invalid_client", "unknown client_id");
        }

        // PKCE is mandatory per OAuth 2.1.
        if params.code_challenge.is_empty() {
            return self.redirect_error(
                params,
                "invalid_request",
                "code_challenge is required (PKCE)",
            );
        }

        if params.code_challenge_method != "S256" {
            return self.redirect_error(
                params,
                "invalid_request",
                "code_challenge_method must be S256",
            );
        }

        let code = generate_code();
        if let Err(e) = self.store.store_code(AuthCodeRecord {
            code_hash: hash_token(&code),
            client_id: params.client_id.clone(),
            redirect_uri: params.redirect_uri.clone(),
            code_challenge: params.code_challenge.clone(),
            scope: params.scope.clone(),
            expires_at: Utc::now() + chrono::Duration::minutes(CODE_TTL_MINUTES),
            used: false,
            created_at: Utc::now(),
        }) {
            warn!(error = %e, "failed to store authorization code");
            return self.redirect_error(params, "server_error", "could not issue code");
        }

        info!(client_id = %params.client_id, scope = %params.scope, "authorization code issued");

        AuthorizeOutcome::Redirect(build_redirect(
            &params.redirect_uri,
            &[("code", &code), ("state", &params.state)],
        ))
    }

    fn redirect_error(&self, params: &AuthorizeParams, error: &str, desc: &str) -> AuthorizeOutcome {
        AuthorizeOutcome::Redirect(build_redirect(
            &params.redirect_uri,
            &[
                ("error", error),
                ("error_description", desc),
                ("state", &params.state),
            ],
        ))
    }

    /// Handle a token request, dispatching on `grant_type`.
    pub fn token(&self, req: &TokenRequest) -> Result<Value, TokenError> {
        match req.grant_type.as_str() {
            "authorization_code" => self.exchange_code(req),
            "refresh_token" => self.refresh(req),
            _ => Err(token_error(
                StatusCode::BAD_REQUEST,
                "unsupported_grant_type",
                "",
            )),
        }
    }

    fn check_client(&self, req: &TokenRequest) -> Result<(), TokenError> {
        let id_ok = constant_time_eq(req.client_id.as_bytes(), self.client_id.as_bytes());
        let secret_ok =
            constant_time_eq(req.client_secret.as_bytes(), self.client_secret.as_bytes());
        if !id_ok || !secret_ok {
            return Err(token_error(StatusCode::UNAUTHORIZED, "invalid_client", ""));
        }
        Ok(())
    }

    fn exchange_code(&self, req: &TokenRequest) -> Result<Value, TokenError> {
        self.check_client(req)?;

        let auth_code = self
            .store
            .consume_code(&hash_token(&req.code))
            .map_err(|e| {
                token_error(StatusCode::BAD_REQUEST, "invalid_grant", &grant_desc(&e))
            })?;

        if auth_code.client_id != req.client_id {
            return Err(token_error(
                StatusCode::BAD_REQUEST,
                "invalid_grant",
                "client_id mismatch",
            ));
        }

        // The redirect URI must equal the one recorded at authorization.
        if req.redirect_uri != auth_code.redirect_uri {
            return Err(token_error(
                StatusCode::BAD_REQUEST,
                "invalid_grant",
                "redirect_uri mismatch",
            ));
        }

        if req.code_verifier.is_empty() {
            return Err(token_error(
                StatusCode::BAD_REQUEST,
                "invalid_grant",
                "code_verifier is required (PKCE)",
            ));
        }
        if !verify_pkce(&req.code_verifier, &auth_code.code_challenge) {
            return Err(token_error(
                StatusCode::BAD_REQUEST,
                "invalid_grant",
                "PKCE verification failed",
            ));
        }

        self.issue_token_pair(&req.client_id, &auth_code.scope)
    }

    fn refresh(&self, req: &TokenRequest) -> Result<Value, TokenError> {
        self.check_client(req)?;

        let claims = verify_token(&req.refresh_token, &self.key).map_err(|_| {
            token_error(
                StatusCode::BAD_REQUEST,
                "invalid_grant",
                "invalid refresh token",
            )
        })?;

        if claims.token_type != "refresh" {
            return Err(token_error(
                StatusCode::BAD_REQUEST,
                "invalid_grant",
                "not a refresh token",
            ));
        }

        let token_hash = hash_token(&req.refresh_token);
        self.store.get_token(&token_hash).map_err(|e| {
            token_error(StatusCode::BAD_REQUEST, "invalid_grant", &grant_desc(&e))
        })?;

        // Rotation: the old refresh token is dead before the new pair is
        // returned.
        self.store.revoke_token(&token_hash).map_err(|e| {
            token_error(StatusCode::BAD_REQUEST, "invalid_grant", &grant_desc(&e))
        })?;

        self.issue_token_pair(&req.client_id, &claims.scope)
    }

    fn issue_token_pair(&self, client_id: &str, scope: &str) -> Result<Value, TokenError> {
        let now = Utc::now();

        let mut claims = TokenClaims {
            subject: "herald-user".into(),
            client_id: client_id.into(),
            scope: scope.into(),
            token_type: "access".into(),
            issued_at: now.timestamp(),
            expires_at: (now + self.access_ttl).timestamp(),
            issuer: self.public_url.clone(),
        };

        let access_token = sign_token(&claims, &self.key).map_err(|_| {
            token_error(
                StatusCode::INTERNAL_SERVER_ERROR,
                "server_error",
                "failed to sign access token",
            )
        })?;

        claims.token_type = "refresh".into();
        claims.expires_at = (now + self.refresh_ttl).timestamp();
        let refresh_token = sign_token(&claims, &self.key).map_err(|_| {
            token_error(
                StatusCode::INTERNAL_SERVER_ERROR,
                "server_error",
                "failed to sign refresh token",
            )
        })?;

        for (token, kind, ttl) in [
            (&access_token, "access", self.access_ttl),
            (&refresh_token, "refresh", self.refresh_ttl),
        ] {
            self.store
                .store_token(TokenRecord {
                    token_hash: hash_token(token),
                    token_type: kind.into(),
                    client_id: client_id.into(),
                    scope: scope.into(),
                    expires_at: now + ttl,
                    revoked: false,
                    created_at: now,
                })
                .map_err(|_| {
                    token_error(
                        StatusCode::INTERNAL_SERVER_ERROR,
                        "server_error",
                        "failed to store token",
                    )
                })?;
        }

        info!(client_id, scope, "tokens issued");

        Ok(json!({
            "access_token": access_token,
            "token_type": "Bearer",
            "expires_in": self.access_ttl.num_seconds(),
            "refresh_token": refresh_token,
            "scope": scope,
        }))
    }

    /// Validate a bearer token for the middleware: signature, expiry,
    /// kind = access, stored, and not revoked.
    pub fn validate_access_token(&self, token: &str) -> Result<TokenClaims, HeraldError> {
        let claims = verify_token(token, &self.key)?;

        if claims.token_type != "access" {
            return Err(HeraldError::Auth("not an access token".into()));
        }

        self.store
            .get_token(&hash_token(token))
            .map_err(|e| HeraldError::Auth(format!("token not recognized: {e}")))?;

        Ok(claims)
    }

    /// Periodic store cleanup until shutdown.
    pub async fn run_cleanup_loop(
        self: Arc<Self>,
        mut shutdown: tokio::sync::watch::Receiver<bool>,
    ) {
        let mut ticker = tokio::time::interval(CLEANUP_INTERVAL);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    if let Err(e) = self.store.cleanup() {
                        warn!(error = %e, "auth store cleanup failed");
                    }
                }
                _ = shutdown.wait_for(|&stop| stop) => return,
            }
        }
    }
}

/// `base64url(sha256(verifier)) == challenge`, compared in constant time.
fn verify_pkce(code_verifier: &str, code_challenge: &str) -> bool {
    let computed = URL_SAFE_NO_PAD.encode(Sha256::digest(code_verifier.as_bytes()));
    constant_time_eq(computed.as_bytes(), code_challenge.as_bytes())
}

fn generate_code() -> String {
    let mut bytes = [0u8; 32];
    OsRng.fill_bytes(&mut bytes);
    hex_encode(&bytes)
}

fn build_redirect(base: &str, params: &[(&str, &str)]) -> String {
    let mut url = String::from(base);
    let mut sep = if base.contains('?') { '&' } else { '?' };
    for (key, value) in params {
        if value.is_empty() {
            continue;
        }
        url.push(sep);
        url.push_str(key);
        url.push('=');
        url.push_str(&url_encode(value));
        sep = '&';
    }
    url
}

/// Minimal percent-encoding for URL query parameters.
fn url_encode(s: &str) -> String {
    let mut encoded = String::with_capacity(s.len() * 2);
    for byte in s.bytes() {
        match byte {
            b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'-' | b'_' | b'.' | b'~' => {
                encoded.push(byte as char);
            }
            _ => encoded.push_str(&format!("%{byte:02X}")),
        }
    }
    encoded
}

fn token_error(status: StatusCode, error: &str, desc: &str) -> TokenError {
    let body = if desc.is_empty() {
        json!({ "error": error })
    } else {
        json!({ "error": error, "error_description": desc })
    };
    (status, body)
}

/// OAuth error descriptions must not leak internals; not-found and
/// expired/used conditions map onto their grant-level descriptions.
fn grant_desc(e: &HeraldError) -> String {
    match e {
        HeraldError::NotFound(_) => "unknown grant".into(),
        HeraldError::Auth(msg) => msg.clone(),
        _ => "grant lookup failed".into(),
    }
}

// ---------------------------------------------------------------------------
// Axum surface
// ---------------------------------------------------------------------------

/// Protected-resource discovery (RFC 9728). Not rate limited.
pub fn protected_resource_routes(server: Arc<OAuthServer>) -> Router {
    Router::new()
        .route(
            "/.well-known/oauth-protected-resource",
            get(protected_resource_handler),
        )
        .with_state(server)
}

/// The rate-limited OAuth endpoints: server metadata, authorize, token.
pub fn oauth_routes(server: Arc<OAuthServer>) -> Router {
    Router::new()
        .route("/.well-known/oauth-authorization-server", get(metadata_handler))
        .route("/oauth/authorize", get(authorize_handler))
        .route("/oauth/token", post(token_handler))
        .with_state(server)
}

async fn metadata_handler(State(server): State<Arc<OAuthServer>>) -> Json<Value> {
    Json(server.metadata())
}

async fn protected_resource_handler(State(server): State<Arc<OAuthServer>>) -> Json<Value> {
    Json(server.protected_resource_metadata())
}

async fn authorize_handler(
    State(server): State<Arc<OAuthServer>>,
    Query(params): Query<AuthorizeParams>,
) -> Response {
    match server.authorize(&params) {
        AuthorizeOutcome::Redirect(url) => {
            (StatusCode::FOUND, [(header::LOCATION, url)]).into_response()
        }
        AuthorizeOutcome::BadRequest(body) => {
            (StatusCode::BAD_REQUEST, Json(body)).into_response()
        }
    }
}

async fn token_handler(
    State(server): State<Arc<OAuthServer>>,
    Form(req): Form<TokenRequest>,
) -> Response {
    match server.token(&req) {
        Ok(body) => (
            StatusCode::OK,
            [(header::CACHE_CONTROL, "no-store")],
            Json(body),
        )
            .into_response(),
        Err((status, body)) => (status, Json(body)).into_response(),
    }
}
