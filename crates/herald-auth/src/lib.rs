//! OAuth 2.1 authorization server for Herald's MCP surface.
//!
//! Implements the authorization-code grant with mandatory PKCE (S256),
//! refresh-token rotation, and HMAC-signed bearer tokens whose hashes are
//! persisted through an [`AuthStore`].

mod oauth;
mod secret;
mod store;
mod token;

pub use oauth::{
    oauth_routes, protected_resource_routes, AuthorizeOutcome, AuthorizeParams, OAuthServer,
    TokenRequest,
};
pub use secret::{load_or_create_secret, rotate_secret};
pub use store::{AuthStore, MemoryAuthStore, SqliteAuthStore};
pub use token::{derive_key, hash_token, sign_token, verify_token, TokenClaims};

/// Constant-time byte comparison to prevent timing side channels in
/// PKCE and client-secret checks.
pub(crate) fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    let mut diff = 0u8;
    for (&x, &y) in a.iter().zip(b.iter()) {
        diff |= x ^ y;
    }
    diff == 0
}
