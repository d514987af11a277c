//! Compact HMAC-SHA256 signed bearer tokens.
//!
//! A token is `base64url(claims JSON) . base64url(HMAC-SHA256 tag)`.
//! Raw tokens never reach durable storage; the store keys on
//! [`hash_token`] output instead.

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use chrono::Utc;
use hmac::{Hmac, Mac};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use herald_types::HeraldError;

type HmacSha256 = Hmac<Sha256>;

/// Claims carried by a signed token.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TokenClaims {
    pub subject: String,
    pub client_id: String,
    pub scope: String,
    /// `access` or `refresh`.
    pub token_type: String,
    /// Unix seconds.
    pub issued_at: i64,
    /// Unix seconds.
    pub expires_at: i64,
    pub issuer: String,
}

/// Sign claims into a compact token string.
pub fn sign_token(claims: &TokenClaims, key: &[u8]) -> Result<String, HeraldError> {
    let payload = serde_json::to_vec(claims)
        .map_err(|e| HeraldError::Auth(format!("encoding claims: {e}")))?;
    let encoded = URL_SAFE_NO_PAD.encode(&payload);

    let mut mac = HmacSha256::new_from_slice(key)
        .map_err(|e| HeraldError::Auth(format!("invalid signing key: {e}")))?;
    mac.update(encoded.as_bytes());
    let tag = URL_SAFE_NO_PAD.encode(mac.finalize().into_bytes());

    Ok(format!("{encoded}.{tag}"))
}

/// Verify a token string: signature, structure, and expiry.
pub fn verify_token(token: &str, key: &[u8]) -> Result<TokenClaims, HeraldError> {
    let (encoded, tag) = token
        .split_once('.')
        .ok_or_else(|| HeraldError::Auth("malformed token".into()))?;

    let mut mac = HmacSha256::new_from_slice(key)
        .map_err(|e| HeraldError::Auth(format!("invalid signing key: {e}")))?;
    mac.update(encoded.as_bytes());

    let tag_bytes = URL_SAFE_NO_PAD
        .decode(tag)
        .map_err(|_| HeraldError::Auth("malformed token signature".into()))?;
    mac.verify_slice(&tag_bytes)
        .map_err(|_| HeraldError::Auth("invalid token signature".into()))?;

    let payload = URL_SAFE_NO_PAD
        .decode(encoded)
        .map_err(|_| HeraldError::Auth("malformed token payload".into()))?;
    let claims: TokenClaims = serde_json::from_slice(&payload)
        .map_err(|_| HeraldError::Auth("malformed token claims".into()))?;

    if Utc::now().timestamp() >= claims.expires_at {
        return Err(HeraldError::Auth("token expired".into()));
    }

    Ok(claims)
}

/// Stable, collision-resistant token digest used as the store key.
pub fn hash_token(token: &str) -> String {
    let digest = Sha256::digest(token.as_bytes());
    hex_encode(&digest)
}

/// Derive the fixed 32-byte HMAC key from the configured client secret.
/// Rotating the secret invalidates every previously issued token.
pub fn derive_key(client_secret: &str) -> [u8; 32] {
    Sha256::digest(client_secret.as_bytes()).into()
}

pub(crate) fn hex_encode(bytes: &[u8]) -> String {
    let mut out = String::with_capacity(bytes.len() * 2);
    for b in bytes {
        out.push_str(&format!("{b:02x}"));
    }
    out
}
