//! Storage abstraction for OAuth tokens and authorization codes.
//!
//! [`MemoryAuthStore`] backs tests and secret-less development runs;
//! [`SqliteAuthStore`] delegates to the shared persistent [`Store`].

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use chrono::Utc;

use herald_store::{AuthCodeRecord, Store, TokenRecord};
use herald_types::HeraldError;

/// Token and authorization-code persistence used by the OAuth server.
pub trait AuthStore: Send + Sync {
    fn store_token(&self, record: TokenRecord) -> Result<(), HeraldError>;
    /// Fails for missing, expired, and revoked tokens.
    fn get_token(&self, token_hash: &str) -> Result<TokenRecord, HeraldError>;
    fn revoke_token(&self, token_hash: &str) -> Result<(), HeraldError>;

    fn store_code(&self, record: AuthCodeRecord) -> Result<(), HeraldError>;
    /// Single-use: the second consume of the same code always fails.
    fn consume_code(&self, code_hash: &str) -> Result<AuthCodeRecord, HeraldError>;

    /// Drop expired/revoked tokens and expired/used codes.
    fn cleanup(&self) -> Result<(), HeraldError>;
}

/// In-memory [`AuthStore`] with the same single-use and expiry semantics
/// as the SQLite-backed one.
#[derive(Default)]
pub struct MemoryAuthStore {
    tokens: Mutex<HashMap<String, TokenRecord>>,
    codes: Mutex<HashMap<String, AuthCodeRecord>>,
}

impl MemoryAuthStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl AuthStore for MemoryAuthStore {
    fn store_token(&self, record: TokenRecord) -> Result<(), HeraldError> {
        self.tokens
            .lock()
            .unwrap()
            .insert(record.token_hash.clone(), record);
        Ok(())
    }

    fn get_token(&self, token_hash: &str) -> Result<TokenRecord, HeraldError> {
        let tokens = self.tokens.lock().unwrap();
        let record = tokens
            .get(token_hash)
            .ok_or_else(|| HeraldError::NotFound("token".into()))?;
        if record.revoked {
            return Err(HeraldError::Auth("token revoked".into()));
        }
        if Utc::now() > record.expires_at {
            return Err(HeraldError::Auth("token expired".into()));
        }
        Ok(record.clone())
    }

    fn revoke_token(&self, token_hash: &str) -> Result<(), HeraldError> {
        if let Some(record) = self.tokens.lock().unwrap().get_mut(token_hash) {
            record.revoked = true;
        }
        Ok(())
    }

    fn store_code(&self, record: AuthCodeRecord) -> Result<(), HeraldError> {
        self.codes
            .lock()
            .unwrap()
            .insert(record.code_hash.clone(), record);
        Ok(())
    }

    fn consume_code(&self, code_hash: &str) -> Result<AuthCodeRecord, HeraldError> {
        let mut codes = self.codes.lock().unwrap();
        let record = codes
            .get_mut(code_hash)
            .ok_or_else(|| HeraldError::NotFound("authorization code".into()))?;
        if Utc::now() > record.expires_at {
            return Err(HeraldError::Auth("authorization code expired".into()));
        }
        if record.used {
            return Err(HeraldError::Auth("authorization code already used".into()));
        }
        record.used = true;
        Ok(record.clone())
    }

    fn cleanup(&self) -> Result<(), HeraldError> {
        let now = Utc::now();
        self.tokens
            .lock()
            .unwrap()
            .retain(|_, t| !t.revoked && t.expires_at > now);
        self.codes
            .lock()
            .unwrap()
            .retain(|_, c| !c.used && c.expires_at > now);
        Ok(())
    }
}

/// [`AuthStore`] adapter over the shared SQLite [`Store`].
pub struct SqliteAuthStore {
    store: Arc<dyn Store>,
}

impl SqliteAuthStore {
    pub fn new(store: Arc<dyn Store>) -> Self {
        Self { store }
    }
}

impl AuthStore for SqliteAuthStore {
    fn store_token(&self, record: TokenRecord) -> Result<(), HeraldError> {
        self.store.store_token(&record)
    }

    fn get_token(&self, token_hash: &str) -> Result<TokenRecord, HeraldError> {
        self.store.get_token(token_hash)
    }

    fn revoke_token(&self, token_hash: &str) -> Result<(), HeraldError> {
        self.store.revoke_token(token_hash)
    }

    fn store_code(&self, record: AuthCodeRecord) -> Result<(), HeraldError> {
        self.store.store_auth_code(&record)
    }

    fn consume_code(&self, code_hash: &str) -> Result<AuthCodeRecord, HeraldError> {
        self.store.consume_auth_code(code_hash)
    }

    fn cleanup(&self) -> Result<(), HeraldError> {
        self.store.cleanup()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_code(hash: &str) -> AuthCodeRecord {
        AuthCodeRecord {
            code_hash: hash.into(),
            client_id: "client".into(),
            redirect_uri: "https://callback.test/cb".into(),
            code_challenge: "ch".into(),
            scope: String::new(),
            expires_at: Utc::now() + chrono::Duration::minutes(10),
            used: false,
            created_at: Utc::now(),
        }
    }

    #[test]
    fn memory_store_single_use_codes() {
        let store = MemoryAuthStore::new();
        store.store_code(sample_code("c1")).unwrap();

        assert!(store.consume_code("c1").is_ok());
        let err = store.consume_code("c1").unwrap_err();
        assert!(err.to_string().contains("already used"));
    }

    #[test]
    fn memory_store_token_expiry_and_revocation() {
        let store = MemoryAuthStore::new();
        let token = TokenRecord {
            token_hash: "t1".into(),
            token_type: "access".into(),
            client_id: "client".into(),
            scope: String::new(),
            expires_at: Utc::now() + chrono::Duration::hours(1),
            revoked: false,
            created_at: Utc::now(),
        };
        store.store_token(token.clone()).unwrap();
        assert!(store.get_token("t1").is_ok());

        store.revoke_token("t1").unwrap();
        assert!(store.get_token("t1").is_err());

        let expired = TokenRecord {
            token_hash: "t2".into(),
            expires_at: Utc::now() - chrono::Duration::hours(1),
            ..token
        };
        store.store_token(expired).unwrap();
        assert!(store.get_token("t2").is_err());
    }

    #[test]
    fn memory_store_cleanup_drops_dead_rows() {
        let store = MemoryAuthStore::new();
        let mut used = sample_code("used");
        used.used = true;
        store.store_code(used).unwrap();
        store.store_code(sample_code("live")).unwrap();

        store.cleanup().unwrap();
        assert!(store.consume_code("used").unwrap_err().is_not_found());
        assert!(store.consume_code("live").is_ok());
    }
}
