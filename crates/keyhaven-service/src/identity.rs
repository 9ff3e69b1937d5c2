//! Identity collaborator: token issuance and validation.
//!
//! The vault treats this as an external surface; any error during
//! revocation is non-fatal to local logout.

use async_trait::async_trait;
use rand::RngCore;
use sha2::{Digest, Sha256};

use keyhaven_core::account::UserInfo;
use keyhaven_core::error::{Result, VaultError};
use keyhaven_core::secure_storage;

#[async_trait]
pub trait IdentityProvider: Send + Sync {
    async fn get_token(&self, interactive: bool) -> Result<String>;
    async fn validate_token(&self, token: &str) -> Result<UserInfo>;
    async fn revoke_token(&self, token: &str) -> Result<()>;
}

/// Machine-local identity: a random bearer token held in the OS keychain.
pub struct LocalIdentity {
    email: String,
}

impl LocalIdentity {
    pub fn new(email: impl Into<String>) -> Self {
        Self {
            email: email.into(),
        }
    }

    fn user_info(&self) -> UserInfo {
        let digest = Sha256::digest(self.email.as_bytes());
        UserInfo {
            email: self.email.clone(),
            id: format!("local-{}", hex::encode(&digest[..8])),
        }
    }
}

#[async_trait]
impl IdentityProvider for LocalIdentity {
    async fn get_token(&self, interactive: bool) -> Result<String> {
        if let Some(token) = secure_storage::get_identity_token()? {
            return Ok(token);
        }
        if !interactive {
            return Err(VaultError::Identity("no cached token".to_string()));
        }
        let mut bytes = [0u8; 32];
        rand::rngs::OsRng.fill_bytes(&mut bytes);
        let token = hex::encode(bytes);
        secure_storage::store_identity_token(&token)?;
        Ok(token)
    }

    async fn validate_token(&self, token: &str) -> Result<UserInfo> {
        match secure_storage::get_identity_token()? {
            Some(stored) if stored == token => Ok(self.user_info()),
            _ => Err(VaultError::Identity("unknown token".to_string())),
        }
    }

    async fn revoke_token(&self, _token: &str) -> Result<()> {
        secure_storage::delete_identity_token()
    }
}

/// Deterministic provider for tests and embedding: mints in-memory tokens
/// and can be told to fail revocation.
pub struct StaticIdentity {
    user: UserInfo,
    fail_revoke: bool,
    token: parking_lot::Mutex<Option<String>>,
}

impl StaticIdentity {
    pub fn new(user: UserInfo) -> Self {
        Self {
            user,
            fail_revoke: false,
            token: parking_lot::Mutex::new(None),
        }
    }

    pub fn failing_revoke(user: UserInfo) -> Self {
        Self {
            user,
            fail_revoke: true,
            token: parking_lot::Mutex::new(None),
        }
    }
}

#[async_trait]
impl IdentityProvider for StaticIdentity {
    async fn get_token(&self, _interactive: bool) -> Result<String> {
        let mut guard = self.token.lock();
        if guard.is_none() {
            *guard = Some(uuid::Uuid::new_v4().to_string());
        }
        Ok(guard.clone().unwrap_or_default())
    }

    async fn validate_token(&self, token: &str) -> Result<UserInfo> {
        match self.token.lock().as_deref() {
            Some(stored) if stored == token => Ok(self.user.clone()),
            _ => Err(VaultError::Identity("unknown token".to_string())),
        }
    }

    async fn revoke_token(&self, _token: &str) -> Result<()> {
        if self.fail_revoke {
            return Err(VaultError::Identity("revocation endpoint down".to_string()));
        }
        *self.token.lock() = None;
        Ok(())
    }
}
