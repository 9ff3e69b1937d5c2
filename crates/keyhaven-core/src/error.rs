use thiserror::Error;

/// Error taxonomy for the vault core.
///
/// `Auth`, `KeyDerivation` and `Decryption` are deliberately collapsed into a
/// single user-facing message at the messaging boundary: the system never
/// reveals whether the secret or the stored blob was at fault.
#[derive(Debug, Error)]
pub enum VaultError {
    #[error("authentication failed")]
    Auth,

    #[error("key derivation failed: {0}")]
    KeyDerivation(String),

    #[error("decryption failed")]
    Decryption,

    #[error("invalid or corrupted data: {0}")]
    Format(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("verification locked, retry in {retry_after_secs}s")]
    Lockout { retry_after_secs: u64 },

    #[error("storage failure: {0}")]
    Storage(String),

    #[error("identity provider failure: {0}")]
    Identity(String),

    #[error("i/o failure: {0}")]
    Io(#[from] std::io::Error),
}

impl VaultError {
    /// Message safe to cross the messaging surface. Wrong secret, failed
    /// derivation and failed tag verification are indistinguishable here.
    pub fn public_message(&self) -> String {
        match self {
            VaultError::Auth | VaultError::KeyDerivation(_) | VaultError::Decryption => {
                "invalid master secret".to_string()
            }
            VaultError::Format(_) => "corrupted or invalid data".to_string(),
            VaultError::Io(_) => "internal i/o failure".to_string(),
            other => other.to_string(),
        }
    }

    /// True for failures the user can retry by re-entering the secret.
    pub fn is_auth_equivalent(&self) -> bool {
        matches!(
            self,
            VaultError::Auth | VaultError::KeyDerivation(_) | VaultError::Decryption
        )
    }
}

pub type Result<T> = std::result::Result<T, VaultError>;
