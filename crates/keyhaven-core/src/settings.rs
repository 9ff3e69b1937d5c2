use serde::{Deserialize, Serialize};

/// Tunable vault behavior, persisted in the profile record.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct VaultSettings {
    /// Lifetime of the decrypted in-memory cache.
    pub cache_ttl_secs: u64,
    /// Step-up grace window after a successful verification.
    pub verification_grace_secs: u64,
    /// Per-credential reveal auto-hide timer.
    pub reveal_hide_secs: u64,
    /// Failed verification attempts before lockout.
    pub max_verify_attempts: u32,
    /// Lockout penalty after the attempt budget is exhausted.
    pub lockout_secs: u64,
    /// Sliding idle timeout for the login session.
    pub session_idle_secs: u64,
}

impl Default for VaultSettings {
    fn default() -> Self {
        Self {
            cache_ttl_secs: 300,
            verification_grace_secs: 300,
            reveal_hide_secs: 30,
            max_verify_attempts: 3,
            lockout_secs: 300,
            session_idle_secs: 1800,
        }
    }
}
