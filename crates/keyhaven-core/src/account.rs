use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::settings::VaultSettings;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct UserInfo {
    pub email: String,
    pub id: String,
}

/// Persisted beside the encrypted blob. Never contains secrets, tokens or
/// the master-secret verifier.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Profile {
    pub user: UserInfo,
    pub settings: VaultSettings,
    pub created_at: DateTime<Utc>,
}

/// Redacted session projection handed to callers outside the session
/// manager: no token, no verifier.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct SessionView {
    pub session_id: String,
    pub user: UserInfo,
    pub created_at: DateTime<Utc>,
    pub last_activity: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}
