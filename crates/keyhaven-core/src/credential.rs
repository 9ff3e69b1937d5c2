//! Credential records and the serialized collection the vault blob holds.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{Result, VaultError};

/// Fixed mask substituted for passwords on every cache-backed read.
pub const PASSWORD_MASK: &str = "********";

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Credential {
    pub id: String,
    pub url: String,
    pub username: String,
    pub password: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Credential {
    /// Create a record with a fresh immutable id.
    pub fn new(url: &str, username: &str, password: &str, now: DateTime<Utc>) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            url: url.to_string(),
            username: username.to_string(),
            password: password.to_string(),
            created_at: now,
            updated_at: now,
        }
    }

    pub fn masked(&self) -> Credential {
        Credential {
            password: PASSWORD_MASK.to_string(),
            ..self.clone()
        }
    }

    /// Case-insensitive substring match on url and username. Passwords are
    /// never searched.
    pub fn matches(&self, query: &str) -> bool {
        let query = query.to_lowercase();
        self.url.to_lowercase().contains(&query) || self.username.to_lowercase().contains(&query)
    }
}

/// The decrypted form of the whole vault. Serialized as JSON, encrypted as
/// one unit; mutations always rewrite the full collection.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct CredentialCollection {
    pub entries: Vec<Credential>,
}

impl CredentialCollection {
    pub fn from_json(input: &str) -> Result<Self> {
        serde_json::from_str(input).map_err(|e| VaultError::Format(format!("parse vault: {e}")))
    }

    pub fn to_json(&self) -> Result<String> {
        serde_json::to_string(self).map_err(|e| VaultError::Format(format!("encode vault: {e}")))
    }

    pub fn find(&self, id: &str) -> Option<&Credential> {
        self.entries.iter().find(|c| c.id == id)
    }

    pub fn insert(&mut self, credential: Credential) {
        self.entries.push(credential);
    }

    /// Full-record replace; partial mutation of a stored entry never happens.
    pub fn replace(&mut self, mut credential: Credential, now: DateTime<Utc>) -> Result<Credential> {
        let slot = self
            .entries
            .iter_mut()
            .find(|c| c.id == credential.id)
            .ok_or_else(|| VaultError::NotFound(credential.id.clone()))?;
        credential.created_at = slot.created_at;
        credential.updated_at = now;
        *slot = credential.clone();
        Ok(credential)
    }

    pub fn remove(&mut self, id: &str) -> Result<()> {
        let before = self.entries.len();
        self.entries.retain(|c| c.id != id);
        if self.entries.len() == before {
            return Err(VaultError::NotFound(id.to_string()));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample(now: DateTime<Utc>) -> Credential {
        Credential::new("https://example.com", "a@b.com", "p1", now)
    }

    #[test]
    fn masked_hides_only_the_password() {
        let cred = sample(Utc::now());
        let masked = cred.masked();
        assert_eq!(masked.password, PASSWORD_MASK);
        assert_eq!(masked.id, cred.id);
        assert_eq!(masked.username, cred.username);
    }

    #[test]
    fn matching_ignores_case_and_passwords() {
        let cred = sample(Utc::now());
        assert!(cred.matches("EXAMPLE"));
        assert!(cred.matches("a@b"));
        assert!(!cred.matches("p1"));
    }

    #[test]
    fn replace_preserves_id_and_created_at() {
        let now = Utc::now();
        let mut collection = CredentialCollection::default();
        let original = sample(now);
        collection.insert(original.clone());

        let later = now + chrono::Duration::seconds(10);
        let mut edited = original.clone();
        edited.password = "p2".to_string();
        let stored = collection.replace(edited, later).unwrap();
        assert_eq!(stored.id, original.id);
        assert_eq!(stored.created_at, original.created_at);
        assert_eq!(stored.updated_at, later);
        assert_eq!(collection.find(&original.id).unwrap().password, "p2");
    }

    #[test]
    fn remove_unknown_id_is_not_found() {
        let mut collection = CredentialCollection::default();
        assert!(matches!(
            collection.remove("missing"),
            Err(VaultError::NotFound(_))
        ));
    }

    #[test]
    fn json_roundtrip() {
        let mut collection = CredentialCollection::default();
        collection.insert(sample(Utc::now()));
        let json = collection.to_json().unwrap();
        assert_eq!(CredentialCollection::from_json(&json).unwrap(), collection);
    }
}
