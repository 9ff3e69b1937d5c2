//! Credential store mediator: the only path between the plaintext cache
//! and the encrypted blob.
//!
//! Every mutation runs the full cycle: verify secret, load the whole
//! collection, apply the single change, re-encrypt everything with a fresh
//! salt and nonce, persist, refresh the cache. There is no incremental
//! ciphertext update. Argon2 work is pushed off the event loop.

use chrono::{DateTime, Duration, Utc};
use tokio::task;

use keyhaven_core::account::Profile;
use keyhaven_core::blob::{deserialize_blob, serialize_blob};
use keyhaven_core::credential::{Credential, CredentialCollection};
use keyhaven_core::crypto::{decrypt_with_secret, encrypt_with_secret};
use keyhaven_core::error::{Result, VaultError};
use keyhaven_core::export;
use keyhaven_core::mnemonic::MnemonicPhrase;
use keyhaven_core::settings::VaultSettings;

use crate::persistence::BlobStore;

/// Cache of the decrypted collection, held only in process memory.
///
/// `Empty`: no vault content to show (fresh install or after reset).
/// `Fresh`: decrypted entries, valid until the TTL elapses.
/// `NeedsSecret`: content exists but a secret-gated load is required.
pub enum CacheState {
    Empty,
    Fresh {
        entries: Vec<Credential>,
        loaded_at: DateTime<Utc>,
    },
    NeedsSecret,
}

pub struct CredentialMediator {
    store: Box<dyn BlobStore>,
    cache: CacheState,
    ttl: Duration,
}

fn join_err(e: task::JoinError) -> VaultError {
    VaultError::Storage(format!("crypto worker: {e}"))
}

impl CredentialMediator {
    pub fn new(store: Box<dyn BlobStore>, settings: &VaultSettings) -> Self {
        Self {
            store,
            cache: CacheState::Empty,
            ttl: Duration::seconds(settings.cache_ttl_secs as i64),
        }
    }

    pub fn set_cache_ttl_secs(&mut self, ttl_secs: u64) {
        self.ttl = Duration::seconds(ttl_secs as i64);
    }

    pub async fn vault_exists(&self) -> Result<bool> {
        Ok(self.store.load_blob().await?.is_some())
    }

    pub async fn load_profile(&self) -> Result<Option<Profile>> {
        self.store.load_profile().await
    }

    pub async fn save_profile(&self, profile: &Profile) -> Result<()> {
        self.store.save_profile(profile).await
    }

    fn cache_is_fresh(&self, now: DateTime<Utc>) -> bool {
        matches!(&self.cache, CacheState::Fresh { loaded_at, .. } if now - *loaded_at <= self.ttl)
    }

    /// Demote a stale cache. Called from the service sweep.
    pub fn tick(&mut self, now: DateTime<Utc>) {
        if matches!(&self.cache, CacheState::Fresh { .. }) && !self.cache_is_fresh(now) {
            self.cache = CacheState::NeedsSecret;
        }
    }

    /// Masked entries from the cache. Without a fresh secret-gated load the
    /// list is empty, never an error, and `needs_secret` says why.
    pub fn cached(&self, now: DateTime<Utc>) -> (Vec<Credential>, bool) {
        match &self.cache {
            CacheState::Fresh { entries, .. } if self.cache_is_fresh(now) => {
                (entries.iter().map(Credential::masked).collect(), false)
            }
            CacheState::Fresh { .. } | CacheState::NeedsSecret => (Vec::new(), true),
            CacheState::Empty => (Vec::new(), false),
        }
    }

    /// Plaintext password from a fresh cache. `Ok(None)` means the cache
    /// cannot answer (stale or never loaded); a fresh cache without the id
    /// is a hard `NotFound`.
    pub fn cached_password(&self, id: &str, now: DateTime<Utc>) -> Result<Option<String>> {
        match &self.cache {
            CacheState::Fresh { entries, .. } if self.cache_is_fresh(now) => entries
                .iter()
                .find(|c| c.id == id)
                .map(|c| Some(c.password.clone()))
                .ok_or_else(|| VaultError::NotFound(id.to_string())),
            _ => Ok(None),
        }
    }

    pub fn search_cached(&self, query: &str, now: DateTime<Utc>) -> (Vec<Credential>, bool) {
        let (entries, needs_secret) = self.cached(now);
        (
            entries.into_iter().filter(|c| c.matches(query)).collect(),
            needs_secret,
        )
    }

    pub fn clear_cache(&mut self) {
        self.cache = CacheState::NeedsSecret;
    }

    async fn load_collection(&self, secret: &str) -> Result<CredentialCollection> {
        let serialized = self
            .store
            .load_blob()
            .await?
            .ok_or_else(|| VaultError::NotFound("vault".to_string()))?;
        let blob = deserialize_blob(&serialized)?;
        let secret = secret.to_string();
        let json = task::spawn_blocking(move || decrypt_with_secret(&blob, &secret))
            .await
            .map_err(join_err)??;
        CredentialCollection::from_json(&json)
    }

    async fn persist(
        &mut self,
        collection: CredentialCollection,
        secret: &str,
        profile: Option<&Profile>,
        now: DateTime<Utc>,
    ) -> Result<()> {
        let json = collection.to_json()?;
        let secret = secret.to_string();
        // Fresh salt and nonce on every write; identical plaintext never
        // produces the same blob twice.
        let blob = task::spawn_blocking(move || encrypt_with_secret(&json, &secret))
            .await
            .map_err(join_err)??;
        let serialized = serialize_blob(&blob)?;
        self.store.save_blob(&serialized, profile).await?;
        self.cache = CacheState::Fresh {
            entries: collection.entries,
            loaded_at: now,
        };
        Ok(())
    }

    /// Create the vault with an empty collection (sign-up).
    pub async fn initialize_vault(
        &mut self,
        secret: &str,
        profile: &Profile,
        now: DateTime<Utc>,
    ) -> Result<()> {
        self.persist(CredentialCollection::default(), secret, Some(profile), now)
            .await
    }

    /// Secret-gated load: decrypt, refresh the cache, return unmasked.
    pub async fn unlock(&mut self, secret: &str, now: DateTime<Utc>) -> Result<Vec<Credential>> {
        let collection = self.load_collection(secret).await?;
        let entries = collection.entries.clone();
        self.cache = CacheState::Fresh {
            entries: collection.entries,
            loaded_at: now,
        };
        Ok(entries)
    }

    pub async fn save(
        &mut self,
        url: &str,
        username: &str,
        password: &str,
        secret: &str,
        now: DateTime<Utc>,
    ) -> Result<Credential> {
        let mut collection = self.load_collection(secret).await?;
        let credential = Credential::new(url, username, password, now);
        collection.insert(credential.clone());
        self.persist(collection, secret, None, now).await?;
        Ok(credential)
    }

    pub async fn update(
        &mut self,
        credential: Credential,
        secret: &str,
        now: DateTime<Utc>,
    ) -> Result<Credential> {
        let mut collection = self.load_collection(secret).await?;
        let stored = collection.replace(credential, now)?;
        self.persist(collection, secret, None, now).await?;
        Ok(stored)
    }

    pub async fn delete(&mut self, id: &str, secret: &str, now: DateTime<Utc>) -> Result<()> {
        let mut collection = self.load_collection(secret).await?;
        collection.remove(id)?;
        self.persist(collection, secret, None, now).await?;
        Ok(())
    }

    /// Single plaintext password, secret-gated.
    pub async fn password_of(
        &mut self,
        id: &str,
        secret: &str,
        now: DateTime<Utc>,
    ) -> Result<String> {
        let collection = self.load_collection(secret).await?;
        let password = collection
            .find(id)
            .map(|c| c.password.clone())
            .ok_or_else(|| VaultError::NotFound(id.to_string()))?;
        self.cache = CacheState::Fresh {
            entries: collection.entries,
            loaded_at: now,
        };
        Ok(password)
    }

    pub async fn search_unlocked(
        &mut self,
        query: &str,
        secret: &str,
        now: DateTime<Utc>,
    ) -> Result<Vec<Credential>> {
        let entries = self.unlock(secret, now).await?;
        Ok(entries.into_iter().filter(|c| c.matches(query)).collect())
    }

    /// Re-encrypt the whole collection under the recovery phrase.
    pub async fn export(
        &mut self,
        secret: &str,
        phrase: &MnemonicPhrase,
        now: DateTime<Utc>,
    ) -> Result<String> {
        let collection = self.load_collection(secret).await?;
        let json = collection.to_json()?;
        let envelope = export::export_collection(&json, phrase, now)?;
        export::export_to_json(&envelope)
    }

    /// Replace the vault with an imported collection. Envelope validation
    /// happens before any decryption.
    pub async fn import(
        &mut self,
        payload: &str,
        phrase: &MnemonicPhrase,
        secret: &str,
        now: DateTime<Utc>,
    ) -> Result<usize> {
        let envelope = export::parse_export(payload)?;
        let json = export::decrypt_export(&envelope, phrase)?;
        let collection = CredentialCollection::from_json(&json)?;
        let count = collection.entries.len();
        self.persist(collection, secret, None, now).await?;
        Ok(count)
    }

    /// Wipe the persisted vault and the cache.
    pub async fn reset(&mut self) -> Result<()> {
        self.store.clear_all().await?;
        self.cache = CacheState::Empty;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::persistence::MemoryBlobStore;
    use keyhaven_core::account::UserInfo;
    use keyhaven_core::mnemonic::generate_mnemonic;

    const SECRET: &str = "Sup3rSecret!";

    fn profile() -> Profile {
        Profile {
            user: UserInfo {
                email: "a@b.com".to_string(),
                id: "user-1".to_string(),
            },
            settings: VaultSettings::default(),
            created_at: Utc::now(),
        }
    }

    async fn mediator_with_vault(now: DateTime<Utc>) -> CredentialMediator {
        let mut mediator = CredentialMediator::new(
            Box::new(MemoryBlobStore::default()),
            &VaultSettings::default(),
        );
        mediator
            .initialize_vault(SECRET, &profile(), now)
            .await
            .unwrap();
        mediator
    }

    #[tokio::test]
    async fn cache_answers_within_ttl_and_empties_after() {
        let now = Utc::now();
        let mut mediator = mediator_with_vault(now).await;
        mediator
            .save("example.com", "a@b.com", "p1", SECRET, now)
            .await
            .unwrap();

        let (fresh, needs_secret) = mediator.cached(now + Duration::seconds(299));
        assert_eq!(fresh.len(), 1);
        assert!(!needs_secret);
        assert_eq!(fresh[0].password, keyhaven_core::PASSWORD_MASK);

        let (stale, needs_secret) = mediator.cached(now + Duration::seconds(301));
        assert!(stale.is_empty());
        assert!(needs_secret);
    }

    #[tokio::test]
    async fn mutations_reencrypt_the_whole_collection() {
        let now = Utc::now();
        let mut mediator = mediator_with_vault(now).await;
        let first = mediator.store.load_blob().await.unwrap().unwrap();
        mediator
            .save("example.com", "a@b.com", "p1", SECRET, now)
            .await
            .unwrap();
        let second = mediator.store.load_blob().await.unwrap().unwrap();
        assert_ne!(first, second);

        // Same content, new salt/nonce: delete and re-add yields another blob.
        let entries = mediator.unlock(SECRET, now).await.unwrap();
        mediator
            .update(entries[0].clone(), SECRET, now)
            .await
            .unwrap();
        let third = mediator.store.load_blob().await.unwrap().unwrap();
        assert_ne!(second, third);
    }

    #[tokio::test]
    async fn wrong_secret_is_auth_equivalent_everywhere() {
        let now = Utc::now();
        let mut mediator = mediator_with_vault(now).await;
        let err = mediator.unlock("wrong", now).await.unwrap_err();
        assert!(err.is_auth_equivalent());
        let err = mediator
            .save("u", "n", "p", "wrong", now)
            .await
            .unwrap_err();
        assert!(err.is_auth_equivalent());
    }

    #[tokio::test]
    async fn password_of_unknown_id_is_not_found() {
        let now = Utc::now();
        let mut mediator = mediator_with_vault(now).await;
        assert!(matches!(
            mediator.password_of("missing", SECRET, now).await,
            Err(VaultError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn export_wipe_import_restores_the_collection() {
        let now = Utc::now();
        let mut mediator = mediator_with_vault(now).await;
        mediator
            .save("example.com", "a@b.com", "p1", SECRET, now)
            .await
            .unwrap();
        mediator
            .save("other.org", "c@d.com", "p2", SECRET, now)
            .await
            .unwrap();
        let before = mediator.unlock(SECRET, now).await.unwrap();

        let phrase = generate_mnemonic();
        let payload = mediator.export(SECRET, &phrase, now).await.unwrap();

        mediator.reset().await.unwrap();
        assert!(!mediator.vault_exists().await.unwrap());

        let count = mediator
            .import(&payload, &phrase, SECRET, now)
            .await
            .unwrap();
        assert_eq!(count, 2);
        let after = mediator.unlock(SECRET, now).await.unwrap();
        assert_eq!(before, after);
    }

    #[tokio::test]
    async fn import_with_wrong_phrase_fails_closed() {
        let now = Utc::now();
        let mut mediator = mediator_with_vault(now).await;
        let payload = mediator
            .export(SECRET, &generate_mnemonic(), now)
            .await
            .unwrap();
        let err = mediator
            .import(&payload, &generate_mnemonic(), SECRET, now)
            .await
            .unwrap_err();
        assert!(err.is_auth_equivalent());
    }

    #[tokio::test]
    async fn garbage_import_is_format_error_before_decryption() {
        let now = Utc::now();
        let mut mediator = mediator_with_vault(now).await;
        let err = mediator
            .import("{\"hello\":1}", &generate_mnemonic(), SECRET, now)
            .await
            .unwrap_err();
        assert!(matches!(err, VaultError::Format(_)));
    }
}
