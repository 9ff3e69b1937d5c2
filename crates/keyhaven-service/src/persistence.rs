//! Persistence collaborator: the encrypted blob and the profile record.
//!
//! `load_blob` returning `None` means "no vault yet", deliberately
//! distinct from a deserialization failure on a present value.

use async_trait::async_trait;
use std::path::PathBuf;

use keyhaven_core::account::Profile;
use keyhaven_core::error::{Result, VaultError};

const BLOB_FILE: &str = "vault.blob";
const PROFILE_FILE: &str = "profile.json";

#[async_trait]
pub trait BlobStore: Send + Sync {
    async fn save_blob(&self, blob: &str, profile: Option<&Profile>) -> Result<()>;
    async fn load_blob(&self) -> Result<Option<String>>;
    async fn save_profile(&self, profile: &Profile) -> Result<()>;
    async fn load_profile(&self) -> Result<Option<Profile>>;
    async fn clear_all(&self) -> Result<()>;
}

/// File-backed store under the platform data directory.
pub struct FileBlobStore {
    dir: PathBuf,
}

impl FileBlobStore {
    pub fn new(dir: PathBuf) -> Self {
        Self { dir }
    }

    fn blob_path(&self) -> PathBuf {
        self.dir.join(BLOB_FILE)
    }

    fn profile_path(&self) -> PathBuf {
        self.dir.join(PROFILE_FILE)
    }
}

async fn read_optional(path: &PathBuf) -> Result<Option<String>> {
    match tokio::fs::read_to_string(path).await {
        Ok(data) => Ok(Some(data)),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(VaultError::Storage(format!("read {}: {e}", path.display()))),
    }
}

#[async_trait]
impl BlobStore for FileBlobStore {
    async fn save_blob(&self, blob: &str, profile: Option<&Profile>) -> Result<()> {
        tokio::fs::create_dir_all(&self.dir)
            .await
            .map_err(|e| VaultError::Storage(format!("create data dir: {e}")))?;
        tokio::fs::write(self.blob_path(), blob)
            .await
            .map_err(|e| VaultError::Storage(format!("write blob: {e}")))?;
        if let Some(profile) = profile {
            self.save_profile(profile).await?;
        }
        Ok(())
    }

    async fn load_blob(&self) -> Result<Option<String>> {
        read_optional(&self.blob_path()).await
    }

    async fn save_profile(&self, profile: &Profile) -> Result<()> {
        tokio::fs::create_dir_all(&self.dir)
            .await
            .map_err(|e| VaultError::Storage(format!("create data dir: {e}")))?;
        let data = serde_json::to_string_pretty(profile)
            .map_err(|e| VaultError::Format(format!("encode profile: {e}")))?;
        tokio::fs::write(self.profile_path(), data)
            .await
            .map_err(|e| VaultError::Storage(format!("write profile: {e}")))
    }

    async fn load_profile(&self) -> Result<Option<Profile>> {
        match read_optional(&self.profile_path()).await? {
            Some(data) => {
                let profile = serde_json::from_str(&data)
                    .map_err(|e| VaultError::Format(format!("parse profile: {e}")))?;
                Ok(Some(profile))
            }
            None => Ok(None),
        }
    }

    async fn clear_all(&self) -> Result<()> {
        for path in [self.blob_path(), self.profile_path()] {
            match tokio::fs::remove_file(&path).await {
                Ok(()) => {}
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => {
                    return Err(VaultError::Storage(format!(
                        "remove {}: {e}",
                        path.display()
                    )))
                }
            }
        }
        Ok(())
    }
}

/// In-memory store for tests and embedding.
#[derive(Default)]
pub struct MemoryBlobStore {
    inner: parking_lot::Mutex<MemoryInner>,
}

#[derive(Default)]
struct MemoryInner {
    blob: Option<String>,
    profile: Option<Profile>,
}

#[async_trait]
impl BlobStore for MemoryBlobStore {
    async fn save_blob(&self, blob: &str, profile: Option<&Profile>) -> Result<()> {
        let mut inner = self.inner.lock();
        inner.blob = Some(blob.to_string());
        if let Some(profile) = profile {
            inner.profile = Some(profile.clone());
        }
        Ok(())
    }

    async fn load_blob(&self) -> Result<Option<String>> {
        Ok(self.inner.lock().blob.clone())
    }

    async fn save_profile(&self, profile: &Profile) -> Result<()> {
        self.inner.lock().profile = Some(profile.clone());
        Ok(())
    }

    async fn load_profile(&self) -> Result<Option<Profile>> {
        Ok(self.inner.lock().profile.clone())
    }

    async fn clear_all(&self) -> Result<()> {
        let mut inner = self.inner.lock();
        inner.blob = None;
        inner.profile = None;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use keyhaven_core::account::UserInfo;
    use keyhaven_core::settings::VaultSettings;
    use tempfile::tempdir;

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

    #[tokio::test]
    async fn file_store_roundtrip_and_clear() {
        let dir = tempdir().unwrap();
        let store = FileBlobStore::new(dir.path().to_path_buf());
        assert!(store.load_blob().await.unwrap().is_none());

        store.save_blob("blob-data", Some(&profile())).await.unwrap();
        assert_eq!(store.load_blob().await.unwrap().unwrap(), "blob-data");
        assert!(store.load_profile().await.unwrap().is_some());

        store.clear_all().await.unwrap();
        assert!(store.load_blob().await.unwrap().is_none());
        assert!(store.load_profile().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn corrupt_profile_is_format_error() {
        let dir = tempdir().unwrap();
        let store = FileBlobStore::new(dir.path().to_path_buf());
        tokio::fs::create_dir_all(dir.path()).await.unwrap();
        tokio::fs::write(dir.path().join(PROFILE_FILE), "{nope")
            .await
            .unwrap();
        assert!(matches!(
            store.load_profile().await,
            Err(VaultError::Format(_))
        ));
    }
}
