use directories::ProjectDirs;
use std::path::PathBuf;

use crate::error::VaultError;

pub const APP_QUALIFIER: &str = "io";
pub const APP_ORG: &str = "keyhaven";
pub const APP_NAME: &str = "vault";

pub fn data_dir() -> Result<PathBuf, VaultError> {
    let dirs = ProjectDirs::from(APP_QUALIFIER, APP_ORG, APP_NAME)
        .ok_or_else(|| VaultError::Storage("cannot determine data directory".to_string()))?;
    Ok(dirs.data_dir().to_path_buf())
}

pub fn ipc_socket_path() -> Result<PathBuf, VaultError> {
    if let Ok(override_path) = std::env::var("KEYHAVEN_SOCKET") {
        return Ok(PathBuf::from(override_path));
    }
    #[cfg(unix)]
    {
        Ok(data_dir()?.join("keyhaven.ipc"))
    }
    #[cfg(windows)]
    {
        Ok(PathBuf::from(r"\\.\pipe\KeyhavenVaultIpc"))
    }
}
