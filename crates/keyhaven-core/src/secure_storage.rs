//! OS-keychain storage for the IPC shared secret and the identity token.

use base64::{engine::general_purpose, Engine as _};
use keyring::Entry;

use crate::error::{Result, VaultError};

const SERVICE_NAME: &str = "KeyhavenVault";
const IPC_SECRET_KEY: &str = "ipc_secret";
const IDENTITY_TOKEN_KEY: &str = "identity_token";

fn entry(key: &str) -> Result<Entry> {
    Entry::new(SERVICE_NAME, key).map_err(|e| VaultError::Storage(format!("keyring init: {e}")))
}

pub fn store_ipc_secret(secret: &[u8]) -> Result<()> {
    let encoded = general_purpose::STANDARD.encode(secret);
    entry(IPC_SECRET_KEY)?
        .set_password(&encoded)
        .map_err(|e| VaultError::Storage(format!("store ipc secret: {e}")))
}

pub fn get_ipc_secret() -> Result<Vec<u8>> {
    let encoded = entry(IPC_SECRET_KEY)?
        .get_password()
        .map_err(|e| VaultError::Storage(format!("load ipc secret: {e}")))?;
    general_purpose::STANDARD
        .decode(encoded)
        .map_err(|e| VaultError::Storage(format!("decode ipc secret: {e}")))
}

pub fn delete_ipc_secret() -> Result<()> {
    entry(IPC_SECRET_KEY)?
        .delete_password()
        .map_err(|e| VaultError::Storage(format!("delete ipc secret: {e}")))
}

pub fn store_identity_token(token: &str) -> Result<()> {
    entry(IDENTITY_TOKEN_KEY)?
        .set_password(token)
        .map_err(|e| VaultError::Storage(format!("store token: {e}")))
}

pub fn get_identity_token() -> Result<Option<String>> {
    match entry(IDENTITY_TOKEN_KEY)?.get_password() {
        Ok(token) => Ok(Some(token)),
        Err(keyring::Error::NoEntry) => Ok(None),
        Err(e) => Err(VaultError::Storage(format!("load token: {e}"))),
    }
}

pub fn delete_identity_token() -> Result<()> {
    match entry(IDENTITY_TOKEN_KEY)?.delete_password() {
        Ok(()) => Ok(()),
        Err(keyring::Error::NoEntry) => Ok(()),
        Err(e) => Err(VaultError::Storage(format!("delete token: {e}"))),
    }
}
