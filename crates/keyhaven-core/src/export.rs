//! Vault export/import envelope, keyed by the recovery phrase.
//!
//! Marker and version are validated before any decryption is attempted; a
//! mismatch is a hard `Format` error.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use zeroize::Zeroizing;

use crate::blob::{deserialize_blob, serialize_blob};
use crate::crypto::{decrypt_with_mnemonic, encrypt_with_mnemonic};
use crate::error::{Result, VaultError};
use crate::mnemonic::MnemonicPhrase;

pub const EXPORT_MARKER: &str = "keyhaven.vault.export";
pub const EXPORT_VERSION: u32 = 1;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VaultExport {
    pub version: u32,
    pub exported_at: DateTime<Utc>,
    #[serde(rename = "type")]
    pub marker: String,
    /// Serialized `EncryptedBlob`, keyed by the mnemonic.
    pub data: String,
}

/// Encrypt the plaintext collection under the phrase and wrap it.
pub fn export_collection(
    collection_json: &str,
    phrase: &MnemonicPhrase,
    now: DateTime<Utc>,
) -> Result<VaultExport> {
    let blob = encrypt_with_mnemonic(collection_json, phrase)?;
    Ok(VaultExport {
        version: EXPORT_VERSION,
        exported_at: now,
        marker: EXPORT_MARKER.to_string(),
        data: serialize_blob(&blob)?,
    })
}

pub fn export_to_json(export: &VaultExport) -> Result<String> {
    serde_json::to_string_pretty(export).map_err(|e| VaultError::Format(format!("encode export: {e}")))
}

/// Parse and validate the envelope. No decryption happens here.
pub fn parse_export(input: &str) -> Result<VaultExport> {
    let export: VaultExport =
        serde_json::from_str(input).map_err(|e| VaultError::Format(format!("parse export: {e}")))?;
    if export.marker != EXPORT_MARKER {
        return Err(VaultError::Format("not a vault export file".to_string()));
    }
    if export.version != EXPORT_VERSION {
        return Err(VaultError::Format(format!(
            "unsupported export version {}",
            export.version
        )));
    }
    Ok(export)
}

/// Recover the plaintext collection JSON from a validated envelope.
pub fn decrypt_export(export: &VaultExport, phrase: &MnemonicPhrase) -> Result<Zeroizing<String>> {
    let blob = deserialize_blob(&export.data)?;
    decrypt_with_mnemonic(&blob, phrase)
}
