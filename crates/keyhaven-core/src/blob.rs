//! Encrypted blob container and its transportable envelope.
//!
//! Wire format: JSON `{ "v": 1, "ct": b64, "nonce": b64, "salt": b64 }`.
//! Malformed input is a `Format` error, distinct from decryption failure.

use base64::{engine::general_purpose, Engine as _};
use serde::{Deserialize, Serialize};

use crate::crypto::{NONCE_LEN, SALT_LEN};
use crate::error::{Result, VaultError};

pub const BLOB_FORMAT_VERSION: u32 = 1;

/// One blob holds the entire serialized credential collection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncryptedBlob {
    pub ciphertext: Vec<u8>,
    pub nonce: [u8; NONCE_LEN],
    pub salt: [u8; SALT_LEN],
}

#[derive(Serialize, Deserialize)]
struct BlobEnvelope {
    v: u32,
    ct: String,
    nonce: String,
    salt: String,
}

/// Lossless round-trip to a storage/transport string.
pub fn serialize_blob(blob: &EncryptedBlob) -> Result<String> {
    let envelope = BlobEnvelope {
        v: BLOB_FORMAT_VERSION,
        ct: general_purpose::STANDARD.encode(&blob.ciphertext),
        nonce: general_purpose::STANDARD.encode(blob.nonce),
        salt: general_purpose::STANDARD.encode(blob.salt),
    };
    serde_json::to_string(&envelope).map_err(|e| VaultError::Format(format!("encode blob: {e}")))
}

pub fn deserialize_blob(input: &str) -> Result<EncryptedBlob> {
    let envelope: BlobEnvelope =
        serde_json::from_str(input).map_err(|e| VaultError::Format(format!("parse blob: {e}")))?;
    if envelope.v != BLOB_FORMAT_VERSION {
        return Err(VaultError::Format(format!(
            "unsupported blob version {}",
            envelope.v
        )));
    }
    let ciphertext = general_purpose::STANDARD
        .decode(&envelope.ct)
        .map_err(|e| VaultError::Format(format!("decode ciphertext: {e}")))?;
    let nonce: [u8; NONCE_LEN] = general_purpose::STANDARD
        .decode(&envelope.nonce)
        .map_err(|e| VaultError::Format(format!("decode nonce: {e}")))?
        .try_into()
        .map_err(|_| VaultError::Format("nonce length invalid".to_string()))?;
    let salt: [u8; SALT_LEN] = general_purpose::STANDARD
        .decode(&envelope.salt)
        .map_err(|e| VaultError::Format(format!("decode salt: {e}")))?
        .try_into()
        .map_err(|_| VaultError::Format("salt length invalid".to_string()))?;
    Ok(EncryptedBlob {
        ciphertext,
        nonce,
        salt,
    })
}
