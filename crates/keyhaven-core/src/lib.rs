//! `keyhaven-core`: vault primitives shared by the service and its clients.
//!
//! Authenticated encryption and key derivation, the 16-word recovery
//! phrase, the encrypted blob and export formats, the credential model,
//! and the local messaging protocol.

pub mod account;
pub mod blob;
pub mod credential;
pub mod crypto;
pub mod error;
pub mod export;
pub mod ipc;
pub mod ipc_client;
pub mod mnemonic;
pub mod paths;
pub mod secure_storage;
pub mod settings;

pub use account::{Profile, SessionView, UserInfo};
pub use blob::{deserialize_blob, serialize_blob, EncryptedBlob};
pub use credential::{Credential, CredentialCollection, PASSWORD_MASK};
pub use crypto::{
    decrypt_with_mnemonic, decrypt_with_secret, derive_key, encrypt_with_mnemonic,
    encrypt_with_secret, generate_nonce, generate_password, generate_salt, MasterVerifier,
    VaultKey,
};
pub use error::{Result, VaultError};
pub use export::{decrypt_export, export_collection, export_to_json, parse_export, VaultExport};
pub use mnemonic::{generate_mnemonic, mnemonic_to_key, validate_mnemonic, MnemonicPhrase};
pub use settings::VaultSettings;
