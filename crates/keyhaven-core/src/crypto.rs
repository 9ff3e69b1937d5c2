//! Authenticated encryption and password-based key derivation.
//!
//! ChaCha20-Poly1305 (96-bit nonce) keyed by Argon2id over the master
//! secret. Every encryption draws a fresh salt and nonce; the same
//! plaintext never produces the same blob twice. Key material is zeroized
//! on drop.

use argon2::{Argon2, Params, Version};
use chacha20poly1305::aead::{Aead, KeyInit};
use chacha20poly1305::{ChaCha20Poly1305, Key, Nonce};
use rand::{Rng, RngCore};
use subtle::ConstantTimeEq;
use zeroize::{Zeroize, ZeroizeOnDrop, Zeroizing};

use crate::blob::EncryptedBlob;
use crate::error::{Result, VaultError};
use crate::mnemonic::{mnemonic_to_key, MnemonicPhrase};

pub const KDF_TIME_COST: u32 = 3;
pub const KDF_MEMORY_COST: u32 = 65536; // 64MB
pub const KDF_PARALLELISM: u32 = 4;
pub const DERIVED_KEY_LEN: usize = 32;
pub const SALT_LEN: usize = 32;
pub const NONCE_LEN: usize = 12;

/// 32-byte symmetric key. Zeroized on drop.
#[derive(Clone, ZeroizeOnDrop)]
pub struct VaultKey(pub(crate) [u8; DERIVED_KEY_LEN]);

impl VaultKey {
    pub fn from_bytes(bytes: [u8; DERIVED_KEY_LEN]) -> Self {
        Self(bytes)
    }
}

pub fn generate_salt() -> [u8; SALT_LEN] {
    let mut salt = [0u8; SALT_LEN];
    rand::rngs::OsRng.fill_bytes(&mut salt);
    salt
}

pub fn generate_nonce() -> [u8; NONCE_LEN] {
    let mut nonce = [0u8; NONCE_LEN];
    rand::rngs::OsRng.fill_bytes(&mut nonce);
    nonce
}

fn argon2_params() -> Result<Params> {
    Params::new(
        KDF_MEMORY_COST,
        KDF_TIME_COST,
        KDF_PARALLELISM,
        Some(DERIVED_KEY_LEN),
    )
    .map_err(|e| VaultError::KeyDerivation(format!("argon2 params: {e}")))
}

/// Derive a symmetric key from the master secret and a salt.
///
/// Deterministic per `(secret, salt)` pair; decryption across sessions
/// depends on this.
pub fn derive_key(secret: &str, salt: &[u8]) -> Result<VaultKey> {
    if secret.is_empty() {
        return Err(VaultError::KeyDerivation("empty secret".to_string()));
    }
    let argon = Argon2::new(argon2::Algorithm::Argon2id, Version::V0x13, argon2_params()?);
    let mut key = [0u8; DERIVED_KEY_LEN];
    argon
        .hash_password_into(secret.as_bytes(), salt, &mut key)
        .map_err(|e| VaultError::KeyDerivation(format!("argon2 derive: {e}")))?;
    let derived = VaultKey(key);
    key.zeroize();
    Ok(derived)
}

fn seal(key: &VaultKey, nonce: &[u8; NONCE_LEN], plaintext: &[u8]) -> Result<Vec<u8>> {
    let cipher = ChaCha20Poly1305::new(Key::from_slice(&key.0));
    cipher
        .encrypt(Nonce::from_slice(nonce), plaintext)
        .map_err(|_| VaultError::KeyDerivation("aead seal".to_string()))
}

fn open(key: &VaultKey, nonce: &[u8; NONCE_LEN], ciphertext: &[u8]) -> Result<Zeroizing<Vec<u8>>> {
    let cipher = ChaCha20Poly1305::new(Key::from_slice(&key.0));
    let plaintext = cipher
        .decrypt(Nonce::from_slice(nonce), ciphertext)
        .map_err(|_| VaultError::Decryption)?;
    Ok(Zeroizing::new(plaintext))
}

/// Encrypt under the master secret with a fresh salt and nonce.
pub fn encrypt_with_secret(plaintext: &str, secret: &str) -> Result<EncryptedBlob> {
    let salt = generate_salt();
    let nonce = generate_nonce();
    let key = derive_key(secret, &salt)?;
    let ciphertext = seal(&key, &nonce, plaintext.as_bytes())?;
    Ok(EncryptedBlob {
        ciphertext,
        nonce,
        salt,
    })
}

/// Decrypt a blob with the master secret. Tag or format failure is a plain
/// `Decryption` error; callers must treat it exactly like a wrong secret.
pub fn decrypt_with_secret(blob: &EncryptedBlob, secret: &str) -> Result<Zeroizing<String>> {
    let key = derive_key(secret, &blob.salt)?;
    let plaintext = open(&key, &blob.nonce, &blob.ciphertext)?;
    let text = String::from_utf8(plaintext.to_vec()).map_err(|_| VaultError::Decryption)?;
    Ok(Zeroizing::new(text))
}

/// Encrypt under a recovery phrase. The blob still carries a fresh random
/// salt so the format and non-determinism invariants hold; the phrase KDF
/// does not consume it.
pub fn encrypt_with_mnemonic(plaintext: &str, phrase: &MnemonicPhrase) -> Result<EncryptedBlob> {
    let salt = generate_salt();
    let nonce = generate_nonce();
    let key = mnemonic_to_key(phrase);
    let ciphertext = seal(&key, &nonce, plaintext.as_bytes())?;
    Ok(EncryptedBlob {
        ciphertext,
        nonce,
        salt,
    })
}

pub fn decrypt_with_mnemonic(blob: &EncryptedBlob, phrase: &MnemonicPhrase) -> Result<Zeroizing<String>> {
    let key = mnemonic_to_key(phrase);
    let plaintext = open(&key, &blob.nonce, &blob.ciphertext)?;
    let text = String::from_utf8(plaintext.to_vec()).map_err(|_| VaultError::Decryption)?;
    Ok(Zeroizing::new(text))
}

// ── Master-secret verifier ────────────────────────────────────────────────────

/// Salted Argon2id digest of the master secret, held only in the session
/// record for step-up re-verification. Never persisted.
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct MasterVerifier {
    #[zeroize(skip)]
    salt: [u8; SALT_LEN],
    digest: [u8; DERIVED_KEY_LEN],
}

impl MasterVerifier {
    pub fn from_secret(secret: &str) -> Result<Self> {
        let salt = generate_salt();
        let key = derive_key(secret, &salt)?;
        Ok(Self {
            salt,
            digest: key.0,
        })
    }

    /// Constant-time comparison of a candidate secret against the stored
    /// digest. An empty or underivable candidate is simply wrong.
    pub fn verify(&self, candidate: &str) -> bool {
        let candidate_key = match derive_key(candidate, &self.salt) {
            Ok(key) => key,
            Err(_) => return false,
        };
        self.digest[..].ct_eq(&candidate_key.0[..]).into()
    }
}

// ── Password generation ───────────────────────────────────────────────────────

const PW_LOWER: &str = "abcdefghijklmnopqrstuvwxyz";
const PW_UPPER: &str = "ABCDEFGHIJKLMNOPQRSTUVWXYZ";
const PW_DIGITS: &str = "0123456789";
const PW_SYMBOLS: &str = "!@#$%^&*()-_=+[]{};:,.?";

pub const MIN_GENERATED_PASSWORD_LEN: usize = 8;
pub const MAX_GENERATED_PASSWORD_LEN: usize = 128;

/// Generate a random password from the requested character classes.
/// Length is clamped to [8, 128]; each position is a uniform draw.
pub fn generate_password(length: usize, symbols: bool) -> String {
    let length = length.clamp(MIN_GENERATED_PASSWORD_LEN, MAX_GENERATED_PASSWORD_LEN);
    let mut charset = String::new();
    charset.push_str(PW_LOWER);
    charset.push_str(PW_UPPER);
    charset.push_str(PW_DIGITS);
    if symbols {
        charset.push_str(PW_SYMBOLS);
    }
    let chars: Vec<char> = charset.chars().collect();
    let mut rng = rand::rngs::OsRng;
    (0..length)
        .map(|_| chars[rng.gen_range(0..chars.len())])
        .collect()
}
