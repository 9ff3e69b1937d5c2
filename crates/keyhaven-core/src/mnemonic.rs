//! 16-word recovery phrase for vault export/import.
//!
//! Words come from the 2048-word BIP39 English dictionary (11 bits each,
//! 176 bits of entropy), but the phrase is deliberately not a checksummed
//! BIP39 mnemonic: the 16 draws are independent and duplicates are allowed.
//! The derived key is independent of the primary vault key.

use hkdf::Hkdf;
use rand::RngCore;
use sha2::Sha256;
use zeroize::Zeroizing;

use crate::crypto::{VaultKey, DERIVED_KEY_LEN};
use crate::error::{Result, VaultError};

pub const MNEMONIC_WORDS: usize = 16;
pub const DICTIONARY_SIZE: usize = 2048;

const MNEMONIC_KDF_SALT: &[u8] = b"keyhaven-mnemonic-v1";
const MNEMONIC_KDF_INFO: &[u8] = b"vault export key";

fn in_dictionary(word: &str) -> bool {
    bip39::Language::English
        .wordlist()
        .get_words_by_prefix("")
        .iter()
        .any(|entry| *entry == word)
}

/// Ordered sequence of exactly 16 dictionary words, canonical lowercase.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MnemonicPhrase(Vec<String>);

impl MnemonicPhrase {
    /// Canonicalize and validate a list of words.
    pub fn from_words<I, S>(words: I) -> Result<Self>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let canonical: Vec<String> = words
            .into_iter()
            .map(|w| w.as_ref().trim().to_lowercase())
            .collect();
        if !validate_mnemonic(&canonical) {
            return Err(VaultError::Format("invalid recovery phrase".to_string()));
        }
        Ok(Self(canonical))
    }

    /// Parse a whitespace-separated phrase.
    pub fn parse(input: &str) -> Result<Self> {
        Self::from_words(input.split_whitespace())
    }

    pub fn words(&self) -> &[String] {
        &self.0
    }

    /// Canonical space-joined form. This is the KDF input, so its exact
    /// shape is part of the export format.
    pub fn phrase(&self) -> String {
        self.0.join(" ")
    }
}

/// Draw 16 independent uniform words. 2048 = 2^11, so masking random bytes
/// down to 11 bits introduces no modulo bias.
pub fn generate_mnemonic() -> MnemonicPhrase {
    let dict = bip39::Language::English.wordlist().get_words_by_prefix("");
    let mut rng = rand::rngs::OsRng;
    let words = (0..MNEMONIC_WORDS)
        .map(|_| {
            let index = (rng.next_u32() as usize) & (DICTIONARY_SIZE - 1);
            dict[index].to_string()
        })
        .collect();
    MnemonicPhrase(words)
}

/// True iff exactly 16 entries and every entry is a dictionary word after
/// lowercasing. Duplicate words are fine.
pub fn validate_mnemonic<S: AsRef<str>>(words: &[S]) -> bool {
    if words.len() != MNEMONIC_WORDS {
        return false;
    }
    words
        .iter()
        .all(|w| in_dictionary(&w.as_ref().trim().to_lowercase()))
}

/// Deterministic key derivation: same phrase, same key, in any process.
/// High-entropy input, so HKDF-SHA256 with a fixed domain label suffices.
pub fn mnemonic_to_key(phrase: &MnemonicPhrase) -> VaultKey {
    let joined = Zeroizing::new(phrase.phrase());
    let hk = Hkdf::<Sha256>::new(Some(MNEMONIC_KDF_SALT), joined.as_bytes());
    let mut okm = [0u8; DERIVED_KEY_LEN];
    hk.expand(MNEMONIC_KDF_INFO, &mut okm)
        .expect("32 bytes is a valid HKDF-SHA256 output length");
    VaultKey::from_bytes(okm)
}
