//! ALFA Media Vault - Name Cipher
//!
//! Obfuscates album and path names under a key. Labels are URL-safe base64
//! of `nonce || ciphertext || tag`, so they are valid directory names.

use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine as _};
use log::debug;

use super::aead::{decrypt_xchacha, encrypt_xchacha, EncryptedData};
use super::keys::Key;
use crate::error::{VaultError, VaultResult};

const NAME_AAD: &[u8] = b"name";

/// Encrypt a human-readable name. Each call yields a different label.
pub fn encrypt_name(plain: &str, key: &Key) -> VaultResult<String> {
    let names_key = key.names_key()?;
    let encrypted = encrypt_xchacha(&names_key, plain.as_bytes(), NAME_AAD)?;
    Ok(URL_SAFE_NO_PAD.encode(encrypted.to_bytes()))
}

/// Strict decryption; `None` when the label is not a name sealed under `key`
pub fn try_decrypt_name(label: &str, key: &Key) -> Option<String> {
    match decrypt_label(label, key) {
        Ok(plain) => Some(plain),
        Err(e) => {
            debug!("Label did not decrypt under key {}: {}", key.fingerprint(), e);
            None
        }
    }
}

/// Decrypt a label, falling back to the label itself on any failure.
///
/// Directory listings mix legacy plaintext names with encrypted ones, so
/// callers always get something displayable.
pub fn decrypt_name(label: &str, key: &Key) -> String {
    try_decrypt_name(label, key).unwrap_or_else(|| label.to_string())
}

fn decrypt_label(label: &str, key: &Key) -> VaultResult<String> {
    let raw = URL_SAFE_NO_PAD.decode(label)?;
    let encrypted = EncryptedData::from_bytes(&raw)?;
    let names_key = key.names_key()?;
    let plain = decrypt_xchacha(&names_key, &encrypted, NAME_AAD)?;
    String::from_utf8(plain).map_err(|e| VaultError::DecodingError(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_name_roundtrip_is_randomized() {
        let key = Key::generate("names");

        let a = encrypt_name("Summer 2024", &key).unwrap();
        let b = encrypt_name("Summer 2024", &key).unwrap();

        assert_ne!(a, b);
        assert_eq!(decrypt_name(&a, &key), "Summer 2024");
        assert_eq!(decrypt_name(&b, &key), "Summer 2024");
    }

    #[test]
    fn test_labels_are_path_safe() {
        let key = Key::generate("paths");
        for name in ["a/b", "..", "名前", ""] {
            let label = encrypt_name(name, &key).unwrap();
            assert!(!label.contains('/'));
            assert!(!label.contains('='));
            assert_eq!(try_decrypt_name(&label, &key).as_deref(), Some(name));
        }
    }

    #[test]
    fn test_fallback_returns_label() {
        let key = Key::generate("fallback");
        let other = Key::generate("other");

        assert_eq!(decrypt_name("Holidays", &key), "Holidays");
        assert_eq!(decrypt_name("", &key), "");

        let label = encrypt_name("Private", &other).unwrap();
        assert_eq!(decrypt_name(&label, &key), label);
        assert!(try_decrypt_name(&label, &key).is_none());
    }
}
