//! ALFA Media Vault - One-shot AEAD
//!
//! XChaCha20-Poly1305 sealing for small payloads (names, preview sidecars).

use chacha20poly1305::{
    aead::{Aead, KeyInit, Payload},
    XChaCha20Poly1305, XNonce,
};

use super::keys::{generate_xchacha_nonce, Key, KEY_LEN, XCHACHA_NONCE_LEN};
use crate::error::{VaultError, VaultResult};

/// Poly1305 tag length
pub const TAG_LEN: usize = 16;

/// Encrypted data with nonce prepended
pub struct EncryptedData {
    /// 24-byte XChaCha nonce
    pub nonce: [u8; XCHACHA_NONCE_LEN],
    /// Ciphertext with authentication tag
    pub ciphertext: Vec<u8>,
}

impl EncryptedData {
    /// Serialize to bytes (nonce || ciphertext)
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut result = Vec::with_capacity(self.nonce.len() + self.ciphertext.len());
        result.extend_from_slice(&self.nonce);
        result.extend_from_slice(&self.ciphertext);
        result
    }

    /// Deserialize from bytes (nonce || ciphertext)
    pub fn from_bytes(data: &[u8]) -> VaultResult<Self> {
        if data.len() < XCHACHA_NONCE_LEN + TAG_LEN {
            return Err(VaultError::TruncatedInput);
        }

        let mut nonce = [0u8; XCHACHA_NONCE_LEN];
        nonce.copy_from_slice(&data[..XCHACHA_NONCE_LEN]);

        Ok(Self {
            nonce,
            ciphertext: data[XCHACHA_NONCE_LEN..].to_vec(),
        })
    }
}

/// Encrypt with XChaCha20-Poly1305 under a raw 32-byte key and random nonce
pub fn encrypt_xchacha(key: &[u8; KEY_LEN], plaintext: &[u8], aad: &[u8]) -> VaultResult<EncryptedData> {
    let cipher = XChaCha20Poly1305::new_from_slice(key)
        .map_err(|e| VaultError::CryptoError(e.to_string()))?;

    let nonce = generate_xchacha_nonce();
    let ciphertext = cipher
        .encrypt(XNonce::from_slice(&nonce), Payload { msg: plaintext, aad })
        .map_err(|e| VaultError::CryptoError(e.to_string()))?;

    Ok(EncryptedData { nonce, ciphertext })
}

/// Decrypt XChaCha20-Poly1305; any tag mismatch is an authentication failure
pub fn decrypt_xchacha(key: &[u8; KEY_LEN], encrypted: &EncryptedData, aad: &[u8]) -> VaultResult<Vec<u8>> {
    let cipher = XChaCha20Poly1305::new_from_slice(key)
        .map_err(|e| VaultError::CryptoError(e.to_string()))?;

    cipher
        .decrypt(
            XNonce::from_slice(&encrypted.nonce),
            Payload {
                msg: &encrypted.ciphertext,
                aad,
            },
        )
        .map_err(|_| VaultError::AuthenticationFailure)
}

/// Seal a small sidecar payload under the album key's media subkey
pub fn seal(key: &Key, plaintext: &[u8]) -> VaultResult<Vec<u8>> {
    let media_key = key.media_key()?;
    Ok(encrypt_xchacha(&media_key, plaintext, b"sidecar")?.to_bytes())
}

/// Open a payload produced by [`seal`]
pub fn open(key: &Key, sealed: &[u8]) -> VaultResult<Vec<u8>> {
    let media_key = key.media_key()?;
    let encrypted = EncryptedData::from_bytes(sealed)?;
    decrypt_xchacha(&media_key, &encrypted, b"sidecar")
}
