//! ALFA Media Vault - Album Keys
//!
//! Keys are 32 random bytes bound to a name. Purpose subkeys for names and
//! media payloads are derived from them via HKDF.

use std::fmt;

use base64::{engine::general_purpose::STANDARD, Engine as _};
use chrono::{DateTime, Utc};
use hkdf::Hkdf;
use rand::RngCore;
use secrecy::{ExposeSecret, Secret};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use zeroize::Zeroizing;

use crate::error::{VaultError, VaultResult};

/// Key length for XChaCha20-Poly1305
pub const KEY_LEN: usize = 32;

/// Nonce length for XChaCha20
pub const XCHACHA_NONCE_LEN: usize = 24;

/// Minimum number of characters in a key name
pub const MIN_KEY_NAME_LEN: usize = 2;

/// Number of passphrase words used as Argon2 salt
pub const PASSPHRASE_SALT_WORDS: usize = 4;

/// Argon2 salt length for passphrase keys
pub const PASSPHRASE_SALT_LEN: usize = 16;

/// HKDF contexts for key derivation
pub mod contexts {
    /// Context for album/path name encryption
    pub const NAMES: &[u8] = b"ALFA:MEDIA:NAMES:v1";

    /// Context for media payload encryption
    pub const MEDIA: &[u8] = b"ALFA:MEDIA:PAYLOAD:v1";
}

/// Symmetric key governing one or more albums
#[derive(Clone)]
pub struct Key {
    name: String,
    secret: Secret<[u8; KEY_LEN]>,
    creation_date: DateTime<Utc>,
}

impl Key {
    /// Create a key from existing bytes
    pub fn new(name: impl Into<String>, bytes: [u8; KEY_LEN], creation_date: DateTime<Utc>) -> Self {
        Self {
            name: name.into(),
            secret: Secret::new(bytes),
            creation_date,
        }
    }

    /// Generate a random key
    pub fn generate(name: impl Into<String>) -> Self {
        let mut bytes = [0u8; KEY_LEN];
        rand::thread_rng().fill_bytes(&mut bytes);
        Self::new(name, bytes, Utc::now())
    }

    /// Build a key from a secret slice, rejecting wrong lengths
    pub fn from_slice(
        name: impl Into<String>,
        bytes: &[u8],
        creation_date: DateTime<Utc>,
    ) -> VaultResult<Self> {
        let bytes: [u8; KEY_LEN] = bytes.try_into().map_err(|_| {
            VaultError::DecodingError(format!("expected {} key bytes, got {}", KEY_LEN, bytes.len()))
        })?;
        Ok(Self::new(name, bytes, creation_date))
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn creation_date(&self) -> DateTime<Utc> {
        self.creation_date
    }

    /// Expose the key bytes (use with caution)
    pub fn expose(&self) -> &[u8; KEY_LEN] {
        self.secret.expose_secret()
    }

    /// Short stable fingerprint of the key material, safe to log
    pub fn fingerprint(&self) -> String {
        let digest = Sha256::digest(self.expose());
        hex::encode(&digest[..8])
    }

    /// Subkey used by the name cipher
    pub fn names_key(&self) -> VaultResult<Zeroizing<[u8; KEY_LEN]>> {
        derive_subkey(self.expose(), contexts::NAMES)
    }

    /// Subkey used by the media cipher
    pub fn media_key(&self) -> VaultResult<Zeroizing<[u8; KEY_LEN]>> {
        derive_subkey(self.expose(), contexts::MEDIA)
    }

    /// Serialize to the transportable base64 form
    pub fn to_base64(&self) -> VaultResult<String> {
        let serialized = SerializedKey {
            name: self.name.clone(),
            key_bytes: self.expose().to_vec(),
            creation_date: self.creation_date,
        };
        let json = serde_json::to_vec(&serialized)?;
        Ok(STANDARD.encode(json))
    }

    /// Parse the transportable base64 form
    pub fn from_base64(encoded: &str) -> VaultResult<Self> {
        let json = STANDARD.decode(encoded.trim())?;
        let serialized: SerializedKey = serde_json::from_slice(&json)
            .map_err(|e| VaultError::DecodingError(e.to_string()))?;
        Self::from_slice(serialized.name, &serialized.key_bytes, serialized.creation_date)
    }

    /// Derive a key from passphrase words using Argon2id.
    ///
    /// The first [`PASSPHRASE_SALT_WORDS`] words form the salt, the rest the
    /// password. The salt must reach [`PASSPHRASE_SALT_LEN`] bytes.
    pub fn from_passphrase(name: impl Into<String>, words: &[String]) -> VaultResult<Self> {
        use argon2::{Algorithm, Argon2, Params, Version};

        if words.len() <= PASSPHRASE_SALT_WORDS {
            return Err(VaultError::InvalidPassphrase(format!(
                "expected more than {} words",
                PASSPHRASE_SALT_WORDS
            )));
        }

        let salt = words[..PASSPHRASE_SALT_WORDS].join("-");
        let salt = salt.as_bytes();
        if salt.len() < PASSPHRASE_SALT_LEN {
            return Err(VaultError::InvalidPassphrase("salt words too short".into()));
        }
        let password = Zeroizing::new(words[PASSPHRASE_SALT_WORDS..].join("-"));

        let params = Params::new(65536, 2, 1, Some(KEY_LEN))
            .map_err(|e| VaultError::KeyDerivationFailed(e.to_string()))?;
        let argon2 = Argon2::new(Algorithm::Argon2id, Version::V0x13, params);

        let mut bytes = Zeroizing::new([0u8; KEY_LEN]);
        argon2
            .hash_password_into(password.as_bytes(), &salt[..PASSPHRASE_SALT_LEN], &mut *bytes)
            .map_err(|e| VaultError::KeyDerivationFailed(e.to_string()))?;

        Ok(Self::new(name, *bytes, Utc::now()))
    }
}

impl PartialEq for Key {
    fn eq(&self, other: &Self) -> bool {
        self.name == other.name && self.expose() == other.expose()
    }
}

impl Eq for Key {}

impl fmt::Debug for Key {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Key")
            .field("name", &self.name)
            .field("fingerprint", &self.fingerprint())
            .field("creation_date", &self.creation_date)
            .finish()
    }
}

#[derive(Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SerializedKey {
    name: String,
    key_bytes: Vec<u8>,
    creation_date: DateTime<Utc>,
}

/// Derive a purpose subkey using HKDF-SHA256
pub fn derive_subkey(ikm: &[u8], info: &[u8]) -> VaultResult<Zeroizing<[u8; KEY_LEN]>> {
    let hk = Hkdf::<Sha256>::new(None, ikm);
    let mut okm = Zeroizing::new([0u8; KEY_LEN]);

    hk.expand(info, &mut *okm)
        .map_err(|e| VaultError::KeyDerivationFailed(e.to_string()))?;

    Ok(okm)
}

/// Generate a random nonce for XChaCha20
pub fn generate_xchacha_nonce() -> [u8; XCHACHA_NONCE_LEN] {
    let mut nonce = [0u8; XCHACHA_NONCE_LEN];
    rand::thread_rng().fill_bytes(&mut nonce);
    nonce
}
