//! ALFA Media Vault - Error Types

use thiserror::Error;

/// Result type for vault operations
pub type VaultResult<T> = Result<T, VaultError>;

/// Vault error types
#[derive(Error, Debug)]
pub enum VaultError {
    // ═══════════════════════════════════════════════════════════════
    // KEY ERRORS
    // ═══════════════════════════════════════════════════════════════

    #[error("Invalid key name: {0}")]
    NameInvalid(String),

    #[error("A key named '{0}' already exists")]
    NameAlreadyExists(String),

    #[error("Key not found: {0}")]
    KeyNotFound(String),

    #[error("Key already exists: {0}")]
    KeyAlreadyExists(String),

    #[error("Could not decode key: {0}")]
    DecodingError(String),

    #[error("Could not encode keys: {0}")]
    EncodingError(String),

    #[error("Secure key storage failed: {0}")]
    BackingStoreError(String),

    #[error("Invalid password")]
    InvalidPassword,

    #[error("Invalid passphrase: {0}")]
    InvalidPassphrase(String),

    // ═══════════════════════════════════════════════════════════════
    // CRYPTO ERRORS
    // ═══════════════════════════════════════════════════════════════

    #[error("Authentication failed - wrong key or tampered data")]
    AuthenticationFailure,

    #[error("Encrypted input is truncated")]
    TruncatedInput,

    #[error("Crypto error: {0}")]
    CryptoError(String),

    #[error("Key derivation failed: {0}")]
    KeyDerivationFailed(String),

    // ═══════════════════════════════════════════════════════════════
    // STORAGE ERRORS
    // ═══════════════════════════════════════════════════════════════

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Could not create media from resolved file")]
    CouldNotCreateMedia,

    #[error("Media must be downloaded before it can be read")]
    NeedsDownload,

    #[error("Remote storage is not configured")]
    NoRemoteStorage,

    #[error("Invalid media: {0}")]
    InvalidMedia(String),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    // ═══════════════════════════════════════════════════════════════
    // DOWNLOAD ERRORS
    // ═══════════════════════════════════════════════════════════════

    #[error("Download cancelled")]
    Cancelled,

    #[error("Download timed out")]
    DownloadTimedOut,
}

impl VaultError {
    /// Key management failure (wrong name, missing key, bad password...)
    pub fn is_key_error(&self) -> bool {
        matches!(
            self,
            VaultError::NameInvalid(_)
                | VaultError::NameAlreadyExists(_)
                | VaultError::KeyNotFound(_)
                | VaultError::KeyAlreadyExists(_)
                | VaultError::DecodingError(_)
                | VaultError::EncodingError(_)
                | VaultError::BackingStoreError(_)
                | VaultError::InvalidPassword
                | VaultError::InvalidPassphrase(_)
        )
    }

    /// Ciphertext did not authenticate under the given key
    pub fn is_authentication_failure(&self) -> bool {
        matches!(self, VaultError::AuthenticationFailure)
    }

    /// Check if this is a security-critical error
    pub fn is_security_critical(&self) -> bool {
        matches!(
            self,
            VaultError::AuthenticationFailure
                | VaultError::TruncatedInput
                | VaultError::InvalidPassword
        )
    }
}

impl From<serde_json::Error> for VaultError {
    fn from(e: serde_json::Error) -> Self {
        VaultError::EncodingError(e.to_string())
    }
}

impl From<base64::DecodeError> for VaultError {
    fn from(e: base64::DecodeError) -> Self {
        VaultError::DecodingError(e.to_string())
    }
}

impl From<image::ImageError> for VaultError {
    fn from(e: image::ImageError) -> Self {
        VaultError::InvalidMedia(e.to_string())
    }
}
