//! # ALFA Media Vault
//!
//! Encrypted media storage and key management: album keys, encrypted names,
//! streaming media containers and on-demand retrieval of remote-only files.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────┐
//! │                    ALFA MEDIA VAULT                     │
//! │  ┌───────────────────────────────────────────────────┐  │
//! │  │      MEDIA STORE  (save / load / move / delete)   │  │
//! │  └─────┬───────────────┬─────────────────┬───────────┘  │
//! │        │               │                 │              │
//! │  ┌─────┴───────┐ ┌─────┴───────┐ ┌───────┴───────────┐  │
//! │  │  KEYSTORE   │ │  STORAGE    │ │  REMOTE TRACKER   │  │
//! │  │  + password │ │  local /    │ │  multicast status │  │
//! │  │  + backup   │ │  remote     │ │  + MirrorSync     │  │
//! │  └─────┬───────┘ └─────┬───────┘ └───────────────────┘  │
//! │        │               │                                │
//! │  ┌─────┴───────────────┴─────────────────────────────┐  │
//! │  │  CRYPTO   HKDF → K_names / K_media                │  │
//! │  │           XChaCha20-Poly1305 block containers     │  │
//! │  └───────────────────────────────────────────────────┘  │
//! │                                                         │
//! │  ┌─────────────┐ ┌─────────────┐ ┌───────────────────┐  │
//! │  │  THUMBNAIL  │ │  FILE OP    │ │  CONFIG (JSON)    │  │
//! │  │  ENGINE     │ │  BUS        │ │                   │  │
//! │  └─────────────┘ └─────────────┘ └───────────────────┘  │
//! └─────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Security Model
//!
//! - Media encrypted in authenticated blocks; truncation and reordering detected
//! - Album directory names encrypted under the album key
//! - Thumbnails and previews encrypted as well
//! - Partial outputs removed on failure or cancellation
//! - Key bytes held in `secrecy` wrappers, subkeys zeroized

pub mod crypto;
pub mod keystore;
pub mod media;
pub mod storage;
pub mod remote;
pub mod store;
pub mod thumbs;
pub mod secure_fs;
pub mod bus;
pub mod config;
pub mod error;

pub use error::{VaultError, VaultResult};
pub use crypto::{Key, MediaCipher};
pub use keystore::KeyStore;
pub use media::{CleartextMedia, EncryptedMedia, MediaSource, MediaType, PreviewModel};
pub use storage::{Album, StorageLocation, StorageOption};
pub use remote::{DownloadPolicy, DownloadStatus, RemoteAvailabilityTracker};
pub use store::{LoadDestination, MediaStore};
pub use thumbs::ThumbnailEngine;
pub use bus::{FileOperation, FileOperationBus};
pub use config::StoreConfig;

/// ALFA Media Vault version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// ALFA Media Vault signature
pub const SIGNATURE: &str = "ALFA_MEDIA_VAULT_v1";
