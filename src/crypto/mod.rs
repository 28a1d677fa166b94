//! ALFA Media Vault - Cryptographic Core
//!
//! Album keys, name obfuscation and streaming media encryption.

pub mod keys;
pub mod aead;
pub mod names;
pub mod stream;

pub use keys::*;
pub use aead::{open, seal};
pub use names::{decrypt_name, encrypt_name, try_decrypt_name};
pub use stream::{MediaCipher, CONTAINER_EXT, DEFAULT_BLOCK_SIZE};
