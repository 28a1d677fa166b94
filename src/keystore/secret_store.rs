//! ALFA Media Vault - Secret Store
//!
//! Durable storage for key records. The key store only talks to the
//! [`SecretStore`] trait; backends decide where records live.

use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};

use base64::{engine::general_purpose::STANDARD, Engine as _};
use chrono::{DateTime, Utc};
use log::debug;
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use zeroize::Zeroizing;

use crate::error::{VaultError, VaultResult};
use crate::secure_fs::write_private_blocking;

/// Namespaced record held by a secret store
#[derive(Clone)]
pub struct KeyRecord {
    /// `key:<name>` or `meta:<item>`
    pub label: String,
    pub secret: Zeroizing<Vec<u8>>,
    pub creation_date: DateTime<Utc>,
    /// Whether the record participates in backup sync
    pub sync: bool,
}

impl KeyRecord {
    pub fn new(label: impl Into<String>, secret: Vec<u8>, creation_date: DateTime<Utc>, sync: bool) -> Self {
        Self {
            label: label.into(),
            secret: Zeroizing::new(secret),
            creation_date,
            sync,
        }
    }
}

impl fmt::Debug for KeyRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KeyRecord")
            .field("label", &self.label)
            .field("secret", &"[REDACTED]")
            .field("creation_date", &self.creation_date)
            .field("sync", &self.sync)
            .finish()
    }
}

/// Secure key storage backend
pub trait SecretStore: Send + Sync {
    /// Fetch one record by label
    fn query(&self, label: &str) -> VaultResult<Option<KeyRecord>>;

    /// All records whose label starts with `prefix`
    fn list(&self, prefix: &str) -> VaultResult<Vec<KeyRecord>>;

    /// Insert or replace a record
    fn upsert(&self, record: KeyRecord) -> VaultResult<()>;

    /// Remove a record. Returns whether it existed.
    fn delete(&self, label: &str) -> VaultResult<bool>;
}

// ═══════════════════════════════════════════════════════════════════════════
// IN-MEMORY BACKEND
// ═══════════════════════════════════════════════════════════════════════════

/// Volatile secret store, used for tests and ephemeral sessions
#[derive(Default)]
pub struct MemorySecretStore {
    records: RwLock<BTreeMap<String, KeyRecord>>,
    write_budget: Mutex<Option<usize>>,
}

impl MemorySecretStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Let `n` more writes succeed, then reject the one after them
    pub fn fail_write_after(&self, n: usize) {
        *self.write_budget.lock() = Some(n);
    }

    fn spend_write(&self) -> VaultResult<()> {
        let mut budget = self.write_budget.lock();
        match budget.as_mut() {
            Some(0) => {
                *budget = None;
                Err(VaultError::BackingStoreError("write rejected".into()))
            }
            Some(n) => {
                *n -= 1;
                Ok(())
            }
            None => Ok(()),
        }
    }
}

impl SecretStore for MemorySecretStore {
    fn query(&self, label: &str) -> VaultResult<Option<KeyRecord>> {
        Ok(self.records.read().get(label).cloned())
    }

    fn list(&self, prefix: &str) -> VaultResult<Vec<KeyRecord>> {
        Ok(self
            .records
            .read()
            .range(prefix.to_string()..)
            .take_while(|(label, _)| label.starts_with(prefix))
            .map(|(_, record)| record.clone())
            .collect())
    }

    fn upsert(&self, record: KeyRecord) -> VaultResult<()> {
        self.spend_write()?;
        self.records.write().insert(record.label.clone(), record);
        Ok(())
    }

    fn delete(&self, label: &str) -> VaultResult<bool> {
        self.spend_write()?;
        Ok(self.records.write().remove(label).is_some())
    }
}

// ═══════════════════════════════════════════════════════════════════════════
// FILE BACKEND
// ═══════════════════════════════════════════════════════════════════════════

#[derive(Serialize, Deserialize)]
struct StoredRecord {
    label: String,
    /// base64
    secret: String,
    creation_date: DateTime<Utc>,
    sync: bool,
}

#[derive(Serialize, Deserialize)]
struct StoredDocument {
    version: u32,
    records: Vec<StoredRecord>,
}

/// JSON file backend. Every mutation rewrites the file atomically with
/// owner-only permissions before the in-memory view changes.
pub struct FileSecretStore {
    path: PathBuf,
    records: Mutex<BTreeMap<String, KeyRecord>>,
}

impl FileSecretStore {
    /// Open the store at `path`, creating nothing until the first write
    pub fn open(path: &Path) -> VaultResult<Self> {
        let records = if path.exists() {
            let raw = Zeroizing::new(std::fs::read(path)?);
            let doc: StoredDocument = serde_json::from_slice(&raw)
                .map_err(|e| VaultError::BackingStoreError(format!("{}: {}", path.display(), e)))?;

            let mut records = BTreeMap::new();
            for stored in doc.records {
                let secret = STANDARD
                    .decode(&stored.secret)
                    .map_err(|e| VaultError::BackingStoreError(e.to_string()))?;
                let record = KeyRecord::new(stored.label, secret, stored.creation_date, stored.sync);
                records.insert(record.label.clone(), record);
            }
            records
        } else {
            BTreeMap::new()
        };

        debug!("Opened secret store {} ({} records)", path.display(), records.len());

        Ok(Self {
            path: path.to_path_buf(),
            records: Mutex::new(records),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn persist(&self, records: &BTreeMap<String, KeyRecord>) -> VaultResult<()> {
        let doc = StoredDocument {
            version: 1,
            records: records
                .values()
                .map(|r| StoredRecord {
                    label: r.label.clone(),
                    secret: STANDARD.encode(&*r.secret),
                    creation_date: r.creation_date,
                    sync: r.sync,
                })
                .collect(),
        };

        let json = Zeroizing::new(
            serde_json::to_vec_pretty(&doc).map_err(|e| VaultError::BackingStoreError(e.to_string()))?,
        );
        write_private_blocking(&self.path, &json)
            .map_err(|e| VaultError::BackingStoreError(e.to_string()))
    }
}

impl SecretStore for FileSecretStore {
    fn query(&self, label: &str) -> VaultResult<Option<KeyRecord>> {
        Ok(self.records.lock().get(label).cloned())
    }

    fn list(&self, prefix: &str) -> VaultResult<Vec<KeyRecord>> {
        Ok(self
            .records
            .lock()
            .values()
            .filter(|r| r.label.starts_with(prefix))
            .cloned()
            .collect())
    }

    fn upsert(&self, record: KeyRecord) -> VaultResult<()> {
        let mut records = self.records.lock();
        let mut next = records.clone();
        next.insert(record.label.clone(), record);
        self.persist(&next)?;
        *records = next;
        Ok(())
    }

    fn delete(&self, label: &str) -> VaultResult<bool> {
        let mut records = self.records.lock();
        if !records.contains_key(label) {
            return Ok(false);
        }
        let mut next = records.clone();
        next.remove(label);
        self.persist(&next)?;
        *records = next;
        Ok(true)
    }
}
