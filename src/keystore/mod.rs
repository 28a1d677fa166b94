//! ALFA Media Vault - Key Store
//!
//! Holds the album keys, persists them through a [`SecretStore`] and tracks
//! which key is current. Every mutation reaches the durable store before the
//! in-memory view changes.

pub mod secret_store;

use std::collections::BTreeMap;
use std::sync::Arc;

use argon2::{
    password_hash::{PasswordHash, PasswordHasher, PasswordVerifier, SaltString},
    Argon2,
};
use chrono::{DateTime, Utc};
use log::{info, warn};
use rand::RngCore;
use serde::{Deserialize, Serialize};
use tokio::sync::{watch, Mutex};
use zeroize::Zeroizing;

use crate::crypto::{Key, MIN_KEY_NAME_LEN};
use crate::error::{VaultError, VaultResult};

pub use secret_store::{FileSecretStore, KeyRecord, MemorySecretStore, SecretStore};

/// Label prefix of key records
pub const KEY_PREFIX: &str = "key:";
/// Label of the current-key pointer
pub const CURRENT_LABEL: &str = "meta:current";
/// Label of the app password hash
pub const PASSWORD_LABEL: &str = "meta:password";
/// Label of the backup sync flag
pub const BACKUP_LABEL: &str = "meta:backup";

const BACKUP_DOCUMENT_VERSION: u32 = 1;

fn key_label(name: &str) -> String {
    format!("{}{}", KEY_PREFIX, name)
}

/// Trim and validate a key name
pub fn validate_key_name(name: &str) -> VaultResult<String> {
    let trimmed = name.trim();
    if trimmed.chars().count() < MIN_KEY_NAME_LEN {
        return Err(VaultError::NameInvalid(format!(
            "'{}' must have at least {} characters",
            name, MIN_KEY_NAME_LEN
        )));
    }
    Ok(trimmed.to_string())
}

/// Exported set of keys
#[derive(Debug, Serialize, Deserialize)]
pub struct BackupDocument {
    pub version: u32,
    pub exported_at: DateTime<Utc>,
    /// Keys in their transportable base64 form
    pub keys: Vec<String>,
}

#[derive(Default)]
struct KeyCache {
    keys: BTreeMap<String, Key>,
    current: Option<String>,
    sync_enabled: bool,
}

/// Album key manager
pub struct KeyStore {
    backend: Arc<dyn SecretStore>,
    cache: Mutex<KeyCache>,
    current_tx: watch::Sender<Option<Key>>,
}

impl KeyStore {
    /// Load every key and the current pointer from `backend`
    pub fn open(backend: Arc<dyn SecretStore>) -> VaultResult<Self> {
        let mut cache = KeyCache::default();

        for record in backend.list(KEY_PREFIX)? {
            let name = &record.label[KEY_PREFIX.len()..];
            let key = Key::from_slice(name, &record.secret, record.creation_date)?;
            cache.keys.insert(name.to_string(), key);
        }

        if let Some(record) = backend.query(CURRENT_LABEL)? {
            let name = String::from_utf8(record.secret.to_vec())
                .map_err(|e| VaultError::DecodingError(e.to_string()))?;
            if cache.keys.contains_key(&name) {
                cache.current = Some(name);
            } else {
                warn!("Current key pointer names a missing key, ignoring");
            }
        }

        cache.sync_enabled = backend
            .query(BACKUP_LABEL)?
            .map(|r| r.secret.first() == Some(&1))
            .unwrap_or(false);

        let current = cache.current.as_ref().and_then(|n| cache.keys.get(n)).cloned();
        let (current_tx, _) = watch::channel(current);

        info!("Key store opened with {} keys", cache.keys.len());

        Ok(Self {
            backend,
            cache: Mutex::new(cache),
            current_tx,
        })
    }

    /// Empty store backed by memory
    pub fn in_memory() -> Self {
        let (current_tx, _) = watch::channel(None);
        Self {
            backend: Arc::new(MemorySecretStore::new()),
            cache: Mutex::new(KeyCache::default()),
            current_tx,
        }
    }

    fn key_record(key: &Key, sync: bool) -> KeyRecord {
        KeyRecord::new(key_label(key.name()), key.expose().to_vec(), key.creation_date(), sync)
    }

    fn pointer_record(name: &str, sync: bool) -> KeyRecord {
        KeyRecord::new(CURRENT_LABEL, name.as_bytes().to_vec(), Utc::now(), sync)
    }

    /// Run one backend call on the blocking pool
    async fn on_backend<T, F>(&self, call: F) -> VaultResult<T>
    where
        F: FnOnce(&dyn SecretStore) -> VaultResult<T> + Send + 'static,
        T: Send + 'static,
    {
        let backend = self.backend.clone();
        tokio::task::spawn_blocking(move || call(backend.as_ref()))
            .await
            .map_err(|e| VaultError::BackingStoreError(e.to_string()))?
    }

    async fn upsert(&self, record: KeyRecord) -> VaultResult<()> {
        self.on_backend(move |backend| backend.upsert(record)).await
    }

    async fn remove(&self, label: impl Into<String>) -> VaultResult<bool> {
        let label = label.into();
        self.on_backend(move |backend| backend.delete(&label)).await
    }

    async fn fetch(&self, label: impl Into<String>) -> VaultResult<Option<KeyRecord>> {
        let label = label.into();
        self.on_backend(move |backend| backend.query(&label)).await
    }

    /// Persist a new key and optionally make it current. Caller holds the cache lock.
    async fn insert_locked(&self, cache: &mut KeyCache, key: Key, make_current: bool) -> VaultResult<()> {
        self.upsert(Self::key_record(&key, cache.sync_enabled)).await?;

        if make_current {
            if let Err(e) = self.upsert(Self::pointer_record(key.name(), cache.sync_enabled)).await {
                if let Err(undo) = self.remove(key_label(key.name())).await {
                    warn!("Rollback of key '{}' failed: {}", key.name(), undo);
                }
                return Err(e);
            }
            cache.current = Some(key.name().to_string());
            self.current_tx.send_replace(Some(key.clone()));
        }

        cache.keys.insert(key.name().to_string(), key);
        Ok(())
    }

    // ═══════════════════════════════════════════════════════════════════════
    // LIFECYCLE
    // ═══════════════════════════════════════════════════════════════════════

    /// Generate a random key. The first key in an empty store becomes current.
    pub async fn generate(&self, name: &str) -> VaultResult<Key> {
        let name = validate_key_name(name)?;
        let mut cache = self.cache.lock().await;

        if cache.keys.contains_key(&name) {
            return Err(VaultError::NameAlreadyExists(name));
        }

        let key = Key::generate(name);
        let make_current = cache.current.is_none();
        self.insert_locked(&mut cache, key.clone(), make_current).await?;

        info!("🔑 Generated key '{}' ({})", key.name(), key.fingerprint());
        Ok(key)
    }

    /// Derive a key from passphrase words and make it current
    pub async fn generate_from_passphrase(&self, name: &str, words: &[String]) -> VaultResult<Key> {
        let name = validate_key_name(name)?;
        let mut cache = self.cache.lock().await;

        if cache.keys.contains_key(&name) {
            return Err(VaultError::NameAlreadyExists(name));
        }

        let key = Key::from_passphrase(name, words)?;
        self.insert_locked(&mut cache, key.clone(), true).await?;

        info!("🔑 Derived key '{}' from passphrase", key.name());
        Ok(key)
    }

    /// Import a key in its transportable form
    pub async fn import_key(&self, serialized: &str) -> VaultResult<Key> {
        let key = Key::from_base64(serialized)?;
        let name = validate_key_name(key.name())
            .map_err(|e| VaultError::DecodingError(e.to_string()))?;
        let mut cache = self.cache.lock().await;

        if cache.keys.contains_key(&name) {
            return Err(VaultError::KeyAlreadyExists(name));
        }

        self.insert_locked(&mut cache, key.clone(), false).await?;

        info!("📥 Imported key '{}'", key.name());
        Ok(key)
    }

    /// Transportable form of `key`
    pub fn export_key(&self, key: &Key) -> VaultResult<String> {
        key.to_base64()
    }

    /// Remove `key`. Only a stored key with the same name and bytes matches.
    /// Clears the current pointer when it names this key.
    pub async fn delete(&self, key: &Key) -> VaultResult<()> {
        let mut cache = self.cache.lock().await;

        let stored = cache
            .keys
            .get(key.name())
            .filter(|stored| *stored == key)
            .cloned()
            .ok_or_else(|| VaultError::KeyNotFound(key.name().to_string()))?;

        self.remove(key_label(key.name())).await?;

        let was_current = cache.current.as_deref() == Some(key.name());
        if was_current {
            if let Err(e) = self.remove(CURRENT_LABEL).await {
                if let Err(undo) = self.upsert(Self::key_record(&stored, cache.sync_enabled)).await {
                    warn!("Rollback of key '{}' failed: {}", key.name(), undo);
                }
                return Err(e);
            }
            cache.current = None;
            self.current_tx.send_replace(None);
        }

        cache.keys.remove(key.name());
        info!("🗑️ Deleted key '{}'", key.name());
        Ok(())
    }

    /// Designate the current key; `None` clears it
    pub async fn set_current(&self, name: Option<&str>) -> VaultResult<()> {
        let mut cache = self.cache.lock().await;

        match name {
            None => {
                self.remove(CURRENT_LABEL).await?;
                cache.current = None;
                self.current_tx.send_replace(None);
            }
            Some(name) => {
                let key = cache
                    .keys
                    .get(name)
                    .cloned()
                    .ok_or_else(|| VaultError::KeyNotFound(name.to_string()))?;
                self.upsert(Self::pointer_record(name, cache.sync_enabled)).await?;
                cache.current = Some(name.to_string());
                self.current_tx.send_replace(Some(key));
            }
        }
        Ok(())
    }

    // ═══════════════════════════════════════════════════════════════════════
    // QUERIES
    // ═══════════════════════════════════════════════════════════════════════

    pub async fn current(&self) -> Option<Key> {
        let cache = self.cache.lock().await;
        cache.current.as_ref().and_then(|n| cache.keys.get(n)).cloned()
    }

    pub async fn get(&self, name: &str) -> Option<Key> {
        self.cache.lock().await.keys.get(name).cloned()
    }

    /// All keys, ordered by name
    pub async fn list(&self) -> Vec<Key> {
        self.cache.lock().await.keys.values().cloned().collect()
    }

    /// Stream of current-key changes, starting with the present value
    pub fn subscribe(&self) -> watch::Receiver<Option<Key>> {
        self.current_tx.subscribe()
    }

    // ═══════════════════════════════════════════════════════════════════════
    // BACKUP
    // ═══════════════════════════════════════════════════════════════════════

    /// JSON document holding every key
    pub async fn export_backup_document(&self) -> VaultResult<Vec<u8>> {
        let cache = self.cache.lock().await;
        let keys = cache
            .keys
            .values()
            .map(Key::to_base64)
            .collect::<VaultResult<Vec<_>>>()?;

        let doc = BackupDocument {
            version: BACKUP_DOCUMENT_VERSION,
            exported_at: Utc::now(),
            keys,
        };
        Ok(serde_json::to_vec_pretty(&doc)?)
    }

    /// Import keys from a backup document, skipping names already present.
    /// Returns the keys that were added; nothing is added if any write fails.
    pub async fn import_backup_document(&self, bytes: &[u8]) -> VaultResult<Vec<Key>> {
        let doc: BackupDocument =
            serde_json::from_slice(bytes).map_err(|e| VaultError::DecodingError(e.to_string()))?;
        let incoming = doc
            .keys
            .iter()
            .map(|k| Key::from_base64(k))
            .collect::<VaultResult<Vec<_>>>()?;

        let mut cache = self.cache.lock().await;
        let mut added: Vec<Key> = Vec::new();

        for key in incoming {
            if cache.keys.contains_key(key.name()) || added.iter().any(|k| k.name() == key.name()) {
                continue;
            }
            if let Err(e) = self.upsert(Self::key_record(&key, cache.sync_enabled)).await {
                for undo in &added {
                    if let Err(undo_err) = self.remove(key_label(undo.name())).await {
                        warn!("Rollback of key '{}' failed: {}", undo.name(), undo_err);
                    }
                }
                return Err(e);
            }
            added.push(key);
        }

        for key in &added {
            cache.keys.insert(key.name().to_string(), key.clone());
        }

        info!("📥 Imported {} keys from backup", added.len());
        Ok(added)
    }

    /// Flip the sync flag on every stored record and persist it
    pub async fn set_sync_enabled(&self, enabled: bool) -> VaultResult<()> {
        let mut cache = self.cache.lock().await;
        let mut previous = Vec::new();

        let mut labels: Vec<String> = cache.keys.keys().map(|n| key_label(n)).collect();
        labels.push(CURRENT_LABEL.to_string());
        labels.push(PASSWORD_LABEL.to_string());

        let mut result = Ok(());
        for label in labels {
            let record = match self.fetch(label).await {
                Ok(Some(record)) => record,
                Ok(None) => continue,
                Err(e) => {
                    result = Err(e);
                    break;
                }
            };
            let mut updated = record.clone();
            updated.sync = enabled;
            if let Err(e) = self.upsert(updated).await {
                result = Err(e);
                break;
            }
            previous.push(record);
        }

        if result.is_ok() {
            let flag = KeyRecord::new(BACKUP_LABEL, vec![enabled as u8], Utc::now(), false);
            result = self.upsert(flag).await;
        }

        if let Err(e) = result {
            for record in previous {
                let label = record.label.clone();
                if let Err(undo) = self.upsert(record).await {
                    warn!("Rollback of '{}' failed: {}", label, undo);
                }
            }
            return Err(e);
        }

        cache.sync_enabled = enabled;
        info!("Backup sync {}", if enabled { "enabled" } else { "disabled" });
        Ok(())
    }

    pub async fn is_sync_enabled(&self) -> bool {
        self.cache.lock().await.sync_enabled
    }

    // ═══════════════════════════════════════════════════════════════════════
    // APP PASSWORD
    // ═══════════════════════════════════════════════════════════════════════

    /// Store an Argon2 hash of `password`, replacing any existing one
    pub async fn set_password(&self, password: &str) -> VaultResult<()> {
        if password.is_empty() {
            return Err(VaultError::InvalidPassword);
        }
        let cache = self.cache.lock().await;

        let hash = hash_password(password)?;
        self.upsert(KeyRecord::new(PASSWORD_LABEL, hash.into_bytes(), Utc::now(), cache.sync_enabled))
            .await?;

        info!("🔒 App password set");
        Ok(())
    }

    /// `InvalidPassword` unless `password` matches the stored hash
    pub async fn check_password(&self, password: &str) -> VaultResult<()> {
        let _cache = self.cache.lock().await;

        let record = self.fetch(PASSWORD_LABEL).await?.ok_or(VaultError::InvalidPassword)?;
        let phc = std::str::from_utf8(&record.secret)
            .map_err(|e| VaultError::DecodingError(e.to_string()))?;
        let parsed = PasswordHash::new(phc).map_err(|e| VaultError::DecodingError(e.to_string()))?;

        Argon2::default()
            .verify_password(password.as_bytes(), &parsed)
            .map_err(|_| VaultError::InvalidPassword)
    }

    pub async fn change_password(&self, existing: &str, new: &str) -> VaultResult<()> {
        self.check_password(existing).await?;
        self.set_password(new).await
    }

    pub async fn has_password(&self) -> bool {
        matches!(self.fetch(PASSWORD_LABEL).await, Ok(Some(_)))
    }

    pub async fn clear_password(&self) -> VaultResult<()> {
        let _cache = self.cache.lock().await;
        self.remove(PASSWORD_LABEL).await?;
        Ok(())
    }
}

fn hash_password(password: &str) -> VaultResult<String> {
    let mut salt_bytes = Zeroizing::new([0u8; 16]);
    rand::thread_rng().fill_bytes(&mut *salt_bytes);
    let salt = SaltString::encode_b64(&*salt_bytes)
        .map_err(|e| VaultError::KeyDerivationFailed(e.to_string()))?;

    let hash = Argon2::default()
        .hash_password(password.as_bytes(), &salt)
        .map_err(|e| VaultError::KeyDerivationFailed(e.to_string()))?;
    Ok(hash.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn store_with_backend() -> (KeyStore, Arc<MemorySecretStore>) {
        let backend = Arc::new(MemorySecretStore::new());
        let store = KeyStore::open(backend.clone()).unwrap();
        (store, backend)
    }

    #[tokio::test]
    async fn test_generate_validates_names() {
        let store = KeyStore::in_memory();

        assert!(matches!(store.generate("a").await, Err(VaultError::NameInvalid(_))));
        assert!(matches!(store.generate("   x  ").await, Err(VaultError::NameInvalid(_))));

        let key = store.generate(" travel ").await.unwrap();
        assert_eq!(key.name(), "travel");
        assert!(matches!(
            store.generate("travel").await,
            Err(VaultError::NameAlreadyExists(_))
        ));
    }

    #[tokio::test]
    async fn test_concurrent_generate_same_name_yields_one_key() {
        let store = Arc::new(KeyStore::in_memory());

        let tasks: Vec<_> = (0..16)
            .map(|_| {
                let store = store.clone();
                tokio::spawn(async move { store.generate("shared").await })
            })
            .collect();

        let mut ok = 0;
        for task in tasks {
            match task.await.unwrap() {
                Ok(_) => ok += 1,
                Err(e) => assert!(matches!(e, VaultError::NameAlreadyExists(_))),
            }
        }

        assert_eq!(ok, 1);
        assert_eq!(store.list().await.len(), 1);
    }

    #[tokio::test]
    async fn test_first_key_becomes_current_and_is_published() {
        let store = KeyStore::in_memory();
        let mut rx = store.subscribe();
        assert!(rx.borrow().is_none());

        let first = store.generate("first").await.unwrap();
        store.generate("second").await.unwrap();

        rx.changed().await.unwrap();
        assert_eq!(rx.borrow().as_ref(), Some(&first));
        assert_eq!(store.current().await, Some(first));

        store.set_current(Some("second")).await.unwrap();
        assert_eq!(store.current().await.unwrap().name(), "second");
        assert!(matches!(
            store.set_current(Some("missing")).await,
            Err(VaultError::KeyNotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_delete_current_clears_pointer() {
        let (store, backend) = store_with_backend();
        let key = store.generate("album").await.unwrap();

        store.delete(&key).await.unwrap();

        assert!(store.current().await.is_none());
        assert!(store.get("album").await.is_none());
        assert!(backend.query(CURRENT_LABEL).unwrap().is_none());
        assert!(matches!(store.delete(&key).await, Err(VaultError::KeyNotFound(_))));
    }

    #[tokio::test]
    async fn test_delete_requires_matching_bytes() {
        let (store, backend) = store_with_backend();
        let stored = store.generate("family").await.unwrap();

        let same_name = Key::generate("family");
        assert!(matches!(store.delete(&same_name).await, Err(VaultError::KeyNotFound(_))));

        assert_eq!(store.get("family").await, Some(stored.clone()));
        assert_eq!(store.current().await, Some(stored.clone()));
        assert!(backend.query(&key_label("family")).unwrap().is_some());

        store.delete(&stored).await.unwrap();
        assert!(store.get("family").await.is_none());
    }

    #[tokio::test]
    async fn test_failed_write_leaves_cache_untouched() {
        let (store, backend) = store_with_backend();
        let key = store.generate("kept").await.unwrap();

        // key record removal succeeds, pointer removal fails, key is restored
        backend.fail_write_after(1);
        let err = store.delete(&key).await.unwrap_err();
        assert!(matches!(err, VaultError::BackingStoreError(_)));

        assert_eq!(store.current().await, Some(key.clone()));
        assert!(backend.query(&key_label("kept")).unwrap().is_some());

        backend.fail_write_after(0);
        assert!(store.generate("other").await.is_err());
        assert!(store.get("other").await.is_none());
    }

    #[tokio::test]
    async fn test_import_export() {
        let source = KeyStore::in_memory();
        let key = source.generate("shared").await.unwrap();
        let exported = source.export_key(&key).unwrap();

        let target = KeyStore::in_memory();
        let imported = target.import_key(&exported).await.unwrap();
        assert_eq!(imported, key);

        assert!(matches!(
            target.import_key(&exported).await,
            Err(VaultError::KeyAlreadyExists(_))
        ));
        assert!(matches!(
            target.import_key("garbage!").await,
            Err(VaultError::DecodingError(_))
        ));
    }

    #[tokio::test]
    async fn test_backup_document_roundtrip_skips_existing() {
        let source = KeyStore::in_memory();
        source.generate("one").await.unwrap();
        source.generate("two").await.unwrap();
        let doc = source.export_backup_document().await.unwrap();

        let target = KeyStore::in_memory();
        target.generate("one").await.unwrap();
        let added = target.import_backup_document(&doc).await.unwrap();

        assert_eq!(added.len(), 1);
        assert_eq!(added[0].name(), "two");
        assert_eq!(target.list().await.len(), 2);
        assert_ne!(target.get("one").await, source.get("one").await);
    }

    #[tokio::test]
    async fn test_password_lifecycle() {
        let store = KeyStore::in_memory();
        assert!(!store.has_password().await);
        assert!(matches!(store.check_password("x").await, Err(VaultError::InvalidPassword)));

        store.set_password("1234").await.unwrap();
        assert!(store.has_password().await);
        store.check_password("1234").await.unwrap();
        assert!(matches!(store.check_password("4321").await, Err(VaultError::InvalidPassword)));

        assert!(matches!(
            store.change_password("wrong", "5678").await,
            Err(VaultError::InvalidPassword)
        ));
        store.change_password("1234", "5678").await.unwrap();
        store.check_password("5678").await.unwrap();

        store.clear_password().await.unwrap();
        assert!(!store.has_password().await);
    }

    #[tokio::test]
    async fn test_sync_flag_updates_records() {
        let (store, backend) = store_with_backend();
        store.generate("synced").await.unwrap();
        assert!(!store.is_sync_enabled().await);

        store.set_sync_enabled(true).await.unwrap();
        assert!(store.is_sync_enabled().await);
        assert!(backend.query(&key_label("synced")).unwrap().unwrap().sync);

        let reopened = KeyStore::open(backend.clone()).unwrap();
        assert!(reopened.is_sync_enabled().await);
        assert_eq!(reopened.current().await.unwrap().name(), "synced");
    }

    #[tokio::test]
    async fn test_sync_flag_rolls_back_on_failure() {
        let (store, backend) = store_with_backend();
        store.generate("first").await.unwrap();
        store.generate("second").await.unwrap();

        // both key records flip, the pointer write fails
        backend.fail_write_after(2);
        assert!(store.set_sync_enabled(true).await.is_err());

        assert!(!store.is_sync_enabled().await);
        for name in ["first", "second"] {
            assert!(!backend.query(&key_label(name)).unwrap().unwrap().sync);
        }
        assert!(backend.query(BACKUP_LABEL).unwrap().is_none());
    }

    #[tokio::test]
    async fn test_passphrase_key_becomes_current() {
        let store = KeyStore::in_memory();
        store.generate("random").await.unwrap();

        let words: Vec<String> = "granite meadow silver lantern orbit cactus"
            .split(' ')
            .map(String::from)
            .collect();
        let key = store.generate_from_passphrase("recovered", &words).await.unwrap();

        assert_eq!(store.current().await, Some(key.clone()));
        assert_eq!(key.expose(), Key::from_passphrase("x", &words).unwrap().expose());
        assert!(matches!(
            store.generate_from_passphrase("recovered", &words).await,
            Err(VaultError::NameAlreadyExists(_))
        ));
    }

    /// Backend whose writes take a while
    struct SlowSecretStore {
        inner: MemorySecretStore,
        delay: std::time::Duration,
    }

    impl SecretStore for SlowSecretStore {
        fn query(&self, label: &str) -> VaultResult<Option<KeyRecord>> {
            self.inner.query(label)
        }

        fn list(&self, prefix: &str) -> VaultResult<Vec<KeyRecord>> {
            self.inner.list(prefix)
        }

        fn upsert(&self, record: KeyRecord) -> VaultResult<()> {
            std::thread::sleep(self.delay);
            self.inner.upsert(record)
        }

        fn delete(&self, label: &str) -> VaultResult<bool> {
            std::thread::sleep(self.delay);
            self.inner.delete(label)
        }
    }

    #[tokio::test]
    async fn test_backend_writes_leave_runtime_free() {
        let backend = Arc::new(SlowSecretStore {
            inner: MemorySecretStore::new(),
            delay: std::time::Duration::from_millis(200),
        });
        let store = Arc::new(KeyStore::open(backend).unwrap());

        let writer = {
            let store = store.clone();
            tokio::spawn(async move { store.generate("slow").await })
        };

        tokio::time::sleep(std::time::Duration::from_millis(10)).await;
        assert!(!writer.is_finished());

        let key = writer.await.unwrap().unwrap();
        assert_eq!(store.current().await, Some(key));
    }

    #[tokio::test]
    async fn test_file_backed_store_survives_reopen() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("keys.json");

        let key = {
            let store = KeyStore::open(Arc::new(FileSecretStore::open(&path).unwrap())).unwrap();
            store.generate("durable").await.unwrap()
        };

        let store = KeyStore::open(Arc::new(FileSecretStore::open(&path).unwrap())).unwrap();
        assert_eq!(store.get("durable").await, Some(key.clone()));
        assert_eq!(store.current().await, Some(key));
    }
}
