//! ALFA Media Vault - Media Store
//!
//! Single surface over keys, storage locations, the media cipher and the
//! remote tracker: save, load, enumerate, delete and move media.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use log::{debug, info, warn};

use crate::bus::{FileOperation, FileOperationBus};
use crate::config::StoreConfig;
use crate::crypto::{self, Key, MediaCipher};
use crate::error::{VaultError, VaultResult};
use crate::keystore::{FileSecretStore, KeyStore};
use crate::media::{CleartextMedia, EncryptedMedia, MediaSource, MediaType, PreviewModel};
use crate::remote::{DownloadPolicy, MirrorSync, RemoteAvailabilityTracker};
use crate::secure_fs::{write_atomic, PartialFile, StagedRemoval};
use crate::storage::{Album, ArtifactKind, StorageLocation, StorageOption};
use crate::thumbs::ThumbnailEngine;

/// Where [`MediaStore::load`] puts cleartext
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoadDestination {
    Memory,
    /// A file under the scratch directory
    ScratchFile,
}

/// Encrypted media store
pub struct MediaStore {
    keys: Arc<KeyStore>,
    local: StorageLocation,
    remote: Option<StorageLocation>,
    tracker: Option<RemoteAvailabilityTracker>,
    cipher: MediaCipher,
    thumbs: ThumbnailEngine,
    scratch_dir: PathBuf,
    bus: FileOperationBus,
    download_policy: DownloadPolicy,
}

impl MediaStore {
    /// Store with local albums only
    pub fn new(keys: Arc<KeyStore>, local: StorageLocation, scratch_dir: impl Into<PathBuf>) -> Self {
        Self {
            keys,
            local,
            remote: None,
            tracker: None,
            cipher: MediaCipher::default(),
            thumbs: ThumbnailEngine::default(),
            scratch_dir: scratch_dir.into(),
            bus: FileOperationBus::new(),
            download_policy: DownloadPolicy::default(),
        }
    }

    /// Attach a remote container; without a tracker remote-only items
    /// cannot be loaded
    pub fn with_remote(mut self, location: StorageLocation, tracker: Option<RemoteAvailabilityTracker>) -> Self {
        self.remote = Some(location);
        self.tracker = tracker;
        self
    }

    pub fn with_cipher(mut self, cipher: MediaCipher) -> Self {
        self.cipher = cipher;
        self
    }

    pub fn with_thumbnails(mut self, thumbs: ThumbnailEngine) -> Self {
        self.thumbs = thumbs;
        self
    }

    pub fn with_download_policy(mut self, policy: DownloadPolicy) -> Self {
        self.download_policy = policy;
        self
    }

    /// Wire everything up from a config file
    pub fn from_config(config: &StoreConfig) -> VaultResult<Self> {
        let backend = Arc::new(FileSecretStore::open(&config.keys_file)?);
        let keys = Arc::new(KeyStore::open(backend)?);

        let mut store = Self::new(keys, StorageLocation::local(&config.local_root), &config.scratch_dir)
            .with_cipher(MediaCipher::new(config.block_size))
            .with_thumbnails(ThumbnailEngine::new(config.thumb_size))
            .with_download_policy(DownloadPolicy {
                timeout: config.download_timeout(),
                max_events: None,
            });

        if let Some(remote_root) = &config.remote_root {
            let tracker = config.cloud_mirror.as_ref().map(|mirror| {
                RemoteAvailabilityTracker::new(Arc::new(MirrorSync::new(remote_root, mirror)))
            });
            store = store.with_remote(StorageLocation::remote(remote_root), tracker);
        }

        Ok(store)
    }

    pub fn keys(&self) -> &Arc<KeyStore> {
        &self.keys
    }

    pub fn bus(&self) -> &FileOperationBus {
        &self.bus
    }

    pub fn tracker(&self) -> Option<&RemoteAvailabilityTracker> {
        self.tracker.as_ref()
    }

    pub fn location(&self, storage: StorageOption) -> VaultResult<&StorageLocation> {
        match storage {
            StorageOption::Local => Ok(&self.local),
            StorageOption::Remote => self.remote.as_ref().ok_or(VaultError::NoRemoteStorage),
        }
    }

    // ═══════════════════════════════════════════════════════════════════════
    // ALBUMS
    // ═══════════════════════════════════════════════════════════════════════

    /// Create (or reopen) an album directory
    pub fn create_album(&self, name: &str, storage: StorageOption, key: &Key) -> VaultResult<Album> {
        let album = Album::new(name, storage, key.clone());
        self.location(storage)?.ensure_initialized(&album)?;
        info!("📁 Album {} ready", album.id());
        Ok(album)
    }

    pub fn albums(&self, key: &Key, storage: StorageOption) -> VaultResult<Vec<Album>> {
        self.location(storage)?.albums(key)
    }

    pub fn enumerate(&self, album: &Album) -> VaultResult<Vec<EncryptedMedia>> {
        self.location(album.storage)?.enumerate(album, None)
    }

    pub fn enumerate_type(&self, album: &Album, media_type: MediaType) -> VaultResult<Vec<EncryptedMedia>> {
        self.location(album.storage)?.enumerate(album, Some(media_type))
    }

    // ═══════════════════════════════════════════════════════════════════════
    // SAVE / LOAD
    // ═══════════════════════════════════════════════════════════════════════

    /// Encrypt `media` into `album`. Photos that decode also get a
    /// thumbnail and a preview sidecar.
    pub async fn save(&self, media: &CleartextMedia, album: &Album) -> VaultResult<EncryptedMedia> {
        let location = self.location(album.storage)?;
        location.ensure_initialized(album)?;
        let path = location.path_for(album, &media.id, media.media_type, ArtifactKind::Original)?;

        match &media.source {
            MediaSource::Bytes(bytes) => {
                let container = self.cipher.encrypt_bytes(&album.key, bytes)?;
                write_atomic(&path, &container).await?;
            }
            MediaSource::File(source) => {
                self.cipher.encrypt_file(&album.key, source, &path).await?;
            }
        }

        let encrypted = EncryptedMedia {
            path,
            media_type: media.media_type,
            id: media.id.clone(),
            needs_download: false,
        };

        if media.media_type == MediaType::Photo {
            if let Err(e) = self.write_sidecars(media, &encrypted, album).await {
                warn!("No sidecars for {}: {}", encrypted.id, e);
            }
        }

        info!("🔐 Saved {} to {}", encrypted.id, album.id());
        self.bus.publish(FileOperation::Create(encrypted.clone()));
        Ok(encrypted)
    }

    async fn write_sidecars(&self, media: &CleartextMedia, encrypted: &EncryptedMedia, album: &Album) -> VaultResult<()> {
        let location = self.location(album.storage)?;
        let image = match &media.source {
            MediaSource::Bytes(bytes) => self.thumbs.generate(bytes),
            MediaSource::File(path) => self.thumbs.generate(&tokio::fs::read(path).await?),
        };
        let thumbnail = match image {
            Ok(thumbnail) => thumbnail,
            Err(VaultError::InvalidMedia(reason)) => {
                debug!("{} is not a decodable image: {}", encrypted.id, reason);
                return Ok(());
            }
            Err(e) => return Err(e),
        };

        let thumb_path = location.path_for(album, &encrypted.id, encrypted.media_type, ArtifactKind::Thumbnail)?;
        write_atomic(&thumb_path, &self.cipher.encrypt_bytes(&album.key, &thumbnail)?).await?;

        let preview = PreviewModel {
            id: encrypted.id.clone(),
            thumbnail_media: thumbnail,
            video_duration: None,
        };
        let preview_path = location.path_for(album, &encrypted.id, encrypted.media_type, ArtifactKind::Preview)?;
        write_atomic(&preview_path, &crypto::seal(&album.key, &serde_json::to_vec(&preview)?)?).await?;

        Ok(())
    }

    /// Bring a remote-only item local, reporting progress in 0..=1
    async fn materialize<F>(&self, media: &EncryptedMedia, on_progress: F) -> VaultResult<EncryptedMedia>
    where
        F: FnMut(f64),
    {
        let tracker = self.tracker.as_ref().ok_or(VaultError::NeedsDownload)?;
        tracker
            .await_download_with_policy(media, self.download_policy, on_progress)
            .await
    }

    /// Decrypt `media`, downloading it first if it is remote-only.
    ///
    /// Progress covers the download in 0..0.5 and decryption in 0.5..1; an
    /// item that is already local reports decryption over the whole range.
    pub async fn load<F>(
        &self,
        media: &EncryptedMedia,
        album: &Album,
        destination: LoadDestination,
        mut on_progress: F,
    ) -> VaultResult<CleartextMedia>
    where
        F: FnMut(f64),
    {
        let (media, base, span) = if media.needs_download {
            let local = self.materialize(media, |p| on_progress(p * 0.5)).await?;
            (local, 0.5, 0.5)
        } else {
            (media.clone(), 0.0, 1.0)
        };

        let report = |p: f64| on_progress(base + p * span);

        let source = match destination {
            LoadDestination::Memory => {
                let bytes = self.cipher.decrypt_file_to_bytes(&album.key, &media.path, report).await?;
                MediaSource::Bytes(bytes)
            }
            LoadDestination::ScratchFile => {
                let out = self
                    .scratch_dir
                    .join(format!("{}.{}", media.id, media.media_type.extension()));
                self.cipher.decrypt_file(&album.key, &media.path, &out, report).await?;
                MediaSource::File(out)
            }
        };

        debug!("Loaded {} from {}", media.id, album.id());
        Ok(CleartextMedia {
            source,
            media_type: media.media_type,
            id: media.id,
        })
    }

    /// Decrypted JPEG thumbnail of `media`
    pub async fn load_thumbnail(&self, media: &EncryptedMedia, album: &Album) -> VaultResult<Vec<u8>> {
        let path = self
            .location(album.storage)?
            .path_for(album, &media.id, media.media_type, ArtifactKind::Thumbnail)?;
        let container = tokio::fs::read(&path).await?;
        self.cipher.decrypt_bytes(&album.key, &container)
    }

    /// Decrypted preview sidecar of `media`
    pub async fn load_preview(&self, media: &EncryptedMedia, album: &Album) -> VaultResult<PreviewModel> {
        let path = self
            .location(album.storage)?
            .path_for(album, &media.id, media.media_type, ArtifactKind::Preview)?;
        let sealed = tokio::fs::read(&path).await?;
        let json = crypto::open(&album.key, &sealed)?;
        serde_json::from_slice(&json).map_err(|e| VaultError::DecodingError(e.to_string()))
    }

    // ═══════════════════════════════════════════════════════════════════════
    // DELETE / MOVE
    // ═══════════════════════════════════════════════════════════════════════

    /// Remove every artifact of `media`. Nothing is removed unless all of
    /// it could be staged.
    pub async fn delete(&self, media: &[EncryptedMedia], album: &Album) -> VaultResult<()> {
        let location = self.location(album.storage)?;

        let mut paths = Vec::new();
        for item in media {
            paths.extend(location.artifact_paths(album, item)?);
        }

        let staged = StagedRemoval::stage(&paths).await?;
        let removed = staged.len();
        staged.finish().await?;

        info!("🗑️ Deleted {} items ({} files) from {}", media.len(), removed, album.id());
        self.bus.publish(FileOperation::Delete(media.to_vec()));
        Ok(())
    }

    /// Move `media` from one album to another. Items are renamed when both
    /// albums share a key and re-encrypted otherwise.
    pub async fn move_media(&self, media: &[EncryptedMedia], from: &Album, to: &Album) -> VaultResult<Vec<EncryptedMedia>> {
        let source = self.location(from.storage)?;
        let target = self.location(to.storage)?;
        let root = target.ensure_initialized(to)?;

        if source.root_path(from)? == root {
            return Ok(media.to_vec());
        }

        let same_key = from.key == to.key;
        let mut moved = Vec::with_capacity(media.len());

        for item in media {
            let item = if item.needs_download {
                self.materialize(item, |_| {}).await?
            } else {
                item.clone()
            };

            let destination = if same_key {
                self.relocate(&item, from, to).await?
            } else {
                self.reencrypt(&item, from, to).await?
            };
            moved.push(destination);
        }

        info!(
            "📦 Moved {} items {} → {} ({})",
            moved.len(),
            from.id(),
            to.id(),
            if same_key { "renamed" } else { "re-encrypted" }
        );
        self.bus.publish(FileOperation::Move {
            media: moved.clone(),
            to: to.clone(),
        });
        Ok(moved)
    }

    fn artifact_pairs(&self, item: &EncryptedMedia, from: &Album, to: &Album) -> VaultResult<Vec<(ArtifactKind, PathBuf, PathBuf)>> {
        let source = self.location(from.storage)?;
        let target = self.location(to.storage)?;

        let mut pairs = Vec::with_capacity(3);
        for kind in [ArtifactKind::Original, ArtifactKind::Thumbnail, ArtifactKind::Preview] {
            pairs.push((
                kind,
                source.path_for(from, &item.id, item.media_type, kind)?,
                target.path_for(to, &item.id, item.media_type, kind)?,
            ));
        }
        Ok(pairs)
    }

    async fn relocate(&self, item: &EncryptedMedia, from: &Album, to: &Album) -> VaultResult<EncryptedMedia> {
        let pairs = self.artifact_pairs(item, from, to)?;
        let mut moved: Vec<(&Path, &Path)> = Vec::with_capacity(pairs.len());

        for (kind, src, dst) in &pairs {
            if *kind != ArtifactKind::Original && !tokio::fs::try_exists(src).await.unwrap_or(false) {
                continue;
            }
            if let Err(e) = rename_or_copy(src, dst).await {
                for (src, dst) in moved.iter().rev() {
                    if let Err(undo) = rename_or_copy(dst, src).await {
                        warn!("Failed to restore {}: {}", src.display(), undo);
                    }
                }
                return Err(e);
            }
            moved.push((src.as_path(), dst.as_path()));
        }

        Ok(EncryptedMedia {
            path: pairs[0].2.clone(),
            media_type: item.media_type,
            id: item.id.clone(),
            needs_download: false,
        })
    }

    async fn reencrypt(&self, item: &EncryptedMedia, from: &Album, to: &Album) -> VaultResult<EncryptedMedia> {
        let pairs = self.artifact_pairs(item, from, to)?;
        let (_, original_src, original_dst) = &pairs[0];

        tokio::fs::create_dir_all(&self.scratch_dir).await?;
        let scratch = PartialFile::new(&self.scratch_dir.join(format!("{}.moving", item.id)));
        self.cipher
            .decrypt_file(&from.key, original_src, scratch.path(), |_| {})
            .await?;

        // Nothing lands in the destination until every artifact is sealed
        let original = PartialFile::new(original_dst);
        self.cipher
            .encrypt_file(&to.key, scratch.path(), original.path())
            .await?;
        drop(scratch);

        let mut outputs = vec![(original, original_dst)];
        for (kind, src, dst) in &pairs[1..] {
            let sealed = match tokio::fs::read(src).await {
                Ok(sealed) => sealed,
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => continue,
                Err(e) => return Err(e.into()),
            };
            let resealed = match kind {
                ArtifactKind::Preview => crypto::seal(&to.key, &crypto::open(&from.key, &sealed)?)?,
                _ => {
                    let plain = self.cipher.decrypt_bytes(&from.key, &sealed)?;
                    self.cipher.encrypt_bytes(&to.key, &plain)?
                }
            };

            if let Some(parent) = dst.parent() {
                tokio::fs::create_dir_all(parent).await?;
            }
            let partial = PartialFile::new(dst);
            tokio::fs::write(partial.path(), &resealed).await?;
            outputs.push((partial, dst));
        }

        let sources: Vec<PathBuf> = pairs.iter().map(|(_, src, _)| src.clone()).collect();
        let staged = StagedRemoval::stage(&sources).await?;

        let mut committed: Vec<&Path> = Vec::with_capacity(outputs.len());
        for (partial, dst) in outputs {
            if let Err(e) = partial.commit().await {
                for path in &committed {
                    if let Err(undo) = tokio::fs::remove_file(path).await {
                        warn!("Failed to discard {}: {}", path.display(), undo);
                    }
                }
                staged.rollback().await;
                return Err(e);
            }
            committed.push(dst);
        }
        staged.finish().await?;

        Ok(EncryptedMedia {
            path: original_dst.clone(),
            media_type: item.media_type,
            id: item.id.clone(),
            needs_download: false,
        })
    }

    // ═══════════════════════════════════════════════════════════════════════
    // MAINTENANCE
    // ═══════════════════════════════════════════════════════════════════════

    /// Delete `key` and forget every album root resolved with it
    pub async fn delete_key(&self, key: &Key) -> VaultResult<()> {
        self.keys.delete(key).await?;
        self.local.invalidate_key(key);
        if let Some(remote) = &self.remote {
            remote.invalidate_key(key);
        }
        Ok(())
    }

    /// Remove every decrypted scratch file. Returns how many were removed.
    pub async fn clear_scratch(&self) -> VaultResult<usize> {
        let mut entries = match tokio::fs::read_dir(&self.scratch_dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(0),
            Err(e) => return Err(e.into()),
        };

        let mut removed = 0;
        while let Some(entry) = entries.next_entry().await? {
            if entry.file_type().await?.is_file() {
                tokio::fs::remove_file(entry.path()).await?;
                removed += 1;
            }
        }

        debug!("Cleared {} scratch files", removed);
        Ok(removed)
    }
}

/// Rename, falling back to copy + remove across filesystems
async fn rename_or_copy(src: &Path, dst: &Path) -> VaultResult<()> {
    if let Some(parent) = dst.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }
    if tokio::fs::rename(src, dst).await.is_ok() {
        return Ok(());
    }

    let partial = PartialFile::new(dst);
    tokio::fs::copy(src, partial.path()).await?;
    partial.commit().await?;
    tokio::fs::remove_file(src).await?;
    Ok(())
}
