//! ALFA Media Vault - Storage Locations
//!
//! Maps albums to directories under a local or remote-backed base. The
//! directory name of an album is its encrypted label, never the plaintext.

use std::collections::HashMap;
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use log::{debug, warn};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use crate::crypto::{decrypt_name, encrypt_name, try_decrypt_name, Key};
use crate::error::VaultResult;
use crate::media::{EncryptedMedia, MediaType};

/// Sidecar directory inside every album root
pub const THUMBS_DIR: &str = "thumbs";

/// Where an album's files live
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum StorageOption {
    Local,
    Remote,
}

impl fmt::Display for StorageOption {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StorageOption::Local => write!(f, "local"),
            StorageOption::Remote => write!(f, "remote"),
        }
    }
}

/// Named collection of media governed by one key
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Album {
    pub name: String,
    pub storage: StorageOption,
    pub creation_date: DateTime<Utc>,
    pub key: Key,
}

impl Album {
    pub fn new(name: impl Into<String>, storage: StorageOption, key: Key) -> Self {
        Self {
            name: name.into(),
            storage,
            creation_date: Utc::now(),
            key,
        }
    }

    /// `<storage>:<name>`
    pub fn id(&self) -> String {
        format!("{}:{}", self.storage, self.name)
    }
}

/// Artifact of a media item
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArtifactKind {
    Original,
    Thumbnail,
    Preview,
}

/// Album directory resolver for one storage base
pub struct StorageLocation {
    option: StorageOption,
    base: PathBuf,
    /// (album id, key fingerprint) -> resolved root
    roots: Mutex<HashMap<(String, String), PathBuf>>,
}

impl StorageLocation {
    /// Albums on the local filesystem
    pub fn local(base: impl Into<PathBuf>) -> Self {
        Self::new(StorageOption::Local, base)
    }

    /// Albums inside a remote-backed container
    pub fn remote(base: impl Into<PathBuf>) -> Self {
        Self::new(StorageOption::Remote, base)
    }

    fn new(option: StorageOption, base: impl Into<PathBuf>) -> Self {
        Self {
            option,
            base: base.into(),
            roots: Mutex::new(HashMap::new()),
        }
    }

    pub fn option(&self) -> StorageOption {
        self.option
    }

    pub fn base(&self) -> &Path {
        &self.base
    }

    fn album_dirs(&self) -> VaultResult<Vec<PathBuf>> {
        if !self.base.exists() {
            return Ok(Vec::new());
        }

        let mut dirs = Vec::new();
        for entry in fs::read_dir(&self.base)? {
            let entry = entry?;
            if entry.file_type()?.is_dir() {
                dirs.push(entry.path());
            }
        }
        Ok(dirs)
    }

    /// Directory of `album`, resolving or minting its encrypted label
    pub fn root_path(&self, album: &Album) -> VaultResult<PathBuf> {
        let cache_key = (album.id(), album.key.fingerprint());
        let mut roots = self.roots.lock();

        if let Some(root) = roots.get(&cache_key) {
            return Ok(root.clone());
        }

        let existing = self.album_dirs()?.into_iter().find(|dir| {
            dir.file_name()
                .and_then(|n| n.to_str())
                .and_then(|label| try_decrypt_name(label, &album.key))
                .map_or(false, |name| name == album.name)
        });

        let root = match existing {
            Some(root) => root,
            None => {
                let root = self.base.join(encrypt_name(&album.name, &album.key)?);
                debug!("Minted directory label for album {}", album.id());
                root
            }
        };

        roots.insert(cache_key, root.clone());
        Ok(root)
    }

    /// Create the album root and its sidecar directory
    pub fn ensure_initialized(&self, album: &Album) -> VaultResult<PathBuf> {
        let root = self.root_path(album)?;
        fs::create_dir_all(root.join(THUMBS_DIR))?;
        Ok(root)
    }

    /// Path of one artifact of a media item
    pub fn path_for(&self, album: &Album, id: &str, media_type: MediaType, kind: ArtifactKind) -> VaultResult<PathBuf> {
        let root = self.root_path(album)?;
        let ext = media_type.extension();

        Ok(match kind {
            ArtifactKind::Original => root.join(EncryptedMedia::file_name(id, media_type)),
            ArtifactKind::Thumbnail => root
                .join(THUMBS_DIR)
                .join(format!("{}.{}.{}", id, ext, MediaType::Thumbnail.extension())),
            ArtifactKind::Preview => root
                .join(THUMBS_DIR)
                .join(format!("{}.{}.{}", id, ext, MediaType::Preview.extension())),
        })
    }

    /// Every artifact path of `media`, original first
    pub fn artifact_paths(&self, album: &Album, media: &EncryptedMedia) -> VaultResult<Vec<PathBuf>> {
        let mut paths = Vec::with_capacity(4);
        for kind in [ArtifactKind::Original, ArtifactKind::Thumbnail, ArtifactKind::Preview] {
            paths.push(self.path_for(album, &media.id, media.media_type, kind)?);
        }
        paths.push(media.placeholder_path());
        Ok(paths)
    }

    /// Media items in `album`, optionally limited to one type, ordered by id
    pub fn enumerate(&self, album: &Album, filter: Option<MediaType>) -> VaultResult<Vec<EncryptedMedia>> {
        let root = self.root_path(album)?;
        if !root.exists() {
            return Ok(Vec::new());
        }

        let mut found: HashMap<String, EncryptedMedia> = HashMap::new();
        for entry in fs::read_dir(&root)? {
            let path = entry?.path();
            if path.is_dir() {
                continue;
            }

            let media = match EncryptedMedia::from_path(&path) {
                Some(media) => media,
                None => {
                    debug!("Skipping foreign entry {}", path.display());
                    continue;
                }
            };

            if media.needs_download && self.option == StorageOption::Local {
                warn!("Ignoring remote placeholder in local album: {}", path.display());
                continue;
            }
            if filter.map_or(false, |t| t != media.media_type) {
                continue;
            }

            // A materialized container wins over a stale placeholder
            match found.get(&media.id) {
                Some(existing) if !existing.needs_download => {}
                _ => {
                    found.insert(media.id.clone(), media);
                }
            }
        }

        let mut items: Vec<_> = found.into_values().collect();
        items.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(items)
    }

    /// Album directories under this base, named by decrypting with `key`.
    /// Directories that do not decrypt keep their label as name.
    pub fn albums(&self, key: &Key) -> VaultResult<Vec<Album>> {
        let mut albums = Vec::new();

        for dir in self.album_dirs()? {
            let label = match dir.file_name().and_then(|n| n.to_str()) {
                Some(label) => label,
                None => continue,
            };
            let name = decrypt_name(label, key);
            let creation_date = fs::metadata(&dir)
                .and_then(|m| m.created().or_else(|_| m.modified()))
                .map(DateTime::<Utc>::from)
                .unwrap_or_else(|_| Utc::now());

            let album = Album {
                name,
                storage: self.option,
                creation_date,
                key: key.clone(),
            };
            if album.name != label {
                self.roots
                    .lock()
                    .insert((album.id(), key.fingerprint()), dir.clone());
            }
            albums.push(album);
        }

        albums.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(albums)
    }

    /// Forget every root resolved with `key`
    pub fn invalidate_key(&self, key: &Key) {
        let fingerprint = key.fingerprint();
        let mut roots = self.roots.lock();
        let before = roots.len();
        roots.retain(|(_, fp), _| fp != &fingerprint);
        debug!("Invalidated {} cached roots for key '{}'", before - roots.len(), key.name());
    }

    /// Number of cached roots
    pub fn cached_roots(&self) -> usize {
        self.roots.lock().len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_root_is_stable_and_obfuscated() {
        let dir = tempdir().unwrap();
        let key = Key::generate("album-key");
        let album = Album::new("Summer", StorageOption::Local, key.clone());

        let location = StorageLocation::local(dir.path());
        let root = location.ensure_initialized(&album).unwrap();
        assert!(root.join(THUMBS_DIR).is_dir());
        assert!(!root.to_string_lossy().contains("Summer"));

        // A fresh resolver finds the same directory by decrypting labels
        let fresh = StorageLocation::local(dir.path());
        assert_eq!(fresh.root_path(&album).unwrap(), root);
        assert_eq!(fresh.ensure_initialized(&album).unwrap(), root);
    }

    #[test]
    fn test_same_name_different_keys_get_different_roots() {
        let dir = tempdir().unwrap();
        let location = StorageLocation::local(dir.path());

        let a = Album::new("Shared", StorageOption::Local, Key::generate("a"));
        let b = Album::new("Shared", StorageOption::Local, Key::generate("b"));

        let root_a = location.ensure_initialized(&a).unwrap();
        let root_b = location.ensure_initialized(&b).unwrap();
        assert_ne!(root_a, root_b);
        assert_eq!(location.cached_roots(), 2);

        location.invalidate_key(&a.key);
        assert_eq!(location.cached_roots(), 1);
        assert_eq!(location.root_path(&a).unwrap(), root_a);
    }

    #[test]
    fn test_enumerate_filters_and_placeholders() {
        let dir = tempdir().unwrap();
        let key = Key::generate("k");
        let album = Album::new("Remote", StorageOption::Remote, key.clone());
        let location = StorageLocation::remote(dir.path());
        let root = location.ensure_initialized(&album).unwrap();

        fs::write(root.join("A.jpg.encamera"), b"x").unwrap();
        fs::write(root.join("B.mov.encamera"), b"x").unwrap();
        fs::write(root.join(".C.jpg.encamera.remote"), b"").unwrap();
        fs::write(root.join("notes.txt"), b"x").unwrap();
        fs::write(root.join(THUMBS_DIR).join("A.jpg.thmb"), b"x").unwrap();

        let all = location.enumerate(&album, None).unwrap();
        let ids: Vec<_> = all.iter().map(|m| m.id.as_str()).collect();
        assert_eq!(ids, vec!["A", "B", "C"]);
        assert!(all[2].needs_download);
        assert_eq!(all[2].path, root.join("C.jpg.encamera"));

        let videos = location.enumerate(&album, Some(MediaType::Video)).unwrap();
        assert_eq!(videos.len(), 1);
        assert_eq!(videos[0].id, "B");

        let local = StorageLocation::local(dir.path());
        let local_album = Album::new("Remote", StorageOption::Local, key);
        assert_eq!(local.root_path(&local_album).unwrap(), root);
        assert_eq!(local.enumerate(&local_album, None).unwrap().len(), 2);
    }

    #[test]
    fn test_albums_listing_uses_fallback_names() {
        let dir = tempdir().unwrap();
        let key = Key::generate("mine");
        let location = StorageLocation::local(dir.path());

        location
            .ensure_initialized(&Album::new("Family", StorageOption::Local, key.clone()))
            .unwrap();
        fs::create_dir(dir.path().join("legacy")).unwrap();

        let names: Vec<_> = location.albums(&key).unwrap().into_iter().map(|a| a.name).collect();
        assert_eq!(names, vec!["Family".to_string(), "legacy".to_string()]);
    }

    #[test]
    fn test_artifact_paths() {
        let dir = tempdir().unwrap();
        let album = Album::new("Paths", StorageOption::Local, Key::generate("p"));
        let location = StorageLocation::local(dir.path());
        let root = location.root_path(&album).unwrap();

        let thumb = location
            .path_for(&album, "ID", MediaType::Photo, ArtifactKind::Thumbnail)
            .unwrap();
        assert_eq!(thumb, root.join(THUMBS_DIR).join("ID.jpg.thmb"));

        let media = EncryptedMedia::from_path(&root.join("ID.jpg.encamera")).unwrap();
        let paths = location.artifact_paths(&album, &media).unwrap();
        assert_eq!(paths[0], media.path);
        assert_eq!(paths[3], root.join(".ID.jpg.encamera.remote"));
    }
}
