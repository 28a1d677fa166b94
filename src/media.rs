//! ALFA Media Vault - Media Model
//!
//! Cleartext and encrypted media descriptors plus the on-disk naming scheme.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::crypto::CONTAINER_EXT;

/// Suffix of remote-only placeholders (`.<file>.remote`)
pub const PLACEHOLDER_SUFFIX: &str = ".remote";

/// Kind of media item, inferred from file extensions
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum MediaType {
    Photo,
    Video,
    Thumbnail,
    Preview,
    Unknown,
}

impl MediaType {
    pub fn from_extension(ext: &str) -> Self {
        match ext.to_ascii_lowercase().as_str() {
            "jpg" | "jpeg" | "heic" | "png" => MediaType::Photo,
            "mov" | "mp4" => MediaType::Video,
            "thmb" => MediaType::Thumbnail,
            "preview" => MediaType::Preview,
            _ => MediaType::Unknown,
        }
    }

    /// Canonical extension written to disk
    pub fn extension(&self) -> &'static str {
        match self {
            MediaType::Photo => "jpg",
            MediaType::Video => "mov",
            MediaType::Thumbnail => "thmb",
            MediaType::Preview => "preview",
            MediaType::Unknown => "data",
        }
    }
}

/// Where cleartext bytes live
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MediaSource {
    Bytes(Vec<u8>),
    File(PathBuf),
}

/// Unencrypted media item
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CleartextMedia {
    pub source: MediaSource,
    pub media_type: MediaType,
    pub id: String,
}

impl CleartextMedia {
    /// In-memory item with a fresh id
    pub fn from_bytes(bytes: Vec<u8>, media_type: MediaType) -> Self {
        Self {
            source: MediaSource::Bytes(bytes),
            media_type,
            id: new_media_id(),
        }
    }

    /// File-backed item with a fresh id, typed by its extension
    pub fn from_file(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let media_type = path
            .extension()
            .and_then(|e| e.to_str())
            .map(MediaType::from_extension)
            .unwrap_or(MediaType::Unknown);

        Self {
            source: MediaSource::File(path),
            media_type,
            id: new_media_id(),
        }
    }

    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = id.into();
        self
    }
}

/// Encrypted media item as stored under an album root
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct EncryptedMedia {
    /// Path of the container; for remote-only items, where it will appear
    pub path: PathBuf,
    pub media_type: MediaType,
    pub id: String,
    /// Only a placeholder exists locally
    pub needs_download: bool,
}

impl EncryptedMedia {
    /// `<id>.<ext>.encamera`
    pub fn file_name(id: &str, media_type: MediaType) -> String {
        format!("{}.{}.{}", id, media_type.extension(), CONTAINER_EXT)
    }

    /// Parse a directory entry. Returns `None` for anything that is neither
    /// a container nor a container placeholder.
    pub fn from_path(path: &Path) -> Option<Self> {
        let name = path.file_name()?.to_str()?;
        let parent = path.parent().unwrap_or_else(|| Path::new(""));

        let (name, needs_download) = match name
            .strip_prefix('.')
            .and_then(|n| n.strip_suffix(PLACEHOLDER_SUFFIX))
        {
            Some(inner) => (inner, true),
            None => (name, false),
        };

        let stem = name.strip_suffix(CONTAINER_EXT)?.strip_suffix('.')?;
        let (id, ext) = stem.rsplit_once('.')?;
        if id.is_empty() || id.starts_with('.') {
            return None;
        }

        Some(Self {
            path: parent.join(name),
            media_type: MediaType::from_extension(ext),
            id: id.to_string(),
            needs_download,
        })
    }

    /// Name of the sidecar for this item, e.g. `<id>.<ext>.thmb`
    pub fn sidecar_name(&self, kind: MediaType) -> String {
        format!("{}.{}.{}", self.id, self.media_type.extension(), kind.extension())
    }

    /// Placeholder path used while the container is remote-only
    pub fn placeholder_path(&self) -> PathBuf {
        placeholder_for(&self.path)
    }

    /// Same item, now materialized locally
    pub fn materialized(&self) -> Self {
        Self {
            needs_download: false,
            ..self.clone()
        }
    }
}

/// `.<file>.remote` next to `path`
pub fn placeholder_for(path: &Path) -> PathBuf {
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    let placeholder = format!(".{}{}", name, PLACEHOLDER_SUFFIX);
    match path.parent() {
        Some(parent) => parent.join(placeholder),
        None => PathBuf::from(placeholder),
    }
}

/// Preview sidecar contents
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct PreviewModel {
    pub id: String,
    pub thumbnail_media: Vec<u8>,
    pub video_duration: Option<String>,
}

fn new_media_id() -> String {
    Uuid::new_v4().to_string().to_uppercase()
}
