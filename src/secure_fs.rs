//! ALFA Media Vault - Secure Filesystem Operations
//!
//! Atomic writes, partial-output guards and staged removal of media artifacts.

use std::fs::{self, OpenOptions};
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};

use log::{debug, warn};
use tokio::io::AsyncWriteExt;
use uuid::Uuid;

use crate::error::VaultResult;

/// Sibling path with a hidden, unique name next to `target`
fn sibling(target: &Path, tag: &str) -> PathBuf {
    let name = target
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    let hidden = format!(".{}.{}-{}", name, tag, Uuid::new_v4().simple());
    match target.parent() {
        Some(parent) => parent.join(hidden),
        None => PathBuf::from(hidden),
    }
}

fn remove_quietly(path: &Path) {
    if let Err(e) = fs::remove_file(path) {
        if e.kind() != ErrorKind::NotFound {
            warn!("Failed to remove {}: {}", path.display(), e);
        }
    }
}

/// Output file under construction.
///
/// Data is written to a hidden sibling and renamed onto the target on
/// [`commit`](PartialFile::commit). Dropping an uncommitted guard removes the
/// partial file, which covers both errors and cancelled futures.
pub struct PartialFile {
    partial: PathBuf,
    target: PathBuf,
    armed: bool,
}

impl PartialFile {
    pub fn new(target: &Path) -> Self {
        Self {
            partial: sibling(target, "partial"),
            target: target.to_path_buf(),
            armed: true,
        }
    }

    /// Path to write into
    pub fn path(&self) -> &Path {
        &self.partial
    }

    /// Move the partial file onto its target
    pub async fn commit(mut self) -> VaultResult<()> {
        tokio::fs::rename(&self.partial, &self.target).await?;
        self.armed = false;
        Ok(())
    }

    /// Blocking variant of [`commit`](PartialFile::commit)
    pub fn commit_blocking(mut self) -> VaultResult<()> {
        fs::rename(&self.partial, &self.target)?;
        self.armed = false;
        Ok(())
    }
}

impl Drop for PartialFile {
    fn drop(&mut self) {
        if self.armed {
            debug!("Discarding partial output {}", self.partial.display());
            remove_quietly(&self.partial);
        }
    }
}

/// Write file atomically (temp file, sync, rename)
pub async fn write_atomic(path: &Path, data: &[u8]) -> VaultResult<()> {
    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }

    let partial = PartialFile::new(path);
    let mut file = tokio::fs::File::create(partial.path()).await?;
    file.write_all(data).await?;
    file.sync_all().await?;
    drop(file);

    partial.commit().await
}

/// Blocking atomic write restricted to the owner on unix
pub fn write_private_blocking(path: &Path, data: &[u8]) -> VaultResult<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }

    let partial = PartialFile::new(path);
    let mut options = OpenOptions::new();
    options.write(true).create(true).truncate(true);
    #[cfg(unix)]
    {
        use std::os::unix::fs::OpenOptionsExt;
        options.mode(0o600);
    }

    let mut file = options.open(partial.path())?;
    file.write_all(data)?;
    file.sync_all()?;
    drop(file);

    partial.commit_blocking()
}

/// Artifacts renamed aside, pending removal or rollback
#[derive(Debug)]
pub struct StagedRemoval {
    staged: Vec<(PathBuf, PathBuf)>,
}

impl StagedRemoval {
    /// Rename every existing path aside. If any rename fails, the ones
    /// already staged are restored and the error is returned.
    pub async fn stage(paths: &[PathBuf]) -> VaultResult<Self> {
        let mut staged = Vec::with_capacity(paths.len());

        for original in paths {
            if !tokio::fs::try_exists(original).await.unwrap_or(false) {
                continue;
            }
            let aside = sibling(original, "deleting");
            if let Err(e) = tokio::fs::rename(original, &aside).await {
                Self { staged }.rollback().await;
                return Err(e.into());
            }
            staged.push((original.clone(), aside));
        }

        Ok(Self { staged })
    }

    /// Number of staged artifacts
    pub fn len(&self) -> usize {
        self.staged.len()
    }

    pub fn is_empty(&self) -> bool {
        self.staged.is_empty()
    }

    /// Remove staged files; failures are logged and the first is returned
    pub async fn finish(self) -> VaultResult<()> {
        let mut first_error = None;
        for (original, aside) in &self.staged {
            if let Err(e) = tokio::fs::remove_file(aside).await {
                warn!("Failed to remove staged {}: {}", original.display(), e);
                first_error.get_or_insert(e);
            }
        }
        match first_error {
            Some(e) => Err(e.into()),
            None => Ok(()),
        }
    }

    /// Put every staged file back
    pub async fn rollback(self) {
        for (original, aside) in self.staged.iter().rev() {
            if let Err(e) = tokio::fs::rename(aside, original).await {
                warn!("Failed to restore {}: {}", original.display(), e);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[tokio::test]
    async fn test_atomic_write_leaves_no_temp() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("nested/data.enc");

        write_atomic(&path, b"encrypted data").await.unwrap();

        assert_eq!(fs::read(&path).unwrap(), b"encrypted data");
        let entries: Vec<_> = fs::read_dir(path.parent().unwrap()).unwrap().collect();
        assert_eq!(entries.len(), 1);
    }

    #[test]
    fn test_dropped_partial_is_removed() {
        let dir = tempdir().unwrap();
        let target = dir.path().join("out.bin");

        let partial = PartialFile::new(&target);
        fs::write(partial.path(), b"half").unwrap();
        let partial_path = partial.path().to_path_buf();
        drop(partial);

        assert!(!partial_path.exists());
        assert!(!target.exists());
    }

    #[cfg(unix)]
    #[test]
    fn test_private_write_permissions() {
        use std::os::unix::fs::PermissionsExt;

        let dir = tempdir().unwrap();
        let path = dir.path().join("keys.json");
        write_private_blocking(&path, b"{}").unwrap();

        let mode = fs::metadata(&path).unwrap().permissions().mode();
        assert_eq!(mode & 0o777, 0o600);
    }

    #[tokio::test]
    async fn test_stage_then_finish_or_rollback() {
        let dir = tempdir().unwrap();
        let a = dir.path().join("a.jpg.encamera");
        let b = dir.path().join("b.jpg.thmb");
        let missing = dir.path().join("missing.preview");
        fs::write(&a, b"a").unwrap();
        fs::write(&b, b"b").unwrap();

        let staged = StagedRemoval::stage(&[a.clone(), b.clone(), missing]).await.unwrap();
        assert_eq!(staged.len(), 2);
        assert!(!a.exists());
        staged.rollback().await;
        assert!(a.exists() && b.exists());

        let staged = StagedRemoval::stage(&[a.clone(), b.clone()]).await.unwrap();
        staged.finish().await.unwrap();
        assert!(!a.exists() && !b.exists());
        assert_eq!(fs::read_dir(dir.path()).unwrap().count(), 0);
    }
}
