//! ALFA Media Vault - Mirror Directory Sync
//!
//! Remote source backed by a mirror directory (a mounted cloud drive, a NAS
//! share). Files under the container that exist only in the mirror are
//! represented locally by `.<file>.remote` placeholders and copied in on
//! demand, chunk by chunk, reporting progress to watchers.

use std::collections::{HashMap, HashSet};
use std::io;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use log::{debug, info, warn};
use parking_lot::Mutex;
use tokio::fs::File;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::sync::mpsc;

use super::sync::{MaterializationEvent, NativeWatch, RemoteSync};
use crate::error::VaultResult;
use crate::media::placeholder_for;
use crate::secure_fs::PartialFile;

const DEFAULT_CHUNK_SIZE: usize = 256 * 1024;

type WatcherMap = HashMap<PathBuf, Vec<(u64, mpsc::UnboundedSender<MaterializationEvent>)>>;

/// Directory-backed [`RemoteSync`]
pub struct MirrorSync {
    container: PathBuf,
    mirror: PathBuf,
    chunk_size: usize,
    chunk_delay: Option<Duration>,
    watchers: Arc<Mutex<WatcherMap>>,
    next_watcher: AtomicU64,
    in_flight: Arc<Mutex<HashSet<PathBuf>>>,
}

impl MirrorSync {
    /// `container` is the local view, `mirror` holds the full copies
    pub fn new(container: impl Into<PathBuf>, mirror: impl Into<PathBuf>) -> Self {
        Self {
            container: container.into(),
            mirror: mirror.into(),
            chunk_size: DEFAULT_CHUNK_SIZE,
            chunk_delay: None,
            watchers: Arc::new(Mutex::new(HashMap::new())),
            next_watcher: AtomicU64::new(0),
            in_flight: Arc::new(Mutex::new(HashSet::new())),
        }
    }

    pub fn with_chunk_size(mut self, chunk_size: usize) -> Self {
        self.chunk_size = chunk_size.max(1);
        self
    }

    /// Pause between chunks, for throttled links
    pub fn with_chunk_delay(mut self, delay: Duration) -> Self {
        self.chunk_delay = Some(delay);
        self
    }

    fn mirror_path(&self, path: &Path) -> io::Result<PathBuf> {
        let relative = path.strip_prefix(&self.container).map_err(|_| {
            io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("{} is outside the remote container", path.display()),
            )
        })?;
        Ok(self.mirror.join(relative))
    }

    /// Make sure the mirror holds `path`, then replace the local copy with a
    /// placeholder
    pub async fn evict(&self, path: &Path) -> VaultResult<()> {
        let mirrored = self.mirror_path(path)?;
        if !tokio::fs::try_exists(&mirrored).await.unwrap_or(false) {
            if let Some(parent) = mirrored.parent() {
                tokio::fs::create_dir_all(parent).await?;
            }
            tokio::fs::copy(path, &mirrored).await?;
        }

        tokio::fs::write(placeholder_for(path), b"").await?;
        tokio::fs::remove_file(path).await?;

        debug!("Evicted {}", path.display());
        Ok(())
    }

    /// Number of registered watchers across all paths
    pub fn watcher_count(&self) -> usize {
        self.watchers.lock().values().map(Vec::len).sum()
    }
}

impl RemoteSync for MirrorSync {
    fn start_materialization(&self, path: &Path) -> io::Result<()> {
        if self.is_materialized(path) {
            return Ok(());
        }

        let source = self.mirror_path(path)?;
        if !source.is_file() {
            return Err(io::Error::new(
                io::ErrorKind::NotFound,
                format!("{} is not in the mirror", path.display()),
            ));
        }

        let handle = tokio::runtime::Handle::try_current()
            .map_err(|e| io::Error::new(io::ErrorKind::Other, e))?;

        if !self.in_flight.lock().insert(path.to_path_buf()) {
            return Ok(());
        }

        let job = CopyJob {
            source,
            target: path.to_path_buf(),
            chunk_size: self.chunk_size,
            chunk_delay: self.chunk_delay,
            watchers: self.watchers.clone(),
            in_flight: self.in_flight.clone(),
        };
        handle.spawn(job.run());

        Ok(())
    }

    fn is_materialized(&self, path: &Path) -> bool {
        path.is_file()
    }

    fn watch(&self, path: &Path) -> io::Result<NativeWatch> {
        let (tx, rx) = mpsc::unbounded_channel();
        let id = self.next_watcher.fetch_add(1, Ordering::Relaxed);
        let key = path.to_path_buf();

        self.watchers.lock().entry(key.clone()).or_default().push((id, tx));

        let watchers = self.watchers.clone();
        Ok(NativeWatch::new(rx, move || {
            let mut map = watchers.lock();
            if let Some(list) = map.get_mut(&key) {
                list.retain(|(watcher, _)| *watcher != id);
                if list.is_empty() {
                    map.remove(&key);
                }
            }
        }))
    }
}

/// One file being copied in from the mirror
struct CopyJob {
    source: PathBuf,
    target: PathBuf,
    chunk_size: usize,
    chunk_delay: Option<Duration>,
    watchers: Arc<Mutex<WatcherMap>>,
    in_flight: Arc<Mutex<HashSet<PathBuf>>>,
}

impl CopyJob {
    async fn run(self) {
        match self.copy().await {
            Ok(bytes) => {
                info!("☁️ Materialized {} ({} bytes)", self.target.display(), bytes);
                self.emit(MaterializationEvent::complete());
            }
            Err(e) => {
                warn!("Materialization of {} failed: {}", self.target.display(), e);
                self.close_watchers();
            }
        }
        self.in_flight.lock().remove(&self.target);
    }

    /// End every watch on the target without a terminal event
    fn close_watchers(&self) {
        if let Some(list) = self.watchers.lock().remove(&self.target) {
            debug!("Closed {} watchers of {}", list.len(), self.target.display());
        }
    }

    async fn copy(&self) -> VaultResult<u64> {
        let mut input = File::open(&self.source).await?;
        let total = input.metadata().await?.len();

        let partial = PartialFile::new(&self.target);
        let mut output = File::create(partial.path()).await?;
        let mut buf = vec![0u8; self.chunk_size];
        let mut copied = 0u64;

        loop {
            let n = input.read(&mut buf).await?;
            if n == 0 {
                break;
            }
            output.write_all(&buf[..n]).await?;
            copied += n as u64;

            if copied < total {
                self.emit(MaterializationEvent::progress(copied as f64 * 100.0 / total as f64));
            }
            if let Some(delay) = self.chunk_delay {
                tokio::time::sleep(delay).await;
            }
        }

        output.sync_all().await?;
        drop(output);
        partial.commit().await?;

        if let Err(e) = tokio::fs::remove_file(placeholder_for(&self.target)).await {
            if e.kind() != io::ErrorKind::NotFound {
                warn!("Failed to remove placeholder for {}: {}", self.target.display(), e);
            }
        }

        Ok(copied)
    }

    fn emit(&self, event: MaterializationEvent) {
        if let Some(list) = self.watchers.lock().get(&self.target) {
            for (_, tx) in list {
                let _ = tx.send(event);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn setup(content: &[u8]) -> (tempfile::TempDir, PathBuf, MirrorSync) {
        let dir = tempdir().unwrap();
        let container = dir.path().join("container");
        let mirror = dir.path().join("mirror");
        std::fs::create_dir_all(container.join("album")).unwrap();
        std::fs::create_dir_all(mirror.join("album")).unwrap();

        let target = container.join("album/A.jpg.encamera");
        std::fs::write(mirror.join("album/A.jpg.encamera"), content).unwrap();
        std::fs::write(placeholder_for(&target), b"").unwrap();

        let sync = MirrorSync::new(&container, &mirror).with_chunk_size(1024);
        (dir, target, sync)
    }

    #[tokio::test]
    async fn test_materialize_reports_progress_then_completion() {
        let content = vec![42u8; 4096];
        let (_dir, target, sync) = setup(&content);
        assert!(!sync.is_materialized(&target));

        let mut watch = sync.watch(&target).unwrap();
        sync.start_materialization(&target).unwrap();
        sync.start_materialization(&target).unwrap();

        let mut events = Vec::new();
        while let Some(event) = watch.next_event().await {
            events.push(event);
            if event.is_fully_materialized {
                break;
            }
        }

        assert_eq!(events.len(), 4);
        assert_eq!(events[0].percent_complete, Some(25.0));
        assert_eq!(events.last().copied(), Some(MaterializationEvent::complete()));
        assert!(sync.is_materialized(&target));
        assert!(!placeholder_for(&target).exists());
        assert_eq!(std::fs::read(&target).unwrap(), content);

        drop(watch);
        assert_eq!(sync.watcher_count(), 0);
    }

    #[tokio::test]
    async fn test_failed_copy_closes_watchers() {
        let (dir, target, sync) = setup(b"payload");
        std::fs::remove_dir_all(dir.path().join("container/album")).unwrap();

        let mut watch = sync.watch(&target).unwrap();
        sync.start_materialization(&target).unwrap();

        let next = tokio::time::timeout(Duration::from_secs(2), watch.next_event())
            .await
            .unwrap();
        assert_eq!(next, None);
        assert_eq!(sync.watcher_count(), 0);
        assert!(!target.exists());

        drop(watch);
        assert_eq!(sync.watcher_count(), 0);
    }

    #[tokio::test]
    async fn test_evict_restores_placeholder() {
        let (_dir, target, sync) = setup(b"payload");
        std::fs::remove_file(placeholder_for(&target)).unwrap();
        std::fs::write(&target, b"payload").unwrap();

        sync.evict(&target).await.unwrap();
        assert!(!target.exists());
        assert!(placeholder_for(&target).exists());

        let outside = Path::new("/elsewhere/file");
        assert!(sync.start_materialization(outside).is_err());
    }
}
