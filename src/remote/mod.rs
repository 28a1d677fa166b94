//! ALFA Media Vault - Remote Availability Tracker
//!
//! Brings remote-only files local and reports progress. Each path has at most
//! one native watch and one driver task; every subscriber shares its status
//! through a `watch` channel.
//!
//! ```text
//!   subscribers ──► watch::Receiver ◄── driver task ◄── NativeWatch ◄── RemoteSync
//!                                          │
//!                           cancel() ──────┘ (abort, teardown once)
//! ```

pub mod mirror;
pub mod sync;

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures::stream::{self, BoxStream, StreamExt};
use log::{debug, info};
use parking_lot::Mutex;
use tokio::sync::watch;
use tokio::task::JoinHandle;

use crate::error::{VaultError, VaultResult};
use crate::media::EncryptedMedia;

pub use mirror::MirrorSync;
pub use sync::{MaterializationEvent, NativeWatch, RemoteSync};

/// Download state of one remote file
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum DownloadStatus {
    NotDownloaded,
    /// Fraction in 0..=1
    Downloading(f64),
    Downloaded,
    Cancelled,
}

impl DownloadStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, DownloadStatus::Downloaded | DownloadStatus::Cancelled)
    }
}

impl From<MaterializationEvent> for DownloadStatus {
    fn from(event: MaterializationEvent) -> Self {
        if event.is_fully_materialized {
            return DownloadStatus::Downloaded;
        }
        match event.percent_complete {
            Some(p) if p >= 100.0 => DownloadStatus::Downloaded,
            Some(p) => DownloadStatus::Downloading((p / 100.0).clamp(0.0, 1.0)),
            None => DownloadStatus::NotDownloaded,
        }
    }
}

/// Limits a caller puts on a single wait
#[derive(Debug, Clone, Copy, Default)]
pub struct DownloadPolicy {
    pub timeout: Option<Duration>,
    /// Give up after this many status updates
    pub max_events: Option<usize>,
}

impl DownloadPolicy {
    pub fn with_timeout(timeout: Duration) -> Self {
        Self {
            timeout: Some(timeout),
            max_events: None,
        }
    }
}

struct TrackedDownload {
    tx: watch::Sender<DownloadStatus>,
    driver: JoinHandle<()>,
    generation: u64,
}

type TrackedMap = Arc<Mutex<HashMap<PathBuf, TrackedDownload>>>;

/// Publish unless a terminal status is already recorded
fn publish(tx: &watch::Sender<DownloadStatus>, status: DownloadStatus) -> bool {
    tx.send_if_modified(|current| {
        if current.is_terminal() || *current == status {
            return false;
        }
        *current = status;
        true
    })
}

/// Stream of statuses from `rx`, ending after the first terminal one
fn status_stream_from(rx: watch::Receiver<DownloadStatus>) -> BoxStream<'static, DownloadStatus> {
    stream::unfold((rx, None::<DownloadStatus>), |(mut rx, last)| async move {
        if last.map_or(false, |s| s.is_terminal()) {
            return None;
        }

        if last.is_none() {
            let status = *rx.borrow_and_update();
            return Some((status, (rx, Some(status))));
        }

        match rx.changed().await {
            Ok(()) => {
                let status = *rx.borrow_and_update();
                Some((status, (rx, Some(status))))
            }
            Err(_) => {
                // Sender gone: surface a terminal value we have not yielded yet
                let status = *rx.borrow();
                if status.is_terminal() && Some(status) != last {
                    Some((status, (rx, Some(status))))
                } else {
                    None
                }
            }
        }
    })
    .boxed()
}

/// Shared subscription to one path
struct Subscription {
    stream: BoxStream<'static, DownloadStatus>,
    generation: Option<u64>,
}

/// Cancels the tracked entry when an awaiting future is dropped
struct CancelOnDrop<'a> {
    tracker: &'a RemoteAvailabilityTracker,
    path: PathBuf,
    generation: Option<u64>,
}

impl CancelOnDrop<'_> {
    fn disarm(&mut self) {
        self.generation = None;
    }
}

impl Drop for CancelOnDrop<'_> {
    fn drop(&mut self) {
        if let Some(generation) = self.generation {
            self.tracker.cancel_generation(&self.path, Some(generation));
        }
    }
}

/// Download orchestration for a remote container
pub struct RemoteAvailabilityTracker {
    sync: Arc<dyn RemoteSync>,
    tracked: TrackedMap,
    next_generation: AtomicU64,
}

impl RemoteAvailabilityTracker {
    pub fn new(sync: Arc<dyn RemoteSync>) -> Self {
        Self {
            sync,
            tracked: Arc::new(Mutex::new(HashMap::new())),
            next_generation: AtomicU64::new(1),
        }
    }

    pub fn remote_sync(&self) -> &Arc<dyn RemoteSync> {
        &self.sync
    }

    /// Ask the remote source to materialize `path`
    pub fn trigger_download(&self, path: &Path) -> VaultResult<()> {
        debug!("Requesting download of {}", path.display());
        self.sync.start_materialization(path)?;
        Ok(())
    }

    /// Shared status stream for `path`. The native watch is created on the
    /// first subscription; later subscribers join it.
    pub fn status_stream(&self, path: &Path) -> VaultResult<BoxStream<'static, DownloadStatus>> {
        Ok(self.subscribe(path)?.stream)
    }

    fn subscribe(&self, path: &Path) -> VaultResult<Subscription> {
        if self.sync.is_materialized(path) {
            return Ok(Subscription {
                stream: stream::once(async { DownloadStatus::Downloaded }).boxed(),
                generation: None,
            });
        }

        let mut tracked = self.tracked.lock();
        if let Some(entry) = tracked.get(path) {
            return Ok(Subscription {
                stream: status_stream_from(entry.tx.subscribe()),
                generation: Some(entry.generation),
            });
        }

        let native = self.sync.watch(path)?;
        let (tx, rx) = watch::channel(DownloadStatus::NotDownloaded);
        let generation = self.next_generation.fetch_add(1, Ordering::Relaxed);

        let driver = tokio::spawn(drive(
            native,
            tx.clone(),
            self.sync.clone(),
            self.tracked.clone(),
            path.to_path_buf(),
            generation,
        ));

        tracked.insert(
            path.to_path_buf(),
            TrackedDownload {
                tx,
                driver,
                generation,
            },
        );
        debug!("Watching {} (generation {})", path.display(), generation);

        Ok(Subscription {
            stream: status_stream_from(rx),
            generation: Some(generation),
        })
    }

    /// Wait until `media` is local, reporting progress in 0..=1.
    ///
    /// Dropping the returned future cancels the download for every
    /// subscriber of that path.
    pub async fn await_download<F>(&self, media: &EncryptedMedia, on_progress: F) -> VaultResult<EncryptedMedia>
    where
        F: FnMut(f64),
    {
        self.await_download_with_policy(media, DownloadPolicy::default(), on_progress)
            .await
    }

    /// [`await_download`](Self::await_download) bounded by `policy`. Hitting
    /// the limit detaches this caller; the download keeps running while
    /// other subscribers remain.
    pub async fn await_download_with_policy<F>(
        &self,
        media: &EncryptedMedia,
        policy: DownloadPolicy,
        mut on_progress: F,
    ) -> VaultResult<EncryptedMedia>
    where
        F: FnMut(f64),
    {
        let path = media.path.clone();
        let Subscription { mut stream, generation } = self.subscribe(&path)?;

        let mut guard = CancelOnDrop {
            tracker: self,
            path: path.clone(),
            generation,
        };

        if generation.is_some() {
            self.trigger_download(&path)?;
        }

        let wait = async {
            let mut events = 0usize;
            while let Some(status) = stream.next().await {
                match status {
                    DownloadStatus::Downloaded => {
                        on_progress(1.0);
                        return Ok(());
                    }
                    DownloadStatus::Cancelled => return Err(VaultError::Cancelled),
                    DownloadStatus::Downloading(p) => on_progress(p),
                    DownloadStatus::NotDownloaded => {}
                }

                events += 1;
                if policy.max_events.map_or(false, |max| events >= max) {
                    return Err(VaultError::DownloadTimedOut);
                }
            }
            Err(VaultError::CouldNotCreateMedia)
        };

        let result = match policy.timeout {
            Some(timeout) => tokio::time::timeout(timeout, wait)
                .await
                .unwrap_or(Err(VaultError::DownloadTimedOut)),
            None => wait.await,
        };

        match result {
            Ok(()) => {
                guard.disarm();
                if !tokio::fs::try_exists(&path).await.unwrap_or(false) {
                    return Err(VaultError::CouldNotCreateMedia);
                }
                Ok(media.materialized())
            }
            Err(e @ VaultError::DownloadTimedOut) => {
                // Our limit, not the download's: stop only if nobody else listens
                guard.disarm();
                let alone = generation.map_or(false, |g| self.is_sole_listener(&path, g));
                drop(stream);
                if alone {
                    self.cancel_generation(&path, generation);
                }
                Err(e)
            }
            Err(e @ VaultError::Cancelled) | Err(e @ VaultError::CouldNotCreateMedia) => {
                guard.disarm();
                Err(e)
            }
            Err(e) => Err(e),
        }
    }

    /// Whether the caller's own receiver is the only one left on `path`
    fn is_sole_listener(&self, path: &Path, generation: u64) -> bool {
        self.tracked
            .lock()
            .get(path)
            .map_or(false, |entry| entry.generation == generation && entry.tx.receiver_count() <= 1)
    }

    /// Mark `path` cancelled, tear down its watch and complete its stream
    pub fn cancel(&self, path: &Path) {
        self.cancel_generation(path, None);
    }

    fn cancel_generation(&self, path: &Path, generation: Option<u64>) {
        let entry = {
            let mut tracked = self.tracked.lock();
            match tracked.get(path) {
                Some(entry) if generation.map_or(true, |g| g == entry.generation) => tracked.remove(path),
                _ => None,
            }
        };

        if let Some(entry) = entry {
            publish(&entry.tx, DownloadStatus::Cancelled);
            entry.driver.abort();
            info!("Cancelled download of {}", path.display());
        }
    }

    /// Number of live native watches
    pub fn active_watches(&self) -> usize {
        self.tracked.lock().len()
    }
}

impl Drop for RemoteAvailabilityTracker {
    fn drop(&mut self) {
        for (_, entry) in self.tracked.lock().drain() {
            publish(&entry.tx, DownloadStatus::Cancelled);
            entry.driver.abort();
        }
    }
}

/// Forward native events into the shared status until a terminal status
async fn drive(
    mut native: NativeWatch,
    tx: watch::Sender<DownloadStatus>,
    sync: Arc<dyn RemoteSync>,
    tracked: TrackedMap,
    path: PathBuf,
    generation: u64,
) {
    if sync.is_materialized(&path) {
        publish(&tx, DownloadStatus::Downloaded);
    } else {
        while let Some(event) = native.next_event().await {
            let status = DownloadStatus::from(event);
            publish(&tx, status);
            if status.is_terminal() {
                break;
            }
        }
    }

    native.stop();

    let mut tracked = tracked.lock();
    if tracked.get(&path).map_or(false, |e| e.generation == generation) {
        tracked.remove(&path);
    }
    debug!("Stopped watching {}", path.display());
}
