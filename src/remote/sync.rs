//! ALFA Media Vault - Remote Sync Abstraction
//!
//! Whatever backs a remote container (a cloud drive daemon, a mirror
//! directory) is driven through [`RemoteSync`].

use std::fmt;
use std::io;
use std::path::Path;

use tokio::sync::mpsc;

/// Progress report from the remote source for one file
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MaterializationEvent {
    /// 0..=100 when known
    pub percent_complete: Option<f64>,
    pub is_fully_materialized: bool,
}

impl MaterializationEvent {
    pub fn progress(percent: f64) -> Self {
        Self {
            percent_complete: Some(percent),
            is_fully_materialized: false,
        }
    }

    pub fn complete() -> Self {
        Self {
            percent_complete: Some(100.0),
            is_fully_materialized: true,
        }
    }
}

/// Live subscription to materialization events for one file.
///
/// The teardown closure runs exactly once: on [`stop`](NativeWatch::stop) or
/// on drop, whichever comes first.
pub struct NativeWatch {
    events: mpsc::UnboundedReceiver<MaterializationEvent>,
    teardown: Option<Box<dyn FnOnce() + Send>>,
}

impl NativeWatch {
    pub fn new(
        events: mpsc::UnboundedReceiver<MaterializationEvent>,
        teardown: impl FnOnce() + Send + 'static,
    ) -> Self {
        Self {
            events,
            teardown: Some(Box::new(teardown)),
        }
    }

    /// Next event; `None` once the source stops reporting
    pub async fn next_event(&mut self) -> Option<MaterializationEvent> {
        self.events.recv().await
    }

    /// Tear the watch down
    pub fn stop(&mut self) {
        if let Some(teardown) = self.teardown.take() {
            teardown();
        }
        self.events.close();
    }

    pub fn is_stopped(&self) -> bool {
        self.teardown.is_none()
    }
}

impl Drop for NativeWatch {
    fn drop(&mut self) {
        self.stop();
    }
}

impl fmt::Debug for NativeWatch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NativeWatch")
            .field("stopped", &self.is_stopped())
            .finish()
    }
}

/// Remote-backed file source
pub trait RemoteSync: Send + Sync + 'static {
    /// Ask the source to bring `path` local. Must be idempotent.
    fn start_materialization(&self, path: &Path) -> io::Result<()>;

    /// Whether `path` is fully present locally
    fn is_materialized(&self, path: &Path) -> bool;

    /// Subscribe to progress events for `path`
    fn watch(&self, path: &Path) -> io::Result<NativeWatch>;
}
