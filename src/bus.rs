//! ALFA Media Vault - File Operation Bus
//!
//! Broadcasts create/delete/move events to any number of listeners.

use tokio::sync::broadcast;

use crate::media::EncryptedMedia;
use crate::storage::Album;

const BUS_CAPACITY: usize = 256;

/// A completed change to album contents
#[derive(Debug, Clone)]
pub enum FileOperation {
    Create(EncryptedMedia),
    Delete(Vec<EncryptedMedia>),
    Move { media: Vec<EncryptedMedia>, to: Album },
}

/// Publish/subscribe channel for [`FileOperation`]s
#[derive(Clone)]
pub struct FileOperationBus {
    tx: broadcast::Sender<FileOperation>,
}

impl Default for FileOperationBus {
    fn default() -> Self {
        Self::new()
    }
}

impl FileOperationBus {
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(BUS_CAPACITY);
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<FileOperation> {
        self.tx.subscribe()
    }

    /// Deliver to current subscribers; nobody listening is not an error
    pub fn publish(&self, operation: FileOperation) {
        let _ = self.tx.send(operation);
    }
}
