//! Registry of live data-plane channels
// (c) 2025 Consign contributors

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};

use tokio::sync::mpsc;

use crate::protocol::Packet;
use crate::transfer::{TransferKey, TransferRecord};

/// Handle on a live transfer's control inbox and shared record.
#[derive(Clone, Debug)]
pub struct LocalHandle {
    tx: mpsc::UnboundedSender<Packet>,
    record: Arc<Mutex<TransferRecord>>,
}

impl LocalHandle {
    /// Constructor
    #[must_use]
    pub fn new(tx: mpsc::UnboundedSender<Packet>, record: Arc<Mutex<TransferRecord>>) -> Self {
        Self { tx, record }
    }

    /// Injects a packet into the transfer's inbox. Returns `false` when the
    /// transfer has already gone away.
    pub fn inject(&self, packet: Packet) -> bool {
        self.tx.send(packet).is_ok()
    }

    /// Snapshot of the transfer record. A poisoned lock yields the last
    /// written state.
    #[must_use]
    pub fn record(&self) -> TransferRecord {
        self.record
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// The transfer's current rank.
    #[must_use]
    pub fn rank(&self) -> u32 {
        self.record
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .rank
    }
}

/// Live transfers indexed by key. Control operations prefer acting on a
/// live channel over mutating the store directly.
#[derive(Debug, Default)]
pub struct LocalRegistry {
    channels: Mutex<HashMap<TransferKey, LocalHandle>>,
}

impl LocalRegistry {
    /// An empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a live transfer, replacing any stale entry under the key.
    pub fn register(&self, key: TransferKey, handle: LocalHandle) {
        let _ = self
            .channels
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(key, handle);
    }

    /// Removes a transfer from the registry, normally on completion.
    pub fn unregister(&self, key: &TransferKey) {
        let _ = self
            .channels
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(key);
    }

    /// Finds the live channel for `key`, if the transfer is running here.
    #[must_use]
    pub fn find(&self, key: &TransferKey) -> Option<LocalHandle> {
        self.channels
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(key)
            .cloned()
    }

    /// Number of live transfers.
    #[must_use]
    pub fn len(&self) -> usize {
        self.channels
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    /// Whether no transfer is currently live.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
