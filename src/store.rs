//! Persistence and engine seams
// (c) 2025 Consign contributors
//!
//! The control core never talks to a database or a data plane directly.
//! These traits are the seams an embedding server implements; tests swap in
//! fakes or mocks.

use std::path::PathBuf;

use async_trait::async_trait;
use chrono::NaiveDateTime;

use crate::transfer::{TransferKey, TransferRecord};

/// Failures from the persistence layer.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// No record under the given key.
    #[error("no transfer record for {0}")]
    NotFound(TransferKey),
    /// Filesystem failure.
    #[error(transparent)]
    Io(#[from] std::io::Error),
    /// Backend-specific failure.
    #[error("store backend: {0}")]
    Backend(String),
}

/// Record-selection criteria shared by the log export, clean and purge
/// passes. Unset bounds do not constrain; the status flags are ORed, and
/// all-false means all statuses.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct LogFilter {
    /// Lower time bound, inclusive
    pub start: Option<NaiveDateTime>,
    /// Upper time bound, inclusive
    pub stop: Option<NaiveDateTime>,
    /// Lower transfer-id bound, inclusive
    pub start_id: Option<i64>,
    /// Upper transfer-id bound, inclusive
    pub stop_id: Option<i64>,
    /// Restrict to one rule
    pub rule: Option<String>,
    /// Restrict to one requester host
    pub requester: Option<String>,
    /// Include pending records
    pub pending: bool,
    /// Include in-transfer records
    pub in_transfer: bool,
    /// Include done records
    pub done: bool,
    /// Include errored records
    pub error: bool,
}

/// Persistent store of transfer records.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait TransferStore: Send + Sync {
    /// Loads one record by key.
    async fn load(&self, key: &TransferKey) -> Result<TransferRecord, StoreError>;
    /// Persists one record, replacing any previous state under its key.
    async fn save(&self, record: &TransferRecord) -> Result<(), StoreError>;
    /// All records matching `filter`, ordered by transfer id.
    async fn query(&self, filter: &LogFilter) -> Result<Vec<TransferRecord>, StoreError>;
    /// Deletes records matching `filter`; returns how many were removed.
    async fn delete_matching(&self, filter: &LogFilter) -> Result<u64, StoreError>;
    /// Flips finished-with-success records matching `filter` to their final
    /// Done marker; returns how many were updated.
    async fn finished_to_done(&self, filter: &LogFilter) -> Result<u64, StoreError>;
    /// Local path of the file received by a completed transfer.
    async fn local_file_of(&self, special_id: i64) -> Result<PathBuf, StoreError>;
}

/// Configuration artifact families subject to export and import.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, strum::Display, strum::EnumIter)]
#[allow(missing_docs)]
pub enum ConfigArtifact {
    Hosts,
    Rules,
    Business,
    Aliases,
    Roles,
}

/// One exported configuration document.
#[derive(Clone, Debug, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct DocumentEntry {
    /// Primary key within the artifact family
    pub id: String,
    /// Document body
    pub body: serde_json::Value,
}

/// Persistent store of configuration documents.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait DocumentStore: Send + Sync {
    /// All documents of one artifact family.
    async fn entries(&self, artifact: ConfigArtifact) -> Result<Vec<DocumentEntry>, StoreError>;
    /// Deletes every document of one artifact family; returns how many.
    async fn delete_all(&self, artifact: ConfigArtifact) -> Result<u64, StoreError>;
    /// Inserts documents into one artifact family.
    async fn import_entries(
        &self,
        artifact: ConfigArtifact,
        entries: Vec<DocumentEntry>,
    ) -> Result<(), StoreError>;
    /// Root directory of a rule's receive area, for listing queries.
    fn rule_directory(&self, rule: &str) -> Result<PathBuf, StoreError>;
}

/// Data-plane hook used to relaunch a prepared transfer.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait TransferEngine: Send + Sync {
    /// Schedules `record` to run (again) at its recorded start time.
    async fn relaunch(&self, record: &TransferRecord) -> Result<(), StoreError>;
}

/// Load feedback consulted before admitting restart work.
#[cfg_attr(test, mockall::automock)]
pub trait ConstraintMonitor: Send + Sync {
    /// Whether the server is currently too loaded to accept new work.
    fn overloaded(&self) -> bool;
}

/// Out-of-band operator notification.
#[cfg_attr(test, mockall::automock)]
pub trait NotificationSink: Send + Sync {
    /// Emits a warning attributed to `who`.
    fn warn(&self, message: &str, who: &str);
}

/// An external business task to execute.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct BusinessTask {
    /// Task class name
    pub class_name: String,
    /// Space-joined arguments
    pub arguments: String,
    /// Extra arguments passed through verbatim
    pub extra_arguments: String,
    /// Execution ceiling in milliseconds; zero means the server default
    pub delay_ms: u64,
}

/// Executor for business tasks.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait TaskExecutor: Send + Sync {
    /// Runs `task` to completion within its delay ceiling.
    async fn run(&self, task: BusinessTask) -> Result<(), crate::error::ProtocolError>;
}
