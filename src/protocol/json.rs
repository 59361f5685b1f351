//! Typed JSON command documents
// (c) 2025 Consign contributors
//!
//! Each control operation has one concrete node type; the `@class` tag on
//! the wire selects it. Request and response nodes are separate types where
//! the original exchange mutates the document shape.

use serde::{Deserialize, Serialize};

/// The closed set of JSON command documents.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "@class")]
#[allow(missing_docs)]
pub enum JsonBody {
    Comment(CommentNode),
    Bandwidth(BandwidthNode),
    Log(LogNode),
    LogResponse(LogResponseNode),
    ConfigExport(ConfigExportNode),
    ConfigExportResponse(ConfigExportResponseNode),
    ConfigImport(ConfigImportNode),
    ConfigImportResponse(ConfigImportResponseNode),
    StopOrCancel(StopOrCancelNode),
    Restart(RestartNode),
    Information(InformationNode),
    ShutdownOrBlock(ShutdownOrBlockNode),
    ShutdownRequest(ShutdownRequestNode),
    BusinessRequest(BusinessRequestNode),
}

/// Free-form comment, used for invalid-command replies.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CommentNode {
    /// The comment text
    pub comment: String,
}

/// Bandwidth get/set. All four values are ceilings in bytes per second;
/// a negative requested value means "leave unchanged".
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BandwidthNode {
    /// `true` to set new values, `false` to query
    pub setter: bool,
    /// Global write ceiling
    pub write_global: i64,
    /// Global read ceiling
    pub read_global: i64,
    /// Per-session write ceiling
    pub write_session: i64,
    /// Per-session read ceiling
    pub read_session: i64,
}

/// Log export (and optional purge) request.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LogNode {
    /// Delete the exported records afterwards
    pub purge: bool,
    /// First flip finished-with-success records to their final Done marker
    pub clean: bool,
    /// Lower time bound, `YYYY-MM-DD HH:MM:SS`
    pub start: Option<String>,
    /// Upper time bound, `YYYY-MM-DD HH:MM:SS`
    pub stop: Option<String>,
    /// Lower transfer-id bound
    pub start_id: Option<i64>,
    /// Upper transfer-id bound
    pub stop_id: Option<i64>,
    /// Restrict to one rule
    pub rule: Option<String>,
    /// Restrict to one requester host
    pub request: Option<String>,
    /// Include pending records
    pub status_pending: bool,
    /// Include in-transfer records
    pub status_transfer: bool,
    /// Include done records
    pub status_done: bool,
    /// Include errored records
    pub status_error: bool,
}

/// Reply to [`LogNode`].
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LogResponseNode {
    /// Path of the export file
    pub filename: String,
    /// Number of records exported
    pub exported: u64,
    /// Number of records purged
    pub purged: u64,
}

/// Configuration export request: which artifacts to write out.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
#[allow(missing_docs)]
pub struct ConfigExportNode {
    pub host: bool,
    pub rule: bool,
    pub business: bool,
    pub alias: bool,
    pub roles: bool,
}

/// Reply to [`ConfigExportNode`]: per-artifact file path, or null when that
/// artifact was not produced.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
#[allow(missing_docs)]
pub struct ConfigExportResponseNode {
    pub file_host: Option<String>,
    pub file_rule: Option<String>,
    pub file_business: Option<String>,
    pub file_alias: Option<String>,
    pub file_roles: Option<String>,
}

/// Configuration import request. Each artifact is sourced either from an
/// explicit path or from the local file of a completed transfer by id.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
#[allow(missing_docs)]
pub struct ConfigImportNode {
    pub purge_host: bool,
    pub purge_rule: bool,
    pub purge_business: bool,
    pub purge_alias: bool,
    pub purge_roles: bool,
    pub host: Option<String>,
    pub rule: Option<String>,
    pub business: Option<String>,
    pub alias: Option<String>,
    pub roles: Option<String>,
    pub host_id: Option<i64>,
    pub rule_id: Option<i64>,
    pub business_id: Option<i64>,
    pub alias_id: Option<i64>,
    pub roles_id: Option<i64>,
}

/// Reply to [`ConfigImportNode`]: per-artifact purge/import flags.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
#[allow(missing_docs)]
pub struct ConfigImportResponseNode {
    pub purged_host: bool,
    pub purged_rule: bool,
    pub purged_business: bool,
    pub purged_alias: bool,
    pub purged_roles: bool,
    pub imported_host: bool,
    pub imported_rule: bool,
    pub imported_business: bool,
    pub imported_alias: bool,
    pub imported_roles: bool,
}

/// Stop or cancel one transfer, selected by the packet subtype.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
#[allow(missing_docs)]
pub struct StopOrCancelNode {
    pub requested: Option<String>,
    pub requester: Option<String>,
    pub special_id: Option<i64>,
}

/// Restart one transfer, optionally at a given time.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RestartNode {
    /// Requested host id
    pub requested: Option<String>,
    /// Requester host id
    pub requester: Option<String>,
    /// Transfer id
    pub special_id: Option<i64>,
    /// Restart time in `yyyyMMddHHmmss` form
    pub restart_time: Option<String>,
}

/// Structured form of an information query.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct InformationNode {
    /// `true` for a transfer-record lookup by id
    pub id_request: bool,
    /// Transfer id, for id requests
    pub id: i64,
    /// Whether the caller was the requester of the transfer
    pub to_requested: bool,
    /// Listing/existence request selector (0=list, 1=list-detail,
    /// 2=exists, 3=detail); ignored for id requests
    pub request: u8,
    /// Rule whose directory to inspect
    pub rule: String,
    /// Pattern or file name, relative to the rule directory
    pub filename: String,
}

/// Shutdown-or-block toggle. `shutdown` selects between an orderly process
/// shutdown and a flip of the global admission block.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ShutdownOrBlockNode {
    /// Shared secret
    pub key: Vec<u8>,
    /// `true` = shutdown, `false` = block toggle
    pub shutdown: bool,
    /// For shutdown: restart afterwards. For block: the new block state.
    pub restart_or_block: bool,
    /// Filled in on replies
    pub comment: Option<String>,
}

/// Shutdown request carrying the remote's view of the transfer rank.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ShutdownRequestNode {
    /// Shared secret
    pub key: Vec<u8>,
    /// Rank from the remote point of view; negative when unknown
    pub rank: i64,
    /// Restart the process after shutdown
    pub restart: bool,
}

/// External business task invocation.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BusinessRequestNode {
    /// Task class name
    pub class_name: String,
    /// Space-joined task arguments
    pub arguments: Option<String>,
    /// Extra arguments passed through to the executor
    pub extra_arguments: Option<String>,
    /// Execution timeout in milliseconds
    pub delay: u64,
    /// Whether the task is to be applied locally
    pub to_applied: bool,
    /// Cleared on error replies
    pub validated: bool,
}
