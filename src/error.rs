//! Control-plane error types
// (c) 2025 Consign contributors

use crate::protocol::ErrorCode;
use crate::store::StoreError;

/// Errors raised while handling a control packet.
///
/// Every variant maps to one [`ErrorCode`] so the failure can be reported
/// on the wire; see [`ProtocolError::code`]. Authentication failures are
/// deliberately reported without a reply packet, so an unauthenticated
/// peer learns nothing about the command set.
#[derive(Debug, thiserror::Error)]
pub enum ProtocolError {
    /// The session has not completed authentication.
    #[error("session not authenticated")]
    NotAuthenticated,
    /// The authenticated peer lacks a required role.
    #[error("peer lacks the {0} role")]
    Unauthorized(crate::session::Role),
    /// A business-level rule rejected the operation.
    #[error("business error: {0}")]
    Business(String),
    /// The packet was structurally valid but semantically unusable.
    #[error("invalid command: {0}")]
    PacketFormat(String),
    /// A referenced record does not exist.
    #[error("no such record: {0}")]
    NoData(String),
    /// The persistence layer failed.
    #[error(transparent)]
    Store(#[from] StoreError),
    /// An internal failure outside the protocol's control.
    #[error("internal error: {0}")]
    System(String),
}

impl ProtocolError {
    /// The wire code reported for this error.
    #[must_use]
    pub fn code(&self) -> ErrorCode {
        match self {
            Self::NotAuthenticated | Self::Unauthorized(_) => ErrorCode::BadAuthent,
            Self::Business(_) => ErrorCode::ExternalOp,
            Self::PacketFormat(_) => ErrorCode::IncorrectCommand,
            Self::NoData(_) => ErrorCode::CommandNotFound,
            Self::Store(_) | Self::System(_) => ErrorCode::Internal,
        }
    }
}
