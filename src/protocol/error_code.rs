//! Transfer status codes shared by every control packet
// (c) 2025 Consign contributors

use strum::IntoEnumIterator as _;

/// Machine-readable codes advising of the status of a transfer or a control
/// operation.
///
/// Each code has a one-character wire form used in the free-form argument
/// channels of legacy packets. The set is closed and partitioned into a
/// success class and a failure class; see [`ErrorCode::is_success`].
#[derive(
    Clone,
    Copy,
    Debug,
    Eq,
    PartialEq,
    Hash,
    serde::Serialize,
    serde::Deserialize,
    strum::Display,
    strum::EnumIter,
    strum::EnumString,
)]
#[strum(ascii_case_insensitive)]
#[allow(missing_docs)]
pub enum ErrorCode {
    InitOk,
    PreProcessingOk,
    TransferOk,
    PostProcessingOk,
    CompleteOk,
    Running,
    QueryAlreadyFinished,
    QueryStillRunning,
    ConnectionImpossible,
    ServerOverloaded,
    BadAuthent,
    ExternalOp,
    TransferError,
    ChecksumError,
    Disconnection,
    RemoteShutdown,
    FinalOp,
    Unimplemented,
    Shutdown,
    RemoteError,
    Internal,
    StoppedTransfer,
    CanceledTransfer,
    Warning,
    NotKnownHost,
    QueryRemotelyUnknown,
    FileNotFound,
    CommandNotFound,
    IncorrectCommand,
    FileNotAllowed,
    SizeNotAllowed,
    PassThroughMode,
    LoopSelfRequestedHost,
    Unknown,
}

impl ErrorCode {
    /// The one-character wire form of this code.
    #[must_use]
    pub fn code(self) -> char {
        use ErrorCode::{
            BadAuthent, CanceledTransfer, ChecksumError, CommandNotFound, CompleteOk,
            ConnectionImpossible, Disconnection, ExternalOp, FileNotAllowed, FileNotFound, FinalOp,
            IncorrectCommand, InitOk, Internal, LoopSelfRequestedHost, NotKnownHost,
            PassThroughMode, PostProcessingOk, PreProcessingOk, QueryAlreadyFinished,
            QueryRemotelyUnknown, QueryStillRunning, RemoteError, RemoteShutdown, Running,
            ServerOverloaded, Shutdown, SizeNotAllowed, StoppedTransfer, TransferError, TransferOk,
            Unimplemented, Unknown, Warning,
        };
        match self {
            InitOk => 'i',
            PreProcessingOk => 'B',
            TransferOk => 'X',
            PostProcessingOk => 'P',
            CompleteOk => 'O',
            Running => 'z',
            QueryAlreadyFinished => 'Q',
            QueryStillRunning => 's',
            ConnectionImpossible => 'C',
            ServerOverloaded => 'l',
            BadAuthent => 'A',
            ExternalOp => 'E',
            TransferError => 'T',
            ChecksumError => 'M',
            Disconnection => 'D',
            RemoteShutdown => 'r',
            FinalOp => 'F',
            Unimplemented => 'U',
            Shutdown => 'S',
            RemoteError => 'R',
            Internal => 'I',
            StoppedTransfer => 'H',
            CanceledTransfer => 'K',
            Warning => 'W',
            NotKnownHost => 'N',
            QueryRemotelyUnknown => 'u',
            FileNotFound => 'f',
            CommandNotFound => 'c',
            IncorrectCommand => 'n',
            FileNotAllowed => 'a',
            SizeNotAllowed => 'd',
            PassThroughMode => 'p',
            LoopSelfRequestedHost => 'G',
            Unknown => '-',
        }
    }

    /// Resolves a one-character wire form. Anything unrecognized maps to
    /// [`ErrorCode::Unknown`] rather than failing; callers that care must
    /// check for it explicitly.
    #[must_use]
    pub fn from_code(c: char) -> Self {
        Self::iter().find(|e| e.code() == c).unwrap_or(Self::Unknown)
    }

    /// Resolves either a full code name (case-insensitive) or a
    /// one-character wire form, as accepted in reschedule `-case` lists.
    #[must_use]
    pub fn resolve(token: &str) -> Option<Self> {
        if let Ok(code) = token.parse::<Self>() {
            return Some(code);
        }
        let mut chars = token.chars();
        match (chars.next(), chars.next()) {
            (Some(c), None) => {
                let code = Self::from_code(c);
                (code != Self::Unknown || c == '-').then_some(code)
            }
            _ => None,
        }
    }

    /// Whether this code belongs to the success class.
    ///
    /// The success class is exactly {`CompleteOk`, `InitOk`,
    /// `PostProcessingOk`, `PreProcessingOk`, `QueryAlreadyFinished`,
    /// `QueryStillRunning`, `Running`, `TransferOk`}; every other code,
    /// including `Warning`, is a failure.
    #[must_use]
    pub fn is_success(self) -> bool {
        matches!(
            self,
            Self::CompleteOk
                | Self::InitOk
                | Self::PostProcessingOk
                | Self::PreProcessingOk
                | Self::QueryAlreadyFinished
                | Self::QueryStillRunning
                | Self::Running
                | Self::TransferOk
        )
    }
}

#[cfg(test)]
mod tests {
    use super::ErrorCode;
    use pretty_assertions::assert_eq;
    use std::collections::HashSet;
    use strum::IntoEnumIterator as _;

    #[test]
    fn wire_codes_are_unique() {
        let mut seen = HashSet::new();
        for code in ErrorCode::iter() {
            assert!(seen.insert(code.code()), "duplicate wire code for {code}");
        }
    }

    #[test]
    fn round_trip_via_wire_code() {
        for code in ErrorCode::iter() {
            assert_eq!(ErrorCode::from_code(code.code()), code);
        }
    }

    #[test]
    fn partition_is_exhaustive_and_disjoint() {
        let successes: Vec<_> = ErrorCode::iter().filter(|c| c.is_success()).collect();
        assert_eq!(
            successes,
            vec![
                ErrorCode::InitOk,
                ErrorCode::PreProcessingOk,
                ErrorCode::TransferOk,
                ErrorCode::PostProcessingOk,
                ErrorCode::CompleteOk,
                ErrorCode::Running,
                ErrorCode::QueryAlreadyFinished,
                ErrorCode::QueryStillRunning,
            ]
        );
        // the two classes cover the whole enum with no overlap
        let failures = ErrorCode::iter().filter(|c| !c.is_success()).count();
        assert_eq!(successes.len() + failures, ErrorCode::iter().count());
        assert!(!ErrorCode::Warning.is_success());
        assert!(!ErrorCode::Shutdown.is_success());
        assert!(!ErrorCode::LoopSelfRequestedHost.is_success());
    }

    #[test]
    fn resolve_accepts_names_and_chars() {
        assert_eq!(
            ErrorCode::resolve("ConnectionImpossible"),
            Some(ErrorCode::ConnectionImpossible)
        );
        assert_eq!(
            ErrorCode::resolve("connectionimpossible"),
            Some(ErrorCode::ConnectionImpossible)
        );
        assert_eq!(ErrorCode::resolve("C"), Some(ErrorCode::ConnectionImpossible));
        assert_eq!(ErrorCode::resolve("-"), Some(ErrorCode::Unknown));
        assert_eq!(ErrorCode::resolve("NoSuchCode"), None);
    }
}
