//! Transfer records and results
// (c) 2025 Consign contributors

use chrono::NaiveDateTime;

use crate::protocol::{ErrorCode, Packet};

/// Composite key identifying one transfer attempt.
///
/// `special_id` is unique per (requester, requested) pair.
#[derive(Clone, Debug, Eq, PartialEq, Hash, derive_more::Constructor)]
pub struct TransferKey {
    /// Requested host id
    pub requested: String,
    /// Requester host id
    pub requester: String,
    /// Transfer id
    pub special_id: i64,
}

impl std::fmt::Display for TransferKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} {} {}", self.requested, self.requester, self.special_id)
    }
}

/// Which step of its lifecycle a record has reached. Used by the log
/// cleanup pass and the terminal-state check.
#[derive(Clone, Copy, Debug, Eq, PartialEq, serde::Serialize, serde::Deserialize, strum::Display)]
#[allow(missing_docs)]
pub enum TransferStep {
    NoTask,
    PreTask,
    Transfer,
    PostTask,
    AllDone,
    Error,
}

/// One transfer attempt, as persisted by the external store and mutated
/// through this core.
#[derive(Clone, Debug, PartialEq)]
pub struct TransferRecord {
    /// Rule governing the transfer
    pub rule: String,
    /// Requester host id
    pub requester: String,
    /// Requested host id
    pub requested: String,
    /// Transfer id, unique per (requester, requested) pair
    pub special_id: i64,
    /// Count of transfer units already completed; used to resume
    pub rank: u32,
    /// Scheduled start
    pub start: NaiveDateTime,
    /// Most recent error code
    pub last_error: ErrorCode,
    /// Lifecycle step
    pub step: TransferStep,
    /// Sticky: set at most once per attempt, by a successful reschedule
    pub rescheduled: bool,
    /// The initiating and failing host are the same
    pub self_requested: bool,
    /// A data-plane handler is currently moving bytes for this record
    pub in_transfer: bool,
    /// Whether this side sends (`true`) or receives the file
    pub is_sender: bool,
}

impl TransferRecord {
    /// The composite key of this record.
    #[must_use]
    pub fn key(&self) -> TransferKey {
        TransferKey {
            requested: self.requested.clone(),
            requester: self.requester.clone(),
            special_id: self.special_id,
        }
    }

    /// Whether the record has reached a terminal state (nothing left to
    /// stop or cancel).
    #[must_use]
    pub fn is_finished(&self) -> bool {
        matches!(self.step, TransferStep::AllDone)
            || matches!(
                self.last_error,
                ErrorCode::CompleteOk | ErrorCode::StoppedTransfer | ErrorCode::CanceledTransfer
            )
    }

    /// One-line form for logs.
    #[must_use]
    pub fn short_string(&self) -> String {
        format!(
            "{} {} {} rule={} rank={} step={} code={}",
            self.requested,
            self.requester,
            self.special_id,
            self.rule,
            self.rank,
            self.step,
            self.last_error
        )
    }

    /// Renders the record as one XML element, as used by the log export.
    #[must_use]
    pub fn to_xml(&self) -> String {
        format!(
            "<runner><specialid>{}</specialid><requester>{}</requester>\
             <requested>{}</requested><rule>{}</rule><rank>{}</rank>\
             <start>{}</start><step>{}</step><status>{}</status></runner>",
            self.special_id,
            xml_escape(&self.requester),
            xml_escape(&self.requested),
            xml_escape(&self.rule),
            self.rank,
            self.start.format("%Y-%m-%d %H:%M:%S"),
            self.step,
            self.last_error
        )
    }
}

fn xml_escape(s: &str) -> String {
    s.replace('&', "&amp;").replace('<', "&lt;").replace('>', "&gt;")
}

/// Outcome of a control operation or a transfer step.
#[derive(Clone, Debug, PartialEq)]
pub struct TransferResult {
    /// Whether the operation took effect
    pub success: bool,
    /// Machine-readable outcome
    pub code: ErrorCode,
    /// Record the outcome applies to, if any
    pub record: Option<TransferRecord>,
    /// Auxiliary payload packet, if any
    pub other: Option<Packet>,
    /// Whether the peer has already been informed through another path
    pub answered: bool,
}

impl TransferResult {
    /// A result with no attached record or payload.
    #[must_use]
    pub fn new(success: bool, code: ErrorCode) -> Self {
        Self {
            success,
            code,
            record: None,
            other: None,
            answered: false,
        }
    }

    /// As [`TransferResult::new`], with an attached record.
    #[must_use]
    pub fn with_record(success: bool, code: ErrorCode, record: TransferRecord) -> Self {
        Self {
            success,
            code,
            record: Some(record),
            other: None,
            answered: false,
        }
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::protocol::ErrorCode;
    use chrono::NaiveDate;
    use pretty_assertions::assert_eq;

    pub(crate) fn sample_record() -> TransferRecord {
        TransferRecord {
            rule: "default".into(),
            requester: "hosta".into(),
            requested: "hostb".into(),
            special_id: 42,
            rank: 7,
            start: NaiveDate::from_ymd_opt(2026, 8, 23)
                .unwrap()
                .and_hms_opt(8, 0, 0)
                .unwrap(),
            last_error: ErrorCode::ConnectionImpossible,
            step: TransferStep::Error,
            rescheduled: false,
            self_requested: false,
            in_transfer: false,
            is_sender: true,
        }
    }

    #[test]
    fn key_round_trip() {
        let r = sample_record();
        let key = r.key();
        assert_eq!(key.to_string(), "hostb hosta 42");
    }

    #[test]
    fn finished_states() {
        let mut r = sample_record();
        assert!(!r.is_finished());
        r.step = TransferStep::AllDone;
        assert!(r.is_finished());
        r.step = TransferStep::Error;
        r.last_error = ErrorCode::CanceledTransfer;
        assert!(r.is_finished());
    }

    #[test]
    fn xml_escapes_metacharacters() {
        let mut r = sample_record();
        r.rule = "a<b&c".into();
        assert!(r.to_xml().contains("a&lt;b&amp;c"));
    }
}
