//! Retry decision for failed transfers
// (c) 2025 Consign contributors
//!
//! Given a reschedule argument string and a failed transfer's state, decides
//! whether the transfer may be retried and at what time. The decision is a
//! pure function of its inputs; callers persist the mutation.
//!
//! Argument string grammar:
//! `-delay <ms> -case <code>[,<code>...] [-between <win>] [-notbetween <win>]...`
//! where `<win>` is `startSpec;endSpec` and each spec is a `:`-separated list
//! of calendar field operations such as `H7:m0:S0` (set hour/minute/second)
//! or `D+1` (relative add). Field letters are Y, M, D, H, m, S; fields not
//! named inherit the reference instant.

use chrono::{Duration, Months, NaiveDateTime, Timelike as _};

use crate::protocol::ErrorCode;
use crate::transfer::TransferRecord;

/// Calendar fields addressable in a window spec.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
#[allow(missing_docs)]
pub enum DateField {
    Year,
    Month,
    Day,
    Hour,
    Minute,
    Second,
}

impl DateField {
    fn from_letter(c: char) -> Option<Self> {
        match c {
            'Y' => Some(Self::Year),
            'M' => Some(Self::Month),
            'D' => Some(Self::Day),
            'H' => Some(Self::Hour),
            'm' => Some(Self::Minute),
            'S' => Some(Self::Second),
            _ => None,
        }
    }
}

/// One operation on one calendar field.
#[derive(Clone, Copy, Debug, PartialEq)]
enum FieldOp {
    /// Set the field to an absolute value
    Set(u32),
    /// Add (or with a negative amount, subtract) from the field
    Add(i64),
}

/// A resolved-at-evaluation-time point in the day, as a list of field
/// operations applied to the reference instant.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct DateSpec(Vec<(DateField, FieldOp)>);

impl DateSpec {
    /// Parses a `:`-separated field-op list. `None` on any malformed token.
    #[must_use]
    pub fn parse(text: &str) -> Option<Self> {
        let mut ops = Vec::new();
        for token in text.split(':') {
            let mut chars = token.chars();
            let field = DateField::from_letter(chars.next()?)?;
            let rest = chars.as_str();
            let op = match rest.strip_prefix('+') {
                Some(n) => FieldOp::Add(n.parse().ok()?),
                None => match rest.strip_prefix('-') {
                    Some(n) => FieldOp::Add(-n.parse::<i64>().ok()?),
                    None => FieldOp::Set(rest.parse().ok()?),
                },
            };
            ops.push((field, op));
        }
        if ops.is_empty() {
            return None;
        }
        Some(Self(ops))
    }

    /// Applies the field operations to `now`. Arithmetic is field aware:
    /// adding a month honors variable month lengths. `None` when an
    /// operation produces an unrepresentable date.
    #[must_use]
    pub fn resolve(&self, now: NaiveDateTime) -> Option<NaiveDateTime> {
        use chrono::Datelike as _;
        let mut t = now;
        for &(field, op) in &self.0 {
            t = match (field, op) {
                (DateField::Year, FieldOp::Set(v)) => t.with_year(i32::try_from(v).ok()?)?,
                (DateField::Year, FieldOp::Add(n)) => add_months(t, n.checked_mul(12)?)?,
                (DateField::Month, FieldOp::Set(v)) => t.with_month(v)?,
                (DateField::Month, FieldOp::Add(n)) => add_months(t, n)?,
                (DateField::Day, FieldOp::Set(v)) => t.with_day(v)?,
                (DateField::Day, FieldOp::Add(n)) => t.checked_add_signed(Duration::days(n))?,
                (DateField::Hour, FieldOp::Set(v)) => t.with_hour(v)?,
                (DateField::Hour, FieldOp::Add(n)) => t.checked_add_signed(Duration::hours(n))?,
                (DateField::Minute, FieldOp::Set(v)) => t.with_minute(v)?,
                (DateField::Minute, FieldOp::Add(n)) => {
                    t.checked_add_signed(Duration::minutes(n))?
                }
                (DateField::Second, FieldOp::Set(v)) => t.with_second(v)?,
                (DateField::Second, FieldOp::Add(n)) => {
                    t.checked_add_signed(Duration::seconds(n))?
                }
            };
        }
        Some(t)
    }
}

fn add_months(t: NaiveDateTime, n: i64) -> Option<NaiveDateTime> {
    if n >= 0 {
        t.checked_add_months(Months::new(u32::try_from(n).ok()?))
    } else {
        t.checked_sub_months(Months::new(u32::try_from(-n).ok()?))
    }
}

/// A recurring daily window; either end may be left unset.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Window {
    /// Window start, unset means open
    pub start: Option<DateSpec>,
    /// Window end, unset means open
    pub end: Option<DateSpec>,
}

impl Window {
    /// Parses `startSpec;endSpec`. Either side may be empty; `None` when
    /// both are, or a present side is malformed.
    #[must_use]
    pub fn parse(text: &str) -> Option<Self> {
        let (start, end) = text.split_once(';')?;
        let parse_side = |s: &str| {
            if s.is_empty() {
                Some(None)
            } else {
                DateSpec::parse(s).map(Some)
            }
        };
        let start = parse_side(start)?;
        let end = parse_side(end)?;
        if start.is_none() && end.is_none() {
            return None;
        }
        Some(Self { start, end })
    }

    /// Whether `candidate` falls inside the window once resolved against
    /// `now`. Windows whose start exceeds their end span midnight (the end
    /// rolls forward a day); a window that has wholly elapsed before the
    /// candidate rolls to its next daily occurrence.
    #[must_use]
    pub fn contains(&self, now: NaiveDateTime, candidate: NaiveDateTime) -> bool {
        // a side that fails to resolve makes the whole window unusable
        let mut start = match &self.start {
            None => None,
            Some(spec) => match spec.resolve(now) {
                Some(t) => Some(t),
                None => return false,
            },
        };
        let mut end = match &self.end {
            None => None,
            Some(spec) => match spec.resolve(now) {
                Some(t) => Some(t),
                None => return false,
            },
        };
        if let (Some(s), Some(e)) = (start, end) {
            let e = if s > e { e + Duration::hours(24) } else { e };
            let (s, e) = if s < candidate && e < candidate {
                (s + Duration::hours(24), e + Duration::hours(24))
            } else {
                (s, e)
            };
            start = Some(s);
            end = Some(e);
        }
        match (start, end) {
            (None, Some(e)) => candidate < e,
            (Some(s), None) => s < candidate,
            (Some(s), Some(e)) => s < candidate && candidate < e,
            (None, None) => false,
        }
    }
}

/// Parsed reschedule arguments.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct RescheduleSpec {
    /// Retry delay in milliseconds
    pub delay_ms: i64,
    /// Error codes that trigger a retry
    pub cases: Vec<ErrorCode>,
    /// Windows the retry must fall inside (any of)
    pub between: Vec<Window>,
    /// Windows the retry must avoid (all of)
    pub notbetween: Vec<Window>,
}

/// Why a retry was refused.
#[derive(Clone, Copy, Debug, Eq, PartialEq, strum::Display)]
pub enum DenyReason {
    /// The attempt was already rescheduled once
    AlreadyRescheduled,
    /// The failing host requested the transfer from itself
    SelfRequested,
    /// Missing or non-positive delay, or no trigger codes
    BadSpec,
    /// The current error code matches no trigger code
    NoMatchingCase,
    /// The candidate time falls inside an exclusion window
    InsideExclusion,
    /// No required window contains the candidate time
    OutsideRequired,
}

impl DenyReason {
    /// The code reported for this refusal. Only the self-request loop gets
    /// a distinct code; every other refusal is a plain warning.
    #[must_use]
    pub fn code(self) -> ErrorCode {
        match self {
            Self::SelfRequested => ErrorCode::LoopSelfRequestedHost,
            _ => ErrorCode::Warning,
        }
    }
}

/// Outcome of a reschedule evaluation.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum Decision {
    /// Retry at `new_start`
    Allowed {
        /// The retry time, `now + delay`
        new_start: NaiveDateTime,
    },
    /// No retry; the record is left untouched
    Denied(DenyReason),
}

impl RescheduleSpec {
    /// Parses a whitespace-separated argument string. Malformed window
    /// tokens are skipped; a missing or non-positive delay or an empty
    /// trigger set is reported at evaluation time as [`DenyReason::BadSpec`].
    #[must_use]
    pub fn parse(args: &str) -> Self {
        let mut spec = Self::default();
        let mut words = args.split_whitespace();
        while let Some(word) = words.next() {
            match word {
                "-delay" => {
                    spec.delay_ms = words.next().and_then(|w| w.parse().ok()).unwrap_or(0);
                }
                "-case" => {
                    if let Some(list) = words.next() {
                        // unresolved tokens are dropped and can never match
                        spec.cases
                            .extend(list.split(',').filter_map(ErrorCode::resolve));
                    }
                }
                "-between" => {
                    if let Some(w) = words.next().and_then(Window::parse) {
                        spec.between.push(w);
                    }
                }
                "-notbetween" => {
                    if let Some(w) = words.next().and_then(Window::parse) {
                        spec.notbetween.push(w);
                    }
                }
                other => {
                    tracing::debug!("ignoring reschedule token {other:?}");
                }
            }
        }
        spec
    }

    /// Decides whether a transfer failing with `current` may retry.
    #[must_use]
    pub fn evaluate(
        &self,
        current: ErrorCode,
        already_rescheduled: bool,
        self_requested: bool,
        now: NaiveDateTime,
    ) -> Decision {
        if already_rescheduled {
            return Decision::Denied(DenyReason::AlreadyRescheduled);
        }
        if self_requested {
            return Decision::Denied(DenyReason::SelfRequested);
        }
        if self.delay_ms <= 0 || self.cases.is_empty() {
            return Decision::Denied(DenyReason::BadSpec);
        }
        if !self.cases.contains(&current) {
            return Decision::Denied(DenyReason::NoMatchingCase);
        }
        let Some(candidate) = now.checked_add_signed(Duration::milliseconds(self.delay_ms)) else {
            return Decision::Denied(DenyReason::BadSpec);
        };
        if self.notbetween.iter().any(|w| w.contains(now, candidate)) {
            return Decision::Denied(DenyReason::InsideExclusion);
        }
        if !self.between.is_empty() && !self.between.iter().any(|w| w.contains(now, candidate)) {
            return Decision::Denied(DenyReason::OutsideRequired);
        }
        Decision::Allowed {
            new_start: candidate,
        }
    }
}

/// Evaluates `args` against `record` and, on allow, mutates it in place:
/// start moves to the retry time and the one-shot `rescheduled` flag is set.
/// The caller persists the record before replying.
pub fn reschedule(record: &mut TransferRecord, args: &str, now: NaiveDateTime) -> Decision {
    let spec = RescheduleSpec::parse(args);
    let decision = spec.evaluate(
        record.last_error,
        record.rescheduled,
        record.self_requested,
        now,
    );
    if let Decision::Allowed { new_start } = decision {
        record.start = new_start;
        record.rescheduled = true;
        tracing::info!(
            "transfer {} rescheduled to {new_start}",
            record.key()
        );
    }
    decision
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;
    use pretty_assertions::assert_eq;
    use rstest::rstest;

    fn at(h: u32, m: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2026, 8, 23)
            .unwrap()
            .and_hms_opt(h, m, 0)
            .unwrap()
    }

    const OVERNIGHT_SPEC: &str =
        "-delay 3600000 -case ConnectionImpossible -notbetween H7:m0:S0;H19:m0:S0";

    #[test]
    fn candidate_inside_exclusion_denies() {
        let spec = RescheduleSpec::parse(OVERNIGHT_SPEC);
        let d = spec.evaluate(ErrorCode::ConnectionImpossible, false, false, at(8, 0));
        assert_eq!(d, Decision::Denied(DenyReason::InsideExclusion));
    }

    #[test]
    fn elapsed_window_rolls_to_next_day() {
        let spec = RescheduleSpec::parse(OVERNIGHT_SPEC);
        let d = spec.evaluate(ErrorCode::ConnectionImpossible, false, false, at(20, 0));
        assert_eq!(d, Decision::Allowed { new_start: at(21, 0) });
    }

    #[test]
    fn unmatched_case_denies_without_mutation() {
        let mut record = crate::transfer::tests::sample_record();
        let d = reschedule(
            &mut record,
            "-delay 1000 -case ServerOverloaded -between H1:m0:S0;H3:m0:S0",
            at(2, 0),
        );
        assert_eq!(d, Decision::Denied(DenyReason::NoMatchingCase));
        assert!(!record.rescheduled);
        assert_eq!(record.start, at(8, 0));
    }

    #[test]
    fn allow_mutates_once_only() {
        let mut record = crate::transfer::tests::sample_record();
        let args = "-delay 60000 -case ConnectionImpossible";
        let d = reschedule(&mut record, args, at(10, 0));
        assert_eq!(d, Decision::Allowed { new_start: at(10, 1) });
        assert!(record.rescheduled);
        assert_eq!(record.start, at(10, 1));

        // sticky flag makes the second attempt a no-op
        let d = reschedule(&mut record, args, at(12, 0));
        assert_eq!(d, Decision::Denied(DenyReason::AlreadyRescheduled));
        assert_eq!(record.start, at(10, 1));
    }

    #[test]
    fn self_requested_always_denies() {
        let spec = RescheduleSpec::parse("-delay 1000 -case ConnectionImpossible");
        let d = spec.evaluate(ErrorCode::ConnectionImpossible, false, true, at(10, 0));
        assert_eq!(d, Decision::Denied(DenyReason::SelfRequested));
        assert_eq!(DenyReason::SelfRequested.code(), ErrorCode::LoopSelfRequestedHost);
    }

    #[rstest]
    #[case("")]
    #[case("-delay 0 -case ConnectionImpossible")]
    #[case("-delay -5 -case ConnectionImpossible")]
    #[case("-delay abc -case ConnectionImpossible")]
    #[case("-delay 1000")]
    fn bad_spec_denies(#[case] args: &str) {
        let spec = RescheduleSpec::parse(args);
        let d = spec.evaluate(ErrorCode::ConnectionImpossible, false, false, at(10, 0));
        assert_eq!(d, Decision::Denied(DenyReason::BadSpec));
    }

    #[test]
    fn unresolved_case_tokens_never_match() {
        let spec = RescheduleSpec::parse("-delay 1000 -case Bogus,NoSuch");
        let d = spec.evaluate(ErrorCode::ConnectionImpossible, false, false, at(10, 0));
        assert_eq!(d, Decision::Denied(DenyReason::BadSpec));
    }

    #[test]
    fn wire_char_cases_accepted() {
        let spec = RescheduleSpec::parse("-delay 1000 -case C,l");
        assert_eq!(
            spec.cases,
            vec![ErrorCode::ConnectionImpossible, ErrorCode::ServerOverloaded]
        );
    }

    #[test]
    fn overnight_window_normalizes_like_daytime_complement() {
        // (19:00, 07:00) names the overnight span after the start>end
        // correction, independent of the order the bounds are written in
        let overnight = Window::parse("H19:m0:S0;H7:m0:S0").unwrap();
        assert!(overnight.contains(at(18, 0), at(23, 0)));
        assert!(!overnight.contains(at(8, 0), at(12, 0)));
    }

    #[test]
    fn between_requires_membership() {
        let spec =
            RescheduleSpec::parse("-delay 1000 -case ConnectionImpossible -between H1:m0:S0;H3:m0:S0");
        let d = spec.evaluate(ErrorCode::ConnectionImpossible, false, false, at(2, 0));
        assert!(matches!(d, Decision::Allowed { .. }));
        let d = spec.evaluate(ErrorCode::ConnectionImpossible, false, false, at(4, 0));
        assert_eq!(d, Decision::Denied(DenyReason::OutsideRequired));
    }

    #[test]
    fn multiple_between_windows_or_together() {
        let spec = RescheduleSpec::parse(
            "-delay 1000 -case ConnectionImpossible \
             -between H1:m0:S0;H3:m0:S0 -between H10:m0:S0;H12:m0:S0",
        );
        let d = spec.evaluate(ErrorCode::ConnectionImpossible, false, false, at(11, 0));
        assert!(matches!(d, Decision::Allowed { .. }));
    }

    #[test]
    fn malformed_window_tokens_are_skipped() {
        let spec = RescheduleSpec::parse(
            "-delay 1000 -case ConnectionImpossible -between garbage -notbetween X1;H2",
        );
        assert!(spec.between.is_empty());
        assert!(spec.notbetween.is_empty());
    }

    #[test]
    fn no_windows_allows_at_now_plus_delay() {
        let spec = RescheduleSpec::parse("-delay 3600000 -case ConnectionImpossible");
        let d = spec.evaluate(ErrorCode::ConnectionImpossible, false, false, at(8, 30));
        assert_eq!(d, Decision::Allowed { new_start: at(9, 30) });
    }

    #[test]
    fn relative_field_ops_are_field_aware() {
        // +1 month from Jan 31 clamps within February
        let base = NaiveDate::from_ymd_opt(2026, 1, 31)
            .unwrap()
            .and_hms_opt(12, 0, 0)
            .unwrap();
        let spec = DateSpec::parse("M+1").unwrap();
        let resolved = spec.resolve(base).unwrap();
        assert_eq!(
            resolved.date(),
            NaiveDate::from_ymd_opt(2026, 2, 28).unwrap()
        );
        let spec = DateSpec::parse("D-1:H23").unwrap();
        let resolved = spec.resolve(base).unwrap();
        assert_eq!(
            resolved,
            NaiveDate::from_ymd_opt(2026, 1, 30)
                .unwrap()
                .and_hms_opt(23, 0, 0)
                .unwrap()
        );
    }

    #[test]
    fn open_ended_windows() {
        // unset start: inside while before the end
        let w = Window::parse(";H19:m0:S0").unwrap();
        assert!(w.contains(at(8, 0), at(9, 0)));
        assert!(!w.contains(at(8, 0), at(20, 0)));
        // unset end: inside once past the start
        let w = Window::parse("H19:m0:S0;").unwrap();
        assert!(w.contains(at(8, 0), at(20, 0)));
        assert!(!w.contains(at(8, 0), at(9, 0)));
    }
}
