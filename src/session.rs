//! Per-connection session state
// (c) 2025 Consign contributors

use std::collections::HashSet;

use crate::transfer::{TransferRecord, TransferResult};

/// Privileges a remote host may hold on this server.
#[derive(
    Clone, Copy, Debug, Eq, PartialEq, Hash, strum::Display, strum::EnumIter, strum::EnumString,
)]
#[strum(ascii_case_insensitive)]
pub enum Role {
    /// Full administrative control, including shutdown and block
    System,
    /// Start, stop, cancel and restart transfers
    Transfer,
    /// Export and purge the transfer log
    LogControl,
    /// Import and export server configuration
    ConfigAdmin,
    /// Change bandwidth ceilings
    Limit,
}

/// The set of roles granted to a session's peer.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct RoleSet(HashSet<Role>);

impl RoleSet {
    /// The empty set.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Grants a role.
    pub fn grant(&mut self, role: Role) {
        let _ = self.0.insert(role);
    }

    /// Whether the set contains `role`. `System` implies every other role.
    #[must_use]
    pub fn contains(&self, role: Role) -> bool {
        self.0.contains(&role) || self.0.contains(&Role::System)
    }
}

impl FromIterator<Role> for RoleSet {
    fn from_iter<T: IntoIterator<Item = Role>>(iter: T) -> Self {
        Self(iter.into_iter().collect())
    }
}

/// Last significant state a session passed through. Diagnostic only,
/// never a gate.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, strum::Display)]
#[allow(missing_docs)]
pub enum Phase {
    #[default]
    Startup,
    Authenticated,
    Request,
    Transfer,
    Closing,
    Error,
}

/// State of one control-channel connection.
///
/// The outcome slot settles once: the first result recorded for the current
/// request wins and later attempts are ignored, so a late error cannot
/// overwrite a success already reported to the peer.
#[derive(Clone, Debug, Default)]
pub struct Session {
    authenticated: bool,
    identity: Option<String>,
    tls: bool,
    roles: RoleSet,
    phase: Phase,
    status: u32,
    runner: Option<TransferRecord>,
    outcome: Option<TransferResult>,
}

impl Session {
    /// A fresh, unauthenticated session.
    #[must_use]
    pub fn new(tls: bool) -> Self {
        Self {
            tls,
            ..Self::default()
        }
    }

    /// Marks the session authenticated as `identity` with `roles`.
    pub fn authenticate(&mut self, identity: &str, roles: RoleSet) {
        self.authenticated = true;
        self.identity = Some(identity.to_owned());
        self.roles = roles;
        self.phase = Phase::Authenticated;
    }

    /// The last significant state the session passed through.
    #[must_use]
    pub fn phase(&self) -> Phase {
        self.phase
    }

    /// Records the session's phase, for diagnostics.
    pub fn set_phase(&mut self, phase: Phase) {
        self.phase = phase;
    }

    /// Free-form numeric marker identifying where in the code the session
    /// last changed state; surfaces in logs only.
    #[must_use]
    pub fn status(&self) -> u32 {
        self.status
    }

    /// See [`Session::status`].
    pub fn set_status(&mut self, status: u32) {
        self.status = status;
    }

    /// Whether authentication has completed.
    #[must_use]
    pub fn is_authenticated(&self) -> bool {
        self.authenticated
    }

    /// The authenticated peer host id, if any.
    #[must_use]
    pub fn identity(&self) -> Option<&str> {
        self.identity.as_deref()
    }

    /// Whether this session runs over TLS.
    #[must_use]
    pub fn is_tls(&self) -> bool {
        self.tls
    }

    /// The peer's granted roles.
    #[must_use]
    pub fn roles(&self) -> &RoleSet {
        &self.roles
    }

    /// The transfer this session is currently driving, if any.
    #[must_use]
    pub fn runner(&self) -> Option<&TransferRecord> {
        self.runner.as_ref()
    }

    /// Attaches a transfer record to the session.
    pub fn set_runner(&mut self, record: TransferRecord) {
        self.runner = Some(record);
    }

    /// Records the request outcome. Returns `true` if this call settled the
    /// slot, `false` if an earlier outcome already had.
    pub fn settle(&mut self, result: TransferResult) -> bool {
        if self.outcome.is_some() {
            return false;
        }
        self.outcome = Some(result);
        true
    }

    /// The settled outcome, if any.
    #[must_use]
    pub fn outcome(&self) -> Option<&TransferResult> {
        self.outcome.as_ref()
    }

    /// Clears the outcome slot ahead of the next request on this channel.
    pub fn reset_outcome(&mut self) {
        self.outcome = None;
    }
}
