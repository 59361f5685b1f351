//! Server-wide shared state and settings
// (c) 2025 Consign contributors

use std::collections::HashSet;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, RwLock};
use std::time::Duration;

/// Immutable settings a [`ServerContext`] is built from.
#[derive(Clone, Debug)]
pub struct ContextSettings {
    /// This server's host id
    pub host_id: String,
    /// Host id presented on TLS sessions, when distinct
    pub tls_host_id: Option<String>,
    /// Shared secret authorizing shutdown and block requests
    pub shutdown_key: Vec<u8>,
    /// Directory receiving log and configuration export files
    pub archive_dir: PathBuf,
    /// Grace period before the channel is torn down after a final reply
    pub close_grace: Duration,
    /// Default ceiling on business task execution time
    pub business_timeout: Duration,
    /// Business task classes accepted from remote hosts
    pub business_allowed: Vec<String>,
}

impl Default for ContextSettings {
    fn default() -> Self {
        Self {
            host_id: String::new(),
            tls_host_id: None,
            shutdown_key: Vec::new(),
            archive_dir: PathBuf::from("arch"),
            close_grace: Duration::from_millis(500),
            business_timeout: Duration::from_secs(100),
            business_allowed: Vec::new(),
        }
    }
}

/// Bandwidth ceilings in bytes per second. Zero means unlimited.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
#[allow(missing_docs)]
pub struct BandwidthLimits {
    pub write_global: i64,
    pub read_global: i64,
    pub write_session: i64,
    pub read_session: i64,
}

impl BandwidthLimits {
    /// Applies requested values. A negative request leaves that ceiling
    /// unchanged; accepted values are floored to a multiple of 10.
    pub fn apply(&mut self, write_global: i64, read_global: i64, write_session: i64, read_session: i64) {
        for (slot, requested) in [
            (&mut self.write_global, write_global),
            (&mut self.read_global, read_global),
            (&mut self.write_session, write_session),
            (&mut self.read_session, read_session),
        ] {
            if requested >= 0 {
                *slot = requested / 10 * 10;
            }
        }
    }
}

/// Shared server state, passed by `Arc` to every dispatcher and service.
///
/// Replaces any notion of process-global configuration: everything a control
/// operation needs to consult or mutate lives here.
#[derive(Debug)]
pub struct ServerContext {
    settings: ContextSettings,
    limits: Mutex<BandwidthLimits>,
    blocked: AtomicBool,
    business_allowed: RwLock<HashSet<String>>,
}

impl ServerContext {
    /// Constructor
    #[must_use]
    pub fn new(settings: ContextSettings) -> Self {
        let business_allowed = settings.business_allowed.iter().cloned().collect();
        Self {
            settings,
            limits: Mutex::new(BandwidthLimits::default()),
            blocked: AtomicBool::new(false),
            business_allowed: RwLock::new(business_allowed),
        }
    }

    /// The settings this context was built from.
    #[must_use]
    pub fn settings(&self) -> &ContextSettings {
        &self.settings
    }

    /// The host id this server answers to on the given session flavour.
    /// `None` when a TLS-specific id is required but not configured.
    #[must_use]
    pub fn local_host_id(&self, tls: bool) -> Option<&str> {
        if tls {
            self.settings.tls_host_id.as_deref()
        } else {
            Some(&self.settings.host_id)
        }
    }

    /// Checks a presented shutdown/block secret. An unset key never
    /// validates.
    #[must_use]
    pub fn is_key_valid(&self, key: &[u8]) -> bool {
        !self.settings.shutdown_key.is_empty() && self.settings.shutdown_key == key
    }

    /// Current bandwidth ceilings.
    #[must_use]
    pub fn limits(&self) -> BandwidthLimits {
        *self.limits.lock().unwrap_or_else(std::sync::PoisonError::into_inner)
    }

    /// Updates the bandwidth ceilings; see [`BandwidthLimits::apply`].
    /// Returns the resulting values.
    pub fn apply_limits(
        &self,
        write_global: i64,
        read_global: i64,
        write_session: i64,
        read_session: i64,
    ) -> BandwidthLimits {
        let mut guard = self.limits.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
        guard.apply(write_global, read_global, write_session, read_session);
        *guard
    }

    /// Whether new transfer requests are currently refused.
    #[must_use]
    pub fn is_blocked(&self) -> bool {
        self.blocked.load(Ordering::SeqCst)
    }

    /// Sets the admission block state, returning the previous state.
    pub fn set_blocked(&self, blocked: bool) -> bool {
        self.blocked.swap(blocked, Ordering::SeqCst)
    }

    /// Whether a business task class may be invoked remotely.
    #[must_use]
    pub fn is_business_allowed(&self, class_name: &str) -> bool {
        self.business_allowed
            .read()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .contains(class_name)
    }

    /// Replaces the business task allow-list.
    pub fn set_business_allowed<I: IntoIterator<Item = String>>(&self, classes: I) {
        let mut guard = self
            .business_allowed
            .write()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        *guard = classes.into_iter().collect();
    }
}
