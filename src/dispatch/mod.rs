//! Control packet dispatch
// (c) 2025 Consign contributors
//!
//! One dispatcher handles every control packet a session can receive,
//! consulting the authorization guard and delegating to the focused
//! services. Each dispatch produces at most one reply and a channel
//! lifecycle decision.

mod json;
mod valid;

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use chrono::NaiveDateTime;

use crate::authorize::authorize;
use crate::config::ServerContext;
use crate::error::ProtocolError;
use crate::local::LocalRegistry;
use crate::protocol::{
    ErrorCode, ErrorPacket, InfoQuery, Packet, PacketType, TestPacket, ValidPacket,
};
use crate::services::{BandwidthController, ConfigImportExport, LogExportPurge};
use crate::session::{Role, Session};
use crate::store::{
    BusinessTask, ConstraintMonitor, StoreError, TaskExecutor, TransferEngine, TransferStore,
};
use crate::transfer::{TransferKey, TransferResult, TransferStep};

/// Time format of the optional restart timestamp argument.
pub const RESTART_TIME_FORMAT: &str = "%Y%m%d%H%M%S";

/// What the transport should do after a dispatch.
///
/// `Close` means close after the configured grace period, so the reply
/// frame can flush first.
#[derive(Clone, Debug, PartialEq)]
pub enum Verdict {
    /// No reply; keep the channel open.
    Continue,
    /// Send a reply; keep the channel open.
    Reply(Packet),
    /// Send the reply if present, then close after the grace period.
    Close(Option<Packet>),
    /// Send the reply if present, then unwind the whole server.
    Shutdown {
        /// Reply to flush before unwinding
        reply: Option<Packet>,
        /// Whether to restart the process afterwards
        restart: bool,
    },
}

/// The control-plane dispatcher.
pub struct ActionDispatcher {
    ctx: Arc<ServerContext>,
    transfers: Arc<dyn TransferStore>,
    engine: Arc<dyn TransferEngine>,
    monitor: Arc<dyn ConstraintMonitor>,
    registry: Arc<LocalRegistry>,
    executor: Arc<dyn TaskExecutor>,
    bandwidth: BandwidthController,
    logs: LogExportPurge,
    config: ConfigImportExport,
}

impl std::fmt::Debug for ActionDispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ActionDispatcher").finish_non_exhaustive()
    }
}

/// Everything an [`ActionDispatcher`] is wired to.
pub struct DispatcherParts {
    /// Shared server state
    pub ctx: Arc<ServerContext>,
    /// Transfer record store
    pub transfers: Arc<dyn TransferStore>,
    /// Configuration document store
    pub documents: Arc<dyn crate::store::DocumentStore>,
    /// Data-plane relaunch hook
    pub engine: Arc<dyn TransferEngine>,
    /// Load feedback for restart admission
    pub monitor: Arc<dyn ConstraintMonitor>,
    /// Live transfer channels
    pub registry: Arc<LocalRegistry>,
    /// Operator notification
    pub notify: Arc<dyn crate::store::NotificationSink>,
    /// Business task executor
    pub executor: Arc<dyn TaskExecutor>,
}

impl std::fmt::Debug for DispatcherParts {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DispatcherParts").finish_non_exhaustive()
    }
}

impl ActionDispatcher {
    /// Builds a dispatcher and its services from their shared parts.
    #[must_use]
    pub fn new(parts: DispatcherParts) -> Self {
        let settings = parts.ctx.settings();
        let archive_dir = settings.archive_dir.clone();
        let host_id = settings.host_id.clone();
        Self {
            bandwidth: BandwidthController::new(Arc::clone(&parts.ctx), parts.notify),
            logs: LogExportPurge::new(Arc::clone(&parts.transfers), archive_dir.clone(), &host_id),
            config: ConfigImportExport::new(
                parts.documents,
                Arc::clone(&parts.transfers),
                archive_dir,
                &host_id,
            ),
            ctx: parts.ctx,
            transfers: parts.transfers,
            engine: parts.engine,
            monitor: parts.monitor,
            registry: parts.registry,
            executor: parts.executor,
        }
    }

    /// Handles one decoded packet for `session`.
    ///
    /// Failures turn into an Error reply and a close, except missing
    /// authentication which closes silently.
    pub async fn handle(&self, session: &mut Session, packet: Packet) -> Verdict {
        match self.dispatch(session, packet).await {
            Ok(verdict) => verdict,
            Err(ProtocolError::NotAuthenticated) => {
                tracing::warn!("unauthenticated control packet refused");
                session.set_phase(crate::session::Phase::Error);
                Verdict::Close(None)
            }
            Err(e) => {
                tracing::warn!("control packet failed: {e}");
                session.set_phase(crate::session::Phase::Error);
                session.set_status(e.code().code() as u32);
                Verdict::Close(Some(Packet::Error(ErrorPacket {
                    message: e.to_string(),
                    code: e.code(),
                })))
            }
        }
    }

    async fn dispatch(
        &self,
        session: &mut Session,
        packet: Packet,
    ) -> Result<Verdict, ProtocolError> {
        match packet {
            Packet::Test(p) => self.handle_test(session, p),
            Packet::Error(p) => Ok(Self::handle_error(session, &p)),
            Packet::Valid(p) => self.handle_valid(session, p).await,
            Packet::Json(p) => self.handle_json(session, p).await,
            Packet::Information(p) => {
                require_authenticated(session)?;
                self.handle_information(session, &p.query).await
            }
            Packet::BusinessRequest(p) => {
                require_authenticated(session)?;
                Ok(self
                    .run_business(
                        session,
                        &p.spec,
                        String::new(),
                        p.delay_ms,
                        p.to_apply,
                    )
                    .await)
            }
            Packet::BlockRequest(p) => {
                self.toggle_block(session, &p.key, p.block)?;
                Ok(Verdict::Close(Some(Packet::Valid(ValidPacket {
                    subtype: PacketType::BlockRequest,
                    header: format!("block set to {}", p.block),
                    middle: ErrorCode::CompleteOk.code().to_string(),
                }))))
            }
            Packet::Bulk(p) => {
                // data-plane kinds are not ours; the session continues
                tracing::debug!("ignoring bulk packet kind {}", p.kind);
                Ok(Verdict::Continue)
            }
        }
    }

    fn handle_test(
        &self,
        session: &mut Session,
        mut packet: TestPacket,
    ) -> Result<Verdict, ProtocolError> {
        require_authenticated(session)?;
        if packet.is_final() {
            let host = self
                .ctx
                .local_host_id(session.is_tls())
                .unwrap_or_default()
                .to_owned();
            Ok(Verdict::Close(Some(Packet::Valid(ValidPacket {
                subtype: PacketType::Test,
                header: host,
                middle: packet.message,
            }))))
        } else {
            packet.update();
            Ok(Verdict::Reply(Packet::Test(packet)))
        }
    }

    /// A peer-reported error settles the pending outcome and ends the
    /// exchange.
    fn handle_error(session: &mut Session, packet: &ErrorPacket) -> Verdict {
        tracing::info!("peer reported error {}: {}", packet.code, packet.message);
        let _ = session.settle(TransferResult::new(false, packet.code));
        Verdict::Close(None)
    }

    /// Stop or cancel one transfer.
    ///
    /// A live local handler takes priority: the terminal code is injected
    /// straight into its inbox so the abort cannot race a network
    /// round-trip. Only when no handler is live does the persisted record
    /// get touched directly.
    async fn stop_or_cancel(
        &self,
        session: &mut Session,
        key: &TransferKey,
        stop: bool,
    ) -> Result<TransferResult, ProtocolError> {
        let code = if stop {
            ErrorCode::StoppedTransfer
        } else {
            ErrorCode::CanceledTransfer
        };
        if let Some(handle) = self.registry.find(key) {
            let message = if stop {
                format!("{} {}", code.code(), handle.rank())
            } else {
                code.code().to_string()
            };
            if handle.inject(Packet::Error(ErrorPacket { message, code })) {
                tracing::info!("{code} injected into live transfer {key}");
                let result = TransferResult::with_record(true, ErrorCode::CompleteOk, handle.record());
                let _ = session.settle(result.clone());
                return Ok(result);
            }
            // the handler went away between lookup and injection
            self.registry.unregister(key);
        }
        let mut record = self.transfers.load(key).await.map_err(not_found_to_nodata)?;
        let result = if record.is_finished() {
            TransferResult::with_record(true, ErrorCode::TransferOk, record)
        } else {
            record.last_error = code;
            record.step = TransferStep::Error;
            record.in_transfer = false;
            self.transfers.save(&record).await?;
            TransferResult::with_record(true, ErrorCode::CompleteOk, record)
        };
        let _ = session.settle(result.clone());
        Ok(result)
    }

    /// Restart a prepared transfer, shedding load before any lookup.
    async fn restart(
        &self,
        key: &TransferKey,
        restart_time: Option<NaiveDateTime>,
    ) -> Result<TransferResult, ProtocolError> {
        if self.monitor.overloaded() {
            tracing::info!("restart of {key} refused, server overloaded");
            return Ok(TransferResult::new(false, ErrorCode::ServerOverloaded));
        }
        let mut record = self.transfers.load(key).await.map_err(not_found_to_nodata)?;
        if let Some(start) = restart_time {
            record.start = start;
        }
        record.step = TransferStep::NoTask;
        record.in_transfer = false;
        match self.engine.relaunch(&record).await {
            Ok(()) => {
                self.transfers.save(&record).await?;
                Ok(TransferResult::with_record(
                    true,
                    ErrorCode::PreProcessingOk,
                    record,
                ))
            }
            Err(e) => {
                tracing::warn!("relaunch of {key} failed: {e}");
                Ok(TransferResult::with_record(
                    false,
                    ErrorCode::Internal,
                    record,
                ))
            }
        }
    }

    async fn handle_information(
        &self,
        session: &Session,
        query: &InfoQuery,
    ) -> Result<Verdict, ProtocolError> {
        let header = match query {
            InfoQuery::TransferById { id, to_requested } => {
                let key = self.transfer_key_for(session, *id, *to_requested)?;
                let record = self
                    .transfers
                    .load(&key)
                    .await
                    .map_err(not_found_to_nodata)?;
                record.short_string()
            }
            InfoQuery::List { rule, pattern } => self.list_files(rule, pattern, false)?,
            InfoQuery::ListDetail { rule, pattern } => self.list_files(rule, pattern, true)?,
            InfoQuery::Exists { rule, filename } => {
                let path = self.rule_path(rule, filename)?;
                format!("{} {}", filename, if path.exists() { "exists" } else { "not-found" })
            }
            InfoQuery::Detail { rule, filename } => {
                let path = self.rule_path(rule, filename)?;
                describe_file(&path)
                    .ok_or_else(|| ProtocolError::NoData(format!("no such file {filename}")))?
            }
        };
        Ok(Verdict::Close(Some(Packet::Valid(ValidPacket {
            subtype: PacketType::Information,
            header,
            middle: String::new(),
        }))))
    }

    /// Resolves an id-only query to a full key using the session peer and
    /// our own identity.
    fn transfer_key_for(
        &self,
        session: &Session,
        id: i64,
        to_requested: bool,
    ) -> Result<TransferKey, ProtocolError> {
        let peer = session
            .identity()
            .ok_or(ProtocolError::NotAuthenticated)?
            .to_owned();
        let local = self
            .ctx
            .local_host_id(session.is_tls())
            .ok_or_else(|| ProtocolError::System("local host id unresolved".into()))?
            .to_owned();
        Ok(if to_requested {
            TransferKey::new(local, peer, id)
        } else {
            TransferKey::new(peer, local, id)
        })
    }

    fn rule_path(&self, rule: &str, filename: &str) -> Result<std::path::PathBuf, ProtocolError> {
        let dir = self
            .config
            .rule_directory(rule)
            .map_err(ProtocolError::Store)?;
        Ok(dir.join(filename))
    }

    fn list_files(&self, rule: &str, pattern: &str, detail: bool) -> Result<String, ProtocolError> {
        let dir = self
            .config
            .rule_directory(rule)
            .map_err(ProtocolError::Store)?;
        let full = dir.join(pattern);
        let paths = glob::glob(&full.to_string_lossy())
            .map_err(|e| ProtocolError::PacketFormat(format!("bad pattern {pattern:?}: {e}")))?;
        let mut lines = Vec::new();
        for entry in paths {
            let Ok(path) = entry else { continue };
            if detail {
                if let Some(line) = describe_file(&path) {
                    lines.push(line);
                }
            } else if let Some(name) = path.file_name() {
                lines.push(name.to_string_lossy().into_owned());
            }
        }
        Ok(lines.join("\n"))
    }

    /// Runs a business task inline. The channel stays open either way; a
    /// failure is reported only if the request was not already answered
    /// through another path.
    async fn run_business(
        &self,
        session: &mut Session,
        spec: &str,
        extra_arguments: String,
        delay_ms: u64,
        to_apply: bool,
    ) -> Verdict {
        let (class_name, arguments) = match spec.split_once(' ') {
            Some((c, a)) => (c.to_owned(), a.to_owned()),
            None => (spec.to_owned(), String::new()),
        };
        let outcome = self
            .run_business_inner(session, class_name, arguments, extra_arguments, delay_ms, to_apply)
            .await;
        match outcome {
            Ok(()) => Verdict::Continue,
            Err(e) => {
                let answered = session.outcome().is_some_and(|o| o.answered);
                let _ = session.settle(TransferResult::new(false, e.code()));
                if answered {
                    Verdict::Continue
                } else {
                    Verdict::Reply(Packet::Error(ErrorPacket {
                        message: e.to_string(),
                        code: e.code(),
                    }))
                }
            }
        }
    }

    async fn run_business_inner(
        &self,
        session: &Session,
        class_name: String,
        arguments: String,
        extra_arguments: String,
        delay_ms: u64,
        to_apply: bool,
    ) -> Result<(), ProtocolError> {
        if !self.ctx.is_business_allowed(&class_name) {
            return Err(ProtocolError::Business(format!(
                "business task {class_name} not allowed"
            )));
        }
        if !to_apply {
            // already applied on the peer; nothing to run here
            return Ok(());
        }
        let budget = if delay_ms == 0 {
            self.ctx.settings().business_timeout
        } else {
            Duration::from_millis(delay_ms)
        };
        let task = BusinessTask {
            class_name: class_name.clone(),
            arguments,
            extra_arguments,
            delay_ms: budget.as_millis().try_into().unwrap_or(u64::MAX),
        };
        tracing::info!(
            "running business task {class_name} for {}",
            session.identity().unwrap_or("?")
        );
        tokio::time::timeout(budget, self.executor.run(task))
            .await
            .map_err(|_| ProtocolError::Business(format!("business task {class_name} timed out")))?
    }

    /// Flips the global admission block. Gated on the System role and the
    /// shared secret, both.
    fn toggle_block(
        &self,
        session: &Session,
        key: &[u8],
        block: bool,
    ) -> Result<(), ProtocolError> {
        authorize(&self.ctx, session, Role::System)?;
        if !self.ctx.is_key_valid(key) {
            return Err(ProtocolError::Business("block request key rejected".into()));
        }
        let was = self.ctx.set_blocked(block);
        tracing::warn!("admission block {} (was {})", block, was);
        Ok(())
    }

    /// Orderly shutdown requested with a known-good key. Saves the live
    /// rank of the session's transfer, if any, so the peer can resume.
    async fn shutdown_request(
        &self,
        session: &mut Session,
        peer_rank: Option<i64>,
        restart: bool,
    ) -> Result<Verdict, ProtocolError> {
        let reply = match session.runner().cloned() {
            Some(mut record) => {
                if let Some(peer_rank) = peer_rank {
                    // the receiver's view is authoritative when lower
                    if let Ok(r) = u32::try_from(peer_rank) {
                        record.rank = record.rank.min(r);
                    }
                }
                record.last_error = ErrorCode::Shutdown;
                self.transfers.save(&record).await?;
                let reply = ValidPacket {
                    subtype: PacketType::Shutdown,
                    header: record.rank.to_string(),
                    middle: ErrorCode::Shutdown.code().to_string(),
                };
                session.set_runner(record);
                Some(Packet::Valid(reply))
            }
            None => None,
        };
        tracing::warn!("shutdown requested (restart={restart})");
        session.set_phase(crate::session::Phase::Closing);
        Ok(Verdict::Shutdown { reply, restart })
    }
}

fn require_authenticated(session: &Session) -> Result<(), ProtocolError> {
    if session.is_authenticated() {
        Ok(())
    } else {
        Err(ProtocolError::NotAuthenticated)
    }
}

fn not_found_to_nodata(e: StoreError) -> ProtocolError {
    match e {
        StoreError::NotFound(key) => ProtocolError::NoData(key.to_string()),
        other => ProtocolError::Store(other),
    }
}

fn describe_file(path: &Path) -> Option<String> {
    let meta = std::fs::metadata(path).ok()?;
    let name = path.file_name()?.to_string_lossy().into_owned();
    let modified = meta
        .modified()
        .ok()
        .map(chrono::DateTime::<chrono::Utc>::from)
        .map(|t| t.format("%Y-%m-%d %H:%M:%S").to_string())
        .unwrap_or_default();
    Some(format!("{name} {} {modified}", meta.len()))
}
