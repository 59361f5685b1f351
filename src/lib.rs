// (c) 2025 Consign contributors

//! Consign is the control-plane core of a managed, resumable file-transfer
//! protocol: two hosts hold a persistent, authenticated, bidirectional
//! connection over which typed control packets flow alongside the bulk
//! data kinds.
//!
//! ## Overview
//! - [protocol] decodes type-byte framed packets ([`protocol::PacketCodec`])
//!   and the typed JSON command documents the newer surface uses
//! - [dispatch] is the heart: [`dispatch::ActionDispatcher`] authenticates
//!   and authorizes each packet, mutates session and transfer state,
//!   produces at most one reply, and decides the channel lifecycle
//! - [reschedule] is the stand-alone retry algorithm: given a failed
//!   transfer's error code and a spec of trigger codes and recurring
//!   time-of-day windows, it decides whether and when to retry
//! - [services] holds the focused operations the dispatcher delegates to:
//!   bandwidth ceilings, log export and purge, configuration import/export
//! - [store] defines the seams an embedding server implements: the record
//!   and document stores, the data-plane engine, the business executor
//!
//! The crate deliberately contains no transport: an embedding server feeds
//! decoded frames in and acts on the returned [`dispatch::Verdict`].

pub mod authorize;
pub mod config;
pub mod dispatch;
pub mod error;
pub mod local;
pub mod protocol;
pub mod reschedule;
pub mod services;
pub mod session;
pub mod store;
pub mod transfer;
pub mod util;
