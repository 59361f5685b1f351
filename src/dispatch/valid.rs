//! Legacy Valid-packet operations
// (c) 2025 Consign contributors
//!
//! The legacy control surface multiplexes operations over one packet shape:
//! the subtype selects the operation and the two string channels carry
//! space-joined arguments.

use chrono::NaiveDateTime;

use super::{ActionDispatcher, Verdict, RESTART_TIME_FORMAT};
use crate::authorize::authorize;
use crate::error::ProtocolError;
use crate::protocol::{
    ConfigExportNode, ConfigImportNode, ErrorCode, LogNode, Packet, PacketType, ValidPacket,
};
use crate::session::{Role, Session};
use crate::transfer::{TransferKey, TransferResult};

fn valid_reply(subtype: PacketType, header: String, code: ErrorCode) -> Verdict {
    Verdict::Close(Some(Packet::Valid(ValidPacket {
        subtype,
        header,
        middle: code.code().to_string(),
    })))
}

fn request_key(packet: &ValidPacket) -> Result<(TransferKey, Option<String>), ProtocolError> {
    let reference = packet.request_ref().ok_or_else(|| {
        ProtocolError::PacketFormat(format!(
            "{} needs requested, requester and id",
            packet.subtype
        ))
    })?;
    Ok((
        TransferKey::new(reference.requested, reference.requester, reference.special_id),
        reference.restart_time,
    ))
}

impl ActionDispatcher {
    pub(super) async fn handle_valid(
        &self,
        session: &mut Session,
        packet: ValidPacket,
    ) -> Result<Verdict, ProtocolError> {
        match packet.subtype {
            PacketType::Shutdown => {
                // needs no authentication; the key was checked at decode time
                let peer_rank = packet.middle.trim().parse::<i64>().ok().filter(|r| *r >= 0);
                self.shutdown_request(session, peer_rank, false).await
            }
            PacketType::Stop | PacketType::Cancel => {
                authorize(&self.ctx, session, Role::System)?;
                let stop = packet.subtype == PacketType::Stop;
                let (key, _) = request_key(&packet)?;
                let result = self.stop_or_cancel(session, &key, stop).await?;
                Ok(valid_reply(
                    PacketType::RequestUser,
                    packet.middle,
                    result.code,
                ))
            }
            PacketType::Valid => {
                authorize(&self.ctx, session, Role::Transfer)?;
                let (key, restart_time) = request_key(&packet)?;
                let restart_time = restart_time.and_then(|t| {
                    let parsed = NaiveDateTime::parse_from_str(&t, RESTART_TIME_FORMAT).ok();
                    if parsed.is_none() {
                        tracing::debug!("ignoring unparseable restart time {t:?}");
                    }
                    parsed
                });
                let result = self.restart(&key, restart_time).await?;
                let _ = session.settle(result.clone());
                Ok(valid_reply(
                    PacketType::RequestUser,
                    packet.middle,
                    result.code,
                ))
            }
            PacketType::RequestUser => {
                // the peer reports the final outcome of a request we made;
                // the echoed request sits in the header, the code in the middle
                let code = packet
                    .middle
                    .chars()
                    .next()
                    .map(ErrorCode::from_code)
                    .unwrap_or(ErrorCode::Unknown);
                let _ = session.settle(TransferResult::new(code.is_success(), code));
                Ok(Verdict::Close(None))
            }
            PacketType::Log | PacketType::LogPurge => {
                authorize(&self.ctx, session, Role::LogControl)?;
                let purge = packet.subtype == PacketType::LogPurge;
                let reply = self
                    .logs
                    .handle(&LogNode {
                        purge,
                        clean: purge,
                        ..LogNode::default()
                    })
                    .await?;
                Ok(valid_reply(
                    PacketType::Log,
                    format!("{} {} {}", reply.filename, reply.exported, reply.purged),
                    ErrorCode::CompleteOk,
                ))
            }
            PacketType::ConfExport => {
                authorize(&self.ctx, session, Role::ConfigAdmin)?;
                let mut flags = packet.header.split_whitespace().map(|t| t == "1");
                let host = flags.next().unwrap_or(true);
                let rule = flags.next().unwrap_or(true);
                let reply = self
                    .config
                    .export(&ConfigExportNode {
                        host,
                        rule,
                        ..ConfigExportNode::default()
                    })
                    .await;
                Ok(valid_reply(
                    packet.subtype,
                    format!(
                        "{} {}",
                        reply.file_host.as_deref().unwrap_or("-"),
                        reply.file_rule.as_deref().unwrap_or("-")
                    ),
                    ErrorCode::CompleteOk,
                ))
            }
            PacketType::ConfImport => {
                authorize(&self.ctx, session, Role::ConfigAdmin)?;
                let mut flags = packet.header.split_whitespace().map(|t| t == "1");
                let purge_host = flags.next().unwrap_or(false);
                let purge_rule = flags.next().unwrap_or(false);
                let mut paths = packet.middle.split_whitespace();
                let host = paths.next().filter(|p| *p != "-").map(str::to_owned);
                let rule = paths.next().filter(|p| *p != "-").map(str::to_owned);
                let reply = self
                    .config
                    .import(&ConfigImportNode {
                        purge_host,
                        purge_rule,
                        host,
                        rule,
                        ..ConfigImportNode::default()
                    })
                    .await;
                Ok(valid_reply(
                    packet.subtype,
                    format!(
                        "host purged={} imported={} rule purged={} imported={}",
                        reply.purged_host,
                        reply.imported_host,
                        reply.purged_rule,
                        reply.imported_rule
                    ),
                    ErrorCode::CompleteOk,
                ))
            }
            PacketType::Bandwidth => {
                let mut values = packet.header.split_whitespace().map(str::parse::<i64>);
                let requested: Option<(i64, i64, i64, i64)> = match (
                    values.next(),
                    values.next(),
                    values.next(),
                    values.next(),
                ) {
                    (Some(Ok(a)), Some(Ok(b)), Some(Ok(c)), Some(Ok(d))) => Some((a, b, c, d)),
                    (None, ..) => None,
                    _ => {
                        return Err(ProtocolError::PacketFormat(
                            "bandwidth needs four numeric limits".into(),
                        ))
                    }
                };
                let node = match requested {
                    Some((write_global, read_global, write_session, read_session)) => {
                        authorize(&self.ctx, session, Role::Limit)?;
                        crate::protocol::BandwidthNode {
                            setter: true,
                            write_global,
                            read_global,
                            write_session,
                            read_session,
                        }
                    }
                    None => {
                        // reads need no role, only an authenticated peer
                        super::require_authenticated(session)?;
                        crate::protocol::BandwidthNode::default()
                    }
                };
                let who = session.identity().unwrap_or("?").to_owned();
                let reply = self.bandwidth.handle(&node, &who);
                Ok(valid_reply(
                    packet.subtype,
                    format!(
                        "{} {} {} {}",
                        reply.write_global,
                        reply.read_global,
                        reply.write_session,
                        reply.read_session
                    ),
                    ErrorCode::CompleteOk,
                ))
            }
            PacketType::Test => {
                // final ping-pong ack coming back to us
                tracing::info!("test exchange completed: {}", packet.middle);
                let _ = session.settle(TransferResult::new(true, ErrorCode::CompleteOk));
                Ok(Verdict::Close(None))
            }
            other => {
                tracing::warn!("ignoring valid packet with subtype {other}");
                Ok(Verdict::Continue)
            }
        }
    }
}
