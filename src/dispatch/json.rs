//! Typed JSON command operations
// (c) 2025 Consign contributors
//!
//! The structured counterpart of the legacy Valid path: the node type
//! carried in the document selects the operation, so arguments arrive
//! already parsed.

use chrono::NaiveDateTime;

use super::{require_authenticated, ActionDispatcher, Verdict, RESTART_TIME_FORMAT};
use crate::authorize::authorize;
use crate::error::ProtocolError;
use crate::protocol::{
    ErrorCode, InfoQuery, JsonBody, JsonCommandPacket, Packet, PacketType, RestartNode,
    StopOrCancelNode,
};
use crate::session::{Role, Session};
use crate::transfer::{TransferKey, TransferResult};

fn json_reply(subtype: PacketType, code: ErrorCode, body: JsonBody) -> Verdict {
    Verdict::Close(Some(Packet::Json(JsonCommandPacket {
        subtype,
        code: Some(code),
        body,
    })))
}

fn key_from(
    requested: Option<&str>,
    requester: Option<&str>,
    special_id: Option<i64>,
) -> Result<TransferKey, ProtocolError> {
    match (requested, requester, special_id) {
        (Some(requested), Some(requester), Some(id)) => {
            Ok(TransferKey::new(requested.to_owned(), requester.to_owned(), id))
        }
        _ => Err(ProtocolError::PacketFormat(
            "transfer reference needs requested, requester and id".into(),
        )),
    }
}

impl ActionDispatcher {
    pub(super) async fn handle_json(
        &self,
        session: &mut Session,
        packet: JsonCommandPacket,
    ) -> Result<Verdict, ProtocolError> {
        let subtype = packet.subtype;
        match packet.body {
            JsonBody::Bandwidth(node) => {
                if node.setter {
                    authorize(&self.ctx, session, Role::Limit)?;
                } else {
                    require_authenticated(session)?;
                }
                let who = session.identity().unwrap_or("?").to_owned();
                let reply = self.bandwidth.handle(&node, &who);
                Ok(json_reply(
                    subtype,
                    ErrorCode::CompleteOk,
                    JsonBody::Bandwidth(reply),
                ))
            }
            JsonBody::Log(node) => {
                authorize(&self.ctx, session, Role::LogControl)?;
                let reply = self.logs.handle(&node).await?;
                Ok(json_reply(
                    subtype,
                    ErrorCode::CompleteOk,
                    JsonBody::LogResponse(reply),
                ))
            }
            JsonBody::ConfigExport(node) => {
                authorize(&self.ctx, session, Role::ConfigAdmin)?;
                let reply = self.config.export(&node).await;
                Ok(json_reply(
                    subtype,
                    ErrorCode::CompleteOk,
                    JsonBody::ConfigExportResponse(reply),
                ))
            }
            JsonBody::ConfigImport(node) => {
                authorize(&self.ctx, session, Role::ConfigAdmin)?;
                let reply = self.config.import(&node).await;
                Ok(json_reply(
                    subtype,
                    ErrorCode::CompleteOk,
                    JsonBody::ConfigImportResponse(reply),
                ))
            }
            JsonBody::StopOrCancel(node) => {
                authorize(&self.ctx, session, Role::System)?;
                let key = key_from(
                    node.requested.as_deref(),
                    node.requester.as_deref(),
                    node.special_id,
                )?;
                let stop = subtype == PacketType::Stop;
                let result = self.stop_or_cancel(session, &key, stop).await?;
                Ok(json_reply(
                    subtype,
                    result.code,
                    JsonBody::StopOrCancel(StopOrCancelNode {
                        requested: node.requested,
                        requester: node.requester,
                        special_id: node.special_id,
                    }),
                ))
            }
            JsonBody::Restart(node) => {
                authorize(&self.ctx, session, Role::Transfer)?;
                let key = key_from(
                    node.requested.as_deref(),
                    node.requester.as_deref(),
                    node.special_id,
                )?;
                let restart_time = node.restart_time.as_deref().and_then(|t| {
                    let parsed = NaiveDateTime::parse_from_str(t, RESTART_TIME_FORMAT).ok();
                    if parsed.is_none() {
                        tracing::debug!("ignoring unparseable restart time {t:?}");
                    }
                    parsed
                });
                let result = self.restart(&key, restart_time).await?;
                let _ = session.settle(result.clone());
                Ok(json_reply(
                    subtype,
                    result.code,
                    JsonBody::Restart(RestartNode {
                        requested: node.requested,
                        requester: node.requester,
                        special_id: node.special_id,
                        restart_time: node.restart_time,
                    }),
                ))
            }
            JsonBody::Information(node) => {
                require_authenticated(session)?;
                let query = if node.id_request {
                    InfoQuery::TransferById {
                        id: node.id,
                        to_requested: node.to_requested,
                    }
                } else {
                    match node.request {
                        0 => InfoQuery::List {
                            rule: node.rule,
                            pattern: node.filename,
                        },
                        1 => InfoQuery::ListDetail {
                            rule: node.rule,
                            pattern: node.filename,
                        },
                        2 => InfoQuery::Exists {
                            rule: node.rule,
                            filename: node.filename,
                        },
                        3 => InfoQuery::Detail {
                            rule: node.rule,
                            filename: node.filename,
                        },
                        other => {
                            return Err(ProtocolError::PacketFormat(format!(
                                "bad information request selector {other}"
                            )))
                        }
                    }
                };
                self.handle_information(session, &query).await
            }
            JsonBody::ShutdownOrBlock(node) => {
                if node.shutdown {
                    authorize(&self.ctx, session, Role::System)?;
                    if !self.ctx.is_key_valid(&node.key) {
                        return Err(ProtocolError::Business("shutdown key rejected".into()));
                    }
                    self.shutdown_request(session, None, node.restart_or_block)
                        .await
                } else {
                    self.toggle_block(session, &node.key, node.restart_or_block)?;
                    Ok(json_reply(
                        subtype,
                        ErrorCode::CompleteOk,
                        JsonBody::ShutdownOrBlock(crate::protocol::ShutdownOrBlockNode {
                            key: Vec::new(),
                            shutdown: false,
                            restart_or_block: node.restart_or_block,
                            comment: Some(format!(
                                "block set to {}",
                                node.restart_or_block
                            )),
                        }),
                    ))
                }
            }
            JsonBody::ShutdownRequest(node) => {
                authorize(&self.ctx, session, Role::System)?;
                if !self.ctx.is_key_valid(&node.key) {
                    return Err(ProtocolError::Business("shutdown key rejected".into()));
                }
                let peer_rank = (node.rank >= 0).then_some(node.rank);
                self.shutdown_request(session, peer_rank, node.restart).await
            }
            JsonBody::BusinessRequest(node) => {
                require_authenticated(session)?;
                let spec = match &node.arguments {
                    Some(args) => format!("{} {args}", node.class_name),
                    None => node.class_name.clone(),
                };
                Ok(self
                    .run_business(
                        session,
                        &spec,
                        node.extra_arguments.unwrap_or_default(),
                        node.delay,
                        node.to_applied,
                    )
                    .await)
            }
            JsonBody::LogResponse(_)
            | JsonBody::ConfigExportResponse(_)
            | JsonBody::ConfigImportResponse(_) => {
                // a reply to a request we issued; settle and end the exchange
                let code = packet.code.unwrap_or(ErrorCode::CompleteOk);
                let _ = session.settle(TransferResult::new(code.is_success(), code));
                Ok(Verdict::Close(None))
            }
            JsonBody::Comment(node) => {
                tracing::info!("peer comment: {}", node.comment);
                Ok(Verdict::Continue)
            }
        }
    }
}
