//! Control packet definitions and the type-byte codec
// (c) 2025 Consign contributors

use bytes::{Buf, BufMut, Bytes, BytesMut};
use std::sync::Arc;

use super::error_code::ErrorCode;
use super::json::JsonBody;
use crate::config::ServerContext;

/// Number of ping-pong exchanges before a Test packet is echoed back as a
/// Valid reply and the channel closed.
pub const TEST_ECHO_THRESHOLD: u32 = 100;

/// The closed table of control packet kinds.
///
/// Bytes 0..=9 are the legacy kinds; the rest are extended kinds. Some of
/// the extended kinds never appear as a leading type byte, only as the
/// subtype of a [`ValidPacket`] or [`JsonCommandPacket`].
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
    strum::FromRepr,
)]
#[repr(u8)]
#[allow(missing_docs)]
pub enum PacketType {
    Test = 0,
    Error = 1,
    Shutdown = 2,
    Request = 3,
    Send = 4,
    Recv = 5,
    Status = 6,
    Cancel = 7,
    ConfigSend = 8,
    ConfigRecv = 9,
    Valid = 10,
    Stop = 11,
    RequestUser = 12,
    Log = 13,
    LogPurge = 14,
    ConfExport = 15,
    ConfImport = 16,
    Information = 17,
    Bandwidth = 18,
    BlockRequest = 20,
    BusinessRequest = 21,
    Json = 22,
}

/// Errors arising while decoding a packet body.
///
/// `ShutdownRequested` is not a decode failure: it is the distinguished
/// signal raised for a shutdown body carrying the correct shared secret, so
/// the connection loop can unwind in an orderly way.
#[derive(Debug, thiserror::Error)]
pub enum DecodeError {
    /// The leading type byte is not in the table.
    #[error("unrecognized packet type byte {0:#04x}")]
    UnknownType(u8),
    /// The kind exists but only as a Valid/Json subtype.
    #[error("packet type {0} is only valid as a subtype")]
    SubtypeOnly(PacketType),
    /// The body did not match the kind's expected shape.
    #[error("malformed {kind} packet body: {reason}")]
    Malformed {
        /// Kind being decoded
        kind: PacketType,
        /// What went wrong
        reason: String,
    },
    /// A shutdown body with a valid key. Orderly unwind, not an error.
    #[error("shutdown requested (restart={restart})")]
    ShutdownRequested {
        /// Whether the peer asked for shutdown-and-restart
        restart: bool,
    },
    /// A shutdown body whose key failed validation.
    #[error("shutdown key rejected")]
    BadShutdownKey,
    /// A Json command body that did not parse.
    #[error("malformed json command: {0}")]
    Json(#[from] serde_json::Error),
}

/// A decoded control packet.
#[derive(Clone, Debug, PartialEq)]
#[allow(missing_docs)]
pub enum Packet {
    Test(TestPacket),
    Error(ErrorPacket),
    Valid(ValidPacket),
    Json(JsonCommandPacket),
    Information(InformationPacket),
    BusinessRequest(BusinessRequestPacket),
    BlockRequest(BlockRequestPacket),
    /// A bulk-transfer kind (REQUEST..CONFIGRECV). Routed to the data
    /// plane, which is outside this core; the dispatcher ignores it.
    Bulk(BulkPacket),
}

impl Packet {
    /// The type byte this packet is framed with.
    #[must_use]
    pub fn kind(&self) -> PacketType {
        match self {
            Packet::Test(_) => PacketType::Test,
            Packet::Error(_) => PacketType::Error,
            Packet::Valid(_) => PacketType::Valid,
            Packet::Json(_) => PacketType::Json,
            Packet::Information(_) => PacketType::Information,
            Packet::BusinessRequest(_) => PacketType::BusinessRequest,
            Packet::BlockRequest(_) => PacketType::BlockRequest,
            Packet::Bulk(b) => b.kind,
        }
    }
}

/// Ping-pong test message.
#[derive(Clone, Debug, PartialEq, derive_more::Constructor)]
pub struct TestPacket {
    /// Free-form payload echoed back and forth
    pub message: String,
    /// Exchange counter, incremented on every hop
    pub count: u32,
}

impl TestPacket {
    /// One more hop.
    pub fn update(&mut self) {
        self.count += 1;
    }

    /// Whether the ping-pong is over and the packet must be answered with a
    /// Valid reply instead of being bounced again.
    #[must_use]
    pub fn is_final(&self) -> bool {
        self.count > TEST_ECHO_THRESHOLD
    }
}

/// Error report, also used for the in-process stop/cancel injection path.
#[derive(Clone, Debug, PartialEq, derive_more::Constructor)]
pub struct ErrorPacket {
    /// Human-readable detail; for stop/cancel carries `"<code> <rank>"`
    pub message: String,
    /// Machine-readable code
    pub code: ErrorCode,
}

/// Validation / special request packet. The workhorse of the legacy control
/// surface: `subtype` selects the operation, `header`/`middle` are free-form
/// argument channels whose meaning depends on it.
#[derive(Clone, Debug, PartialEq, derive_more::Constructor)]
pub struct ValidPacket {
    /// Which operation this packet requests or answers
    pub subtype: PacketType,
    /// First argument channel
    pub header: String,
    /// Second argument channel
    pub middle: String,
}

/// The parsed form of a space-joined transfer reference
/// (`requested requester specialId [yyyyMMddHHmmss]`).
#[derive(Clone, Debug, PartialEq)]
pub struct RequestRef {
    /// Requested host id
    pub requested: String,
    /// Requester host id
    pub requester: String,
    /// Transfer id, unique per (requester, requested) pair
    pub special_id: i64,
    /// Optional restart time in `yyyyMMddHHmmss` form
    pub restart_time: Option<String>,
}

impl ValidPacket {
    /// Parses the middle argument channel as a transfer reference.
    /// Returns `None` when fewer than three fields are present or the id is
    /// not numeric.
    #[must_use]
    pub fn request_ref(&self) -> Option<RequestRef> {
        let mut parts = self.middle.split_whitespace();
        let requested = parts.next()?.to_string();
        let requester = parts.next()?.to_string();
        let special_id = parts.next()?.parse().ok()?;
        let restart_time = parts.next().map(ToString::to_string);
        Some(RequestRef {
            requested,
            requester,
            special_id,
            restart_time,
        })
    }
}

/// Typed JSON command packet: the structured counterpart of [`ValidPacket`].
#[derive(Clone, Debug, PartialEq, derive_more::Constructor)]
pub struct JsonCommandPacket {
    /// Which operation this packet requests or answers
    pub subtype: PacketType,
    /// Result code, set on replies
    pub code: Option<ErrorCode>,
    /// The typed document; one concrete node type per packet kind
    pub body: JsonBody,
}

/// An information query.
#[derive(Clone, Debug, PartialEq)]
pub enum InfoQuery {
    /// Look a transfer record up by id.
    TransferById {
        /// Transfer id
        id: i64,
        /// Whether the caller was the requester (`true`) or the requested
        /// host (`false`) of the transfer
        to_requested: bool,
    },
    /// List filenames in a rule's outbound directory matching a pattern.
    List {
        /// Rule whose directory to list
        rule: String,
        /// Glob pattern, relative to the rule directory
        pattern: String,
    },
    /// As [`InfoQuery::List`], with per-file metadata.
    ListDetail {
        /// Rule whose directory to list
        rule: String,
        /// Glob pattern, relative to the rule directory
        pattern: String,
    },
    /// Does a file exist in the rule's directory?
    Exists {
        /// Rule whose directory to check
        rule: String,
        /// File name, relative to the rule directory
        filename: String,
    },
    /// Metadata for one file in the rule's directory.
    Detail {
        /// Rule whose directory to check
        rule: String,
        /// File name, relative to the rule directory
        filename: String,
    },
}

/// Information request packet.
#[derive(Clone, Debug, PartialEq, derive_more::Constructor)]
pub struct InformationPacket {
    /// What is being asked
    pub query: InfoQuery,
}

/// Administrator-configured external task invocation.
#[derive(Clone, Debug, PartialEq, derive_more::Constructor)]
pub struct BusinessRequestPacket {
    /// Task class name followed by its arguments, space-joined
    pub spec: String,
    /// Execution timeout in milliseconds
    pub delay_ms: u64,
    /// Whether the task is to be applied locally (as opposed to having
    /// already been applied on the peer)
    pub to_apply: bool,
}

/// Toggle of the global admission block.
#[derive(Clone, Debug, PartialEq, derive_more::Constructor)]
pub struct BlockRequestPacket {
    /// Shared secret
    pub key: Vec<u8>,
    /// `true` to block new requests, `false` to unblock
    pub block: bool,
}

/// An undecoded bulk-transfer packet; the data plane owns its body format.
#[derive(Clone, Debug, PartialEq)]
pub struct BulkPacket {
    /// Kind byte (REQUEST..CONFIGRECV)
    pub kind: PacketType,
    /// Raw body, untouched
    pub body: Bytes,
}

/// Decodes raw packet bodies into typed packets given the leading type byte.
///
/// The codec needs the shared context only to validate the shutdown shared
/// secret; a shutdown body with a valid key is raised as
/// [`DecodeError::ShutdownRequested`] rather than returned as a packet.
#[derive(Clone, Debug)]
pub struct PacketCodec {
    ctx: Arc<ServerContext>,
}

impl PacketCodec {
    /// Constructor
    #[must_use]
    pub fn new(ctx: Arc<ServerContext>) -> Self {
        Self { ctx }
    }

    /// Decodes one packet body.
    pub fn decode(&self, type_byte: u8, body: Bytes) -> Result<Packet, DecodeError> {
        let kind = PacketType::from_repr(type_byte).ok_or(DecodeError::UnknownType(type_byte))?;
        let mut body = body;
        match kind {
            PacketType::Test => {
                let message = read_segment(&mut body, kind)?;
                let count = read_segment(&mut body, kind)?
                    .parse()
                    .map_err(|e| malformed(kind, format!("bad counter: {e}")))?;
                Ok(Packet::Test(TestPacket { message, count }))
            }
            PacketType::Error => {
                let message = read_segment(&mut body, kind)?;
                let code = read_segment(&mut body, kind)?;
                let code = code
                    .chars()
                    .next()
                    .map(ErrorCode::from_code)
                    .ok_or_else(|| malformed(kind, "missing code".into()))?;
                Ok(Packet::Error(ErrorPacket { message, code }))
            }
            PacketType::Shutdown => {
                let key = read_raw_segment(&mut body, kind)?;
                let restart = read_segment(&mut body, kind)? == "1";
                if self.ctx.is_key_valid(&key) {
                    Err(DecodeError::ShutdownRequested { restart })
                } else {
                    Err(DecodeError::BadShutdownKey)
                }
            }
            PacketType::Valid => {
                let header = read_segment(&mut body, kind)?;
                let middle = read_segment(&mut body, kind)?;
                let subtype = read_raw_segment(&mut body, kind)?;
                let subtype = subtype
                    .first()
                    .and_then(|b| PacketType::from_repr(*b))
                    .ok_or_else(|| malformed(kind, "bad subtype".into()))?;
                Ok(Packet::Valid(ValidPacket {
                    subtype,
                    header,
                    middle,
                }))
            }
            PacketType::Json => {
                let document = read_segment(&mut body, kind)?;
                let code = read_segment(&mut body, kind)?;
                let subtype = read_raw_segment(&mut body, kind)?;
                let subtype = subtype
                    .first()
                    .and_then(|b| PacketType::from_repr(*b))
                    .ok_or_else(|| malformed(kind, "bad subtype".into()))?;
                let code = code.chars().next().map(ErrorCode::from_code);
                let node: JsonBody = serde_json::from_str(&document)?;
                Ok(Packet::Json(JsonCommandPacket {
                    subtype,
                    code,
                    body: node,
                }))
            }
            PacketType::Information => {
                let first = read_segment(&mut body, kind)?;
                let second = read_segment(&mut body, kind)?;
                let request = read_raw_segment(&mut body, kind)?;
                let request = *request
                    .first()
                    .ok_or_else(|| malformed(kind, "missing request byte".into()))?;
                let query = decode_info_query(request, first, second)
                    .ok_or_else(|| malformed(kind, format!("bad request byte {request}")))?;
                Ok(Packet::Information(InformationPacket { query }))
            }
            PacketType::BusinessRequest => {
                let spec = read_segment(&mut body, kind)?;
                let delay_ms = read_segment(&mut body, kind)?
                    .parse()
                    .map_err(|e| malformed(kind, format!("bad delay: {e}")))?;
                let to_apply = read_segment(&mut body, kind)? == "1";
                Ok(Packet::BusinessRequest(BusinessRequestPacket {
                    spec,
                    delay_ms,
                    to_apply,
                }))
            }
            PacketType::BlockRequest => {
                let key = read_raw_segment(&mut body, kind)?;
                let block = read_segment(&mut body, kind)? == "1";
                Ok(Packet::BlockRequest(BlockRequestPacket { key, block }))
            }
            PacketType::Request
            | PacketType::Send
            | PacketType::Recv
            | PacketType::Status
            | PacketType::Cancel
            | PacketType::ConfigSend
            | PacketType::ConfigRecv => Ok(Packet::Bulk(BulkPacket { kind, body })),
            PacketType::Stop
            | PacketType::RequestUser
            | PacketType::Log
            | PacketType::LogPurge
            | PacketType::ConfExport
            | PacketType::ConfImport
            | PacketType::Bandwidth => Err(DecodeError::SubtypeOnly(kind)),
        }
    }
}

impl Packet {
    /// Serializes this packet as a type byte plus body.
    #[must_use]
    pub fn to_wire(&self) -> Vec<u8> {
        let mut buf = BytesMut::new();
        buf.put_u8(self.kind() as u8);
        match self {
            Packet::Test(p) => {
                write_segment(&mut buf, &p.message);
                write_segment(&mut buf, &p.count.to_string());
            }
            Packet::Error(p) => {
                write_segment(&mut buf, &p.message);
                write_segment(&mut buf, &p.code.code().to_string());
            }
            Packet::Valid(p) => {
                write_segment(&mut buf, &p.header);
                write_segment(&mut buf, &p.middle);
                write_raw_segment(&mut buf, &[p.subtype as u8]);
            }
            Packet::Json(p) => {
                let document =
                    serde_json::to_string(&p.body).unwrap_or_else(|_| String::from("{}"));
                write_segment(&mut buf, &document);
                let code = p.code.map(|c| c.code().to_string()).unwrap_or_default();
                write_segment(&mut buf, &code);
                write_raw_segment(&mut buf, &[p.subtype as u8]);
            }
            Packet::Information(p) => {
                let (request, first, second) = match &p.query {
                    InfoQuery::TransferById { id, to_requested } => (
                        ID_REQUEST,
                        id.to_string(),
                        String::from(if *to_requested { "1" } else { "0" }),
                    ),
                    InfoQuery::List { rule, pattern } => (0, rule.clone(), pattern.clone()),
                    InfoQuery::ListDetail { rule, pattern } => (1, rule.clone(), pattern.clone()),
                    InfoQuery::Exists { rule, filename } => (2, rule.clone(), filename.clone()),
                    InfoQuery::Detail { rule, filename } => (3, rule.clone(), filename.clone()),
                };
                write_segment(&mut buf, &first);
                write_segment(&mut buf, &second);
                write_raw_segment(&mut buf, &[request]);
            }
            Packet::BusinessRequest(p) => {
                write_segment(&mut buf, &p.spec);
                write_segment(&mut buf, &p.delay_ms.to_string());
                write_segment(&mut buf, if p.to_apply { "1" } else { "0" });
            }
            Packet::BlockRequest(p) => {
                write_raw_segment(&mut buf, &p.key);
                write_segment(&mut buf, if p.block { "1" } else { "0" });
            }
            Packet::Bulk(p) => {
                buf.put_slice(&p.body);
            }
        }
        buf.to_vec()
    }
}

const ID_REQUEST: u8 = 0xff;

fn decode_info_query(request: u8, first: String, second: String) -> Option<InfoQuery> {
    Some(match request {
        ID_REQUEST => InfoQuery::TransferById {
            id: first.parse().ok()?,
            to_requested: second == "1",
        },
        0 => InfoQuery::List {
            rule: first,
            pattern: second,
        },
        1 => InfoQuery::ListDetail {
            rule: first,
            pattern: second,
        },
        2 => InfoQuery::Exists {
            rule: first,
            filename: second,
        },
        3 => InfoQuery::Detail {
            rule: first,
            filename: second,
        },
        _ => return None,
    })
}

fn malformed(kind: PacketType, reason: String) -> DecodeError {
    DecodeError::Malformed { kind, reason }
}

fn read_raw_segment(buf: &mut Bytes, kind: PacketType) -> Result<Vec<u8>, DecodeError> {
    if buf.remaining() < 2 {
        return Err(malformed(kind, "truncated segment length".into()));
    }
    let len = buf.get_u16() as usize;
    if buf.remaining() < len {
        return Err(malformed(kind, "truncated segment".into()));
    }
    Ok(buf.copy_to_bytes(len).to_vec())
}

fn read_segment(buf: &mut Bytes, kind: PacketType) -> Result<String, DecodeError> {
    String::from_utf8(read_raw_segment(buf, kind)?)
        .map_err(|e| malformed(kind, format!("segment is not utf-8: {e}")))
}

fn write_raw_segment(buf: &mut BytesMut, data: &[u8]) {
    #[allow(clippy::cast_possible_truncation)]
    buf.put_u16(data.len() as u16);
    buf.put_slice(data);
}

fn write_segment(buf: &mut BytesMut, s: &str) {
    write_raw_segment(buf, s.as_bytes());
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{ContextSettings, ServerContext};
    use pretty_assertions::assert_eq;

    fn codec() -> PacketCodec {
        let ctx = ServerContext::new(ContextSettings {
            host_id: "hosta".into(),
            shutdown_key: b"sesame".to_vec(),
            ..ContextSettings::default()
        });
        PacketCodec::new(Arc::new(ctx))
    }

    fn round_trip(packet: &Packet) -> Packet {
        let wire = packet.to_wire();
        codec()
            .decode(wire[0], Bytes::copy_from_slice(&wire[1..]))
            .expect("decode")
    }

    #[test]
    fn unknown_type_byte_fails() {
        let e = codec().decode(0x7f, Bytes::new()).unwrap_err();
        assert!(matches!(e, DecodeError::UnknownType(0x7f)));
    }

    #[test]
    fn subtype_only_kinds_are_rejected_as_leading_byte() {
        let e = codec()
            .decode(PacketType::Log as u8, Bytes::new())
            .unwrap_err();
        assert!(matches!(e, DecodeError::SubtypeOnly(PacketType::Log)));
    }

    #[test]
    fn test_packet_round_trip() {
        let p = Packet::Test(TestPacket::new("ping".into(), 3));
        assert_eq!(round_trip(&p), p);
    }

    #[test]
    fn valid_packet_round_trip_and_request_ref() {
        let p = ValidPacket::new(PacketType::Stop, String::new(), "hostb hosta 42".into());
        let rt = round_trip(&Packet::Valid(p.clone()));
        assert_eq!(rt, Packet::Valid(p.clone()));
        let key = p.request_ref().expect("parsable");
        assert_eq!(key.requested, "hostb");
        assert_eq!(key.requester, "hosta");
        assert_eq!(key.special_id, 42);
        assert_eq!(key.restart_time, None);
    }

    #[test]
    fn request_ref_with_restart_time() {
        let p = ValidPacket::new(
            PacketType::Valid,
            String::new(),
            "hostb hosta 42 20260823120000".into(),
        );
        let key = p.request_ref().expect("parsable");
        assert_eq!(key.restart_time.as_deref(), Some("20260823120000"));
    }

    #[test]
    fn request_ref_too_short() {
        let p = ValidPacket::new(PacketType::Stop, String::new(), "hostb hosta".into());
        assert!(p.request_ref().is_none());
    }

    #[test]
    fn shutdown_with_valid_key_raises_signal() {
        let mut buf = BytesMut::new();
        write_raw_segment(&mut buf, b"sesame");
        write_segment(&mut buf, "1");
        let e = codec()
            .decode(PacketType::Shutdown as u8, buf.freeze())
            .unwrap_err();
        assert!(matches!(e, DecodeError::ShutdownRequested { restart: true }));
    }

    #[test]
    fn shutdown_with_bad_key_is_format_error() {
        let mut buf = BytesMut::new();
        write_raw_segment(&mut buf, b"wrong");
        write_segment(&mut buf, "");
        let e = codec()
            .decode(PacketType::Shutdown as u8, buf.freeze())
            .unwrap_err();
        assert!(matches!(e, DecodeError::BadShutdownKey));
    }

    #[test]
    fn truncated_body_is_malformed() {
        let e = codec()
            .decode(PacketType::Test as u8, Bytes::from_static(&[0, 4, b'x']))
            .unwrap_err();
        assert!(matches!(e, DecodeError::Malformed { .. }));
    }

    #[test]
    fn bulk_kinds_pass_through_untouched() {
        let body = Bytes::from_static(b"opaque");
        let p = codec()
            .decode(PacketType::Send as u8, body.clone())
            .expect("decode");
        assert_eq!(
            p,
            Packet::Bulk(BulkPacket {
                kind: PacketType::Send,
                body
            })
        );
    }
}
