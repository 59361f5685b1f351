//! Wire protocol for the control channel
// (c) 2025 Consign contributors
//!
//! The control channel carries typed packets. Legacy packets encode their
//! arguments as length-prefixed string segments; the JSON command packet
//! carries a typed document selected by a `@class` tag.

mod error_code;
mod json;
mod packet;

pub use error_code::ErrorCode;
pub use json::{
    BandwidthNode, BusinessRequestNode, CommentNode, ConfigExportNode, ConfigExportResponseNode,
    ConfigImportNode, ConfigImportResponseNode, InformationNode, JsonBody, LogNode,
    LogResponseNode, RestartNode, ShutdownOrBlockNode, ShutdownRequestNode, StopOrCancelNode,
};
pub use packet::{
    BlockRequestPacket, BulkPacket, BusinessRequestPacket, DecodeError, ErrorPacket, InfoQuery,
    InformationPacket, JsonCommandPacket, Packet, PacketCodec, PacketType, RequestRef, TestPacket,
    ValidPacket, TEST_ECHO_THRESHOLD,
};
