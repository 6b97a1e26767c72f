//! Packet inspection
//!
//! Decodes packets without any registered schema, relying on the field type
//! tags alone. Used by the `inspect` command and for diagnostics.

use bytes::BytesMut;
use serde::Serialize;

use crate::network::{ConnectionRequest, ConnectionResponse};
use crate::protocol::{CodecError, CodecResult, ConnectionId, Decoder, PacketType, WirePacket};
use crate::replication::{decode_replication, DecodedReplication};
use crate::rpc::{decode_rpc_call, DecodedRpcCall};
use crate::session::LifecycleInfo;

/// Human readable view of one packet
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PacketSummary {
    pub packet_type: String,
    pub code: i32,
    pub payload_len: usize,
    pub body: PacketBody,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum PacketBody {
    Replication(DecodedReplication),
    Lifecycle(LifecycleInfo),
    RpcCall(DecodedRpcCall),
    ConnectionRequest {
        protocol_version: i32,
        client_name: String,
    },
    ConnectionResponse {
        accepted: bool,
        connection_id: ConnectionId,
        session_id: String,
        reason: String,
    },
    ConnectionEnd {
        reason: String,
    },
    /// Payload the runtime does not interpret
    Opaque {
        bytes: usize,
    },
    /// Payload that failed to decode
    Malformed {
        error: String,
    },
}

/// Describe a single packet
pub fn describe_packet(packet: &WirePacket) -> PacketSummary {
    let body = match decode_body(packet) {
        Ok(body) => body,
        Err(e) => PacketBody::Malformed {
            error: e.to_string(),
        },
    };

    PacketSummary {
        packet_type: format!("{:?}", packet.packet_type()),
        code: packet.packet_type().code(),
        payload_len: packet.payload_len(),
        body,
    }
}

fn decode_body(packet: &WirePacket) -> Result<PacketBody, CodecError> {
    let body = match packet.packet_type() {
        PacketType::Replication => PacketBody::Replication(decode_replication(packet.payload())?),
        PacketType::SpawnActor
        | PacketType::NewObject
        | PacketType::DespawnActor
        | PacketType::DestroyObject => PacketBody::Lifecycle(LifecycleInfo::decode(packet)?),
        PacketType::RpcCall => PacketBody::RpcCall(decode_rpc_call(packet.payload())?),
        PacketType::ConnectionRequest => {
            let request = ConnectionRequest::from_packet(packet);
            PacketBody::ConnectionRequest {
                protocol_version: request.protocol_version,
                client_name: request.client_name,
            }
        }
        PacketType::ConnectionResponse => {
            let response = ConnectionResponse::from_packet(packet);
            PacketBody::ConnectionResponse {
                accepted: response.accepted,
                connection_id: response.connection_id,
                session_id: response.session_id,
                reason: response.reason,
            }
        }
        PacketType::ConnectionEnd => PacketBody::ConnectionEnd {
            reason: packet.read_string(0),
        },
        PacketType::RpcCallResponse | PacketType::Custom => PacketBody::Opaque {
            bytes: packet.payload_len(),
        },
    };
    Ok(body)
}

/// Describe every packet of a length-prefixed stream capture.
///
/// Stops at the first framing error; a trailing partial frame is an error.
pub fn describe_stream(data: &[u8]) -> CodecResult<Vec<PacketSummary>> {
    let mut decoder = Decoder::new();
    let mut buf = BytesMut::from(data);
    let mut summaries = Vec::new();

    while let Some(packet) = decoder.decode(&mut buf)? {
        summaries.push(describe_packet(&packet));
    }

    if !buf.is_empty() {
        return Err(CodecError::Truncated {
            needed: buf.len() + 1,
            available: buf.len(),
        });
    }
    Ok(summaries)
}
