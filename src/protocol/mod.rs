//! Protocol module - Defines the wire format shared by all ActorNet peers
//!
//! Every unit on the wire is a `WirePacket`:
//! - 4 bytes packet type (little-endian i32)
//! - Variable length payload, laid out per packet type
//!
//! Replication and RPC payloads are built from typed fields:
//! - 1 byte type tag
//! - 4 bytes name length + ASCII name
//! - Type-specific value bytes
//!
//! On a byte stream each packet is additionally framed with a 4 byte length.

mod codec;
mod field;
mod packet;

pub use codec::*;
pub use field::*;
pub use packet::*;

/// Protocol version exchanged during the connection handshake
pub const PROTOCOL_VERSION: i32 = 1;

/// Default port for the reference TCP transport
pub const DEFAULT_PORT: u16 = 7777;

/// Size of the packet type header in front of every payload
pub const HEADER_SIZE: usize = 4;

/// Identity of a replicated entity within one session
pub type UniqueId = i64;

/// Identity value written on the wire for an absent reference
pub const NULL_REFERENCE: UniqueId = -1;

/// Identifies one remote peer of a session
pub type ConnectionId = u64;
