//! Wire packet envelope
//!
//! A packet is a 4 byte packet type followed by the payload. All positional
//! accessors take payload-relative offsets. Reads are lenient: anything that
//! would run past the end of the buffer yields a zero or empty value so that
//! peers on different protocol revisions never panic on each other's data.

use bytes::{Bytes, BytesMut};
use std::fmt;

use super::{CodecError, HEADER_SIZE};

/// Packet type codes. The numeric values are part of the wire format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(i32)]
pub enum PacketType {
    /// Sent by a connecting peer
    ConnectionRequest = 0,
    /// Accept/reject answer to a ConnectionRequest
    ConnectionResponse = 1,
    /// Graceful end of a connection
    ConnectionEnd = 2,

    /// Field replication frame. Authority only.
    Replication = 110,
    /// Spawns a replicated actor on the observer. Authority only.
    SpawnActor = 111,
    /// Despawns a replicated actor on the observer. Authority only.
    DespawnActor = 112,
    /// Creates a replicated non-actor object on the observer. Authority only.
    NewObject = 113,
    /// Destroys a replicated non-actor object on the observer. Authority only.
    DestroyObject = 114,
    /// Serialized RPC call or event. Both directions.
    RpcCall = 115,
    /// Response to an RPC call. Both directions.
    RpcCallResponse = 116,

    /// Application-defined data, ignored by the runtime
    Custom = 200,
}

impl PacketType {
    /// Wire code of this packet type
    pub fn code(self) -> i32 {
        self as i32
    }

    /// Look up a packet type by its wire code
    pub fn from_code(code: i32) -> Option<Self> {
        let packet_type = match code {
            0 => PacketType::ConnectionRequest,
            1 => PacketType::ConnectionResponse,
            2 => PacketType::ConnectionEnd,
            110 => PacketType::Replication,
            111 => PacketType::SpawnActor,
            112 => PacketType::DespawnActor,
            113 => PacketType::NewObject,
            114 => PacketType::DestroyObject,
            115 => PacketType::RpcCall,
            116 => PacketType::RpcCallResponse,
            200 => PacketType::Custom,
            _ => return None,
        };
        Some(packet_type)
    }

    /// Packets that only make sense between transport endpoints
    pub fn is_connection_control(self) -> bool {
        matches!(
            self,
            PacketType::ConnectionRequest
                | PacketType::ConnectionResponse
                | PacketType::ConnectionEnd
        )
    }
}

impl fmt::Display for PacketType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}({})", self, self.code())
    }
}

/// A single packet: header plus growable payload.
///
/// The buffer only ever grows. Writes past the current end zero-fill the gap.
#[derive(Clone, PartialEq, Eq)]
pub struct WirePacket {
    packet_type: PacketType,
    raw: BytesMut,
}

impl WirePacket {
    /// Create a packet with an empty payload
    pub fn new(packet_type: PacketType) -> Self {
        let mut raw = BytesMut::with_capacity(64);
        raw.extend_from_slice(&packet_type.code().to_le_bytes());
        Self { packet_type, raw }
    }

    /// Create a packet with a copy of `payload`
    pub fn with_payload(packet_type: PacketType, payload: &[u8]) -> Self {
        let mut raw = BytesMut::with_capacity(HEADER_SIZE + payload.len());
        raw.extend_from_slice(&packet_type.code().to_le_bytes());
        raw.extend_from_slice(payload);
        Self { packet_type, raw }
    }

    /// Parse a raw received buffer
    pub fn from_raw(raw: impl Into<BytesMut>) -> Result<Self, CodecError> {
        let raw = raw.into();
        if raw.len() < HEADER_SIZE {
            return Err(CodecError::Truncated {
                needed: HEADER_SIZE,
                available: raw.len(),
            });
        }
        let code = i32::from_le_bytes([raw[0], raw[1], raw[2], raw[3]]);
        let packet_type = PacketType::from_code(code).ok_or(CodecError::UnknownPacketType(code))?;
        Ok(Self { packet_type, raw })
    }

    pub fn packet_type(&self) -> PacketType {
        self.packet_type
    }

    /// Payload bytes (everything after the header)
    pub fn payload(&self) -> &[u8] {
        &self.raw[HEADER_SIZE..]
    }

    pub fn payload_len(&self) -> usize {
        self.raw.len() - HEADER_SIZE
    }

    /// Full raw buffer including the header
    pub fn as_bytes(&self) -> &[u8] {
        &self.raw
    }

    pub fn into_bytes(self) -> Bytes {
        self.raw.freeze()
    }

    fn ensure_len(&mut self, end: usize) {
        if self.raw.len() < end {
            self.raw.resize(end, 0);
        }
    }

    fn write_at(&mut self, offset: usize, bytes: &[u8]) -> usize {
        let start = HEADER_SIZE + offset;
        let end = start + bytes.len();
        self.ensure_len(end);
        self.raw[start..end].copy_from_slice(bytes);
        offset + bytes.len()
    }

    /// Append raw bytes after the current end of the payload
    pub fn append(&mut self, bytes: &[u8]) -> usize {
        let offset = self.payload_len();
        self.write_at(offset, bytes)
    }

    // Writers return the payload offset just past the written value.

    pub fn write_u8(&mut self, offset: usize, value: u8) -> usize {
        self.write_at(offset, &[value])
    }

    pub fn write_i16(&mut self, offset: usize, value: i16) -> usize {
        self.write_at(offset, &value.to_le_bytes())
    }

    pub fn write_i32(&mut self, offset: usize, value: i32) -> usize {
        self.write_at(offset, &value.to_le_bytes())
    }

    pub fn write_i64(&mut self, offset: usize, value: i64) -> usize {
        self.write_at(offset, &value.to_le_bytes())
    }

    /// Write a 4 byte length prefix followed by the bytes
    pub fn write_bytes(&mut self, offset: usize, bytes: &[u8]) -> usize {
        let offset = self.write_i32(offset, bytes.len() as i32);
        self.write_at(offset, bytes)
    }

    /// Write a 4 byte UTF-8 byte count followed by the UTF-8 bytes
    pub fn write_string(&mut self, offset: usize, value: &str) -> usize {
        self.write_bytes(offset, value.as_bytes())
    }

    fn read_array<const N: usize>(&self, offset: usize) -> [u8; N] {
        let mut out = [0u8; N];
        let payload = self.payload();
        if let Some(end) = offset.checked_add(N) {
            if end <= payload.len() {
                out.copy_from_slice(&payload[offset..end]);
            }
        }
        out
    }

    pub fn read_u8(&self, offset: usize) -> u8 {
        self.read_array::<1>(offset)[0]
    }

    pub fn read_i16(&self, offset: usize) -> i16 {
        i16::from_le_bytes(self.read_array(offset))
    }

    pub fn read_i32(&self, offset: usize) -> i32 {
        i32::from_le_bytes(self.read_array(offset))
    }

    pub fn read_i64(&self, offset: usize) -> i64 {
        i64::from_le_bytes(self.read_array(offset))
    }

    /// Read a length-prefixed byte block. Empty if the block would overrun.
    pub fn read_bytes(&self, offset: usize) -> &[u8] {
        let len = self.read_i32(offset);
        let payload = self.payload();
        if len <= 0 {
            return &[];
        }
        let start = offset.saturating_add(4);
        match start.checked_add(len as usize) {
            Some(end) if end <= payload.len() => &payload[start..end],
            _ => &[],
        }
    }

    /// Read a length-prefixed UTF-8 string. Empty if it would overrun.
    pub fn read_string(&self, offset: usize) -> String {
        String::from_utf8_lossy(self.read_bytes(offset)).into_owned()
    }
}

impl fmt::Debug for WirePacket {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WirePacket")
            .field("packet_type", &self.packet_type)
            .field("payload_len", &self.payload_len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_header_is_little_endian() {
        let packet = WirePacket::new(PacketType::Replication);
        assert_eq!(packet.as_bytes(), &[110, 0, 0, 0]);
        assert_eq!(packet.payload_len(), 0);
    }

    #[test]
    fn test_from_raw_parses_header() {
        let mut raw = vec![115, 0, 0, 0];
        raw.extend_from_slice(&[1, 2, 3]);
        let packet = WirePacket::from_raw(&raw[..]).unwrap();
        assert_eq!(packet.packet_type(), PacketType::RpcCall);
        assert_eq!(packet.payload(), &[1, 2, 3]);
    }

    #[test]
    fn test_from_raw_rejects_short_and_unknown() {
        assert!(matches!(
            WirePacket::from_raw(&[1u8, 0][..]),
            Err(CodecError::Truncated { .. })
        ));
        assert!(matches!(
            WirePacket::from_raw(&[99u8, 0, 0, 0][..]),
            Err(CodecError::UnknownPacketType(99))
        ));
    }

    #[test]
    fn test_positional_writes_grow_buffer() {
        let mut packet = WirePacket::new(PacketType::Custom);
        let next = packet.write_i64(8, -5);
        assert_eq!(next, 16);
        assert_eq!(packet.payload_len(), 16);
        assert_eq!(packet.read_i32(0), 0);
        assert_eq!(packet.read_i64(8), -5);

        // Overwriting inside the buffer leaves the rest intact
        packet.write_i16(0, 7);
        assert_eq!(packet.payload_len(), 16);
        assert_eq!(packet.read_i16(0), 7);
        assert_eq!(packet.read_i64(8), -5);
    }

    #[test]
    fn test_string_accessors() {
        let mut packet = WirePacket::new(PacketType::Custom);
        let next = packet.write_string(0, "grüße");
        assert_eq!(next, 4 + "grüße".len());
        assert_eq!(packet.read_string(0), "grüße");
    }

    #[test]
    fn test_reads_are_lenient() {
        let mut packet = WirePacket::new(PacketType::Custom);
        packet.write_i32(0, 1000);
        assert_eq!(packet.read_i64(100), 0);
        assert_eq!(packet.read_i32(2), 0);
        assert_eq!(packet.read_string(0), "");
        assert_eq!(packet.read_string(usize::MAX - 1), "");

        packet.write_i32(0, -3);
        assert!(packet.read_bytes(0).is_empty());
    }

    #[test]
    fn test_with_payload_copies() {
        let packet = WirePacket::with_payload(PacketType::Custom, b"abc");
        assert_eq!(packet.payload(), b"abc");
        assert_eq!(&packet.clone().into_bytes()[..4], &200i32.to_le_bytes());
    }
}
