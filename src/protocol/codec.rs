//! Stream framing codec
//!
//! Wire packets carry no length of their own, so on a byte stream each one
//! is prefixed with its total size:
//! - 4 bytes frame length (little-endian u32, header + payload)
//! - The raw wire packet

use bytes::{Buf, BufMut, BytesMut};
use std::io;
use thiserror::Error;

use super::{FieldType, WirePacket, HEADER_SIZE};

/// Default maximum frame size (1 MB)
pub const DEFAULT_MAX_FRAME_SIZE: usize = 1024 * 1024;

/// Frame length prefix size
const LENGTH_PREFIX_SIZE: usize = 4;

/// Codec errors
#[derive(Error, Debug)]
pub enum CodecError {
    #[error("Truncated input: needed {needed} bytes, {available} available")]
    Truncated { needed: usize, available: usize },

    #[error("Unknown packet type code: {0}")]
    UnknownPacketType(i32),

    #[error("Unknown field type tag: {0}")]
    UnknownTypeTag(u8),

    #[error("Field '{field}' has type tag {found}, expected {expected:?}")]
    TypeMismatch {
        field: String,
        expected: FieldType,
        found: u8,
    },

    #[error("Field '{field}' declares {found} bytes, expected {expected}")]
    SizeMismatch {
        field: String,
        expected: usize,
        found: usize,
    },

    #[error("Field '{field}' has unsupported primitive size {size}")]
    UnsupportedSize { field: String, size: usize },

    #[error("Invalid length prefix: {0}")]
    InvalidLength(i32),

    #[error("Invalid UTF-8 in string")]
    InvalidUtf8,

    #[error("Frame too large: {0} bytes (max: {1})")]
    FrameTooLarge(usize, usize),

    #[error("IO error: {0}")]
    Io(#[from] io::Error),
}

pub type CodecResult<T> = Result<T, CodecError>;

/// Writes length-prefixed packets into a buffer
#[derive(Debug)]
pub struct Encoder {
    max_frame_size: usize,
    frames_written: u64,
}

impl Encoder {
    pub fn new() -> Self {
        Self::with_max_frame_size(DEFAULT_MAX_FRAME_SIZE)
    }

    pub fn with_max_frame_size(max_frame_size: usize) -> Self {
        Self {
            max_frame_size,
            frames_written: 0,
        }
    }

    /// Encode a packet into a buffer
    pub fn encode(&mut self, packet: &WirePacket, buf: &mut BytesMut) -> CodecResult<()> {
        let raw = packet.as_bytes();
        if raw.len() > self.max_frame_size {
            return Err(CodecError::FrameTooLarge(raw.len(), self.max_frame_size));
        }

        buf.reserve(LENGTH_PREFIX_SIZE + raw.len());
        buf.put_u32_le(raw.len() as u32);
        buf.put_slice(raw);

        self.frames_written += 1;
        Ok(())
    }

    pub fn frames_written(&self) -> u64 {
        self.frames_written
    }
}

impl Default for Encoder {
    fn default() -> Self {
        Self::new()
    }
}

/// Reads length-prefixed packets out of a buffer
#[derive(Debug)]
pub struct Decoder {
    state: DecodeState,
    max_frame_size: usize,
}

#[derive(Debug, Default)]
enum DecodeState {
    #[default]
    Length,
    Frame {
        length: usize,
    },
}

impl Decoder {
    pub fn new() -> Self {
        Self::with_max_frame_size(DEFAULT_MAX_FRAME_SIZE)
    }

    pub fn with_max_frame_size(max_frame_size: usize) -> Self {
        Self {
            state: DecodeState::Length,
            max_frame_size,
        }
    }

    /// Attempt to decode a packet from the buffer.
    /// Returns Ok(None) if more data is needed.
    pub fn decode(&mut self, buf: &mut BytesMut) -> CodecResult<Option<WirePacket>> {
        loop {
            match self.state {
                DecodeState::Length => {
                    if buf.len() < LENGTH_PREFIX_SIZE {
                        return Ok(None);
                    }

                    let length = u32::from_le_bytes([buf[0], buf[1], buf[2], buf[3]]) as usize;
                    if length > self.max_frame_size {
                        return Err(CodecError::FrameTooLarge(length, self.max_frame_size));
                    }
                    if length < HEADER_SIZE {
                        return Err(CodecError::Truncated {
                            needed: HEADER_SIZE,
                            available: length,
                        });
                    }

                    buf.advance(LENGTH_PREFIX_SIZE);
                    self.state = DecodeState::Frame { length };
                }
                DecodeState::Frame { length } => {
                    if buf.len() < length {
                        return Ok(None);
                    }

                    let raw = buf.split_to(length);
                    self.state = DecodeState::Length;
                    return WirePacket::from_raw(raw).map(Some);
                }
            }
        }
    }
}

impl Default for Decoder {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::PacketType;

    #[test]
    fn test_encode_decode_roundtrip() {
        let mut encoder = Encoder::new();
        let mut decoder = Decoder::new();
        let mut buf = BytesMut::new();

        let mut original = WirePacket::new(PacketType::Custom);
        original.write_string(0, "hello");
        encoder.encode(&original, &mut buf).unwrap();

        let packet = decoder.decode(&mut buf).unwrap().unwrap();
        assert_eq!(packet, original);
        assert!(buf.is_empty());
    }

    #[test]
    fn test_partial_input_waits() {
        let mut encoder = Encoder::new();
        let mut decoder = Decoder::new();
        let mut full = BytesMut::new();
        encoder
            .encode(&WirePacket::with_payload(PacketType::Custom, b"abcdef"), &mut full)
            .unwrap();

        let mut buf = BytesMut::new();
        buf.extend_from_slice(&full[..3]);
        assert!(decoder.decode(&mut buf).unwrap().is_none());
        buf.extend_from_slice(&full[3..8]);
        assert!(decoder.decode(&mut buf).unwrap().is_none());
        buf.extend_from_slice(&full[8..]);
        let packet = decoder.decode(&mut buf).unwrap().unwrap();
        assert_eq!(packet.payload(), b"abcdef");
    }

    #[test]
    fn test_multiple_packets() {
        let mut encoder = Encoder::new();
        let mut decoder = Decoder::new();
        let mut buf = BytesMut::new();

        let types = [PacketType::SpawnActor, PacketType::Replication, PacketType::RpcCall];
        for packet_type in types {
            encoder.encode(&WirePacket::new(packet_type), &mut buf).unwrap();
        }
        assert_eq!(encoder.frames_written(), 3);

        for packet_type in types {
            let packet = decoder.decode(&mut buf).unwrap().unwrap();
            assert_eq!(packet.packet_type(), packet_type);
        }
    }

    #[test]
    fn test_oversized_frame_rejected() {
        let mut decoder = Decoder::with_max_frame_size(16);
        let mut buf = BytesMut::new();
        buf.put_u32_le(1000);
        assert!(matches!(
            decoder.decode(&mut buf),
            Err(CodecError::FrameTooLarge(1000, 16))
        ));

        let mut encoder = Encoder::with_max_frame_size(8);
        let packet = WirePacket::with_payload(PacketType::Custom, &[0u8; 16]);
        assert!(encoder.encode(&packet, &mut BytesMut::new()).is_err());
    }
}
