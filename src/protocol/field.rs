//! Typed field codec
//!
//! Every replicated field and every RPC parameter is framed as
//! `[type tag:1][name length:4][name bytes][value...]` with the value laid out
//! per category:
//!
//! | Category       | Value bytes                                  |
//! |----------------|----------------------------------------------|
//! | Reference      | 8 byte identity, `-1` for none               |
//! | PrimitiveInt   | 4 byte size, then `size` little-endian bytes |
//! | PrimitiveFloat | 4 byte size, then `size` little-endian bytes |
//! | String         | 4 byte UTF-8 length, then the bytes          |
//! | Vector3        | three 4 byte floats (x, y, z)                |
//!
//! Receivers normally decode with a kind they already know from the schema.
//! The tag is still checked, and because every category is self-delimiting
//! a field of unknown name can be decoded or skipped from its tag alone.

use bytes::{BufMut, BytesMut};
use serde::{Deserialize, Serialize};
use std::fmt;

use super::{CodecError, UniqueId, NULL_REFERENCE};

/// Wire type tag of a field
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u8)]
pub enum FieldType {
    Reference = 1,
    PrimitiveInt = 2,
    PrimitiveFloat = 3,
    String = 4,
    Vector3 = 5,
}

impl FieldType {
    pub fn tag(self) -> u8 {
        self as u8
    }

    pub fn from_tag(tag: u8) -> Option<Self> {
        match tag {
            1 => Some(FieldType::Reference),
            2 => Some(FieldType::PrimitiveInt),
            3 => Some(FieldType::PrimitiveFloat),
            4 => Some(FieldType::String),
            5 => Some(FieldType::Vector3),
            _ => None,
        }
    }
}

/// Concrete value kind a schema declares for a field or parameter
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ValueKind {
    Reference,
    Bool,
    Int8,
    Int16,
    Int32,
    Int64,
    Float32,
    Float64,
    String,
    Vector3,
}

impl ValueKind {
    /// Wire category used for this kind
    pub fn field_type(self) -> FieldType {
        match self {
            ValueKind::Reference => FieldType::Reference,
            ValueKind::Bool
            | ValueKind::Int8
            | ValueKind::Int16
            | ValueKind::Int32
            | ValueKind::Int64 => FieldType::PrimitiveInt,
            ValueKind::Float32 | ValueKind::Float64 => FieldType::PrimitiveFloat,
            ValueKind::String => FieldType::String,
            ValueKind::Vector3 => FieldType::Vector3,
        }
    }

    /// Declared byte size for primitive kinds
    pub fn primitive_size(self) -> Option<usize> {
        match self {
            ValueKind::Bool | ValueKind::Int8 => Some(1),
            ValueKind::Int16 => Some(2),
            ValueKind::Int32 | ValueKind::Float32 => Some(4),
            ValueKind::Int64 | ValueKind::Float64 => Some(8),
            _ => None,
        }
    }

    /// Value a field of this kind starts with
    pub fn default_value(self) -> Value {
        match self {
            ValueKind::Reference => Value::Reference(None),
            ValueKind::Bool => Value::Bool(false),
            ValueKind::Int8 => Value::Int8(0),
            ValueKind::Int16 => Value::Int16(0),
            ValueKind::Int32 => Value::Int32(0),
            ValueKind::Int64 => Value::Int64(0),
            ValueKind::Float32 => Value::Float32(0.0),
            ValueKind::Float64 => Value::Float64(0.0),
            ValueKind::String => Value::String(String::new()),
            ValueKind::Vector3 => Value::Vector3(Vec3::ZERO),
        }
    }
}

impl fmt::Display for ValueKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// Three component float vector
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Vec3 {
    pub x: f32,
    pub y: f32,
    pub z: f32,
}

impl Vec3 {
    pub const ZERO: Vec3 = Vec3 { x: 0.0, y: 0.0, z: 0.0 };

    pub const fn new(x: f32, y: f32, z: f32) -> Self {
        Self { x, y, z }
    }
}

/// A typed field or parameter value
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value")]
pub enum Value {
    Reference(Option<UniqueId>),
    Bool(bool),
    Int8(i8),
    Int16(i16),
    Int32(i32),
    Int64(i64),
    Float32(f32),
    Float64(f64),
    String(String),
    Vector3(Vec3),
}

impl Value {
    pub fn kind(&self) -> ValueKind {
        match self {
            Value::Reference(_) => ValueKind::Reference,
            Value::Bool(_) => ValueKind::Bool,
            Value::Int8(_) => ValueKind::Int8,
            Value::Int16(_) => ValueKind::Int16,
            Value::Int32(_) => ValueKind::Int32,
            Value::Int64(_) => ValueKind::Int64,
            Value::Float32(_) => ValueKind::Float32,
            Value::Float64(_) => ValueKind::Float64,
            Value::String(_) => ValueKind::String,
            Value::Vector3(_) => ValueKind::Vector3,
        }
    }

    pub fn field_type(&self) -> FieldType {
        self.kind().field_type()
    }

    /// Change detection. Floats compare by bit pattern so NaN is stable.
    pub fn differs_from(&self, other: &Value) -> bool {
        match (self, other) {
            (Value::Float32(a), Value::Float32(b)) => a.to_bits() != b.to_bits(),
            (Value::Float64(a), Value::Float64(b)) => a.to_bits() != b.to_bits(),
            (Value::Vector3(a), Value::Vector3(b)) => {
                a.x.to_bits() != b.x.to_bits()
                    || a.y.to_bits() != b.y.to_bits()
                    || a.z.to_bits() != b.z.to_bits()
            }
            _ => self != other,
        }
    }

    /// Integer payload widened to i64, if this is an integer-like value
    pub fn as_i64(&self) -> Option<i64> {
        match *self {
            Value::Bool(v) => Some(v as i64),
            Value::Int8(v) => Some(v as i64),
            Value::Int16(v) => Some(v as i64),
            Value::Int32(v) => Some(v as i64),
            Value::Int64(v) => Some(v),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match *self {
            Value::Float32(v) => Some(v as f64),
            Value::Float64(v) => Some(v),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_vector3(&self) -> Option<Vec3> {
        match *self {
            Value::Vector3(v) => Some(v),
            _ => None,
        }
    }

    /// Referenced identity. `None` for non-reference values.
    pub fn as_reference(&self) -> Option<Option<UniqueId>> {
        match *self {
            Value::Reference(id) => Some(id),
            _ => None,
        }
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Value::Bool(v)
    }
}

impl From<i8> for Value {
    fn from(v: i8) -> Self {
        Value::Int8(v)
    }
}

impl From<i16> for Value {
    fn from(v: i16) -> Self {
        Value::Int16(v)
    }
}

impl From<i32> for Value {
    fn from(v: i32) -> Self {
        Value::Int32(v)
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Value::Int64(v)
    }
}

impl From<f32> for Value {
    fn from(v: f32) -> Self {
        Value::Float32(v)
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Value::Float64(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::String(v.to_string())
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Value::String(v)
    }
}

impl From<Vec3> for Value {
    fn from(v: Vec3) -> Self {
        Value::Vector3(v)
    }
}

fn put_header(buf: &mut BytesMut, field_type: FieldType, name: &str) {
    buf.put_u8(field_type.tag());
    buf.put_i32_le(name.len() as i32);
    buf.put_slice(name.as_bytes());
}

/// Encode a reference field. `None` is written as `-1`.
pub fn encode_reference(buf: &mut BytesMut, name: &str, id: Option<UniqueId>) {
    put_header(buf, FieldType::Reference, name);
    buf.put_i64_le(id.unwrap_or(NULL_REFERENCE));
}

/// Encode a primitive field from the raw little-endian bytes of the value
pub fn encode_primitive(buf: &mut BytesMut, name: &str, field_type: FieldType, raw: &[u8]) {
    debug_assert!(matches!(
        field_type,
        FieldType::PrimitiveInt | FieldType::PrimitiveFloat
    ));
    put_header(buf, field_type, name);
    buf.put_i32_le(raw.len() as i32);
    buf.put_slice(raw);
}

pub fn encode_string(buf: &mut BytesMut, name: &str, value: &str) {
    put_header(buf, FieldType::String, name);
    buf.put_i32_le(value.len() as i32);
    buf.put_slice(value.as_bytes());
}

pub fn encode_vector3(buf: &mut BytesMut, name: &str, value: Vec3) {
    put_header(buf, FieldType::Vector3, name);
    buf.put_f32_le(value.x);
    buf.put_f32_le(value.y);
    buf.put_f32_le(value.z);
}

/// Encode any value with its category framing
pub fn encode_field(buf: &mut BytesMut, name: &str, value: &Value) {
    match value {
        Value::Reference(id) => encode_reference(buf, name, *id),
        Value::Bool(v) => encode_primitive(buf, name, FieldType::PrimitiveInt, &[*v as u8]),
        Value::Int8(v) => encode_primitive(buf, name, FieldType::PrimitiveInt, &v.to_le_bytes()),
        Value::Int16(v) => encode_primitive(buf, name, FieldType::PrimitiveInt, &v.to_le_bytes()),
        Value::Int32(v) => encode_primitive(buf, name, FieldType::PrimitiveInt, &v.to_le_bytes()),
        Value::Int64(v) => encode_primitive(buf, name, FieldType::PrimitiveInt, &v.to_le_bytes()),
        Value::Float32(v) => {
            encode_primitive(buf, name, FieldType::PrimitiveFloat, &v.to_le_bytes())
        }
        Value::Float64(v) => {
            encode_primitive(buf, name, FieldType::PrimitiveFloat, &v.to_le_bytes())
        }
        Value::String(s) => encode_string(buf, name, s),
        Value::Vector3(v) => encode_vector3(buf, name, *v),
    }
}

/// Tag and name that precede every field value
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldHeader {
    pub tag: u8,
    pub name: String,
}

impl FieldHeader {
    pub fn field_type(&self) -> Option<FieldType> {
        FieldType::from_tag(self.tag)
    }
}

/// Cursor over an encoded byte slice.
///
/// Unlike the envelope accessors this reader is strict: running out of
/// bytes is an error, so a truncated frame is never half-applied.
#[derive(Debug, Clone)]
pub struct FieldReader<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> FieldReader<'a> {
    pub fn new(buf: &'a [u8]) -> Self {
        Self { buf, pos: 0 }
    }

    pub fn position(&self) -> usize {
        self.pos
    }

    pub fn remaining(&self) -> usize {
        self.buf.len() - self.pos
    }

    pub fn is_empty(&self) -> bool {
        self.remaining() == 0
    }

    fn take(&mut self, len: usize) -> Result<&'a [u8], CodecError> {
        if self.remaining() < len {
            return Err(CodecError::Truncated {
                needed: len,
                available: self.remaining(),
            });
        }
        let slice = &self.buf[self.pos..self.pos + len];
        self.pos += len;
        Ok(slice)
    }

    fn take_array<const N: usize>(&mut self) -> Result<[u8; N], CodecError> {
        let mut out = [0u8; N];
        out.copy_from_slice(self.take(N)?);
        Ok(out)
    }

    pub fn read_u8(&mut self) -> Result<u8, CodecError> {
        Ok(self.take_array::<1>()?[0])
    }

    pub fn read_i32(&mut self) -> Result<i32, CodecError> {
        Ok(i32::from_le_bytes(self.take_array()?))
    }

    pub fn read_i64(&mut self) -> Result<i64, CodecError> {
        Ok(i64::from_le_bytes(self.take_array()?))
    }

    pub fn read_f32(&mut self) -> Result<f32, CodecError> {
        Ok(f32::from_le_bytes(self.take_array()?))
    }

    fn read_len(&mut self) -> Result<usize, CodecError> {
        let len = self.read_i32()?;
        if len < 0 {
            return Err(CodecError::InvalidLength(len));
        }
        Ok(len as usize)
    }

    /// Length-prefixed byte block
    pub fn read_block(&mut self) -> Result<&'a [u8], CodecError> {
        let len = self.read_len()?;
        self.take(len)
    }

    /// Length-prefixed UTF-8 string
    pub fn read_string(&mut self) -> Result<String, CodecError> {
        let bytes = self.read_block()?;
        String::from_utf8(bytes.to_vec()).map_err(|_| CodecError::InvalidUtf8)
    }

    pub fn read_field_header(&mut self) -> Result<FieldHeader, CodecError> {
        let tag = self.read_u8()?;
        let name = String::from_utf8_lossy(self.read_block()?).into_owned();
        Ok(FieldHeader { tag, name })
    }

    fn read_primitive(&mut self, name: &str, expected: usize) -> Result<&'a [u8], CodecError> {
        let size = self.read_len()?;
        if size != expected {
            return Err(CodecError::SizeMismatch {
                field: name.to_string(),
                expected,
                found: size,
            });
        }
        self.take(size)
    }

    /// Decode the value of `header` as `kind`. The tag must match the kind.
    pub fn read_value(&mut self, header: &FieldHeader, kind: ValueKind) -> Result<Value, CodecError> {
        let expected = kind.field_type();
        if header.tag != expected.tag() {
            return Err(CodecError::TypeMismatch {
                field: header.name.clone(),
                expected,
                found: header.tag,
            });
        }

        let name = header.name.as_str();
        let value = match kind {
            ValueKind::Reference => {
                let id = self.read_i64()?;
                Value::Reference(if id == NULL_REFERENCE { None } else { Some(id) })
            }
            ValueKind::Bool => Value::Bool(self.read_primitive(name, 1)?[0] != 0),
            ValueKind::Int8 => Value::Int8(self.read_primitive(name, 1)?[0] as i8),
            ValueKind::Int16 => {
                let raw = self.read_primitive(name, 2)?;
                Value::Int16(i16::from_le_bytes([raw[0], raw[1]]))
            }
            ValueKind::Int32 => {
                let raw = self.read_primitive(name, 4)?;
                Value::Int32(i32::from_le_bytes([raw[0], raw[1], raw[2], raw[3]]))
            }
            ValueKind::Int64 => {
                let raw = self.read_primitive(name, 8)?;
                let mut bytes = [0u8; 8];
                bytes.copy_from_slice(raw);
                Value::Int64(i64::from_le_bytes(bytes))
            }
            ValueKind::Float32 => {
                let raw = self.read_primitive(name, 4)?;
                Value::Float32(f32::from_le_bytes([raw[0], raw[1], raw[2], raw[3]]))
            }
            ValueKind::Float64 => {
                let raw = self.read_primitive(name, 8)?;
                let mut bytes = [0u8; 8];
                bytes.copy_from_slice(raw);
                Value::Float64(f64::from_le_bytes(bytes))
            }
            ValueKind::String => Value::String(self.read_string()?),
            ValueKind::Vector3 => {
                let x = self.read_f32()?;
                let y = self.read_f32()?;
                let z = self.read_f32()?;
                Value::Vector3(Vec3::new(x, y, z))
            }
        };
        Ok(value)
    }

    /// Decode a value from its tag alone.
    ///
    /// One byte integers come back as `Int8`; the wire does not distinguish
    /// them from booleans.
    pub fn read_any(&mut self, header: &FieldHeader) -> Result<Value, CodecError> {
        let field_type = header
            .field_type()
            .ok_or(CodecError::UnknownTypeTag(header.tag))?;
        let kind = match field_type {
            FieldType::Reference => ValueKind::Reference,
            FieldType::String => ValueKind::String,
            FieldType::Vector3 => ValueKind::Vector3,
            FieldType::PrimitiveInt | FieldType::PrimitiveFloat => {
                let size = self.peek_size()?;
                match (field_type, size) {
                    (FieldType::PrimitiveInt, 1) => ValueKind::Int8,
                    (FieldType::PrimitiveInt, 2) => ValueKind::Int16,
                    (FieldType::PrimitiveInt, 4) => ValueKind::Int32,
                    (FieldType::PrimitiveInt, 8) => ValueKind::Int64,
                    (FieldType::PrimitiveFloat, 4) => ValueKind::Float32,
                    (FieldType::PrimitiveFloat, 8) => ValueKind::Float64,
                    _ => {
                        return Err(CodecError::UnsupportedSize {
                            field: header.name.clone(),
                            size,
                        })
                    }
                }
            }
        };
        self.read_value(header, kind)
    }

    fn peek_size(&self) -> Result<usize, CodecError> {
        let mut probe = self.clone();
        probe.read_len()
    }

    /// Skip over the value of `header` without interpreting it
    pub fn skip_value(&mut self, header: &FieldHeader) -> Result<(), CodecError> {
        let field_type = header
            .field_type()
            .ok_or(CodecError::UnknownTypeTag(header.tag))?;
        match field_type {
            FieldType::Reference => {
                self.take(8)?;
            }
            FieldType::PrimitiveInt | FieldType::PrimitiveFloat | FieldType::String => {
                self.read_block()?;
            }
            FieldType::Vector3 => {
                self.take(12)?;
            }
        }
        Ok(())
    }
}
