//! RPC call frames
//!
//! RpcCall payload:
//! - 4 bytes flags (reserved, 0)
//! - 8 bytes unique id of the target (method) or calling (event) entity
//! - Method name (length-prefixed UTF-8)
//! - Return type name (length-prefixed UTF-8, read but not interpreted)
//! - 4 bytes parameter count
//! - `count` typed parameters, framed like replicated fields

use bytes::BytesMut;
use serde::Serialize;

use super::{RpcError, RpcResult, RpcSignature};
use crate::owner::NetworkOwner;
use crate::protocol::{
    encode_field, CodecError, ConnectionId, FieldReader, PacketType, UniqueId, Value, ValueKind,
    Vec3, WirePacket,
};
use crate::replication::{DecodedField, ReplicatedEntity};

/// Flags written in front of every call frame
pub const RPC_FLAGS: i32 = 0;

/// Smallest possible encoded parameter: tag + name length
const MIN_PARAM_SIZE: usize = 5;

/// An outgoing call, built up argument by argument
#[derive(Debug, Clone, PartialEq)]
pub struct RpcCall {
    unique_id: UniqueId,
    method: String,
    args: Vec<RpcParam>,
}

impl RpcCall {
    pub fn new(unique_id: UniqueId, method: impl Into<String>) -> Self {
        Self {
            unique_id,
            method: method.into(),
            args: Vec::new(),
        }
    }

    /// Add an argument. Setting the same name twice keeps the last value.
    pub fn arg(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        let name = name.into();
        let value = value.into();
        match self.args.iter_mut().find(|a| a.name == name) {
            Some(existing) => existing.value = value,
            None => self.args.push(RpcParam { name, value }),
        }
        self
    }

    pub fn unique_id(&self) -> UniqueId {
        self.unique_id
    }

    pub fn method(&self) -> &str {
        &self.method
    }

    /// Encode against the registered signature.
    ///
    /// Arguments are checked by name and kind and written in declaration
    /// order. A required parameter without an argument is an error.
    pub fn encode(&self, signature: &RpcSignature) -> RpcResult<WirePacket> {
        for arg in &self.args {
            let param = signature.wire_param(&arg.name).ok_or_else(|| {
                RpcError::UnexpectedParameter {
                    method: signature.name().to_string(),
                    name: arg.name.clone(),
                }
            })?;
            if param.kind != arg.value.kind() {
                return Err(RpcError::ParameterType {
                    method: signature.name().to_string(),
                    name: arg.name.clone(),
                    expected: param.kind,
                    found: arg.value.kind(),
                });
            }
        }

        let mut body = BytesMut::new();
        let mut count = 0i32;
        for param in signature.wire_params() {
            match self.args.iter().find(|a| a.name == param.name) {
                Some(arg) => {
                    encode_field(&mut body, &arg.name, &arg.value);
                    count += 1;
                }
                None if param.required => {
                    return Err(RpcError::ParameterNotFound {
                        method: signature.name().to_string(),
                        name: param.name.clone(),
                        expected: param.kind,
                    })
                }
                None => {}
            }
        }

        let mut packet = WirePacket::new(PacketType::RpcCall);
        let offset = packet.write_i32(0, RPC_FLAGS);
        let offset = packet.write_i64(offset, self.unique_id);
        let offset = packet.write_string(offset, signature.name());
        let offset = packet.write_string(offset, signature.return_type());
        packet.write_i32(offset, count);
        packet.append(&body);
        Ok(packet)
    }
}

/// A named, typed parameter value
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RpcParam {
    pub name: String,
    pub value: Value,
}

/// Fixed part of a call frame, read before the signature is known
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RpcCallHeader {
    pub flags: i32,
    pub unique_id: UniqueId,
    pub method: String,
    pub return_type: String,
}

impl RpcCallHeader {
    pub fn read(reader: &mut FieldReader<'_>) -> Result<Self, CodecError> {
        let flags = reader.read_i32()?;
        let unique_id = reader.read_i64()?;
        let method = reader.read_string()?;
        let return_type = reader.read_string()?;
        Ok(Self {
            flags,
            unique_id,
            method,
            return_type,
        })
    }
}

fn read_param_count(reader: &mut FieldReader<'_>) -> Result<usize, CodecError> {
    let count = reader.read_i32()?;
    if count < 0 {
        return Err(CodecError::InvalidLength(count));
    }
    let count = count as usize;
    if count > reader.remaining() / MIN_PARAM_SIZE {
        return Err(CodecError::Truncated {
            needed: count.saturating_mul(MIN_PARAM_SIZE),
            available: reader.remaining(),
        });
    }
    Ok(count)
}

/// A decoded incoming call, ready for dispatch
#[derive(Debug, Clone, PartialEq)]
pub struct RpcInvocation {
    header: RpcCallHeader,
    params: Vec<RpcParam>,
    caller: Option<UniqueId>,
    sender: Option<ConnectionId>,
}

impl RpcInvocation {
    /// Decode the parameter section against `signature`.
    ///
    /// Parameters are matched by name. Names the signature does not know are
    /// skipped; a required parameter missing from the frame is an error.
    pub fn decode(
        header: RpcCallHeader,
        reader: &mut FieldReader<'_>,
        signature: &RpcSignature,
    ) -> RpcResult<Self> {
        let count = read_param_count(reader)?;
        let mut params: Vec<RpcParam> = Vec::with_capacity(count);

        for _ in 0..count {
            let field = reader.read_field_header()?;
            match signature.wire_param(&field.name) {
                Some(param) => {
                    let value = reader.read_value(&field, param.kind)?;
                    match params.iter_mut().find(|p| p.name == field.name) {
                        Some(existing) => existing.value = value,
                        None => params.push(RpcParam {
                            name: field.name,
                            value,
                        }),
                    }
                }
                None => {
                    reader.skip_value(&field)?;
                    tracing::debug!(
                        "Skipping unknown parameter '{}' of '{}'",
                        field.name,
                        signature.name()
                    );
                }
            }
        }

        for param in signature.wire_params() {
            if param.required && !params.iter().any(|p| p.name == param.name) {
                return Err(RpcError::ParameterNotFound {
                    method: signature.name().to_string(),
                    name: param.name.clone(),
                    expected: param.kind,
                });
            }
        }

        Ok(Self {
            header,
            params,
            caller: None,
            sender: None,
        })
    }

    /// Decode a whole RpcCall packet against `signature`
    pub fn from_packet(packet: &WirePacket, signature: &RpcSignature) -> RpcResult<Self> {
        let mut reader = FieldReader::new(packet.payload());
        let header = RpcCallHeader::read(&mut reader)?;
        Self::decode(header, &mut reader, signature)
    }

    /// Attach the calling entity supplied out-of-band by the receiver
    pub fn with_caller(mut self, caller: Option<UniqueId>) -> Self {
        self.caller = caller;
        self
    }

    /// Attach the connection the frame arrived on
    pub fn with_sender(mut self, sender: Option<ConnectionId>) -> Self {
        self.sender = sender;
        self
    }

    pub fn header(&self) -> &RpcCallHeader {
        &self.header
    }

    pub fn method(&self) -> &str {
        &self.header.method
    }

    pub fn unique_id(&self) -> UniqueId {
        self.header.unique_id
    }

    pub fn caller(&self) -> Option<UniqueId> {
        self.caller
    }

    pub fn sender(&self) -> Option<ConnectionId> {
        self.sender
    }

    pub fn params(&self) -> &[RpcParam] {
        &self.params
    }

    pub fn param(&self, name: &str) -> Option<&Value> {
        self.params.iter().find(|p| p.name == name).map(|p| &p.value)
    }

    fn typed<'a, T>(
        &'a self,
        name: &str,
        kind: ValueKind,
        extract: impl FnOnce(&'a Value) -> Option<T>,
    ) -> RpcResult<T> {
        let value = self.param(name).ok_or_else(|| RpcError::ParameterNotFound {
            method: self.header.method.clone(),
            name: name.to_string(),
            expected: kind,
        })?;
        extract(value).ok_or_else(|| RpcError::ParameterType {
            method: self.header.method.clone(),
            name: name.to_string(),
            expected: kind,
            found: value.kind(),
        })
    }

    pub fn get_bool(&self, name: &str) -> RpcResult<bool> {
        self.typed(name, ValueKind::Bool, |v| match v {
            Value::Bool(b) => Some(*b),
            _ => None,
        })
    }

    pub fn get_i32(&self, name: &str) -> RpcResult<i32> {
        self.typed(name, ValueKind::Int32, |v| match v {
            Value::Int32(n) => Some(*n),
            _ => None,
        })
    }

    pub fn get_i64(&self, name: &str) -> RpcResult<i64> {
        self.typed(name, ValueKind::Int64, |v| match v {
            Value::Int64(n) => Some(*n),
            _ => None,
        })
    }

    pub fn get_f32(&self, name: &str) -> RpcResult<f32> {
        self.typed(name, ValueKind::Float32, |v| match v {
            Value::Float32(n) => Some(*n),
            _ => None,
        })
    }

    pub fn get_f64(&self, name: &str) -> RpcResult<f64> {
        self.typed(name, ValueKind::Float64, |v| match v {
            Value::Float64(n) => Some(*n),
            _ => None,
        })
    }

    pub fn get_string(&self, name: &str) -> RpcResult<&str> {
        self.typed(name, ValueKind::String, Value::as_str)
    }

    pub fn get_vector3(&self, name: &str) -> RpcResult<Vec3> {
        self.typed(name, ValueKind::Vector3, Value::as_vector3)
    }

    /// Raw referenced identity; `None` for a null reference
    pub fn get_reference(&self, name: &str) -> RpcResult<Option<UniqueId>> {
        self.typed(name, ValueKind::Reference, Value::as_reference)
    }

    /// Resolve a reference parameter through the registry.
    /// Null, unknown and despawned ids all come back as `None`.
    pub fn resolve<'o, O>(&self, name: &str, owner: &'o O) -> RpcResult<Option<&'o ReplicatedEntity>>
    where
        O: NetworkOwner + ?Sized,
    {
        let id = self.get_reference(name)?;
        Ok(owner.resolve(id))
    }
}

/// A call frame decoded without a signature
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DecodedRpcCall {
    pub flags: i32,
    pub unique_id: UniqueId,
    pub method: String,
    pub return_type: String,
    pub params: Vec<DecodedField>,
}

/// Decode an RpcCall payload using only the type tags
pub fn decode_rpc_call(payload: &[u8]) -> Result<DecodedRpcCall, CodecError> {
    let mut reader = FieldReader::new(payload);
    let header = RpcCallHeader::read(&mut reader)?;
    let count = read_param_count(&mut reader)?;

    let mut params = Vec::with_capacity(count);
    for _ in 0..count {
        let field = reader.read_field_header()?;
        let value = reader.read_any(&field)?;
        params.push(DecodedField {
            name: field.name,
            tag: field.tag,
            value,
        });
    }

    Ok(DecodedRpcCall {
        flags: header.flags,
        unique_id: header.unique_id,
        method: header.method,
        return_type: header.return_type,
        params,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn take_damage() -> RpcSignature {
        RpcSignature::method("TakeDamage")
            .param("amount", ValueKind::Int32)
            .param("source", ValueKind::Reference)
            .optional_param("note", ValueKind::String)
    }

    fn roundtrip(call: &RpcCall, signature: &RpcSignature) -> RpcResult<RpcInvocation> {
        let packet = call.encode(signature)?;
        RpcInvocation::from_packet(&packet, signature)
    }

    #[test]
    fn test_call_layout() {
        let packet = RpcCall::new(9, "TakeDamage")
            .arg("amount", 12)
            .arg("source", Value::Reference(None))
            .encode(&take_damage())
            .unwrap();
        assert_eq!(packet.packet_type(), PacketType::RpcCall);
        assert_eq!(packet.read_i32(0), RPC_FLAGS);
        assert_eq!(packet.read_i64(4), 9);
        assert_eq!(packet.read_string(12), "TakeDamage");
        let offset = 12 + 4 + "TakeDamage".len();
        assert_eq!(packet.read_string(offset), "void");
        assert_eq!(packet.read_i32(offset + 8), 2);
    }

    #[test]
    fn test_roundtrip_with_typed_getters() {
        let call = RpcCall::new(9, "TakeDamage")
            .arg("source", Value::Reference(Some(4)))
            .arg("amount", 12);
        let invocation = roundtrip(&call, &take_damage()).unwrap();

        assert_eq!(invocation.method(), "TakeDamage");
        assert_eq!(invocation.unique_id(), 9);
        assert_eq!(invocation.get_i32("amount").unwrap(), 12);
        assert_eq!(invocation.get_reference("source").unwrap(), Some(4));
        assert!(invocation.param("note").is_none());
        assert!(matches!(
            invocation.get_string("note"),
            Err(RpcError::ParameterNotFound { .. })
        ));
        assert!(matches!(
            invocation.get_i64("amount"),
            Err(RpcError::ParameterType { .. })
        ));
        // Declaration order on the wire, whatever order the args were given in
        assert_eq!(invocation.params()[0].name, "amount");
    }

    #[test]
    fn test_encode_checks_arguments() {
        let sig = take_damage();
        assert!(matches!(
            RpcCall::new(1, "TakeDamage").arg("amount", 1).encode(&sig),
            Err(RpcError::ParameterNotFound { ref name, .. }) if name == "source"
        ));
        assert!(matches!(
            RpcCall::new(1, "TakeDamage").arg("amount", 1i64).encode(&sig),
            Err(RpcError::ParameterType { .. })
        ));
        assert!(matches!(
            RpcCall::new(1, "TakeDamage").arg("bogus", 1).encode(&sig),
            Err(RpcError::UnexpectedParameter { .. })
        ));
    }

    #[test]
    fn test_missing_required_parameter_on_decode() {
        let older = RpcSignature::method("TakeDamage").param("amount", ValueKind::Int32);
        let packet = RpcCall::new(2, "TakeDamage").arg("amount", 5).encode(&older).unwrap();

        let err = RpcInvocation::from_packet(&packet, &take_damage()).unwrap_err();
        match err {
            RpcError::ParameterNotFound {
                method,
                name,
                expected,
            } => {
                assert_eq!(method, "TakeDamage");
                assert_eq!(name, "source");
                assert_eq!(expected, ValueKind::Reference);
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_unknown_parameters_are_skipped() {
        let newer = take_damage().param("crit", ValueKind::Vector3);
        let packet = RpcCall::new(2, "TakeDamage")
            .arg("amount", 5)
            .arg("source", Value::Reference(None))
            .arg("crit", Vec3::new(1.0, 0.0, 0.0))
            .encode(&newer)
            .unwrap();

        let invocation = RpcInvocation::from_packet(&packet, &take_damage()).unwrap();
        assert_eq!(invocation.params().len(), 2);
        assert_eq!(invocation.get_reference("source").unwrap(), None);
    }

    #[test]
    fn test_event_caller_comes_from_receiver() {
        let jump = RpcSignature::event("Jump")
            .param("player", ValueKind::Reference)
            .param("height", ValueKind::Float32);
        assert!(matches!(
            RpcCall::new(3, "Jump").arg("player", Value::Reference(Some(3))).encode(&jump),
            Err(RpcError::UnexpectedParameter { .. })
        ));

        let packet = RpcCall::new(3, "Jump").arg("height", 2.5f32).encode(&jump).unwrap();
        let invocation = RpcInvocation::from_packet(&packet, &jump)
            .unwrap()
            .with_caller(Some(3))
            .with_sender(Some(1));
        assert_eq!(invocation.caller(), Some(3));
        assert_eq!(invocation.sender(), Some(1));
        assert_eq!(invocation.get_f32("height").unwrap(), 2.5);
    }

    #[test]
    fn test_generic_decode() {
        let packet = RpcCall::new(7, "TakeDamage")
            .arg("amount", 3)
            .arg("source", Value::Reference(Some(1)))
            .arg("note", "ouch")
            .encode(&take_damage())
            .unwrap();
        let decoded = decode_rpc_call(packet.payload()).unwrap();
        assert_eq!(decoded.unique_id, 7);
        assert_eq!(decoded.method, "TakeDamage");
        assert_eq!(decoded.params.len(), 3);
        assert_eq!(decoded.params[2].value, Value::String("ouch".to_string()));
    }

    #[test]
    fn test_impossible_count_rejected() {
        let mut packet = WirePacket::new(PacketType::RpcCall);
        let offset = packet.write_i32(0, 0);
        let offset = packet.write_i64(offset, 1);
        let offset = packet.write_string(offset, "TakeDamage");
        let offset = packet.write_string(offset, "void");
        packet.write_i32(offset, 1_000_000);
        assert!(matches!(
            RpcInvocation::from_packet(&packet, &take_damage()),
            Err(RpcError::Codec(CodecError::Truncated { .. }))
        ));
    }
}
