//! RPC signatures
//!
//! A signature is the registered metadata for one remote method or event:
//! its name, declared return type and the ordered parameter list used to
//! decode incoming frames by name.

use crate::protocol::ValueKind;
use crate::replication::{validate_name, SchemaError, SchemaResult};

/// Which way an RPC travels
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RpcDirection {
    /// Authority to observers
    Method,
    /// Observer to authority. The first declared parameter is the calling
    /// entity and is supplied by the receiver, not sent.
    Event,
}

/// One declared RPC parameter
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParamDescriptor {
    pub name: String,
    pub kind: ValueKind,
    pub required: bool,
}

impl ParamDescriptor {
    pub fn new(name: impl Into<String>, kind: ValueKind) -> Self {
        Self {
            name: name.into(),
            kind,
            required: true,
        }
    }

    pub fn optional(mut self) -> Self {
        self.required = false;
        self
    }
}

/// Registered signature of a method or event
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RpcSignature {
    name: String,
    direction: RpcDirection,
    broadcast: bool,
    return_type: String,
    params: Vec<ParamDescriptor>,
}

impl RpcSignature {
    fn new(name: impl Into<String>, direction: RpcDirection) -> Self {
        Self {
            name: name.into(),
            direction,
            broadcast: true,
            return_type: "void".to_string(),
            params: Vec::new(),
        }
    }

    /// Authority-to-observer method, broadcast by default
    pub fn method(name: impl Into<String>) -> Self {
        Self::new(name, RpcDirection::Method)
    }

    /// Observer-to-authority event. Declare the caller as the first parameter.
    pub fn event(name: impl Into<String>) -> Self {
        Self::new(name, RpcDirection::Event)
    }

    pub fn param(mut self, name: impl Into<String>, kind: ValueKind) -> Self {
        self.params.push(ParamDescriptor::new(name, kind));
        self
    }

    pub fn optional_param(mut self, name: impl Into<String>, kind: ValueKind) -> Self {
        self.params.push(ParamDescriptor::new(name, kind).optional());
        self
    }

    /// Send only to the connection the target entity is relevant to
    pub fn unicast(mut self) -> Self {
        self.broadcast = false;
        self
    }

    pub fn returns(mut self, return_type: impl Into<String>) -> Self {
        self.return_type = return_type.into();
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn direction(&self) -> RpcDirection {
        self.direction
    }

    pub fn is_broadcast(&self) -> bool {
        self.broadcast
    }

    pub fn return_type(&self) -> &str {
        &self.return_type
    }

    /// All declared parameters, including an event's caller
    pub fn params(&self) -> &[ParamDescriptor] {
        &self.params
    }

    /// Parameters that travel on the wire
    pub fn wire_params(&self) -> &[ParamDescriptor] {
        match self.direction {
            RpcDirection::Event if !self.params.is_empty() => &self.params[1..],
            _ => &self.params,
        }
    }

    /// The out-of-band caller parameter of an event
    pub fn caller_param(&self) -> Option<&ParamDescriptor> {
        match self.direction {
            RpcDirection::Event => self.params.first(),
            RpcDirection::Method => None,
        }
    }

    pub fn wire_param(&self, name: &str) -> Option<&ParamDescriptor> {
        self.wire_params().iter().find(|p| p.name == name)
    }

    pub fn validate(&self) -> SchemaResult<()> {
        validate_name(&self.name)?;
        validate_name(&self.return_type)?;

        for (i, param) in self.params.iter().enumerate() {
            validate_name(&param.name)?;
            if self.params[..i].iter().any(|p| p.name == param.name) {
                return Err(SchemaError::DuplicateParameter {
                    method: self.name.clone(),
                    param: param.name.clone(),
                });
            }
        }

        if self.direction == RpcDirection::Event {
            match self.params.first() {
                None => return Err(SchemaError::EventWithoutCaller(self.name.clone())),
                Some(caller) if caller.kind != ValueKind::Reference => {
                    return Err(SchemaError::EventCallerNotReference {
                        event: self.name.clone(),
                        found: caller.kind,
                    })
                }
                Some(_) => {}
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_caller_is_not_on_the_wire() {
        let jump = RpcSignature::event("Jump")
            .param("player", ValueKind::Reference)
            .param("height", ValueKind::Float32);
        assert!(jump.validate().is_ok());
        assert_eq!(jump.caller_param().map(|p| p.name.as_str()), Some("player"));
        assert_eq!(jump.wire_params().len(), 1);
        assert_eq!(jump.wire_params()[0].name, "height");
        assert!(jump.wire_param("player").is_none());
    }

    #[test]
    fn test_method_defaults() {
        let sig = RpcSignature::method("ShowText").param("text", ValueKind::String);
        assert!(sig.is_broadcast());
        assert_eq!(sig.return_type(), "void");
        assert!(sig.caller_param().is_none());
        assert_eq!(sig.wire_params().len(), 1);
        assert!(!sig.unicast().is_broadcast());
    }

    #[test]
    fn test_validation_errors() {
        let dup = RpcSignature::method("Hit")
            .param("amount", ValueKind::Int32)
            .param("amount", ValueKind::Int32);
        assert!(matches!(
            dup.validate(),
            Err(SchemaError::DuplicateParameter { .. })
        ));

        let bad_caller = RpcSignature::event("Say").param("text", ValueKind::String);
        assert!(matches!(
            bad_caller.validate(),
            Err(SchemaError::EventCallerNotReference { .. })
        ));

        assert!(RpcSignature::method("").validate().is_err());
    }

    #[test]
    fn test_optional_params() {
        let sig = RpcSignature::method("Spawned")
            .param("id", ValueKind::Int64)
            .optional_param("label", ValueKind::String);
        assert!(sig.params()[0].required);
        assert!(!sig.params()[1].required);
    }
}
