//! Declarative entity schemas
//!
//! A schema is registered once per entity type and drives the shared
//! replication and RPC engine: field order, wire names, value kinds,
//! replication cadence and the RPC signatures the type answers to.

use std::collections::HashMap;
use thiserror::Error;

use crate::protocol::ValueKind;
use crate::rpc::RpcSignature;

/// Schema validation errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SchemaError {
    #[error("Invalid name '{0}': names must be non-empty ASCII")]
    InvalidName(String),

    #[error("Duplicate field '{field}' in type '{type_name}'")]
    DuplicateField { type_name: String, field: String },

    #[error("Duplicate RPC '{method}' in type '{type_name}'")]
    DuplicateRpc { type_name: String, method: String },

    #[error("Duplicate parameter '{param}' in RPC '{method}'")]
    DuplicateParameter { method: String, param: String },

    #[error("Event '{0}' must declare the calling entity as its first parameter")]
    EventWithoutCaller(String),

    #[error("First parameter of event '{event}' must be a reference, got {found}")]
    EventCallerNotReference { event: String, found: ValueKind },
}

pub type SchemaResult<T> = Result<T, SchemaError>;

pub(crate) fn validate_name(name: &str) -> SchemaResult<()> {
    if name.is_empty() || !name.is_ascii() {
        return Err(SchemaError::InvalidName(name.to_string()));
    }
    Ok(())
}

/// How a field's changes reach observers, as declared
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ReplicationStrategy {
    /// Immediate for references, per tick for everything else
    #[default]
    Automatic,
    /// Only sent when replication is triggered by hand
    Manual,
    /// Sent on every changing write
    Immediate,
}

/// Strategy after resolution at schema build time
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Cadence {
    Tick,
    Manual,
    Immediate,
}

impl ReplicationStrategy {
    fn resolve(self, kind: ValueKind) -> Cadence {
        match self {
            ReplicationStrategy::Automatic if kind == ValueKind::Reference => Cadence::Immediate,
            ReplicationStrategy::Automatic => Cadence::Tick,
            ReplicationStrategy::Manual => Cadence::Manual,
            ReplicationStrategy::Immediate => Cadence::Immediate,
        }
    }
}

/// Actors and plain objects use different spawn packets
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum EntityClass {
    #[default]
    Actor,
    Object,
}

/// One replicated field
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldDescriptor {
    pub name: String,
    pub kind: ValueKind,
    pub strategy: ReplicationStrategy,
    pub cadence: Cadence,
}

/// Registered metadata for one entity type
#[derive(Debug, Clone)]
pub struct EntitySchema {
    type_name: String,
    class: EntityClass,
    fields: Vec<FieldDescriptor>,
    field_index: HashMap<String, usize>,
    rpcs: HashMap<String, RpcSignature>,
}

impl EntitySchema {
    pub fn builder(type_name: impl Into<String>) -> SchemaBuilder {
        SchemaBuilder::new(type_name)
    }

    pub fn type_name(&self) -> &str {
        &self.type_name
    }

    pub fn class(&self) -> EntityClass {
        self.class
    }

    /// Fields in declaration order
    pub fn fields(&self) -> &[FieldDescriptor] {
        &self.fields
    }

    /// Field position and descriptor by wire name
    pub fn field(&self, name: &str) -> Option<(usize, &FieldDescriptor)> {
        self.field_index
            .get(name)
            .map(|&index| (index, &self.fields[index]))
    }

    pub fn rpc(&self, method: &str) -> Option<&RpcSignature> {
        self.rpcs.get(method)
    }

    pub fn rpcs(&self) -> impl Iterator<Item = &RpcSignature> {
        self.rpcs.values()
    }
}

/// Builds and validates an [`EntitySchema`]
#[derive(Debug, Clone)]
pub struct SchemaBuilder {
    type_name: String,
    class: EntityClass,
    fields: Vec<(String, ValueKind, ReplicationStrategy)>,
    rpcs: Vec<RpcSignature>,
}

impl SchemaBuilder {
    pub fn new(type_name: impl Into<String>) -> Self {
        Self {
            type_name: type_name.into(),
            class: EntityClass::Actor,
            fields: Vec::new(),
            rpcs: Vec::new(),
        }
    }

    /// Replicate as a plain object (NewObject/DestroyObject) instead of an actor
    pub fn object(mut self) -> Self {
        self.class = EntityClass::Object;
        self
    }

    pub fn field(self, name: impl Into<String>, kind: ValueKind) -> Self {
        self.field_with(name, kind, ReplicationStrategy::Automatic)
    }

    pub fn field_with(
        mut self,
        name: impl Into<String>,
        kind: ValueKind,
        strategy: ReplicationStrategy,
    ) -> Self {
        self.fields.push((name.into(), kind, strategy));
        self
    }

    /// Register an RPC signature (method or event)
    pub fn rpc(mut self, signature: RpcSignature) -> Self {
        self.rpcs.push(signature);
        self
    }

    pub fn build(self) -> SchemaResult<EntitySchema> {
        validate_name(&self.type_name)?;

        let mut fields = Vec::with_capacity(self.fields.len());
        let mut field_index = HashMap::with_capacity(self.fields.len());
        for (name, kind, strategy) in self.fields {
            validate_name(&name)?;
            if field_index.contains_key(&name) {
                return Err(SchemaError::DuplicateField {
                    type_name: self.type_name,
                    field: name,
                });
            }
            field_index.insert(name.clone(), fields.len());
            fields.push(FieldDescriptor {
                cadence: strategy.resolve(kind),
                name,
                kind,
                strategy,
            });
        }

        let mut rpcs = HashMap::with_capacity(self.rpcs.len());
        for signature in self.rpcs {
            signature.validate()?;
            if rpcs.contains_key(signature.name()) {
                return Err(SchemaError::DuplicateRpc {
                    type_name: self.type_name,
                    method: signature.name().to_string(),
                });
            }
            tracing::trace!(
                "Registered {:?} '{}' on '{}'",
                signature.direction(),
                signature.name(),
                self.type_name
            );
            rpcs.insert(signature.name().to_string(), signature);
        }

        Ok(EntitySchema {
            type_name: self.type_name,
            class: self.class,
            fields,
            field_index,
            rpcs,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_automatic_strategy_resolution() {
        let schema = EntitySchema::builder("Bot")
            .field("Health", ValueKind::Int32)
            .field("Target", ValueKind::Reference)
            .field_with("Score", ValueKind::Int64, ReplicationStrategy::Manual)
            .field_with("Name", ValueKind::String, ReplicationStrategy::Immediate)
            .build()
            .unwrap();

        let cadences: Vec<_> = schema.fields().iter().map(|f| f.cadence).collect();
        assert_eq!(
            cadences,
            vec![Cadence::Tick, Cadence::Immediate, Cadence::Manual, Cadence::Immediate]
        );
        assert_eq!(schema.field("Score").map(|(i, _)| i), Some(2));
        assert!(schema.field("score").is_none());
    }

    #[test]
    fn test_duplicate_field_rejected() {
        let err = EntitySchema::builder("Bot")
            .field("Health", ValueKind::Int32)
            .field("Health", ValueKind::Int16)
            .build()
            .unwrap_err();
        assert!(matches!(err, SchemaError::DuplicateField { .. }));
    }

    #[test]
    fn test_non_ascii_names_rejected() {
        assert!(matches!(
            EntitySchema::builder("Bot").field("Größe", ValueKind::Int32).build(),
            Err(SchemaError::InvalidName(_))
        ));
        assert!(EntitySchema::builder("").build().is_err());
    }

    #[test]
    fn test_event_requires_caller() {
        let err = EntitySchema::builder("Player")
            .rpc(RpcSignature::event("Jump"))
            .build()
            .unwrap_err();
        assert_eq!(err, SchemaError::EventWithoutCaller("Jump".to_string()));

        let schema = EntitySchema::builder("Player")
            .rpc(RpcSignature::event("Jump").param("player", ValueKind::Reference))
            .build()
            .unwrap();
        assert!(schema.rpc("Jump").is_some());
    }

    #[test]
    fn test_object_class() {
        let schema = EntitySchema::builder("Inventory").object().build().unwrap();
        assert_eq!(schema.class(), EntityClass::Object);
    }
}
