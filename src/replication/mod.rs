//! Replication module - Field-level state replication for networked entities
//!
//! Provides:
//! - Declarative per-type schemas (fields, strategies, RPC signatures)
//! - The generic replicated entity engine (diffing, encode, apply)

mod entity;
mod schema;

pub use entity::*;
pub use schema::*;

use thiserror::Error;

use crate::protocol::{CodecError, ValueKind};

/// Replication errors
#[derive(Error, Debug)]
pub enum ReplicationError {
    #[error("Type '{type_name}' has no replicated field '{field}'")]
    UnknownField { type_name: String, field: String },

    #[error("Field '{field}' is declared {expected}, got {found}")]
    TypeMismatch {
        field: String,
        expected: ValueKind,
        found: ValueKind,
    },

    #[error("Frame addressed to entity {found}, applied to {expected}")]
    EntityMismatch { expected: i64, found: i64 },

    #[error("Codec error: {0}")]
    Codec(#[from] CodecError),
}

pub type ReplicationResult<T> = Result<T, ReplicationError>;
