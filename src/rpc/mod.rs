//! RPC module - Name-dispatched remote calls and events
//!
//! Provides:
//! - Per-type RPC signatures (parameter names, kinds, direction)
//! - Call frame encoding with typed parameters
//! - Call frame decoding with required-parameter enforcement

mod call;
mod signature;

pub use call::*;
pub use signature::*;

use thiserror::Error;

use crate::protocol::{CodecError, UniqueId, ValueKind};

/// RPC errors
#[derive(Error, Debug)]
pub enum RpcError {
    #[error("Type '{type_name}' has no RPC named '{method}'")]
    UnknownMethod { type_name: String, method: String },

    #[error("RPC '{method}': parameter '{name}' of type {expected} not found")]
    ParameterNotFound {
        method: String,
        name: String,
        expected: ValueKind,
    },

    #[error("RPC '{method}': parameter '{name}' is declared {expected}, got {found}")]
    ParameterType {
        method: String,
        name: String,
        expected: ValueKind,
        found: ValueKind,
    },

    #[error("RPC '{method}' has no parameter '{name}'")]
    UnexpectedParameter { method: String, name: String },

    #[error("RPC '{method}' is a {direction:?} and cannot travel this way")]
    WrongDirection {
        method: String,
        direction: RpcDirection,
    },

    #[error("Event '{0}' received without a calling entity")]
    MissingCaller(String),

    #[error("Unicast RPC '{0}' needs a target connection")]
    MissingTarget(String),

    #[error("RPC target entity {0} does not exist")]
    UnknownEntity(UniqueId),

    #[error("Handler failed: {0}")]
    Handler(String),

    #[error("Codec error: {0}")]
    Codec(#[from] CodecError),
}

pub type RpcResult<T> = Result<T, RpcError>;
