//! ActorNet - State replication and RPC for networked simulation objects
//!
//! An authority owns a set of replicated entities described by declarative
//! schemas. Changed fields are diffed and sent to observers as replication
//! frames; methods and events travel as name-dispatched RPC frames.
//!
//! ```no_run
//! use actornet::protocol::ValueKind;
//! use actornet::replication::EntitySchema;
//! use actornet::session::{Session, SessionRole};
//! use actornet::owner::NetworkOwner;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let mut session = Session::new(SessionRole::Authority);
//! session.register_type(
//!     EntitySchema::builder("Bot")
//!         .field("Health", ValueKind::Int32)
//!         .field("Name", ValueKind::String)
//!         .build()?,
//! );
//!
//! let bot = session.spawn("Bot", None, None)?;
//! session.set_field(bot, "Health", 100)?;
//! session.replicate_tick();
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod inspect;
pub mod network;
pub mod owner;
pub mod protocol;
pub mod replication;
pub mod rpc;
pub mod session;

pub use config::Config;
pub use owner::{NetworkOwner, OwnerHandle};
pub use protocol::{PacketType, UniqueId, Value, ValueKind, WirePacket};
pub use replication::{EntitySchema, ReplicatedEntity, ReplicationStrategy};
pub use rpc::{RpcCall, RpcInvocation, RpcSignature};
pub use session::{Session, SessionEvent, SessionRole};
