//! Entity ownership
//!
//! `NetworkOwner` is the registry contract the replication and RPC engine
//! relies on. Entities never hold their registry; they hold an
//! [`OwnerHandle`], a cloneable channel into it, so an immediate field write
//! can hand a frame to the owner without a reference cycle.

use thiserror::Error;
use tokio::sync::mpsc;
use uuid::Uuid;

use crate::protocol::{ConnectionId, UniqueId, WirePacket};
use crate::replication::{ReplicatedEntity, SchemaError};

/// Registry errors
#[derive(Error, Debug)]
pub enum RegistryError {
    #[error("Unknown entity type: {0}")]
    UnknownType(String),

    #[error("Unknown entity: {0}")]
    UnknownEntity(UniqueId),

    #[error("Entity id {0} is already in use")]
    DuplicateId(UniqueId),

    #[error("Entity id {0} is below the session's id high-water mark")]
    RetiredId(UniqueId),

    #[error("Invalid entity id: {0}")]
    InvalidId(UniqueId),

    #[error("Unknown connection: {0}")]
    UnknownConnection(ConnectionId),

    #[error("Schema error: {0}")]
    Schema(#[from] SchemaError),
}

pub type RegistryResult<T> = Result<T, RegistryError>;

/// Requests an entity can make of its owner
#[derive(Debug, Clone)]
pub enum OwnerCommand {
    /// Transmit a packet, to one connection or to all of them
    Send {
        target: Option<ConnectionId>,
        packet: WirePacket,
    },
    /// Run a manual replication pass
    ReplicateNow,
}

/// Non-owning handle from an entity back to its registry
#[derive(Debug, Clone)]
pub struct OwnerHandle {
    session_id: Uuid,
    sender: mpsc::UnboundedSender<OwnerCommand>,
}

impl OwnerHandle {
    pub fn new(session_id: Uuid, sender: mpsc::UnboundedSender<OwnerCommand>) -> Self {
        Self { session_id, sender }
    }

    /// Create a handle together with the receiving end the owner drains
    pub fn channel(session_id: Uuid) -> (Self, mpsc::UnboundedReceiver<OwnerCommand>) {
        let (sender, receiver) = mpsc::unbounded_channel();
        (Self::new(session_id, sender), receiver)
    }

    pub fn session_id(&self) -> Uuid {
        self.session_id
    }

    /// Queue a packet for the owner. False if the owner is gone.
    pub fn send(&self, target: Option<ConnectionId>, packet: WirePacket) -> bool {
        self.sender.send(OwnerCommand::Send { target, packet }).is_ok()
    }

    pub fn request_replication(&self) -> bool {
        self.sender.send(OwnerCommand::ReplicateNow).is_ok()
    }

    pub fn is_closed(&self) -> bool {
        self.sender.is_closed()
    }
}

/// Registry of replicated entities for one session
pub trait NetworkOwner {
    /// Allocate an identity. Never returns the same id twice per session.
    fn next_unique_id(&mut self) -> UniqueId;

    fn entity(&self, id: UniqueId) -> Option<&ReplicatedEntity>;

    fn entity_mut(&mut self, id: UniqueId) -> Option<&mut ReplicatedEntity>;

    /// Construct and register an entity of a registered type
    fn spawn(
        &mut self,
        type_name: &str,
        relevance: Option<ConnectionId>,
        override_id: Option<UniqueId>,
    ) -> RegistryResult<UniqueId>;

    /// Unregister an entity. Its id is never handed out again.
    fn despawn(&mut self, id: UniqueId) -> RegistryResult<ReplicatedEntity>;

    /// Send to one connection, or to every connection when `target` is None.
    /// Returns the number of connections the packet was queued for.
    fn send(&mut self, target: Option<ConnectionId>, packet: WirePacket) -> usize;

    /// Run a manual replication pass. Returns the number of frames sent.
    fn replicate_now(&mut self) -> usize;

    /// Typed lookup: only returns the entity if it is of `type_name`
    fn lookup_as(&self, id: UniqueId, type_name: &str) -> Option<&ReplicatedEntity> {
        self.entity(id).filter(|e| e.type_name() == type_name)
    }

    /// Resolve a decoded reference. Unknown or despawned ids resolve to None.
    fn resolve(&self, reference: Option<UniqueId>) -> Option<&ReplicatedEntity> {
        reference.and_then(|id| self.entity(id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::PacketType;

    #[test]
    fn test_handle_queues_commands() {
        let (handle, mut rx) = OwnerHandle::channel(Uuid::new_v4());
        assert!(handle.send(Some(3), WirePacket::new(PacketType::Custom)));
        assert!(handle.request_replication());

        match rx.try_recv().unwrap() {
            OwnerCommand::Send { target, packet } => {
                assert_eq!(target, Some(3));
                assert_eq!(packet.packet_type(), PacketType::Custom);
            }
            other => panic!("unexpected command: {:?}", other),
        }
        assert!(matches!(rx.try_recv().unwrap(), OwnerCommand::ReplicateNow));
    }

    #[test]
    fn test_handle_reports_closed_owner() {
        let (handle, rx) = OwnerHandle::channel(Uuid::new_v4());
        drop(rx);
        assert!(handle.is_closed());
        assert!(!handle.send(None, WirePacket::new(PacketType::Custom)));
    }
}
