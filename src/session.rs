//! Replication session
//!
//! `Session` is the concrete registry: it owns every replicated entity of
//! one simulation, allocates identities, tracks connections and their
//! relevance, runs replication passes and dispatches incoming packets.
//!
//! A session is driven from a single task. Entities reach it only through
//! their [`OwnerHandle`]; queued immediate updates are flushed by
//! [`Session::pump`], which every replication pass and every incoming packet
//! runs first.
//!
//! Lifecycle packets:
//! - `SpawnActor` / `NewObject`: flags (4), unique id (8), type name
//! - `DespawnActor` / `DestroyObject`: flags (4), unique id (8)

use bytes::Bytes;
use serde::Serialize;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::mpsc;
use uuid::Uuid;

use crate::config::ReplicationConfig;
use crate::owner::{NetworkOwner, OwnerCommand, OwnerHandle, RegistryError, RegistryResult};
use crate::protocol::{
    CodecError, ConnectionId, FieldReader, PacketType, UniqueId, Value, WirePacket,
};
use crate::replication::{
    EntityClass, EntitySchema, ReplicatedEntity, ReplicationError, ReplicationHeader,
    ReplicationMode,
};
use crate::rpc::{
    RpcCall, RpcCallHeader, RpcDirection, RpcError, RpcInvocation, RpcResult,
};

/// Session errors
#[derive(Error, Debug)]
pub enum SessionError {
    #[error("Registry error: {0}")]
    Registry(#[from] RegistryError),

    #[error("Replication error: {0}")]
    Replication(#[from] ReplicationError),

    #[error("RPC error: {0}")]
    Rpc(#[from] RpcError),

    #[error("Codec error: {0}")]
    Codec(#[from] CodecError),

    #[error("{packet_type} is not accepted by a session acting as {role:?}")]
    Unauthorized {
        packet_type: PacketType,
        role: SessionRole,
    },
}

pub type SessionResult<T> = Result<T, SessionError>;

/// Which side of the replication relationship this session is
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum SessionRole {
    /// Owns the simulation, replicates to observers and receives events
    Authority,
    /// Mirrors the authority, receives replication and methods
    Observer,
}

/// Events surfaced to the application
#[derive(Debug, Clone)]
pub enum SessionEvent {
    Spawned {
        unique_id: UniqueId,
        type_name: String,
    },
    Despawned {
        unique_id: UniqueId,
        type_name: String,
    },
    /// A replication frame changed these fields
    FieldsChanged {
        unique_id: UniqueId,
        fields: Vec<String>,
    },
    /// An RPC with no registered handler
    RpcReceived(RpcInvocation),
    /// A connection refused a packet and was removed. The application
    /// should close its transport; a reconnect gets a fresh late join.
    ConnectionDropped {
        connection: ConnectionId,
        entity: Option<UniqueId>,
    },
    /// Application-defined packet
    Custom {
        from: ConnectionId,
        payload: Bytes,
    },
}

/// Outgoing side of one connection
pub trait PacketSink: Send {
    /// Queue a packet. Returns false when it was not accepted, either
    /// because the peer is gone or because its queue is full.
    fn deliver(&self, packet: WirePacket) -> bool;

    /// Called once the session stops using this sink after a refusal
    fn close(&self) {}
}

impl PacketSink for mpsc::UnboundedSender<WirePacket> {
    fn deliver(&self, packet: WirePacket) -> bool {
        self.send(packet).is_ok()
    }
}

/// Application callback for one (type, method) pair
pub type RpcHandler = Box<dyn FnMut(&mut Session, &RpcInvocation) -> RpcResult<()> + Send>;

/// Session statistics
#[derive(Debug, Default, Clone, Serialize)]
pub struct SessionStats {
    pub packets_sent: u64,
    pub packets_received: u64,
    pub packets_dropped: u64,
    /// Outgoing packets a connection refused
    pub packets_refused: u64,
    pub connections_dropped: u64,
    pub frames_replicated: u64,
    pub frames_suppressed: u64,
    pub rpcs_dispatched: u64,
}

struct ConnectionSlot {
    sink: Box<dyn PacketSink>,
    /// Entity acting for this connection; the caller of its events
    entity: Option<UniqueId>,
}

/// Flags and identity of a lifecycle packet
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LifecycleInfo {
    pub flags: i32,
    pub unique_id: UniqueId,
    /// Present on spawn packets only
    pub type_name: Option<String>,
}

impl LifecycleInfo {
    pub fn decode(packet: &WirePacket) -> Result<Self, CodecError> {
        let mut reader = FieldReader::new(packet.payload());
        let flags = reader.read_i32()?;
        let unique_id = reader.read_i64()?;
        let type_name = match packet.packet_type() {
            PacketType::SpawnActor | PacketType::NewObject => Some(reader.read_string()?),
            _ => None,
        };
        Ok(Self {
            flags,
            unique_id,
            type_name,
        })
    }
}

/// Spawn packet for an entity, by its schema class
pub fn spawn_packet(entity: &ReplicatedEntity) -> WirePacket {
    let packet_type = match entity.schema().class() {
        EntityClass::Actor => PacketType::SpawnActor,
        EntityClass::Object => PacketType::NewObject,
    };
    let mut packet = WirePacket::new(packet_type);
    let offset = packet.write_i32(0, 0);
    let offset = packet.write_i64(offset, entity.unique_id());
    packet.write_string(offset, entity.type_name());
    packet
}

pub fn despawn_packet(entity: &ReplicatedEntity) -> WirePacket {
    let packet_type = match entity.schema().class() {
        EntityClass::Actor => PacketType::DespawnActor,
        EntityClass::Object => PacketType::DestroyObject,
    };
    let mut packet = WirePacket::new(packet_type);
    let offset = packet.write_i32(0, 0);
    packet.write_i64(offset, entity.unique_id());
    packet
}

/// In-process registry and dispatcher for one replication session
pub struct Session {
    session_id: Uuid,
    role: SessionRole,
    config: ReplicationConfig,
    schemas: HashMap<String, Arc<EntitySchema>>,
    entities: BTreeMap<UniqueId, ReplicatedEntity>,
    /// Every id below this was handed out, claimed or skipped
    next_id: UniqueId,
    connections: BTreeMap<ConnectionId, ConnectionSlot>,
    owner: OwnerHandle,
    commands: mpsc::UnboundedReceiver<OwnerCommand>,
    handlers: HashMap<(String, String), RpcHandler>,
    event_tx: mpsc::UnboundedSender<SessionEvent>,
    event_rx: Option<mpsc::UnboundedReceiver<SessionEvent>>,
    stats: SessionStats,
}

impl Session {
    pub fn new(role: SessionRole) -> Self {
        Self::with_config(role, ReplicationConfig::default())
    }

    pub fn with_config(role: SessionRole, config: ReplicationConfig) -> Self {
        let session_id = Uuid::new_v4();
        let (owner, commands) = OwnerHandle::channel(session_id);
        let (event_tx, event_rx) = mpsc::unbounded_channel();

        Self {
            session_id,
            role,
            next_id: config.first_unique_id.max(0),
            config,
            schemas: HashMap::new(),
            entities: BTreeMap::new(),
            connections: BTreeMap::new(),
            owner,
            commands,
            handlers: HashMap::new(),
            event_tx,
            event_rx: Some(event_rx),
            stats: SessionStats::default(),
        }
    }

    pub fn session_id(&self) -> Uuid {
        self.session_id
    }

    pub fn role(&self) -> SessionRole {
        self.role
    }

    pub fn stats(&self) -> &SessionStats {
        &self.stats
    }

    /// Take the event receiver (can only be called once)
    pub fn take_event_receiver(&mut self) -> Option<mpsc::UnboundedReceiver<SessionEvent>> {
        self.event_rx.take()
    }

    fn emit(&self, event: SessionEvent) {
        // Nobody listening is fine
        let _ = self.event_tx.send(event);
    }

    /// Register an entity type. Registering a name again replaces the schema
    /// for entities spawned afterwards.
    pub fn register_type(&mut self, schema: EntitySchema) -> Arc<EntitySchema> {
        let schema = Arc::new(schema);
        if self
            .schemas
            .insert(schema.type_name().to_string(), Arc::clone(&schema))
            .is_some()
        {
            tracing::warn!("Entity type '{}' registered twice", schema.type_name());
        }
        schema
    }

    pub fn schema(&self, type_name: &str) -> Option<&Arc<EntitySchema>> {
        self.schemas.get(type_name)
    }

    pub fn entity_ids(&self) -> impl Iterator<Item = UniqueId> + '_ {
        self.entities.keys().copied()
    }

    pub fn entity_count(&self) -> usize {
        self.entities.len()
    }

    pub fn connection_ids(&self) -> impl Iterator<Item = ConnectionId> + '_ {
        self.connections.keys().copied()
    }

    /// Add a connection. An authority brings it up to date with spawn packets
    /// and a full snapshot of every entity relevant to it.
    ///
    /// Returns the number of entities delivered. If the sink refuses any
    /// packet the connection is not added and `ConnectionDropped` is emitted.
    pub fn connect(&mut self, connection: ConnectionId, sink: impl PacketSink + 'static) -> usize {
        // Anything queued before the join belongs to the old state
        self.pump();

        let mut synced = 0;
        let mut refused = false;
        if self.role == SessionRole::Authority {
            for entity in self.entities.values() {
                if !entity.is_relevant_to(connection) {
                    continue;
                }
                for packet in [spawn_packet(entity), entity.snapshot().packet] {
                    if !sink.deliver(packet) {
                        refused = true;
                        break;
                    }
                    self.stats.packets_sent += 1;
                }
                if refused {
                    break;
                }
                synced += 1;
            }
        }

        if refused {
            self.stats.packets_refused += 1;
            tracing::warn!(
                "Connection {} refused its late join after {} entities",
                connection,
                synced
            );
            let entity = self.connections.remove(&connection).and_then(|slot| slot.entity);
            self.dropped(connection, &sink, entity);
            return synced;
        }

        if self
            .connections
            .insert(
                connection,
                ConnectionSlot {
                    sink: Box::new(sink),
                    entity: None,
                },
            )
            .is_some()
        {
            tracing::warn!("Connection {} replaced", connection);
        }
        tracing::info!("Connection {} joined, {} entities synced", connection, synced);
        synced
    }

    pub fn has_connection(&self, connection: ConnectionId) -> bool {
        self.connections.contains_key(&connection)
    }

    pub fn disconnect(&mut self, connection: ConnectionId) -> bool {
        let removed = self.connections.remove(&connection).is_some();
        if removed {
            tracing::info!("Connection {} left", connection);
        }
        removed
    }

    /// Associate the entity that acts for a connection. Events arriving on
    /// that connection are attributed to it.
    pub fn bind_connection_entity(
        &mut self,
        connection: ConnectionId,
        entity: UniqueId,
    ) -> RegistryResult<()> {
        if !self.entities.contains_key(&entity) {
            return Err(RegistryError::UnknownEntity(entity));
        }
        let slot = self
            .connections
            .get_mut(&connection)
            .ok_or(RegistryError::UnknownConnection(connection))?;
        slot.entity = Some(entity);
        Ok(())
    }

    pub fn connection_entity(&self, connection: ConnectionId) -> Option<UniqueId> {
        self.connections.get(&connection).and_then(|slot| slot.entity)
    }

    pub fn get_field(&self, id: UniqueId, name: &str) -> Option<&Value> {
        self.entities.get(&id).and_then(|entity| entity.get(name))
    }

    /// Set a field on an entity; immediate fields go out straight away
    pub fn set_field(
        &mut self,
        id: UniqueId,
        name: &str,
        value: impl Into<Value>,
    ) -> SessionResult<bool> {
        let entity = self
            .entities
            .get_mut(&id)
            .ok_or(RegistryError::UnknownEntity(id))?;
        let changed = entity.set(name, value)?;
        self.pump();
        Ok(changed)
    }

    /// Drain entity requests queued on the owner channel
    pub fn pump(&mut self) -> usize {
        let mut handled = 0;
        while let Ok(command) = self.commands.try_recv() {
            handled += 1;
            match command {
                OwnerCommand::Send { target, packet } => {
                    if self.role == SessionRole::Observer
                        && packet.packet_type() == PacketType::Replication
                    {
                        tracing::trace!("Observer does not replicate, dropping frame");
                        continue;
                    }
                    self.send(target, packet);
                }
                OwnerCommand::ReplicateNow => {
                    self.replicate_pass(ReplicationMode::Manual);
                }
            }
        }
        handled
    }

    /// Periodic pass: changed tick and immediate fields of every entity.
    /// Returns the number of frames sent.
    pub fn replicate_tick(&mut self) -> usize {
        self.pump();
        self.replicate_pass(ReplicationMode::Tick)
    }

    /// Pass emitting every field of every entity
    pub fn replicate_forced(&mut self) -> usize {
        self.pump();
        self.replicate_pass(ReplicationMode::Forced)
    }

    fn replicate_pass(&mut self, mode: ReplicationMode) -> usize {
        if self.role == SessionRole::Observer {
            return 0;
        }

        let mut frames = Vec::new();
        for entity in self.entities.values_mut() {
            let frame = entity.replicate_with(mode);
            if frame.is_empty() && self.config.suppress_empty_frames {
                self.stats.frames_suppressed += 1;
                continue;
            }
            frames.push((entity.relevance(), frame));
        }

        let mut sent = 0;
        for (relevance, frame) in frames {
            tracing::trace!(
                "Replicating {} fields of {}",
                frame.field_count,
                frame.unique_id
            );
            if self.send(relevance, frame.packet) > 0 {
                sent += 1;
            }
            self.stats.frames_replicated += 1;
        }
        sent
    }

    /// Encode and send an RPC.
    ///
    /// Authorities send methods, observers send events. A broadcast method
    /// goes to every connection the entity is relevant to; a unicast one to
    /// `target`, or to the entity's relevance when `target` is None.
    pub fn invoke(&mut self, call: RpcCall, target: Option<ConnectionId>) -> SessionResult<usize> {
        self.pump();

        let entity = self
            .entities
            .get(&call.unique_id())
            .ok_or(RpcError::UnknownEntity(call.unique_id()))?;
        let signature =
            entity
                .schema()
                .rpc(call.method())
                .ok_or_else(|| RpcError::UnknownMethod {
                    type_name: entity.type_name().to_string(),
                    method: call.method().to_string(),
                })?;

        let expected = match self.role {
            SessionRole::Authority => RpcDirection::Method,
            SessionRole::Observer => RpcDirection::Event,
        };
        if signature.direction() != expected {
            return Err(RpcError::WrongDirection {
                method: signature.name().to_string(),
                direction: signature.direction(),
            }
            .into());
        }

        let packet = call.encode(signature)?;
        let destination = match signature.direction() {
            RpcDirection::Event => None,
            RpcDirection::Method if signature.is_broadcast() => entity.relevance(),
            RpcDirection::Method => {
                let unicast = target.or(entity.relevance());
                if unicast.is_none() {
                    return Err(RpcError::MissingTarget(signature.name().to_string()).into());
                }
                unicast
            }
        };

        tracing::debug!("Invoking '{}' on {}", call.method(), call.unique_id());
        Ok(self.send(destination, packet))
    }

    /// Register the handler for `method` on entities of `type_name`
    pub fn register_handler<F>(&mut self, type_name: &str, method: &str, handler: F)
    where
        F: FnMut(&mut Session, &RpcInvocation) -> RpcResult<()> + Send + 'static,
    {
        self.handlers
            .insert((type_name.to_string(), method.to_string()), Box::new(handler));
    }

    /// Process one packet received on `from`
    pub fn handle_packet(&mut self, from: ConnectionId, packet: &WirePacket) -> SessionResult<()> {
        self.stats.packets_received += 1;
        self.pump();

        let result = match packet.packet_type() {
            PacketType::Replication => self.handle_replication(packet),
            PacketType::SpawnActor | PacketType::NewObject => self.handle_spawn(packet),
            PacketType::DespawnActor | PacketType::DestroyObject => self.handle_despawn(packet),
            PacketType::RpcCall => self.handle_rpc(from, packet),
            PacketType::RpcCallResponse => {
                tracing::debug!("Ignoring RPC response from {}", from);
                Ok(())
            }
            PacketType::Custom => {
                self.emit(SessionEvent::Custom {
                    from,
                    payload: Bytes::copy_from_slice(packet.payload()),
                });
                Ok(())
            }
            PacketType::ConnectionRequest
            | PacketType::ConnectionResponse
            | PacketType::ConnectionEnd => {
                tracing::debug!("Connection control packet from {} ignored", from);
                Ok(())
            }
        };

        if let Err(e) = &result {
            self.stats.packets_dropped += 1;
            tracing::warn!(
                "Dropped {} from connection {}: {}",
                packet.packet_type(),
                from,
                e
            );
        }

        self.pump();
        result
    }

    fn require_role(&self, role: SessionRole, packet: &WirePacket) -> SessionResult<()> {
        if self.role != role {
            return Err(SessionError::Unauthorized {
                packet_type: packet.packet_type(),
                role: self.role,
            });
        }
        Ok(())
    }

    fn handle_replication(&mut self, packet: &WirePacket) -> SessionResult<()> {
        self.require_role(SessionRole::Observer, packet)?;

        let mut reader = FieldReader::new(packet.payload());
        let header = ReplicationHeader::read(&mut reader)?;
        let Some(entity) = self.entities.get_mut(&header.unique_id) else {
            tracing::debug!("Replication for unknown entity {}", header.unique_id);
            return Ok(());
        };

        let outcome = entity.apply(&mut reader)?;
        if !outcome.changed.is_empty() {
            self.emit(SessionEvent::FieldsChanged {
                unique_id: header.unique_id,
                fields: outcome.changed,
            });
        }
        Ok(())
    }

    fn handle_spawn(&mut self, packet: &WirePacket) -> SessionResult<()> {
        self.require_role(SessionRole::Observer, packet)?;

        let info = LifecycleInfo::decode(packet)?;
        let type_name = info.type_name.unwrap_or_default();
        self.spawn(&type_name, None, Some(info.unique_id))?;
        Ok(())
    }

    fn handle_despawn(&mut self, packet: &WirePacket) -> SessionResult<()> {
        self.require_role(SessionRole::Observer, packet)?;

        let info = LifecycleInfo::decode(packet)?;
        match self.despawn(info.unique_id) {
            Ok(_) => Ok(()),
            Err(RegistryError::UnknownEntity(id)) => {
                tracing::debug!("Despawn of unknown entity {}", id);
                Ok(())
            }
            Err(e) => Err(e.into()),
        }
    }

    fn handle_rpc(&mut self, from: ConnectionId, packet: &WirePacket) -> SessionResult<()> {
        let mut reader = FieldReader::new(packet.payload());
        let header = RpcCallHeader::read(&mut reader)?;

        let Some(entity) = self.entities.get(&header.unique_id) else {
            tracing::debug!(
                "RPC '{}' for unknown entity {}",
                header.method,
                header.unique_id
            );
            return Ok(());
        };
        let type_name = entity.type_name().to_string();
        let signature = entity
            .schema()
            .rpc(&header.method)
            .ok_or_else(|| RpcError::UnknownMethod {
                type_name: type_name.clone(),
                method: header.method.clone(),
            })?;

        let expected = match self.role {
            SessionRole::Authority => RpcDirection::Event,
            SessionRole::Observer => RpcDirection::Method,
        };
        if signature.direction() != expected {
            return Err(RpcError::WrongDirection {
                method: header.method.clone(),
                direction: signature.direction(),
            }
            .into());
        }

        // Events act for the entity bound to the sending connection, never
        // for whatever id the frame names
        let caller = match signature.direction() {
            RpcDirection::Event => Some(
                self.connection_entity(from)
                    .ok_or_else(|| RpcError::MissingCaller(header.method.clone()))?,
            ),
            RpcDirection::Method => None,
        };
        let invocation = RpcInvocation::decode(header, &mut reader, signature)?
            .with_caller(caller)
            .with_sender(Some(from));

        self.stats.rpcs_dispatched += 1;
        self.dispatch(type_name, invocation)
    }

    fn dispatch(&mut self, type_name: String, invocation: RpcInvocation) -> SessionResult<()> {
        let key = (type_name, invocation.method().to_string());
        let Some(mut handler) = self.handlers.remove(&key) else {
            self.emit(SessionEvent::RpcReceived(invocation));
            return Ok(());
        };

        let result = handler(self, &invocation);
        // A handler may have registered a replacement for itself
        self.handlers.entry(key).or_insert(handler);
        result.map_err(SessionError::from)
    }

    /// Queue `packet` for one or every connection. A connection that
    /// refuses it is dropped: the frame may already be committed to the
    /// entity's shadow, so the peer can no longer be kept consistent.
    fn send_raw(&mut self, target: Option<ConnectionId>, packet: WirePacket) -> usize {
        let packet_type = packet.packet_type();
        let mut delivered = 0;
        let mut refused = Vec::new();
        match target {
            Some(connection) => match self.connections.get(&connection) {
                Some(slot) => {
                    if slot.sink.deliver(packet) {
                        delivered = 1;
                    } else {
                        refused.push(connection);
                    }
                }
                None => tracing::debug!("No connection {} for {}", connection, packet_type),
            },
            None => {
                for (&connection, slot) in &self.connections {
                    if slot.sink.deliver(packet.clone()) {
                        delivered += 1;
                    } else {
                        refused.push(connection);
                    }
                }
            }
        }
        self.stats.packets_sent += delivered as u64;

        for connection in refused {
            self.stats.packets_refused += 1;
            tracing::warn!("Connection {} refused {}", connection, packet_type);
            if let Some(slot) = self.connections.remove(&connection) {
                self.dropped(connection, slot.sink.as_ref(), slot.entity);
            }
        }
        delivered
    }

    fn dropped(&mut self, connection: ConnectionId, sink: &dyn PacketSink, entity: Option<UniqueId>) {
        sink.close();
        self.stats.connections_dropped += 1;
        tracing::warn!("Connection {} dropped", connection);
        self.emit(SessionEvent::ConnectionDropped { connection, entity });
    }
}

impl NetworkOwner for Session {
    fn next_unique_id(&mut self) -> UniqueId {
        let id = self.next_id;
        self.next_id += 1;
        id
    }

    fn entity(&self, id: UniqueId) -> Option<&ReplicatedEntity> {
        self.entities.get(&id)
    }

    fn entity_mut(&mut self, id: UniqueId) -> Option<&mut ReplicatedEntity> {
        self.entities.get_mut(&id)
    }

    fn spawn(
        &mut self,
        type_name: &str,
        relevance: Option<ConnectionId>,
        override_id: Option<UniqueId>,
    ) -> RegistryResult<UniqueId> {
        let schema = self
            .schemas
            .get(type_name)
            .cloned()
            .ok_or_else(|| RegistryError::UnknownType(type_name.to_string()))?;

        let unique_id = match override_id {
            Some(id) if id < 0 || id == UniqueId::MAX => return Err(RegistryError::InvalidId(id)),
            Some(id) if self.entities.contains_key(&id) => {
                return Err(RegistryError::DuplicateId(id))
            }
            Some(id) if id < self.next_id => return Err(RegistryError::RetiredId(id)),
            Some(id) => {
                self.next_id = id + 1;
                id
            }
            None => self.next_unique_id(),
        };

        let entity = ReplicatedEntity::new(unique_id, schema, self.owner.clone(), relevance);
        if self.role == SessionRole::Authority {
            let packet = spawn_packet(&entity);
            self.send_raw(relevance, packet);
        }
        self.entities.insert(unique_id, entity);

        tracing::info!("Spawned {} ({})", unique_id, type_name);
        self.emit(SessionEvent::Spawned {
            unique_id,
            type_name: type_name.to_string(),
        });
        Ok(unique_id)
    }

    fn despawn(&mut self, id: UniqueId) -> RegistryResult<ReplicatedEntity> {
        let entity = self
            .entities
            .remove(&id)
            .ok_or(RegistryError::UnknownEntity(id))?;

        for slot in self.connections.values_mut() {
            if slot.entity == Some(id) {
                slot.entity = None;
            }
        }

        if self.role == SessionRole::Authority {
            let packet = despawn_packet(&entity);
            self.send_raw(entity.relevance(), packet);
        }

        tracing::info!("Despawned {} ({})", id, entity.type_name());
        self.emit(SessionEvent::Despawned {
            unique_id: id,
            type_name: entity.type_name().to_string(),
        });
        Ok(entity)
    }

    fn send(&mut self, target: Option<ConnectionId>, packet: WirePacket) -> usize {
        self.send_raw(target, packet)
    }

    fn replicate_now(&mut self) -> usize {
        self.pump();
        self.replicate_pass(ReplicationMode::Manual)
    }
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("session_id", &self.session_id)
            .field("role", &self.role)
            .field("entities", &self.entities.len())
            .field("connections", &self.connections.len())
            .finish()
    }
}
