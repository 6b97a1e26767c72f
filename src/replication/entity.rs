//! Replicated entity engine
//!
//! Replication frame payload:
//! - 4 bytes flags (reserved, 0)
//! - 8 bytes unique id
//! - 4 bytes field count
//! - `count` typed fields

use bytes::BytesMut;
use serde::Serialize;
use std::sync::Arc;

use super::{Cadence, EntitySchema, ReplicationError, ReplicationResult};
use crate::owner::OwnerHandle;
use crate::protocol::{
    encode_field, CodecError, ConnectionId, FieldHeader, FieldReader, PacketType, UniqueId, Value,
    WirePacket,
};

/// Flags written in front of every replication frame
pub const REPLICATION_FLAGS: i32 = 0;

/// Payload offset of the field count in a replication frame
const FIELD_COUNT_OFFSET: usize = 12;

/// Smallest possible encoded field: tag + name length
const MIN_FIELD_SIZE: usize = 5;

/// Which fields a replication pass considers
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReplicationMode {
    /// Periodic sweep: changed tick and immediate fields
    Tick,
    /// Triggered by hand: changed fields of every cadence
    Manual,
    /// Every field, changed or not
    Forced,
}

impl ReplicationMode {
    fn includes(self, cadence: Cadence) -> bool {
        match self {
            ReplicationMode::Tick => cadence != Cadence::Manual,
            ReplicationMode::Manual | ReplicationMode::Forced => true,
        }
    }
}

#[derive(Debug, Clone)]
struct FieldSlot {
    current: Value,
    /// Last value handed to the owner; None until first sent
    shadow: Option<Value>,
}

impl FieldSlot {
    fn is_dirty(&self) -> bool {
        self.shadow
            .as_ref()
            .map_or(true, |shadow| self.current.differs_from(shadow))
    }
}

/// Result of one replication pass over an entity
#[derive(Debug, Clone)]
pub struct ReplicationFrame {
    pub unique_id: UniqueId,
    pub field_count: u32,
    pub packet: WirePacket,
}

impl ReplicationFrame {
    /// True when no field was written; senders may suppress the packet
    pub fn is_empty(&self) -> bool {
        self.field_count == 0
    }
}

/// What applying a received frame did
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ApplyOutcome {
    /// Fields whose value changed, in frame order
    pub changed: Vec<String>,
    /// Field names this schema does not know
    pub skipped: Vec<String>,
}

/// A networked entity: identity, relevance and replicated field state.
pub struct ReplicatedEntity {
    unique_id: UniqueId,
    schema: Arc<EntitySchema>,
    owner: OwnerHandle,
    relevance: Option<ConnectionId>,
    slots: Vec<FieldSlot>,
}

impl ReplicatedEntity {
    pub(crate) fn new(
        unique_id: UniqueId,
        schema: Arc<EntitySchema>,
        owner: OwnerHandle,
        relevance: Option<ConnectionId>,
    ) -> Self {
        let slots = schema
            .fields()
            .iter()
            .map(|field| FieldSlot {
                current: field.kind.default_value(),
                shadow: None,
            })
            .collect();

        Self {
            unique_id,
            schema,
            owner,
            relevance,
            slots,
        }
    }

    pub fn unique_id(&self) -> UniqueId {
        self.unique_id
    }

    pub fn type_name(&self) -> &str {
        self.schema.type_name()
    }

    pub fn schema(&self) -> &Arc<EntitySchema> {
        &self.schema
    }

    pub fn owner(&self) -> &OwnerHandle {
        &self.owner
    }

    /// Connection this entity is restricted to; None means everyone
    pub fn relevance(&self) -> Option<ConnectionId> {
        self.relevance
    }

    pub fn set_relevance(&mut self, relevance: Option<ConnectionId>) {
        self.relevance = relevance;
    }

    pub fn is_relevant_to(&self, connection: ConnectionId) -> bool {
        self.relevance.map_or(true, |target| target == connection)
    }

    pub fn get(&self, name: &str) -> Option<&Value> {
        self.schema
            .field(name)
            .map(|(index, _)| &self.slots[index].current)
    }

    /// Fields changed since they were last sent
    pub fn dirty_fields(&self) -> Vec<&str> {
        self.schema
            .fields()
            .iter()
            .zip(&self.slots)
            .filter(|(_, slot)| slot.is_dirty())
            .map(|(field, _)| field.name.as_str())
            .collect()
    }

    /// Set a field. Returns whether the value changed.
    ///
    /// Immediate fields are handed to the owner right away as a one-field
    /// frame; everything else waits for the next replication pass.
    pub fn set(&mut self, name: &str, value: impl Into<Value>) -> ReplicationResult<bool> {
        let value = value.into();
        let (index, descriptor) =
            self.schema
                .field(name)
                .ok_or_else(|| ReplicationError::UnknownField {
                    type_name: self.schema.type_name().to_string(),
                    field: name.to_string(),
                })?;

        if value.kind() != descriptor.kind {
            return Err(ReplicationError::TypeMismatch {
                field: name.to_string(),
                expected: descriptor.kind,
                found: value.kind(),
            });
        }

        let slot = &mut self.slots[index];
        if !slot.current.differs_from(&value) {
            return Ok(false);
        }
        slot.current = value;

        if descriptor.cadence == Cadence::Immediate {
            self.send_immediate(index);
        }
        Ok(true)
    }

    fn send_immediate(&mut self, index: usize) {
        let descriptor = &self.schema.fields()[index];
        let slot = &mut self.slots[index];

        let mut packet = begin_frame(self.unique_id);
        let mut body = BytesMut::new();
        encode_field(&mut body, &descriptor.name, &slot.current);
        packet.append(&body);
        packet.write_i32(FIELD_COUNT_OFFSET, 1);

        if self.owner.send(self.relevance, packet) {
            slot.shadow = Some(slot.current.clone());
        } else {
            // Stays dirty so the next pass picks it up
            tracing::warn!(
                "Owner gone, immediate update of {}.{} deferred",
                self.unique_id,
                descriptor.name
            );
        }
    }

    /// Diff against the last sent values and encode the result.
    ///
    /// `forced` emits every field regardless of change state.
    pub fn replicate(&mut self, forced: bool) -> ReplicationFrame {
        let mode = if forced {
            ReplicationMode::Forced
        } else {
            ReplicationMode::Tick
        };
        self.replicate_with(mode)
    }

    pub fn replicate_with(&mut self, mode: ReplicationMode) -> ReplicationFrame {
        let schema = Arc::clone(&self.schema);
        let mut packet = begin_frame(self.unique_id);
        let mut body = BytesMut::new();
        let mut count = 0u32;

        for (descriptor, slot) in schema.fields().iter().zip(self.slots.iter_mut()) {
            let include = match mode {
                ReplicationMode::Forced => true,
                _ => mode.includes(descriptor.cadence) && slot.is_dirty(),
            };
            if !include {
                continue;
            }
            encode_field(&mut body, &descriptor.name, &slot.current);
            slot.shadow = Some(slot.current.clone());
            count += 1;
        }

        if count > 0 {
            packet.append(&body);
            packet.write_i32(FIELD_COUNT_OFFSET, count as i32);
        }

        ReplicationFrame {
            unique_id: self.unique_id,
            field_count: count,
            packet,
        }
    }

    /// Every field at its current value, without touching change state.
    /// Used to bring a late-joining connection up to date.
    pub fn snapshot(&self) -> ReplicationFrame {
        let mut packet = begin_frame(self.unique_id);
        let mut body = BytesMut::new();
        for (descriptor, slot) in self.schema.fields().iter().zip(&self.slots) {
            encode_field(&mut body, &descriptor.name, &slot.current);
        }
        let count = self.slots.len() as u32;
        packet.append(&body);
        packet.write_i32(FIELD_COUNT_OFFSET, count as i32);

        ReplicationFrame {
            unique_id: self.unique_id,
            field_count: count,
            packet,
        }
    }

    /// Apply the field section of a received frame.
    ///
    /// `reader` must be positioned at the field count. The whole section is
    /// decoded before anything is committed, so a malformed frame leaves the
    /// entity untouched. Unknown field names are skipped.
    pub fn apply(&mut self, reader: &mut FieldReader<'_>) -> ReplicationResult<ApplyOutcome> {
        let count = reader.read_i32()?;
        if count < 0 {
            return Err(CodecError::InvalidLength(count).into());
        }
        let count = count as usize;
        if count > reader.remaining() / MIN_FIELD_SIZE {
            return Err(CodecError::Truncated {
                needed: count.saturating_mul(MIN_FIELD_SIZE),
                available: reader.remaining(),
            }
            .into());
        }

        let mut decoded = Vec::with_capacity(count);
        let mut outcome = ApplyOutcome::default();
        for _ in 0..count {
            let header = reader.read_field_header()?;
            match self.schema.field(&header.name) {
                Some((index, descriptor)) => {
                    let value = reader.read_value(&header, descriptor.kind)?;
                    decoded.push((index, value));
                }
                None => {
                    reader.skip_value(&header)?;
                    tracing::debug!(
                        "Skipping unknown field '{}' on {} ({})",
                        header.name,
                        self.unique_id,
                        self.schema.type_name()
                    );
                    outcome.skipped.push(header.name);
                }
            }
        }

        // Received values are what the peer already has, so they become the
        // shadow as well.
        for (index, value) in decoded {
            let slot = &mut self.slots[index];
            let changed = slot.current.differs_from(&value);
            slot.current = value.clone();
            slot.shadow = Some(value);

            let name = &self.schema.fields()[index].name;
            if changed && !outcome.changed.contains(name) {
                outcome.changed.push(name.clone());
            }
        }

        Ok(outcome)
    }

    /// Apply a complete Replication packet addressed to this entity
    pub fn apply_packet(&mut self, packet: &WirePacket) -> ReplicationResult<ApplyOutcome> {
        let mut reader = FieldReader::new(packet.payload());
        let header = ReplicationHeader::read(&mut reader)?;
        if header.unique_id != self.unique_id {
            return Err(ReplicationError::EntityMismatch {
                expected: self.unique_id,
                found: header.unique_id,
            });
        }
        self.apply(&mut reader)
    }
}

impl std::fmt::Debug for ReplicatedEntity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReplicatedEntity")
            .field("unique_id", &self.unique_id)
            .field("type_name", &self.schema.type_name())
            .field("relevance", &self.relevance)
            .finish()
    }
}

fn begin_frame(unique_id: UniqueId) -> WirePacket {
    let mut packet = WirePacket::new(PacketType::Replication);
    let offset = packet.write_i32(0, REPLICATION_FLAGS);
    let offset = packet.write_i64(offset, unique_id);
    packet.write_i32(offset, 0);
    packet
}

/// Flags and identity at the front of a replication frame
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReplicationHeader {
    pub flags: i32,
    pub unique_id: UniqueId,
}

impl ReplicationHeader {
    pub fn read(reader: &mut FieldReader<'_>) -> Result<Self, CodecError> {
        let flags = reader.read_i32()?;
        let unique_id = reader.read_i64()?;
        Ok(Self { flags, unique_id })
    }
}

/// A replication frame decoded without a schema
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DecodedReplication {
    pub flags: i32,
    pub unique_id: UniqueId,
    pub fields: Vec<DecodedField>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DecodedField {
    pub name: String,
    pub tag: u8,
    pub value: Value,
}

impl DecodedReplication {
    pub fn field(&self, name: &str) -> Option<&DecodedField> {
        self.fields.iter().find(|f| f.name == name)
    }
}

/// Decode a Replication payload using only the type tags
pub fn decode_replication(payload: &[u8]) -> Result<DecodedReplication, CodecError> {
    let mut reader = FieldReader::new(payload);
    let header = ReplicationHeader::read(&mut reader)?;
    let count = reader.read_i32()?;
    if count < 0 {
        return Err(CodecError::InvalidLength(count));
    }

    let mut fields = Vec::new();
    for _ in 0..count {
        let header: FieldHeader = reader.read_field_header()?;
        let value = reader.read_any(&header)?;
        fields.push(DecodedField {
            name: header.name,
            tag: header.tag,
            value,
        });
    }

    Ok(DecodedReplication {
        flags: header.flags,
        unique_id: header.unique_id,
        fields,
    })
}
