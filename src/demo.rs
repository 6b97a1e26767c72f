//! Demo arena shared by `serve` and `connect`
//!
//! The authority runs a handful of bots that wander, fight and taunt each
//! other. Every connecting observer gets a player entity it can steer with
//! the `Move` event.

use actornet::owner::NetworkOwner;
use actornet::protocol::{ConnectionId, UniqueId, Value, ValueKind, Vec3};
use actornet::replication::{EntitySchema, ReplicationStrategy, SchemaResult};
use actornet::rpc::{RpcCall, RpcError, RpcSignature};
use actornet::session::{Session, SessionResult};

const ARENA_RADIUS: f32 = 20.0;
const MAX_HEALTH: i32 = 100;

pub fn bot_schema() -> SchemaResult<EntitySchema> {
    EntitySchema::builder("Bot")
        .field("Name", ValueKind::String)
        .field("Health", ValueKind::Int32)
        .field("Position", ValueKind::Vector3)
        .field("Target", ValueKind::Reference)
        .field_with("Kills", ValueKind::Int32, ReplicationStrategy::Manual)
        .rpc(RpcSignature::method("Taunt").param("text", ValueKind::String))
        .build()
}

pub fn player_schema() -> SchemaResult<EntitySchema> {
    EntitySchema::builder("Player")
        .field("Name", ValueKind::String)
        .field("Position", ValueKind::Vector3)
        .field("Score", ValueKind::Int64)
        .rpc(
            RpcSignature::event("Move")
                .param("player", ValueKind::Reference)
                .param("direction", ValueKind::Vector3),
        )
        .rpc(
            RpcSignature::method("Announce")
                .param("message", ValueKind::String)
                .unicast(),
        )
        .build()
}

/// Register the demo types on either side of a session
pub fn register(session: &mut Session) -> SchemaResult<()> {
    session.register_type(bot_schema()?);
    session.register_type(player_schema()?);
    Ok(())
}

/// Install the authority-side event handlers
pub fn install_handlers(session: &mut Session) {
    session.register_handler("Player", "Move", |session, call| {
        let player = call
            .caller()
            .ok_or_else(|| RpcError::MissingCaller(call.method().to_string()))?;
        let direction = call.get_vector3("direction")?;
        let position = session
            .get_field(player, "Position")
            .and_then(Value::as_vector3)
            .unwrap_or_default();

        let moved = Vec3::new(
            (position.x + direction.x).clamp(-ARENA_RADIUS, ARENA_RADIUS),
            (position.y + direction.y).clamp(-ARENA_RADIUS, ARENA_RADIUS),
            (position.z + direction.z).clamp(-ARENA_RADIUS, ARENA_RADIUS),
        );
        session
            .set_field(player, "Position", moved)
            .map_err(|e| RpcError::Handler(e.to_string()))?;
        Ok(())
    });
}

/// Spawn and greet the player entity of a new connection
pub fn join(session: &mut Session, connection: ConnectionId, name: &str) -> SessionResult<UniqueId> {
    let player = session.spawn("Player", None, None)?;
    session.set_field(player, "Name", name)?;
    session.bind_connection_entity(connection, player)?;
    session.invoke(
        RpcCall::new(player, "Announce").arg("message", format!("Welcome, {}", name)),
        Some(connection),
    )?;
    Ok(player)
}

/// Remove the player entity of a leaving connection
pub fn leave(session: &mut Session, connection: ConnectionId) {
    if let Some(player) = session.connection_entity(connection) {
        remove_player(session, player);
    }
}

pub fn remove_player(session: &mut Session, player: UniqueId) {
    if let Err(e) = session.despawn(player) {
        tracing::warn!("Failed to despawn player {}: {}", player, e);
    }
}

/// Bots on the authority side
pub struct Arena {
    bots: Vec<UniqueId>,
    tick: u64,
}

impl Arena {
    pub fn populate(session: &mut Session, count: usize) -> SessionResult<Self> {
        let mut arena = Self {
            bots: Vec::with_capacity(count),
            tick: 0,
        };
        for i in 0..count {
            let bot = arena.spawn_bot(session, i)?;
            arena.bots.push(bot);
        }
        Ok(arena)
    }

    fn spawn_bot(&self, session: &mut Session, index: usize) -> SessionResult<UniqueId> {
        let bot = session.spawn("Bot", None, None)?;
        session.set_field(bot, "Name", format!("Bot-{}", index + 1))?;
        session.set_field(bot, "Health", MAX_HEALTH)?;
        Ok(bot)
    }

    pub fn bots(&self) -> &[UniqueId] {
        &self.bots
    }

    /// Advance the simulation by one tick
    pub fn step(&mut self, session: &mut Session) -> SessionResult<()> {
        self.tick += 1;
        let count = self.bots.len();
        if count == 0 {
            return Ok(());
        }

        for (i, &bot) in self.bots.iter().enumerate() {
            let angle = (self.tick as f32 * 0.1) + (i as f32 * std::f32::consts::TAU / count as f32);
            let radius = ARENA_RADIUS * 0.5;
            session.set_field(
                bot,
                "Position",
                Vec3::new(radius * angle.cos(), 0.0, radius * angle.sin()),
            )?;
        }

        if self.tick % 4 == 0 && count > 1 {
            self.fight(session)?;
        }
        Ok(())
    }

    fn fight(&mut self, session: &mut Session) -> SessionResult<()> {
        let count = self.bots.len();
        let attacker_index = (self.tick / 4) as usize % count;
        let victim_index = (attacker_index + 1) % count;
        let attacker = self.bots[attacker_index];
        let victim = self.bots[victim_index];

        // Reference fields replicate immediately
        session.set_field(attacker, "Target", Value::Reference(Some(victim)))?;

        let health = session
            .get_field(victim, "Health")
            .and_then(Value::as_i64)
            .unwrap_or(0) as i32;
        let health = health - 25;

        if health > 0 {
            session.set_field(victim, "Health", health)?;
            return Ok(());
        }

        let kills = session
            .get_field(attacker, "Kills")
            .and_then(Value::as_i64)
            .unwrap_or(0) as i32;
        session.set_field(attacker, "Kills", kills + 1)?;
        session.invoke(
            RpcCall::new(attacker, "Taunt").arg("text", "Too easy"),
            None,
        )?;

        session.despawn(victim)?;
        let replacement = self.spawn_bot(session, victim_index)?;
        self.bots[victim_index] = replacement;
        session.set_field(attacker, "Target", Value::Reference(None))?;

        // Kills is a manual field
        session.replicate_now();
        tracing::info!("{} defeated {}, respawned as {}", attacker, victim, replacement);
        Ok(())
    }
}
