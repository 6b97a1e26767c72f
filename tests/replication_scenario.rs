//! End-to-end replication and RPC behaviour through the public API

use std::collections::HashSet;
use std::time::Duration;

use bytes::BytesMut;
use tokio::sync::mpsc;
use tokio_test::{assert_err, assert_ok};

use actornet::network::{Client, ClientEvent, NetworkConfig, Server, ServerEvent};
use actornet::owner::NetworkOwner;
use actornet::protocol::{
    encode_field, ConnectionId, FieldReader, FieldType, PacketType, Value, ValueKind, WirePacket,
};
use actornet::replication::{decode_replication, EntitySchema};
use actornet::rpc::{RpcCall, RpcError, RpcInvocation, RpcSignature};
use actornet::session::{Session, SessionError, SessionEvent, SessionRole};

fn bot_schema() -> EntitySchema {
    EntitySchema::builder("Bot")
        .field("Health", ValueKind::Int32)
        .field("Name", ValueKind::String)
        .field("Target", ValueKind::Reference)
        .rpc(
            RpcSignature::method("Hit")
                .param("damage", ValueKind::Int32)
                .param("attacker", ValueKind::Reference),
        )
        .build()
        .unwrap()
}

fn session(role: SessionRole) -> Session {
    let mut session = Session::new(role);
    session.register_type(bot_schema());
    session
}

fn drain(rx: &mut mpsc::UnboundedReceiver<WirePacket>) -> Vec<WirePacket> {
    let mut packets = Vec::new();
    while let Ok(packet) = rx.try_recv() {
        packets.push(packet);
    }
    packets
}

#[test]
fn health_and_name_scenario() {
    let mut authority = session(SessionRole::Authority);
    let id = authority.spawn("Bot", None, None).unwrap();
    let entity = authority.entity_mut(id).unwrap();

    entity.set("Health", 100).unwrap();
    entity.set("Name", "Bot").unwrap();
    let first = entity.replicate(false);
    // Target was never set but has never been sent either
    let decoded = decode_replication(first.packet.payload()).unwrap();
    assert!(decoded.field("Health").is_some());
    assert!(decoded.field("Name").is_some());

    entity.set("Health", 100).unwrap();
    assert_eq!(entity.replicate(false).field_count, 0);

    entity.set("Health", 80).unwrap();
    let frame = entity.replicate(false);
    assert_eq!(frame.field_count, 1);
    let decoded = decode_replication(frame.packet.payload()).unwrap();
    assert_eq!(decoded.unique_id, id);
    assert_eq!(decoded.fields.len(), 1);
    assert_eq!(decoded.fields[0].name, "Health");
    assert_eq!(decoded.fields[0].tag, FieldType::PrimitiveInt.tag());
    assert_eq!(decoded.fields[0].value, Value::Int32(80));
}

#[test]
fn health_and_name_first_pass_without_reference() {
    let schema = EntitySchema::builder("Bot")
        .field("Health", ValueKind::Int32)
        .field("Name", ValueKind::String)
        .build()
        .unwrap();
    let mut authority = Session::new(SessionRole::Authority);
    authority.register_type(schema);
    let id = authority.spawn("Bot", None, None).unwrap();
    let entity = authority.entity_mut(id).unwrap();

    entity.set("Health", 100).unwrap();
    entity.set("Name", "Bot").unwrap();
    assert_eq!(entity.replicate(false).field_count, 2);
    assert_eq!(entity.replicate(true).field_count, 2);
}

#[test]
fn sequential_spawns_have_distinct_ids() {
    let mut authority = session(SessionRole::Authority);
    let ids: HashSet<_> = (0..200)
        .map(|_| authority.spawn("Bot", None, None).unwrap())
        .collect();
    assert_eq!(ids.len(), 200);
}

#[test]
fn null_reference_is_minus_one() {
    let mut buf = BytesMut::new();
    encode_field(&mut buf, "Target", &Value::Reference(None));
    assert_eq!(&buf[buf.len() - 8..], &(-1i64).to_le_bytes());

    let mut reader = FieldReader::new(&buf);
    let header = reader.read_field_header().unwrap();
    assert_eq!(
        reader.read_value(&header, ValueKind::Reference).unwrap(),
        Value::Reference(None)
    );
}

#[test]
fn reference_resolves_through_registry() {
    let mut authority = session(SessionRole::Authority);
    let attacker = authority.spawn("Bot", None, None).unwrap();
    let victim = authority.spawn("Bot", None, None).unwrap();
    let signature = authority.schema("Bot").unwrap().rpc("Hit").unwrap().clone();

    let packet = RpcCall::new(victim, "Hit")
        .arg("damage", 10)
        .arg("attacker", Value::Reference(Some(attacker)))
        .encode(&signature)
        .unwrap();
    let call = RpcInvocation::from_packet(&packet, &signature).unwrap();

    let resolved = call.resolve("attacker", &authority).unwrap().unwrap();
    assert_eq!(resolved.unique_id(), attacker);

    // Despawned mid-flight: absent, not an error
    authority.despawn(attacker).unwrap();
    assert!(call.resolve("attacker", &authority).unwrap().is_none());
}

#[test]
fn missing_required_parameter_is_named() {
    let sent = RpcSignature::method("Hit").param("attacker", ValueKind::Reference);
    let expected = RpcSignature::method("Hit")
        .param("damage", ValueKind::Int32)
        .param("attacker", ValueKind::Reference);

    let packet = RpcCall::new(1, "Hit")
        .arg("attacker", Value::Reference(None))
        .encode(&sent)
        .unwrap();
    match RpcInvocation::from_packet(&packet, &expected) {
        Err(RpcError::ParameterNotFound { name, expected, .. }) => {
            assert_eq!(name, "damage");
            assert_eq!(expected, ValueKind::Int32);
        }
        other => panic!("unexpected result: {:?}", other),
    }
}

#[test]
fn observer_rejects_missing_parameter_and_keeps_going() {
    let mut observer = session(SessionRole::Observer);
    observer.spawn("Bot", None, Some(4)).unwrap();

    let short = RpcSignature::method("Hit").param("damage", ValueKind::Int32);
    let packet = RpcCall::new(4, "Hit").arg("damage", 3).encode(&short).unwrap();

    assert_err!(observer.handle_packet(0, &packet));
    assert_eq!(observer.stats().packets_dropped, 1);
    assert_eq!(observer.entity_count(), 1);
}

#[test]
fn observer_refuses_to_send_methods() {
    let mut observer = session(SessionRole::Observer);
    observer.spawn("Bot", None, Some(4)).unwrap();
    let result = observer.invoke(RpcCall::new(4, "Hit").arg("damage", 1), None);
    assert!(matches!(
        result,
        Err(SessionError::Rpc(RpcError::WrongDirection { .. }))
    ));
}

#[test]
fn authority_to_observer_in_process() {
    let mut authority = session(SessionRole::Authority);
    let mut observer = session(SessionRole::Observer);
    let mut events = observer.take_event_receiver().unwrap();
    let (tx, mut rx) = mpsc::unbounded_channel();
    authority.connect(1, tx);

    let a = authority.spawn("Bot", None, None).unwrap();
    let b = authority.spawn("Bot", None, None).unwrap();
    assert_ok!(authority.set_field(a, "Health", 70));
    assert_ok!(authority.set_field(a, "Target", Value::Reference(Some(b))));
    authority.replicate_tick();

    for packet in drain(&mut rx) {
        assert_ok!(observer.handle_packet(0, &packet));
    }
    assert_eq!(observer.entity_count(), 2);
    assert_eq!(observer.get_field(a, "Health"), Some(&Value::Int32(70)));
    let target = observer
        .get_field(a, "Target")
        .and_then(Value::as_reference)
        .flatten();
    assert_eq!(observer.resolve(target).map(|e| e.unique_id()), Some(b));

    let mut spawned = 0;
    while let Ok(event) = events.try_recv() {
        if matches!(event, SessionEvent::Spawned { .. }) {
            spawned += 1;
        }
    }
    assert_eq!(spawned, 2);
}

async fn next<T>(rx: &mut mpsc::Receiver<T>) -> T {
    tokio::time::timeout(Duration::from_secs(5), rx.recv())
        .await
        .expect("timed out waiting for event")
        .expect("channel closed")
}

#[tokio::test]
async fn late_join_over_tcp() {
    let mut authority = session(SessionRole::Authority);
    let id = authority.spawn("Bot", None, None).unwrap();
    assert_ok!(authority.set_field(id, "Health", 100));
    assert_ok!(authority.set_field(id, "Name", "Bot"));
    authority.replicate_tick();

    let config = NetworkConfig::new(0).with_bind_address("127.0.0.1");
    let mut server = Server::new(config.clone(), authority.session_id());
    let mut server_events = server.take_event_receiver().unwrap();
    let addr = assert_ok!(server.start().await);
    assert!(matches!(next(&mut server_events).await, ServerEvent::Started { .. }));

    let mut observer = session(SessionRole::Observer);
    let mut client = Client::new(config, "observer");
    let mut client_events = client.take_event_receiver().unwrap();
    let response = assert_ok!(client.connect(addr).await);
    assert!(response.accepted);
    assert_eq!(response.session_id, authority.session_id().to_string());

    let connection: ConnectionId = match next(&mut server_events).await {
        ServerEvent::ClientConnected {
            connection_id,
            handle,
            ..
        } => {
            assert_eq!(authority.connect(connection_id, handle), 1);
            connection_id
        }
        other => panic!("unexpected event: {:?}", other),
    };
    assert_eq!(connection, response.connection_id);

    assert!(matches!(next(&mut client_events).await, ClientEvent::Connected { .. }));
    for expected in [PacketType::SpawnActor, PacketType::Replication] {
        match next(&mut client_events).await {
            ClientEvent::PacketReceived { packet } => {
                assert_eq!(packet.packet_type(), expected);
                assert_ok!(observer.handle_packet(0, &packet));
            }
            other => panic!("unexpected event: {:?}", other),
        }
    }

    assert_eq!(observer.get_field(id, "Health"), Some(&Value::Int32(100)));
    assert_eq!(observer.get_field(id, "Name"), Some(&Value::String("Bot".into())));

    assert_ok!(client.disconnect().await);
    assert!(matches!(
        next(&mut server_events).await,
        ServerEvent::ClientDisconnected { .. }
    ));
    assert!(authority.disconnect(connection));
    assert_ok!(server.stop().await);
}
