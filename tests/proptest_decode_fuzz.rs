//! Decoders must reject garbage with an error, never a panic

use bytes::BytesMut;
use proptest::prelude::*;

use actornet::inspect::{describe_packet, describe_stream};
use actornet::owner::NetworkOwner;
use actornet::protocol::{Decoder, FieldReader, PacketType, ValueKind, WirePacket};
use actornet::replication::{decode_replication, EntitySchema};
use actornet::rpc::{decode_rpc_call, RpcInvocation, RpcSignature};
use actornet::session::{Session, SessionRole};

fn observer() -> Session {
    let mut session = Session::new(SessionRole::Observer);
    session.register_type(
        EntitySchema::builder("Bot")
            .field("Health", ValueKind::Int32)
            .field("Name", ValueKind::String)
            .field("Position", ValueKind::Vector3)
            .field("Target", ValueKind::Reference)
            .rpc(
                RpcSignature::method("Taunt")
                    .param("text", ValueKind::String)
                    .optional_param("volume", ValueKind::Float32),
            )
            .build()
            .unwrap(),
    );
    session
}

fn packet_type() -> impl Strategy<Value = PacketType> {
    prop_oneof![
        Just(PacketType::Replication),
        Just(PacketType::SpawnActor),
        Just(PacketType::DespawnActor),
        Just(PacketType::NewObject),
        Just(PacketType::DestroyObject),
        Just(PacketType::RpcCall),
        Just(PacketType::ConnectionRequest),
        Just(PacketType::ConnectionResponse),
        Just(PacketType::Custom),
    ]
}

/// Payloads aimed at entity 1 so they reach the field decoders
fn targeted_payload() -> impl Strategy<Value = Vec<u8>> {
    proptest::collection::vec(any::<u8>(), 0..256).prop_map(|tail| {
        let mut payload = Vec::with_capacity(12 + tail.len());
        payload.extend_from_slice(&0i32.to_le_bytes());
        payload.extend_from_slice(&1i64.to_le_bytes());
        payload.extend_from_slice(&tail);
        payload
    })
}

proptest! {
    #[test]
    fn schemaless_decoders_never_panic(data in proptest::collection::vec(any::<u8>(), 0..512)) {
        let _ = decode_replication(&data);
        let _ = decode_rpc_call(&data);
        let _ = describe_stream(&data);

        let mut reader = FieldReader::new(&data);
        while let Ok(header) = reader.read_field_header() {
            if reader.skip_value(&header).is_err() {
                break;
            }
        }
    }

    #[test]
    fn frame_decoder_never_panics(data in proptest::collection::vec(any::<u8>(), 0..512)) {
        let mut decoder = Decoder::with_max_frame_size(256);
        let mut buf = BytesMut::from(&data[..]);
        while let Ok(Some(packet)) = decoder.decode(&mut buf) {
            let _ = describe_packet(&packet);
        }
    }

    #[test]
    fn raw_packets_never_panic(data in proptest::collection::vec(any::<u8>(), 0..256)) {
        if let Ok(packet) = WirePacket::from_raw(&data[..]) {
            let summary = describe_packet(&packet);
            prop_assert_eq!(summary.payload_len, data.len() - 4);
        } else {
            prop_assert!(data.len() < 4 || PacketType::from_code(i32::from_le_bytes([data[0], data[1], data[2], data[3]])).is_none());
        }
    }

    #[test]
    fn observer_survives_garbage(kind in packet_type(), payload in targeted_payload()) {
        let mut session = observer();
        session.spawn("Bot", None, Some(1)).unwrap();
        let before = session.entity(1).map(|e| e.get("Health").cloned());

        let packet = WirePacket::with_payload(kind, &payload);
        if session.handle_packet(0, &packet).is_err() && kind == PacketType::Replication {
            // A rejected frame leaves the entity as it was
            prop_assert_eq!(session.entity(1).map(|e| e.get("Health").cloned()), before);
        }
    }

    #[test]
    fn rpc_decode_never_panics(tail in proptest::collection::vec(any::<u8>(), 0..256)) {
        let signature = RpcSignature::method("Taunt")
            .param("text", ValueKind::String)
            .optional_param("volume", ValueKind::Float32);

        let mut payload = Vec::new();
        payload.extend_from_slice(&0i32.to_le_bytes());
        payload.extend_from_slice(&1i64.to_le_bytes());
        payload.extend_from_slice(&5i32.to_le_bytes());
        payload.extend_from_slice(b"Taunt");
        payload.extend_from_slice(&0i32.to_le_bytes());
        payload.extend_from_slice(&tail);

        let packet = WirePacket::with_payload(PacketType::RpcCall, &payload);
        let _ = RpcInvocation::from_packet(&packet, &signature);
    }
}
