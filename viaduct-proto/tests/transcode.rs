use std::collections::HashMap;

use prost_types::field_descriptor_proto::{Label, Type};
use prost_types::{DescriptorProto, FieldDescriptorProto, FileDescriptorProto, FileDescriptorSet};
use serde_json::json;

use viaduct_proto::mapping::{Mapping, Protocol};
use viaduct_proto::{DescriptorPool, DynamicMessage};

// ── Descriptor-set builders ───────────────────────────────────────────────────

fn field(name: &str, number: i32, ty: Type) -> FieldDescriptorProto {
    FieldDescriptorProto {
        name: Some(name.into()),
        number: Some(number),
        label: Some(Label::Optional as i32),
        r#type: Some(ty as i32),
        ..Default::default()
    }
}

fn repeated(name: &str, number: i32, ty: Type) -> FieldDescriptorProto {
    FieldDescriptorProto { label: Some(Label::Repeated as i32), ..field(name, number, ty) }
}

fn message_field(name: &str, number: i32, type_name: &str) -> FieldDescriptorProto {
    FieldDescriptorProto {
        type_name: Some(format!(".{type_name}")),
        ..field(name, number, Type::Message)
    }
}

fn message(name: &str, fields: Vec<FieldDescriptorProto>) -> DescriptorProto {
    DescriptorProto { name: Some(name.into()), field: fields, ..Default::default() }
}

fn pool(messages: Vec<DescriptorProto>) -> DescriptorPool {
    let set = FileDescriptorSet {
        file: vec![FileDescriptorProto {
            name: Some("test.proto".into()),
            message_type: messages,
            ..Default::default()
        }],
    };
    DescriptorPool::from_set(&set)
}

// ── Dynamic codec ─────────────────────────────────────────────────────────────

#[test]
fn json_and_wire_round_trip() {
    let pool = pool(vec![
        message("Vector", vec![
            field("x", 1, Type::Float),
            field("y", 2, Type::Float),
            field("z", 3, Type::Float),
        ]),
        message("MarkPoint", vec![
            field("scene_id", 1, Type::Uint32),
            field("name", 2, Type::String),
            message_field("pos", 3, "Vector"),
            field("guid", 4, Type::Uint64),
            field("payload", 5, Type::Bytes),
            repeated("tags", 6, Type::Uint32),
        ]),
    ]);
    let desc = pool.get("MarkPoint").unwrap();

    let source = json!({
        "sceneId": 3,
        "name": "goto",
        "pos": {"x": 10.5, "y": 0.0, "z": -4.25},
        "guid": "9876543210123456789",
        "payload": "AQIDBA==",
        "tags": [1, 2, 300000],
    });

    let wire = DynamicMessage::from_json(&pool, desc.clone(), &source).unwrap().encode();
    let back = DynamicMessage::decode(&pool, desc, &wire).unwrap().to_json();

    assert_eq!(back["sceneId"], json!(3));
    assert_eq!(back["name"], json!("goto"));
    assert_eq!(back["pos"]["x"], json!(10.5));
    assert_eq!(back["pos"]["z"], json!(-4.25));
    assert_eq!(back["guid"], json!("9876543210123456789"));
    assert_eq!(back["payload"], json!("AQIDBA=="));
    assert_eq!(back["tags"], json!([1, 2, 300000]));
}

#[test]
fn signed_and_enum_fields_survive() {
    let pool = pool(vec![message("Sample", vec![
        field("retcode", 1, Type::Int32),
        field("delta", 2, Type::Sint64),
        field("state", 3, Type::Enum),
    ])]);
    let desc = pool.get("Sample").unwrap();

    let source = json!({"retcode": -7, "delta": "-1234567", "state": 4});
    let wire = DynamicMessage::from_json(&pool, desc.clone(), &source).unwrap().encode();
    let back = DynamicMessage::decode(&pool, desc, &wire).unwrap().to_json();

    assert_eq!(back["retcode"], json!(-7));
    assert_eq!(back["delta"], json!("-1234567"));
    assert_eq!(back["state"], json!(4));
}

#[test]
fn unknown_wire_fields_are_skipped() {
    let rich = pool(vec![message("Msg", vec![
        field("kept", 1, Type::Uint32),
        field("dropped", 2, Type::String),
    ])]);
    let narrow = pool(vec![message("Msg", vec![field("kept", 1, Type::Uint32)])]);

    let wire = DynamicMessage::from_json(&rich, rich.get("Msg").unwrap(), &json!({
        "kept": 9, "dropped": "gone",
    }))
    .unwrap()
    .encode();

    let back = DynamicMessage::decode(&narrow, narrow.get("Msg").unwrap(), &wire)
        .unwrap()
        .to_json();
    assert_eq!(back, json!({"kept": 9}));
}

#[test]
fn unknown_json_keys_are_ignored() {
    let pool = pool(vec![message("Msg", vec![field("kept", 1, Type::Uint32)])]);
    let desc = pool.get("Msg").unwrap();
    let msg = DynamicMessage::from_json(&pool, desc, &json!({
        "kept": 1, "mystery": {"deep": true},
    }))
    .unwrap();
    assert_eq!(msg.to_json(), json!({"kept": 1}));
}

#[test]
fn snake_case_keys_parse_too() {
    let pool = pool(vec![message("Msg", vec![field("client_rand_key", 1, Type::String)])]);
    let desc = pool.get("Msg").unwrap();
    let msg = DynamicMessage::from_json(&pool, desc, &json!({"client_rand_key": "abc"})).unwrap();
    assert_eq!(msg.to_json(), json!({"clientRandKey": "abc"}));
}

// ── Cross-version transcoding ─────────────────────────────────────────────────

/// Two schema universes for the same message, numeric tags reshuffled.
fn two_versions() -> (DescriptorPool, DescriptorPool) {
    let old = pool(vec![message("AvatarDataNotify", vec![
        field("avatar_id", 1, Type::Uint32),
        field("guid", 2, Type::Uint64),
        field("born_time", 3, Type::Uint32),
        repeated("talent_ids", 4, Type::Uint32),
    ])]);
    let new = pool(vec![message("AvatarDataNotify", vec![
        repeated("talent_ids", 2, Type::Uint32),
        field("guid", 6, Type::Uint64),
        field("avatar_id", 9, Type::Uint32),
        field("born_time", 14, Type::Uint32),
    ])]);
    (old, new)
}

#[test]
fn field_names_survive_tag_reshuffles() {
    let (old, new) = two_versions();
    let old_desc = old.get("AvatarDataNotify").unwrap();
    let new_desc = new.get("AvatarDataNotify").unwrap();

    let source = json!({
        "avatarId": 10000077,
        "guid": "281474976710656",
        "bornTime": 1690000000,
        "talentIds": [71, 72],
    });

    // old wire → json → new wire → json: the name/value sets must match.
    let old_wire = DynamicMessage::from_json(&old, old_desc.clone(), &source).unwrap().encode();
    let mid = DynamicMessage::decode(&old, old_desc.clone(), &old_wire).unwrap().to_json();
    let new_wire = DynamicMessage::from_json(&new, new_desc.clone(), &mid).unwrap().encode();
    assert_ne!(old_wire, new_wire, "tags differ, wire forms must too");

    let far = DynamicMessage::decode(&new, new_desc, &new_wire).unwrap().to_json();
    assert_eq!(far, source);

    // and back again.
    let home_wire = DynamicMessage::from_json(&old, old_desc.clone(), &far).unwrap().encode();
    let home = DynamicMessage::decode(&old, old_desc, &home_wire).unwrap().to_json();
    assert_eq!(home, source);
}

// ── Mapping ───────────────────────────────────────────────────────────────────

fn mapping() -> Mapping {
    let (old, new) = two_versions();
    let v30 = Protocol::new("3.0");
    let v34 = Protocol::new("3.4");
    let old_cmds: HashMap<String, u16> = [("AvatarDataNotify".to_string(), 101)].into();
    let new_cmds: HashMap<String, u16> = [("AvatarDataNotify".to_string(), 207)].into();
    Mapping::new(v30.clone(), vec![(v30, old, old_cmds), (v34, new, new_cmds)]).unwrap()
}

#[test]
fn command_translation_is_symmetric() {
    let m = mapping();
    let v30 = Protocol::new("3.0");
    let v34 = Protocol::new("3.4");

    let forward = m.translate(&v30, &v34, 101).unwrap();
    assert_eq!(forward, 207);
    assert_eq!(m.translate(&v34, &v30, forward), Some(101));
    assert_eq!(m.command_name(&v30, 101), m.command_name(&v34, forward));
}

#[test]
fn unmapped_commands_translate_to_none() {
    let m = mapping();
    assert_eq!(m.translate(&Protocol::new("3.0"), &Protocol::new("3.4"), 9999), None);
}

#[test]
fn base_commands_come_from_the_base_version() {
    let m = mapping();
    assert_eq!(m.base_version().as_str(), "3.0");
    assert_eq!(m.base_command("AvatarDataNotify"), Some(101));
    assert_eq!(m.base_command("NoSuchNotify"), None);
}
