//! End-to-end session tests over in-memory transport pairs.
//!
//! The test sits on both outer ends of the proxy: it plays the game
//! client against one pair and the upstream server against the other,
//! doing its own XOR and schema work so the proxy's pipeline is
//! exercised exactly as on the wire.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use base64::{Engine as _, engine::general_purpose::STANDARD as B64};
use prost_types::field_descriptor_proto::{Label, Type};
use prost_types::{DescriptorProto, FieldDescriptorProto, FileDescriptorProto, FileDescriptorSet};
use rsa::{Pkcs1v15Encrypt, RsaPrivateKey, RsaPublicKey};
use serde_json::{Value as Json, json};
use tokio::time::timeout;

use viaduct_crypto::{KeyBlock, Keystream, SecretKey, SharedKey};
use viaduct_proto::mapping::{Mapping, Protocol};
use viaduct_proto::{DescriptorPool, DynamicMessage, envelope};
use viaduct_proxy::config::Config;
use viaduct_proxy::console::{CONSOLE_NICKNAME, HELP_TEXT, WELCOME_TEXT};
use viaduct_proxy::service::{Keys, Service};
use viaduct_proxy::session::Session;
use viaduct_proxy::transport::Conn;

// ── Schema builders ───────────────────────────────────────────────────────────

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

fn msg_field(name: &str, number: i32, type_name: &str) -> FieldDescriptorProto {
    FieldDescriptorProto { type_name: Some(format!(".{type_name}")), ..field(name, number, Type::Message) }
}

fn rep_msg_field(name: &str, number: i32, type_name: &str) -> FieldDescriptorProto {
    FieldDescriptorProto { label: Some(Label::Repeated as i32), ..msg_field(name, number, type_name) }
}

fn message(name: &str, fields: Vec<FieldDescriptorProto>) -> DescriptorProto {
    DescriptorProto { name: Some(name.into()), field: fields, ..Default::default() }
}

fn pool(messages: Vec<DescriptorProto>) -> DescriptorPool {
    DescriptorPool::from_set(&FileDescriptorSet {
        file: vec![FileDescriptorProto {
            name: Some("test.proto".into()),
            message_type: messages,
            ..Default::default()
        }],
    })
}

/// Messages whose shape is identical in both versions.
fn shared_messages() -> Vec<DescriptorProto> {
    vec![
        message("UnionCmd", vec![field("message_id", 1, Type::Uint32), field("body", 2, Type::Bytes)]),
        message("UnionCmdNotify", vec![rep_msg_field("cmd_list", 1, "UnionCmd")]),
        message("ChatInfo", vec![
            field("time", 1, Type::Uint32),
            field("sequence", 2, Type::Uint32),
            field("to_uid", 3, Type::Uint32),
            field("uid", 4, Type::Uint32),
            field("is_read", 5, Type::Bool),
            field("text", 6, Type::String),
            field("icon", 7, Type::Uint32),
        ]),
        message("PrivateChatReq", vec![
            field("target_uid", 1, Type::Uint32),
            field("text", 2, Type::String),
            field("icon", 3, Type::Uint32),
        ]),
        message("PrivateChatNotify", vec![msg_field("chat_info", 1, "ChatInfo")]),
        message("PrivateChatRsp", vec![
            field("chat_forbidden_endtime", 1, Type::Uint32),
            field("retcode", 2, Type::Int32),
        ]),
        message("ProfilePicture", vec![
            field("avatar_id", 1, Type::Uint32),
            field("costume_id", 2, Type::Uint32),
        ]),
        message("FriendBrief", vec![
            field("uid", 1, Type::Uint32),
            field("nickname", 2, Type::String),
            field("level", 3, Type::Uint32),
            field("world_level", 4, Type::Uint32),
            field("signature", 5, Type::String),
            field("name_card_id", 6, Type::Uint32),
            msg_field("profile_picture", 7, "ProfilePicture"),
            field("is_game_source", 8, Type::Bool),
            field("online_state", 9, Type::Enum),
            field("platform_type", 10, Type::Enum),
        ]),
        message("GetPlayerFriendListRsp", vec![
            field("retcode", 1, Type::Int32),
            rep_msg_field("friend_list", 2, "FriendBrief"),
            rep_msg_field("ask_friend_list", 3, "FriendBrief"),
        ]),
        message("PullRecentChatReq", vec![
            field("pull_num", 1, Type::Uint32),
            field("begin_sequence", 2, Type::Uint32),
        ]),
        message("PullRecentChatRsp", vec![
            field("retcode", 1, Type::Int32),
            rep_msg_field("chat_info", 2, "ChatInfo"),
        ]),
        message("PlayerEnterSceneNotify", vec![
            field("scene_id", 1, Type::Uint32),
            field("prev_scene_id", 2, Type::Uint32),
        ]),
        message("PostEnterSceneRsp", vec![field("retcode", 1, Type::Int32)]),
    ]
}

fn client_pool() -> DescriptorPool {
    let mut messages = shared_messages();
    messages.extend(vec![
        message("GetPlayerTokenReq", vec![
            field("key_id", 1, Type::Uint32),
            field("client_rand_key", 2, Type::String),
        ]),
        message("GetPlayerTokenRsp", vec![
            field("retcode", 1, Type::Int32),
            field("uid", 2, Type::Uint32),
            field("key_id", 3, Type::Uint32),
            field("server_rand_key", 4, Type::String),
        ]),
        message("AvatarDataNotify", vec![
            field("avatar_id", 1, Type::Uint32),
            field("guid", 2, Type::Uint64),
            repeated("talent_ids", 3, Type::Uint32),
        ]),
        message("ClientSetGameTimeReq", vec![
            field("is_force_set", 1, Type::Bool),
            field("game_time", 2, Type::Uint32),
            field("client_game_time", 3, Type::Uint32),
        ]),
        message("ClientSetGameTimeRsp", vec![
            field("retcode", 1, Type::Int32),
            field("game_time", 2, Type::Uint32),
            field("client_game_time", 3, Type::Uint32),
        ]),
        message("PlayerLuaShellNotify", vec![
            field("id", 1, Type::Uint32),
            field("shell_type", 2, Type::Uint32),
            field("use_type", 3, Type::Uint32),
            field("lua_shell", 4, Type::Bytes),
        ]),
    ]);
    pool(messages)
}

/// The upstream dialect: same names, reshuffled tags, and the
/// time-of-day request/response pair replaced by the server variant.
fn server_pool() -> DescriptorPool {
    let mut messages = shared_messages();
    messages.extend(vec![
        message("GetPlayerTokenReq", vec![
            field("key_id", 3, Type::Uint32),
            field("client_rand_key", 7, Type::String),
        ]),
        message("GetPlayerTokenRsp", vec![
            field("retcode", 5, Type::Int32),
            field("uid", 1, Type::Uint32),
            field("key_id", 9, Type::Uint32),
            field("server_rand_key", 2, Type::String),
        ]),
        message("AvatarDataNotify", vec![
            field("avatar_id", 9, Type::Uint32),
            field("guid", 6, Type::Uint64),
            repeated("talent_ids", 2, Type::Uint32),
        ]),
        message("ChangeGameTimeReq", vec![
            field("is_force_set", 1, Type::Bool),
            field("game_time", 2, Type::Uint32),
            field("extra_days", 3, Type::Uint32),
        ]),
        message("ChangeGameTimeRsp", vec![
            field("retcode", 1, Type::Int32),
            field("game_time", 2, Type::Uint32),
            field("extra_days", 3, Type::Uint32),
        ]),
    ]);
    pool(messages)
}

fn cmds(entries: &[(&str, u16)]) -> HashMap<String, u16> {
    entries.iter().map(|(n, c)| (n.to_string(), *c)).collect()
}

fn client_cmds() -> HashMap<String, u16> {
    cmds(&[
        ("GetPlayerTokenReq", 101),
        ("GetPlayerTokenRsp", 102),
        ("AvatarDataNotify", 110),
        ("UnionCmdNotify", 120),
        ("ClientSetGameTimeReq", 130),
        ("ClientSetGameTimeRsp", 131),
        ("PrivateChatReq", 140),
        ("PrivateChatNotify", 141),
        ("PrivateChatRsp", 142),
        ("GetPlayerFriendListRsp", 150),
        ("PullRecentChatReq", 170),
        ("PullRecentChatRsp", 171),
        ("PlayerEnterSceneNotify", 180),
        ("PostEnterSceneRsp", 181),
        ("PlayerLuaShellNotify", 190),
    ])
}

fn server_cmds() -> HashMap<String, u16> {
    cmds(&[
        ("GetPlayerTokenReq", 201),
        ("GetPlayerTokenRsp", 202),
        ("AvatarDataNotify", 210),
        ("UnionCmdNotify", 220),
        ("ChangeGameTimeReq", 230),
        ("ChangeGameTimeRsp", 231),
        ("PrivateChatReq", 240),
        ("PrivateChatNotify", 241),
        ("PrivateChatRsp", 242),
        ("GetPlayerFriendListRsp", 250),
        ("PullRecentChatReq", 270),
        ("PullRecentChatRsp", 271),
        ("PlayerEnterSceneNotify", 280),
        ("PostEnterSceneRsp", 281),
    ])
}

// ── Harness ───────────────────────────────────────────────────────────────────

fn v30() -> Protocol {
    Protocol::new("3.0")
}

fn v34() -> Protocol {
    Protocol::new("3.4")
}

fn shared_pad() -> Vec<u8> {
    (0..4096u32).map(|i| (i.wrapping_mul(7).wrapping_add(13)) as u8).collect()
}

fn make_service(server_key: &RsaPrivateKey, client_key: &RsaPrivateKey) -> Arc<Service> {
    let mut config = Config::default();
    config.console.enabled = true;
    config.protocols.base = "3.0".into();
    config.endpoints.main_protocol = "3.4".into();

    let keys = Keys::new(
        SecretKey::from(server_key.clone()),
        SharedKey::new(shared_pad()).unwrap(),
        HashMap::from([(3u32, SecretKey::from(client_key.clone()))]),
    );
    let mapping = Mapping::new(v30(), vec![
        (v30(), client_pool(), client_cmds()),
        (v34(), server_pool(), server_cmds()),
    ])
    .unwrap();
    Service::with_parts(config, keys, mapping).unwrap()
}

fn rsa_pair() -> (RsaPrivateKey, RsaPrivateKey) {
    let mut rng = rand::thread_rng();
    (RsaPrivateKey::new(&mut rng, 512).unwrap(), RsaPrivateKey::new(&mut rng, 512).unwrap())
}

/// Spawn a session; returns the test's client-side and server-side
/// transport ends.
fn start(service: &Arc<Service>) -> (Arc<Conn>, Arc<Conn>) {
    let (client, down) = Conn::pair();
    let (server, up) = Conn::pair();
    let session = Session::new(service.clone(), v30(), down, up);
    tokio::spawn(session.run());
    (client, server)
}

fn encode_body(service: &Arc<Service>, v: &Protocol, name: &str, body: &Json) -> Vec<u8> {
    let pool = service.mapping.pool(v).unwrap();
    let desc = service.mapping.descriptor(v, name).unwrap();
    DynamicMessage::from_json(pool, desc, body).unwrap().encode()
}

fn wire(service: &Arc<Service>, v: &Protocol, name: &str, cmd: u16, body: &Json, key: &dyn Keystream) -> Vec<u8> {
    let mut payload = envelope::encode(cmd, &[], &encode_body(service, v, name, body));
    key.xor(&mut payload);
    payload
}

async fn recv_packet(
    service: &Arc<Service>,
    v: &Protocol,
    conn: &Arc<Conn>,
    key: &dyn Keystream,
) -> (u16, Json) {
    let mut payload = timeout(Duration::from_secs(2), conn.recv())
        .await
        .expect("timed out waiting for a frame")
        .expect("transport closed");
    key.xor(&mut payload);
    let (cmd, _head, body) = envelope::decode(&payload).expect("bad envelope");
    let name = service.mapping.command_name(v, cmd).expect("unknown cmd").to_string();
    let desc = service.mapping.descriptor(v, &name).unwrap();
    let json = DynamicMessage::decode(service.mapping.pool(v).unwrap(), desc, body).unwrap().to_json();
    (cmd, json)
}

async fn assert_silent(conn: &Arc<Conn>) {
    assert!(
        timeout(Duration::from_millis(100), conn.recv()).await.is_err(),
        "expected no pending frame"
    );
}

// ── Scenarios ─────────────────────────────────────────────────────────────────

#[tokio::test]
async fn handshake_derives_the_session_key() {
    let (server_key, client_key) = rsa_pair();
    let service = make_service(&server_key, &client_key);
    let (client, server) = start(&service);
    let shared = SharedKey::new(shared_pad()).unwrap();
    let mut rng = rand::thread_rng();

    // Token request sealed to the server key, under the shared pad.
    let seed_client: u64 = 0x0102_0304_0506_0708;
    let sealed = RsaPublicKey::from(&server_key)
        .encrypt(&mut rng, Pkcs1v15Encrypt, &seed_client.to_be_bytes())
        .unwrap();
    let req = json!({"keyId": 3, "clientRandKey": B64.encode(sealed)});
    client.send(&wire(&service, &v30(), "GetPlayerTokenReq", 101, &req, &shared)).await.unwrap();

    let (cmd, fwd) = recv_packet(&service, &v34(), &server, &shared).await;
    assert_eq!(cmd, 201, "token req must carry the upstream cmd");
    assert_eq!(fwd["keyId"], json!(3));
    assert_eq!(fwd["clientRandKey"], req["clientRandKey"]);

    // Token response sealed to client key 3, still under the shared pad.
    let seed_server: u64 = 0x0807_0605_0403_0201;
    let sealed = RsaPublicKey::from(&client_key)
        .encrypt(&mut rng, Pkcs1v15Encrypt, &seed_server.to_be_bytes())
        .unwrap();
    let rsp = json!({"retcode": 0, "uid": 12345, "keyId": 3, "serverRandKey": B64.encode(sealed)});
    server.send(&wire(&service, &v34(), "GetPlayerTokenRsp", 202, &rsp, &shared)).await.unwrap();

    let (cmd, fwd) = recv_packet(&service, &v30(), &client, &shared).await;
    assert_eq!(cmd, 102);
    assert_eq!(fwd["uid"], json!(12345));

    // Everything after the handshake rides the MT19937 block seeded by
    // the XOR of the two seeds; tag reshuffles must be invisible.
    let session_key = KeyBlock::new(seed_client ^ seed_server);
    let notify = json!({"avatarId": 901, "guid": "7000000001", "talentIds": [3, 4, 5]});
    server.send(&wire(&service, &v34(), "AvatarDataNotify", 210, &notify, &session_key)).await.unwrap();

    let (cmd, fwd) = recv_packet(&service, &v30(), &client, &session_key).await;
    assert_eq!(cmd, 110);
    assert_eq!(fwd, notify);
}

#[tokio::test]
async fn game_time_requests_are_rewritten_and_paired() {
    let (server_key, client_key) = rsa_pair();
    let service = make_service(&server_key, &client_key);
    let (client, server) = start(&service);
    let shared = SharedKey::new(shared_pad()).unwrap();

    let req = json!({"isForceSet": true, "gameTime": 4321, "clientGameTime": 1000});
    client.send(&wire(&service, &v30(), "ClientSetGameTimeReq", 130, &req, &shared)).await.unwrap();

    let (cmd, fwd) = recv_packet(&service, &v34(), &server, &shared).await;
    assert_eq!(cmd, 230, "must arrive as ChangeGameTimeReq");
    assert_eq!(fwd["isForceSet"], json!(true));
    assert_eq!(fwd["gameTime"], json!(1));
    assert_eq!(fwd["extraDays"], json!(2));
    // The original request must not be forwarded as well.
    assert_silent(&server).await;

    let rsp = json!({"retcode": 0, "gameTime": 1, "extraDays": 2});
    server.send(&wire(&service, &v34(), "ChangeGameTimeRsp", 231, &rsp, &shared)).await.unwrap();

    let (cmd, fwd) = recv_packet(&service, &v30(), &client, &shared).await;
    assert_eq!(cmd, 131, "must arrive as ClientSetGameTimeRsp");
    assert_eq!(fwd["retcode"], json!(0));
    assert_eq!(fwd["gameTime"], json!(4321));
    assert_eq!(fwd["clientGameTime"], json!(1000));
    assert_silent(&client).await;

    // Without a cached request the server response passes through
    // untouched, but it has no client-side name, so it is dropped.
    server.send(&wire(&service, &v34(), "ChangeGameTimeRsp", 231, &rsp, &shared)).await.unwrap();
    assert_silent(&client).await;
}

#[tokio::test]
async fn union_cmd_entries_translate_per_entry() {
    let (server_key, client_key) = rsa_pair();
    let service = make_service(&server_key, &client_key);
    let (client, server) = start(&service);
    let shared = SharedKey::new(shared_pad()).unwrap();

    let inner_a = json!({"avatarId": 11, "guid": "900001", "talentIds": [1]});
    let inner_b = json!({"avatarId": 22, "guid": "900002", "talentIds": [2, 3]});
    let batch = json!({"cmdList": [
        {"messageId": 110, "body": B64.encode(encode_body(&service, &v30(), "AvatarDataNotify", &inner_a))},
        {"messageId": 110, "body": B64.encode(encode_body(&service, &v30(), "AvatarDataNotify", &inner_b))},
    ]});
    client.send(&wire(&service, &v30(), "UnionCmdNotify", 120, &batch, &shared)).await.unwrap();

    let (cmd, fwd) = recv_packet(&service, &v34(), &server, &shared).await;
    assert_eq!(cmd, 220);
    let entries = fwd["cmdList"].as_array().unwrap();
    assert_eq!(entries.len(), 2);
    for (entry, inner) in entries.iter().zip([&inner_a, &inner_b]) {
        assert_eq!(entry["messageId"], json!(210), "inner cmd must translate");
        let body = B64.decode(entry["body"].as_str().unwrap()).unwrap();
        let desc = service.mapping.descriptor(&v34(), "AvatarDataNotify").unwrap();
        let decoded = DynamicMessage::decode(service.mapping.pool(&v34()).unwrap(), desc, &body)
            .unwrap()
            .to_json();
        assert_eq!(&decoded, inner, "inner body must re-encode under the upstream schema");
    }
}

#[tokio::test]
async fn console_chat_is_injected_not_forwarded() {
    let (server_key, client_key) = rsa_pair();
    let service = make_service(&server_key, &client_key);
    let (client, server) = start(&service);
    let shared = SharedKey::new(shared_pad()).unwrap();

    let req = json!({"targetUid": 1, "text": "help", "icon": 0});
    client.send(&wire(&service, &v30(), "PrivateChatReq", 140, &req, &shared)).await.unwrap();

    // Echo comes first; the retcode-0 response and the gateway reply
    // follow in either order (the reply runs on a detached task).
    let (cmd, echo) = recv_packet(&service, &v30(), &client, &shared).await;
    assert_eq!(cmd, 141);
    assert_eq!(echo["chatInfo"]["toUid"], json!(1));
    assert_eq!(echo["chatInfo"]["text"], json!("help"));

    let mut saw_rsp = false;
    let mut saw_reply = false;
    for _ in 0..2 {
        let (cmd, body) = recv_packet(&service, &v30(), &client, &shared).await;
        match cmd {
            142 => {
                assert!(body["retcode"].as_i64().unwrap_or(0) == 0);
                saw_rsp = true;
            }
            141 => {
                assert_eq!(body["chatInfo"]["uid"], json!(1));
                assert_eq!(body["chatInfo"]["text"], json!(HELP_TEXT));
                saw_reply = true;
            }
            other => panic!("unexpected cmd {other}"),
        }
    }
    assert!(saw_rsp && saw_reply);

    // The original chat request never reaches the server.
    assert_silent(&server).await;
}

#[tokio::test]
async fn friend_list_gains_the_console_entry() {
    let (server_key, client_key) = rsa_pair();
    let service = make_service(&server_key, &client_key);
    let (client, server) = start(&service);
    let shared = SharedKey::new(shared_pad()).unwrap();

    let rsp = json!({"retcode": 0, "friendList": [{"uid": 555, "nickname": "pal", "level": 40}]});
    server.send(&wire(&service, &v34(), "GetPlayerFriendListRsp", 250, &rsp, &shared)).await.unwrap();

    let (cmd, fwd) = recv_packet(&service, &v30(), &client, &shared).await;
    assert_eq!(cmd, 150);
    let friends = fwd["friendList"].as_array().unwrap();
    assert_eq!(friends.len(), 2);
    assert_eq!(friends[0]["uid"], json!(555));
    assert_eq!(friends[1]["uid"], json!(1));
    assert_eq!(friends[1]["nickname"], json!(CONSOLE_NICKNAME));
    assert_eq!(friends[1]["profilePicture"]["avatarId"], json!(10000077));
    assert_eq!(friends[1]["isGameSource"], json!(true));
}

#[tokio::test]
async fn first_recent_chat_page_gets_the_welcome() {
    let (server_key, client_key) = rsa_pair();
    let service = make_service(&server_key, &client_key);
    let (client, server) = start(&service);
    let shared = SharedKey::new(shared_pad()).unwrap();

    let req = json!({"pullNum": 10, "beginSequence": 0});
    client.send(&wire(&service, &v30(), "PullRecentChatReq", 170, &req, &shared)).await.unwrap();
    let (cmd, _) = recv_packet(&service, &v34(), &server, &shared).await;
    assert_eq!(cmd, 270, "the pull itself still goes upstream");

    let rsp = json!({"retcode": 0, "chatInfo": []});
    server.send(&wire(&service, &v34(), "PullRecentChatRsp", 271, &rsp, &shared)).await.unwrap();

    let (cmd, fwd) = recv_packet(&service, &v30(), &client, &shared).await;
    assert_eq!(cmd, 171);
    let chat = fwd["chatInfo"].as_array().unwrap();
    assert_eq!(chat.len(), 1);
    assert_eq!(chat[0]["uid"], json!(1));
    assert_eq!(chat[0]["text"], json!(WELCOME_TEXT));
}

#[tokio::test]
async fn malformed_frames_do_not_end_the_session() {
    let (server_key, client_key) = rsa_pair();
    let service = make_service(&server_key, &client_key);
    let (client, server) = start(&service);
    let shared = SharedKey::new(shared_pad()).unwrap();

    // Too short to even carry the envelope overhead.
    client.send(&[0x45, 0x67, 0x00]).await.unwrap();

    // Declared body length beyond the actual buffer.
    let notify = json!({"avatarId": 1, "guid": "2", "talentIds": []});
    let mut broken = envelope::encode(110, &[], &encode_body(&service, &v30(), "AvatarDataNotify", &notify));
    broken[6..10].copy_from_slice(&0xFFFF_u32.to_be_bytes());
    shared.xor(&mut broken);
    client.send(&broken).await.unwrap();

    // A cmd that no schema knows.
    let mut unknown = envelope::encode(9999, &[], &[]);
    shared.xor(&mut unknown);
    client.send(&unknown).await.unwrap();

    // The session keeps converting what follows.
    let good = json!({"avatarId": 77, "guid": "42", "talentIds": [9]});
    client.send(&wire(&service, &v30(), "AvatarDataNotify", 110, &good, &shared)).await.unwrap();
    let (cmd, fwd) = recv_packet(&service, &v34(), &server, &shared).await;
    assert_eq!(cmd, 210);
    assert_eq!(fwd["avatarId"], json!(77));
}

#[tokio::test]
async fn scripts_are_pushed_after_a_scene_change() {
    let (server_key, client_key) = rsa_pair();
    let service = make_service(&server_key, &client_key);
    service.swap_scripts(vec![b"\x1bLuaQ test chunk".to_vec()]);
    let (client, server) = start(&service);
    let shared = SharedKey::new(shared_pad()).unwrap();

    let enter = json!({"sceneId": 3, "prevSceneId": 1});
    server.send(&wire(&service, &v34(), "PlayerEnterSceneNotify", 280, &enter, &shared)).await.unwrap();
    let (cmd, _) = recv_packet(&service, &v30(), &client, &shared).await;
    assert_eq!(cmd, 180);

    let post = json!({"retcode": 0});
    server.send(&wire(&service, &v34(), "PostEnterSceneRsp", 281, &post, &shared)).await.unwrap();

    // The script push is injected before the response is forwarded.
    let (cmd, shell) = recv_packet(&service, &v30(), &client, &shared).await;
    assert_eq!(cmd, 190);
    assert_eq!(shell["id"], json!(1));
    assert_eq!(shell["shellType"], json!(1));
    assert_eq!(
        B64.decode(shell["luaShell"].as_str().unwrap()).unwrap(),
        b"\x1bLuaQ test chunk"
    );
    let (cmd, _) = recv_packet(&service, &v30(), &client, &shared).await;
    assert_eq!(cmd, 181);

    // Re-entering the same scene pushes nothing.
    let same = json!({"sceneId": 3, "prevSceneId": 3});
    server.send(&wire(&service, &v34(), "PlayerEnterSceneNotify", 280, &same, &shared)).await.unwrap();
    let (cmd, _) = recv_packet(&service, &v30(), &client, &shared).await;
    assert_eq!(cmd, 180);
    server.send(&wire(&service, &v34(), "PostEnterSceneRsp", 281, &post, &shared)).await.unwrap();
    let (cmd, _) = recv_packet(&service, &v30(), &client, &shared).await;
    assert_eq!(cmd, 181, "no shell push without a scene change");
}
