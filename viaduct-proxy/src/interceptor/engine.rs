//! In-flight rewrites and console injection.
//!
//! Time-of-day requests are rewritten into the upstream dialect and
//! answered back in the client's; the console lives here as a fake
//! friend whose chat is bridged to the admin gateway; map pins named
//! "goto" become teleport commands; scene changes trigger the lua
//! push; movement feeds the terrain grid.

use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use base64::{Engine as _, engine::general_purpose::STANDARD as B64};
use serde::{Deserialize, Serialize};
use serde_json::{Value as Json, json};
use tracing::{debug, error, warn};

use viaduct_proto::mapping::Protocol;

use super::Handled;
use crate::console;
use crate::session::{ConvertError, Session};

fn now_secs() -> u32 {
    SystemTime::now().duration_since(UNIX_EPOCH).map(|d| d.as_secs() as u32).unwrap_or(0)
}

// ─── JSON views ──────────────────────────────────────────────────────────────

#[derive(Clone, Deserialize, Default)]
#[serde(rename_all = "camelCase", default)]
pub(crate) struct ClientSetGameTimeReq {
    pub is_force_set: bool,
    pub game_time: u32,
    pub client_game_time: u32,
}

#[derive(Serialize, Default)]
#[serde(rename_all = "camelCase")]
struct ChangeGameTimeReq {
    is_force_set: bool,
    game_time: u32,
    extra_days: u32,
}

#[derive(Deserialize, Default)]
#[serde(rename_all = "camelCase", default)]
struct ChangeGameTimeRsp {
    retcode: i32,
}

#[derive(Serialize, Default)]
#[serde(rename_all = "camelCase")]
struct ClientSetGameTimeRsp {
    retcode: i32,
    game_time: u32,
    client_game_time: u32,
}

#[derive(Clone, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase", default)]
pub(crate) struct ChatInfo {
    pub time: u32,
    pub sequence: u32,
    pub to_uid: u32,
    pub uid: u32,
    pub is_read: bool,
    pub text: String,
    pub icon: u32,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct PrivateChatNotify {
    chat_info: ChatInfo,
}

#[derive(Deserialize, Default)]
#[serde(rename_all = "camelCase", default)]
struct PrivateChatReq {
    target_uid: u32,
    text: String,
    icon: u32,
}

#[derive(Serialize, Default)]
#[serde(rename_all = "camelCase")]
struct PrivateChatRsp {
    chat_forbidden_endtime: u32,
    retcode: i32,
}

#[derive(Deserialize, Default)]
#[serde(rename_all = "camelCase", default)]
struct PullPrivateChatReq {
    target_uid: u32,
}

#[derive(Serialize, Default)]
#[serde(rename_all = "camelCase")]
struct PullPrivateChatRsp {
    chat_info: Vec<ChatInfo>,
    retcode: i32,
}

#[derive(Clone, Deserialize, Default)]
#[serde(rename_all = "camelCase", default)]
pub(crate) struct PullRecentChatReq {
    #[allow(dead_code)]
    pub pull_num: u32,
    pub begin_sequence: u32,
}

#[derive(Clone, Copy, Deserialize, Default)]
#[serde(default)]
struct Vector {
    x: f32,
    y: f32,
    z: f32,
}

#[derive(Deserialize, Default)]
#[serde(rename_all = "camelCase", default)]
struct MapMarkPoint {
    name: String,
    pos: Option<Vector>,
}

#[derive(Deserialize, Default)]
#[serde(rename_all = "camelCase", default)]
struct MarkMapReq {
    mark: Option<MapMarkPoint>,
}

#[derive(Deserialize, Default)]
#[serde(rename_all = "camelCase", default)]
struct PlayerEnterSceneNotify {
    scene_id: u32,
    prev_scene_id: u32,
}

#[derive(Serialize)]
struct PlayerLuaShellNotify {
    id: u32,
    shell_type: u32,
    use_type: u32,
    lua_shell: String,
}

#[derive(Deserialize, Default)]
#[serde(rename_all = "camelCase", default)]
struct MotionInfo {
    pos: Option<Vector>,
    rot: Option<Vector>,
    speed: Option<Vector>,
    state: u32,
}

#[derive(Deserialize, Default)]
#[serde(rename_all = "camelCase", default)]
struct EntityMoveInfo {
    entity_id: u32,
    motion_info: Option<MotionInfo>,
}

// ─── Time of day ─────────────────────────────────────────────────────────────

impl Session {
    /// `ClientSetGameTimeReq` → upstream `ChangeGameTimeReq`. The
    /// original request is cached so the response can be paired.
    pub(super) async fn on_client_set_game_time_req(
        self: &Arc<Self>,
        to: &Protocol,
        head: &[u8],
        json: Json,
    ) -> Result<Handled, ConvertError> {
        let req: ClientSetGameTimeReq = serde_json::from_value(json.clone())?;
        let out = ChangeGameTimeReq {
            is_force_set: req.is_force_set,
            game_time: req.game_time % 1440,
            extra_days: req.game_time.wrapping_sub(req.client_game_time) / 1440,
        };
        let out = serde_json::to_value(&out)?;
        debug!("[engine] rewriting ClientSetGameTimeReq to ChangeGameTimeReq: {json} -> {out}");
        self.engine.lock().unwrap_or_else(|e| e.into_inner()).cached_game_time = Some(req);
        self.send_named(self.upstream(), to, "ChangeGameTimeReq", head, &out).await?;
        Ok(Handled::Injected)
    }

    /// `ChangeGameTimeRsp` → downstream `ClientSetGameTimeRsp` carrying
    /// the cached request's times.
    pub(super) async fn on_change_game_time_rsp(
        self: &Arc<Self>,
        to: &Protocol,
        head: &[u8],
        json: Json,
    ) -> Result<Handled, ConvertError> {
        let cached = self.engine.lock().unwrap_or_else(|e| e.into_inner()).cached_game_time.take();
        let Some(cached) = cached else {
            return Ok(Handled::Forward(json));
        };
        let rsp: ChangeGameTimeRsp = serde_json::from_value(json.clone())?;
        let out = ClientSetGameTimeRsp {
            retcode: rsp.retcode,
            game_time: cached.game_time,
            client_game_time: cached.client_game_time,
        };
        let out = serde_json::to_value(&out)?;
        debug!("[engine] rewriting ChangeGameTimeRsp to ClientSetGameTimeRsp: {json} -> {out}");
        self.send_named(self.downstream(), to, "ClientSetGameTimeRsp", head, &out).await?;
        Ok(Handled::Injected)
    }
}

// ─── Console chat ────────────────────────────────────────────────────────────

impl Session {
    async fn notify_private_chat(
        &self,
        proto: &Protocol,
        head: &[u8],
        chat_info: ChatInfo,
    ) -> Result<(), ConvertError> {
        let packet = serde_json::to_value(&PrivateChatNotify { chat_info })?;
        debug!("[console] injecting PrivateChatNotify: {packet}");
        self.send_named(self.downstream(), proto, "PrivateChatNotify", head, &packet).await
    }

    /// Chat sent to the console uid: echo it back, answer with a
    /// plain `PrivateChatRsp`, and hand the text to the gateway on a
    /// detached task. Chat to anyone else passes through.
    pub(super) async fn on_private_chat_req(
        self: &Arc<Self>,
        from: &Protocol,
        head: &[u8],
        json: Json,
    ) -> Result<Handled, ConvertError> {
        let req: PrivateChatReq = serde_json::from_value(json.clone())?;
        if req.target_uid != console::CONSOLE_UID {
            return Ok(Handled::Forward(json));
        }
        debug!("[console] intercepting PrivateChatReq: {json}");
        self.notify_private_chat(from, head, ChatInfo {
            time: now_secs(),
            to_uid: console::CONSOLE_UID,
            uid: self.player_uid(),
            text: req.text.clone(),
            icon: req.icon,
            ..ChatInfo::default()
        })
        .await?;
        if req.text.is_empty() {
            return Ok(Handled::Forward(json));
        }

        let session = self.clone();
        let proto = from.clone();
        let head_copy = head.to_vec();
        let text = req.text;
        tokio::spawn(async move { session.answer_chat(text, proto, head_copy).await });

        let rsp = serde_json::to_value(&PrivateChatRsp::default())?;
        self.send_named(self.downstream(), from, "PrivateChatRsp", head, &rsp).await?;
        Ok(Handled::Injected)
    }

    /// Gateway round-trip, off the forwarding path. The session may
    /// close while this runs; a failed send is just logged.
    async fn answer_chat(self: Arc<Self>, text: String, proto: Protocol, head: Vec<u8>) {
        let reply = self
            .service()
            .console_execute(console::CHAT_COMMAND_ID, self.player_uid(), &text)
            .await;
        let result = self
            .notify_private_chat(&proto, &head, ChatInfo {
                time: now_secs(),
                to_uid: self.player_uid(),
                uid: console::CONSOLE_UID,
                text: reply,
                ..ChatInfo::default()
            })
            .await;
        if let Err(e) = result {
            error!("[console] chat reply send failed: {e}");
        }
    }

    /// History pull for the console chat: a response with the welcome
    /// text is built but, matching the original, never sent; the
    /// request is still suppressed.
    pub(super) fn on_pull_private_chat_req(self: &Arc<Self>, json: Json) -> Result<Handled, ConvertError> {
        let req: PullPrivateChatReq = serde_json::from_value(json.clone())?;
        if req.target_uid != console::CONSOLE_UID {
            return Ok(Handled::Forward(json));
        }
        debug!("[console] intercepting PullPrivateChatReq: {json}");
        let rsp = PullPrivateChatRsp {
            chat_info: vec![ChatInfo {
                time: now_secs(),
                to_uid: self.player_uid(),
                uid: console::CONSOLE_UID,
                text: console::WELCOME_TEXT.to_string(),
                ..ChatInfo::default()
            }],
            retcode: 0,
        };
        let built = serde_json::to_value(&rsp)?;
        debug!("[console] built PullPrivateChatRsp: {built}");
        Ok(Handled::Injected)
    }

    /// First-page recent-chat pulls are remembered so the matching
    /// response can be decorated.
    pub(super) fn on_pull_recent_chat_req(self: &Arc<Self>, json: Json) -> Result<Handled, ConvertError> {
        let req: PullRecentChatReq = serde_json::from_value(json.clone())?;
        if req.begin_sequence != 0 {
            return Ok(Handled::Forward(json));
        }
        debug!("[console] caching PullRecentChatReq: {json}");
        self.engine.lock().unwrap_or_else(|e| e.into_inner()).cached_recent_chat = Some(req);
        Ok(Handled::Forward(json))
    }

    /// Append the console's welcome message to the first recent-chat
    /// page.
    pub(super) fn on_pull_recent_chat_rsp(self: &Arc<Self>, mut json: Json) -> Result<Handled, ConvertError> {
        let cached = {
            let mut engine = self.engine.lock().unwrap_or_else(|e| e.into_inner());
            match engine.cached_recent_chat.take() {
                Some(req) if req.begin_sequence == 0 => Some(req),
                other => {
                    engine.cached_recent_chat = other;
                    None
                }
            }
        };
        if cached.is_none() {
            return Ok(Handled::Forward(json));
        }

        let welcome = serde_json::to_value(&ChatInfo {
            time: now_secs(),
            to_uid: self.player_uid(),
            uid: console::CONSOLE_UID,
            text: console::WELCOME_TEXT.to_string(),
            ..ChatInfo::default()
        })?;
        match json.get_mut("chatInfo").and_then(Json::as_array_mut) {
            Some(list) => list.push(welcome),
            None => json["chatInfo"] = Json::Array(vec![welcome]),
        }
        json["retcode"] = json!(0);
        debug!("[console] injecting welcome into PullRecentChatRsp: {json}");
        Ok(Handled::Forward(json))
    }

    /// Append the synthetic console friend to the friend list.
    pub(super) fn on_get_player_friend_list_rsp(self: &Arc<Self>, mut json: Json) -> Result<Handled, ConvertError> {
        let friend = json!({
            "uid": console::CONSOLE_UID,
            "nickname": console::CONSOLE_NICKNAME,
            "level": console::CONSOLE_LEVEL,
            "worldLevel": console::CONSOLE_WORLD_LEVEL,
            "signature": console::CONSOLE_SIGNATURE,
            "nameCardId": console::CONSOLE_NAME_CARD_ID,
            "profilePicture": {
                "avatarId": console::CONSOLE_AVATAR_ID,
                "costumeId": console::CONSOLE_COSTUME_ID,
            },
            "isGameSource": true,
            "onlineState": 1,
            "platformType": 3,
        });
        match json.get_mut("friendList").and_then(Json::as_array_mut) {
            Some(list) => list.push(friend),
            None => json["friendList"] = Json::Array(vec![friend]),
        }
        debug!("[console] appended console friend: {json}");
        Ok(Handled::Forward(json))
    }

    /// A map pin named "goto" teleports the player through the
    /// gateway. A pin at ground level gets a safe altitude first.
    pub(super) fn on_mark_map_req(self: &Arc<Self>, json: Json) -> Result<Handled, ConvertError> {
        let req: MarkMapReq = serde_json::from_value(json.clone())?;
        let Some(mark) = req.mark else {
            return Ok(Handled::Forward(json));
        };
        let (Some(mut pos), true) = (mark.pos, mark.name == "goto") else {
            return Ok(Handled::Forward(json));
        };
        if pos.y == 0.0 {
            pos.y = 500.0;
        }
        debug!("[console] teleport via MarkMapReq: {json}");
        let session = self.clone();
        tokio::spawn(async move {
            let command = format!("goto {} {} {}", pos.x, pos.y, pos.z);
            let reply = session
                .service()
                .console_execute(console::CHAT_COMMAND_ID, session.player_uid(), &command)
                .await;
            debug!("[console] teleport result: {reply}");
        });
        Ok(Handled::Injected)
    }
}

// ─── Scene tracking, script push, terrain ────────────────────────────────────

impl Session {
    pub(super) fn note_enter_scene(&self, json: &Json) {
        let Ok(ntf) = serde_json::from_value::<PlayerEnterSceneNotify>(json.clone()) else {
            return;
        };
        self.set_scene_ids(ntf.scene_id, ntf.prev_scene_id);
    }

    /// After a scene *change* (not a reload of the same scene), push
    /// every loaded script payload to the client.
    pub(super) async fn push_scripts_after_scene_change(self: &Arc<Self>) {
        let (scene, prev) = self.scene_ids();
        if scene == prev {
            return;
        }
        debug!(
            "[engine] player jump scene, old: {prev}, new: {scene}, uid: {}",
            self.player_uid()
        );
        let shells = self.service().scripts();
        for shell in shells.iter() {
            let notify = PlayerLuaShellNotify {
                id: 1,
                shell_type: 1,
                use_type: 1,
                lua_shell: B64.encode(shell),
            };
            let json = match serde_json::to_value(&notify) {
                Ok(json) => json,
                Err(e) => {
                    error!("[engine] lua shell notify encode failed: {e}");
                    return;
                }
            };
            let proto = self.client_protocol().clone();
            if let Err(e) = self.send_named(self.downstream(), &proto, "PlayerLuaShellNotify", &[], &json).await
            {
                warn!("[engine] lua shell push failed: {e}");
                return;
            }
        }
    }

    /// Feed on-foot avatar movement in the open world into the
    /// terrain grid.
    pub(super) fn note_entity_move(&self, json: &Json) {
        let Some(terrain) = &self.service().terrain else { return };
        let (scene, _) = self.scene_ids();
        if scene != 3 {
            return;
        }
        let Ok(info) = serde_json::from_value::<EntityMoveInfo>(json.clone()) else {
            return;
        };
        if info.entity_id >> 24 != 1 {
            return;
        }
        let Some(motion) = info.motion_info else { return };
        if !(4..=7).contains(&motion.state) {
            return;
        }
        let (Some(pos), Some(_rot), Some(speed)) = (motion.pos, motion.rot, motion.speed) else {
            return;
        };
        if speed.x == 0.0 && speed.y == 0.0 && speed.z == 0.0 {
            return;
        }
        terrain.record(pos.x, pos.y, pos.z);
    }
}
