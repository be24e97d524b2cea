//! Name-dispatched packet handlers.
//!
//! Every handler receives the source/destination versions and the
//! packet's JSON form, and either returns a (possibly rewritten) form
//! to forward or reports that it already injected what was needed and
//! the original must be suppressed.

mod combat;
mod engine;
mod login;

use std::sync::Arc;

use serde_json::Value as Json;

use viaduct_proto::mapping::Protocol;

use crate::session::{ConvertError, Session};

pub(crate) use engine::{ClientSetGameTimeReq, PullRecentChatReq};

/// Interceptor verdict for one packet.
pub enum Handled {
    /// Forward this JSON form to the other side.
    Forward(Json),
    /// Already handled out of band; do not forward the original.
    Injected,
}

/// Interceptor-local per-session fields.
#[derive(Default)]
pub struct EngineState {
    pub(crate) cached_recent_chat: Option<PullRecentChatReq>,
    pub(crate) cached_game_time: Option<ClientSetGameTimeReq>,
}

impl Session {
    /// Dispatch one packet to its handler, if any.
    pub(crate) async fn handle_packet(
        self: &Arc<Self>,
        from: &Protocol,
        to: &Protocol,
        name: &str,
        head: &[u8],
        json: Json,
    ) -> Result<Handled, ConvertError> {
        // Packets rewritten in flight.
        match name {
            "GetPlayerTokenReq" => return self.on_get_player_token_req(json),
            "GetPlayerTokenRsp" => return self.on_get_player_token_rsp(json),
            "UnionCmdNotify" => return self.on_union_cmd_notify(from, to, json).await,
            "ClientAbilityChangeNotify" | "ClientAbilityInitFinishNotify" | "AbilityInvocationsNotify" => {
                return self.on_ability_invocations(from, to, json).await;
            }
            "CombatInvocationsNotify" => return self.on_combat_invocations(from, to, json).await,
            "ClientSetGameTimeReq" => return self.on_client_set_game_time_req(to, head, json).await,
            "ChangeGameTimeRsp" => return self.on_change_game_time_rsp(to, head, json).await,
            _ => {}
        }

        if self.service().config.console.enabled {
            match name {
                "GetPlayerFriendListRsp" => return self.on_get_player_friend_list_rsp(json),
                "PrivateChatReq" => return self.on_private_chat_req(from, head, json).await,
                "PullPrivateChatReq" => return self.on_pull_private_chat_req(json),
                "PullRecentChatReq" => return self.on_pull_recent_chat_req(json),
                "PullRecentChatRsp" => return self.on_pull_recent_chat_rsp(json),
                "MarkMapReq" => return self.on_mark_map_req(json),
                _ => {}
            }
        }

        // Read-only observers.
        match name {
            "PlayerEnterSceneNotify" => self.note_enter_scene(&json),
            "PostEnterSceneRsp" => self.push_scripts_after_scene_change().await,
            _ => {}
        }
        if self.service().config.terrain_collect && name == "EntityMoveInfo" {
            self.note_entity_move(&json);
        }

        Ok(Handled::Forward(json))
    }
}
