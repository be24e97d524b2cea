//! Token-exchange handlers: both halves of the session-key seed pass
//! through here sealed under RSA, and the MT19937 keystream is armed
//! once the second half arrives.

use std::sync::Arc;

use serde::Deserialize;
use serde_json::Value as Json;
use tracing::{debug, warn};

use viaduct_crypto::KeyBlock;

use super::Handled;
use crate::session::{ConvertError, Session};

#[derive(Deserialize, Default)]
#[serde(rename_all = "camelCase", default)]
struct GetPlayerTokenReq {
    client_rand_key: String,
}

#[derive(Deserialize, Default)]
#[serde(rename_all = "camelCase", default)]
struct GetPlayerTokenRsp {
    retcode: i32,
    uid: u32,
    key_id: u32,
    server_rand_key: String,
}

fn seed_bytes(raw: Vec<u8>) -> Result<[u8; 8], ConvertError> {
    let len = raw.len();
    raw.as_slice().try_into().map_err(|_| ConvertError::SeedLength(len))
}

impl Session {
    pub(super) fn on_get_player_token_req(self: &Arc<Self>, json: Json) -> Result<Handled, ConvertError> {
        debug!("[login] uid: {}, token req: {json}", self.player_uid());
        let req: GetPlayerTokenReq = serde_json::from_value(json.clone())?;
        let seed = seed_bytes(self.service().keys.server_key.decrypt_base64(&req.client_rand_key)?)?;
        self.set_login_rand(u64::from_be_bytes(seed));
        Ok(Handled::Forward(json))
    }

    pub(super) fn on_get_player_token_rsp(self: &Arc<Self>, json: Json) -> Result<Handled, ConvertError> {
        debug!("[login] uid: {}, token rsp: {json}", self.player_uid());
        let rsp: GetPlayerTokenRsp = serde_json::from_value(json.clone())?;
        self.set_player_uid(rsp.uid);
        if rsp.retcode != 0 {
            return Ok(Handled::Forward(json));
        }
        let Some(client_key) = self.service().keys.client_keys.get(&rsp.key_id) else {
            warn!("[login] no client key with id {}, session key not armed", rsp.key_id);
            return Ok(Handled::Forward(json));
        };
        let seed = seed_bytes(client_key.decrypt_base64(&rsp.server_rand_key)?)?;
        self.set_login_key(KeyBlock::new(self.login_rand() ^ u64::from_be_bytes(seed)));
        Ok(Handled::Forward(json))
    }
}
