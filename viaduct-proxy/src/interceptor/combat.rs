//! Batch envelopes: union commands and ability/combat invocation
//! lists. The outer message is decoded once, then every entry's inner
//! payload is transcoded under the same version pair. Entries that
//! cannot be carried are dropped, never the whole batch.

use std::sync::Arc;

use base64::{Engine as _, engine::general_purpose::STANDARD as B64};
use serde_json::{Value as Json, json};
use tracing::debug;

use viaduct_proto::mapping::{Protocol, ability_argument_name, combat_argument_name};

use super::Handled;
use crate::session::{ConvertError, Session};

impl Session {
    /// `UnionCmdNotify`: translate every entry's `messageId` and
    /// transcode its body. An unmapped id becomes 0, matching the
    /// translation table contract.
    pub(super) async fn on_union_cmd_notify(
        self: &Arc<Self>,
        from: &Protocol,
        to: &Protocol,
        mut json: Json,
    ) -> Result<Handled, ConvertError> {
        let Some(entries) = json.get_mut("cmdList").and_then(Json::as_array_mut) else {
            return Ok(Handled::Forward(json));
        };
        for entry in entries.iter_mut() {
            let mid = entry.get("messageId").and_then(Json::as_u64).unwrap_or(0) as u16;
            let name = self
                .service()
                .mapping
                .command_name(from, mid)
                .ok_or_else(|| ConvertError::UnknownCommand { version: from.clone(), cmd: mid })?
                .to_string();
            let new_mid = self.service().mapping.translate(from, to, mid).unwrap_or(0);

            let body = B64.decode(entry.get("body").and_then(Json::as_str).unwrap_or(""))?;
            let new_body = self.convert_by_name(from, to, &name, &body).await?;

            entry["messageId"] = json!(new_mid);
            entry["body"] = Json::String(B64.encode(new_body));
        }
        Ok(Handled::Forward(json))
    }

    /// Ability batches (`invokes[]`, payload key `abilityData`).
    pub(super) async fn on_ability_invocations(
        self: &Arc<Self>,
        from: &Protocol,
        to: &Protocol,
        mut json: Json,
    ) -> Result<Handled, ConvertError> {
        if let Some(entries) = json.get_mut("invokes").and_then(Json::as_array_mut) {
            let rebuilt = self
                .rebuild_invokes(from, to, std::mem::take(entries), "abilityData", ability_argument_name)
                .await;
            *entries = rebuilt;
        }
        Ok(Handled::Forward(json))
    }

    /// Combat batches (`invokeList[]`, payload key `combatData`).
    pub(super) async fn on_combat_invocations(
        self: &Arc<Self>,
        from: &Protocol,
        to: &Protocol,
        mut json: Json,
    ) -> Result<Handled, ConvertError> {
        if let Some(entries) = json.get_mut("invokeList").and_then(Json::as_array_mut) {
            let rebuilt = self
                .rebuild_invokes(from, to, std::mem::take(entries), "combatData", combat_argument_name)
                .await;
            *entries = rebuilt;
        }
        Ok(Handled::Forward(json))
    }

    async fn rebuild_invokes(
        self: &Arc<Self>,
        from: &Protocol,
        to: &Protocol,
        entries: Vec<Json>,
        data_key: &str,
        argument_name: fn(u32) -> Option<&'static str>,
    ) -> Vec<Json> {
        let mut out = Vec::with_capacity(entries.len());
        for mut entry in entries {
            let encoded = entry.get(data_key).and_then(Json::as_str).unwrap_or("").to_string();
            if encoded.is_empty() {
                out.push(entry);
                continue;
            }
            let argument_type = entry.get("argumentType").and_then(Json::as_u64).unwrap_or(0) as u32;
            let Some(name) = argument_name(argument_type) else {
                debug!("[combat] unknown invoke argument type {argument_type}, dropping entry");
                continue;
            };
            let Ok(body) = B64.decode(&encoded) else {
                debug!("[combat] invoke payload for {name} is not base64, dropping entry");
                continue;
            };
            match self.convert_by_name(from, to, name, &body).await {
                Ok(new_body) => {
                    entry[data_key] = Json::String(B64.encode(new_body));
                    out.push(entry);
                }
                Err(e) => debug!("[combat] failed to convert invoke {name}, err: {e}"),
            }
        }
        out
    }
}
