//! The in-band console and its external command gateway.
//!
//! The console appears to the player as one synthetic friend; text
//! sent to it is handed to an HTTP admin gateway whose reply comes
//! back as chat. The gateway contract: signed GET with sorted
//! query parameters, TLS verification off, 10 second timeout.

use std::fmt;
use std::time::Duration;

use serde::Deserialize;
use sha2::{Digest, Sha256};
use tracing::{debug, info};

use crate::config::ConsoleConfig;

/// Uid of the synthetic console friend.
pub const CONSOLE_UID: u32 = 1;
/// Display name of the synthetic friend.
pub const CONSOLE_NICKNAME: &str = "Viaduct";
pub(crate) const CONSOLE_LEVEL: u32 = 60;
pub(crate) const CONSOLE_WORLD_LEVEL: u32 = 8;
pub(crate) const CONSOLE_SIGNATURE: &str = "";
pub(crate) const CONSOLE_NAME_CARD_ID: u32 = 210001;
pub(crate) const CONSOLE_AVATAR_ID: u32 = 10000077;
pub(crate) const CONSOLE_COSTUME_ID: u32 = 0;

/// First message shown when the chat with the console is opened.
pub const WELCOME_TEXT: &str = "This is the proxy console.\n\
    Messages typed here are executed as admin commands on the server.\n\
    Send \"help\" for details.";

/// Reply to the literal `help`, answered locally.
pub const HELP_TEXT: &str = "Commands typed here go to the server's admin gateway \
    and the result comes back as chat.\n\
    Marking a map pin named \"goto\" teleports you to it.\n\
    \"help\" prints this text again.";

/// Command id used for chat-driven admin commands.
pub const CHAT_COMMAND_ID: u32 = 1116;

// ─── Gateway client ──────────────────────────────────────────────────────────

/// Errors from building the gateway client.
#[derive(Debug)]
pub enum GatewayError {
    /// The HTTP client could not be constructed.
    Http(reqwest::Error),
}

impl fmt::Display for GatewayError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Http(e) => write!(f, "http client: {e}"),
        }
    }
}

impl std::error::Error for GatewayError {}

#[derive(Deserialize, Default)]
#[serde(default)]
struct GatewayResponse {
    retcode: i32,
    msg: String,
    #[allow(dead_code)]
    ticket: String,
    data: GatewayData,
}

#[derive(Deserialize, Default)]
#[serde(default)]
struct GatewayData {
    msg: String,
    #[allow(dead_code)]
    retmsg: String,
}

/// HTTP client for the admin command gateway.
pub struct MuipClient {
    http: reqwest::Client,
    endpoint: String,
    region: String,
    sign: String,
}

impl MuipClient {
    /// Build the client from console settings.
    pub fn new(config: &ConsoleConfig) -> Result<Self, GatewayError> {
        let http = reqwest::Client::builder()
            .danger_accept_invalid_certs(true)
            .pool_max_idle_per_host(0)
            .timeout(Duration::from_secs(10))
            .build()
            .map_err(GatewayError::Http)?;
        Ok(Self {
            http,
            endpoint: config.muip_endpoint.clone(),
            region: config.muip_region.clone(),
            sign: config.muip_sign.clone(),
        })
    }

    /// Run one command for `uid` and render the outcome as chat text.
    ///
    /// Every failure path returns a message for the player; errors
    /// never escape into the forwarding loops.
    pub async fn execute(&self, cmd: u32, uid: u32, text: &str) -> String {
        info!("[console] execute: {text}, uid: {uid}");
        if text == "help" {
            return HELP_TEXT.to_string();
        }

        let mut values = vec![
            format!("cmd={cmd}"),
            format!("uid={uid}"),
            format!("msg={text}"),
            format!("region={}", self.region),
        ];
        let mut ticket = [0u8; 16];
        if let Err(e) = getrandom::getrandom(&mut ticket) {
            return format!("could not generate a ticket, error: {e}");
        }
        values.push(format!("ticket={}", hex(&ticket)));
        if !self.sign.is_empty() {
            values.sort();
            let mut digest = Sha256::new();
            digest.update(values.join("&"));
            digest.update(&self.sign);
            values.push(format!("sign={}", hex(&digest.finalize())));
        }

        let uri = format!("{}?{}", self.endpoint, values.join("&").replace(' ', "+"));
        debug!("[console] gateway request: {uri}");

        let response = match self.http.get(&uri).send().await {
            Ok(r) => r,
            Err(e) => return format!("gateway request failed, error: {e}"),
        };
        let status = response.status();
        if status.as_u16() != 200 {
            return format!("gateway request failed, status: {status}");
        }
        let body: GatewayResponse = match response.json().await {
            Ok(b) => b,
            Err(e) => return format!("gateway request failed, error: {e}"),
        };
        if body.retcode != 0 {
            return format!("command failed: {}, error: {}", body.data.msg, body.msg);
        }
        format!("command ok: {}", body.data.msg)
    }
}

fn hex(bytes: &[u8]) -> String {
    let mut out = String::with_capacity(bytes.len() * 2);
    for b in bytes {
        out.push_str(&format!("{b:02x}"));
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hex_renders_lowercase_pairs() {
        assert_eq!(hex(&[0x00, 0xAB, 0x0F]), "00ab0f");
    }

    #[tokio::test]
    async fn help_is_answered_locally() {
        let client = MuipClient::new(&ConsoleConfig::default()).unwrap();
        assert_eq!(client.execute(CHAT_COMMAND_ID, 7, "help").await, HELP_TEXT);
    }
}
