//! Per-client session: two forwarding loops, the login cipher state
//! and the dynamic transcoder.
//!
//! Each accepted client gets one downstream transport session and one
//! freshly dialed upstream session. Every frame is decrypted, decoded
//! against the source version's schema, passed through the interceptor
//! as JSON, re-encoded against the destination version's schema and
//! re-encrypted. A dropped frame never ends the session; only
//! transport faults do.

use std::fmt;
use std::future::Future;
use std::io;
use std::pin::Pin;
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, RwLock};

use serde_json::Value as Json;
use tracing::{debug, info, warn};

use viaduct_crypto::{KeyBlock, KeyError, Keystream};
use viaduct_proto::mapping::Protocol;
use viaduct_proto::{DynamicMessage, FrameError, WireError, envelope};

use crate::interceptor::{EngineState, Handled};
use crate::service::Service;
use crate::transport::Conn;

/// Why one frame could not be carried across.
#[derive(Debug)]
pub enum ConvertError {
    /// Envelope framing fault.
    Frame(FrameError),
    /// A cmd with no name or no translation in the needed version.
    UnknownCommand {
        version: Protocol,
        cmd: u16,
    },
    /// A message name with no descriptor in the needed version.
    UnknownMessage {
        version: Protocol,
        name: String,
    },
    /// Body failed to (re)code against its descriptor.
    Wire(WireError),
    /// Token-exchange crypto failed.
    Key(KeyError),
    /// The RSA-sealed seed was not 8 bytes.
    SeedLength(usize),
    /// An interceptor JSON view did not fit.
    Json(serde_json::Error),
    /// A batch entry payload was not valid Base64.
    Base64(base64::DecodeError),
    /// The outgoing transport rejected the frame.
    Io(io::Error),
}

impl fmt::Display for ConvertError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Frame(e) => write!(f, "{e}"),
            Self::UnknownCommand { version, cmd } => write!(f, "unknown command {cmd} in {version}"),
            Self::UnknownMessage { version, name } => write!(f, "unknown message {name} in {version}"),
            Self::Wire(e) => write!(f, "{e}"),
            Self::Key(e) => write!(f, "{e}"),
            Self::SeedLength(n) => write!(f, "sealed seed is {n} bytes, want 8"),
            Self::Json(e) => write!(f, "{e}"),
            Self::Base64(e) => write!(f, "{e}"),
            Self::Io(e) => write!(f, "{e}"),
        }
    }
}

impl std::error::Error for ConvertError {}

impl From<FrameError> for ConvertError {
    fn from(e: FrameError) -> Self {
        Self::Frame(e)
    }
}

impl From<WireError> for ConvertError {
    fn from(e: WireError) -> Self {
        Self::Wire(e)
    }
}

impl From<KeyError> for ConvertError {
    fn from(e: KeyError) -> Self {
        Self::Key(e)
    }
}

impl From<serde_json::Error> for ConvertError {
    fn from(e: serde_json::Error) -> Self {
        Self::Json(e)
    }
}

impl From<base64::DecodeError> for ConvertError {
    fn from(e: base64::DecodeError) -> Self {
        Self::Base64(e)
    }
}

impl From<io::Error> for ConvertError {
    fn from(e: io::Error) -> Self {
        Self::Io(e)
    }
}

// ─── Session ─────────────────────────────────────────────────────────────────

/// One proxied client.
pub struct Session {
    service: Arc<Service>,
    /// Client-facing protocol version.
    protocol: Protocol,
    /// Upstream protocol version.
    main_protocol: Protocol,
    down: Arc<Conn>,
    up: Arc<Conn>,
    login_rand: AtomicU64,
    login_key: RwLock<Option<Arc<KeyBlock>>>,
    player_uid: AtomicU32,
    scene_id: AtomicU32,
    prev_scene_id: AtomicU32,
    pub(crate) engine: Mutex<EngineState>,
}

impl Session {
    /// Wire up a session over an accepted downstream and a dialed
    /// upstream transport session.
    pub fn new(service: Arc<Service>, protocol: Protocol, down: Arc<Conn>, up: Arc<Conn>) -> Arc<Self> {
        let main_protocol = Protocol::new(&service.config.endpoints.main_protocol);
        Arc::new(Self {
            service,
            protocol,
            main_protocol,
            down,
            up,
            login_rand: AtomicU64::new(0),
            login_key: RwLock::new(None),
            player_uid: AtomicU32::new(0),
            scene_id: AtomicU32::new(0),
            prev_scene_id: AtomicU32::new(0),
            engine: Mutex::new(EngineState::default()),
        })
    }

    /// Run both forwarding loops until either transport fails, then
    /// close both sides.
    pub async fn run(self: Arc<Self>) {
        info!(
            "[session] forwarding session {} to {}, mapping {} <-> {}",
            self.down.session_id(),
            self.up.remote_addr(),
            self.protocol,
            self.main_protocol
        );
        self.service.client_connected();

        let downstream = {
            let session = self.clone();
            tokio::spawn(async move { session.forward_downstream().await })
        };
        let upstream = {
            let session = self.clone();
            tokio::spawn(async move { session.forward_upstream().await })
        };
        let _ = tokio::join!(downstream, upstream);

        self.service.client_disconnected();
    }

    /// client → server.
    async fn forward_downstream(self: Arc<Self>) {
        loop {
            let Some(mut payload) = self.down.recv().await else {
                warn!("[session] exit endpoint recv loop, id: {}", self.down.session_id());
                break;
            };
            match self
                .convert_payload(&self.protocol, &self.main_protocol, &self.up, &mut payload)
                .await
            {
                Ok(()) => {}
                Err(ConvertError::Io(e)) => {
                    warn!("[session] upstream send failed, closing: {e}");
                    break;
                }
                Err(e) => warn!("[session] failed to convert endpoint payload, err: {e}"),
            }
        }
        self.down.close(0);
    }

    /// server → client.
    async fn forward_upstream(self: Arc<Self>) {
        loop {
            let Some(mut payload) = self.up.recv().await else {
                warn!("[session] exit upstream recv loop, id: {}", self.up.session_id());
                break;
            };
            match self
                .convert_payload(&self.main_protocol, &self.protocol, &self.down, &mut payload)
                .await
            {
                Ok(()) => {}
                Err(ConvertError::Io(e)) => {
                    warn!("[session] downstream send failed, closing: {e}");
                    break;
                }
                Err(e) => warn!("[session] failed to convert upstream payload, err: {e}"),
            }
        }
        self.up.close(0);
        self.down.close(0);
    }

    // ─── Accessors used by the interceptor ───────────────────────────────────

    pub(crate) fn service(&self) -> &Arc<Service> {
        &self.service
    }

    /// The downstream (client) transport session.
    pub fn downstream(&self) -> &Arc<Conn> {
        &self.down
    }

    /// The upstream (server) transport session.
    pub fn upstream(&self) -> &Arc<Conn> {
        &self.up
    }

    /// Client-facing protocol version.
    pub fn client_protocol(&self) -> &Protocol {
        &self.protocol
    }

    /// Close reason reported by the upstream transport, if any.
    pub fn upstream_close_reason(&self) -> u32 {
        self.up.close_reason()
    }

    /// The player uid learned from the token exchange.
    pub fn player_uid(&self) -> u32 {
        self.player_uid.load(Ordering::Relaxed)
    }

    pub(crate) fn set_player_uid(&self, uid: u32) {
        self.player_uid.store(uid, Ordering::Relaxed);
    }

    pub(crate) fn set_login_rand(&self, rand: u64) {
        self.login_rand.store(rand, Ordering::Relaxed);
    }

    pub(crate) fn login_rand(&self) -> u64 {
        self.login_rand.load(Ordering::Relaxed)
    }

    /// Install the session keystream; used from the next frame on.
    pub(crate) fn set_login_key(&self, key: KeyBlock) {
        *self.login_key.write().unwrap_or_else(|e| e.into_inner()) = Some(Arc::new(key));
    }

    pub(crate) fn scene_ids(&self) -> (u32, u32) {
        (self.scene_id.load(Ordering::Relaxed), self.prev_scene_id.load(Ordering::Relaxed))
    }

    pub(crate) fn set_scene_ids(&self, scene: u32, prev: u32) {
        self.scene_id.store(scene, Ordering::Relaxed);
        self.prev_scene_id.store(prev, Ordering::Relaxed);
    }

    // ─── Cipher ──────────────────────────────────────────────────────────────

    /// Toggle a buffer between on-wire and plaintext form.
    ///
    /// Handshake frames always use the shared pad — the session key
    /// does not exist yet when the outgoing side encodes them. For
    /// everything else the session key is tried first; if the result
    /// is not a framed envelope the XOR is reverted and the shared pad
    /// applied instead.
    pub fn encrypt_payload(&self, buf: &mut [u8], handshake: bool) {
        if buf.len() < 4 {
            return;
        }
        let framed = envelope::is_framed(buf);
        if !handshake {
            let login_key = self.login_key.read().unwrap_or_else(|e| e.into_inner()).clone();
            if let Some(key) = login_key {
                key.xor(buf);
                if framed || envelope::is_framed(buf) {
                    return;
                }
                key.xor(buf);
            }
        }
        self.service.keys.shared_key.xor(buf);
    }

    // ─── Forwarding pipeline ─────────────────────────────────────────────────

    /// Decrypt, transcode and re-emit one inbound payload.
    pub async fn convert_payload(
        self: &Arc<Self>,
        from: &Protocol,
        to: &Protocol,
        to_conn: &Arc<Conn>,
        payload: &mut [u8],
    ) -> Result<(), ConvertError> {
        if payload.len() < envelope::OVERHEAD {
            return Err(FrameError::TooShort { len: payload.len() }.into());
        }
        self.encrypt_payload(payload, false);
        let (cmd, head, body) = envelope::decode(payload)?;
        let (head, body) = (head.to_vec(), body.to_vec());

        let to_cmd = if from == to { Some(cmd) } else { self.service.mapping.translate(from, to, cmd) };

        match self.convert_packet(from, to, cmd, &head, &body).await? {
            None => Ok(()),
            Some(out) => {
                let to_cmd =
                    to_cmd.ok_or_else(|| ConvertError::UnknownCommand { version: to.clone(), cmd })?;
                self.send_packet(to_conn, to, to_cmd, &head, &out).await
            }
        }
    }

    /// Transcode one body between versions; `None` means the
    /// interceptor already sent whatever was appropriate and the
    /// original envelope must not be forwarded.
    pub(crate) async fn convert_packet(
        self: &Arc<Self>,
        from: &Protocol,
        to: &Protocol,
        from_cmd: u16,
        head: &[u8],
        body: &[u8],
    ) -> Result<Option<Vec<u8>>, ConvertError> {
        let mapping = &self.service.mapping;
        let name = mapping
            .command_name(from, from_cmd)
            .ok_or_else(|| ConvertError::UnknownCommand { version: from.clone(), cmd: from_cmd })?
            .to_string();

        let from_pool = mapping
            .pool(from)
            .ok_or_else(|| ConvertError::UnknownMessage { version: from.clone(), name: name.clone() })?;
        let from_desc = mapping
            .descriptor(from, &name)
            .ok_or_else(|| ConvertError::UnknownMessage { version: from.clone(), name: name.clone() })?;
        let from_json = DynamicMessage::decode(from_pool, from_desc, body)?.to_json();

        let debug_uid = self.service.config.debug_packet_log_uid;
        let log_packet = debug_uid != 0 && self.player_uid() == debug_uid;
        let src_json = log_packet.then(|| from_json.to_string());

        let to_json = match self.handle_packet(from, to, &name, head, from_json).await? {
            Handled::Forward(json) => json,
            Handled::Injected => return Ok(None),
        };

        if let Some(src) = src_json {
            debug!(
                "[packet] uid: {debug_uid}, from: {from}, to: {to}, name: {name}, src: {src}, dst: {to_json}"
            );
        }

        let to_pool = mapping
            .pool(to)
            .ok_or_else(|| ConvertError::UnknownMessage { version: to.clone(), name: name.clone() })?;
        let to_desc = mapping
            .descriptor(to, &name)
            .ok_or_else(|| ConvertError::UnknownMessage { version: to.clone(), name: name.clone() })?;
        Ok(Some(DynamicMessage::from_json(to_pool, to_desc, &to_json)?.encode()))
    }

    /// Transcode one inner payload by message name. Batch envelopes
    /// recurse through here, so intercepted names nested inside a
    /// batch still get their handlers.
    pub(crate) fn convert_by_name<'a>(
        self: &'a Arc<Self>,
        from: &'a Protocol,
        to: &'a Protocol,
        name: &'a str,
        body: &'a [u8],
    ) -> Pin<Box<dyn Future<Output = Result<Vec<u8>, ConvertError>> + Send + 'a>> {
        Box::pin(async move {
            let mapping = &self.service.mapping;
            let from_pool = mapping
                .pool(from)
                .ok_or_else(|| ConvertError::UnknownMessage { version: from.clone(), name: name.into() })?;
            let from_desc = mapping
                .descriptor(from, name)
                .ok_or_else(|| ConvertError::UnknownMessage { version: from.clone(), name: name.into() })?;
            let from_json = DynamicMessage::decode(from_pool, from_desc, body)?.to_json();

            let to_json = match self.handle_packet(from, to, name, &[], from_json).await? {
                Handled::Forward(json) => json,
                // Inner payloads have nowhere to inject to; carry the
                // original bytes through unchanged.
                Handled::Injected => return Ok(body.to_vec()),
            };

            let to_pool = mapping
                .pool(to)
                .ok_or_else(|| ConvertError::UnknownMessage { version: to.clone(), name: name.into() })?;
            let to_desc = mapping
                .descriptor(to, name)
                .ok_or_else(|| ConvertError::UnknownMessage { version: to.clone(), name: name.into() })?;
            Ok(DynamicMessage::from_json(to_pool, to_desc, &to_json)?.encode())
        })
    }

    /// Envelope, encrypt and send one outgoing packet.
    pub(crate) async fn send_packet(
        &self,
        to_conn: &Arc<Conn>,
        to: &Protocol,
        to_cmd: u16,
        head: &[u8],
        body: &[u8],
    ) -> Result<(), ConvertError> {
        let mut payload = envelope::encode(to_cmd, head, body);
        let handshake = matches!(
            self.service.mapping.command_name(to, to_cmd),
            Some("GetPlayerTokenReq" | "GetPlayerTokenRsp")
        );
        self.encrypt_payload(&mut payload, handshake);
        to_conn.send(&payload).await?;
        Ok(())
    }

    /// Author and send a packet by message name, in the given
    /// version, from its JSON form.
    ///
    /// The cmd is resolved through the base version's table first;
    /// names absent there fall back to a lookup in the destination
    /// version itself.
    pub(crate) async fn send_named(
        &self,
        to_conn: &Arc<Conn>,
        to: &Protocol,
        name: &str,
        head: &[u8],
        json: &Json,
    ) -> Result<(), ConvertError> {
        let mapping = &self.service.mapping;
        let mut cmd = mapping.base_command(name).unwrap_or(0);
        if mapping.base_version() != to {
            cmd = if cmd == 0 {
                mapping.command_by_name(to, name).unwrap_or(0)
            } else {
                mapping.translate(mapping.base_version(), to, cmd).unwrap_or(0)
            };
        }
        if cmd == 0 {
            return Err(ConvertError::UnknownCommand { version: to.clone(), cmd: 0 });
        }

        let pool = mapping
            .pool(to)
            .ok_or_else(|| ConvertError::UnknownMessage { version: to.clone(), name: name.into() })?;
        let desc = mapping
            .descriptor(to, name)
            .ok_or_else(|| ConvertError::UnknownMessage { version: to.clone(), name: name.into() })?;
        let body = DynamicMessage::from_json(pool, desc, json)?.encode();

        debug!("[session] sending packet {name}({cmd}) to {to}: {json}");
        self.send_packet(to_conn, to, cmd, head, &body).await
    }
}
