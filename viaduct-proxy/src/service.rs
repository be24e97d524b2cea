//! Service lifecycle: keys, schema mapping, servers, counters.

use std::collections::HashMap;
use std::fmt;
use std::io;
use std::path::PathBuf;
use std::sync::atomic::{AtomicI32, AtomicU64, Ordering};
use std::sync::{Arc, RwLock};
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::info;

use viaduct_crypto::{KeyError, SecretKey, SharedKey};
use viaduct_proto::mapping::{Mapping, MappingError, Protocol};
use viaduct_proto::{DescriptorPool, PoolError};

use crate::config::{Config, KeysConfig};
use crate::console::{GatewayError, MuipClient};
use crate::server::Server;
use crate::terrain::TerrainStore;
use crate::transport::{Listener, NetStats};

/// Errors that keep the service from starting.
#[derive(Debug)]
pub enum ServiceError {
    /// A key or schema file could not be read.
    Io(PathBuf, io::Error),
    /// Key material did not parse.
    Key(KeyError),
    /// The shared pad file was empty.
    EmptySharedKey,
    /// A descriptor set did not parse.
    Pool(PoolError),
    /// A commands table did not parse.
    Commands(PathBuf, serde_json::Error),
    /// The mapping could not be assembled.
    Mapping(MappingError),
    /// A listener references a version with no schema.
    UnknownProtocol(String),
    /// A listener endpoint could not be bound.
    Bind(String, io::Error),
    /// The console gateway client could not be built.
    Gateway(GatewayError),
}

impl fmt::Display for ServiceError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Io(path, e) => write!(f, "read {}: {e}", path.display()),
            Self::Key(e) => write!(f, "key material: {e}"),
            Self::EmptySharedKey => write!(f, "shared key pad is empty"),
            Self::Pool(e) => write!(f, "{e}"),
            Self::Commands(path, e) => write!(f, "commands table {}: {e}", path.display()),
            Self::Mapping(e) => write!(f, "{e}"),
            Self::UnknownProtocol(v) => write!(f, "no schema for listener protocol {v}"),
            Self::Bind(addr, e) => write!(f, "bind {addr}: {e}"),
            Self::Gateway(e) => write!(f, "{e}"),
        }
    }
}

impl std::error::Error for ServiceError {}

impl From<MappingError> for ServiceError {
    fn from(e: MappingError) -> Self {
        Self::Mapping(e)
    }
}

impl From<PoolError> for ServiceError {
    fn from(e: PoolError) -> Self {
        Self::Pool(e)
    }
}

// ─── Keys ────────────────────────────────────────────────────────────────────

/// All key material the pipeline needs.
pub struct Keys {
    /// Server RSA private key (opens `clientRandKey`).
    pub server_key: SecretKey,
    /// Pre-login XOR pad.
    pub shared_key: SharedKey,
    /// Client RSA private keys by key id (open `serverRandKey`).
    pub client_keys: HashMap<u32, SecretKey>,
}

impl Keys {
    /// Wrap already-loaded material.
    pub fn new(server_key: SecretKey, shared_key: SharedKey, client_keys: HashMap<u32, SecretKey>) -> Self {
        Self { server_key, shared_key, client_keys }
    }

    /// Read every configured key file.
    pub fn from_config(config: &KeysConfig) -> Result<Self, ServiceError> {
        let read = |p: &str| {
            let path = PathBuf::from(p);
            std::fs::read(&path).map_err(|e| ServiceError::Io(path, e))
        };
        let read_text = |p: &str| {
            let path = PathBuf::from(p);
            std::fs::read_to_string(&path).map_err(|e| ServiceError::Io(path, e))
        };

        let server_key = SecretKey::from_pem(&read_text(&config.server_key)?).map_err(ServiceError::Key)?;
        let shared_key = SharedKey::new(read(&config.shared_key)?).ok_or(ServiceError::EmptySharedKey)?;
        let mut client_keys = HashMap::new();
        for (&id, path) in &config.client_keys {
            let key = SecretKey::from_pem(&read_text(path)?).map_err(ServiceError::Key)?;
            client_keys.insert(id, key);
        }
        Ok(Self::new(server_key, shared_key, client_keys))
    }
}

// ─── Gauges ──────────────────────────────────────────────────────────────────

/// Smoothed per-second throughput written by the minute sampler.
#[derive(Default)]
pub struct RateGauges {
    pub kcp_send_bps: AtomicU64,
    pub kcp_recv_bps: AtomicU64,
    pub udp_send_bps: AtomicU64,
    pub udp_recv_bps: AtomicU64,
    pub udp_send_pps: AtomicU64,
    pub udp_recv_pps: AtomicU64,
}

// ─── Service ─────────────────────────────────────────────────────────────────

/// Owns keys, mapping and every server; coordinates lifecycle.
pub struct Service {
    /// The loaded configuration (static after start).
    pub config: Config,
    /// Key material, read-only after init.
    pub keys: Keys,
    /// Schema registry, read-only after init.
    pub mapping: Mapping,
    /// Transport counters.
    pub stats: Arc<NetStats>,
    /// Smoothed throughput gauges.
    pub rates: RateGauges,
    /// Currently connected clients.
    pub client_count: AtomicI32,
    /// Terrain grid, present when collection is enabled.
    pub terrain: Option<TerrainStore>,
    /// Command gateway, present when the console is enabled.
    pub muip: Option<MuipClient>,
    scripts: RwLock<Arc<Vec<Vec<u8>>>>,
    cancel: CancellationToken,
    tracker: TaskTracker,
}

impl Service {
    /// Assemble a service from pre-built parts (no file access).
    pub fn with_parts(config: Config, keys: Keys, mapping: Mapping) -> Result<Arc<Self>, ServiceError> {
        let muip = if config.console.enabled {
            Some(MuipClient::new(&config.console).map_err(ServiceError::Gateway)?)
        } else {
            None
        };
        let terrain = config.terrain_collect.then(|| TerrainStore::new(PathBuf::from("./terrain")));
        Ok(Arc::new(Self {
            config,
            keys,
            mapping,
            stats: Arc::new(NetStats::default()),
            rates: RateGauges::default(),
            client_count: AtomicI32::new(0),
            terrain,
            muip,
            scripts: RwLock::new(Arc::new(Vec::new())),
            cancel: CancellationToken::new(),
            tracker: TaskTracker::new(),
        }))
    }

    /// Load keys and schemas per the config and assemble the service.
    pub fn from_config(config: Config) -> Result<Arc<Self>, ServiceError> {
        let keys = Keys::from_config(&config.keys)?;

        let mut schemas = Vec::new();
        for (tag, schema) in &config.protocols.versions {
            let blob_path = PathBuf::from(&schema.descriptors);
            let blob = std::fs::read(&blob_path).map_err(|e| ServiceError::Io(blob_path, e))?;
            let pool = DescriptorPool::from_bytes(&blob)?;

            let cmds_path = PathBuf::from(&schema.commands);
            let raw = std::fs::read_to_string(&cmds_path)
                .map_err(|e| ServiceError::Io(cmds_path.clone(), e))?;
            let commands: HashMap<String, u16> =
                serde_json::from_str(&raw).map_err(|e| ServiceError::Commands(cmds_path, e))?;

            schemas.push((Protocol::new(tag), pool, commands));
        }
        let mapping = Mapping::new(Protocol::new(&config.protocols.base), schemas)?;

        let service = Self::with_parts(config, keys, mapping)?;
        if let Some(terrain) = &service.terrain {
            terrain.load();
        }
        Ok(service)
    }

    /// Bind every configured listener and spawn the long-lived tasks.
    pub async fn start(self: &Arc<Self>) -> Result<(), ServiceError> {
        for (tag, addr) in &self.config.endpoints.mapping {
            let protocol = Protocol::new(tag);
            if !self.mapping.knows(&protocol) {
                return Err(ServiceError::UnknownProtocol(tag.clone()));
            }
            let listener = Listener::bind(addr, self.stats.clone())
                .await
                .map_err(|e| ServiceError::Bind(addr.clone(), e))?;
            let server = Server::new(self.clone(), protocol, listener);
            self.tracker.spawn(server.run());
        }

        let sampler = self.clone();
        self.tracker.spawn(async move { sampler.sample_rates().await });

        if self.terrain.is_some() {
            let saver = self.clone();
            self.tracker.spawn(async move { saver.save_terrain_periodically().await });
        }

        info!("[service] started");
        Ok(())
    }

    /// Resolve once [`Service::stop`] has been called.
    pub async fn wait_stopped(&self) {
        self.cancel.cancelled().await;
    }

    /// Begin a graceful stop.
    pub fn stop(&self) {
        self.cancel.cancel();
    }

    /// Finish the stop: wait for all tasks, persist terrain.
    pub async fn shutdown(&self) {
        self.cancel.cancel();
        self.tracker.close();
        self.tracker.wait().await;
        if let Some(terrain) = &self.terrain {
            info!("[terrain] saving on stop");
            terrain.save();
        }
        info!("[service] stopped");
    }

    /// The cancellation token servers select on.
    pub(crate) fn cancelled_token(&self) -> &CancellationToken {
        &self.cancel
    }

    /// Current script payloads.
    pub fn scripts(&self) -> Arc<Vec<Vec<u8>>> {
        self.scripts.read().unwrap_or_else(|e| e.into_inner()).clone()
    }

    /// Swap in freshly loaded script payloads.
    pub fn swap_scripts(&self, shells: Vec<Vec<u8>>) {
        *self.scripts.write().unwrap_or_else(|e| e.into_inner()) = Arc::new(shells);
    }

    /// Run a console command, or explain why the console is off.
    pub async fn console_execute(&self, cmd: u32, uid: u32, text: &str) -> String {
        match &self.muip {
            Some(muip) => muip.execute(cmd, uid, text).await,
            None => "the console gateway is disabled".to_string(),
        }
    }

    pub(crate) fn client_connected(&self) {
        self.client_count.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn client_disconnected(&self) {
        self.client_count.fetch_sub(1, Ordering::Relaxed);
    }

    /// Once a minute: smooth the counters into per-second gauges,
    /// log them, reset the sources.
    async fn sample_rates(self: Arc<Self>) {
        let mut ticker = tokio::time::interval(Duration::from_secs(60));
        ticker.tick().await;
        loop {
            tokio::select! {
                _ = self.cancel.cancelled() => break,
                _ = ticker.tick() => {}
            }
            let snap = self.stats.snapshot();
            self.rates.kcp_send_bps.store(snap.bytes_sent / 60, Ordering::Relaxed);
            self.rates.kcp_recv_bps.store(snap.bytes_received / 60, Ordering::Relaxed);
            self.rates.udp_send_bps.store(snap.out_bytes / 60, Ordering::Relaxed);
            self.rates.udp_recv_bps.store(snap.in_bytes / 60, Ordering::Relaxed);
            self.rates.udp_send_pps.store(snap.out_pkts / 60, Ordering::Relaxed);
            self.rates.udp_recv_pps.store(snap.in_pkts / 60, Ordering::Relaxed);
            info!(
                "[service] kcp send: {} B/s, kcp recv: {} B/s",
                snap.bytes_sent / 60,
                snap.bytes_received / 60
            );
            info!(
                "[service] udp send: {} B/s ({} pps), udp recv: {} B/s ({} pps)",
                snap.out_bytes / 60,
                snap.out_pkts / 60,
                snap.in_bytes / 60,
                snap.in_pkts / 60
            );
            info!("[service] client conn num: {}", self.client_count.load(Ordering::Relaxed));
            self.stats.reset();
        }
    }

    /// Every ten minutes: persist the terrain grid.
    async fn save_terrain_periodically(self: Arc<Self>) {
        let Some(terrain) = &self.terrain else { return };
        let mut ticker = tokio::time::interval(Duration::from_secs(600));
        ticker.tick().await;
        loop {
            tokio::select! {
                _ = self.cancel.cancelled() => break,
                _ = ticker.tick() => {}
            }
            info!("[terrain] periodic save start");
            terrain.save();
            info!("[terrain] periodic save end");
        }
    }
}
