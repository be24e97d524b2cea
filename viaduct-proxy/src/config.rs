//! Configuration file model.
//!
//! A single JSON document discovered through `VIADUCT_CONFIG_FILE`.
//! Loaded once at start; the minute reload loop re-reads it for the
//! log level and lua script list only.

use std::collections::HashMap;
use std::fmt;
use std::io;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

/// Environment variable naming the config file.
pub const CONFIG_ENV: &str = "VIADUCT_CONFIG_FILE";

/// Errors from config discovery and parsing.
#[derive(Debug)]
pub enum ConfigError {
    /// The file could not be read.
    Io(PathBuf, io::Error),
    /// The file is not valid JSON for this model.
    Parse(serde_json::Error),
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Io(path, e) => write!(f, "read {}: {e}", path.display()),
            Self::Parse(e) => write!(f, "parse config: {e}"),
        }
    }
}

impl std::error::Error for ConfigError {}

// ─── Model ───────────────────────────────────────────────────────────────────

/// Key material locations.
#[derive(Clone, Serialize, Deserialize, Default)]
#[serde(rename_all = "PascalCase", default)]
pub struct KeysConfig {
    /// PEM file with the server RSA private key.
    pub server_key: String,
    /// Raw pre-login XOR pad file.
    pub shared_key: String,
    /// PEM files with the client RSA private keys, by key id.
    pub client_keys: HashMap<u32, String>,
}

/// One protocol version's schema inputs.
#[derive(Clone, Serialize, Deserialize, Default)]
#[serde(rename_all = "PascalCase", default)]
pub struct ProtocolSchemaConfig {
    /// Compiled descriptor-set blob.
    pub descriptors: String,
    /// JSON table of message name → cmd.
    pub commands: String,
}

/// The set of known protocol versions.
#[derive(Clone, Serialize, Deserialize, Default)]
#[serde(rename_all = "PascalCase", default)]
pub struct ProtocolsConfig {
    /// Version injected packets are authored against.
    pub base: String,
    /// Schema inputs per version tag.
    pub versions: HashMap<String, ProtocolSchemaConfig>,
}

/// Where to listen and where the real server lives.
#[derive(Clone, Serialize, Deserialize, Default)]
#[serde(rename_all = "PascalCase", default)]
pub struct EndpointsConfig {
    /// Upstream server endpoint.
    pub main_endpoint: String,
    /// Protocol version the upstream speaks.
    pub main_protocol: String,
    /// Client-facing listeners: version tag → listen address.
    pub mapping: HashMap<String, String>,
}

/// In-band console settings.
#[derive(Clone, Serialize, Deserialize, Default)]
#[serde(rename_all = "PascalCase", default)]
pub struct ConsoleConfig {
    /// Master switch for all console handlers.
    pub enabled: bool,
    /// Admin command gateway URL.
    pub muip_endpoint: String,
    /// Region tag sent with every command.
    pub muip_region: String,
    /// Shared signing secret; empty disables signing.
    pub muip_sign: String,
}

/// The whole config document.
#[derive(Clone, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
pub struct Config {
    pub log_level: String,
    /// Script names under `./data/lua/` pushed after scene changes.
    pub lua_shell_file: Vec<String>,
    pub keys: KeysConfig,
    pub protocols: ProtocolsConfig,
    pub endpoints: EndpointsConfig,
    /// Advertised address, reported by the admin endpoint.
    pub ip: String,
    pub port: u16,
    /// Admin HTTP port.
    pub http_port: u16,
    pub console: ConsoleConfig,
    /// Collect terrain samples from observed movement.
    pub terrain_collect: bool,
    /// When non-zero, log both sides of every transcoded packet for
    /// this player uid.
    pub debug_packet_log_uid: u32,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            log_level: "INFO".into(),
            lua_shell_file: Vec::new(),
            keys: KeysConfig {
                server_key: "data/keys/server.pem".into(),
                shared_key: "data/keys/shared.bin".into(),
                client_keys: HashMap::new(),
            },
            protocols: ProtocolsConfig {
                base: "3.0".into(),
                versions: HashMap::new(),
            },
            endpoints: EndpointsConfig {
                main_endpoint: "127.0.0.1:22102".into(),
                main_protocol: "3.4".into(),
                mapping: HashMap::new(),
            },
            ip: "127.0.0.1".into(),
            port: 20301,
            http_port: 8080,
            console: ConsoleConfig::default(),
            terrain_collect: false,
            debug_packet_log_uid: 0,
        }
    }
}

impl Config {
    /// Read and parse a config file.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let raw = std::fs::read_to_string(path).map_err(|e| ConfigError::Io(path.to_path_buf(), e))?;
        serde_json::from_str(&raw).map_err(ConfigError::Parse)
    }

    /// Discover the config through the environment.
    ///
    /// `Ok(None)` when the variable is unset — the caller prints the
    /// default document and exits.
    pub fn from_env() -> Result<Option<(PathBuf, Self)>, ConfigError> {
        let Ok(path) = std::env::var(CONFIG_ENV) else {
            return Ok(None);
        };
        let path = PathBuf::from(path);
        let config = Self::load(&path)?;
        Ok(Some((path, config)))
    }

    /// The default document, pretty-printed.
    pub fn default_json() -> String {
        serde_json::to_string_pretty(&Self::default()).unwrap_or_default()
    }
}
