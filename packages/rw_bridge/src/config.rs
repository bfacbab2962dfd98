use backend_link::LinkConfig;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

// =============================================================================
// File config (figment-deserialized from defaults / rw-bridge.toml / env vars)
// =============================================================================
//
// Three equivalent ways to configure:
//
//   rw-bridge.toml:  [backend]
//                    port = 9090
//
//   env var:         RWB_BACKEND__PORT=9090   (double underscore = nesting)
//
//   (single underscore stays within field names: RWB_BACKEND__READ_TIMEOUT_MS)

/// Default config file looked up in the working directory.
pub const DEFAULT_CONFIG_FILE: &str = "rw-bridge.toml";

/// Top-level tunable configuration, deserialized by figment.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct FileConfig {
    #[serde(default)]
    pub server: ServerFileConfig,
    #[serde(default)]
    pub backend: BackendFileConfig,
    #[serde(default)]
    pub session: SessionFileConfig,
}

/// Front-end listener (lives under `[server]`).
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ServerFileConfig {
    #[serde(default = "default_server_host")]
    pub host: String,
    #[serde(default = "default_server_port")]
    pub port: u16,
    /// Outbound frames buffered per connection before broadcasts get dropped
    #[serde(default = "default_send_channel_capacity")]
    pub send_channel_capacity: usize,
}

impl Default for ServerFileConfig {
    fn default() -> Self {
        Self {
            host: default_server_host(),
            port: default_server_port(),
            send_channel_capacity: default_send_channel_capacity(),
        }
    }
}

/// Backend service (lives under `[backend]`).
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct BackendFileConfig {
    #[serde(default = "default_backend_host")]
    pub host: String,
    #[serde(default = "default_backend_port")]
    pub port: u16,
    #[serde(default = "default_connect_timeout_secs")]
    pub connect_timeout_secs: u64,
    #[serde(default = "default_read_timeout_ms")]
    pub read_timeout_ms: u64,
    #[serde(default = "default_max_in_flight")]
    pub max_in_flight: usize,
}

impl Default for BackendFileConfig {
    fn default() -> Self {
        Self {
            host: default_backend_host(),
            port: default_backend_port(),
            connect_timeout_secs: default_connect_timeout_secs(),
            read_timeout_ms: default_read_timeout_ms(),
            max_in_flight: default_max_in_flight(),
        }
    }
}

/// Writer-lease policy (lives under `[session]`).
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct SessionFileConfig {
    /// Release a held lease after this many idle seconds (0 = never)
    #[serde(default)]
    pub lease_idle_timeout_secs: u64,
}

fn default_server_host() -> String {
    "0.0.0.0".to_string()
}
fn default_server_port() -> u16 {
    8765
}
fn default_send_channel_capacity() -> usize {
    100
}
fn default_backend_host() -> String {
    "127.0.0.1".to_string()
}
fn default_backend_port() -> u16 {
    8080
}
fn default_connect_timeout_secs() -> u64 {
    5
}
fn default_read_timeout_ms() -> u64 {
    5000
}
fn default_max_in_flight() -> usize {
    32
}

/// Build a figment that layers: defaults → config file → RWB_* env vars.
///
/// A missing config file is not an error.
///
/// Env vars use double-underscore for nesting into sections:
///   `RWB_SERVER__PORT=9000`  →  `server.port = 9000`
///   `RWB_SESSION__LEASE_IDLE_TIMEOUT_SECS=600`  →  `session.lease_idle_timeout_secs = 600`
pub fn load_config(config_path: &Path) -> figment::Figment {
    use figment::{
        Figment,
        providers::{Env, Format, Serialized, Toml},
    };

    Figment::from(Serialized::defaults(FileConfig::default()))
        .merge(Toml::file(config_path))
        .merge(Env::prefixed("RWB_").split("__"))
}

/// Command-line overrides, applied on top of the figment layers.
#[derive(Clone, Debug, Default)]
pub struct RuntimeOverrides {
    pub host: Option<String>,
    pub port: Option<u16>,
    /// Backend address as `host:port`
    pub backend: Option<String>,
}

// =============================================================================
// Runtime config (derived from FileConfig, used throughout the server)
// =============================================================================

#[derive(Clone, Debug)]
pub struct BridgeConfig {
    pub server: ServerConfig,
    /// Backend connection settings handed to the link pool
    pub backend: LinkConfig,
    pub session: SessionConfig,
}

#[derive(Clone, Debug)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    pub send_channel_capacity: usize,
}

#[derive(Clone, Debug)]
pub struct SessionConfig {
    /// None = leases never expire while the connection is open
    pub lease_idle_timeout: Option<Duration>,
}

impl BridgeConfig {
    pub fn from_file(fc: &FileConfig) -> Self {
        Self {
            server: ServerConfig {
                host: fc.server.host.clone(),
                port: fc.server.port,
                send_channel_capacity: fc.server.send_channel_capacity.max(1),
            },
            backend: LinkConfig {
                addr: format!("{}:{}", fc.backend.host, fc.backend.port),
                connect_timeout: Duration::from_secs(fc.backend.connect_timeout_secs),
                read_timeout: Duration::from_millis(fc.backend.read_timeout_ms),
                max_in_flight: fc.backend.max_in_flight,
            },
            session: SessionConfig {
                lease_idle_timeout: if fc.session.lease_idle_timeout_secs == 0 {
                    None
                } else {
                    Some(Duration::from_secs(fc.session.lease_idle_timeout_secs))
                },
            },
        }
    }

    pub fn with_overrides(mut self, overrides: &RuntimeOverrides) -> Self {
        if let Some(host) = &overrides.host {
            self.server.host = host.clone();
        }
        if let Some(port) = overrides.port {
            self.server.port = port;
        }
        if let Some(backend) = &overrides.backend {
            self.backend.addr = backend.clone();
        }
        self
    }

    /// `host:port` the front-end listener binds to
    pub fn listen_addr(&self) -> String {
        format!("{}:{}", self.server.host, self.server.port)
    }
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self::from_file(&FileConfig::default())
    }
}
