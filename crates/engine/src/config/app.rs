//! Process-level configuration.

use serde::Deserialize;
use std::path::PathBuf;

/// Which execution store backs the engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum StoreBackend {
    #[default]
    Postgres,
    Memory,
}

/// Application configuration.
///
/// Environment variables are prefixed with `DRIP_`:
/// - `DRIP_HOST`: Server bind address (default: "0.0.0.0")
/// - `DRIP_PORT`: Server port (default: 8090)
/// - `DRIP_DEBUG`: Enable debug mode (default: false)
/// - `DRIP_SERVER_NAME`: Server name for identification
/// - `DRIP_STORE`: `postgres` or `memory` (default: postgres)
/// - `DRIP_RULES_DIR`: Directory of rule documents (default: "./rules")
/// - `DRIP_LOG_JSON`: Emit JSON logs (default: false)
#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    #[serde(default = "default_host")]
    pub host: String,

    #[serde(default = "default_port")]
    pub port: u16,

    #[serde(default)]
    pub debug: bool,

    #[serde(default = "default_server_name")]
    pub server_name: String,

    #[serde(default)]
    pub store: StoreBackend,

    #[serde(default = "default_rules_dir")]
    pub rules_dir: PathBuf,

    #[serde(default)]
    pub log_json: bool,
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    8090
}

fn default_server_name() -> String {
    "drip-engine".to_string()
}

fn default_rules_dir() -> PathBuf {
    PathBuf::from("./rules")
}

impl AppConfig {
    pub fn from_env() -> Result<Self, envy::Error> {
        envy::prefixed("DRIP_").from_env::<AppConfig>()
    }

    /// Address suitable for `TcpListener::bind`.
    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            debug: false,
            server_name: default_server_name(),
            store: StoreBackend::default(),
            rules_dir: default_rules_dir(),
            log_json: false,
        }
    }
}
