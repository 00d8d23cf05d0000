use std::collections::HashMap;

use figment::{
    providers::{Env, Format, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{CourierError, Result};

// Protocol constants shared by every transport pattern.
pub const DEFAULT_PORT: u16 = 18790;
pub const DEFAULT_BIND: &str = "127.0.0.1";
pub const RECONNECT_DELAY_SECS: u64 = 5; // fixed delay before reconnect / re-poll / respawn
pub const HANDSHAKE_TIMEOUT_MS: u64 = 10_000; // socket hello must arrive within 10s
pub const POLL_WAIT_SECS: u64 = 30; // server-side long-poll wait
pub const RPC_KILL_GRACE_MS: u64 = 500; // wait after closing stdin before kill
pub const REPLY_URL_TTL_SECS: u64 = 3600; // webhook one-time reply URL validity
pub const UNREGISTER_STOP_TIMEOUT_SECS: u64 = 5;

/// Top-level config (courier.toml + COURIER_* env overrides).
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct CourierConfig {
    #[serde(default)]
    pub gateway: GatewayConfig,
    #[serde(default)]
    pub state: StateConfig,
    #[serde(default)]
    pub adapters: Vec<AdapterEntry>,
}

/// HTTP listener for webhook ingress and status endpoints.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GatewayConfig {
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default = "default_bind")]
    pub bind: String,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            port: DEFAULT_PORT,
            bind: DEFAULT_BIND.to_string(),
        }
    }
}

/// Where adapters keep durable per-instance state (long-poll cursors).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StateConfig {
    #[serde(default = "default_state_dir")]
    pub dir: String,
}

impl Default for StateConfig {
    fn default() -> Self {
        Self {
            dir: default_state_dir(),
        }
    }
}

/// Which transport pattern an adapter instance uses.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
pub enum AdapterKind {
    /// Persistent gateway socket with handshake + heartbeat.
    Socket,
    /// Signed and encrypted push webhook.
    Webhook,
    /// Durable long-poll consumer.
    Polling,
    /// Subprocess JSON-RPC bridge.
    Rpc,
}

/// One `[[adapters]]` table.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AdapterEntry {
    /// Unique registry id, e.g. "discord-main".
    pub id: String,
    /// Human-readable name. Defaults to the id.
    #[serde(default)]
    pub name: Option<String>,
    pub kind: AdapterKind,
    /// Platform family, e.g. "discord", "wecom", "telegram", "signal".
    pub channel_type: String,
    #[serde(default = "bool_true")]
    pub enabled: bool,
    #[serde(flatten)]
    pub config: AdapterConfig,
}

impl AdapterEntry {
    pub fn display_name(&self) -> &str {
        self.name.as_deref().unwrap_or(&self.id)
    }
}

/// Connection credentials and free-form options for one adapter instance.
///
/// Owned by the adapter it configures; never shared between instances.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct AdapterConfig {
    #[serde(default)]
    pub token: Option<String>,
    /// File whose trimmed contents are used when `token` is absent.
    #[serde(default)]
    pub token_file: Option<String>,
    #[serde(default)]
    pub webhook_url: Option<String>,
    /// Proxy URL applied to outbound HTTP clients.
    #[serde(default)]
    pub proxy: Option<String>,
    #[serde(default)]
    pub options: HashMap<String, String>,
}

impl AdapterConfig {
    /// Inline token, else the trimmed contents of `token_file`.
    ///
    /// Returns `MissingCredential` when neither yields a non-empty value.
    pub fn resolve_token(&self, adapter: &str) -> Result<String> {
        if let Some(token) = self.token.as_deref().map(str::trim) {
            if !token.is_empty() {
                return Ok(token.to_string());
            }
        }

        if let Some(path) = self.token_file.as_deref() {
            let contents = std::fs::read_to_string(path).map_err(|e| {
                CourierError::MissingCredential {
                    adapter: adapter.to_string(),
                    reason: format!("cannot read token_file {path}: {e}"),
                }
            })?;
            let token = contents.trim();
            if !token.is_empty() {
                return Ok(token.to_string());
            }
            return Err(CourierError::MissingCredential {
                adapter: adapter.to_string(),
                reason: format!("token_file {path} is empty"),
            });
        }

        Err(CourierError::MissingCredential {
            adapter: adapter.to_string(),
            reason: "no token or token_file configured".to_string(),
        })
    }

    /// A non-empty string option.
    pub fn option(&self, key: &str) -> Option<&str> {
        self.options
            .get(key)
            .map(String::as_str)
            .map(str::trim)
            .filter(|v| !v.is_empty())
    }

    /// A string option, or `default` when unset.
    pub fn option_or<'a>(&'a self, key: &str, default: &'a str) -> &'a str {
        self.option(key).unwrap_or(default)
    }

    /// A numeric option, or `default` when unset. Unparsable values are an error.
    pub fn option_u64(&self, adapter: &str, key: &str, default: u64) -> Result<u64> {
        match self.option(key) {
            None => Ok(default),
            Some(raw) => raw.parse().map_err(|_| CourierError::InvalidOption {
                adapter: adapter.to_string(),
                key: key.to_string(),
                reason: format!("expected an unsigned integer, got {raw:?}"),
            }),
        }
    }
}

fn bool_true() -> bool {
    true
}
fn default_port() -> u16 {
    DEFAULT_PORT
}
fn default_bind() -> String {
    DEFAULT_BIND.to_string()
}
fn default_state_dir() -> String {
    let home = std::env::var("HOME").unwrap_or_else(|_| ".".to_string());
    format!("{}/.courier/state", home)
}

impl CourierConfig {
    /// Load config from a TOML file with COURIER_* env var overrides.
    ///
    /// Checks in order:
    ///   1. Explicit path argument
    ///   2. COURIER_CONFIG env var
    ///   3. ~/.courier/courier.toml
    pub fn load(config_path: Option<&str>) -> Result<Self> {
        let path = config_path
            .map(String::from)
            .or_else(|| std::env::var("COURIER_CONFIG").ok())
            .unwrap_or_else(default_config_path);
        debug!(path = %path, "loading config");

        let config: CourierConfig = Figment::new()
            .merge(Toml::file(&path))
            .merge(Env::prefixed("COURIER_").split("__"))
            .extract()
            .map_err(|e| CourierError::Config(e.to_string()))?;

        config.validate()?;
        Ok(config)
    }

    /// Reject duplicate adapter ids up front so misconfiguration is reported
    /// with the file, not later as a registry error.
    pub fn validate(&self) -> Result<()> {
        let mut seen = std::collections::HashSet::new();
        for entry in &self.adapters {
            if entry.id.trim().is_empty() {
                return Err(CourierError::Config("adapter id must not be empty".into()));
            }
            if !seen.insert(entry.id.as_str()) {
                return Err(CourierError::Config(format!(
                    "duplicate adapter id in config: {}",
                    entry.id
                )));
            }
        }
        Ok(())
    }
}

fn default_config_path() -> String {
    let home = std::env::var("HOME").unwrap_or_else(|_| ".".to_string());
    format!("{}/.courier/courier.toml", home)
}
