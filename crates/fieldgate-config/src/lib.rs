//! Configuration for the fieldgate gateway binary.
//!
//! TOML file + `FIELDGATE_`-prefixed environment overrides, and
//! translation to `fieldgate_core::GatewayConfig`. The core never reads
//! files; everything funnels through here.

use std::path::{Path, PathBuf};
use std::time::Duration;

use directories::ProjectDirs;
use figment::{
    Figment,
    providers::{Env, Format, Serialized, Toml},
};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use url::Url;

use fieldgate_core::{ControllerEndpoint, GatewayConfig, GatewayOptions};
use fieldgate_proto::NodeAddress;

// ── Error ───────────────────────────────────────────────────────────

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid {field}: {reason}")]
    Validation { field: String, reason: String },

    #[error("config loading failed: {0}")]
    Figment(Box<figment::Error>),
}

impl From<figment::Error> for ConfigError {
    fn from(err: figment::Error) -> Self {
        Self::Figment(Box::new(err))
    }
}

// ── TOML config structs ─────────────────────────────────────────────

/// Top-level TOML configuration.
#[derive(Debug, Default, Deserialize, Serialize)]
pub struct FileConfig {
    /// Timing knobs for the sampling and broadcast loops.
    #[serde(default)]
    pub gateway: GatewaySection,

    /// The controller fleet.
    #[serde(default)]
    pub controllers: Vec<ControllerSection>,
}

#[derive(Debug, Deserialize, Serialize)]
pub struct GatewaySection {
    /// Browse root under which each controller's nodes are enumerated.
    #[serde(default = "default_root_node")]
    pub root_node: String,

    #[serde(default = "default_poll_interval")]
    pub poll_interval_secs: u64,

    #[serde(default = "default_reconnect_delay")]
    pub reconnect_delay_secs: u64,

    #[serde(default = "default_broadcast_interval")]
    pub broadcast_interval_secs: u64,

    #[serde(default = "default_write_timeout")]
    pub write_timeout_secs: u64,

    #[serde(default = "default_disconnect_timeout")]
    pub disconnect_timeout_secs: u64,

    #[serde(default = "default_shutdown_timeout")]
    pub shutdown_timeout_secs: u64,

    /// Per-subscriber transport buffer, in broadcast ticks.
    #[serde(default = "default_subscriber_buffer")]
    pub subscriber_buffer: usize,
}

impl Default for GatewaySection {
    fn default() -> Self {
        Self {
            root_node: default_root_node(),
            poll_interval_secs: default_poll_interval(),
            reconnect_delay_secs: default_reconnect_delay(),
            broadcast_interval_secs: default_broadcast_interval(),
            write_timeout_secs: default_write_timeout(),
            disconnect_timeout_secs: default_disconnect_timeout(),
            shutdown_timeout_secs: default_shutdown_timeout(),
            subscriber_buffer: default_subscriber_buffer(),
        }
    }
}

fn default_root_node() -> String {
    "ns=3;s=Telemetry".into()
}
fn default_poll_interval() -> u64 {
    2
}
fn default_reconnect_delay() -> u64 {
    600
}
fn default_broadcast_interval() -> u64 {
    2
}
fn default_write_timeout() -> u64 {
    10
}
fn default_disconnect_timeout() -> u64 {
    5
}
fn default_shutdown_timeout() -> u64 {
    10
}
fn default_subscriber_buffer() -> usize {
    16
}

/// One configured controller.
#[derive(Debug, Deserialize, Serialize)]
pub struct ControllerSection {
    /// Stable identifier used in payloads and logs.
    pub id: String,

    /// Display name; falls back to the id.
    pub name: Option<String>,

    /// Protocol endpoint, e.g. "opc.tcp://10.0.40.11:4840/".
    pub address: String,
}

// ── Config file path ────────────────────────────────────────────────

/// Resolve the config file path via XDG / platform conventions.
pub fn config_path() -> PathBuf {
    ProjectDirs::from("io", "fieldgate", "fieldgate").map_or_else(
        || {
            let mut p = dirs_fallback();
            p.push("config.toml");
            p
        },
        |dirs| dirs.config_dir().join("config.toml"),
    )
}

fn dirs_fallback() -> PathBuf {
    let mut p = PathBuf::from(std::env::var("HOME").unwrap_or_else(|_| ".".into()));
    p.push(".config");
    p.push("fieldgate");
    p
}

// ── Config loading ──────────────────────────────────────────────────

/// Load configuration from `path` plus environment overrides
/// (`FIELDGATE_GATEWAY__POLL_INTERVAL_SECS=1` and friends). A missing
/// file yields the defaults.
pub fn load_from(path: &Path) -> Result<FileConfig, ConfigError> {
    let figment = Figment::new()
        .merge(Serialized::defaults(FileConfig::default()))
        .merge(Toml::file(path))
        .merge(Env::prefixed("FIELDGATE_").split("__"));

    let config: FileConfig = figment.extract()?;
    Ok(config)
}

// ── Translation to core config ──────────────────────────────────────

/// Validate a [`FileConfig`] and build the core's `GatewayConfig`.
pub fn to_gateway_config(cfg: &FileConfig) -> Result<GatewayConfig, ConfigError> {
    for (field, secs) in [
        ("gateway.poll_interval_secs", cfg.gateway.poll_interval_secs),
        (
            "gateway.broadcast_interval_secs",
            cfg.gateway.broadcast_interval_secs,
        ),
        ("gateway.write_timeout_secs", cfg.gateway.write_timeout_secs),
    ] {
        if secs == 0 {
            return Err(ConfigError::Validation {
                field: field.into(),
                reason: "must be at least 1 second".into(),
            });
        }
    }

    let mut controllers = Vec::with_capacity(cfg.controllers.len());
    for section in &cfg.controllers {
        if section.id.is_empty() {
            return Err(ConfigError::Validation {
                field: "controllers.id".into(),
                reason: "must not be empty".into(),
            });
        }

        let address: Url = section.address.parse().map_err(|_| ConfigError::Validation {
            field: format!("controllers.{}.address", section.id),
            reason: format!("invalid URL: {}", section.address),
        })?;

        controllers.push(ControllerEndpoint {
            id: section.id.clone(),
            name: section.name.clone().unwrap_or_else(|| section.id.clone()),
            address,
        });
    }

    for (i, a) in controllers.iter().enumerate() {
        for b in &controllers[i + 1..] {
            if a.address == b.address {
                return Err(ConfigError::Validation {
                    field: "controllers.address".into(),
                    reason: format!(
                        "duplicate endpoint {} ('{}' and '{}')",
                        a.address, a.id, b.id
                    ),
                });
            }
            if a.id == b.id {
                return Err(ConfigError::Validation {
                    field: "controllers.id".into(),
                    reason: format!("duplicate id '{}'", a.id),
                });
            }
        }
    }

    Ok(GatewayConfig {
        controllers,
        options: GatewayOptions {
            root_node: NodeAddress::from(cfg.gateway.root_node.as_str()),
            poll_interval: Duration::from_secs(cfg.gateway.poll_interval_secs),
            reconnect_delay: Duration::from_secs(cfg.gateway.reconnect_delay_secs),
            broadcast_interval: Duration::from_secs(cfg.gateway.broadcast_interval_secs),
            write_timeout: Duration::from_secs(cfg.gateway.write_timeout_secs),
            disconnect_timeout: Duration::from_secs(cfg.gateway.disconnect_timeout_secs),
            shutdown_timeout: Duration::from_secs(cfg.gateway.shutdown_timeout_secs),
            subscriber_buffer: cfg.gateway.subscriber_buffer.max(1),
        },
    })
}
