//! Bridge configuration
//!
//! Configuration is loaded from:
//! 1. Default values
//! 2. Config file (~/.config/nt2ws/config.toml)
//! 3. Environment variables (NT2WS_* prefix)
//!
//! Environment variables take precedence over config file values. Command
//! line flags are applied on top by the binary.

use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::wire::{CodecConfig, WireFormat};

/// Environment variable prefix
const ENV_PREFIX: &str = "NT2WS";

pub const DEFAULT_PORT: u16 = 8888;
pub const DEFAULT_ROBOT: &str = "127.0.0.1";

/// Keys accepted by [`Config::set_field`]
pub const KEYS: &[&str] = &[
    "port",
    "bind_address",
    "robot",
    "team",
    "format",
    "type_tags",
    "allow_reconnect",
    "send_queue_capacity",
    "www_dir",
];

/// Bridge configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Config {
    /// Port the websocket server listens on
    #[serde(default = "default_port")]
    pub port: u16,

    /// Interface the websocket server binds
    #[serde(default = "default_bind_address")]
    pub bind_address: String,

    /// Address of the table's remote
    #[serde(default = "default_robot")]
    pub robot: String,

    /// Team number; derives the remote address when set
    #[serde(default)]
    pub team: Option<u32>,

    /// Outbound wire format
    #[serde(default)]
    pub format: WireFormat,

    /// Include a type label with every value update
    #[serde(default)]
    pub type_tags: bool,

    /// Honour `{"a": ...}` reconnect commands. Unset means the format's
    /// default: off for JSON, on for CBOR.
    #[serde(default)]
    pub allow_reconnect: Option<bool>,

    /// Per-session undelivered record limit
    #[serde(default = "default_send_queue_capacity")]
    pub send_queue_capacity: usize,

    /// Directory of dashboard pages served next to the bridge
    #[serde(default)]
    pub www_dir: Option<PathBuf>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            port: default_port(),
            bind_address: default_bind_address(),
            robot: default_robot(),
            team: None,
            format: WireFormat::default(),
            type_tags: false,
            allow_reconnect: None,
            send_queue_capacity: default_send_queue_capacity(),
            www_dir: None,
        }
    }
}

impl Config {
    /// Load configuration from default location and environment
    ///
    /// Order of precedence (highest to lowest):
    /// 1. Environment variables (NT2WS_PORT, NT2WS_ROBOT, NT2WS_FORMAT, ...)
    /// 2. Config file (~/.config/nt2ws/config.toml or NT2WS_CONFIG)
    /// 3. Default values
    pub fn load() -> Result<Self> {
        Self::load_from_path(&Self::config_file_path())
    }

    /// Load from `path` if given, otherwise from the default location
    pub fn load_with_cli_override(path: Option<&PathBuf>) -> Result<Self> {
        match path {
            Some(path) => Self::load_from_path(path),
            None => Self::load(),
        }
    }

    /// Load configuration from a specific path
    ///
    /// Environment variables are still applied as overrides.
    /// If the file doesn't exist, defaults are used.
    pub fn load_from_path(path: &Path) -> Result<Self> {
        let mut config = Self::load_file(path)?;
        config.apply_env_overrides();
        config.validate()?;
        Ok(config)
    }

    /// Load only what is stored at `path`, without environment overrides.
    /// Use this when the result is going to be written back.
    pub fn load_file(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {:?}", path))?;
        toml::from_str(&content).with_context(|| format!("Failed to parse config file: {:?}", path))
    }

    /// Load configuration from a TOML string (useful for testing)
    pub fn load_from_str(toml_content: &str) -> Result<Self> {
        let mut config: Config =
            toml::from_str(toml_content).context("Failed to parse config TOML")?;
        config.apply_env_overrides();
        config.validate()?;
        Ok(config)
    }

    /// Apply environment variable overrides. Unparseable values are logged
    /// and ignored.
    fn apply_env_overrides(&mut self) {
        for key in KEYS {
            let name = format!("{}_{}", ENV_PREFIX, key.to_ascii_uppercase());
            if let Ok(val) = std::env::var(&name) {
                if let Err(e) = self.set_field(key, &val) {
                    warn!(variable = %name, error = %e, "Ignoring environment override");
                }
            }
        }
    }

    /// Set one field from its string form
    pub fn set_field(&mut self, key: &str, value: &str) -> Result<()> {
        match key {
            "port" => {
                self.port = value
                    .parse()
                    .with_context(|| format!("Invalid port: '{}'", value))?;
            }
            "bind_address" => {
                self.bind_address = value.to_string();
            }
            "robot" => {
                self.robot = if value.is_empty() {
                    default_robot()
                } else {
                    value.to_string()
                };
            }
            "team" => {
                self.team = if is_unset(value) {
                    None
                } else {
                    Some(
                        value
                            .parse()
                            .with_context(|| format!("Invalid team number: '{}'", value))?,
                    )
                };
            }
            "format" => {
                self.format = value.parse().map_err(anyhow::Error::msg)?;
            }
            "type_tags" => {
                self.type_tags = parse_bool(value)
                    .with_context(|| format!("Invalid value for type_tags: '{}'", value))?;
            }
            "allow_reconnect" => {
                self.allow_reconnect = if is_unset(value) {
                    None
                } else {
                    Some(parse_bool(value).with_context(|| {
                        format!("Invalid value for allow_reconnect: '{}'", value)
                    })?)
                };
            }
            "send_queue_capacity" => {
                self.send_queue_capacity = value
                    .parse()
                    .with_context(|| format!("Invalid send queue capacity: '{}'", value))?;
            }
            "www_dir" => {
                self.www_dir = if is_unset(value) {
                    None
                } else {
                    Some(value.into())
                };
            }
            _ => {
                bail!(
                    "Unknown configuration key: '{}'\nValid keys: {}",
                    key,
                    KEYS.join(", ")
                );
            }
        }
        Ok(())
    }

    /// Check cross-field constraints
    pub fn validate(&self) -> Result<()> {
        if self.team.is_some() && self.robot != DEFAULT_ROBOT {
            bail!("'team' and 'robot' are mutually exclusive; set only one");
        }
        if self.send_queue_capacity == 0 {
            bail!("send_queue_capacity must be at least 1");
        }
        Ok(())
    }

    /// Address the table connects to
    pub fn remote_address(&self) -> String {
        match self.team {
            Some(team) => format!("roborio-{}-frc.local", team),
            None => self.robot.clone(),
        }
    }

    /// Address the websocket server listens on
    pub fn listen_address(&self) -> String {
        format!("{}:{}", self.bind_address, self.port)
    }

    /// Whether reconnect commands are honoured, after format defaults
    pub fn allow_reconnect(&self) -> bool {
        self.allow_reconnect.unwrap_or(self.format == WireFormat::Cbor)
    }

    /// Wire codec settings derived from this configuration
    pub fn codec_config(&self) -> CodecConfig {
        CodecConfig {
            format: self.format,
            type_tags: self.type_tags,
            allow_reconnect: self.allow_reconnect(),
        }
    }

    /// Save configuration to the default file
    pub fn save(&self) -> Result<()> {
        self.save_to_path(&Self::config_file_path())
    }

    /// Save configuration to a specific file
    pub fn save_to_path(&self, config_path: &Path) -> Result<()> {
        if let Some(parent) = config_path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create config directory: {:?}", parent))?;
        }

        let content = toml::to_string_pretty(self).context("Failed to serialize config")?;
        std::fs::write(config_path, content)
            .with_context(|| format!("Failed to write config file: {:?}", config_path))?;
        Ok(())
    }

    /// Get the config file path
    ///
    /// Can be overridden with NT2WS_CONFIG environment variable
    pub fn config_file_path() -> PathBuf {
        if let Ok(path) = std::env::var(format!("{}_CONFIG", ENV_PREFIX)) {
            return PathBuf::from(path);
        }

        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("nt2ws")
            .join("config.toml")
    }
}

fn default_port() -> u16 {
    DEFAULT_PORT
}

fn default_bind_address() -> String {
    "0.0.0.0".to_string()
}

fn default_robot() -> String {
    DEFAULT_ROBOT.to_string()
}

fn default_send_queue_capacity() -> usize {
    crate::bridge::DEFAULT_QUEUE_CAPACITY
}

fn is_unset(value: &str) -> bool {
    value.is_empty() || value.eq_ignore_ascii_case("none")
}

fn parse_bool(value: &str) -> Result<bool> {
    match value.to_ascii_lowercase().as_str() {
        "true" | "1" | "yes" | "on" => Ok(true),
        "false" | "0" | "no" | "off" => Ok(false),
        _ => bail!("expected true or false"),
    }
}
