//! Configuration management for twister-sync
//!
//! Handles loading, parsing, validation and hot-reloading of the YAML
//! configuration file.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;
use std::time::Duration;
use tokio::fs;

use crate::bridge::BridgeSettings;
use crate::connection::{derive_ws_url, ConnectionSettings};
use crate::state::StateSettings;

pub mod watcher;

pub use watcher::ConfigWatcher;

/// Root configuration structure
#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct AppConfig {
    pub backend: BackendConfig,
    pub connection: ConnectionConfig,
    pub midi: MidiConfig,
    pub preferences: Preferences,
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct BackendConfig {
    pub url: String,
    /// Push channel URL; derived from `url` when absent
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ws_url: Option<String>,
    pub request_timeout_ms: u64,
}

impl Default for BackendConfig {
    fn default() -> Self {
        Self {
            url: "http://127.0.0.1:8000".to_string(),
            ws_url: None,
            request_timeout_ms: 5000,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct ConnectionConfig {
    pub reconnect_floor_ms: u64,
    pub reconnect_ceiling_ms: u64,
    pub heartbeat_secs: u64,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            reconnect_floor_ms: 500,
            reconnect_ceiling_ms: 10_000,
            heartbeat_secs: 15,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct MidiConfig {
    /// Substring used to pick the controller's ports
    pub product_name: String,
    /// Resend forwarded values to the hardware LEDs
    pub led_echo: bool,
    /// Hot-plug polling interval
    pub port_poll_ms: u64,
}

impl Default for MidiConfig {
    fn default() -> Self {
        Self {
            product_name: "Midi Fighter Twister".to_string(),
            led_echo: true,
            port_poll_ms: 2000,
        }
    }
}

/// Opaque local preferences (display toggles, theme, device names, ...)
///
/// Only a handful of keys are interpreted here; everything else is carried
/// through untouched.
#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
#[serde(transparent)]
pub struct Preferences(BTreeMap<String, serde_yaml::Value>);

impl Preferences {
    pub const MIDI_INPUT: &'static str = "midi_input";
    pub const MIDI_OUTPUT: &'static str = "midi_output";
    pub const SEND_BANK_ON_CHANGE: &'static str = "send_bank_on_change";

    pub fn get(&self, key: &str) -> Option<&serde_yaml::Value> {
        self.0.get(key)
    }

    pub fn flag(&self, key: &str) -> bool {
        self.get(key).and_then(serde_yaml::Value::as_bool).unwrap_or(false)
    }

    /// Non-empty string value
    pub fn text(&self, key: &str) -> Option<&str> {
        self.get(key)
            .and_then(serde_yaml::Value::as_str)
            .map(str::trim)
            .filter(|s| !s.is_empty())
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl AppConfig {
    /// Load configuration from file; a missing file yields the defaults
    pub async fn load(path: &Path) -> Result<Self> {
        if !fs::try_exists(path).await.unwrap_or(false) {
            tracing::info!("No config at {}, using defaults", path.display());
            return Ok(Self::default());
        }

        let contents = fs::read_to_string(path)
            .await
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        Self::parse(&contents)
            .with_context(|| format!("Invalid config file: {}", path.display()))
    }

    pub fn parse(contents: &str) -> Result<Self> {
        // An empty file parses as YAML null
        if contents.trim().is_empty() {
            return Ok(Self::default());
        }
        let config: AppConfig =
            serde_yaml::from_str(contents).context("Failed to parse YAML config")?;
        config.validate()?;
        Ok(config)
    }

    /// Validate configuration for correctness and consistency
    pub fn validate(&self) -> Result<()> {
        let url = reqwest::Url::parse(&self.backend.url)
            .with_context(|| format!("backend.url is not a valid URL: {}", self.backend.url))?;
        if !matches!(url.scheme(), "http" | "https") {
            anyhow::bail!("backend.url must be http or https: {}", self.backend.url);
        }
        if self.ws_url().is_none() {
            anyhow::bail!("No push channel URL could be derived; set backend.ws_url");
        }
        if self.backend.request_timeout_ms == 0 {
            anyhow::bail!("backend.request_timeout_ms must be positive");
        }
        if self.connection.reconnect_floor_ms == 0 {
            anyhow::bail!("connection.reconnect_floor_ms must be positive");
        }
        if self.connection.reconnect_ceiling_ms < self.connection.reconnect_floor_ms {
            anyhow::bail!("connection.reconnect_ceiling_ms must not be below the floor");
        }
        if self.connection.heartbeat_secs == 0 {
            anyhow::bail!("connection.heartbeat_secs must be positive");
        }
        if self.midi.port_poll_ms == 0 {
            anyhow::bail!("midi.port_poll_ms must be positive");
        }
        Ok(())
    }

    /// Push channel URL, configured or derived from the backend URL
    pub fn ws_url(&self) -> Option<String> {
        match &self.backend.ws_url {
            Some(url) if !url.trim().is_empty() => Some(url.clone()),
            _ => derive_ws_url(&self.backend.url),
        }
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.backend.request_timeout_ms)
    }

    pub fn port_poll_interval(&self) -> Duration {
        Duration::from_millis(self.midi.port_poll_ms)
    }

    pub fn connection_settings(&self) -> ConnectionSettings {
        ConnectionSettings {
            reconnect_floor: Duration::from_millis(self.connection.reconnect_floor_ms),
            reconnect_ceiling: Duration::from_millis(self.connection.reconnect_ceiling_ms),
            heartbeat: Duration::from_secs(self.connection.heartbeat_secs),
        }
    }

    /// Dispatcher settings derived from the `midi` section and preferences
    pub fn state_settings(&self) -> StateSettings {
        let prefs = &self.preferences;
        StateSettings {
            bridge: BridgeSettings {
                product_name: self.midi.product_name.clone(),
                led_echo: self.midi.led_echo,
                preferred_input: prefs.text(Preferences::MIDI_INPUT).map(str::to_string),
                preferred_output: prefs.text(Preferences::MIDI_OUTPUT).map(str::to_string),
            },
            send_bank_on_change: prefs.flag(Preferences::SEND_BANK_ON_CHANGE),
        }
    }
}
