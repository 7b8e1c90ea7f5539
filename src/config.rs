// Copyright 2026 Daniel Pelikan
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! Configuration module.
//!
//! Handles loading and saving application settings.

use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::net::{IpAddr, Ipv4Addr};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Port of the bidirectional command bridge.
pub const COMMAND_PORT: u16 = 1234;

/// Port of the write-only event bridge.
pub const EVENT_PORT: u16 = 1235;

/// Port used by the single-bridge layout.
pub const LEGACY_PORT: u16 = 2001;

/// Application configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// TCP bridge settings.
    pub bridge: BridgeConfig,

    /// Timeouts handed to the Device Manager.
    pub device: DeviceTimeouts,
}

/// How many bridges a session opens.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BridgeLayout {
    /// Commands and all device data on one port.
    Single,
    /// Command bridge plus a write-only event bridge.
    Dual,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BridgeConfig {
    /// Address the listeners bind to.
    pub bind_address: IpAddr,

    pub layout: BridgeLayout,

    /// Command bridge port in the dual layout.
    pub command_port: u16,

    /// Event bridge port in the dual layout.
    pub event_port: u16,

    /// Bridge port in the single layout.
    pub legacy_port: u16,

    /// Read timeout in milliseconds. Expiry only re-arms the read.
    pub read_timeout_ms: u64,

    /// Write timeout in milliseconds.
    pub write_timeout_ms: u64,
}

impl BridgeConfig {
    pub fn read_timeout(&self) -> Duration {
        Duration::from_millis(self.read_timeout_ms)
    }

    pub fn write_timeout(&self) -> Duration {
        Duration::from_millis(self.write_timeout_ms)
    }
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            bind_address: IpAddr::V4(Ipv4Addr::UNSPECIFIED),
            layout: BridgeLayout::Dual,
            command_port: COMMAND_PORT,
            event_port: EVENT_PORT,
            legacy_port: LEGACY_PORT,
            read_timeout_ms: 1000,
            write_timeout_ms: 1000,
        }
    }
}

/// Device Manager timeouts in milliseconds, passed through untouched.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DeviceTimeouts {
    pub connect_ms: u32,
    pub write_ms: u32,
    pub first_read_ms: u32,
    pub later_read_ms: u32,
}

impl Default for DeviceTimeouts {
    fn default() -> Self {
        Self {
            connect_ms: 20000,
            write_ms: 1000,
            first_read_ms: 2000,
            later_read_ms: 100,
        }
    }
}

impl Config {
    fn default_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("txrx-bridge")
            .join("config.toml")
    }

    /// Load configuration from file or create default.
    pub fn load() -> Result<Self> {
        Self::load_from(&Self::default_path())
    }

    /// Load configuration from `path`, writing defaults there if missing.
    pub fn load_from(path: &Path) -> Result<Self> {
        if let Some(dir) = path.parent() {
            std::fs::create_dir_all(dir)?;
        }

        let config = if path.exists() {
            let content = std::fs::read_to_string(path)?;
            toml::from_str(&content)?
        } else {
            let config = Self::default();
            config.save_to(path)?;
            config
        };

        Ok(config)
    }

    /// Save configuration to `path`.
    pub fn save_to(&self, path: &Path) -> Result<()> {
        let content = toml::to_string_pretty(self)?;
        std::fs::write(path, content)?;
        Ok(())
    }
}
