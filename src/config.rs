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
//! Settings are read from `config.toml`; a missing file means defaults.

use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::bluetooth::constants::{rfcomm, scan, HEARTBEAT_PERIOD_MS, KNOWN_ADDRESS_CAPACITY, TARGET_NAME};
use crate::bluetooth::link::{ConnectMode, LinkSettings, ScanParameters};
use crate::usb::HostSettings;

/// Default depth of both command queues.
pub const DEFAULT_QUEUE_DEPTH: usize = 10;

/// Application configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Bluetooth settings.
    pub bluetooth: BluetoothConfig,

    /// USB host link settings.
    pub usb: UsbConfig,

    /// Queue settings.
    pub queues: QueueConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BluetoothConfig {
    /// Advertised name prefix to look for.
    pub target_name: String,

    /// "manual-select" or "auto-connect".
    pub connect_mode: ConnectMode,

    /// Heartbeat period in milliseconds.
    pub heartbeat_ms: u64,

    pub active_scan: bool,

    /// Scan interval in 0.625 ms units.
    pub scan_interval: u16,

    /// Scan window in 0.625 ms units.
    pub scan_window: u16,

    /// RFCOMM channel used when the SPP record is found.
    pub rfcomm_channel: u8,

    /// Addresses remembered per scan session.
    pub known_address_capacity: usize,
}

impl Default for BluetoothConfig {
    fn default() -> Self {
        Self {
            target_name: TARGET_NAME.to_string(),
            connect_mode: ConnectMode::default(),
            heartbeat_ms: HEARTBEAT_PERIOD_MS,
            active_scan: scan::ACTIVE,
            scan_interval: scan::INTERVAL,
            scan_window: scan::WINDOW,
            rfcomm_channel: rfcomm::DEFAULT_CHANNEL,
            known_address_capacity: KNOWN_ADDRESS_CAPACITY,
        }
    }
}

impl BluetoothConfig {
    pub fn link_settings(&self) -> LinkSettings {
        LinkSettings {
            target_name: self.target_name.clone(),
            mode: self.connect_mode,
            scan: ScanParameters {
                active: self.active_scan,
                interval: self.scan_interval,
                window: self.scan_window,
            },
            known_capacity: self.known_address_capacity,
        }
    }

    pub fn heartbeat_period(&self) -> Duration {
        Duration::from_millis(self.heartbeat_ms)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct UsbConfig {
    /// Serial device exposed by the USB gadget.
    pub device_path: PathBuf,

    /// Back-off after an empty read, in milliseconds.
    pub poll_interval_ms: u64,

    /// Wait for room in the inbound queue, in milliseconds.
    pub inbound_send_timeout_ms: u64,
}

impl Default for UsbConfig {
    fn default() -> Self {
        Self {
            device_path: PathBuf::from("/dev/ttyGS0"),
            poll_interval_ms: 10,
            inbound_send_timeout_ms: 1000,
        }
    }
}

impl UsbConfig {
    pub fn host_settings(&self) -> HostSettings {
        HostSettings {
            poll_interval: Duration::from_millis(self.poll_interval_ms),
            send_timeout: Duration::from_millis(self.inbound_send_timeout_ms),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct QueueConfig {
    /// Slots in each of the two queues.
    pub depth: usize,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            depth: DEFAULT_QUEUE_DEPTH,
        }
    }
}

impl Config {
    /// Default location of the configuration file.
    pub fn path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("ditoo-bridge")
            .join("config.toml")
    }

    /// Load configuration from the default location.
    pub fn load() -> Result<Self> {
        Self::load_from(&Self::path())
    }

    /// Load configuration from `path`, falling back to defaults if absent.
    pub fn load_from(path: &Path) -> Result<Self> {
        let config: Self = if path.exists() {
            let content = std::fs::read_to_string(path)
                .with_context(|| format!("Failed to read {}", path.display()))?;
            toml::from_str(&content)
                .with_context(|| format!("Invalid configuration in {}", path.display()))?
        } else {
            Self::default()
        };

        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<()> {
        if self.bluetooth.target_name.is_empty() {
            bail!("bluetooth.target_name must not be empty");
        }
        if self.bluetooth.heartbeat_ms == 0 {
            bail!("bluetooth.heartbeat_ms must be positive");
        }
        if self.bluetooth.known_address_capacity == 0 {
            bail!("bluetooth.known_address_capacity must be positive");
        }
        if self.queues.depth == 0 {
            bail!("queues.depth must be positive");
        }
        Ok(())
    }
}
