//! Configuration file support for portwatch.
//!
//! Configuration is loaded from multiple sources with the following priority (highest first):
//! 1. Command-line arguments
//! 2. Environment variables (PORTWATCH_*)
//! 3. Local config file (./portwatch.toml)
//! 4. Global config file (~/.config/portwatch/config.toml)

use directories::ProjectDirs;
use log::{debug, warn};
use portwatch::{DFU_ALLOW_LIST, HTTP_SERVICE_TYPE, HandlerConfig, PortSettings, UsbFilter};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

/// Extra USB device treated as "firmware-update mode".
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct UsbFilterConfig {
    /// USB Vendor ID.
    pub vid: u16,
    /// USB Product ID.
    pub pid: u16,
}

impl From<UsbFilterConfig> for UsbFilter {
    fn from(filter: UsbFilterConfig) -> Self {
        Self {
            vendor_id: filter.vid,
            product_id: filter.pid,
        }
    }
}

/// What to discover.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DiscoveryConfig {
    /// List every serial device, not only known USB bridges.
    pub show_all_serial_devices: Option<bool>,
    /// Offer the virtual-mode picker entry.
    pub show_virtual_mode: Option<bool>,
    /// Browse for network receivers over mDNS.
    pub mdns: Option<bool>,
    /// mDNS service type to browse.
    pub service_type: Option<String>,
}

/// Engine timings, in milliseconds.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TimingConfig {
    pub check_interval_ms: Option<u64>,
    pub probe_interval_ms: Option<u64>,
    pub probe_timeout_ms: Option<u64>,
    pub probe_port: Option<u16>,
    pub feed_refresh_interval_ms: Option<u64>,
    pub callback_timeout_ms: Option<u64>,
}

/// Main configuration structure.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// Discovery configuration.
    #[serde(default)]
    pub discovery: DiscoveryConfig,
    /// Timing configuration.
    #[serde(default)]
    pub timing: TimingConfig,
    /// Additional firmware-update devices.
    #[serde(default)]
    pub usb_filter: Vec<UsbFilterConfig>,
}

impl Config {
    /// Load configuration from all available sources.
    pub fn load() -> Self {
        let mut config = Self::default();

        if let Some(global_path) = Self::global_config_path() {
            if let Some(global_config) = Self::load_from_file(&global_path) {
                debug!("Loaded global config from {}", global_path.display());
                config.merge(global_config);
            }
        }

        // Local overrides global
        if let Some(local_config) = Self::load_from_file(Path::new("portwatch.toml")) {
            debug!("Loaded local config from portwatch.toml");
            config.merge(local_config);
        }

        config
    }

    /// Load configuration from a specific file path (--config flag).
    pub fn load_from_path(path: &Path) -> Self {
        if let Some(config) = Self::load_from_file(path) {
            debug!("Loaded config from {}", path.display());
            config
        } else {
            warn!(
                "Could not load config from {}, using defaults",
                path.display()
            );
            Self::default()
        }
    }

    fn load_from_file(path: &Path) -> Option<Self> {
        if !path.exists() {
            return None;
        }

        match fs::read_to_string(path) {
            Ok(content) => match toml::from_str(&content) {
                Ok(config) => Some(config),
                Err(e) => {
                    warn!("Failed to parse config file {}: {}", path.display(), e);
                    None
                },
            },
            Err(e) => {
                warn!("Failed to read config file {}: {}", path.display(), e);
                None
            },
        }
    }

    /// Get the global configuration directory.
    pub fn global_config_dir() -> Option<PathBuf> {
        ProjectDirs::from("", "", "portwatch").map(|dirs| dirs.config_dir().to_path_buf())
    }

    /// Get the global configuration file path.
    pub fn global_config_path() -> Option<PathBuf> {
        Self::global_config_dir().map(|dir| dir.join("config.toml"))
    }

    /// Merge another config into this one.
    fn merge(&mut self, other: Self) {
        let discovery = other.discovery;
        if discovery.show_all_serial_devices.is_some() {
            self.discovery.show_all_serial_devices = discovery.show_all_serial_devices;
        }
        if discovery.show_virtual_mode.is_some() {
            self.discovery.show_virtual_mode = discovery.show_virtual_mode;
        }
        if discovery.mdns.is_some() {
            self.discovery.mdns = discovery.mdns;
        }
        if discovery.service_type.is_some() {
            self.discovery.service_type = discovery.service_type;
        }

        let timing = other.timing;
        let fields = [
            (&mut self.timing.check_interval_ms, timing.check_interval_ms),
            (&mut self.timing.probe_interval_ms, timing.probe_interval_ms),
            (&mut self.timing.probe_timeout_ms, timing.probe_timeout_ms),
            (
                &mut self.timing.feed_refresh_interval_ms,
                timing.feed_refresh_interval_ms,
            ),
            (&mut self.timing.callback_timeout_ms, timing.callback_timeout_ms),
        ];
        for (slot, value) in fields {
            if value.is_some() {
                *slot = value;
            }
        }
        if timing.probe_port.is_some() {
            self.timing.probe_port = timing.probe_port;
        }

        for filter in other.usb_filter {
            if !self.usb_filter.contains(&filter) {
                self.usb_filter.push(filter);
            }
        }
    }

    /// Engine configuration derived from this file.
    pub fn handler_config(&self) -> HandlerConfig {
        let defaults = HandlerConfig::default();
        let ms = |value: Option<u64>, default: Duration| value.map_or(default, Duration::from_millis);

        let mut filters: Vec<UsbFilter> = DFU_ALLOW_LIST.to_vec();
        for extra in &self.usb_filter {
            let filter = UsbFilter::from(*extra);
            if !filters.contains(&filter) {
                filters.push(filter);
            }
        }

        HandlerConfig {
            check_interval: ms(self.timing.check_interval_ms, defaults.check_interval),
            probe_interval: ms(self.timing.probe_interval_ms, defaults.probe_interval),
            probe_timeout: ms(self.timing.probe_timeout_ms, defaults.probe_timeout),
            probe_port: self.timing.probe_port.unwrap_or(defaults.probe_port),
            feed_refresh_interval: ms(
                self.timing.feed_refresh_interval_ms,
                defaults.feed_refresh_interval,
            ),
            callback_timeout: ms(self.timing.callback_timeout_ms, defaults.callback_timeout),
            usb_filters: Arc::from(filters),
            ..defaults
        }
    }

    /// Persisted settings, with command-line flags taking precedence.
    pub fn port_settings(&self, show_all: bool, show_virtual: bool) -> PortSettings {
        PortSettings {
            show_all_serial_devices: show_all
                || self.discovery.show_all_serial_devices.unwrap_or(false),
            show_virtual_mode: show_virtual || self.discovery.show_virtual_mode.unwrap_or(false),
        }
    }

    /// Whether mDNS browsing is enabled (default on).
    pub fn mdns_enabled(&self) -> bool {
        self.discovery.mdns.unwrap_or(true)
    }

    /// mDNS service type to browse.
    pub fn service_type(&self) -> &str {
        self.discovery
            .service_type
            .as_deref()
            .unwrap_or(HTTP_SERVICE_TYPE)
    }
}
