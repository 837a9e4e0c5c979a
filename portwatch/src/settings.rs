//! Engine configuration and persisted user settings.

use std::sync::Arc;
use std::time::Duration;

use crate::device::{DFU_ALLOW_LIST, UsbFilter};
use crate::error::{Error, Result};

/// Default reconciliation tick. Shorter intervals caused slowdowns with
/// some serial backends.
pub const DEFAULT_CHECK_INTERVAL: Duration = Duration::from_millis(500);

/// Default interval between reachability probe passes.
pub const DEFAULT_PROBE_INTERVAL: Duration = Duration::from_secs(5);

/// Default per-probe connect timeout.
pub const DEFAULT_PROBE_TIMEOUT: Duration = Duration::from_secs(2);

/// Default interval between discovery browser refreshes.
pub const DEFAULT_FEED_REFRESH_INTERVAL: Duration = Duration::from_secs(10);

/// Default deadline for one-shot callbacks.
pub const DEFAULT_CALLBACK_TIMEOUT: Duration = Duration::from_millis(10_000);

/// Platform family used by the auto-select heuristic.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "lowercase"))]
pub enum OsFamily {
    /// Windows (`COMx` ports).
    Windows,
    /// Unix-like (`/dev/tty*` ports).
    Unix,
}

impl OsFamily {
    /// The family this binary was built for.
    #[must_use]
    pub fn current() -> Self {
        if cfg!(windows) {
            Self::Windows
        } else {
            Self::Unix
        }
    }
}

impl Default for OsFamily {
    fn default() -> Self {
        Self::current()
    }
}

/// Engine timing and behaviour.
#[derive(Debug, Clone)]
pub struct HandlerConfig {
    /// Reconciliation tick interval.
    pub check_interval: Duration,
    /// Interval between reachability probe passes.
    pub probe_interval: Duration,
    /// Per-probe connect timeout.
    pub probe_timeout: Duration,
    /// TCP port probed on network endpoints.
    pub probe_port: u16,
    /// Interval between discovery browser refreshes.
    pub feed_refresh_interval: Duration,
    /// Deadline for callbacks registered without an explicit timeout.
    pub callback_timeout: Duration,
    /// Connect automatically when a new endpoint appears.
    pub auto_connect: bool,
    /// Platform family for auto-selection.
    pub os_family: OsFamily,
    /// USB devices that indicate firmware-update mode.
    pub usb_filters: Arc<[UsbFilter]>,
}

impl Default for HandlerConfig {
    fn default() -> Self {
        Self {
            check_interval: DEFAULT_CHECK_INTERVAL,
            probe_interval: DEFAULT_PROBE_INTERVAL,
            probe_timeout: DEFAULT_PROBE_TIMEOUT,
            probe_port: 80,
            feed_refresh_interval: DEFAULT_FEED_REFRESH_INTERVAL,
            callback_timeout: DEFAULT_CALLBACK_TIMEOUT,
            auto_connect: false,
            os_family: OsFamily::current(),
            usb_filters: Arc::from(DFU_ALLOW_LIST),
        }
    }
}

impl HandlerConfig {
    /// Set the reconciliation tick interval.
    #[must_use]
    pub fn with_check_interval(mut self, interval: Duration) -> Self {
        self.check_interval = interval;
        self
    }

    /// Set the callback timeout.
    #[must_use]
    pub fn with_callback_timeout(mut self, timeout: Duration) -> Self {
        self.callback_timeout = timeout;
        self
    }

    /// Enable or disable auto-connect.
    #[must_use]
    pub fn with_auto_connect(mut self, enabled: bool) -> Self {
        self.auto_connect = enabled;
        self
    }

    /// Override the platform family.
    #[must_use]
    pub fn with_os_family(mut self, os_family: OsFamily) -> Self {
        self.os_family = os_family;
        self
    }

    /// Reject configurations that would spin or never fire.
    pub fn validate(&self) -> Result<()> {
        let intervals = [
            ("check_interval", self.check_interval),
            ("probe_interval", self.probe_interval),
            ("probe_timeout", self.probe_timeout),
            ("feed_refresh_interval", self.feed_refresh_interval),
            ("callback_timeout", self.callback_timeout),
        ];
        for (name, value) in intervals {
            if value.is_zero() {
                return Err(Error::Config(format!("{name} must be greater than zero")));
            }
        }
        if self.usb_filters.is_empty() {
            return Err(Error::Config("usb_filters must not be empty".to_string()));
        }
        Ok(())
    }
}

/// User preferences read at (re)initialization.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct PortSettings {
    /// List every serial device, not just known USB bridges.
    #[cfg_attr(feature = "serde", serde(default))]
    pub show_all_serial_devices: bool,
    /// Offer a "virtual" entry in the picker.
    #[cfg_attr(feature = "serde", serde(default))]
    pub show_virtual_mode: bool,
}

/// Persisted configuration store. Read on every reinitialization, never
/// watched.
pub trait SettingsSource: Send {
    /// Current settings.
    fn load(&self) -> PortSettings;
}

impl SettingsSource for PortSettings {
    fn load(&self) -> PortSettings {
        *self
    }
}
