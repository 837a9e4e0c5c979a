//! Endpoint data model and USB identification tables.
//!
//! An [`Endpoint`] is anything the application can connect to: a serial
//! device node, or a network host advertised over mDNS (`tcp://<addr>`).
//! Endpoints are compared across snapshots by `path` alone.

use std::fmt;

/// Path prefix used for network endpoints.
///
/// Device node paths never start with a URL scheme, so network paths cannot
/// collide with serial paths.
pub const TCP_PREFIX: &str = "tcp://";

/// A connectable target.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Endpoint {
    /// Unique identifier within a snapshot (e.g. "/dev/ttyUSB0", "COM3",
    /// "tcp://10.0.0.1").
    pub path: String,
    /// Human-readable label.
    pub display_name: Option<String>,
    /// Fully-qualified name of the advertising host (network endpoints only).
    pub fqdn: Option<String>,
    /// USB vendor ID (0 for network endpoints).
    pub vendor_id: Option<u16>,
    /// USB product ID (0 for network endpoints).
    pub product_id: Option<u16>,
}

impl Endpoint {
    /// Create an endpoint with only a path.
    pub fn new(path: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            display_name: None,
            fqdn: None,
            vendor_id: None,
            product_id: None,
        }
    }

    /// Set the display name.
    #[must_use]
    pub fn with_display_name(mut self, name: impl Into<String>) -> Self {
        self.display_name = Some(name.into());
        self
    }

    /// Set the USB identifiers.
    #[must_use]
    pub fn with_usb_ids(mut self, vendor_id: u16, product_id: u16) -> Self {
        self.vendor_id = Some(vendor_id);
        self.product_id = Some(product_id);
        self
    }

    /// Whether this endpoint was projected from a network service.
    pub fn is_network(&self) -> bool {
        self.path.starts_with(TCP_PREFIX)
    }

    /// Host part of a network path, `None` for serial endpoints.
    pub fn network_host(&self) -> Option<&str> {
        self.path.strip_prefix(TCP_PREFIX)
    }

    /// Whether two endpoints denote the same target.
    pub fn same_path(&self, other: &Self) -> bool {
        self.path == other.path
    }

    /// Picker label: `"<path> - <displayName>"`, or the bare path.
    pub fn label(&self) -> String {
        match &self.display_name {
            Some(name) => format!("{} - {name}", self.path),
            None => self.path.clone(),
        }
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.path)
    }
}

/// A raw USB device as reported by the OS, before allow-list filtering.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct UsbDevice {
    /// USB vendor ID.
    pub vendor_id: u16,
    /// USB product ID.
    pub product_id: u16,
    /// Product string descriptor (if available).
    pub product_name: Option<String>,
}

/// A `{vendorId, productId}` pair matched by the USB-mode enumerator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct UsbFilter {
    /// USB vendor ID.
    pub vendor_id: u16,
    /// USB product ID.
    pub product_id: u16,
}

impl UsbFilter {
    /// Check if this filter matches the given device.
    pub fn matches(&self, device: &UsbDevice) -> bool {
        self.vendor_id == device.vendor_id && self.product_id == device.product_id
    }
}

/// Devices that indicate a target in firmware-update mode.
pub const DFU_ALLOW_LIST: &[UsbFilter] = &[
    // STM32 in DFU mode, or a radio in USB update mode
    UsbFilter {
        vendor_id: 1155,
        product_id: 57105,
    },
    // GD32 DFU bootloader
    UsbFilter {
        vendor_id: 10473,
        product_id: 393,
    },
];

/// Known USB-to-UART bridges, used to hide unrelated serial devices.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BridgeKind {
    /// STMicroelectronics virtual COM port.
    Stm,
    /// Silicon Labs CP210x.
    Cp210x,
    /// WCH CH340/CH341/CH9102.
    Ch34x,
    /// FTDI FT232 family.
    Ftdi,
}

const KNOWN_BRIDGES: &[(u16, BridgeKind)] = &[
    (0x0483, BridgeKind::Stm),
    (0x10C4, BridgeKind::Cp210x),
    (0x1A86, BridgeKind::Ch34x),
    (0x0403, BridgeKind::Ftdi),
];

impl BridgeKind {
    /// Classify a USB vendor ID.
    #[must_use]
    pub fn from_vid(vid: u16) -> Option<Self> {
        KNOWN_BRIDGES
            .iter()
            .find(|(known, _)| *known == vid)
            .map(|(_, kind)| *kind)
    }

    /// Get a human-readable name for the bridge.
    pub fn name(&self) -> &'static str {
        match self {
            Self::Stm => "STM32",
            Self::Cp210x => "CP210x",
            Self::Ch34x => "CH34x",
            Self::Ftdi => "FTDI",
        }
    }
}
