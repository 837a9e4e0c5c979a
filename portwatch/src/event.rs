//! Change notifications for long-lived subscribers.

use crate::device::Endpoint;

/// Something observable changed in the endpoint set.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(tag = "event", rename_all = "snake_case"))]
pub enum PortEvent {
    /// Endpoints appeared.
    Added {
        /// New endpoints.
        ports: Vec<Endpoint>,
    },
    /// Endpoints disappeared.
    Removed {
        /// Vanished endpoints.
        ports: Vec<Endpoint>,
    },
    /// A device entered or left firmware-update mode.
    UsbModeChanged {
        /// Whether an allow-listed device is attached.
        active: bool,
    },
    /// The picker selection changed.
    Selected {
        /// Value of the selected entry.
        value: String,
    },
}
