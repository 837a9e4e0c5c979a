//! The connection layer, as seen from the discovery engine.
//!
//! The engine does not connect to anything itself. It reads connection
//! state and asks the application to disconnect, connect or reset through
//! this trait.

use log::debug;

/// Application-side connection state and actions.
pub trait ConnectionLayer: Send {
    /// Path of the endpoint currently connected, if any.
    fn connected_path(&self) -> Option<String>;

    /// Whether a connection is established.
    fn is_connected(&self) -> bool {
        self.connected_path().is_some()
    }

    /// Whether a connection attempt is in progress.
    fn is_connecting(&self) -> bool;

    /// Tear down the active connection (its endpoint went away).
    fn force_disconnect(&mut self);

    /// Start connecting to the selected endpoint.
    fn request_connect(&mut self);

    /// Reset flight-controller state after a USB-mode check.
    fn reset_state(&mut self);

    /// Whether the firmware-flash workflow is active.
    fn is_flashing(&self) -> bool {
        false
    }

    /// Tell the firmware-flash workflow that the board must be re-verified.
    fn mark_needs_verification(&mut self) {}
}

/// A connection layer that is never connected.
#[derive(Debug, Clone, Copy, Default)]
pub struct Detached;

impl ConnectionLayer for Detached {
    fn connected_path(&self) -> Option<String> {
        None
    }

    fn is_connecting(&self) -> bool {
        false
    }

    fn force_disconnect(&mut self) {}

    fn request_connect(&mut self) {
        debug!("Auto-connect requested with no connection layer attached");
    }

    fn reset_state(&mut self) {}
}
