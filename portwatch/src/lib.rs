//! # portwatch
//!
//! Discovery and reconciliation of connectable endpoints: serial devices,
//! USB devices in firmware-update mode, and network receivers advertised
//! over mDNS.
//!
//! The engine periodically enumerates everything it can see, diffs the
//! result against its previous snapshot and reports what appeared or
//! vanished:
//!
//! - one-shot, timeout-guarded callbacks ([`PortHandler::on_added`],
//!   [`PortHandler::on_removed`])
//! - a [`PortEvent`] stream ([`PortHandler::subscribe`])
//! - a sorted, presentable picker list ([`PortPicker`])
//!
//! Network receivers are probed with a TCP connect on a fixed interval and
//! dropped as soon as they stop answering.
//!
//! ## Features
//!
//! - `native` (default): serial enumeration via `serialport`, USB via `nusb`
//! - `mdns` (default): mDNS discovery feed via `mdns-sd`
//! - `serde`: Serialization support for data types
//!
//! ## Example
//!
//! ```rust,no_run
//! use std::sync::atomic::AtomicBool;
//! use std::time::Duration;
//!
//! use portwatch::{PortEvent, PortHandler};
//!
//! fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let mut handler = PortHandler::builder().build()?;
//!     let events = handler.subscribe();
//!     handler.initialize();
//!
//!     let stop = AtomicBool::new(false);
//!     std::thread::scope(|scope| {
//!         scope.spawn(|| {
//!             for event in events {
//!                 if let PortEvent::Added { ports } = event {
//!                     println!("New: {ports:?}");
//!                 }
//!             }
//!         });
//!         handler.run_until(&stop, Duration::from_millis(100));
//!     });
//!
//!     Ok(())
//! }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod clock;
pub mod connection;
pub mod device;
pub mod dispatch;
pub mod enumerate;
pub mod error;
pub mod event;
pub mod feed;
pub mod handler;
#[cfg(feature = "mdns")]
pub mod mdns;
#[cfg(feature = "native")]
pub mod native;
pub mod probe;
pub mod registry;
pub mod schedule;
pub mod select;
pub mod settings;
pub mod worker;

// Re-exports for convenience
#[cfg(feature = "mdns")]
pub use mdns::{HTTP_SERVICE_TYPE, MdnsFeed};
#[cfg(feature = "native")]
pub use native::{NativeSerialSource, NativeUsbSource};
pub use {
    clock::{Clock, ManualClock, SystemClock},
    connection::{ConnectionLayer, Detached},
    device::{BridgeKind, DFU_ALLOW_LIST, Endpoint, UsbDevice, UsbFilter},
    dispatch::{CallbackHandle, CallbackKind, Notification, Timeout},
    enumerate::{NoDevices, SerialSource, UsbSource},
    error::{Error, Result},
    event::PortEvent,
    feed::{ChannelFeed, ServiceFeed},
    handler::{PortHandler, PortHandlerBuilder, difference},
    probe::{Reachability, TcpReachability},
    registry::{ServiceAction, ServiceChange, ServiceRecord, ServiceRegistry},
    select::{EntryKind, PickerEntry, PortPicker},
    settings::{HandlerConfig, OsFamily, PortSettings, SettingsSource},
    worker::Execution,
};
