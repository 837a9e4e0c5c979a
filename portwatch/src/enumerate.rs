//! Device enumerators.
//!
//! Two independent sources are polled: serial-capable devices (merged with
//! network receivers from the service registry) and raw USB devices
//! filtered against the firmware-update allow-list. Neither can fail: a
//! source that cannot enumerate reports nothing.

use crate::device::{Endpoint, UsbDevice, UsbFilter};
use crate::registry::ServiceRegistry;

/// Lists attached serial-capable devices.
pub trait SerialSource: Send {
    /// Current serial devices. With `show_all` unset, sources may hide
    /// devices that are not known USB-to-UART bridges.
    fn list_serial_devices(&mut self, show_all: bool) -> Vec<Endpoint>;
}

/// Lists attached USB devices.
pub trait UsbSource: Send {
    /// Current USB devices matching any of `filters`.
    fn list_usb_devices(&mut self, filters: &[UsbFilter]) -> Vec<UsbDevice>;
}

/// A source with nothing attached.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoDevices;

impl SerialSource for NoDevices {
    fn list_serial_devices(&mut self, _show_all: bool) -> Vec<Endpoint> {
        Vec::new()
    }
}

impl UsbSource for NoDevices {
    fn list_usb_devices(&mut self, _filters: &[UsbFilter]) -> Vec<UsbDevice> {
        Vec::new()
    }
}

/// Merge raw serial devices with advertised network receivers.
///
/// Network paths carry the `tcp://` prefix, so they never collide with
/// device nodes and no de-duplication is needed here.
pub fn merge_serial(raw: Vec<Endpoint>, registry: &ServiceRegistry) -> Vec<Endpoint> {
    let mut merged = raw;
    merged.extend(registry.receivers());
    merged
}

/// Keep only devices matching the allow-list.
pub fn filter_usb(devices: Vec<UsbDevice>, filters: &[UsbFilter]) -> Vec<UsbDevice> {
    devices
        .into_iter()
        .filter(|d| filters.iter().any(|f| f.matches(d)))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::DFU_ALLOW_LIST;
    use crate::registry::ServiceRecord;

    #[test]
    fn test_merge_with_empty_serial_list() {
        let mut registry = ServiceRegistry::new();
        registry.add(
            ServiceRecord::new(
                "rx1",
                vec!["10.0.0.1".parse().unwrap(), "10.0.0.2".parse().unwrap()],
            )
            .with_txt("vendor", "elrs")
            .with_txt("type", "rx"),
        );

        let merged = merge_serial(Vec::new(), &registry);
        let paths: Vec<&str> = merged.iter().map(|e| e.path.as_str()).collect();
        assert_eq!(paths, ["tcp://10.0.0.1", "tcp://10.0.0.2"]);
        assert!(merged.iter().all(|e| e.fqdn.as_deref() == Some("rx1")));
    }

    #[test]
    fn test_merge_keeps_serial_first() {
        let mut registry = ServiceRegistry::new();
        registry.add(
            ServiceRecord::new("rx1", vec!["10.0.0.1".parse().unwrap()])
                .with_txt("vendor", "elrs")
                .with_txt("type", "rx"),
        );

        let merged = merge_serial(vec![Endpoint::new("/dev/ttyUSB0")], &registry);
        assert_eq!(merged.len(), 2);
        assert_eq!(merged[0].path, "/dev/ttyUSB0");
        assert_eq!(merged[1].path, "tcp://10.0.0.1");
    }

    #[test]
    fn test_filter_usb() {
        let devices = vec![
            UsbDevice {
                vendor_id: 0x046D,
                product_id: 0xC52B,
                product_name: Some("Receiver".to_string()),
            },
            UsbDevice {
                vendor_id: 1155,
                product_id: 57105,
                product_name: Some("STM32 BOOTLOADER".to_string()),
            },
        ];

        let matched = filter_usb(devices, DFU_ALLOW_LIST);
        assert_eq!(matched.len(), 1);
        assert_eq!(matched[0].vendor_id, 1155);
    }

    #[test]
    fn test_no_devices_source() {
        assert!(NoDevices.list_serial_devices(true).is_empty());
        assert!(NoDevices.list_usb_devices(DFU_ALLOW_LIST).is_empty());
    }
}
