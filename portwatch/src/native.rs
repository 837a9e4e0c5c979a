//! Native enumeration sources using the `serialport` and `nusb` crates.

use log::{debug, trace};

use crate::device::{BridgeKind, Endpoint, UsbDevice, UsbFilter};
use crate::enumerate::{SerialSource, UsbSource, filter_usb};

/// Serial ports reported by the OS.
#[derive(Debug, Clone, Copy, Default)]
pub struct NativeSerialSource;

impl SerialSource for NativeSerialSource {
    fn list_serial_devices(&mut self, show_all: bool) -> Vec<Endpoint> {
        match serialport::available_ports() {
            Ok(ports) => endpoints_from(ports, show_all),
            Err(e) => {
                debug!("Failed to enumerate serial ports: {e}");
                Vec::new()
            },
        }
    }
}

/// Turn OS port descriptions into endpoints.
///
/// Unless `show_all` is set, only USB ports behind a known bridge survive.
fn endpoints_from(ports: Vec<serialport::SerialPortInfo>, show_all: bool) -> Vec<Endpoint> {
    let mut result = Vec::new();
    for port_info in ports {
        let mut endpoint = Endpoint::new(port_info.port_name.clone());

        match port_info.port_type {
            serialport::SerialPortType::UsbPort(usb_info) => {
                let bridge = BridgeKind::from_vid(usb_info.vid);
                trace!(
                    "Found USB port: {} (VID: {:04X}, PID: {:04X}, Bridge: {:?})",
                    port_info.port_name, usb_info.vid, usb_info.pid, bridge
                );
                if bridge.is_none() && !show_all {
                    continue;
                }
                endpoint = endpoint.with_usb_ids(usb_info.vid, usb_info.pid);
                endpoint.display_name = usb_info
                    .product
                    .or_else(|| bridge.map(|b| b.name().to_string()));
            },
            _ if !show_all => continue,
            _ => {},
        }

        result.push(endpoint);
    }

    result
}

/// USB devices reported by the OS.
#[derive(Debug, Clone, Copy, Default)]
pub struct NativeUsbSource;

impl UsbSource for NativeUsbSource {
    fn list_usb_devices(&mut self, filters: &[UsbFilter]) -> Vec<UsbDevice> {
        let devices = match nusb::list_devices() {
            Ok(devices) => devices,
            Err(e) => {
                debug!("Failed to enumerate USB devices: {e}");
                return Vec::new();
            },
        };

        let devices = devices
            .map(|info| UsbDevice {
                vendor_id: info.vendor_id(),
                product_id: info.product_id(),
                product_name: info.product_string().map(str::to_string),
            })
            .collect();

        filter_usb(devices, filters)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::DFU_ALLOW_LIST;
    use serialport::{SerialPortInfo, SerialPortType, UsbPortInfo};

    fn usb_port(name: &str, vid: u16, pid: u16, product: Option<&str>) -> SerialPortInfo {
        SerialPortInfo {
            port_name: name.to_string(),
            port_type: SerialPortType::UsbPort(UsbPortInfo {
                vid,
                pid,
                serial_number: None,
                manufacturer: None,
                product: product.map(str::to_string),
            }),
        }
    }

    fn other_port(name: &str, port_type: SerialPortType) -> SerialPortInfo {
        SerialPortInfo {
            port_name: name.to_string(),
            port_type,
        }
    }

    fn sample_ports() -> Vec<SerialPortInfo> {
        vec![
            usb_port("/dev/ttyUSB0", 0x10C4, 0xEA60, None),
            usb_port("/dev/ttyACM0", 0x0483, 0x5740, Some("STM32 Virtual ComPort")),
            usb_port("/dev/ttyACM1", 0x1234, 0x0001, Some("Mystery Gadget")),
            other_port("/dev/ttyS0", SerialPortType::PciPort),
            other_port("/dev/rfcomm0", SerialPortType::BluetoothPort),
        ]
    }

    #[test]
    fn test_endpoints_from_keeps_known_bridges() {
        let endpoints = endpoints_from(sample_ports(), false);

        assert_eq!(endpoints.len(), 2);
        assert_eq!(endpoints[0].path, "/dev/ttyUSB0");
        assert_eq!(endpoints[0].vendor_id, Some(0x10C4));
        assert_eq!(endpoints[0].product_id, Some(0xEA60));
        assert_eq!(
            endpoints[0].display_name.as_deref(),
            Some(BridgeKind::Cp210x.name())
        );
        assert_eq!(endpoints[1].path, "/dev/ttyACM0");
        assert_eq!(
            endpoints[1].display_name.as_deref(),
            Some("STM32 Virtual ComPort")
        );
    }

    #[test]
    fn test_endpoints_from_show_all() {
        let endpoints = endpoints_from(sample_ports(), true);
        let paths: Vec<&str> = endpoints.iter().map(|e| e.path.as_str()).collect();
        assert_eq!(
            paths,
            ["/dev/ttyUSB0", "/dev/ttyACM0", "/dev/ttyACM1", "/dev/ttyS0", "/dev/rfcomm0"]
        );

        assert_eq!(endpoints[2].vendor_id, Some(0x1234));
        assert_eq!(endpoints[2].display_name.as_deref(), Some("Mystery Gadget"));
        assert_eq!(endpoints[3].vendor_id, None);
        assert_eq!(endpoints[3].display_name, None);
    }

    #[test]
    fn test_endpoints_from_unknown_usb_without_product() {
        let ports = vec![usb_port("COM9", 0x1234, 0x0002, None)];
        assert!(endpoints_from(ports.clone(), false).is_empty());

        let endpoints = endpoints_from(ports, true);
        assert_eq!(endpoints.len(), 1);
        assert_eq!(endpoints[0].display_name, None);
    }

    #[test]
    fn test_native_serial_does_not_panic() {
        let _ = NativeSerialSource.list_serial_devices(true);
    }

    #[test]
    fn test_native_usb_only_reports_allow_listed() {
        let devices = NativeUsbSource.list_usb_devices(DFU_ALLOW_LIST);
        assert!(
            devices
                .iter()
                .all(|d| DFU_ALLOW_LIST.iter().any(|f| f.matches(d)))
        );
    }
}
