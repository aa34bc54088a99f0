use serde::Serialize;
use serialport::{SerialPortInfo, SerialPortType};
use std::collections::HashSet;

/// Port description printed by `--list-ports`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PortListing {
    pub port_name: String,
    pub port_type: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub usb_id: Option<String>,
}

/// Enumerate serial ports, USB adapters first.
pub fn available_ports_sorted() -> Vec<SerialPortInfo> {
    let raw_ports = serialport::available_ports().unwrap_or_default();
    sort_and_dedup_ports(raw_ports)
}

pub fn list_ports() -> Vec<PortListing> {
    available_ports_sorted()
        .into_iter()
        .map(|p| {
            let (port_type, usb_id) = match &p.port_type {
                SerialPortType::UsbPort(info) => (
                    "usb".to_string(),
                    Some(format!("{:04x}:{:04x}", info.vid, info.pid)),
                ),
                SerialPortType::PciPort => ("pci".to_string(), None),
                SerialPortType::BluetoothPort => ("bluetooth".to_string(), None),
                _ => ("unknown".to_string(), None),
            };
            PortListing {
                port_name: p.port_name,
                port_type,
                usb_id,
            }
        })
        .collect()
}

pub(crate) fn sort_and_dedup_ports(raw_ports: Vec<SerialPortInfo>) -> Vec<SerialPortInfo> {
    let mut seen: HashSet<String> = HashSet::new();
    let mut ports: Vec<SerialPortInfo> = raw_ports
        .into_iter()
        .filter(|p| seen.insert(p.port_name.to_lowercase()))
        .collect();

    // USB/ACM adapters are what the monitor board shows up as
    fn priority(name: &str) -> i32 {
        let n = name.to_lowercase();
        if n.contains("ttyusb") || n.contains("usbserial") || n.contains("usbmodem") {
            0
        } else if n.contains("acm") {
            1
        } else if n.contains("com") {
            2
        } else {
            10
        }
    }

    ports.sort_by(|a, b| {
        priority(&a.port_name)
            .cmp(&priority(&b.port_name))
            .then_with(|| a.port_name.cmp(&b.port_name))
    });
    ports
}

#[cfg(test)]
mod tests {
    use super::*;

    fn port(name: &str) -> SerialPortInfo {
        SerialPortInfo {
            port_name: name.to_string(),
            port_type: SerialPortType::Unknown,
        }
    }

    #[test]
    fn test_usb_ports_sort_first() {
        let sorted = sort_and_dedup_ports(vec![
            port("/dev/ttyS0"),
            port("/dev/ttyACM0"),
            port("/dev/ttyUSB1"),
            port("/dev/ttyUSB0"),
        ]);
        let names: Vec<&str> = sorted.iter().map(|p| p.port_name.as_str()).collect();
        assert_eq!(
            names,
            vec!["/dev/ttyUSB0", "/dev/ttyUSB1", "/dev/ttyACM0", "/dev/ttyS0"]
        );
    }

    #[test]
    fn test_duplicates_removed() {
        let sorted = sort_and_dedup_ports(vec![port("COM3"), port("com3"), port("COM4")]);
        assert_eq!(sorted.len(), 2);
    }
}
