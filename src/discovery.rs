use itertools::Itertools;
use serialport::SerialPortType;

use crate::error::Error;

/// Enumerate candidate panel devices.
///
/// Yields `(path, description)` pairs for every serial device whose path
/// starts with `pattern`, sorted by path.
pub(crate) fn list(pattern: &str) -> Result<Vec<(String, String)>, Error> {
    let candidates = serialport::available_ports()?
        .into_iter()
        .filter(|info| info.port_name.starts_with(pattern))
        .map(|info| {
            let description = describe(&info.port_type);
            (info.port_name, description)
        })
        .sorted()
        .collect();

    Ok(candidates)
}

fn describe(port_type: &SerialPortType) -> String {
    match port_type {
        SerialPortType::UsbPort(usb) => match (&usb.manufacturer, &usb.product) {
            (Some(manufacturer), Some(product)) => format!("{manufacturer} {product}"),
            (None, Some(product)) => product.clone(),
            (Some(manufacturer), None) => manufacturer.clone(),
            (None, None) => "USB serial device".into(),
        },
        SerialPortType::PciPort => "PCI serial device".into(),
        SerialPortType::BluetoothPort => "Bluetooth serial device".into(),
        SerialPortType::Unknown => "Unknown serial device".into(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serialport::UsbPortInfo;

    fn usb(manufacturer: Option<&str>, product: Option<&str>) -> SerialPortType {
        SerialPortType::UsbPort(UsbPortInfo {
            vid: 0x2341,
            pid: 0x0043,
            serial_number: None,
            manufacturer: manufacturer.map(Into::into),
            product: product.map(Into::into),
        })
    }

    #[test]
    fn usb_descriptions_prefer_strings() {
        assert_eq!(
            describe(&usb(Some("Arduino"), Some("Uno"))),
            "Arduino Uno"
        );
        assert_eq!(describe(&usb(None, Some("Uno"))), "Uno");
        assert_eq!(describe(&usb(Some("Arduino"), None)), "Arduino");
        assert_eq!(describe(&usb(None, None)), "USB serial device");
    }

    #[test]
    fn non_usb_descriptions() {
        assert_eq!(describe(&SerialPortType::Unknown), "Unknown serial device");
    }

    #[test]
    fn unlikely_pattern_matches_nothing() {
        let candidates = list("/dev/ttyNOPE").unwrap();
        assert!(candidates.is_empty());
    }
}
