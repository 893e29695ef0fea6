// src/io/serial/utils.rs
//
// Serial line settings, conversions to the serialport crate's types,
// and port enumeration.

use serde::{Deserialize, Serialize};
use serialport::{DataBits, Parity as SpParity, SerialPortType, StopBits};

use crate::error::BridgeError;
use crate::io::Port;

// ============================================================================
// Types
// ============================================================================

/// Parity setting for serial port configuration
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Parity {
    #[default]
    None,
    Odd,
    Even,
}

/// Line settings shared by every port the bridge opens. Defaults to 8N1.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct LineSettings {
    #[serde(default = "default_data_bits")]
    pub data_bits: u8,
    #[serde(default = "default_stop_bits")]
    pub stop_bits: u8,
    #[serde(default)]
    pub parity: Parity,
}

fn default_data_bits() -> u8 {
    8
}
fn default_stop_bits() -> u8 {
    1
}

impl Default for LineSettings {
    fn default() -> Self {
        LineSettings {
            data_bits: default_data_bits(),
            stop_bits: default_stop_bits(),
            parity: Parity::None,
        }
    }
}

// ============================================================================
// Conversion Functions
// ============================================================================

pub fn to_serialport_parity(p: &Parity) -> SpParity {
    match p {
        Parity::None => SpParity::None,
        Parity::Odd => SpParity::Odd,
        Parity::Even => SpParity::Even,
    }
}

/// Anything outside 5..=7 is treated as 8 data bits.
pub fn to_serialport_data_bits(bits: u8) -> DataBits {
    match bits {
        5 => DataBits::Five,
        6 => DataBits::Six,
        7 => DataBits::Seven,
        _ => DataBits::Eight,
    }
}

pub fn to_serialport_stop_bits(bits: u8) -> StopBits {
    match bits {
        2 => StopBits::Two,
        _ => StopBits::One,
    }
}

// ============================================================================
// Enumeration
// ============================================================================

/// List the serial devices visible to the system.
///
/// On macOS only `/dev/cu.*` devices are kept: the `/dev/tty.*` twins block
/// on open waiting for carrier detect.
pub fn list_ports() -> Result<Vec<Port>, BridgeError> {
    let ports = serialport::available_ports().map_err(|e| BridgeError::Enumerate(e.to_string()))?;

    Ok(ports
        .into_iter()
        .filter(|_p| {
            #[cfg(target_os = "macos")]
            {
                !_p.port_name.starts_with("/dev/tty.")
            }
            #[cfg(not(target_os = "macos"))]
            {
                true
            }
        })
        .map(|p| {
            let name = display_name(&p.port_name, &p.port_type);
            Port::new(name, p.port_name)
        })
        .collect())
}

/// USB product string when the device reports one, else the device path.
fn display_name(path: &str, port_type: &SerialPortType) -> String {
    match port_type {
        SerialPortType::UsbPort(info) => match info.product.as_deref() {
            Some(product) if !product.trim().is_empty() => product.trim().to_string(),
            _ => path.to_string(),
        },
        _ => path.to_string(),
    }
}

// ============================================================================
// Tests
// ============================================================================
