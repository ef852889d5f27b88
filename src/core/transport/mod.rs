//! Transport layer for port sessions
//!
//! Supports:
//! - Serial ports (RS-232, RS-485, USB-Serial)
//! - Simulated UUTs answering the bench command set

mod serial;
mod simulated;

pub use serial::{available_port_names, SerialTransport};
pub use simulated::{SimulatedSession, SimulatedUut};

use async_trait::async_trait;
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;
use thiserror::Error;

/// Serial port flow control type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SerialFlowControl {
    /// No flow control
    #[default]
    None,
    /// Hardware flow control (RTS/CTS)
    Hardware,
    /// Software flow control (XON/XOFF)
    Software,
}

/// Serial port parity
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SerialParity {
    /// No parity
    #[default]
    None,
    /// Odd parity
    Odd,
    /// Even parity
    Even,
}

/// Framing parameters handed to [`Transport::open`]
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Framing {
    /// Baud rate
    pub baud_rate: u32,
    /// Data bits (5, 6, 7, 8)
    pub data_bits: u8,
    /// Stop bits (1, 2)
    pub stop_bits: u8,
    /// Parity
    pub parity: SerialParity,
    /// Flow control
    pub flow_control: SerialFlowControl,
}

impl Default for Framing {
    fn default() -> Self {
        Self {
            baud_rate: 115_200,
            data_bits: 8,
            stop_bits: 1,
            parity: SerialParity::None,
            flow_control: SerialFlowControl::None,
        }
    }
}

impl fmt::Display for Framing {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let parity = match self.parity {
            SerialParity::None => 'N',
            SerialParity::Odd => 'O',
            SerialParity::Even => 'E',
        };
        write!(f, "{} {}{}{}", self.baud_rate, self.data_bits, parity, self.stop_bits)
    }
}

/// Where a port session goes
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum PortTarget {
    /// Physical serial device (COM3, /dev/ttyUSB0)
    Serial(String),
    /// Synthetic UUT, keyed by the configured port selector
    Simulated(String),
}

impl PortTarget {
    /// Identity used by the port reservation table
    ///
    /// Two descriptions naming the same device resolve to the same identity.
    pub fn identity(&self) -> String {
        match self {
            Self::Serial(name) => name.clone(),
            Self::Simulated(name) => format!("sim://{name}"),
        }
    }

    /// Selector passed to the transport
    pub fn selector(&self) -> &str {
        match self {
            Self::Serial(name) | Self::Simulated(name) => name,
        }
    }
}

impl fmt::Display for PortTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.identity())
    }
}

/// Transport error types
#[derive(Error, Debug)]
pub enum TransportError {
    /// Session could not be opened
    #[error("Open failed: {0}")]
    OpenFailed(String),

    /// Port not found
    #[error("Port not found: {0}")]
    PortNotFound(String),

    /// No response within the allotted time
    #[error("No response within {} ms", .0.as_millis())]
    Timeout(Duration),

    /// I/O error
    #[error("I/O error: {0}")]
    IoError(#[from] std::io::Error),

    /// Session already closed
    #[error("Disconnected")]
    Disconnected,

    /// Send error
    #[error("Send error: {0}")]
    SendError(String),

    /// Receive error
    #[error("Receive error: {0}")]
    ReceiveError(String),
}

/// Opens sessions against a resolved port target
#[async_trait]
pub trait Transport: Send + Sync {
    /// Open a session with the given framing
    async fn open(
        &self,
        target: &PortTarget,
        framing: &Framing,
    ) -> Result<Box<dyn TransportSession>, TransportError>;
}

/// One open command/response session
#[async_trait]
pub trait TransportSession: Send {
    /// Write raw bytes
    async fn send(&mut self, data: &[u8]) -> Result<(), TransportError>;

    /// Read one response, waiting at most `timeout`
    async fn receive_until(&mut self, timeout: Duration) -> Result<Bytes, TransportError>;

    /// Close the session
    async fn close(&mut self) -> Result<(), TransportError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_target_identity() {
        assert_eq!(PortTarget::Serial("COM11".into()).identity(), "COM11");
        assert_eq!(PortTarget::Simulated("COM11".into()).identity(), "sim://COM11");
        assert_eq!(PortTarget::Simulated("COM11".into()).selector(), "COM11");
    }

    #[test]
    fn test_framing_display() {
        let framing = Framing {
            parity: SerialParity::Even,
            ..Framing::default()
        };
        assert_eq!(framing.to_string(), "115200 8E1");
    }
}
