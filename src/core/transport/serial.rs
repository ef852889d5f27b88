//! Serial port transport implementation

use super::{Framing, PortTarget, SerialFlowControl, SerialParity, Transport, TransportError, TransportSession};
use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::Mutex;
use serialport::{DataBits, FlowControl, Parity, SerialPort, StopBits};
use std::io::{Read, Write};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Per-read timeout while waiting for a line
const READ_SLICE: Duration = Duration::from_millis(20);

/// Opens sessions on physical serial ports
#[derive(Debug, Default, Clone, Copy)]
pub struct SerialTransport;

impl SerialTransport {
    /// Create a new serial transport
    pub fn new() -> Self {
        Self
    }

    fn builder(target: &PortTarget, framing: &Framing) -> serialport::SerialPortBuilder {
        let data_bits = match framing.data_bits {
            5 => DataBits::Five,
            6 => DataBits::Six,
            7 => DataBits::Seven,
            _ => DataBits::Eight,
        };

        let stop_bits = match framing.stop_bits {
            2 => StopBits::Two,
            _ => StopBits::One,
        };

        let parity = match framing.parity {
            SerialParity::Odd => Parity::Odd,
            SerialParity::Even => Parity::Even,
            SerialParity::None => Parity::None,
        };

        let flow_control = match framing.flow_control {
            SerialFlowControl::Hardware => FlowControl::Hardware,
            SerialFlowControl::Software => FlowControl::Software,
            SerialFlowControl::None => FlowControl::None,
        };

        serialport::new(target.selector(), framing.baud_rate)
            .data_bits(data_bits)
            .stop_bits(stop_bits)
            .parity(parity)
            .flow_control(flow_control)
            .timeout(READ_SLICE)
    }
}

#[async_trait]
impl Transport for SerialTransport {
    async fn open(
        &self,
        target: &PortTarget,
        framing: &Framing,
    ) -> Result<Box<dyn TransportSession>, TransportError> {
        let builder = Self::builder(target, framing);
        let name = target.selector().to_string();

        let opened = tokio::task::spawn_blocking(move || builder.open())
            .await
            .map_err(|e| TransportError::OpenFailed(e.to_string()))?;

        let port = opened.map_err(|e| match e.kind() {
            serialport::ErrorKind::NoDevice => TransportError::PortNotFound(name.clone()),
            _ => TransportError::OpenFailed(format!("{name}: {e}")),
        })?;

        tracing::debug!(port = %name, framing = %framing, "serial session opened");

        Ok(Box::new(SerialSession {
            port: Arc::new(Mutex::new(Some(port))),
            pending: Arc::new(Mutex::new(Vec::with_capacity(256))),
        }))
    }
}

/// Open serial session; blocking reads and writes run on the blocking pool
struct SerialSession {
    port: Arc<Mutex<Option<Box<dyn SerialPort>>>>,
    pending: Arc<Mutex<Vec<u8>>>,
}

/// Split the first line (terminator included) off the buffer
fn take_line(buffer: &mut Vec<u8>) -> Option<Vec<u8>> {
    let end = buffer.iter().position(|&b| b == b'\n')?;
    let rest = buffer.split_off(end + 1);
    Some(std::mem::replace(buffer, rest))
}

#[async_trait]
impl TransportSession for SerialSession {
    async fn send(&mut self, data: &[u8]) -> Result<(), TransportError> {
        let port = Arc::clone(&self.port);
        let data = data.to_vec();

        tokio::task::spawn_blocking(move || -> Result<(), TransportError> {
            let mut guard = port.lock();
            let port = guard.as_mut().ok_or(TransportError::Disconnected)?;
            port.write_all(&data)?;
            port.flush()?;
            Ok(())
        })
        .await
        .map_err(|e| TransportError::SendError(e.to_string()))?
    }

    async fn receive_until(&mut self, timeout: Duration) -> Result<Bytes, TransportError> {
        let port = Arc::clone(&self.port);
        let pending = Arc::clone(&self.pending);

        tokio::task::spawn_blocking(move || -> Result<Bytes, TransportError> {
            let deadline = Instant::now() + timeout;
            let mut chunk = [0u8; 256];

            loop {
                if let Some(line) = take_line(&mut pending.lock()) {
                    return Ok(Bytes::from(line));
                }
                if Instant::now() >= deadline {
                    let mut buffered = pending.lock();
                    if buffered.is_empty() {
                        return Err(TransportError::Timeout(timeout));
                    }
                    return Ok(Bytes::from(std::mem::take(&mut *buffered)));
                }

                let mut guard = port.lock();
                let port = guard.as_mut().ok_or(TransportError::Disconnected)?;
                match port.read(&mut chunk) {
                    Ok(0) => return Err(TransportError::Disconnected),
                    Ok(n) => pending.lock().extend_from_slice(&chunk[..n]),
                    Err(ref e) if e.kind() == std::io::ErrorKind::TimedOut => {}
                    Err(e) => return Err(TransportError::ReceiveError(e.to_string())),
                }
            }
        })
        .await
        .map_err(|e| TransportError::ReceiveError(e.to_string()))?
    }

    async fn close(&mut self) -> Result<(), TransportError> {
        *self.port.lock() = None;
        self.pending.lock().clear();
        Ok(())
    }
}

/// Names of the serial ports currently present on the host
pub fn available_port_names() -> Vec<String> {
    match serialport::available_ports() {
        Ok(ports) => ports.into_iter().map(|p| p.port_name).collect(),
        Err(e) => {
            tracing::warn!("Serial port enumeration failed: {}", e);
            Vec::new()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_take_line_keeps_remainder() {
        let mut buffer = b"OK\r\nREADY".to_vec();
        assert_eq!(take_line(&mut buffer).as_deref(), Some(&b"OK\r\n"[..]));
        assert_eq!(buffer, b"READY");
        assert!(take_line(&mut buffer).is_none());
    }
}
