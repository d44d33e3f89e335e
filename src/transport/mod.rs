// src/transport/mod.rs
//
// Serial transport for the MSR206 protocol engine.
// Owns the open port handle; exposes a blocking write and a non-blocking
// poll primitive the frame reader loops over. No retry policy lives here.

use std::io::{Read, Write};
use std::time::Duration;

use serde::Serialize;
use serialport::{DataBits, Parity, SerialPort, StopBits};

use crate::error::Error;

/// Canonical MSR206 link settings: 8N1 @ 9600 baud.
pub const BAUD_RATE: u32 = 9600;

/// Port read timeout. Kept minimal so `poll_available` returns promptly
/// and the frame reader controls its own cadence.
const POLL_TIMEOUT: Duration = Duration::from_millis(1);

/// Byte-level transport under the protocol engine.
/// Implemented by the real serial port and by the scripted mock in tests.
pub trait Transport: Send {
    /// Write the full byte sequence, flushing before returning.
    fn write(&mut self, bytes: &[u8]) -> Result<(), Error>;

    /// Return zero or more newly arrived bytes without blocking beyond the
    /// port's minimal read timeout.
    fn poll_available(&mut self) -> Result<Vec<u8>, Error>;
}

/// Connection lifecycle state, owned by the transport that created it.
#[derive(Clone, Debug, Serialize)]
pub struct ConnectionState {
    pub open: bool,
    pub port: String,
}

/// Transport over a physical serial port via the `serialport` crate.
pub struct SerialTransport {
    port: Box<dyn SerialPort>,
    state: ConnectionState,
}

impl SerialTransport {
    /// Open `port_name` with the canonical 8N1 @ 9600 configuration.
    /// The underlying driver error string is surfaced unchanged on failure.
    pub fn open(port_name: &str) -> Result<Self, Error> {
        let port = serialport::new(port_name, BAUD_RATE)
            .data_bits(DataBits::Eight)
            .stop_bits(StopBits::One)
            .parity(Parity::None)
            .timeout(POLL_TIMEOUT)
            .open()
            .map_err(|e| Error::ConnectionFailed {
                port: port_name.to_string(),
                message: e.to_string(),
            })?;

        Ok(SerialTransport {
            port,
            state: ConnectionState {
                open: true,
                port: port_name.to_string(),
            },
        })
    }

    pub fn state(&self) -> &ConnectionState {
        &self.state
    }
}

impl Transport for SerialTransport {
    fn write(&mut self, bytes: &[u8]) -> Result<(), Error> {
        self.port
            .write_all(bytes)
            .and_then(|_| self.port.flush())
            .map_err(|e| Error::Io(format!("write error: {}", e)))
    }

    fn poll_available(&mut self) -> Result<Vec<u8>, Error> {
        let mut buf = [0u8; 256];
        match self.port.read(&mut buf) {
            Ok(n) => Ok(buf[..n].to_vec()),
            Err(ref e) if e.kind() == std::io::ErrorKind::TimedOut => Ok(Vec::new()),
            Err(e) => Err(Error::Io(format!("read error: {}", e))),
        }
    }
}

/// Information about an available serial port.
#[derive(Clone, Debug, Serialize)]
pub struct SerialPortInfo {
    pub port_name: String,
    pub port_type: String,
    pub manufacturer: Option<String>,
    pub product: Option<String>,
    pub serial_number: Option<String>,
    pub vid: Option<u16>,
    pub pid: Option<u16>,
}

/// List available serial ports.
///
/// On macOS, filters out /dev/tty.* devices and only shows /dev/cu.* devices.
/// The cu (calling unit) devices are non-blocking and preferred for outgoing
/// connections; the tty devices block on open waiting for carrier detect.
pub fn list_ports() -> Result<Vec<SerialPortInfo>, Error> {
    let ports = serialport::available_ports()
        .map_err(|e| Error::Io(format!("Failed to enumerate ports: {}", e)))?;

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
            let (port_type, manufacturer, product, serial_number, vid, pid) = match p.port_type {
                serialport::SerialPortType::UsbPort(info) => (
                    "USB".to_string(),
                    info.manufacturer,
                    info.product,
                    info.serial_number,
                    Some(info.vid),
                    Some(info.pid),
                ),
                serialport::SerialPortType::BluetoothPort => {
                    ("Bluetooth".to_string(), None, None, None, None, None)
                }
                serialport::SerialPortType::PciPort => {
                    ("PCI".to_string(), None, None, None, None, None)
                }
                serialport::SerialPortType::Unknown => {
                    ("Unknown".to_string(), None, None, None, None, None)
                }
            };
            SerialPortInfo {
                port_name: p.port_name,
                port_type,
                manufacturer,
                product,
                serial_number,
                vid,
                pid,
            }
        })
        .collect())
}

// ============================================================================
// Test Support
// ============================================================================

/// Scripted transport for tests: records writes, replays queued read chunks.
/// The write log is shared so tests can inspect it after the transport has
/// moved into a session worker.
#[cfg(test)]
pub(crate) struct MockTransport {
    written: std::sync::Arc<std::sync::Mutex<Vec<u8>>>,
    replies: std::collections::VecDeque<Vec<u8>>,
}

#[cfg(test)]
impl MockTransport {
    pub fn with_replies(chunks: Vec<Vec<u8>>) -> Self {
        MockTransport {
            written: std::sync::Arc::new(std::sync::Mutex::new(Vec::new())),
            replies: chunks.into(),
        }
    }

    pub fn written_handle(&self) -> std::sync::Arc<std::sync::Mutex<Vec<u8>>> {
        self.written.clone()
    }
}

#[cfg(test)]
impl Transport for MockTransport {
    fn write(&mut self, bytes: &[u8]) -> Result<(), Error> {
        if let Ok(mut written) = self.written.lock() {
            written.extend_from_slice(bytes);
        }
        Ok(())
    }

    fn poll_available(&mut self) -> Result<Vec<u8>, Error> {
        Ok(self.replies.pop_front().unwrap_or_default())
    }
}
