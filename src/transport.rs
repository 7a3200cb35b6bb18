//! Byte transports the driver can talk over.

use crate::base::Result;
use std::io;

/// A bidirectional byte link to the lidar.
///
/// Reads never block for long: `read_available` returns what has arrived so far,
/// possibly nothing.
pub trait Transport: Send {
    fn open(&mut self) -> Result<()>;

    fn close(&mut self);

    fn is_open(&self) -> bool;

    /// Reads whatever is buffered, up to `buf.len()` bytes.
    fn read_available(&mut self, buf: &mut [u8]) -> io::Result<usize>;

    /// Writes some of `data`, returning how much was taken.
    fn write(&mut self, data: &[u8]) -> io::Result<usize>;

    /// Discards received bytes that were not read yet.
    fn flush_input(&mut self) -> io::Result<()>;
}

/// Adapts a [`Transport`] to `io::Write` so frames can be written with `write_all`.
pub struct TransportWriter<'a>(pub &'a mut dyn Transport);

impl io::Write for TransportWriter<'_> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        if !self.0.is_open() {
            return Err(io::Error::new(
                io::ErrorKind::NotConnected,
                "transport is closed",
            ));
        }
        self.0.write(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

/// A serial port candidate for a lidar.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PortInfo {
    pub port_name: String,
    pub description: String,
}

#[cfg(feature = "serial")]
pub use self::serial::{list_ports, SerialTransport};

#[cfg(feature = "serial")]
mod serial {
    use super::{PortInfo, Transport};
    use crate::base::{Error, Result};
    use crate::internals::NVILIDAR_PORT_READ_TIMEOUT;
    use log::{info, trace, warn};
    use serialport::{ClearBuffer, DataBits, FlowControl, Parity, SerialPort, SerialPortType, StopBits};
    use std::cmp::min;
    use std::io::{self, Read, Write};

    /// Serial port transport, 8N1 without flow control.
    pub struct SerialTransport {
        port_name: String,
        baud_rate: u32,
        port: Option<Box<dyn SerialPort>>,
    }

    impl SerialTransport {
        /// Creates a closed transport for `port_name`.
        pub fn new(port_name: &str, baud_rate: u32) -> SerialTransport {
            SerialTransport {
                port_name: port_name.to_owned(),
                baud_rate,
                port: None,
            }
        }

        pub fn port_name(&self) -> &str {
            &self.port_name
        }

        fn port(&mut self) -> io::Result<&mut Box<dyn SerialPort>> {
            self.port.as_mut().ok_or_else(|| {
                io::Error::new(io::ErrorKind::NotConnected, "serial port is closed")
            })
        }
    }

    impl Transport for SerialTransport {
        fn open(&mut self) -> Result<()> {
            if self.port_name.is_empty() || self.baud_rate == 0 {
                return Err(Error::OperationFail {
                    description: "serial port name and baud rate must be set".to_owned(),
                });
            }
            if self.port.is_some() {
                return Ok(());
            }

            let port = serialport::new(&self.port_name, self.baud_rate)
                .data_bits(DataBits::Eight)
                .parity(Parity::None)
                .stop_bits(StopBits::One)
                .flow_control(FlowControl::None)
                .timeout(NVILIDAR_PORT_READ_TIMEOUT)
                .open()?;
            info!("Opened serial port {} at {} baud", self.port_name, self.baud_rate);
            self.port = Some(port);
            Ok(())
        }

        fn close(&mut self) {
            if self.port.take().is_some() {
                info!("Closed serial port {}", self.port_name);
            }
        }

        fn is_open(&self) -> bool {
            self.port.is_some()
        }

        fn read_available(&mut self, buf: &mut [u8]) -> io::Result<usize> {
            let port = self.port()?;
            let available = port.bytes_to_read()? as usize;
            if available == 0 {
                return Ok(0);
            }
            let len = min(available, buf.len());
            match port.read(&mut buf[..len]) {
                Ok(n) => Ok(n),
                Err(e) if e.kind() == io::ErrorKind::TimedOut => Ok(0),
                Err(e) => Err(e),
            }
        }

        fn write(&mut self, data: &[u8]) -> io::Result<usize> {
            let port = self.port()?;
            let written = port.write(data)?;
            trace!("Serial write: {} of {} bytes", written, data.len());
            Ok(written)
        }

        fn flush_input(&mut self) -> io::Result<()> {
            let port = self.port()?;
            port.clear(ClearBuffer::Input)?;
            Ok(())
        }
    }

    /// Lists serial ports a lidar may be attached to.
    ///
    /// On Linux the lidar enumerates as a USB ACM device, so only `ttyACM*` ports
    /// are returned.
    pub fn list_ports() -> Result<Vec<PortInfo>> {
        let ports = serialport::available_ports()?;
        let candidates = ports
            .into_iter()
            .filter(|port| !cfg!(target_os = "linux") || port.port_name.contains("ttyACM"))
            .map(|port| {
                let description = match port.port_type {
                    SerialPortType::UsbPort(usb) => usb
                        .product
                        .unwrap_or_else(|| format!("USB {:04x}:{:04x}", usb.vid, usb.pid)),
                    SerialPortType::PciPort => "PCI".to_owned(),
                    SerialPortType::BluetoothPort => "Bluetooth".to_owned(),
                    SerialPortType::Unknown => String::new(),
                };
                PortInfo {
                    port_name: port.port_name,
                    description,
                }
            })
            .collect::<Vec<_>>();
        if candidates.is_empty() {
            warn!("No lidar serial port found");
        }
        Ok(candidates)
    }
}

#[cfg(test)]
pub(crate) mod mock {
    use super::Transport;
    use crate::base::Result;
    use std::collections::VecDeque;
    use std::io;
    use std::sync::{Arc, Mutex, MutexGuard};

    type Responder = Box<dyn FnMut(&[u8]) -> Vec<u8> + Send>;

    #[derive(Default)]
    struct MockState {
        open: bool,
        incoming: VecDeque<u8>,
        written: Vec<u8>,
        input_flushes: usize,
        fail_writes: bool,
        responder: Option<Responder>,
    }

    /// In-memory transport. Clones share the same state, so a test keeps one
    /// handle while the driver owns another.
    #[derive(Clone, Default)]
    pub struct MockTransport {
        state: Arc<Mutex<MockState>>,
    }

    impl MockTransport {
        pub fn new() -> MockTransport {
            MockTransport::default()
        }

        fn state(&self) -> MutexGuard<'_, MockState> {
            self.state.lock().unwrap()
        }

        /// Queues bytes as if the device had sent them.
        pub fn push_incoming(&self, data: &[u8]) {
            self.state().incoming.extend(data.iter().copied());
        }

        /// Everything written so far.
        pub fn written(&self) -> Vec<u8> {
            self.state().written.clone()
        }

        pub fn take_written(&self) -> Vec<u8> {
            std::mem::take(&mut self.state().written)
        }

        pub fn input_flushes(&self) -> usize {
            self.state().input_flushes
        }

        /// Makes every write fail with `BrokenPipe` while set.
        pub fn set_fail_writes(&self, fail: bool) {
            self.state().fail_writes = fail;
        }

        /// Answers every write with the bytes `responder` returns for it.
        pub fn set_responder(&self, responder: impl FnMut(&[u8]) -> Vec<u8> + Send + 'static) {
            self.state().responder = Some(Box::new(responder));
        }
    }

    impl Transport for MockTransport {
        fn open(&mut self) -> Result<()> {
            self.state().open = true;
            Ok(())
        }

        fn close(&mut self) {
            self.state().open = false;
        }

        fn is_open(&self) -> bool {
            self.state().open
        }

        fn read_available(&mut self, buf: &mut [u8]) -> io::Result<usize> {
            let mut state = self.state();
            if !state.open {
                return Err(io::Error::new(io::ErrorKind::NotConnected, "closed"));
            }
            let len = buf.len().min(state.incoming.len());
            for (dst, src) in buf.iter_mut().zip(state.incoming.drain(..len)) {
                *dst = src;
            }
            Ok(len)
        }

        fn write(&mut self, data: &[u8]) -> io::Result<usize> {
            let mut state = self.state();
            if state.fail_writes {
                return Err(io::Error::new(io::ErrorKind::BrokenPipe, "write refused"));
            }
            state.written.extend_from_slice(data);
            if let Some(mut responder) = state.responder.take() {
                let answer = responder(data);
                state.incoming.extend(answer);
                state.responder = Some(responder);
            }
            Ok(data.len())
        }

        fn flush_input(&mut self) -> io::Result<()> {
            let mut state = self.state();
            state.incoming.clear();
            state.input_flushes += 1;
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::mock::MockTransport;
    use super::*;
    use std::io::Write;

    #[test]
    fn writer_refuses_closed_transport() {
        let mut transport = MockTransport::new();
        let err = TransportWriter(&mut transport).write_all(&[0xA5, 0x60]).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::NotConnected);
        assert!(transport.written().is_empty());
    }

    #[test]
    fn mock_round_trip() {
        let mut transport = MockTransport::new();
        transport.open().unwrap();
        transport.set_responder(|frame| frame.iter().rev().copied().collect());
        TransportWriter(&mut transport).write_all(&[1, 2, 3]).unwrap();

        let mut buf = [0u8; 2];
        assert_eq!(transport.read_available(&mut buf).unwrap(), 2);
        assert_eq!(buf, [3, 2]);
        transport.flush_input().unwrap();
        assert_eq!(transport.read_available(&mut buf).unwrap(), 0);
        assert_eq!(transport.written(), vec![1, 2, 3]);
    }
}
