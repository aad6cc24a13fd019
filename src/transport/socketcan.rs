//! Linux SocketCAN adapter.
//!
//! The socket is opened non-blocking. [`pending_messages`](CanTransport::pending_messages)
//! drains whatever the kernel has queued into a bounded local buffer so that
//! the count it reports can be read without blocking.
//!
//! Error frames are consumed here rather than routed: each one bumps the
//! error counter and a bus-off condition clears the health flag until the
//! next reset.
//!
//! A receive failure found while filling the buffer is held until the next
//! [`read`](CanTransport::read) returns it, and fails the bus check meanwhile.

use std::collections::VecDeque;
use std::io;
use std::os::unix::io::AsRawFd;
use std::time::Duration;

use ::socketcan::{
    CanError, CanFrame, CanSocket, EmbeddedFrame, ExtendedId, Frame, Socket, SocketOptions,
    StandardId,
};
use tracing::{debug, warn};

use crate::core::error::TransportError;
use crate::core::message::{CanMessage, MAX_STANDARD_ID};
use crate::core::traits::{CanTransport, Readiness};

/// Default receive buffer depth.
pub const DEFAULT_RX_BUFFER: usize = 1024;

/// SocketCAN-backed transport.
pub struct SocketCanTransport {
    interface: String,
    socket: Option<CanSocket>,
    rx_buffer: VecDeque<CanMessage>,
    rx_capacity: usize,
    error_count: u64,
    bus_ok: bool,
    fault: Option<TransportError>,
}

impl SocketCanTransport {
    /// Open `interface` (e.g. `can0`, `vcan0`).
    pub fn open(interface: &str) -> Result<Self, TransportError> {
        Self::with_capacity(interface, DEFAULT_RX_BUFFER)
    }

    /// Open `interface` with a custom receive buffer depth.
    pub fn with_capacity(interface: &str, rx_capacity: usize) -> Result<Self, TransportError> {
        let socket = CanSocket::open(interface).map_err(|e| {
            TransportError::Device(format!("Failed to open CAN interface {}: {}", interface, e))
        })?;
        socket.set_nonblocking(true)?;
        socket.set_error_filter_accept_all()?;

        debug!(interface = %interface, "CAN interface opened");

        Ok(Self {
            interface: interface.to_string(),
            socket: Some(socket),
            rx_buffer: VecDeque::with_capacity(rx_capacity),
            rx_capacity: rx_capacity.max(1),
            error_count: 0,
            bus_ok: true,
            fault: None,
        })
    }

    fn socket(&self) -> Result<&CanSocket, TransportError> {
        self.socket.as_ref().ok_or(TransportError::Closed)
    }

    /// Read one frame from the kernel.
    ///
    /// Returns `Ok(None)` when nothing is queued. Error frames are accounted
    /// and skipped.
    fn fetch(&mut self) -> Result<Option<CanMessage>, TransportError> {
        loop {
            let frame = match self.socket()?.read_frame() {
                Ok(frame) => frame,
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => return Ok(None),
                Err(e) => return Err(e.into()),
            };

            match frame {
                CanFrame::Data(data) => {
                    let msg = CanMessage::new(data.raw_id(), data.data())
                        .map_err(|e| TransportError::Device(e.to_string()))?;
                    return Ok(Some(msg));
                }
                CanFrame::Remote(remote) => {
                    debug!(can_id = remote.raw_id(), "Ignoring remote frame");
                }
                CanFrame::Error(err) => {
                    self.error_count += 1;
                    let error = CanError::from(err);
                    if matches!(error, CanError::BusOff) {
                        self.bus_ok = false;
                    }
                    warn!(interface = %self.interface, error = %error, "CAN error frame");
                }
            }
        }
    }

    fn fill_buffer(&mut self) -> Result<(), TransportError> {
        while self.rx_buffer.len() < self.rx_capacity {
            match self.fetch()? {
                Some(msg) => self.rx_buffer.push_back(msg),
                None => break,
            }
        }
        Ok(())
    }
}

impl CanTransport for SocketCanTransport {
    fn device(&self) -> &str {
        &self.interface
    }

    fn write(&mut self, msg: &CanMessage) -> Result<(), TransportError> {
        let frame = if msg.can_id <= MAX_STANDARD_ID {
            StandardId::new(msg.can_id as u16).and_then(|id| CanFrame::new(id, msg.payload()))
        } else {
            ExtendedId::new(msg.can_id).and_then(|id| CanFrame::new(id, msg.payload()))
        }
        .ok_or_else(|| TransportError::Device(format!("cannot encode frame {}", msg)))?;

        self.socket()?.write_frame(&frame)?;
        Ok(())
    }

    fn read(&mut self) -> Result<CanMessage, TransportError> {
        if let Some(msg) = self.rx_buffer.pop_front() {
            return Ok(msg);
        }
        if let Some(fault) = self.fault.take() {
            return Err(fault);
        }
        self.fetch()?
            .ok_or_else(|| TransportError::Timeout("no frame pending".into()))
    }

    fn pending_messages(&mut self) -> usize {
        if self.fault.is_none() {
            match self.fill_buffer() {
                Ok(()) => {}
                Err(e) if e.is_recoverable() => {
                    debug!(interface = %self.interface, error = %e, "CAN receive timed out");
                }
                Err(e) => {
                    warn!(interface = %self.interface, error = %e, "CAN receive failed");
                    self.bus_ok = false;
                    self.fault = Some(e);
                }
            }
        }
        // The held fault occupies one slot so the next read reports it
        self.rx_buffer.len() + usize::from(self.fault.is_some())
    }

    fn check_bus_ok(&mut self) -> bool {
        self.socket.is_some() && self.bus_ok && self.fault.is_none()
    }

    fn error_count(&mut self) -> u64 {
        self.error_count
    }

    fn set_read_timeout(&mut self, timeout: Duration) -> Result<(), TransportError> {
        let socket = self.socket()?;
        if timeout.is_zero() {
            socket.set_nonblocking(true)?;
        } else {
            socket.set_nonblocking(false)?;
            socket.set_read_timeout(timeout)?;
        }
        Ok(())
    }

    fn reset(&mut self) -> Result<(), TransportError> {
        // Controller restart is handled by the kernel (`restart-ms`); only
        // local state is cleared here.
        self.socket()?;
        self.bus_ok = true;
        self.fault = None;
        Ok(())
    }

    fn clear(&mut self) -> Result<(), TransportError> {
        self.rx_buffer.clear();
        while self.fetch()?.is_some() {}
        Ok(())
    }

    fn close(&mut self) -> Result<(), TransportError> {
        if self.socket.take().is_some() {
            debug!(interface = %self.interface, "CAN interface closed");
        }
        self.rx_buffer.clear();
        self.fault = None;
        Ok(())
    }

    fn readiness(&self) -> Option<Readiness> {
        self.socket.as_ref().map(|s| Readiness::Fd(s.as_raw_fd()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Transport whose socket is already gone, so every receive fails.
    fn detached(buffered: &[CanMessage]) -> SocketCanTransport {
        SocketCanTransport {
            interface: "can0".into(),
            socket: None,
            rx_buffer: buffered.iter().copied().collect(),
            rx_capacity: DEFAULT_RX_BUFFER,
            error_count: 0,
            bus_ok: true,
            fault: None,
        }
    }

    #[test]
    fn test_receive_failure_surfaces_on_read() {
        let mut transport = detached(&[]);

        assert_eq!(transport.pending_messages(), 1);
        assert!(!transport.check_bus_ok());
        let err = transport.read().unwrap_err();
        assert!(!err.is_recoverable());
    }

    #[test]
    fn test_buffered_frames_read_before_fault() {
        let frame = CanMessage::new(0x123, &[1, 2]).unwrap();
        let mut transport = detached(&[frame]);

        assert_eq!(transport.pending_messages(), 2);
        assert_eq!(transport.read().unwrap(), frame);
        assert!(matches!(transport.read(), Err(TransportError::Closed)));
    }
}
