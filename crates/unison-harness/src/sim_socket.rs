//! In-memory socket pair.
//!
//! [`SimSocket`] is the server's end and implements `Read + Write` with the
//! same non-blocking semantics as a TCP stream: reads and writes return
//! `WouldBlock` instead of waiting. [`SimPeer`] is the device's end, used by
//! tests to send proposals, inspect what the server delivered, and inject
//! hang-ups, resets and back-pressure.

use std::{
    cell::RefCell,
    collections::VecDeque,
    io::{self, ErrorKind, Read, Write},
    rc::Rc,
};

#[derive(Debug, Default)]
struct Pipe {
    /// Bytes the device sent, not yet read by the server
    to_server: VecDeque<u8>,
    /// Bytes the server delivered, in order
    to_device: Vec<u8>,
    /// Most recent delivery, kept across `take_received`
    last_delivered: Option<u8>,
    /// Device hung up
    peer_closed: bool,
    /// Server dropped its end
    server_closed: bool,
    /// Device's receive buffer is full
    write_blocked: bool,
    /// Error every subsequent I/O call fails with
    fault: Option<ErrorKind>,
}

/// Create a connected socket pair.
pub fn pair() -> (SimSocket, SimPeer) {
    let pipe = Rc::new(RefCell::new(Pipe::default()));
    (SimSocket { pipe: Rc::clone(&pipe) }, SimPeer { pipe })
}

/// Server end of a simulated connection.
#[derive(Debug)]
pub struct SimSocket {
    pipe: Rc<RefCell<Pipe>>,
}

impl Read for SimSocket {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let mut pipe = self.pipe.borrow_mut();
        if let Some(kind) = pipe.fault {
            return Err(kind.into());
        }
        if buf.is_empty() {
            return Ok(0);
        }

        let mut n = 0;
        while n < buf.len() {
            match pipe.to_server.pop_front() {
                Some(byte) => {
                    buf[n] = byte;
                    n += 1;
                },
                None => break,
            }
        }

        match n {
            0 if pipe.peer_closed => Ok(0),
            0 => Err(ErrorKind::WouldBlock.into()),
            n => Ok(n),
        }
    }
}

impl Write for SimSocket {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let mut pipe = self.pipe.borrow_mut();
        if let Some(kind) = pipe.fault {
            return Err(kind.into());
        }
        if pipe.peer_closed {
            return Err(ErrorKind::BrokenPipe.into());
        }
        if pipe.write_blocked {
            return Err(ErrorKind::WouldBlock.into());
        }

        pipe.to_device.extend_from_slice(buf);
        if let Some(&last) = buf.last() {
            pipe.last_delivered = Some(last);
        }
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl Drop for SimSocket {
    fn drop(&mut self) {
        self.pipe.borrow_mut().server_closed = true;
    }
}

/// Device end of a simulated connection.
#[derive(Debug, Clone)]
pub struct SimPeer {
    pipe: Rc<RefCell<Pipe>>,
}

impl SimPeer {
    /// Send a color proposal.
    pub fn send(&self, byte: u8) {
        self.pipe.borrow_mut().to_server.push_back(byte);
    }

    /// Everything the server has delivered so far.
    pub fn received(&self) -> Vec<u8> {
        self.pipe.borrow().to_device.clone()
    }

    /// Most recently delivered byte, including any already taken.
    pub fn last_received(&self) -> Option<u8> {
        self.pipe.borrow().last_delivered
    }

    /// Take and clear the delivered bytes. [`SimPeer::last_received`] is
    /// unaffected.
    pub fn take_received(&self) -> Vec<u8> {
        std::mem::take(&mut self.pipe.borrow_mut().to_device)
    }

    /// Hang up cleanly (server sees end-of-stream).
    pub fn close(&self) {
        self.pipe.borrow_mut().peer_closed = true;
    }

    /// Fail every subsequent server I/O with `kind`.
    pub fn fail_with(&self, kind: ErrorKind) {
        self.pipe.borrow_mut().fault = Some(kind);
    }

    /// Abort the connection (server sees `ConnectionReset`).
    pub fn reset(&self) {
        self.fail_with(ErrorKind::ConnectionReset);
    }

    /// Stop or resume accepting bytes from the server.
    pub fn block_writes(&self, blocked: bool) {
        self.pipe.borrow_mut().write_blocked = blocked;
    }

    /// Server dropped its end.
    pub fn is_closed_by_server(&self) -> bool {
        self.pipe.borrow().server_closed
    }

    /// Server would see read readiness.
    pub fn server_readable(&self) -> bool {
        let pipe = self.pipe.borrow();
        !pipe.to_server.is_empty() || pipe.peer_closed
    }

    /// Server would see write readiness.
    pub fn server_writable(&self) -> bool {
        let pipe = self.pipe.borrow();
        !pipe.write_blocked || pipe.peer_closed
    }

    /// Server would see an error or hang-up condition.
    pub fn server_failed(&self) -> bool {
        let pipe = self.pipe.borrow();
        pipe.fault.is_some() || pipe.peer_closed
    }
}
