//! Link protocol plumbing shared by the gateway and reflector.
//!
//! Each remote destination kind (YSF server, FCS room, IMRS mesh) has its
//! own module implementing [`DgidNetwork`]: a uniform open/link/write/read/
//! clock/unlink/close surface over a non-blocking UDP socket and a couple of
//! poll timers. All methods are synchronous with respect to the loop; the
//! socket is only ever touched with `try_send_to` / `try_recv_from`.

use std::cell::RefCell;
use std::collections::VecDeque;
use std::io;
use std::net::{SocketAddr, ToSocketAddrs};
use std::rc::Rc;

use tokio::net::UdpSocket;
use tracing::trace;

use crate::error::{Error, Result};
use crate::frame::Frame;

pub mod fcs;
pub mod imrs;
pub mod ysf;

/// The state of one link to a remote server.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkStatus {
    /// The socket is not open (construction failed or `close()` was called).
    NotOpen,
    /// Open but idle.
    NotLinked,
    /// Polls are being sent, no reply seen yet.
    Linking,
    /// The remote server answered a poll.
    Linked,
}

/// Uniform operations over one DG-ID destination.
///
/// The IMRS implementation serves several DG-IDs from one socket, which is
/// why `write`/`read`/`desc` carry the DG-ID; the single-destination kinds
/// ignore it.
pub trait DgidNetwork {
    /// Transition from `NotOpen` to `NotLinked`. Fails when the remote
    /// address never resolved.
    fn open(&mut self) -> Result<()>;

    /// Begin polling the remote server.
    fn link(&mut self);

    /// Send the unlink/close packet and stop polling.
    fn unlink(&mut self);

    /// Forward a frame to the remote server. A no-op unless linked.
    fn write(&mut self, dgid: u8, frame: &Frame);

    /// Drain one received frame, if any.
    fn read(&mut self, dgid: u8) -> Option<Frame>;

    /// Advance timers and poll the socket. `ms` is the loop tick delta.
    fn clock(&mut self, ms: u64);

    /// Close the socket.
    fn close(&mut self);

    /// Current link state.
    fn status(&self) -> LinkStatus;

    /// Human-readable destination description for log lines.
    fn desc(&self, dgid: u8) -> String;
}

/// Shared handle to a network serving several switch slots.
///
/// The IMRS root is owned once and referenced from every IMRS slot; the
/// gateway's browse link is owned by the application and referenced from
/// the switch. Cloning the handle clones the `Rc`.
pub struct SharedNetwork<T: DgidNetwork>(Rc<RefCell<T>>);

impl<T: DgidNetwork> SharedNetwork<T> {
    pub fn new(inner: T) -> Self {
        Self(Rc::new(RefCell::new(inner)))
    }

    /// Borrow the underlying network.
    pub fn borrow(&self) -> std::cell::Ref<'_, T> {
        self.0.borrow()
    }

    /// Borrow the underlying network mutably.
    pub fn borrow_mut(&self) -> std::cell::RefMut<'_, T> {
        self.0.borrow_mut()
    }
}

impl<T: DgidNetwork> Clone for SharedNetwork<T> {
    fn clone(&self) -> Self {
        Self(Rc::clone(&self.0))
    }
}

impl<T: DgidNetwork> DgidNetwork for SharedNetwork<T> {
    fn open(&mut self) -> Result<()> {
        self.0.borrow_mut().open()
    }

    fn link(&mut self) {
        self.0.borrow_mut().link();
    }

    fn unlink(&mut self) {
        self.0.borrow_mut().unlink();
    }

    fn write(&mut self, dgid: u8, frame: &Frame) {
        self.0.borrow_mut().write(dgid, frame);
    }

    fn read(&mut self, dgid: u8) -> Option<Frame> {
        self.0.borrow_mut().read(dgid)
    }

    fn clock(&mut self, ms: u64) {
        self.0.borrow_mut().clock(ms);
    }

    fn close(&mut self) {
        self.0.borrow_mut().close();
    }

    fn status(&self) -> LinkStatus {
        self.0.borrow().status()
    }

    fn desc(&self, dgid: u8) -> String {
        self.0.borrow().desc(dgid)
    }
}

/// Bounded FIFO of received frames. Overflow drops the offending frame.
pub struct FrameQueue {
    frames: VecDeque<Frame>,
    capacity: usize,
}

impl FrameQueue {
    /// Sized for roughly ten seconds of voice.
    pub const DEFAULT_CAPACITY: usize = 1000;

    pub fn new(capacity: usize) -> Self {
        Self {
            frames: VecDeque::new(),
            capacity,
        }
    }

    /// Append a frame. Returns false (dropping the frame) when full.
    pub fn push(&mut self, frame: Frame) -> bool {
        if self.frames.len() >= self.capacity {
            trace!("frame queue full, dropping frame");
            return false;
        }
        self.frames.push_back(frame);
        true
    }

    pub fn pop(&mut self) -> Option<Frame> {
        self.frames.pop_front()
    }

    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }

    pub fn len(&self) -> usize {
        self.frames.len()
    }
}

impl Default for FrameQueue {
    fn default() -> Self {
        Self::new(Self::DEFAULT_CAPACITY)
    }
}

/// Resolve a host and port to a socket address.
///
/// Resolution succeeds iff at least one address comes back; the first one
/// wins. Failures surface as [`Error::Resolve`] so callers can disable the
/// affected destination and carry on.
pub fn lookup(host: &str, port: u16) -> Result<SocketAddr> {
    (host, port)
        .to_socket_addrs()
        .ok()
        .and_then(|mut addrs| addrs.next())
        .ok_or_else(|| Error::resolve(format!("{host}:{port}")))
}

/// Whether two datagram sources are the same endpoint.
pub fn same_host(a: SocketAddr, b: SocketAddr) -> bool {
    a == b
}

/// Non-blocking receive. `None` when nothing is pending.
pub(crate) fn try_recv(socket: &UdpSocket, buf: &mut [u8]) -> Option<(usize, SocketAddr)> {
    match socket.try_recv_from(buf) {
        Ok(v) => Some(v),
        Err(e) if e.kind() == io::ErrorKind::WouldBlock => None,
        Err(e) => {
            trace!("socket read failed: {e}");
            None
        }
    }
}

/// Non-blocking send. Drops the datagram on transient failure.
pub(crate) fn try_send(socket: &UdpSocket, data: &[u8], addr: SocketAddr) {
    match socket.try_send_to(data, addr) {
        Ok(_) => {}
        Err(e) if e.kind() == io::ErrorKind::WouldBlock => {
            trace!("socket busy, dropping {} bytes to {addr}", data.len());
        }
        Err(e) => {
            trace!("socket write to {addr} failed: {e}");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_frame_queue_bounds() {
        let mut queue = FrameQueue::new(2);
        assert!(queue.push(Frame::new()));
        assert!(queue.push(Frame::new()));
        assert!(!queue.push(Frame::new()));
        assert_eq!(queue.len(), 2);

        assert!(queue.pop().is_some());
        assert!(queue.push(Frame::new()));
    }

    #[test]
    fn test_lookup_literal() {
        let addr = lookup("127.0.0.1", 42000).unwrap();
        assert_eq!(addr.port(), 42000);
        assert!(addr.is_ipv4());
    }

    #[test]
    fn test_lookup_failure() {
        let err = lookup("no-such-host.invalid", 1).unwrap_err();
        assert!(err.to_string().contains("no-such-host.invalid"));
    }
}
