//! Scatter-read packet dispatcher.
//!
//! One [`ReadvDispatcher`] drives one raw descriptor: each iteration performs
//! a single `readv()` into the pool's segments, reassembles the bytes into a
//! [`Packet`], classifies the network protocol from the first octet and hands
//! the packet to the virtual stack.

use std::io::{self, IoSliceMut};
use std::os::fd::{AsRawFd, FromRawFd, OwnedFd, RawFd};
use std::sync::Arc;

use super::buffer::BufferPool;
use super::packet::Packet;
use crate::error::Result;
use crate::event::{Event, EventSink};
use crate::types::NetworkProtocol;

/// Ingestion entrypoint of the virtual network stack.
pub trait NetworkDispatcher: Send + Sync {
    /// Deliver one inbound packet. Ownership of the packet moves to the stack.
    fn deliver_network_packet(&self, protocol: NetworkProtocol, packet: Packet);
}

impl<F> NetworkDispatcher for F
where
    F: Fn(NetworkProtocol, Packet) + Send + Sync,
{
    fn deliver_network_packet(&self, protocol: NetworkProtocol, packet: Packet) {
        self(protocol, packet);
    }
}

/// Cooperative cancellation signal backed by a pipe.
///
/// Once stopped, the read end stays readable, so every later wait returns
/// immediately.
#[derive(Debug)]
pub struct StopFd {
    read: OwnedFd,
    write: OwnedFd,
}

impl StopFd {
    pub fn new() -> io::Result<Self> {
        let mut fds = [0 as RawFd; 2];
        let ret = unsafe { libc::pipe(fds.as_mut_ptr()) };
        if ret < 0 {
            return Err(io::Error::last_os_error());
        }

        // Take ownership first so both ends close on any error below.
        let (read, write) = unsafe { (OwnedFd::from_raw_fd(fds[0]), OwnedFd::from_raw_fd(fds[1])) };
        for fd in [&read, &write] {
            set_nonblocking(fd.as_raw_fd())?;
            set_cloexec(fd.as_raw_fd())?;
        }

        Ok(Self { read, write })
    }

    /// Signal cancellation.
    pub fn stop(&self) -> io::Result<()> {
        let byte = 1u8;
        let ret = unsafe {
            libc::write(
                self.write.as_raw_fd(),
                (&byte as *const u8).cast::<libc::c_void>(),
                1,
            )
        };
        if ret < 0 {
            let err = io::Error::last_os_error();
            // A full pipe is already signalled.
            if err.kind() != io::ErrorKind::WouldBlock {
                return Err(err);
            }
        }
        Ok(())
    }

    fn raw_fd(&self) -> RawFd {
        self.read.as_raw_fd()
    }
}

/// Cloneable handle used to cancel a dispatcher from another thread.
#[derive(Debug, Clone)]
pub struct StopHandle(Arc<StopFd>);

impl StopHandle {
    pub fn stop(&self) {
        if let Err(e) = self.0.stop() {
            tracing::warn!(error = %e, "Failed to signal dispatcher stop");
        }
    }
}

/// Uses the `readv()` system call to read inbound packets and dispatch them.
pub struct ReadvDispatcher {
    /// Descriptor packets are read from.
    fd: Arc<OwnedFd>,
    /// Cancellation signal.
    stop: Arc<StopFd>,
    /// Segment pool holding packet contents.
    buf: BufferPool,
    /// Stack ingestion entrypoint.
    dispatcher: Arc<dyn NetworkDispatcher>,
    events: EventSink,
}

impl ReadvDispatcher {
    /// Create a dispatcher for `fd`.
    ///
    /// The descriptor is switched to non-blocking mode so that a stop
    /// request can always interrupt the wait.
    pub fn new(
        fd: Arc<OwnedFd>,
        buffer_sizes: &[usize],
        dispatcher: Arc<dyn NetworkDispatcher>,
        events: EventSink,
    ) -> Result<Self> {
        set_nonblocking(fd.as_raw_fd())?;
        Ok(Self {
            fd,
            stop: Arc::new(StopFd::new()?),
            buf: BufferPool::new(buffer_sizes),
            dispatcher,
            events,
        })
    }

    /// Handle for cancelling this dispatcher.
    pub fn stop_handle(&self) -> StopHandle {
        StopHandle(Arc::clone(&self.stop))
    }

    /// Read one packet from the descriptor and dispatch it.
    ///
    /// Returns `Ok(true)` to continue, including when the packet was dropped
    /// as unparseable. Returns `Ok(false)` on cancellation or a zero-byte
    /// read, and an error when the descriptor fails.
    pub fn dispatch(&mut self) -> Result<bool> {
        let fd = self.fd.as_raw_fd();
        let stop = self.stop.raw_fd();

        let n = {
            let mut iovecs = self.buf.prepare_read();
            match blocking_readv_until_stopped(stop, fd, &mut iovecs)? {
                None | Some(0) => return Ok(false),
                Some(n) => n,
            }
        };

        let packet = self.buf.consume(n)?;

        // We don't get any indication of what the packet is, so guess from
        // the version nibble of the first octet.
        let Some(first_byte) = packet.first_byte() else {
            return Ok(true);
        };
        match NetworkProtocol::classify(first_byte) {
            Some(protocol) => self.dispatcher.deliver_network_packet(protocol, packet),
            None => self.events.emit(Event::PacketDropped {
                first_byte,
                len: packet.len(),
            }),
        }

        Ok(true)
    }

    /// Dispatch until cancelled or the descriptor fails, then release the pool.
    pub fn run(mut self) -> Result<()> {
        self.run_until_stopped()
    }

    fn run_until_stopped(&mut self) -> Result<()> {
        let result = loop {
            match self.dispatch() {
                Ok(true) => continue,
                Ok(false) => break Ok(()),
                Err(e) => break Err(e),
            }
        };

        self.buf.release();
        self.events.emit(Event::DispatcherStopped {
            error: result.as_ref().err().map(ToString::to_string),
        });
        result
    }
}

/// Read into `iovecs`, blocking until data arrives, `fd` fails or `stop`
/// becomes readable.
///
/// Returns `None` when stopped.
fn blocking_readv_until_stopped(
    stop: RawFd,
    fd: RawFd,
    iovecs: &mut [IoSliceMut<'_>],
) -> io::Result<Option<usize>> {
    loop {
        // IoSliceMut is ABI compatible with iovec on unix.
        let n = unsafe {
            libc::readv(
                fd,
                iovecs.as_ptr().cast::<libc::iovec>(),
                iovecs.len() as libc::c_int,
            )
        };
        if n >= 0 {
            return Ok(Some(n as usize));
        }

        let err = io::Error::last_os_error();
        match err.kind() {
            io::ErrorKind::WouldBlock => {}
            io::ErrorKind::Interrupted => continue,
            _ => return Err(err),
        }

        let mut fds = [
            libc::pollfd {
                fd,
                events: libc::POLLIN,
                revents: 0,
            },
            libc::pollfd {
                fd: stop,
                events: libc::POLLIN,
                revents: 0,
            },
        ];
        let ret = unsafe { libc::poll(fds.as_mut_ptr(), fds.len() as libc::nfds_t, -1) };
        if ret < 0 {
            let err = io::Error::last_os_error();
            if err.kind() == io::ErrorKind::Interrupted {
                continue;
            }
            return Err(err);
        }

        if fds[1].revents & libc::POLLIN != 0 {
            return Ok(None);
        }
    }
}

pub(crate) fn set_nonblocking(fd: RawFd) -> io::Result<()> {
    let flags = unsafe { libc::fcntl(fd, libc::F_GETFL) };
    if flags < 0 {
        return Err(io::Error::last_os_error());
    }
    if unsafe { libc::fcntl(fd, libc::F_SETFL, flags | libc::O_NONBLOCK) } < 0 {
        return Err(io::Error::last_os_error());
    }
    Ok(())
}

fn set_cloexec(fd: RawFd) -> io::Result<()> {
    if unsafe { libc::fcntl(fd, libc::F_SETFD, libc::FD_CLOEXEC) } < 0 {
        return Err(io::Error::last_os_error());
    }
    Ok(())
}
