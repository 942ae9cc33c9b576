//! Descriptor-backed link endpoint.
//!
//! Owns the raw descriptors of a tun-like device, runs one dispatcher thread
//! per descriptor and writes outbound packets back with `writev()`.

use std::io;
use std::os::fd::{AsRawFd, OwnedFd};
use std::sync::Arc;
use std::thread::JoinHandle;

use parking_lot::Mutex;

use super::buffer::DEFAULT_BUFFER_SIZES;
use super::dispatcher::{NetworkDispatcher, ReadvDispatcher, StopHandle};
use super::packet::Packet;
use crate::error::{Error, Result};
use crate::event::EventSink;

/// Default link MTU.
pub const DEFAULT_MTU: u32 = 1500;

/// Link endpoint options.
#[derive(Debug, Clone)]
pub struct EndpointOptions {
    pub mtu: u32,
    /// Segment size table for each dispatcher's pool.
    pub buffer_sizes: Vec<usize>,
}

impl Default for EndpointOptions {
    fn default() -> Self {
        Self {
            mtu: DEFAULT_MTU,
            buffer_sizes: DEFAULT_BUFFER_SIZES.to_vec(),
        }
    }
}

struct Worker {
    stop: StopHandle,
    thread: JoinHandle<Result<()>>,
}

/// Link endpoint backed by one or more raw descriptors.
pub struct FdEndpoint {
    fds: Vec<Arc<OwnedFd>>,
    options: EndpointOptions,
    events: EventSink,
    workers: Mutex<Vec<Worker>>,
    attached: Mutex<bool>,
}

impl FdEndpoint {
    /// Create an endpoint over `fds`. Packets are written to the first one.
    pub fn new(fds: Vec<OwnedFd>, options: EndpointOptions, events: EventSink) -> Result<Self> {
        if fds.is_empty() {
            return Err(Error::InvalidConfig("endpoint needs at least one descriptor".into()));
        }
        if options.buffer_sizes.is_empty() {
            return Err(Error::InvalidConfig("empty buffer size table".into()));
        }

        Ok(Self {
            fds: fds.into_iter().map(Arc::new).collect(),
            options,
            events,
            workers: Mutex::new(Vec::new()),
            attached: Mutex::new(false),
        })
    }

    pub fn mtu(&self) -> u32 {
        self.options.mtu
    }

    /// Check if dispatchers are attached.
    pub fn is_attached(&self) -> bool {
        *self.attached.lock()
    }

    /// Start one dispatcher thread per descriptor, delivering into `dispatcher`.
    pub fn attach(&self, dispatcher: Arc<dyn NetworkDispatcher>) -> Result<()> {
        let mut attached = self.attached.lock();
        if *attached {
            return Err(Error::AlreadyAttached);
        }

        let mut started = Vec::with_capacity(self.fds.len());
        for (i, fd) in self.fds.iter().enumerate() {
            match self.start_worker(i, fd, &dispatcher) {
                Ok(worker) => started.push(worker),
                Err(e) => {
                    // Stop the dispatchers started so far.
                    stop_workers(started);
                    return Err(e);
                }
            }
        }
        self.workers.lock().extend(started);

        *attached = true;
        tracing::debug!(descriptors = self.fds.len(), mtu = self.options.mtu, "Link endpoint attached");
        Ok(())
    }

    /// Write one packet to the first descriptor with a single vectored write.
    pub fn write_packet(&self, packet: &Packet) -> Result<usize> {
        let fd = self.fds[0].as_raw_fd();
        let iovecs = packet.io_slices();

        loop {
            // IoSlice is ABI compatible with iovec on unix.
            let n = unsafe {
                libc::writev(
                    fd,
                    iovecs.as_ptr().cast::<libc::iovec>(),
                    iovecs.len() as libc::c_int,
                )
            };
            if n >= 0 {
                return Ok(n as usize);
            }

            let err = io::Error::last_os_error();
            match err.kind() {
                io::ErrorKind::Interrupted => continue,
                io::ErrorKind::WouldBlock => wait_writable(fd)?,
                _ => return Err(Error::Io(err)),
            }
        }
    }

    /// Stop every dispatcher and wait for its thread to exit.
    pub fn close(&self) {
        let workers: Vec<Worker> = std::mem::take(&mut *self.workers.lock());
        stop_workers(workers);
        *self.attached.lock() = false;
    }

    fn start_worker(
        &self,
        index: usize,
        fd: &Arc<OwnedFd>,
        dispatcher: &Arc<dyn NetworkDispatcher>,
    ) -> Result<Worker> {
        let d = ReadvDispatcher::new(
            Arc::clone(fd),
            &self.options.buffer_sizes,
            Arc::clone(dispatcher),
            self.events.clone(),
        )?;
        let stop = d.stop_handle();
        let thread = std::thread::Builder::new()
            .name(format!("readv-dispatch-{index}"))
            .spawn(move || d.run())?;
        Ok(Worker { stop, thread })
    }
}

fn stop_workers(workers: Vec<Worker>) {
    for worker in &workers {
        worker.stop.stop();
    }
    for worker in workers {
        match worker.thread.join() {
            Ok(Ok(())) => {}
            Ok(Err(e)) => tracing::debug!(error = %e, "Dispatcher exited with error"),
            Err(_) => tracing::warn!("Dispatcher thread panicked"),
        }
    }
}

impl Drop for FdEndpoint {
    fn drop(&mut self) {
        self.close();
    }
}

fn wait_writable(fd: std::os::fd::RawFd) -> io::Result<()> {
    // Descriptors are non-blocking once a dispatcher is attached.
    let mut pfd = libc::pollfd {
        fd,
        events: libc::POLLOUT,
        revents: 0,
    };
    let ret = unsafe { libc::poll(&mut pfd, 1, -1) };
    if ret < 0 {
        let err = io::Error::last_os_error();
        if err.kind() != io::ErrorKind::Interrupted {
            return Err(err);
        }
    }
    Ok(())
}
