//! Bidirectional forwarding between an intercepted flow and its destination.

use std::io;

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tracing::debug;

use super::{Dial, EstablishHandler};
use crate::error::{is_connection_closed, Error, Result};
use crate::event::{Event, EventSink};
use crate::types::Network;

/// Default size of each direction's copy buffer.
pub const DEFAULT_COPY_BUFFER_SIZE: usize = 64 * 1024;

/// Byte counts of a finished session.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SessionStats {
    /// Bytes copied from the intercepted flow to the destination.
    pub sent: u64,
    /// Bytes copied from the destination back to the intercepted flow.
    pub received: u64,
}

/// One forwarding session: an accepted flow, the resolved destination and
/// the pre-redirection destination reported to the establish handler.
#[derive(Debug)]
pub struct ForwardingSession<L> {
    network: Network,
    local: L,
    destination: String,
    original: String,
    copy_buffer_size: usize,
}

impl<L> ForwardingSession<L>
where
    L: AsyncRead + AsyncWrite + Send + Unpin,
{
    pub fn new(network: Network, local: L, destination: String, original: String) -> Self {
        Self {
            network,
            local,
            destination,
            original,
            copy_buffer_size: DEFAULT_COPY_BUFFER_SIZE,
        }
    }

    pub fn with_copy_buffer_size(mut self, size: usize) -> Self {
        self.copy_buffer_size = size.max(1);
        self
    }

    pub fn destination(&self) -> &str {
        &self.destination
    }

    /// Dial the destination and bridge until either side ends.
    ///
    /// On dial failure the local connection is closed and
    /// [`Error::DialFailed`] returned. Otherwise both connections are
    /// released when the first direction terminates.
    pub async fn run(
        self,
        dialer: &dyn Dial,
        establish: Option<&dyn EstablishHandler>,
        events: &EventSink,
    ) -> Result<SessionStats> {
        let Self {
            network,
            mut local,
            destination,
            original,
            copy_buffer_size,
        } = self;

        let outbound = match dialer.dial(network, &destination).await {
            Ok(outbound) => outbound,
            Err(e) => {
                events.emit(Event::DialFailed {
                    network,
                    destination: destination.clone(),
                    error: e.to_string(),
                });
                let _ = local.shutdown().await;
                return Err(Error::DialFailed {
                    network,
                    addr: destination,
                    reason: e.to_string(),
                });
            }
        };

        if let Some(handler) = establish {
            handler.handle(outbound.local_addr, &original);
        }
        events.emit(Event::SessionEstablished {
            network,
            local_addr: outbound.local_addr,
            destination: destination.clone(),
            original,
        });

        let (stats, result) = bridge(local, outbound.stream, copy_buffer_size).await;

        let error = match &result {
            Err(e) if !is_connection_closed(e) => Some(e.to_string()),
            _ => None,
        };
        events.emit(Event::SessionClosed {
            network,
            destination,
            sent: stats.sent,
            received: stats.received,
            error: error.clone(),
        });

        match result {
            Err(e) if error.is_some() => Err(Error::Io(e)),
            _ => Ok(stats),
        }
    }
}

/// Copy in both directions until the first one ends, then shut down and
/// drop both connections.
async fn bridge<A, B>(a: A, b: B, buf_size: usize) -> (SessionStats, io::Result<()>)
where
    A: AsyncRead + AsyncWrite + Unpin,
    B: AsyncRead + AsyncWrite + Unpin,
{
    let (mut a_read, mut a_write) = tokio::io::split(a);
    let (mut b_read, mut b_write) = tokio::io::split(b);
    let mut stats = SessionStats::default();

    let result = tokio::select! {
        r = pipe(&mut a_read, &mut b_write, buf_size, &mut stats.sent) => {
            debug!(sent = stats.sent, "Local side finished");
            r
        }
        r = pipe(&mut b_read, &mut a_write, buf_size, &mut stats.received) => {
            debug!(received = stats.received, "Remote side finished");
            r
        }
    };

    let _ = b_write.shutdown().await;
    let _ = a_write.shutdown().await;

    (stats, result)
}

async fn pipe<R, W>(reader: &mut R, writer: &mut W, buf_size: usize, copied: &mut u64) -> io::Result<()>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let mut buf = vec![0u8; buf_size];
    loop {
        let n = reader.read(&mut buf).await?;
        if n == 0 {
            return Ok(());
        }
        writer.write_all(&buf[..n]).await?;
        writer.flush().await?;
        *copied += n as u64;
    }
}
