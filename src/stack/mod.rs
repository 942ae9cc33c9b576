//! Boundary with the virtual network stack.
//!
//! The stack's protocol machinery is external. This module names the parts
//! of its API the engine consumes: new-flow requests for TCP and UDP, the
//! per-endpoint socket option interface, stack-wide transport defaults and
//! the stream adapter that turns an endpoint into a byte stream.

use std::time::Duration;

use tokio::io::{AsyncRead, AsyncWrite};

use crate::error::StackError;
use crate::types::{EndpointId, Network};

/// Result type for stack calls.
pub type StackResult<T> = std::result::Result<T, StackError>;

/// Minimum, default and maximum of a buffer size option.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BufferSizeRange {
    pub min: usize,
    pub default: usize,
    pub max: usize,
}

/// Stack-wide transport protocol defaults.
pub trait TransportOptions: Send + Sync {
    /// TCP send buffer size range.
    fn tcp_send_buffer_size_range(&self) -> StackResult<BufferSizeRange>;

    /// TCP receive buffer size range.
    fn tcp_receive_buffer_size_range(&self) -> StackResult<BufferSizeRange>;

    /// UDP send buffer size range.
    fn udp_send_buffer_size_range(&self) -> StackResult<BufferSizeRange>;

    /// UDP receive buffer size range.
    fn udp_receive_buffer_size_range(&self) -> StackResult<BufferSizeRange>;

    /// Send and receive buffer ranges of one transport.
    fn buffer_size_ranges(
        &self,
        network: Network,
    ) -> (StackResult<BufferSizeRange>, StackResult<BufferSizeRange>) {
        match network {
            Network::Tcp => (
                self.tcp_send_buffer_size_range(),
                self.tcp_receive_buffer_size_range(),
            ),
            Network::Udp => (
                self.udp_send_buffer_size_range(),
                self.udp_receive_buffer_size_range(),
            ),
        }
    }
}

/// Socket options of a stack endpoint.
pub trait SocketOptions {
    fn set_keepalive(&mut self, enabled: bool);

    /// Idle time before the first keepalive packet.
    fn set_keepalive_idle(&mut self, idle: Duration) -> StackResult<()>;

    /// Interval between keepalive packets.
    fn set_keepalive_interval(&mut self, interval: Duration) -> StackResult<()>;

    /// Unanswered keepalives before the connection is dropped.
    fn set_keepalive_count(&mut self, count: u32) -> StackResult<()>;

    fn set_send_buffer_size(&mut self, size: usize);

    fn set_receive_buffer_size(&mut self, size: usize);
}

/// A live endpoint materialized by the stack for an intercepted flow.
pub trait StackEndpoint: SocketOptions + Send + 'static {
    /// Byte stream adapter over the endpoint.
    type Conn: AsyncRead + AsyncWrite + Send + Unpin + 'static;

    /// Wrap the endpoint as a bidirectional byte stream.
    fn into_conn(self) -> Self::Conn;
}

/// A pending TCP connection attempt surfaced by the stack's forwarder.
pub trait TcpForwarderRequest: Send {
    type Endpoint: StackEndpoint;

    /// Identity of the flow.
    fn id(&self) -> EndpointId;

    /// Complete the three-way handshake and create the endpoint.
    fn create_endpoint(&mut self) -> StackResult<Self::Endpoint>;

    /// Release the stack-side request, with a reset if `send_reset`.
    fn complete(self, send_reset: bool);
}

/// A new UDP association surfaced by the stack's forwarder.
pub trait UdpForwarderRequest: Send {
    type Endpoint: StackEndpoint;

    /// Identity of the flow.
    fn id(&self) -> EndpointId;

    /// Create the endpoint for the association.
    fn create_endpoint(self) -> StackResult<Self::Endpoint>;
}
