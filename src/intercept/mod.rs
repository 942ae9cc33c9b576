//! Interception of new flows surfaced by the virtual stack.
//!
//! The stack calls a [`TcpInterceptor`] or [`UdpInterceptor`] once per new
//! flow. The interceptor materializes the endpoint, tunes it, resolves the
//! destination through the redirection policy and hands the flow to a
//! [`ForwardingSession`](crate::forward::ForwardingSession) running on the
//! async runtime. The callback itself never blocks on network I/O.

mod tcp;
mod tuning;
mod udp;

pub use tcp::TcpInterceptor;
pub use tuning::{
    SocketTuner, TuningConfig, DEFAULT_KEEPALIVE_COUNT, DEFAULT_KEEPALIVE_IDLE,
    DEFAULT_KEEPALIVE_INTERVAL,
};
pub use udp::UdpInterceptor;

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::runtime::Handle;
use tracing::debug;

use crate::config::Config;
use crate::error::{Error, Result, StackError};
use crate::event::EventSink;
use crate::forward::{
    Dial, Dialer, DialerConfig, EstablishHandler, ForwardingSession, Redirector,
    DEFAULT_COPY_BUFFER_SIZE,
};
use crate::stack::{BufferSizeRange, StackResult, TransportOptions};
use crate::types::{EndpointId, Network};

/// Flow admission parameters handed to the stack's forwarders, plus the
/// per-session copy buffer size.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ForwarderConfig {
    /// TCP receive window advertised for pending connections (0 = stack default).
    #[serde(default)]
    pub receive_window: u32,

    /// Maximum TCP connection attempts in flight.
    #[serde(default = "default_max_in_flight")]
    pub max_in_flight: usize,

    /// Size of each direction's copy buffer.
    #[serde(default = "default_copy_buffer_size")]
    pub copy_buffer_size: usize,
}

fn default_max_in_flight() -> usize {
    2048
}
fn default_copy_buffer_size() -> usize {
    DEFAULT_COPY_BUFFER_SIZE
}

impl Default for ForwarderConfig {
    fn default() -> Self {
        Self {
            receive_window: 0,
            max_in_flight: default_max_in_flight(),
            copy_buffer_size: default_copy_buffer_size(),
        }
    }
}

/// Resolve where a flow should be forwarded.
///
/// The redirector is consulted first; no redirector, a `None` answer or an
/// empty string all fall back to the original destination.
pub fn resolve_destination(redirector: Option<&dyn Redirector>, id: &EndpointId) -> String {
    redirector
        .and_then(|r| r.redirect(id.remote_addr, id.remote_port, id.local_addr, id.local_port))
        .filter(|addr| !addr.is_empty())
        .unwrap_or_else(|| id.address_id())
}

/// Transport options of a stack that reports no defaults.
struct NoTransportOptions;

impl TransportOptions for NoTransportOptions {
    fn tcp_send_buffer_size_range(&self) -> StackResult<BufferSizeRange> {
        Err(StackError::NotSupported("tcp send buffer size"))
    }

    fn tcp_receive_buffer_size_range(&self) -> StackResult<BufferSizeRange> {
        Err(StackError::NotSupported("tcp receive buffer size"))
    }

    fn udp_send_buffer_size_range(&self) -> StackResult<BufferSizeRange> {
        Err(StackError::NotSupported("udp send buffer size"))
    }

    fn udp_receive_buffer_size_range(&self) -> StackResult<BufferSizeRange> {
        Err(StackError::NotSupported("udp receive buffer size"))
    }
}

/// State shared by both interceptors.
struct Context {
    dialer: Arc<dyn Dial>,
    redirector: Option<Arc<dyn Redirector>>,
    establish: Option<Arc<dyn EstablishHandler>>,
    tuner: SocketTuner,
    transport: Arc<dyn TransportOptions>,
    copy_buffer_size: usize,
    events: EventSink,
    runtime: Handle,
}

impl Context {
    /// Start a forwarding session for an accepted flow.
    fn launch<C>(&self, network: Network, conn: C, id: EndpointId)
    where
        C: AsyncRead + AsyncWrite + Send + Unpin + 'static,
    {
        let destination = resolve_destination(self.redirector.as_deref(), &id);
        debug!(%network, flow = %id, %destination, "Forwarding flow");

        let session = ForwardingSession::new(network, conn, destination, id.address_id())
            .with_copy_buffer_size(self.copy_buffer_size);
        let dialer = Arc::clone(&self.dialer);
        let establish = self.establish.clone();
        let events = self.events.clone();

        self.runtime.spawn(async move {
            if let Err(e) = session.run(dialer.as_ref(), establish.as_deref(), &events).await {
                debug!(%network, flow = %id, error = %e, "Session ended with error");
            }
        });
    }
}

/// Builds the TCP and UDP interceptors around one shared context.
pub struct InterceptorBuilder {
    dialer: Option<Arc<dyn Dial>>,
    dialer_config: DialerConfig,
    redirector: Option<Arc<dyn Redirector>>,
    establish: Option<Arc<dyn EstablishHandler>>,
    tuning: TuningConfig,
    forwarder: ForwarderConfig,
    transport: Option<Arc<dyn TransportOptions>>,
    events: Option<EventSink>,
    runtime: Option<Handle>,
}

impl InterceptorBuilder {
    pub fn new() -> Self {
        Self {
            dialer: None,
            dialer_config: DialerConfig::default(),
            redirector: None,
            establish: None,
            tuning: TuningConfig::default(),
            forwarder: ForwarderConfig::default(),
            transport: None,
            events: None,
            runtime: None,
        }
    }

    /// Start from the tuning, forwarder and dialer sections of `config`.
    pub fn from_config(config: &Config) -> Self {
        Self::new()
            .tuning(config.tuning.clone())
            .forwarder(config.forwarder.clone())
            .dialer_config(config.dialer.clone())
    }

    /// Use a custom dialer instead of [`Dialer`].
    pub fn dialer(mut self, dialer: Arc<dyn Dial>) -> Self {
        self.dialer = Some(dialer);
        self
    }

    /// Configuration for the default [`Dialer`].
    pub fn dialer_config(mut self, config: DialerConfig) -> Self {
        self.dialer_config = config;
        self
    }

    pub fn redirector(mut self, redirector: impl Redirector + 'static) -> Self {
        self.redirector = Some(Arc::new(redirector));
        self
    }

    pub fn establish_handler(mut self, handler: impl EstablishHandler + 'static) -> Self {
        self.establish = Some(Arc::new(handler));
        self
    }

    pub fn tuning(mut self, tuning: TuningConfig) -> Self {
        self.tuning = tuning;
        self
    }

    pub fn forwarder(mut self, forwarder: ForwarderConfig) -> Self {
        self.forwarder = forwarder;
        self
    }

    /// Stack-wide transport defaults used for buffer tuning.
    pub fn transport_options(mut self, transport: Arc<dyn TransportOptions>) -> Self {
        self.transport = Some(transport);
        self
    }

    pub fn events(mut self, events: EventSink) -> Self {
        self.events = Some(events);
        self
    }

    /// Runtime that forwarding sessions are spawned on.
    ///
    /// Defaults to the runtime `build` is called from.
    pub fn runtime(mut self, runtime: Handle) -> Self {
        self.runtime = Some(runtime);
        self
    }

    pub fn build(self) -> Result<(TcpInterceptor, UdpInterceptor)> {
        let runtime = match self.runtime {
            Some(handle) => handle,
            None => Handle::try_current()
                .map_err(|e| Error::Config(format!("No async runtime for sessions: {e}")))?,
        };
        if self.forwarder.copy_buffer_size == 0 {
            return Err(Error::InvalidConfig("Copy buffer size must be non-zero".into()));
        }

        let dialer_config = self.dialer_config;
        let dialer = self
            .dialer
            .unwrap_or_else(|| Arc::new(Dialer::new(dialer_config)));

        let ctx = Arc::new(Context {
            dialer,
            redirector: self.redirector,
            establish: self.establish,
            tuner: SocketTuner::new(self.tuning),
            transport: self.transport.unwrap_or_else(|| Arc::new(NoTransportOptions)),
            copy_buffer_size: self.forwarder.copy_buffer_size,
            events: self.events.unwrap_or_default(),
            runtime,
        });

        Ok((TcpInterceptor::new(Arc::clone(&ctx)), UdpInterceptor::new(ctx)))
    }
}

impl Default for InterceptorBuilder {
    fn default() -> Self {
        Self::new()
    }
}
