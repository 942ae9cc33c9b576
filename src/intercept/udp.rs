//! UDP flow interception.

use std::sync::Arc;

use tracing::trace;

use super::Context;
use crate::event::Event;
use crate::stack::{StackEndpoint, UdpForwarderRequest};
use crate::types::Network;

/// Handles new UDP associations surfaced by the stack's forwarder.
#[derive(Clone)]
pub struct UdpInterceptor {
    ctx: Arc<Context>,
}

impl UdpInterceptor {
    pub(super) fn new(ctx: Arc<Context>) -> Self {
        Self { ctx }
    }

    /// Materialize the association and start forwarding it.
    ///
    /// UDP endpoints only get buffer tuning; keepalive has no meaning here.
    pub fn handle<R: UdpForwarderRequest>(&self, request: R) {
        let id = request.id();
        trace!(flow = %id, "New UDP flow");

        let mut ep = match request.create_endpoint() {
            Ok(ep) => ep,
            Err(e) => {
                self.ctx.events.emit(Event::EndpointFailed {
                    network: Network::Udp,
                    id,
                    error: e.to_string(),
                });
                return;
            }
        };

        self.ctx
            .tuner
            .tune_buffers(Network::Udp, self.ctx.transport.as_ref(), &mut ep);

        self.ctx.launch(Network::Udp, ep.into_conn(), id);
    }

    /// The interceptor as a callback for the stack's UDP forwarder.
    pub fn handler<R>(&self) -> impl Fn(R) + Send + Sync + 'static
    where
        R: UdpForwarderRequest + 'static,
    {
        let this = self.clone();
        move |request| this.handle(request)
    }
}
