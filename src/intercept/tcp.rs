//! TCP flow interception.

use std::sync::Arc;

use tracing::trace;

use super::Context;
use crate::event::Event;
use crate::stack::{StackEndpoint, TcpForwarderRequest};
use crate::types::Network;

/// Handles TCP connection attempts surfaced by the stack's forwarder.
#[derive(Clone)]
pub struct TcpInterceptor {
    ctx: Arc<Context>,
}

impl TcpInterceptor {
    pub(super) fn new(ctx: Arc<Context>) -> Self {
        Self { ctx }
    }

    /// Accept one pending connection and start forwarding it.
    ///
    /// If the stack cannot create the endpoint the request is completed with
    /// a reset and the flow ends here. Tuning failures are reported and the
    /// flow proceeds untuned.
    pub fn handle<R: TcpForwarderRequest>(&self, mut request: R) {
        let id = request.id();
        trace!(flow = %id, "New TCP flow");

        let mut ep = match request.create_endpoint() {
            Ok(ep) => ep,
            Err(e) => {
                request.complete(true);
                self.ctx.events.emit(Event::EndpointFailed {
                    network: Network::Tcp,
                    id,
                    error: e.to_string(),
                });
                return;
            }
        };
        request.complete(false);

        if let Err(e) = self.ctx.tuner.tune_tcp(self.ctx.transport.as_ref(), &mut ep) {
            self.ctx.events.emit(Event::TuningFailed {
                id,
                error: e.to_string(),
            });
        }

        self.ctx.launch(Network::Tcp, ep.into_conn(), id);
    }

    /// The interceptor as a callback for the stack's TCP forwarder.
    pub fn handler<R>(&self) -> impl Fn(R) + Send + Sync + 'static
    where
        R: TcpForwarderRequest + 'static,
    {
        let this = self.clone();
        move |request| this.handle(request)
    }
}
