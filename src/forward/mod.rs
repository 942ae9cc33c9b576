//! Forwarding of intercepted flows to their real destinations.
//!
//! A [`ForwardingSession`] dials the destination chosen by the
//! [`Redirector`] policy, reports the established connection to the
//! [`EstablishHandler`] and bridges bytes in both directions until either
//! side terminates.

mod dialer;
mod session;

pub use dialer::{AsyncStream, Dial, Dialer, DialerConfig, Outbound, UdpConn};
pub use session::{ForwardingSession, SessionStats, DEFAULT_COPY_BUFFER_SIZE};

use std::net::{IpAddr, SocketAddr};

/// Redirection policy for intercepted flows.
///
/// Called once per flow, synchronously, before dialing. `None` (or an empty
/// string) keeps the original destination.
pub trait Redirector: Send + Sync {
    fn redirect(
        &self,
        remote_addr: IpAddr,
        remote_port: u16,
        local_addr: IpAddr,
        local_port: u16,
    ) -> Option<String>;
}

impl<F> Redirector for F
where
    F: Fn(IpAddr, u16, IpAddr, u16) -> Option<String> + Send + Sync,
{
    fn redirect(
        &self,
        remote_addr: IpAddr,
        remote_port: u16,
        local_addr: IpAddr,
        local_port: u16,
    ) -> Option<String> {
        self(remote_addr, remote_port, local_addr, local_port)
    }
}

/// Notified once per successfully dialed session, before bridging begins.
pub trait EstablishHandler: Send + Sync {
    /// `local_addr` is the local address of the outbound connection and
    /// `original` the pre-redirection destination as `host:port`.
    fn handle(&self, local_addr: SocketAddr, original: &str);
}

impl<F> EstablishHandler for F
where
    F: Fn(SocketAddr, &str) + Send + Sync,
{
    fn handle(&self, local_addr: SocketAddr, original: &str) {
        self(local_addr, original);
    }
}
