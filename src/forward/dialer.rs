//! Outbound dialing.

use std::fmt;
use std::io;
use std::net::{IpAddr, SocketAddr};
use std::pin::Pin;
use std::task::{Context, Poll};
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use socket2::{Domain, Protocol, Socket, Type};
use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};
use tokio::net::{TcpSocket, UdpSocket};
use tracing::{debug, warn};

use crate::types::Network;

/// Dial configuration, supplied once and reused for every outbound dial.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DialerConfig {
    /// TCP connect timeout (none = wait for the OS).
    #[serde(
        default = "default_connect_timeout",
        with = "humantime_serde",
        skip_serializing_if = "Option::is_none"
    )]
    pub connect_timeout: Option<Duration>,

    /// Interface to bind outbound sockets to.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bind_interface: Option<String>,

    /// Source address for outbound sockets.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bind_address: Option<IpAddr>,

    /// Mark for policy routing (Linux only).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fwmark: Option<u32>,

    /// Enable TCP_NODELAY on outbound TCP connections.
    #[serde(default = "default_nodelay")]
    pub tcp_nodelay: bool,
}

fn default_connect_timeout() -> Option<Duration> {
    Some(Duration::from_secs(10))
}
fn default_nodelay() -> bool {
    true
}

impl Default for DialerConfig {
    fn default() -> Self {
        Self {
            connect_timeout: default_connect_timeout(),
            bind_interface: None,
            bind_address: None,
            fwmark: None,
            tcp_nodelay: default_nodelay(),
        }
    }
}

/// Any bidirectional async byte stream.
pub trait AsyncStream: AsyncRead + AsyncWrite + Send + Unpin {}

impl<T> AsyncStream for T where T: AsyncRead + AsyncWrite + Send + Unpin {}

/// A dialed outbound connection.
pub struct Outbound {
    /// Local address chosen for the connection.
    pub local_addr: SocketAddr,
    pub stream: Box<dyn AsyncStream>,
}

impl Outbound {
    pub fn new(local_addr: SocketAddr, stream: impl AsyncStream + 'static) -> Self {
        Self {
            local_addr,
            stream: Box::new(stream),
        }
    }
}

impl fmt::Debug for Outbound {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Outbound")
            .field("local_addr", &self.local_addr)
            .finish_non_exhaustive()
    }
}

/// Dials real destinations.
#[async_trait]
pub trait Dial: Send + Sync {
    /// Connect to `addr` (`host:port`) over `network`.
    async fn dial(&self, network: Network, addr: &str) -> io::Result<Outbound>;
}

/// Default dialer over the host network.
#[derive(Debug, Clone, Default)]
pub struct Dialer {
    config: DialerConfig,
}

impl Dialer {
    pub fn new(config: DialerConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &DialerConfig {
        &self.config
    }

    async fn dial_tcp(&self, target: SocketAddr) -> io::Result<Outbound> {
        let socket = self.socket(target, Type::STREAM, Protocol::TCP)?;
        let std_stream: std::net::TcpStream = socket.into();
        let connect = TcpSocket::from_std_stream(std_stream).connect(target);

        let stream = match self.config.connect_timeout {
            Some(limit) => tokio::time::timeout(limit, connect).await.map_err(|_| {
                io::Error::new(io::ErrorKind::TimedOut, format!("connect to {target} timed out"))
            })??,
            None => connect.await?,
        };

        if self.config.tcp_nodelay {
            if let Err(e) = stream.set_nodelay(true) {
                debug!(error = %e, "Failed to set TCP_NODELAY");
            }
        }

        Ok(Outbound::new(stream.local_addr()?, stream))
    }

    async fn dial_udp(&self, target: SocketAddr) -> io::Result<Outbound> {
        let socket = self.socket(target, Type::DGRAM, Protocol::UDP)?;
        let std_socket: std::net::UdpSocket = socket.into();
        let udp = UdpSocket::from_std(std_socket)?;
        udp.connect(target).await?;

        Ok(Outbound::new(udp.local_addr()?, UdpConn::new(udp)))
    }

    /// Resolve `addr`, bounded by the connect timeout.
    async fn resolve(&self, addr: &str) -> io::Result<Vec<SocketAddr>> {
        let lookup = tokio::net::lookup_host(addr);
        let addrs = match self.config.connect_timeout {
            Some(limit) => tokio::time::timeout(limit, lookup).await.map_err(|_| {
                io::Error::new(io::ErrorKind::TimedOut, format!("resolving {addr} timed out"))
            })??,
            None => lookup.await?,
        };
        Ok(addrs.collect())
    }

    /// Create a non-blocking socket for `target` with interface, mark and
    /// source address applied.
    fn socket(&self, target: SocketAddr, ty: Type, protocol: Protocol) -> io::Result<Socket> {
        let socket = Socket::new(Domain::for_address(target), ty, Some(protocol))?;
        socket.set_nonblocking(true)?;

        if let Some(interface) = &self.config.bind_interface {
            bind_to_interface(&socket, interface, target.is_ipv6())?;
        }

        #[cfg(target_os = "linux")]
        if let Some(mark) = self.config.fwmark {
            if let Err(e) = socket.set_mark(mark) {
                if e.raw_os_error() == Some(libc::EPERM) {
                    warn!("SO_MARK requires CAP_NET_ADMIN or root");
                }
                return Err(e);
            }
        }

        if let Some(ip) = self.config.bind_address {
            if ip.is_ipv6() == target.is_ipv6() {
                socket.bind(&SocketAddr::new(ip, 0).into())?;
            } else {
                debug!(source = %ip, %target, "Skipping source address of other family");
            }
        }

        Ok(socket)
    }
}

#[async_trait]
impl Dial for Dialer {
    async fn dial(&self, network: Network, addr: &str) -> io::Result<Outbound> {
        let mut last_err = None;

        for target in self.resolve(addr).await? {
            let result = match network {
                Network::Tcp => self.dial_tcp(target).await,
                Network::Udp => self.dial_udp(target).await,
            };
            match result {
                Ok(outbound) => {
                    debug!(%network, %target, local = %outbound.local_addr, "Dialed");
                    return Ok(outbound);
                }
                Err(e) => {
                    debug!(%network, %target, error = %e, "Dial attempt failed");
                    last_err = Some(e);
                }
            }
        }

        Err(last_err.unwrap_or_else(|| {
            io::Error::new(
                io::ErrorKind::AddrNotAvailable,
                format!("no addresses resolved for {addr}"),
            )
        }))
    }
}

/// Bind socket to a specific interface.
fn bind_to_interface(socket: &Socket, interface: &str, ipv6: bool) -> io::Result<()> {
    #[cfg(any(target_os = "linux", target_os = "android"))]
    {
        let _ = ipv6;
        if let Err(e) = socket.bind_device(Some(interface.as_bytes())) {
            // EPERM means we don't have CAP_NET_RAW
            if e.raw_os_error() == Some(libc::EPERM) {
                warn!(
                    "SO_BINDTODEVICE requires CAP_NET_RAW or root for interface {}",
                    interface
                );
            }
            return Err(e);
        }
        debug!("Bound socket to interface {} via SO_BINDTODEVICE", interface);
    }

    #[cfg(target_os = "macos")]
    {
        use std::os::unix::io::AsRawFd;

        let name = std::ffi::CString::new(interface)
            .map_err(|_| io::Error::new(io::ErrorKind::InvalidInput, "invalid interface name"))?;
        let idx = unsafe { libc::if_nametoindex(name.as_ptr()) };
        if idx == 0 {
            return Err(io::Error::new(
                io::ErrorKind::NotFound,
                format!("interface not found: {interface}"),
            ));
        }

        let (level, option) = if ipv6 {
            (libc::IPPROTO_IPV6, libc::IPV6_BOUND_IF)
        } else {
            (libc::IPPROTO_IP, libc::IP_BOUND_IF)
        };
        let ret = unsafe {
            libc::setsockopt(
                socket.as_raw_fd(),
                level,
                option,
                (&idx as *const u32).cast::<libc::c_void>(),
                std::mem::size_of::<u32>() as libc::socklen_t,
            )
        };
        if ret != 0 {
            return Err(io::Error::last_os_error());
        }
        debug!("Bound socket to interface {} via IP_BOUND_IF", interface);
    }

    #[cfg(not(any(target_os = "linux", target_os = "android", target_os = "macos")))]
    {
        let _ = (socket, ipv6);
        warn!(
            "Interface binding not supported on this platform, ignoring {}",
            interface
        );
    }

    Ok(())
}

/// Connected UDP socket exposed as a byte stream.
///
/// Each read returns one datagram and each write sends one datagram, so
/// message boundaries survive a copy loop that writes what it reads.
#[derive(Debug)]
pub struct UdpConn {
    socket: UdpSocket,
}

impl UdpConn {
    pub fn new(socket: UdpSocket) -> Self {
        Self { socket }
    }

    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.socket.local_addr()
    }

    pub fn peer_addr(&self) -> io::Result<SocketAddr> {
        self.socket.peer_addr()
    }
}

impl AsyncRead for UdpConn {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        self.socket.poll_recv(cx, buf)
    }
}

impl AsyncWrite for UdpConn {
    fn poll_write(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        self.socket.poll_send(cx, buf)
    }

    fn poll_flush(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Poll::Ready(Ok(()))
    }

    fn poll_shutdown(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Poll::Ready(Ok(()))
    }
}
