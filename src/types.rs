//! Core types shared by the link, interception and forwarding layers.

use std::fmt;
use std::net::{IpAddr, SocketAddr};

use serde::{Deserialize, Serialize};

/// Transport kind of an intercepted flow.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Network {
    Tcp,
    Udp,
}

impl Network {
    /// IP protocol number of the transport.
    pub fn protocol_number(self) -> u8 {
        match self {
            Network::Tcp => 6,
            Network::Udp => 17,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Network::Tcp => "tcp",
            Network::Udp => "udp",
        }
    }
}

impl fmt::Display for Network {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Network-layer protocol of a raw packet.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum NetworkProtocol {
    Ipv4,
    Ipv6,
}

impl NetworkProtocol {
    /// EtherType-style protocol number handed to the stack.
    pub const IPV4_NUMBER: u16 = 0x0800;
    pub const IPV6_NUMBER: u16 = 0x86dd;

    /// Classify a packet by the version nibble of its first octet.
    ///
    /// Only the first byte is ever inspected. Anything other than
    /// version 4 or 6 is unparseable and yields `None`.
    pub fn classify(first_byte: u8) -> Option<Self> {
        match first_byte >> 4 {
            4 => Some(NetworkProtocol::Ipv4),
            6 => Some(NetworkProtocol::Ipv6),
            _ => None,
        }
    }

    /// Get the protocol number.
    pub fn number(self) -> u16 {
        match self {
            NetworkProtocol::Ipv4 => Self::IPV4_NUMBER,
            NetworkProtocol::Ipv6 => Self::IPV6_NUMBER,
        }
    }
}

impl fmt::Display for NetworkProtocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NetworkProtocol::Ipv4 => f.write_str("ipv4"),
            NetworkProtocol::Ipv6 => f.write_str("ipv6"),
        }
    }
}

/// Identity of one intercepted flow as seen by the virtual stack.
///
/// `local` is the address the application was trying to reach (the
/// original destination), `remote` is the application itself.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct EndpointId {
    pub local_addr: IpAddr,
    pub local_port: u16,
    pub remote_addr: IpAddr,
    pub remote_port: u16,
}

impl EndpointId {
    /// Create a new endpoint identifier.
    pub fn new(local: SocketAddr, remote: SocketAddr) -> Self {
        Self {
            local_addr: local.ip(),
            local_port: local.port(),
            remote_addr: remote.ip(),
            remote_port: remote.port(),
        }
    }

    pub fn local(&self) -> SocketAddr {
        SocketAddr::new(self.local_addr, self.local_port)
    }

    pub fn remote(&self) -> SocketAddr {
        SocketAddr::new(self.remote_addr, self.remote_port)
    }

    /// Format the original destination as `host:port`.
    ///
    /// IPv6 hosts are bracketed.
    pub fn address_id(&self) -> String {
        match self.local_addr {
            IpAddr::V4(v4) => format!("{}:{}", v4, self.local_port),
            IpAddr::V6(v6) => format!("[{}]:{}", v6, self.local_port),
        }
    }
}

impl fmt::Display for EndpointId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} -> {}", self.remote(), self.local())
    }
}
