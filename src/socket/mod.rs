pub mod icmp;

pub use icmp::{AsyncIcmpSocket, IcmpConfig, IcmpSocket, IcmpSocketType};

use std::io;
use std::net::IpAddr;
use std::task::{Context, Poll};
use std::time::{Duration, Instant};

/// Address family of a target and of the socket that serves it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum SocketFamily {
    Ipv4,
    Ipv6,
}

impl SocketFamily {
    pub fn from_ip(ip: &IpAddr) -> Self {
        match ip {
            IpAddr::V4(_) => SocketFamily::Ipv4,
            IpAddr::V6(_) => SocketFamily::Ipv6,
        }
    }

    pub fn is_v4(&self) -> bool {
        matches!(self, SocketFamily::Ipv4)
    }

    pub fn to_domain(&self) -> socket2::Domain {
        match self {
            SocketFamily::Ipv4 => socket2::Domain::IPV4,
            SocketFamily::Ipv6 => socket2::Domain::IPV6,
        }
    }

    pub fn to_protocol(&self) -> socket2::Protocol {
        match self {
            SocketFamily::Ipv4 => socket2::Protocol::ICMPV4,
            SocketFamily::Ipv6 => socket2::Protocol::ICMPV6,
        }
    }

    pub(crate) fn index(&self) -> usize {
        match self {
            SocketFamily::Ipv4 => 0,
            SocketFamily::Ipv6 => 1,
        }
    }
}

/// One datagram taken off a channel.
#[derive(Debug, Clone, Copy)]
pub struct Received {
    /// Number of bytes written into the caller's buffer.
    pub len: usize,
    /// Address the datagram came from.
    pub peer: IpAddr,
    /// Monotonic time at which the datagram was read.
    pub received_at: Instant,
}

/// Blocking side of an ICMP channel.
///
/// Implemented by [`IcmpSocket`]; the session engine only talks to this
/// trait so it can run against an in-memory transport as well.
pub trait IcmpChannel {
    fn family(&self) -> SocketFamily;

    /// Whether received datagrams start with the IPv4 header.
    fn has_ip_header(&self) -> bool;

    /// Identifier the kernel stamps on outgoing echoes, if it rewrites it.
    fn identifier_override(&self) -> Option<u16>;

    fn send_to(&mut self, buf: &[u8], dest: IpAddr) -> io::Result<usize>;

    /// Waits up to `max_wait` for one datagram. A zero wait never blocks.
    fn poll_receive(&mut self, buf: &mut [u8], max_wait: Duration) -> io::Result<Option<Received>>;
}

/// Cooperative side of an ICMP channel, polled from a task.
pub trait AsyncIcmpChannel {
    fn family(&self) -> SocketFamily;

    fn has_ip_header(&self) -> bool;

    fn identifier_override(&self) -> Option<u16>;

    fn poll_send_to(
        &mut self,
        cx: &mut Context<'_>,
        buf: &[u8],
        dest: IpAddr,
    ) -> Poll<io::Result<usize>>;

    fn poll_receive(&mut self, cx: &mut Context<'_>, buf: &mut [u8]) -> Poll<io::Result<Received>>;
}

/// Receive errors that only mean "nothing arrived".
pub(crate) fn is_transient(err: &io::Error) -> bool {
    matches!(
        err.kind(),
        io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut | io::ErrorKind::Interrupted
    )
}
