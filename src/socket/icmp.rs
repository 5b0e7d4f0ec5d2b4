use super::{is_transient, AsyncIcmpChannel, IcmpChannel, Received, SocketFamily};
use socket2::{Socket, Type};
use std::io;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr, UdpSocket as StdUdpSocket};
use std::task::{ready, Context, Poll};
use std::time::{Duration, Instant};
use tokio::io::ReadBuf;
use tokio::net::UdpSocket;

/// Kind of ICMP socket to open.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IcmpSocketType {
    /// Unprivileged ICMP datagram socket (Linux `ping_group_range`).
    Dgram,
    /// Raw ICMP socket, needs root or `CAP_NET_RAW`.
    Raw,
}

impl IcmpSocketType {
    fn to_sock_type(&self) -> Type {
        match self {
            IcmpSocketType::Dgram => Type::DGRAM,
            IcmpSocketType::Raw => Type::RAW,
        }
    }

    fn fallback(&self) -> IcmpSocketType {
        match self {
            IcmpSocketType::Dgram => IcmpSocketType::Raw,
            IcmpSocketType::Raw => IcmpSocketType::Dgram,
        }
    }
}

#[derive(Debug, Clone)]
pub struct IcmpConfig {
    pub family: SocketFamily,
    /// Local address to bind to.
    pub bind: Option<IpAddr>,
    pub ttl: Option<u32>,
    pub hop_limit: Option<u32>,
    pub recv_buffer_size: Option<usize>,
    pub sock_type_hint: IcmpSocketType,
    /// Try the other socket type when the hinted one cannot be opened.
    pub allow_fallback: bool,
}

impl IcmpConfig {
    pub fn new(family: SocketFamily) -> Self {
        Self {
            family,
            bind: None,
            ttl: None,
            hop_limit: None,
            recv_buffer_size: None,
            sock_type_hint: IcmpSocketType::Raw,
            allow_fallback: true,
        }
    }
}

struct Opened {
    socket: StdUdpSocket,
    kind: IcmpSocketType,
    identifier: Option<u16>,
}

fn open(config: &IcmpConfig) -> io::Result<Opened> {
    let domain = config.family.to_domain();
    let proto = Some(config.family.to_protocol());
    let hint = config.sock_type_hint;

    let (socket, kind) = match Socket::new(domain, hint.to_sock_type(), proto) {
        Ok(sock) => (sock, hint),
        Err(e) if config.allow_fallback => {
            let other = hint.fallback();
            tracing::debug!(
                "{:?} {:?} socket unavailable ({}), trying {:?}",
                config.family,
                hint,
                e,
                other
            );
            (Socket::new(domain, other.to_sock_type(), proto)?, other)
        }
        Err(e) => return Err(e),
    };

    if let Some(ttl) = config.ttl {
        socket.set_ttl(ttl)?;
    }
    if let Some(hop_limit) = config.hop_limit {
        socket.set_unicast_hops_v6(hop_limit)?;
    }
    if let Some(size) = config.recv_buffer_size {
        if let Err(e) = socket.set_recv_buffer_size(size) {
            tracing::warn!("could not set receive buffer to {} bytes: {}", size, e);
        }
    }

    // A datagram socket gets its echo identifier from the local port, so bind
    // right away to learn it before the first send.
    let bind = match (config.bind, kind) {
        (Some(ip), _) => Some(ip),
        (None, IcmpSocketType::Dgram) => Some(match config.family {
            SocketFamily::Ipv4 => IpAddr::V4(Ipv4Addr::UNSPECIFIED),
            SocketFamily::Ipv6 => IpAddr::V6(Ipv6Addr::UNSPECIFIED),
        }),
        (None, IcmpSocketType::Raw) => None,
    };
    if let Some(ip) = bind {
        socket.bind(&SocketAddr::new(ip, 0).into())?;
    }

    let identifier = match kind {
        IcmpSocketType::Dgram => socket.local_addr()?.as_socket().map(|addr| addr.port()),
        IcmpSocketType::Raw => None,
    };

    tracing::debug!("opened {:?} {:?} ICMP socket", config.family, kind);
    Ok(Opened {
        socket: socket.into(),
        kind,
        identifier,
    })
}

fn has_ip_header(family: SocketFamily, kind: IcmpSocketType) -> bool {
    match (family, kind) {
        (SocketFamily::Ipv4, IcmpSocketType::Raw) => true,
        // Darwin hands the IPv4 header to datagram sockets too.
        (SocketFamily::Ipv4, IcmpSocketType::Dgram) => cfg!(target_os = "macos"),
        (SocketFamily::Ipv6, _) => false,
    }
}

/// Blocking ICMP socket for one address family.
#[derive(Debug)]
pub struct IcmpSocket {
    inner: StdUdpSocket,
    family: SocketFamily,
    kind: IcmpSocketType,
    identifier: Option<u16>,
    nonblocking: bool,
    read_timeout: Option<Duration>,
}

impl IcmpSocket {
    pub fn new(config: &IcmpConfig) -> io::Result<Self> {
        let opened = open(config)?;
        Ok(Self {
            inner: opened.socket,
            family: config.family,
            kind: opened.kind,
            identifier: opened.identifier,
            nonblocking: false,
            read_timeout: None,
        })
    }

    pub fn socket_type(&self) -> IcmpSocketType {
        self.kind
    }

    fn set_nonblocking(&mut self, nonblocking: bool) -> io::Result<()> {
        if self.nonblocking != nonblocking {
            self.inner.set_nonblocking(nonblocking)?;
            self.nonblocking = nonblocking;
        }
        Ok(())
    }

    fn set_read_timeout(&mut self, timeout: Duration) -> io::Result<()> {
        if self.read_timeout != Some(timeout) {
            self.inner.set_read_timeout(Some(timeout))?;
            self.read_timeout = Some(timeout);
        }
        Ok(())
    }
}

impl IcmpChannel for IcmpSocket {
    fn family(&self) -> SocketFamily {
        self.family
    }

    fn has_ip_header(&self) -> bool {
        has_ip_header(self.family, self.kind)
    }

    fn identifier_override(&self) -> Option<u16> {
        self.identifier
    }

    fn send_to(&mut self, buf: &[u8], dest: IpAddr) -> io::Result<usize> {
        self.set_nonblocking(false)?;
        self.inner.send_to(buf, SocketAddr::new(dest, 0))
    }

    fn poll_receive(&mut self, buf: &mut [u8], max_wait: Duration) -> io::Result<Option<Received>> {
        if max_wait.is_zero() {
            self.set_nonblocking(true)?;
        } else {
            self.set_nonblocking(false)?;
            self.set_read_timeout(max_wait)?;
        }
        match self.inner.recv_from(buf) {
            Ok((len, addr)) => Ok(Some(Received {
                len,
                peer: addr.ip(),
                received_at: Instant::now(),
            })),
            Err(e) if is_transient(&e) => Ok(None),
            Err(e) => Err(e),
        }
    }
}

/// ICMP socket registered with the tokio reactor.
///
/// Must be created from within a tokio runtime.
#[derive(Debug)]
pub struct AsyncIcmpSocket {
    inner: UdpSocket,
    family: SocketFamily,
    kind: IcmpSocketType,
    identifier: Option<u16>,
}

impl AsyncIcmpSocket {
    pub fn new(config: &IcmpConfig) -> io::Result<Self> {
        let opened = open(config)?;
        opened.socket.set_nonblocking(true)?;
        Ok(Self {
            inner: UdpSocket::from_std(opened.socket)?,
            family: config.family,
            kind: opened.kind,
            identifier: opened.identifier,
        })
    }

    pub fn socket_type(&self) -> IcmpSocketType {
        self.kind
    }
}

impl AsyncIcmpChannel for AsyncIcmpSocket {
    fn family(&self) -> SocketFamily {
        self.family
    }

    fn has_ip_header(&self) -> bool {
        has_ip_header(self.family, self.kind)
    }

    fn identifier_override(&self) -> Option<u16> {
        self.identifier
    }

    fn poll_send_to(
        &mut self,
        cx: &mut Context<'_>,
        buf: &[u8],
        dest: IpAddr,
    ) -> Poll<io::Result<usize>> {
        self.inner.poll_send_to(cx, buf, SocketAddr::new(dest, 0))
    }

    fn poll_receive(&mut self, cx: &mut Context<'_>, buf: &mut [u8]) -> Poll<io::Result<Received>> {
        let mut read_buf = ReadBuf::new(buf);
        let addr = ready!(self.inner.poll_recv_from(cx, &mut read_buf))?;
        Poll::Ready(Ok(Received {
            len: read_buf.filled().len(),
            peer: addr.ip(),
            received_at: Instant::now(),
        }))
    }
}
