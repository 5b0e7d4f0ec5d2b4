use super::{AsyncPingSession, PingResult, PingSession, StatsIter};
use crate::error::{Error, Result};
use crate::packet::{DEFAULT_PAYLOAD_SIZE, MAX_PAYLOAD_SIZE};
use crate::socket::{IcmpConfig, IcmpSocketType, SocketFamily};
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};
use std::time::{Duration, Instant};

/// Highest number of requests per target; sequence numbers are 16 bits.
pub const MAX_COUNT: usize = u16::MAX as usize;
/// Longest accepted `interval` and `timeout`.
pub const MAX_WAIT: Duration = Duration::from_secs(24 * 60 * 60);

/// Configuration for pinging a set of hosts.
#[derive(Clone, Debug)]
pub struct Pinger {
    /// Hosts to probe. Each must appear once.
    pub targets: Vec<IpAddr>,
    /// Echo requests per target. Default is `4`.
    pub count: usize,
    /// Delay between requests to the same target. Default is 1 second.
    pub interval: Duration,
    /// How long to wait for each reply. Default is 1 second.
    pub timeout: Duration,
    /// Send on a fixed cadence instead of after each resolution.
    pub strict_interval: bool,
    /// Echo payload size in bytes. Default is `56`.
    pub payload_size: usize,
    /// Echo identifier. Random by default; datagram sockets may override it.
    pub identifier: u16,
    /// Outstanding requests allowed per target in strict mode. Default is `8`.
    pub max_in_flight: usize,
    /// TTL (hop limit for IPv6) of outgoing requests.
    pub ttl: Option<u8>,
    /// Preferred socket type. Raw falls back to datagram when not permitted.
    pub socket_type: IcmpSocketType,
    /// Source address for IPv4 requests.
    pub src_v4: Option<Ipv4Addr>,
    /// Source address for IPv6 requests.
    pub src_v6: Option<Ipv6Addr>,
}

impl Pinger {
    /// Creates a new `Pinger` for the given targets with default settings.
    pub fn new(targets: Vec<IpAddr>) -> Pinger {
        Pinger {
            targets,
            count: 4,
            interval: Duration::from_secs(1),
            timeout: Duration::from_secs(1),
            strict_interval: false,
            payload_size: DEFAULT_PAYLOAD_SIZE,
            identifier: rand::random::<u16>(),
            max_in_flight: 8,
            ttl: None,
            socket_type: IcmpSocketType::Raw,
            src_v4: None,
            src_v6: None,
        }
    }

    /// Checks the configuration without touching the network.
    pub fn validate(&self) -> Result<()> {
        if self.count == 0 {
            return Err(Error::InvalidConfig("count must be at least 1".into()));
        }
        if self.count > MAX_COUNT {
            return Err(Error::InvalidConfig(format!("count must not exceed {}", MAX_COUNT)));
        }
        if self.interval.is_zero() {
            return Err(Error::InvalidConfig("interval must be positive".into()));
        }
        if self.interval > MAX_WAIT {
            return Err(Error::InvalidConfig(format!("interval must not exceed {:?}", MAX_WAIT)));
        }
        if self.timeout.is_zero() {
            return Err(Error::InvalidConfig("timeout must be positive".into()));
        }
        if self.timeout > MAX_WAIT {
            return Err(Error::InvalidConfig(format!("timeout must not exceed {:?}", MAX_WAIT)));
        }
        if self.max_in_flight == 0 {
            return Err(Error::InvalidConfig("max_in_flight must be at least 1".into()));
        }
        if self.payload_size > MAX_PAYLOAD_SIZE {
            return Err(Error::InvalidConfig(format!(
                "payload size must not exceed {}",
                MAX_PAYLOAD_SIZE
            )));
        }
        Ok(())
    }

    /// Opens the sockets and returns a session that yields outcomes as an
    /// iterator.
    pub fn session(&self) -> Result<PingSession> {
        PingSession::open(self)
    }

    /// Opens the sockets on the current tokio runtime and returns a
    /// session polled with `.next().await` or as a stream.
    pub async fn session_async(&self) -> Result<AsyncPingSession> {
        AsyncPingSession::open(self)
    }

    /// Runs a full session, blocking until every outcome is in.
    pub fn ping(&self) -> Result<PingResult> {
        let started = Instant::now();
        let mut outcomes = Vec::new();
        let mut iter = StatsIter::new(self.session()?);
        for outcome in iter.by_ref() {
            outcomes.push(outcome?);
        }
        Ok(PingResult {
            outcomes,
            stats: iter.into_stats(),
            probe_time: started.elapsed(),
        })
    }

    /// Runs a full session on the current tokio runtime.
    pub async fn ping_async(&self) -> Result<PingResult> {
        let started = Instant::now();
        let mut session = self.session_async().await?;
        let mut outcomes = Vec::new();
        while let Some(outcome) = session.next().await {
            outcomes.push(outcome?);
        }
        Ok(PingResult {
            stats: outcomes.iter().collect(),
            outcomes,
            probe_time: started.elapsed(),
        })
    }

    pub(crate) fn icmp_config(&self, family: SocketFamily) -> IcmpConfig {
        let mut config = IcmpConfig::new(family);
        config.sock_type_hint = self.socket_type;
        match family {
            SocketFamily::Ipv4 => {
                config.bind = self.src_v4.map(IpAddr::V4);
                config.ttl = self.ttl.map(u32::from);
            }
            SocketFamily::Ipv6 => {
                config.bind = self.src_v6.map(IpAddr::V6);
                config.hop_limit = self.ttl.map(u32::from);
            }
        }
        config
    }

    /// IPv6 source used for the checksum pseudo-header: the configured one,
    /// else the first address of the default interface.
    pub(crate) fn pseudo_source_v6(&self) -> Option<Ipv6Addr> {
        if self.src_v6.is_some() {
            return self.src_v6;
        }
        if !self.targets.iter().any(|t| t.is_ipv6()) {
            return None;
        }
        match default_net::get_default_interface() {
            Ok(interface) => interface.ipv6.first().map(|net| net.addr),
            Err(e) => {
                tracing::debug!("no default interface for ipv6 source: {}", e);
                None
            }
        }
    }

    /// Sets the targets.
    pub fn set_targets(&mut self, targets: Vec<IpAddr>) {
        self.targets = targets;
    }
    /// Returns the targets.
    pub fn get_targets(&self) -> &[IpAddr] {
        &self.targets
    }
    /// Sets the number of requests per target.
    pub fn set_count(&mut self, count: usize) {
        self.count = count;
    }
    /// Returns the number of requests per target.
    pub fn get_count(&self) -> usize {
        self.count
    }
    /// Sets the interval between requests.
    pub fn set_interval(&mut self, interval: Duration) {
        self.interval = interval;
    }
    /// Returns the interval between requests.
    pub fn get_interval(&self) -> Duration {
        self.interval
    }
    /// Sets the per-request timeout.
    pub fn set_timeout(&mut self, timeout: Duration) {
        self.timeout = timeout;
    }
    /// Returns the per-request timeout.
    pub fn get_timeout(&self) -> Duration {
        self.timeout
    }
    /// Enables or disables strict interval mode.
    pub fn set_strict_interval(&mut self, strict: bool) {
        self.strict_interval = strict;
    }
    /// Returns whether strict interval mode is enabled.
    pub fn get_strict_interval(&self) -> bool {
        self.strict_interval
    }
    /// Sets the payload size.
    pub fn set_payload_size(&mut self, payload_size: usize) {
        self.payload_size = payload_size;
    }
    /// Returns the payload size.
    pub fn get_payload_size(&self) -> usize {
        self.payload_size
    }
    /// Sets the echo identifier.
    pub fn set_identifier(&mut self, identifier: u16) {
        self.identifier = identifier;
    }
    /// Returns the echo identifier.
    pub fn get_identifier(&self) -> u16 {
        self.identifier
    }
    /// Sets the in-flight bound for strict mode.
    pub fn set_max_in_flight(&mut self, max_in_flight: usize) {
        self.max_in_flight = max_in_flight;
    }
    /// Returns the in-flight bound for strict mode.
    pub fn get_max_in_flight(&self) -> usize {
        self.max_in_flight
    }
    /// Sets the TTL value.
    pub fn set_ttl(&mut self, ttl: u8) {
        self.ttl = Some(ttl);
    }
    /// Returns the TTL value.
    pub fn get_ttl(&self) -> Option<u8> {
        self.ttl
    }
    /// Sets the preferred socket type.
    pub fn set_socket_type(&mut self, socket_type: IcmpSocketType) {
        self.socket_type = socket_type;
    }
    /// Returns the preferred socket type.
    pub fn get_socket_type(&self) -> IcmpSocketType {
        self.socket_type
    }
    /// Sets the IPv4 source address.
    pub fn set_src_v4(&mut self, src: Ipv4Addr) {
        self.src_v4 = Some(src);
    }
    /// Sets the IPv6 source address.
    pub fn set_src_v6(&mut self, src: Ipv6Addr) {
        self.src_v6 = Some(src);
    }
}
