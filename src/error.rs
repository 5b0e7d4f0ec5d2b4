use crate::packet::EncodeError;
use crate::ping::CorrelationKey;
use crate::socket::SocketFamily;
use std::io;
use std::net::IpAddr;

/// Errors that abort a ping session.
///
/// Timeouts and ICMP error messages are not errors: they are reported as
/// [`PingOutcome`](crate::ping::PingOutcome) values.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Configuration rejected before any socket was opened.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
    /// The same address was requested twice in one session.
    #[error("duplicate target address {0}")]
    DuplicateTarget(IpAddr),
    /// The ICMP socket could not be opened, usually for lack of privileges.
    #[error("failed to open {family:?} ICMP socket: {source}")]
    Socket {
        family: SocketFamily,
        #[source]
        source: io::Error,
    },
    /// The socket refused an echo request.
    #[error("failed to send echo request to {addr}: {source}")]
    Send {
        addr: IpAddr,
        #[source]
        source: io::Error,
    },
    /// Non-transient failure while receiving.
    #[error("failed to receive ICMP packet: {0}")]
    Receive(#[source] io::Error),
    #[error(transparent)]
    Encode(#[from] EncodeError),
    /// Two live requests with the same correlation key.
    #[error("request {0} is already outstanding")]
    DuplicateKey(CorrelationKey),
    #[error("failed to resolve {host}: {reason}")]
    Resolve { host: String, reason: String },
}

pub type Result<T> = std::result::Result<T, Error>;
