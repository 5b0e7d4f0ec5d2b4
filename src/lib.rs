//! Concurrent ICMP echo probing of many hosts.
//!
//! One ICMP socket per address family serves every target. Echo requests
//! go out on a per-target schedule, replies and ICMP errors are matched
//! back to their request, and each request produces exactly one
//! [`PingOutcome`]: a reply, a timeout or a network error.
//!
//! ```no_run
//! use multiping::Pinger;
//! use std::net::{IpAddr, Ipv4Addr};
//!
//! let pinger = Pinger::new(vec![IpAddr::V4(Ipv4Addr::new(1, 1, 1, 1))]);
//! for outcome in pinger.session()? {
//!     println!("{}", outcome?);
//! }
//! # Ok::<(), multiping::Error>(())
//! ```
//!
//! Opening a raw ICMP socket needs root or `CAP_NET_RAW`. Without it the
//! socket layer falls back to an unprivileged datagram socket where the
//! platform offers one.

pub mod error;
pub mod packet;
pub mod ping;
pub mod resolve;
pub mod socket;

pub use error::{Error, Result};
pub use ping::{
    AsyncPingSession, ErrorReason, HostStats, IcmpErrorKind, PingOutcome, PingResult, PingSession,
    PingStats, Pinger,
};
pub use resolve::{resolve_targets, Resolver, SystemResolver};
