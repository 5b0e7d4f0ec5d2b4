use std::fmt;
use std::net::IpAddr;
use std::time::Duration;

/// ICMP error message that ended a probe.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IcmpErrorKind {
    DestinationUnreachable,
    TimeExceeded,
}

/// Why a probe failed, as reported by the network.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ErrorReason {
    pub kind: IcmpErrorKind,
    pub code: u8,
    /// Router or host that sent the ICMP error.
    pub reporter: IpAddr,
}

impl ErrorReason {
    pub fn description(&self) -> &'static str {
        match (self.reporter, self.kind) {
            (IpAddr::V4(_), IcmpErrorKind::DestinationUnreachable) => match self.code {
                0 => "Destination network unreachable",
                1 => "Destination host unreachable",
                2 => "Destination protocol unreachable",
                3 => "Destination port unreachable",
                4 => "Fragmentation required",
                5 => "Source route failed",
                6 => "Destination network unknown",
                7 => "Destination host unknown",
                8 => "Source host isolated",
                9 => "Network administratively prohibited",
                10 => "Host administratively prohibited",
                11 => "Network unreachable for ToS",
                12 => "Host unreachable for ToS",
                13 => "Communication administratively prohibited",
                14 => "Host Precedence Violation",
                15 => "Precedence cutoff in effect",
                _ => "Destination unreachable",
            },
            (IpAddr::V4(_), IcmpErrorKind::TimeExceeded) => match self.code {
                0 => "Time to live exceeded",
                1 => "Fragment reassembly time exceeded",
                _ => "Time exceeded",
            },
            (IpAddr::V6(_), IcmpErrorKind::DestinationUnreachable) => match self.code {
                0 => "No route to destination",
                1 => "Communication with destination administratively prohibited",
                2 => "Beyond scope of source address",
                3 => "Address unreachable",
                4 => "Port unreachable",
                5 => "Source address failed ingress/egress policy",
                6 => "Reject route to destination",
                _ => "Destination unreachable",
            },
            (IpAddr::V6(_), IcmpErrorKind::TimeExceeded) => match self.code {
                0 => "Hop limit exceeded in transit",
                1 => "Fragment reassembly time exceeded",
                _ => "Time exceeded",
            },
        }
    }
}

impl fmt::Display for ErrorReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} (from {})", self.description(), self.reporter)
    }
}

/// Result of one echo request. Every request produces exactly one.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PingOutcome {
    Reply {
        target: IpAddr,
        sequence: u16,
        rtt: Duration,
        peer: IpAddr,
        /// TTL of the reply, when the socket exposes the IP header.
        ttl: Option<u8>,
        /// ICMP payload size in bytes.
        size: usize,
    },
    Timeout {
        target: IpAddr,
        sequence: u16,
    },
    Error {
        target: IpAddr,
        sequence: u16,
        reason: ErrorReason,
    },
}

impl PingOutcome {
    pub fn target(&self) -> IpAddr {
        match self {
            PingOutcome::Reply { target, .. }
            | PingOutcome::Timeout { target, .. }
            | PingOutcome::Error { target, .. } => *target,
        }
    }

    pub fn sequence(&self) -> u16 {
        match self {
            PingOutcome::Reply { sequence, .. }
            | PingOutcome::Timeout { sequence, .. }
            | PingOutcome::Error { sequence, .. } => *sequence,
        }
    }

    pub fn rtt(&self) -> Option<Duration> {
        match self {
            PingOutcome::Reply { rtt, .. } => Some(*rtt),
            _ => None,
        }
    }

    pub fn is_reply(&self) -> bool {
        matches!(self, PingOutcome::Reply { .. })
    }

    /// Estimated hop count from the reply TTL.
    pub fn hop_count(&self) -> Option<u8> {
        match self {
            PingOutcome::Reply { ttl: Some(ttl), .. } => Some(guess_initial_ttl(*ttl) - ttl),
            _ => None,
        }
    }
}

impl fmt::Display for PingOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PingOutcome::Reply {
                sequence,
                rtt,
                peer,
                ttl,
                size,
                ..
            } => {
                write!(f, "{} bytes from {}: icmp_seq={}", size, peer, sequence)?;
                if let Some(ttl) = ttl {
                    write!(f, " ttl={}", ttl)?;
                }
                write!(f, " time={:.1} ms", rtt.as_secs_f64() * 1000.0)
            }
            PingOutcome::Timeout { target, sequence } => {
                write!(f, "{}: icmp_seq={} timeout", target, sequence)
            }
            PingOutcome::Error {
                target,
                sequence,
                reason,
            } => write!(f, "{}: icmp_seq={} {}", target, sequence, reason),
        }
    }
}

pub(crate) fn guess_initial_ttl(ttl: u8) -> u8 {
    if ttl <= 64 {
        64
    } else if ttl <= 128 {
        128
    } else {
        255
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::{Ipv4Addr, Ipv6Addr};

    fn target() -> IpAddr {
        IpAddr::V4(Ipv4Addr::new(192, 0, 2, 33))
    }

    #[test]
    fn test_guess_initial_ttl() {
        assert_eq!(guess_initial_ttl(1), 64);
        assert_eq!(guess_initial_ttl(64), 64);
        assert_eq!(guess_initial_ttl(65), 128);
        assert_eq!(guess_initial_ttl(128), 128);
        assert_eq!(guess_initial_ttl(200), 255);
    }

    #[test]
    fn test_reply_accessors() {
        let outcome = PingOutcome::Reply {
            target: target(),
            sequence: 4,
            rtt: Duration::from_micros(12_345),
            peer: target(),
            ttl: Some(57),
            size: 64,
        };
        assert_eq!(outcome.target(), target());
        assert_eq!(outcome.sequence(), 4);
        assert_eq!(outcome.rtt(), Some(Duration::from_micros(12_345)));
        assert_eq!(outcome.hop_count(), Some(7));
        assert_eq!(
            outcome.to_string(),
            "64 bytes from 192.0.2.33: icmp_seq=4 ttl=57 time=12.3 ms"
        );
    }

    #[test]
    fn test_timeout_display() {
        let outcome = PingOutcome::Timeout {
            target: target(),
            sequence: 2,
        };
        assert!(!outcome.is_reply());
        assert_eq!(outcome.rtt(), None);
        assert_eq!(outcome.hop_count(), None);
        assert_eq!(outcome.to_string(), "192.0.2.33: icmp_seq=2 timeout");
    }

    #[test]
    fn test_error_reason_text() {
        let reason = ErrorReason {
            kind: IcmpErrorKind::DestinationUnreachable,
            code: 1,
            reporter: IpAddr::V4(Ipv4Addr::new(10, 0, 0, 1)),
        };
        assert_eq!(
            reason.to_string(),
            "Destination host unreachable (from 10.0.0.1)"
        );

        let reason = ErrorReason {
            kind: IcmpErrorKind::TimeExceeded,
            code: 0,
            reporter: IpAddr::V6(Ipv6Addr::LOCALHOST),
        };
        assert_eq!(reason.description(), "Hop limit exceeded in transit");

        let reason = ErrorReason {
            kind: IcmpErrorKind::DestinationUnreachable,
            code: 99,
            reporter: IpAddr::V4(Ipv4Addr::LOCALHOST),
        };
        assert_eq!(reason.description(), "Destination unreachable");
    }
}
