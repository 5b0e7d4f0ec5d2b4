//! ICMP echo packet codec.
//!
//! Encoding produces a complete ICMP (or ICMPv6) echo message with its
//! checksum filled in. Decoding takes whatever the socket handed over and
//! classifies it; it never fails, because a raw socket sees every ICMP
//! message that reaches the host and most of them are not ours.

mod icmpv4;
mod icmpv6;
mod ipv4;
mod ipv6;

#[cfg(test)]
pub(crate) use ipv4::build_ipv4_packet;

use crate::socket::SocketFamily;
use std::net::{IpAddr, Ipv6Addr};
use std::time::{SystemTime, UNIX_EPOCH};

/// ICMP header size (type, code, checksum, identifier, sequence).
pub const ICMP_HEADER_LEN: usize = 8;
/// Payload size used by the classic `ping` tool.
pub const DEFAULT_PAYLOAD_SIZE: usize = 56;
/// Largest payload that fits an IPv4 datagram.
pub const MAX_PAYLOAD_SIZE: usize = 65_535 - ipv4::IPV4_HEADER_LEN - ICMP_HEADER_LEN;
/// Identifier, sequence and microsecond stamp at the front of the payload.
pub const PAYLOAD_STAMP_LEN: usize = 12;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum EncodeError {
    #[error("{addr} does not belong to the {family:?} family")]
    FamilyMismatch { family: SocketFamily, addr: IpAddr },
    #[error("payload of {0} bytes exceeds the ICMP maximum")]
    PayloadTooLarge(usize),
    #[error("packet buffer too small")]
    BufferTooSmall,
}

/// Echo message direction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EchoKind {
    Request,
    Reply,
}

/// Echo request embedded in an ICMP error message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QuotedEcho {
    pub identifier: u16,
    pub sequence: u16,
    /// Destination of the datagram that triggered the error.
    pub destination: IpAddr,
}

/// Classification of one received ICMP message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ParsedMessage {
    EchoReply {
        identifier: u16,
        sequence: u16,
        payload: Vec<u8>,
        /// TTL of the carrying IPv4 header, when the socket exposes it.
        ttl: Option<u8>,
    },
    /// Someone's echo request, possibly our own looped back.
    EchoRequest { identifier: u16, sequence: u16 },
    Unreachable {
        code: u8,
        original: Option<QuotedEcho>,
    },
    TimeExceeded {
        code: u8,
        original: Option<QuotedEcho>,
    },
    Other { icmp_type: u8, code: u8 },
    /// Truncated, mis-framed or failed the checksum.
    Malformed,
}

/// What the decoder needs to know about the socket a datagram came from.
#[derive(Debug, Clone, Copy)]
pub struct DecodeContext {
    pub family: SocketFamily,
    /// Datagrams start with an IPv4 header that must be stripped.
    pub has_ip_header: bool,
    /// Local address replies are sent to. ICMPv6 checksums are only
    /// verified when this is known; the kernel has checked them otherwise.
    pub local_addr: Option<IpAddr>,
}

impl DecodeContext {
    pub fn new(family: SocketFamily, has_ip_header: bool) -> Self {
        Self {
            family,
            has_ip_header,
            local_addr: None,
        }
    }
}

/// Internet checksum of an ICMPv4 message, skipping its checksum field.
pub fn icmp_checksum(packet: &[u8]) -> u16 {
    pnet_packet::util::checksum(packet, 1)
}

/// ICMPv6 checksum including the IPv6 pseudo-header.
pub fn icmpv6_checksum(packet: &[u8], source: &Ipv6Addr, destination: &Ipv6Addr) -> u16 {
    pnet_packet::util::ipv6_checksum(
        packet,
        1,
        &[],
        source,
        destination,
        pnet_packet::ip::IpNextHeaderProtocols::Icmpv6,
    )
}

/// Builds an echo request.
///
/// For ICMPv6 the checksum needs the `(source, destination)` pair; without
/// it the checksum field is left zero and the kernel fills it in, which
/// Linux does for every ICMPv6 socket.
pub fn encode_echo_request(
    identifier: u16,
    sequence: u16,
    payload: &[u8],
    family: SocketFamily,
    pseudo_header: Option<(IpAddr, IpAddr)>,
) -> Result<Vec<u8>, EncodeError> {
    encode_echo(EchoKind::Request, identifier, sequence, payload, family, pseudo_header)
}

/// Builds an echo reply. Mostly useful for answering requests in tests.
pub fn encode_echo_reply(
    identifier: u16,
    sequence: u16,
    payload: &[u8],
    family: SocketFamily,
    pseudo_header: Option<(IpAddr, IpAddr)>,
) -> Result<Vec<u8>, EncodeError> {
    encode_echo(EchoKind::Reply, identifier, sequence, payload, family, pseudo_header)
}

fn encode_echo(
    kind: EchoKind,
    identifier: u16,
    sequence: u16,
    payload: &[u8],
    family: SocketFamily,
    pseudo_header: Option<(IpAddr, IpAddr)>,
) -> Result<Vec<u8>, EncodeError> {
    if payload.len() > MAX_PAYLOAD_SIZE {
        return Err(EncodeError::PayloadTooLarge(payload.len()));
    }
    match family {
        SocketFamily::Ipv4 => {
            if let Some((src, dst)) = pseudo_header {
                check_family(family, src)?;
                check_family(family, dst)?;
            }
            icmpv4::build_echo_packet(kind, identifier, sequence, payload)
        }
        SocketFamily::Ipv6 => {
            let addrs = match pseudo_header {
                Some((IpAddr::V6(src), IpAddr::V6(dst))) => Some((src, dst)),
                Some((src, dst)) => {
                    check_family(family, src)?;
                    check_family(family, dst)?;
                    None
                }
                None => None,
            };
            icmpv6::build_echo_packet(kind, identifier, sequence, payload, addrs)
        }
    }
}

fn check_family(family: SocketFamily, addr: IpAddr) -> Result<(), EncodeError> {
    if SocketFamily::from_ip(&addr) == family {
        Ok(())
    } else {
        Err(EncodeError::FamilyMismatch { family, addr })
    }
}

/// Classifies a datagram received from `peer`.
pub fn decode_incoming(raw: &[u8], peer: IpAddr, ctx: &DecodeContext) -> ParsedMessage {
    match ctx.family {
        SocketFamily::Ipv4 => {
            if ctx.has_ip_header {
                match ipv4::Ipv4Header::parse(raw) {
                    Some(header) => icmpv4::parse(header.body, Some(header.ttl)),
                    None => ParsedMessage::Malformed,
                }
            } else {
                icmpv4::parse(raw, None)
            }
        }
        SocketFamily::Ipv6 => {
            let addrs = match (peer, ctx.local_addr) {
                (IpAddr::V6(src), Some(IpAddr::V6(dst))) => Some((src, dst)),
                _ => None,
            };
            icmpv6::parse(raw, addrs)
        }
    }
}

/// Builds an echo payload of `size` bytes.
///
/// Identifier and sequence go first (some kernels rewrite the header
/// identifier on datagram sockets), then a wall-clock stamp in
/// microseconds, then a counting pattern.
pub fn build_payload(identifier: u16, sequence: u16, size: usize) -> Vec<u8> {
    let micros = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_micros() as u64)
        .unwrap_or(0);
    let mut stamp = [0u8; PAYLOAD_STAMP_LEN];
    stamp[0..2].copy_from_slice(&identifier.to_be_bytes());
    stamp[2..4].copy_from_slice(&sequence.to_be_bytes());
    stamp[4..12].copy_from_slice(&micros.to_be_bytes());

    let mut payload = vec![0u8; size];
    let head = size.min(PAYLOAD_STAMP_LEN);
    payload[..head].copy_from_slice(&stamp[..head]);
    for (i, byte) in payload[head..].iter_mut().enumerate() {
        *byte = (i & 0xFF) as u8;
    }
    payload
}

pub(crate) fn read_u16(buf: &[u8], offset: usize) -> Option<u16> {
    let bytes = buf.get(offset..offset + 2)?;
    Some(u16::from_be_bytes([bytes[0], bytes[1]]))
}
