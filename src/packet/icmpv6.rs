use super::ipv6::QuotedIpv6;
use super::{
    icmpv6_checksum, read_u16, EchoKind, EncodeError, ParsedMessage, QuotedEcho, ICMP_HEADER_LEN,
};
use pnet_packet::icmpv6::{Icmpv6Code, Icmpv6Packet, Icmpv6Types, MutableIcmpv6Packet};
use pnet_packet::Packet;
use std::net::{IpAddr, Ipv6Addr};

pub(super) fn build_echo_packet(
    kind: EchoKind,
    identifier: u16,
    sequence: u16,
    payload: &[u8],
    addrs: Option<(Ipv6Addr, Ipv6Addr)>,
) -> Result<Vec<u8>, EncodeError> {
    let mut buf = vec![0u8; ICMP_HEADER_LEN + payload.len()];
    let mut icmp_packet = MutableIcmpv6Packet::new(&mut buf).ok_or(EncodeError::BufferTooSmall)?;
    icmp_packet.set_icmpv6_type(match kind {
        EchoKind::Request => Icmpv6Types::EchoRequest,
        EchoKind::Reply => Icmpv6Types::EchoReply,
    });
    icmp_packet.set_icmpv6_code(Icmpv6Code::new(0));

    // Identifier and sequence open the ICMPv6 message body.
    let mut body = Vec::with_capacity(4 + payload.len());
    body.extend_from_slice(&identifier.to_be_bytes());
    body.extend_from_slice(&sequence.to_be_bytes());
    body.extend_from_slice(payload);
    icmp_packet.set_payload(&body);

    if let Some((src, dst)) = addrs {
        let icmp_check_sum = icmpv6_checksum(icmp_packet.packet(), &src, &dst);
        icmp_packet.set_checksum(icmp_check_sum);
    }
    Ok(buf)
}

pub(super) fn parse(buf: &[u8], addrs: Option<(Ipv6Addr, Ipv6Addr)>) -> ParsedMessage {
    if buf.len() < ICMP_HEADER_LEN {
        return ParsedMessage::Malformed;
    }
    let icmp = match Icmpv6Packet::new(buf) {
        Some(icmp) => icmp,
        None => return ParsedMessage::Malformed,
    };
    if let Some((src, dst)) = addrs {
        if icmpv6_checksum(buf, &src, &dst) != icmp.get_checksum() {
            return ParsedMessage::Malformed;
        }
    }

    let code = icmp.get_icmpv6_code().0;
    let (identifier, sequence) = match (read_u16(buf, 4), read_u16(buf, 6)) {
        (Some(identifier), Some(sequence)) => (identifier, sequence),
        _ => return ParsedMessage::Malformed,
    };
    match icmp.get_icmpv6_type() {
        Icmpv6Types::EchoReply => ParsedMessage::EchoReply {
            identifier,
            sequence,
            payload: buf[ICMP_HEADER_LEN..].to_vec(),
            ttl: None,
        },
        Icmpv6Types::EchoRequest => ParsedMessage::EchoRequest {
            identifier,
            sequence,
        },
        Icmpv6Types::DestinationUnreachable => ParsedMessage::Unreachable {
            code,
            original: quoted_echo(&buf[ICMP_HEADER_LEN..]),
        },
        Icmpv6Types::TimeExceeded => ParsedMessage::TimeExceeded {
            code,
            original: quoted_echo(&buf[ICMP_HEADER_LEN..]),
        },
        other => ParsedMessage::Other {
            icmp_type: other.0,
            code,
        },
    }
}

fn quoted_echo(body: &[u8]) -> Option<QuotedEcho> {
    let quoted = QuotedIpv6::parse(body)?;
    let inner = quoted.body;
    if inner.first() != Some(&Icmpv6Types::EchoRequest.0) {
        return None;
    }
    Some(QuotedEcho {
        identifier: read_u16(inner, 4)?,
        sequence: read_u16(inner, 6)?,
        destination: IpAddr::V6(quoted.destination),
    })
}
