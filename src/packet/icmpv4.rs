use super::ipv4::Ipv4Header;
use super::{
    icmp_checksum, read_u16, EchoKind, EncodeError, ParsedMessage, QuotedEcho, ICMP_HEADER_LEN,
};
use pnet_packet::icmp::echo_reply::{EchoReplyPacket, MutableEchoReplyPacket};
use pnet_packet::icmp::echo_request::MutableEchoRequestPacket;
use pnet_packet::icmp::{IcmpCode, IcmpPacket, IcmpTypes};
use pnet_packet::Packet;
use std::net::IpAddr;

pub(super) fn build_echo_packet(
    kind: EchoKind,
    identifier: u16,
    sequence: u16,
    payload: &[u8],
) -> Result<Vec<u8>, EncodeError> {
    let mut buf = vec![0u8; ICMP_HEADER_LEN + payload.len()];
    match kind {
        EchoKind::Request => {
            let mut icmp_packet =
                MutableEchoRequestPacket::new(&mut buf).ok_or(EncodeError::BufferTooSmall)?;
            icmp_packet.set_icmp_type(IcmpTypes::EchoRequest);
            icmp_packet.set_icmp_code(IcmpCode::new(0));
            icmp_packet.set_identifier(identifier);
            icmp_packet.set_sequence_number(sequence);
            icmp_packet.set_payload(payload);
            let icmp_checksum = icmp_checksum(icmp_packet.packet());
            icmp_packet.set_checksum(icmp_checksum);
        }
        EchoKind::Reply => {
            let mut icmp_packet =
                MutableEchoReplyPacket::new(&mut buf).ok_or(EncodeError::BufferTooSmall)?;
            icmp_packet.set_icmp_type(IcmpTypes::EchoReply);
            icmp_packet.set_icmp_code(IcmpCode::new(0));
            icmp_packet.set_identifier(identifier);
            icmp_packet.set_sequence_number(sequence);
            icmp_packet.set_payload(payload);
            let icmp_checksum = icmp_checksum(icmp_packet.packet());
            icmp_packet.set_checksum(icmp_checksum);
        }
    }
    Ok(buf)
}

pub(super) fn parse(buf: &[u8], ttl: Option<u8>) -> ParsedMessage {
    if buf.len() < ICMP_HEADER_LEN {
        return ParsedMessage::Malformed;
    }
    let icmp = match IcmpPacket::new(buf) {
        Some(icmp) => icmp,
        None => return ParsedMessage::Malformed,
    };
    if icmp_checksum(buf) != icmp.get_checksum() {
        return ParsedMessage::Malformed;
    }

    let code = icmp.get_icmp_code().0;
    match icmp.get_icmp_type() {
        IcmpTypes::EchoReply => match EchoReplyPacket::new(buf) {
            Some(reply) => ParsedMessage::EchoReply {
                identifier: reply.get_identifier(),
                sequence: reply.get_sequence_number(),
                payload: reply.payload().to_vec(),
                ttl,
            },
            None => ParsedMessage::Malformed,
        },
        IcmpTypes::EchoRequest => match (read_u16(buf, 4), read_u16(buf, 6)) {
            (Some(identifier), Some(sequence)) => ParsedMessage::EchoRequest {
                identifier,
                sequence,
            },
            _ => ParsedMessage::Malformed,
        },
        IcmpTypes::DestinationUnreachable => ParsedMessage::Unreachable {
            code,
            original: quoted_echo(&buf[ICMP_HEADER_LEN..]),
        },
        IcmpTypes::TimeExceeded => ParsedMessage::TimeExceeded {
            code,
            original: quoted_echo(&buf[ICMP_HEADER_LEN..]),
        },
        other => ParsedMessage::Other {
            icmp_type: other.0,
            code,
        },
    }
}

/// Error messages carry the offending IPv4 header and at least the first
/// eight bytes of its payload, which is enough for identifier and sequence.
fn quoted_echo(body: &[u8]) -> Option<QuotedEcho> {
    let header = Ipv4Header::parse(body)?;
    let inner = header.body;
    if inner.first() != Some(&IcmpTypes::EchoRequest.0) {
        return None;
    }
    Some(QuotedEcho {
        identifier: read_u16(inner, 4)?,
        sequence: read_u16(inner, 6)?,
        destination: IpAddr::V4(header.destination),
    })
}
