use pnet_packet::ip::IpNextHeaderProtocols;
use pnet_packet::ipv6::Ipv6Packet;
use std::net::Ipv6Addr;

pub const IPV6_HEADER_LEN: usize = 40;

/// Fixed IPv6 header quoted inside an ICMPv6 error, with the bytes after it.
pub(crate) struct QuotedIpv6<'a> {
    pub destination: Ipv6Addr,
    pub body: &'a [u8],
}

impl<'a> QuotedIpv6<'a> {
    /// Only headers directly followed by ICMPv6 are accepted; echo requests
    /// sent by this crate never carry extension headers.
    pub fn parse(buf: &'a [u8]) -> Option<Self> {
        if buf.len() < IPV6_HEADER_LEN {
            return None;
        }
        let packet = Ipv6Packet::new(buf)?;
        if packet.get_version() != 6 || packet.get_next_header() != IpNextHeaderProtocols::Icmpv6 {
            return None;
        }
        Some(QuotedIpv6 {
            destination: packet.get_destination(),
            body: &buf[IPV6_HEADER_LEN..],
        })
    }
}

#[cfg(test)]
pub(crate) fn build_ipv6_packet(src_ip: Ipv6Addr, dst_ip: Ipv6Addr, payload: &[u8]) -> Vec<u8> {
    use pnet_packet::ipv6::MutableIpv6Packet;

    let mut buf = vec![0u8; IPV6_HEADER_LEN + payload.len()];
    let mut ipv6_packet = MutableIpv6Packet::new(&mut buf).unwrap();
    ipv6_packet.set_version(6);
    ipv6_packet.set_payload_length(payload.len() as u16);
    ipv6_packet.set_next_header(IpNextHeaderProtocols::Icmpv6);
    ipv6_packet.set_hop_limit(64);
    ipv6_packet.set_source(src_ip);
    ipv6_packet.set_destination(dst_ip);
    ipv6_packet.set_payload(payload);
    buf
}
