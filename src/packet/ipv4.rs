use pnet_packet::ipv4::Ipv4Packet;
use std::net::Ipv4Addr;

pub const IPV4_HEADER_LEN: usize = 20;

/// IPv4 header fields the codec cares about, plus the bytes after it.
pub(crate) struct Ipv4Header<'a> {
    pub ttl: u8,
    pub destination: Ipv4Addr,
    pub body: &'a [u8],
}

impl<'a> Ipv4Header<'a> {
    /// Splits off the header. The total length field is ignored: some
    /// platforms hand it over in host byte order or without the header.
    pub fn parse(buf: &'a [u8]) -> Option<Self> {
        let packet = Ipv4Packet::new(buf)?;
        if packet.get_version() != 4 {
            return None;
        }
        let header_len = packet.get_header_length() as usize * 4;
        if header_len < IPV4_HEADER_LEN || header_len > buf.len() {
            return None;
        }
        Some(Ipv4Header {
            ttl: packet.get_ttl(),
            destination: packet.get_destination(),
            body: &buf[header_len..],
        })
    }
}

/// Wraps `payload` in an IPv4 header carrying ICMP.
#[cfg(test)]
pub(crate) fn build_ipv4_packet(
    src_ip: Ipv4Addr,
    dst_ip: Ipv4Addr,
    ttl: u8,
    payload: &[u8],
) -> Vec<u8> {
    use pnet_packet::ip::IpNextHeaderProtocols;
    use pnet_packet::ipv4::MutableIpv4Packet;

    let mut buf = vec![0u8; IPV4_HEADER_LEN + payload.len()];
    let mut ipv4_packet = MutableIpv4Packet::new(&mut buf).unwrap();
    ipv4_packet.set_version(4);
    ipv4_packet.set_header_length(5);
    ipv4_packet.set_total_length((IPV4_HEADER_LEN + payload.len()) as u16);
    ipv4_packet.set_identification(rand::random::<u16>());
    ipv4_packet.set_ttl(ttl);
    ipv4_packet.set_next_level_protocol(IpNextHeaderProtocols::Icmp);
    ipv4_packet.set_source(src_ip);
    ipv4_packet.set_destination(dst_ip);
    ipv4_packet.set_payload(payload);
    let checksum = pnet_packet::ipv4::checksum(&ipv4_packet.to_immutable());
    ipv4_packet.set_checksum(checksum);
    buf
}
