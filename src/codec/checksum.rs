//! Internet checksum (RFC 1071) and the TCP/UDP pseudo-header variants.

use std::net::Ipv4Addr;

use super::IpProtocol;
use super::ipv4::Ipv4Header;
use super::tcp::{TcpHeader, encode_header};
use super::udp::UdpHeader;

/// Running one's-complement sum over big-endian 16-bit words.
#[derive(Debug, Default, Clone, Copy)]
pub struct Checksum {
    sum: u32,
}

impl Checksum {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add bytes as big-endian words. An odd trailing byte is padded with zero.
    ///
    /// Callers must feed even-length chunks except for the final one.
    pub fn add_bytes(&mut self, bytes: &[u8]) {
        let mut chunks = bytes.chunks_exact(2);
        for pair in &mut chunks {
            self.sum = self.sum.wrapping_add(u16::from_be_bytes([pair[0], pair[1]]) as u32);
        }
        if let [last] = chunks.remainder() {
            self.sum = self.sum.wrapping_add((*last as u32) << 8);
        }
    }

    pub fn add_u16(&mut self, value: u16) {
        self.sum = self.sum.wrapping_add(value as u32);
    }

    /// Fold carries twice and take the one's complement.
    pub fn finish(self) -> u16 {
        let mut sum = self.sum;
        sum = (sum & 0xFFFF) + (sum >> 16);
        sum = (sum & 0xFFFF) + (sum >> 16);
        !(sum as u16)
    }
}

/// Checksum of a contiguous buffer, as used by the IPv4 header and ICMP.
pub fn internet_checksum(bytes: &[u8]) -> u16 {
    let mut checksum = Checksum::new();
    checksum.add_bytes(bytes);
    checksum.finish()
}

fn pseudo_header(
    checksum: &mut Checksum,
    source: Ipv4Addr,
    destination: Ipv4Addr,
    protocol: IpProtocol,
    length: u16,
) {
    checksum.add_bytes(&source.octets());
    checksum.add_bytes(&destination.octets());
    checksum.add_u16(protocol.as_u8() as u16);
    checksum.add_u16(length);
}

/// TCP checksum over pseudo-header, header (checksum field zeroed) and payload.
pub fn compute_tcp_checksum(header: &TcpHeader, ip: &Ipv4Header, payload: &[u8]) -> u16 {
    let mut bytes = encode_header(header);
    bytes[16] = 0;
    bytes[17] = 0;
    let segment_len = (bytes.len() + payload.len()) as u16;

    let mut checksum = Checksum::new();
    pseudo_header(&mut checksum, ip.source, ip.destination, IpProtocol::Tcp, segment_len);
    checksum.add_bytes(&bytes);
    checksum.add_bytes(payload);
    checksum.finish()
}

/// UDP checksum. A computed zero is transmitted as `0xFFFF`.
pub fn compute_udp_checksum(header: &UdpHeader, ip: &Ipv4Header, payload: &[u8]) -> u16 {
    let length = (UdpHeader::LEN + payload.len()) as u16;

    let mut checksum = Checksum::new();
    pseudo_header(&mut checksum, ip.source, ip.destination, IpProtocol::Udp, length);
    checksum.add_u16(header.source_port);
    checksum.add_u16(header.destination_port);
    checksum.add_u16(length);
    checksum.add_bytes(payload);
    match checksum.finish() {
        0 => 0xFFFF,
        value => value,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rfc1071_example() {
        // Sample words from RFC 1071 section 3.
        let data = [0x00, 0x01, 0xf2, 0x03, 0xf4, 0xf5, 0xf6, 0xf7];
        assert_eq!(internet_checksum(&data), !0xddf2);
    }

    #[test]
    fn odd_length_pads_low_byte() {
        assert_eq!(internet_checksum(&[0xab]), !0xab00);
    }

    #[test]
    fn buffer_with_its_checksum_sums_to_zero() {
        let mut header = [
            0x45, 0x00, 0x00, 0x73, 0x00, 0x00, 0x40, 0x00, 0x40, 0x11, 0x00, 0x00, 0xc0, 0xa8,
            0x00, 0x01, 0xc0, 0xa8, 0x00, 0xc7,
        ];
        let value = internet_checksum(&header);
        assert_eq!(value, 0xb861);
        header[10..12].copy_from_slice(&value.to_be_bytes());
        assert_eq!(internet_checksum(&header), 0);
    }
}
