//! UDP header (RFC 768).

use super::{ParseError, read_u16};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UdpHeader {
    pub source_port: u16,
    pub destination_port: u16,
    pub length: u16,
    pub checksum: u16,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UdpDatagram<'a> {
    pub header: UdpHeader,
    pub payload: &'a [u8],
}

impl UdpHeader {
    pub const LEN: usize = 8;

    pub fn to_bytes(&self) -> [u8; Self::LEN] {
        let mut out = [0u8; Self::LEN];
        out[0..2].copy_from_slice(&self.source_port.to_be_bytes());
        out[2..4].copy_from_slice(&self.destination_port.to_be_bytes());
        out[4..6].copy_from_slice(&self.length.to_be_bytes());
        out[6..8].copy_from_slice(&self.checksum.to_be_bytes());
        out
    }
}

/// Parse a UDP datagram. The payload is bounded by the declared length.
pub fn parse_udp(data: &[u8]) -> Result<UdpDatagram<'_>, ParseError> {
    if data.len() < UdpHeader::LEN {
        return Err(ParseError::Truncated("udp header"));
    }
    let length = read_u16(&data[4..6]);
    if (length as usize) < UdpHeader::LEN {
        return Err(ParseError::Invalid("udp length too small"));
    }
    if data.len() < length as usize {
        return Err(ParseError::Truncated("udp payload"));
    }

    Ok(UdpDatagram {
        header: UdpHeader {
            source_port: read_u16(&data[0..2]),
            destination_port: read_u16(&data[2..4]),
            length,
            checksum: read_u16(&data[6..8]),
        },
        payload: &data[UdpHeader::LEN..length as usize],
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::checksum::{Checksum, compute_udp_checksum};
    use crate::codec::{IpProtocol, Ipv4Header};
    use std::net::Ipv4Addr;

    #[test]
    fn parse_dns_datagram() {
        let data = [0xd4, 0x31, 0x00, 0x35, 0x00, 0x0c, 0x12, 0x34, 1, 2, 3, 4, 5, 6];
        let datagram = parse_udp(&data).unwrap();
        assert_eq!(datagram.header.source_port, 54321);
        assert_eq!(datagram.header.destination_port, 53);
        assert_eq!(datagram.header.checksum, 0x1234);
        assert_eq!(datagram.payload, &[1, 2, 3, 4]);
        assert_eq!(datagram.header.to_bytes(), data[..8]);
    }

    #[test]
    fn rejects_bad_lengths() {
        assert!(matches!(parse_udp(&[0u8; 6]), Err(ParseError::Truncated(_))));
        let short = [0x00, 0x50, 0x00, 0x50, 0x00, 0x07, 0x00, 0x00];
        assert!(matches!(parse_udp(&short), Err(ParseError::Invalid(_))));
        let long = [0x00, 0x50, 0x00, 0x50, 0x00, 0x20, 0x00, 0x00];
        assert!(matches!(parse_udp(&long), Err(ParseError::Truncated(_))));
    }

    #[test]
    fn checksum_verifies() {
        let payload = b"abc";
        let ip = Ipv4Header::new(
            Ipv4Addr::new(10, 0, 0, 2),
            Ipv4Addr::new(1, 1, 1, 1),
            IpProtocol::Udp,
            UdpHeader::LEN + payload.len(),
        );
        let mut header = UdpHeader {
            source_port: 4000,
            destination_port: 53,
            length: (UdpHeader::LEN + payload.len()) as u16,
            checksum: 0,
        };
        header.checksum = compute_udp_checksum(&header, &ip, payload);

        let mut sum = Checksum::new();
        sum.add_bytes(&ip.source.octets());
        sum.add_bytes(&ip.destination.octets());
        sum.add_u16(17);
        sum.add_u16(header.length);
        sum.add_bytes(&header.to_bytes());
        sum.add_bytes(payload);
        assert_eq!(sum.finish(), 0);
    }
}
