//! ICMP messages (RFC 792).

use super::checksum::internet_checksum;
use super::{ParseError, read_u16, read_u32};

const HEADER_LEN: usize = 8;

pub const TYPE_ECHO_REPLY: u8 = 0;
pub const TYPE_ECHO_REQUEST: u8 = 8;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IcmpPacket<'a> {
    pub icmp_type: u8,
    pub code: u8,
    pub checksum: u16,
    /// Type-specific second word (identifier/sequence for echo).
    pub rest_of_header: u32,
    pub payload: &'a [u8],
}

pub fn parse_icmp(data: &[u8]) -> Result<IcmpPacket<'_>, ParseError> {
    if data.len() < HEADER_LEN {
        return Err(ParseError::Truncated("icmp header"));
    }
    Ok(IcmpPacket {
        icmp_type: data[0],
        code: data[1],
        checksum: read_u16(&data[2..4]),
        rest_of_header: read_u32(&data[4..8]),
        payload: &data[HEADER_LEN..],
    })
}

impl IcmpPacket<'_> {
    /// Emit the message with a freshly computed checksum.
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(HEADER_LEN + self.payload.len());
        out.push(self.icmp_type);
        out.push(self.code);
        out.extend_from_slice(&[0, 0]);
        out.extend_from_slice(&self.rest_of_header.to_be_bytes());
        out.extend_from_slice(self.payload);
        let checksum = internet_checksum(&out);
        out[2..4].copy_from_slice(&checksum.to_be_bytes());
        out
    }
}
