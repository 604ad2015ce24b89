//! IPv4 header (RFC 791).

use std::net::Ipv4Addr;

use super::checksum::internet_checksum;
use super::{IpProtocol, ParseError, read_u16};

pub const MIN_HEADER_LEN: usize = 20;
const MAX_HEADER_LEN: usize = 60;

/// Flag bit: don't fragment.
pub const FLAG_DONT_FRAGMENT: u8 = 0b010;
/// Flag bit: more fragments.
pub const FLAG_MORE_FRAGMENTS: u8 = 0b001;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Ipv4Header {
    pub version: u8,
    /// Header length in bytes, options included.
    pub header_length: u8,
    /// DSCP and ECN bits (former type-of-service byte).
    pub type_of_service: u8,
    pub total_length: u16,
    pub identification: u16,
    pub flags: u8,
    pub fragment_offset: u16,
    pub ttl: u8,
    pub protocol: IpProtocol,
    pub header_checksum: u16,
    pub source: Ipv4Addr,
    pub destination: Ipv4Addr,
    pub options: Vec<u8>,
}

/// A parsed IPv4 header plus the payload it announces.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Ipv4Packet<'a> {
    pub header: Ipv4Header,
    pub payload: &'a [u8],
}

/// Parse an IPv4 packet.
///
/// Fails when fewer than 20 bytes are available or the declared header and
/// total lengths disagree with the buffer.
pub fn parse_ipv4(data: &[u8]) -> Result<Ipv4Packet<'_>, ParseError> {
    if data.len() < MIN_HEADER_LEN {
        return Err(ParseError::Truncated("ipv4 base header"));
    }
    let version = data[0] >> 4;
    if version != 4 {
        return Err(ParseError::Invalid("ipv4 version"));
    }
    let header_length = ((data[0] & 0x0F) as usize) * 4;
    if header_length < MIN_HEADER_LEN {
        return Err(ParseError::Invalid("ipv4 ihl too small"));
    }
    if data.len() < header_length {
        return Err(ParseError::Truncated("ipv4 header with options"));
    }
    let total_length = read_u16(&data[2..4]);
    let total = total_length as usize;
    if total < header_length {
        return Err(ParseError::Invalid("ipv4 total length smaller than header"));
    }
    if data.len() < total {
        return Err(ParseError::Truncated("ipv4 total length"));
    }

    let flags_fragment = read_u16(&data[6..8]);
    let header = Ipv4Header {
        version,
        header_length: header_length as u8,
        type_of_service: data[1],
        total_length,
        identification: read_u16(&data[4..6]),
        flags: (flags_fragment >> 13) as u8,
        fragment_offset: flags_fragment & 0x1FFF,
        ttl: data[8],
        protocol: IpProtocol::from_raw(data[9]),
        header_checksum: read_u16(&data[10..12]),
        source: Ipv4Addr::new(data[12], data[13], data[14], data[15]),
        destination: Ipv4Addr::new(data[16], data[17], data[18], data[19]),
        options: data[MIN_HEADER_LEN..header_length].to_vec(),
    };

    Ok(Ipv4Packet {
        header,
        payload: &data[header_length..total],
    })
}

impl Ipv4Header {
    /// A bare 20-byte header, as used for synthesised replies.
    pub fn new(source: Ipv4Addr, destination: Ipv4Addr, protocol: IpProtocol, payload_len: usize) -> Self {
        Self {
            version: 4,
            header_length: MIN_HEADER_LEN as u8,
            type_of_service: 0,
            total_length: (MIN_HEADER_LEN + payload_len) as u16,
            identification: 0,
            flags: FLAG_DONT_FRAGMENT,
            fragment_offset: 0,
            ttl: 64,
            protocol,
            header_checksum: 0,
            source,
            destination,
            options: Vec::new(),
        }
    }

    /// True for every fragment but the first, which carry no transport header.
    pub fn is_trailing_fragment(&self) -> bool {
        self.fragment_offset != 0
    }

    /// Validate the stored checksum against the header bytes.
    pub fn checksum_valid(&self) -> bool {
        let mut bytes = self.encode_unchecked();
        bytes[10..12].copy_from_slice(&self.header_checksum.to_be_bytes());
        internet_checksum(&bytes) == 0
    }

    /// Emit the header in wire format.
    ///
    /// Options are zero-padded to a 4-byte boundary (truncated past 40 bytes);
    /// header length and checksum are recomputed, and `header_length` /
    /// `header_checksum` on `self` are ignored.
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut bytes = self.encode_unchecked();
        let checksum = internet_checksum(&bytes);
        bytes[10..12].copy_from_slice(&checksum.to_be_bytes());
        bytes
    }

    fn encode_unchecked(&self) -> Vec<u8> {
        let options_len = self.options.len().min(MAX_HEADER_LEN - MIN_HEADER_LEN);
        let header_len = MIN_HEADER_LEN + options_len.div_ceil(4) * 4;

        let mut bytes = Vec::with_capacity(header_len);
        bytes.push(0x40 | (header_len / 4) as u8);
        bytes.push(self.type_of_service);
        bytes.extend_from_slice(&self.total_length.to_be_bytes());
        bytes.extend_from_slice(&self.identification.to_be_bytes());
        let flags_fragment = ((self.flags as u16 & 0x07) << 13) | (self.fragment_offset & 0x1FFF);
        bytes.extend_from_slice(&flags_fragment.to_be_bytes());
        bytes.push(self.ttl);
        bytes.push(self.protocol.as_u8());
        bytes.extend_from_slice(&[0, 0]);
        bytes.extend_from_slice(&self.source.octets());
        bytes.extend_from_slice(&self.destination.octets());
        bytes.extend_from_slice(&self.options[..options_len]);
        bytes.resize(header_len, 0);
        bytes
    }
}
