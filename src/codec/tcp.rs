//! TCP header with options (RFC 793, RFC 7323, RFC 2018).

use super::{EncodeError, ParseError, read_u16, read_u32};

pub const MIN_HEADER_LEN: usize = 20;
const MAX_HEADER_LEN: usize = 60;
const MIN_DATA_OFFSET: u8 = 5;
const MAX_DATA_OFFSET: u8 = 15;

const KIND_END: u8 = 0;
const KIND_NOP: u8 = 1;
const KIND_MSS: u8 = 2;
const KIND_WINDOW_SCALE: u8 = 3;
const KIND_SACK_PERMITTED: u8 = 4;
const KIND_TIMESTAMP: u8 = 8;

/// Control bits from byte 13 of the header.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct TcpFlags(u8);

impl TcpFlags {
    pub const FIN: TcpFlags = TcpFlags(0x01);
    pub const SYN: TcpFlags = TcpFlags(0x02);
    pub const RST: TcpFlags = TcpFlags(0x04);
    pub const PSH: TcpFlags = TcpFlags(0x08);
    pub const ACK: TcpFlags = TcpFlags(0x10);
    pub const URG: TcpFlags = TcpFlags(0x20);
    pub const ECE: TcpFlags = TcpFlags(0x40);
    pub const CWR: TcpFlags = TcpFlags(0x80);

    pub const fn from_bits(bits: u8) -> Self {
        TcpFlags(bits)
    }

    pub const fn bits(self) -> u8 {
        self.0
    }

    pub const fn contains(self, other: TcpFlags) -> bool {
        self.0 & other.0 == other.0
    }
}

impl std::ops::BitOr for TcpFlags {
    type Output = TcpFlags;

    fn bitor(self, rhs: TcpFlags) -> TcpFlags {
        TcpFlags(self.0 | rhs.0)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TcpOption {
    EndOfOptionList,
    NoOperation,
    MaximumSegmentSize(u16),
    WindowScale(u8),
    SackPermitted,
    Timestamp { value: u32, echo_reply: u32 },
    /// Any other kind, or a known kind with an unexpected length.
    Unknown { kind: u8, data: Vec<u8> },
}

impl TcpOption {
    /// Encoded size in bytes.
    pub fn len(&self) -> usize {
        match self {
            TcpOption::EndOfOptionList | TcpOption::NoOperation => 1,
            TcpOption::MaximumSegmentSize(_) => 4,
            TcpOption::WindowScale(_) => 3,
            TcpOption::SackPermitted => 2,
            TcpOption::Timestamp { .. } => 10,
            TcpOption::Unknown { data, .. } => 2 + data.len(),
        }
    }

    fn encode(&self, out: &mut Vec<u8>) {
        match self {
            TcpOption::EndOfOptionList => out.push(KIND_END),
            TcpOption::NoOperation => out.push(KIND_NOP),
            TcpOption::MaximumSegmentSize(mss) => {
                out.extend_from_slice(&[KIND_MSS, 4]);
                out.extend_from_slice(&mss.to_be_bytes());
            }
            TcpOption::WindowScale(shift) => out.extend_from_slice(&[KIND_WINDOW_SCALE, 3, *shift]),
            TcpOption::SackPermitted => out.extend_from_slice(&[KIND_SACK_PERMITTED, 2]),
            TcpOption::Timestamp { value, echo_reply } => {
                out.extend_from_slice(&[KIND_TIMESTAMP, 10]);
                out.extend_from_slice(&value.to_be_bytes());
                out.extend_from_slice(&echo_reply.to_be_bytes());
            }
            TcpOption::Unknown { kind, data } => {
                out.push(*kind);
                out.push((data.len() + 2) as u8);
                out.extend_from_slice(data);
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TcpHeader {
    pub source_port: u16,
    pub destination_port: u16,
    pub sequence_number: u32,
    pub acknowledgement_number: u32,
    pub flags: TcpFlags,
    pub window_size: u16,
    pub checksum: u16,
    pub urgent_pointer: u16,
    pub options: Vec<TcpOption>,
}

/// A parsed TCP header plus the segment payload that follows it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TcpSegment<'a> {
    pub header: TcpHeader,
    /// Data offset declared on the wire, in 32-bit words.
    pub data_offset: u8,
    pub payload: &'a [u8],
}

impl TcpHeader {
    /// Header length in bytes once options are padded to a 4-byte boundary.
    pub fn header_len(&self) -> usize {
        let options: usize = self.options.iter().map(TcpOption::len).sum();
        MIN_HEADER_LEN + options.div_ceil(4) * 4
    }

    /// Data offset in 32-bit words derived from the option list.
    pub fn data_offset(&self) -> u8 {
        (self.header_len() / 4) as u8
    }
}

/// Parse a TCP segment.
///
/// Options are read left to right. An end-of-option-list terminates parsing;
/// whatever follows it up to the data offset is padding.
pub fn parse_tcp(data: &[u8]) -> Result<TcpSegment<'_>, ParseError> {
    if data.len() < MIN_HEADER_LEN {
        return Err(ParseError::Truncated("tcp base header"));
    }
    let data_offset = data[12] >> 4;
    if !(MIN_DATA_OFFSET..=MAX_DATA_OFFSET).contains(&data_offset) {
        return Err(ParseError::Invalid("tcp data offset"));
    }
    let header_len = data_offset as usize * 4;
    if data.len() < header_len {
        return Err(ParseError::Truncated("tcp header with options"));
    }

    let header = TcpHeader {
        source_port: read_u16(&data[0..2]),
        destination_port: read_u16(&data[2..4]),
        sequence_number: read_u32(&data[4..8]),
        acknowledgement_number: read_u32(&data[8..12]),
        flags: TcpFlags::from_bits(data[13]),
        window_size: read_u16(&data[14..16]),
        checksum: read_u16(&data[16..18]),
        urgent_pointer: read_u16(&data[18..20]),
        options: parse_options(&data[MIN_HEADER_LEN..header_len])?,
    };

    Ok(TcpSegment {
        header,
        data_offset,
        payload: &data[header_len..],
    })
}

fn parse_options(mut bytes: &[u8]) -> Result<Vec<TcpOption>, ParseError> {
    let mut options = Vec::new();
    let mut offset = MIN_HEADER_LEN;

    while let Some(&kind) = bytes.first() {
        match kind {
            KIND_END => {
                options.push(TcpOption::EndOfOptionList);
                break;
            }
            KIND_NOP => {
                options.push(TcpOption::NoOperation);
                bytes = &bytes[1..];
                offset += 1;
                continue;
            }
            _ => {}
        }

        let Some(&len) = bytes.get(1) else {
            return Err(ParseError::MalformedOption { kind, offset });
        };
        let len = len as usize;
        if len < 2 || len > bytes.len() {
            return Err(ParseError::MalformedOption { kind, offset });
        }
        let body = &bytes[2..len];

        let option = match (kind, len) {
            (KIND_MSS, 4) => TcpOption::MaximumSegmentSize(read_u16(body)),
            (KIND_WINDOW_SCALE, 3) => TcpOption::WindowScale(body[0]),
            (KIND_SACK_PERMITTED, 2) => TcpOption::SackPermitted,
            (KIND_TIMESTAMP, 10) => TcpOption::Timestamp {
                value: read_u32(&body[0..4]),
                echo_reply: read_u32(&body[4..8]),
            },
            _ => TcpOption::Unknown {
                kind,
                data: body.to_vec(),
            },
        };
        options.push(option);
        bytes = &bytes[len..];
        offset += len;
    }

    Ok(options)
}

/// Serialize a TCP header.
///
/// The data offset is recomputed from the option list, which is padded with
/// no-op options to a 4-byte boundary. The checksum field is written as is.
pub fn serialize_tcp(header: &TcpHeader) -> Result<Vec<u8>, EncodeError> {
    let len = header.header_len();
    if len > MAX_HEADER_LEN {
        return Err(EncodeError::OptionsTooLong(len - MIN_HEADER_LEN));
    }
    Ok(encode_header(header))
}

/// Encode without the length check; callers guarantee the options fit.
pub(crate) fn encode_header(header: &TcpHeader) -> Vec<u8> {
    let len = header.header_len();
    let mut out = Vec::with_capacity(len);
    out.extend_from_slice(&header.source_port.to_be_bytes());
    out.extend_from_slice(&header.destination_port.to_be_bytes());
    out.extend_from_slice(&header.sequence_number.to_be_bytes());
    out.extend_from_slice(&header.acknowledgement_number.to_be_bytes());
    out.push(((len / 4) as u8 & 0x0F) << 4);
    out.push(header.flags.bits());
    out.extend_from_slice(&header.window_size.to_be_bytes());
    out.extend_from_slice(&header.checksum.to_be_bytes());
    out.extend_from_slice(&header.urgent_pointer.to_be_bytes());
    for option in &header.options {
        option.encode(&mut out);
    }
    out.resize(len, KIND_NOP);
    out
}
