//! Wire-format codecs for the headers the firewall inspects.
//!
//! Byte layouts follow RFC 791 (IPv4), RFC 793 (TCP), RFC 768 (UDP) and
//! RFC 792 (ICMP). Parsers borrow the input buffer and return typed
//! [`ParseError`]s instead of panicking on hostile input.

pub mod checksum;
pub mod icmp;
pub mod ipv4;
pub mod tcp;
pub mod udp;

pub use checksum::{compute_tcp_checksum, compute_udp_checksum};
pub use icmp::{IcmpPacket, parse_icmp};
pub use ipv4::{Ipv4Header, Ipv4Packet, parse_ipv4};
pub use tcp::{TcpFlags, TcpHeader, TcpOption, TcpSegment, parse_tcp, serialize_tcp};
pub use udp::{UdpDatagram, UdpHeader, parse_udp};

pub use crate::error::{EncodeError, ParseError};

/// Payload protocol carried by an IPv4 packet.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum IpProtocol {
    Icmp,
    Tcp,
    Udp,
    Other(u8),
}

impl IpProtocol {
    pub fn from_raw(value: u8) -> Self {
        match value {
            1 => IpProtocol::Icmp,
            6 => IpProtocol::Tcp,
            17 => IpProtocol::Udp,
            other => IpProtocol::Other(other),
        }
    }

    pub fn as_u8(self) -> u8 {
        match self {
            IpProtocol::Icmp => 1,
            IpProtocol::Tcp => 6,
            IpProtocol::Udp => 17,
            IpProtocol::Other(v) => v,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            IpProtocol::Icmp => "ICMP",
            IpProtocol::Tcp => "TCP",
            IpProtocol::Udp => "UDP",
            IpProtocol::Other(_) => "OTHER",
        }
    }
}

fn read_u16(bytes: &[u8]) -> u16 {
    u16::from_be_bytes([bytes[0], bytes[1]])
}

fn read_u32(bytes: &[u8]) -> u32 {
    u32::from_be_bytes([bytes[0], bytes[1], bytes[2], bytes[3]])
}
