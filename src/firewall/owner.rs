//! Socket owner lookup through `/proc/net`.

use std::fs;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};
use std::path::PathBuf;

use tracing::debug;

use crate::codec::IpProtocol;

use super::collab::ConnectionOwnerResolver;
use super::packet::FirewallPacket;

/// Resolves UIDs from the kernel socket tables (Linux and Android).
#[derive(Debug, Clone)]
pub struct ProcNetOwnerResolver {
    root: PathBuf,
}

impl ProcNetOwnerResolver {
    pub fn new() -> Self {
        Self::with_root("/proc/net")
    }

    /// Read socket tables from `root` instead of `/proc/net`.
    pub fn with_root(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn tables(protocol: IpProtocol) -> &'static [&'static str] {
        match protocol {
            IpProtocol::Tcp => &["tcp", "tcp6"],
            IpProtocol::Udp => &["udp", "udp6"],
            _ => &[],
        }
    }
}

impl Default for ProcNetOwnerResolver {
    fn default() -> Self {
        Self::new()
    }
}

impl ConnectionOwnerResolver for ProcNetOwnerResolver {
    fn owner_uid(&self, packet: &FirewallPacket) -> Option<u32> {
        for table in Self::tables(packet.protocol) {
            let path = self.root.join(table);
            let content = match fs::read_to_string(&path) {
                Ok(content) => content,
                Err(e) => {
                    debug!(path = %path.display(), error = %e, "socket table unavailable");
                    continue;
                }
            };
            if let Some(uid) = find_owner(&content, packet.source, packet.source_port) {
                return Some(uid);
            }
        }
        None
    }
}

/// Find the uid of the socket bound to `addr:port` in one socket table.
///
/// Sockets bound to the wildcard address match any local address.
pub(crate) fn find_owner(content: &str, addr: IpAddr, port: u16) -> Option<u32> {
    content.lines().skip(1).find_map(|line| {
        let fields: Vec<&str> = line.split_whitespace().collect();
        if fields.len() < 8 {
            return None;
        }
        let (local, local_port) = parse_local(fields[1])?;
        if local_port != port || !(local == addr || local.is_unspecified() || mapped(local) == Some(addr)) {
            return None;
        }
        fields[7].parse().ok()
    })
}

fn mapped(addr: IpAddr) -> Option<IpAddr> {
    match addr {
        IpAddr::V6(v6) => v6.to_ipv4_mapped().map(IpAddr::V4),
        IpAddr::V4(_) => None,
    }
}

/// `0100007F:0035` style address. Words are in host byte order.
fn parse_local(s: &str) -> Option<(IpAddr, u16)> {
    let (addr_hex, port_hex) = s.split_once(':')?;
    let port = u16::from_str_radix(port_hex, 16).ok()?;
    let addr = match addr_hex.len() {
        8 => {
            let raw = u32::from_str_radix(addr_hex, 16).ok()?;
            IpAddr::V4(Ipv4Addr::from(raw.swap_bytes()))
        }
        32 => {
            let mut octets = [0u8; 16];
            for (i, chunk) in octets.chunks_exact_mut(4).enumerate() {
                let raw = u32::from_str_radix(&addr_hex[i * 8..i * 8 + 8], 16).ok()?;
                chunk.copy_from_slice(&raw.swap_bytes().to_be_bytes());
            }
            IpAddr::V6(Ipv6Addr::from(octets))
        }
        _ => return None,
    };
    Some((addr, port))
}
