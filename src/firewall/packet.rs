use std::net::IpAddr;

use crate::codec::IpProtocol;

use super::collab::ConnectionOwnerResolver;
use super::network::{NetworkState, NetworkType};

/// One captured packet as the rules see it. Lives for a single chain pass.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FirewallPacket {
    uid: Option<u32>,
    pub source: IpAddr,
    pub destination: IpAddr,
    pub source_port: u16,
    pub destination_port: u16,
    pub protocol: IpProtocol,
    network_type: Option<NetworkType>,
    /// Cleared when the packet was already attributed (and logged) upstream.
    pub should_log: bool,
}

impl FirewallPacket {
    pub fn new(
        source: IpAddr,
        destination: IpAddr,
        source_port: u16,
        destination_port: u16,
        protocol: IpProtocol,
    ) -> Self {
        Self {
            uid: None,
            source,
            destination,
            source_port,
            destination_port,
            protocol,
            network_type: None,
            should_log: true,
        }
    }

    /// Attach an owner the caller already knows.
    pub fn with_uid(mut self, uid: u32) -> Self {
        self.uid = Some(uid);
        self.should_log = false;
        self
    }

    /// Owner if it has been resolved.
    pub fn uid(&self) -> Option<u32> {
        self.uid
    }

    /// Owner, asking `resolver` the first time.
    pub fn resolve_uid(&mut self, resolver: &dyn ConnectionOwnerResolver) -> Option<u32> {
        if self.uid.is_none() {
            self.uid = resolver.owner_uid(self);
        }
        self.uid
    }

    /// Network the packet travels on, read from `state` once per packet.
    pub fn network_type(&mut self, state: &NetworkState) -> NetworkType {
        *self.network_type.get_or_insert_with(|| state.network_type())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::Ipv4Addr;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn packet() -> FirewallPacket {
        FirewallPacket::new(
            IpAddr::V4(Ipv4Addr::new(10, 0, 0, 2)),
            IpAddr::V4(Ipv4Addr::new(93, 184, 216, 34)),
            40000,
            443,
            IpProtocol::Tcp,
        )
    }

    #[test]
    fn uid_is_resolved_once() {
        let calls = AtomicUsize::new(0);
        let resolver = |_: &FirewallPacket| {
            calls.fetch_add(1, Ordering::Relaxed);
            Some(10123)
        };
        let mut p = packet();
        assert_eq!(p.uid(), None);
        assert_eq!(p.resolve_uid(&resolver), Some(10123));
        assert_eq!(p.resolve_uid(&resolver), Some(10123));
        assert_eq!(calls.into_inner(), 1);
        assert!(p.should_log);
    }

    #[test]
    fn known_uid_skips_logging() {
        let p = packet().with_uid(1000);
        assert_eq!(p.uid(), Some(1000));
        assert!(!p.should_log);
    }

    #[test]
    fn network_type_is_pinned_per_packet() {
        let state = NetworkState::new(NetworkType::Wifi, true);
        let mut p = packet();
        assert_eq!(p.network_type(&state), NetworkType::Wifi);
        state.set_network_type(NetworkType::Mobile);
        assert_eq!(p.network_type(&state), NetworkType::Wifi);
    }
}
