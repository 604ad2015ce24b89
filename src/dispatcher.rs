//! Per-packet entry point: parse, classify, evaluate the rule chain.

use std::net::IpAddr;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;
use std::time::Instant;

use tracing::{debug, error};

use crate::codec::{
    IpProtocol, Ipv4Header, ParseError, UdpHeader, compute_udp_checksum, parse_icmp, parse_ipv4,
    parse_tcp, parse_udp,
};
use crate::dns::{DnsModel, parse_dns_query};
use crate::firewall::{FirewallChain, FirewallPacket, Verdict};
use crate::stats::Stats;

const DNS_PORT: u16 = 53;

/// What to do with one captured packet.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Decision {
    pub allow: bool,
    /// `None` when the packet could not be classified and was let through.
    pub verdict: Option<Verdict>,
    /// A synthesised answer to inject back toward the client, for blocked
    /// DNS queries over UDP.
    pub reply: Option<Vec<u8>>,
}

impl Decision {
    fn fail_open() -> Self {
        Self {
            allow: true,
            verdict: None,
            reply: None,
        }
    }
}

/// Everything the chain needs from one parsed packet.
struct Flow {
    packet: FirewallPacket,
    dns: Option<DnsModel>,
    /// Headers to answer a UDP DNS query from.
    udp: Option<(Ipv4Header, UdpHeader)>,
}

pub struct PacketDispatcher {
    chain: Arc<FirewallChain>,
    stats: Arc<Stats>,
}

impl PacketDispatcher {
    pub fn new(chain: Arc<FirewallChain>, stats: Arc<Stats>) -> Self {
        Self { chain, stats }
    }

    pub fn stats(&self) -> &Arc<Stats> {
        &self.stats
    }

    /// Whether the packet may pass. Unparseable packets always may.
    pub fn dispatch(&self, data: &[u8]) -> bool {
        self.inspect(data).allow
    }

    pub fn inspect(&self, data: &[u8]) -> Decision {
        let start = Instant::now();
        let outcome = catch_unwind(AssertUnwindSafe(|| self.evaluate(data)));

        match outcome {
            Ok(Ok(decision)) => {
                if let Some(verdict) = decision.verdict {
                    self.stats.record_verdict(verdict, start.elapsed());
                }
                decision
            }
            Ok(Err(e)) => {
                debug!(len = data.len(), error = %e, "cannot classify packet, allowing");
                self.stats.record_unparsed();
                Decision::fail_open()
            }
            Err(_) => {
                error!(len = data.len(), "rule evaluation panicked, allowing packet");
                self.stats.record_unparsed();
                Decision::fail_open()
            }
        }
    }

    fn evaluate(&self, data: &[u8]) -> Result<Decision, ParseError> {
        let Flow { mut packet, dns, udp } = classify(data)?;
        let verdict = self.chain.check(&mut packet, dns.as_ref());

        let reply = match (verdict, dns, udp) {
            (Verdict::DnsBlocked, Some(dns), Some((ip, udp))) => Some(build_dns_reply(&ip, &udp, &dns)),
            _ => None,
        };
        Ok(Decision {
            allow: verdict.is_allowed(),
            verdict: Some(verdict),
            reply,
        })
    }
}

fn classify(data: &[u8]) -> Result<Flow, ParseError> {
    let ip = parse_ipv4(data)?;
    if ip.header.is_trailing_fragment() {
        return Err(ParseError::Invalid("non-first fragment"));
    }

    let mut dns = None;
    let mut udp = None;
    let (source_port, destination_port) = match ip.header.protocol {
        IpProtocol::Tcp => {
            let segment = parse_tcp(ip.payload)?;
            let header = &segment.header;
            if header.destination_port == DNS_PORT {
                // DNS over TCP carries a two byte length prefix.
                dns = segment.payload.get(2..).and_then(|msg| parse_dns_query(msg).ok());
            }
            (header.source_port, header.destination_port)
        }
        IpProtocol::Udp => {
            let datagram = parse_udp(ip.payload)?;
            let header = datagram.header;
            if header.destination_port == DNS_PORT {
                dns = parse_dns_query(datagram.payload).ok();
                udp = Some((ip.header.clone(), header));
            }
            (header.source_port, header.destination_port)
        }
        IpProtocol::Icmp => {
            parse_icmp(ip.payload)?;
            (0, 0)
        }
        IpProtocol::Other(_) => (0, 0),
    };

    let packet = FirewallPacket::new(
        IpAddr::V4(ip.header.source),
        IpAddr::V4(ip.header.destination),
        source_port,
        destination_port,
        ip.header.protocol,
    );
    Ok(Flow { packet, dns, udp })
}

/// IPv4/UDP answer to `query` from the server it was sent to, naming
/// `0.0.0.0`. All checksums are computed.
pub fn build_dns_reply(ip: &Ipv4Header, udp: &UdpHeader, query: &DnsModel) -> Vec<u8> {
    let body = query.blocked_response().to_bytes();
    let ip_header = Ipv4Header::new(ip.destination, ip.source, IpProtocol::Udp, UdpHeader::LEN + body.len());
    let mut udp_header = UdpHeader {
        source_port: udp.destination_port,
        destination_port: udp.source_port,
        length: (UdpHeader::LEN + body.len()) as u16,
        checksum: 0,
    };
    udp_header.checksum = compute_udp_checksum(&udp_header, &ip_header, &body);

    let mut out = ip_header.to_bytes();
    out.extend_from_slice(&udp_header.to_bytes());
    out.extend_from_slice(&body);
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::blocklist::{BlocklistSource, FsSourceReader, RuleDatabase, SourceState};
    use crate::codec::checksum::internet_checksum;
    use crate::codec::{TcpFlags, TcpHeader, serialize_tcp};
    use crate::dns::build_query;
    use crate::firewall::rules::{AppAccessRule, CustomDomain, CustomDomainRule, DnsBlockRule};
    use crate::firewall::{AppInfo, FirewallRule, NetworkState, NetworkType, Stage};
    use std::net::Ipv4Addr;

    const CLIENT: Ipv4Addr = Ipv4Addr::new(10, 0, 0, 2);
    const RESOLVER: Ipv4Addr = Ipv4Addr::new(1, 1, 1, 1);

    fn udp_packet(dst_port: u16, payload: &[u8]) -> Vec<u8> {
        let ip = Ipv4Header::new(CLIENT, RESOLVER, IpProtocol::Udp, UdpHeader::LEN + payload.len());
        let mut udp = UdpHeader {
            source_port: 51000,
            destination_port: dst_port,
            length: (UdpHeader::LEN + payload.len()) as u16,
            checksum: 0,
        };
        udp.checksum = compute_udp_checksum(&udp, &ip, payload);
        let mut out = ip.to_bytes();
        out.extend_from_slice(&udp.to_bytes());
        out.extend_from_slice(payload);
        out
    }

    fn tcp_packet(dst_port: u16, payload: &[u8]) -> Vec<u8> {
        let tcp = TcpHeader {
            source_port: 40000,
            destination_port: dst_port,
            sequence_number: 1,
            acknowledgement_number: 0,
            flags: TcpFlags::SYN,
            window_size: 65535,
            checksum: 0,
            urgent_pointer: 0,
            options: Vec::new(),
        };
        let segment = serialize_tcp(&tcp).unwrap();
        let ip = Ipv4Header::new(CLIENT, RESOLVER, IpProtocol::Tcp, segment.len() + payload.len());
        let mut out = ip.to_bytes();
        out.extend_from_slice(&segment);
        out.extend_from_slice(payload);
        out
    }

    fn dns_query(domain: &str) -> Vec<u8> {
        udp_packet(DNS_PORT, &build_query(0x4242, domain, 1))
    }

    struct Setup {
        dispatcher: PacketDispatcher,
        _dir: tempfile::TempDir,
    }

    fn setup(blocked_uid: Option<u32>, custom: &[CustomDomain]) -> Setup {
        let dir = tempfile::tempdir().unwrap();
        let list = dir.path().join("hosts");
        std::fs::write(&list, "0.0.0.0 ads.example.com\n0.0.0.0 both.example.com\n").unwrap();
        let db = RuleDatabase::new(Arc::new(FsSourceReader::new(dir.path())));
        db.set_sources(vec![BlocklistSource::file("hosts", list, SourceState::Deny)]);
        db.initialize(false);

        let network = Arc::new(NetworkState::new(NetworkType::Wifi, true));
        let owner = |_: &FirewallPacket| Some(10100);
        let app = AppAccessRule::new(network, Arc::new(owner));
        if let Some(uid) = blocked_uid {
            app.update(&[AppInfo {
                uid,
                internet_access: false,
                cellular_access: true,
                system_app: false,
            }]);
        }
        let custom_rule = CustomDomainRule::new();
        custom_rule.update(custom);

        // Within a stage rules keep their order: the custom lists see the
        // blocklist verdict and may override it.
        let rules: Vec<Arc<dyn FirewallRule>> = vec![
            Arc::new(DnsBlockRule::new(Arc::new(db))),
            Arc::new(custom_rule),
            Arc::new(app),
        ];
        let chain = Arc::new(FirewallChain::new(rules));
        Setup {
            dispatcher: PacketDispatcher::new(chain, Arc::new(Stats::new())),
            _dir: dir,
        }
    }

    #[test]
    fn short_buffers_fail_open() {
        let setup = setup(Some(10100), &[]);
        let d = &setup.dispatcher;

        let ten = tcp_packet(443, &[]);
        assert!(parse_tcp(&ten[20..30]).is_err());
        assert!(d.dispatch(&ten[..10]));

        let mut truncated_tcp = Ipv4Header::new(CLIENT, RESOLVER, IpProtocol::Tcp, 10).to_bytes();
        truncated_tcp.extend_from_slice(&ten[20..30]);
        let decision = d.inspect(&truncated_tcp);
        assert!(decision.allow);
        assert_eq!(decision.verdict, None);

        assert!(d.dispatch(&[]));
        assert_eq!(d.stats().snapshot_and_reset().unparsed, 3);
    }

    #[test]
    fn ipv6_and_fragments_fail_open() {
        let setup = setup(Some(10100), &[]);
        let mut v6 = vec![0x60];
        v6.resize(40, 0);
        assert!(setup.dispatcher.dispatch(&v6));

        let mut header = Ipv4Header::new(CLIENT, RESOLVER, IpProtocol::Tcp, 8);
        header.fragment_offset = 185;
        let mut fragment = header.to_bytes();
        fragment.extend_from_slice(&[0u8; 8]);
        assert_eq!(setup.dispatcher.inspect(&fragment).verdict, None);
    }

    #[test]
    fn blocked_application_is_dropped() {
        let setup = setup(Some(10100), &[CustomDomain::new("ads.example.com", false, true).unwrap()]);
        // The allowlist entry cannot override an application block.
        let decision = setup.dispatcher.inspect(&dns_query("ads.example.com"));
        assert_eq!(decision.verdict, Some(Verdict::Drop));
        assert!(!decision.allow);
        assert!(!setup.dispatcher.dispatch(&tcp_packet(443, &[])));
    }

    #[test]
    fn blocklisted_query_is_dropped() {
        let setup = setup(None, &[]);
        assert!(!setup.dispatcher.dispatch(&dns_query("ads.example.com")));
        assert!(setup.dispatcher.dispatch(&dns_query("example.com")));
        assert!(setup.dispatcher.dispatch(&tcp_packet(443, &[])));
    }

    #[test]
    fn allowlist_overrides_blocklist() {
        let setup = setup(
            None,
            &[
                CustomDomain::new("both.example.com", false, false).unwrap(),
                CustomDomain::new("both.example.com", false, true).unwrap(),
            ],
        );
        let decision = setup.dispatcher.inspect(&dns_query("both.example.com"));
        assert_eq!(decision.verdict, Some(Verdict::Accept));
        assert!(decision.reply.is_none());
    }

    #[test]
    fn custom_block_synthesises_reply() {
        let setup = setup(None, &[CustomDomain::new("tracker.example.org", false, false).unwrap()]);
        let decision = setup.dispatcher.inspect(&dns_query("tracker.example.org"));
        assert_eq!(decision.verdict, Some(Verdict::DnsBlocked));
        assert!(!decision.allow);

        let reply = decision.reply.unwrap();
        let ip = parse_ipv4(&reply).unwrap();
        assert!(ip.header.checksum_valid());
        assert_eq!(ip.header.source, RESOLVER);
        assert_eq!(ip.header.destination, CLIENT);

        let udp = parse_udp(ip.payload).unwrap();
        assert_eq!(udp.header.source_port, DNS_PORT);
        assert_eq!(udp.header.destination_port, 51000);
        assert_eq!(compute_udp_checksum(&udp.header, &ip.header, udp.payload), udp.header.checksum);

        let answer = parse_dns_query(udp.payload).unwrap();
        assert_eq!(answer.id, 0x4242);
        assert_eq!(answer.domain, "tracker.example.org");
        assert_eq!(&udp.payload[udp.payload.len() - 4..], &[0, 0, 0, 0]);
    }

    #[test]
    fn dns_over_tcp_is_inspected() {
        let setup = setup(None, &[]);
        let query = build_query(7, "ads.example.com", 1);
        let mut framed = (query.len() as u16).to_be_bytes().to_vec();
        framed.extend_from_slice(&query);
        assert!(!setup.dispatcher.dispatch(&tcp_packet(DNS_PORT, &framed)));

        // Handshake packets without a message still pass.
        assert!(setup.dispatcher.dispatch(&tcp_packet(DNS_PORT, &[])));
    }

    #[test]
    fn icmp_is_evaluated() {
        let setup = setup(None, &[]);
        let echo = [8, 0, 0, 0, 0, 1, 0, 1];
        let mut body = echo.to_vec();
        let sum = internet_checksum(&body);
        body[2..4].copy_from_slice(&sum.to_be_bytes());
        let mut packet = Ipv4Header::new(CLIENT, RESOLVER, IpProtocol::Icmp, body.len()).to_bytes();
        packet.extend_from_slice(&body);

        assert_eq!(setup.dispatcher.inspect(&packet).verdict, Some(Verdict::Accept));
    }

    struct Panics;

    impl FirewallRule for Panics {
        fn name(&self) -> &'static str {
            "panics"
        }

        fn stage(&self) -> Stage {
            Stage::Enforce
        }

        fn check(&self, _: &mut FirewallPacket, _: Option<&DnsModel>, _: Verdict) -> Verdict {
            panic!("rule bug");
        }
    }

    #[test]
    fn panicking_rule_fails_open() {
        let rules: Vec<Arc<dyn FirewallRule>> = vec![Arc::new(Panics)];
        let chain = Arc::new(FirewallChain::new(rules));
        let dispatcher = PacketDispatcher::new(chain, Arc::new(Stats::new()));
        assert!(dispatcher.dispatch(&tcp_packet(443, &[])));
        assert_eq!(dispatcher.stats().snapshot_and_reset().unparsed, 1);
    }
}
