use std::net::IpAddr;
use std::sync::Arc;

use arc_swap::ArcSwapOption;
use futures::{Stream, StreamExt};
use rustc_hash::FxHashSet;
use tokio::task::JoinHandle;
use tracing::{info, warn};

use crate::config::{Settings, SettingsConsumer};
use crate::dns::DnsModel;
use crate::firewall::collab::IpEntry;
use crate::firewall::packet::FirewallPacket;
use crate::firewall::{FirewallRule, Stage, Verdict};

/// Allow-list filter on destination addresses.
///
/// Inactive until both settings and a non-empty address list are loaded.
/// Local addresses (when enabled) and the configured DNS servers are always
/// let through.
#[derive(Default)]
pub struct IpFilterRule {
    allowed: ArcSwapOption<FxHashSet<IpAddr>>,
    settings: ArcSwapOption<Settings>,
}

impl IpFilterRule {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn update(&self, entries: &[IpEntry]) {
        let mut allowed = FxHashSet::default();
        for entry in entries {
            match entry.ip.trim().parse::<IpAddr>() {
                Ok(ip) => {
                    allowed.insert(ip);
                }
                Err(_) => warn!(ip = %entry.ip, "ignoring invalid ip entry"),
            }
        }
        info!(addresses = allowed.len(), "ip allow-list updated");
        self.allowed.store(Some(Arc::new(allowed)));
    }
}

fn is_local(ip: IpAddr) -> bool {
    match ip {
        IpAddr::V4(v4) => v4.is_private() || v4.is_loopback() || v4.is_link_local(),
        IpAddr::V6(v6) => {
            let first = v6.segments()[0];
            v6.is_loopback() || (first & 0xfe00) == 0xfc00 || (first & 0xffc0) == 0xfe80
        }
    }
}

impl SettingsConsumer for IpFilterRule {
    fn apply_settings(&self, settings: Option<Arc<Settings>>) {
        self.settings.store(settings);
    }
}

impl FirewallRule for IpFilterRule {
    fn name(&self) -> &'static str {
        "ip-filter"
    }

    fn stage(&self) -> Stage {
        Stage::Enforce
    }

    fn check(&self, packet: &mut FirewallPacket, _dns: Option<&DnsModel>, verdict: Verdict) -> Verdict {
        let settings = self.settings.load();
        let allowed = self.allowed.load();
        let (Some(settings), Some(allowed)) = (&*settings, &*allowed) else {
            return verdict;
        };
        if allowed.is_empty() {
            return verdict;
        }

        let destination = packet.destination;
        if allowed.contains(&destination)
            || (settings.allow_local && is_local(destination))
            || settings.dns_servers.contains(&destination)
        {
            Verdict::Accept
        } else {
            Verdict::Drop
        }
    }
}

/// Apply every list `entries` yields.
pub fn watch_ip_entries<S>(rule: Arc<IpFilterRule>, entries: S) -> JoinHandle<()>
where
    S: Stream<Item = Vec<IpEntry>> + Send + 'static,
{
    tokio::spawn(async move {
        let mut entries = std::pin::pin!(entries);
        while let Some(list) = entries.next().await {
            rule.update(&list);
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::firewall::rules::testing::tcp_to;
    use std::net::Ipv4Addr;

    fn entries(ips: &[&str]) -> Vec<IpEntry> {
        ips.iter().map(|ip| IpEntry { ip: ip.to_string() }).collect()
    }

    fn loaded(allow_local: bool) -> IpFilterRule {
        let rule = IpFilterRule::new();
        rule.apply_settings(Some(Arc::new(Settings {
            allow_local,
            dns_servers: vec!["9.9.9.9".parse().unwrap()],
            ..Settings::default()
        })));
        rule.update(&entries(&["93.184.216.34", "not-an-ip"]));
        rule
    }

    fn check(rule: &IpFilterRule, destination: Ipv4Addr) -> Verdict {
        rule.check(&mut tcp_to(destination, 443), None, Verdict::Accept)
    }

    #[test]
    fn drops_destinations_outside_allow_list() {
        let rule = loaded(false);
        assert_eq!(check(&rule, Ipv4Addr::new(93, 184, 216, 34)), Verdict::Accept);
        assert_eq!(check(&rule, Ipv4Addr::new(1, 2, 3, 4)), Verdict::Drop);
        assert_eq!(check(&rule, Ipv4Addr::new(192, 168, 1, 1)), Verdict::Drop);
        assert_eq!(check(&rule, Ipv4Addr::new(9, 9, 9, 9)), Verdict::Accept);
    }

    #[test]
    fn local_addresses_pass_when_allowed() {
        let rule = loaded(true);
        assert_eq!(check(&rule, Ipv4Addr::new(192, 168, 1, 1)), Verdict::Accept);
        assert_eq!(check(&rule, Ipv4Addr::new(10, 1, 2, 3)), Verdict::Accept);
        assert_eq!(check(&rule, Ipv4Addr::new(8, 8, 8, 8)), Verdict::Drop);
    }

    #[test]
    fn passthrough_until_loaded() {
        let rule = IpFilterRule::new();
        assert_eq!(check(&rule, Ipv4Addr::new(1, 2, 3, 4)), Verdict::Accept);

        rule.update(&entries(&["93.184.216.34"]));
        assert_eq!(check(&rule, Ipv4Addr::new(1, 2, 3, 4)), Verdict::Accept);

        let rule = loaded(false);
        rule.apply_settings(None);
        assert_eq!(check(&rule, Ipv4Addr::new(1, 2, 3, 4)), Verdict::Accept);
    }

    #[tokio::test]
    async fn watch_applies_latest_list() {
        let rule = Arc::new(loaded(false));
        let lists = futures::stream::iter(vec![entries(&["1.2.3.4"]), entries(&["5.6.7.8"])]);
        watch_ip_entries(Arc::clone(&rule), lists).await.unwrap();

        assert_eq!(check(&rule, Ipv4Addr::new(5, 6, 7, 8)), Verdict::Accept);
        assert_eq!(check(&rule, Ipv4Addr::new(1, 2, 3, 4)), Verdict::Drop);
    }
}
