use std::sync::Arc;

use arc_swap::ArcSwap;
use futures::{Stream, StreamExt};
use rustc_hash::FxHashSet;
use tokio::task::JoinHandle;
use tracing::{debug, error, info};

use crate::dns::DnsModel;
use crate::error::ConfigError;
use crate::firewall::collab::{AppInfo, ApplicationRegistry, ConnectionOwnerResolver};
use crate::firewall::network::{NetworkState, NetworkType};
use crate::firewall::packet::FirewallPacket;
use crate::firewall::{FirewallRule, Stage, Verdict};

#[derive(Debug, Default)]
struct BlockedUids {
    wifi: FxHashSet<u32>,
    mobile: FxHashSet<u32>,
}

/// Drops traffic from applications denied access on the current network.
///
/// Nothing is blocked until the first application list is loaded.
pub struct AppAccessRule {
    blocked: ArcSwap<BlockedUids>,
    network: Arc<NetworkState>,
    owner: Arc<dyn ConnectionOwnerResolver>,
}

impl AppAccessRule {
    pub fn new(network: Arc<NetworkState>, owner: Arc<dyn ConnectionOwnerResolver>) -> Self {
        Self {
            blocked: ArcSwap::from_pointee(BlockedUids::default()),
            network,
            owner,
        }
    }

    pub fn update(&self, apps: &[AppInfo]) {
        let mut blocked = BlockedUids::default();
        for app in apps {
            if !app.internet_access {
                blocked.wifi.insert(app.uid);
            }
            if !app.cellular_access {
                blocked.mobile.insert(app.uid);
            }
        }
        info!(wifi = blocked.wifi.len(), mobile = blocked.mobile.len(), "application access updated");
        self.blocked.store(Arc::new(blocked));
    }

    /// Reload from `registry`. On failure the previous sets stay in place.
    pub fn refresh(&self, registry: &dyn ApplicationRegistry) -> Result<(), ConfigError> {
        let apps = registry.applications()?;
        self.update(&apps);
        Ok(())
    }

    pub fn is_blocked(&self, uid: u32, network: NetworkType) -> bool {
        let blocked = self.blocked.load();
        match network {
            NetworkType::Wifi => blocked.wifi.contains(&uid),
            NetworkType::Mobile => blocked.mobile.contains(&uid),
            NetworkType::Offline => false,
        }
    }
}

impl FirewallRule for AppAccessRule {
    fn name(&self) -> &'static str {
        "app-access"
    }

    fn stage(&self) -> Stage {
        Stage::Enforce
    }

    fn check(&self, packet: &mut FirewallPacket, _dns: Option<&DnsModel>, verdict: Verdict) -> Verdict {
        let network = packet.network_type(&self.network);
        if network == NetworkType::Offline {
            return verdict;
        }
        let Some(uid) = packet.resolve_uid(self.owner.as_ref()) else {
            debug!(destination = %packet.destination, "owner unknown");
            return Verdict::Accept;
        };
        if self.is_blocked(uid, network) {
            Verdict::Drop
        } else {
            Verdict::Accept
        }
    }
}

/// Reload the application list now and whenever `changes` yields.
pub fn watch_applications<S>(
    rule: Arc<AppAccessRule>,
    registry: Arc<dyn ApplicationRegistry>,
    changes: S,
) -> JoinHandle<()>
where
    S: Stream<Item = ()> + Send + 'static,
{
    tokio::spawn(async move {
        let mut changes = std::pin::pin!(changes);
        loop {
            if let Err(e) = rule.refresh(registry.as_ref()) {
                error!(error = %e, "cannot load application list");
            }
            if changes.next().await.is_none() {
                break;
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::firewall::rules::testing::tcp_to;
    use std::net::Ipv4Addr;
    use std::sync::Mutex;

    fn apps() -> Vec<AppInfo> {
        vec![
            AppInfo {
                uid: 10100,
                internet_access: false,
                cellular_access: true,
                system_app: false,
            },
            AppInfo {
                uid: 10200,
                internet_access: true,
                cellular_access: false,
                system_app: false,
            },
        ]
    }

    fn rule(network: NetworkType, uid: Option<u32>) -> AppAccessRule {
        let owner = move |_: &FirewallPacket| uid;
        AppAccessRule::new(Arc::new(NetworkState::new(network, true)), Arc::new(owner))
    }

    #[test]
    fn accepts_everything_before_first_load() {
        let rule = rule(NetworkType::Wifi, Some(10100));
        let mut packet = tcp_to(Ipv4Addr::new(1, 2, 3, 4), 443);
        assert_eq!(rule.check(&mut packet, None, Verdict::Accept), Verdict::Accept);
    }

    #[test]
    fn blocks_per_network_type() {
        let wifi = rule(NetworkType::Wifi, Some(10100));
        wifi.update(&apps());
        let mut packet = tcp_to(Ipv4Addr::new(1, 2, 3, 4), 443);
        assert_eq!(wifi.check(&mut packet, None, Verdict::Accept), Verdict::Drop);

        let mobile = rule(NetworkType::Mobile, Some(10100));
        mobile.update(&apps());
        let mut packet = tcp_to(Ipv4Addr::new(1, 2, 3, 4), 443);
        assert_eq!(mobile.check(&mut packet, None, Verdict::Accept), Verdict::Accept);
        assert!(mobile.is_blocked(10200, NetworkType::Mobile));
    }

    #[test]
    fn unknown_owner_and_offline_are_accepted() {
        let unknown = rule(NetworkType::Wifi, None);
        unknown.update(&apps());
        let mut packet = tcp_to(Ipv4Addr::new(1, 2, 3, 4), 443);
        assert_eq!(unknown.check(&mut packet, None, Verdict::Accept), Verdict::Accept);

        let offline = rule(NetworkType::Offline, Some(10100));
        offline.update(&apps());
        let mut packet = tcp_to(Ipv4Addr::new(1, 2, 3, 4), 443);
        assert_eq!(offline.check(&mut packet, None, Verdict::Accept), Verdict::Accept);
    }

    struct FlakyRegistry {
        calls: Mutex<usize>,
    }

    impl ApplicationRegistry for FlakyRegistry {
        fn applications(&self) -> Result<Vec<AppInfo>, ConfigError> {
            let mut calls = self.calls.lock().unwrap();
            *calls += 1;
            if *calls == 1 {
                Ok(apps())
            } else {
                Err(ConfigError::Unavailable("database locked".into()))
            }
        }
    }

    #[tokio::test]
    async fn failed_reload_keeps_previous_sets() {
        let rule = Arc::new(rule(NetworkType::Wifi, Some(10100)));
        let registry = Arc::new(FlakyRegistry { calls: Mutex::new(0) });

        let changes = futures::stream::iter(vec![()]);
        watch_applications(Arc::clone(&rule), registry.clone(), changes)
            .await
            .unwrap();

        assert_eq!(*registry.calls.lock().unwrap(), 2);
        assert!(rule.is_blocked(10100, NetworkType::Wifi));
    }
}
