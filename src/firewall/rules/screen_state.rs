use std::sync::Arc;

use arc_swap::ArcSwapOption;

use crate::config::{Settings, SettingsConsumer};
use crate::dns::DnsModel;
use crate::firewall::network::{NetworkState, NetworkType};
use crate::firewall::packet::FirewallPacket;
use crate::firewall::{FirewallRule, Stage, Verdict};

/// Drops traffic while the screen is off, per network type.
pub struct ScreenStateRule {
    network: Arc<NetworkState>,
    settings: ArcSwapOption<Settings>,
}

impl ScreenStateRule {
    pub fn new(network: Arc<NetworkState>) -> Self {
        Self {
            network,
            settings: ArcSwapOption::empty(),
        }
    }
}

impl SettingsConsumer for ScreenStateRule {
    fn apply_settings(&self, settings: Option<Arc<Settings>>) {
        self.settings.store(settings);
    }
}

impl FirewallRule for ScreenStateRule {
    fn name(&self) -> &'static str {
        "screen-state"
    }

    fn stage(&self) -> Stage {
        Stage::Enforce
    }

    fn check(&self, packet: &mut FirewallPacket, _dns: Option<&DnsModel>, verdict: Verdict) -> Verdict {
        if self.network.is_screen_on() {
            return verdict;
        }
        let settings = self.settings.load();
        let Some(settings) = &*settings else {
            return verdict;
        };
        let blocked = match packet.network_type(&self.network) {
            NetworkType::Wifi => settings.block_wifi_when_screen_off,
            NetworkType::Mobile => settings.block_mobile_when_screen_off,
            NetworkType::Offline => false,
        };
        if blocked { Verdict::Drop } else { verdict }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::firewall::rules::testing::tcp_to;
    use std::net::Ipv4Addr;

    fn check(rule: &ScreenStateRule) -> Verdict {
        rule.check(&mut tcp_to(Ipv4Addr::new(1, 2, 3, 4), 443), None, Verdict::Accept)
    }

    #[test]
    fn blocks_matching_network_with_screen_off() {
        let network = Arc::new(NetworkState::new(NetworkType::Wifi, true));
        let rule = ScreenStateRule::new(Arc::clone(&network));
        rule.apply_settings(Some(Arc::new(Settings {
            block_wifi_when_screen_off: true,
            ..Settings::default()
        })));

        assert_eq!(check(&rule), Verdict::Accept);

        network.set_screen_on(false);
        assert_eq!(check(&rule), Verdict::Drop);

        network.set_network_type(NetworkType::Mobile);
        assert_eq!(check(&rule), Verdict::Accept);
    }

    #[test]
    fn passthrough_without_settings() {
        let network = Arc::new(NetworkState::new(NetworkType::Mobile, false));
        let rule = ScreenStateRule::new(network);
        assert_eq!(check(&rule), Verdict::Accept);
    }
}
