use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use tracing::debug;

use crate::blocklist::RuleDatabase;
use crate::config::{Settings, SettingsConsumer};
use crate::dns::DnsModel;
use crate::firewall::packet::FirewallPacket;
use crate::firewall::{FirewallRule, Stage, Verdict};

/// Drops DNS queries for hostnames in the blocklist database.
pub struct DnsBlockRule {
    database: Arc<RuleDatabase>,
    enabled: AtomicBool,
}

impl DnsBlockRule {
    pub fn new(database: Arc<RuleDatabase>) -> Self {
        Self {
            database,
            enabled: AtomicBool::new(true),
        }
    }

    pub fn set_enabled(&self, enabled: bool) {
        self.enabled.store(enabled, Ordering::Relaxed);
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::Relaxed)
    }
}

impl SettingsConsumer for DnsBlockRule {
    fn apply_settings(&self, settings: Option<Arc<Settings>>) {
        self.set_enabled(settings.is_some_and(|s| s.dns_blocking_enabled));
    }
}

impl FirewallRule for DnsBlockRule {
    fn name(&self) -> &'static str {
        "dns-block"
    }

    fn stage(&self) -> Stage {
        Stage::Dns
    }

    fn check(&self, _packet: &mut FirewallPacket, dns: Option<&DnsModel>, verdict: Verdict) -> Verdict {
        if !self.is_enabled() {
            return verdict;
        }
        let Some(dns) = dns else {
            return verdict;
        };
        if self.database.is_blocked(&dns.domain) {
            debug!(domain = %dns.domain, "blocked by blocklist");
            Verdict::Drop
        } else {
            Verdict::Accept
        }
    }
}
