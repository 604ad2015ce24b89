use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use crate::config::{Settings, SettingsConsumer};
use crate::dns::DnsModel;
use crate::firewall::packet::FirewallPacket;
use crate::firewall::{FirewallRule, Stage, Verdict};

const HTTP_PORT: u16 = 80;

/// Drops plain HTTP when enabled.
#[derive(Default)]
pub struct HttpPortRule {
    enabled: AtomicBool,
}

impl HttpPortRule {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_enabled(&self, enabled: bool) {
        self.enabled.store(enabled, Ordering::Relaxed);
    }
}

impl SettingsConsumer for HttpPortRule {
    fn apply_settings(&self, settings: Option<Arc<Settings>>) {
        self.set_enabled(settings.is_some_and(|s| s.block_port80));
    }
}

impl FirewallRule for HttpPortRule {
    fn name(&self) -> &'static str {
        "http-port"
    }

    fn stage(&self) -> Stage {
        Stage::Enforce
    }

    fn check(&self, packet: &mut FirewallPacket, _dns: Option<&DnsModel>, verdict: Verdict) -> Verdict {
        if packet.destination_port == HTTP_PORT && self.enabled.load(Ordering::Relaxed) {
            Verdict::Drop
        } else {
            verdict
        }
    }
}
