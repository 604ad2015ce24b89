use std::sync::Arc;

use tracing::trace;

use crate::dns::DnsModel;

use super::packet::FirewallPacket;
use super::{FirewallRule, Stage, Verdict};

/// Rules in evaluation order.
///
/// Rules are ordered by [`Stage`], keeping insertion order within a stage.
/// Once an `Enforce` rule drops a packet the remaining `Enforce` and `Dns`
/// rules are skipped; `Observe` rules still see the final verdict.
pub struct FirewallChain {
    rules: Vec<Arc<dyn FirewallRule>>,
}

impl FirewallChain {
    pub fn new(mut rules: Vec<Arc<dyn FirewallRule>>) -> Self {
        rules.sort_by_key(|rule| rule.stage());
        Self { rules }
    }

    pub fn rules(&self) -> impl Iterator<Item = &Arc<dyn FirewallRule>> {
        self.rules.iter()
    }

    pub fn check(&self, packet: &mut FirewallPacket, dns: Option<&DnsModel>) -> Verdict {
        let mut verdict = Verdict::Accept;
        let mut enforced = false;

        for rule in &self.rules {
            let stage = rule.stage();
            if enforced && stage != Stage::Observe {
                continue;
            }
            let next = rule.check(packet, dns, verdict);
            if next != verdict {
                trace!(rule = rule.name(), from = verdict.as_str(), to = next.as_str(), "verdict changed");
            }
            match stage {
                Stage::Enforce => {
                    enforced = next == Verdict::Drop;
                    verdict = next;
                }
                Stage::Dns => verdict = next,
                Stage::Observe => {}
            }
        }
        verdict
    }
}
