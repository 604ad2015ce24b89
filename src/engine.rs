//! Firewall assembly and background tasks.
//!
//! Builds the rule chain from a [`FirewallConfig`] and runs the refresh,
//! rebuild and statistics tasks next to the packet path.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use futures::Stream;
use tokio::task::JoinHandle;
use tokio::time::{Instant, interval_at};
use tracing::info;

use crate::blocklist::{FsSourceReader, RuleDatabase, spawn_periodic_rebuild};
use crate::config::{FirewallConfig, JsonSettingsFile, Settings, SettingsConsumer, watch_settings};
use crate::dispatcher::PacketDispatcher;
use crate::firewall::rules::{
    AppAccessRule, CustomDomainRule, DnsBlockRule, HttpPortRule, IpFilterRule, LogWorker,
    LoggingRule, ScreenStateRule, watch_applications,
};
use crate::firewall::{
    ConnectionOwnerResolver, FirewallChain, FirewallRule, HostnameResolver, LogSink, NetworkState,
};
use crate::stats::Stats;

/// Collaborators supplied by the platform.
pub struct Collaborators {
    pub owner: Arc<dyn ConnectionOwnerResolver>,
    pub sink: Arc<dyn LogSink>,
    pub hostnames: Arc<dyn HostnameResolver>,
}

/// Intervals for the background tasks.
#[derive(Debug, Clone, Copy)]
pub struct Schedule {
    pub rebuild: Duration,
    pub settings_poll: Duration,
    pub stats: Duration,
}

impl Default for Schedule {
    fn default() -> Self {
        Self {
            rebuild: Duration::from_secs(24 * 60 * 60),
            settings_poll: Duration::from_secs(30),
            stats: Duration::from_secs(60),
        }
    }
}

/// An assembled firewall and handles to every rule for live updates.
pub struct Firewall {
    pub dispatcher: Arc<PacketDispatcher>,
    pub database: Arc<RuleDatabase>,
    pub network: Arc<NetworkState>,
    pub stats: Arc<Stats>,
    pub app_access: Arc<AppAccessRule>,
    pub ip_filter: Arc<IpFilterRule>,
    pub http_port: Arc<HttpPortRule>,
    pub screen_state: Arc<ScreenStateRule>,
    pub dns_block: Arc<DnsBlockRule>,
    pub custom_domains: Arc<CustomDomainRule>,
    pub logging: Arc<LoggingRule>,
}

impl Firewall {
    /// Build every rule from `config`. The blocklist database is configured
    /// but not yet built; call [`RuleDatabase::initialize`] or start the
    /// background tasks.
    pub fn from_config(config: &FirewallConfig, collab: Collaborators) -> (Self, LogWorker) {
        let cache_dir = config.cache_dir.clone().unwrap_or_else(|| PathBuf::from("."));
        let database = Arc::new(RuleDatabase::new(Arc::new(FsSourceReader::new(cache_dir))));
        database.set_sources(config.sources.clone());
        database.set_exceptions(config.exceptions.clone());

        let network = Arc::new(NetworkState::new(config.network, config.screen_on));
        let stats = Arc::new(Stats::new());

        let app_access = Arc::new(AppAccessRule::new(Arc::clone(&network), collab.owner));
        app_access.update(&config.applications);
        let ip_filter = Arc::new(IpFilterRule::new());
        ip_filter.update(&config.ip_allow);
        let http_port = Arc::new(HttpPortRule::new());
        let screen_state = Arc::new(ScreenStateRule::new(Arc::clone(&network)));
        let dns_block = Arc::new(DnsBlockRule::new(Arc::clone(&database)));
        let custom_domains = Arc::new(CustomDomainRule::new());
        custom_domains.update(&config.custom_domains);
        let (logging, worker) = LoggingRule::new(collab.sink, collab.hostnames);
        let logging = Arc::new(logging);

        // The custom lists run after the blocklist so their allowlist wins.
        let rules: Vec<Arc<dyn FirewallRule>> = vec![
            app_access.clone(),
            ip_filter.clone(),
            http_port.clone(),
            screen_state.clone(),
            dns_block.clone(),
            custom_domains.clone(),
            logging.clone(),
        ];
        let chain = Arc::new(FirewallChain::new(rules));
        let dispatcher = Arc::new(PacketDispatcher::new(chain, Arc::clone(&stats)));

        let firewall = Self {
            dispatcher,
            database,
            network,
            stats,
            app_access,
            ip_filter,
            http_port,
            screen_state,
            dns_block,
            custom_domains,
            logging,
        };
        firewall.apply_settings(config.settings.clone());
        (firewall, worker)
    }

    /// Every rule that reads the settings snapshot.
    pub fn settings_consumers(&self) -> Vec<Arc<dyn SettingsConsumer>> {
        vec![
            self.ip_filter.clone(),
            self.http_port.clone(),
            self.screen_state.clone(),
            self.dns_block.clone(),
            self.logging.clone(),
        ]
    }

    pub fn apply_settings(&self, settings: Settings) {
        let settings = Arc::new(settings);
        for consumer in self.settings_consumers() {
            consumer.apply_settings(Some(Arc::clone(&settings)));
        }
    }

    /// Start the log worker, periodic rebuilds, statistics and, when a
    /// config file is given, polling of its settings and application list.
    pub fn spawn_background(
        &self,
        worker: LogWorker,
        config_path: Option<PathBuf>,
        schedule: Schedule,
    ) -> Vec<JoinHandle<()>> {
        let mut tasks = vec![
            tokio::spawn(worker.run()),
            spawn_periodic_rebuild(Arc::clone(&self.database), schedule.rebuild),
            spawn_stats_reporter(Arc::clone(&self.stats), schedule.stats),
        ];
        if let Some(path) = config_path {
            let file = Arc::new(JsonSettingsFile::new(path));
            tasks.push(watch_settings(
                file.clone(),
                self.settings_consumers(),
                ticks(schedule.settings_poll),
            ));
            tasks.push(watch_applications(
                Arc::clone(&self.app_access),
                file,
                ticks(schedule.settings_poll),
            ));
        }
        tasks
    }
}

/// Yields once per `every`, starting one period from now.
pub fn ticks(every: Duration) -> impl Stream<Item = ()> + Send + 'static {
    let interval = interval_at(Instant::now() + every, every);
    futures::stream::unfold(interval, |mut interval| async move {
        interval.tick().await;
        Some(((), interval))
    })
}

/// Log and reset the counters every `every`.
pub fn spawn_stats_reporter(stats: Arc<Stats>, every: Duration) -> JoinHandle<()> {
    tokio::spawn(async move {
        let started = std::time::Instant::now();
        let mut interval = tokio::time::interval(every);
        interval.tick().await; // Skip first immediate tick
        loop {
            interval.tick().await;
            let snap = stats.snapshot_and_reset();
            info!(
                uptime_secs = started.elapsed().as_secs(),
                packets = snap.packets,
                accepted = snap.accepted,
                dropped = snap.dropped,
                dns_blocked = snap.dns_blocked,
                unparsed = snap.unparsed,
                avg_decision_us = snap.avg_decision_us,
                "stats"
            );
        }
    })
}
