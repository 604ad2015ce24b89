//! Settings and the JSON configuration file.

use std::fs;
use std::net::IpAddr;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use futures::{Stream, StreamExt};
use serde::Deserialize;
use tokio::task::JoinHandle;
use tracing::{debug, error};

use crate::blocklist::{BlocklistSource, HostException};
use crate::error::ConfigError;
use crate::firewall::collab::{AppInfo, ApplicationRegistry, IpEntry};
use crate::firewall::network::NetworkType;
use crate::firewall::rules::CustomDomain;

/// User preferences the rules read.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Settings {
    pub block_port80: bool,
    pub allow_local: bool,
    pub logs_enabled: bool,
    pub block_wifi_when_screen_off: bool,
    pub block_mobile_when_screen_off: bool,
    pub dns_servers: Vec<IpAddr>,
    pub dns_blocking_enabled: bool,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            block_port80: false,
            allow_local: true,
            logs_enabled: false,
            block_wifi_when_screen_off: false,
            block_mobile_when_screen_off: false,
            dns_servers: Vec::new(),
            dns_blocking_enabled: true,
        }
    }
}

/// Everything needed to assemble a firewall offline.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct FirewallConfig {
    pub settings: Settings,
    pub applications: Vec<AppInfo>,
    pub ip_allow: Vec<IpEntry>,
    pub custom_domains: Vec<CustomDomain>,
    pub sources: Vec<BlocklistSource>,
    pub exceptions: Vec<HostException>,
    /// Where downloaded remote lists are cached.
    pub cache_dir: Option<PathBuf>,
    pub network: NetworkType,
    pub screen_on: bool,
}

impl Default for FirewallConfig {
    fn default() -> Self {
        Self {
            settings: Settings::default(),
            applications: Vec::new(),
            ip_allow: Vec::new(),
            custom_domains: Vec::new(),
            sources: Vec::new(),
            exceptions: Vec::new(),
            cache_dir: None,
            network: NetworkType::Wifi,
            screen_on: true,
        }
    }
}

impl FirewallConfig {
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let text = fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_json(&text)
    }

    pub fn from_json(text: &str) -> Result<Self, ConfigError> {
        Ok(serde_json::from_str(text)?)
    }
}

/// Where settings snapshots come from.
pub trait SettingsSource: Send + Sync {
    fn load(&self) -> Result<Settings, ConfigError>;
}

/// A component that keeps its own copy of the settings.
///
/// `None` means the settings could not be loaded; the consumer must then
/// behave as if it were not in the chain.
pub trait SettingsConsumer: Send + Sync {
    fn apply_settings(&self, settings: Option<Arc<Settings>>);
}

/// Reads settings and applications from a [`FirewallConfig`] file on every call.
#[derive(Debug, Clone)]
pub struct JsonSettingsFile {
    path: PathBuf,
}

impl JsonSettingsFile {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

impl SettingsSource for JsonSettingsFile {
    fn load(&self) -> Result<Settings, ConfigError> {
        FirewallConfig::load(&self.path).map(|c| c.settings)
    }
}

impl ApplicationRegistry for JsonSettingsFile {
    fn applications(&self) -> Result<Vec<AppInfo>, ConfigError> {
        FirewallConfig::load(&self.path).map(|c| c.applications)
    }
}

/// Load one snapshot and hand it to every consumer.
///
/// Returns whether the load succeeded; on failure consumers receive `None`.
pub fn refresh_settings(source: &dyn SettingsSource, consumers: &[Arc<dyn SettingsConsumer>]) -> bool {
    let settings = match source.load() {
        Ok(settings) => {
            debug!(?settings, "settings loaded");
            Some(Arc::new(settings))
        }
        Err(e) => {
            error!(error = %e, "cannot load settings, dependent rules disabled");
            None
        }
    };
    let loaded = settings.is_some();
    for consumer in consumers {
        consumer.apply_settings(settings.clone());
    }
    loaded
}

/// Refresh now and whenever `changes` yields.
pub fn watch_settings<S>(
    source: Arc<dyn SettingsSource>,
    consumers: Vec<Arc<dyn SettingsConsumer>>,
    changes: S,
) -> JoinHandle<()>
where
    S: Stream<Item = ()> + Send + 'static,
{
    tokio::spawn(async move {
        let mut changes = std::pin::pin!(changes);
        loop {
            refresh_settings(source.as_ref(), &consumers);
            if changes.next().await.is_none() {
                break;
            }
        }
    })
}
