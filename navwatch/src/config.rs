//! Configuration consumed by the monitor.
//!
//! The dashboard configuration is owned by whoever loads the site file. Only the
//! parts the health checks need are modelled here: the item list (each item may carry a
//! `healthCheck` block) and the top level `healthCheck` policy. Unknown fields are ignored.

use std::fmt;
use std::time::Duration;

use derive_builder::Builder;
use serde::{Deserialize, Serialize};
use serde_with::{serde_as, DurationMilliSeconds, DurationSeconds};
use url::Url;

use crate::error::NavError;

/// Timeout applied when an item does not set one
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(5);
/// Re-check interval applied when an item does not set one
pub const DEFAULT_INTERVAL: Duration = Duration::from_secs(60);

fn default_timeout() -> Duration {
    DEFAULT_TIMEOUT
}

fn default_interval() -> Duration {
    DEFAULT_INTERVAL
}

fn default_true() -> bool {
    true
}

/// How a service is checked
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum CheckMode {
    /// HEAD request against a url
    #[default]
    Http,
    /// Connection attempt against host:port
    Tcp,
}

/// `healthCheck` block of a single item
#[serde_as]
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthCheckConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(rename = "type", default)]
    pub mode: CheckMode,
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default)]
    pub host: Option<String>,
    #[serde(default)]
    pub port: Option<u16>,
    #[serde_as(as = "DurationSeconds<u64>")]
    #[serde(default = "default_interval")]
    pub interval: Duration,
    #[serde_as(as = "DurationSeconds<u64>")]
    #[serde(default = "default_timeout")]
    pub timeout: Duration,
}

/// A navigable entry on the page. Only services usually carry a health check.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Item {
    pub id: String,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(rename = "type", default)]
    pub kind: String,
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default)]
    pub health_check: Option<HealthCheckConfig>,
}

impl Item {
    /// Only items of type `service` are ever checked
    pub fn is_service(&self) -> bool {
        self.kind == "service"
    }

    /// Build the [ServiceDescriptor] for this item, if it is a service with a
    /// `healthCheck` block.
    ///
    /// The http target falls back to the item url, and a tcp target falls back to the
    /// host and port of the item url.
    pub fn descriptor(&self) -> Option<ServiceDescriptor> {
        if !self.is_service() {
            return None;
        }
        let health = self.health_check.as_ref()?;
        let item_url = self.url.as_deref().and_then(|url| Url::parse(url).ok());

        let target = match health.mode {
            CheckMode::Http => CheckTarget::Http {
                url: health
                    .url
                    .clone()
                    .or_else(|| self.url.clone())
                    .unwrap_or_default(),
            },
            CheckMode::Tcp => CheckTarget::Tcp {
                host: health
                    .host
                    .clone()
                    .or_else(|| {
                        item_url
                            .as_ref()
                            .and_then(|url| url.host_str().map(str::to_owned))
                    })
                    .unwrap_or_default(),
                port: health
                    .port
                    .or_else(|| item_url.as_ref().and_then(Url::port_or_known_default))
                    .unwrap_or(80),
            },
        };

        Some(ServiceDescriptor {
            id: self.id.clone(),
            target,
            timeout: health.timeout,
            interval: health.interval,
            enabled: health.enabled,
        })
    }
}

/// Where a check is sent
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "mode", rename_all = "lowercase")]
pub enum CheckTarget {
    Http { url: String },
    Tcp { host: String, port: u16 },
}

impl CheckTarget {
    /// Url the HEAD request is sent to. A tcp target becomes `http://host:port/`.
    pub fn url(&self) -> Result<Url, NavError> {
        let url = match self {
            CheckTarget::Http { url } => Url::parse(url)?,
            CheckTarget::Tcp { host, port } if host.contains(':') && !host.starts_with('[') => {
                Url::parse(&format!("http://[{}]:{}/", host, port))?
            }
            CheckTarget::Tcp { host, port } => Url::parse(&format!("http://{}:{}/", host, port))?,
        };
        Ok(url)
    }
}

impl fmt::Display for CheckTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CheckTarget::Http { url } => write!(f, "http {}", url),
            CheckTarget::Tcp { host, port } => write!(f, "tcp {}:{}", host, port),
        }
    }
}

/// Per service check description derived from an [Item]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceDescriptor {
    pub id: String,
    pub target: CheckTarget,
    pub timeout: Duration,
    pub interval: Duration,
    pub enabled: bool,
}

/// `healthCheck.probe` block: the gateway host that must be reachable first
#[serde_as]
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProbeConfig {
    #[serde(default)]
    pub host: Option<String>,
    #[serde_as(as = "DurationSeconds<u64>")]
    #[serde(default = "default_timeout")]
    pub timeout: Duration,
    #[serde_as(as = "DurationSeconds<u64>")]
    #[serde(default = "default_interval")]
    pub interval: Duration,
}

impl ProbeConfig {
    /// Configured host, ignoring blank values
    pub fn host(&self) -> Option<&str> {
        self.host
            .as_deref()
            .map(str::trim)
            .filter(|host| !host.is_empty())
    }
}

/// Top level `healthCheck` policy
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GlobalHealthPolicy {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default)]
    pub probe: Option<ProbeConfig>,
}

impl Default for GlobalHealthPolicy {
    fn default() -> Self {
        Self {
            enabled: true,
            probe: None,
        }
    }
}

/// The site configuration as seen by the monitor
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Config {
    #[serde(default)]
    pub items: Vec<Item>,
    #[serde(default)]
    pub health_check: GlobalHealthPolicy,
}

impl Config {
    /// Descriptor for the item with this id
    pub fn descriptor(&self, id: &str) -> Option<ServiceDescriptor> {
        self.items
            .iter()
            .find(|item| item.id == id)
            .and_then(Item::descriptor)
    }

    /// Descriptors of every item whose health check is enabled, in config order
    pub fn enabled_descriptors(&self) -> Vec<ServiceDescriptor> {
        self.items
            .iter()
            .filter_map(Item::descriptor)
            .filter(|descriptor| descriptor.enabled)
            .collect()
    }
}

/// Options for the monitor itself rather than the site
#[serde_as]
#[derive(Debug, Clone, Deserialize, Builder)]
#[serde(default)]
#[builder(default)]
pub struct MonitorOptions {
    /// Hostname this page is served from. A probe against it is never sent.
    #[builder(setter(into, strip_option))]
    pub own_hostname: Option<String>,
    /// Offset between the start of consecutive initial checks
    #[serde_as(as = "DurationMilliSeconds<u64>")]
    pub stagger: Duration,
    /// Re-check services and probe on their configured intervals
    pub periodic: bool,
    /// User agent sent with every request
    #[builder(setter(into))]
    pub user_agent: String,
}

impl Default for MonitorOptions {
    fn default() -> Self {
        Self {
            own_hostname: std::env::var("HOSTNAME").ok(),
            stagger: Duration::from_millis(100),
            periodic: true,
            user_agent: format!("{}/{}", crate::NAME, crate::VERSION),
        }
    }
}
