//! Health watching for the services listed on a navigation page.
//!
//! A [HealthMonitor] holds the site [Config], checks that the probe host is reachable and
//! then checks every service that asks for it, publishing each [ServiceStatus] to
//! subscribers as it changes.

pub mod bus;
pub mod config;
pub mod error;
pub mod executor;
pub mod gate;
pub mod monitor;
pub mod registry;
pub mod status;
pub mod transport;

#[cfg(feature = "warp")]
pub mod webservice;

pub use bus::{GlobalState, NotificationBus, Subscription};
pub use config::{Config, Item, MonitorOptions, MonitorOptionsBuilder, ServiceDescriptor};
pub use error::{NavError, TransportError};
pub use monitor::HealthMonitor;
pub use registry::StatusRegistry;
pub use status::{ProbeState, Reachability, ServiceState, ServiceStatus};

/// Name of the Crate
pub const NAME: &str = env!("CARGO_PKG_NAME");
/// Version of the Crate
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
