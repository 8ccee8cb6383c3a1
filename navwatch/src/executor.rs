//! Check executor: decides Online/Offline for one service.

use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use log::{debug, info, warn};
use tokio::time::Instant;
use url::Url;

use crate::bus::NotificationBus;
use crate::config::{CheckTarget, ServiceDescriptor};
use crate::error::TransportError;
use crate::status::{Reachability, ServiceStatus};
use crate::transport::{head_within, Reply, RequestMode, Transport};

/// Runs checks and publishes their results.
///
/// Every check is numbered per service id. A result is only published while its number
/// is still the latest, so an older check finishing late cannot overwrite a newer one.
#[derive(Clone)]
pub struct CheckExecutor {
    bus: NotificationBus,
    transport: Arc<dyn Transport>,
    generations: Arc<Mutex<HashMap<String, u64>>>,
}

impl fmt::Debug for CheckExecutor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "CheckExecutor({:?})", self.transport)
    }
}

/// Classify a direct HEAD, falling back once to an opaque request on a plain network
/// failure.
pub async fn reach_http(transport: &dyn Transport, url: &Url, timeout: Duration) -> Reachability {
    match head_within(transport, url, RequestMode::Direct, timeout).await {
        Ok(Reply::Status(code)) if code < 500 => Reachability::Reachable {
            certain: true,
            status_code: Some(code),
        },
        Ok(Reply::Status(code)) => Reachability::Unreachable {
            status_code: Some(code),
            kind: "status",
        },
        Ok(Reply::Opaque) | Err(TransportError::Blocked(_)) => Reachability::Reachable {
            certain: false,
            status_code: Some(0),
        },
        Err(TransportError::Timeout) => Reachability::Unreachable {
            status_code: None,
            kind: TransportError::Timeout.kind(),
        },
        Err(TransportError::ConnectionFailed(reason)) => {
            debug!("Direct check of {} failed ({}), retrying opaque", url, reason);
            match head_within(transport, url, RequestMode::Opaque, timeout).await {
                Ok(_) => Reachability::Reachable {
                    certain: false,
                    status_code: Some(0),
                },
                Err(err) => Reachability::Unreachable {
                    status_code: None,
                    kind: err.kind(),
                },
            }
        }
    }
}

/// Approximate an open port with an opaque request. Only a timeout counts as closed.
pub async fn reach_tcp(transport: &dyn Transport, url: &Url, timeout: Duration) -> Reachability {
    match head_within(transport, url, RequestMode::Opaque, timeout).await {
        Err(TransportError::Timeout) => Reachability::Unreachable {
            status_code: None,
            kind: TransportError::Timeout.kind(),
        },
        _ => Reachability::Reachable {
            certain: false,
            status_code: None,
        },
    }
}

impl CheckExecutor {
    pub fn new(bus: NotificationBus, transport: Arc<dyn Transport>) -> Self {
        Self {
            bus,
            transport,
            generations: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    pub fn transport(&self) -> &dyn Transport {
        self.transport.as_ref()
    }

    fn begin(&self, id: &str) -> u64 {
        let mut generations = self
            .generations
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        let generation = generations.entry(id.to_owned()).or_insert(0);
        *generation += 1;
        *generation
    }

    fn is_current(&self, id: &str, generation: u64) -> bool {
        self.generations
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(id)
            .map_or(false, |latest| *latest == generation)
    }

    /// Check one service and publish the result.
    ///
    /// `Checking` is published before any network I/O. The returned status is the result of
    /// this check even when it was discarded as stale.
    pub async fn check(&self, descriptor: &ServiceDescriptor) -> ServiceStatus {
        self.check_in(descriptor, self.bus.registry().epoch()).await
    }

    /// As [check](Self::check), publishing only while the registry is still in `epoch`.
    pub async fn check_in(&self, descriptor: &ServiceDescriptor, epoch: u64) -> ServiceStatus {
        let id = descriptor.id.as_str();
        let generation = self.begin(id);
        let started = Instant::now();
        self.bus.publish_in(ServiceStatus::checking(id), epoch);

        let reach = match (descriptor.target.url(), &descriptor.target) {
            (Ok(url), CheckTarget::Http { .. }) => {
                reach_http(self.transport(), &url, descriptor.timeout).await
            }
            (Ok(url), CheckTarget::Tcp { .. }) => {
                reach_tcp(self.transport(), &url, descriptor.timeout).await
            }
            (Err(err), target) => {
                warn!("Service {} has an invalid target ({}): {}", id, target, err);
                Reachability::Unreachable {
                    status_code: None,
                    kind: "target",
                }
            }
        };

        let elapsed = u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX);
        let status = reach.into_status(id, elapsed);

        if !self.is_current(id, generation) {
            debug!("Discarding stale result {} (check {})", status, generation);
        } else if self.bus.publish_in(status.clone(), epoch) {
            info!("Service check complete: {} ({}ms)", status, elapsed);
        }
        status
    }
}
