//! Probe gate: decides whether the probe host is reachable before any service is checked.

use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use log::{info, warn};
use url::Url;

use crate::bus::{GlobalState, NotificationBus};
use crate::config::GlobalHealthPolicy;
use crate::error::TransportError;
use crate::status::{ProbeState, Reachability};
use crate::transport::{head_within, RequestMode, Transport};

/// Hosts that are always treated as reachable
const LOOPBACK: [&str; 2] = ["127.0.0.1", "localhost"];

#[derive(Clone)]
pub struct ProbeGate {
    bus: NotificationBus,
    transport: Arc<dyn Transport>,
    own_hostname: Option<String>,
    state: Arc<Mutex<GlobalState>>,
}

impl fmt::Debug for ProbeGate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ProbeGate({:?})", *self.lock())
    }
}

/// Url for a probe host which may be given bare (`nas.local:8080`) or with a scheme
fn probe_url(host: &str) -> Result<Url, url::ParseError> {
    if host.contains("://") {
        Url::parse(host)
    } else {
        Url::parse(&format!("http://{}/", host))
    }
}

/// A response of any kind, or a blocked reply, proves the host is there.
async fn reach_probe(transport: &dyn Transport, url: &Url, timeout: Duration) -> Reachability {
    match head_within(transport, url, RequestMode::Direct, timeout).await {
        Ok(_) => Reachability::Reachable {
            certain: true,
            status_code: None,
        },
        Err(TransportError::Blocked(_)) => Reachability::Reachable {
            certain: false,
            status_code: None,
        },
        Err(err) => Reachability::Unreachable {
            status_code: None,
            kind: err.kind(),
        },
    }
}

impl ProbeGate {
    pub fn new(
        bus: NotificationBus,
        transport: Arc<dyn Transport>,
        own_hostname: Option<String>,
    ) -> Self {
        Self {
            bus,
            transport,
            own_hostname,
            state: Arc::new(Mutex::new(GlobalState {
                probe: ProbeState::Unknown,
                enabled: true,
            })),
        }
    }

    fn lock(&self) -> MutexGuard<'_, GlobalState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn state(&self) -> GlobalState {
        *self.lock()
    }

    pub fn probe_state(&self) -> ProbeState {
        self.lock().probe
    }

    pub fn global_enabled(&self) -> bool {
        self.lock().enabled
    }

    /// Service checks may run
    pub fn is_open(&self) -> bool {
        let state = self.lock();
        state.enabled && state.probe == ProbeState::Online
    }

    /// Store the new state and tell global subscribers when it differs from the old one.
    ///
    /// A closed gate clears the registry. The state is stored first, so a check starting
    /// after the clear already sees the gate closed and one that started before it is
    /// dropped by the registry epoch.
    fn transition(&self, next: GlobalState) {
        let previous = std::mem::replace(&mut *self.lock(), next);
        if !(next.enabled && next.probe == ProbeState::Online) {
            self.bus.registry().clear_all();
        }
        if previous != next {
            info!(
                "Probe state changed to {}/{} from {}/{}",
                next.probe, next.enabled, previous.probe, previous.enabled
            );
            self.bus.publish_global(next);
        }
    }

    /// Probe host matches loopback or the host this page is served from
    fn is_local(&self, host: &str) -> bool {
        let name = probe_url(host)
            .ok()
            .and_then(|url| url.host_str().map(str::to_owned))
            .unwrap_or_else(|| host.to_owned());
        LOOPBACK.iter().any(|local| name.eq_ignore_ascii_case(local))
            || self
                .own_hostname
                .as_deref()
                .map_or(false, |own| name.eq_ignore_ascii_case(own))
    }

    /// Evaluate `policy` and set the probe state. Returns true when checks may run.
    ///
    /// A disabled policy forces the probe offline and clears every stored status. A
    /// policy without a probe host does not gate checks at all.
    pub async fn init_probe(&self, policy: &GlobalHealthPolicy) -> bool {
        if !policy.enabled {
            info!("Health checks disabled by policy");
            self.transition(GlobalState {
                probe: ProbeState::Offline,
                enabled: false,
            });
            return false;
        }

        let Some(probe) = policy.probe.as_ref().filter(|probe| probe.host().is_some()) else {
            info!("No probe host configured, service checks are not gated");
            self.transition(GlobalState {
                probe: ProbeState::Online,
                enabled: true,
            });
            return true;
        };
        let host = probe.host().unwrap_or_default();

        let reach = if self.is_local(host) {
            info!("Probe host {} is local, skipping request", host);
            Reachability::Reachable {
                certain: true,
                status_code: None,
            }
        } else {
            match probe_url(host) {
                Ok(url) => reach_probe(self.transport.as_ref(), &url, probe.timeout).await,
                Err(err) => {
                    warn!("Probe host `{}` is not a valid address: {}", host, err);
                    Reachability::Unreachable {
                        status_code: None,
                        kind: "target",
                    }
                }
            }
        };

        let online = reach.is_reachable();
        if !online {
            warn!("Probe host {} unreachable: {:?}", host, reach);
        }
        self.transition(GlobalState {
            probe: if online {
                ProbeState::Online
            } else {
                ProbeState::Offline
            },
            enabled: true,
        });
        online
    }
}
