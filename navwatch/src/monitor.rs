use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock};
use std::time::Duration;

use futures::future::join_all;
use log::{debug, info, warn};
use tokio_util::sync::CancellationToken;

use crate::bus::{GlobalState, NotificationBus, Subscription};
use crate::config::{Config, MonitorOptions, ServiceDescriptor};
use crate::error::NavError;
use crate::executor::CheckExecutor;
use crate::gate::ProbeGate;
use crate::registry::StatusRegistry;
use crate::status::{ProbeState, ServiceStatus};
use crate::transport::{HttpTransport, Transport};

/// Cancellation for background work. `services` is a child of `root` and is replaced each
/// time service checks are scheduled.
#[derive(Debug)]
struct Periodic {
    root: CancellationToken,
    services: CancellationToken,
}

impl Periodic {
    fn new() -> Self {
        let root = CancellationToken::new();
        let services = root.child_token();
        Self { root, services }
    }
}

#[cfg_attr(doc, aquamarine::aquamarine)]
/// Health monitor for the services listed in a site [Config].
///
/// ```mermaid
/// sequenceDiagram
///     participant Caller
///     participant Monitor
///     participant Gate
///     participant Executor
///     participant Bus
///
///     Caller->>+Monitor: initialize(config)
///     Monitor->>Monitor: cancel periodic work, clear registry
///     Monitor->>+Gate: init_probe(policy)
///     Gate-->>Bus: publish_global (on transition)
///     Gate->>-Monitor: online
///     Monitor->>-Caller: online
///
///     rect rgba(50,50,255,0.1)
///     note right of Monitor: only when online, one task per service
///     Monitor->>Monitor: sleep(stagger * index)
///     Monitor->>+Executor: check(descriptor)
///     Executor->>Bus: publish(Checking)
///     Executor->>Bus: publish(Online | Offline)
///     Executor->>-Monitor: status
///     end
/// ```
///
/// Clones share all state so a monitor can be handed to spawned tasks and web handlers.
#[derive(Clone)]
pub struct HealthMonitor {
    config: Arc<RwLock<Arc<Config>>>,
    bus: NotificationBus,
    gate: ProbeGate,
    executor: CheckExecutor,
    options: MonitorOptions,
    periodic: Arc<Mutex<Periodic>>,
}

impl fmt::Debug for HealthMonitor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HealthMonitor")
            .field("gate", &self.gate)
            .field("services", &self.config().items.len())
            .field("options", &self.options)
            .finish()
    }
}

impl HealthMonitor {
    /// Monitor sending its checks over http
    pub fn new(options: MonitorOptions) -> Result<Self, NavError> {
        let transport = HttpTransport::new(&options.user_agent)?;
        Ok(Self::with_transport(options, Arc::new(transport)))
    }

    /// Monitor sending its checks through `transport`
    pub fn with_transport(options: MonitorOptions, transport: Arc<dyn Transport>) -> Self {
        let bus = NotificationBus::new(StatusRegistry::new());
        let gate = ProbeGate::new(bus.clone(), transport.clone(), options.own_hostname.clone());
        let executor = CheckExecutor::new(bus.clone(), transport);

        Self {
            config: Arc::new(RwLock::new(Arc::new(Config::default()))),
            bus,
            gate,
            executor,
            options,
            periodic: Arc::new(Mutex::new(Periodic::new())),
        }
    }

    fn periodic(&self) -> MutexGuard<'_, Periodic> {
        self.periodic.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Configuration currently held
    pub fn config(&self) -> Arc<Config> {
        self.config
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn options(&self) -> &MonitorOptions {
        &self.options
    }

    pub fn registry(&self) -> &StatusRegistry {
        self.bus.registry()
    }

    /// Replace the configuration and start over.
    ///
    /// Background work from the previous configuration is cancelled and every stored
    /// status is dropped before the probe gate runs. Service checks are only scheduled when
    /// the gate opens. Returns the gate result.
    pub async fn initialize(&self, config: Config) -> bool {
        {
            let mut periodic = self.periodic();
            periodic.root.cancel();
            *periodic = Periodic::new();
        }
        let config = Arc::new(config);
        *self.config.write().unwrap_or_else(PoisonError::into_inner) = config.clone();
        self.bus.registry().clear_all();

        info!(
            "Initialising monitor with {} items ({} checked)",
            config.items.len(),
            config.enabled_descriptors().len()
        );

        let online = self.init_probe().await;
        if online {
            self.schedule_checks();
        }
        if self.options.periodic {
            self.spawn_probe_loop();
        }
        online
    }

    /// Run the probe gate against the held policy. A closed gate cancels the scheduled
    /// service checks.
    pub async fn init_probe(&self) -> bool {
        let config = self.config();
        let online = self.gate.init_probe(&config.health_check).await;
        if !online {
            self.reset_service_token();
        }
        online
    }

    /// Fallible lookup of the descriptor for `id`
    pub fn descriptor(&self, id: &str) -> Result<ServiceDescriptor, NavError> {
        self.config()
            .descriptor(id)
            .ok_or_else(|| NavError::UnknownService(id.to_owned()))
    }

    /// Check one service now.
    ///
    /// Nothing happens when the service has no descriptor, its check is disabled or the
    /// gate is not open. Otherwise the published result is returned.
    pub async fn check_once(&self, id: &str) -> Option<ServiceStatus> {
        let descriptor = match self.descriptor(id) {
            Ok(descriptor) => descriptor,
            Err(err) => {
                warn!("{}", err);
                return None;
            }
        };
        if !descriptor.enabled {
            debug!("Health check for {} is disabled", id);
            return None;
        }
        let epoch = self.registry().epoch();
        if !self.gate.is_open() {
            debug!("Skipping check of {}, probe is {}", id, self.gate.probe_state());
            return None;
        }
        Some(self.executor.check_in(&descriptor, epoch).await)
    }

    /// Show `Checking` for a service before its first check has run.
    ///
    /// Only applies when a badge would be shown for it. Returns true when published.
    pub fn set_initial_checking_status(&self, id: &str) -> bool {
        match self.config().descriptor(id) {
            Some(descriptor) if self.should_show_health_status(&descriptor) => {
                self.bus.publish(ServiceStatus::checking(id));
                true
            }
            _ => false,
        }
    }

    pub fn get_status(&self, id: &str) -> ServiceStatus {
        self.bus.registry().get(id)
    }

    pub fn get_probe_status(&self) -> ProbeState {
        self.gate.probe_state()
    }

    pub fn is_global_health_check_enabled(&self) -> bool {
        self.gate.global_enabled()
    }

    /// Probe and policy state as delivered to global subscribers
    pub fn global_state(&self) -> GlobalState {
        self.gate.state()
    }

    pub fn should_show_health_status(&self, descriptor: &ServiceDescriptor) -> bool {
        self.gate.is_open() && descriptor.enabled
    }

    /// Every stored status, ordered by id
    pub fn statuses(&self) -> Vec<ServiceStatus> {
        self.bus.registry().snapshot()
    }

    pub fn subscribe_service<F>(&self, id: &str, callback: F) -> Subscription
    where
        F: Fn(&ServiceStatus) + Send + Sync + 'static,
    {
        self.bus.subscribe_service(id, callback)
    }

    pub fn unsubscribe_service(&self, id: &str, subscription: Subscription) -> bool {
        self.bus.unsubscribe_service(id, subscription)
    }

    pub fn subscribe_global<F>(&self, callback: F) -> Subscription
    where
        F: Fn(&GlobalState) + Send + Sync + 'static,
    {
        self.bus.subscribe_global(callback)
    }

    pub fn unsubscribe_global(&self, subscription: Subscription) -> bool {
        self.bus.unsubscribe_global(subscription)
    }

    /// Run the probe gate again. A gate that opens schedules service checks.
    pub async fn recheck_probe(&self) -> bool {
        let was_open = self.gate.is_open();
        let online = self.init_probe().await;
        if online && !was_open {
            info!("Probe came back, scheduling service checks");
            self.schedule_checks();
        }
        online
    }

    /// Check every enabled service concurrently and return the results
    pub async fn recheck_all_services(&self) -> Vec<ServiceStatus> {
        let epoch = self.registry().epoch();
        if !self.gate.is_open() {
            debug!("Skipping recheck, probe is {}", self.gate.probe_state());
            return Vec::new();
        }
        let descriptors = self.config().enabled_descriptors();
        join_all(
            descriptors
                .iter()
                .map(|descriptor| self.executor.check_in(descriptor, epoch)),
        )
        .await
    }

    /// Stop all background checks
    pub fn shutdown(&self) {
        info!("Shutting down monitor");
        self.periodic().root.cancel();
    }

    /// Spawn one task per enabled service. Each waits its stagger offset, checks once and
    /// then, when periodic checks are on, repeats on the service interval.
    fn schedule_checks(&self) {
        let token = self.reset_service_token();

        for (index, descriptor) in self.config().enabled_descriptors().into_iter().enumerate() {
            let delay = self.options.stagger.saturating_mul(index as u32);
            let monitor = self.clone();
            let token = token.clone();
            tokio::spawn(async move {
                tokio::select! {
                    _ = token.cancelled() => {
                        debug!("Checks of {} cancelled", descriptor.id);
                    },
                    _ = monitor.run_service(&descriptor, delay) => {},
                }
            });
        }
    }

    /// Cancel the service tasks and return the token for the next batch
    fn reset_service_token(&self) -> CancellationToken {
        let mut periodic = self.periodic();
        periodic.services.cancel();
        periodic.services = periodic.root.child_token();
        periodic.services.clone()
    }

    async fn run_service(&self, descriptor: &ServiceDescriptor, delay: Duration) {
        tokio::time::sleep(delay).await;
        self.check_once(&descriptor.id).await;

        if !self.options.periodic || descriptor.interval.is_zero() {
            return;
        }
        loop {
            tokio::time::sleep(descriptor.interval).await;
            self.check_once(&descriptor.id).await;
        }
    }

    fn spawn_probe_loop(&self) {
        let config = self.config();
        if !config.health_check.enabled {
            return;
        }
        let Some(interval) = config
            .health_check
            .probe
            .as_ref()
            .filter(|probe| probe.host().is_some())
            .map(|probe| probe.interval)
            .filter(|interval| !interval.is_zero())
        else {
            return;
        };

        let token = self.periodic().root.clone();
        let monitor = self.clone();
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = token.cancelled() => {
                        debug!("Probe re-checks cancelled");
                        break;
                    },
                    _ = tokio::time::sleep(interval) => {
                        monitor.recheck_probe().await;
                    },
                }
            }
        });
    }
}
