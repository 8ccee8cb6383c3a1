//! What each subcommand does once the configuration is loaded.

use std::collections::HashSet;
use std::time::Duration;

use log::{error, info, warn};
use navwatch::webservice::service_listen;
use navwatch::{GlobalState, HealthMonitor, ProbeState, ServiceState, ServiceStatus, Subscription};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::config::Config;
use crate::error::CliError;
use crate::tokio_tools::wait_for_shutdown;

/// Check the site describes something the monitor can work with and summarise it
pub fn validate(config: &Config) -> Result<Vec<String>, CliError> {
    let site = &config.site;
    let mut seen = HashSet::new();
    for item in &site.items {
        if !seen.insert(item.id.as_str()) {
            return Err(CliError::Invalid(format!("duplicate item id `{}`", item.id)));
        }
    }

    let mut summary = vec![format!(
        "{} items, health checks {}",
        site.items.len(),
        if site.health_check.enabled {
            "enabled"
        } else {
            "disabled"
        }
    )];
    match site.health_check.probe.as_ref().and_then(|probe| probe.host()) {
        Some(host) => summary.push(format!("probe host {}", host)),
        None => summary.push("no probe host, checks are not gated".to_owned()),
    }

    for descriptor in site.items.iter().filter_map(|item| item.descriptor()) {
        descriptor.target.url().map_err(|err| {
            CliError::Invalid(format!("service `{}`: {}", descriptor.id, err))
        })?;
        summary.push(format!(
            "{}: {} every {}s (timeout {}s){}",
            descriptor.id,
            descriptor.target,
            descriptor.interval.as_secs(),
            descriptor.timeout.as_secs(),
            if descriptor.enabled { "" } else { ", disabled" }
        ));
    }
    Ok(summary)
}

/// Outcome of a single [check] run
#[derive(Debug)]
pub struct CheckReport {
    /// Probe and policy state after the run
    pub gate: GlobalState,
    /// Ids of every service that should have been checked
    pub expected: Vec<String>,
    pub statuses: Vec<ServiceStatus>,
}

impl CheckReport {
    /// The gate opened and every expected service came back Online
    pub fn all_online(&self) -> bool {
        self.gate.enabled
            && self.gate.probe == ProbeState::Online
            && self.expected.iter().all(|id| {
                self.statuses
                    .iter()
                    .any(|status| &status.id == id && status.state == ServiceState::Online)
            })
    }
}

/// Initialise a monitor and wait for every enabled service to settle once
pub async fn check(config: Config) -> Result<CheckReport, CliError> {
    let mut options = config.monitor.clone();
    options.periodic = false;
    let monitor = HealthMonitor::new(options)?;

    let descriptors = config.site.enabled_descriptors();
    let expected = descriptors.iter().map(|d| d.id.clone()).collect::<Vec<_>>();
    let budget = descriptors
        .iter()
        .map(|descriptor| descriptor.timeout)
        .max()
        .unwrap_or_default()
        .saturating_mul(2)
        + monitor
            .options()
            .stagger
            .saturating_mul(descriptors.len() as u32)
        + Duration::from_secs(1);

    let (settled_tx, mut settled_rx) = mpsc::unbounded_channel();
    let subscriptions: Vec<(String, Subscription)> = descriptors
        .iter()
        .map(|descriptor| {
            let settled_tx = settled_tx.clone();
            let subscription = monitor.subscribe_service(&descriptor.id, move |status| {
                if matches!(status.state, ServiceState::Online | ServiceState::Offline) {
                    let _ = settled_tx.send(status.id.clone());
                }
            });
            (descriptor.id.clone(), subscription)
        })
        .collect();

    if monitor.initialize(config.site).await {
        let mut pending: HashSet<String> = expected.iter().cloned().collect();
        let deadline = tokio::time::Instant::now() + budget;
        while !pending.is_empty() {
            match tokio::time::timeout_at(deadline, settled_rx.recv()).await {
                Ok(Some(id)) => {
                    pending.remove(&id);
                }
                Ok(None) | Err(_) => {
                    warn!("Gave up waiting for {:?}", pending);
                    break;
                }
            }
        }
    } else {
        warn!(
            "Probe is {}, no services were checked",
            monitor.get_probe_status()
        );
    }

    for (id, subscription) in subscriptions {
        monitor.unsubscribe_service(&id, subscription);
    }
    monitor.shutdown();
    Ok(CheckReport {
        gate: monitor.global_state(),
        expected,
        statuses: monitor.statuses(),
    })
}

/// One line per status for terminal output
pub fn status_line(status: &ServiceStatus) -> String {
    let mut line = format!("{:<20} {:<8}", status.id, status.state.badge());
    if let Some(code) = status.status_code {
        line.push_str(&format!(" {}", code));
    }
    if let Some(ms) = status.response_time_ms {
        line.push_str(&format!(" {}ms", ms));
    }
    if let Some(kind) = &status.error_kind {
        line.push_str(&format!(" ({})", kind));
    }
    line
}

/// Log lines for every change the monitor publishes
struct Watchers {
    global: Subscription,
    services: Vec<(String, Subscription)>,
}

impl Watchers {
    fn attach(monitor: &HealthMonitor, config: &Config) -> Self {
        let global = monitor.subscribe_global(|state| {
            if state.enabled {
                info!("Probe is {}", state.probe);
            } else {
                info!("Health checks are disabled");
            }
        });
        let services = config
            .site
            .enabled_descriptors()
            .into_iter()
            .map(|descriptor| {
                let subscription = monitor.subscribe_service(&descriptor.id, |status| {
                    info!("{}", status_line(status));
                });
                (descriptor.id, subscription)
            })
            .collect();
        Self { global, services }
    }

    fn release(self, monitor: &HealthMonitor) {
        monitor.unsubscribe_global(self.global);
        for (id, subscription) in self.services {
            monitor.unsubscribe_service(&id, subscription);
        }
    }
}

/// Keep checking and log every status change until stopped
pub async fn watch(config: Config, ct: CancellationToken) -> Result<(), CliError> {
    let monitor = HealthMonitor::new(config.monitor.clone())?;
    let watchers = Watchers::attach(&monitor, &config);
    monitor.initialize(config.site).await;

    wait_for_shutdown(ct).await?;

    monitor.shutdown();
    watchers.release(&monitor);
    Ok(())
}

/// [watch] plus the json status service
pub async fn serve(config: Config, ct: CancellationToken) -> Result<(), CliError> {
    let monitor = HealthMonitor::new(config.monitor.clone())?;
    let watchers = Watchers::attach(&monitor, &config);
    let (_addr, server) = service_listen(monitor.clone(), config.webservice.address, ct.clone())?;
    monitor.initialize(config.site).await;

    wait_for_shutdown(ct).await?;

    monitor.shutdown();
    watchers.release(&monitor);
    if let Err(err) = server.await {
        error!("Status service did not stop cleanly: {}", err);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::WebServiceConfig;
    use figment::providers::{Format, Yaml};
    use figment::Figment;
    use navwatch::MonitorOptionsBuilder;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    fn config(yaml: &str) -> Config {
        Config {
            site: site(yaml),
            monitor: MonitorOptionsBuilder::default()
                .stagger(Duration::from_millis(10))
                .build()
                .unwrap(),
            webservice: WebServiceConfig::default(),
        }
    }

    fn site(yaml: &str) -> navwatch::Config {
        Figment::from(Yaml::string(yaml)).extract().unwrap()
    }

    /// Answer every connection with `status`
    async fn serve_status(status: &'static str) -> u16 {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        tokio::spawn(async move {
            loop {
                let (mut socket, _) = listener.accept().await.unwrap();
                let mut buffer = [0u8; 1024];
                let _ = socket.read(&mut buffer).await;
                let reply = format!(
                    "HTTP/1.1 {}\r\ncontent-length: 0\r\nconnection: close\r\n\r\n",
                    status
                );
                let _ = socket.write_all(reply.as_bytes()).await;
            }
        });
        port
    }

    #[test]
    fn test_validate_summary() {
        let config = config(
            r#"
healthCheck:
  probe:
    host: 10.0.0.1
items:
  - id: nas
    type: service
    url: http://nas.local
    healthCheck:
      enabled: true
  - id: ssh
    type: service
    healthCheck:
      enabled: false
      type: tcp
      host: box.local
      port: 22
"#,
        );
        let summary = validate(&config).unwrap();
        assert_eq!(summary[0], "2 items, health checks enabled");
        assert_eq!(summary[1], "probe host 10.0.0.1");
        assert!(summary[2].starts_with("nas: http http://nas.local every 60s"));
        assert!(summary[3].ends_with(", disabled"));
    }

    #[test]
    fn test_validate_rejects_duplicates_and_bad_targets() {
        let duplicate = config("items:\n  - id: a\n  - id: a\n");
        assert!(matches!(validate(&duplicate), Err(CliError::Invalid(_))));

        let no_url = config(
            "items:\n  - id: a\n    type: service\n    healthCheck:\n      enabled: true\n",
        );
        assert!(matches!(validate(&no_url), Err(CliError::Invalid(_))));
    }

    #[test]
    fn test_status_line() {
        let mut status = ServiceStatus::checking("nas");
        status.state = ServiceState::Offline;
        status.status_code = Some(503);
        status.response_time_ms = Some(12);
        status.error_kind = Some("status".to_owned());
        assert_eq!(
            status_line(&status),
            format!("{:<20} {:<8} 503 12ms (status)", "nas", "Offline")
        );
    }

    #[tokio::test]
    #[cfg_attr(miri, ignore)]
    async fn test_check_settles_every_service() {
        let up = serve_status("200 OK").await;
        let down = serve_status("502 Bad Gateway").await;
        let config = config(&format!(
            r#"
items:
  - id: up
    type: service
    url: http://127.0.0.1:{up}/
    healthCheck:
      enabled: true
      timeout: 2
  - id: down
    type: service
    healthCheck:
      enabled: true
      url: http://127.0.0.1:{down}/
      timeout: 2
"#
        ));

        let report = check(config).await.unwrap();
        assert!(!report.all_online());
        let states: Vec<_> = report
            .statuses
            .iter()
            .map(|status| (status.id.as_str(), status.state, status.status_code))
            .collect();
        assert_eq!(
            states,
            vec![
                ("down", ServiceState::Offline, Some(502)),
                ("up", ServiceState::Online, Some(200)),
            ]
        );
    }

    #[tokio::test]
    async fn test_check_with_policy_disabled() {
        let config = config(
            r#"
healthCheck:
  enabled: false
items:
  - id: nas
    type: service
    url: http://nas.local
    healthCheck:
      enabled: true
"#,
        );
        let report = check(config).await.unwrap();
        assert!(report.statuses.is_empty());
        assert!(!report.gate.enabled);
        assert_eq!(report.expected, vec!["nas"]);
        assert!(!report.all_online());
    }

    #[tokio::test]
    #[cfg_attr(miri, ignore)]
    async fn test_check_all_online_needs_every_service() {
        let up = serve_status("204 No Content").await;
        let config = config(&format!(
            r#"
items:
  - id: up
    type: service
    url: http://127.0.0.1:{up}/
    healthCheck:
      enabled: true
      timeout: 2
"#
        ));
        let report = check(config).await.unwrap();
        assert!(report.all_online());

        let unchecked = CheckReport {
            statuses: Vec::new(),
            ..report
        };
        assert!(!unchecked.all_online());
    }
}
