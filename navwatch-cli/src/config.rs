use std::net::SocketAddr;
use std::path::Path;

use navwatch::MonitorOptions;
use serde::Deserialize;

use figment::{
    providers::{Env, Format, Yaml},
    Figment,
};

use crate::error::CliError;

fn default_address() -> SocketAddr {
    SocketAddr::from(([127, 0, 0, 1], 8079))
}

#[derive(Debug, Deserialize, Clone)]
pub struct WebServiceConfig {
    #[serde(default = "default_address")]
    pub address: SocketAddr,
}

impl Default for WebServiceConfig {
    fn default() -> Self {
        Self {
            address: default_address(),
        }
    }
}

/// The dashboard site file plus the sections only this binary reads
#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    #[serde(flatten)]
    pub site: navwatch::Config,
    #[serde(default)]
    pub monitor: MonitorOptions,
    #[serde(default)]
    pub webservice: WebServiceConfig,
}

impl Config {
    /// Yaml file overlaid with `NAVWATCH_` environment variables. Nested keys are split on
    /// `__`, eg `NAVWATCH_MONITOR__PERIODIC=false`.
    pub fn figment<P: AsRef<Path>>(path: P) -> Figment {
        Figment::new()
            .merge(Yaml::file(path))
            .merge(Env::prefixed("NAVWATCH_").split("__"))
    }

    pub fn load<P: AsRef<Path>>(path: P) -> Result<Config, CliError> {
        Ok(Self::figment(path).extract()?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use figment::Jail;
    use std::time::Duration;

    const SITE: &str = r#"
healthCheck:
  probe:
    host: 192.168.1.1
    timeout: 3
items:
  - id: nas
    type: service
    url: http://nas.local:5000
    healthCheck:
      enabled: true
monitor:
  stagger: 250
webservice:
  address: 0.0.0.0:9000
"#;

    #[test]
    fn test_load_site_and_sections() {
        Jail::expect_with(|jail| {
            jail.create_file("site.yaml", SITE)?;
            let config = Config::load("site.yaml").unwrap();

            assert_eq!(config.site.items.len(), 1);
            assert_eq!(
                config.site.health_check.probe.as_ref().and_then(|p| p.host()),
                Some("192.168.1.1")
            );
            assert_eq!(config.monitor.stagger, Duration::from_millis(250));
            assert!(config.monitor.periodic);
            assert_eq!(config.webservice.address.port(), 9000);
            Ok(())
        });
    }

    #[test]
    fn test_env_overrides() {
        Jail::expect_with(|jail| {
            jail.create_file("site.yaml", SITE)?;
            jail.set_env("NAVWATCH_MONITOR__PERIODIC", "false");
            jail.set_env("NAVWATCH_WEBSERVICE__ADDRESS", "127.0.0.1:7000");

            let config = Config::load("site.yaml").unwrap();
            assert!(!config.monitor.periodic);
            assert_eq!(config.webservice.address, default_address_with(7000));
            Ok(())
        });
    }

    #[test]
    fn test_defaults_for_bare_site() {
        Jail::expect_with(|jail| {
            jail.create_file("site.yaml", "items: []\n")?;
            let config = Config::load("site.yaml").unwrap();

            assert!(config.site.items.is_empty());
            assert!(config.site.health_check.enabled);
            assert_eq!(config.webservice.address, default_address());
            Ok(())
        });
    }

    fn default_address_with(port: u16) -> SocketAddr {
        SocketAddr::from(([127, 0, 0, 1], port))
    }
}
