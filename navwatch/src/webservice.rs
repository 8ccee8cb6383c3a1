//! Read-only json view of a [HealthMonitor] served with warp.

use std::net::SocketAddr;

use log::info;
use tokio_util::sync::CancellationToken;
use warp::Filter;

use crate::error::NavError;
use crate::monitor::HealthMonitor;

/// Routes under `/navwatch`
pub fn navwatch_service(
    monitor: HealthMonitor,
) -> impl Filter<Extract = impl warp::Reply, Error = warp::Rejection> + Clone {
    let version = warp::path("version")
        .and(warp::path::end())
        .and(warp::get())
        .and_then(handlers::version);

    let probe = warp::path("probe")
        .and(warp::path::end())
        .and(warp::get())
        .and(with_monitor(monitor.clone()))
        .and_then(handlers::probe);

    let status_all = warp::path("status")
        .and(warp::path::end())
        .and(warp::get())
        .and(with_monitor(monitor.clone()))
        .and_then(handlers::status_all);

    let status_one = warp::path!("status" / String)
        .and(warp::get())
        .and(with_monitor(monitor.clone()))
        .and_then(handlers::status_one);

    let recheck = warp::path("recheck")
        .and(warp::path::end())
        .and(warp::post())
        .and(with_monitor(monitor))
        .and_then(handlers::recheck);

    warp::path("navwatch").and(
        version
            .or(probe)
            .or(status_all)
            .or(status_one)
            .or(recheck),
    )
}

fn with_monitor(
    monitor: HealthMonitor,
) -> impl Filter<Extract = (HealthMonitor,), Error = std::convert::Infallible> + Clone {
    warp::any().map(move || monitor.clone())
}

/// Serve the status routes on `addr` until `ct` is cancelled.
///
/// Returns the bound address, which differs from `addr` when port 0 was asked for.
pub fn service_listen(
    monitor: HealthMonitor,
    addr: SocketAddr,
    ct: CancellationToken,
) -> Result<(SocketAddr, tokio::task::JoinHandle<()>), NavError> {
    let api = navwatch_service(monitor).with(warp::log("navwatch"));

    let (bound, server) = warp::serve(api).try_bind_with_graceful_shutdown(addr, async move {
        ct.cancelled().await;
        info!("Status service shutting down");
    })?;

    info!("Serving status on {}", bound);
    Ok((bound, tokio::task::spawn(server)))
}

mod handlers {
    use super::HealthMonitor;
    use crate::bus::GlobalState;
    use crate::status::ServiceStatus;
    use serde::Serialize;
    use std::convert::Infallible;
    use warp::http::StatusCode;

    /// Reply structure for Version response
    #[derive(Serialize)]
    struct VersionReply {
        name: &'static str,
        version: &'static str,
    }

    /// Reply structure for a missing service
    #[derive(Serialize)]
    struct ErrorReply {
        error: String,
    }

    /// Reply structure for recheck
    #[derive(Serialize)]
    struct RecheckReply {
        probe: GlobalState,
        services: Vec<ServiceStatus>,
    }

    pub async fn version() -> Result<impl warp::Reply, Infallible> {
        Ok(warp::reply::json(&VersionReply {
            name: crate::NAME,
            version: crate::VERSION,
        }))
    }

    pub async fn probe(monitor: HealthMonitor) -> Result<impl warp::Reply, Infallible> {
        Ok(warp::reply::json(&monitor.global_state()))
    }

    pub async fn status_all(monitor: HealthMonitor) -> Result<impl warp::Reply, Infallible> {
        Ok(warp::reply::json(&monitor.statuses()))
    }

    /// Configured services without a result yet report `unknown`
    pub async fn status_one(
        id: String,
        monitor: HealthMonitor,
    ) -> Result<impl warp::Reply, Infallible> {
        let known = monitor.registry().lookup(&id).is_some() || monitor.descriptor(&id).is_ok();
        if known {
            Ok(warp::reply::with_status(
                warp::reply::json(&monitor.get_status(&id)),
                StatusCode::OK,
            ))
        } else {
            Ok(warp::reply::with_status(
                warp::reply::json(&ErrorReply {
                    error: format!("unknown service `{}`", id),
                }),
                StatusCode::NOT_FOUND,
            ))
        }
    }

    /// Re-run the probe and then every service
    pub async fn recheck(monitor: HealthMonitor) -> Result<impl warp::Reply, Infallible> {
        monitor.recheck_probe().await;
        let mut services = monitor.recheck_all_services().await;
        services.sort_by(|a, b| a.id.cmp(&b.id));

        Ok(warp::reply::json(&RecheckReply {
            probe: monitor.global_state(),
            services,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{Config, MonitorOptionsBuilder};
    use crate::transport::mock::ScriptedTransport;
    use crate::transport::{Reply, RequestMode};
    use serde_json::Value;
    use std::sync::Arc;
    use warp::http::StatusCode;

    const SITE: &str = r#"
healthCheck:
  probe:
    host: localhost
items:
  - id: web
    type: service
    url: http://web.local/
    healthCheck:
      enabled: true
  - id: db
    type: service
    healthCheck:
      enabled: true
      type: tcp
      host: db.local
      port: 5432
"#;

    async fn monitor() -> (HealthMonitor, Arc<ScriptedTransport>) {
        let transport = Arc::new(ScriptedTransport::new());
        transport.script("http://web.local/", RequestMode::Direct, Ok(Reply::Status(200)));
        let options = MonitorOptionsBuilder::default()
            .periodic(false)
            .build()
            .unwrap();
        let monitor = HealthMonitor::with_transport(options, transport.clone());
        let config: Config = serde_yaml::from_str(SITE).unwrap();
        monitor.initialize(config).await;
        (monitor, transport)
    }

    fn json(body: &[u8]) -> Value {
        serde_json::from_slice(body).unwrap()
    }

    #[tokio::test]
    #[cfg_attr(miri, ignore)]
    async fn test_version() {
        let (monitor, _) = monitor().await;
        let api = navwatch_service(monitor);

        let reply = warp::test::request()
            .method("GET")
            .path("/navwatch/version")
            .reply(&api)
            .await;

        assert_eq!(reply.status(), StatusCode::OK);
        assert_eq!(json(reply.body())["name"], "navwatch");
    }

    #[tokio::test]
    #[cfg_attr(miri, ignore)]
    async fn test_probe() {
        let (monitor, _) = monitor().await;
        let api = navwatch_service(monitor);

        let reply = warp::test::request()
            .method("GET")
            .path("/navwatch/probe")
            .reply(&api)
            .await;

        assert_eq!(reply.status(), StatusCode::OK);
        let body = json(reply.body());
        assert_eq!(body["probe"], "online");
        assert_eq!(body["enabled"], true);
    }

    #[tokio::test]
    #[cfg_attr(miri, ignore)]
    async fn test_status_one() {
        let (monitor, _) = monitor().await;
        monitor.check_once("web").await;
        let api = navwatch_service(monitor);

        let reply = warp::test::request()
            .method("GET")
            .path("/navwatch/status/web")
            .reply(&api)
            .await;
        assert_eq!(reply.status(), StatusCode::OK);
        let body = json(reply.body());
        assert_eq!(body["state"], "online");
        assert_eq!(body["statusCode"], 200);

        let reply = warp::test::request()
            .method("GET")
            .path("/navwatch/status/missing")
            .reply(&api)
            .await;
        assert_eq!(reply.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    #[cfg_attr(miri, ignore)]
    async fn test_recheck_then_status() {
        let (monitor, transport) = monitor().await;
        let api = navwatch_service(monitor);

        let reply = warp::test::request()
            .method("POST")
            .path("/navwatch/recheck")
            .reply(&api)
            .await;
        assert_eq!(reply.status(), StatusCode::OK);
        let body = json(reply.body());
        assert_eq!(body["probe"]["probe"], "online");
        assert_eq!(body["services"].as_array().unwrap().len(), 2);
        assert!(transport.requests_to("http://web.local/") >= 1);

        let reply = warp::test::request()
            .method("GET")
            .path("/navwatch/status")
            .reply(&api)
            .await;
        assert_eq!(reply.status(), StatusCode::OK);
        let ids: Vec<_> = json(reply.body())
            .as_array()
            .unwrap()
            .iter()
            .map(|status| status["id"].as_str().unwrap().to_owned())
            .collect();
        assert_eq!(ids, vec!["db", "web"]);
    }

    #[tokio::test]
    #[cfg_attr(miri, ignore)]
    async fn test_recheck_needs_post() {
        let (monitor, _) = monitor().await;
        let api = navwatch_service(monitor);

        let reply = warp::test::request()
            .method("GET")
            .path("/navwatch/recheck")
            .reply(&api)
            .await;
        assert_eq!(reply.status(), StatusCode::METHOD_NOT_ALLOWED);
    }

    #[tokio::test]
    #[cfg_attr(miri, ignore)]
    async fn test_listen_and_shutdown() {
        let (monitor, _) = monitor().await;
        let ct = CancellationToken::new();

        let (addr, server) =
            service_listen(monitor, ([127, 0, 0, 1], 0).into(), ct.clone()).unwrap();
        assert_ne!(addr.port(), 0);

        ct.cancel();
        server.await.unwrap();
    }
}
