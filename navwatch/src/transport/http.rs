use std::time::Duration;

use async_trait::async_trait;
use log::debug;
use url::Url;

use crate::error::{NavError, TransportError};

use super::{Reply, RequestMode, Transport};

/// [Transport] backed by a shared reqwest client
#[derive(Debug, Clone)]
pub struct HttpTransport {
    client: reqwest::Client,
}

impl HttpTransport {
    /// Build a client sending `user_agent` on every request
    pub fn new(user_agent: &str) -> Result<Self, NavError> {
        let client = reqwest::Client::builder().user_agent(user_agent).build()?;
        Ok(Self { client })
    }
}

/// Map a reqwest failure onto the reachability taxonomy.
///
/// A request error that is not a connect error means the peer was reached and then the
/// exchange broke (protocol, body or redirect trouble), which is reported as blocked.
fn classify(err: &reqwest::Error) -> TransportError {
    if err.is_timeout() {
        TransportError::Timeout
    } else if err.is_connect() || err.is_builder() {
        TransportError::ConnectionFailed(err.to_string())
    } else if err.is_redirect() || err.is_body() || err.is_decode() || err.is_request() {
        TransportError::Blocked(err.to_string())
    } else {
        TransportError::ConnectionFailed(err.to_string())
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn head(
        &self,
        url: &Url,
        mode: RequestMode,
        timeout: Duration,
    ) -> Result<Reply, TransportError> {
        let reply = self
            .client
            .head(url.clone())
            .timeout(timeout)
            .send()
            .await;

        match (reply, mode) {
            (Ok(response), RequestMode::Direct) => Ok(Reply::Status(response.status().as_u16())),
            (Ok(_), RequestMode::Opaque) => Ok(Reply::Opaque),
            (Err(err), mode) => {
                let failure = classify(&err);
                debug!("HEAD {} ({:?}) failed: {}", url, mode, failure);
                match (failure, mode) {
                    (TransportError::Blocked(_), RequestMode::Opaque) => Ok(Reply::Opaque),
                    (failure, _) => Err(failure),
                }
            }
        }
    }
}
