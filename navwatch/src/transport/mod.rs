//! Network primitives used by the probe gate and the check executor.
//!
//! A [Transport] sends a single HEAD request. Two modes mirror what sandboxed page code
//! can do: [RequestMode::Direct] reads the status code of the reply, while
//! [RequestMode::Opaque] only learns that some reply arrived.

use std::fmt::Debug;
use std::time::Duration;

use async_trait::async_trait;
use url::Url;

use crate::error::TransportError;

pub mod http;
#[cfg(test)]
pub(crate) mod mock;

pub use http::HttpTransport;

/// How much of the reply the caller is allowed to see
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RequestMode {
    /// Status code is readable
    Direct,
    /// Any reply counts, nothing about it is readable
    Opaque,
}

/// Reply to a HEAD request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Reply {
    /// Readable status code
    Status(u16),
    /// A reply arrived but its content is hidden
    Opaque,
}

#[async_trait]
pub trait Transport: Debug + Send + Sync {
    /// Send a HEAD request to `url`, giving up after `timeout`
    async fn head(
        &self,
        url: &Url,
        mode: RequestMode,
        timeout: Duration,
    ) -> Result<Reply, TransportError>;
}

/// Send a HEAD request and enforce `timeout` on the whole exchange regardless of how the
/// transport honours it.
pub async fn head_within(
    transport: &dyn Transport,
    url: &Url,
    mode: RequestMode,
    timeout: Duration,
) -> Result<Reply, TransportError> {
    match tokio::time::timeout(timeout, transport.head(url, mode, timeout)).await {
        Ok(reply) => reply,
        Err(_elapsed) => Err(TransportError::Timeout),
    }
}

#[cfg(test)]
mod tests {
    use super::mock::ScriptedTransport;
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn test_head_within_times_out() {
        let transport = ScriptedTransport::new();
        transport.script_delayed(
            "http://slow.local/",
            RequestMode::Direct,
            Ok(Reply::Status(200)),
            Duration::from_secs(30),
        );

        let url = Url::parse("http://slow.local/").unwrap();
        let reply = head_within(&transport, &url, RequestMode::Direct, Duration::from_secs(2)).await;
        assert_eq!(reply, Err(TransportError::Timeout));
    }

    #[tokio::test(start_paused = true)]
    async fn test_head_within_passes_reply() {
        let transport = ScriptedTransport::new();
        transport.script("http://fast.local/", RequestMode::Direct, Ok(Reply::Status(204)));

        let url = Url::parse("http://fast.local/").unwrap();
        let reply = head_within(&transport, &url, RequestMode::Direct, Duration::from_secs(2)).await;
        assert_eq!(reply, Ok(Reply::Status(204)));
        assert_eq!(transport.requests().len(), 1);
    }
}
