//! Scripted [Transport] for tests. Records every request it is asked to send.

use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use url::Url;

use crate::error::TransportError;

use super::{Reply, RequestMode, Transport};

#[derive(Debug, Clone)]
struct Scripted {
    outcome: Result<Reply, TransportError>,
    delay: Option<Duration>,
}

/// Replies are looked up by (url, mode). The last scripted reply for a key is repeated;
/// unscripted requests fail as refused connections.
#[derive(Debug, Default)]
pub(crate) struct ScriptedTransport {
    scripts: Mutex<HashMap<(String, RequestMode), VecDeque<Scripted>>>,
    requests: Mutex<Vec<(String, RequestMode)>>,
}

impl ScriptedTransport {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn script(&self, url: &str, mode: RequestMode, outcome: Result<Reply, TransportError>) {
        self.push(url, mode, Scripted { outcome, delay: None });
    }

    pub(crate) fn script_delayed(
        &self,
        url: &str,
        mode: RequestMode,
        outcome: Result<Reply, TransportError>,
        delay: Duration,
    ) {
        self.push(
            url,
            mode,
            Scripted {
                outcome,
                delay: Some(delay),
            },
        );
    }

    fn push(&self, url: &str, mode: RequestMode, scripted: Scripted) {
        self.scripts
            .lock()
            .unwrap()
            .entry((url.to_owned(), mode))
            .or_default()
            .push_back(scripted);
    }

    fn next(&self, url: &str, mode: RequestMode) -> Option<Scripted> {
        let mut scripts = self.scripts.lock().unwrap();
        let queue = scripts.get_mut(&(url.to_owned(), mode))?;
        if queue.len() > 1 {
            queue.pop_front()
        } else {
            queue.front().cloned()
        }
    }

    /// Every request sent so far as (url, mode)
    pub(crate) fn requests(&self) -> Vec<(String, RequestMode)> {
        self.requests.lock().unwrap().clone()
    }

    pub(crate) fn requests_to(&self, url: &str) -> usize {
        self.requests()
            .iter()
            .filter(|(sent, _)| sent == url)
            .count()
    }
}

#[async_trait]
impl Transport for ScriptedTransport {
    async fn head(
        &self,
        url: &Url,
        mode: RequestMode,
        _timeout: Duration,
    ) -> Result<Reply, TransportError> {
        self.requests
            .lock()
            .unwrap()
            .push((url.as_str().to_owned(), mode));

        match self.next(url.as_str(), mode) {
            Some(scripted) => {
                if let Some(delay) = scripted.delay {
                    tokio::time::sleep(delay).await;
                }
                scripted.outcome
            }
            None => Err(TransportError::ConnectionFailed(
                "connection refused".to_owned(),
            )),
        }
    }
}
