use std::fmt::{self, Display};
use std::time::SystemTime;

use serde::Serialize;
use serde_with::{serde_as, TimestampMilliSeconds};

/// Lifecycle state of a single service check
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ServiceState {
    Unknown,
    Checking,
    Online,
    Offline,
}

impl ServiceState {
    /// Label shown on a service badge
    pub fn badge(&self) -> &'static str {
        match self {
            ServiceState::Unknown => "Unknown",
            ServiceState::Checking => "Testing",
            ServiceState::Online => "Online",
            ServiceState::Offline => "Offline",
        }
    }
}

impl Display for ServiceState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ServiceState::Unknown => "unknown",
            ServiceState::Checking => "checking",
            ServiceState::Online => "online",
            ServiceState::Offline => "offline",
        };
        write!(f, "{}", name)
    }
}

/// Reachability of the probe host
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ProbeState {
    #[default]
    Unknown,
    Online,
    Offline,
}

impl Display for ProbeState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ProbeState::Unknown => "unknown",
            ProbeState::Online => "online",
            ProbeState::Offline => "offline",
        };
        write!(f, "{}", name)
    }
}

/// Last known status of one service
#[serde_as]
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ServiceStatus {
    pub id: String,
    pub state: ServiceState,
    #[serde_as(as = "TimestampMilliSeconds<i64>")]
    pub last_checked_at: SystemTime,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub response_time_ms: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status_code: Option<u16>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_kind: Option<String>,
}

impl ServiceStatus {
    /// Status for a service that has never been checked
    pub fn unknown<S: Into<String>>(id: S) -> Self {
        Self::new(id, ServiceState::Unknown)
    }

    /// Status for a check that is in flight
    pub fn checking<S: Into<String>>(id: S) -> Self {
        Self::new(id, ServiceState::Checking)
    }

    fn new<S: Into<String>>(id: S, state: ServiceState) -> Self {
        Self {
            id: id.into(),
            state,
            last_checked_at: SystemTime::now(),
            response_time_ms: None,
            status_code: None,
            error_kind: None,
        }
    }
}

impl Display for ServiceStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.id, self.state)?;
        if let Some(code) = self.status_code {
            write!(f, "/{}", code)?;
        }
        if let Some(kind) = &self.error_kind {
            write!(f, "/{}", kind)?;
        }
        Ok(())
    }
}

/// Outcome of a reachability test.
///
/// `certain` is false when the peer was only seen through an opaque or unreadable
/// reply, so reachability is inferred rather than observed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Reachability {
    Reachable {
        certain: bool,
        status_code: Option<u16>,
    },
    Unreachable {
        status_code: Option<u16>,
        kind: &'static str,
    },
}

impl Reachability {
    pub fn is_reachable(&self) -> bool {
        matches!(self, Reachability::Reachable { .. })
    }

    /// Build the terminal [ServiceStatus] for this outcome
    pub fn into_status<S: Into<String>>(self, id: S, response_time_ms: u64) -> ServiceStatus {
        let mut status = match self {
            Reachability::Reachable {
                certain: true,
                status_code,
            } => ServiceStatus {
                status_code,
                ..ServiceStatus::new(id, ServiceState::Online)
            },
            Reachability::Reachable {
                certain: false,
                status_code,
            } => ServiceStatus {
                status_code,
                error_kind: Some("cors".to_owned()),
                ..ServiceStatus::new(id, ServiceState::Online)
            },
            Reachability::Unreachable { status_code, kind } => ServiceStatus {
                status_code,
                error_kind: Some(kind.to_owned()),
                ..ServiceStatus::new(id, ServiceState::Offline)
            },
        };
        status.response_time_ms = Some(response_time_ms);
        status
    }
}
