use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use chrono::{DateTime, Utc};
use serde::{Serialize, Deserialize};
use thiserror::Error;

/// One unit participating in a relation, with the fields it chose to publish.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Peer {
    /// Unit identifier, unique within the relation, e.g. "ceph-mon/0"
    pub unit_id: String,

    /// Published key/value facts
    pub fields: BTreeMap<String, String>,
}

impl Peer {
    pub fn new(unit_id: impl Into<String>) -> Self {
        Self {
            unit_id: unit_id.into(),
            fields: BTreeMap::new(),
        }
    }

    pub fn with_field(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.fields.insert(name.into(), value.into());
        self
    }

    /// Look up a published field. An empty value counts as not published.
    pub fn field(&self, name: &str) -> Option<&str> {
        self.fields
            .get(name)
            .map(String::as_str)
            .filter(|value| !value.is_empty())
    }
}

/// All peers currently on one named relation. Rebuilt on every evaluation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RelationSnapshot {
    pub relation: String,
    pub peers: Vec<Peer>,
}

impl RelationSnapshot {
    pub fn new(relation: impl Into<String>, peers: Vec<Peer>) -> Self {
        Self {
            relation: relation.into(),
            peers,
        }
    }

    pub fn empty(relation: impl Into<String>) -> Self {
        Self::new(relation, Vec::new())
    }

    pub fn is_empty(&self) -> bool {
        self.peers.is_empty()
    }
}

/// Identity kinds a credential can be queried for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PrincipalType {
    Client,
    Osd,
    Mon,
    Mds,
}

impl PrincipalType {
    pub fn as_str(&self) -> &'static str {
        match self {
            PrincipalType::Client => "client",
            PrincipalType::Osd => "osd",
            PrincipalType::Mon => "mon",
            PrincipalType::Mds => "mds",
        }
    }
}

impl fmt::Display for PrincipalType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Returned when a string names no known principal type.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("unknown principal type: {0}")]
pub struct UnknownPrincipal(pub String);

impl FromStr for PrincipalType {
    type Err = UnknownPrincipal;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "client" => Ok(PrincipalType::Client),
            "osd" => Ok(PrincipalType::Osd),
            "mon" => Ok(PrincipalType::Mon),
            "mds" => Ok(PrincipalType::Mds),
            other => Err(UnknownPrincipal(other.to_string())),
        }
    }
}

/// Readiness of one managed service.
///
/// `Started` is only reachable from `Ready`, and nothing moves a service
/// back to `Pending` once it has become `Ready`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReadinessState {
    Pending,
    Ready,
    Started,
}

impl ReadinessState {
    pub fn as_str(&self) -> &'static str {
        match self {
            ReadinessState::Pending => "pending",
            ReadinessState::Ready => "ready",
            ReadinessState::Started => "started",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(ReadinessState::Pending),
            "ready" => Some(ReadinessState::Ready),
            "started" => Some(ReadinessState::Started),
            _ => None,
        }
    }
}

/// Externally observed status of the managed process.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProcessStatus {
    Stopped,
    Running,
}

impl ProcessStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProcessStatus::Stopped => "stopped",
            ProcessStatus::Running => "running",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "stopped" => Some(ProcessStatus::Stopped),
            "running" => Some(ProcessStatus::Running),
            _ => None,
        }
    }
}

/// Persisted view of a managed service, as reported by the API.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServiceStatus {
    pub name: String,
    pub readiness: ReadinessState,
    pub process: ProcessStatus,

    /// Ports the service provides once started
    pub ports: Vec<u16>,

    /// Fingerprint of the context the service became ready with
    pub fingerprint: Option<String>,

    /// Whether the ports have reached every provided relation
    #[serde(default)]
    pub published: bool,

    pub updated_at: DateTime<Utc>,
}

impl ServiceStatus {
    pub fn pending(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            readiness: ReadinessState::Pending,
            process: ProcessStatus::Stopped,
            ports: Vec::new(),
            fingerprint: None,
            published: false,
            updated_at: Utc::now(),
        }
    }
}
