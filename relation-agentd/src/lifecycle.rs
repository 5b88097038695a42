use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use anyhow::{bail, Context, Result};
use serde::Serialize;
use shared::protocol::FIELD_PORTS;
use shared::types::{PrincipalType, ProcessStatus, ReadinessState, RelationSnapshot, ServiceStatus};
use crate::config::{LocalOptions, ServiceDefinition};
use crate::credential::{self, CredentialAuthority};
use crate::gate::{self, Evaluation};
use crate::primitives::Capabilities;
use crate::relation::hash::snapshot_hash;
use crate::relation::source::{RelationPublisher, RelationSource};
use crate::state::db::StateDb;

/// What caused an evaluation pass
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Trigger {
    Initial,
    RelationChanged,
    Timer,
    Manual,
}

impl fmt::Display for Trigger {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Trigger::Initial => "initial",
            Trigger::RelationChanged => "relation-changed",
            Trigger::Timer => "timer",
            Trigger::Manual => "manual",
        };
        f.write_str(name)
    }
}

/// Result of evaluating every managed service once
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct PassSummary {
    pub ready: Vec<String>,
    pub started: Vec<String>,
    pub pending: Vec<String>,
    pub failed: BTreeMap<String, String>,
}

/// Owns the managed services and drives each through its readiness gate.
pub struct ServiceLifecycleManager {
    services: Vec<ServiceDefinition>,
    options: LocalOptions,
    unit: String,
    db: StateDb,
    source: Box<dyn RelationSource>,
    publisher: Box<dyn RelationPublisher>,
    authority: Box<dyn CredentialAuthority>,
    caps: Capabilities,
}

impl ServiceLifecycleManager {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        services: Vec<ServiceDefinition>,
        options: LocalOptions,
        unit: String,
        db: StateDb,
        source: Box<dyn RelationSource>,
        publisher: Box<dyn RelationPublisher>,
        authority: Box<dyn CredentialAuthority>,
        caps: Capabilities,
    ) -> Self {
        Self {
            services,
            options,
            unit,
            db,
            source,
            publisher,
            authority,
            caps,
        }
    }

    /// Evaluate every service. One service failing does not stop the others.
    pub fn evaluate_all(&self, trigger: Trigger) -> Result<PassSummary> {
        tracing::debug!("Evaluation pass ({}) over {} services", trigger, self.services.len());

        let mut summary = PassSummary::default();
        for service in &self.services {
            match self.evaluate_one(service) {
                Ok(ReadinessState::Pending) => summary.pending.push(service.name.clone()),
                Ok(ReadinessState::Ready) => summary.ready.push(service.name.clone()),
                Ok(ReadinessState::Started) => summary.started.push(service.name.clone()),
                Err(e) => {
                    tracing::error!("{}: evaluation failed: {:#}", service.name, e);
                    summary.failed.insert(service.name.clone(), format!("{:#}", e));
                }
            }
        }

        Ok(summary)
    }

    fn evaluate_one(&self, service: &ServiceDefinition) -> Result<ReadinessState> {
        let stored = self.db.get(&service.name)?;
        let mut status = match &stored {
            Some(status) => status.clone(),
            None => ServiceStatus::pending(&service.name),
        };

        let snapshot = self.source.snapshot(&service.relation)?;
        match gate::evaluate(service, &snapshot, &self.options, &status, &self.caps)? {
            Evaluation::BecameReady { fingerprint } => {
                status.readiness = ReadinessState::Ready;
                status.fingerprint = Some(fingerprint);
                self.db.put(&status)?;
            }
            Evaluation::Pending | Evaluation::Unchanged(_) => {
                if stored.is_none() {
                    self.db.put(&status)?;
                }
            }
        }

        if status.readiness == ReadinessState::Ready {
            self.start(service, &mut status)?;
        }

        if status.readiness == ReadinessState::Started && !status.published {
            self.publish_ports(service, &mut status)?;
        }

        Ok(status.readiness)
    }

    /// Start a ready service and record its ports.
    /// A failed start leaves the service ready so the next pass retries it.
    fn start(&self, service: &ServiceDefinition, status: &mut ServiceStatus) -> Result<()> {
        self.caps.supervisor.start(&service.name)?;

        status.readiness = ReadinessState::Started;
        status.process = ProcessStatus::Running;
        status.ports = service.ports.clone();
        status.published = false;
        self.db.put(status)?;
        tracing::info!("{}: started, providing ports {:?}", service.name, service.ports);

        Ok(())
    }

    /// Publish a started service's ports on every provided relation. The
    /// service stays unpublished until all of them succeed, so a failure is
    /// retried on the next pass.
    fn publish_ports(&self, service: &ServiceDefinition, status: &mut ServiceStatus) -> Result<()> {
        if !service.ports.is_empty() {
            let ports: Vec<String> = service.ports.iter().map(u16::to_string).collect();
            let fields = BTreeMap::from([(FIELD_PORTS.to_string(), ports.join(" "))]);
            for relation in &service.provided_outputs {
                self.publisher
                    .publish(relation, &self.unit, &fields)
                    .with_context(|| format!("Failed to publish ports on {}", relation))?;
            }
        }

        status.published = true;
        self.db.put(status)
    }

    /// Stop a running service. Readiness is left untouched.
    pub fn stop(&self, name: &str) -> Result<ServiceStatus> {
        let Some(service) = self.definition(name) else {
            bail!("Unknown service: {}", name);
        };

        let mut status = self.db.get_or_pending(&service.name)?;
        if status.process != ProcessStatus::Running {
            tracing::debug!("{}: not running, nothing to stop", name);
            return Ok(status);
        }

        self.caps.supervisor.stop(&service.name)?;
        status.process = ProcessStatus::Stopped;
        self.db.put(&status)?;
        tracing::info!("{}: stopped", name);

        Ok(status)
    }

    /// Status of every managed service, pending for those never evaluated
    pub fn status(&self) -> Result<Vec<ServiceStatus>> {
        let mut stored: BTreeMap<String, ServiceStatus> = self
            .db
            .get_all()?
            .into_iter()
            .map(|status| (status.name.clone(), status))
            .collect();

        Ok(self
            .services
            .iter()
            .map(|service| {
                stored
                    .remove(&service.name)
                    .unwrap_or_else(|| ServiceStatus::pending(&service.name))
            })
            .collect())
    }

    pub fn status_of(&self, name: &str) -> Result<Option<ServiceStatus>> {
        match self.definition(name) {
            Some(service) => Ok(Some(self.db.get_or_pending(&service.name)?)),
            None => Ok(None),
        }
    }

    pub fn lookup_credential(&self, principal: PrincipalType, id: &str) -> Option<String> {
        credential::lookup(self.authority.as_ref(), principal, id)
    }

    /// Fingerprint of every relation a managed service consumes
    pub fn relations_hash(&self) -> Result<String> {
        let relations: BTreeSet<&str> = self
            .services
            .iter()
            .map(|service| service.relation.as_str())
            .collect();

        let snapshots = relations
            .into_iter()
            .map(|relation| self.source.snapshot(relation))
            .collect::<Result<Vec<RelationSnapshot>>>()?;

        Ok(snapshot_hash(&snapshots))
    }

    fn definition(&self, name: &str) -> Option<&ServiceDefinition> {
        self.services.iter().find(|service| service.name == name)
    }
}
