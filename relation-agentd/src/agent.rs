use std::thread;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::time::{interval_at, Instant};
use tokio_util::sync::CancellationToken;
use anyhow::Result;
use shared::types::{PrincipalType, ServiceStatus};
use crate::config::RelationsConfig;
use crate::lifecycle::{PassSummary, ServiceLifecycleManager, Trigger};

/// Commands sent to the evaluation thread
pub enum AgentCommand {
    Evaluate(Trigger, oneshot::Sender<Result<PassSummary>>),
    Fingerprint(oneshot::Sender<Result<String>>),
    Status(oneshot::Sender<Result<Vec<ServiceStatus>>>),
    StatusOf(String, oneshot::Sender<Result<Option<ServiceStatus>>>),
    Stop(String, oneshot::Sender<Result<ServiceStatus>>),
    Lookup(PrincipalType, String, oneshot::Sender<Option<String>>),
    Shutdown,
}

/// Handle to the lifecycle manager. Every command runs to completion on one
/// dedicated thread, so evaluation passes never overlap.
#[derive(Clone)]
pub struct AgentHandle {
    tx: mpsc::Sender<AgentCommand>,
}

impl AgentHandle {
    /// Spawn the evaluation thread owning `manager`
    pub fn spawn(manager: ServiceLifecycleManager) -> Self {
        let (tx, mut rx) = mpsc::channel::<AgentCommand>(64);

        thread::spawn(move || {
            while let Some(cmd) = rx.blocking_recv() {
                match cmd {
                    AgentCommand::Evaluate(trigger, reply) => {
                        let _ = reply.send(manager.evaluate_all(trigger));
                    }
                    AgentCommand::Fingerprint(reply) => {
                        let _ = reply.send(manager.relations_hash());
                    }
                    AgentCommand::Status(reply) => {
                        let _ = reply.send(manager.status());
                    }
                    AgentCommand::StatusOf(name, reply) => {
                        let _ = reply.send(manager.status_of(&name));
                    }
                    AgentCommand::Stop(name, reply) => {
                        let _ = reply.send(manager.stop(&name));
                    }
                    AgentCommand::Lookup(principal, id, reply) => {
                        let _ = reply.send(manager.lookup_credential(principal, &id));
                    }
                    AgentCommand::Shutdown => {
                        tracing::info!("Evaluation thread shutting down");
                        break;
                    }
                }
            }
        });

        Self { tx }
    }

    /// Run one evaluation pass over every managed service
    pub async fn evaluate(&self, trigger: Trigger) -> Result<PassSummary> {
        let (reply, rx) = oneshot::channel();
        self.tx.send(AgentCommand::Evaluate(trigger, reply)).await?;
        rx.await?
    }

    /// Fingerprint of the consumed relations' current peer data
    pub async fn fingerprint(&self) -> Result<String> {
        let (reply, rx) = oneshot::channel();
        self.tx.send(AgentCommand::Fingerprint(reply)).await?;
        rx.await?
    }

    pub async fn status(&self) -> Result<Vec<ServiceStatus>> {
        let (reply, rx) = oneshot::channel();
        self.tx.send(AgentCommand::Status(reply)).await?;
        rx.await?
    }

    pub async fn status_of(&self, name: String) -> Result<Option<ServiceStatus>> {
        let (reply, rx) = oneshot::channel();
        self.tx.send(AgentCommand::StatusOf(name, reply)).await?;
        rx.await?
    }

    pub async fn stop(&self, name: String) -> Result<ServiceStatus> {
        let (reply, rx) = oneshot::channel();
        self.tx.send(AgentCommand::Stop(name, reply)).await?;
        rx.await?
    }

    /// Look up a credential. `None` when it does not exist (yet).
    pub async fn lookup(&self, principal: PrincipalType, id: String) -> Result<Option<String>> {
        let (reply, rx) = oneshot::channel();
        self.tx.send(AgentCommand::Lookup(principal, id, reply)).await?;
        Ok(rx.await?)
    }

    /// Shutdown the evaluation thread
    pub async fn shutdown(&self) -> Result<()> {
        self.tx.send(AgentCommand::Shutdown).await?;
        Ok(())
    }
}

fn log_pass(trigger: Trigger, result: Result<PassSummary>) {
    match result {
        Ok(summary) => tracing::debug!(
            "Pass ({}) done: {} started, {} ready, {} pending, {} failed",
            trigger,
            summary.started.len(),
            summary.ready.len(),
            summary.pending.len(),
            summary.failed.len()
        ),
        Err(e) => tracing::error!("Evaluation pass ({}) failed: {:#}", trigger, e),
    }
}

/// Agent event loop: an initial pass, then a pass whenever peer data changes
/// and on a slower timer.
pub async fn run(
    agent: AgentHandle,
    config: RelationsConfig,
    hash_tx: watch::Sender<String>,
    cancel: CancellationToken,
) -> Result<()> {
    match agent.fingerprint().await {
        Ok(hash) => {
            let _ = hash_tx.send(hash);
        }
        Err(e) => tracing::error!("Failed to read relation data: {:#}", e),
    }
    log_pass(Trigger::Initial, agent.evaluate(Trigger::Initial).await);

    let poll_period = Duration::from_secs(config.poll_interval_secs.max(1));
    let reevaluate_period = Duration::from_secs(config.reevaluate_interval_secs.max(1));
    let mut poll = interval_at(Instant::now() + poll_period, poll_period);
    let mut reevaluate = interval_at(Instant::now() + reevaluate_period, reevaluate_period);

    loop {
        tokio::select! {
            _ = poll.tick() => {
                match agent.fingerprint().await {
                    Ok(hash) => {
                        if *hash_tx.borrow() != hash {
                            tracing::info!("Relation data changed: {}", hash);
                            let _ = hash_tx.send(hash);
                            log_pass(Trigger::RelationChanged, agent.evaluate(Trigger::RelationChanged).await);
                        }
                    }
                    Err(e) => {
                        tracing::error!("Failed to read relation data: {:#}", e);
                    }
                }
            }
            _ = reevaluate.tick() => {
                log_pass(Trigger::Timer, agent.evaluate(Trigger::Timer).await);
            }
            _ = cancel.cancelled() => {
                tracing::info!("Agent loop shutting down");
                break;
            }
        }
    }

    Ok(())
}
