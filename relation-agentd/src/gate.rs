//! Readiness gate: decides whether the peer data for a service is complete
//! and, on the first pass where it is, runs the one-time side effects.
//!
//! The gate keeps no state between calls. The caller passes in the service's
//! persisted status and stores the transition the gate reports.

use std::path::PathBuf;
use thiserror::Error;
use shared::types::{ReadinessState, RelationSnapshot, ServiceStatus};
use crate::config::{DataReadyAction, LocalOptions, ServiceDefinition};
use crate::context::{is_complete, missing_fields, Context};
use crate::primitives::Capabilities;
use crate::relation::aggregate::aggregate;
use crate::relation::hash::context_hash;

/// A failed side-effect pipeline. The service does not become ready; steps
/// already performed are idempotent and are repeated on the next pass.
#[derive(Debug, Error)]
pub enum GateError {
    #[error("Failed to create config directory {path}: {source}")]
    ConfigDir {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to install packages: {0:#}")]
    Packages(anyhow::Error),

    #[error("Failed to render template {template}: {error:#}")]
    Render { template: String, error: anyhow::Error },

    #[error("Data-ready action {index} failed: {error:#}")]
    Action { index: usize, error: anyhow::Error },
}

/// Outcome of one evaluation pass.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Evaluation {
    /// No complete context yet; nothing ran
    Pending,
    /// The context became complete on this pass and the pipeline ran
    BecameReady { fingerprint: String },
    /// Already past the gate; nothing ran
    Unchanged(ReadinessState),
}

pub fn evaluate(
    service: &ServiceDefinition,
    snapshot: &RelationSnapshot,
    options: &LocalOptions,
    status: &ServiceStatus,
    caps: &Capabilities,
) -> Result<Evaluation, GateError> {
    let context = aggregate(snapshot, options);

    if status.readiness != ReadinessState::Pending {
        check_drift(service, &context, status);
        return Ok(Evaluation::Unchanged(status.readiness));
    }

    if context.is_empty() {
        tracing::debug!("{}: no peers on {} yet", service.name, service.relation);
        return Ok(Evaluation::Pending);
    }

    if !is_complete(&context, &service.required_inputs) {
        tracing::debug!(
            "{}: context incomplete, missing {}",
            service.name,
            missing_fields(&context, &service.required_inputs).join(", ")
        );
        return Ok(Evaluation::Pending);
    }

    run_pipeline(service, &context, caps)?;

    let fingerprint = context_hash(&context);
    tracing::info!("{}: context complete, ready ({})", service.name, fingerprint);
    Ok(Evaluation::BecameReady { fingerprint })
}

/// Once ready, later data never re-runs side effects. Losing completeness or
/// changing the context afterwards is only reported.
fn check_drift(service: &ServiceDefinition, context: &Context, status: &ServiceStatus) {
    if !is_complete(context, &service.required_inputs) {
        tracing::warn!(
            "{}: context no longer complete while {}, keeping state",
            service.name,
            status.readiness.as_str()
        );
        return;
    }

    let fingerprint = context_hash(context);
    if status.fingerprint.as_deref() != Some(fingerprint.as_str()) {
        tracing::warn!(
            "{}: context changed since it became ready, rendered config is stale",
            service.name
        );
    }
}

fn run_pipeline(
    service: &ServiceDefinition,
    context: &Context,
    caps: &Capabilities,
) -> Result<(), GateError> {
    std::fs::create_dir_all(&service.config_dir).map_err(|source| GateError::ConfigDir {
        path: service.config_dir.clone(),
        source,
    })?;

    caps.installer
        .ensure_installed(&service.packages)
        .map_err(GateError::Packages)?;

    for template in &service.templates {
        caps.renderer
            .render(&template.source, &template.target, context)
            .map_err(|error| GateError::Render {
                template: template.source.clone(),
                error,
            })?;
    }

    for (index, action) in service.data_ready.iter().enumerate() {
        run_action(action, context, caps).map_err(|error| GateError::Action { index, error })?;
    }

    Ok(())
}

fn run_action(action: &DataReadyAction, context: &Context, caps: &Capabilities) -> anyhow::Result<()> {
    match action {
        DataReadyAction::Render { source, target } => caps.renderer.render(source, target, context),
        DataReadyAction::Log { message } => {
            tracing::info!("{}", message);
            Ok(())
        }
        DataReadyAction::Exec { argv } => caps.runner.run(argv),
    }
}
