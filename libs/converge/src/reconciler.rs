//! Desired-versus-current reconciliation.
//!
//! One pass per resource: decide the transition from intent and existence,
//! then issue at most one mutating call. Convergence compares only the
//! fields the caller configured, plus the kind's drift signals.

use std::collections::HashSet;

use futures_util::stream::{self, StreamExt};
use hwm_client::{paths, resource_path, RemoteRecord, ResourceClient};
use hwm_reconcile::{compare, update_body, ReconcileError, ReconcileOutcome, Transition};
use serde_json::{json, Value};
use tracing::{debug, info};

use crate::desired::{DesiredState, PowerAction};
use crate::error::ConvergeError;
use crate::kind::ResourceKind;
use crate::mapper::ResolverSet;

pub type Outcome = ReconcileOutcome<RemoteRecord>;

/// Drives resources toward their desired state through one client.
pub struct Reconciler<'a, C> {
    client: &'a C,
}

impl<'a, C: ResourceClient> Reconciler<'a, C> {
    pub fn new(client: &'a C) -> Self {
        Self { client }
    }

    /// Look up the current record, reconcile it, then apply any requested
    /// power transition.
    pub async fn converge(&self, desired: &DesiredState) -> Result<Outcome, ConvergeError> {
        desired.validate()?;
        let current = desired.resource.lookup(self.client).await?;

        if let Some(action) = desired.state.power() {
            let record = current.ok_or_else(|| ReconcileError::ReferenceNotFound {
                kind: desired.resource.kind().label().to_string(),
                name: desired.resource.key().to_string(),
            })?;
            return self.apply_power(record, action).await;
        }

        self.reconcile(desired, current).await
    }

    /// Reconcile against an already-fetched current record.
    pub async fn reconcile(
        &self,
        desired: &DesiredState,
        current: Option<RemoteRecord>,
    ) -> Result<Outcome, ConvergeError> {
        let resource = &desired.resource;
        let kind = resource.kind();
        let key = resource.key();

        match Transition::decide(desired.state.intent(), current.is_some()) {
            Transition::Noop => {
                debug!(%kind, key, "Already absent");
                Ok(Outcome::unchanged(None))
            }
            Transition::Create => {
                let config = resource.normalize(&ResolverSet::new(self.client)).await?;
                let record = self
                    .client
                    .create(kind.collection(), &config.create_body())
                    .await?;
                info!(%kind, key, uri = ?record.uri(), "Created");
                Ok(Outcome::created(record))
            }
            Transition::Compare => {
                let current = require(current)?;
                let config = resource.normalize(&ResolverSet::new(self.client)).await?;
                let signals = kind.drift_signals();
                let comparison = compare(config.compared(), current.fields(), signals);

                if comparison.is_converged() {
                    debug!(%kind, key, "Already converged");
                    return Ok(Outcome::unchanged(Some(current)));
                }

                info!(
                    %kind,
                    key,
                    mismatched = ?comparison.mismatched,
                    drifted = comparison.drifted.len(),
                    "Updating"
                );
                let id = record_uri(kind, &current)?;
                let body = update_body(current.fields(), config.compared(), signals);
                let record = self
                    .client
                    .update(kind.collection(), id, &Value::Object(body))
                    .await?;
                Ok(Outcome::updated(record))
            }
            Transition::Delete => {
                let current = require(current)?;
                let id = record_uri(kind, &current)?;
                self.client
                    .delete(kind.collection(), id, resource.force_delete())
                    .await?;
                info!(%kind, key, "Deleted");
                Ok(Outcome::deleted())
            }
        }
    }

    /// Converge several resources, at most `concurrency` at a time.
    ///
    /// Two entries that target the same remote resource are rejected before
    /// any call is made. Results come back in input order; one failure does
    /// not stop the others.
    pub async fn reconcile_batch(
        &self,
        desired: &[DesiredState],
        concurrency: usize,
    ) -> Result<Vec<Result<Outcome, ConvergeError>>, ConvergeError> {
        check_unique_targets(desired)?;

        Ok(stream::iter(desired)
            .map(|entry| self.converge(entry))
            .buffered(concurrency.max(1))
            .collect()
            .await)
    }

    async fn apply_power(
        &self,
        record: RemoteRecord,
        action: PowerAction,
    ) -> Result<Outcome, ConvergeError> {
        let current = record.str_field("powerState").unwrap_or_default();
        let request = match action {
            PowerAction::On if current == "On" => return Ok(Outcome::unchanged(Some(record))),
            PowerAction::Off if current == "Off" => return Ok(Outcome::unchanged(Some(record))),
            PowerAction::On => json!({"powerState": "On", "powerControl": "MomentaryPress"}),
            PowerAction::Off => json!({"powerState": "Off", "powerControl": "PressAndHold"}),
            PowerAction::Restart => json!({"powerState": "On", "powerControl": "ColdBoot"}),
        };

        let id = format!(
            "{}{}",
            record_uri(ResourceKind::ServerHardware, &record)?,
            paths::POWER_STATE_SUFFIX
        );
        info!(uri = %resource_path(paths::SERVER_HARDWARE, &id), ?action, "Changing power state");
        let updated = self
            .client
            .update(paths::SERVER_HARDWARE, &id, &request)
            .await?;
        Ok(Outcome::updated(updated))
    }
}

fn require(current: Option<RemoteRecord>) -> Result<RemoteRecord, ConvergeError> {
    current.ok_or_else(|| ConvergeError::UnexpectedRecord("current record vanished".to_string()))
}

fn record_uri(kind: ResourceKind, record: &RemoteRecord) -> Result<&str, ConvergeError> {
    record
        .uri()
        .ok_or_else(|| ConvergeError::UnexpectedRecord(format!("{kind} record has no uri")))
}

fn check_unique_targets(desired: &[DesiredState]) -> Result<(), ReconcileError> {
    let mut seen = HashSet::new();
    for entry in desired {
        let kind = entry.resource.kind();
        let key = entry.resource.key();
        if !seen.insert((kind, key)) {
            return Err(ReconcileError::DuplicateTarget {
                kind: kind.label().to_string(),
                key: key.to_string(),
            });
        }
    }
    Ok(())
}
