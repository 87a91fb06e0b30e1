//! Caller-facing operations.
//!
//! Each operation converges one resource (or the appliance itself) and
//! reports a [`ModuleResult`]: whether anything changed, a human-readable
//! message and optional facts.

use hwm_client::{Connector, ResourceClient};
use hwm_reconcile::Action;
use serde::Serialize;
use serde_json::Value;
use tracing::warn;

use crate::bootstrap::{ApplianceBootstrap, BootstrapPolicy};
use crate::desired::{
    ApplianceSpec, DesiredState, Lifecycle, ServerHardwareSpec, ServerProfileSpec,
    ServerProfileTemplateSpec,
};
use crate::discovery::{HardwareDiscovery, ServerHardwareFacts};
use crate::error::ConvergeError;
use crate::kind::{DesiredResource, ResourceKind};
use crate::reconciler::{Outcome, Reconciler};

/// Result reported back to the automation host.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ModuleResult {
    pub changed: bool,
    pub msg: String,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub facts: Option<Value>,
}

impl ModuleResult {
    pub fn new(changed: bool, msg: impl Into<String>) -> Self {
        Self {
            changed,
            msg: msg.into(),
            facts: None,
        }
    }

    pub fn with_facts(mut self, facts: Value) -> Self {
        self.facts = Some(facts);
        self
    }
}

/// Failure reported back to the automation host.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FailureResult {
    pub failed: bool,
    pub msg: String,
    pub error: &'static str,
}

impl From<&ConvergeError> for FailureResult {
    fn from(err: &ConvergeError) -> Self {
        Self {
            failed: true,
            msg: err.to_string(),
            error: err.code(),
        }
    }
}

pub fn describe(kind: ResourceKind, key: &str, action: Action) -> String {
    match action {
        Action::None => format!("{kind} '{key}' is already in the desired state"),
        action => format!("{kind} '{key}' {action}"),
    }
}

fn report(desired: &DesiredState, outcome: &Outcome) -> ModuleResult {
    let resource = &desired.resource;
    let mut result = ModuleResult::new(
        outcome.changed,
        describe(resource.kind(), resource.key(), outcome.action),
    );
    if let Some(record) = &outcome.record {
        result = result.with_facts(record.clone().into_value());
    }
    result
}

pub async fn server_profile_template<C: ResourceClient>(
    client: &C,
    spec: ServerProfileTemplateSpec,
    state: Lifecycle,
) -> Result<ModuleResult, ConvergeError> {
    let desired = DesiredState::new(DesiredResource::ServerProfileTemplate(spec), state);
    let outcome = Reconciler::new(client).converge(&desired).await?;
    Ok(report(&desired, &outcome))
}

pub async fn server_profile<C: ResourceClient>(
    client: &C,
    spec: ServerProfileSpec,
    state: Lifecycle,
) -> Result<ModuleResult, ConvergeError> {
    let desired = DesiredState::new(DesiredResource::ServerProfile(spec), state);
    let outcome = Reconciler::new(client).converge(&desired).await?;
    Ok(report(&desired, &outcome))
}

/// Import, remove or power-control a server. When a discovery backend is
/// given, the management controller's NIC addresses are added to the facts.
pub async fn server_hardware<C: ResourceClient>(
    client: &C,
    spec: ServerHardwareSpec,
    state: Lifecycle,
    discovery: Option<&dyn HardwareDiscovery>,
) -> Result<ModuleResult, ConvergeError> {
    let address = spec.ilo_ip_address.clone();
    let desired = DesiredState::new(DesiredResource::ServerHardware(spec), state);
    let outcome = Reconciler::new(client).converge(&desired).await?;

    let mut result = ModuleResult::new(
        outcome.changed,
        describe(ResourceKind::ServerHardware, &address, outcome.action),
    );
    if let Some(record) = &outcome.record {
        let discovered = match discovery {
            Some(discovery) => match discovery.discover(&address).await {
                Ok(found) => Some(found),
                Err(err) => {
                    warn!(%address, error = %err, "Discovery failed; reporting facts without NICs");
                    None
                }
            },
            None => None,
        };
        let facts = ServerHardwareFacts::from_record(record, discovered.as_ref());
        result = result.with_facts(serde_json::to_value(facts).map_err(|e| {
            ConvergeError::UnexpectedRecord(format!("hardware facts: {e}"))
        })?);
    }
    Ok(result)
}

/// Converge a list of resources through one client.
pub async fn apply_batch<C: ResourceClient>(
    client: &C,
    resources: &[DesiredState],
    concurrency: usize,
) -> Result<Vec<Result<ModuleResult, ConvergeError>>, ConvergeError> {
    let outcomes = Reconciler::new(client)
        .reconcile_batch(resources, concurrency)
        .await?;

    Ok(resources
        .iter()
        .zip(outcomes)
        .map(|(desired, outcome)| outcome.map(|outcome| report(desired, &outcome)))
        .collect())
}

/// Run the first-boot workflow for an appliance.
pub async fn appliance_settings<K: Connector>(
    connector: &K,
    spec: &ApplianceSpec,
    policy: BootstrapPolicy,
) -> Result<ModuleResult, ConvergeError> {
    let report = ApplianceBootstrap::new(connector, policy).run(spec).await?;
    let msg = if report.changed {
        format!("appliance configured; reachable at {}", report.address)
    } else {
        format!("appliance at {} is already configured", report.address)
    };
    Ok(ModuleResult::new(report.changed, msg))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_describe() {
        assert_eq!(
            describe(ResourceKind::ServerProfile, "web-01", Action::Created),
            "server profile 'web-01' created"
        );
        assert_eq!(
            describe(ResourceKind::ServerHardware, "10.0.1.5", Action::None),
            "server hardware '10.0.1.5' is already in the desired state"
        );
    }

    #[test]
    fn test_failure_result_shape() {
        let err = ConvergeError::InvalidDesiredState("STATIC addressing requires ipv4_gateway".into());
        let value = serde_json::to_value(FailureResult::from(&err)).unwrap();
        assert_eq!(value["failed"], true);
        assert_eq!(value["error"], "invalid_desired_state");
    }

    #[test]
    fn test_module_result_omits_missing_facts() {
        let value = serde_json::to_value(ModuleResult::new(false, "ok")).unwrap();
        assert!(value.get("facts").is_none());
    }
}
