//! Resource kinds the reconciler manages.

use std::fmt;

use hwm_client::{paths, Filter, RemoteRecord, ResourceClient};
use hwm_reconcile::{select_unique, DriftSignal};
use serde::Deserialize;
use serde_json::Value;

use crate::desired::{ServerHardwareSpec, ServerProfileSpec, ServerProfileTemplateSpec};
use crate::error::ConvergeError;
use crate::mapper::{self, NormalizedConfig, ResolverSet};

const PROFILE_DRIFT: [DriftSignal; 1] = [DriftSignal::new("templateCompliance", "Compliant")];

/// Management-address types that identify imported hardware.
const MANAGEMENT_ADDRESS_TYPES: [&str; 2] = ["Static", "DHCP"];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ResourceKind {
    ServerHardware,
    ServerProfileTemplate,
    ServerProfile,
}

impl ResourceKind {
    pub fn collection(&self) -> &'static str {
        match self {
            Self::ServerHardware => paths::SERVER_HARDWARE,
            Self::ServerProfileTemplate => paths::SERVER_PROFILE_TEMPLATES,
            Self::ServerProfile => paths::SERVER_PROFILES,
        }
    }

    /// Status fields whose value marks the record as drifted.
    pub fn drift_signals(&self) -> &'static [DriftSignal] {
        match self {
            Self::ServerProfile => &PROFILE_DRIFT,
            Self::ServerHardware | Self::ServerProfileTemplate => &[],
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            Self::ServerHardware => "server hardware",
            Self::ServerProfileTemplate => "server profile template",
            Self::ServerProfile => "server profile",
        }
    }
}

impl fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Desired configuration of one resource, tagged by kind.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum DesiredResource {
    ServerHardware(ServerHardwareSpec),
    ServerProfileTemplate(ServerProfileTemplateSpec),
    ServerProfile(ServerProfileSpec),
}

impl DesiredResource {
    pub fn kind(&self) -> ResourceKind {
        match self {
            Self::ServerHardware(_) => ResourceKind::ServerHardware,
            Self::ServerProfileTemplate(_) => ResourceKind::ServerProfileTemplate,
            Self::ServerProfile(_) => ResourceKind::ServerProfile,
        }
    }

    /// The value that identifies the remote resource: the management
    /// address for hardware, the name otherwise.
    pub fn key(&self) -> &str {
        match self {
            Self::ServerHardware(spec) => &spec.ilo_ip_address,
            Self::ServerProfileTemplate(spec) => &spec.name,
            Self::ServerProfile(spec) => &spec.name,
        }
    }

    /// Whether deletion should override the appliance's safety checks.
    pub fn force_delete(&self) -> bool {
        match self {
            Self::ServerHardware(spec) => spec.force,
            _ => false,
        }
    }

    /// Find the remote record this desired resource targets.
    pub async fn lookup<C: ResourceClient>(
        &self,
        client: &C,
    ) -> Result<Option<RemoteRecord>, ConvergeError> {
        let kind = self.kind();
        let matches = match self {
            Self::ServerHardware(spec) => client
                .get(kind.collection(), &Filter::All)
                .await?
                .into_iter()
                .filter(|record| is_managed_at(record, &spec.ilo_ip_address))
                .collect(),
            _ => client.get(kind.collection(), &Filter::name(self.key())).await?,
        };
        Ok(select_unique(kind.label(), self.key(), matches)?)
    }

    /// Render the desired state in the appliance's schema.
    pub async fn normalize<C: ResourceClient>(
        &self,
        resolvers: &ResolverSet<'_, C>,
    ) -> Result<NormalizedConfig, ConvergeError> {
        match self {
            Self::ServerHardware(spec) => Ok(mapper::map_hardware(spec)),
            Self::ServerProfileTemplate(spec) => mapper::map_template(spec, resolvers).await,
            Self::ServerProfile(spec) => mapper::map_profile(spec, resolvers).await,
        }
    }
}

/// Whether a hardware record is managed through `address`, either by host
/// name or by one of its management addresses.
pub fn is_managed_at(record: &RemoteRecord, address: &str) -> bool {
    let Some(info) = record.get("mpHostInfo") else {
        return false;
    };
    if info.get("mpHostName").and_then(Value::as_str) == Some(address) {
        return true;
    }

    info.get("mpIpAddresses")
        .and_then(Value::as_array)
        .map(|addresses| {
            addresses.iter().any(|entry| {
                let kind = entry.get("type").and_then(Value::as_str).unwrap_or_default();
                entry.get("address").and_then(Value::as_str) == Some(address)
                    && MANAGEMENT_ADDRESS_TYPES.contains(&kind)
            })
        })
        .unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;
    use serde_json::json;

    fn hardware(value: Value) -> RemoteRecord {
        RemoteRecord::from_value(value).unwrap()
    }

    #[rstest]
    #[case(json!({"mpHostInfo": {"mpHostName": "10.0.1.5"}}), true)]
    #[case(json!({"mpHostName": "10.0.1.5"}), false)]
    #[case(json!({"mpHostInfo": {"mpIpAddresses": [{"address": "10.0.1.5", "type": "DHCP"}]}}), true)]
    #[case(json!({"mpHostInfo": {"mpIpAddresses": [{"address": "10.0.1.5", "type": "Static"}]}}), true)]
    #[case(json!({"mpHostInfo": {"mpIpAddresses": [{"address": "10.0.1.5", "type": "LinkLocal"}]}}), false)]
    #[case(json!({"mpHostInfo": {"mpHostName": "10.0.1.6"}}), false)]
    #[case(json!({}), false)]
    fn test_is_managed_at(#[case] record: Value, #[case] expected: bool) {
        assert_eq!(is_managed_at(&hardware(record), "10.0.1.5"), expected);
    }

    #[test]
    fn test_tagged_deserialization() {
        let resource: DesiredResource = serde_json::from_value(json!({
            "kind": "server_profile_template",
            "name": "Compute",
            "server_hardware_type": "DL360 Gen9 1"
        }))
        .unwrap();

        assert_eq!(resource.kind(), ResourceKind::ServerProfileTemplate);
        assert_eq!(resource.key(), "Compute");
        assert!(!resource.force_delete());
    }

    #[test]
    fn test_only_profiles_carry_drift_signals() {
        assert_eq!(ResourceKind::ServerProfile.drift_signals().len(), 1);
        assert!(ResourceKind::ServerProfileTemplate.drift_signals().is_empty());
        assert!(ResourceKind::ServerHardware.drift_signals().is_empty());
    }
}
