//! Caller-supplied desired state.
//!
//! These types are deserialized from the automation host's arguments and
//! never mutated afterwards. Per-field defaults apply only when the caller
//! omits the field.

use hwm_client::Credentials;
use hwm_reconcile::Intent;
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

use crate::error::ConvergeError;
use crate::kind::{DesiredResource, ResourceKind};

/// Requested lifecycle state.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Lifecycle {
    #[default]
    Present,
    Absent,
    PoweredOn,
    PoweredOff,
    Restarted,
}

impl Lifecycle {
    /// Whether the resource should exist.
    pub fn intent(&self) -> Intent {
        match self {
            Self::Absent => Intent::Absent,
            _ => Intent::Present,
        }
    }

    /// The power transition this state requests, if any.
    pub fn power(&self) -> Option<PowerAction> {
        match self {
            Self::PoweredOn => Some(PowerAction::On),
            Self::PoweredOff => Some(PowerAction::Off),
            Self::Restarted => Some(PowerAction::Restart),
            Self::Present | Self::Absent => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Present => "present",
            Self::Absent => "absent",
            Self::PoweredOn => "powered_on",
            Self::PoweredOff => "powered_off",
            Self::Restarted => "restarted",
        }
    }
}

/// Power transitions for managed hardware.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PowerAction {
    On,
    Off,
    Restart,
}

/// Desired state of one resource instance.
#[derive(Debug, Clone, Deserialize)]
pub struct DesiredState {
    #[serde(flatten)]
    pub resource: DesiredResource,

    #[serde(default)]
    pub state: Lifecycle,
}

impl DesiredState {
    pub fn new(resource: DesiredResource, state: Lifecycle) -> Self {
        Self { resource, state }
    }

    pub fn present(resource: DesiredResource) -> Self {
        Self::new(resource, Lifecycle::Present)
    }

    pub fn absent(resource: DesiredResource) -> Self {
        Self::new(resource, Lifecycle::Absent)
    }

    /// Reject lifecycle states the resource kind does not implement.
    pub fn validate(&self) -> Result<(), ConvergeError> {
        let kind = self.resource.kind();
        if self.state.power().is_some() && kind != ResourceKind::ServerHardware {
            return Err(ConvergeError::Unsupported(format!(
                "state '{}' is not supported for {}",
                self.state.as_str(),
                kind
            )));
        }
        Ok(())
    }
}

/// Appliance address and login every resource operation carries.
#[derive(Clone, Deserialize)]
pub struct ApplianceLogin {
    pub oneview_host: String,
    pub username: String,
    pub password: String,
}

impl ApplianceLogin {
    pub fn credentials(&self) -> Credentials {
        Credentials::new(&self.username, &self.password)
    }
}

impl std::fmt::Debug for ApplianceLogin {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ApplianceLogin")
            .field("oneview_host", &self.oneview_host)
            .field("username", &self.username)
            .finish_non_exhaustive()
    }
}

/// Arguments of a single-resource operation: login, resource fields and
/// lifecycle state in one flat object.
#[derive(Debug, Clone, Deserialize)]
pub struct OperationArgs<T> {
    #[serde(flatten)]
    pub login: ApplianceLogin,

    #[serde(flatten)]
    pub spec: T,

    #[serde(default)]
    pub state: Lifecycle,
}

/// Arguments of a batch run: login plus a list of resources.
#[derive(Debug, Clone, Deserialize)]
pub struct BatchArgs {
    #[serde(flatten)]
    pub login: ApplianceLogin,

    pub resources: Vec<DesiredState>,

    #[serde(default = "default_concurrency")]
    pub concurrency: usize,
}

fn default_concurrency() -> usize {
    4
}

/// Physical server to import, identified by its management controller.
#[derive(Clone, Deserialize)]
pub struct ServerHardwareSpec {
    pub ilo_ip_address: String,
    pub ilo_user: String,
    pub ilo_password: String,

    #[serde(default)]
    pub force: bool,

    #[serde(default)]
    pub license: LicenseIntent,

    #[serde(default)]
    pub mode: ConfigurationState,
}

impl std::fmt::Debug for ServerHardwareSpec {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServerHardwareSpec")
            .field("ilo_ip_address", &self.ilo_ip_address)
            .field("ilo_user", &self.ilo_user)
            .field("force", &self.force)
            .field("license", &self.license)
            .field("mode", &self.mode)
            .finish_non_exhaustive()
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum LicenseIntent {
    #[default]
    OneView,
    OneViewNoiLO,
    OneViewStandard,
}

impl LicenseIntent {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::OneView => "OneView",
            Self::OneViewNoiLO => "OneViewNoiLO",
            Self::OneViewStandard => "OneViewStandard",
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConfigurationState {
    #[default]
    Managed,
    Monitored,
}

impl ConfigurationState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Managed => "Managed",
            Self::Monitored => "Monitored",
        }
    }
}

/// Server profile template.
#[derive(Debug, Clone, Deserialize)]
pub struct ServerProfileTemplateSpec {
    pub name: String,

    /// Hardware type name as shown by the appliance.
    pub server_hardware_type: String,

    /// Firmware bundle version string.
    #[serde(default)]
    pub firmware_baseline: Option<String>,

    /// Controllers keyed by slot, in the caller's order.
    #[serde(default)]
    pub local_storage: Option<IndexMap<String, ControllerSpec>>,
}

/// One storage controller.
#[derive(Debug, Clone, Deserialize)]
pub struct ControllerSpec {
    #[serde(default = "default_controller_mode")]
    pub mode: String,

    #[serde(default)]
    pub initialize: bool,

    /// Logical drives keyed by name, in the caller's order.
    pub logical_drives: IndexMap<String, LogicalDriveSpec>,
}

fn default_controller_mode() -> String {
    "RAID".to_string()
}

#[derive(Debug, Clone, Deserialize)]
pub struct LogicalDriveSpec {
    pub raid_level: String,

    #[serde(default)]
    pub bootable: bool,

    #[serde(default)]
    pub drive_technology: Option<String>,

    pub num_drives: u32,
}

/// Server profile created from a template.
#[derive(Debug, Clone, Deserialize)]
pub struct ServerProfileSpec {
    pub name: String,

    /// Template name.
    pub server_template: String,

    /// Hardware name to assign; the profile stays unassigned when omitted.
    #[serde(default)]
    pub server_hardware: Option<String>,
}

/// Address-mode discriminator for the appliance network.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AddressMode {
    #[serde(rename = "DHCP")]
    Dhcp,
    #[serde(rename = "STATIC")]
    Static,
}

impl AddressMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Dhcp => "DHCP",
            Self::Static => "STATIC",
        }
    }
}

/// First-boot settings of the appliance itself.
#[derive(Clone, Deserialize)]
pub struct ApplianceSpec {
    /// Address the appliance answers on before network configuration.
    pub initial_ip: String,

    pub username: String,
    pub password: String,

    #[serde(default = "default_accept_eula")]
    pub accept_eula: bool,

    pub ipv4_type: AddressMode,

    #[serde(default)]
    pub ipv4_address: Option<String>,

    #[serde(default)]
    pub ipv4_subnet: Option<String>,

    #[serde(default)]
    pub ipv4_gateway: Option<String>,

    pub hostname: String,

    #[serde(default)]
    pub domain_name: Option<String>,
}

fn default_accept_eula() -> bool {
    true
}

impl ApplianceSpec {
    pub fn credentials(&self) -> Credentials {
        Credentials::new(&self.username, &self.password)
    }

    /// Address the appliance is expected to answer on once the network
    /// settings have applied.
    pub fn target_address(&self) -> &str {
        match (self.ipv4_type, self.ipv4_address.as_deref()) {
            (AddressMode::Static, Some(address)) => address,
            _ => &self.initial_ip,
        }
    }
}

impl std::fmt::Debug for ApplianceSpec {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ApplianceSpec")
            .field("initial_ip", &self.initial_ip)
            .field("username", &self.username)
            .field("ipv4_type", &self.ipv4_type)
            .field("ipv4_address", &self.ipv4_address)
            .field("hostname", &self.hostname)
            .field("domain_name", &self.domain_name)
            .finish_non_exhaustive()
    }
}
