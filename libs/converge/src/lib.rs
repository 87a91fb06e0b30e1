//! Desired-state convergence for the hardware-management appliance.
//!
//! - [`desired`]: caller-supplied desired state
//! - [`mapper`]: translation into the appliance schema, with reference
//!   resolution
//! - [`reconciler`]: one-pass create/update/delete decisions
//! - [`bootstrap`]: the first-boot workflow for the appliance itself
//! - [`operations`]: caller-facing entry points and their results

pub mod bootstrap;
pub mod desired;
pub mod discovery;
pub mod error;
pub mod kind;
pub mod mapper;
pub mod operations;
pub mod reconciler;

pub use bootstrap::{ApplianceBootstrap, BootstrapPolicy, BootstrapReport, BootstrapState};
pub use desired::{
    AddressMode, ApplianceLogin, ApplianceSpec, BatchArgs, DesiredState, Lifecycle, OperationArgs,
    ServerHardwareSpec, ServerProfileSpec, ServerProfileTemplateSpec,
};
pub use discovery::{DiscoveryRecord, HardwareDiscovery, StaticDiscovery, XmlDataDiscovery};
pub use error::ConvergeError;
pub use kind::{DesiredResource, ResourceKind};
pub use mapper::{NormalizedConfig, ResolvedRef, ResolverSet};
pub use operations::{FailureResult, ModuleResult};
pub use reconciler::{Outcome, Reconciler};
