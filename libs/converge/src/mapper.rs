//! Translation of caller desired state into the appliance's schema.
//!
//! Mapping is pure apart from read-only lookups: symbolic references (type
//! names, template names, firmware versions) are resolved through a
//! [`ResolverSet`] into [`ResolvedRef`]s, and only resolved identifiers are
//! ever written into a [`NormalizedConfig`].

use hwm_client::{paths, Filter, RemoteRecord, ResourceClient};
use hwm_reconcile::resolve_unique;
use indexmap::IndexMap;
use serde_json::{json, Map, Value};
use tracing::debug;

use crate::desired::{
    AddressMode, ApplianceSpec, ControllerSpec, ServerHardwareSpec, ServerProfileSpec,
    ServerProfileTemplateSpec,
};
use crate::error::ConvergeError;

pub const TEMPLATE_TYPE: &str = "ServerProfileTemplateV1";

/// Installation method used for firmware baselines.
pub const FIRMWARE_INSTALL_TYPE: &str = "FirmwareOnlyOfflineMode";

/// Identifier sources for MAC, serial number and WWN.
pub const IDENTIFIER_SOURCE: &str = "Physical";

/// Static-address keys that must be absent under DHCP.
pub const STATIC_ADDRESS_KEYS: [&str; 3] = ["app1Ipv4Addr", "ipv4Subnet", "ipv4Gateway"];

/// Remote identifier obtained from a resolver lookup.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedRef {
    uri: String,
}

impl ResolvedRef {
    fn from_record(kind: &str, name: &str, record: &RemoteRecord) -> Result<Self, ConvergeError> {
        let uri = record.uri().ok_or_else(|| {
            ConvergeError::UnexpectedRecord(format!("{kind} '{name}' has no uri"))
        })?;
        Ok(Self {
            uri: uri.to_string(),
        })
    }

    pub fn uri(&self) -> &str {
        &self.uri
    }
}

/// Appliance-schema rendering of one desired resource.
///
/// `compared` fields decide convergence; `create_only` fields are sent when
/// the resource is first created and ignored afterwards.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct NormalizedConfig {
    compared: Map<String, Value>,
    create_only: Map<String, Value>,
}

impl NormalizedConfig {
    pub fn compared(&self) -> &Map<String, Value> {
        &self.compared
    }

    pub fn create_only(&self) -> &Map<String, Value> {
        &self.create_only
    }

    /// Field lookup across both sets, compared fields first.
    pub fn get(&self, field: &str) -> Option<&Value> {
        self.compared.get(field).or_else(|| self.create_only.get(field))
    }

    /// Body of the create request.
    pub fn create_body(&self) -> Value {
        let mut body = self.create_only.clone();
        for (key, value) in &self.compared {
            body.insert(key.clone(), value.clone());
        }
        Value::Object(body)
    }

    fn set(&mut self, field: &str, value: Value) {
        self.compared.insert(field.to_string(), value);
    }

    fn set_ref(&mut self, field: &str, reference: &ResolvedRef) {
        self.set(field, Value::String(reference.uri.clone()));
    }

    fn set_create_only(&mut self, field: &str, value: Value) {
        self.create_only.insert(field.to_string(), value);
    }
}

/// Read-only lookups used while mapping.
pub struct ResolverSet<'a, C> {
    client: &'a C,
}

impl<'a, C: ResourceClient> ResolverSet<'a, C> {
    pub fn new(client: &'a C) -> Self {
        Self { client }
    }

    async fn resolve(
        &self,
        kind: &str,
        collection: &str,
        field: &str,
        value: &str,
    ) -> Result<ResolvedRef, ConvergeError> {
        let matches = self.client.get(collection, &Filter::eq(field, value)).await?;
        let record = resolve_unique(kind, value, matches)?;
        let resolved = ResolvedRef::from_record(kind, value, &record)?;
        debug!(kind, value, uri = resolved.uri(), "Resolved reference");
        Ok(resolved)
    }

    pub async fn server_hardware_type(&self, name: &str) -> Result<ResolvedRef, ConvergeError> {
        self.resolve("server hardware type", paths::SERVER_HARDWARE_TYPES, "name", name)
            .await
    }

    pub async fn server_hardware(&self, name: &str) -> Result<ResolvedRef, ConvergeError> {
        self.resolve("server hardware", paths::SERVER_HARDWARE, "name", name)
            .await
    }

    pub async fn profile_template(&self, name: &str) -> Result<ResolvedRef, ConvergeError> {
        self.resolve("server profile template", paths::SERVER_PROFILE_TEMPLATES, "name", name)
            .await
    }

    pub async fn firmware_bundle(&self, version: &str) -> Result<ResolvedRef, ConvergeError> {
        self.resolve("firmware bundle", paths::FIRMWARE_DRIVERS, "version", version)
            .await
    }

    /// The profile skeleton the appliance derives from a template.
    pub async fn profile_skeleton(
        &self,
        template: &ResolvedRef,
    ) -> Result<Map<String, Value>, ConvergeError> {
        let path = format!("{}{}", template.uri(), paths::NEW_PROFILE_SUFFIX);
        match self.client.fetch(&path).await? {
            Value::Object(fields) => Ok(fields),
            other => Err(ConvergeError::UnexpectedRecord(format!(
                "profile skeleton for {} is not an object: {other}",
                template.uri()
            ))),
        }
    }
}

/// Map a server profile template.
pub async fn map_template<C: ResourceClient>(
    spec: &ServerProfileTemplateSpec,
    resolvers: &ResolverSet<'_, C>,
) -> Result<NormalizedConfig, ConvergeError> {
    let hardware_type = resolvers
        .server_hardware_type(&spec.server_hardware_type)
        .await?;

    let mut config = NormalizedConfig::default();
    config.set_create_only("type", json!(TEMPLATE_TYPE));
    for field in ["macType", "serialNumberType", "wwnType"] {
        config.set_create_only(field, json!(IDENTIFIER_SOURCE));
    }
    config.set("name", json!(spec.name));
    config.set_ref("serverHardwareTypeUri", &hardware_type);

    if let Some(version) = &spec.firmware_baseline {
        let bundle = resolvers.firmware_bundle(version).await?;
        config.set("firmware", firmware_settings(&bundle));
    }

    if let Some(storage) = &spec.local_storage {
        config.set("localStorage", local_storage(storage)?);
    }

    Ok(config)
}

/// Map a server profile. The template's derived skeleton supplies the
/// create-only fields.
pub async fn map_profile<C: ResourceClient>(
    spec: &ServerProfileSpec,
    resolvers: &ResolverSet<'_, C>,
) -> Result<NormalizedConfig, ConvergeError> {
    let template = resolvers.profile_template(&spec.server_template).await?;

    let mut config = NormalizedConfig::default();
    for (key, value) in resolvers.profile_skeleton(&template).await? {
        config.set_create_only(&key, value);
    }

    config.set("name", json!(spec.name));
    config.set_ref("serverProfileTemplateUri", &template);

    if let Some(hardware) = &spec.server_hardware {
        let hardware = resolvers.server_hardware(hardware).await?;
        config.set_ref("serverHardwareUri", &hardware);
    }

    Ok(config)
}

/// Map a hardware import request. Every field is create-only: the appliance
/// does not echo the management login back.
pub fn map_hardware(spec: &ServerHardwareSpec) -> NormalizedConfig {
    let mut config = NormalizedConfig::default();
    config.set_create_only("hostname", json!(spec.ilo_ip_address));
    config.set_create_only("username", json!(spec.ilo_user));
    config.set_create_only("password", json!(spec.ilo_password));
    config.set_create_only("force", json!(spec.force));
    config.set_create_only("licensingIntent", json!(spec.license.as_str()));
    config.set_create_only("configurationState", json!(spec.mode.as_str()));
    config
}

/// Firmware block pointing at a resolved baseline.
pub fn firmware_settings(bundle: &ResolvedRef) -> Value {
    json!({
        "manageFirmware": true,
        "forceInstallFirmware": false,
        "firmwareBaselineUri": bundle.uri(),
        "firmwareInstallType": FIRMWARE_INSTALL_TYPE,
    })
}

/// Local storage block; controller and drive order follow the caller's.
///
/// Slot keys must be numeric: the appliance reports `slotNumber` as an
/// integer.
pub fn local_storage(
    controllers: &IndexMap<String, ControllerSpec>,
) -> Result<Value, ConvergeError> {
    let controllers = controllers
        .iter()
        .map(|(slot, controller)| {
            let slot_number: u32 = slot.trim().parse().map_err(|_| {
                ConvergeError::InvalidDesiredState(format!(
                    "controller slot '{slot}' is not a slot number"
                ))
            })?;
            let drives: Vec<Value> = controller
                .logical_drives
                .iter()
                .map(|(name, drive)| {
                    let mut fields = Map::new();
                    fields.insert("driveName".to_string(), json!(name));
                    fields.insert("raidLevel".to_string(), json!(drive.raid_level));
                    fields.insert("bootable".to_string(), json!(drive.bootable));
                    fields.insert("numPhysicalDrives".to_string(), json!(drive.num_drives));
                    if let Some(technology) = &drive.drive_technology {
                        fields.insert("driveTechnology".to_string(), json!(technology));
                    }
                    Value::Object(fields)
                })
                .collect();

            Ok(json!({
                "slotNumber": slot_number,
                "managed": true,
                "mode": controller.mode,
                "initialize": controller.initialize,
                "logicalDrives": drives,
            }))
        })
        .collect::<Result<Vec<Value>, ConvergeError>>()?;

    Ok(json!({ "controllers": controllers }))
}

/// Check the addressing fields before anything is sent to the appliance.
pub fn validate_addressing(spec: &ApplianceSpec) -> Result<(), ConvergeError> {
    if spec.ipv4_type == AddressMode::Dhcp {
        return Ok(());
    }

    let missing: Vec<&str> = [
        ("ipv4_address", &spec.ipv4_address),
        ("ipv4_subnet", &spec.ipv4_subnet),
        ("ipv4_gateway", &spec.ipv4_gateway),
    ]
    .into_iter()
    .filter(|(_, value)| value.as_deref().map_or(true, str::is_empty))
    .map(|(name, _)| name)
    .collect();

    if missing.is_empty() {
        Ok(())
    } else {
        Err(ConvergeError::InvalidDesiredState(format!(
            "STATIC addressing requires {}",
            missing.join(", ")
        )))
    }
}

/// Overlay the desired addressing onto the appliance's current network
/// settings document.
///
/// Only the first interface is configured. Under DHCP the static-address
/// keys are removed entirely.
pub fn map_network(current: &Value, spec: &ApplianceSpec) -> Result<NormalizedConfig, ConvergeError> {
    validate_addressing(spec)?;

    let mut settings = match current {
        Value::Object(fields) => fields.clone(),
        other => {
            return Err(ConvergeError::UnexpectedRecord(format!(
                "network settings are not an object: {other}"
            )))
        }
    };

    let interface = settings
        .get_mut("applianceNetworks")
        .and_then(Value::as_array_mut)
        .and_then(|networks| networks.first_mut())
        .and_then(Value::as_object_mut)
        .ok_or_else(|| {
            ConvergeError::UnexpectedRecord("network settings list no interfaces".to_string())
        })?;

    apply_addressing(interface, spec);

    let mut config = NormalizedConfig::default();
    for (key, value) in settings {
        config.set(&key, value);
    }
    Ok(config)
}

fn apply_addressing(interface: &mut Map<String, Value>, spec: &ApplianceSpec) {
    interface.insert("ipv4Type".to_string(), json!(spec.ipv4_type.as_str()));
    interface.insert("hostname".to_string(), json!(spec.hostname));
    if let Some(domain) = &spec.domain_name {
        interface.insert("domainName".to_string(), json!(domain));
        interface.insert("searchDomains".to_string(), json!([domain]));
    }
    interface.insert("interfaceName".to_string(), json!(""));
    interface.insert("aliasDisabled".to_string(), json!(true));
    interface.remove("virtIpv4Addr");

    match spec.ipv4_type {
        AddressMode::Dhcp => {
            for key in STATIC_ADDRESS_KEYS {
                interface.remove(key);
            }
        }
        AddressMode::Static => {
            let values = [&spec.ipv4_address, &spec.ipv4_subnet, &spec.ipv4_gateway];
            for (key, value) in STATIC_ADDRESS_KEYS.into_iter().zip(values) {
                if let Some(value) = value {
                    interface.insert(key.to_string(), json!(value));
                }
            }
        }
    }
}
