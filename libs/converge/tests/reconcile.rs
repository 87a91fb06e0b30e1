//! Reconciliation against the in-memory appliance.

use hwm_client::{paths, CallKind, Credentials, MemoryAppliance, MemoryClient, ResourceClient};
use hwm_converge::{
    ConvergeError, DesiredResource, DesiredState, Lifecycle, Reconciler, ServerHardwareSpec,
    ServerProfileSpec, ServerProfileTemplateSpec,
};
use hwm_reconcile::Action;
use serde_json::{json, Value};

async fn appliance() -> (MemoryAppliance, MemoryClient) {
    let appliance = MemoryAppliance::new();
    appliance.add_user("admin", "pw");
    appliance.insert(
        paths::SERVER_HARDWARE_TYPES,
        json!({"name": "DL360 Gen9 1", "uri": "/rest/server-hardware-types/dl360"}),
    );
    appliance.insert(
        paths::FIRMWARE_DRIVERS,
        json!({"version": "2016.10.0", "uri": "/rest/firmware-drivers/spp-2016"}),
    );

    let mut client = appliance.client("10.0.0.1");
    client.login(&Credentials::new("admin", "pw")).await.unwrap();
    appliance.clear_calls();
    (appliance, client)
}

fn template(value: Value) -> DesiredResource {
    DesiredResource::ServerProfileTemplate(serde_json::from_value::<ServerProfileTemplateSpec>(value).unwrap())
}

fn compute_template() -> DesiredResource {
    template(json!({
        "name": "Compute",
        "server_hardware_type": "DL360 Gen9 1",
        "firmware_baseline": "2016.10.0"
    }))
}

fn profile(name: &str) -> DesiredResource {
    DesiredResource::ServerProfile(ServerProfileSpec {
        name: name.to_string(),
        server_template: "Compute".to_string(),
        server_hardware: None,
    })
}

fn hardware(address: &str) -> DesiredResource {
    DesiredResource::ServerHardware(
        serde_json::from_value::<ServerHardwareSpec>(json!({
            "ilo_ip_address": address,
            "ilo_user": "dcs",
            "ilo_password": "dcs",
            "force": true
        }))
        .unwrap(),
    )
}

#[tokio::test]
async fn test_second_run_makes_no_mutations() {
    let (appliance, client) = appliance().await;
    let reconciler = Reconciler::new(&client);
    let desired = DesiredState::present(compute_template());

    let first = reconciler.converge(&desired).await.unwrap();
    assert_eq!(first.action, Action::Created);
    assert!(first.changed);

    let second = reconciler.converge(&desired).await.unwrap();
    assert_eq!(second.action, Action::None);
    assert!(!second.changed);
    assert_eq!(appliance.mutations().len(), 1);
}

#[tokio::test]
async fn test_created_record_matches_desired_state() {
    let (appliance, client) = appliance().await;
    let reconciler = Reconciler::new(&client);
    let desired = DesiredState::present(compute_template());

    let created = reconciler.reconcile(&desired, None).await.unwrap();
    let record = created.record.unwrap();
    assert_eq!(record.str_field("type"), Some("ServerProfileTemplateV1"));
    assert_eq!(
        record.pointer("/firmware/firmwareBaselineUri"),
        Some(&json!("/rest/firmware-drivers/spp-2016"))
    );

    appliance.clear_calls();
    let again = reconciler.reconcile(&desired, Some(record)).await.unwrap();
    assert_eq!(again.action, Action::None);
    assert!(appliance.mutations().is_empty());
}

#[tokio::test]
async fn test_changed_field_is_updated_in_one_call() {
    let (appliance, client) = appliance().await;
    let reconciler = Reconciler::new(&client);
    reconciler
        .converge(&DesiredState::present(compute_template()))
        .await
        .unwrap();
    appliance.clear_calls();

    let with_storage = DesiredState::present(template(json!({
        "name": "Compute",
        "server_hardware_type": "DL360 Gen9 1",
        "firmware_baseline": "2016.10.0",
        "local_storage": {
            "0": {"logical_drives": {"Boot": {"raid_level": "RAID1", "num_drives": 2, "bootable": true}}}
        }
    })));
    let outcome = reconciler.converge(&with_storage).await.unwrap();

    assert_eq!(outcome.action, Action::Updated);
    let record = outcome.record.unwrap();
    assert_eq!(
        record.pointer("/localStorage/controllers/0/logicalDrives/0/raidLevel"),
        Some(&json!("RAID1"))
    );
    assert_eq!(record.str_field("type"), Some("ServerProfileTemplateV1"));

    let mutations = appliance.mutations();
    assert_eq!(mutations.len(), 1);
    assert_eq!(mutations[0].kind, CallKind::Update);
}

#[tokio::test]
async fn test_delete_then_absent() {
    let (appliance, client) = appliance().await;
    let reconciler = Reconciler::new(&client);
    reconciler
        .converge(&DesiredState::present(compute_template()))
        .await
        .unwrap();

    let absent = DesiredState::absent(compute_template());
    let deleted = reconciler.converge(&absent).await.unwrap();
    assert_eq!(deleted.action, Action::Deleted);
    assert!(appliance.records(paths::SERVER_PROFILE_TEMPLATES).is_empty());

    appliance.clear_calls();
    let again = reconciler.converge(&absent).await.unwrap();
    assert_eq!(again.action, Action::None);
    assert!(appliance.mutations().is_empty());
}

#[tokio::test]
async fn test_unknown_reference_makes_no_mutations() {
    let (appliance, client) = appliance().await;
    let desired = DesiredState::present(template(json!({
        "name": "Compute",
        "server_hardware_type": "BL460c Gen8 1"
    })));

    let err = Reconciler::new(&client).converge(&desired).await.unwrap_err();
    assert_eq!(err.code(), "reference_not_found");
    assert!(err.to_string().contains("BL460c Gen8 1"));
    assert!(appliance.mutations().is_empty());
}

#[tokio::test]
async fn test_ambiguous_target_is_refused() {
    let (appliance, client) = appliance().await;
    appliance.insert(paths::SERVER_PROFILE_TEMPLATES, json!({"name": "Compute"}));
    appliance.insert(paths::SERVER_PROFILE_TEMPLATES, json!({"name": "Compute"}));
    appliance.clear_calls();

    let err = Reconciler::new(&client)
        .converge(&DesiredState::absent(compute_template()))
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        ConvergeError::Reconcile(hwm_reconcile::ReconcileError::AmbiguousMatch { count: 2, .. })
    ));
    assert!(appliance.mutations().is_empty());
}

#[tokio::test]
async fn test_profile_from_template_and_compliance_drift() {
    let (appliance, client) = appliance().await;
    let reconciler = Reconciler::new(&client);
    reconciler
        .converge(&DesiredState::present(compute_template()))
        .await
        .unwrap();

    let desired = DesiredState::present(profile("web-01"));
    let created = reconciler.converge(&desired).await.unwrap();
    let record = created.record.unwrap();
    assert_eq!(record.str_field("type"), Some("ServerProfileV5"));
    assert_eq!(
        record.str_field("serverHardwareTypeUri"),
        Some("/rest/server-hardware-types/dl360")
    );

    // Template changed underneath the profile.
    let uri = record.uri().unwrap().to_string();
    let mut drifted = record.into_fields();
    drifted.insert("templateCompliance".to_string(), json!("NonCompliant"));
    client
        .update(paths::SERVER_PROFILES, &uri, &Value::Object(drifted))
        .await
        .unwrap();
    appliance.clear_calls();

    let fixed = reconciler.converge(&desired).await.unwrap();
    assert_eq!(fixed.action, Action::Updated);
    assert_eq!(
        fixed.record.unwrap().str_field("templateCompliance"),
        Some("Compliant")
    );
    assert_eq!(appliance.mutations().len(), 1);

    let settled = reconciler.converge(&desired).await.unwrap();
    assert_eq!(settled.action, Action::None);
}

#[tokio::test]
async fn test_profile_power_states_are_unsupported() {
    let (appliance, client) = appliance().await;
    let desired = DesiredState::new(profile("web-01"), Lifecycle::PoweredOn);

    let err = Reconciler::new(&client).converge(&desired).await.unwrap_err();
    assert!(matches!(err, ConvergeError::Unsupported(_)));
    assert!(appliance.calls().is_empty());
}

#[tokio::test]
async fn test_hardware_import_and_power() {
    let (appliance, client) = appliance().await;
    let reconciler = Reconciler::new(&client);

    let imported = reconciler
        .converge(&DesiredState::present(hardware("10.0.1.5")))
        .await
        .unwrap();
    assert_eq!(imported.action, Action::Created);
    let record = imported.record.unwrap();
    assert_eq!(record.pointer("/mpHostInfo/mpHostName"), Some(&json!("10.0.1.5")));
    assert!(record.get("password").is_none());

    let again = reconciler
        .converge(&DesiredState::present(hardware("10.0.1.5")))
        .await
        .unwrap();
    assert_eq!(again.action, Action::None);

    let on = DesiredState::new(hardware("10.0.1.5"), Lifecycle::PoweredOn);
    let powered = reconciler.converge(&on).await.unwrap();
    assert_eq!(powered.action, Action::Updated);
    assert_eq!(powered.record.unwrap().str_field("powerState"), Some("On"));

    appliance.clear_calls();
    let still_on = reconciler.converge(&on).await.unwrap();
    assert!(!still_on.changed);
    assert!(appliance.mutations().is_empty());

    let removed = reconciler
        .converge(&DesiredState::absent(hardware("10.0.1.5")))
        .await
        .unwrap();
    assert_eq!(removed.action, Action::Deleted);
}

#[tokio::test]
async fn test_power_on_unmanaged_hardware() {
    let (appliance, client) = appliance().await;
    let desired = DesiredState::new(hardware("10.0.1.9"), Lifecycle::Restarted);

    let err = Reconciler::new(&client).converge(&desired).await.unwrap_err();
    assert_eq!(err.code(), "reference_not_found");
    assert!(appliance.mutations().is_empty());
}

#[tokio::test]
async fn test_batch_rejects_duplicates_before_any_call() {
    let (appliance, client) = appliance().await;
    let batch = vec![
        DesiredState::present(compute_template()),
        DesiredState::absent(compute_template()),
    ];

    let err = Reconciler::new(&client)
        .reconcile_batch(&batch, 2)
        .await
        .unwrap_err();
    assert_eq!(err.code(), "invalid_desired_state");
    assert!(appliance.calls().is_empty());
}

#[tokio::test]
async fn test_batch_reports_each_entry_in_order() {
    let (appliance, client) = appliance().await;
    let batch = vec![
        DesiredState::present(compute_template()),
        DesiredState::present(template(json!({
            "name": "Storage",
            "server_hardware_type": "Missing Type"
        }))),
        DesiredState::present(hardware("10.0.1.5")),
    ];

    let results = Reconciler::new(&client)
        .reconcile_batch(&batch, 3)
        .await
        .unwrap();

    assert_eq!(results.len(), 3);
    assert_eq!(results[0].as_ref().unwrap().action, Action::Created);
    assert_eq!(results[1].as_ref().unwrap_err().code(), "reference_not_found");
    assert_eq!(results[2].as_ref().unwrap().action, Action::Created);
    assert_eq!(appliance.mutations().len(), 2);
}

async fn assert_managed_hardware_is_found(address: &str, mp_host_info: Value) {
    let (appliance, client) = appliance().await;
    appliance.insert(
        paths::SERVER_HARDWARE,
        json!({
            "name": "Encl1, bay 3",
            "uri": "/rest/server-hardware/30303437",
            "powerState": "On",
            "mpHostInfo": mp_host_info
        }),
    );
    let reconciler = Reconciler::new(&client);
    let desired = DesiredState::present(hardware(address));

    for _ in 0..2 {
        let outcome = reconciler.converge(&desired).await.unwrap();
        assert_eq!(outcome.action, Action::None);
        assert_eq!(
            outcome.record.unwrap().uri(),
            Some("/rest/server-hardware/30303437")
        );
    }
    assert!(appliance.mutations().is_empty());
    assert_eq!(appliance.records(paths::SERVER_HARDWARE).len(), 1);
}

#[tokio::test]
async fn test_managed_hardware_found_by_host_name() {
    assert_managed_hardware_is_found(
        "ilo-1.example.com",
        json!({
            "mpHostName": "ilo-1.example.com",
            "mpIpAddresses": [{"address": "fe80::2", "type": "LinkLocal"}]
        }),
    )
    .await;
}

#[tokio::test]
async fn test_managed_hardware_found_by_dhcp_address() {
    assert_managed_hardware_is_found(
        "10.0.1.7",
        json!({
            "mpHostName": "ilo-7",
            "mpIpAddresses": [
                {"address": "fe80::7", "type": "LinkLocal"},
                {"address": "10.0.1.7", "type": "DHCP"}
            ]
        }),
    )
    .await;
}

#[tokio::test]
async fn test_storage_with_numeric_slot_matches_appliance_record() {
    let (appliance, client) = appliance().await;
    appliance.insert(
        paths::SERVER_PROFILE_TEMPLATES,
        json!({
            "type": "ServerProfileTemplateV1",
            "name": "Compute",
            "uri": "/rest/server-profile-templates/compute",
            "serverHardwareTypeUri": "/rest/server-hardware-types/dl360",
            "localStorage": {
                "controllers": [{
                    "slotNumber": 0,
                    "managed": true,
                    "mode": "RAID",
                    "initialize": false,
                    "deviceSlot": "Embedded",
                    "logicalDrives": [{
                        "driveName": "Boot",
                        "raidLevel": "RAID1",
                        "bootable": true,
                        "numPhysicalDrives": 2,
                        "driveTechnology": null
                    }]
                }]
            }
        }),
    );

    let desired = DesiredState::present(template(json!({
        "name": "Compute",
        "server_hardware_type": "DL360 Gen9 1",
        "local_storage": {
            "0": {"logical_drives": {"Boot": {"raid_level": "RAID1", "num_drives": 2, "bootable": true}}}
        }
    })));
    let outcome = Reconciler::new(&client).converge(&desired).await.unwrap();

    assert_eq!(outcome.action, Action::None);
    assert!(appliance.mutations().is_empty());
}
