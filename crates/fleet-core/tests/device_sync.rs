//! Integration tests for the device reconciliation jobs.

mod common;

use common::{edge_type, local_thing, thing, thing_model, thing_type, Harness};
use fleet_sync::inventory::SnapshotThing;
use fleet_sync::{
    CancellationToken, DeviceClass, DeviceModel, DeviceTag, FleetError, Includes,
    InventorySnapshot, JobContext, Label, SkipReason, SyncJob,
};

fn pump_inventory(things: Vec<SnapshotThing>) -> InventorySnapshot {
    InventorySnapshot {
        things,
        thing_types: vec![thing_type("pump"), edge_type("gateway")],
        ..InventorySnapshot::default()
    }
}

#[tokio::test]
async fn test_first_run_creates_devices_with_tags() {
    let harness = Harness::new(pump_inventory(vec![thing("pump-01", "pump", 4)
        .named("Pump 1")
        .with_attribute("site", "lyon")
        .with_attribute("floor", "2")]));
    harness.seed_models(vec![thing_model("pump")]);

    let report = harness
        .things_job()
        .execute(&JobContext::default())
        .await
        .unwrap();
    assert_eq!(report.counts.created, 1);

    let device = harness
        .store
        .device("pump-01", Includes::TAGS)
        .unwrap()
        .unwrap();
    assert_eq!(device.name, "Pump 1");
    assert_eq!(device.version, 4);
    assert_eq!(device.device_model_id.as_deref(), Some("pump"));
    assert_eq!(
        device.tags,
        vec![DeviceTag::new("floor", "2"), DeviceTag::new("site", "lyon")]
    );
}

#[tokio::test]
async fn test_second_run_is_noop() {
    let harness = Harness::new(pump_inventory(vec![
        thing("pump-01", "pump", 1).with_attribute("site", "lyon"),
        thing("pump-02", "pump", 3),
    ]));
    harness.seed_models(vec![thing_model("pump")]);
    let job = harness.things_job();

    let first = job.execute(&JobContext::default()).await.unwrap();
    assert!(first.writes_committed > 0);

    let second = job.execute(&JobContext::default()).await.unwrap();
    assert!(second.is_noop());
    assert_eq!(second.counts.unchanged, 2);
    assert_eq!(second.counts.created + second.counts.updated + second.counts.deleted, 0);
}

#[tokio::test]
async fn test_new_update_untouched_and_orphan_in_one_run() {
    let harness = Harness::new(pump_inventory(vec![
        thing("A", "pump", 1),
        thing("B", "pump", 2).named("B renamed").with_attribute("zone", "new"),
        thing("C", "pump", 1).named("C renamed"),
    ]));
    harness.seed_models(vec![thing_model("pump")]);
    harness.seed_devices(vec![
        local_thing("B", "pump", 1).with_tags(vec![DeviceTag::new("zone", "old")]),
        local_thing("C", "pump", 2),
        local_thing("D", "pump", 1).with_tags(vec![DeviceTag::new("zone", "gone")]),
    ]);

    let report = harness
        .things_job()
        .execute(&JobContext::default())
        .await
        .unwrap();

    assert_eq!(report.counts.created, 1);
    assert_eq!(report.counts.updated, 1);
    assert_eq!(report.counts.unchanged, 1);
    assert_eq!(report.counts.deleted, 1);

    assert_eq!(harness.device_ids(DeviceClass::Thing), vec!["A", "B", "C"]);

    let b = harness.store.device("B", Includes::TAGS).unwrap().unwrap();
    assert_eq!(b.name, "B renamed");
    assert_eq!(b.version, 2);
    assert_eq!(b.tags, vec![DeviceTag::new("zone", "new")]);

    let c = harness.store.device("C", Includes::NONE).unwrap().unwrap();
    assert_eq!(c.name, "C");
    assert_eq!(c.version, 2);

    assert_eq!(harness.store.tag_count("D").unwrap(), 0);
}

#[tokio::test]
async fn test_equal_or_lower_version_never_mutates() {
    let harness = Harness::new(pump_inventory(vec![
        thing("same", "pump", 5).named("changed"),
        thing("older", "pump", 2).named("changed"),
    ]));
    harness.seed_models(vec![thing_model("pump")]);
    harness.seed_devices(vec![local_thing("same", "pump", 5), local_thing("older", "pump", 7)]);

    let report = harness
        .things_job()
        .execute(&JobContext::default())
        .await
        .unwrap();
    assert!(report.is_noop());

    for (id, version) in [("same", 5), ("older", 7)] {
        let device = harness.store.device(id, Includes::NONE).unwrap().unwrap();
        assert_eq!(device.name, id);
        assert_eq!(device.version, version);
    }
}

#[tokio::test]
async fn test_update_keeps_labels() {
    let harness = Harness::new(pump_inventory(vec![thing("pump-01", "pump", 2)]));
    harness.seed_models(vec![thing_model("pump")]);
    harness.seed_devices(vec![local_thing("pump-01", "pump", 1).with_labels(vec![Label {
        name: "critical".into(),
        color: "#ff0000".into(),
    }])]);

    harness
        .things_job()
        .execute(&JobContext::default())
        .await
        .unwrap();

    let device = harness
        .store
        .device("pump-01", Includes::ALL)
        .unwrap()
        .unwrap();
    assert_eq!(device.version, 2);
    assert_eq!(device.labels.len(), 1);
}

#[tokio::test]
async fn test_unknown_model_is_skipped_not_orphaned() {
    let mut inventory = pump_inventory(vec![
        thing("valve-01", "valve", 3),
        thing("valve-02", "valve", 1),
    ]);
    inventory.thing_types.push(thing_type("valve"));
    let harness = Harness::new(inventory);
    // A local device whose type has no model yet.
    harness.seed_models(vec![thing_model("pump")]);
    harness.seed_devices(vec![local_thing("valve-01", "pump", 1)]);

    let report = harness
        .things_job()
        .execute(&JobContext::default())
        .await
        .unwrap();

    assert_eq!(
        report.skip_reason("valve-02"),
        Some(&SkipReason::UnknownModel {
            type_name: "valve".into()
        })
    );
    assert!(harness.store.device("valve-02", Includes::NONE).unwrap().is_none());

    let kept = harness.store.device("valve-01", Includes::NONE).unwrap().unwrap();
    assert_eq!(kept.version, 1);
    assert_eq!(report.counts.deleted, 0);
}

#[tokio::test]
async fn test_vendor_errors_skip_item_and_continue() {
    let harness = Harness::new(pump_inventory(vec![
        thing("slow", "pump", 1).with_describe_status(503),
        thing("denied", "pump", 1).with_describe_status(403),
        thing("no-shadow", "pump", 1).with_shadow_status(404),
        thing("bad-shadow", "pump", 1).with_shadow_status(400),
        thing("ok", "pump", 1),
    ]));
    harness.seed_models(vec![thing_model("pump")]);
    harness.seed_devices(vec![local_thing("slow", "pump", 0)]);

    let report = harness
        .things_job()
        .execute(&JobContext::default())
        .await
        .unwrap();

    assert!(matches!(
        report.skip_reason("slow"),
        Some(SkipReason::Transient { .. })
    ));
    assert_eq!(
        report.skip_reason("denied"),
        Some(&SkipReason::Status { code: 403 })
    );
    assert_eq!(
        report.skip_reason("no-shadow"),
        Some(&SkipReason::ShadowNotFound)
    );
    assert_eq!(
        report.skip_reason("bad-shadow"),
        Some(&SkipReason::ShadowRejected)
    );

    // Only the healthy item was created; the failing local one kept its version.
    assert_eq!(harness.device_ids(DeviceClass::Thing), vec!["ok", "slow"]);
    let slow = harness.store.device("slow", Includes::NONE).unwrap().unwrap();
    assert_eq!(slow.version, 0);
}

#[tokio::test]
async fn test_description_without_type_is_skipped() {
    let mut untyped = thing("pump-01", "pump", 1);
    untyped.untyped_description = true;
    let harness = Harness::new(pump_inventory(vec![untyped]));
    harness.seed_models(vec![thing_model("pump")]);

    let report = harness
        .things_job()
        .execute(&JobContext::default())
        .await
        .unwrap();

    assert_eq!(report.skip_reason("pump-01"), Some(&SkipReason::MissingTypeName));
    assert!(harness.device_ids(DeviceClass::Thing).is_empty());
}

#[tokio::test]
async fn test_unclassified_type_is_reported_distinctly() {
    let mut inventory = pump_inventory(vec![thing("sensor-01", "sensor", 1)]);
    inventory
        .thing_types
        .push(fleet_sync::inventory::SnapshotThingType::new("sensor", None));
    let harness = Harness::new(inventory);
    harness.seed_models(vec![thing_model("sensor")]);

    let report = harness
        .things_job()
        .execute(&JobContext::default())
        .await
        .unwrap();

    assert_eq!(
        report.skip_reason("sensor-01"),
        Some(&SkipReason::UnclassifiedType {
            type_name: "sensor".into()
        })
    );
}

#[tokio::test]
async fn test_empty_inventory_deletes_whole_class_only() {
    let harness = Harness::new(pump_inventory(vec![]));
    harness.seed_models(vec![
        thing_model("pump"),
        DeviceModel::new("edge-model", DeviceClass::Edge, "gateway"),
    ]);
    harness.seed_devices(vec![
        local_thing("pump-01", "pump", 1).with_tags(vec![DeviceTag::new("a", "1")]),
        local_thing("pump-02", "pump", 1),
        fleet_sync::Device::new("core-01", "core-01", DeviceClass::Edge, "edge-model", 1),
    ]);

    let report = harness
        .things_job()
        .execute(&JobContext::default())
        .await
        .unwrap();

    assert_eq!(report.counts.deleted, 2);
    assert!(harness.device_ids(DeviceClass::Thing).is_empty());
    assert_eq!(harness.store.tag_count("pump-01").unwrap(), 0);
    assert_eq!(harness.device_ids(DeviceClass::Edge), vec!["core-01"]);
}

#[tokio::test]
async fn test_listing_failure_aborts_without_writes() {
    let harness = Harness::new(pump_inventory(vec![]));
    harness.seed_models(vec![thing_model("pump")]);
    harness.seed_devices(vec![local_thing("pump-01", "pump", 1)]);
    harness.registry.fail_listings(Some("throttled"));

    let result = harness.things_job().execute(&JobContext::default()).await;

    assert!(matches!(result, Err(FleetError::Vendor { .. })));
    assert_eq!(harness.device_ids(DeviceClass::Thing), vec!["pump-01"]);
}

#[tokio::test]
async fn test_cancelled_run_commits_nothing() {
    let harness = Harness::new(pump_inventory(vec![thing("pump-01", "pump", 1)]));
    harness.seed_models(vec![thing_model("pump")]);
    harness.seed_devices(vec![local_thing("orphan", "pump", 1)]);

    let cancel = CancellationToken::new();
    cancel.cancel();
    let result = harness.things_job().execute(&JobContext::new(cancel)).await;

    assert!(matches!(result, Err(FleetError::Cancelled)));
    assert_eq!(harness.device_ids(DeviceClass::Thing), vec!["orphan"]);
}

#[tokio::test]
async fn test_commit_failure_rolls_back_the_run() {
    let harness = Harness::new(pump_inventory(vec![
        thing("pump-01", "pump", 1),
        thing("pump-02", "pump", 1).with_attribute("site", "lyon"),
    ]));
    harness.seed_models(vec![thing_model("pump")]);
    harness.seed_devices(vec![local_thing("orphan", "pump", 1)]);

    // Make the tag insert of the batch fail inside the transaction.
    let conn = rusqlite::Connection::open(harness.db_path()).unwrap();
    conn.execute_batch(
        "CREATE TRIGGER reject_tags BEFORE INSERT ON device_tags
         BEGIN SELECT RAISE(ABORT, 'tags are read-only'); END;",
    )
    .unwrap();
    drop(conn);

    let err = harness
        .things_job()
        .execute(&JobContext::default())
        .await
        .unwrap_err();

    assert!(matches!(err, FleetError::Database { .. }));
    assert!(err.is_retryable());
    assert_eq!(harness.device_ids(DeviceClass::Thing), vec!["orphan"]);
}

#[tokio::test]
async fn test_edge_job_uses_edge_models_and_skips_shadow() {
    let harness = Harness::new(pump_inventory(vec![
        thing("core-01", "gateway", 1).with_shadow_status(404),
        thing("pump-01", "pump", 1),
    ]));
    harness.seed_models(vec![
        thing_model("pump"),
        DeviceModel::new("7f1c", DeviceClass::Edge, "gateway").with_external_identifier("d-1"),
    ]);

    let report = harness
        .edge_devices_job()
        .execute(&JobContext::default())
        .await
        .unwrap();

    assert_eq!(report.counts.created, 1);
    assert_eq!(report.skip_reason("pump-01"), Some(&SkipReason::OtherDeviceClass));
    assert_eq!(harness.registry.shadow_calls(), 0);

    let core = harness.store.device("core-01", Includes::NONE).unwrap().unwrap();
    assert_eq!(core.class, DeviceClass::Edge);
    assert_eq!(core.device_model_id.as_deref(), Some("7f1c"));
    assert!(harness.device_ids(DeviceClass::Thing).is_empty());
}

#[tokio::test]
async fn test_type_moving_to_edge_hands_device_over() {
    let harness = Harness::new(pump_inventory(vec![thing("pump-01", "pump", 2)]));
    harness.seed_models(vec![
        thing_model("pump"),
        DeviceModel::new("e-pump", DeviceClass::Edge, "pump"),
    ]);
    harness.seed_devices(vec![local_thing("pump-01", "pump", 1)]);
    harness.registry.update(|snapshot| {
        snapshot.thing_types = vec![edge_type("pump")];
    });

    let things = harness
        .things_job()
        .execute(&JobContext::default())
        .await
        .unwrap();
    assert_eq!(things.counts.deleted, 1);

    harness
        .edge_devices_job()
        .execute(&JobContext::default())
        .await
        .unwrap();
    assert_eq!(harness.device_ids(DeviceClass::Edge), vec!["pump-01"]);
}

#[tokio::test]
async fn test_thing_types_are_described_once_per_run() {
    let harness = Harness::new(pump_inventory(vec![
        thing("pump-01", "pump", 1),
        thing("pump-02", "pump", 1),
        thing("pump-03", "pump", 1),
    ]));
    harness.seed_models(vec![thing_model("pump")]);

    harness
        .things_job()
        .execute(&JobContext::default())
        .await
        .unwrap();

    // Three thing describes plus a single thing type describe.
    assert_eq!(harness.registry.describe_calls(), 4);
}
