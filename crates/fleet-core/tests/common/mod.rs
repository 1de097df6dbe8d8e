//! Shared fixtures for the integration tests.

#![allow(dead_code)]

pub mod responder;

use fleet_sync::inventory::{SnapshotThing, SnapshotThingType};
use fleet_sync::store::UnitOfWork;
use fleet_sync::sync::{
    SyncEdgeDeploymentsJob, SyncEdgeDevicesJob, SyncThingTypesJob, SyncThingsJob,
};
use fleet_sync::{
    Device, DeviceClass, DeviceModel, FleetStore, FsImageStore, InventorySnapshot,
    SnapshotRegistry,
};
use std::path::PathBuf;
use std::sync::Arc;
use tempfile::TempDir;

/// On-disk store, snapshot registry and image directory in one temp dir.
pub struct Harness {
    pub temp_dir: TempDir,
    pub registry: Arc<SnapshotRegistry>,
    pub store: FleetStore,
    pub images: Arc<FsImageStore>,
}

impl Harness {
    pub fn new(snapshot: InventorySnapshot) -> Self {
        let temp_dir = TempDir::new().expect("Failed to create temp dir");
        let default_image = temp_dir.path().join("default.png");
        std::fs::write(&default_image, b"png").unwrap();

        let store = FleetStore::open(temp_dir.path().join("fleet.sqlite")).unwrap();
        let images = Arc::new(FsImageStore::new(
            temp_dir.path().join("model-images"),
            Some(default_image),
        ));

        Self {
            temp_dir,
            registry: Arc::new(SnapshotRegistry::new(snapshot)),
            store,
            images,
        }
    }

    pub fn db_path(&self) -> PathBuf {
        self.temp_dir.path().join("fleet.sqlite")
    }

    pub fn things_job(&self) -> SyncThingsJob {
        SyncThingsJob::new(self.registry.clone(), self.store.clone())
    }

    pub fn edge_devices_job(&self) -> SyncEdgeDevicesJob {
        SyncEdgeDevicesJob::new(self.registry.clone(), self.store.clone())
    }

    pub fn thing_types_job(&self) -> SyncThingTypesJob {
        SyncThingTypesJob::new(self.registry.clone(), self.store.clone(), self.images.clone())
    }

    pub fn deployments_job(&self) -> SyncEdgeDeploymentsJob {
        SyncEdgeDeploymentsJob::new(self.registry.clone(), self.store.clone(), self.images.clone())
    }

    pub fn seed_models(&self, models: Vec<DeviceModel>) {
        let mut uow = UnitOfWork::new();
        for model in models {
            uow.insert_model(model);
        }
        uow.save(&self.store).unwrap();
    }

    pub fn seed_devices(&self, devices: Vec<Device>) {
        let mut uow = UnitOfWork::new();
        for device in devices {
            uow.insert_device(device);
        }
        uow.save(&self.store).unwrap();
    }

    pub fn device_ids(&self, class: DeviceClass) -> Vec<String> {
        self.store
            .find_devices(class, fleet_sync::Includes::NONE, |_| true)
            .unwrap()
            .into_iter()
            .map(|device| device.id)
            .collect()
    }

    pub async fn image_count(&self, model_id: &str) -> usize {
        self.images.images_of(model_id).await.unwrap().len()
    }
}

pub fn thing_type(name: &str) -> SnapshotThingType {
    SnapshotThingType::new(name, Some(false))
}

pub fn edge_type(name: &str) -> SnapshotThingType {
    SnapshotThingType::new(name, Some(true))
}

pub fn thing(id: &str, type_name: &str, version: i64) -> SnapshotThing {
    SnapshotThing::new(id, type_name, version)
}

pub fn thing_model(name: &str) -> DeviceModel {
    DeviceModel::new(name, DeviceClass::Thing, name)
}

pub fn local_thing(id: &str, model_id: &str, version: i64) -> Device {
    Device::new(id, id, DeviceClass::Thing, model_id, version)
}
