//! Garbage collection of entities missing from the latest listing.

use super::{PostCommitEffect, SyncPass};
use crate::error::Result;
use crate::models::{DeviceClass, DeviceModel};
use crate::store::{FleetStore, Includes};
use std::collections::HashSet;
use tracing::debug;

/// Stages deletion of every local entity of a class whose key is absent
/// from the listing.
///
/// Runs unconditionally: an empty listing deletes the whole class.
pub struct OrphanCollector<'a> {
    store: &'a FleetStore,
}

impl<'a> OrphanCollector<'a> {
    pub fn new(store: &'a FleetStore) -> Self {
        Self { store }
    }

    /// Stage deletion of orphaned devices and their owned rows.
    pub fn collect_devices(
        &self,
        class: DeviceClass,
        listed: &HashSet<String>,
        pass: &mut SyncPass,
    ) -> Result<usize> {
        let orphans = self
            .store
            .find_devices(class, Includes::NONE, |device| !listed.contains(&device.id))?;

        for device in &orphans {
            debug!("Deleting orphaned {} device {}", class, device.id);
            pass.work().delete_device(&device.id);
        }
        pass.report_mut().counts.deleted += orphans.len();
        Ok(orphans.len())
    }

    /// Stage deletion of orphaned models, matched on `key`.
    ///
    /// A model whose key is `None` is always an orphan. Images of deleted
    /// models are removed after the commit.
    pub fn collect_models(
        &self,
        class: DeviceClass,
        listed: &HashSet<String>,
        key: impl Fn(&DeviceModel) -> Option<&str>,
        pass: &mut SyncPass,
    ) -> Result<usize> {
        let orphans = self.store.find_models(class, |model| {
            key(model).map_or(true, |k| !listed.contains(k))
        })?;

        for model in &orphans {
            debug!("Deleting orphaned {} model {}", class, model.id);
            pass.work().delete_model(&model.id);
            pass.after_commit(PostCommitEffect::DeleteImages {
                model_id: model.id.clone(),
            });
        }
        pass.report_mut().counts.deleted += orphans.len();
        Ok(orphans.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Device;
    use crate::store::UnitOfWork;

    fn seeded() -> FleetStore {
        let store = FleetStore::open_in_memory().unwrap();
        let mut uow = UnitOfWork::new();
        uow.insert_model(DeviceModel::new("pump", DeviceClass::Thing, "pump"));
        uow.insert_model(DeviceModel::new("e-1", DeviceClass::Edge, "line-a"));
        uow.insert_device(Device::new("pump-01", "pump-01", DeviceClass::Thing, "pump", 1));
        uow.insert_device(Device::new("pump-02", "pump-02", DeviceClass::Thing, "pump", 1));
        uow.insert_device(Device::new("core-01", "core-01", DeviceClass::Edge, "e-1", 1));
        uow.save(&store).unwrap();
        store
    }

    #[test]
    fn test_collect_devices_stays_in_class() {
        let store = seeded();
        let mut pass = SyncPass::new("test");
        let listed: HashSet<String> = ["pump-01".to_string()].into_iter().collect();

        let deleted = OrphanCollector::new(&store)
            .collect_devices(DeviceClass::Thing, &listed, &mut pass)
            .unwrap();

        assert_eq!(deleted, 1);
        assert_eq!(pass.report().counts.deleted, 1);
        assert_eq!(pass.work().len(), 1);
    }

    #[test]
    fn test_empty_listing_collects_whole_class() {
        let store = seeded();
        let mut pass = SyncPass::new("test");

        let deleted = OrphanCollector::new(&store)
            .collect_devices(DeviceClass::Thing, &HashSet::new(), &mut pass)
            .unwrap();
        assert_eq!(deleted, 2);
    }

    #[test]
    fn test_model_without_key_is_orphan() {
        let store = seeded();
        let mut pass = SyncPass::new("test");
        let listed: HashSet<String> = ["d-1".to_string()].into_iter().collect();

        // The seeded edge model has no external identifier.
        let deleted = OrphanCollector::new(&store)
            .collect_models(
                DeviceClass::Edge,
                &listed,
                |model| model.external_identifier.as_deref(),
                &mut pass,
            )
            .unwrap();

        assert_eq!(deleted, 1);
        assert_eq!(
            pass.effects(),
            &[PostCommitEffect::DeleteImages {
                model_id: "e-1".into()
            }]
        );
    }
}
