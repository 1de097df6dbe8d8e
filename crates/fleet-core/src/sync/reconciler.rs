//! Per-item create/update/skip decisions for devices.

use super::{JobContext, ModelResolver, OrphanCollector, SyncPass};
use crate::error::Result;
use crate::inventory::{Fetch, InventoryEntry, SkipReason, ThingDescription, ThingRegistry};
use crate::models::{Device, DeviceClass, DeviceModel, DeviceTag};
use crate::store::{FleetStore, Includes};
use chrono::Utc;
use std::collections::HashSet;
use tracing::{debug, warn};

/// Version-gated decision for one described item.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    Insert,
    Update,
    Unchanged,
}

/// Decide what to do with an item given the stored device, if any.
///
/// An update only happens when the external version is strictly greater.
pub fn decide(local: Option<&Device>, external_version: i64) -> Decision {
    match local {
        None => Decision::Insert,
        Some(device) if external_version > device.version => Decision::Update,
        Some(_) => Decision::Unchanged,
    }
}

/// Reconciles one device class against the thing listing.
///
/// Thing devices also require the reported-state shadow to exist; edge
/// devices don't.
pub struct DeviceReconciler<'a> {
    class: DeviceClass,
    registry: &'a dyn ThingRegistry,
    store: &'a FleetStore,
    resolver: ModelResolver<'a>,
    shadow_required: bool,
}

impl<'a> DeviceReconciler<'a> {
    pub fn new(class: DeviceClass, registry: &'a dyn ThingRegistry, store: &'a FleetStore) -> Self {
        Self {
            class,
            registry,
            store,
            resolver: ModelResolver::new(registry, store),
            shadow_required: class == DeviceClass::Thing,
        }
    }

    /// Stage every mutation for `listing`, including orphan deletions.
    ///
    /// Items of the other device class don't protect a local device of this
    /// class from orphan collection, so a thing whose type moved to the other
    /// class is removed here and recreated by the other job.
    pub async fn reconcile(
        &mut self,
        listing: &[InventoryEntry],
        ctx: &JobContext,
        pass: &mut SyncPass,
    ) -> Result<()> {
        let mut listed: HashSet<String> = HashSet::with_capacity(listing.len());
        let mut seen: HashSet<&str> = HashSet::with_capacity(listing.len());

        for entry in listing {
            ctx.cancel.check()?;
            let id = entry.external_id.as_str();

            if !seen.insert(id) {
                pass.report_mut().skip(id, SkipReason::Duplicate);
                continue;
            }

            match self.reconcile_entry(entry, pass).await? {
                Some(SkipReason::OtherDeviceClass) => {
                    pass.report_mut().skip(id, SkipReason::OtherDeviceClass);
                }
                Some(reason) => {
                    listed.insert(id.to_string());
                    pass.report_mut().skip(id, reason);
                }
                None => {
                    listed.insert(id.to_string());
                }
            }
        }

        OrphanCollector::new(self.store).collect_devices(self.class, &listed, pass)?;
        Ok(())
    }

    /// Returns the skip reason, or `None` when the item was handled.
    async fn reconcile_entry(
        &mut self,
        entry: &InventoryEntry,
        pass: &mut SyncPass,
    ) -> Result<Option<SkipReason>> {
        let id = entry.external_id.as_str();

        let model = match self
            .resolver
            .resolve_for(self.class, entry.type_name.as_deref())
            .await?
        {
            Ok(model) => model,
            Err(reason) => {
                debug!("Skipping {} {}: {}", self.class, id, reason);
                return Ok(Some(reason));
            }
        };

        let description = match self.registry.describe_thing(id).await {
            Fetch::Found(description) => description,
            Fetch::Skip(reason) => {
                warn!("Describe of {} returned {}, skipping", id, reason);
                return Ok(Some(reason));
            }
            Fetch::Transient(message) => {
                warn!("Describe of {} failed: {}", id, message);
                return Ok(Some(SkipReason::Transient { message }));
            }
        };
        if description.type_name.as_deref().map_or(true, str::is_empty) {
            debug!("Description of {} has no type name, skipping", id);
            return Ok(Some(SkipReason::MissingTypeName));
        }

        if self.shadow_required {
            if let Err(reason) = self.registry.thing_shadow(id).await.into_result() {
                warn!("Shadow of {} unavailable: {}", id, reason);
                return Ok(Some(reason));
            }
        }

        let local = self.store.device(id, Includes::TAGS)?;
        if let Some(device) = &local {
            if device.class != self.class {
                debug!("{} is stored as a {} device, skipping", id, device.class);
                return Ok(Some(SkipReason::OtherDeviceClass));
            }
        }

        match (decide(local.as_ref(), description.version), local) {
            (Decision::Insert, _) => {
                debug!("Creating {} device {} (v{})", self.class, id, description.version);
                pass.work()
                    .insert_device(new_device(self.class, id, &model, description));
                pass.report_mut().counts.created += 1;
            }
            (Decision::Update, Some(mut device)) => {
                debug!(
                    "Updating {} device {} v{} -> v{}",
                    self.class, id, device.version, description.version
                );
                let tags = DeviceTag::from_attributes(&description.attributes);
                device.name = description.name;
                device.device_model_id = Some(model.id);
                device.version = description.version;
                device.synced_at = Utc::now();

                let work = pass.work();
                work.delete_device_tags(id);
                work.update_device(device);
                work.insert_device_tags(id, tags);
                pass.report_mut().counts.updated += 1;
            }
            _ => {
                pass.report_mut().counts.unchanged += 1;
            }
        }
        Ok(None)
    }
}

fn new_device(
    class: DeviceClass,
    id: &str,
    model: &DeviceModel,
    description: ThingDescription,
) -> Device {
    let tags = DeviceTag::from_attributes(&description.attributes);
    Device::new(
        id,
        description.name,
        class,
        model.id.clone(),
        description.version,
    )
    .with_tags(tags)
}
