//! Model resolution and batch model sync.

use super::{OrphanCollector, PostCommitEffect, SyncPass};
use crate::error::Result;
use crate::inventory::{DeploymentSummary, Fetch, SkipReason, ThingRegistry};
use crate::models::{DeviceClass, DeviceModel};
use crate::store::FleetStore;
use crate::sync::JobContext;
use chrono::Utc;
use std::collections::{HashMap, HashSet};
use tracing::{debug, warn};
use uuid::Uuid;

/// Whether a thing type describes edge (Greengrass core) devices.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EdgeClassification {
    Edge,
    NotEdge,
    /// The edge tag is missing or not a boolean.
    Unknown,
}

impl EdgeClassification {
    fn from_tag(edge: Option<bool>) -> Self {
        match edge {
            Some(true) => EdgeClassification::Edge,
            Some(false) => EdgeClassification::NotEdge,
            None => EdgeClassification::Unknown,
        }
    }

    /// Device class of things with this classification.
    pub fn device_class(&self) -> Option<DeviceClass> {
        match self {
            EdgeClassification::Edge => Some(DeviceClass::Edge),
            EdgeClassification::NotEdge => Some(DeviceClass::Thing),
            EdgeClassification::Unknown => None,
        }
    }
}

/// Maps external type names to local models for the duration of one run.
pub struct ModelResolver<'a> {
    registry: &'a dyn ThingRegistry,
    store: &'a FleetStore,
    classifications: HashMap<String, Fetch<EdgeClassification>>,
}

impl<'a> ModelResolver<'a> {
    pub fn new(registry: &'a dyn ThingRegistry, store: &'a FleetStore) -> Self {
        Self {
            registry,
            store,
            classifications: HashMap::new(),
        }
    }

    /// Local model of `class` named `type_name`. Never creates one.
    pub fn resolve(&self, class: DeviceClass, type_name: &str) -> Result<Option<DeviceModel>> {
        self.store.model_by_name(class, type_name)
    }

    /// Classify a thing type from its `iotEdge` tag. Memoised per run.
    pub async fn classify(&mut self, type_name: &str) -> Fetch<EdgeClassification> {
        if let Some(cached) = self.classifications.get(type_name) {
            return cached.clone();
        }

        let classification = self
            .registry
            .describe_thing_type(type_name)
            .await
            .map(|description| EdgeClassification::from_tag(description.edge));
        self.classifications
            .insert(type_name.to_string(), classification.clone());
        classification
    }

    /// Resolve the model of a listed thing for a reconciler of `class`.
    ///
    /// The outer `Result` carries store failures; the inner one is the
    /// resolved model or the reason the thing is skipped.
    pub async fn resolve_for(
        &mut self,
        class: DeviceClass,
        type_name: Option<&str>,
    ) -> Result<std::result::Result<DeviceModel, SkipReason>> {
        let Some(type_name) = type_name.filter(|t| !t.is_empty()) else {
            return Ok(Err(SkipReason::MissingTypeName));
        };

        let classification = match self.classify(type_name).await.into_result() {
            Ok(classification) => classification,
            Err(reason) => return Ok(Err(reason)),
        };
        match classification.device_class() {
            None => {
                return Ok(Err(SkipReason::UnclassifiedType {
                    type_name: type_name.to_string(),
                }))
            }
            Some(other) if other != class => return Ok(Err(SkipReason::OtherDeviceClass)),
            Some(_) => {}
        }

        Ok(self.resolve(class, type_name)?.ok_or_else(|| SkipReason::UnknownModel {
            type_name: type_name.to_string(),
        }))
    }

    /// Reconcile thing-type models against the full thing type listing.
    ///
    /// Deprecation wins over presence in the listing: a deprecated type is
    /// deleted together with its images and its thing group.
    pub async fn sync_thing_types(
        &mut self,
        listing: &[String],
        ctx: &JobContext,
        pass: &mut SyncPass,
    ) -> Result<()> {
        let mut listed: HashSet<String> = HashSet::with_capacity(listing.len());

        for type_name in listing {
            ctx.cancel.check()?;
            if !listed.insert(type_name.clone()) {
                pass.report_mut().skip(type_name, SkipReason::Duplicate);
                continue;
            }

            let description = match self.registry.describe_thing_type(type_name).await {
                Fetch::Found(description) => description,
                Fetch::Skip(reason) => {
                    debug!("Skipping thing type {}: {}", type_name, reason);
                    pass.report_mut().skip(type_name, reason);
                    continue;
                }
                Fetch::Transient(message) => {
                    warn!("Describe of thing type {} failed: {}", type_name, message);
                    pass.report_mut()
                        .skip(type_name, SkipReason::Transient { message });
                    continue;
                }
            };

            let existing = self.store.model(type_name)?;
            if let Some(model) = &existing {
                if model.class != DeviceClass::Thing {
                    pass.report_mut().skip(type_name, SkipReason::OtherDeviceClass);
                    continue;
                }
            }

            match (existing, description.deprecated) {
                (None, false) => {
                    debug!("Creating model for thing type {}", type_name);
                    let model =
                        DeviceModel::new(type_name.clone(), DeviceClass::Thing, description.name)
                            .with_description(description.description)
                            .with_external_identifier(description.type_id);
                    pass.work().insert_model(model);
                    pass.after_commit(PostCommitEffect::AssignDefaultImage {
                        model_id: type_name.clone(),
                    });
                    pass.report_mut().counts.created += 1;
                }
                (None, true) => {
                    debug!("Ignoring deprecated thing type {}", type_name);
                    pass.report_mut().counts.unchanged += 1;
                }
                (Some(model), true) => {
                    debug!("Deleting model of deprecated thing type {}", type_name);
                    pass.work().delete_model(&model.id);
                    pass.after_commit(PostCommitEffect::DeleteImages {
                        model_id: model.id.clone(),
                    });
                    pass.after_commit(PostCommitEffect::DeleteThingGroup {
                        group_name: type_name.clone(),
                    });
                    pass.report_mut().counts.deleted += 1;
                }
                (Some(model), false) => {
                    let mut candidate = model.clone();
                    candidate.name = description.name;
                    candidate.description = description.description;
                    candidate.external_identifier = Some(description.type_id);
                    if candidate.differs_from(&model) {
                        candidate.synced_at = Utc::now();
                        pass.work().update_model(candidate);
                        pass.report_mut().counts.updated += 1;
                    } else {
                        pass.report_mut().counts.unchanged += 1;
                    }
                }
            }
        }

        OrphanCollector::new(self.store).collect_models(
            DeviceClass::Thing,
            &listed,
            |model| Some(model.id.as_str()),
            pass,
        )?;
        Ok(())
    }
}

/// Reconcile edge models against the latest revision of every deployment.
///
/// Edge models are matched by external identifier (the deployment id). A
/// canceled deployment counts as deprecated.
pub fn sync_deployments(
    store: &FleetStore,
    deployments: &[DeploymentSummary],
    ctx: &JobContext,
    pass: &mut SyncPass,
) -> Result<()> {
    let mut listed: HashSet<String> = HashSet::with_capacity(deployments.len());

    for deployment in deployments {
        ctx.cancel.check()?;
        let id = &deployment.deployment_id;
        if !listed.insert(id.clone()) {
            pass.report_mut().skip(id, SkipReason::Duplicate);
            continue;
        }

        let existing = store.model_by_external_id(DeviceClass::Edge, id)?;

        if deployment.status.is_retired() {
            match existing {
                Some(model) => {
                    debug!("Deleting edge model {} of canceled deployment {}", model.id, id);
                    pass.work().delete_model(&model.id);
                    pass.after_commit(PostCommitEffect::DeleteImages { model_id: model.id });
                    pass.report_mut().counts.deleted += 1;
                }
                None => pass.report_mut().counts.unchanged += 1,
            }
            continue;
        }

        let Some(name) = deployment.name.as_deref().filter(|n| !n.is_empty()) else {
            debug!("Skipping deployment {} without a name", id);
            pass.report_mut().skip(id, SkipReason::MissingName);
            continue;
        };

        match existing {
            None => {
                let model_id = Uuid::new_v4().to_string();
                debug!("Creating edge model {} for deployment {}", model_id, id);
                pass.work().insert_model(
                    DeviceModel::new(model_id.clone(), DeviceClass::Edge, name)
                        .with_external_identifier(id.clone()),
                );
                pass.after_commit(PostCommitEffect::AssignDefaultImage { model_id });
                pass.report_mut().counts.created += 1;
            }
            Some(model) if model.name != name => {
                let mut updated = model;
                updated.name = name.to_string();
                updated.synced_at = Utc::now();
                pass.work().update_model(updated);
                pass.report_mut().counts.updated += 1;
            }
            Some(_) => pass.report_mut().counts.unchanged += 1,
        }
    }

    OrphanCollector::new(store).collect_models(
        DeviceClass::Edge,
        &listed,
        |model| model.external_identifier.as_deref(),
        pass,
    )?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::inventory::{InventorySnapshot, SnapshotRegistry, SnapshotThingType};

    fn registry_with_types(types: Vec<SnapshotThingType>) -> SnapshotRegistry {
        SnapshotRegistry::new(InventorySnapshot {
            thing_types: types,
            ..InventorySnapshot::default()
        })
    }

    #[tokio::test]
    async fn test_classification_is_memoised() {
        let registry = registry_with_types(vec![SnapshotThingType::new("gateway", Some(true))]);
        let store = FleetStore::open_in_memory().unwrap();
        let mut resolver = ModelResolver::new(&registry, &store);

        assert_eq!(resolver.classify("gateway").await, Fetch::Found(EdgeClassification::Edge));
        assert_eq!(resolver.classify("gateway").await, Fetch::Found(EdgeClassification::Edge));
        assert_eq!(registry.describe_calls(), 1);
    }

    #[tokio::test]
    async fn test_resolve_for_reasons() {
        let registry = registry_with_types(vec![
            SnapshotThingType::new("pump", Some(false)),
            SnapshotThingType::new("gateway", Some(true)),
            SnapshotThingType::new("mystery", None),
        ]);
        let store = FleetStore::open_in_memory().unwrap();
        let mut resolver = ModelResolver::new(&registry, &store);

        assert_eq!(
            resolver.resolve_for(DeviceClass::Thing, None).await.unwrap(),
            Err(SkipReason::MissingTypeName)
        );
        assert_eq!(
            resolver.resolve_for(DeviceClass::Thing, Some("gateway")).await.unwrap(),
            Err(SkipReason::OtherDeviceClass)
        );
        assert_eq!(
            resolver.resolve_for(DeviceClass::Thing, Some("mystery")).await.unwrap(),
            Err(SkipReason::UnclassifiedType {
                type_name: "mystery".into()
            })
        );
        assert_eq!(
            resolver.resolve_for(DeviceClass::Thing, Some("pump")).await.unwrap(),
            Err(SkipReason::UnknownModel {
                type_name: "pump".into()
            })
        );
        assert_eq!(
            resolver.resolve_for(DeviceClass::Thing, Some("absent")).await.unwrap(),
            Err(SkipReason::NotFound)
        );
    }
}
