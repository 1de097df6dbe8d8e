//! Snapshot-backed registry.
//!
//! Serves a recorded inventory from memory. Recorded responses may carry a
//! failure status, so a snapshot can reproduce a partially failing registry.
//! The daemon uses it for offline runs; tests mutate it between runs.

use super::{
    DeploymentRegistry, DeploymentSummary, Fetch, InventoryEntry, ThingDescription,
    ThingRegistry, ThingTypeDescription,
};
use crate::error::{FleetError, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Mutex, RwLock, RwLockReadGuard};
use tracing::debug;

fn ok_status() -> u16 {
    200
}

fn is_ok_status(status: &u16) -> bool {
    *status == 200
}

/// Recorded thing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SnapshotThing {
    pub id: String,
    /// Display name, defaults to the id.
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub type_name: Option<String>,
    #[serde(default)]
    pub version: i64,
    #[serde(default)]
    pub attributes: BTreeMap<String, String>,
    /// Status returned by describe.
    #[serde(default = "ok_status", skip_serializing_if = "is_ok_status")]
    pub describe_status: u16,
    /// Status returned by the shadow lookup.
    #[serde(default = "ok_status", skip_serializing_if = "is_ok_status")]
    pub shadow_status: u16,
    /// Leave the type name out of the describe response.
    #[serde(default)]
    pub untyped_description: bool,
}

impl SnapshotThing {
    pub fn new(id: impl Into<String>, type_name: &str, version: i64) -> Self {
        Self {
            id: id.into(),
            name: None,
            type_name: Some(type_name.to_string()),
            version,
            attributes: BTreeMap::new(),
            describe_status: ok_status(),
            shadow_status: ok_status(),
            untyped_description: false,
        }
    }

    pub fn named(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn with_attribute(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.attributes.insert(key.into(), value.into());
        self
    }

    pub fn with_describe_status(mut self, status: u16) -> Self {
        self.describe_status = status;
        self
    }

    pub fn with_shadow_status(mut self, status: u16) -> Self {
        self.shadow_status = status;
        self
    }
}

/// Recorded thing type.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SnapshotThingType {
    pub name: String,
    #[serde(default)]
    pub type_id: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub deprecated: bool,
    #[serde(default)]
    pub edge: Option<bool>,
    #[serde(default = "ok_status", skip_serializing_if = "is_ok_status")]
    pub describe_status: u16,
}

impl SnapshotThingType {
    pub fn new(name: impl Into<String>, edge: Option<bool>) -> Self {
        Self {
            name: name.into(),
            type_id: None,
            description: None,
            deprecated: false,
            edge,
            describe_status: ok_status(),
        }
    }

    pub fn deprecated(mut self) -> Self {
        self.deprecated = true;
        self
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    pub fn with_describe_status(mut self, status: u16) -> Self {
        self.describe_status = status;
        self
    }
}

/// A full recorded inventory.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct InventorySnapshot {
    #[serde(default)]
    pub things: Vec<SnapshotThing>,
    #[serde(default)]
    pub thing_types: Vec<SnapshotThingType>,
    #[serde(default)]
    pub deployments: Vec<DeploymentSummary>,
}

impl InventorySnapshot {
    /// Load a snapshot from a JSON file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let contents =
            std::fs::read_to_string(path).map_err(|e| FleetError::io_with_path(e, path))?;
        Ok(serde_json::from_str(&contents)?)
    }
}

/// In-memory registry serving an [`InventorySnapshot`].
#[derive(Debug, Default)]
pub struct SnapshotRegistry {
    snapshot: RwLock<InventorySnapshot>,
    listing_failure: RwLock<Option<String>>,
    describe_calls: AtomicUsize,
    shadow_calls: AtomicUsize,
    deleted_groups: Mutex<Vec<String>>,
}

impl SnapshotRegistry {
    pub fn new(snapshot: InventorySnapshot) -> Self {
        Self {
            snapshot: RwLock::new(snapshot),
            ..Self::default()
        }
    }

    /// Load a registry from a snapshot file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        Ok(Self::new(InventorySnapshot::load(path)?))
    }

    /// Mutate the served inventory.
    pub fn update(&self, f: impl FnOnce(&mut InventorySnapshot)) {
        let mut guard = self.snapshot.write().unwrap_or_else(|e| e.into_inner());
        f(&mut guard);
    }

    /// Make every listing call fail with `message` (or succeed again with `None`).
    pub fn fail_listings(&self, message: Option<&str>) {
        let mut guard = self
            .listing_failure
            .write()
            .unwrap_or_else(|e| e.into_inner());
        *guard = message.map(str::to_string);
    }

    /// Number of describe calls (things and thing types) served so far.
    pub fn describe_calls(&self) -> usize {
        self.describe_calls.load(Ordering::SeqCst)
    }

    pub fn shadow_calls(&self) -> usize {
        self.shadow_calls.load(Ordering::SeqCst)
    }

    /// Thing groups deleted through this registry, in call order.
    pub fn deleted_groups(&self) -> Vec<String> {
        self.deleted_groups
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    fn read(&self) -> RwLockReadGuard<'_, InventorySnapshot> {
        self.snapshot.read().unwrap_or_else(|e| e.into_inner())
    }

    fn check_listing(&self, operation: &str) -> Result<()> {
        let guard = self
            .listing_failure
            .read()
            .unwrap_or_else(|e| e.into_inner());
        match guard.as_deref() {
            Some(message) => Err(FleetError::vendor(operation, message)),
            None => Ok(()),
        }
    }
}

#[async_trait]
impl ThingRegistry for SnapshotRegistry {
    async fn list_things(&self) -> Result<Vec<InventoryEntry>> {
        self.check_listing("list_things")?;
        Ok(self
            .read()
            .things
            .iter()
            .map(|thing| InventoryEntry::new(thing.id.clone(), thing.type_name.as_deref()))
            .collect())
    }

    async fn describe_thing(&self, external_id: &str) -> Fetch<ThingDescription> {
        self.describe_calls.fetch_add(1, Ordering::SeqCst);
        let snapshot = self.read();
        let Some(thing) = snapshot.things.iter().find(|t| t.id == external_id) else {
            return Fetch::Skip(super::SkipReason::NotFound);
        };
        if thing.describe_status != 200 {
            debug!("snapshot: describe {} -> {}", external_id, thing.describe_status);
            return Fetch::from_status(thing.describe_status);
        }

        Fetch::Found(ThingDescription {
            external_id: thing.id.clone(),
            name: thing.name.clone().unwrap_or_else(|| thing.id.clone()),
            type_name: if thing.untyped_description {
                None
            } else {
                thing.type_name.clone()
            },
            version: thing.version,
            attributes: thing.attributes.clone(),
        })
    }

    async fn thing_shadow(&self, external_id: &str) -> Fetch<()> {
        self.shadow_calls.fetch_add(1, Ordering::SeqCst);
        let snapshot = self.read();
        match snapshot.things.iter().find(|t| t.id == external_id) {
            Some(thing) if thing.shadow_status == 200 => Fetch::Found(()),
            Some(thing) => Fetch::from_shadow_status(thing.shadow_status),
            None => Fetch::from_shadow_status(404),
        }
    }

    async fn list_thing_types(&self) -> Result<Vec<String>> {
        self.check_listing("list_thing_types")?;
        Ok(self
            .read()
            .thing_types
            .iter()
            .map(|t| t.name.clone())
            .collect())
    }

    async fn describe_thing_type(&self, type_name: &str) -> Fetch<ThingTypeDescription> {
        self.describe_calls.fetch_add(1, Ordering::SeqCst);
        let snapshot = self.read();
        let Some(thing_type) = snapshot.thing_types.iter().find(|t| t.name == type_name) else {
            return Fetch::Skip(super::SkipReason::NotFound);
        };
        if thing_type.describe_status != 200 {
            return Fetch::from_status(thing_type.describe_status);
        }

        Fetch::Found(ThingTypeDescription {
            type_id: thing_type
                .type_id
                .clone()
                .unwrap_or_else(|| thing_type.name.clone()),
            name: thing_type.name.clone(),
            description: thing_type.description.clone(),
            deprecated: thing_type.deprecated,
            edge: thing_type.edge,
        })
    }

    async fn delete_thing_group(&self, group_name: &str) -> Result<()> {
        self.deleted_groups
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(group_name.to_string());
        Ok(())
    }
}

#[async_trait]
impl DeploymentRegistry for SnapshotRegistry {
    async fn list_deployments(&self) -> Result<Vec<DeploymentSummary>> {
        self.check_listing("list_deployments")?;
        Ok(self.read().deployments.clone())
    }
}
