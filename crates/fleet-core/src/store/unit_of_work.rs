//! Staged writes committed in one transaction.

use super::FleetStore;
use crate::error::{FleetError, Result};
use crate::models::{Device, DeviceModel, DeviceTag};
use rusqlite::{params, Transaction};
use tracing::debug;

/// A single staged write.
#[derive(Debug, Clone, PartialEq)]
pub enum Mutation {
    /// Insert a device with its tags and labels.
    InsertDevice(Device),
    /// Update the scalar columns of an existing device.
    UpdateDevice(Device),
    DeleteDeviceTags { device_id: String },
    InsertDeviceTags { device_id: String, tags: Vec<DeviceTag> },
    /// Delete a device and every row it owns.
    DeleteDevice { id: String },
    InsertModel(DeviceModel),
    UpdateModel(DeviceModel),
    DeleteModel { id: String },
}

/// Writes staged during a run.
///
/// Nothing reaches the database until [`UnitOfWork::save`]. Dropping an
/// unsaved unit of work discards it, which is how cancelled and failed runs
/// leave the store untouched.
#[derive(Debug, Default)]
pub struct UnitOfWork {
    staged: Vec<Mutation>,
}

impl UnitOfWork {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert_device(&mut self, device: Device) {
        self.staged.push(Mutation::InsertDevice(device));
    }

    /// Stage a scalar update. Tags are staged separately with
    /// [`UnitOfWork::delete_device_tags`] and [`UnitOfWork::insert_device_tags`].
    pub fn update_device(&mut self, device: Device) {
        self.staged.push(Mutation::UpdateDevice(device));
    }

    /// Stage deletion of every tag row owned by a device.
    pub fn delete_device_tags(&mut self, device_id: &str) {
        self.staged.push(Mutation::DeleteDeviceTags {
            device_id: device_id.to_string(),
        });
    }

    pub fn insert_device_tags(&mut self, device_id: &str, tags: Vec<DeviceTag>) {
        if tags.is_empty() {
            return;
        }
        self.staged.push(Mutation::InsertDeviceTags {
            device_id: device_id.to_string(),
            tags,
        });
    }

    pub fn delete_device(&mut self, id: &str) {
        self.staged.push(Mutation::DeleteDevice { id: id.to_string() });
    }

    pub fn insert_model(&mut self, model: DeviceModel) {
        self.staged.push(Mutation::InsertModel(model));
    }

    pub fn update_model(&mut self, model: DeviceModel) {
        self.staged.push(Mutation::UpdateModel(model));
    }

    pub fn delete_model(&mut self, id: &str) {
        self.staged.push(Mutation::DeleteModel { id: id.to_string() });
    }

    pub fn staged(&self) -> &[Mutation] {
        &self.staged
    }

    pub fn len(&self) -> usize {
        self.staged.len()
    }

    pub fn is_empty(&self) -> bool {
        self.staged.is_empty()
    }

    /// Apply every staged write in one transaction.
    ///
    /// Returns the number of mutations applied. An empty unit of work
    /// returns `Ok(0)` without opening a transaction.
    pub fn save(self, store: &FleetStore) -> Result<usize> {
        if self.staged.is_empty() {
            return Ok(0);
        }

        let mut conn = store.lock_conn()?;
        let tx = conn.transaction()?;
        for mutation in &self.staged {
            apply(&tx, mutation)?;
        }
        tx.commit().map_err(|e| FleetError::Database {
            message: format!("Failed to commit {} staged writes: {}", self.staged.len(), e),
            source: Some(e),
        })?;

        debug!("Committed {} staged writes", self.staged.len());
        Ok(self.staged.len())
    }
}

fn apply(tx: &Transaction<'_>, mutation: &Mutation) -> Result<()> {
    match mutation {
        Mutation::InsertDevice(device) => {
            tx.execute(
                "INSERT INTO devices (id, class, name, device_model_id, version, synced_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                params![
                    device.id,
                    device.class.as_str(),
                    device.name,
                    device.device_model_id,
                    device.version,
                    device.synced_at.to_rfc3339(),
                ],
            )?;
            insert_tags(tx, &device.id, &device.tags)?;
            for label in &device.labels {
                tx.execute(
                    "INSERT INTO device_labels (device_id, name, color) VALUES (?1, ?2, ?3)",
                    params![device.id, label.name, label.color],
                )?;
            }
        }
        Mutation::UpdateDevice(device) => {
            let updated = tx.execute(
                "UPDATE devices
                 SET name = ?2, device_model_id = ?3, version = ?4, synced_at = ?5
                 WHERE id = ?1",
                params![
                    device.id,
                    device.name,
                    device.device_model_id,
                    device.version,
                    device.synced_at.to_rfc3339(),
                ],
            )?;
            ensure_row(updated, "device", &device.id)?;
        }
        Mutation::DeleteDeviceTags { device_id } => {
            tx.execute(
                "DELETE FROM device_tags WHERE device_id = ?1",
                params![device_id],
            )?;
        }
        Mutation::InsertDeviceTags { device_id, tags } => {
            insert_tags(tx, device_id, tags)?;
        }
        Mutation::DeleteDevice { id } => {
            tx.execute("DELETE FROM device_tags WHERE device_id = ?1", params![id])?;
            tx.execute("DELETE FROM device_labels WHERE device_id = ?1", params![id])?;
            tx.execute("DELETE FROM devices WHERE id = ?1", params![id])?;
        }
        Mutation::InsertModel(model) => {
            tx.execute(
                "INSERT INTO device_models (id, class, name, description, external_identifier, synced_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                params![
                    model.id,
                    model.class.as_str(),
                    model.name,
                    model.description,
                    model.external_identifier,
                    model.synced_at.to_rfc3339(),
                ],
            )?;
        }
        Mutation::UpdateModel(model) => {
            let updated = tx.execute(
                "UPDATE device_models
                 SET name = ?2, description = ?3, external_identifier = ?4, synced_at = ?5
                 WHERE id = ?1",
                params![
                    model.id,
                    model.name,
                    model.description,
                    model.external_identifier,
                    model.synced_at.to_rfc3339(),
                ],
            )?;
            ensure_row(updated, "device model", &model.id)?;
        }
        Mutation::DeleteModel { id } => {
            tx.execute("DELETE FROM device_models WHERE id = ?1", params![id])?;
        }
    }
    Ok(())
}

fn insert_tags(tx: &Transaction<'_>, device_id: &str, tags: &[DeviceTag]) -> Result<()> {
    let mut stmt = tx.prepare_cached(
        "INSERT INTO device_tags (device_id, position, name, value) VALUES (?1, ?2, ?3, ?4)",
    )?;
    for (position, tag) in tags.iter().enumerate() {
        stmt.execute(params![device_id, position as i64, tag.name, tag.value])?;
    }
    Ok(())
}

/// An update that matched nothing means the row vanished since it was read.
fn ensure_row(changed: usize, kind: &str, id: &str) -> Result<()> {
    if changed == 0 {
        return Err(FleetError::Database {
            message: format!("{} {} no longer exists", kind, id),
            source: None,
        });
    }
    Ok(())
}
