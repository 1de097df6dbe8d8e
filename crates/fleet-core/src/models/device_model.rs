use super::DeviceClass;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A device model (thing type or edge deployment) known to the portal.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeviceModel {
    /// Thing type name for thing models, generated UUID for edge models.
    pub id: String,
    pub class: DeviceClass,
    pub name: String,
    pub description: Option<String>,
    /// Vendor-side identifier (thing type id or deployment id).
    pub external_identifier: Option<String>,
    pub synced_at: DateTime<Utc>,
}

impl DeviceModel {
    pub fn new(id: impl Into<String>, class: DeviceClass, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            class,
            name: name.into(),
            description: None,
            external_identifier: None,
            synced_at: Utc::now(),
        }
    }

    pub fn with_description(mut self, description: Option<String>) -> Self {
        self.description = description;
        self
    }

    pub fn with_external_identifier(mut self, external_identifier: impl Into<String>) -> Self {
        self.external_identifier = Some(external_identifier.into());
        self
    }

    /// True when the mutable fields differ from `other`.
    pub fn differs_from(&self, other: &DeviceModel) -> bool {
        self.name != other.name
            || self.description != other.description
            || self.external_identifier != other.external_identifier
    }
}
