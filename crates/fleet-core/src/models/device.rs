//! Devices and their owned child rows.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Entity class a device or model belongs to.
///
/// Each reconciliation job owns exactly one class and never touches rows of
/// the other one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeviceClass {
    /// Flat IoT thing.
    Thing,
    /// Greengrass core (edge) device.
    Edge,
}

impl DeviceClass {
    pub fn as_str(&self) -> &'static str {
        match self {
            DeviceClass::Thing => "thing",
            DeviceClass::Edge => "edge",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "thing" => Some(DeviceClass::Thing),
            "edge" => Some(DeviceClass::Edge),
            _ => None,
        }
    }
}

impl std::fmt::Display for DeviceClass {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Key/value tag owned by a device.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceTag {
    pub name: String,
    pub value: String,
}

impl DeviceTag {
    pub fn new(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            value: value.into(),
        }
    }

    /// Tags built from registry attributes, in key order.
    pub fn from_attributes(attributes: &BTreeMap<String, String>) -> Vec<Self> {
        attributes
            .iter()
            .map(|(name, value)| DeviceTag::new(name.clone(), value.clone()))
            .collect()
    }
}

/// Portal label owned by a device. Sync never writes labels.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Label {
    pub name: String,
    pub color: String,
}

/// A locally stored device.
///
/// `tags` and `labels` are only populated when requested through
/// [`crate::store::Includes`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Device {
    /// Equals the registry's external identifier.
    pub id: String,
    pub name: String,
    pub class: DeviceClass,
    pub device_model_id: Option<String>,
    /// Last external version written by sync.
    pub version: i64,
    pub tags: Vec<DeviceTag>,
    pub labels: Vec<Label>,
    pub synced_at: DateTime<Utc>,
}

impl Device {
    pub fn new(
        id: impl Into<String>,
        name: impl Into<String>,
        class: DeviceClass,
        device_model_id: impl Into<String>,
        version: i64,
    ) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            class,
            device_model_id: Some(device_model_id.into()),
            version,
            tags: Vec::new(),
            labels: Vec::new(),
            synced_at: Utc::now(),
        }
    }

    pub fn with_tags(mut self, tags: Vec<DeviceTag>) -> Self {
        self.tags = tags;
        self
    }

    pub fn with_labels(mut self, labels: Vec<Label>) -> Self {
        self.labels = labels;
        self
    }
}
