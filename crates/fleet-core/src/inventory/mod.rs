//! External inventory sources.
//!
//! The registry is only known through its list/describe contract. Listing
//! calls return [`Result`]: a failed listing aborts the run because an
//! incomplete listing would turn every missing item into an orphan. Per-item
//! calls return [`Fetch`], so a vendor failure on one item is a value the
//! reconciler branches on rather than an error it has to catch.

mod dto;
mod http;
mod snapshot;

pub use dto::{
    DeploymentDto, DeploymentsPage, TagDto, ThingDto, ThingSummaryDto, ThingTypeDto,
    ThingTypeMetadataDto, ThingTypePropertiesDto, ThingTypeSummaryDto, ThingTypesPage, ThingsPage,
};
pub use http::HttpRegistry;
pub use snapshot::{InventorySnapshot, SnapshotRegistry, SnapshotThing, SnapshotThingType};

use crate::error::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// One row of a thing listing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InventoryEntry {
    pub external_id: String,
    pub type_name: Option<String>,
}

impl InventoryEntry {
    pub fn new(external_id: impl Into<String>, type_name: Option<&str>) -> Self {
        Self {
            external_id: external_id.into(),
            type_name: type_name.map(str::to_string),
        }
    }
}

/// Full description of a thing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ThingDescription {
    pub external_id: String,
    pub name: String,
    pub type_name: Option<String>,
    pub version: i64,
    #[serde(default)]
    pub attributes: BTreeMap<String, String>,
}

/// Full description of a thing type.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ThingTypeDescription {
    /// Vendor-assigned type id.
    pub type_id: String,
    pub name: String,
    pub description: Option<String>,
    pub deprecated: bool,
    /// Value of the edge tag; `None` when absent or unparsable.
    pub edge: Option<bool>,
}

/// Lifecycle status of an edge deployment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DeploymentStatus {
    Active,
    Completed,
    Inactive,
    Canceled,
    Failed,
}

impl DeploymentStatus {
    /// A canceled deployment no longer defines an edge model.
    pub fn is_retired(&self) -> bool {
        matches!(self, DeploymentStatus::Canceled)
    }
}

/// Latest revision of an edge deployment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeploymentSummary {
    pub deployment_id: String,
    pub name: Option<String>,
    pub status: DeploymentStatus,
}

/// Why an inventory item was left untouched by a run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "reason", rename_all = "snake_case")]
pub enum SkipReason {
    /// The listing or description carries no type name.
    MissingTypeName,
    /// A model source (deployment) carries no display name.
    MissingName,
    /// The id was already seen earlier in the same listing.
    Duplicate,
    /// The external type has no local model of the job's class.
    UnknownModel { type_name: String },
    /// The thing type does not say whether it is an edge type.
    UnclassifiedType { type_name: String },
    /// The item belongs to the other device class.
    OtherDeviceClass,
    /// The registry does not know the item (404).
    NotFound,
    /// The registry rejected the request (400).
    Rejected,
    ShadowNotFound,
    ShadowRejected,
    /// Any other non-success status.
    Status { code: u16 },
    /// Timeout, 5xx or transport failure. Retried by the next run.
    Transient { message: String },
}

impl std::fmt::Display for SkipReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SkipReason::MissingTypeName => write!(f, "missing type name"),
            SkipReason::MissingName => write!(f, "missing name"),
            SkipReason::Duplicate => write!(f, "duplicate listing entry"),
            SkipReason::UnknownModel { type_name } => write!(f, "unknown model '{}'", type_name),
            SkipReason::UnclassifiedType { type_name } => {
                write!(f, "type '{}' is neither edge nor non-edge", type_name)
            }
            SkipReason::OtherDeviceClass => write!(f, "belongs to the other device class"),
            SkipReason::NotFound => write!(f, "not found"),
            SkipReason::Rejected => write!(f, "rejected"),
            SkipReason::ShadowNotFound => write!(f, "shadow not found"),
            SkipReason::ShadowRejected => write!(f, "shadow rejected"),
            SkipReason::Status { code } => write!(f, "status {}", code),
            SkipReason::Transient { message } => write!(f, "transient: {}", message),
        }
    }
}

/// Outcome of a per-item registry call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Fetch<T> {
    Found(T),
    Skip(SkipReason),
    Transient(String),
}

impl<T> Fetch<T> {
    /// Classify a non-success HTTP status.
    pub fn from_status(code: u16) -> Self {
        match code {
            404 => Fetch::Skip(SkipReason::NotFound),
            400 => Fetch::Skip(SkipReason::Rejected),
            408 | 429 | 500..=599 => Fetch::Transient(format!("status {}", code)),
            other => Fetch::Skip(SkipReason::Status { code: other }),
        }
    }

    /// Like [`Fetch::from_status`], with shadow-specific reasons.
    pub fn from_shadow_status(code: u16) -> Self {
        match code {
            404 => Fetch::Skip(SkipReason::ShadowNotFound),
            400 => Fetch::Skip(SkipReason::ShadowRejected),
            other => Fetch::from_status(other),
        }
    }

    pub fn map<U>(self, f: impl FnOnce(T) -> U) -> Fetch<U> {
        match self {
            Fetch::Found(value) => Fetch::Found(f(value)),
            Fetch::Skip(reason) => Fetch::Skip(reason),
            Fetch::Transient(message) => Fetch::Transient(message),
        }
    }

    /// Collapse into a value or the reason it was skipped.
    pub fn into_result(self) -> std::result::Result<T, SkipReason> {
        match self {
            Fetch::Found(value) => Ok(value),
            Fetch::Skip(reason) => Err(reason),
            Fetch::Transient(message) => Err(SkipReason::Transient { message }),
        }
    }
}

/// Thing registry (IoT Core style).
#[async_trait]
pub trait ThingRegistry: Send + Sync {
    /// Full thing listing, all pages.
    async fn list_things(&self) -> Result<Vec<InventoryEntry>>;

    async fn describe_thing(&self, external_id: &str) -> Fetch<ThingDescription>;

    /// Existence check of the thing's reported-state document.
    async fn thing_shadow(&self, external_id: &str) -> Fetch<()>;

    /// Full thing type listing (type names), all pages.
    async fn list_thing_types(&self) -> Result<Vec<String>>;

    async fn describe_thing_type(&self, type_name: &str) -> Fetch<ThingTypeDescription>;

    async fn delete_thing_group(&self, group_name: &str) -> Result<()>;
}

/// Edge deployment registry (Greengrass style).
#[async_trait]
pub trait DeploymentRegistry: Send + Sync {
    /// Latest revision of every deployment, all pages.
    async fn list_deployments(&self) -> Result<Vec<DeploymentSummary>>;
}
