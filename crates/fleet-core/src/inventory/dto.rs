//! Wire types of the registry REST API and their mapping to inventory types.

use super::{
    DeploymentStatus, DeploymentSummary, InventoryEntry, ThingDescription, ThingTypeDescription,
};
use crate::config::SyncConfig;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Page of `GET /things`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ThingsPage {
    #[serde(default)]
    pub things: Vec<ThingSummaryDto>,
    pub next_token: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ThingSummaryDto {
    pub thing_name: String,
    pub thing_type_name: Option<String>,
}

impl From<ThingSummaryDto> for InventoryEntry {
    fn from(dto: ThingSummaryDto) -> Self {
        InventoryEntry {
            external_id: dto.thing_name,
            type_name: dto.thing_type_name.filter(|name| !name.is_empty()),
        }
    }
}

/// Body of `GET /things/{name}`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ThingDto {
    pub thing_name: String,
    pub thing_id: Option<String>,
    pub thing_type_name: Option<String>,
    #[serde(default)]
    pub version: i64,
    #[serde(default)]
    pub attributes: BTreeMap<String, String>,
}

impl From<ThingDto> for ThingDescription {
    fn from(dto: ThingDto) -> Self {
        ThingDescription {
            external_id: dto.thing_name.clone(),
            name: dto.thing_name,
            type_name: dto.thing_type_name.filter(|name| !name.is_empty()),
            version: dto.version,
            attributes: dto.attributes,
        }
    }
}

/// Page of `GET /thing-types`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ThingTypesPage {
    #[serde(default)]
    pub thing_types: Vec<ThingTypeSummaryDto>,
    pub next_token: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ThingTypeSummaryDto {
    pub thing_type_name: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ThingTypePropertiesDto {
    pub thing_type_description: Option<String>,
    #[serde(default)]
    pub searchable_attributes: Vec<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ThingTypeMetadataDto {
    #[serde(default)]
    pub deprecated: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TagDto {
    pub key: String,
    pub value: String,
}

/// Body of `GET /thing-types/{name}`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ThingTypeDto {
    pub thing_type_id: Option<String>,
    pub thing_type_name: String,
    #[serde(default)]
    pub thing_type_properties: ThingTypePropertiesDto,
    #[serde(default)]
    pub thing_type_metadata: ThingTypeMetadataDto,
    #[serde(default)]
    pub tags: Vec<TagDto>,
}

impl From<ThingTypeDto> for ThingTypeDescription {
    fn from(dto: ThingTypeDto) -> Self {
        let edge = dto
            .tags
            .iter()
            .find(|tag| tag.key == SyncConfig::EDGE_TAG_KEY)
            .and_then(|tag| parse_flag(&tag.value));

        ThingTypeDescription {
            type_id: dto
                .thing_type_id
                .unwrap_or_else(|| dto.thing_type_name.clone()),
            name: dto.thing_type_name,
            description: dto.thing_type_properties.thing_type_description,
            deprecated: dto.thing_type_metadata.deprecated,
            edge,
        }
    }
}

/// Page of `GET /greengrass/deployments`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeploymentsPage {
    #[serde(default)]
    pub deployments: Vec<DeploymentDto>,
    pub next_token: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeploymentDto {
    pub deployment_id: String,
    pub deployment_name: Option<String>,
    pub deployment_status: DeploymentStatus,
    pub target_arn: Option<String>,
    pub revision_id: Option<String>,
}

impl From<DeploymentDto> for DeploymentSummary {
    fn from(dto: DeploymentDto) -> Self {
        DeploymentSummary {
            deployment_id: dto.deployment_id,
            name: dto.deployment_name.filter(|name| !name.is_empty()),
            status: dto.deployment_status,
        }
    }
}

fn parse_flag(value: &str) -> Option<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "true" => Some(true),
        "false" => Some(false),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_thing_description_mapping() {
        let dto: ThingDto = serde_json::from_str(
            r#"{
                "thingName": "pump-01",
                "thingId": "0d1c-44",
                "thingTypeName": "pump",
                "version": 7,
                "attributes": { "site": "lyon" }
            }"#,
        )
        .unwrap();

        let description = ThingDescription::from(dto);
        assert_eq!(description.external_id, "pump-01");
        assert_eq!(description.type_name.as_deref(), Some("pump"));
        assert_eq!(description.version, 7);
        assert_eq!(description.attributes.get("site").map(String::as_str), Some("lyon"));
    }

    #[test]
    fn test_empty_type_name_is_missing() {
        let entry = InventoryEntry::from(ThingSummaryDto {
            thing_name: "pump-02".into(),
            thing_type_name: Some(String::new()),
        });
        assert_eq!(entry.type_name, None);
    }

    #[test]
    fn test_thing_type_edge_flag() {
        let dto: ThingTypeDto = serde_json::from_str(
            r#"{
                "thingTypeId": "tt-1",
                "thingTypeName": "gateway",
                "thingTypeProperties": { "thingTypeDescription": "Core device" },
                "thingTypeMetadata": { "deprecated": true },
                "tags": [ { "key": "iotEdge", "value": "True" } ]
            }"#,
        )
        .unwrap();

        let description = ThingTypeDescription::from(dto);
        assert_eq!(description.type_id, "tt-1");
        assert_eq!(description.edge, Some(true));
        assert!(description.deprecated);
        assert_eq!(description.description.as_deref(), Some("Core device"));
    }

    #[test]
    fn test_thing_type_without_edge_tag_is_unclassified() {
        let dto: ThingTypeDto =
            serde_json::from_str(r#"{ "thingTypeName": "sensor", "tags": [ { "key": "iotEdge", "value": "maybe" } ] }"#)
                .unwrap();

        let description = ThingTypeDescription::from(dto);
        assert_eq!(description.edge, None);
        assert_eq!(description.type_id, "sensor");
        assert!(!description.deprecated);
    }

    #[test]
    fn test_deployment_page() {
        let page: DeploymentsPage = serde_json::from_str(
            r#"{
                "deployments": [
                    { "deploymentId": "d-1", "deploymentName": "line-a", "deploymentStatus": "ACTIVE" },
                    { "deploymentId": "d-2", "deploymentStatus": "CANCELED" }
                ],
                "nextToken": "abc"
            }"#,
        )
        .unwrap();

        assert_eq!(page.next_token.as_deref(), Some("abc"));
        let summaries: Vec<DeploymentSummary> =
            page.deployments.into_iter().map(Into::into).collect();
        assert_eq!(summaries[0].name.as_deref(), Some("line-a"));
        assert_eq!(summaries[1].name, None);
        assert_eq!(summaries[1].status, DeploymentStatus::Canceled);
    }
}
