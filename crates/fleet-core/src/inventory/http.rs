//! REST/JSON registry adapter.
//!
//! Provides:
//! - `nextToken` pagination for listings
//! - HTTP status classification into [`Fetch`] for per-item calls
//!
//! Nothing is cached between calls. Repeated describes of a thing type within
//! one run are collapsed by [`crate::sync::ModelResolver`].

use super::dto::{DeploymentsPage, ThingDto, ThingTypeDto, ThingTypesPage, ThingsPage};
use super::{
    DeploymentRegistry, DeploymentSummary, Fetch, InventoryEntry, ThingDescription,
    ThingRegistry, ThingTypeDescription,
};
use crate::config::NetworkConfig;
use crate::error::{FleetError, Result};
use async_trait::async_trait;
use reqwest::{Client, RequestBuilder, StatusCode};
use serde::de::DeserializeOwned;
use std::time::Duration;
use tracing::{debug, warn};
use url::Url;

/// Registry reached over HTTP.
pub struct HttpRegistry {
    client: Client,
    base_url: Url,
    api_key: Option<String>,
    max_pages: u32,
}

impl HttpRegistry {
    /// Create a registry client with the default timeout.
    pub fn new(base_url: &str, api_key: Option<String>) -> Result<Self> {
        Self::with_timeout(base_url, api_key, NetworkConfig::REQUEST_TIMEOUT)
    }

    /// Create a registry client with a custom request timeout.
    pub fn with_timeout(base_url: &str, api_key: Option<String>, timeout: Duration) -> Result<Self> {
        let base_url = Url::parse(base_url).map_err(|e| FleetError::Config {
            message: format!("Invalid registry URL {}: {}", base_url, e),
        })?;

        let client = Client::builder()
            .timeout(timeout)
            .user_agent(NetworkConfig::USER_AGENT)
            .build()
            .map_err(|e| FleetError::Network {
                message: format!("Failed to create HTTP client: {}", e),
                source: Some(e),
            })?;

        Ok(Self {
            client,
            base_url,
            api_key,
            max_pages: NetworkConfig::MAX_PAGES,
        })
    }

    /// Cap the number of pages a single listing may span.
    pub fn with_max_pages(mut self, max_pages: u32) -> Self {
        self.max_pages = max_pages.max(1);
        self
    }

    /// Build an endpoint URL. Path segments are percent-encoded.
    fn endpoint(&self, segments: &[&str]) -> Result<Url> {
        let mut url = self.base_url.clone();
        url.path_segments_mut()
            .map_err(|_| FleetError::Config {
                message: format!("Registry URL cannot be a base: {}", self.base_url),
            })?
            .pop_if_empty()
            .extend(segments);
        Ok(url)
    }

    fn authorized(&self, request: RequestBuilder) -> RequestBuilder {
        match &self.api_key {
            Some(key) => request.header(NetworkConfig::API_KEY_HEADER, key),
            None => request,
        }
    }

    /// Fetch every page of a listing endpoint.
    async fn list_pages<P, T>(
        &self,
        operation: &str,
        segments: &[&str],
        query: &[(&str, &str)],
        split: impl Fn(P) -> (Vec<T>, Option<String>),
    ) -> Result<Vec<T>>
    where
        P: DeserializeOwned,
    {
        let mut items = Vec::new();
        let mut next_token: Option<String> = None;

        for page in 0..self.max_pages {
            let mut url = self.endpoint(segments)?;
            if !query.is_empty() || next_token.is_some() {
                let mut pairs = url.query_pairs_mut();
                for (key, value) in query {
                    pairs.append_pair(key, value);
                }
                if let Some(token) = &next_token {
                    pairs.append_pair("nextToken", token);
                }
            }

            let response = self
                .authorized(self.client.get(url.clone()))
                .send()
                .await
                .map_err(FleetError::from)?;

            let status = response.status();
            if !status.is_success() {
                return Err(FleetError::Vendor {
                    operation: operation.to_string(),
                    message: format!("GET {} returned {}", url, status),
                    status_code: Some(status.as_u16()),
                });
            }

            let body: P = response.json().await.map_err(|e| FleetError::Vendor {
                operation: operation.to_string(),
                message: format!("Malformed page {}: {}", page, e),
                status_code: None,
            })?;
            let (mut page_items, token) = split(body);
            items.append(&mut page_items);

            match token.filter(|t| !t.is_empty()) {
                Some(token) => next_token = Some(token),
                None => {
                    debug!("{}: {} items in {} pages", operation, items.len(), page + 1);
                    return Ok(items);
                }
            }
        }

        Err(FleetError::vendor(
            operation,
            format!("listing exceeded {} pages", self.max_pages),
        ))
    }

    /// GET a single resource and classify the outcome.
    async fn fetch_json<D: DeserializeOwned>(
        &self,
        segments: &[&str],
        classify: fn(u16) -> Fetch<D>,
    ) -> Fetch<D> {
        let url = match self.endpoint(segments) {
            Ok(url) => url,
            Err(e) => return Fetch::Transient(e.to_string()),
        };

        let response = match self.authorized(self.client.get(url.clone())).send().await {
            Ok(response) => response,
            Err(e) => {
                warn!("GET {} failed: {}", url, e);
                return Fetch::Transient(transport_message(&e));
            }
        };

        let status = response.status();
        if !status.is_success() {
            debug!("GET {} returned {}", url, status);
            return classify(status.as_u16());
        }

        match response.json::<D>().await {
            Ok(body) => Fetch::Found(body),
            Err(e) => Fetch::Transient(format!("malformed body from {}: {}", url, e)),
        }
    }
}

fn transport_message(err: &reqwest::Error) -> String {
    if err.is_timeout() {
        "request timed out".to_string()
    } else {
        err.to_string()
    }
}

#[async_trait]
impl ThingRegistry for HttpRegistry {
    async fn list_things(&self) -> Result<Vec<InventoryEntry>> {
        self.list_pages("list_things", &["things"], &[], |page: ThingsPage| {
            (
                page.things.into_iter().map(InventoryEntry::from).collect(),
                page.next_token,
            )
        })
        .await
    }

    async fn describe_thing(&self, external_id: &str) -> Fetch<ThingDescription> {
        self.fetch_json::<ThingDto>(&["things", external_id], Fetch::from_status)
            .await
            .map(ThingDescription::from)
    }

    async fn thing_shadow(&self, external_id: &str) -> Fetch<()> {
        self.fetch_json::<serde_json::Value>(
            &["things", external_id, "shadow"],
            Fetch::from_shadow_status,
        )
        .await
        .map(|_| ())
    }

    async fn list_thing_types(&self) -> Result<Vec<String>> {
        self.list_pages(
            "list_thing_types",
            &["thing-types"],
            &[],
            |page: ThingTypesPage| {
                (
                    page.thing_types
                        .into_iter()
                        .map(|t| t.thing_type_name)
                        .collect(),
                    page.next_token,
                )
            },
        )
        .await
    }

    async fn describe_thing_type(&self, type_name: &str) -> Fetch<ThingTypeDescription> {
        self.fetch_json::<ThingTypeDto>(&["thing-types", type_name], Fetch::from_status)
            .await
            .map(ThingTypeDescription::from)
    }

    async fn delete_thing_group(&self, group_name: &str) -> Result<()> {
        let url = self.endpoint(&["thing-groups", group_name])?;
        let response = self
            .authorized(self.client.delete(url.clone()))
            .send()
            .await
            .map_err(FleetError::from)?;

        let status = response.status();
        // Already gone is fine.
        if status.is_success() || status == StatusCode::NOT_FOUND {
            return Ok(());
        }

        Err(FleetError::Vendor {
            operation: "delete_thing_group".to_string(),
            message: format!("DELETE {} returned {}", url, status),
            status_code: Some(status.as_u16()),
        })
    }
}

#[async_trait]
impl DeploymentRegistry for HttpRegistry {
    async fn list_deployments(&self) -> Result<Vec<DeploymentSummary>> {
        self.list_pages(
            "list_deployments",
            &["greengrass", "deployments"],
            &[("historyFilter", "LATEST_ONLY")],
            |page: DeploymentsPage| {
                (
                    page.deployments
                        .into_iter()
                        .map(DeploymentSummary::from)
                        .collect(),
                    page.next_token,
                )
            },
        )
        .await
    }
}
