//! Cloud inventory boundary.
//!
//! Trait-based adapter over the provider's read-only resource listing API.
//! Transient failures are retried within the run with a short backoff;
//! permission failures are fatal for that resource type only.

use crate::error::InventoryError;
use crate::types::{AttachmentState, ResourceDescriptor, ResourceType};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::{Client, StatusCode};
use serde::Deserialize;
use std::collections::BTreeMap;
use std::time::Duration;
use tracing::{debug, warn};

/// Read-only resource listing for one account/region
#[async_trait]
pub trait ResourceInventory: Send + Sync {
    async fn list(
        &self,
        resource_type: ResourceType,
    ) -> Result<Vec<ResourceDescriptor>, InventoryError>;
}

/// Inventory adapter over a provider REST API
pub struct RestInventory {
    client: Client,
    base_url: String,
    api_token: Option<String>,
    region: String,
}

#[derive(Debug, Deserialize)]
struct ListResourcesResponse {
    resources: Vec<WireResource>,
}

#[derive(Debug, Deserialize)]
struct WireResource {
    id: String,
    #[serde(default)]
    region: Option<String>,
    created_at: DateTime<Utc>,
    #[serde(default)]
    attachment: Option<String>,
    #[serde(default)]
    tags: BTreeMap<String, String>,
    #[serde(default)]
    capacity_gb: Option<u64>,
}

impl RestInventory {
    pub fn new(
        base_url: impl Into<String>,
        api_token: Option<String>,
        region: impl Into<String>,
        timeout: Duration,
    ) -> anyhow::Result<Self> {
        use anyhow::Context;

        let client = Client::builder()
            .timeout(timeout)
            .build()
            .context("Failed to create HTTP client for inventory")?;

        Ok(Self {
            client,
            base_url: base_url.into(),
            api_token,
            region: region.into(),
        })
    }

    fn descriptor_from_wire(
        &self,
        wire: WireResource,
        resource_type: ResourceType,
    ) -> ResourceDescriptor {
        let attachment = match wire.attachment.as_deref() {
            Some("attached") => AttachmentState::Attached,
            Some("unattached") | Some("available") => AttachmentState::Unattached,
            _ => AttachmentState::Unknown,
        };
        ResourceDescriptor {
            id: wire.id,
            resource_type,
            region: wire.region.unwrap_or_else(|| self.region.clone()),
            created_at: wire.created_at,
            attachment,
            tags: wire.tags,
            capacity_gb: wire.capacity_gb,
        }
    }
}

fn error_for_status(resource_type: ResourceType, status: StatusCode) -> InventoryError {
    if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
        InventoryError::PermissionDenied {
            resource_type,
            message: format!("HTTP {}", status),
        }
    } else {
        InventoryError::ProviderUnavailable {
            resource_type,
            message: format!("HTTP {}", status),
        }
    }
}

#[async_trait]
impl ResourceInventory for RestInventory {
    async fn list(
        &self,
        resource_type: ResourceType,
    ) -> Result<Vec<ResourceDescriptor>, InventoryError> {
        let url = format!(
            "{}/v1/resources?type={}&region={}",
            self.base_url, resource_type, self.region
        );

        let mut request = self.client.get(&url);
        if let Some(token) = &self.api_token {
            request = request.bearer_auth(token);
        }

        // Timeouts and connection failures count as transient
        let response = request
            .send()
            .await
            .map_err(|e| InventoryError::ProviderUnavailable {
                resource_type,
                message: e.to_string(),
            })?;

        if !response.status().is_success() {
            return Err(error_for_status(resource_type, response.status()));
        }

        let body: ListResourcesResponse =
            response
                .json()
                .await
                .map_err(|e| InventoryError::ProviderUnavailable {
                    resource_type,
                    message: format!("malformed listing: {}", e),
                })?;

        let descriptors: Vec<ResourceDescriptor> = body
            .resources
            .into_iter()
            .map(|w| self.descriptor_from_wire(w, resource_type))
            .collect();

        debug!(
            resource_type = %resource_type,
            count = descriptors.len(),
            "Listed resources"
        );
        Ok(descriptors)
    }
}

/// List one resource type, retrying transient failures with linear backoff.
/// `PermissionDenied` is never retried.
pub async fn list_with_retry(
    inventory: &dyn ResourceInventory,
    resource_type: ResourceType,
    max_retries: u32,
    backoff: Duration,
) -> Result<Vec<ResourceDescriptor>, InventoryError> {
    let mut attempt = 0u32;
    loop {
        match inventory.list(resource_type).await {
            Ok(descriptors) => return Ok(descriptors),
            Err(e) if e.is_retryable() && attempt < max_retries => {
                attempt += 1;
                warn!(
                    resource_type = %resource_type,
                    attempt = attempt,
                    error = %e,
                    "Inventory fetch failed, retrying"
                );
                tokio::time::sleep(backoff * attempt).await;
            }
            Err(e) => return Err(e),
        }
    }
}

/// Fixed descriptor set, for tests and dry runs against known state
pub struct StaticInventory {
    descriptors: Vec<ResourceDescriptor>,
}

impl StaticInventory {
    pub fn new(descriptors: Vec<ResourceDescriptor>) -> Self {
        Self { descriptors }
    }
}

#[async_trait]
impl ResourceInventory for StaticInventory {
    async fn list(
        &self,
        resource_type: ResourceType,
    ) -> Result<Vec<ResourceDescriptor>, InventoryError> {
        Ok(self
            .descriptors
            .iter()
            .filter(|d| d.resource_type == resource_type)
            .cloned()
            .collect())
    }
}
