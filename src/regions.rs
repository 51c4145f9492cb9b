//! Region Client Manager
//!
//! Keeps one [`MetricsClient`] per region, created on first use and kept for
//! the lifetime of the manager.

use crate::metrics::MetricsClient;
use crate::oci::api::ApiConnector;
use crate::oci::auth::AuthInfo;
use anyhow::Result;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;

/// Subscription status of a usable region
const READY_STATUS: &str = "READY";

pub struct RegionClientManager {
    info: AuthInfo,
    connector: Arc<dyn ApiConnector>,
    clients: RwLock<HashMap<String, Arc<MetricsClient>>>,
}

impl RegionClientManager {
    pub fn new(info: AuthInfo, connector: Arc<dyn ApiConnector>) -> Self {
        Self {
            info,
            connector,
            clients: RwLock::new(HashMap::new()),
        }
    }

    pub fn auth_info(&self) -> &AuthInfo {
        &self.info
    }

    pub fn default_region(&self) -> &str {
        &self.info.region
    }

    /// Client for `region`, or for the default region when `None`
    pub async fn client(&self, region: Option<&str>) -> Result<Arc<MetricsClient>> {
        let region = region.unwrap_or(&self.info.region);

        if let Some(client) = self.clients.read().await.get(region) {
            return Ok(client.clone());
        }

        // Creation happens under the write lock so a region is only built once
        let mut clients = self.clients.write().await;
        if let Some(client) = clients.get(region) {
            return Ok(client.clone());
        }

        let api = self.connector.connect(region)?;
        let client = Arc::new(MetricsClient::new(api, region, &self.info.tenancy_id));
        clients.insert(region.to_string(), client.clone());
        tracing::info!("Created client for region {}", region);

        Ok(client)
    }

    /// Subscribed regions that are ready, sorted; the default region alone
    /// when they cannot be listed
    pub async fn available_regions(&self) -> Vec<String> {
        match self.subscribed_regions().await {
            Ok(regions) => regions,
            Err(e) => {
                tracing::error!("Error listing regions: {:#}", e);
                vec![self.info.region.clone()]
            }
        }
    }

    async fn subscribed_regions(&self) -> Result<Vec<String>> {
        let client = self.client(None).await?;
        let subscriptions = client
            .api()
            .list_region_subscriptions(&self.info.tenancy_id)
            .await?;

        let mut regions: Vec<String> = subscriptions
            .into_iter()
            .filter(|s| s.status == READY_STATUS)
            .map(|s| s.region_name)
            .collect();
        regions.sort();
        Ok(regions)
    }
}
