//! Provider API seam
//!
//! [`MonitoringApi`] is the narrow set of Identity and Monitoring calls the
//! rest of the crate depends on. [`OciRestApi`] implements it over signed
//! REST calls; tests substitute in-memory fakes.

use super::http::OciHttpClient;
use super::models::{
    CompartmentRecord, ListMetricsDetails, MetricDataRecord, MetricRecord, RegionSubscription,
    SummarizeMetricsDataDetails, Tenancy,
};
use super::signer::RequestSigner;
use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::sync::Arc;

/// Identity API version prefix
const IDENTITY_API: &str = "20160918";

/// Monitoring API version prefix
const MONITORING_API: &str = "20180401";

/// One page of a paginated list call
#[derive(Debug, Clone)]
pub struct Page<T> {
    pub items: Vec<T>,
    pub next_page: Option<String>,
}

/// Calls made against the provider
#[async_trait]
pub trait MonitoringApi: Send + Sync {
    async fn get_tenancy(&self, tenancy_id: &str) -> Result<Tenancy>;

    /// Active, accessible compartments in the subtree below `compartment_id`
    async fn list_compartments(&self, compartment_id: &str, page: Option<&str>) -> Result<Page<CompartmentRecord>>;

    async fn list_metrics(
        &self,
        compartment_id: &str,
        details: &ListMetricsDetails,
        page: Option<&str>,
    ) -> Result<Page<MetricRecord>>;

    async fn summarize_metrics_data(
        &self,
        compartment_id: &str,
        details: &SummarizeMetricsDataDetails,
    ) -> Result<Vec<MetricDataRecord>>;

    async fn list_region_subscriptions(&self, tenancy_id: &str) -> Result<Vec<RegionSubscription>>;
}

/// Service base URLs for one region
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Endpoints {
    pub identity: String,
    pub monitoring: String,
}

impl Endpoints {
    /// Public endpoints of a commercial realm region
    pub fn for_region(region: &str) -> Self {
        Self {
            identity: format!("https://identity.{}.oraclecloud.com/{}", region, IDENTITY_API),
            monitoring: format!("https://telemetry.{}.oraclecloud.com/{}", region, MONITORING_API),
        }
    }

    /// Both services behind a single base URL
    pub fn with_base(base: &str) -> Self {
        let base = base.trim_end_matches('/');
        Self {
            identity: format!("{}/{}", base, IDENTITY_API),
            monitoring: format!("{}/{}", base, MONITORING_API),
        }
    }
}

/// [`MonitoringApi`] over the OCI REST endpoints
#[derive(Clone)]
pub struct OciRestApi {
    http: OciHttpClient,
    endpoints: Endpoints,
}

impl OciRestApi {
    pub fn new(http: OciHttpClient, endpoints: Endpoints) -> Self {
        Self { http, endpoints }
    }

    fn identity_url(&self, path: &str) -> String {
        format!("{}/{}", self.endpoints.identity, path)
    }

    fn monitoring_url(&self, path: &str) -> String {
        format!("{}/{}", self.endpoints.monitoring, path)
    }
}

fn page_query(compartment_id: &str, page: Option<&str>) -> Vec<(&'static str, String)> {
    let mut query = vec![("compartmentId", compartment_id.to_string())];
    if let Some(page) = page {
        query.push(("page", page.to_string()));
    }
    query
}

fn decode<T: DeserializeOwned>(body: Value, what: &str) -> Result<T> {
    serde_json::from_value(body).with_context(|| format!("Unexpected {} response", what))
}

#[async_trait]
impl MonitoringApi for OciRestApi {
    async fn get_tenancy(&self, tenancy_id: &str) -> Result<Tenancy> {
        let url = self.identity_url(&format!("tenancies/{}", urlencoding::encode(tenancy_id)));
        let response = self.http.get(&url, &[]).await?;
        decode(response.body, "tenancy")
    }

    async fn list_compartments(&self, compartment_id: &str, page: Option<&str>) -> Result<Page<CompartmentRecord>> {
        let mut query = page_query(compartment_id, page);
        query.push(("compartmentIdInSubtree", "true".to_string()));
        query.push(("accessLevel", "ACCESSIBLE".to_string()));
        query.push(("lifecycleState", "ACTIVE".to_string()));

        let response = self.http.get(&self.identity_url("compartments"), &query).await?;
        Ok(Page {
            items: decode(response.body, "compartment list")?,
            next_page: response.next_page,
        })
    }

    async fn list_metrics(
        &self,
        compartment_id: &str,
        details: &ListMetricsDetails,
        page: Option<&str>,
    ) -> Result<Page<MetricRecord>> {
        let body = serde_json::to_value(details)?;
        let response = self
            .http
            .post(
                &self.monitoring_url("metrics/actions/listMetrics"),
                &page_query(compartment_id, page),
                &body,
            )
            .await?;
        Ok(Page {
            items: decode(response.body, "metric list")?,
            next_page: response.next_page,
        })
    }

    async fn summarize_metrics_data(
        &self,
        compartment_id: &str,
        details: &SummarizeMetricsDataDetails,
    ) -> Result<Vec<MetricDataRecord>> {
        let body = serde_json::to_value(details)?;
        let response = self
            .http
            .post(
                &self.monitoring_url("metrics/actions/summarizeMetricsData"),
                &page_query(compartment_id, None),
                &body,
            )
            .await?;
        decode(response.body, "metric data")
    }

    async fn list_region_subscriptions(&self, tenancy_id: &str) -> Result<Vec<RegionSubscription>> {
        let url = self.identity_url(&format!(
            "tenancies/{}/regionSubscriptions",
            urlencoding::encode(tenancy_id)
        ));
        let response = self.http.get(&url, &[]).await?;
        decode(response.body, "region subscription")
    }
}

/// Builds a provider API bound to one region
pub trait ApiConnector: Send + Sync {
    fn connect(&self, region: &str) -> Result<Arc<dyn MonitoringApi>>;
}

/// Validate an OCI region identifier such as `us-ashburn-1`
/// Lowercase letters, digits and hyphens, at least one hyphen,
/// must start with a letter and cannot end with a hyphen
pub fn validate_region_name(region: &str) -> bool {
    if region.len() < 4 || region.len() > 40 {
        return false;
    }

    match region.chars().next() {
        Some(c) if c.is_ascii_lowercase() => {}
        _ => return false,
    }

    if region.ends_with('-') || !region.contains('-') {
        return false;
    }

    region
        .chars()
        .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-')
}

/// Connects to the real OCI endpoints with shared credentials
pub struct OciConnector {
    client: reqwest::Client,
    signer: Arc<RequestSigner>,
    base_url: Option<String>,
}

impl OciConnector {
    pub fn new(client: reqwest::Client, signer: Arc<RequestSigner>) -> Self {
        Self {
            client,
            signer,
            base_url: None,
        }
    }

    /// Route every region to a single base URL
    pub fn with_base_url(mut self, base_url: &str) -> Self {
        self.base_url = Some(base_url.to_string());
        self
    }
}

impl ApiConnector for OciConnector {
    fn connect(&self, region: &str) -> Result<Arc<dyn MonitoringApi>> {
        if !validate_region_name(region) {
            bail!("Invalid region name: {}", region);
        }

        let endpoints = match &self.base_url {
            Some(base) => Endpoints::with_base(base),
            None => Endpoints::for_region(region),
        };
        tracing::debug!("Creating OCI client for region {}", region);

        let http = OciHttpClient::new(self.client.clone(), self.signer.clone());
        Ok(Arc::new(OciRestApi::new(http, endpoints)))
    }
}
