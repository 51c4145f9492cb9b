//! Wire models for the Identity and Monitoring REST APIs

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

#[derive(Debug, Clone, Deserialize)]
pub struct Tenancy {
    pub id: String,
    pub name: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CompartmentRecord {
    pub id: String,
    pub name: String,
    /// Parent compartment
    pub compartment_id: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RegionSubscription {
    pub region_name: String,
    pub status: String,
}

/// One metric stream as returned by `listMetrics`
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MetricRecord {
    pub name: String,
    pub namespace: String,
    #[serde(default)]
    pub resource_group: Option<String>,
    #[serde(default)]
    pub dimensions: Option<BTreeMap<String, String>>,
}

/// Body of `listMetrics`
#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ListMetricsDetails {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub namespace: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub resource_group: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub dimension_filters: Option<BTreeMap<String, String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub group_by: Option<Vec<String>>,
}

/// Body of `summarizeMetricsData`
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SummarizeMetricsDataDetails {
    pub namespace: String,
    pub query: String,
    pub start_time: String,
    pub end_time: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub resolution: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MetricDataRecord {
    pub name: String,
    pub namespace: String,
    #[serde(default)]
    pub dimensions: Option<BTreeMap<String, String>>,
    #[serde(default)]
    pub metadata: Option<BTreeMap<String, String>>,
    #[serde(default)]
    pub aggregated_datapoints: Vec<AggregatedDatapoint>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AggregatedDatapoint {
    pub timestamp: DateTime<Utc>,
    pub value: f64,
}
