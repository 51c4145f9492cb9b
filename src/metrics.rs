//! Metrics Client
//!
//! Discovery and query operations over a [`MonitoringApi`], with pagination
//! flattened and provider records normalized into sorted lists and maps.

use crate::oci::api::MonitoringApi;
use crate::oci::models::{CompartmentRecord, ListMetricsDetails, MetricRecord, SummarizeMetricsDataDetails};
use anyhow::Result;
use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};
use std::sync::Arc;

/// Compartment with its full path from the tenancy root
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Compartment {
    pub id: String,
    pub name: String,
    pub path: String,
}

/// Metric name with every dimension key seen on it
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MetricDefinition {
    pub name: String,
    pub namespace: String,
    pub dimensions: Vec<String>,
    pub resource_group: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DataPoint {
    pub timestamp: DateTime<Utc>,
    pub value: f64,
}

/// Region and compartment a series was fetched from
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SeriesSource {
    pub region: String,
    pub compartment_id: String,
    pub compartment_name: String,
}

/// One time series returned by a query
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Series {
    pub name: String,
    pub namespace: String,
    pub dimensions: BTreeMap<String, String>,
    pub label: String,
    /// Label before origin tagging
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub short_label: Option<String>,
    pub unit: String,
    pub data_points: Vec<DataPoint>,
    #[serde(rename = "_source", default, skip_serializing_if = "Option::is_none")]
    pub source: Option<SeriesSource>,
}

/// Result of one query execution
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueryResult {
    pub query: String,
    pub namespace: String,
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
    pub metric_data: Vec<Series>,
    /// Set when the query failed; `metric_data` is then empty
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl QueryResult {
    /// Placeholder entry for a query that could not be executed
    pub fn failed(query: &str, namespace: &str, start: DateTime<Utc>, end: DateTime<Utc>, error: String) -> Self {
        Self {
            query: query.to_string(),
            namespace: namespace.to_string(),
            start_time: start,
            end_time: end,
            metric_data: Vec::new(),
            error: Some(error),
        }
    }

    pub fn total_points(&self) -> usize {
        self.metric_data.iter().map(|s| s.data_points.len()).sum()
    }
}

/// Human readable label: name plus sorted `key=value` dimension pairs
pub fn series_label(name: &str, dimensions: &BTreeMap<String, String>) -> String {
    if dimensions.is_empty() {
        return name.to_string();
    }
    let pairs = dimensions
        .iter()
        .map(|(k, v)| format!("{}={}", k, v))
        .collect::<Vec<_>>()
        .join(", ");
    format!("{} ({})", name, pairs)
}

/// Full path of a compartment: ancestor names from the tenancy root, `/` joined.
///
/// Ancestors missing from the listing show up as `Unknown`. A parent cycle
/// stops the walk at the first revisited compartment, whose name heads the
/// returned chain.
pub fn compartment_path(
    id: &str,
    by_id: &HashMap<&str, &CompartmentRecord>,
    tenancy_id: &str,
    tenancy_name: &str,
) -> String {
    let mut segments: Vec<&str> = Vec::new();
    let mut visited: HashSet<&str> = HashSet::new();
    let mut current = id;

    loop {
        if !visited.insert(current) {
            tracing::warn!("Compartment hierarchy cycle detected at {}", current);
            segments.push(by_id.get(current).map_or("Unknown", |r| r.name.as_str()));
            segments.reverse();
            return segments.join("/");
        }

        let Some(record) = by_id.get(current) else {
            segments.push("Unknown");
            break;
        };
        segments.push(&record.name);

        if record.compartment_id == tenancy_id {
            break;
        }
        current = &record.compartment_id;
    }

    segments.push(tenancy_name);
    segments.reverse();
    segments.join("/")
}

/// Discovery and query client for one region
pub struct MetricsClient {
    api: Arc<dyn MonitoringApi>,
    region: String,
    tenancy_id: String,
}

impl MetricsClient {
    pub fn new(api: Arc<dyn MonitoringApi>, region: &str, tenancy_id: &str) -> Self {
        Self {
            api,
            region: region.to_string(),
            tenancy_id: tenancy_id.to_string(),
        }
    }

    pub fn region(&self) -> &str {
        &self.region
    }

    pub fn api(&self) -> &Arc<dyn MonitoringApi> {
        &self.api
    }

    /// Tenancy root plus every accessible descendant, sorted by path
    pub async fn list_compartments(&self) -> Result<Vec<Compartment>> {
        self.fetch_compartments().await.inspect_err(|e| {
            tracing::error!("Error listing compartments: {:#}", e);
        })
    }

    async fn fetch_compartments(&self) -> Result<Vec<Compartment>> {
        let tenancy = self.api.get_tenancy(&self.tenancy_id).await?;

        let mut records = Vec::new();
        let mut page: Option<String> = None;
        loop {
            let result = self
                .api
                .list_compartments(&self.tenancy_id, page.as_deref())
                .await?;
            records.extend(result.items);
            if result.next_page.is_none() {
                break;
            }
            page = result.next_page;
        }

        let by_id: HashMap<&str, &CompartmentRecord> =
            records.iter().map(|r| (r.id.as_str(), r)).collect();

        let mut compartments = vec![Compartment {
            id: self.tenancy_id.clone(),
            name: tenancy.name.clone(),
            path: format!("{} (root)", tenancy.name),
        }];
        compartments.extend(records.iter().map(|record| Compartment {
            id: record.id.clone(),
            name: record.name.clone(),
            path: compartment_path(&record.id, &by_id, &self.tenancy_id, &tenancy.name),
        }));

        compartments.sort_by(|a, b| a.path.cmp(&b.path));
        Ok(compartments)
    }

    /// All metric records matching `details`, across pages
    async fn metric_records(&self, compartment_id: &str, details: &ListMetricsDetails) -> Result<Vec<MetricRecord>> {
        let mut records = Vec::new();
        let mut page: Option<String> = None;
        loop {
            let result = self
                .api
                .list_metrics(compartment_id, details, page.as_deref())
                .await?;
            records.extend(result.items);
            if result.next_page.is_none() {
                break;
            }
            page = result.next_page;
        }
        Ok(records)
    }

    /// Namespaces with at least one metric in the compartment
    pub async fn list_namespaces(&self, compartment_id: &str) -> Result<Vec<String>> {
        let records = self
            .metric_records(compartment_id, &ListMetricsDetails::default())
            .await
            .inspect_err(|e| tracing::error!("Error listing namespaces: {:#}", e))?;

        let namespaces: BTreeSet<String> = records.into_iter().map(|m| m.namespace).collect();
        Ok(namespaces.into_iter().collect())
    }

    /// One entry per metric name, dimension keys merged across its streams
    pub async fn list_metrics(
        &self,
        compartment_id: &str,
        namespace: &str,
        resource_group: Option<&str>,
    ) -> Result<Vec<MetricDefinition>> {
        let details = ListMetricsDetails {
            namespace: Some(namespace.to_string()),
            resource_group: resource_group.map(str::to_string),
            ..Default::default()
        };
        let records = self
            .metric_records(compartment_id, &details)
            .await
            .inspect_err(|e| tracing::error!("Error listing metrics: {:#}", e))?;

        Ok(merge_metric_definitions(records))
    }

    /// Resource groups used within a namespace
    pub async fn list_resource_groups(&self, compartment_id: &str, namespace: &str) -> Result<Vec<String>> {
        let details = ListMetricsDetails {
            namespace: Some(namespace.to_string()),
            group_by: Some(vec!["resourceGroup".to_string()]),
            ..Default::default()
        };
        let records = self
            .metric_records(compartment_id, &details)
            .await
            .inspect_err(|e| tracing::error!("Error listing resource groups: {:#}", e))?;

        let groups: BTreeSet<String> = records
            .into_iter()
            .filter_map(|m| m.resource_group)
            .filter(|g| !g.is_empty())
            .collect();
        Ok(groups.into_iter().collect())
    }

    /// Every dimension key with the values observed for it
    pub async fn list_dimensions(
        &self,
        compartment_id: &str,
        namespace: &str,
        metric_name: Option<&str>,
    ) -> Result<BTreeMap<String, Vec<String>>> {
        let details = ListMetricsDetails {
            namespace: Some(namespace.to_string()),
            name: metric_name.map(str::to_string),
            ..Default::default()
        };
        let records = self
            .metric_records(compartment_id, &details)
            .await
            .inspect_err(|e| tracing::error!("Error listing dimensions: {:#}", e))?;

        let mut dimensions: BTreeMap<String, BTreeSet<String>> = BTreeMap::new();
        for (key, value) in records.into_iter().flat_map(|m| m.dimensions.unwrap_or_default()) {
            dimensions.entry(key).or_default().insert(value);
        }

        Ok(dimensions
            .into_iter()
            .map(|(key, values)| (key, values.into_iter().collect()))
            .collect())
    }

    /// Values of one dimension, optionally narrowed by other dimension values
    pub async fn list_dimension_values(
        &self,
        compartment_id: &str,
        namespace: &str,
        dimension_name: &str,
        metric_name: Option<&str>,
        filters: &BTreeMap<String, String>,
    ) -> Result<Vec<String>> {
        let details = ListMetricsDetails {
            namespace: Some(namespace.to_string()),
            name: metric_name.map(str::to_string),
            dimension_filters: (!filters.is_empty()).then(|| filters.clone()),
            ..Default::default()
        };
        let records = self
            .metric_records(compartment_id, &details)
            .await
            .inspect_err(|e| tracing::error!("Error listing dimension values: {:#}", e))?;

        let values: BTreeSet<String> = records
            .into_iter()
            .filter_map(|m| m.dimensions.and_then(|mut d| d.remove(dimension_name)))
            .collect();
        Ok(values.into_iter().collect())
    }

    /// Run an MQL query verbatim over a time window
    pub async fn query_metrics(
        &self,
        compartment_id: &str,
        namespace: &str,
        query: &str,
        start_time: DateTime<Utc>,
        end_time: DateTime<Utc>,
        resolution: Option<&str>,
    ) -> Result<QueryResult> {
        let details = SummarizeMetricsDataDetails {
            namespace: namespace.to_string(),
            query: query.to_string(),
            start_time: start_time.to_rfc3339_opts(SecondsFormat::Millis, true),
            end_time: end_time.to_rfc3339_opts(SecondsFormat::Millis, true),
            resolution: resolution.map(str::to_string),
        };

        let records = self
            .api
            .summarize_metrics_data(compartment_id, &details)
            .await
            .inspect_err(|e| tracing::error!("Error querying metrics: {:#}", e))?;

        let metric_data = records
            .into_iter()
            .map(|record| {
                let dimensions = record.dimensions.unwrap_or_default();
                Series {
                    label: series_label(&record.name, &dimensions),
                    unit: record
                        .metadata
                        .and_then(|mut m| m.remove("unit"))
                        .unwrap_or_default(),
                    data_points: record
                        .aggregated_datapoints
                        .into_iter()
                        .map(|p| DataPoint {
                            timestamp: p.timestamp,
                            value: p.value,
                        })
                        .collect(),
                    name: record.name,
                    namespace: record.namespace,
                    dimensions,
                    short_label: None,
                    source: None,
                }
            })
            .collect();

        Ok(QueryResult {
            query: query.to_string(),
            namespace: namespace.to_string(),
            start_time,
            end_time,
            metric_data,
            error: None,
        })
    }
}

/// Collapse metric streams into one definition per name
pub fn merge_metric_definitions(records: Vec<MetricRecord>) -> Vec<MetricDefinition> {
    let mut merged: BTreeMap<String, (String, Option<String>, BTreeSet<String>)> = BTreeMap::new();

    for record in records {
        let entry = merged
            .entry(record.name)
            .or_insert_with(|| (record.namespace, record.resource_group, BTreeSet::new()));
        if let Some(dimensions) = record.dimensions {
            entry.2.extend(dimensions.into_keys());
        }
    }

    merged
        .into_iter()
        .map(|(name, (namespace, resource_group, dimensions))| MetricDefinition {
            name,
            namespace,
            dimensions: dimensions.into_iter().collect(),
            resource_group,
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(id: &str, name: &str, parent: &str) -> CompartmentRecord {
        CompartmentRecord {
            id: id.to_string(),
            name: name.to_string(),
            compartment_id: parent.to_string(),
        }
    }

    #[test]
    fn test_compartment_path_nested() {
        let records = vec![
            record("a", "prod", "tenancy"),
            record("b", "network", "a"),
            record("c", "vcn1", "b"),
        ];
        let by_id: HashMap<&str, &CompartmentRecord> = records.iter().map(|r| (r.id.as_str(), r)).collect();
        assert_eq!(compartment_path("a", &by_id, "tenancy", "acme"), "acme/prod");
        assert_eq!(compartment_path("c", &by_id, "tenancy", "acme"), "acme/prod/network/vcn1");
    }

    #[test]
    fn test_compartment_path_unknown_parent() {
        let records = vec![record("b", "network", "hidden")];
        let by_id: HashMap<&str, &CompartmentRecord> = records.iter().map(|r| (r.id.as_str(), r)).collect();
        assert_eq!(compartment_path("b", &by_id, "tenancy", "acme"), "acme/Unknown/network");
    }

    #[test]
    fn test_compartment_path_cycle_terminates() {
        let records = vec![record("a", "one", "b"), record("b", "two", "a")];
        let by_id: HashMap<&str, &CompartmentRecord> = records.iter().map(|r| (r.id.as_str(), r)).collect();
        assert_eq!(compartment_path("a", &by_id, "tenancy", "acme"), "one/two/one");
        assert_eq!(compartment_path("b", &by_id, "tenancy", "acme"), "two/one/two");

        let self_parent = vec![record("s", "loop", "s")];
        let by_id: HashMap<&str, &CompartmentRecord> = self_parent.iter().map(|r| (r.id.as_str(), r)).collect();
        assert_eq!(compartment_path("s", &by_id, "tenancy", "acme"), "loop/loop");
    }

    #[test]
    fn test_series_label() {
        let mut dims = BTreeMap::new();
        assert_eq!(series_label("CpuUtilization", &dims), "CpuUtilization");
        dims.insert("resourceId".to_string(), "ocid1.instance".to_string());
        dims.insert("availabilityDomain".to_string(), "AD-1".to_string());
        assert_eq!(
            series_label("CpuUtilization", &dims),
            "CpuUtilization (availabilityDomain=AD-1, resourceId=ocid1.instance)"
        );
    }

    #[test]
    fn test_merge_metric_definitions() {
        let dims = |keys: &[&str]| {
            Some(
                keys.iter()
                    .map(|k| (k.to_string(), "v".to_string()))
                    .collect::<BTreeMap<_, _>>(),
            )
        };
        let records = vec![
            MetricRecord {
                name: "MemoryUtilization".to_string(),
                namespace: "oci_computeagent".to_string(),
                resource_group: None,
                dimensions: dims(&["resourceId"]),
            },
            MetricRecord {
                name: "CpuUtilization".to_string(),
                namespace: "oci_computeagent".to_string(),
                resource_group: None,
                dimensions: dims(&["resourceId", "shape"]),
            },
            MetricRecord {
                name: "CpuUtilization".to_string(),
                namespace: "oci_computeagent".to_string(),
                resource_group: None,
                dimensions: dims(&["availabilityDomain"]),
            },
        ];

        let merged = merge_metric_definitions(records);
        assert_eq!(merged.len(), 2);
        assert_eq!(merged[0].name, "CpuUtilization");
        assert_eq!(merged[0].dimensions, vec!["availabilityDomain", "resourceId", "shape"]);
        assert_eq!(merged[1].name, "MemoryUtilization");
    }
}
