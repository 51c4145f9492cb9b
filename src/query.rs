//! Query execution
//!
//! Single queries, batches of independent queries, and the unified fan-out
//! that runs one query over every region x compartment combination.
//! Combinations run one after another; a failure is recorded and the
//! remaining combinations still run.

use crate::metrics::{Compartment, MetricsClient, QueryResult, SeriesSource};
use crate::regions::RegionClientManager;
use anyhow::{bail, Result};
use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use tokio::sync::RwLock;

/// Parse a timestamp: RFC 3339, or naive date/time taken as UTC
pub fn parse_timestamp(value: &str) -> Result<DateTime<Utc>> {
    let value = value.trim();

    if let Ok(parsed) = DateTime::parse_from_rfc3339(value) {
        return Ok(parsed.with_timezone(&Utc));
    }
    for format in ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f", "%Y-%m-%dT%H:%M"] {
        if let Ok(parsed) = NaiveDateTime::parse_from_str(value, format) {
            return Ok(parsed.and_utc());
        }
    }
    if let Ok(date) = NaiveDate::parse_from_str(value, "%Y-%m-%d") {
        if let Some(midnight) = date.and_hms_opt(0, 0, 0) {
            return Ok(midnight.and_utc());
        }
    }

    bail!("Invalid date format: {:?}", value)
}

/// Compartment id -> display name, filled from compartment listings
#[derive(Debug, Default)]
pub struct CompartmentDirectory {
    names: RwLock<HashMap<String, String>>,
}

impl CompartmentDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn record(&self, compartments: &[Compartment]) {
        let mut names = self.names.write().await;
        for compartment in compartments {
            names.insert(compartment.id.clone(), compartment.name.clone());
        }
    }

    /// Known name, or the id itself
    pub async fn display_name(&self, compartment_id: &str) -> String {
        self.names
            .read()
            .await
            .get(compartment_id)
            .cloned()
            .unwrap_or_else(|| compartment_id.to_string())
    }
}

/// What to query and over which window
#[derive(Debug, Clone)]
pub struct MetricQuery {
    pub namespace: String,
    pub query: String,
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
    pub resolution: Option<String>,
}

impl MetricQuery {
    pub async fn run(&self, client: &MetricsClient, compartment_id: &str) -> Result<QueryResult> {
        client
            .query_metrics(
                compartment_id,
                &self.namespace,
                &self.query,
                self.start_time,
                self.end_time,
                self.resolution.as_deref(),
            )
            .await
    }
}

/// One query fanned out over regions and compartments
#[derive(Debug, Clone)]
pub struct UnifiedQuery {
    pub regions: Vec<String>,
    pub compartment_ids: Vec<String>,
    pub query: MetricQuery,
}

/// Successful combination
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OriginResult {
    pub region: String,
    pub compartment_id: String,
    pub compartment_name: String,
    #[serde(flatten)]
    pub result: QueryResult,
}

/// Failed combination
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OriginError {
    pub region: String,
    pub compartment_id: String,
    pub compartment_name: String,
    pub error: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FanOutSummary {
    pub total_regions: usize,
    pub total_compartments: usize,
    pub total_queries: usize,
    pub successful_queries: usize,
    pub failed_queries: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UnifiedOutcome {
    pub results: Vec<OriginResult>,
    pub errors: Vec<OriginError>,
    pub metadata: FanOutSummary,
}

/// Drop blank region names; an empty selection means the default region
pub fn effective_regions(requested: &[String], default_region: &str) -> Vec<String> {
    let regions: Vec<String> = requested
        .iter()
        .map(|r| r.trim())
        .filter(|r| !r.is_empty())
        .map(str::to_string)
        .collect();

    if regions.is_empty() {
        vec![default_region.to_string()]
    } else {
        regions
    }
}

/// Run `request.query` for every region x compartment pair
pub async fn run_unified(
    manager: &RegionClientManager,
    directory: &CompartmentDirectory,
    request: &UnifiedQuery,
) -> UnifiedOutcome {
    let regions = effective_regions(&request.regions, manager.default_region());
    let compartments = &request.compartment_ids;

    tracing::info!(
        "Unified query: {} regions x {} compartments = {} queries",
        regions.len(),
        compartments.len(),
        regions.len() * compartments.len()
    );
    tracing::info!("Regions: {:?}", regions);

    let mut results = Vec::new();
    let mut errors = Vec::new();

    for region in &regions {
        let client = match manager.client(Some(region)).await {
            Ok(client) => client,
            Err(e) => {
                tracing::error!("Failed to connect to region {}: {:#}", region, e);
                for compartment_id in compartments {
                    errors.push(OriginError {
                        region: region.clone(),
                        compartment_id: compartment_id.clone(),
                        compartment_name: directory.display_name(compartment_id).await,
                        error: format!("Failed to connect to region {}: {}", region, e),
                    });
                }
                continue;
            }
        };

        for compartment_id in compartments {
            let compartment_name = directory.display_name(compartment_id).await;

            match request.query.run(&client, compartment_id).await {
                Ok(mut result) => {
                    tag_origin(&mut result, region, compartment_id, &compartment_name);
                    tracing::info!(
                        "Region {}, compartment {}: {} metric series",
                        region,
                        compartment_name,
                        result.metric_data.len()
                    );
                    results.push(OriginResult {
                        region: region.clone(),
                        compartment_id: compartment_id.clone(),
                        compartment_name,
                        result,
                    });
                }
                Err(e) => {
                    tracing::error!("Error querying {}/{}: {:#}", region, compartment_id, e);
                    errors.push(OriginError {
                        region: region.clone(),
                        compartment_id: compartment_id.clone(),
                        compartment_name,
                        error: e.to_string(),
                    });
                }
            }
        }
    }

    let metadata = FanOutSummary {
        total_regions: regions.len(),
        total_compartments: compartments.len(),
        total_queries: regions.len() * compartments.len(),
        successful_queries: results.len(),
        failed_queries: errors.len(),
    };

    UnifiedOutcome {
        results,
        errors,
        metadata,
    }
}

/// Attach origin metadata and suffix every label with `[region] (compartment)`
pub fn tag_origin(result: &mut QueryResult, region: &str, compartment_id: &str, compartment_name: &str) {
    for series in &mut result.metric_data {
        let original = if series.label.is_empty() {
            series.name.clone()
        } else {
            series.label.clone()
        };
        series.label = format!("{} [{}] ({})", original, region, compartment_name);
        series.short_label = Some(original);
        series.source = Some(SeriesSource {
            region: region.to_string(),
            compartment_id: compartment_id.to_string(),
            compartment_name: compartment_name.to_string(),
        });
    }
}

/// One entry of a batch, fields unchecked
#[derive(Debug, Clone, Default, Deserialize)]
pub struct BatchItem {
    #[serde(default)]
    pub id: Option<Value>,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub compartment_id: Option<String>,
    #[serde(default)]
    pub namespace: Option<String>,
    #[serde(default)]
    pub query: Option<String>,
    #[serde(default)]
    pub start_time: Option<String>,
    #[serde(default)]
    pub end_time: Option<String>,
    #[serde(default)]
    pub resolution: Option<String>,
}

impl BatchItem {
    fn missing_fields(&self) -> Vec<&'static str> {
        [
            ("compartment_id", self.compartment_id.is_none()),
            ("namespace", self.namespace.is_none()),
            ("query", self.query.is_none()),
            ("start_time", self.start_time.is_none()),
            ("end_time", self.end_time.is_none()),
        ]
        .into_iter()
        .filter_map(|(field, missing)| missing.then_some(field))
        .collect()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchResult {
    pub query_id: Value,
    pub query_name: String,
    #[serde(flatten)]
    pub result: QueryResult,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BatchError {
    pub query_index: usize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub query_id: Option<Value>,
    pub error: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchOutcome {
    pub results: Vec<BatchResult>,
    pub errors: Vec<BatchError>,
}

/// Run independent queries in order, capturing failures per item
pub async fn run_batch(client: &MetricsClient, items: &[Value]) -> BatchOutcome {
    let mut results = Vec::new();
    let mut errors = Vec::new();

    for (index, raw) in items.iter().enumerate() {
        let item: BatchItem = match serde_json::from_value(raw.clone()) {
            Ok(item) => item,
            Err(e) => {
                errors.push(BatchError {
                    query_index: index,
                    query_id: raw.get("id").cloned(),
                    error: format!("Invalid query definition: {}", e),
                });
                continue;
            }
        };

        let missing = item.missing_fields();
        if !missing.is_empty() {
            errors.push(BatchError {
                query_index: index,
                query_id: None,
                error: format!("Missing fields: {}", missing.join(", ")),
            });
            continue;
        }

        let query_id = item.id.clone().unwrap_or_else(|| Value::from(index));
        match run_batch_item(client, &item).await {
            Ok(result) => results.push(BatchResult {
                query_id,
                query_name: item
                    .name
                    .clone()
                    .unwrap_or_else(|| format!("Query {}", index + 1)),
                result,
            }),
            Err(e) => {
                tracing::error!("Batch query {} failed: {:#}", index, e);
                errors.push(BatchError {
                    query_index: index,
                    query_id: Some(query_id),
                    error: e.to_string(),
                });
            }
        }
    }

    BatchOutcome { results, errors }
}

async fn run_batch_item(client: &MetricsClient, item: &BatchItem) -> Result<QueryResult> {
    let (Some(compartment_id), Some(namespace), Some(query), Some(start), Some(end)) = (
        item.compartment_id.as_deref(),
        item.namespace.as_deref(),
        item.query.as_deref(),
        item.start_time.as_deref(),
        item.end_time.as_deref(),
    ) else {
        bail!("Missing fields");
    };

    let query = MetricQuery {
        namespace: namespace.to_string(),
        query: query.to_string(),
        start_time: parse_timestamp(start)?,
        end_time: parse_timestamp(end)?,
        resolution: item.resolution.clone(),
    };
    query.run(client, compartment_id).await
}
