//! In-memory provider used by the integration tests

#![allow(dead_code)]

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use chrono::{TimeZone, Utc};
use ocimetrics::oci::api::{ApiConnector, MonitoringApi, Page};
use ocimetrics::oci::auth::{AuthInfo, AuthType};
use ocimetrics::oci::models::{
    AggregatedDatapoint, CompartmentRecord, ListMetricsDetails, MetricDataRecord, MetricRecord,
    RegionSubscription, SummarizeMetricsDataDetails, Tenancy,
};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

pub const TENANCY_ID: &str = "ocid1.tenancy.oc1..aaaatenancy";
pub const DEFAULT_REGION: &str = "us-ashburn-1";

pub fn auth_info() -> AuthInfo {
    AuthInfo {
        auth_type: AuthType::ConfigFile,
        tenancy_id: TENANCY_ID.to_string(),
        region: DEFAULT_REGION.to_string(),
    }
}

pub fn compartment(id: &str, name: &str, parent: &str) -> CompartmentRecord {
    CompartmentRecord {
        id: id.to_string(),
        name: name.to_string(),
        compartment_id: parent.to_string(),
    }
}

pub fn metric(name: &str, namespace: &str, resource_group: Option<&str>, dims: &[(&str, &str)]) -> MetricRecord {
    MetricRecord {
        name: name.to_string(),
        namespace: namespace.to_string(),
        resource_group: resource_group.map(str::to_string),
        dimensions: Some(
            dims.iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect(),
        ),
    }
}

/// Series named `name` with one point per value, an hour apart
pub fn series(name: &str, dims: &[(&str, &str)], values: &[f64]) -> MetricDataRecord {
    let start = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
    MetricDataRecord {
        name: name.to_string(),
        namespace: "oci_computeagent".to_string(),
        dimensions: Some(
            dims.iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect(),
        ),
        metadata: Some(BTreeMap::from([("unit".to_string(), "percent".to_string())])),
        aggregated_datapoints: values
            .iter()
            .enumerate()
            .map(|(i, value)| AggregatedDatapoint {
                timestamp: start + chrono::Duration::hours(i as i64),
                value: *value,
            })
            .collect(),
    }
}

/// Fake provider: fixed listings, paginated `page_size` at a time
pub struct FakeApi {
    pub tenancy_name: String,
    pub compartments: Vec<CompartmentRecord>,
    pub metrics: Vec<MetricRecord>,
    pub series: Vec<MetricDataRecord>,
    /// `None` makes the region listing fail
    pub subscriptions: Option<Vec<RegionSubscription>>,
    /// Compartments whose queries fail
    pub failing_compartments: HashSet<String>,
    pub page_size: usize,
    pub query_calls: AtomicUsize,
    pub list_metrics_requests: Mutex<Vec<ListMetricsDetails>>,
    pub summarize_requests: Mutex<Vec<(String, SummarizeMetricsDataDetails)>>,
}

impl Default for FakeApi {
    fn default() -> Self {
        Self {
            tenancy_name: "acme".to_string(),
            compartments: Vec::new(),
            metrics: Vec::new(),
            series: Vec::new(),
            subscriptions: Some(Vec::new()),
            failing_compartments: HashSet::new(),
            page_size: 2,
            query_calls: AtomicUsize::new(0),
            list_metrics_requests: Mutex::new(Vec::new()),
            summarize_requests: Mutex::new(Vec::new()),
        }
    }
}

fn paginate<T: Clone>(items: &[T], page: Option<&str>, size: usize) -> Result<Page<T>> {
    let start: usize = match page {
        Some(token) => token.parse().map_err(|_| anyhow!("bad page token {}", token))?,
        None => 0,
    };
    let end = (start + size).min(items.len());
    Ok(Page {
        items: items[start.min(end)..end].to_vec(),
        next_page: (end < items.len()).then(|| end.to_string()),
    })
}

#[async_trait]
impl MonitoringApi for FakeApi {
    async fn get_tenancy(&self, tenancy_id: &str) -> Result<Tenancy> {
        Ok(Tenancy {
            id: tenancy_id.to_string(),
            name: self.tenancy_name.clone(),
        })
    }

    async fn list_compartments(&self, _compartment_id: &str, page: Option<&str>) -> Result<Page<CompartmentRecord>> {
        paginate(&self.compartments, page, self.page_size)
    }

    async fn list_metrics(
        &self,
        _compartment_id: &str,
        details: &ListMetricsDetails,
        page: Option<&str>,
    ) -> Result<Page<MetricRecord>> {
        if page.is_none() {
            self.list_metrics_requests.lock().unwrap().push(details.clone());
        }
        let matching: Vec<MetricRecord> = self
            .metrics
            .iter()
            .filter(|m| details.namespace.as_ref().map_or(true, |ns| &m.namespace == ns))
            .filter(|m| details.name.as_ref().map_or(true, |n| &m.name == n))
            .filter(|m| {
                details
                    .resource_group
                    .as_ref()
                    .map_or(true, |rg| m.resource_group.as_ref() == Some(rg))
            })
            .filter(|m| {
                details.dimension_filters.as_ref().map_or(true, |filters| {
                    let dims = m.dimensions.clone().unwrap_or_default();
                    filters.iter().all(|(k, v)| dims.get(k) == Some(v))
                })
            })
            .cloned()
            .collect();
        paginate(&matching, page, self.page_size)
    }

    async fn summarize_metrics_data(
        &self,
        compartment_id: &str,
        details: &SummarizeMetricsDataDetails,
    ) -> Result<Vec<MetricDataRecord>> {
        self.query_calls.fetch_add(1, Ordering::SeqCst);
        self.summarize_requests
            .lock()
            .unwrap()
            .push((compartment_id.to_string(), details.clone()));
        if self.failing_compartments.contains(compartment_id) {
            return Err(anyhow!("404 NotAuthorizedOrNotFound: compartment {} not found", compartment_id));
        }
        Ok(self.series.clone())
    }

    async fn list_region_subscriptions(&self, _tenancy_id: &str) -> Result<Vec<RegionSubscription>> {
        self.subscriptions
            .clone()
            .ok_or_else(|| anyhow!("503 ServiceUnavailable: identity unavailable"))
    }
}

/// Hands out the same fake for every region except the unreachable ones
pub struct FakeConnector {
    pub api: Arc<FakeApi>,
    pub unreachable: HashSet<String>,
    pub connects: AtomicUsize,
}

impl FakeConnector {
    pub fn new(api: FakeApi) -> Self {
        Self {
            api: Arc::new(api),
            unreachable: HashSet::new(),
            connects: AtomicUsize::new(0),
        }
    }

    pub fn unreachable(mut self, regions: &[&str]) -> Self {
        self.unreachable = regions.iter().map(|r| r.to_string()).collect();
        self
    }
}

impl ApiConnector for FakeConnector {
    fn connect(&self, region: &str) -> Result<Arc<dyn MonitoringApi>> {
        self.connects.fetch_add(1, Ordering::SeqCst);
        if self.unreachable.contains(region) {
            return Err(anyhow!("Invalid region name: {}", region));
        }
        Ok(self.api.clone())
    }
}

/// A small tenancy: two compartments and two CPU series
pub fn sample_api() -> FakeApi {
    FakeApi {
        compartments: vec![
            compartment("ocid1.compartment.prod", "prod", TENANCY_ID),
            compartment("ocid1.compartment.web", "web", "ocid1.compartment.prod"),
            compartment("ocid1.compartment.dev", "dev", TENANCY_ID),
        ],
        metrics: vec![
            metric("CpuUtilization", "oci_computeagent", Some("frontend"), &[("resourceId", "i1"), ("shape", "E4")]),
            metric("CpuUtilization", "oci_computeagent", None, &[("resourceId", "i2"), ("availabilityDomain", "AD-1")]),
            metric("MemoryUtilization", "oci_computeagent", Some("backend"), &[("resourceId", "i1")]),
            metric("VnicToNetworkBytes", "oci_vcn", None, &[("resourceId", "vnic1")]),
        ],
        series: vec![
            series("CpuUtilization", &[("resourceId", "i1")], &[10.5, 20.25]),
            series("CpuUtilization", &[("resourceId", "i2")], &[0.1, 0.30000000000000004]),
        ],
        subscriptions: Some(vec![
            RegionSubscription {
                region_name: "us-phoenix-1".to_string(),
                status: "READY".to_string(),
            },
            RegionSubscription {
                region_name: "eu-frankfurt-1".to_string(),
                status: "READY".to_string(),
            },
            RegionSubscription {
                region_name: "ap-tokyo-1".to_string(),
                status: "IN_PROGRESS".to_string(),
            },
        ]),
        ..Default::default()
    }
}
