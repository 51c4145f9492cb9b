//! Static reference data served to clients
//!
//! Well-known metric namespaces come from an embedded JSON file; the query
//! options are derived from the intervals and statistics the report builder
//! understands.

use crate::report::{Interval, Statistic};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::OnceLock;

/// Embedded namespace catalog (compiled into the binary)
const NAMESPACES_FILE: &str = include_str!("resources/namespaces.json");

/// A well-known namespace and its typical metrics
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NamespaceInfo {
    pub description: String,
    pub metrics: Vec<String>,
}

#[derive(Debug, Clone, Deserialize)]
struct NamespaceCatalog {
    namespaces: BTreeMap<String, NamespaceInfo>,
}

static CATALOG: OnceLock<NamespaceCatalog> = OnceLock::new();

/// Common namespaces keyed by name (parsed on first access)
pub fn common_namespaces() -> &'static BTreeMap<String, NamespaceInfo> {
    &CATALOG
        .get_or_init(|| {
            serde_json::from_str(NAMESPACES_FILE)
                .unwrap_or_else(|e| panic!("Failed to parse embedded namespace JSON: {}", e))
        })
        .namespaces
}

#[derive(Debug, Clone, Serialize)]
pub struct IntervalOption {
    pub value: &'static str,
    pub label: &'static str,
}

#[derive(Debug, Clone, Serialize)]
pub struct QueryOptions {
    pub statistics: Vec<&'static str>,
    pub intervals: Vec<IntervalOption>,
}

/// Statistics and intervals accepted when building queries
pub fn query_options() -> QueryOptions {
    QueryOptions {
        statistics: Statistic::ALL.iter().map(|s| s.mql()).collect(),
        intervals: Interval::ALL
            .iter()
            .map(|i| IntervalOption {
                value: i.as_str(),
                label: i.label(),
            })
            .collect(),
    }
}
