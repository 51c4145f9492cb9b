//! ocimetrics - OCI Monitoring metrics explorer
//!
//! Discovery and querying of OCI Monitoring metrics across compartments and
//! regions, served over a JSON HTTP API or rendered into HTML/JSON reports.

pub mod catalog;
pub mod cli;
pub mod config;
pub mod metrics;
pub mod oci;
pub mod query;
pub mod regions;
pub mod report;
pub mod server;

/// Version injected at compile time via OCIMETRICS_VERSION env var (set by CI/CD),
/// or "dev" for local builds.
pub const VERSION: &str = match option_env!("OCIMETRICS_VERSION") {
    Some(v) => v,
    None => "dev",
};
