//! Report command
//!
//! Terminal front end: resolve credentials, optionally list compartments,
//! namespaces or metrics, otherwise run the requested queries and write an
//! HTML or JSON report. Individual query failures end up in the report and
//! do not change the exit status.

use crate::config::{AuthOverrides, Config};
use crate::metrics::{MetricsClient, QueryResult};
use crate::oci::api::{ApiConnector, OciConnector};
use crate::oci::auth::{self, AuthInfo, AuthType, Credentials};
use crate::oci::http::{build_http_client, format_oci_error};
use crate::query::parse_timestamp;
use crate::report::{self, build_mql, Interval, ReportMeta, Statistic};
use anyhow::{Context, Result};
use chrono::{Duration, Utc};
use clap::Args;
use std::io::Write;
use std::path::{Path, PathBuf};

/// Authentication flags shared by every command
#[derive(Debug, Clone, Args, Default)]
pub struct AuthArgs {
    /// Authentication method (auto-detected if not specified)
    #[arg(long = "auth", value_enum, env = "OCI_AUTH_TYPE")]
    pub auth_type: Option<AuthType>,

    /// OCI config file path [default: ~/.oci/config]
    #[arg(long, env = "OCI_CONFIG_FILE")]
    pub config_file: Option<PathBuf>,

    /// OCI config profile [default: DEFAULT]
    #[arg(long, env = "OCI_CONFIG_PROFILE")]
    pub profile: Option<String>,

    /// OCI region (overrides config/auto-detection)
    #[arg(long, env = "OCI_REGION")]
    pub region: Option<String>,
}

impl AuthArgs {
    pub fn overrides(&self) -> AuthOverrides {
        AuthOverrides {
            auth_type: self.auth_type,
            config_file: self.config_file.clone(),
            profile: self.profile.clone(),
            region: self.region.clone(),
        }
    }
}

/// Generate an OCI Monitoring metrics report
#[derive(Debug, Clone, Args)]
pub struct ReportArgs {
    #[command(flatten)]
    pub auth: AuthArgs,

    /// Compartment OCID to query
    #[arg(short, long)]
    pub compartment: String,

    /// Metric namespace (e.g. oci_computeagent)
    #[arg(short, long)]
    pub namespace: Option<String>,

    /// Metric name to include (repeatable)
    #[arg(short = 'm', long = "metric")]
    pub metrics: Vec<String>,

    /// Raw MQL query (repeatable)
    #[arg(long = "mql")]
    pub mql_queries: Vec<String>,

    /// Aggregation interval
    #[arg(short, long, value_enum, default_value = "1h")]
    pub interval: Interval,

    /// Aggregation statistic
    #[arg(short, long, value_enum, default_value = "mean")]
    pub statistic: Statistic,

    /// Dimension to group by (e.g. resourceId, availabilityDomain)
    #[arg(short, long)]
    pub group_by: Option<String>,

    /// Filter by resource group
    #[arg(long)]
    pub resource_group: Option<String>,

    /// Hours of data to fetch
    #[arg(long, default_value_t = 24)]
    pub hours: u32,

    /// Start time (ISO format, e.g. 2024-01-01T00:00:00Z)
    #[arg(long)]
    pub start_time: Option<String>,

    /// End time (ISO format, e.g. 2024-01-02T00:00:00Z)
    #[arg(long)]
    pub end_time: Option<String>,

    /// Output file path
    #[arg(short, long, default_value = "oci_metrics_report.html")]
    pub output: PathBuf,

    /// Report title
    #[arg(long, default_value = "OCI Metrics Report")]
    pub title: String,

    /// Output raw JSON instead of HTML
    #[arg(long)]
    pub json: bool,

    /// List available metric namespaces and exit
    #[arg(long)]
    pub list_namespaces: bool,

    /// List available metrics in the namespace and exit
    #[arg(long)]
    pub list_metrics: bool,

    /// List available compartments and exit
    #[arg(long)]
    pub list_compartments: bool,
}

/// A query to run: namespace plus MQL text
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlannedQuery {
    pub namespace: String,
    pub mql: String,
}

/// Raw MQL queries first, then one built query per metric name
pub fn plan_queries(args: &ReportArgs) -> Vec<PlannedQuery> {
    let namespace = args.namespace.clone().unwrap_or_default();

    let raw = args.mql_queries.iter().map(|mql| PlannedQuery {
        namespace: namespace.clone(),
        mql: mql.clone(),
    });
    let built = args.metrics.iter().map(|metric| PlannedQuery {
        namespace: namespace.clone(),
        mql: build_mql(
            metric,
            args.interval,
            args.statistic,
            args.group_by.as_deref(),
            args.resource_group.as_deref(),
        ),
    });

    raw.chain(built).collect()
}

/// Output path; JSON mode swaps an `.html` extension for `.json`
pub fn output_path(output: &Path, json: bool) -> PathBuf {
    if json && output.extension().is_some_and(|ext| ext == "html") {
        output.with_extension("json")
    } else {
        output.to_path_buf()
    }
}

/// `12.34 KB` or `1.50 MB`
pub fn format_size(bytes: u64) -> String {
    if bytes > 1024 * 1024 {
        format!("{:.2} MB", bytes as f64 / 1024.0 / 1024.0)
    } else {
        format!("{:.2} KB", bytes as f64 / 1024.0)
    }
}

fn shorten(value: &str) -> String {
    let head: String = value.chars().take(30).collect();
    format!("{}...", head)
}

/// Run the report command, returning the process exit code
pub async fn run(args: &ReportArgs, config: &Config) -> Result<u8> {
    let mut out = std::io::stdout();
    writeln!(out, "Initializing OCI client...")?;

    let client = match connect(args, config).await {
        Ok((info, client)) => {
            writeln!(out, "  Auth type: {}", info.auth_type)?;
            writeln!(out, "  Region: {}", info.region)?;
            writeln!(out, "  Tenancy: {}", shorten(&info.tenancy_id))?;
            client
        }
        Err(e) => {
            tracing::error!("Client initialization failed: {:#}", e);
            writeln!(out, "Error: Failed to initialize OCI client: {}", format_oci_error(&e))?;
            return Ok(1);
        }
    };

    execute(args, &client, &mut out).await
}

async fn connect(args: &ReportArgs, config: &Config) -> Result<(AuthInfo, MetricsClient)> {
    let settings = config.auth_settings(args.auth.overrides());
    let http = build_http_client()?;
    let Credentials { info, signer } = auth::resolve_credentials(&settings, &http).await?;

    let api = OciConnector::new(http, signer).connect(&info.region)?;
    let client = MetricsClient::new(api, &info.region, &info.tenancy_id);
    Ok((info, client))
}

/// Discovery or report generation against an initialized client
pub async fn execute(args: &ReportArgs, client: &MetricsClient, out: &mut impl Write) -> Result<u8> {
    let rule = "-".repeat(60);

    if args.list_compartments {
        writeln!(out, "\nAvailable Compartments:\n{}", rule)?;
        for compartment in client.list_compartments().await? {
            writeln!(out, "  {}", compartment.path)?;
            writeln!(out, "    OCID: {}", compartment.id)?;
        }
        return Ok(0);
    }

    if args.list_namespaces {
        writeln!(out, "\nMetric Namespaces in compartment:\n{}", rule)?;
        for namespace in client.list_namespaces(&args.compartment).await? {
            writeln!(out, "  {}", namespace)?;
        }
        return Ok(0);
    }

    if args.list_metrics {
        let Some(namespace) = args.namespace.as_deref() else {
            writeln!(out, "Error: --namespace is required for --list-metrics")?;
            return Ok(1);
        };
        writeln!(out, "\nMetrics in namespace '{}':\n{}", namespace, rule)?;
        for metric in client.list_metrics(&args.compartment, namespace, None).await? {
            let dimensions = if metric.dimensions.is_empty() {
                "none".to_string()
            } else {
                metric.dimensions.join(", ")
            };
            writeln!(out, "  {}", metric.name)?;
            writeln!(out, "    Dimensions: {}", dimensions)?;
        }
        return Ok(0);
    }

    if args.namespace.is_none() && args.mql_queries.is_empty() {
        writeln!(out, "Error: --namespace is required (unless using --mql)")?;
        return Ok(1);
    }
    if args.metrics.is_empty() && args.mql_queries.is_empty() {
        writeln!(out, "Error: At least one --metric or --mql is required")?;
        return Ok(1);
    }

    let (start_time, end_time) = match (&args.start_time, &args.end_time) {
        (Some(start), Some(end)) => (parse_timestamp(start)?, parse_timestamp(end)?),
        _ => {
            let end = Utc::now();
            (end - Duration::hours(i64::from(args.hours)), end)
        }
    };
    writeln!(out, "\nTime range: {} to {}", start_time.to_rfc3339(), end_time.to_rfc3339())?;

    let queries = plan_queries(args);
    writeln!(out, "\nExecuting {} queries...", queries.len())?;

    let mut results = Vec::with_capacity(queries.len());
    for (idx, planned) in queries.iter().enumerate() {
        writeln!(out, "  [{}/{}] {}", idx + 1, queries.len(), planned.mql)?;
        match client
            .query_metrics(&args.compartment, &planned.namespace, &planned.mql, start_time, end_time, None)
            .await
        {
            Ok(result) => {
                writeln!(
                    out,
                    "           -> {} series, {} data points",
                    result.metric_data.len(),
                    result.total_points()
                )?;
                results.push(result);
            }
            Err(e) => {
                writeln!(out, "           -> Error: {}", e)?;
                results.push(QueryResult::failed(
                    &planned.mql,
                    &planned.namespace,
                    start_time,
                    end_time,
                    e.to_string(),
                ));
            }
        }
    }

    let path = output_path(&args.output, args.json);
    let document = if args.json {
        report::render_json(&results)?
    } else {
        let meta = ReportMeta {
            title: args.title.clone(),
            compartment_id: args.compartment.clone(),
            namespace: args.namespace.clone(),
            start_time,
            end_time,
            generated_at: Utc::now(),
        };
        report::render_html(&results, &meta)?
    };

    std::fs::write(&path, &document).with_context(|| format!("Failed to write {}", path.display()))?;

    let successful = results.iter().filter(|r| r.error.is_none()).count();
    writeln!(out, "\nReport generated: {}", path.display())?;
    writeln!(out, "  Total queries: {}", results.len())?;
    writeln!(out, "  Successful: {}", successful)?;
    writeln!(out, "  File size: {}", format_size(document.len() as u64))?;

    Ok(0)
}
