//! HTTP API
//!
//! JSON endpoints for discovery and querying, plus a dashboard page at `/`.
//! Validation failures answer 400 and provider failures 500, both as
//! `{"error": "..."}`.

use crate::catalog;
use crate::metrics::MetricsClient;
use crate::query::{self, CompartmentDirectory, MetricQuery, UnifiedQuery};
use crate::regions::RegionClientManager;
use anyhow::Result;
use axum::body::Bytes;
use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::response::{Html, IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::{json, Value};
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use tokio::net::TcpListener;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

/// Query parameter prefix for dimension filters
const FILTER_PREFIX: &str = "filter_";

/// Browser dashboard driving the JSON API
const DASHBOARD_PAGE: &str = include_str!("resources/dashboard.html");

/// Shared handler state
#[derive(Clone)]
pub struct AppState {
    pub manager: Arc<RegionClientManager>,
    pub directory: Arc<CompartmentDirectory>,
}

impl AppState {
    pub fn new(manager: Arc<RegionClientManager>) -> Self {
        Self {
            manager,
            directory: Arc::new(CompartmentDirectory::new()),
        }
    }

    async fn default_client(&self) -> Result<Arc<MetricsClient>, ApiError> {
        self.manager
            .client(None)
            .await
            .map_err(provider_error("creating client"))
    }
}

#[derive(Debug)]
pub enum ApiError {
    /// Invalid or incomplete request
    BadRequest(String),
    /// Provider or runtime failure
    Provider(anyhow::Error),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            ApiError::BadRequest(message) => (StatusCode::BAD_REQUEST, message),
            ApiError::Provider(e) => (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()),
        };
        (status, Json(json!({ "error": message }))).into_response()
    }
}

/// Log a provider failure and turn it into a 500
fn provider_error(action: &'static str) -> impl FnOnce(anyhow::Error) -> ApiError {
    move |e| {
        tracing::error!("API error {}: {:#}", action, e);
        ApiError::Provider(e)
    }
}

/// Non-empty parameter value
fn present(value: &Option<String>) -> Option<&str> {
    value.as_deref().filter(|v| !v.is_empty())
}

fn parse_body(body: &Bytes) -> Result<Value, ApiError> {
    serde_json::from_slice(body).map_err(|e| ApiError::BadRequest(format!("Invalid JSON body: {}", e)))
}

/// First field that is absent or null
fn require_fields(data: &Value, fields: &[&str]) -> Result<(), ApiError> {
    for field in fields {
        if data.get(*field).map_or(true, Value::is_null) {
            return Err(ApiError::BadRequest(format!("{} is required", field)));
        }
    }
    Ok(())
}

fn decode<T: DeserializeOwned>(data: Value) -> Result<T, ApiError> {
    serde_json::from_value(data).map_err(|e| ApiError::BadRequest(format!("Invalid request body: {}", e)))
}

fn parse_time(value: &str) -> Result<chrono::DateTime<chrono::Utc>, ApiError> {
    query::parse_timestamp(value).map_err(|e| ApiError::BadRequest(e.to_string()))
}

/// Build the API router
pub fn router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/", get(dashboard))
        .route("/health", get(health))
        .route("/api/auth-info", get(auth_info))
        .route("/api/compartments", get(list_compartments))
        .route("/api/regions", get(list_regions))
        .route("/api/namespaces", get(list_namespaces))
        .route("/api/resource-groups", get(list_resource_groups))
        .route("/api/metrics", get(list_metrics))
        .route("/api/dimensions", get(list_dimensions))
        .route("/api/dimension-values", get(list_dimension_values))
        .route("/api/query", post(query_metrics))
        .route("/api/query-multiple", post(query_multiple))
        .route("/api/query-unified", post(query_unified))
        .route("/api/common-namespaces", get(common_namespaces))
        .route("/api/query-options", get(query_options))
        .with_state(state)
        .layer(TraceLayer::new_for_http())
        .layer(cors)
}

/// Serve the API on an already bound listener
pub async fn serve(listener: TcpListener, state: AppState) -> Result<()> {
    tracing::info!("Listening on {}", listener.local_addr()?);
    axum::serve(listener, router(state)).await?;
    Ok(())
}

async fn dashboard() -> Html<&'static str> {
    Html(DASHBOARD_PAGE)
}

async fn health() -> Json<Value> {
    Json(json!({ "status": "ok", "version": crate::VERSION }))
}

async fn auth_info(State(state): State<AppState>) -> Json<Value> {
    Json(json!(state.manager.auth_info()))
}

async fn list_compartments(State(state): State<AppState>) -> Result<Json<Value>, ApiError> {
    let client = state.default_client().await?;
    let compartments = client
        .list_compartments()
        .await
        .map_err(provider_error("listing compartments"))?;
    state.directory.record(&compartments).await;
    Ok(Json(json!({ "compartments": compartments })))
}

async fn list_regions(State(state): State<AppState>) -> Json<Value> {
    let regions = state.manager.available_regions().await;
    Json(json!({
        "regions": regions,
        "current_region": state.manager.default_region(),
    }))
}

#[derive(Debug, Deserialize)]
struct DiscoveryParams {
    compartment_id: Option<String>,
    namespace: Option<String>,
    resource_group: Option<String>,
    metric_name: Option<String>,
}

impl DiscoveryParams {
    fn compartment_and_namespace(&self) -> Result<(&str, &str), ApiError> {
        match (present(&self.compartment_id), present(&self.namespace)) {
            (Some(compartment), Some(namespace)) => Ok((compartment, namespace)),
            _ => Err(ApiError::BadRequest(
                "compartment_id and namespace are required".to_string(),
            )),
        }
    }
}

async fn list_namespaces(
    State(state): State<AppState>,
    Query(params): Query<DiscoveryParams>,
) -> Result<Json<Value>, ApiError> {
    let compartment = present(&params.compartment_id)
        .ok_or_else(|| ApiError::BadRequest("compartment_id is required".to_string()))?;

    let client = state.default_client().await?;
    let namespaces = client
        .list_namespaces(compartment)
        .await
        .map_err(provider_error("listing namespaces"))?;
    Ok(Json(json!({ "namespaces": namespaces })))
}

async fn list_resource_groups(
    State(state): State<AppState>,
    Query(params): Query<DiscoveryParams>,
) -> Result<Json<Value>, ApiError> {
    let (compartment, namespace) = params.compartment_and_namespace()?;

    let client = state.default_client().await?;
    let groups = client
        .list_resource_groups(compartment, namespace)
        .await
        .map_err(provider_error("listing resource groups"))?;
    Ok(Json(json!({ "resource_groups": groups })))
}

async fn list_metrics(
    State(state): State<AppState>,
    Query(params): Query<DiscoveryParams>,
) -> Result<Json<Value>, ApiError> {
    let (compartment, namespace) = params.compartment_and_namespace()?;

    let client = state.default_client().await?;
    let metrics = client
        .list_metrics(compartment, namespace, present(&params.resource_group))
        .await
        .map_err(provider_error("listing metrics"))?;
    Ok(Json(json!({ "metrics": metrics })))
}

async fn list_dimensions(
    State(state): State<AppState>,
    Query(params): Query<DiscoveryParams>,
) -> Result<Json<Value>, ApiError> {
    let (compartment, namespace) = params.compartment_and_namespace()?;

    let client = state.default_client().await?;
    let dimensions = client
        .list_dimensions(compartment, namespace, present(&params.metric_name))
        .await
        .map_err(provider_error("listing dimensions"))?;
    Ok(Json(json!({ "dimensions": dimensions })))
}

async fn list_dimension_values(
    State(state): State<AppState>,
    Query(params): Query<HashMap<String, String>>,
) -> Result<Json<Value>, ApiError> {
    let param = |name: &str| params.get(name).map(String::as_str).filter(|v| !v.is_empty());
    let (Some(compartment), Some(namespace), Some(dimension)) =
        (param("compartment_id"), param("namespace"), param("dimension_name"))
    else {
        return Err(ApiError::BadRequest(
            "compartment_id, namespace, and dimension_name are required".to_string(),
        ));
    };

    let filters: BTreeMap<String, String> = params
        .iter()
        .filter_map(|(key, value)| {
            key.strip_prefix(FILTER_PREFIX)
                .map(|dimension| (dimension.to_string(), value.clone()))
        })
        .collect();

    let client = state.default_client().await?;
    let values = client
        .list_dimension_values(compartment, namespace, dimension, param("metric_name"), &filters)
        .await
        .map_err(provider_error("listing dimension values"))?;
    Ok(Json(json!({ "values": values })))
}

#[derive(Debug, Deserialize)]
struct QueryRequest {
    compartment_id: String,
    namespace: String,
    query: String,
    start_time: String,
    end_time: String,
    #[serde(default)]
    resolution: Option<String>,
}

async fn query_metrics(State(state): State<AppState>, body: Bytes) -> Result<Json<Value>, ApiError> {
    let data = parse_body(&body)?;
    require_fields(&data, &["compartment_id", "namespace", "query", "start_time", "end_time"])?;
    let request: QueryRequest = decode(data)?;

    let query = MetricQuery {
        namespace: request.namespace,
        query: request.query,
        start_time: parse_time(&request.start_time)?,
        end_time: parse_time(&request.end_time)?,
        resolution: request.resolution,
    };

    let client = state.default_client().await?;
    let result = query
        .run(&client, &request.compartment_id)
        .await
        .map_err(provider_error("querying metrics"))?;
    Ok(Json(json!(result)))
}

async fn query_multiple(State(state): State<AppState>, body: Bytes) -> Result<Json<Value>, ApiError> {
    let data = parse_body(&body)?;
    let queries = match data.get("queries") {
        Some(Value::Array(items)) if !items.is_empty() => items,
        _ => return Err(ApiError::BadRequest("queries array is required".to_string())),
    };

    let client = state.default_client().await?;
    let outcome = query::run_batch(&client, queries).await;
    Ok(Json(json!(outcome)))
}

#[derive(Debug, Deserialize)]
struct UnifiedRequest {
    #[serde(default)]
    regions: Vec<Option<String>>,
    compartment_ids: Vec<String>,
    namespace: String,
    query: String,
    start_time: String,
    end_time: String,
    #[serde(default)]
    resolution: Option<String>,
}

async fn query_unified(State(state): State<AppState>, body: Bytes) -> Result<Json<Value>, ApiError> {
    let data = parse_body(&body)?;
    require_fields(&data, &["compartment_ids", "namespace", "query", "start_time", "end_time"])?;
    let request: UnifiedRequest = decode(data)?;

    if request.compartment_ids.is_empty() {
        return Err(ApiError::BadRequest(
            "At least one compartment_id is required".to_string(),
        ));
    }

    let unified = UnifiedQuery {
        regions: request.regions.into_iter().flatten().collect(),
        compartment_ids: request.compartment_ids,
        query: MetricQuery {
            namespace: request.namespace,
            query: request.query,
            start_time: parse_time(&request.start_time)?,
            end_time: parse_time(&request.end_time)?,
            resolution: request.resolution,
        },
    };

    let outcome = query::run_unified(&state.manager, &state.directory, &unified).await;
    Ok(Json(json!(outcome)))
}

async fn common_namespaces() -> Json<Value> {
    Json(json!({ "namespaces": catalog::common_namespaces() }))
}

async fn query_options() -> Json<Value> {
    Json(json!(catalog::query_options()))
}
