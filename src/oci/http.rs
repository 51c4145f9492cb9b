//! HTTP utilities for OCI REST API calls

use super::signer::RequestSigner;
use anyhow::{Context, Result};
use reqwest::{Client, RequestBuilder};
use serde_json::Value;
use std::sync::Arc;

/// Maximum length of response body to log (to avoid logging sensitive data)
const MAX_LOG_BODY_LENGTH: usize = 200;

/// Pagination header returned by list operations
const NEXT_PAGE_HEADER: &str = "opc-next-page";

/// Request id header echoed back by OCI services
const REQUEST_ID_HEADER: &str = "opc-request-id";

/// Sanitize response body for logging
/// Truncates long responses and strips control characters
fn sanitize_for_log(body: &str) -> String {
    let truncated = if body.len() > MAX_LOG_BODY_LENGTH {
        let cut = (0..=MAX_LOG_BODY_LENGTH)
            .rev()
            .find(|i| body.is_char_boundary(*i))
            .unwrap_or(0);
        format!("{}... [truncated, {} bytes total]", &body[..cut], body.len())
    } else {
        body.to_string()
    };

    truncated.replace(|c: char| !c.is_ascii_graphic() && c != ' ', "")
}

/// Build the shared reqwest client
pub fn build_http_client() -> Result<Client> {
    Client::builder()
        .user_agent(format!("ocimetrics/{}", crate::VERSION))
        .build()
        .context("Failed to create HTTP client")
}

/// Error returned by an OCI service
#[derive(Debug, Clone)]
pub struct ServiceError {
    pub status: u16,
    pub code: String,
    pub message: String,
    pub opc_request_id: Option<String>,
}

impl std::fmt::Display for ServiceError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} {}: {}", self.status, self.code, self.message)?;
        if let Some(id) = &self.opc_request_id {
            write!(f, " (opc-request-id: {})", id)?;
        }
        Ok(())
    }
}

impl std::error::Error for ServiceError {}

/// Decoded response of a successful call
#[derive(Debug)]
pub struct ApiResponse {
    pub body: Value,
    /// Token for the next page of a list operation
    pub next_page: Option<String>,
}

/// HTTP client wrapper that signs every call
#[derive(Clone)]
pub struct OciHttpClient {
    client: Client,
    signer: Arc<RequestSigner>,
}

impl OciHttpClient {
    pub fn new(client: Client, signer: Arc<RequestSigner>) -> Self {
        Self { client, signer }
    }

    /// Make a GET request to an OCI API
    pub async fn get(&self, url: &str, query: &[(&str, String)]) -> Result<ApiResponse> {
        tracing::debug!("GET {}", url);
        self.execute(self.client.get(url).query(query)).await
    }

    /// Make a POST request with a JSON body to an OCI API
    pub async fn post(&self, url: &str, query: &[(&str, String)], body: &Value) -> Result<ApiResponse> {
        tracing::debug!("POST {}", url);
        self.execute(self.client.post(url).query(query).json(body))
            .await
    }

    async fn execute(&self, builder: RequestBuilder) -> Result<ApiResponse> {
        let mut request = builder
            .header(REQUEST_ID_HEADER, uuid::Uuid::new_v4().simple().to_string())
            .build()
            .context("Failed to build request")?;
        self.signer.sign(&mut request).await?;

        let response = self
            .client
            .execute(request)
            .await
            .context("Failed to send request")?;

        let status = response.status();
        let header = |name: &str| {
            response
                .headers()
                .get(name)
                .and_then(|v| v.to_str().ok())
                .map(str::to_string)
        };
        let next_page = header(NEXT_PAGE_HEADER);
        let request_id = header(REQUEST_ID_HEADER);

        let body = response
            .text()
            .await
            .context("Failed to read response body")?;

        if !status.is_success() {
            // Security: Only log sanitized/truncated error body to avoid leaking sensitive data
            tracing::error!("API error: {} - {}", status, sanitize_for_log(&body));
            return Err(service_error(status.as_u16(), &body, request_id).into());
        }

        if body.is_empty() {
            return Ok(ApiResponse {
                body: Value::Null,
                next_page,
            });
        }

        let body = serde_json::from_str(&body).context("Failed to parse response JSON")?;
        Ok(ApiResponse { body, next_page })
    }
}

/// Decode the `{code, message}` error body OCI services return
fn service_error(status: u16, body: &str, opc_request_id: Option<String>) -> ServiceError {
    let parsed: Option<Value> = serde_json::from_str(body).ok();
    let field = |name: &str| {
        parsed
            .as_ref()
            .and_then(|v| v.get(name))
            .and_then(|v| v.as_str())
            .map(str::to_string)
    };

    ServiceError {
        status,
        code: field("code").unwrap_or_else(|| "Unknown".to_string()),
        message: field("message").unwrap_or_else(|| "API request failed".to_string()),
        opc_request_id,
    }
}

/// Format an OCI API error for terminal display
pub fn format_oci_error(error: &anyhow::Error) -> String {
    let Some(service) = error.downcast_ref::<ServiceError>() else {
        let sanitized = error
            .to_string()
            .chars()
            .filter(|c| c.is_ascii_graphic() || *c == ' ')
            .take(120)
            .collect::<String>();
        return sanitized;
    };

    let hint = match service.status {
        401 => "Authentication failed. Check your OCI config or session token.",
        403 => "Permission denied. Check your IAM policies.",
        404 => "Resource not found or not authorized.",
        429 => "Rate limit exceeded. Please try again later.",
        400 => "Invalid request. Check the query and its parameters.",
        500..=599 => "OCI service temporarily unavailable. Please try again.",
        _ => "Request failed.",
    };

    format!("{} ({} {})", hint, service.status, service.message)
}
