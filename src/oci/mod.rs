//! OCI API interaction module
//!
//! This module provides the core functionality for talking to Oracle Cloud
//! Infrastructure: authentication, request signing, the signed HTTP client
//! and the Identity/Monitoring API calls.
//!
//! # Module Structure
//!
//! - [`auth`] - Auth strategy detection and credential resolution
//! - [`signer`] - OCI HTTP Signature request signing
//! - [`federation`] - Instance principal session tokens
//! - [`http`] - Signed HTTP client and service errors
//! - [`api`] - Provider API seam and its REST implementation
//! - [`models`] - Wire models
//!
//! # Example
//!
//! ```ignore
//! use ocimetrics::oci::{api::OciConnector, api::ApiConnector, auth, http};
//!
//! async fn example() -> anyhow::Result<()> {
//!     let client = http::build_http_client()?;
//!     let credentials = auth::resolve_credentials(&Default::default(), &client).await?;
//!     let connector = OciConnector::new(client, credentials.signer.clone());
//!     let api = connector.connect(&credentials.info.region)?;
//!     let regions = api.list_region_subscriptions(&credentials.info.tenancy_id).await?;
//!     Ok(())
//! }
//! ```

pub mod api;
pub mod auth;
pub mod federation;
pub mod http;
pub mod models;
pub mod signer;
