//! Instance Principal Federation
//!
//! Compute instances authenticate with a certificate issued by the instance
//! metadata service. The certificate is exchanged for a short-lived session
//! token at the regional auth service; the token is cached until shortly
//! before it expires.

use super::signer::{apply_signature, jwt_claims, pem_blocks, load_private_key, public_key_spki};
use anyhow::{anyhow, bail, Context, Result};
use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use reqwest::Client;
use ring::digest::{digest, SHA1_FOR_LEGACY_USE_ONLY};
use ring::signature::RsaKeyPair;
use serde_json::json;
use std::sync::Arc;
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};
use tokio::sync::RwLock;

/// Instance metadata service (v2)
pub const METADATA_BASE_URL: &str = "http://169.254.169.254/opc/v2";

/// Refresh tokens this much before they actually expire
const TOKEN_EXPIRY_BUFFER: Duration = Duration::from_secs(60);

/// TTL used when a token carries no readable `exp` claim
const DEFAULT_TOKEN_TTL: Duration = Duration::from_secs(20 * 60);

/// Certificate material and placement of the current instance
pub struct InstanceIdentity {
    pub region: String,
    pub tenancy_id: String,
    /// Leaf certificate DER, base64 without PEM armour
    pub certificate: String,
    pub intermediates: Vec<String>,
    pub fingerprint: String,
    pub key_pair: Arc<RsaKeyPair>,
}

impl InstanceIdentity {
    /// Build the identity from the PEM documents served by the metadata service
    pub fn from_pem(region: &str, cert_pem: &str, key_pem: &str, intermediate_pem: &str) -> Result<Self> {
        let (_, leaf_der) = pem_blocks(cert_pem)?
            .into_iter()
            .find(|(label, _)| label == "CERTIFICATE")
            .ok_or_else(|| anyhow!("Instance certificate is missing"))?;

        let intermediates = pem_blocks(intermediate_pem)?
            .into_iter()
            .filter(|(label, _)| label == "CERTIFICATE")
            .map(|(_, der)| STANDARD.encode(der))
            .collect();

        let tenancy_id = tenancy_from_certificate(&leaf_der)
            .ok_or_else(|| anyhow!("Instance certificate does not name a tenancy"))?;

        Ok(Self {
            region: region.to_string(),
            tenancy_id,
            certificate: STANDARD.encode(&leaf_der),
            intermediates,
            fingerprint: certificate_fingerprint(&leaf_der),
            key_pair: Arc::new(load_private_key(key_pem)?),
        })
    }
}

/// Read the identity of this instance from the metadata service
pub async fn fetch_instance_identity(http: &Client, metadata_base: &str) -> Result<InstanceIdentity> {
    let region = metadata_get(http, metadata_base, "instance/canonicalRegionName").await?;
    let cert = metadata_get(http, metadata_base, "identity/cert.pem").await?;
    let key = metadata_get(http, metadata_base, "identity/key.pem").await?;
    let intermediate = metadata_get(http, metadata_base, "identity/intermediate.pem").await?;

    InstanceIdentity::from_pem(region.trim(), &cert, &key, &intermediate)
}

async fn metadata_get(http: &Client, base: &str, path: &str) -> Result<String> {
    let url = format!("{}/{}", base.trim_end_matches('/'), path);
    tracing::debug!("GET {}", url);

    let response = http
        .get(&url)
        .bearer_auth("Oracle")
        .send()
        .await
        .with_context(|| format!("Failed to reach instance metadata service at {}", url))?;

    let status = response.status();
    if !status.is_success() {
        bail!("Instance metadata request {} failed: {}", path, status);
    }

    response
        .text()
        .await
        .context("Failed to read instance metadata response")
}

/// Subject attribute prefix carrying the tenancy OCID
const TENANT_PREFIX: &str = "opc-tenant:";

/// ASN.1 string types a subject attribute value may use
const STRING_TAGS: &[u8] = &[0x0c, 0x13, 0x14, 0x16];

/// Pull `opc-tenant:<ocid>` out of the certificate subject.
///
/// The value is sized by its DER header; the bytes that follow belong to the
/// next attribute.
pub fn tenancy_from_certificate(der: &[u8]) -> Option<String> {
    der.windows(TENANT_PREFIX.len())
        .enumerate()
        .filter(|(_, window)| *window == TENANT_PREFIX.as_bytes())
        .find_map(|(start, _)| {
            let tenancy = attribute_value(der, start)?.strip_prefix(TENANT_PREFIX)?;
            let valid = !tenancy.is_empty()
                && tenancy
                    .chars()
                    .all(|c| c.is_ascii_alphanumeric() || c == '.' || c == '_' || c == '-');
            valid.then(|| tenancy.to_string())
        })
}

/// String value starting at `start`, read with the tag and length just before it
fn attribute_value(der: &[u8], start: usize) -> Option<&str> {
    let (tag, len) = match der.get(..start)? {
        [.., tag, len] if *len < 0x80 => (*tag, usize::from(*len)),
        [.., tag, 0x81, len] => (*tag, usize::from(*len)),
        _ => return None,
    };
    if !STRING_TAGS.contains(&tag) {
        return None;
    }
    let value = der.get(start..start.checked_add(len)?)?;
    std::str::from_utf8(value).ok()
}

/// SHA-1 fingerprint of a certificate as colon separated uppercase hex
pub fn certificate_fingerprint(der: &[u8]) -> String {
    digest(&SHA1_FOR_LEGACY_USE_ONLY, der)
        .as_ref()
        .iter()
        .map(|b| format!("{:02X}", b))
        .collect::<Vec<_>>()
        .join(":")
}

#[derive(Clone)]
struct CachedToken {
    token: String,
    expires_at: Instant,
}

impl CachedToken {
    fn is_valid(&self) -> bool {
        Instant::now() < self.expires_at
    }
}

/// Exchanges the instance certificate for session tokens
pub struct FederationClient {
    http: Client,
    endpoint: String,
    identity: InstanceIdentity,
    token_cache: RwLock<Option<CachedToken>>,
}

impl FederationClient {
    pub fn new(http: Client, identity: InstanceIdentity) -> Self {
        let endpoint = format!("https://auth.{}.oraclecloud.com/v1/x509", identity.region);
        Self::with_endpoint(http, identity, &endpoint)
    }

    pub fn with_endpoint(http: Client, identity: InstanceIdentity, endpoint: &str) -> Self {
        Self {
            http,
            endpoint: endpoint.to_string(),
            identity,
            token_cache: RwLock::new(None),
        }
    }

    pub fn identity(&self) -> &InstanceIdentity {
        &self.identity
    }

    /// Current session token, fetching a new one when the cached token expired
    pub async fn token(&self) -> Result<String> {
        {
            let cache = self.token_cache.read().await;
            if let Some(cached) = cache.as_ref() {
                if cached.is_valid() {
                    return Ok(cached.token.clone());
                }
                tracing::debug!("Cached session token expired, requesting a new one");
            }
        }

        let mut cache = self.token_cache.write().await;
        // Another request may have refreshed it while we waited for the lock
        if let Some(cached) = cache.as_ref() {
            if cached.is_valid() {
                return Ok(cached.token.clone());
            }
        }

        let token = self.request_token().await?;
        let expires_at = Instant::now() + token_ttl(&token);
        *cache = Some(CachedToken {
            token: token.clone(),
            expires_at,
        });

        tracing::debug!("New session token cached");
        Ok(token)
    }

    async fn request_token(&self) -> Result<String> {
        let body = json!({
            "certificate": self.identity.certificate,
            "publicKey": STANDARD.encode(public_key_spki(&self.identity.key_pair)),
            "intermediateCertificates": self.identity.intermediates,
        });

        let mut request = self
            .http
            .post(&self.endpoint)
            .json(&body)
            .build()
            .context("Failed to build federation request")?;

        let key_id = format!(
            "{}/fed-x509/{}",
            self.identity.tenancy_id, self.identity.fingerprint
        );
        apply_signature(&self.identity.key_pair, &key_id, &mut request)?;

        let response = self
            .http
            .execute(request)
            .await
            .context("Failed to reach federation endpoint")?;

        let status = response.status();
        let payload: serde_json::Value = response
            .json()
            .await
            .context("Failed to parse federation response")?;

        if !status.is_success() {
            tracing::error!("Federation request failed: {}", status);
            bail!(
                "Federation request failed: {} {}",
                status,
                payload.get("message").and_then(|m| m.as_str()).unwrap_or("")
            );
        }

        payload
            .get("token")
            .and_then(|t| t.as_str())
            .map(str::to_string)
            .ok_or_else(|| anyhow!("Federation response contains no token"))
    }
}

/// Remaining lifetime of a token, less the refresh buffer
fn token_ttl(token: &str) -> Duration {
    let now = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0);

    jwt_claims(token)
        .ok()
        .and_then(|claims| claims.get("exp").and_then(|e| e.as_u64()))
        .map(|exp| Duration::from_secs(exp.saturating_sub(now)))
        .unwrap_or(DEFAULT_TOKEN_TTL)
        .saturating_sub(TOKEN_EXPIRY_BUFFER)
}
