//! OCI Request Signing
//!
//! Implements the OCI HTTP Signature scheme (version 1, `rsa-sha256`).
//! Every request to an OCI API carries an `Authorization` header whose
//! signature covers a fixed list of headers plus the request target.

use super::federation::FederationClient;
use anyhow::{anyhow, bail, Context, Result};
use base64::engine::general_purpose::{STANDARD, URL_SAFE_NO_PAD};
use base64::Engine as _;
use chrono::Utc;
use reqwest::header::{HeaderName, HeaderValue, CONTENT_TYPE};
use reqwest::{Method, Request};
use ring::digest::{digest, SHA256};
use ring::rand::SystemRandom;
use ring::signature::{KeyPair, RsaKeyPair, RSA_PKCS1_SHA256};
use serde_json::Value;
use std::sync::Arc;

/// Headers signed on every request
const GENERIC_HEADERS: &[&str] = &["date", "(request-target)", "host"];

/// Additional headers signed on requests that carry a body
const BODY_HEADERS: &[&str] = &["content-length", "content-type", "x-content-sha256"];

/// Where the signer gets its key id from
#[derive(Clone)]
pub enum KeyId {
    /// Fixed key id (`tenancy/user/fingerprint` or `ST$<token>`)
    Static(String),
    /// Session token obtained from the instance principal federation service
    Federated(Arc<FederationClient>),
}

/// Signs outgoing requests with an RSA private key
#[derive(Clone)]
pub struct RequestSigner {
    key_pair: Arc<RsaKeyPair>,
    key_id: KeyId,
}

impl RequestSigner {
    pub fn new(key_pair: Arc<RsaKeyPair>, key_id: KeyId) -> Self {
        Self { key_pair, key_id }
    }

    /// API key signer: key id is `tenancy/user/fingerprint`
    pub fn api_key(key_pair: RsaKeyPair, tenancy: &str, user: &str, fingerprint: &str) -> Self {
        Self::new(
            Arc::new(key_pair),
            KeyId::Static(format!("{}/{}/{}", tenancy, user, fingerprint)),
        )
    }

    /// Session token signer: key id is `ST$<token>`
    pub fn security_token(key_pair: RsaKeyPair, token: &str) -> Self {
        Self::new(Arc::new(key_pair), KeyId::Static(format!("ST${}", token)))
    }

    /// Resolve the current key id, refreshing federated tokens when needed
    pub async fn key_id(&self) -> Result<String> {
        match &self.key_id {
            KeyId::Static(id) => Ok(id.clone()),
            KeyId::Federated(federation) => Ok(format!("ST${}", federation.token().await?)),
        }
    }

    /// Sign a fully built request in place
    pub async fn sign(&self, request: &mut Request) -> Result<()> {
        let key_id = self.key_id().await?;
        apply_signature(&self.key_pair, &key_id, request)
    }
}

/// Add the signing headers and the `Authorization` header to a request.
///
/// Synchronous so the federation client can sign its own token requests
/// with the leaf certificate key without going through [`RequestSigner`].
pub fn apply_signature(key_pair: &RsaKeyPair, key_id: &str, request: &mut Request) -> Result<()> {
    let date = Utc::now().format("%a, %d %b %Y %H:%M:%S GMT").to_string();
    let host = host_header(request.url())?;
    let target = request_target(request.method(), request.url());

    set_header(request, "date", &date)?;
    set_header(request, "host", &host)?;

    let mut signed: Vec<(&str, String)> = vec![
        ("date", date),
        ("(request-target)", target),
        ("host", host),
    ];
    let mut header_names: Vec<&str> = GENERIC_HEADERS.to_vec();

    if signs_body(request.method()) {
        let body = request
            .body()
            .and_then(|b| b.as_bytes())
            .unwrap_or_default()
            .to_vec();
        let content_sha = STANDARD.encode(digest(&SHA256, &body));
        let content_type = request
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .unwrap_or("application/json")
            .to_string();

        set_header(request, "content-length", &body.len().to_string())?;
        set_header(request, "content-type", &content_type)?;
        set_header(request, "x-content-sha256", &content_sha)?;

        signed.push(("content-length", body.len().to_string()));
        signed.push(("content-type", content_type));
        signed.push(("x-content-sha256", content_sha));
        header_names.extend_from_slice(BODY_HEADERS);
    }

    let signature = sign_bytes(key_pair, signing_string(&signed).as_bytes())?;
    let authorization = format!(
        "Signature version=\"1\",keyId=\"{}\",algorithm=\"rsa-sha256\",headers=\"{}\",signature=\"{}\"",
        key_id,
        header_names.join(" "),
        signature
    );
    set_header(request, "authorization", &authorization)?;

    Ok(())
}

fn signs_body(method: &Method) -> bool {
    matches!(*method, Method::POST | Method::PUT | Method::PATCH)
}

fn set_header(request: &mut Request, name: &'static str, value: &str) -> Result<()> {
    let value = HeaderValue::from_str(value).with_context(|| format!("Invalid value for header {}", name))?;
    request
        .headers_mut()
        .insert(HeaderName::from_static(name), value);
    Ok(())
}

/// `host` header value, including the port when it is not the scheme default
pub fn host_header(url: &url::Url) -> Result<String> {
    let host = url
        .host_str()
        .ok_or_else(|| anyhow!("Request URL has no host: {}", url))?;
    Ok(match url.port() {
        Some(port) => format!("{}:{}", host, port),
        None => host.to_string(),
    })
}

/// `(request-target)` pseudo header: lowercase method, path and query
pub fn request_target(method: &Method, url: &url::Url) -> String {
    let mut target = format!("{} {}", method.as_str().to_lowercase(), url.path());
    if let Some(query) = url.query() {
        target.push('?');
        target.push_str(query);
    }
    target
}

/// Join `name: value` lines in signing order
pub fn signing_string(headers: &[(&str, String)]) -> String {
    headers
        .iter()
        .map(|(name, value)| format!("{}: {}", name, value))
        .collect::<Vec<_>>()
        .join("\n")
}

/// RSA PKCS#1 v1.5 SHA-256 signature, base64 encoded
pub fn sign_bytes(key_pair: &RsaKeyPair, message: &[u8]) -> Result<String> {
    let rng = SystemRandom::new();
    let mut signature = vec![0u8; key_pair.public().modulus_len()];
    key_pair
        .sign(&RSA_PKCS1_SHA256, &rng, message, &mut signature)
        .map_err(|_| anyhow!("Failed to sign request"))?;
    Ok(STANDARD.encode(signature))
}

/// Split a PEM document into `(label, der)` blocks
pub fn pem_blocks(pem: &str) -> Result<Vec<(String, Vec<u8>)>> {
    let mut blocks = Vec::new();
    let mut current: Option<(String, String)> = None;

    for line in pem.lines() {
        let line = line.trim();
        if let Some(label) = line
            .strip_prefix("-----BEGIN ")
            .and_then(|rest| rest.strip_suffix("-----"))
        {
            current = Some((label.to_string(), String::new()));
        } else if line.starts_with("-----END ") {
            if let Some((label, body)) = current.take() {
                let der = STANDARD
                    .decode(body.as_bytes())
                    .with_context(|| format!("Invalid base64 in PEM block {}", label))?;
                blocks.push((label, der));
            }
        } else if let Some((_, body)) = current.as_mut() {
            // Encapsulated headers such as Proc-Type are kept out of the body
            if line.contains(':') {
                if line.starts_with("Proc-Type") && line.contains("ENCRYPTED") {
                    bail!("Encrypted private keys are not supported");
                }
                continue;
            }
            body.push_str(line);
        }
    }

    Ok(blocks)
}

/// Load an RSA private key from PKCS#1 or PKCS#8 PEM text
pub fn load_private_key(pem: &str) -> Result<RsaKeyPair> {
    let blocks = pem_blocks(pem)?;
    let Some((label, der)) = blocks.into_iter().next() else {
        bail!("No PEM block found in private key");
    };

    match label.as_str() {
        "RSA PRIVATE KEY" => {
            RsaKeyPair::from_der(&der).map_err(|e| anyhow!("Invalid RSA private key: {}", e))
        }
        "PRIVATE KEY" => {
            RsaKeyPair::from_pkcs8(&der).map_err(|e| anyhow!("Invalid PKCS#8 private key: {}", e))
        }
        "ENCRYPTED PRIVATE KEY" => bail!("Encrypted private keys are not supported"),
        other => bail!("Unsupported private key type: {}", other),
    }
}

/// Load an RSA private key from a file on disk
pub fn load_private_key_file(path: &std::path::Path) -> Result<RsaKeyPair> {
    let pem = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read private key {}", path.display()))?;
    load_private_key(&pem)
}

/// Public half of a key pair as a DER SubjectPublicKeyInfo
pub fn public_key_spki(key_pair: &RsaKeyPair) -> Vec<u8> {
    // AlgorithmIdentifier { rsaEncryption, NULL }
    const RSA_ALGORITHM: &[u8] = &[
        0x30, 0x0d, 0x06, 0x09, 0x2a, 0x86, 0x48, 0x86, 0xf7, 0x0d, 0x01, 0x01, 0x01, 0x05, 0x00,
    ];

    let pkcs1 = key_pair.public_key().as_ref();
    let mut bit_string = vec![0x00];
    bit_string.extend_from_slice(pkcs1);

    let mut inner = RSA_ALGORITHM.to_vec();
    inner.extend(der_tlv(0x03, &bit_string));
    der_tlv(0x30, &inner)
}

fn der_tlv(tag: u8, content: &[u8]) -> Vec<u8> {
    let mut out = vec![tag];
    let len = content.len();
    if len < 0x80 {
        out.push(len as u8);
    } else {
        let bytes: Vec<u8> = len
            .to_be_bytes()
            .iter()
            .copied()
            .skip_while(|b| *b == 0)
            .collect();
        out.push(0x80 | bytes.len() as u8);
        out.extend(bytes);
    }
    out.extend_from_slice(content);
    out
}

/// Decode the claims section of a JWT without verifying it
pub fn jwt_claims(token: &str) -> Result<Value> {
    let payload = token
        .split('.')
        .nth(1)
        .ok_or_else(|| anyhow!("Malformed token: missing claims section"))?;
    let bytes = URL_SAFE_NO_PAD
        .decode(payload.trim_end_matches('='))
        .context("Malformed token: claims are not base64url")?;
    serde_json::from_slice(&bytes).context("Malformed token: claims are not JSON")
}
