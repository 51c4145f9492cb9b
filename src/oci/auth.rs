//! OCI Authentication
//!
//! Resolves one of four credential strategies (config file API key,
//! instance principal, resource principal, session token) into a
//! [`Credentials`] value: region, tenancy and a request signer.

use super::federation::{fetch_instance_identity, FederationClient, METADATA_BASE_URL};
use super::signer::{jwt_claims, load_private_key, load_private_key_file, KeyId, RequestSigner};
use anyhow::{anyhow, bail, Context, Result};
use clap::ValueEnum;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Default location of the OCI CLI config file
pub const DEFAULT_CONFIG_FILE: &str = "~/.oci/config";

/// Default config profile
pub const DEFAULT_PROFILE: &str = "DEFAULT";

/// Supported authentication strategies
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "snake_case")]
pub enum AuthType {
    /// API key from the OCI config file
    #[value(name = "config_file")]
    ConfigFile,
    /// Compute instance identity
    #[value(name = "instance_principal")]
    InstancePrincipal,
    /// OCI Functions identity
    #[value(name = "resource_principal")]
    ResourcePrincipal,
    /// Delegated session token (CloudShell)
    #[value(name = "security_token")]
    SecurityToken,
}

impl AuthType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::ConfigFile => "config_file",
            Self::InstancePrincipal => "instance_principal",
            Self::ResourcePrincipal => "resource_principal",
            Self::SecurityToken => "security_token",
        }
    }

    /// Parse the `OCI_AUTH_TYPE` override, `None` when unset or unknown
    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_lowercase().as_str() {
            "config_file" => Some(Self::ConfigFile),
            "instance_principal" => Some(Self::InstancePrincipal),
            "resource_principal" => Some(Self::ResourcePrincipal),
            "security_token" => Some(Self::SecurityToken),
            _ => None,
        }
    }
}

impl std::fmt::Display for AuthType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Pick the auth strategy from an environment lookup.
///
/// Precedence: `OCI_CLI_AUTH=instance_principal`, then a resource principal
/// marker, then `OCI_CLI_AUTH=security_token` or a CloudShell marker, and
/// finally the config file.
pub fn detect_auth_type_from(lookup: impl Fn(&str) -> Option<String>) -> AuthType {
    let cli_auth = lookup("OCI_CLI_AUTH").unwrap_or_default().to_lowercase();
    let is_set = |key: &str| lookup(key).map(|v| !v.is_empty()).unwrap_or(false);

    if cli_auth == "instance_principal" {
        return AuthType::InstancePrincipal;
    }
    if is_set("OCI_RESOURCE_PRINCIPAL_VERSION") {
        return AuthType::ResourcePrincipal;
    }
    if cli_auth == "security_token" || is_set("OCI_CLI_CLOUD_SHELL") {
        return AuthType::SecurityToken;
    }
    AuthType::ConfigFile
}

/// Authentication inputs, resolved once at startup
#[derive(Debug, Clone)]
pub struct AuthSettings {
    /// Explicit strategy; detected from the environment when `None`
    pub auth_type: Option<AuthType>,
    pub config_file: PathBuf,
    pub profile: String,
    /// Overrides the region the strategy would otherwise report
    pub region: Option<String>,
}

impl Default for AuthSettings {
    fn default() -> Self {
        Self {
            auth_type: None,
            config_file: PathBuf::from(DEFAULT_CONFIG_FILE),
            profile: DEFAULT_PROFILE.to_string(),
            region: None,
        }
    }
}

/// Who we are authenticated as
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthInfo {
    pub auth_type: AuthType,
    pub tenancy_id: String,
    pub region: String,
}

/// Authenticated context shared by every client
#[derive(Clone)]
pub struct Credentials {
    pub info: AuthInfo,
    pub signer: Arc<RequestSigner>,
}

/// Resolve credentials for the configured strategy
pub async fn resolve_credentials(settings: &AuthSettings, http: &reqwest::Client) -> Result<Credentials> {
    let lookup = |key: &str| std::env::var(key).ok();
    let auth_type = settings
        .auth_type
        .unwrap_or_else(|| detect_auth_type_from(lookup));

    tracing::info!("Initializing OCI credentials with auth type: {}", auth_type);

    let mut credentials = match auth_type {
        AuthType::ConfigFile => from_config_file(settings, lookup)?,
        AuthType::SecurityToken => from_security_token(settings, lookup)?,
        AuthType::ResourcePrincipal => from_resource_principal(lookup)?,
        AuthType::InstancePrincipal => from_instance_principal(http, METADATA_BASE_URL).await?,
    };

    if let Some(region) = settings.region.as_ref().filter(|r| !r.is_empty()) {
        credentials.info.region = region.clone();
    }

    Ok(credentials)
}

/// API key authentication from the config file
pub fn from_config_file(settings: &AuthSettings, lookup: impl Fn(&str) -> Option<String>) -> Result<Credentials> {
    tracing::info!("Using Config File authentication");
    let profile = ConfigProfile::load(&settings.config_file, &settings.profile)?;

    let tenancy = profile
        .get("tenancy")
        .map(str::to_string)
        .or_else(|| tenancy_from_env(&lookup))
        .ok_or_else(|| profile.missing("tenancy"))?;
    let user = profile.require("user")?;
    let fingerprint = profile.require("fingerprint")?;
    let key_file = expand_home(profile.require("key_file")?);
    let region = profile.require("region")?;

    if profile.get("pass_phrase").is_some() {
        bail!("Encrypted private keys (pass_phrase) are not supported");
    }

    let key_pair = load_private_key_file(&key_file)?;

    Ok(Credentials {
        info: AuthInfo {
            auth_type: AuthType::ConfigFile,
            tenancy_id: tenancy.clone(),
            region: region.to_string(),
        },
        signer: Arc::new(RequestSigner::api_key(key_pair, &tenancy, user, fingerprint)),
    })
}

/// Session token authentication, falling back to the API key when the token
/// or its key is not on disk
pub fn from_security_token(settings: &AuthSettings, lookup: impl Fn(&str) -> Option<String>) -> Result<Credentials> {
    tracing::info!("Using Security Token authentication (CloudShell)");
    let profile = ConfigProfile::load(&settings.config_file, &settings.profile)?;

    let token_file = profile.get("security_token_file").map(expand_home);
    let key_file = profile.get("key_file").map(expand_home);

    let (Some(token_file), Some(key_file)) = (token_file, key_file) else {
        tracing::warn!("Security token not configured, falling back to config file auth");
        return from_config_file(settings, lookup);
    };
    if !token_file.exists() || !key_file.exists() {
        tracing::warn!("Security token not found, falling back to config file auth");
        return from_config_file(settings, lookup);
    }

    let token = std::fs::read_to_string(&token_file)
        .with_context(|| format!("Failed to read security token {}", token_file.display()))?;
    let key_pair = load_private_key_file(&key_file)?;

    let tenancy = profile
        .get("tenancy")
        .map(str::to_string)
        .or_else(|| tenancy_from_env(&lookup))
        .ok_or_else(|| profile.missing("tenancy"))?;
    let region = profile.require("region")?;

    Ok(Credentials {
        info: AuthInfo {
            auth_type: AuthType::SecurityToken,
            tenancy_id: tenancy,
            region: region.to_string(),
        },
        signer: Arc::new(RequestSigner::security_token(key_pair, token.trim())),
    })
}

/// Resource principal authentication from the function runtime environment
pub fn from_resource_principal(lookup: impl Fn(&str) -> Option<String>) -> Result<Credentials> {
    tracing::info!("Using Resource Principal authentication");

    let rpst = lookup("OCI_RESOURCE_PRINCIPAL_RPST")
        .ok_or_else(|| anyhow!("OCI_RESOURCE_PRINCIPAL_RPST is not set"))?;
    let private_pem = lookup("OCI_RESOURCE_PRINCIPAL_PRIVATE_PEM")
        .ok_or_else(|| anyhow!("OCI_RESOURCE_PRINCIPAL_PRIVATE_PEM is not set"))?;
    let region = lookup("OCI_RESOURCE_PRINCIPAL_REGION")
        .ok_or_else(|| anyhow!("OCI_RESOURCE_PRINCIPAL_REGION is not set"))?;

    if lookup("OCI_RESOURCE_PRINCIPAL_PRIVATE_PEM_PASSPHRASE").is_some() {
        bail!("Encrypted resource principal keys are not supported");
    }

    let token = value_or_file(&rpst)?;
    let pem = if private_pem.trim_start().starts_with("-----BEGIN") {
        private_pem
    } else {
        std::fs::read_to_string(expand_home(&private_pem))
            .with_context(|| format!("Failed to read resource principal key {}", private_pem))?
    };
    let key_pair = load_private_key(&pem)?;

    // The token names the tenancy it was issued in
    let tenancy = jwt_claims(&token)
        .ok()
        .and_then(|claims| claims.get("res_tenant").and_then(|v| v.as_str()).map(str::to_string))
        .or_else(|| tenancy_from_env(&lookup))
        .ok_or_else(|| {
            anyhow!("Could not determine tenancy ID. Set OCI_TENANCY or provide a resource principal token with a res_tenant claim")
        })?;

    Ok(Credentials {
        info: AuthInfo {
            auth_type: AuthType::ResourcePrincipal,
            tenancy_id: tenancy,
            region,
        },
        signer: Arc::new(RequestSigner::security_token(key_pair, &token)),
    })
}

/// Instance principal authentication via the metadata service
pub async fn from_instance_principal(http: &reqwest::Client, metadata_base: &str) -> Result<Credentials> {
    tracing::info!("Using Instance Principal authentication");

    let identity = fetch_instance_identity(http, metadata_base)
        .await
        .context("Failed to read instance identity")?;
    let info = AuthInfo {
        auth_type: AuthType::InstancePrincipal,
        tenancy_id: identity.tenancy_id.clone(),
        region: identity.region.clone(),
    };

    let key_pair = identity.key_pair.clone();
    let federation = Arc::new(FederationClient::new(http.clone(), identity));

    Ok(Credentials {
        info,
        signer: Arc::new(RequestSigner::new(key_pair, KeyId::Federated(federation))),
    })
}

fn tenancy_from_env(lookup: &impl Fn(&str) -> Option<String>) -> Option<String> {
    lookup("OCI_TENANCY")
        .or_else(|| lookup("OCI_CLI_TENANCY"))
        .filter(|t| !t.is_empty())
}

/// Inline value, or the contents of the file it names
fn value_or_file(value: &str) -> Result<String> {
    let path = expand_home(value);
    if path.is_file() {
        let content = std::fs::read_to_string(&path)
            .with_context(|| format!("Failed to read {}", path.display()))?;
        return Ok(content.trim().to_string());
    }
    Ok(value.trim().to_string())
}

/// Expand a leading `~` to the home directory
pub fn expand_home(path: impl AsRef<Path>) -> PathBuf {
    let path = path.as_ref();
    if let Ok(rest) = path.strip_prefix("~") {
        if let Some(home) = dirs::home_dir() {
            return home.join(rest);
        }
    }
    path.to_path_buf()
}

/// One profile of an OCI config file, with `DEFAULT` values inherited
#[derive(Debug, Clone)]
pub struct ConfigProfile {
    name: String,
    values: HashMap<String, String>,
}

impl ConfigProfile {
    /// Read a profile from an OCI config file
    pub fn load(path: &Path, profile: &str) -> Result<Self> {
        let path = expand_home(path);
        let content = std::fs::read_to_string(&path)
            .with_context(|| format!("Failed to read OCI config file {}", path.display()))?;
        Self::parse(&content, profile)
            .with_context(|| format!("Invalid OCI config file {}", path.display()))
    }

    /// Parse config file text and select a profile
    pub fn parse(content: &str, profile: &str) -> Result<Self> {
        let mut sections: HashMap<String, HashMap<String, String>> = HashMap::new();
        let mut current: Option<String> = None;

        for (line_no, line) in content.lines().enumerate() {
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') || line.starts_with(';') {
                continue;
            }
            if let Some(name) = line.strip_prefix('[').and_then(|l| l.strip_suffix(']')) {
                let name = name.trim().to_string();
                sections.entry(name.clone()).or_default();
                current = Some(name);
                continue;
            }
            let Some((key, value)) = line.split_once('=') else {
                bail!("Line {} is not a key=value pair", line_no + 1);
            };
            let Some(section) = current.as_ref() else {
                bail!("Line {} appears before any [profile] header", line_no + 1);
            };
            sections
                .entry(section.clone())
                .or_default()
                .insert(key.trim().to_string(), value.trim().to_string());
        }

        let mut values = sections.get(DEFAULT_PROFILE).cloned().unwrap_or_default();
        match sections.get(profile) {
            Some(selected) => values.extend(selected.clone()),
            None if profile == DEFAULT_PROFILE && !values.is_empty() => {}
            None => bail!("Config profile [{}] not found", profile),
        }

        Ok(Self {
            name: profile.to_string(),
            values,
        })
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.values.get(key).map(String::as_str).filter(|v| !v.is_empty())
    }

    pub fn require(&self, key: &str) -> Result<&str> {
        self.get(key).ok_or_else(|| self.missing(key))
    }

    fn missing(&self, key: &str) -> anyhow::Error {
        anyhow!("Missing required key '{}' in config profile [{}]", key, self.name)
    }
}
