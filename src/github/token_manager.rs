//! Token management for GitHub App authentication.
//!
//! GitHub Apps use two types of authentication:
//! 1. App JWT - Short-lived JWT signed with the app's private key (for app-level operations)
//! 2. Installation Access Token - Token for a specific installation (for repo operations)
//!
//! [`AppClient`] authenticates with the former in order to list installations
//! and mint the latter.

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use jsonwebtoken::{encode, Algorithm, EncodingKey, Header};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use tracing::debug;

use super::api_client::{authorized, read_json, Repository, DEFAULT_API_URL, DEFAULT_USER_AGENT};
use super::{AppsApi, ListOptions, Page};
use crate::config::GitHubConfig;

/// JWT claims for GitHub App authentication.
/// GitHub requires: iat (issued at), exp (expiration), iss (issuer = app_id)
#[derive(Debug, Serialize, Deserialize)]
struct GitHubAppClaims {
    /// Issued at time (Unix timestamp)
    iat: i64,
    /// Expiration time (Unix timestamp) - max 10 minutes
    exp: i64,
    /// Issuer - the GitHub App ID
    iss: String,
}

/// Generate a JWT for GitHub App authentication.
///
/// The JWT is signed with RS256 (RSA-SHA256) using the app's private key.
/// It's valid for 10 minutes (GitHub's maximum).
///
/// # Arguments
/// * `app_id` - The GitHub App ID (numeric)
/// * `private_key_pem` - The private key in PEM format
///
/// # Example
/// ```ignore
/// let jwt = generate_app_jwt(12345, &private_key)?;
/// // Use: Authorization: Bearer {jwt}
/// ```
pub fn generate_app_jwt(app_id: u64, private_key_pem: &str) -> Result<String> {
    let encoding_key = parse_private_key(private_key_pem)?;
    sign_app_jwt(app_id, &encoding_key)
}

fn parse_private_key(private_key_pem: &str) -> Result<EncodingKey> {
    EncodingKey::from_rsa_pem(private_key_pem.as_bytes()).context("Failed to parse private key PEM")
}

fn sign_app_jwt(app_id: u64, encoding_key: &EncodingKey) -> Result<String> {
    let now = Utc::now();
    // Issue time: 60 seconds in the past to account for clock drift
    let iat = now - Duration::seconds(60);
    let exp = now + Duration::minutes(10);

    let claims = GitHubAppClaims {
        iat: iat.timestamp(),
        exp: exp.timestamp(),
        iss: app_id.to_string(),
    };

    encode(&Header::new(Algorithm::RS256), &claims, encoding_key).context("Failed to encode JWT")
}

/// Client authenticated as the GitHub App itself.
///
/// A fresh JWT is signed for every request so the client never holds an
/// expired credential.
#[derive(Clone)]
pub struct AppClient {
    app_id: u64,
    encoding_key: EncodingKey,
    api_url: String,
    user_agent: String,
    client: reqwest::Client,
}

impl AppClient {
    /// Create a client for `app_id`. Fails if the private key cannot be parsed.
    pub fn new(app_id: u64, private_key_pem: &str) -> Result<Self> {
        Ok(Self {
            app_id,
            encoding_key: parse_private_key(private_key_pem)?,
            api_url: DEFAULT_API_URL.to_string(),
            user_agent: DEFAULT_USER_AGENT.to_string(),
            client: reqwest::Client::new(),
        })
    }

    /// Build a client from configuration, reading the private key from disk.
    pub fn from_config(config: &GitHubConfig) -> Result<Self> {
        let app_id = config.app_id.context("GitHub App ID is not configured")?;
        let key_path = config
            .private_key_path
            .as_ref()
            .context("GitHub App private key path is not configured")?;
        let private_key = std::fs::read_to_string(key_path)
            .with_context(|| format!("Failed to read private key: {}", key_path.display()))?;

        Ok(Self::new(app_id, &private_key)?
            .with_api_url(&config.api_url)
            .with_user_agent(&config.user_agent))
    }

    /// Point the client at a different API root (GitHub Enterprise, tests).
    pub fn with_api_url(mut self, api_url: impl Into<String>) -> Self {
        self.api_url = api_url.into().trim_end_matches('/').to_string();
        self
    }

    pub fn with_user_agent(mut self, user_agent: impl Into<String>) -> Self {
        self.user_agent = user_agent.into();
        self
    }

    fn jwt(&self) -> Result<String> {
        sign_app_jwt(self.app_id, &self.encoding_key)
    }
}

#[async_trait]
impl AppsApi for AppClient {
    async fn list_installations(&self, opts: ListOptions) -> Result<Page<Installation>> {
        let url = format!(
            "{}/app/installations?per_page={}&page={}",
            self.api_url, opts.per_page, opts.page
        );
        debug!(page = opts.page, "Listing app installations");

        let request = authorized(self.client.get(&url), &self.jwt()?, &self.user_agent);
        let (items, next_page) = read_json::<Vec<Installation>>(request).await?;
        Ok(Page { items, next_page })
    }

    async fn create_installation_token(
        &self,
        installation_id: u64,
        opts: &InstallationTokenOptions,
    ) -> Result<InstallationToken> {
        let url = format!(
            "{}/app/installations/{}/access_tokens",
            self.api_url, installation_id
        );
        debug!(
            installation_id,
            repositories = opts.repository_ids.len(),
            "Requesting installation access token"
        );

        let request = authorized(self.client.post(&url), &self.jwt()?, &self.user_agent).json(opts);
        let (token, _) = read_json::<InstallationToken>(request)
            .await
            .context("Failed to request installation access token")?;
        Ok(token)
    }
}

/// A GitHub App installation.
///
/// `account` is null for some installations, and enterprise installations
/// carry a `slug` instead of a `login`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Installation {
    pub id: u64,
    #[serde(default)]
    pub account: Option<InstallationAccount>,
    #[serde(default)]
    pub repository_selection: Option<String>,
}

impl Installation {
    pub fn new(id: u64, login: impl Into<String>) -> Self {
        Self {
            id,
            account: Some(InstallationAccount {
                login: Some(login.into()),
                slug: None,
                account_type: None,
            }),
            repository_selection: None,
        }
    }

    /// Login of the user or organization the app is installed on, if any.
    pub fn login(&self) -> Option<&str> {
        self.account.as_ref()?.login.as_deref()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InstallationAccount {
    #[serde(default)]
    pub login: Option<String>,
    #[serde(default)]
    pub slug: Option<String>,
    #[serde(rename = "type", default)]
    pub account_type: Option<String>,
}

/// Access level for a single permission.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PermissionLevel {
    Read,
    Write,
    Admin,
}

impl fmt::Display for PermissionLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let level = match self {
            PermissionLevel::Read => "read",
            PermissionLevel::Write => "write",
            PermissionLevel::Admin => "admin",
        };
        f.write_str(level)
    }
}

impl FromStr for PermissionLevel {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "read" => Ok(PermissionLevel::Read),
            "write" => Ok(PermissionLevel::Write),
            "admin" => Ok(PermissionLevel::Admin),
            other => anyhow::bail!("unknown permission level '{}' (expected read, write or admin)", other),
        }
    }
}

/// Permission set requested for (or granted to) an installation token,
/// keyed by GitHub permission name (`contents`, `metadata`, `pull_requests`, ...).
///
/// An empty set asks for every permission the installation has.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct InstallationPermissions(BTreeMap<String, PermissionLevel>);

impl InstallationPermissions {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style insert.
    pub fn with(mut self, name: impl Into<String>, level: PermissionLevel) -> Self {
        self.insert(name, level);
        self
    }

    pub fn insert(&mut self, name: impl Into<String>, level: PermissionLevel) {
        self.0.insert(name.into(), level);
    }

    pub fn get(&self, name: &str) -> Option<PermissionLevel> {
        self.0.get(name).copied()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Parse a single `name=level` pair, e.g. `contents=write`.
    pub fn parse_pair(s: &str) -> Result<(String, PermissionLevel)> {
        let (name, level) = s
            .split_once('=')
            .with_context(|| format!("invalid permission '{}' (expected NAME=LEVEL)", s))?;
        let name = name.trim();
        if name.is_empty() {
            anyhow::bail!("invalid permission '{}': empty name", s);
        }
        Ok((name.to_string(), level.trim().parse()?))
    }
}

impl FromIterator<(String, PermissionLevel)> for InstallationPermissions {
    fn from_iter<I: IntoIterator<Item = (String, PermissionLevel)>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}

/// Body of the access token request.
///
/// Empty fields are omitted, which GitHub reads as "all repositories" and
/// "all installation permissions".
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct InstallationTokenOptions {
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub repository_ids: Vec<u64>,
    #[serde(skip_serializing_if = "InstallationPermissions::is_empty")]
    pub permissions: InstallationPermissions,
}

/// Response from GitHub's installation access token endpoint.
#[derive(Clone, Serialize, Deserialize)]
pub struct InstallationToken {
    pub token: String,
    pub expires_at: DateTime<Utc>,
    #[serde(default)]
    pub permissions: InstallationPermissions,
    #[serde(default)]
    pub repositories: Vec<Repository>,
    #[serde(default)]
    pub repository_selection: Option<String>,
}

impl fmt::Debug for InstallationToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("InstallationToken")
            .field("token", &"<redacted>")
            .field("expires_at", &self.expires_at)
            .field("permissions", &self.permissions)
            .field("repositories", &self.repositories)
            .field("repository_selection", &self.repository_selection)
            .finish()
    }
}
