//! Installation token issuance with cached installation and repository lookups.
//!
//! [`GitHubApp`] maps an owner to the app installation bound to it, optionally
//! maps repository names to ids within that installation, and mints a token
//! scoped accordingly. Both lookups are cached for a refresh interval.
//!
//! Listing an installation's repositories needs an installation token itself.
//! That token is minted through a separate bootstrap request that never
//! resolves repositories, so a repository refresh cannot recurse.

mod cache;
#[cfg(test)]
mod testing;

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};

use crate::config::Config;
use crate::error::{AppError, RemoteOperation, Result};
use crate::github::{
    collect_pages, AppClient, AppsApi, HttpListingClientFactory, InstallationPermissions,
    InstallationToken, InstallationTokenOptions, ListingClientFactory, INSTALLATIONS_PER_PAGE,
    REPOSITORIES_PER_PAGE,
};
use cache::{normalize_owner, CachedInstallation, CachedRepository, InstallationCache};

const DEFAULT_REFRESH_INTERVAL: Duration = Duration::from_secs(60);
const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// An installation as seen by callers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InstallationSummary {
    pub id: u64,
    /// Lower-cased account login.
    pub owner: String,
}

/// The two kinds of token the app mints.
#[derive(Debug, Clone, PartialEq, Eq)]
enum TokenRequest {
    /// Unscoped token used internally to list an installation's repositories.
    Bootstrap { installation_id: u64 },
    /// Token requested by a caller. An empty `repository_ids` means all repositories.
    Scoped {
        installation_id: u64,
        repository_ids: Vec<u64>,
        permissions: InstallationPermissions,
    },
}

impl TokenRequest {
    fn installation_id(&self) -> u64 {
        match self {
            TokenRequest::Bootstrap { installation_id }
            | TokenRequest::Scoped {
                installation_id, ..
            } => *installation_id,
        }
    }

    fn kind(&self) -> &'static str {
        match self {
            TokenRequest::Bootstrap { .. } => "bootstrap",
            TokenRequest::Scoped { .. } => "scoped",
        }
    }

    fn into_options(self) -> InstallationTokenOptions {
        match self {
            TokenRequest::Bootstrap { .. } => InstallationTokenOptions::default(),
            TokenRequest::Scoped {
                repository_ids,
                permissions,
                ..
            } => InstallationTokenOptions {
                repository_ids,
                permissions,
            },
        }
    }
}

/// Wraps the app-authenticated client and caches installations and their repositories.
pub struct GitHubApp {
    client: Arc<dyn AppsApi>,
    listing: Arc<dyn ListingClientFactory>,
    installations: InstallationCache,
    refresh_interval: Duration,
    request_timeout: Duration,
}

impl GitHubApp {
    /// Create an app over `client` with the default listing client factory,
    /// a one minute refresh interval and a 30 second request timeout.
    pub fn new(client: Arc<dyn AppsApi>) -> Self {
        Self {
            client,
            listing: Arc::new(HttpListingClientFactory::default()),
            installations: InstallationCache::new(),
            refresh_interval: DEFAULT_REFRESH_INTERVAL,
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
        }
    }

    /// Build an app that talks to GitHub with the configured credentials.
    /// The configuration is validated first.
    pub fn from_config(config: &Config) -> anyhow::Result<Self> {
        config.validate()?;
        let client = AppClient::from_config(&config.github)?;
        let listing =
            HttpListingClientFactory::new(&config.github.api_url, &config.github.user_agent);

        Ok(Self::new(Arc::new(client))
            .with_listing_factory(Arc::new(listing))
            .with_refresh_interval(config.cache.refresh_interval())
            .with_request_timeout(config.cache.request_timeout()))
    }

    pub fn with_listing_factory(mut self, listing: Arc<dyn ListingClientFactory>) -> Self {
        self.listing = listing;
        self
    }

    /// Interval after which both cache levels are refreshed.
    pub fn with_refresh_interval(mut self, interval: Duration) -> Self {
        self.refresh_interval = interval;
        self
    }

    /// Upper bound for each individual GitHub API call.
    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    /// Mint an installation token for `owner`, scoped to `repos` and `permissions`.
    ///
    /// An empty `repos` requests access to every repository the installation
    /// can see. Repository names are resolved in order and the first failure
    /// is returned.
    pub async fn create_installation_token<S: AsRef<str>>(
        &self,
        owner: &str,
        repos: &[S],
        permissions: &InstallationPermissions,
    ) -> Result<InstallationToken> {
        let installation = self.installation(owner).await?;

        let mut repository_ids = Vec::with_capacity(repos.len());
        for repo in repos {
            repository_ids.push(self.repository_id(&installation, repo.as_ref()).await?);
        }

        self.mint(TokenRequest::Scoped {
            installation_id: installation.id,
            repository_ids,
            permissions: permissions.clone(),
        })
        .await
    }

    /// Installation id bound to `owner` (case-insensitive).
    pub async fn resolve_installation_id(&self, owner: &str) -> Result<u64> {
        Ok(self.installation(owner).await?.id)
    }

    /// Id of repository `repo` within the installation bound to `owner`.
    pub async fn resolve_repository_id(&self, owner: &str, repo: &str) -> Result<u64> {
        let installation = self.installation(owner).await?;
        self.repository_id(&installation, repo).await
    }

    /// Every installation of the app, refreshing the list first if it is stale.
    pub async fn installations(&self) -> Result<Vec<InstallationSummary>> {
        let snapshot = self
            .installations
            .all(self.refresh_interval, || self.fetch_installations())
            .await?;

        Ok(snapshot
            .items
            .iter()
            .map(|i| InstallationSummary {
                id: i.id,
                owner: i.owner.clone(),
            })
            .collect())
    }

    /// The returned handle stays valid even if the installation list is
    /// swapped out concurrently.
    async fn installation(&self, owner: &str) -> Result<Arc<CachedInstallation>> {
        self.installations
            .find(owner, self.refresh_interval, || self.fetch_installations())
            .await?
            .ok_or_else(|| AppError::installation_not_found(normalize_owner(owner)))
    }

    async fn repository_id(&self, installation: &CachedInstallation, repo: &str) -> Result<u64> {
        installation
            .repositories
            .find(repo, self.refresh_interval, || {
                self.fetch_repositories(installation)
            })
            .await?
            .ok_or_else(|| AppError::repository_not_found(&installation.owner, repo))
    }

    async fn fetch_installations(&self) -> Result<Vec<Arc<CachedInstallation>>> {
        let installs = collect_pages(INSTALLATIONS_PER_PAGE, |opts| {
            with_timeout(self.request_timeout, self.client.list_installations(opts))
        })
        .await
        .map_err(|e| AppError::remote(RemoteOperation::ListInstallations, e))?;

        Ok(installs
            .iter()
            .filter_map(|i| match i.login() {
                Some(login) => Some(Arc::new(CachedInstallation::new(i.id, login))),
                None => {
                    debug!(
                        installation_id = i.id,
                        "Skipping installation without account login"
                    );
                    None
                }
            })
            .collect())
    }

    async fn fetch_repositories(
        &self,
        installation: &CachedInstallation,
    ) -> Result<Vec<CachedRepository>> {
        let token = self
            .mint(TokenRequest::Bootstrap {
                installation_id: installation.id,
            })
            .await?;
        let lister = self.listing.listing_client(&token.token);

        let repos = collect_pages(REPOSITORIES_PER_PAGE, |opts| {
            with_timeout(self.request_timeout, lister.list_repos(opts))
        })
        .await
        .map_err(|e| AppError::remote(RemoteOperation::ListRepositories, e))?;

        debug!(
            owner = %installation.owner,
            installation_id = installation.id,
            count = repos.len(),
            "Listed installation repositories"
        );

        Ok(repos
            .into_iter()
            .map(|r| CachedRepository {
                id: r.id,
                name: r.name,
            })
            .collect())
    }

    async fn mint(&self, request: TokenRequest) -> Result<InstallationToken> {
        let installation_id = request.installation_id();
        let kind = request.kind();
        let options = request.into_options();

        let token = with_timeout(
            self.request_timeout,
            self.client.create_installation_token(installation_id, &options),
        )
        .await
        .map_err(|e| AppError::remote(RemoteOperation::CreateToken, e))?;

        metrics::counter!("githubapp_tokens_minted_total", "kind" => kind).increment(1);
        info!(
            installation_id,
            kind,
            repositories = options.repository_ids.len(),
            expires_at = %token.expires_at,
            "Minted installation token"
        );
        Ok(token)
    }
}

/// Bound a single remote call.
async fn with_timeout<T>(
    limit: Duration,
    call: impl Future<Output = anyhow::Result<T>>,
) -> anyhow::Result<T> {
    match tokio::time::timeout(limit, call).await {
        Ok(result) => result,
        Err(_) => anyhow::bail!("request timed out after {:?}", limit),
    }
}
