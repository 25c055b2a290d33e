//! GitHub API client for installation-scoped operations.
//!
//! This client uses installation access tokens to list the repositories an
//! installation can see. The request helpers here are shared with
//! [`super::AppClient`], which authenticates with an app JWT instead.

use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::header::{HeaderMap, LINK};
use reqwest::{RequestBuilder, Url};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use super::{ListOptions, ListingClientFactory, Page, RepositoryLister};

pub(crate) const DEFAULT_API_URL: &str = "https://api.github.com";
pub(crate) const DEFAULT_USER_AGENT: &str = "githubapp";

/// Attach the bearer credential and the headers GitHub expects on every call.
pub(crate) fn authorized(builder: RequestBuilder, bearer: &str, user_agent: &str) -> RequestBuilder {
    builder
        .header("Authorization", format!("Bearer {}", bearer))
        .header("Accept", "application/vnd.github+json")
        .header("User-Agent", user_agent)
        .header("X-GitHub-Api-Version", "2022-11-28")
}

/// Send a request and decode the JSON body, returning the next page cursor
/// from the `Link` header alongside it.
pub(crate) async fn read_json<T: DeserializeOwned>(
    request: RequestBuilder,
) -> Result<(T, Option<u32>)> {
    let response = request
        .send()
        .await
        .context("Failed to make GitHub API request")?;

    if !response.status().is_success() {
        let status = response.status();
        let body = response.text().await.unwrap_or_default();
        anyhow::bail!("GitHub API error: {} - {}", status, body);
    }

    let next_page = next_page(response.headers());
    let body = response
        .json()
        .await
        .context("Failed to parse GitHub API response")?;
    Ok((body, next_page))
}

/// Extract the `page` query parameter of the `rel="next"` link, if any.
pub(crate) fn next_page(headers: &HeaderMap) -> Option<u32> {
    let link = headers.get(LINK)?.to_str().ok()?;
    next_page_from_link(link)
}

fn next_page_from_link(link: &str) -> Option<u32> {
    link.split(',').find_map(|part| {
        let (target, params) = part.split_once(';')?;
        let is_next = params
            .split(';')
            .any(|p| matches!(p.trim(), r#"rel="next""# | "rel=next"));
        if !is_next {
            return None;
        }
        let target = target.trim().strip_prefix('<')?.strip_suffix('>')?;
        let url = Url::parse(target).ok()?;
        url.query_pairs()
            .find(|(key, _)| *key == "page")
            .and_then(|(_, value)| value.parse().ok())
    })
}

/// GitHub API client for installation-based operations.
pub struct GitHubClient {
    access_token: String,
    api_url: String,
    user_agent: String,
    client: reqwest::Client,
}

impl GitHubClient {
    /// Create a new GitHub client with an installation access token.
    pub fn new(access_token: String) -> Self {
        Self {
            access_token,
            api_url: DEFAULT_API_URL.to_string(),
            user_agent: DEFAULT_USER_AGENT.to_string(),
            client: reqwest::Client::new(),
        }
    }

    pub fn with_api_url(mut self, api_url: impl Into<String>) -> Self {
        self.api_url = api_url.into().trim_end_matches('/').to_string();
        self
    }

    pub fn with_user_agent(mut self, user_agent: impl Into<String>) -> Self {
        self.user_agent = user_agent.into();
        self
    }

    fn with_http_client(mut self, client: reqwest::Client) -> Self {
        self.client = client;
        self
    }
}

#[async_trait]
impl RepositoryLister for GitHubClient {
    /// List one page of the repositories accessible to the installation.
    async fn list_repos(&self, opts: ListOptions) -> Result<Page<Repository>> {
        let url = format!(
            "{}/installation/repositories?per_page={}&page={}",
            self.api_url, opts.per_page, opts.page
        );

        let request = authorized(self.client.get(&url), &self.access_token, &self.user_agent);
        let (response, next_page) = read_json::<ListReposResponse>(request).await?;
        Ok(Page {
            items: response.repositories,
            next_page,
        })
    }
}

/// Builds [`GitHubClient`]s that share one connection pool.
#[derive(Clone)]
pub struct HttpListingClientFactory {
    api_url: String,
    user_agent: String,
    client: reqwest::Client,
}

impl HttpListingClientFactory {
    pub fn new(api_url: impl Into<String>, user_agent: impl Into<String>) -> Self {
        Self {
            api_url: api_url.into(),
            user_agent: user_agent.into(),
            client: reqwest::Client::new(),
        }
    }
}

impl Default for HttpListingClientFactory {
    fn default() -> Self {
        Self::new(DEFAULT_API_URL, DEFAULT_USER_AGENT)
    }
}

impl ListingClientFactory for HttpListingClientFactory {
    fn listing_client(&self, token: &str) -> Box<dyn RepositoryLister> {
        Box::new(
            GitHubClient::new(token.to_string())
                .with_api_url(&self.api_url)
                .with_user_agent(&self.user_agent)
                .with_http_client(self.client.clone()),
        )
    }
}

// Response types

#[derive(Debug, Deserialize)]
struct ListReposResponse {
    #[allow(dead_code)]
    total_count: u64,
    repositories: Vec<Repository>,
}

/// A GitHub repository.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Repository {
    pub id: u64,
    pub name: String,
}

impl Repository {
    pub fn new(id: u64, name: impl Into<String>) -> Self {
        Self {
            id,
            name: name.into(),
        }
    }
}
