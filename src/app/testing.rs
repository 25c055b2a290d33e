//! In-memory collaborators for exercising [`super::GitHubApp`].

use anyhow::Result;
use async_trait::async_trait;
use chrono::{TimeZone, Utc};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use crate::github::{
    AppsApi, Installation, InstallationToken, InstallationTokenOptions, ListOptions,
    ListingClientFactory, Page, Repository, RepositoryLister,
};

fn page_of<T: Clone>(pages: &[Vec<T>], opts: ListOptions) -> Page<T> {
    let index = opts.page.saturating_sub(1) as usize;
    let items = pages.get(index).cloned().unwrap_or_default();
    let next_page = if index + 1 < pages.len() {
        Some(opts.page + 1)
    } else {
        None
    };
    Page { items, next_page }
}

/// Serves installations from fixed pages and mints numbered tokens.
#[derive(Default)]
pub(crate) struct FakeApps {
    pages: Mutex<Vec<Vec<Installation>>>,
    fail_on_page: Mutex<Option<u32>>,
    fail_tokens: Mutex<bool>,
    delay: Mutex<Option<Duration>>,
    list_requests: Mutex<Vec<ListOptions>>,
    token_requests: Mutex<Vec<(u64, InstallationTokenOptions)>>,
}

impl FakeApps {
    pub(crate) fn new(pages: Vec<Vec<Installation>>) -> Self {
        Self {
            pages: Mutex::new(pages),
            ..Default::default()
        }
    }

    pub(crate) fn set_installations(&self, pages: Vec<Vec<Installation>>) {
        *self.pages.lock().unwrap() = pages;
    }

    pub(crate) fn fail_installations_on_page(&self, page: Option<u32>) {
        *self.fail_on_page.lock().unwrap() = page;
    }

    pub(crate) fn fail_tokens(&self, fail: bool) {
        *self.fail_tokens.lock().unwrap() = fail;
    }

    /// Delay every remote call by `delay`.
    pub(crate) fn set_delay(&self, delay: Duration) {
        *self.delay.lock().unwrap() = Some(delay);
    }

    /// Number of full refreshes started (requests for page 1).
    pub(crate) fn installation_refreshes(&self) -> usize {
        self.list_requests
            .lock()
            .unwrap()
            .iter()
            .filter(|o| o.page == 1)
            .count()
    }

    pub(crate) fn installation_pages_requested(&self) -> Vec<ListOptions> {
        self.list_requests.lock().unwrap().clone()
    }

    pub(crate) fn token_requests(&self) -> Vec<(u64, InstallationTokenOptions)> {
        self.token_requests.lock().unwrap().clone()
    }

    async fn wait(&self) {
        let delay = *self.delay.lock().unwrap();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
    }
}

#[async_trait]
impl AppsApi for FakeApps {
    async fn list_installations(&self, opts: ListOptions) -> Result<Page<Installation>> {
        self.list_requests.lock().unwrap().push(opts);
        self.wait().await;

        if *self.fail_on_page.lock().unwrap() == Some(opts.page) {
            anyhow::bail!("GitHub API error: 502 Bad Gateway - page {}", opts.page);
        }
        Ok(page_of(&self.pages.lock().unwrap(), opts))
    }

    async fn create_installation_token(
        &self,
        installation_id: u64,
        opts: &InstallationTokenOptions,
    ) -> Result<InstallationToken> {
        let n = {
            let mut requests = self.token_requests.lock().unwrap();
            requests.push((installation_id, opts.clone()));
            requests.len()
        };
        self.wait().await;

        if *self.fail_tokens.lock().unwrap() {
            anyhow::bail!("GitHub API error: 403 Forbidden - installation suspended");
        }
        Ok(InstallationToken {
            token: format!("token-{}", n),
            expires_at: Utc.with_ymd_and_hms(2026, 10, 19, 13, 0, 0).unwrap(),
            permissions: opts.permissions.clone(),
            repositories: Vec::new(),
            repository_selection: None,
        })
    }
}

#[derive(Default)]
struct ListingState {
    pages: Mutex<Vec<Vec<Repository>>>,
    fail_on_page: Mutex<Option<u32>>,
    tokens: Mutex<Vec<String>>,
    requests: Mutex<Vec<ListOptions>>,
}

/// Listing factory that records the tokens it is handed.
#[derive(Clone, Default)]
pub(crate) struct FakeListing {
    state: Arc<ListingState>,
}

impl FakeListing {
    pub(crate) fn new(pages: Vec<Vec<Repository>>) -> Self {
        let listing = Self::default();
        *listing.state.pages.lock().unwrap() = pages;
        listing
    }

    pub(crate) fn fail_on_page(&self, page: Option<u32>) {
        *self.state.fail_on_page.lock().unwrap() = page;
    }

    pub(crate) fn tokens_seen(&self) -> Vec<String> {
        self.state.tokens.lock().unwrap().clone()
    }

    pub(crate) fn pages_requested(&self) -> Vec<ListOptions> {
        self.state.requests.lock().unwrap().clone()
    }
}

impl ListingClientFactory for FakeListing {
    fn listing_client(&self, token: &str) -> Box<dyn RepositoryLister> {
        self.state.tokens.lock().unwrap().push(token.to_string());
        Box::new(FakeLister {
            state: self.state.clone(),
        })
    }
}

struct FakeLister {
    state: Arc<ListingState>,
}

#[async_trait]
impl RepositoryLister for FakeLister {
    async fn list_repos(&self, opts: ListOptions) -> Result<Page<Repository>> {
        self.state.requests.lock().unwrap().push(opts);
        if *self.state.fail_on_page.lock().unwrap() == Some(opts.page) {
            anyhow::bail!("GitHub API error: 500 Internal Server Error");
        }
        Ok(page_of(&self.state.pages.lock().unwrap(), opts))
    }
}
