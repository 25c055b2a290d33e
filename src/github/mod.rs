//! GitHub integration module for GitHub App support.
//!
//! This module provides:
//! - The collaborator traits the resolution engine talks to
//! - JWT generation and the app-authenticated REST client
//! - The installation-token authenticated client used to list repositories

pub mod api_client;
pub mod token_manager;

pub use api_client::{GitHubClient, HttpListingClientFactory, Repository};
pub use token_manager::{
    generate_app_jwt, AppClient, Installation, InstallationAccount, InstallationPermissions,
    InstallationToken, InstallationTokenOptions, PermissionLevel,
};

use anyhow::Result;
use async_trait::async_trait;
use std::future::Future;

/// Installations are listed ten per page.
pub const INSTALLATIONS_PER_PAGE: u32 = 10;
/// Repositories are listed a hundred per page.
pub const REPOSITORIES_PER_PAGE: u32 = 100;

/// Page request for list endpoints. Pages are 1-based.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ListOptions {
    pub page: u32,
    pub per_page: u32,
}

impl ListOptions {
    pub fn first(per_page: u32) -> Self {
        Self { page: 1, per_page }
    }
}

/// One page of a list response, with the cursor for the following page if any.
#[derive(Debug, Clone)]
pub struct Page<T> {
    pub items: Vec<T>,
    pub next_page: Option<u32>,
}

impl<T> Page<T> {
    pub fn last(items: Vec<T>) -> Self {
        Self {
            items,
            next_page: None,
        }
    }
}

/// Operations available to a client authenticated as the app itself.
#[async_trait]
pub trait AppsApi: Send + Sync {
    /// List one page of the app's installations.
    async fn list_installations(&self, opts: ListOptions) -> Result<Page<Installation>>;

    /// Mint an installation access token.
    async fn create_installation_token(
        &self,
        installation_id: u64,
        opts: &InstallationTokenOptions,
    ) -> Result<InstallationToken>;
}

/// Lists the repositories visible to one installation.
#[async_trait]
pub trait RepositoryLister: Send + Sync {
    async fn list_repos(&self, opts: ListOptions) -> Result<Page<Repository>>;
}

/// Builds a repository lister from a freshly minted installation token.
pub trait ListingClientFactory: Send + Sync {
    fn listing_client(&self, token: &str) -> Box<dyn RepositoryLister>;
}

/// Fetch every page starting at page 1, following `next_page` until it is absent.
///
/// Pages are concatenated in order. The first error aborts the whole walk and
/// nothing collected so far is returned. A `next_page` that does not move past
/// the current page is an error.
pub async fn collect_pages<T, F, Fut>(per_page: u32, mut fetch: F) -> Result<Vec<T>>
where
    F: FnMut(ListOptions) -> Fut,
    Fut: Future<Output = Result<Page<T>>>,
{
    let mut all = Vec::new();
    let mut opts = ListOptions::first(per_page);

    loop {
        let page = fetch(opts).await?;
        all.extend(page.items);
        match page.next_page {
            Some(next) if next <= opts.page => anyhow::bail!(
                "pagination did not advance: page {} points back to page {}",
                opts.page,
                next
            ),
            Some(next) => opts.page = next,
            None => break,
        }
    }

    Ok(all)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    #[tokio::test]
    async fn test_collect_pages_concatenates_in_order() {
        let requested = Mutex::new(Vec::new());
        let all = collect_pages(10, |opts| {
            requested.lock().unwrap().push(opts);
            async move {
                Ok(match opts.page {
                    1 => Page {
                        items: vec![1, 2, 3],
                        next_page: Some(2),
                    },
                    2 => Page {
                        items: vec![4, 5],
                        next_page: Some(3),
                    },
                    _ => Page::last(vec![6]),
                })
            }
        })
        .await
        .unwrap();

        assert_eq!(all, vec![1, 2, 3, 4, 5, 6]);
        let requested = requested.into_inner().unwrap();
        assert_eq!(requested.len(), 3);
        assert!(requested.iter().all(|o| o.per_page == 10));
        assert_eq!(
            requested.iter().map(|o| o.page).collect::<Vec<_>>(),
            vec![1, 2, 3]
        );
    }

    #[tokio::test]
    async fn test_collect_pages_aborts_on_error() {
        let result: Result<Vec<u32>> = collect_pages(100, |opts| async move {
            if opts.page == 2 {
                anyhow::bail!("boom");
            }
            Ok(Page {
                items: vec![opts.page],
                next_page: Some(opts.page + 1),
            })
        })
        .await;

        assert_eq!(result.unwrap_err().to_string(), "boom");
    }

    #[tokio::test]
    async fn test_collect_pages_rejects_cursor_that_does_not_advance() {
        let requests = AtomicUsize::new(0);
        let result: Result<Vec<u32>> = collect_pages(10, |opts| {
            requests.fetch_add(1, Ordering::SeqCst);
            async move {
                Ok(Page {
                    items: vec![opts.page],
                    next_page: Some(opts.page),
                })
            }
        })
        .await;

        let err = result.unwrap_err();
        assert!(err.to_string().contains("did not advance"), "{}", err);
        assert_eq!(requests.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_collect_pages_rejects_cursor_that_goes_back() {
        let result: Result<Vec<u32>> = collect_pages(10, |opts| async move {
            Ok(Page {
                items: vec![opts.page],
                next_page: Some(if opts.page == 3 { 1 } else { opts.page + 1 }),
            })
        })
        .await;

        assert!(result.is_err());
    }

    #[tokio::test]
    async fn test_collect_pages_single_empty_page() {
        let all: Vec<u32> = collect_pages(10, |_| async { Ok(Page::last(Vec::new())) })
            .await
            .unwrap();
        assert!(all.is_empty());
    }
}
