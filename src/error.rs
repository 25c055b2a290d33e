//! Error types for installation and repository resolution.

use std::fmt;
use thiserror::Error;

/// The cached resource a lookup failed to find.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Resource {
    /// No installation is bound to this (normalized) owner.
    Installation { owner: String },
    /// The owner's installation cannot see a repository with this name.
    Repository { owner: String, name: String },
}

impl fmt::Display for Resource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Resource::Installation { owner } => write!(f, "{}", owner),
            Resource::Repository { owner, name } => write!(f, "{}/{}", owner, name),
        }
    }
}

/// Remote calls made while resolving or minting.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RemoteOperation {
    ListInstallations,
    ListRepositories,
    CreateToken,
}

impl fmt::Display for RemoteOperation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let op = match self {
            RemoteOperation::ListInstallations => "list installations",
            RemoteOperation::ListRepositories => "list repositories",
            RemoteOperation::CreateToken => "create token",
        };
        f.write_str(op)
    }
}

/// Errors returned by [`crate::GitHubApp`].
#[derive(Error, Debug)]
pub enum AppError {
    /// The owner has no installation, or the installation cannot see the repository.
    #[error("installation not found: '{resource}'")]
    NotFound { resource: Resource },

    /// A list or mint call failed. Nothing is retried and the cache is left as it was.
    #[error("failed to {operation}: {source:#}")]
    Remote {
        operation: RemoteOperation,
        #[source]
        source: anyhow::Error,
    },
}

impl AppError {
    pub fn installation_not_found(owner: impl Into<String>) -> Self {
        AppError::NotFound {
            resource: Resource::Installation {
                owner: owner.into(),
            },
        }
    }

    pub fn repository_not_found(owner: impl Into<String>, name: impl Into<String>) -> Self {
        AppError::NotFound {
            resource: Resource::Repository {
                owner: owner.into(),
                name: name.into(),
            },
        }
    }

    pub fn remote(operation: RemoteOperation, source: anyhow::Error) -> Self {
        AppError::Remote { operation, source }
    }

    /// Returns true if this is a not-found error.
    pub fn is_not_found(&self) -> bool {
        matches!(self, AppError::NotFound { .. })
    }
}

pub type Result<T> = std::result::Result<T, AppError>;
