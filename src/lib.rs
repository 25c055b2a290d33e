pub mod app;
pub mod cli;
pub mod config;
pub mod error;
pub mod github;

pub use app::{GitHubApp, InstallationSummary};
pub use error::{AppError, RemoteOperation, Resource};
pub use github::{InstallationPermissions, InstallationToken, PermissionLevel};
