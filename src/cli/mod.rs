//! CLI module for the githubapp command-line interface.
//!
//! Provides subcommands for minting tokens with a GitHub App:
//! - `token <owner>` - Mint an installation token, optionally scoped to repositories
//! - `installations` - List the owners the app is installed on
//! - `config check` - Validate configuration file

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use clap::{Parser, Subcommand};
use serde::Serialize;
use std::path::PathBuf;

use crate::app::GitHubApp;
use crate::config::Config;
use crate::github::{InstallationPermissions, InstallationToken, PermissionLevel};

/// CLI arguments structure
#[derive(Parser, Debug)]
#[command(name = "githubapp")]
#[command(author, version, about = "Mint GitHub App installation tokens", long_about = None)]
pub struct Cli {
    /// Path to configuration file
    #[arg(short, long, default_value = "githubapp.toml")]
    pub config: PathBuf,

    /// Override log level
    #[arg(short, long)]
    pub log_level: Option<String>,

    /// GitHub App ID (overrides github.app_id)
    #[arg(long, env = "GITHUB_APP_INTEGRATION_ID")]
    pub app_id: Option<u64>,

    /// Path to the app's PEM private key (overrides github.private_key_path)
    #[arg(long, env = "GITHUB_APP_PRIVATE_KEY_FILE")]
    pub private_key: Option<PathBuf>,

    /// GitHub REST API root (overrides github.api_url)
    #[arg(long, env = "GITHUB_API_URL")]
    pub api_url: Option<String>,

    #[command(subcommand)]
    pub command: Commands,
}

/// Available CLI subcommands
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Mint an installation token for an owner
    Token {
        /// Organization or user the app is installed on
        owner: String,
        /// Restrict the token to this repository (repeatable)
        #[arg(short, long = "repo")]
        repos: Vec<String>,
        /// Requested permission as NAME=LEVEL, e.g. contents=read (repeatable)
        #[arg(short, long = "permission", value_parser = parse_permission)]
        permissions: Vec<(String, PermissionLevel)>,
        /// Print the token with its expiry and repositories as JSON
        #[arg(long)]
        json: bool,
    },

    /// List the owners the app is installed on
    Installations,

    /// Configuration management commands
    #[command(subcommand)]
    Config(ConfigCommands),
}

/// Config subcommands
#[derive(Subcommand, Debug)]
pub enum ConfigCommands {
    /// Validate configuration file
    Check,
}

fn parse_permission(s: &str) -> Result<(String, PermissionLevel), String> {
    InstallationPermissions::parse_pair(s).map_err(|e| e.to_string())
}

impl Cli {
    /// Apply command-line and environment overrides on top of the file configuration.
    pub fn apply_overrides(&self, config: &mut Config) {
        if let Some(app_id) = self.app_id {
            config.github.app_id = Some(app_id);
        }
        if let Some(path) = &self.private_key {
            config.github.private_key_path = Some(path.clone());
        }
        if let Some(api_url) = &self.api_url {
            config.github.api_url = api_url.clone();
        }
        if let Some(level) = &self.log_level {
            config.logging.level = level.clone();
        }
    }
}

/// JSON shape printed by `token --json`
#[derive(Debug, Serialize)]
pub struct TokenOutput {
    pub token: String,
    pub expires_at: DateTime<Utc>,
    pub repositories: Vec<String>,
}

impl From<InstallationToken> for TokenOutput {
    fn from(token: InstallationToken) -> Self {
        Self {
            repositories: token.repositories.into_iter().map(|r| r.name).collect(),
            token: token.token,
            expires_at: token.expires_at,
        }
    }
}

/// Run a CLI command
pub async fn run_command(cli: &Cli, config: &Config) -> Result<()> {
    match &cli.command {
        Commands::Token {
            owner,
            repos,
            permissions,
            json,
        } => cmd_token(config, owner, repos, permissions, *json).await,
        Commands::Installations => cmd_installations(config).await,
        Commands::Config(ConfigCommands::Check) => cmd_config_check(cli, config),
    }
}

async fn cmd_token(
    config: &Config,
    owner: &str,
    repos: &[String],
    permissions: &[(String, PermissionLevel)],
    json: bool,
) -> Result<()> {
    let app = GitHubApp::from_config(config)?;
    let permissions: InstallationPermissions = permissions.iter().cloned().collect();

    let token = app
        .create_installation_token(owner, repos, &permissions)
        .await
        .with_context(|| format!("Failed to mint token for {}", owner))?;

    if json {
        let output = TokenOutput::from(token);
        println!("{}", serde_json::to_string_pretty(&output)?);
    } else {
        println!("{}", token.token);
    }
    Ok(())
}

async fn cmd_installations(config: &Config) -> Result<()> {
    let app = GitHubApp::from_config(config)?;
    let installations = app.installations().await?;

    if installations.is_empty() {
        println!("The app has no installations.");
        return Ok(());
    }

    println!("{:<12}  {}", "ID", "OWNER");
    println!("{}", "-".repeat(40));
    for installation in installations {
        println!("{:<12}  {}", installation.id, installation.owner);
    }
    Ok(())
}

fn cmd_config_check(cli: &Cli, config: &Config) -> Result<()> {
    println!("Checking configuration file: {}", cli.config.display());
    if !cli.config.exists() {
        println!("[!!] Configuration file not found, using defaults and overrides");
    }
    println!();

    println!("GitHub:");
    match config.github.app_id {
        Some(id) => println!("  App ID:       {}", id),
        None => println!("  App ID:       (not set)"),
    }
    match &config.github.private_key_path {
        Some(path) => println!("  Private Key:  {}", path.display()),
        None => println!("  Private Key:  (not set)"),
    }
    println!("  API URL:      {}", config.github.api_url);
    println!();
    println!("Cache:");
    println!("  Refresh:      {}s", config.cache.refresh_interval_secs);
    println!("  Timeout:      {}s", config.cache.request_timeout_secs);
    println!();

    config.validate()?;
    println!("[OK] Configuration is valid!");
    Ok(())
}
