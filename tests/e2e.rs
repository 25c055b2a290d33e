//! Live test against GitHub. Needs a real app installation:
//!
//! ```text
//! GITHUB_APP_INTEGRATION_ID=... GITHUB_APP_PRIVATE_KEY_FILE=... \
//! GITHUB_APP_TARGET_ORG=... GITHUB_APP_TARGET_REPOSITORY=... \
//!     cargo test --test e2e -- --ignored
//! ```

use std::sync::Arc;

use githubapp::github::{AppClient, InstallationPermissions, PermissionLevel};
use githubapp::GitHubApp;

fn env(name: &str) -> String {
    std::env::var(name).unwrap_or_else(|_| panic!("{} must be set", name))
}

#[tokio::test]
#[ignore]
async fn test_github_app_e2e() {
    let integration_id: u64 = env("GITHUB_APP_INTEGRATION_ID").parse().unwrap();
    let private_key = std::fs::read_to_string(env("GITHUB_APP_PRIVATE_KEY_FILE")).unwrap();
    let target_owner = env("GITHUB_APP_TARGET_ORG");
    let target_repository = env("GITHUB_APP_TARGET_REPOSITORY");

    let client = AppClient::new(integration_id, &private_key).unwrap();
    let app = GitHubApp::new(Arc::new(client));

    let token = app
        .create_installation_token(
            &target_owner,
            &[target_repository.as_str()],
            &InstallationPermissions::new().with("metadata", PermissionLevel::Read),
        )
        .await
        .unwrap();

    for repo in &token.repositories {
        assert_eq!(repo.name, target_repository);
    }
}
