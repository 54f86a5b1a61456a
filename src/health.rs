//! System health checks for labvault
//!
//! This module provides preflight checks to verify the system is properly
//! configured before a backup starts.

use crate::config::Config;
use crate::gitlab::GitLabClient;
use std::path::Path;

/// Result of system health checks
#[derive(Debug, Clone)]
pub struct HealthCheck {
    /// Git installation status
    pub git: CheckResult,
    /// Server URL configured
    pub server: CheckResult,
    /// Access token available
    pub token: CheckResult,
    /// API reachable with the token (warning only, not required)
    pub api: CheckResult,
    /// Output directory usable
    pub output_dir: CheckResult,
}

/// Result of an individual health check
#[derive(Debug, Clone)]
pub struct CheckResult {
    pub passed: bool,
    pub message: String,
    pub details: Option<String>,
    pub is_warning: bool,
}

impl CheckResult {
    fn ok(message: impl Into<String>) -> Self {
        Self {
            passed: true,
            message: message.into(),
            details: None,
            is_warning: false,
        }
    }

    fn ok_with_details(message: impl Into<String>, details: impl Into<String>) -> Self {
        Self {
            passed: true,
            message: message.into(),
            details: Some(details.into()),
            is_warning: false,
        }
    }

    fn error(message: impl Into<String>) -> Self {
        Self {
            passed: false,
            message: message.into(),
            details: None,
            is_warning: false,
        }
    }

    fn error_with_details(message: impl Into<String>, details: impl Into<String>) -> Self {
        Self {
            passed: false,
            message: message.into(),
            details: Some(details.into()),
            is_warning: false,
        }
    }

    fn warning(message: impl Into<String>) -> Self {
        Self {
            passed: true,
            message: message.into(),
            details: None,
            is_warning: true,
        }
    }

    fn warning_with_details(message: impl Into<String>, details: impl Into<String>) -> Self {
        Self {
            passed: true,
            message: message.into(),
            details: Some(details.into()),
            is_warning: true,
        }
    }
}

impl HealthCheck {
    /// Checks that need no network access; `api` is left as a warning
    pub fn preflight(config: &Config) -> Self {
        Self {
            git: Self::check_git(),
            server: Self::check_server(config),
            token: Self::check_token(config),
            api: CheckResult::warning("GitLab API not checked"),
            output_dir: Self::check_output_dir(config),
        }
    }

    /// Run all health checks, including an API round trip
    pub async fn run(config: &Config) -> Self {
        let mut health = Self::preflight(config);
        health.api = Self::check_api(config).await;
        health
    }

    /// Check if all required checks passed (excludes warnings)
    pub fn all_passed(&self) -> bool {
        self.git.passed && self.server.passed && self.token.passed && self.output_dir.passed
        // API reachability is advisory; listing failures are reported per run
    }

    /// Get list of failed checks (errors only, not warnings)
    pub fn errors(&self) -> Vec<&CheckResult> {
        self.results()
            .into_iter()
            .filter(|r| !r.passed && !r.is_warning)
            .collect()
    }

    /// Get list of warnings
    pub fn warnings(&self) -> Vec<&CheckResult> {
        self.results().into_iter().filter(|r| r.is_warning).collect()
    }

    fn results(&self) -> [&CheckResult; 5] {
        [&self.git, &self.server, &self.token, &self.api, &self.output_dir]
    }

    /// Check git installation
    fn check_git() -> CheckResult {
        match std::process::Command::new("git").arg("--version").output() {
            Ok(output) if output.status.success() => {
                let version = String::from_utf8_lossy(&output.stdout);
                CheckResult::ok_with_details("Git installed", version.trim().to_string())
            }
            Ok(_) => CheckResult::error("Git command failed"),
            Err(_) => CheckResult::error_with_details(
                "Git not found in PATH",
                "Install git: https://git-scm.com/downloads",
            ),
        }
    }

    /// Check the server URL is configured
    fn check_server(config: &Config) -> CheckResult {
        match config.server_url() {
            Ok(url) => CheckResult::ok_with_details("GitLab server configured", url),
            Err(e) => CheckResult::error_with_details("GitLab server not configured", e.to_string()),
        }
    }

    /// Check an access token is available
    fn check_token(config: &Config) -> CheckResult {
        match config.resolve_token() {
            Ok(_) => CheckResult::ok("Access token found"),
            Err(e) => CheckResult::error_with_details("No access token", e.to_string()),
        }
    }

    /// Check the API answers with the configured token
    async fn check_api(config: &Config) -> CheckResult {
        let client = match GitLabClient::from_config(config) {
            Ok(client) => client,
            Err(e) => {
                return CheckResult::warning_with_details("GitLab API not checked", e.to_string())
            }
        };

        match client.server_version().await {
            Ok(version) => {
                CheckResult::ok_with_details("GitLab API reachable", format!("Version: {}", version))
            }
            Err(e) => CheckResult::warning_with_details(
                "GitLab API not reachable",
                format!("{:#}\nListings will come back empty or incomplete", e),
            ),
        }
    }

    /// Check the output directory exists or can be created
    fn check_output_dir(config: &Config) -> CheckResult {
        let root = config.output_root();

        if root.is_dir() {
            return CheckResult::ok_with_details(
                "Output directory exists",
                root.display().to_string(),
            );
        }

        if root.exists() {
            return CheckResult::error_with_details(
                "Output path is not a directory",
                root.display().to_string(),
            );
        }

        match nearest_existing_ancestor(&root) {
            Some(ancestor) if ancestor.is_dir() => CheckResult::ok_with_details(
                "Output directory will be created",
                root.display().to_string(),
            ),
            _ => CheckResult::error_with_details(
                "Output directory cannot be created",
                format!("No existing parent directory for {}", root.display()),
            ),
        }
    }

    /// Get all checks as a slice for iteration
    pub fn all_checks(&self) -> [(&'static str, &CheckResult); 5] {
        [
            ("Git Installation", &self.git),
            ("GitLab Server", &self.server),
            ("Access Token", &self.token),
            ("GitLab API", &self.api),
            ("Output Directory", &self.output_dir),
        ]
    }
}

fn nearest_existing_ancestor(path: &Path) -> Option<&Path> {
    let mut current = path.parent();
    while let Some(dir) = current {
        // A relative path with one component has "" as parent: the cwd
        if dir.as_os_str().is_empty() {
            return Some(Path::new("."));
        }
        if dir.exists() {
            return Some(dir);
        }
        current = dir.parent();
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tempfile::TempDir;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn passing() -> HealthCheck {
        HealthCheck {
            git: CheckResult::ok("Git OK"),
            server: CheckResult::ok("Server OK"),
            token: CheckResult::ok("Token OK"),
            api: CheckResult::ok("API OK"),
            output_dir: CheckResult::ok("Dir OK"),
        }
    }

    #[test]
    fn test_check_result_constructors() {
        let ok = CheckResult::ok_with_details("Test passed", "Some details");
        assert!(ok.passed);
        assert!(!ok.is_warning);
        assert_eq!(ok.details, Some("Some details".to_string()));

        let warning = CheckResult::warning("Test warning");
        assert!(warning.passed); // Warnings still "pass"
        assert!(warning.is_warning);

        let error = CheckResult::error_with_details("Test failed", "Error details");
        assert!(!error.passed);
        assert!(!error.is_warning);
        assert_eq!(error.details, Some("Error details".to_string()));
    }

    #[test]
    fn test_check_server() {
        let mut config = Config::default();
        assert!(!HealthCheck::check_server(&config).passed);

        config.gitlab.url = Some("https://gitlab.example.com".to_string());
        assert!(HealthCheck::check_server(&config).passed);
    }

    #[test]
    fn test_check_token_from_config() {
        let mut config = Config::default();
        config.gitlab.token = Some("glpat-abc".to_string());
        assert!(HealthCheck::check_token(&config).passed);
    }

    #[test]
    fn test_check_output_dir_existing() {
        let temp = TempDir::new().unwrap();
        let mut config = Config::default();
        config.backup.output_directory = temp.path().to_string_lossy().into_owned();

        let result = HealthCheck::check_output_dir(&config);
        assert!(result.passed);
        assert_eq!(result.message, "Output directory exists");
    }

    #[test]
    fn test_check_output_dir_creatable() {
        let temp = TempDir::new().unwrap();
        let mut config = Config::default();
        config.backup.output_directory =
            temp.path().join("new/backup").to_string_lossy().into_owned();

        let result = HealthCheck::check_output_dir(&config);
        assert!(result.passed);
        assert_eq!(result.message, "Output directory will be created");
    }

    #[test]
    fn test_check_output_dir_is_a_file() {
        let temp = TempDir::new().unwrap();
        let file = temp.path().join("backup");
        std::fs::write(&file, "not a dir").unwrap();

        let mut config = Config::default();
        config.backup.output_directory = file.to_string_lossy().into_owned();

        assert!(!HealthCheck::check_output_dir(&config).passed);
    }

    #[tokio::test]
    async fn test_check_api_reachable() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/v4/version"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"version": "17.0.1"})))
            .mount(&server)
            .await;

        let mut config = Config::default();
        config.gitlab.url = Some(server.uri());
        config.gitlab.token = Some("T".to_string());

        let result = HealthCheck::check_api(&config).await;
        assert!(result.passed);
        assert!(!result.is_warning);
        assert!(result.details.unwrap().contains("17.0.1"));
    }

    #[tokio::test]
    async fn test_check_api_unauthorized_is_warning() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/v4/version"))
            .respond_with(ResponseTemplate::new(401))
            .mount(&server)
            .await;

        let mut config = Config::default();
        config.gitlab.url = Some(server.uri());
        config.gitlab.token = Some("T".to_string());

        let result = HealthCheck::check_api(&config).await;
        assert!(result.passed);
        assert!(result.is_warning);
    }

    #[test]
    fn test_run_without_server_skips_api() {
        let health = tokio_test::block_on(HealthCheck::run(&Config::default()));

        assert!(!health.server.passed);
        assert!(health.api.is_warning);
        assert_eq!(health.api.message, "GitLab API not checked");
        assert!(!health.all_passed());
    }

    #[test]
    fn test_all_passed_with_api_warning() {
        let mut health = passing();
        health.api = CheckResult::warning("API unreachable");
        assert!(health.all_passed());
    }

    #[test]
    fn test_all_passed_with_failing_git() {
        let mut health = passing();
        health.git = CheckResult::error("Git missing");
        assert!(!health.all_passed());
    }

    #[test]
    fn test_all_passed_with_missing_token() {
        let mut health = passing();
        health.token = CheckResult::error("No token");
        assert!(!health.all_passed());
    }

    #[test]
    fn test_errors_and_warnings_are_separated() {
        let mut health = passing();
        health.git = CheckResult::error("Git error");
        health.output_dir = CheckResult::error("Dir error");
        health.api = CheckResult::warning("API warning");

        let errors = health.errors();
        assert_eq!(errors.len(), 2);
        assert!(errors.iter().all(|r| !r.passed));

        let warnings = health.warnings();
        assert_eq!(warnings.len(), 1);
        assert!(warnings[0].is_warning);
    }

    #[test]
    fn test_all_checks_returns_all_five() {
        let health = passing();
        let checks = health.all_checks();
        assert_eq!(checks.len(), 5);
        assert_eq!(checks[0].0, "Git Installation");
        assert_eq!(checks[4].0, "Output Directory");
    }

    #[test]
    fn test_nearest_existing_ancestor() {
        let temp = TempDir::new().unwrap();
        let deep = temp.path().join("a/b/c");
        assert_eq!(nearest_existing_ancestor(&deep), Some(temp.path()));
        assert_eq!(nearest_existing_ancestor(Path::new("backup")), Some(Path::new(".")));
    }
}
