/// Common test utilities and helpers for labvault CLI tests

use serde_json::{json, Value};
use std::path::{Path, PathBuf};
use std::process::{Command, Output};
use tempfile::TempDir;

/// Isolated home and config directories for one binary invocation
pub struct TestEnvironment {
    pub temp_dir: TempDir,
    pub config_dir: PathBuf,
}

impl TestEnvironment {
    pub fn new() -> Self {
        let temp_dir = TempDir::new().expect("Failed to create temp dir");
        let config_dir = temp_dir.path().join("config");
        std::fs::create_dir_all(&config_dir).expect("Failed to create config dir");

        Self {
            temp_dir,
            config_dir,
        }
    }

    pub fn path(&self) -> &Path {
        self.temp_dir.path()
    }

    /// The binary under test, with the caller's GitLab settings scrubbed
    pub fn command(&self) -> Command {
        let mut cmd = Command::new(env!("CARGO_BIN_EXE_labvault"));
        cmd.env("XDG_CONFIG_HOME", &self.config_dir)
            .env("HOME", self.temp_dir.path())
            .env_remove("GITLAB_TOKEN")
            .env_remove("GITLAB_URL")
            .env_remove("RUST_LOG");
        cmd
    }

    pub fn create_test_config(&self, content: &str) -> PathBuf {
        let config_path = self.config_dir.join("labvault").join("config.yml");
        std::fs::create_dir_all(config_path.parent().unwrap()).unwrap();
        std::fs::write(&config_path, content).expect("Failed to write test config");
        config_path
    }

    /// Put a `git` stand-in first on PATH that creates the clone destination
    /// and appends its arguments to `git.log`
    #[cfg(unix)]
    pub fn install_fake_git(&self, cmd: &mut Command) -> PathBuf {
        use std::os::unix::fs::PermissionsExt;

        let bin_dir = self.temp_dir.path().join("bin");
        std::fs::create_dir_all(&bin_dir).unwrap();
        let log = self.temp_dir.path().join("git.log");

        let script = format!(
            "#!/bin/sh\n\
             if [ \"$1\" = \"--version\" ]; then echo \"git version 2.99.0\"; exit 0; fi\n\
             echo \"$@\" >> \"{}\"\n\
             for last; do :; done\n\
             mkdir -p \"$last\"\n",
            log.display()
        );
        let git = bin_dir.join("git");
        std::fs::write(&git, script).unwrap();
        std::fs::set_permissions(&git, std::fs::Permissions::from_mode(0o755)).unwrap();

        let path = std::env::var("PATH").unwrap_or_default();
        cmd.env("PATH", format!("{}:{}", bin_dir.display(), path));
        log
    }
}

/// Run a prepared command off the async runtime
pub async fn run(mut cmd: Command) -> Output {
    tokio::task::spawn_blocking(move || cmd.output().expect("Failed to execute command"))
        .await
        .unwrap()
}

pub fn group(id: u64, name: &str, path: &str) -> Value {
    json!({"id": id, "name": name, "path": path})
}

pub fn project(id: u64, name: &str, path: &str, url: &str) -> Value {
    json!({"id": id, "name": name, "path": path, "http_url_to_repo": url})
}

/// Assertion helpers for test validation
pub fn assert_contains_all(text: &str, expected: &[&str]) {
    for item in expected {
        assert!(
            text.contains(item),
            "Expected text to contain '{}', but it didn't. Text: {}",
            item,
            text
        );
    }
}
