//! Service configuration.
//!
//! Settings are layered, later layers winning:
//!
//! 1. Built-in defaults
//! 2. `migrator.toml` (or the file passed with `--config`)
//! 3. Environment variables (`MIGRATOR_*`, plus `WORK_DIR`)
//! 4. Command-line flags
//!
//! ```toml
//! [server]
//! host = "127.0.0.1"
//! port = 8000
//!
//! [workspace]
//! root = "tmp/migrations"
//! artifacts_root = "tmp/artifacts"
//!
//! [pipeline]
//! max_concurrent_jobs = 4
//! clone_timeout_secs = 300
//! clone_max_retries = 3
//! strict_tests = false
//!
//! [tools]
//! git_cmd = "git"
//! publish_remote = "https://github.com/acme"
//!
//! [logging]
//! level = "info"
//! json = false
//! ```

use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use anyhow::{Context, Result, bail};
use serde::{Deserialize, Serialize};

use crate::migration::machine::PipelinePolicy;
use crate::migration::registry::RegistrySettings;

/// Default config file name, looked up in the working directory.
pub const DEFAULT_CONFIG_FILE: &str = "migrator.toml";

#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct MigratorConfig {
    #[serde(default)]
    pub server: ServerSection,
    #[serde(default)]
    pub workspace: WorkspaceSection,
    #[serde(default)]
    pub pipeline: PipelineSection,
    #[serde(default)]
    pub tools: ToolsSection,
    #[serde(default)]
    pub logging: LoggingSection,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ServerSection {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    /// Allow any origin (local front-end development).
    #[serde(default)]
    pub cors_permissive: bool,
}

impl Default for ServerSection {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            cors_permissive: false,
        }
    }
}

fn default_host() -> String {
    "127.0.0.1".to_string()
}

fn default_port() -> u16 {
    8000
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct WorkspaceSection {
    /// Parent of the per-job scratch directories.
    #[serde(default = "default_workspace_root")]
    pub root: PathBuf,
    /// Where generated reports and archives are kept.
    #[serde(default = "default_artifacts_root")]
    pub artifacts_root: PathBuf,
    /// Remove leftover job directories at startup.
    #[serde(default = "default_true")]
    pub sweep_on_start: bool,
}

impl Default for WorkspaceSection {
    fn default() -> Self {
        Self {
            root: default_workspace_root(),
            artifacts_root: default_artifacts_root(),
            sweep_on_start: true,
        }
    }
}

fn default_workspace_root() -> PathBuf {
    PathBuf::from("tmp/migrations")
}

fn default_artifacts_root() -> PathBuf {
    PathBuf::from("tmp/artifacts")
}

fn default_true() -> bool {
    true
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PipelineSection {
    #[serde(default = "default_max_concurrent_jobs")]
    pub max_concurrent_jobs: usize,
    #[serde(default = "default_clone_timeout_secs")]
    pub clone_timeout_secs: u64,
    #[serde(default = "default_clone_max_retries")]
    pub clone_max_retries: u32,
    #[serde(default = "default_clone_retry_backoff_ms")]
    pub clone_retry_backoff_ms: u64,
    #[serde(default = "default_stage_timeout_secs")]
    pub stage_timeout_secs: u64,
    /// Fail a job when tests fail instead of reporting the counts.
    #[serde(default)]
    pub strict_tests: bool,
    /// Log lines attached to a failed job's error context.
    #[serde(default = "default_failure_log_tail")]
    pub failure_log_tail: usize,
}

impl Default for PipelineSection {
    fn default() -> Self {
        Self {
            max_concurrent_jobs: default_max_concurrent_jobs(),
            clone_timeout_secs: default_clone_timeout_secs(),
            clone_max_retries: default_clone_max_retries(),
            clone_retry_backoff_ms: default_clone_retry_backoff_ms(),
            stage_timeout_secs: default_stage_timeout_secs(),
            strict_tests: false,
            failure_log_tail: default_failure_log_tail(),
        }
    }
}

fn default_max_concurrent_jobs() -> usize {
    4
}

fn default_clone_timeout_secs() -> u64 {
    300
}

fn default_clone_max_retries() -> u32 {
    3
}

fn default_clone_retry_backoff_ms() -> u64 {
    2000
}

fn default_stage_timeout_secs() -> u64 {
    1800
}

fn default_failure_log_tail() -> usize {
    20
}

impl PipelineSection {
    pub fn policy(&self) -> PipelinePolicy {
        PipelinePolicy {
            clone_timeout: Duration::from_secs(self.clone_timeout_secs),
            clone_max_retries: self.clone_max_retries,
            clone_retry_backoff: Duration::from_millis(self.clone_retry_backoff_ms),
            stage_timeout: Duration::from_secs(self.stage_timeout_secs),
            strict_tests: self.strict_tests,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ToolsSection {
    #[serde(default = "default_git_cmd")]
    pub git_cmd: String,
    #[serde(default = "default_maven_cmd")]
    pub maven_cmd: String,
    #[serde(default = "default_gradle_cmd")]
    pub gradle_cmd: String,
    /// Base URL migrated repositories are pushed under. Publishing is off
    /// when unset.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub publish_remote: Option<String>,
}

impl Default for ToolsSection {
    fn default() -> Self {
        Self {
            git_cmd: default_git_cmd(),
            maven_cmd: default_maven_cmd(),
            gradle_cmd: default_gradle_cmd(),
            publish_remote: None,
        }
    }
}

fn default_git_cmd() -> String {
    "git".to_string()
}

fn default_maven_cmd() -> String {
    "mvn".to_string()
}

fn default_gradle_cmd() -> String {
    "gradle".to_string()
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct LoggingSection {
    #[serde(default = "default_log_level")]
    pub level: String,
    #[serde(default)]
    pub json: bool,
}

impl Default for LoggingSection {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            json: false,
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

impl MigratorConfig {
    /// Load configuration from a TOML file.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;
        Self::parse(&content)
            .with_context(|| format!("Invalid config file: {}", path.display()))
    }

    /// Parse configuration from a TOML string.
    pub fn parse(content: &str) -> Result<Self> {
        toml::from_str(content).context("Failed to parse migrator.toml")
    }

    /// Load `path` when given, else `migrator.toml` in the working directory
    /// if present, else defaults. An explicitly named file must exist.
    pub fn load_or_default(path: Option<&Path>) -> Result<Self> {
        match path {
            Some(path) => Self::load(path),
            None => {
                let default_path = Path::new(DEFAULT_CONFIG_FILE);
                if default_path.exists() {
                    Self::load(default_path)
                } else {
                    Ok(Self::default())
                }
            }
        }
    }

    /// Load the file layer and apply the process environment on top.
    pub fn resolve(path: Option<&Path>) -> Result<Self> {
        let mut config = Self::load_or_default(path)?;
        config.apply_env(|key| std::env::var(key).ok())?;
        Ok(config)
    }

    /// Apply environment overrides read through `lookup`.
    pub fn apply_env(&mut self, lookup: impl Fn(&str) -> Option<String>) -> Result<()> {
        if let Some(host) = lookup("MIGRATOR_HOST") {
            self.server.host = host;
        }
        if let Some(port) = parse_env(&lookup, "MIGRATOR_PORT")? {
            self.server.port = port;
        }
        if let Some(root) = lookup("MIGRATOR_WORK_DIR").or_else(|| lookup("WORK_DIR")) {
            self.workspace.root = PathBuf::from(root);
        }
        if let Some(root) = lookup("MIGRATOR_ARTIFACTS_DIR") {
            self.workspace.artifacts_root = PathBuf::from(root);
        }
        if let Some(n) = parse_env(&lookup, "MIGRATOR_MAX_CONCURRENT_JOBS")? {
            self.pipeline.max_concurrent_jobs = n;
        }
        if let Some(secs) = parse_env(&lookup, "MIGRATOR_CLONE_TIMEOUT_SECS")? {
            self.pipeline.clone_timeout_secs = secs;
        }
        if let Some(n) = parse_env(&lookup, "MIGRATOR_CLONE_MAX_RETRIES")? {
            self.pipeline.clone_max_retries = n;
        }
        if let Some(secs) = parse_env(&lookup, "MIGRATOR_STAGE_TIMEOUT_SECS")? {
            self.pipeline.stage_timeout_secs = secs;
        }
        if let Some(strict) = lookup("MIGRATOR_STRICT_TESTS") {
            self.pipeline.strict_tests = parse_bool(&strict);
        }
        if let Some(remote) = lookup("MIGRATOR_PUBLISH_REMOTE") {
            self.tools.publish_remote = Some(remote).filter(|r| !r.trim().is_empty());
        }
        if let Some(level) = lookup("MIGRATOR_LOG_LEVEL") {
            self.logging.level = level;
        }
        if let Some(json) = lookup("MIGRATOR_LOG_JSON") {
            self.logging.json = parse_bool(&json);
        }
        Ok(())
    }

    /// Check the configuration. Hard errors abort; the returned strings are
    /// warnings worth showing but not fatal.
    pub fn validate(&self) -> Result<Vec<String>> {
        let pipeline = &self.pipeline;
        if pipeline.max_concurrent_jobs == 0 {
            bail!("pipeline.max_concurrent_jobs must be at least 1");
        }
        if pipeline.clone_timeout_secs == 0 {
            bail!("pipeline.clone_timeout_secs must be greater than 0");
        }
        if pipeline.stage_timeout_secs == 0 {
            bail!("pipeline.stage_timeout_secs must be greater than 0");
        }
        if self.workspace.root == self.workspace.artifacts_root {
            bail!("workspace.root and workspace.artifacts_root must differ");
        }

        let mut warnings = Vec::new();
        if self.workspace.artifacts_root.starts_with(&self.workspace.root) {
            warnings.push(format!(
                "artifacts_root '{}' is inside the workspace root",
                self.workspace.artifacts_root.display()
            ));
        }
        if self.workspace.root.starts_with(&self.workspace.artifacts_root) {
            warnings.push(format!(
                "workspace root '{}' is inside artifacts_root",
                self.workspace.root.display()
            ));
        }
        if pipeline.clone_timeout_secs > pipeline.stage_timeout_secs {
            warnings.push(format!(
                "clone_timeout_secs ({}) exceeds stage_timeout_secs ({})",
                pipeline.clone_timeout_secs, pipeline.stage_timeout_secs
            ));
        }
        if pipeline.clone_max_retries > 10 {
            warnings.push(format!(
                "clone_max_retries = {} will keep failing clones alive for a long time",
                pipeline.clone_max_retries
            ));
        }
        if let Some(remote) = &self.tools.publish_remote
            && !remote.starts_with("https://")
        {
            warnings.push(format!(
                "publish_remote '{}' is not an https URL; access tokens are only injected into https remotes",
                remote
            ));
        }
        if tracing_subscriber::EnvFilter::try_new(&self.logging.level).is_err() {
            warnings.push(format!("Invalid logging.level '{}'", self.logging.level));
        }
        Ok(warnings)
    }

    pub fn registry_settings(&self) -> RegistrySettings {
        RegistrySettings {
            workspace_root: self.workspace.root.clone(),
            max_concurrent_jobs: self.pipeline.max_concurrent_jobs,
            policy: self.pipeline.policy(),
            failure_log_tail: self.pipeline.failure_log_tail,
        }
    }

    pub fn to_toml(&self) -> Result<String> {
        toml::to_string_pretty(self).context("Failed to serialize configuration")
    }

    /// Write the configuration to `path`.
    pub fn save(&self, path: &Path) -> Result<()> {
        std::fs::write(path, self.to_toml()?)
            .with_context(|| format!("Failed to write config file: {}", path.display()))
    }
}

fn parse_env<T>(lookup: &impl Fn(&str) -> Option<String>, key: &str) -> Result<Option<T>>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match lookup(key) {
        None => Ok(None),
        Some(raw) => match raw.trim().parse() {
            Ok(value) => Ok(Some(value)),
            Err(e) => bail!("Invalid value '{}' for {}: {}", raw, key, e),
        },
    }
}

fn parse_bool(raw: &str) -> bool {
    matches!(
        raw.trim().to_ascii_lowercase().as_str(),
        "1" | "true" | "yes" | "on"
    )
}
