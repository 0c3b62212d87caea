//! Start-request payload and its validation into an immutable [`MigrationPlan`].

use std::cmp::Ordering;
use std::sync::LazyLock;

use regex::Regex;
use serde::Deserialize;

use super::catalog::{CONFLICTING_CONVERSIONS, conversion_type};
use super::models::{JobOptions, Platform};
use crate::errors::ValidationError;

static EMAIL_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[^@\s]+@[^@\s]+\.[^@\s.]+$").expect("email pattern is valid")
});

fn default_platform() -> String {
    "github".to_string()
}

fn default_source_version() -> String {
    "8".to_string()
}

fn default_target_version() -> String {
    "17".to_string()
}

fn default_true() -> bool {
    true
}

/// Body of `POST /api/migration/start`.
#[derive(Debug, Clone, Deserialize)]
pub struct MigrationRequest {
    #[serde(default)]
    pub source_repo_url: String,
    #[serde(default)]
    pub target_repo_name: Option<String>,
    #[serde(default = "default_platform")]
    pub platform: String,
    #[serde(default = "default_source_version", alias = "source_java_version")]
    pub source_version: String,
    #[serde(default = "default_target_version", alias = "target_java_version")]
    pub target_version: String,
    #[serde(default, alias = "access_token")]
    pub token: Option<String>,
    #[serde(default)]
    pub conversion_types: Vec<String>,
    #[serde(default = "default_true")]
    pub run_tests: bool,
    #[serde(default, alias = "run_sonar")]
    pub run_quality_scan: bool,
    #[serde(default = "default_true", alias = "fix_business_logic")]
    pub auto_fix: bool,
    #[serde(default)]
    pub email: Option<String>,
}

impl Default for MigrationRequest {
    fn default() -> Self {
        Self {
            source_repo_url: String::new(),
            target_repo_name: None,
            platform: default_platform(),
            source_version: default_source_version(),
            target_version: default_target_version(),
            token: None,
            conversion_types: Vec::new(),
            run_tests: true,
            run_quality_scan: false,
            auto_fix: true,
            email: None,
        }
    }
}

/// Credential for the hosting provider. Redacted from `Debug` output and
/// never serialized.
#[derive(Clone)]
pub struct AccessToken(String);

impl AccessToken {
    pub fn expose(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Debug for AccessToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("AccessToken(***)")
    }
}

/// A validated request. Owned by the job for its whole lifetime.
#[derive(Debug, Clone)]
pub struct MigrationPlan {
    pub source_repo_url: String,
    pub target_repo_name: String,
    pub platform: Platform,
    pub source_version: String,
    pub target_version: String,
    pub conversions: Vec<String>,
    pub options: JobOptions,
    pub access_token: Option<AccessToken>,
    pub notify_email: Option<String>,
}

impl MigrationPlan {
    /// Major release of the source version (`"1.8"` style versions map to 8).
    pub fn source_major(&self) -> u32 {
        java_major(&self.source_version)
    }

    pub fn target_major(&self) -> u32 {
        java_major(&self.target_version)
    }

    pub fn has_conversion(&self, id: &str) -> bool {
        self.conversions.iter().any(|c| c == id)
    }
}

impl MigrationRequest {
    /// Check the request shape. Nothing is allocated when this fails.
    pub fn validate(&self) -> Result<MigrationPlan, ValidationError> {
        let source_repo_url = self.source_repo_url.trim();
        if source_repo_url.is_empty() {
            return Err(ValidationError::EmptyField {
                field: "source_repo_url",
            });
        }

        let platform: Platform = self
            .platform
            .trim()
            .parse()
            .map_err(|_| ValidationError::UnknownPlatform(self.platform.clone()))?;

        let source_version = self.source_version.trim();
        let target_version = self.target_version.trim();
        let source = parse_version(source_version).ok_or_else(|| ValidationError::InvalidVersion {
            field: "source_version",
            value: source_version.to_string(),
        })?;
        let target = parse_version(target_version).ok_or_else(|| ValidationError::InvalidVersion {
            field: "target_version",
            value: target_version.to_string(),
        })?;
        if compare_releases(&target, &source) != Ordering::Greater {
            return Err(ValidationError::VersionNotIncreasing {
                source_version: source_version.to_string(),
                target: target_version.to_string(),
            });
        }

        let conversions = self.validate_conversions()?;

        if self.run_quality_scan && !self.run_tests {
            return Err(ValidationError::QualityScanRequiresTests);
        }

        let notify_email = match self.email.as_deref().map(str::trim) {
            None | Some("") => None,
            Some(addr) if EMAIL_RE.is_match(addr) => Some(addr.to_string()),
            Some(addr) => return Err(ValidationError::InvalidEmail(addr.to_string())),
        };

        let target_repo_name = match self.target_repo_name.as_deref().map(str::trim) {
            Some("") => {
                return Err(ValidationError::EmptyField {
                    field: "target_repo_name",
                });
            }
            Some(name) => name.to_string(),
            None => default_target_repo_name(source_repo_url, target_version),
        };

        let access_token = self
            .token
            .as_deref()
            .map(str::trim)
            .filter(|t| !t.is_empty())
            .map(|t| AccessToken(t.to_string()));

        Ok(MigrationPlan {
            source_repo_url: source_repo_url.to_string(),
            target_repo_name,
            platform,
            source_version: source_version.to_string(),
            target_version: target_version.to_string(),
            conversions,
            options: JobOptions {
                run_tests: self.run_tests,
                run_quality_scan: self.run_quality_scan,
                auto_fix: self.auto_fix,
            },
            access_token,
            notify_email,
        })
    }

    fn validate_conversions(&self) -> Result<Vec<String>, ValidationError> {
        if self.conversion_types.is_empty() {
            return Err(ValidationError::NoConversions);
        }
        let mut conversions: Vec<String> = Vec::with_capacity(self.conversion_types.len());
        for raw in &self.conversion_types {
            let id = raw.trim();
            if conversion_type(id).is_none() {
                return Err(ValidationError::UnknownConversion(id.to_string()));
            }
            if conversions.iter().any(|c| c == id) {
                return Err(ValidationError::DuplicateConversion(id.to_string()));
            }
            conversions.push(id.to_string());
        }
        for (first, second) in CONFLICTING_CONVERSIONS {
            if conversions.iter().any(|c| c == first) && conversions.iter().any(|c| c == second) {
                return Err(ValidationError::ConflictingConversions {
                    first: first.to_string(),
                    second: second.to_string(),
                });
            }
        }
        Ok(conversions)
    }
}

/// Parse a dot-separated numeric version such as `17` or `1.8.0`.
pub fn parse_version(raw: &str) -> Option<Vec<u32>> {
    if raw.is_empty() {
        return None;
    }
    raw.split('.').map(|part| part.parse::<u32>().ok()).collect()
}

/// Compare component-wise, treating missing trailing components as zero.
pub fn compare_versions(a: &[u32], b: &[u32]) -> Ordering {
    let len = a.len().max(b.len());
    for i in 0..len {
        let x = a.get(i).copied().unwrap_or(0);
        let y = b.get(i).copied().unwrap_or(0);
        match x.cmp(&y) {
            Ordering::Equal => continue,
            other => return other,
        }
    }
    Ordering::Equal
}

/// Strip the legacy `1.` prefix so `1.8.0` reads as release `8.0`.
fn release_components(version: &[u32]) -> &[u32] {
    match version {
        [1, rest @ ..] if !rest.is_empty() => rest,
        other => other,
    }
}

/// Order two Java versions by release, so `1.8` and `8` are the same release
/// and `1.9` comes after `8`.
pub fn compare_releases(a: &[u32], b: &[u32]) -> Ordering {
    compare_versions(release_components(a), release_components(b))
}

/// Major Java release: `"17"` → 17, `"1.8"` → 8, unparseable → 0.
pub fn java_major(version: &str) -> u32 {
    match parse_version(version.trim()).as_deref() {
        Some([1, minor, ..]) => *minor,
        Some([major, ..]) => *major,
        _ => 0,
    }
}

/// `migration_<target>_<repo>` where `<repo>` is the last path segment of the
/// source URL without a `.git` suffix.
pub fn default_target_repo_name(source_repo_url: &str, target_version: &str) -> String {
    let repo = source_repo_url
        .trim_end_matches('/')
        .rsplit(['/', ':'])
        .next()
        .unwrap_or(source_repo_url);
    let repo = repo.strip_suffix(".git").unwrap_or(repo);
    let repo = if repo.is_empty() { "repository" } else { repo };
    format!("migration_{}_{}", target_version.replace('.', "_"), repo)
}
