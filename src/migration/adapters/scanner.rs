//! Rule-based project analysis.

use std::path::{Path, PathBuf};
use std::sync::LazyLock;

use async_trait::async_trait;
use regex::Regex;
use tokio_util::sync::CancellationToken;
use tracing::debug;
use walkdir::{DirEntry, WalkDir};

use super::descriptors::{
    DeclaredDependency, gradle_dependencies, gradle_java_version, pom_dependencies,
    pom_java_version,
};
use super::rules::{
    CompiledRule, GRADLE_TO_MAVEN, JAVA_VERSION, MAVEN_TO_GRADLE, RULE_GRADLE_TO_MAVEN,
    RULE_JAVA_RELEASE, RULE_MAVEN_TO_GRADLE, RuleTarget, applicable_rules, upgrade_for,
};
use crate::errors::CapabilityError;
use crate::migration::capabilities::{AnalysisOutcome, Analyzer, FileError, StageContext};
use crate::migration::models::{ApiEndpoint, BuildTool, IssueSeverity, NewDependency, NewIssue};
use crate::migration::progress::StageProgress;
use crate::migration::request::{MigrationPlan, java_major};

/// Directories never descended into.
pub const SKIPPED_DIRS: &[&str] = &["target", "build", "out", "node_modules"];

const SNIPPET_MAX: usize = 200;

static METHOD_MAPPING: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"@(Get|Post|Put|Delete|Patch)Mapping\b(?:\s*\(\s*(?:(?:value|path)\s*=\s*)?\{?\s*"([^"]*)")?"#)
        .expect("mapping pattern is valid")
});
static REQUEST_MAPPING: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"@RequestMapping\b(?:\s*\(([^)]*)\))?").expect("mapping pattern is valid")
});
static QUOTED: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#""([^"]*)""#).expect("quoted pattern is valid"));
static REQUEST_METHOD: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"RequestMethod\.(\w+)").expect("method pattern is valid"));
static TYPE_DECLARATION: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\b(class|interface)\s+\w+").expect("declaration pattern is valid")
});

/// Walks the checkout, applies the detection rules that the job's
/// conversions own and collects dependencies and REST endpoints.
#[derive(Debug, Default, Clone)]
pub struct RuleAnalyzer;

#[async_trait]
impl Analyzer for RuleAnalyzer {
    async fn analyze(&self, ctx: &StageContext) -> Result<AnalysisOutcome, CapabilityError> {
        let root = ctx.source_dir.clone();
        let plan = ctx.plan.clone();
        let progress = ctx.progress.clone();
        let cancel = ctx.cancel.clone();
        tokio::task::spawn_blocking(move || scan_project(&root, &plan, &progress, &cancel))
            .await
            .map_err(|e| CapabilityError::Permanent(format!("analysis task failed: {}", e)))?
    }
}

fn is_skipped(entry: &DirEntry) -> bool {
    if entry.depth() == 0 || !entry.file_type().is_dir() {
        return false;
    }
    let name = entry.file_name().to_string_lossy();
    name.starts_with('.') || SKIPPED_DIRS.contains(&&*name)
}

/// Every regular file under `root`, skipping hidden and build output
/// directories.
pub fn project_files(root: &Path) -> Vec<PathBuf> {
    WalkDir::new(root)
        .sort_by_file_name()
        .into_iter()
        .filter_entry(|e| !is_skipped(e))
        .filter_map(|e| match e {
            Ok(e) => Some(e),
            Err(err) => {
                debug!(error = %err, "skipping unreadable entry");
                None
            }
        })
        .filter(|e| e.file_type().is_file())
        .map(DirEntry::into_path)
        .collect()
}

/// Path relative to `root` with forward slashes.
pub fn relative(root: &Path, path: &Path) -> String {
    path.strip_prefix(root)
        .unwrap_or(path)
        .to_string_lossy()
        .replace('\\', "/")
}

pub fn detect_build_tool(root: &Path) -> BuildTool {
    if root.join("pom.xml").is_file() {
        BuildTool::Maven
    } else if root.join("build.gradle").is_file() || root.join("build.gradle.kts").is_file() {
        BuildTool::Gradle
    } else {
        BuildTool::Unknown
    }
}

fn gradle_file(root: &Path) -> Option<PathBuf> {
    ["build.gradle", "build.gradle.kts"]
        .iter()
        .map(|name| root.join(name))
        .find(|p| p.is_file())
}

fn read_text(root: &Path, path: &Path) -> Result<String, FileError> {
    let bytes = std::fs::read(path).map_err(|e| FileError {
        path: relative(root, path),
        line: None,
        message: format!("could not read file: {}", e),
    })?;
    String::from_utf8(bytes).map_err(|_| FileError {
        path: relative(root, path),
        line: None,
        message: "file is not valid UTF-8".to_string(),
    })
}

fn target_of(path: &Path) -> Option<RuleTarget> {
    let name = path.file_name()?.to_str()?;
    if name == "pom.xml" {
        Some(RuleTarget::Pom)
    } else if name.ends_with(".java") {
        Some(RuleTarget::Java)
    } else if name.ends_with(".properties") {
        Some(RuleTarget::Properties)
    } else {
        None
    }
}

/// One issue per rule per file, located at the first match.
pub fn match_rules(
    rules: &[(&'static CompiledRule, &'static str)],
    target: RuleTarget,
    file: &str,
    content: &str,
) -> Vec<NewIssue> {
    rules
        .iter()
        .filter(|(c, _)| c.rule.target == target && c.applies(content))
        .filter_map(|(c, owner)| {
            let m = c.regex.find(content)?;
            let line_start = content[..m.start()].rfind('\n').map_or(0, |i| i + 1);
            let line_end = content[m.start()..]
                .find('\n')
                .map_or(content.len(), |i| m.start() + i);
            let snippet: String = content[line_start..line_end].trim().chars().take(SNIPPET_MAX).collect();
            let mut issue = NewIssue::new(c.rule.severity, c.rule.category, c.rule.message, file);
            issue.line = Some(content[..m.start()].matches('\n').count() as u32 + 1);
            issue.column = Some(content[line_start..m.start()].chars().count() as u32 + 1);
            issue.snippet = Some(snippet);
            issue.suggested_fix = Some(c.rule.suggested_fix.to_string());
            issue.conversion = Some(owner.to_string());
            issue.rule_id = Some(c.rule.id.to_string());
            Some(issue)
        })
        .collect()
}

fn join_paths(prefix: &str, path: &str) -> String {
    let joined = format!(
        "{}/{}",
        prefix.trim_end_matches('/'),
        path.trim_start_matches('/')
    );
    let joined = joined.trim_end_matches('/');
    if joined.is_empty() {
        "/".to_string()
    } else if joined.starts_with('/') {
        joined.to_string()
    } else {
        format!("/{}", joined)
    }
}

/// Spring MVC endpoints declared in one source file. A `@RequestMapping`
/// before the type declaration is treated as the path prefix.
pub fn find_endpoints(content: &str, file: &str) -> Vec<ApiEndpoint> {
    let type_start = TYPE_DECLARATION.find(content).map_or(0, |m| m.start());
    let mut prefix = String::new();
    let mut endpoints = Vec::new();

    for caps in REQUEST_MAPPING.captures_iter(content) {
        let Some(whole) = caps.get(0) else { continue };
        let args = caps.get(1).map_or("", |m| m.as_str());
        let path = QUOTED.captures(args).map_or("", |c| c.get(1).map_or("", |m| m.as_str()));
        if whole.start() < type_start {
            prefix = path.to_string();
            continue;
        }
        let method = REQUEST_METHOD
            .captures(args)
            .map_or("REQUEST".to_string(), |c| c[1].to_ascii_uppercase());
        endpoints.push((whole.start(), method, path.to_string()));
    }
    for caps in METHOD_MAPPING.captures_iter(content) {
        let Some(whole) = caps.get(0) else { continue };
        let path = caps.get(2).map_or("", |m| m.as_str());
        endpoints.push((whole.start(), caps[1].to_ascii_uppercase(), path.to_string()));
    }

    endpoints.sort_by_key(|(at, _, _)| *at);
    endpoints
        .into_iter()
        .map(|(_, method, path)| ApiEndpoint {
            method,
            path: join_paths(&prefix, &path),
            file: file.to_string(),
        })
        .collect()
}

fn build_issue(
    severity: IssueSeverity,
    category: &str,
    message: String,
    file: &str,
    fix: &str,
    conversion: &str,
    rule_id: &str,
) -> NewIssue {
    let mut issue = NewIssue::new(severity, category, message, file);
    issue.suggested_fix = Some(fix.to_string());
    issue.conversion = Some(conversion.to_string());
    issue.rule_id = Some(rule_id.to_string());
    issue
}

fn to_new_dependency(plan: &MigrationPlan, dep: DeclaredDependency) -> NewDependency {
    let proposed_version =
        upgrade_for(plan, &dep.group_id, &dep.artifact_id).map(|(u, _)| u.replacement.describe());
    NewDependency {
        group_id: dep.group_id,
        artifact_id: dep.artifact_id,
        current_version: dep.version.unwrap_or_else(|| "inherited".to_string()),
        proposed_version,
    }
}

/// Synchronous body of [`RuleAnalyzer`].
pub fn scan_project(
    root: &Path,
    plan: &MigrationPlan,
    progress: &StageProgress,
    cancel: &CancellationToken,
) -> Result<AnalysisOutcome, CapabilityError> {
    if !root.is_dir() {
        return Err(CapabilityError::Permanent(format!(
            "checkout not found at {}",
            root.display()
        )));
    }

    let mut outcome = AnalysisOutcome {
        build_tool: detect_build_tool(root),
        ..Default::default()
    };
    let rules = applicable_rules(plan);
    let files = project_files(root);
    outcome.total_files = files.len() as u32;
    let mut last_reported = 0u8;

    for (index, path) in files.iter().enumerate() {
        if cancel.is_cancelled() {
            return Err(CapabilityError::Permanent("analysis cancelled".to_string()));
        }
        let percent = ((index + 1) * 95 / files.len()) as u8;
        if percent >= last_reported + 10 {
            progress.report(percent, format!("Scanned {} of {} files", index + 1, files.len()));
            last_reported = percent;
        }

        let Some(target) = target_of(path) else { continue };
        let file = relative(root, path);
        if target == RuleTarget::Java {
            outcome.java_files += 1;
        }
        let content = match read_text(root, path) {
            Ok(content) => content,
            Err(e) => {
                outcome.file_errors.push(e);
                continue;
            }
        };

        outcome.issues.extend(match_rules(&rules, target, &file, &content));
        match target {
            RuleTarget::Java => outcome.endpoints.extend(find_endpoints(&content, &file)),
            RuleTarget::Pom => {
                if file == "pom.xml" {
                    outcome.detected_version =
                        Some(pom_java_version(&content).unwrap_or_else(|| "8".to_string()));
                }
                outcome
                    .dependencies
                    .extend(pom_dependencies(&content).into_iter().map(|d| to_new_dependency(plan, d)));
            }
            RuleTarget::Properties => {}
        }
    }

    if outcome.build_tool == BuildTool::Gradle
        && let Some(path) = gradle_file(root)
    {
        match read_text(root, &path) {
            Ok(content) => {
                outcome.detected_version =
                    Some(gradle_java_version(&content).unwrap_or_else(|| "8".to_string()));
                outcome
                    .dependencies
                    .extend(gradle_dependencies(&content).into_iter().map(|d| to_new_dependency(plan, d)));
            }
            Err(e) => outcome.file_errors.push(e),
        }
    }

    outcome.issues.extend(build_issues(root, plan, &outcome));
    progress.report(100, "Analysis finished");
    Ok(outcome)
}

/// Issues about the build descriptor itself rather than a pattern in a file.
fn build_issues(root: &Path, plan: &MigrationPlan, outcome: &AnalysisOutcome) -> Vec<NewIssue> {
    let mut issues = Vec::new();
    let descriptor = match outcome.build_tool {
        BuildTool::Maven => Some("pom.xml".to_string()),
        BuildTool::Gradle => gradle_file(root).map(|p| relative(root, &p)),
        BuildTool::Unknown => None,
    };

    if plan.has_conversion(JAVA_VERSION)
        && let (Some(file), Some(declared)) = (&descriptor, &outcome.detected_version)
        && java_major(declared) < plan.target_major()
    {
        issues.push(build_issue(
            IssueSeverity::Warning,
            "Language Level",
            format!(
                "Build declares Java {}, migration targets Java {}",
                declared, plan.target_version
            ),
            file,
            "Raise the declared Java release",
            JAVA_VERSION,
            RULE_JAVA_RELEASE,
        ));
    }
    if plan.has_conversion(MAVEN_TO_GRADLE) && outcome.build_tool == BuildTool::Maven {
        issues.push(build_issue(
            IssueSeverity::Info,
            "Build Tool",
            "Maven build will be converted to Gradle".to_string(),
            "pom.xml",
            "Generate build.gradle and settings.gradle",
            MAVEN_TO_GRADLE,
            RULE_MAVEN_TO_GRADLE,
        ));
    }
    if plan.has_conversion(GRADLE_TO_MAVEN)
        && outcome.build_tool == BuildTool::Gradle
        && let Some(file) = &descriptor
    {
        issues.push(build_issue(
            IssueSeverity::Info,
            "Build Tool",
            "Gradle build will be converted to Maven".to_string(),
            file,
            "Generate pom.xml",
            GRADLE_TO_MAVEN,
            RULE_GRADLE_TO_MAVEN,
        ));
    }
    issues
}
