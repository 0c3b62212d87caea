//! Issue and dependency bookkeeping for one job.
//!
//! Issues move only forward: `detected` → `fixed | manual_review | ignored`.
//! Dependencies are recorded at analysis time and only the transform stage
//! changes their status.

use std::sync::{PoisonError, RwLock};

use chrono::Utc;
use serde::Serialize;

use super::models::{
    DependencyChange, DependencyStatus, Issue, IssueSeverity, IssueStatus, NewDependency, NewIssue,
};
use crate::errors::LedgerError;

/// Aggregate counts used by snapshots and reports.
#[derive(Debug, Clone, Copy, Default, Serialize, PartialEq, Eq)]
pub struct LedgerCounts {
    pub total_issues: u32,
    pub errors: u32,
    pub warnings: u32,
    pub infos: u32,
    pub detected: u32,
    pub fixed: u32,
    pub manual_review: u32,
    pub ignored: u32,
    pub dependencies: u32,
    pub dependencies_upgraded: u32,
    pub dependencies_failed: u32,
}

impl LedgerCounts {
    /// Issues still needing attention.
    pub fn remaining(&self) -> u32 {
        self.detected + self.manual_review
    }
}

#[derive(Default)]
struct LedgerState {
    issues: Vec<Issue>,
    dependencies: Vec<DependencyChange>,
    next_issue: u32,
}

#[derive(Default)]
pub struct Ledger {
    state: RwLock<LedgerState>,
}

impl Ledger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append an issue with status `detected`; returns its `ISS-nnnn` id.
    pub fn record_issue(&self, issue: NewIssue) -> String {
        let mut state = self.state.write().unwrap_or_else(PoisonError::into_inner);
        state.next_issue += 1;
        let id = format!("ISS-{:04}", state.next_issue);
        state.issues.push(Issue {
            id: id.clone(),
            severity: issue.severity,
            status: IssueStatus::Detected,
            category: issue.category,
            message: issue.message,
            file_path: issue.file_path,
            line: issue.line,
            column: issue.column,
            snippet: issue.snippet,
            suggested_fix: issue.suggested_fix,
            fix_description: None,
            fixed_at: None,
            conversion: issue.conversion,
            rule_id: issue.rule_id,
        });
        id
    }

    /// Record a file-scoped capability failure: an `error` issue parked in
    /// `manual_review` straight away.
    pub fn record_file_error(
        &self,
        conversion: Option<&str>,
        file_path: impl Into<String>,
        line: Option<u32>,
        message: impl Into<String>,
    ) -> String {
        let mut issue = NewIssue::new(IssueSeverity::Error, "Processing Error", message, file_path);
        issue.line = line;
        issue.conversion = conversion.map(str::to_string);
        let id = self.record_issue(issue);
        // A freshly detected issue always accepts manual_review.
        let _ = self.resolve_issue(&id, IssueStatus::ManualReview, None);
        id
    }

    /// Move an issue out of `detected`.
    ///
    /// Setting the status an issue already has is a no-op; any other change
    /// to a terminal issue, or a move back to `detected`, is rejected.
    pub fn resolve_issue(
        &self,
        id: &str,
        status: IssueStatus,
        fix_description: Option<String>,
    ) -> Result<(), LedgerError> {
        let mut state = self.state.write().unwrap_or_else(PoisonError::into_inner);
        let issue = state
            .issues
            .iter_mut()
            .find(|i| i.id == id)
            .ok_or_else(|| LedgerError::UnknownIssue(id.to_string()))?;

        if issue.status == status {
            return Ok(());
        }
        if issue.status.is_terminal() || status == IssueStatus::Detected {
            return Err(LedgerError::IllegalIssueTransition {
                id: id.to_string(),
                from: issue.status,
                to: status,
            });
        }

        issue.status = status;
        if fix_description.is_some() {
            issue.fix_description = fix_description;
        }
        if status == IssueStatus::Fixed {
            issue.fixed_at = Some(Utc::now());
        }
        Ok(())
    }

    /// Record a discovered dependency. Re-recording the same coordinates
    /// returns the existing id.
    pub fn record_dependency(&self, dep: NewDependency) -> String {
        let id = format!("{}:{}", dep.group_id, dep.artifact_id);
        let mut state = self.state.write().unwrap_or_else(PoisonError::into_inner);
        if state.dependencies.iter().any(|d| d.id == id) {
            return id;
        }
        let status = match &dep.proposed_version {
            Some(v) if *v != dep.current_version => DependencyStatus::Analyzing,
            _ => DependencyStatus::Unchanged,
        };
        state.dependencies.push(DependencyChange {
            id: id.clone(),
            group_id: dep.group_id,
            artifact_id: dep.artifact_id,
            current_version: dep.current_version,
            new_version: dep.proposed_version.filter(|_| status == DependencyStatus::Analyzing),
            status,
        });
        id
    }

    pub fn upgrade_dependency(&self, id: &str, new_version: impl Into<String>) -> Result<(), LedgerError> {
        let mut state = self.state.write().unwrap_or_else(PoisonError::into_inner);
        let dep = state
            .dependencies
            .iter_mut()
            .find(|d| d.id == id)
            .ok_or_else(|| LedgerError::UnknownDependency(id.to_string()))?;
        dep.new_version = Some(new_version.into());
        dep.status = DependencyStatus::Upgraded;
        Ok(())
    }

    pub fn fail_dependency(&self, id: &str) -> Result<(), LedgerError> {
        let mut state = self.state.write().unwrap_or_else(PoisonError::into_inner);
        let dep = state
            .dependencies
            .iter_mut()
            .find(|d| d.id == id)
            .ok_or_else(|| LedgerError::UnknownDependency(id.to_string()))?;
        dep.status = DependencyStatus::Failed;
        Ok(())
    }

    pub fn issues(&self) -> Vec<Issue> {
        self.state
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .issues
            .clone()
    }

    /// Issues owned by `conversion` that are still `detected`.
    pub fn open_issues_for(&self, conversion: &str) -> Vec<Issue> {
        self.state
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .issues
            .iter()
            .filter(|i| i.status == IssueStatus::Detected && i.conversion.as_deref() == Some(conversion))
            .cloned()
            .collect()
    }

    pub fn dependencies(&self) -> Vec<DependencyChange> {
        self.state
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .dependencies
            .clone()
    }

    pub fn counts(&self) -> LedgerCounts {
        let state = self.state.read().unwrap_or_else(PoisonError::into_inner);
        let mut counts = LedgerCounts::default();
        for issue in &state.issues {
            counts.total_issues += 1;
            match issue.severity {
                IssueSeverity::Error => counts.errors += 1,
                IssueSeverity::Warning => counts.warnings += 1,
                IssueSeverity::Info => counts.infos += 1,
            }
            match issue.status {
                IssueStatus::Detected => counts.detected += 1,
                IssueStatus::Fixed => counts.fixed += 1,
                IssueStatus::ManualReview => counts.manual_review += 1,
                IssueStatus::Ignored => counts.ignored += 1,
            }
        }
        for dep in &state.dependencies {
            counts.dependencies += 1;
            match dep.status {
                DependencyStatus::Upgraded => counts.dependencies_upgraded += 1,
                DependencyStatus::Failed => counts.dependencies_failed += 1,
                _ => {}
            }
        }
        counts
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn issue(conversion: &str) -> NewIssue {
        let mut issue = NewIssue::new(
            IssueSeverity::Warning,
            "Deprecated API",
            "new Integer() is deprecated",
            "src/main/java/App.java",
        );
        issue.conversion = Some(conversion.to_string());
        issue
    }

    fn dep(group: &str, artifact: &str, current: &str, proposed: Option<&str>) -> NewDependency {
        NewDependency {
            group_id: group.into(),
            artifact_id: artifact.into(),
            current_version: current.into(),
            proposed_version: proposed.map(str::to_string),
        }
    }

    #[test]
    fn test_record_issue_assigns_sequential_ids() {
        let ledger = Ledger::new();
        assert_eq!(ledger.record_issue(issue("java_version")), "ISS-0001");
        assert_eq!(ledger.record_issue(issue("java_version")), "ISS-0002");
        let issues = ledger.issues();
        assert!(issues.iter().all(|i| i.status == IssueStatus::Detected));
    }

    #[test]
    fn test_resolve_issue_forward() {
        let ledger = Ledger::new();
        let id = ledger.record_issue(issue("java_version"));
        ledger
            .resolve_issue(&id, IssueStatus::Fixed, Some("Integer.valueOf".into()))
            .unwrap();
        let resolved = &ledger.issues()[0];
        assert_eq!(resolved.status, IssueStatus::Fixed);
        assert!(resolved.fixed_at.is_some());
        assert_eq!(resolved.fix_description.as_deref(), Some("Integer.valueOf"));
    }

    #[test]
    fn test_resolve_same_terminal_status_is_noop() {
        let ledger = Ledger::new();
        let id = ledger.record_issue(issue("java_version"));
        ledger.resolve_issue(&id, IssueStatus::Ignored, None).unwrap();
        ledger.resolve_issue(&id, IssueStatus::Ignored, None).unwrap();
        assert_eq!(ledger.issues()[0].status, IssueStatus::Ignored);
    }

    #[test]
    fn test_no_resurrection_or_terminal_change() {
        let ledger = Ledger::new();
        let id = ledger.record_issue(issue("java_version"));
        ledger.resolve_issue(&id, IssueStatus::Fixed, None).unwrap();

        let back = ledger.resolve_issue(&id, IssueStatus::Detected, None);
        assert!(matches!(back, Err(LedgerError::IllegalIssueTransition { .. })));

        let sideways = ledger.resolve_issue(&id, IssueStatus::ManualReview, None);
        assert!(matches!(sideways, Err(LedgerError::IllegalIssueTransition { .. })));
        assert_eq!(ledger.issues()[0].status, IssueStatus::Fixed);
    }

    #[test]
    fn test_resolve_unknown_issue() {
        let ledger = Ledger::new();
        assert_eq!(
            ledger.resolve_issue("ISS-9999", IssueStatus::Fixed, None),
            Err(LedgerError::UnknownIssue("ISS-9999".into()))
        );
    }

    #[test]
    fn test_record_file_error_is_manual_review_error() {
        let ledger = Ledger::new();
        ledger.record_file_error(Some("junit_4_to_5"), "src/test/java/AppTest.java", Some(3), "unparseable");
        let recorded = &ledger.issues()[0];
        assert_eq!(recorded.severity, IssueSeverity::Error);
        assert_eq!(recorded.status, IssueStatus::ManualReview);
        assert_eq!(recorded.line, Some(3));
        assert_eq!(recorded.conversion.as_deref(), Some("junit_4_to_5"));
    }

    #[test]
    fn test_open_issues_for_filters_by_conversion_and_status() {
        let ledger = Ledger::new();
        let a = ledger.record_issue(issue("java_version"));
        ledger.record_issue(issue("java_version"));
        ledger.record_issue(issue("junit_4_to_5"));
        ledger.resolve_issue(&a, IssueStatus::Fixed, None).unwrap();
        assert_eq!(ledger.open_issues_for("java_version").len(), 1);
        assert_eq!(ledger.open_issues_for("junit_4_to_5").len(), 1);
        assert!(ledger.open_issues_for("log4j_to_slf4j").is_empty());
    }

    #[test]
    fn test_dependency_lifecycle() {
        let ledger = Ledger::new();
        let junit = ledger.record_dependency(dep("junit", "junit", "4.12", Some("4.13.2")));
        let guava = ledger.record_dependency(dep("com.google.guava", "guava", "32.0", None));
        assert_eq!(junit, "junit:junit");

        let deps = ledger.dependencies();
        assert_eq!(deps[0].status, DependencyStatus::Analyzing);
        assert_eq!(deps[1].status, DependencyStatus::Unchanged);
        assert!(deps[1].new_version.is_none());

        ledger.upgrade_dependency(&junit, "4.13.2").unwrap();
        ledger.fail_dependency(&guava).unwrap();
        let deps = ledger.dependencies();
        assert_eq!(deps[0].status, DependencyStatus::Upgraded);
        assert_eq!(deps[0].new_version.as_deref(), Some("4.13.2"));
        assert_eq!(deps[1].status, DependencyStatus::Failed);
    }

    #[test]
    fn test_upgrade_unknown_dependency_fails() {
        let ledger = Ledger::new();
        assert_eq!(
            ledger.upgrade_dependency("org.x:y", "1.0"),
            Err(LedgerError::UnknownDependency("org.x:y".into()))
        );
    }

    #[test]
    fn test_record_dependency_is_idempotent() {
        let ledger = Ledger::new();
        ledger.record_dependency(dep("junit", "junit", "4.12", Some("4.13.2")));
        ledger.record_dependency(dep("junit", "junit", "4.12", Some("4.13.2")));
        assert_eq!(ledger.dependencies().len(), 1);
    }

    #[test]
    fn test_counts() {
        let ledger = Ledger::new();
        let a = ledger.record_issue(issue("java_version"));
        ledger.record_issue(issue("java_version"));
        ledger.record_file_error(None, "pom.xml", None, "bad xml");
        ledger.resolve_issue(&a, IssueStatus::Fixed, None).unwrap();
        let junit = ledger.record_dependency(dep("junit", "junit", "4.12", Some("4.13.2")));
        ledger.upgrade_dependency(&junit, "4.13.2").unwrap();

        let counts = ledger.counts();
        assert_eq!(counts.total_issues, 3);
        assert_eq!(counts.warnings, 2);
        assert_eq!(counts.errors, 1);
        assert_eq!(counts.fixed, 1);
        assert_eq!(counts.remaining(), 2);
        assert_eq!(counts.dependencies_upgraded, 1);
    }
}
