//! Rule-based source and build rewriting.

use std::collections::BTreeMap;
use std::path::Path;
use std::sync::LazyLock;

use async_trait::async_trait;
use regex::Regex;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use super::descriptors::{
    gradle_from_pom, gradle_java_version, gradle_settings, pom_coordinates, pom_from_gradle,
    pom_java_version, rewrite_gradle_dependency, rewrite_pom_dependency, set_gradle_java_version,
    set_pom_java_version,
};
use super::rules::{
    GRADLE_TO_MAVEN, JAKARTA_TO_JAVAX, JAVA_VERSION, JAVAX_TO_JAKARTA, JUNIT_4_TO_5,
    LOG4J_TO_SLF4J, MAVEN_TO_GRADLE, RULE_GRADLE_TO_MAVEN, RULE_JAVA_RELEASE,
    RULE_MAVEN_TO_GRADLE, RuleTarget, SPRING_BOOT_2_TO_3, ee_packages, families_owned_by,
    find_rule, upgrade_for,
};
use super::scanner::{project_files, relative};
use crate::errors::CapabilityError;
use crate::migration::capabilities::{
    DependencyUpgrade, FileError, IssueResolution, StageContext, TransformOutcome,
    TransformRequest, Transformer,
};
use crate::migration::models::{DependencyStatus, Issue, IssueStatus};
use crate::migration::progress::StageProgress;
use crate::migration::request::{MigrationPlan, java_major};

/// Spring Boot 3 needs Java 17.
const SPRING_BOOT_3_MIN_JAVA: u32 = 17;
const SPRING_BOOT_3_VERSION: &str = "3.2.0";

struct Rewrite {
    family: &'static str,
    target: RuleTarget,
    min_target: u32,
    pattern: Regex,
    replacement: String,
    /// Must match the file before the rewrite is attempted.
    requires: Option<Regex>,
    description: &'static str,
}

fn rewrite(
    family: &'static str,
    target: RuleTarget,
    min_target: u32,
    pattern: &str,
    replacement: &str,
    description: &'static str,
) -> Rewrite {
    Rewrite {
        family,
        target,
        min_target,
        pattern: Regex::new(pattern).expect("rewrite pattern is valid"),
        replacement: replacement.to_string(),
        requires: None,
        description,
    }
}

static SOURCE_REWRITES: LazyLock<Vec<Rewrite>> = LazyLock::new(|| {
    use RuleTarget::{Java, Properties};
    let javax = format!(r"import (static )?javax\.({})\.", ee_packages());
    let jakarta = format!(r"import (static )?jakarta\.({})\.", ee_packages());
    let mut get_logger = rewrite(
        LOG4J_TO_SLF4J,
        Java,
        8,
        r"\bLogger\.getLogger\(",
        "LoggerFactory.getLogger(",
        "Switched to LoggerFactory.getLogger",
    );
    get_logger.requires = Some(Regex::new(r"import org\.apache\.log4j\.Logger;").expect("rewrite pattern is valid"));

    vec![
        rewrite(JAVA_VERSION, Java, 9, r"new (Integer|Long|Double|Float|Boolean|Byte|Short|Character)\(", "${1}.valueOf(", "Replaced boxed constructors with valueOf"),
        rewrite(JAVA_VERSION, Java, 9, r"(\w)\.newInstance\(\)", "${1}.getDeclaredConstructor().newInstance()", "Replaced Class.newInstance()"),
        rewrite(JAVA_VERSION, Java, 11, r"\.trim\(\)\.isEmpty\(\)", ".isBlank()", "Used String.isBlank()"),
        rewrite(JAVA_VERSION, Java, 11, r"new String\(Files\.readAllBytes\(([^()]*(?:\([^()]*\)[^()]*)*)\)\)", "Files.readString(${1})", "Used Files.readString"),
        rewrite(JAVAX_TO_JAKARTA, Java, 8, &javax, "import ${1}jakarta.${2}.", "Moved javax imports to jakarta"),
        rewrite(JAKARTA_TO_JAVAX, Java, 8, &jakarta, "import ${1}javax.${2}.", "Moved jakarta imports to javax"),
        rewrite(SPRING_BOOT_2_TO_3, Java, 8, r"\bEnableGlobalMethodSecurity\b", "EnableMethodSecurity", "Replaced @EnableGlobalMethodSecurity"),
        rewrite(SPRING_BOOT_2_TO_3, Java, 8, r"\.(antMatchers|mvcMatchers)\(", ".requestMatchers(", "Replaced antMatchers/mvcMatchers with requestMatchers"),
        rewrite(SPRING_BOOT_2_TO_3, Properties, 8, r"spring\.datasource\.initialization-mode", "spring.sql.init.mode", "Renamed spring.datasource.initialization-mode"),
        rewrite(JUNIT_4_TO_5, Java, 8, r"import org\.junit\.Test;", "import org.junit.jupiter.api.Test;", "Migrated JUnit imports"),
        rewrite(JUNIT_4_TO_5, Java, 8, r"import org\.junit\.Before;", "import org.junit.jupiter.api.BeforeEach;", "Migrated JUnit imports"),
        rewrite(JUNIT_4_TO_5, Java, 8, r"import org\.junit\.After;", "import org.junit.jupiter.api.AfterEach;", "Migrated JUnit imports"),
        rewrite(JUNIT_4_TO_5, Java, 8, r"import org\.junit\.BeforeClass;", "import org.junit.jupiter.api.BeforeAll;", "Migrated JUnit imports"),
        rewrite(JUNIT_4_TO_5, Java, 8, r"import org\.junit\.AfterClass;", "import org.junit.jupiter.api.AfterAll;", "Migrated JUnit imports"),
        rewrite(JUNIT_4_TO_5, Java, 8, r"import org\.junit\.Ignore;", "import org.junit.jupiter.api.Disabled;", "Migrated JUnit imports"),
        rewrite(JUNIT_4_TO_5, Java, 8, r"import org\.junit\.Assert;", "import org.junit.jupiter.api.Assertions;", "Migrated JUnit imports"),
        rewrite(JUNIT_4_TO_5, Java, 8, r"import static org\.junit\.Assert\.", "import static org.junit.jupiter.api.Assertions.", "Migrated JUnit imports"),
        rewrite(JUNIT_4_TO_5, Java, 8, r"import org\.junit\.runner\.RunWith;", "import org.junit.jupiter.api.extension.ExtendWith;", "Migrated JUnit imports"),
        rewrite(JUNIT_4_TO_5, Java, 8, r"\bAssert\.(assert\w+|fail)\(", "Assertions.${1}(", "Migrated JUnit assertions"),
        rewrite(JUNIT_4_TO_5, Java, 8, r"@BeforeClass\b", "@BeforeAll", "Migrated JUnit lifecycle annotations"),
        rewrite(JUNIT_4_TO_5, Java, 8, r"@AfterClass\b", "@AfterAll", "Migrated JUnit lifecycle annotations"),
        rewrite(JUNIT_4_TO_5, Java, 8, r"@Before\b", "@BeforeEach", "Migrated JUnit lifecycle annotations"),
        rewrite(JUNIT_4_TO_5, Java, 8, r"@After\b", "@AfterEach", "Migrated JUnit lifecycle annotations"),
        rewrite(JUNIT_4_TO_5, Java, 8, r"@Ignore\b", "@Disabled", "Migrated JUnit lifecycle annotations"),
        rewrite(JUNIT_4_TO_5, Java, 8, r"@RunWith\(", "@ExtendWith(", "Replaced @RunWith with @ExtendWith"),
        get_logger,
        rewrite(LOG4J_TO_SLF4J, Java, 8, r"import org\.apache\.log4j\.Logger;", "import org.slf4j.Logger;\nimport org.slf4j.LoggerFactory;", "Switched Log4j imports to SLF4J"),
    ]
});

static SPRING_PARENT: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?s)(<parent>.*?<artifactId>spring-boot-starter-parent</artifactId>\s*<version>)2\.[^<]*(</version>)")
        .expect("rewrite pattern is valid")
});
static SPRING_VERSION_PROPERTY: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(<spring-boot\.version>)2\.[^<]*(</spring-boot\.version>)").expect("rewrite pattern is valid")
});
static SETTINGS_NAME: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"rootProject\.name\s*=\s*['"]([^'"]+)['"]"#).expect("settings pattern is valid")
});

/// Applies the rewrites of every family the requested conversion owns and
/// reports which detected issues no longer match.
#[derive(Debug, Default, Clone)]
pub struct RuleTransformer;

#[async_trait]
impl Transformer for RuleTransformer {
    async fn transform(
        &self,
        ctx: &StageContext,
        request: &TransformRequest,
    ) -> Result<TransformOutcome, CapabilityError> {
        let root = ctx.source_dir.clone();
        let plan = ctx.plan.clone();
        let request = request.clone();
        let progress = ctx.progress.clone();
        let cancel = ctx.cancel.clone();
        tokio::task::spawn_blocking(move || {
            transform_project(&root, &plan, &request, &progress, &cancel)
        })
        .await
        .map_err(|e| CapabilityError::Permanent(format!("transform task failed: {}", e)))?
    }
}

/// Collects edits and bookkeeping for one conversion.
struct Session<'a> {
    root: &'a Path,
    outcome: TransformOutcome,
    /// description → number of files it touched
    tally: BTreeMap<&'static str, usize>,
}

impl<'a> Session<'a> {
    fn new(root: &'a Path) -> Self {
        Self {
            root,
            outcome: TransformOutcome::default(),
            tally: BTreeMap::new(),
        }
    }

    fn read(&self, rel: &str) -> Option<String> {
        std::fs::read_to_string(self.root.join(rel)).ok()
    }

    fn write(&mut self, rel: &str, content: &str) -> bool {
        match std::fs::write(self.root.join(rel), content) {
            Ok(()) => {
                if !self.outcome.modified_files.iter().any(|f| f == rel) {
                    self.outcome.modified_files.push(rel.to_string());
                }
                true
            }
            Err(e) => {
                self.outcome.file_errors.push(FileError {
                    path: rel.to_string(),
                    line: None,
                    message: format!("could not write file: {}", e),
                });
                false
            }
        }
    }

    fn change(&mut self, line: String) {
        self.outcome.changes.push(line);
    }
}

fn apply_source_rewrites(content: &str, target: RuleTarget, families: &[&str], java: u32) -> (String, Vec<&'static str>) {
    let mut text = content.to_string();
    let mut applied = Vec::new();
    for r in SOURCE_REWRITES.iter() {
        if r.target != target || java < r.min_target || !families.contains(&r.family) {
            continue;
        }
        if r.requires.as_ref().is_some_and(|req| !req.is_match(&text)) {
            continue;
        }
        if !r.pattern.is_match(&text) {
            continue;
        }
        text = r.pattern.replace_all(&text, r.replacement.as_str()).into_owned();
        if !applied.contains(&r.description) {
            applied.push(r.description);
        }
    }
    (text, applied)
}

fn rewrite_sources(
    session: &mut Session<'_>,
    families: &[&str],
    java: u32,
    progress: &StageProgress,
    cancel: &CancellationToken,
) -> Result<(), CapabilityError> {
    let files = project_files(session.root);
    for (index, path) in files.iter().enumerate() {
        if cancel.is_cancelled() {
            return Err(CapabilityError::Permanent("transform cancelled".to_string()));
        }
        let name = path.file_name().and_then(|n| n.to_str()).unwrap_or_default();
        let target = if name.ends_with(".java") {
            RuleTarget::Java
        } else if name.ends_with(".properties") {
            RuleTarget::Properties
        } else {
            continue;
        };
        let rel = relative(session.root, path);
        let Some(content) = session.read(&rel) else {
            debug!(file = %rel, "skipping unreadable source");
            continue;
        };
        let (rewritten, applied) = apply_source_rewrites(&content, target, families, java);
        if rewritten != content && session.write(&rel, &rewritten) {
            for description in applied {
                *session.tally.entry(description).or_default() += 1;
            }
        }
        if index % 20 == 0 {
            progress.report(
                (index * 80 / files.len()) as u8,
                format!("Rewriting sources ({}/{})", index + 1, files.len()),
            );
        }
    }
    Ok(())
}

/// Dependency upgrades this conversion applies, by the ledger's view of the
/// project.
fn rewrite_dependencies(
    session: &mut Session<'_>,
    plan: &MigrationPlan,
    request: &TransformRequest,
    descriptor: &str,
    content: &mut String,
) {
    let maven = descriptor == "pom.xml";
    for dep in &request.dependencies {
        if dep.status != DependencyStatus::Analyzing {
            continue;
        }
        let Some((upgrade, owner)) = upgrade_for(plan, &dep.group_id, &dep.artifact_id) else {
            continue;
        };
        if owner != request.conversion {
            continue;
        }
        let rewritten = if maven {
            rewrite_pom_dependency(content, &dep.group_id, &dep.artifact_id, &upgrade.replacement)
        } else {
            rewrite_gradle_dependency(content, &dep.group_id, &dep.artifact_id, &upgrade.replacement)
        };
        match rewritten {
            Some(updated) => {
                *content = updated;
                let new_version = upgrade.replacement.describe();
                session.change(format!("{}: {} -> {}", descriptor, dep.id, new_version));
                session.outcome.upgrades.push(DependencyUpgrade {
                    dependency_id: dep.id.clone(),
                    new_version,
                });
            }
            None => {
                session.change(format!(
                    "{}: could not upgrade {} (version {} is not declared here)",
                    descriptor, dep.id, dep.current_version
                ));
                session.outcome.failed_dependencies.push(dep.id.clone());
            }
        }
    }
}

fn rewrite_descriptors(
    session: &mut Session<'_>,
    plan: &MigrationPlan,
    request: &TransformRequest,
    families: &[&str],
) {
    let target = plan.target_major();
    let gradle_name = ["build.gradle", "build.gradle.kts"]
        .into_iter()
        .find(|name| session.root.join(name).is_file());

    if let Some(original) = session.read("pom.xml") {
        let mut pom = original.clone();
        if families.contains(&JAVA_VERSION)
            && pom_java_version(&pom).is_none_or(|v| java_major(&v) < target)
        {
            pom = set_pom_java_version(&pom, &plan.target_version);
            session.change(format!("pom.xml: Java release set to {}", plan.target_version));
        }
        if families.contains(&SPRING_BOOT_2_TO_3) {
            if target >= SPRING_BOOT_3_MIN_JAVA {
                let parent = format!("${{1}}{}${{2}}", SPRING_BOOT_3_VERSION);
                let updated = SPRING_PARENT.replace(&pom, parent.as_str());
                let updated = SPRING_VERSION_PROPERTY.replace(&updated, parent.as_str()).into_owned();
                if updated != pom {
                    pom = updated;
                    session.change(format!("pom.xml: Spring Boot upgraded to {}", SPRING_BOOT_3_VERSION));
                }
            } else {
                session.change(format!(
                    "Spring Boot 3 requires Java {}; parent version left unchanged",
                    SPRING_BOOT_3_MIN_JAVA
                ));
            }
        }
        rewrite_dependencies(session, plan, request, "pom.xml", &mut pom);
        if pom != original {
            session.write("pom.xml", &pom);
        }
    }

    if let Some(name) = gradle_name
        && let Some(original) = session.read(name)
    {
        let mut gradle = original.clone();
        if families.contains(&JAVA_VERSION)
            && gradle_java_version(&gradle).is_some_and(|v| java_major(&v) < target)
        {
            gradle = set_gradle_java_version(&gradle, &plan.target_version);
            session.change(format!("{}: Java release set to {}", name, plan.target_version));
        }
        rewrite_dependencies(session, plan, request, name, &mut gradle);
        if gradle != original {
            session.write(name, &gradle);
        }
    }

    if families.contains(&MAVEN_TO_GRADLE) {
        match session.read("pom.xml") {
            Some(pom) => {
                let java = pom_java_version(&pom).unwrap_or_else(|| plan.target_version.clone());
                let name = pom_coordinates(&pom)
                    .1
                    .unwrap_or_else(|| "migrated-project".to_string());
                if session.write("build.gradle", &gradle_from_pom(&pom, &java))
                    && session.write("settings.gradle", &gradle_settings(&name))
                {
                    session.change("Generated build.gradle and settings.gradle from pom.xml".to_string());
                }
            }
            None => session.change("No pom.xml found; Maven to Gradle conversion skipped".to_string()),
        }
    }

    if families.contains(&GRADLE_TO_MAVEN) {
        match gradle_name.and_then(|name| session.read(name)) {
            Some(gradle) => {
                let java = gradle_java_version(&gradle).unwrap_or_else(|| plan.target_version.clone());
                let name = ["settings.gradle", "settings.gradle.kts"]
                    .into_iter()
                    .filter_map(|f| session.read(f))
                    .find_map(|s| SETTINGS_NAME.captures(&s).map(|c| c[1].to_string()))
                    .unwrap_or_else(|| "migrated-project".to_string());
                if session.write("pom.xml", &pom_from_gradle(&gradle, &name, &java)) {
                    session.change("Generated pom.xml from the Gradle build".to_string());
                }
            }
            None => session.change("No Gradle build found; Gradle to Maven conversion skipped".to_string()),
        }
    }
}

fn declared_release(session: &Session<'_>) -> Option<u32> {
    if let Some(pom) = session.read("pom.xml") {
        return pom_java_version(&pom).map(|v| java_major(&v));
    }
    ["build.gradle", "build.gradle.kts"]
        .into_iter()
        .filter_map(|f| session.read(f))
        .find_map(|g| gradle_java_version(&g))
        .map(|v| java_major(&v))
}

fn resolve(issue: &Issue, status: IssueStatus, fix: impl Into<String>) -> IssueResolution {
    IssueResolution {
        issue_id: issue.id.clone(),
        status,
        fix_description: Some(fix.into()),
    }
}

/// Decide the new status of each open issue by looking at the tree as it
/// is now. Issues that still match stay `detected`.
fn resolve_issues(session: &Session<'_>, plan: &MigrationPlan, issues: &[Issue]) -> Vec<IssueResolution> {
    let target = plan.target_major();
    let generated = |file: &str| session.outcome.modified_files.iter().any(|f| f == file);
    let mut resolutions = Vec::new();

    for issue in issues {
        let Some(rule_id) = issue.rule_id.as_deref() else { continue };
        let resolution = match rule_id {
            RULE_JAVA_RELEASE => declared_release(session)
                .filter(|v| *v >= target)
                .map(|v| resolve(issue, IssueStatus::Fixed, format!("Declared Java release raised to {}", v))),
            RULE_MAVEN_TO_GRADLE => Some(if generated("build.gradle") {
                resolve(issue, IssueStatus::Fixed, "Generated build.gradle")
            } else {
                resolve(issue, IssueStatus::ManualReview, "Convert the Maven build by hand")
            }),
            RULE_GRADLE_TO_MAVEN => Some(if generated("pom.xml") {
                resolve(issue, IssueStatus::Fixed, "Generated pom.xml")
            } else {
                resolve(issue, IssueStatus::ManualReview, "Convert the Gradle build by hand")
            }),
            id => match find_rule(id) {
                Some(compiled) if !compiled.rule.auto_fixable => Some(resolve(
                    issue,
                    IssueStatus::ManualReview,
                    compiled.rule.suggested_fix,
                )),
                Some(compiled) => session
                    .read(&issue.file_path)
                    .filter(|content| !compiled.applies(content))
                    .map(|_| resolve(issue, IssueStatus::Fixed, compiled.rule.suggested_fix)),
                None => None,
            },
        };
        resolutions.extend(resolution);
    }
    resolutions
}

/// Synchronous body of [`RuleTransformer`].
pub fn transform_project(
    root: &Path,
    plan: &MigrationPlan,
    request: &TransformRequest,
    progress: &StageProgress,
    cancel: &CancellationToken,
) -> Result<TransformOutcome, CapabilityError> {
    if !root.is_dir() {
        return Err(CapabilityError::Permanent(format!(
            "checkout not found at {}",
            root.display()
        )));
    }
    let families = families_owned_by(plan, &request.conversion);
    let mut session = Session::new(root);

    if plan.options.auto_fix {
        rewrite_sources(&mut session, &families, plan.target_major(), progress, cancel)?;
    } else {
        session.change(format!(
            "{}: automatic source fixes disabled, only build files were changed",
            request.conversion
        ));
    }
    progress.report(85, "Updating build files");
    rewrite_descriptors(&mut session, plan, request, &families);

    let tally = std::mem::take(&mut session.tally);
    for (description, files) in tally {
        session.change(format!("{} in {} file(s)", description, files));
    }
    let resolutions = resolve_issues(&session, plan, &request.issues);
    session.outcome.resolutions = resolutions;
    progress.report(100, format!("{} applied", request.conversion));
    Ok(session.outcome)
}
