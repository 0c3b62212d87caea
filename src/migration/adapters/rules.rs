//! Detection rules and the known-upgrade table shared by the analyzer and
//! the transformer.
//!
//! Every rule belongs to a conversion family. A family is normally applied by
//! the conversion of the same name, but a Java version upgrade to 17 or later
//! also takes over the `javax_to_jakarta` family when that conversion was not
//! selected explicitly, since those releases ship without `javax.*` EE APIs.

use std::sync::LazyLock;

use regex::Regex;

use crate::migration::models::IssueSeverity;
use crate::migration::request::MigrationPlan;

/// Which files a rule is matched against.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RuleTarget {
    Java,
    Pom,
    Properties,
}

#[derive(Debug)]
pub struct Rule {
    pub id: &'static str,
    /// Conversion family the rule belongs to.
    pub family: &'static str,
    pub target: RuleTarget,
    pub pattern: &'static str,
    /// A second pattern the file must also contain for the rule to apply.
    pub requires: Option<&'static str>,
    pub severity: IssueSeverity,
    pub category: &'static str,
    pub message: &'static str,
    pub suggested_fix: &'static str,
    /// `false` means the transformer never rewrites the match; the issue is
    /// handed to a human.
    pub auto_fixable: bool,
    /// Lowest target Java release the rule is relevant for.
    pub min_target: u32,
}

pub const JAVA_VERSION: &str = "java_version";
pub const MAVEN_TO_GRADLE: &str = "maven_to_gradle";
pub const GRADLE_TO_MAVEN: &str = "gradle_to_maven";
pub const JAVAX_TO_JAKARTA: &str = "javax_to_jakarta";
pub const JAKARTA_TO_JAVAX: &str = "jakarta_to_javax";
pub const SPRING_BOOT_2_TO_3: &str = "spring_boot_2_to_3";
pub const JUNIT_4_TO_5: &str = "junit_4_to_5";
pub const LOG4J_TO_SLF4J: &str = "log4j_to_slf4j";

/// Raised by the analyzer when the declared language level is below the
/// target. Resolved once the build descriptor declares the target.
pub const RULE_JAVA_RELEASE: &str = "java-release-level";
pub const RULE_MAVEN_TO_GRADLE: &str = "build-maven-to-gradle";
pub const RULE_GRADLE_TO_MAVEN: &str = "build-gradle-to-maven";

const EE_PACKAGES: &str = "servlet|persistence|validation|annotation|inject|enterprise|ws\\.rs|transaction";

pub static RULES: &[Rule] = &[
    Rule {
        id: "boxed-constructor",
        family: JAVA_VERSION,
        target: RuleTarget::Java,
        pattern: r"new (Integer|Long|Double|Float|Boolean|Byte|Short|Character)\(",
        requires: None,
        severity: IssueSeverity::Error,
        category: "Deprecated Method",
        message: "Boxed primitive constructors are deprecated for removal",
        suggested_fix: "Use the valueOf factory method",
        auto_fixable: true,
        min_target: 9,
    },
    Rule {
        id: "class-new-instance",
        family: JAVA_VERSION,
        target: RuleTarget::Java,
        pattern: r"\w\.newInstance\(\)",
        requires: None,
        severity: IssueSeverity::Warning,
        category: "Deprecated Method",
        message: "Class.newInstance() is deprecated",
        suggested_fix: "Use getDeclaredConstructor().newInstance()",
        auto_fixable: true,
        min_target: 9,
    },
    Rule {
        id: "legacy-date",
        family: JAVA_VERSION,
        target: RuleTarget::Java,
        pattern: r"new Date\(\)",
        requires: None,
        severity: IssueSeverity::Warning,
        category: "Legacy API",
        message: "java.util.Date is superseded by java.time",
        suggested_fix: "Use Instant.now() or LocalDateTime.now()",
        auto_fixable: false,
        min_target: 8,
    },
    Rule {
        id: "simple-date-format",
        family: JAVA_VERSION,
        target: RuleTarget::Java,
        pattern: r"new SimpleDateFormat\(",
        requires: None,
        severity: IssueSeverity::Warning,
        category: "Legacy API",
        message: "SimpleDateFormat is not thread-safe",
        suggested_fix: "Use java.time.format.DateTimeFormatter",
        auto_fixable: false,
        min_target: 8,
    },
    Rule {
        id: "raw-collection",
        family: JAVA_VERSION,
        target: RuleTarget::Java,
        pattern: r"\b(List|Map|Set|ArrayList|HashMap|HashSet)\s+\w+\s*=\s*new\s+(ArrayList|HashMap|HashSet|LinkedList|TreeMap)\(\)",
        requires: None,
        severity: IssueSeverity::Warning,
        category: "Type Safety",
        message: "Raw collection type",
        suggested_fix: "Add type parameters or use the diamond operator",
        auto_fixable: false,
        min_target: 8,
    },
    Rule {
        id: "sun-misc",
        family: JAVA_VERSION,
        target: RuleTarget::Java,
        pattern: r"import sun\.misc\.",
        requires: None,
        severity: IssueSeverity::Error,
        category: "Internal API",
        message: "sun.misc internals are encapsulated since Java 9",
        suggested_fix: "Replace with a supported public API",
        auto_fixable: false,
        min_target: 9,
    },
    Rule {
        id: "trim-is-empty",
        family: JAVA_VERSION,
        target: RuleTarget::Java,
        pattern: r"\.trim\(\)\.isEmpty\(\)",
        requires: None,
        severity: IssueSeverity::Info,
        category: "Modernization",
        message: "trim().isEmpty() can be expressed with isBlank()",
        suggested_fix: "Use String.isBlank()",
        auto_fixable: true,
        min_target: 11,
    },
    Rule {
        id: "read-all-bytes-string",
        family: JAVA_VERSION,
        target: RuleTarget::Java,
        pattern: r"new String\(Files\.readAllBytes\(",
        requires: None,
        severity: IssueSeverity::Info,
        category: "Modernization",
        message: "Reading a file into a String can use Files.readString",
        suggested_fix: "Use Files.readString(path)",
        auto_fixable: true,
        min_target: 11,
    },
    Rule {
        id: "javax-import",
        family: JAVAX_TO_JAKARTA,
        target: RuleTarget::Java,
        pattern: r"import (static )?javax\.(servlet|persistence|validation|annotation|inject|enterprise|ws\.rs|transaction)\.",
        requires: None,
        severity: IssueSeverity::Error,
        category: "Namespace",
        message: "javax.* enterprise APIs moved to the jakarta.* namespace",
        suggested_fix: "Import from jakarta.* instead",
        auto_fixable: true,
        min_target: 8,
    },
    Rule {
        id: "jakarta-import",
        family: JAKARTA_TO_JAVAX,
        target: RuleTarget::Java,
        pattern: r"import (static )?jakarta\.(servlet|persistence|validation|annotation|inject|enterprise|ws\.rs|transaction)\.",
        requires: None,
        severity: IssueSeverity::Warning,
        category: "Namespace",
        message: "jakarta.* import must move back to javax.*",
        suggested_fix: "Import from javax.* instead",
        auto_fixable: true,
        min_target: 8,
    },
    Rule {
        id: "web-security-adapter",
        family: SPRING_BOOT_2_TO_3,
        target: RuleTarget::Java,
        pattern: r"\bWebSecurityConfigurerAdapter\b",
        requires: None,
        severity: IssueSeverity::Error,
        category: "Spring Security",
        message: "WebSecurityConfigurerAdapter was removed in Spring Security 6",
        suggested_fix: "Declare a SecurityFilterChain bean",
        auto_fixable: false,
        min_target: 8,
    },
    Rule {
        id: "global-method-security",
        family: SPRING_BOOT_2_TO_3,
        target: RuleTarget::Java,
        pattern: r"\bEnableGlobalMethodSecurity\b",
        requires: None,
        severity: IssueSeverity::Warning,
        category: "Spring Security",
        message: "@EnableGlobalMethodSecurity is deprecated",
        suggested_fix: "Use @EnableMethodSecurity",
        auto_fixable: true,
        min_target: 8,
    },
    Rule {
        id: "ant-matchers",
        family: SPRING_BOOT_2_TO_3,
        target: RuleTarget::Java,
        pattern: r"\.(antMatchers|mvcMatchers)\(",
        requires: None,
        severity: IssueSeverity::Warning,
        category: "Spring Security",
        message: "antMatchers/mvcMatchers were removed in Spring Security 6",
        suggested_fix: "Use requestMatchers",
        auto_fixable: true,
        min_target: 8,
    },
    Rule {
        id: "spring-boot-parent",
        family: SPRING_BOOT_2_TO_3,
        target: RuleTarget::Pom,
        pattern: r"<artifactId>spring-boot-starter-parent</artifactId>\s*<version>2\.",
        requires: None,
        severity: IssueSeverity::Warning,
        category: "Framework Version",
        message: "Spring Boot 2.x parent",
        suggested_fix: "Upgrade the parent to 3.2.0",
        auto_fixable: true,
        min_target: 17,
    },
    Rule {
        id: "datasource-initialization-mode",
        family: SPRING_BOOT_2_TO_3,
        target: RuleTarget::Properties,
        pattern: r"spring\.datasource\.initialization-mode",
        requires: None,
        severity: IssueSeverity::Warning,
        category: "Configuration",
        message: "spring.datasource.initialization-mode was renamed",
        suggested_fix: "Use spring.sql.init.mode",
        auto_fixable: true,
        min_target: 8,
    },
    Rule {
        id: "junit4-import",
        family: JUNIT_4_TO_5,
        target: RuleTarget::Java,
        pattern: r"import (static )?org\.junit\.(Test|Before|After|BeforeClass|AfterClass|Ignore|Assert)\b",
        requires: None,
        severity: IssueSeverity::Warning,
        category: "Testing",
        message: "JUnit 4 API",
        suggested_fix: "Use the org.junit.jupiter.api equivalent",
        auto_fixable: true,
        min_target: 8,
    },
    Rule {
        id: "junit4-runner",
        family: JUNIT_4_TO_5,
        target: RuleTarget::Java,
        pattern: r"@RunWith\(",
        requires: None,
        severity: IssueSeverity::Warning,
        category: "Testing",
        message: "JUnit 4 runners have no direct JUnit 5 equivalent",
        suggested_fix: "Replace with @ExtendWith and the matching extension class",
        auto_fixable: false,
        min_target: 8,
    },
    Rule {
        id: "log4j-import",
        family: LOG4J_TO_SLF4J,
        target: RuleTarget::Java,
        pattern: r"import org\.apache\.log4j\.Logger;",
        requires: None,
        severity: IssueSeverity::Warning,
        category: "Logging",
        message: "Log4j 1.x logger",
        suggested_fix: "Use org.slf4j.Logger",
        auto_fixable: true,
        min_target: 8,
    },
    Rule {
        id: "log4j-other-api",
        family: LOG4J_TO_SLF4J,
        target: RuleTarget::Java,
        pattern: r"import org\.apache\.log4j\.(LogManager|Level|Priority|PropertyConfigurator|BasicConfigurator|\w*Appender|\w*Layout|xml\.|spi\.)",
        requires: None,
        severity: IssueSeverity::Warning,
        category: "Logging",
        message: "Log4j 1.x API without an SLF4J counterpart",
        suggested_fix: "Rework against the SLF4J API",
        auto_fixable: false,
        min_target: 8,
    },
    Rule {
        id: "log4j-get-logger",
        family: LOG4J_TO_SLF4J,
        target: RuleTarget::Java,
        pattern: r"\bLogger\.getLogger\(",
        requires: Some(r"import org\.apache\.log4j\.Logger;"),
        severity: IssueSeverity::Warning,
        category: "Logging",
        message: "Log4j logger factory",
        suggested_fix: "Use LoggerFactory.getLogger",
        auto_fixable: true,
        min_target: 8,
    },
];

/// A rule with its patterns compiled.
pub struct CompiledRule {
    pub rule: &'static Rule,
    pub regex: Regex,
    pub requires: Option<Regex>,
}

impl CompiledRule {
    /// Whether the rule fires on `content`.
    pub fn applies(&self, content: &str) -> bool {
        self.regex.is_match(content)
            && self.requires.as_ref().is_none_or(|r| r.is_match(content))
    }
}

static COMPILED: LazyLock<Vec<CompiledRule>> = LazyLock::new(|| {
    RULES
        .iter()
        .map(|rule| CompiledRule {
            rule,
            regex: Regex::new(rule.pattern).expect("rule pattern is valid"),
            requires: rule
                .requires
                .map(|p| Regex::new(p).expect("rule pattern is valid")),
        })
        .collect()
});

pub fn compiled_rules() -> &'static [CompiledRule] {
    &COMPILED
}

pub fn find_rule(id: &str) -> Option<&'static CompiledRule> {
    COMPILED.iter().find(|r| r.rule.id == id)
}

/// The conversion in `plan` that applies `family`, if any.
pub fn owning_conversion(plan: &MigrationPlan, family: &'static str) -> Option<&'static str> {
    if plan.has_conversion(family) {
        return Some(family);
    }
    if family == JAVAX_TO_JAKARTA
        && plan.has_conversion(JAVA_VERSION)
        && !plan.has_conversion(JAKARTA_TO_JAVAX)
        && plan.target_major() >= 17
    {
        return Some(JAVA_VERSION);
    }
    None
}

/// Every conversion family, in the order their rewrites are applied.
pub const FAMILIES: &[&str] = &[
    JAVA_VERSION,
    JAVAX_TO_JAKARTA,
    JAKARTA_TO_JAVAX,
    SPRING_BOOT_2_TO_3,
    JUNIT_4_TO_5,
    LOG4J_TO_SLF4J,
    MAVEN_TO_GRADLE,
    GRADLE_TO_MAVEN,
];

/// Families whose rewrites run when `conversion` is applied.
pub fn families_owned_by(plan: &MigrationPlan, conversion: &str) -> Vec<&'static str> {
    FAMILIES
        .iter()
        .copied()
        .filter(|f| owning_conversion(plan, *f) == Some(conversion))
        .collect()
}

/// Rules relevant to `plan`, each paired with the conversion that owns it.
pub fn applicable_rules(plan: &MigrationPlan) -> Vec<(&'static CompiledRule, &'static str)> {
    let target = plan.target_major();
    compiled_rules()
        .iter()
        .filter(|c| target >= c.rule.min_target)
        .filter_map(|c| owning_conversion(plan, c.rule.family).map(|owner| (c, owner)))
        .collect()
}

// ── Known upgrades ────────────────────────────────────────────────────

/// What a dependency should become.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Replacement {
    Version(&'static str),
    Coordinates {
        group_id: &'static str,
        artifact_id: &'static str,
        version: &'static str,
    },
}

impl Replacement {
    /// The form stored as the dependency's new version: a bare version, or
    /// `group:artifact:version` when the coordinates change.
    pub fn describe(&self) -> String {
        match self {
            Self::Version(v) => v.to_string(),
            Self::Coordinates {
                group_id,
                artifact_id,
                version,
            } => format!("{}:{}:{}", group_id, artifact_id, version),
        }
    }
}

#[derive(Debug)]
pub struct KnownUpgrade {
    pub group_id: &'static str,
    pub artifact_id: &'static str,
    pub family: &'static str,
    pub replacement: Replacement,
}

const fn coords(
    group_id: &'static str,
    artifact_id: &'static str,
    version: &'static str,
) -> Replacement {
    Replacement::Coordinates {
        group_id,
        artifact_id,
        version,
    }
}

/// Checked in order; the first entry whose family is applied by the plan
/// wins, so conversion-specific entries come before generic ones.
pub static KNOWN_UPGRADES: &[KnownUpgrade] = &[
    KnownUpgrade {
        group_id: "junit",
        artifact_id: "junit",
        family: JUNIT_4_TO_5,
        replacement: coords("org.junit.jupiter", "junit-jupiter", "5.10.0"),
    },
    KnownUpgrade {
        group_id: "log4j",
        artifact_id: "log4j",
        family: LOG4J_TO_SLF4J,
        replacement: coords("org.slf4j", "slf4j-api", "2.0.9"),
    },
    KnownUpgrade {
        group_id: "javax.servlet",
        artifact_id: "javax.servlet-api",
        family: JAVAX_TO_JAKARTA,
        replacement: coords("jakarta.servlet", "jakarta.servlet-api", "6.0.0"),
    },
    KnownUpgrade {
        group_id: "javax.persistence",
        artifact_id: "javax.persistence-api",
        family: JAVAX_TO_JAKARTA,
        replacement: coords("jakarta.persistence", "jakarta.persistence-api", "3.1.0"),
    },
    KnownUpgrade {
        group_id: "javax.validation",
        artifact_id: "validation-api",
        family: JAVAX_TO_JAKARTA,
        replacement: coords("jakarta.validation", "jakarta.validation-api", "3.0.2"),
    },
    KnownUpgrade {
        group_id: "javax.annotation",
        artifact_id: "javax.annotation-api",
        family: JAVAX_TO_JAKARTA,
        replacement: coords("jakarta.annotation", "jakarta.annotation-api", "2.1.1"),
    },
    KnownUpgrade {
        group_id: "jakarta.servlet",
        artifact_id: "jakarta.servlet-api",
        family: JAKARTA_TO_JAVAX,
        replacement: coords("javax.servlet", "javax.servlet-api", "4.0.1"),
    },
    KnownUpgrade {
        group_id: "jakarta.persistence",
        artifact_id: "jakarta.persistence-api",
        family: JAKARTA_TO_JAVAX,
        replacement: coords("javax.persistence", "javax.persistence-api", "2.2"),
    },
    KnownUpgrade {
        group_id: "jakarta.validation",
        artifact_id: "jakarta.validation-api",
        family: JAKARTA_TO_JAVAX,
        replacement: coords("javax.validation", "validation-api", "2.0.1.Final"),
    },
    KnownUpgrade {
        group_id: "jakarta.annotation",
        artifact_id: "jakarta.annotation-api",
        family: JAKARTA_TO_JAVAX,
        replacement: coords("javax.annotation", "javax.annotation-api", "1.3.2"),
    },
    KnownUpgrade {
        group_id: "org.springframework.boot",
        artifact_id: "spring-boot-starter",
        family: JAVA_VERSION,
        replacement: Replacement::Version("3.2.0"),
    },
    KnownUpgrade {
        group_id: "org.springframework",
        artifact_id: "spring-core",
        family: JAVA_VERSION,
        replacement: Replacement::Version("6.1.0"),
    },
    KnownUpgrade {
        group_id: "junit",
        artifact_id: "junit",
        family: JAVA_VERSION,
        replacement: Replacement::Version("4.13.2"),
    },
    KnownUpgrade {
        group_id: "org.junit.jupiter",
        artifact_id: "junit-jupiter",
        family: JAVA_VERSION,
        replacement: Replacement::Version("5.10.0"),
    },
    KnownUpgrade {
        group_id: "log4j",
        artifact_id: "log4j",
        family: JAVA_VERSION,
        replacement: coords("org.apache.logging.log4j", "log4j-core", "2.22.0"),
    },
    KnownUpgrade {
        group_id: "commons-lang",
        artifact_id: "commons-lang",
        family: JAVA_VERSION,
        replacement: coords("org.apache.commons", "commons-lang3", "3.14.0"),
    },
];

/// The upgrade `plan` will apply to `group:artifact`, with the conversion
/// that applies it.
pub fn upgrade_for(
    plan: &MigrationPlan,
    group_id: &str,
    artifact_id: &str,
) -> Option<(&'static KnownUpgrade, &'static str)> {
    KNOWN_UPGRADES
        .iter()
        .filter(|u| u.group_id == group_id && u.artifact_id == artifact_id)
        .find_map(|u| owning_conversion(plan, u.family).map(|owner| (u, owner)))
}

/// The alternation of Java EE packages that moved namespace.
pub fn ee_packages() -> &'static str {
    EE_PACKAGES
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::migration::request::MigrationRequest;

    fn plan(target: &str, conversions: &[&str]) -> MigrationPlan {
        MigrationRequest {
            source_repo_url: "https://github.com/acme/shop".into(),
            source_version: "8".into(),
            target_version: target.into(),
            conversion_types: conversions.iter().map(|c| c.to_string()).collect(),
            ..Default::default()
        }
        .validate()
        .unwrap()
    }

    #[test]
    fn test_all_rule_patterns_compile() {
        assert_eq!(compiled_rules().len(), RULES.len());
        let mut ids: Vec<_> = RULES.iter().map(|r| r.id).collect();
        ids.sort();
        ids.dedup();
        assert_eq!(ids.len(), RULES.len(), "rule ids must be unique");
    }

    #[test]
    fn test_java_17_upgrade_owns_javax_family() {
        let p = plan("17", &[JAVA_VERSION]);
        assert_eq!(owning_conversion(&p, JAVAX_TO_JAKARTA), Some(JAVA_VERSION));

        let p = plan("11", &[JAVA_VERSION]);
        assert_eq!(owning_conversion(&p, JAVAX_TO_JAKARTA), None);

        let p = plan("17", &[JAVA_VERSION, JAVAX_TO_JAKARTA]);
        assert_eq!(owning_conversion(&p, JAVAX_TO_JAKARTA), Some(JAVAX_TO_JAKARTA));
    }

    #[test]
    fn test_families_owned_by_version_upgrade() {
        let p = plan("17", &[JAVA_VERSION, JUNIT_4_TO_5]);
        assert_eq!(families_owned_by(&p, JAVA_VERSION), vec![JAVA_VERSION, JAVAX_TO_JAKARTA]);
        assert_eq!(families_owned_by(&p, JUNIT_4_TO_5), vec![JUNIT_4_TO_5]);
    }

    #[test]
    fn test_min_target_filters_rules() {
        let p = plan("9", &[JAVA_VERSION]);
        let ids: Vec<_> = applicable_rules(&p).iter().map(|(c, _)| c.rule.id).collect();
        assert!(ids.contains(&"boxed-constructor"));
        assert!(!ids.contains(&"trim-is-empty"));

        let p = plan("11", &[JAVA_VERSION]);
        let ids: Vec<_> = applicable_rules(&p).iter().map(|(c, _)| c.rule.id).collect();
        assert!(ids.contains(&"trim-is-empty"));
    }

    #[test]
    fn test_requires_pattern_gates_rule() {
        let rule = find_rule("log4j-get-logger").unwrap();
        assert!(!rule.applies("Logger log = Logger.getLogger(\"x\");"));
        assert!(rule.applies(
            "import org.apache.log4j.Logger;\nLogger log = Logger.getLogger(A.class);"
        ));
    }

    #[test]
    fn test_log4j_other_api_skips_logger_import() {
        let rule = find_rule("log4j-other-api").unwrap();
        assert!(!rule.applies("import org.apache.log4j.Logger;"));
        assert!(rule.applies("import org.apache.log4j.PropertyConfigurator;"));
    }

    #[test]
    fn test_specific_upgrade_wins_over_generic() {
        let p = plan("17", &[JAVA_VERSION, JUNIT_4_TO_5]);
        let (upgrade, owner) = upgrade_for(&p, "junit", "junit").unwrap();
        assert_eq!(owner, JUNIT_4_TO_5);
        assert_eq!(
            upgrade.replacement.describe(),
            "org.junit.jupiter:junit-jupiter:5.10.0"
        );

        let p = plan("17", &[JAVA_VERSION]);
        let (upgrade, owner) = upgrade_for(&p, "junit", "junit").unwrap();
        assert_eq!(owner, JAVA_VERSION);
        assert_eq!(upgrade.replacement.describe(), "4.13.2");
    }

    #[test]
    fn test_no_upgrade_without_owning_conversion() {
        let p = plan("17", &[JUNIT_4_TO_5]);
        assert!(upgrade_for(&p, "org.springframework", "spring-core").is_none());
    }
}
