//! Read-only catalogs served to clients: supported Java versions and the
//! conversion types a job may select.

use serde::Serialize;

/// Lowest and highest Java release offered as source or target.
pub const MIN_JAVA_VERSION: u32 = 7;
pub const MAX_JAVA_VERSION: u32 = 23;

const LTS_RELEASES: [u32; 4] = [8, 11, 17, 21];

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct JavaVersion {
    pub value: String,
    pub label: String,
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct JavaVersionCatalog {
    pub source_versions: Vec<JavaVersion>,
    pub target_versions: Vec<JavaVersion>,
}

#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
pub struct ConversionType {
    pub id: &'static str,
    pub name: &'static str,
    pub description: &'static str,
    pub category: &'static str,
    pub icon: &'static str,
}

pub const CONVERSION_TYPES: &[ConversionType] = &[
    ConversionType {
        id: "java_version",
        name: "Java Version Upgrade",
        description: "Upgrade the Java language level, replacing deprecated APIs",
        category: "Language",
        icon: "☕",
    },
    ConversionType {
        id: "maven_to_gradle",
        name: "Maven to Gradle",
        description: "Generate a Gradle build from an existing pom.xml",
        category: "Build Tool",
        icon: "🔧",
    },
    ConversionType {
        id: "gradle_to_maven",
        name: "Gradle to Maven",
        description: "Generate a Maven pom.xml from an existing Gradle build",
        category: "Build Tool",
        icon: "🔧",
    },
    ConversionType {
        id: "javax_to_jakarta",
        name: "Javax to Jakarta EE",
        description: "Move javax.* imports and dependencies to the jakarta.* namespace",
        category: "Framework",
        icon: "🔄",
    },
    ConversionType {
        id: "jakarta_to_javax",
        name: "Jakarta EE to Javax",
        description: "Move jakarta.* imports back to the javax.* namespace",
        category: "Framework",
        icon: "🔄",
    },
    ConversionType {
        id: "spring_boot_2_to_3",
        name: "Spring Boot 2 to 3",
        description: "Upgrade Spring Boot 2.x to 3.x including Spring Security changes",
        category: "Framework",
        icon: "🍃",
    },
    ConversionType {
        id: "junit_4_to_5",
        name: "JUnit 4 to JUnit 5",
        description: "Migrate JUnit 4 annotations and imports to JUnit Jupiter",
        category: "Testing",
        icon: "🧪",
    },
    ConversionType {
        id: "log4j_to_slf4j",
        name: "Log4j to SLF4J",
        description: "Replace Log4j 1.x loggers with the SLF4J facade",
        category: "Logging",
        icon: "📝",
    },
];

/// Pairs of conversions that undo each other and cannot share a job.
pub const CONFLICTING_CONVERSIONS: &[(&str, &str)] = &[
    ("maven_to_gradle", "gradle_to_maven"),
    ("javax_to_jakarta", "jakarta_to_javax"),
];

pub fn conversion_type(id: &str) -> Option<&'static ConversionType> {
    CONVERSION_TYPES.iter().find(|c| c.id == id)
}

pub fn is_lts(version: u32) -> bool {
    LTS_RELEASES.contains(&version)
}

fn version_entry(version: u32) -> JavaVersion {
    let label = if is_lts(version) {
        format!("Java {} (LTS)", version)
    } else {
        format!("Java {}", version)
    };
    JavaVersion {
        value: version.to_string(),
        label,
    }
}

/// Any supported release may be a source; targets start one release later.
pub fn java_versions() -> JavaVersionCatalog {
    JavaVersionCatalog {
        source_versions: (MIN_JAVA_VERSION..MAX_JAVA_VERSION).map(version_entry).collect(),
        target_versions: (MIN_JAVA_VERSION + 1..=MAX_JAVA_VERSION)
            .map(version_entry)
            .collect(),
    }
}
