//! Reading and rewriting Maven and Gradle build descriptors.
//!
//! These are text-level edits driven by regular expressions, not a full XML
//! or Groovy parse. They cover the shapes that appear in typical Spring and
//! plain Java projects and leave anything unrecognised untouched.

use std::fmt::Write as _;
use std::sync::LazyLock;

use regex::{Captures, Regex};

use super::rules::Replacement;

fn re(pattern: &str) -> Regex {
    Regex::new(pattern).expect("descriptor pattern is valid")
}

static DEPENDENCY_BLOCK: LazyLock<Regex> = LazyLock::new(|| re(r"(?s)<dependency>.*?</dependency>"));
static PARENT_BLOCK: LazyLock<Regex> = LazyLock::new(|| re(r"(?s)<parent>.*?</parent>"));
static NESTED_SECTIONS: LazyLock<Regex> = LazyLock::new(|| {
    re(r"(?s)<(dependencies|dependencyManagement|build|profiles|properties|modules)>.*?</(dependencies|dependencyManagement|build|profiles|properties|modules)>")
});
static POM_JAVA_VERSION: LazyLock<Regex> = LazyLock::new(|| {
    re(r"<(maven\.compiler\.release|maven\.compiler\.source|java\.version)>\s*([\d.]+)\s*</")
});
static POM_VERSION_PROPERTY: LazyLock<Regex> = LazyLock::new(|| {
    re(r"(<(?:maven\.compiler\.(?:source|target|release)|java\.version)>)\s*[^<]*\s*(</)")
});
static GRADLE_JAVA_VERSION: LazyLock<Regex> = LazyLock::new(|| {
    re(r#"(?:sourceCompatibility\s*=\s*(?:JavaVersion\.VERSION_)?['"]?([\d._]+)['"]?|JavaLanguageVersion\.of\(\s*(\d+)\s*\))"#)
});
static GRADLE_COMPATIBILITY: LazyLock<Regex> = LazyLock::new(|| {
    re(r#"((?:source|target)Compatibility\s*=\s*)(?:JavaVersion\.VERSION_[\d_]+|['"]?[\d.]+['"]?)"#)
});
static GRADLE_TOOLCHAIN: LazyLock<Regex> = LazyLock::new(|| re(r"(JavaLanguageVersion\.of\(\s*)\d+(\s*\))"));
static GRADLE_DEPENDENCY: LazyLock<Regex> = LazyLock::new(|| {
    re(r#"(?m)^\s*(implementation|api|compileOnly|runtimeOnly|testImplementation|testRuntimeOnly|annotationProcessor)\s*\(?\s*['"]([^:'"\s]+):([^:'"\s]+)(?::([^'"\s]+))?['"]"#)
});

/// A dependency as declared in a build descriptor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeclaredDependency {
    pub group_id: String,
    pub artifact_id: String,
    /// `None` when the version is inherited from a parent or BOM.
    pub version: Option<String>,
    /// Maven scope or Gradle configuration.
    pub scope: Option<String>,
}

impl DeclaredDependency {
    pub fn is_test(&self) -> bool {
        matches!(
            self.scope.as_deref(),
            Some("test") | Some("testImplementation") | Some("testRuntimeOnly")
        )
    }
}

/// Text of the first `<tag>…</tag>` in `xml`.
pub fn xml_tag<'a>(xml: &'a str, tag: &str) -> Option<&'a str> {
    let open = format!("<{}>", tag);
    let close = format!("</{}>", tag);
    let start = xml.find(&open)? + open.len();
    let end = xml[start..].find(&close)? + start;
    Some(xml[start..end].trim())
}

pub fn pom_dependencies(pom: &str) -> Vec<DeclaredDependency> {
    DEPENDENCY_BLOCK
        .find_iter(pom)
        .filter_map(|block| {
            let block = block.as_str();
            Some(DeclaredDependency {
                group_id: xml_tag(block, "groupId")?.to_string(),
                artifact_id: xml_tag(block, "artifactId")?.to_string(),
                version: xml_tag(block, "version").map(str::to_string),
                scope: xml_tag(block, "scope").map(str::to_string),
            })
        })
        .collect()
}

pub fn gradle_dependencies(gradle: &str) -> Vec<DeclaredDependency> {
    GRADLE_DEPENDENCY
        .captures_iter(gradle)
        .map(|c| DeclaredDependency {
            group_id: c[2].to_string(),
            artifact_id: c[3].to_string(),
            version: c.get(4).map(|m| m.as_str().to_string()),
            scope: Some(c[1].to_string()),
        })
        .collect()
}

/// The project's own `(groupId, artifactId, version)`, falling back to the
/// parent's group and version when the project inherits them.
pub fn pom_coordinates(pom: &str) -> (Option<String>, Option<String>, Option<String>) {
    let parent = PARENT_BLOCK.find(pom).map(|m| m.as_str());
    let own = PARENT_BLOCK.replace(pom, "");
    let own = NESTED_SECTIONS.replace_all(&own, "");
    let pick = |tag: &str| {
        xml_tag(&own, tag)
            .or_else(|| parent.and_then(|p| xml_tag(p, tag)))
            .map(str::to_string)
    };
    (pick("groupId"), xml_tag(&own, "artifactId").map(str::to_string), pick("version"))
}

/// Declared Java release of a Maven build.
pub fn pom_java_version(pom: &str) -> Option<String> {
    let mut found: Vec<(&str, &str)> = POM_JAVA_VERSION
        .captures_iter(pom)
        .filter_map(|c| Some((c.get(1)?.as_str(), c.get(2)?.as_str())))
        .collect();
    // release wins over source, which wins over java.version
    found.sort_by_key(|(tag, _)| match *tag {
        "maven.compiler.release" => 0,
        "maven.compiler.source" => 1,
        _ => 2,
    });
    found.first().map(|(_, v)| v.to_string())
}

/// Declared Java release of a Gradle build.
pub fn gradle_java_version(gradle: &str) -> Option<String> {
    let caps = GRADLE_JAVA_VERSION.captures(gradle)?;
    caps.get(1)
        .or_else(|| caps.get(2))
        .map(|m| m.as_str().replace('_', "."))
}

/// Point every Java version property at `target`, adding
/// `maven.compiler.release` when the build declares none.
pub fn set_pom_java_version(pom: &str, target: &str) -> String {
    if POM_VERSION_PROPERTY.is_match(pom) {
        return POM_VERSION_PROPERTY
            .replace_all(pom, |c: &Captures| format!("{}{}{}", &c[1], target, &c[2]))
            .into_owned();
    }
    let property = format!("<maven.compiler.release>{}</maven.compiler.release>", target);
    if let Some(at) = pom.find("<properties>") {
        let at = at + "<properties>".len();
        return format!("{}\n        {}{}", &pom[..at], property, &pom[at..]);
    }
    let block = format!("    <properties>\n        {}\n    </properties>\n\n", property);
    match pom.find("    <dependencies>").or_else(|| pom.find("</project>")) {
        Some(at) => format!("{}{}{}", &pom[..at], block, &pom[at..]),
        None => pom.to_string(),
    }
}

pub fn set_gradle_java_version(gradle: &str, target: &str) -> String {
    let quoted = format!("'{}'", target);
    let updated = GRADLE_COMPATIBILITY.replace_all(gradle, |c: &Captures| format!("{}{}", &c[1], quoted));
    GRADLE_TOOLCHAIN
        .replace_all(&updated, |c: &Captures| format!("{}{}{}", &c[1], target, &c[2]))
        .into_owned()
}

fn replace_tag(block: &str, tag: &str, value: &str) -> String {
    let pattern = format!(r"<{tag}>[^<]*</{tag}>", tag = regex::escape(tag));
    let replacement = format!("<{tag}>{value}</{tag}>", tag = tag, value = value);
    re(&pattern)
        .replace(block, regex::NoExpand(&replacement))
        .into_owned()
}

/// Rewrite every `<dependency>` block for `group:artifact`. Returns `None`
/// when no block matched or when only a version change was asked for and
/// the version is inherited.
pub fn rewrite_pom_dependency(
    pom: &str,
    group_id: &str,
    artifact_id: &str,
    replacement: &Replacement,
) -> Option<String> {
    let mut matched = false;
    let mut pinned = true;
    let rewritten = DEPENDENCY_BLOCK.replace_all(pom, |c: &Captures| {
        let block = &c[0];
        if xml_tag(block, "groupId") != Some(group_id) || xml_tag(block, "artifactId") != Some(artifact_id) {
            return block.to_string();
        }
        matched = true;
        let has_version = xml_tag(block, "version").is_some();
        match replacement {
            Replacement::Version(version) => {
                if !has_version {
                    pinned = false;
                    return block.to_string();
                }
                replace_tag(block, "version", version)
            }
            Replacement::Coordinates {
                group_id: new_group,
                artifact_id: new_artifact,
                version,
            } => {
                let block = replace_tag(block, "groupId", new_group);
                let block = replace_tag(&block, "artifactId", new_artifact);
                if has_version {
                    replace_tag(&block, "version", version)
                } else {
                    let artifact = format!("<artifactId>{}</artifactId>", new_artifact);
                    block.replacen(
                        &artifact,
                        &format!("{}\n            <version>{}</version>", artifact, version),
                        1,
                    )
                }
            }
        }
    });
    (matched && pinned).then(|| rewritten.into_owned())
}

/// Rewrite the quoted `group:artifact[:version]` notation in a Gradle build.
pub fn rewrite_gradle_dependency(
    gradle: &str,
    group_id: &str,
    artifact_id: &str,
    replacement: &Replacement,
) -> Option<String> {
    let pattern = format!(
        r#"(['"]){}:{}(?::[^'"]*)?(['"])"#,
        regex::escape(group_id),
        regex::escape(artifact_id)
    );
    let pattern = re(&pattern);
    if !pattern.is_match(gradle) {
        return None;
    }
    let notation = match replacement {
        Replacement::Version(v) => format!("{}:{}:{}", group_id, artifact_id, v),
        other => other.describe(),
    };
    Some(
        pattern
            .replace_all(gradle, |c: &Captures| format!("{}{}{}", &c[1], notation, &c[2]))
            .into_owned(),
    )
}

/// A Gradle build equivalent to `pom`.
pub fn gradle_from_pom(pom: &str, target: &str) -> String {
    let (group, _, version) = pom_coordinates(pom);
    let spring_boot = PARENT_BLOCK
        .find(pom)
        .map(|p| p.as_str())
        .filter(|p| p.contains("spring-boot-starter-parent"))
        .and_then(|p| xml_tag(p, "version").map(str::to_string));

    let mut out = String::from("plugins {\n    id 'java'\n");
    if let Some(boot) = &spring_boot {
        let _ = writeln!(out, "    id 'org.springframework.boot' version '{}'", boot);
        out.push_str("    id 'io.spring.dependency-management' version '1.1.4'\n");
    }
    out.push_str("}\n\n");
    let _ = writeln!(out, "group = '{}'", group.as_deref().unwrap_or("com.example"));
    let _ = writeln!(out, "version = '{}'", version.as_deref().unwrap_or("1.0.0-SNAPSHOT"));
    let _ = write!(
        out,
        "\njava {{\n    sourceCompatibility = '{}'\n}}\n\nrepositories {{\n    mavenCentral()\n}}\n\ndependencies {{\n",
        target
    );
    for dep in pom_dependencies(pom) {
        let configuration = match dep.scope.as_deref() {
            Some("test") => "testImplementation",
            Some("provided") => "compileOnly",
            Some("runtime") => "runtimeOnly",
            _ => "implementation",
        };
        let _ = write!(out, "    {} '{}:{}", configuration, dep.group_id, dep.artifact_id);
        if let Some(v) = dep.version.as_deref().filter(|v| !v.starts_with("${")) {
            let _ = write!(out, ":{}", v);
        }
        out.push_str("'\n");
    }
    out.push_str("}\n\ntest {\n    useJUnitPlatform()\n}\n");
    out
}

pub fn gradle_settings(project_name: &str) -> String {
    format!("rootProject.name = '{}'\n", project_name)
}

/// A Maven build equivalent to `gradle`.
pub fn pom_from_gradle(gradle: &str, project_name: &str, target: &str) -> String {
    let property = |name: &str| {
        re(&format!(r#"(?m)^\s*{}\s*=\s*['"]([^'"]+)['"]"#, name))
            .captures(gradle)
            .map(|c| c[1].to_string())
    };
    let group = property("group").unwrap_or_else(|| "com.example".to_string());
    let version = property("version").unwrap_or_else(|| "1.0.0-SNAPSHOT".to_string());

    let mut out = String::new();
    let _ = write!(
        out,
        r#"<?xml version="1.0" encoding="UTF-8"?>
<project xmlns="http://maven.apache.org/POM/4.0.0"
         xmlns:xsi="http://www.w3.org/2001/XMLSchema-instance"
         xsi:schemaLocation="http://maven.apache.org/POM/4.0.0 https://maven.apache.org/xsd/maven-4.0.0.xsd">
    <modelVersion>4.0.0</modelVersion>

    <groupId>{group}</groupId>
    <artifactId>{artifact}</artifactId>
    <version>{version}</version>

    <properties>
        <maven.compiler.release>{target}</maven.compiler.release>
        <project.build.sourceEncoding>UTF-8</project.build.sourceEncoding>
    </properties>

    <dependencies>
"#,
        group = group,
        artifact = project_name,
        version = version,
        target = target,
    );
    for dep in gradle_dependencies(gradle) {
        let _ = write!(
            out,
            "        <dependency>\n            <groupId>{}</groupId>\n            <artifactId>{}</artifactId>\n",
            dep.group_id, dep.artifact_id
        );
        if let Some(v) = &dep.version {
            let _ = writeln!(out, "            <version>{}</version>", v);
        }
        let scope = match dep.scope.as_deref() {
            Some("testImplementation") | Some("testRuntimeOnly") => Some("test"),
            Some("compileOnly") => Some("provided"),
            Some("runtimeOnly") => Some("runtime"),
            _ => None,
        };
        if let Some(scope) = scope {
            let _ = writeln!(out, "            <scope>{}</scope>", scope);
        }
        out.push_str("        </dependency>\n");
    }
    out.push_str("    </dependencies>\n</project>\n");
    out
}
