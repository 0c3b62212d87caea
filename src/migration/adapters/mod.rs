//! Default capability implementations.
//!
//! - [`git`]: clone and publish through the `git` CLI
//! - [`scanner`]: rule-driven analysis of Java sources and build files
//! - [`rewriter`]: regex rewrites of sources and build descriptors
//! - [`verifier`]: runs the project's tests with Maven or Gradle
//! - [`quality`], [`notify`]: offline stand-ins for external services
//!
//! [`rules`] and [`descriptors`] hold the shared rule catalog and the
//! `pom.xml` / `build.gradle` helpers.

pub mod descriptors;
pub mod git;
pub mod notify;
pub mod quality;
pub mod rewriter;
pub mod rules;
pub mod scanner;
pub mod verifier;

use std::sync::Arc;

use crate::config::MigratorConfig;
use crate::migration::artifacts::FileReporter;
use crate::migration::capabilities::Capabilities;

pub use git::GitFetcher;
pub use notify::LogNotifier;
pub use quality::DisabledQualityScanner;
pub use rewriter::RuleTransformer;
pub use scanner::RuleAnalyzer;
pub use verifier::BuildToolVerifier;

/// Wire up the production capability set from configuration.
pub fn default_capabilities(config: &MigratorConfig) -> Capabilities {
    let tools = &config.tools;
    let mut fetcher = GitFetcher::new(tools.git_cmd.clone(), tools.publish_remote.clone());
    if tools.publish_remote.is_some() {
        // pushing a shallow clone to a fresh remote is rejected
        fetcher = fetcher.with_full_history();
    }
    Capabilities {
        fetcher: Arc::new(fetcher),
        analyzer: Arc::new(RuleAnalyzer),
        transformer: Arc::new(RuleTransformer),
        verifier: Arc::new(BuildToolVerifier::new(
            tools.maven_cmd.clone(),
            tools.gradle_cmd.clone(),
        )),
        quality: Arc::new(DisabledQualityScanner),
        reporter: Arc::new(FileReporter::new(config.workspace.artifacts_root.clone())),
        notifier: Arc::new(LogNotifier),
    }
}
