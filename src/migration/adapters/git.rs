//! `git` command-line fetcher and publisher.

use std::path::Path;
use std::process::Stdio;

use async_trait::async_trait;
use tokio::process::Command;
use tracing::{debug, info};

use crate::errors::CapabilityError;
use crate::migration::capabilities::{FetchOutcome, Fetcher, StageContext};
use crate::migration::models::Platform;

const COMMIT_AUTHOR: &str = "migrator";
const COMMIT_EMAIL: &str = "migrator@localhost";
const PUBLISH_BRANCH: &str = "main";

#[derive(Debug, Clone)]
pub struct GitFetcher {
    git_cmd: String,
    /// Base URL new repositories are pushed under, e.g.
    /// `https://github.com/acme-migrations`. Publishing is off when unset.
    publish_remote: Option<String>,
    shallow: bool,
}

impl GitFetcher {
    pub fn new(git_cmd: impl Into<String>, publish_remote: Option<String>) -> Self {
        Self {
            git_cmd: git_cmd.into(),
            publish_remote,
            shallow: true,
        }
    }

    /// Clone with full history. Needed when the result is pushed to a new
    /// remote.
    pub fn with_full_history(mut self) -> Self {
        self.shallow = false;
        self
    }

    /// Run git and return its stdout. The token, if any, is scrubbed from
    /// every error message.
    async fn git(&self, dir: Option<&Path>, args: &[&str], token: Option<&str>) -> Result<String, CapabilityError> {
        let mut cmd = Command::new(&self.git_cmd);
        cmd.args(args)
            .env("GIT_TERMINAL_PROMPT", "0")
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        if let Some(dir) = dir {
            cmd.current_dir(dir);
        }

        let output = cmd.output().await.map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                CapabilityError::Permanent(format!("{} is not installed", self.git_cmd))
            } else {
                CapabilityError::Transient(format!("failed to run {}: {}", self.git_cmd, e))
            }
        })?;

        if output.status.success() {
            return Ok(String::from_utf8_lossy(&output.stdout).into_owned());
        }
        let stderr = String::from_utf8_lossy(&output.stderr);
        let stdout = String::from_utf8_lossy(&output.stdout);
        let message = if stderr.trim().is_empty() { stdout } else { stderr };
        Err(classify_failure(&redact(message.trim(), token)))
    }
}

/// Embed `token` in an HTTPS remote the way each platform expects it.
/// Other URL forms (ssh, local paths) are returned unchanged.
pub fn authenticated_url(url: &str, platform: Platform, token: Option<&str>) -> String {
    let Some(token) = token.filter(|t| !t.is_empty()) else {
        return url.to_string();
    };
    let Some(rest) = url.strip_prefix("https://") else {
        return url.to_string();
    };
    let authority = rest.split('/').next().unwrap_or_default();
    if authority.contains('@') {
        return url.to_string();
    }
    let user = match platform {
        Platform::Github => "x-access-token",
        Platform::Gitlab => "oauth2",
    };
    format!("https://{}:{}@{}", user, token, rest)
}

pub fn redact(message: &str, token: Option<&str>) -> String {
    match token.filter(|t| !t.is_empty()) {
        Some(token) => message.replace(token, "***"),
        None => message.to_string(),
    }
}

/// Map git's stderr onto the retry policy. Anything unrecognised is treated
/// as permanent.
pub fn classify_failure(stderr: &str) -> CapabilityError {
    let lower = stderr.to_ascii_lowercase();
    let any = |needles: &[&str]| needles.iter().any(|n| lower.contains(n));

    if any(&[
        "authentication failed",
        "could not read username",
        "could not read password",
        "403",
        "401",
        "permission denied",
        "invalid username or password",
    ]) {
        CapabilityError::Auth(stderr.to_string())
    } else if any(&["not found", "does not exist", "does not appear to be a git repository"]) {
        CapabilityError::Permanent(stderr.to_string())
    } else if any(&[
        "could not resolve host",
        "timed out",
        "connection reset",
        "connection refused",
        "early eof",
        "unable to access",
        "rpc failed",
        "the remote end hung up",
        "temporary failure",
    ]) {
        CapabilityError::Transient(stderr.to_string())
    } else {
        CapabilityError::Permanent(stderr.to_string())
    }
}

#[async_trait]
impl Fetcher for GitFetcher {
    async fn fetch(&self, ctx: &StageContext) -> Result<FetchOutcome, CapabilityError> {
        let plan = &ctx.plan;
        let token = plan.access_token.as_ref().map(|t| t.expose());
        let url = authenticated_url(&plan.source_repo_url, plan.platform, token);
        let dest = ctx.source_dir.to_string_lossy().into_owned();

        let mut args = vec!["clone", "--quiet"];
        if self.shallow && self.publish_remote.is_none() {
            args.extend(["--depth", "1"]);
        }
        args.extend([url.as_str(), dest.as_str()]);

        ctx.progress.report(10, "Cloning repository");
        self.git(None, &args, token).await?;
        ctx.progress.report(90, "Repository cloned");

        let revision = match self
            .git(Some(&ctx.source_dir), &["rev-parse", "--short", "HEAD"], token)
            .await
        {
            Ok(out) => Some(out.trim().to_string()).filter(|r| !r.is_empty()),
            Err(e) => {
                debug!(job_id = %ctx.job_id, error = %e, "could not read revision");
                None
            }
        };
        ctx.progress.report(100, "Checkout ready");
        Ok(FetchOutcome { revision })
    }

    async fn publish(&self, ctx: &StageContext) -> Result<Option<String>, CapabilityError> {
        let Some(remote) = &self.publish_remote else {
            return Ok(None);
        };
        let plan = &ctx.plan;
        let token = plan.access_token.as_ref().map(|t| t.expose());
        let target = format!("{}/{}.git", remote.trim_end_matches('/'), plan.target_repo_name);
        let push_url = authenticated_url(&target, plan.platform, token);
        let dir = Some(ctx.source_dir.as_path());

        self.git(dir, &["add", "--all"], token).await?;
        let message = format!(
            "Migrate from Java {} to Java {}\n\nConversions: {}",
            plan.source_version,
            plan.target_version,
            plan.conversions.join(", ")
        );
        let name = format!("user.name={}", COMMIT_AUTHOR);
        let email = format!("user.email={}", COMMIT_EMAIL);
        let commit = self
            .git(
                dir,
                &["-c", &name, "-c", &email, "commit", "--quiet", "-m", &message],
                token,
            )
            .await;
        match commit {
            Ok(_) => {}
            Err(CapabilityError::Permanent(msg)) if msg.contains("nothing to commit") => {
                ctx.progress.log("No changes to commit; publishing the checkout as is");
            }
            Err(e) => return Err(e),
        }

        let refspec = format!("HEAD:refs/heads/{}", PUBLISH_BRANCH);
        self.git(dir, &["push", "--quiet", &push_url, &refspec], token)
            .await?;
        info!(job_id = %ctx.job_id, target = %target, "migrated repository published");
        Ok(Some(target))
    }
}
