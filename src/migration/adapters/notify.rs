use async_trait::async_trait;
use tracing::info;

use crate::errors::CapabilityError;
use crate::migration::capabilities::Notifier;
use crate::migration::models::JobSnapshot;

/// One-line summary of a finished job.
pub fn summary_line(snapshot: &JobSnapshot) -> String {
    let c = &snapshot.counts;
    let mut line = format!(
        "Migration {} of {} {}: {} files modified, {} issues fixed, {} remaining, {} dependencies upgraded, tests {}/{} passed",
        snapshot.id,
        snapshot.source_repo_url,
        snapshot.status,
        c.files_modified,
        c.issues_fixed,
        c.issues_remaining,
        c.dependencies_upgraded,
        c.tests_passed,
        c.tests_run,
    );
    if let Some(err) = &snapshot.error_message {
        line.push_str(&format!(" ({})", err));
    }
    line
}

/// Writes the summary to the service log instead of sending mail.
#[derive(Debug, Clone, Copy, Default)]
pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
    async fn notify(&self, address: &str, snapshot: &JobSnapshot) -> Result<(), CapabilityError> {
        info!(
            job_id = %snapshot.id,
            to = address,
            status = %snapshot.status,
            "{}",
            summary_line(snapshot)
        );
        Ok(())
    }
}
