use serde::Serialize;

use crate::cluster::{JobId, TaskBackend};
use crate::error::Result;

#[derive(Debug, Clone, Serialize)]
pub struct PurgeFailure {
    pub job_id: JobId,
    pub error: String,
}

/// Result of deleting every job of a user.
#[derive(Debug, Clone, Default, Serialize)]
pub struct PurgeReport {
    pub deleted: Vec<JobId>,
    pub failed: Vec<PurgeFailure>,
}

/// Delete every job `user` owns on the cluster.
///
/// Runs outside the control loop. Listing failures are returned as errors;
/// a failed delete is recorded in the report and the remaining jobs are
/// still deleted.
pub async fn purge_user_jobs(backend: &dyn TaskBackend, user: &str) -> Result<PurgeReport> {
    let ids = backend.list_user_jobs(user).await?;
    tracing::info!(user, jobs = ids.len(), "Deleting jobs");

    let mut report = PurgeReport::default();
    for id in ids {
        match backend.delete(&id).await {
            Ok(output) => {
                tracing::info!(job_id = %id, output = %output.trim(), "Job deleted");
                report.deleted.push(id);
            }
            Err(e) => {
                tracing::warn!(job_id = %id, error = %e, "Job deletion failed");
                report.failed.push(PurgeFailure {
                    job_id: id,
                    error: e.to_string(),
                });
            }
        }
    }
    Ok(report)
}
