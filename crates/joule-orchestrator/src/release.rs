//! Suspended-job release.

use chrono::{DateTime, Utc};
use joule_cluster::ClusterOps;
use tracing::{info, warn};

/// Releases every suspended job whose start-time annotation has passed.
/// Jobs without the annotation stay suspended; they were paused by an
/// operator, not deferred by admission.
///
/// Returns the number of jobs released.
///
/// # Errors
///
/// Returns an error when the suspended-job listing fails; individual
/// release failures are logged and retried on the next cycle.
pub async fn release_due_jobs(
    cluster: &dyn ClusterOps,
    now: DateTime<Utc>,
) -> joule_cluster::Result<u32> {
    let jobs = cluster.list_suspended_jobs().await?;
    let mut released = 0;
    for job in jobs {
        let Some(start) = job.start_after else {
            continue;
        };
        if start <= now {
            match cluster.unsuspend_job(&job.name).await {
                Ok(()) => {
                    info!(job = %job.name, start = %start, "released suspended job");
                    released += 1;
                }
                Err(e) => {
                    warn!(job = %job.name, error = %e, "failed to release job");
                }
            }
        }
    }
    Ok(released)
}
