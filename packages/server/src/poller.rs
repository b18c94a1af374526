//! Background sweep that moves build records along as their jobs finish.

use std::time::Duration;

use tracing::{debug, error, info};

use crate::lifecycle::{BuildLifecycle, JobEvent};

/// Run the status poller as a background task.
///
/// An interval of zero is treated as one second.
pub async fn run_status_poller(lifecycle: BuildLifecycle, interval_secs: u64) {
    let interval_secs = interval_secs.max(1);
    info!(interval_secs, "Starting build status poller");

    let mut interval = tokio::time::interval(Duration::from_secs(interval_secs));

    loop {
        interval.tick().await;

        match poll_once(&lifecycle).await {
            Ok(0) => {}
            Ok(changed) => info!(changed, "Updated build statuses"),
            Err(e) => error!(error = %e, "Build status sweep failed"),
        }
    }
}

/// Check every active build once. Returns how many records changed.
pub async fn poll_once(lifecycle: &BuildLifecycle) -> anyhow::Result<usize> {
    let builds = lifecycle.active_builds().await?;
    let mut changed = 0;

    for build in builds {
        let state = match lifecycle.observe_job(&build.job_name).await {
            Ok(state) => state,
            Err(e) => {
                error!(build_id = build.id, job_name = %build.job_name, error = %e, "Failed to read job state");
                continue;
            }
        };

        let Some(event) = JobEvent::from_state(state) else {
            debug!(build_id = build.id, job_name = %build.job_name, "Build still running");
            continue;
        };

        match lifecycle.apply_job_event(&build.job_name, event).await {
            Ok(Some(_)) => changed += 1,
            Ok(None) => {}
            Err(e) => {
                error!(build_id = build.id, job_name = %build.job_name, error = %e, "Failed to apply job event");
            }
        }
    }

    Ok(changed)
}
