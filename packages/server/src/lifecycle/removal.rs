use common::{BuildStatus, ImageReference};
use serde::Serialize;
use tracing::{error, info, instrument, warn};

use super::{BuildLifecycle, Caller};
use crate::entity::build_record;
use crate::error::{BuildError, BuildResult};

/// Best-effort step of the delete path that did not complete.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum CleanupStep {
    ArtifactRecord,
    Job,
    RegistryBlob,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub enum RemovalOutcome {
    /// The build was still running; its job was deleted (or the deletion
    /// was attempted) and the record kept.
    Canceled { job_deleted: bool },
    /// The record is gone. Cleanup steps that failed are listed.
    Deleted { partial_cleanup: Vec<CleanupStep> },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum BatchStatus {
    Completed,
    CompletedWithErrors,
}

/// Per-id results of a batch removal, in request order.
#[derive(Debug)]
pub struct BatchOutcome<T> {
    pub results: Vec<(i32, BuildResult<T>)>,
}

impl<T> BatchOutcome<T> {
    pub fn status(&self) -> BatchStatus {
        if self.results.iter().all(|(_, r)| r.is_ok()) {
            BatchStatus::Completed
        } else {
            BatchStatus::CompletedWithErrors
        }
    }

    pub fn failed_ids(&self) -> Vec<i32> {
        self.results
            .iter()
            .filter(|(_, r)| r.is_err())
            .map(|(id, _)| *id)
            .collect()
    }
}

/// Who owns the image the build pushed.
#[derive(Debug, Clone, Copy)]
enum ArtifactClaim {
    /// The artifact row (if any) belongs to this build.
    Own { artifact_id: Option<i32> },
    /// A later build or an external registration took over the reference.
    Superseded,
}

impl BuildLifecycle {
    /// Cancel a running build or delete a finished one.
    ///
    /// Non-terminal builds only have their job deleted; the record keeps its
    /// status until the poller sees the job gone. Terminal builds lose the
    /// record, and for finished builds the artifact row and registry blob.
    #[instrument(skip(self, caller), fields(user_id = caller.user_id))]
    pub async fn remove_build(&self, id: i32, caller: &Caller) -> BuildResult<RemovalOutcome> {
        let record = self.get_build_for(id, caller).await?;

        if record.status.is_terminal() {
            self.delete_build(id, caller).await
        } else {
            Ok(self.cancel_build(&record).await)
        }
    }

    /// Apply [`remove_build`](Self::remove_build) to every id. A failure on
    /// one id does not stop the others.
    pub async fn remove_builds(
        &self,
        ids: &[i32],
        caller: &Caller,
    ) -> BatchOutcome<RemovalOutcome> {
        let mut results = Vec::with_capacity(ids.len());
        for &id in ids {
            let result = self.remove_build(id, caller).await;
            if let Err(e) = &result {
                error!(build_id = id, error = %e, "Failed to remove build");
            }
            results.push((id, result));
        }
        BatchOutcome { results }
    }

    async fn cancel_build(&self, record: &build_record::Model) -> RemovalOutcome {
        let job_deleted = match self
            .bounded(self.runner.delete(&record.job_name, &self.config.namespace))
            .await
        {
            Ok(()) => {
                info!(build_id = record.id, job_name = %record.job_name, "Canceled build");
                true
            }
            Err(e) => {
                warn!(
                    build_id = record.id,
                    job_name = %record.job_name,
                    error = %e,
                    "Failed to delete build job"
                );
                false
            }
        };
        RemovalOutcome::Canceled { job_deleted }
    }

    async fn delete_build(&self, id: i32, caller: &Caller) -> BuildResult<RemovalOutcome> {
        // Scoped re-read: a concurrent delete of the same id ends here.
        let record = self
            .records
            .find_by_id(id, caller.owner_filter())
            .await?
            .ok_or_else(|| BuildError::NotFound(format!("build {id}")))?;

        let mut partial_cleanup = Vec::new();

        // Only finished builds pushed an image.
        let claim = if record.status == BuildStatus::Finished {
            match self.artifact_claim(&record).await {
                Ok(claim) => Some(claim),
                Err(e) => {
                    error!(build_id = id, image_ref = %record.image_ref, error = %e, "Failed to look up image artifact");
                    partial_cleanup.push(CleanupStep::ArtifactRecord);
                    Some(ArtifactClaim::Own { artifact_id: None })
                }
            }
        } else {
            None
        };

        if let Some(ArtifactClaim::Own {
            artifact_id: Some(artifact_id),
        }) = claim
        {
            if let Err(e) = self.artifacts.delete(artifact_id, None).await {
                error!(
                    build_id = id,
                    image_id = artifact_id,
                    image_ref = %record.image_ref,
                    error = %e,
                    "Failed to delete image artifact"
                );
                partial_cleanup.push(CleanupStep::ArtifactRecord);
            }
        }

        if !self.records.delete(id, caller.owner_filter()).await? {
            return Err(BuildError::NotFound(format!("build {id}")));
        }

        if let Err(e) = self
            .bounded(self.runner.delete(&record.job_name, &self.config.namespace))
            .await
        {
            warn!(build_id = id, job_name = %record.job_name, error = %e, "Failed to delete build job");
            partial_cleanup.push(CleanupStep::Job);
        }

        match claim {
            Some(ArtifactClaim::Own { .. }) => {
                if let Err(e) = self.delete_blob(&record.image_ref).await {
                    error!(
                        build_id = id,
                        image_ref = %record.image_ref,
                        error = %e,
                        "Failed to delete image from registry"
                    );
                    partial_cleanup.push(CleanupStep::RegistryBlob);
                }
            }
            Some(ArtifactClaim::Superseded) => {
                info!(
                    build_id = id,
                    image_ref = %record.image_ref,
                    "Image reference taken over, keeping image"
                );
            }
            None => {}
        }

        info!(build_id = id, job_name = %record.job_name, "Deleted build");
        Ok(RemovalOutcome::Deleted { partial_cleanup })
    }

    async fn artifact_claim(&self, record: &build_record::Model) -> BuildResult<ArtifactClaim> {
        let artifact = self
            .artifacts
            .find_by_reference(&record.image_ref, Some(record.user_id))
            .await?;
        Ok(match artifact {
            None => ArtifactClaim::Own { artifact_id: None },
            Some(a) if a.job_name.as_deref() == Some(record.job_name.as_str()) => {
                ArtifactClaim::Own {
                    artifact_id: Some(a.id),
                }
            }
            Some(_) => ArtifactClaim::Superseded,
        })
    }

    async fn delete_blob(&self, image_ref: &str) -> BuildResult<()> {
        let image: ImageReference = image_ref.parse()?;
        self.bounded(self.registry.delete_artifact(&image))
            .await
            .map_err(|e| BuildError::Internal(e.to_string()))
    }
}
