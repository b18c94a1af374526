//! Build lifecycle: submission, status transitions and cross-system cleanup.
//!
//! [`BuildLifecycle`] is the only writer of build records besides the store
//! itself. It talks to the job runner and the registry through their seams
//! and bounds every such call with the configured gateway timeout.

mod account;
mod images;
mod removal;

use std::future::Future;
use std::sync::Arc;

use common::{BuildStatus, ImageReference, Owner};
use serde::{Deserialize, Serialize};
use tracing::{error, info, instrument, warn};

use crate::config::BuildConfig;
use crate::entity::build_record;
use crate::error::{BuildError, BuildResult, GatewayError};
use crate::packer;
use crate::registry::ArtifactRegistry;
use crate::runner::{JobRunner, JobState, PodIdentity};
use crate::store::{ArtifactPatch, BuildRecordStore, ImageArtifactStore, NewImageArtifact};
use crate::translator::{self, BuildRequest};

pub use account::RegistryCredential;
pub use images::{ExternalImageRequest, ImageUpdate};
pub use removal::{BatchOutcome, BatchStatus, CleanupStep, RemovalOutcome};

/// Who is asking.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Caller {
    pub user_id: i32,
    pub username: String,
    pub account_id: Option<i32>,
    pub is_admin: bool,
}

impl Caller {
    /// Owner filter for store lookups; admins are unrestricted.
    pub fn owner_filter(&self) -> Option<i32> {
        (!self.is_admin).then_some(self.user_id)
    }

    pub fn may_access(&self, owner_id: i32) -> bool {
        self.is_admin || self.user_id == owner_id
    }

    fn owner(&self) -> Owner {
        Owner {
            user_id: self.user_id,
            username: self.username.clone(),
        }
    }
}

/// Signal about a build job, produced by whatever watches the cluster.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobEvent {
    Succeeded,
    Failed,
    /// The job no longer exists.
    Vanished,
}

impl JobEvent {
    /// Event implied by an observed job state; `None` while the job runs.
    pub fn from_state(state: JobState) -> Option<Self> {
        match state {
            JobState::Active => None,
            JobState::Succeeded => Some(Self::Succeeded),
            JobState::Failed => Some(Self::Failed),
            JobState::Missing => Some(Self::Vanished),
        }
    }
}

#[derive(Clone)]
pub struct BuildLifecycle {
    records: Arc<dyn BuildRecordStore>,
    artifacts: Arc<dyn ImageArtifactStore>,
    runner: Arc<dyn JobRunner>,
    registry: Arc<dyn ArtifactRegistry>,
    config: Arc<BuildConfig>,
}

impl BuildLifecycle {
    pub fn new(
        records: Arc<dyn BuildRecordStore>,
        artifacts: Arc<dyn ImageArtifactStore>,
        runner: Arc<dyn JobRunner>,
        registry: Arc<dyn ArtifactRegistry>,
        config: Arc<BuildConfig>,
    ) -> Self {
        Self {
            records,
            artifacts,
            runner,
            registry,
            config,
        }
    }

    pub fn config(&self) -> &BuildConfig {
        &self.config
    }

    /// Run a gateway call under the configured timeout.
    async fn bounded<T>(
        &self,
        call: impl Future<Output = Result<T, GatewayError>>,
    ) -> Result<T, GatewayError> {
        let limit = self.config.gateway_timeout();
        tokio::time::timeout(limit, call)
            .await
            .unwrap_or_else(|_| Err(GatewayError::Timeout(limit.as_secs())))
    }

    /// Translate, submit and record a build. Returns the new record.
    ///
    /// Nothing is persisted unless the job was accepted by the runner.
    #[instrument(skip(self, caller, request), fields(user_id = caller.user_id))]
    pub async fn submit_build(
        &self,
        caller: &Caller,
        request: BuildRequest,
    ) -> BuildResult<build_record::Model> {
        let translation = translator::translate(request, &caller.owner(), &self.config)?;
        let descriptor = translation.descriptor;

        self.bounded(self.registry.ensure_user_project(&caller.username))
            .await
            .map_err(|e| {
                error!(username = %caller.username, error = %e, "Failed to ensure registry project");
                BuildError::Submission(format!("registry project: {e}"))
            })?;

        let spec = packer::generate(&descriptor, &self.config);
        self.bounded(self.runner.submit(&spec))
            .await
            .map_err(|e| {
                error!(job_name = %descriptor.job_name, error = %e, "Failed to submit build job");
                BuildError::Submission(format!("job submission: {e}"))
            })?;

        let mut record = translation.record;
        record.status = BuildStatus::Building;
        match self.records.create(record).await {
            Ok(model) => {
                info!(
                    build_id = model.id,
                    job_name = %model.job_name,
                    image_ref = %model.image_ref,
                    source = %model.source,
                    "Submitted build"
                );
                Ok(model)
            }
            Err(e) => {
                error!(job_name = %descriptor.job_name, error = %e, "Failed to record build, removing job");
                if let Err(cleanup) = self
                    .bounded(self.runner.delete(&descriptor.job_name, &descriptor.namespace))
                    .await
                {
                    warn!(job_name = %descriptor.job_name, error = %cleanup, "Build job left without a record");
                }
                Err(BuildError::Internal(e.to_string()))
            }
        }
    }

    pub async fn get_build(&self, id: i32) -> BuildResult<build_record::Model> {
        self.records
            .find_by_id(id, None)
            .await?
            .ok_or_else(|| BuildError::NotFound(format!("build {id}")))
    }

    /// Fetch a record and check the caller may act on it.
    pub async fn get_build_for(&self, id: i32, caller: &Caller) -> BuildResult<build_record::Model> {
        let record = self.get_build(id).await?;
        if !caller.may_access(record.user_id) {
            return Err(BuildError::PermissionDenied);
        }
        Ok(record)
    }

    /// Caller's builds, or every build for admins. Newest first.
    pub async fn list_builds(&self, caller: &Caller) -> BuildResult<Vec<build_record::Model>> {
        Ok(self.records.find_by_owner(caller.owner_filter()).await?)
    }

    /// Pod running the build. The name is empty once the pod is gone.
    pub async fn get_build_pod(&self, id: i32, caller: &Caller) -> BuildResult<PodIdentity> {
        let record = self.get_build_for(id, caller).await?;
        let namespace = &self.config.namespace;
        match self
            .bounded(self.runner.get_pod(&record.job_name, namespace))
            .await
        {
            Ok(Some(pod)) => Ok(pod),
            Ok(None) => Ok(PodIdentity {
                name: String::new(),
                namespace: namespace.clone(),
            }),
            Err(e) => {
                warn!(build_id = id, job_name = %record.job_name, error = %e, "Failed to look up build pod");
                Err(BuildError::Internal(e.to_string()))
            }
        }
    }

    /// Builds whose job may still change state.
    pub async fn active_builds(&self) -> BuildResult<Vec<build_record::Model>> {
        Ok(self.records.find_by_status(BuildStatus::ACTIVE).await?)
    }

    pub async fn observe_job(&self, job_name: &str) -> Result<JobState, GatewayError> {
        self.bounded(self.runner.job_state(job_name, &self.config.namespace))
            .await
    }

    /// Apply a job signal to its record.
    ///
    /// Records already in a terminal status are left alone and `None` is
    /// returned, as is an unknown job name.
    #[instrument(skip(self))]
    pub async fn apply_job_event(
        &self,
        job_name: &str,
        event: JobEvent,
    ) -> BuildResult<Option<build_record::Model>> {
        let Some(record) = self.records.find_by_job_name(job_name).await? else {
            info!(job_name, "No build record for job");
            return Ok(None);
        };
        if record.status.is_terminal() {
            return Ok(None);
        }

        let (status, size) = match event {
            JobEvent::Failed => (BuildStatus::Failed, None),
            JobEvent::Vanished => (BuildStatus::Canceled, None),
            JobEvent::Succeeded => {
                let size = self.finish_artifact(&record).await?;
                (BuildStatus::Finished, Some(size))
            }
        };

        if !self.records.update_status(record.id, status, size).await? {
            return Ok(None);
        }
        info!(build_id = record.id, job_name, status = %status, "Build status changed");

        Ok(Some(build_record::Model {
            status,
            size: size.unwrap_or(record.size),
            ..record
        }))
    }

    /// Read the pushed size and create or refresh the artifact row.
    async fn finish_artifact(&self, record: &build_record::Model) -> BuildResult<i64> {
        let image: ImageReference = record.image_ref.parse()?;
        let size = self
            .bounded(self.registry.artifact_size(&image))
            .await
            .map_err(|e| {
                warn!(build_id = record.id, image_ref = %record.image_ref, error = %e, "Failed to read image size");
                BuildError::Internal(e.to_string())
            })?;

        let tags = json_strings(&record.tags);
        let archs = json_strings(&record.archs);

        // Only the builder's own rows are refreshed; another user may have
        // registered the same reference by hand.
        match self
            .artifacts
            .find_by_reference(&record.image_ref, Some(record.user_id))
            .await?
        {
            Some(existing) => {
                info!(
                    image_id = existing.id,
                    image_ref = %record.image_ref,
                    job_name = %record.job_name,
                    "Image reference rebuilt, updating artifact"
                );
                self.artifacts
                    .update(
                        existing.id,
                        ArtifactPatch {
                            job_name: Some(record.job_name.clone()),
                            description: Some(record.description.clone()),
                            tags: Some(tags),
                            archs: Some(archs),
                            size: Some(size),
                            ..Default::default()
                        },
                    )
                    .await?;
            }
            None => {
                self.artifacts
                    .create(NewImageArtifact {
                        user_id: record.user_id,
                        image_ref: record.image_ref.clone(),
                        job_name: Some(record.job_name.clone()),
                        visibility: Default::default(),
                        task_type: Default::default(),
                        description: record.description.clone(),
                        tags,
                        archs,
                        size,
                    })
                    .await?;
            }
        }

        Ok(size)
    }
}

pub(crate) fn json_strings(value: &serde_json::Value) -> Vec<String> {
    value
        .as_array()
        .map(|items| {
            items
                .iter()
                .filter_map(|v| v.as_str().map(str::to_string))
                .collect()
        })
        .unwrap_or_default()
}
