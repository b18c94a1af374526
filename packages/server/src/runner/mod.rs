//! Job runner seam: submits generated jobs to the cluster and reports on them.

mod cluster;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::GatewayError;
use crate::packer::BuildJobSpec;

pub use cluster::KubeJobRunner;

/// Pod that executes a build job.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PodIdentity {
    /// Empty when the pod no longer exists.
    pub name: String,
    pub namespace: String,
}

/// What the cluster reports about a job.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobState {
    /// Created, waiting or running.
    Active,
    Succeeded,
    Failed,
    /// No job with that name exists.
    Missing,
}

#[async_trait]
pub trait JobRunner: Send + Sync {
    /// Create the job and its dependent objects. On error nothing is left
    /// behind.
    async fn submit(&self, spec: &BuildJobSpec) -> Result<(), GatewayError>;

    /// Delete the job and everything it owns. Deleting a job that does not
    /// exist succeeds.
    async fn delete(&self, job_name: &str, namespace: &str) -> Result<(), GatewayError>;

    async fn get_pod(
        &self,
        job_name: &str,
        namespace: &str,
    ) -> Result<Option<PodIdentity>, GatewayError>;

    async fn job_state(&self, job_name: &str, namespace: &str) -> Result<JobState, GatewayError>;
}
