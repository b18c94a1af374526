//! Artifact registry seam: per-user projects, registry user accounts,
//! quotas and image artifacts.

mod harbor;

use async_trait::async_trait;
use common::ImageReference;
use serde::{Deserialize, Serialize};

use crate::error::GatewayError;

pub use harbor::HarborRegistry;

/// Storage usage of a user's project, in bytes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProjectDetail {
    pub project: String,
    pub used: i64,
    pub quota: i64,
}

#[async_trait]
pub trait ArtifactRegistry: Send + Sync {
    /// Create the user's project with the default quota unless it exists.
    async fn ensure_user_project(&self, username: &str) -> Result<(), GatewayError>;

    async fn user_exists(&self, username: &str) -> Result<bool, GatewayError>;

    /// Create a registry user and return its generated password.
    async fn create_user(&self, username: &str) -> Result<String, GatewayError>;

    async fn delete_user(&self, username: &str) -> Result<(), GatewayError>;

    /// Make the user a project admin of their own project.
    async fn add_project_member(&self, username: &str) -> Result<(), GatewayError>;

    async fn project_detail(&self, username: &str) -> Result<ProjectDetail, GatewayError>;

    async fn update_quota(&self, project: &str, bytes: i64) -> Result<(), GatewayError>;

    async fn delete_artifact(&self, image: &ImageReference) -> Result<(), GatewayError>;

    async fn artifact_size(&self, image: &ImageReference) -> Result<i64, GatewayError>;

    /// True when the reference resolves to an artifact. Errors count as
    /// unreachable.
    async fn artifact_reachable(&self, image: &ImageReference) -> bool;
}
