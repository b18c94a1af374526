use common::{GranteeKind, ImageReference, ImageTaskType, ImageVisibility};
use serde::{Deserialize, Serialize};
use tracing::{error, info, instrument};

use super::removal::BatchOutcome;
use super::{BuildLifecycle, Caller};
use crate::entity::{image_artifact, image_grant};
use crate::error::{BuildError, BuildResult};
use crate::store::{ArtifactPatch, NewImageArtifact};

/// A user-supplied image that was not built here.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ExternalImageRequest {
    pub image_ref: String,
    #[serde(default)]
    pub task_type: ImageTaskType,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub archs: Vec<String>,
}

/// Owner-editable image metadata; `None` keeps the current value.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ImageUpdate {
    pub description: Option<String>,
    pub task_type: Option<ImageTaskType>,
    pub tags: Option<Vec<String>>,
}

impl BuildLifecycle {
    #[instrument(skip(self, caller, request), fields(user_id = caller.user_id, image_ref = %request.image_ref))]
    pub async fn register_external_image(
        &self,
        caller: &Caller,
        request: ExternalImageRequest,
    ) -> BuildResult<image_artifact::Model> {
        let image_ref = request.image_ref.trim();
        if image_ref.is_empty() || image_ref.contains(char::is_whitespace) {
            return Err(BuildError::Validation(format!(
                "invalid image reference '{}'",
                request.image_ref
            )));
        }

        let artifact = self
            .artifacts
            .create(NewImageArtifact {
                user_id: caller.user_id,
                image_ref: image_ref.to_string(),
                job_name: None,
                visibility: ImageVisibility::Private,
                task_type: request.task_type,
                description: request.description,
                tags: request.tags,
                archs: common::normalize_archs(request.archs),
                size: 0,
            })
            .await?;

        info!(image_id = artifact.id, "Registered external image");
        Ok(artifact)
    }

    /// Own, public and shared images.
    pub async fn list_images(&self, caller: &Caller) -> BuildResult<Vec<image_artifact::Model>> {
        Ok(self
            .artifacts
            .list_visible(caller.user_id, caller.account_id)
            .await?)
    }

    async fn image_for(&self, id: i32, caller: &Caller) -> BuildResult<image_artifact::Model> {
        let image = self
            .artifacts
            .find_by_id(id, None)
            .await?
            .ok_or_else(|| BuildError::NotFound(format!("image {id}")))?;
        if !caller.may_access(image.user_id) {
            return Err(BuildError::PermissionDenied);
        }
        Ok(image)
    }

    pub async fn update_image(
        &self,
        id: i32,
        caller: &Caller,
        update: ImageUpdate,
    ) -> BuildResult<image_artifact::Model> {
        self.image_for(id, caller).await?;
        self.patch_image(
            id,
            ArtifactPatch {
                description: update.description,
                task_type: update.task_type,
                tags: update.tags,
                ..Default::default()
            },
        )
        .await
    }

    /// Admin only.
    pub async fn set_visibility(
        &self,
        id: i32,
        caller: &Caller,
        visibility: ImageVisibility,
    ) -> BuildResult<image_artifact::Model> {
        if !caller.is_admin {
            return Err(BuildError::PermissionDenied);
        }
        let image = self
            .patch_image(
                id,
                ArtifactPatch {
                    visibility: Some(visibility),
                    ..Default::default()
                },
            )
            .await?;
        info!(image_id = id, visibility = ?visibility, "Changed image visibility");
        Ok(image)
    }

    async fn patch_image(
        &self,
        id: i32,
        patch: ArtifactPatch,
    ) -> BuildResult<image_artifact::Model> {
        self.artifacts
            .update(id, patch)
            .await?
            .ok_or_else(|| BuildError::NotFound(format!("image {id}")))
    }

    pub async fn grant_image(
        &self,
        id: i32,
        caller: &Caller,
        kind: GranteeKind,
        grantee_id: i32,
    ) -> BuildResult<image_grant::Model> {
        self.image_for(id, caller).await?;
        let grant = self.artifacts.add_grant(id, kind, grantee_id).await?;
        info!(image_id = id, grantee_kind = ?kind, grantee_id, "Shared image");
        Ok(grant)
    }

    /// Returns false when there was no such grant.
    pub async fn revoke_image(
        &self,
        id: i32,
        caller: &Caller,
        kind: GranteeKind,
        grantee_id: i32,
    ) -> BuildResult<bool> {
        self.image_for(id, caller).await?;
        Ok(self.artifacts.remove_grant(id, kind, grantee_id).await?)
    }

    pub async fn list_grants(
        &self,
        id: i32,
        caller: &Caller,
    ) -> BuildResult<Vec<image_grant::Model>> {
        self.image_for(id, caller).await?;
        Ok(self.artifacts.list_grants(id).await?)
    }

    /// Remove image rows. Registry blobs are left to the build delete path.
    pub async fn delete_images(&self, ids: &[i32], caller: &Caller) -> BatchOutcome<()> {
        let mut results = Vec::with_capacity(ids.len());
        for &id in ids {
            let result = self.delete_image(id, caller).await;
            if let Err(e) = &result {
                error!(image_id = id, error = %e, "Failed to delete image");
            }
            results.push((id, result));
        }
        BatchOutcome { results }
    }

    async fn delete_image(&self, id: i32, caller: &Caller) -> BuildResult<()> {
        self.image_for(id, caller).await?;
        if !self.artifacts.delete(id, caller.owner_filter()).await? {
            return Err(BuildError::NotFound(format!("image {id}")));
        }
        info!(image_id = id, "Deleted image");
        Ok(())
    }

    /// References that do not resolve in the registry, in input order.
    pub async fn check_references(&self, refs: &[String]) -> Vec<String> {
        let mut unreachable = Vec::new();
        for image_ref in refs {
            let reachable = match image_ref.parse::<ImageReference>() {
                Ok(image) => tokio::time::timeout(
                    self.config.gateway_timeout(),
                    self.registry.artifact_reachable(&image),
                )
                .await
                .unwrap_or(false),
                Err(_) => false,
            };
            if !reachable {
                unreachable.push(image_ref.clone());
            }
        }
        unreachable
    }
}
