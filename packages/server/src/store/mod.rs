//! Persistence seams for build records and image artifacts.
//!
//! Every lookup that takes an `owner` restricts the result to rows owned by
//! that user id; `None` means unrestricted (admin).

mod orm;

use async_trait::async_trait;
use common::{BuildStatus, GranteeKind, ImageTaskType, ImageVisibility, NewBuildRecord};
use sea_orm::DbErr;

use crate::entity::{build_record, image_artifact, image_grant};

pub use orm::SeaOrmStore;

#[async_trait]
pub trait BuildRecordStore: Send + Sync {
    async fn create(&self, record: NewBuildRecord) -> Result<build_record::Model, DbErr>;

    async fn find_by_id(
        &self,
        id: i32,
        owner: Option<i32>,
    ) -> Result<Option<build_record::Model>, DbErr>;

    async fn find_by_job_name(&self, job_name: &str)
    -> Result<Option<build_record::Model>, DbErr>;

    /// Newest first.
    async fn find_by_owner(&self, owner: Option<i32>) -> Result<Vec<build_record::Model>, DbErr>;

    async fn find_by_status(
        &self,
        statuses: &[BuildStatus],
    ) -> Result<Vec<build_record::Model>, DbErr>;

    /// Set the status, and the image size when given. Only rows still in an
    /// active status are touched; returns false when no row matched.
    async fn update_status(
        &self,
        id: i32,
        status: BuildStatus,
        size: Option<i64>,
    ) -> Result<bool, DbErr>;

    /// Returns false when no row matched.
    async fn delete(&self, id: i32, owner: Option<i32>) -> Result<bool, DbErr>;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewImageArtifact {
    pub user_id: i32,
    pub image_ref: String,
    pub job_name: Option<String>,
    pub visibility: ImageVisibility,
    pub task_type: ImageTaskType,
    pub description: String,
    pub tags: Vec<String>,
    pub archs: Vec<String>,
    pub size: i64,
}

/// Fields to overwrite on an artifact; `None` leaves a field untouched.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ArtifactPatch {
    pub job_name: Option<String>,
    pub visibility: Option<ImageVisibility>,
    pub task_type: Option<ImageTaskType>,
    pub description: Option<String>,
    pub tags: Option<Vec<String>>,
    pub archs: Option<Vec<String>>,
    pub size: Option<i64>,
}

#[async_trait]
pub trait ImageArtifactStore: Send + Sync {
    async fn create(&self, artifact: NewImageArtifact) -> Result<image_artifact::Model, DbErr>;

    async fn find_by_id(
        &self,
        id: i32,
        owner: Option<i32>,
    ) -> Result<Option<image_artifact::Model>, DbErr>;

    /// Newest artifact for the reference among the owner's images.
    async fn find_by_reference(
        &self,
        image_ref: &str,
        owner: Option<i32>,
    ) -> Result<Option<image_artifact::Model>, DbErr>;

    /// Images owned by the user, public images, and images granted to the
    /// user or the account. Newest first, no duplicates.
    async fn list_visible(
        &self,
        user_id: i32,
        account_id: Option<i32>,
    ) -> Result<Vec<image_artifact::Model>, DbErr>;

    async fn update(
        &self,
        id: i32,
        patch: ArtifactPatch,
    ) -> Result<Option<image_artifact::Model>, DbErr>;

    /// Removes the artifact and its grants. Returns false when no row matched.
    async fn delete(&self, id: i32, owner: Option<i32>) -> Result<bool, DbErr>;

    /// Idempotent: granting twice returns the existing grant.
    async fn add_grant(
        &self,
        image_id: i32,
        kind: GranteeKind,
        grantee_id: i32,
    ) -> Result<image_grant::Model, DbErr>;

    async fn remove_grant(
        &self,
        image_id: i32,
        kind: GranteeKind,
        grantee_id: i32,
    ) -> Result<bool, DbErr>;

    async fn list_grants(&self, image_id: i32) -> Result<Vec<image_grant::Model>, DbErr>;
}
