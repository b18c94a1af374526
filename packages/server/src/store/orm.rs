use async_trait::async_trait;
use chrono::Utc;
use common::{BuildStatus, GranteeKind, ImageVisibility, NewBuildRecord};
use sea_orm::{
    ActiveModelTrait, ColumnTrait, Condition, DatabaseConnection, DbErr, EntityTrait, NotSet,
    QueryFilter, QueryOrder, QuerySelect, QueryTrait, Set, SqlErr, TransactionTrait,
};

use super::{ArtifactPatch, BuildRecordStore, ImageArtifactStore, NewImageArtifact};
use crate::entity::{build_record, image_artifact, image_grant};

/// Both stores over one Postgres connection pool.
#[derive(Clone)]
pub struct SeaOrmStore {
    db: DatabaseConnection,
}

impl SeaOrmStore {
    pub fn new(db: DatabaseConnection) -> Self {
        Self { db }
    }
}

fn json_list(items: Vec<String>) -> serde_json::Value {
    serde_json::Value::from(items)
}

#[async_trait]
impl BuildRecordStore for SeaOrmStore {
    async fn create(&self, record: NewBuildRecord) -> Result<build_record::Model, DbErr> {
        build_record::ActiveModel {
            user_id: Set(record.user_id),
            job_name: Set(record.job_name),
            image_ref: Set(record.image_ref),
            status: Set(record.status),
            source: Set(record.source),
            description: Set(record.description),
            dockerfile: Set(record.dockerfile),
            size: Set(0),
            archs: Set(json_list(record.archs)),
            tags: Set(json_list(record.tags)),
            template: Set(record.template),
            created_at: Set(Utc::now()),
            ..Default::default()
        }
        .insert(&self.db)
        .await
    }

    async fn find_by_id(
        &self,
        id: i32,
        owner: Option<i32>,
    ) -> Result<Option<build_record::Model>, DbErr> {
        let mut query = build_record::Entity::find_by_id(id);
        if let Some(owner) = owner {
            query = query.filter(build_record::Column::UserId.eq(owner));
        }
        query.one(&self.db).await
    }

    async fn find_by_job_name(
        &self,
        job_name: &str,
    ) -> Result<Option<build_record::Model>, DbErr> {
        build_record::Entity::find()
            .filter(build_record::Column::JobName.eq(job_name))
            .one(&self.db)
            .await
    }

    async fn find_by_owner(&self, owner: Option<i32>) -> Result<Vec<build_record::Model>, DbErr> {
        let mut query = build_record::Entity::find();
        if let Some(owner) = owner {
            query = query.filter(build_record::Column::UserId.eq(owner));
        }
        query
            .order_by_desc(build_record::Column::CreatedAt)
            .all(&self.db)
            .await
    }

    async fn find_by_status(
        &self,
        statuses: &[BuildStatus],
    ) -> Result<Vec<build_record::Model>, DbErr> {
        build_record::Entity::find()
            .filter(build_record::Column::Status.is_in(statuses.iter().copied()))
            .order_by_asc(build_record::Column::Id)
            .all(&self.db)
            .await
    }

    async fn update_status(
        &self,
        id: i32,
        status: BuildStatus,
        size: Option<i64>,
    ) -> Result<bool, DbErr> {
        let result = build_record::Entity::update_many()
            .set(build_record::ActiveModel {
                status: Set(status),
                size: size.map(Set).unwrap_or(NotSet),
                ..Default::default()
            })
            .filter(build_record::Column::Id.eq(id))
            .filter(build_record::Column::Status.is_in(BuildStatus::ACTIVE.iter().copied()))
            .exec(&self.db)
            .await?;
        Ok(result.rows_affected > 0)
    }

    async fn delete(&self, id: i32, owner: Option<i32>) -> Result<bool, DbErr> {
        let mut query = build_record::Entity::delete_many().filter(build_record::Column::Id.eq(id));
        if let Some(owner) = owner {
            query = query.filter(build_record::Column::UserId.eq(owner));
        }
        let result = query.exec(&self.db).await?;
        Ok(result.rows_affected > 0)
    }
}

#[async_trait]
impl ImageArtifactStore for SeaOrmStore {
    async fn create(&self, artifact: NewImageArtifact) -> Result<image_artifact::Model, DbErr> {
        image_artifact::ActiveModel {
            user_id: Set(artifact.user_id),
            image_ref: Set(artifact.image_ref),
            job_name: Set(artifact.job_name),
            visibility: Set(artifact.visibility),
            task_type: Set(artifact.task_type),
            description: Set(artifact.description),
            tags: Set(json_list(artifact.tags)),
            archs: Set(json_list(artifact.archs)),
            size: Set(artifact.size),
            created_at: Set(Utc::now()),
            ..Default::default()
        }
        .insert(&self.db)
        .await
    }

    async fn find_by_id(
        &self,
        id: i32,
        owner: Option<i32>,
    ) -> Result<Option<image_artifact::Model>, DbErr> {
        let mut query = image_artifact::Entity::find_by_id(id);
        if let Some(owner) = owner {
            query = query.filter(image_artifact::Column::UserId.eq(owner));
        }
        query.one(&self.db).await
    }

    async fn find_by_reference(
        &self,
        image_ref: &str,
        owner: Option<i32>,
    ) -> Result<Option<image_artifact::Model>, DbErr> {
        let mut query =
            image_artifact::Entity::find().filter(image_artifact::Column::ImageRef.eq(image_ref));
        if let Some(owner) = owner {
            query = query.filter(image_artifact::Column::UserId.eq(owner));
        }
        query
            .order_by_desc(image_artifact::Column::CreatedAt)
            .one(&self.db)
            .await
    }

    async fn list_visible(
        &self,
        user_id: i32,
        account_id: Option<i32>,
    ) -> Result<Vec<image_artifact::Model>, DbErr> {
        let mut grantee = Condition::any().add(
            Condition::all()
                .add(image_grant::Column::GranteeKind.eq(GranteeKind::User))
                .add(image_grant::Column::GranteeId.eq(user_id)),
        );
        if let Some(account_id) = account_id {
            grantee = grantee.add(
                Condition::all()
                    .add(image_grant::Column::GranteeKind.eq(GranteeKind::Account))
                    .add(image_grant::Column::GranteeId.eq(account_id)),
            );
        }

        let granted = image_grant::Entity::find()
            .select_only()
            .column(image_grant::Column::ImageId)
            .filter(grantee)
            .into_query();

        image_artifact::Entity::find()
            .filter(
                Condition::any()
                    .add(image_artifact::Column::UserId.eq(user_id))
                    .add(image_artifact::Column::Visibility.eq(ImageVisibility::Public))
                    .add(image_artifact::Column::Id.in_subquery(granted)),
            )
            .order_by_desc(image_artifact::Column::CreatedAt)
            .all(&self.db)
            .await
    }

    async fn update(
        &self,
        id: i32,
        patch: ArtifactPatch,
    ) -> Result<Option<image_artifact::Model>, DbErr> {
        let Some(model) = image_artifact::Entity::find_by_id(id).one(&self.db).await? else {
            return Ok(None);
        };
        if patch == ArtifactPatch::default() {
            return Ok(Some(model));
        }

        let mut active: image_artifact::ActiveModel = model.into();
        if let Some(job_name) = patch.job_name {
            active.job_name = Set(Some(job_name));
        }
        if let Some(visibility) = patch.visibility {
            active.visibility = Set(visibility);
        }
        if let Some(task_type) = patch.task_type {
            active.task_type = Set(task_type);
        }
        if let Some(description) = patch.description {
            active.description = Set(description);
        }
        if let Some(tags) = patch.tags {
            active.tags = Set(json_list(tags));
        }
        if let Some(archs) = patch.archs {
            active.archs = Set(json_list(archs));
        }
        if let Some(size) = patch.size {
            active.size = Set(size);
        }

        active.update(&self.db).await.map(Some)
    }

    async fn delete(&self, id: i32, owner: Option<i32>) -> Result<bool, DbErr> {
        let txn = self.db.begin().await?;

        let mut query =
            image_artifact::Entity::delete_many().filter(image_artifact::Column::Id.eq(id));
        if let Some(owner) = owner {
            query = query.filter(image_artifact::Column::UserId.eq(owner));
        }
        let result = query.exec(&txn).await?;

        if result.rows_affected == 0 {
            txn.rollback().await?;
            return Ok(false);
        }

        image_grant::Entity::delete_many()
            .filter(image_grant::Column::ImageId.eq(id))
            .exec(&txn)
            .await?;
        txn.commit().await?;

        Ok(true)
    }

    async fn add_grant(
        &self,
        image_id: i32,
        kind: GranteeKind,
        grantee_id: i32,
    ) -> Result<image_grant::Model, DbErr> {
        let find_existing = || {
            image_grant::Entity::find()
                .filter(image_grant::Column::ImageId.eq(image_id))
                .filter(image_grant::Column::GranteeKind.eq(kind))
                .filter(image_grant::Column::GranteeId.eq(grantee_id))
                .one(&self.db)
        };

        if let Some(existing) = find_existing().await? {
            return Ok(existing);
        }

        let model = image_grant::ActiveModel {
            image_id: Set(image_id),
            grantee_kind: Set(kind),
            grantee_id: Set(grantee_id),
            created_at: Set(Utc::now()),
            ..Default::default()
        };

        match model.insert(&self.db).await {
            Ok(inserted) => Ok(inserted),
            Err(e) if matches!(e.sql_err(), Some(SqlErr::UniqueConstraintViolation(_))) => {
                find_existing().await?.ok_or_else(|| {
                    DbErr::Custom("UniqueConstraintViolation but existing grant not found".into())
                })
            }
            Err(e) => Err(e),
        }
    }

    async fn remove_grant(
        &self,
        image_id: i32,
        kind: GranteeKind,
        grantee_id: i32,
    ) -> Result<bool, DbErr> {
        let result = image_grant::Entity::delete_many()
            .filter(image_grant::Column::ImageId.eq(image_id))
            .filter(image_grant::Column::GranteeKind.eq(kind))
            .filter(image_grant::Column::GranteeId.eq(grantee_id))
            .exec(&self.db)
            .await?;
        Ok(result.rows_affected > 0)
    }

    async fn list_grants(&self, image_id: i32) -> Result<Vec<image_grant::Model>, DbErr> {
        image_grant::Entity::find()
            .filter(image_grant::Column::ImageId.eq(image_id))
            .order_by_asc(image_grant::Column::Id)
            .all(&self.db)
            .await
    }
}
