use common::{BuildSource, BuildStatus};
use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

/// One build attempt. Kept until explicitly deleted.
#[sea_orm::model]
#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "build_record")]
pub struct Model {
    #[sea_orm(primary_key)]
    pub id: i32,

    #[sea_orm(indexed)]
    pub user_id: i32,

    /// Name of the cluster job that runs (or ran) this build.
    #[sea_orm(unique)]
    pub job_name: String,

    pub image_ref: String,

    #[sea_orm(indexed)]
    pub status: BuildStatus,
    pub source: BuildSource,

    #[sea_orm(column_type = "Text")]
    pub description: String,

    /// Only set for Dockerfile and PipApt builds.
    #[sea_orm(column_type = "Text", nullable)]
    pub dockerfile: Option<String>,

    /// Pushed image size in bytes, filled in when the build finishes.
    pub size: i64,

    /// Target platforms as a JSON array of strings.
    #[sea_orm(column_type = "JsonBinary")]
    pub archs: serde_json::Value,

    #[sea_orm(column_type = "JsonBinary")]
    pub tags: serde_json::Value,

    pub template: Option<String>,

    pub created_at: DateTimeUtc,
}

impl ActiveModelBehavior for ActiveModel {}
