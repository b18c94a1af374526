use common::{ImageTaskType, ImageVisibility};
use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

/// A usable image, either produced by a finished build or registered by hand.
#[sea_orm::model]
#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "image_artifact")]
pub struct Model {
    #[sea_orm(primary_key)]
    pub id: i32,

    #[sea_orm(indexed)]
    pub user_id: i32,

    #[sea_orm(indexed)]
    pub image_ref: String,

    /// Job that produced the image; NULL for external images.
    #[sea_orm(indexed)]
    pub job_name: Option<String>,

    pub visibility: ImageVisibility,
    pub task_type: ImageTaskType,

    #[sea_orm(column_type = "Text")]
    pub description: String,

    #[sea_orm(column_type = "JsonBinary")]
    pub tags: serde_json::Value,

    #[sea_orm(column_type = "JsonBinary")]
    pub archs: serde_json::Value,

    pub size: i64,

    pub created_at: DateTimeUtc,
}

impl ActiveModelBehavior for ActiveModel {}
