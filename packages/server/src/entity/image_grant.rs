use common::GranteeKind;
use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

/// Read access to an image for one user or one account.
#[sea_orm::model]
#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "image_grant")]
pub struct Model {
    #[sea_orm(primary_key)]
    pub id: i32,

    #[sea_orm(unique_key = "image_grantee", indexed)]
    pub image_id: i32,
    #[sea_orm(unique_key = "image_grantee")]
    pub grantee_kind: GranteeKind,
    #[sea_orm(unique_key = "image_grantee")]
    pub grantee_id: i32,

    pub created_at: DateTimeUtc,
}

impl ActiveModelBehavior for ActiveModel {}
