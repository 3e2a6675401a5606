// Copyright (c) 2025 Kirky.X
//
// Licensed under the MIT License
// See LICENSE file in the project root for full license information.

use sea_orm::entity::prelude::*;
use uuid::Uuid;

#[derive(Clone, Debug, PartialEq, DeriveEntityModel)]
#[sea_orm(table_name = "announcements")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,
    pub source_id: Uuid,
    pub url: String,
    pub final_url: Option<String>,
    pub title: String,
    #[sea_orm(column_type = "Text")]
    pub content_text: String,
    #[sea_orm(column_type = "Text")]
    pub content_html: String,
    pub publish_date: Option<ChronoDate>,
    pub region_code: Option<String>,
    pub exam_type_code: Option<String>,
    pub year: Option<i32>,
    pub external_id: Option<String>,
    pub attachments: Json,
    pub content_hash: String,
    pub crawl_status: String,
    pub duplicate_of: Option<Uuid>,
    pub crawled_at: Option<ChronoDateTimeUtc>,
    pub created_at: ChronoDateTimeUtc,
    pub updated_at: ChronoDateTimeUtc,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(
        belongs_to = "super::source::Entity",
        from = "Column::SourceId",
        to = "super::source::Column::Id"
    )]
    Source,
    #[sea_orm(has_many = "super::position::Entity")]
    Position,
}

impl Related<super::source::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Source.def()
    }
}

impl Related<super::position::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Position.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}
