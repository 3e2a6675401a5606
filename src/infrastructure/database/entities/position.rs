// Copyright (c) 2025 Kirky.X
//
// Licensed under the MIT License
// See LICENSE file in the project root for full license information.

use sea_orm::entity::prelude::*;
use uuid::Uuid;

#[derive(Clone, Debug, PartialEq, DeriveEntityModel)]
#[sea_orm(table_name = "positions")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,
    pub announcement_id: Uuid,
    /// 职位代码、部门、职位名称、工作地点的摘要
    pub natural_key: String,
    pub source_url: String,
    pub department: String,
    pub department_code: Option<String>,
    pub title: String,
    pub position_code: Option<String>,
    pub recruit_count: i32,
    pub work_location: String,
    pub province: Option<String>,
    pub city: Option<String>,
    pub education_min: Option<String>,
    pub degree_required: Option<String>,
    pub majors: Json,
    pub major_unlimited: bool,
    pub political_status: Option<String>,
    pub age_min: Option<i32>,
    pub age_max: Option<i32>,
    pub work_exp_min: Option<i32>,
    pub grassroots_exp_min: Option<i32>,
    pub hukou_required: bool,
    pub hukou_provinces: Json,
    pub gender: Option<String>,
    pub fresh_grad_only: bool,
    #[sea_orm(column_type = "Text", nullable)]
    pub other_requirements: Option<String>,
    #[sea_orm(column_type = "Text", nullable)]
    pub notes: Option<String>,
    pub source_kind: String,
    pub confidence: i16,
    pub created_at: ChronoDateTimeUtc,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(
        belongs_to = "super::announcement::Entity",
        from = "Column::AnnouncementId",
        to = "super::announcement::Column::Id"
    )]
    Announcement,
}

impl Related<super::announcement::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Announcement.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}
