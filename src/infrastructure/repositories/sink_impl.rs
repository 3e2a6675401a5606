// Copyright (c) 2025 Kirky.X
//
// Licensed under the MIT License
// See LICENSE file in the project root for full license information.

use super::parse_column;
use crate::domain::models::announcement::{Announcement, Attachment, CrawlStatus};
use crate::domain::models::crawl_event::CrawlEvent;
use crate::domain::models::position::Position;
use crate::domain::repositories::sink::Sink;
use crate::domain::repositories::RepositoryError;
use crate::infrastructure::database::entities::{
    announcement as announcement_entity, crawl_event as event_entity, position as position_entity,
};
use async_trait::async_trait;
use chrono::Utc;
use sea_orm::sea_query::Expr;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, ConnectionTrait, DatabaseConnection, EntityTrait, QueryFilter,
    QueryOrder, Set, TransactionTrait,
};
use std::sync::Arc;
use tracing::debug;
use uuid::Uuid;

/// 数据库汇聚端
///
/// 每个写操作在一个事务内完成
#[derive(Clone)]
pub struct DatabaseSink {
    db: Arc<DatabaseConnection>,
}

impl DatabaseSink {
    pub fn new(db: Arc<DatabaseConnection>) -> Self {
        Self { db }
    }
}

impl TryFrom<announcement_entity::Model> for Announcement {
    type Error = RepositoryError;

    fn try_from(model: announcement_entity::Model) -> Result<Self, Self::Error> {
        let attachments: Vec<Attachment> = if model.attachments.is_null() {
            Vec::new()
        } else {
            serde_json::from_value(model.attachments)?
        };
        Ok(Self {
            id: model.id,
            source_id: model.source_id,
            url: model.url,
            final_url: model.final_url,
            title: model.title,
            content_text: model.content_text,
            content_html: model.content_html,
            publish_date: model.publish_date,
            region_code: model.region_code,
            exam_type_code: model.exam_type_code,
            year: model.year,
            external_id: model.external_id,
            attachments,
            content_hash: model.content_hash,
            crawl_status: parse_column(&model.crawl_status, "announcements.crawl_status")?,
            duplicate_of: model.duplicate_of,
            crawled_at: model.crawled_at,
            created_at: model.created_at,
            updated_at: model.updated_at,
        })
    }
}

fn announcement_model(
    announcement: &Announcement,
) -> Result<announcement_entity::ActiveModel, RepositoryError> {
    Ok(announcement_entity::ActiveModel {
        id: Set(announcement.id),
        source_id: Set(announcement.source_id),
        url: Set(announcement.url.clone()),
        final_url: Set(announcement.final_url.clone()),
        title: Set(announcement.title.clone()),
        content_text: Set(announcement.content_text.clone()),
        content_html: Set(announcement.content_html.clone()),
        publish_date: Set(announcement.publish_date),
        region_code: Set(announcement.region_code.clone()),
        exam_type_code: Set(announcement.exam_type_code.clone()),
        year: Set(announcement.year),
        external_id: Set(announcement.external_id.clone()),
        attachments: Set(serde_json::to_value(&announcement.attachments)?),
        content_hash: Set(announcement.content_hash.clone()),
        crawl_status: Set(announcement.crawl_status.to_string()),
        duplicate_of: Set(announcement.duplicate_of),
        crawled_at: Set(announcement.crawled_at),
        created_at: Set(announcement.created_at),
        updated_at: Set(announcement.updated_at),
    })
}

impl TryFrom<position_entity::Model> for Position {
    type Error = RepositoryError;

    fn try_from(model: position_entity::Model) -> Result<Self, Self::Error> {
        Ok(Self {
            id: model.id,
            announcement_id: model.announcement_id,
            source_url: model.source_url,
            department: model.department,
            department_code: model.department_code,
            title: model.title,
            position_code: model.position_code,
            recruit_count: model.recruit_count,
            work_location: model.work_location,
            province: model.province,
            city: model.city,
            education_min: model.education_min,
            degree_required: model.degree_required,
            majors: serde_json::from_value(model.majors)?,
            major_unlimited: model.major_unlimited,
            political_status: model.political_status,
            age_min: model.age_min,
            age_max: model.age_max,
            work_exp_min: model.work_exp_min,
            grassroots_exp_min: model.grassroots_exp_min,
            hukou_required: model.hukou_required,
            hukou_provinces: serde_json::from_value(model.hukou_provinces)?,
            gender: model.gender,
            fresh_grad_only: model.fresh_grad_only,
            other_requirements: model.other_requirements,
            notes: model.notes,
            source_kind: parse_column(&model.source_kind, "positions.source_kind")?,
            confidence: model.confidence.clamp(0, 100) as u8,
            created_at: model.created_at,
        })
    }
}

fn position_model(position: &Position) -> Result<position_entity::ActiveModel, RepositoryError> {
    Ok(position_entity::ActiveModel {
        id: Set(position.id),
        announcement_id: Set(position.announcement_id),
        natural_key: Set(position.natural_key()),
        source_url: Set(position.source_url.clone()),
        department: Set(position.department.clone()),
        department_code: Set(position.department_code.clone()),
        title: Set(position.title.clone()),
        position_code: Set(position.position_code.clone()),
        recruit_count: Set(position.recruit_count),
        work_location: Set(position.work_location.clone()),
        province: Set(position.province.clone()),
        city: Set(position.city.clone()),
        education_min: Set(position.education_min.clone()),
        degree_required: Set(position.degree_required.clone()),
        majors: Set(serde_json::to_value(&position.majors)?),
        major_unlimited: Set(position.major_unlimited),
        political_status: Set(position.political_status.clone()),
        age_min: Set(position.age_min),
        age_max: Set(position.age_max),
        work_exp_min: Set(position.work_exp_min),
        grassroots_exp_min: Set(position.grassroots_exp_min),
        hukou_required: Set(position.hukou_required),
        hukou_provinces: Set(serde_json::to_value(&position.hukou_provinces)?),
        gender: Set(position.gender.clone()),
        fresh_grad_only: Set(position.fresh_grad_only),
        other_requirements: Set(position.other_requirements.clone()),
        notes: Set(position.notes.clone()),
        source_kind: Set(position.source_kind.to_string()),
        confidence: Set(position.confidence as i16),
        created_at: Set(position.created_at),
    })
}

impl From<event_entity::Model> for CrawlEvent {
    fn from(model: event_entity::Model) -> Self {
        Self {
            id: model.id,
            task_id: model.task_id,
            source_id: model.source_id,
            announcement_id: model.announcement_id,
            event_type: model.event_type,
            message: model.message,
            created_at: model.created_at,
        }
    }
}

async fn find_by_source_url<C: ConnectionTrait>(
    conn: &C,
    source_id: Uuid,
    url: &str,
) -> Result<Option<announcement_entity::Model>, RepositoryError> {
    Ok(announcement_entity::Entity::find()
        .filter(announcement_entity::Column::SourceId.eq(source_id))
        .filter(announcement_entity::Column::Url.eq(url))
        .one(conn)
        .await?)
}

impl DatabaseSink {
    /// 某条公告的抓取事件，按时间排序
    pub async fn events_for(&self, announcement_id: Uuid) -> Result<Vec<CrawlEvent>, RepositoryError> {
        Ok(event_entity::Entity::find()
            .filter(event_entity::Column::AnnouncementId.eq(announcement_id))
            .order_by_asc(event_entity::Column::CreatedAt)
            .all(self.db.as_ref())
            .await?
            .into_iter()
            .map(Into::into)
            .collect())
    }
}

#[async_trait]
impl Sink for DatabaseSink {
    async fn upsert_announcement(
        &self,
        announcement: &Announcement,
    ) -> Result<Announcement, RepositoryError> {
        let txn = self.db.begin().await?;
        let mut stored = announcement.clone();
        let model = match find_by_source_url(&txn, announcement.source_id, &announcement.url).await? {
            Some(existing) => {
                stored.id = existing.id;
                stored.created_at = existing.created_at;
                announcement_model(&stored)?.update(&txn).await?
            }
            None => announcement_model(&stored)?.insert(&txn).await?,
        };
        txn.commit().await?;
        model.try_into()
    }

    async fn upsert_positions(
        &self,
        announcement_id: Uuid,
        positions: &[Position],
    ) -> Result<usize, RepositoryError> {
        let txn = self.db.begin().await?;
        if announcement_entity::Entity::find_by_id(announcement_id)
            .one(&txn)
            .await?
            .is_none()
        {
            return Err(RepositoryError::NotFound);
        }

        for position in positions {
            let mut position = position.clone();
            position.announcement_id = announcement_id;
            let existing = position_entity::Entity::find()
                .filter(position_entity::Column::AnnouncementId.eq(announcement_id))
                .filter(position_entity::Column::NaturalKey.eq(position.natural_key()))
                .one(&txn)
                .await?;
            match existing {
                Some(existing) => {
                    position.id = existing.id;
                    position.created_at = existing.created_at;
                    position_model(&position)?.update(&txn).await?;
                }
                None => {
                    position_model(&position)?.insert(&txn).await?;
                }
            }
        }
        txn.commit().await?;
        debug!(%announcement_id, count = positions.len(), "Positions upserted");
        Ok(positions.len())
    }

    async fn record_crawl_event(&self, event: &CrawlEvent) -> Result<(), RepositoryError> {
        event_entity::ActiveModel {
            id: Set(event.id),
            task_id: Set(event.task_id),
            source_id: Set(event.source_id),
            announcement_id: Set(event.announcement_id),
            event_type: Set(event.event_type.clone()),
            message: Set(event.message.clone()),
            created_at: Set(event.created_at),
        }
        .insert(self.db.as_ref())
        .await?;
        Ok(())
    }

    async fn save_candidate(
        &self,
        announcement: &Announcement,
    ) -> Result<(Announcement, bool), RepositoryError> {
        let txn = self.db.begin().await?;
        if let Some(existing) =
            find_by_source_url(&txn, announcement.source_id, &announcement.url).await?
        {
            txn.commit().await?;
            return Ok((existing.try_into()?, false));
        }
        let model = announcement_model(announcement)?.insert(&txn).await?;
        txn.commit().await?;
        Ok((model.try_into()?, true))
    }

    async fn get_announcement(&self, id: Uuid) -> Result<Option<Announcement>, RepositoryError> {
        announcement_entity::Entity::find_by_id(id)
            .one(self.db.as_ref())
            .await?
            .map(Announcement::try_from)
            .transpose()
    }

    async fn find_by_source_url(
        &self,
        source_id: Uuid,
        url: &str,
    ) -> Result<Option<Announcement>, RepositoryError> {
        find_by_source_url(self.db.as_ref(), source_id, url)
            .await?
            .map(Announcement::try_from)
            .transpose()
    }

    async fn find_by_content_hash(
        &self,
        content_hash: &str,
    ) -> Result<Option<Announcement>, RepositoryError> {
        if content_hash.is_empty() {
            return Ok(None);
        }
        announcement_entity::Entity::find()
            .filter(announcement_entity::Column::ContentHash.eq(content_hash))
            .order_by_asc(announcement_entity::Column::CreatedAt)
            .one(self.db.as_ref())
            .await?
            .map(Announcement::try_from)
            .transpose()
    }

    async fn update_crawl_status(
        &self,
        id: Uuid,
        status: CrawlStatus,
    ) -> Result<(), RepositoryError> {
        let result = announcement_entity::Entity::update_many()
            .col_expr(
                announcement_entity::Column::CrawlStatus,
                Expr::value(status.to_string()),
            )
            .col_expr(announcement_entity::Column::UpdatedAt, Expr::value(Utc::now()))
            .filter(announcement_entity::Column::Id.eq(id))
            .exec(self.db.as_ref())
            .await?;
        if result.rows_affected == 0 {
            return Err(RepositoryError::NotFound);
        }
        Ok(())
    }

    async fn list_positions(&self, announcement_id: Uuid) -> Result<Vec<Position>, RepositoryError> {
        position_entity::Entity::find()
            .filter(position_entity::Column::AnnouncementId.eq(announcement_id))
            .order_by_asc(position_entity::Column::CreatedAt)
            .all(self.db.as_ref())
            .await?
            .into_iter()
            .map(Position::try_from)
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::models::article::Article;
    use crate::domain::models::position::PositionSource;
    use crate::domain::models::source::{Source, SourceKind};
    use crate::domain::repositories::source_repository::SourceRepository;
    use crate::domain::services::dedup_service::{DedupService, EmitOutcome};
    use crate::infrastructure::repositories::source_repo_impl::SourceRepositoryImpl;
    use crate::infrastructure::repositories::test_db;

    async fn setup() -> (Arc<DatabaseSink>, Uuid) {
        let db = test_db::memory().await;
        let source = Source::new("人事考试网", SourceKind::ListPage, "https://a.gov.cn/list");
        SourceRepositoryImpl::new(db.clone())
            .create(&source)
            .await
            .unwrap();
        (Arc::new(DatabaseSink::new(db)), source.id)
    }

    fn fetched(source_id: Uuid, url: &str, tag: &str) -> Announcement {
        let mut a = Announcement::from_article(&Article::new(source_id, url, "2025年招录公告"));
        a.content_text = format!("{}{}", tag, "公告正文内容".repeat(12));
        a.crawl_status = CrawlStatus::Fetched;
        a
    }

    #[tokio::test]
    async fn test_candidate_then_upsert_keeps_id() {
        let (sink, source_id) = setup().await;
        let candidate = Announcement::from_article(&Article::new(
            source_id,
            "https://a.gov.cn/1.html",
            "公告",
        ));
        let (_, created) = sink.save_candidate(&candidate).await.unwrap();
        assert!(created);
        let (existing, created) = sink.save_candidate(&candidate).await.unwrap();
        assert!(!created);
        assert_eq!(existing.id, candidate.id);

        let stored = sink
            .upsert_announcement(&fetched(source_id, "https://a.gov.cn/1.html", "A"))
            .await
            .unwrap();
        assert_eq!(stored.id, candidate.id);
        assert_eq!(stored.crawl_status, CrawlStatus::Fetched);
    }

    #[tokio::test]
    async fn test_dedup_against_database() {
        let (sink, source_id) = setup().await;
        let dedup = DedupService::new(sink.clone());

        let (first, outcome) = dedup
            .emit_announcement(fetched(source_id, "https://a.gov.cn/1.html", "A"), None)
            .await
            .unwrap();
        assert_eq!(outcome, EmitOutcome::Inserted);
        let (_, outcome) = dedup
            .emit_announcement(fetched(source_id, "https://a.gov.cn/1.html", "A"), None)
            .await
            .unwrap();
        assert_eq!(outcome, EmitOutcome::Unchanged);
        let (mirror, outcome) = dedup
            .emit_announcement(fetched(source_id, "https://a.gov.cn/mirror.html", "A"), None)
            .await
            .unwrap();
        assert_eq!(outcome, EmitOutcome::Duplicate);
        assert_eq!(mirror.duplicate_of, Some(first.id));
        assert!(!sink.events_for(first.id).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_positions_idempotent_by_natural_key() {
        let (sink, source_id) = setup().await;
        let announcement = sink
            .upsert_announcement(&fetched(source_id, "https://a.gov.cn/2.html", "B"))
            .await
            .unwrap();

        let mut position = Position::draft(PositionSource::HtmlTable);
        position.announcement_id = announcement.id;
        position.department = "某市统计局".to_string();
        position.title = "统计员".to_string();
        position.recruit_count = 1;
        position.majors = vec!["统计学".to_string()];
        position.confidence = 90;
        sink.upsert_positions(announcement.id, &[position.clone()])
            .await
            .unwrap();

        let mut again = position.clone();
        again.id = Uuid::new_v4();
        again.recruit_count = 2;
        sink.upsert_positions(announcement.id, &[again]).await.unwrap();

        let stored = sink.list_positions(announcement.id).await.unwrap();
        assert_eq!(stored.len(), 1);
        assert_eq!(stored[0].id, position.id);
        assert_eq!(stored[0].recruit_count, 2);
        assert_eq!(stored[0].majors, vec!["统计学".to_string()]);

        sink.update_crawl_status(announcement.id, CrawlStatus::Extracted)
            .await
            .unwrap();
        let reloaded = sink.get_announcement(announcement.id).await.unwrap().unwrap();
        assert_eq!(reloaded.crawl_status, CrawlStatus::Extracted);

        assert!(matches!(
            sink.upsert_positions(Uuid::new_v4(), &[]).await,
            Err(RepositoryError::NotFound)
        ));
    }
}
