// Copyright (c) 2025 Kirky.X
//
// Licensed under the MIT License
// See LICENSE file in the project root for full license information.

use super::parse_column;
use crate::domain::models::source::{Source, SourceKind, SourceSelectors, SourceStatus};
use crate::domain::repositories::source_repository::SourceRepository;
use crate::domain::repositories::RepositoryError;
use crate::infrastructure::database::entities::source as source_entity;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sea_orm::sea_query::Expr;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, DatabaseConnection, EntityTrait, QueryFilter, QueryOrder, Set,
};
use std::sync::Arc;
use uuid::Uuid;

/// 数据源仓库实现
#[derive(Clone)]
pub struct SourceRepositoryImpl {
    db: Arc<DatabaseConnection>,
}

impl SourceRepositoryImpl {
    pub fn new(db: Arc<DatabaseConnection>) -> Self {
        Self { db }
    }
}

impl TryFrom<source_entity::Model> for Source {
    type Error = RepositoryError;

    fn try_from(model: source_entity::Model) -> Result<Self, Self::Error> {
        let selectors = match model.selectors {
            Some(value) if !value.is_null() => {
                Some(serde_json::from_value::<SourceSelectors>(value)?)
            }
            _ => None,
        };
        Ok(Self {
            id: model.id,
            name: model.name,
            kind: parse_column(&model.kind, "sources.kind")?,
            endpoint: model.endpoint,
            selectors,
            params: model.params,
            crawl_frequency_secs: model.crawl_frequency_secs,
            status: parse_column(&model.status, "sources.status")?,
            last_crawled_at: model.last_crawled_at,
            created_at: model.created_at,
        })
    }
}

fn to_active_model(source: &Source) -> Result<source_entity::ActiveModel, RepositoryError> {
    let selectors = match &source.selectors {
        Some(s) => Some(serde_json::to_value(s)?),
        None => None,
    };
    Ok(source_entity::ActiveModel {
        id: Set(source.id),
        name: Set(source.name.clone()),
        kind: Set(source.kind.to_string()),
        endpoint: Set(source.endpoint.clone()),
        selectors: Set(selectors),
        params: Set(source.params.clone()),
        crawl_frequency_secs: Set(source.crawl_frequency_secs),
        status: Set(source.status.to_string()),
        last_crawled_at: Set(source.last_crawled_at),
        created_at: Set(source.created_at),
    })
}

#[async_trait]
impl SourceRepository for SourceRepositoryImpl {
    async fn create(&self, source: &Source) -> Result<Source, RepositoryError> {
        let model = to_active_model(source)?.insert(self.db.as_ref()).await?;
        model.try_into()
    }

    async fn find_by_id(&self, id: Uuid) -> Result<Option<Source>, RepositoryError> {
        source_entity::Entity::find_by_id(id)
            .one(self.db.as_ref())
            .await?
            .map(Source::try_from)
            .transpose()
    }

    async fn find_active_by_kind(&self, kind: SourceKind) -> Result<Vec<Source>, RepositoryError> {
        source_entity::Entity::find()
            .filter(source_entity::Column::Kind.eq(kind.to_string()))
            .filter(source_entity::Column::Status.eq(SourceStatus::Active.to_string()))
            .order_by_asc(source_entity::Column::CreatedAt)
            .all(self.db.as_ref())
            .await?
            .into_iter()
            .map(Source::try_from)
            .collect()
    }

    async fn mark_crawled(&self, id: Uuid, at: DateTime<Utc>) -> Result<(), RepositoryError> {
        let result = source_entity::Entity::update_many()
            .col_expr(source_entity::Column::LastCrawledAt, Expr::value(at))
            .filter(source_entity::Column::Id.eq(id))
            .exec(self.db.as_ref())
            .await?;
        if result.rows_affected == 0 {
            return Err(RepositoryError::NotFound);
        }
        Ok(())
    }

    async fn set_status(&self, id: Uuid, status: SourceStatus) -> Result<(), RepositoryError> {
        let result = source_entity::Entity::update_many()
            .col_expr(source_entity::Column::Status, Expr::value(status.to_string()))
            .filter(source_entity::Column::Id.eq(id))
            .exec(self.db.as_ref())
            .await?;
        if result.rows_affected == 0 {
            return Err(RepositoryError::NotFound);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::infrastructure::repositories::test_db;

    #[tokio::test]
    async fn test_source_roundtrip_and_status() {
        let repo = SourceRepositoryImpl::new(test_db::memory().await);
        let source = Source::new("人事考试网", SourceKind::ListPage, "https://rsks.gov.cn/list")
            .with_selectors(SourceSelectors {
                list: Some(".news a".to_string()),
                ..Default::default()
            });
        repo.create(&source).await.unwrap();

        let found = repo.find_by_id(source.id).await.unwrap().unwrap();
        assert_eq!(found.selectors, source.selectors);
        assert_eq!(found.kind, SourceKind::ListPage);

        repo.mark_crawled(source.id, Utc::now()).await.unwrap();
        assert!(repo
            .find_by_id(source.id)
            .await
            .unwrap()
            .unwrap()
            .last_crawled_at
            .is_some());

        assert_eq!(repo.find_active_by_kind(SourceKind::ListPage).await.unwrap().len(), 1);
        repo.set_status(source.id, SourceStatus::Paused).await.unwrap();
        assert!(repo.find_active_by_kind(SourceKind::ListPage).await.unwrap().is_empty());

        assert!(matches!(
            repo.set_status(Uuid::new_v4(), SourceStatus::Active).await,
            Err(RepositoryError::NotFound)
        ));
    }
}
