// Copyright (c) 2025 Kirky.X
//
// Licensed under the MIT License
// See LICENSE file in the project root for full license information.

use super::parse_column;
use crate::domain::models::crawl_task::CrawlTask;
use crate::domain::repositories::task_repository::TaskRepository;
use crate::domain::repositories::RepositoryError;
use crate::infrastructure::database::entities::crawl_task as task_entity;
use async_trait::async_trait;
use sea_orm::{ActiveModelTrait, DatabaseConnection, EntityTrait, Set, TransactionTrait};
use std::collections::VecDeque;
use std::sync::Arc;
use uuid::Uuid;

/// 任务仓库实现
///
/// 保存调度器的任务快照，用于状态查询与审计
#[derive(Clone)]
pub struct TaskRepositoryImpl {
    /// 数据库连接
    db: Arc<DatabaseConnection>,
}

impl TaskRepositoryImpl {
    /// 创建新的任务仓库实例
    ///
    /// # 参数
    ///
    /// * `db` - 数据库连接
    pub fn new(db: Arc<DatabaseConnection>) -> Self {
        Self { db }
    }
}

impl TryFrom<task_entity::Model> for CrawlTask {
    type Error = RepositoryError;

    fn try_from(model: task_entity::Model) -> Result<Self, Self::Error> {
        let warnings: VecDeque<String> = serde_json::from_value(model.warnings)?;
        Ok(Self {
            id: model.id,
            kind: parse_column(&model.kind, "crawl_tasks.kind")?,
            target: model.target,
            domain: model.domain,
            params: model.params,
            state: parse_column(&model.state, "crawl_tasks.state")?,
            attempts: model.attempts.max(0) as u32,
            last_error: model.last_error,
            last_error_kind: model
                .last_error_kind
                .as_deref()
                .map(|k| parse_column(k, "crawl_tasks.last_error_kind"))
                .transpose()?,
            warnings,
            created_at: model.created_at,
            started_at: model.started_at,
            finished_at: model.finished_at,
            next_run_at: model.next_run_at,
        })
    }
}

fn to_active_model(task: &CrawlTask) -> Result<task_entity::ActiveModel, RepositoryError> {
    Ok(task_entity::ActiveModel {
        id: Set(task.id),
        kind: Set(task.kind.to_string()),
        target: Set(task.target.clone()),
        domain: Set(task.domain.clone()),
        params: Set(task.params.clone()),
        state: Set(task.state.to_string()),
        attempts: Set(task.attempts as i32),
        last_error: Set(task.last_error.clone()),
        last_error_kind: Set(task.last_error_kind.map(|k| k.to_string())),
        warnings: Set(serde_json::to_value(&task.warnings)?),
        created_at: Set(task.created_at),
        started_at: Set(task.started_at),
        finished_at: Set(task.finished_at),
        next_run_at: Set(task.next_run_at),
    })
}

#[async_trait]
impl TaskRepository for TaskRepositoryImpl {
    async fn save(&self, task: &CrawlTask) -> Result<(), RepositoryError> {
        let txn = self.db.begin().await?;
        let model = to_active_model(task)?;
        if task_entity::Entity::find_by_id(task.id)
            .one(&txn)
            .await?
            .is_some()
        {
            model.update(&txn).await?;
        } else {
            model.insert(&txn).await?;
        }
        txn.commit().await?;
        Ok(())
    }

    async fn find_by_id(&self, id: Uuid) -> Result<Option<CrawlTask>, RepositoryError> {
        task_entity::Entity::find_by_id(id)
            .one(self.db.as_ref())
            .await?
            .map(CrawlTask::try_from)
            .transpose()
    }
}
