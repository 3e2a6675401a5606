// Copyright (c) 2025 Kirky.X
//
// Licensed under the MIT License
// See LICENSE file in the project root for full license information.

use super::RepositoryError;
use crate::domain::models::crawl_task::CrawlTask;
use async_trait::async_trait;
use uuid::Uuid;

/// 任务仓库特质
///
/// 调度器在锁外写入任务快照，供状态查询与重启后审计
#[async_trait]
pub trait TaskRepository: Send + Sync {
    /// 写入或更新任务快照
    async fn save(&self, task: &CrawlTask) -> Result<(), RepositoryError>;
    /// 根据ID查找任务
    async fn find_by_id(&self, id: Uuid) -> Result<Option<CrawlTask>, RepositoryError>;
}
