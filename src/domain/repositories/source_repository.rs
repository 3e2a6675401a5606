// Copyright (c) 2025 Kirky.X
//
// Licensed under the MIT License
// See LICENSE file in the project root for full license information.

use super::RepositoryError;
use crate::domain::models::source::{Source, SourceKind, SourceStatus};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

/// 数据源仓库特质
#[async_trait]
pub trait SourceRepository: Send + Sync {
    /// 创建数据源（仅运营侧使用）
    async fn create(&self, source: &Source) -> Result<Source, RepositoryError>;
    async fn find_by_id(&self, id: Uuid) -> Result<Option<Source>, RepositoryError>;
    /// 按类型查找处于 Active 状态的数据源
    async fn find_active_by_kind(&self, kind: SourceKind) -> Result<Vec<Source>, RepositoryError>;
    /// 更新最近抓取时间
    async fn mark_crawled(&self, id: Uuid, at: DateTime<Utc>) -> Result<(), RepositoryError>;
    async fn set_status(&self, id: Uuid, status: SourceStatus) -> Result<(), RepositoryError>;
}
