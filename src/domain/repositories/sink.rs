// Copyright (c) 2025 Kirky.X
//
// Licensed under the MIT License
// See LICENSE file in the project root for full license information.

use super::RepositoryError;
use crate::domain::models::announcement::{Announcement, CrawlStatus};
use crate::domain::models::crawl_event::CrawlEvent;
use crate::domain::models::position::Position;
use async_trait::async_trait;
use uuid::Uuid;

/// 汇聚端特质
///
/// 核心模块对外输出的唯一契约。公告按 (source_id, url) 事务性写入，
/// 职位按 (announcement_id, natural_key) 写入。
#[async_trait]
pub trait Sink: Send + Sync {
    /// 写入或更新公告
    ///
    /// 已存在相同 (source_id, url) 时保留原有ID并更新内容
    ///
    /// # 返回值
    ///
    /// 返回落库后的公告
    async fn upsert_announcement(
        &self,
        announcement: &Announcement,
    ) -> Result<Announcement, RepositoryError>;

    /// 写入公告的职位，按自然键幂等
    ///
    /// # 返回值
    ///
    /// 返回写入的职位数量
    async fn upsert_positions(
        &self,
        announcement_id: Uuid,
        positions: &[Position],
    ) -> Result<usize, RepositoryError>;

    /// 记录抓取事件
    async fn record_crawl_event(&self, event: &CrawlEvent) -> Result<(), RepositoryError>;

    /// 保存待抓取详情的候选公告，已存在时返回已有记录
    ///
    /// # 返回值
    ///
    /// `(公告, 是否新建)`
    async fn save_candidate(
        &self,
        announcement: &Announcement,
    ) -> Result<(Announcement, bool), RepositoryError>;

    async fn get_announcement(&self, id: Uuid) -> Result<Option<Announcement>, RepositoryError>;

    async fn find_by_source_url(
        &self,
        source_id: Uuid,
        url: &str,
    ) -> Result<Option<Announcement>, RepositoryError>;

    /// 查找最早写入的同内容公告
    async fn find_by_content_hash(
        &self,
        content_hash: &str,
    ) -> Result<Option<Announcement>, RepositoryError>;

    async fn update_crawl_status(
        &self,
        id: Uuid,
        status: CrawlStatus,
    ) -> Result<(), RepositoryError>;

    async fn list_positions(&self, announcement_id: Uuid) -> Result<Vec<Position>, RepositoryError>;
}
