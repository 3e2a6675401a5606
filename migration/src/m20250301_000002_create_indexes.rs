// Copyright (c) 2025 Kirky.X
//
// Licensed under the MIT License
// See LICENSE file in the project root for full license information.

use crate::m20250301_000001_create_crawler_schema::{
    Announcements, CrawlEvents, CrawlTasks, Positions,
};
use sea_orm_migration::prelude::*;

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        // 公告按 (source_id, url) 唯一
        manager
            .create_index(
                Index::create()
                    .name("idx_announcements_source_url")
                    .table(Announcements::Table)
                    .col(Announcements::SourceId)
                    .col(Announcements::Url)
                    .unique()
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .name("idx_announcements_content_hash")
                    .table(Announcements::Table)
                    .col(Announcements::ContentHash)
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .name("idx_positions_natural_key")
                    .table(Positions::Table)
                    .col(Positions::AnnouncementId)
                    .col(Positions::NaturalKey)
                    .unique()
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .name("idx_crawl_tasks_state_created_at")
                    .table(CrawlTasks::Table)
                    .col(CrawlTasks::State)
                    .col(CrawlTasks::CreatedAt)
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .name("idx_crawl_events_announcement")
                    .table(CrawlEvents::Table)
                    .col(CrawlEvents::AnnouncementId)
                    .to_owned(),
            )
            .await
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        for name in [
            "idx_crawl_events_announcement",
            "idx_crawl_tasks_state_created_at",
            "idx_positions_natural_key",
            "idx_announcements_content_hash",
            "idx_announcements_source_url",
        ] {
            manager
                .drop_index(Index::drop().name(name).to_owned())
                .await?;
        }
        Ok(())
    }
}
