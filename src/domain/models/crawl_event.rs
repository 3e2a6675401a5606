// Copyright (c) 2025 Kirky.X
//
// Licensed under the MIT License
// See LICENSE file in the project root for full license information.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// 抓取事件
///
/// 记录任务执行中的关键节点，供汇聚端审计
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CrawlEvent {
    pub id: Uuid,
    pub task_id: Option<Uuid>,
    pub source_id: Option<Uuid>,
    pub announcement_id: Option<Uuid>,
    /// 事件类型，如 `announcement_emitted`、`task_failed`
    pub event_type: String,
    pub message: String,
    pub created_at: DateTime<Utc>,
}

impl CrawlEvent {
    pub fn new(event_type: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            task_id: None,
            source_id: None,
            announcement_id: None,
            event_type: event_type.into(),
            message: message.into(),
            created_at: Utc::now(),
        }
    }

    pub fn for_task(mut self, task_id: Uuid) -> Self {
        self.task_id = Some(task_id);
        self
    }

    pub fn for_source(mut self, source_id: Uuid) -> Self {
        self.source_id = Some(source_id);
        self
    }

    pub fn for_announcement(mut self, announcement_id: Uuid) -> Self {
        self.announcement_id = Some(announcement_id);
        self
    }
}
