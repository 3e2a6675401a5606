// Copyright (c) 2025 Kirky.X
//
// Licensed under the MIT License
// See LICENSE file in the project root for full license information.

use crate::domain::models::crawl_task::{CrawlTask, TaskKind, TaskState};
use crate::utils::errors::ErrorKind;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// 任务状态视图，附带最近的告警
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
pub struct TaskStatusDto {
    pub id: Uuid,
    pub kind: TaskKind,
    pub target: String,
    pub state: TaskState,
    pub attempts: u32,
    pub last_error: Option<String>,
    pub last_error_kind: Option<ErrorKind>,
    pub warnings: Vec<String>,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
}

impl From<CrawlTask> for TaskStatusDto {
    fn from(task: CrawlTask) -> Self {
        Self {
            id: task.id,
            kind: task.kind,
            target: task.target,
            state: task.state,
            attempts: task.attempts,
            last_error: task.last_error,
            last_error_kind: task.last_error_kind,
            warnings: task.warnings.into_iter().collect(),
            created_at: task.created_at,
            started_at: task.started_at,
            finished_at: task.finished_at,
        }
    }
}
