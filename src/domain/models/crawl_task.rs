// Copyright (c) 2025 Kirky.X
//
// Licensed under the MIT License
// See LICENSE file in the project root for full license information.

use super::DomainError;
use crate::utils::errors::ErrorKind;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

/// 每个任务保留的最近告警条数
pub const WARNING_RING_CAPACITY: usize = 20;

/// 抓取任务实体
///
/// 调度器的执行单元。同一 (kind, target) 的任务按提交顺序串行执行。
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CrawlTask {
    /// 任务唯一标识符
    pub id: Uuid,
    /// 任务类型
    pub kind: TaskKind,
    /// 目标：数据源ID、公告ID或粉笔分页键
    pub target: String,
    /// 调度使用的域名键
    pub domain: String,
    /// 任务参数
    pub params: serde_json::Value,
    /// 任务状态
    pub state: TaskState,
    /// 已执行次数（派发时递增）
    pub attempts: u32,
    pub last_error: Option<String>,
    pub last_error_kind: Option<ErrorKind>,
    /// 最近告警（环形缓冲）
    pub warnings: VecDeque<String>,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
    /// 退避重试的计划时间
    pub next_run_at: Option<DateTime<Utc>>,
}

/// 任务类型
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskKind {
    /// 数据源发现（列表页、粉笔分页、订阅源、公众号文章列表）
    ListMonitor,
    /// 抓取候选公告正文
    AnnouncementFetch,
    /// 解析原文链接并抓取公告详情
    DetailFetch,
    /// 职位抽取
    Extract,
}

impl fmt::Display for TaskKind {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            TaskKind::ListMonitor => write!(f, "list_monitor"),
            TaskKind::AnnouncementFetch => write!(f, "announcement_fetch"),
            TaskKind::DetailFetch => write!(f, "detail_fetch"),
            TaskKind::Extract => write!(f, "extract"),
        }
    }
}

impl FromStr for TaskKind {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "list_monitor" => Ok(TaskKind::ListMonitor),
            "announcement_fetch" => Ok(TaskKind::AnnouncementFetch),
            "detail_fetch" => Ok(TaskKind::DetailFetch),
            "extract" => Ok(TaskKind::Extract),
            other => Err(DomainError::UnknownValue(other.to_string())),
        }
    }
}

/// 任务状态
///
/// 状态转换遵循以下流程：
/// Queued → Running → Succeeded/Failed/Cancelled，重试时 Running → Queued
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum TaskState {
    #[default]
    Queued,
    Running,
    Succeeded,
    Failed,
    Cancelled,
}

impl TaskState {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            TaskState::Succeeded | TaskState::Failed | TaskState::Cancelled
        )
    }
}

impl fmt::Display for TaskState {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            TaskState::Queued => write!(f, "queued"),
            TaskState::Running => write!(f, "running"),
            TaskState::Succeeded => write!(f, "succeeded"),
            TaskState::Failed => write!(f, "failed"),
            TaskState::Cancelled => write!(f, "cancelled"),
        }
    }
}

impl FromStr for TaskState {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "queued" => Ok(TaskState::Queued),
            "running" => Ok(TaskState::Running),
            "succeeded" => Ok(TaskState::Succeeded),
            "failed" => Ok(TaskState::Failed),
            "cancelled" => Ok(TaskState::Cancelled),
            other => Err(DomainError::UnknownValue(other.to_string())),
        }
    }
}

impl CrawlTask {
    /// 创建一个新的任务
    ///
    /// # 参数
    ///
    /// * `kind` - 任务类型
    /// * `target` - 任务目标
    /// * `domain` - 调度域名键
    /// * `params` - 任务参数
    ///
    /// # 返回值
    ///
    /// 返回处于 Queued 状态的任务
    pub fn new(
        kind: TaskKind,
        target: impl Into<String>,
        domain: impl Into<String>,
        params: serde_json::Value,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            kind,
            target: target.into(),
            domain: domain.into(),
            params,
            state: TaskState::Queued,
            attempts: 0,
            last_error: None,
            last_error_kind: None,
            warnings: VecDeque::new(),
            created_at: Utc::now(),
            started_at: None,
            finished_at: None,
            next_run_at: None,
        }
    }

    /// 串行化键
    pub fn key(&self) -> (TaskKind, String) {
        (self.kind, self.target.clone())
    }

    fn transition_error(&self, to: TaskState) -> DomainError {
        DomainError::InvalidStateTransition {
            from: self.state.to_string(),
            to: to.to_string(),
        }
    }

    /// 启动任务
    ///
    /// 将任务状态从Queued变更为Running，并递增执行次数
    pub fn start(&mut self) -> Result<(), DomainError> {
        match self.state {
            TaskState::Queued => {
                self.state = TaskState::Running;
                self.attempts += 1;
                self.next_run_at = None;
                if self.started_at.is_none() {
                    self.started_at = Some(Utc::now());
                }
                Ok(())
            }
            _ => Err(self.transition_error(TaskState::Running)),
        }
    }

    /// 完成任务
    pub fn succeed(&mut self) -> Result<(), DomainError> {
        match self.state {
            TaskState::Running => {
                self.state = TaskState::Succeeded;
                self.finished_at = Some(Utc::now());
                Ok(())
            }
            _ => Err(self.transition_error(TaskState::Succeeded)),
        }
    }

    /// 标记任务失败（终态）
    pub fn fail(&mut self, kind: ErrorKind, error: impl Into<String>) -> Result<(), DomainError> {
        match self.state {
            TaskState::Running => {
                self.state = TaskState::Failed;
                self.last_error = Some(error.into());
                self.last_error_kind = Some(kind);
                self.finished_at = Some(Utc::now());
                Ok(())
            }
            _ => Err(self.transition_error(TaskState::Failed)),
        }
    }

    /// 重新入队等待退避重试
    pub fn requeue(
        &mut self,
        kind: ErrorKind,
        error: impl Into<String>,
        run_at: DateTime<Utc>,
    ) -> Result<(), DomainError> {
        match self.state {
            TaskState::Running => {
                self.state = TaskState::Queued;
                self.last_error = Some(error.into());
                self.last_error_kind = Some(kind);
                self.next_run_at = Some(run_at);
                Ok(())
            }
            _ => Err(self.transition_error(TaskState::Queued)),
        }
    }

    /// 取消任务
    pub fn cancel(&mut self) -> Result<(), DomainError> {
        match self.state {
            TaskState::Queued | TaskState::Running => {
                self.state = TaskState::Cancelled;
                self.finished_at = Some(Utc::now());
                Ok(())
            }
            _ => Err(self.transition_error(TaskState::Cancelled)),
        }
    }

    /// 追加告警，超出容量时丢弃最旧的一条
    pub fn push_warning(&mut self, warning: impl Into<String>) {
        if self.warnings.len() == WARNING_RING_CAPACITY {
            self.warnings.pop_front();
        }
        self.warnings.push_back(warning.into());
    }
}
