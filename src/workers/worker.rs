// Copyright (c) 2025 Kirky.X
//
// Licensed under the MIT License
// See LICENSE file in the project root for full license information.

use crate::config::settings::SchedulerSettings;
use crate::domain::models::crawl_task::TaskKind;
use crate::engines::traits::FetchError;
use crate::queue::scheduler::{Dispatched, Scheduler};
use crate::utils::errors::CrawlError;
use crate::workers::pipeline::TaskExecutor;
use async_trait::async_trait;
use futures::FutureExt;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, instrument, warn};

/// Worker trait定义
///
/// 所有后台工作器都必须实现此trait
#[async_trait]
pub trait Worker: Send + Sync {
    /// 运行工作器，直到 `shutdown` 触发
    async fn run(&self, shutdown: CancellationToken);

    /// 获取工作器名称
    fn name(&self) -> &str;
}

/// 各类任务的执行时限
#[derive(Debug, Clone, Copy)]
pub struct TaskTimeouts {
    pub list_monitor: Duration,
    pub announcement_fetch: Duration,
    pub extract: Duration,
}

impl TaskTimeouts {
    pub fn from_settings(settings: &SchedulerSettings) -> Self {
        Self {
            list_monitor: Duration::from_secs(settings.list_monitor_timeout_secs),
            announcement_fetch: Duration::from_secs(settings.announcement_fetch_timeout_secs),
            extract: Duration::from_secs(settings.extract_timeout_secs),
        }
    }

    pub fn for_kind(&self, kind: TaskKind) -> Duration {
        match kind {
            TaskKind::ListMonitor => self.list_monitor,
            TaskKind::AnnouncementFetch | TaskKind::DetailFetch => self.announcement_fetch,
            TaskKind::Extract => self.extract,
        }
    }
}

impl Default for TaskTimeouts {
    fn default() -> Self {
        Self::from_settings(&SchedulerSettings::default())
    }
}

/// 抓取工作器
///
/// 从调度器取任务，在时限内执行，上报结果并提交后续任务
pub struct CrawlWorker {
    name: String,
    scheduler: Arc<Scheduler>,
    executor: Arc<dyn TaskExecutor>,
    timeouts: TaskTimeouts,
}

impl CrawlWorker {
    pub fn new(
        id: usize,
        scheduler: Arc<Scheduler>,
        executor: Arc<dyn TaskExecutor>,
        timeouts: TaskTimeouts,
    ) -> Self {
        Self {
            name: format!("crawl-worker-{}", id),
            scheduler,
            executor,
            timeouts,
        }
    }

    #[instrument(skip_all, fields(worker = %self.name, task_id = %dispatched.task.id, kind = %dispatched.task.kind))]
    async fn process(&self, dispatched: Dispatched) {
        let Dispatched { task, cancel } = dispatched;
        let limit = self.timeouts.for_kind(task.kind);
        info!(target_id = %task.target, attempt = task.attempts, "Processing task");

        let run = AssertUnwindSafe(self.executor.execute(&task, &cancel)).catch_unwind();
        let result = match tokio::time::timeout(limit, run).await {
            Ok(Ok(result)) => result,
            Ok(Err(panic)) => {
                let message = panic
                    .downcast_ref::<&str>()
                    .map(|s| s.to_string())
                    .or_else(|| panic.downcast_ref::<String>().cloned())
                    .unwrap_or_else(|| "unknown panic".to_string());
                error!(panic = %message, "Task panicked");
                Err(CrawlError::Fatal(format!("panic: {}", message)))
            }
            Err(_) => {
                warn!(timeout_secs = limit.as_secs(), "Task timed out");
                Err(CrawlError::Fetch(FetchError::Timeout))
            }
        };

        let outcome = match result {
            Ok(report) => {
                self.scheduler.push_warnings(task.id, &report.warnings);
                for follow_up in report.follow_ups {
                    if let Err(e) = self
                        .scheduler
                        .submit(
                            follow_up.kind,
                            follow_up.target,
                            follow_up.domain,
                            follow_up.params.to_value(),
                        )
                        .await
                    {
                        warn!(error = %e, "Failed to submit follow-up task");
                    }
                }
                Ok(())
            }
            Err(e) => Err(e),
        };
        self.scheduler.complete(task.id, outcome).await;
    }
}

#[async_trait]
impl Worker for CrawlWorker {
    async fn run(&self, shutdown: CancellationToken) {
        info!("Worker {} started", self.name);
        while let Some(dispatched) = self.scheduler.next(&shutdown).await {
            self.process(dispatched).await;
        }
        info!("Worker {} stopped", self.name);
    }

    fn name(&self) -> &str {
        &self.name
    }
}
