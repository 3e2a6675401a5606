// Copyright (c) 2025 Kirky.X
//
// Licensed under the MIT License
// See LICENSE file in the project root for full license information.

use crate::queue::scheduler::Scheduler;
use crate::workers::pipeline::TaskExecutor;
use crate::workers::worker::{CrawlWorker, TaskTimeouts, Worker};
use std::sync::Arc;
use std::time::Duration;
use tokio::signal;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

/// 关闭时等待在途任务的时间
const SHUTDOWN_GRACE: Duration = Duration::from_secs(10);

/// 工作管理器
pub struct WorkerManager {
    scheduler: Arc<Scheduler>,
    executor: Arc<dyn TaskExecutor>,
    timeouts: TaskTimeouts,
    shutdown: CancellationToken,
    handles: Vec<JoinHandle<()>>,
}

impl WorkerManager {
    pub fn new(
        scheduler: Arc<Scheduler>,
        executor: Arc<dyn TaskExecutor>,
        timeouts: TaskTimeouts,
    ) -> Self {
        Self {
            scheduler,
            executor,
            timeouts,
            shutdown: CancellationToken::new(),
            handles: Vec::new(),
        }
    }

    /// 关闭令牌，触发后工作器不再领取新任务
    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    pub fn worker_count(&self) -> usize {
        self.handles.len()
    }

    /// 启动工作进程
    ///
    /// 创建并启动指定数量的工作进程
    ///
    /// # 参数
    ///
    /// * `count` - 要启动的工作进程数量
    pub fn start_workers(&mut self, count: usize) {
        for _ in 0..count {
            let worker = CrawlWorker::new(
                self.handles.len(),
                self.scheduler.clone(),
                self.executor.clone(),
                self.timeouts,
            );
            let shutdown = self.shutdown.clone();
            let handle = tokio::spawn(async move {
                worker.run(shutdown).await;
            });
            self.handles.push(handle);
        }
        info!(count, "Workers started");
    }

    /// 停止领取任务并等待在途任务结束，超时后强制中止
    pub async fn shutdown(&mut self) {
        info!("Shutting down workers...");
        self.shutdown.cancel();
        let handles = std::mem::take(&mut self.handles);
        let aborts: Vec<_> = handles.iter().map(|h| h.abort_handle()).collect();
        if tokio::time::timeout(SHUTDOWN_GRACE, futures::future::join_all(handles))
            .await
            .is_err()
        {
            warn!("Workers did not stop in time, aborting");
            for abort in aborts {
                abort.abort();
            }
        }
        info!("Workers shut down successfully");
    }

    /// 等待关闭信号并关闭工作进程
    ///
    /// 监听关闭信号并优雅地关闭所有工作进程
    pub async fn wait_for_shutdown(&mut self) {
        match signal::ctrl_c().await {
            Ok(()) => info!("Shutdown signal received"),
            Err(err) => error!("Unable to listen for shutdown signal: {}", err),
        }
        self.shutdown().await;
    }
}
