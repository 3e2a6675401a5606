// Copyright (c) 2025 Kirky.X
//
// Licensed under the MIT License
// See LICENSE file in the project root for full license information.

use crate::config::settings::SchedulerSettings;
use crate::domain::models::crawl_task::{CrawlTask, TaskKind, TaskState};
use crate::domain::models::DomainError;
use crate::domain::repositories::task_repository::TaskRepository;
use crate::domain::repositories::RepositoryError;
use crate::utils::errors::{CrawlError, ErrorKind};
use crate::utils::retry_policy::RetryPolicy;
use chrono::Utc;
use metrics::counter;
use parking_lot::Mutex;
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::Notify;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// 队列错误类型
#[derive(Error, Debug)]
pub enum QueueError {
    /// 任务不存在
    #[error("Task not found: {0}")]
    NotFound(Uuid),

    /// 状态转换非法（如取消已结束的任务）
    #[error(transparent)]
    Domain(#[from] DomainError),

    /// 仓库错误
    #[error("Repository error: {0}")]
    Repository(#[from] RepositoryError),

    /// 等待超时
    #[error("Timed out waiting for task {0}")]
    WaitTimeout(Uuid),
}

/// 调度参数
#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    pub max_parallel: usize,
    pub per_domain_parallel: usize,
    pub domain_delay: Duration,
    pub cooldown: Duration,
    pub retry: RetryPolicy,
}

impl SchedulerConfig {
    pub fn from_settings(settings: &SchedulerSettings) -> Self {
        Self {
            max_parallel: settings.max_parallel.max(1),
            per_domain_parallel: settings.per_domain_parallel.max(1),
            domain_delay: settings.domain_delay(),
            cooldown: settings.cooldown(),
            retry: RetryPolicy::from_settings(settings),
        }
    }
}

fn earliest(wake_at: &mut Option<Instant>, at: Instant) {
    *wake_at = Some(wake_at.map_or(at, |w| w.min(at)));
}

/// 派发给工作器的任务
#[derive(Debug, Clone)]
pub struct Dispatched {
    pub task: CrawlTask,
    pub cancel: CancellationToken,
}

struct TaskEntry {
    task: CrawlTask,
    cancel: CancellationToken,
}

#[derive(Default)]
struct DomainQueue {
    ready: VecDeque<Uuid>,
    in_flight: usize,
    /// 下一次允许派发的时刻
    next_dispatch: Option<Instant>,
    cooldown_until: Option<Instant>,
}

#[derive(Default)]
struct SchedulerState {
    tasks: HashMap<Uuid, TaskEntry>,
    domains: HashMap<String, DomainQueue>,
    /// 轮询顺序
    domain_order: VecDeque<String>,
    /// 退避等待中的任务
    delayed: Vec<(Instant, Uuid)>,
    /// 已占用的 (kind, target)：运行中或退避中
    busy_keys: HashSet<(TaskKind, String)>,
    running: usize,
}

/// 任务调度器
///
/// 维护按域名划分的FIFO就绪队列与每域名在途计数。一个任务只有在
/// 全局在途数小于 `max_parallel`、该域名在途数小于 `per_domain_parallel`
/// 且距上次派发已过 `domain_delay`（±50%抖动）时才会派发。
/// 同一 (kind, target) 的任务按提交顺序串行执行。
pub struct Scheduler {
    config: SchedulerConfig,
    state: Mutex<SchedulerState>,
    /// 有新任务可能就绪时唤醒工作器
    wakeup: Notify,
    /// 任务状态变化时唤醒等待者
    changed: Notify,
    repository: Arc<dyn TaskRepository>,
}

impl Scheduler {
    pub fn new(config: SchedulerConfig, repository: Arc<dyn TaskRepository>) -> Self {
        Self {
            config,
            state: Mutex::new(SchedulerState::default()),
            wakeup: Notify::new(),
            changed: Notify::new(),
            repository,
        }
    }

    pub fn config(&self) -> &SchedulerConfig {
        &self.config
    }

    async fn persist(&self, task: &CrawlTask) {
        if let Err(e) = self.repository.save(task).await {
            warn!(task_id = %task.id, error = %e, "Failed to persist task state");
        }
    }

    fn notify_all(&self) {
        self.wakeup.notify_waiters();
        self.changed.notify_waiters();
    }

    /// 提交任务
    ///
    /// # 参数
    ///
    /// * `kind` - 任务类型
    /// * `target` - 任务目标（串行化键的一部分）
    /// * `domain` - 调度域名
    /// * `params` - 任务参数
    ///
    /// # 返回值
    ///
    /// 返回任务ID
    pub async fn submit(
        &self,
        kind: TaskKind,
        target: impl Into<String>,
        domain: impl Into<String>,
        params: serde_json::Value,
    ) -> Result<Uuid, QueueError> {
        let task = CrawlTask::new(kind, target, domain, params);
        let id = task.id;
        self.persist(&task).await;
        {
            let mut state = self.state.lock();
            let domain = task.domain.clone();
            if !state.domains.contains_key(&domain) {
                state.domain_order.push_back(domain.clone());
            }
            state.domains.entry(domain).or_default().ready.push_back(id);
            state.tasks.insert(
                id,
                TaskEntry {
                    task,
                    cancel: CancellationToken::new(),
                },
            );
        }
        counter!("crawl_tasks_total", "kind" => kind.to_string(), "state" => "queued").increment(1);
        debug!(task_id = %id, kind = %kind, "Task submitted");
        self.wakeup.notify_one();
        Ok(id)
    }

    fn jittered_delay(&self) -> Duration {
        if self.config.domain_delay.is_zero() {
            return Duration::ZERO;
        }
        let factor: f64 = rand::random_range(0.5..=1.5);
        self.config.domain_delay.mul_f64(factor)
    }

    /// 尝试派发一个任务；不能派发时返回最早的可重试时刻
    fn try_dispatch(&self, now: Instant) -> Result<Dispatched, Option<Instant>> {
        let mut state = self.state.lock();
        let mut wake_at: Option<Instant> = None;

        // 到期的退避任务回到队首，保证同键顺序
        let mut due = Vec::new();
        state.delayed.retain(|(at, id)| {
            if *at <= now {
                due.push(*id);
                false
            } else {
                true
            }
        });
        for id in due {
            let Some((domain, key)) = state
                .tasks
                .get(&id)
                .map(|e| (e.task.domain.clone(), e.task.key()))
            else {
                continue;
            };
            state.busy_keys.remove(&key);
            if !state.domains.contains_key(&domain) {
                state.domain_order.push_back(domain.clone());
            }
            state.domains.entry(domain).or_default().ready.push_front(id);
        }
        for (at, _) in &state.delayed {
            earliest(&mut wake_at, *at);
        }

        if state.running >= self.config.max_parallel {
            return Err(wake_at);
        }

        let rounds = state.domain_order.len();
        for _ in 0..rounds {
            let Some(domain) = state.domain_order.pop_front() else {
                break;
            };
            state.domain_order.push_back(domain.clone());

            let SchedulerState {
                tasks,
                domains,
                busy_keys,
                running,
                ..
            } = &mut *state;
            let Some(queue) = domains.get_mut(&domain) else {
                continue;
            };
            if queue.ready.is_empty() || queue.in_flight >= self.config.per_domain_parallel {
                continue;
            }
            if let Some(until) = queue.cooldown_until {
                if until > now {
                    earliest(&mut wake_at, until);
                    continue;
                }
                queue.cooldown_until = None;
            }
            if let Some(next) = queue.next_dispatch {
                if next > now {
                    earliest(&mut wake_at, next);
                    continue;
                }
            }

            let position = queue.ready.iter().position(|id| {
                tasks
                    .get(id)
                    .is_some_and(|e| !busy_keys.contains(&e.task.key()))
            });
            let Some(position) = position else {
                continue;
            };
            let Some(id) = queue.ready.remove(position) else {
                continue;
            };
            let Some(entry) = tasks.get_mut(&id) else {
                continue;
            };
            if entry.task.start().is_err() {
                continue;
            }
            busy_keys.insert(entry.task.key());
            queue.in_flight += 1;
            queue.next_dispatch = Some(now + self.jittered_delay());
            let dispatched = Dispatched {
                task: entry.task.clone(),
                cancel: entry.cancel.clone(),
            };
            *running += 1;
            return Ok(dispatched);
        }
        Err(wake_at)
    }

    /// 取下一个可执行的任务
    ///
    /// 没有可派发任务时等待，`shutdown` 触发后返回 `None`
    pub async fn next(&self, shutdown: &CancellationToken) -> Option<Dispatched> {
        loop {
            let notified = self.wakeup.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            match self.try_dispatch(Instant::now()) {
                Ok(dispatched) => {
                    self.persist(&dispatched.task).await;
                    self.changed.notify_waiters();
                    // 可能还有其他任务可派发
                    self.wakeup.notify_one();
                    return Some(dispatched);
                }
                Err(wake_at) => {
                    let sleep = async {
                        match wake_at {
                            Some(at) => tokio::time::sleep_until(at).await,
                            None => std::future::pending::<()>().await,
                        }
                    };
                    tokio::select! {
                        _ = shutdown.cancelled() => return None,
                        _ = &mut notified => {}
                        _ = sleep => {}
                    }
                }
            }
        }
    }

    /// 上报任务执行结果
    ///
    /// 成功则任务结束；瞬时错误在尝试次数内按指数退避重新入队，429 同时使该域名冷却；
    /// 取消与永久错误直接进入终态
    pub async fn complete(&self, task_id: Uuid, result: Result<(), CrawlError>) {
        let snapshot = {
            let mut state = self.state.lock();
            let now = Instant::now();
            let SchedulerState {
                tasks,
                domains,
                busy_keys,
                delayed,
                running,
                ..
            } = &mut *state;
            let Some(entry) = tasks.get_mut(&task_id) else {
                return;
            };
            *running = running.saturating_sub(1);
            let domain = entry.task.domain.clone();
            let queue = domains.entry(domain.clone()).or_default();
            queue.in_flight = queue.in_flight.saturating_sub(1);

            let task = &mut entry.task;
            let mut release_key = true;
            match result {
                _ if task.state == TaskState::Cancelled => {}
                Ok(()) => {
                    settle(task_id, task.succeed());
                }
                Err(error) => {
                    let kind = if entry.cancel.is_cancelled() {
                        ErrorKind::Cancelled
                    } else {
                        error.kind()
                    };
                    let message = error.to_string();
                    if error.is_rate_limited() {
                        let cooldown = error.retry_after().unwrap_or(self.config.cooldown);
                        queue.cooldown_until = Some(now + cooldown);
                        info!(%domain, cooldown_secs = cooldown.as_secs(), "Domain cooled down after 429");
                    }

                    if kind == ErrorKind::Cancelled {
                        settle(task_id, task.cancel());
                    } else if self.config.retry.should_retry(task.attempts, kind) {
                        let mut backoff = self
                            .config
                            .retry
                            .calculate_backoff(task.attempts.saturating_sub(1));
                        if error.is_rate_limited() {
                            backoff = backoff.max(error.retry_after().unwrap_or(self.config.cooldown));
                        }
                        let run_at = Utc::now()
                            + chrono::Duration::milliseconds(backoff.as_millis() as i64);
                        if settle(task_id, task.requeue(kind, message.clone(), run_at)) {
                            delayed.push((now + backoff, task_id));
                            release_key = false;
                            info!(
                                task_id = %task_id,
                                attempts = task.attempts,
                                backoff_ms = backoff.as_millis() as u64,
                                error = %message,
                                "Task requeued for retry"
                            );
                        }
                    } else {
                        if settle(task_id, task.fail(kind, message.clone())) {
                            warn!(task_id = %task_id, kind = %kind, error = %message, "Task failed");
                        }
                    }
                }
            }
            if release_key {
                busy_keys.remove(&task.key());
            }
            counter!("crawl_tasks_total", "kind" => task.kind.to_string(), "state" => task.state.to_string())
                .increment(1);
            task.clone()
        };
        self.persist(&snapshot).await;
        self.notify_all();
    }

    /// 追加任务告警（环形缓冲，保留最近20条）
    pub fn push_warnings(&self, task_id: Uuid, warnings: &[String]) {
        if warnings.is_empty() {
            return;
        }
        let mut state = self.state.lock();
        if let Some(entry) = state.tasks.get_mut(&task_id) {
            for warning in warnings {
                entry.task.push_warning(warning.clone());
            }
        }
    }

    /// 取消任务
    ///
    /// 排队中的任务立即进入 Cancelled；运行中的任务通过取消令牌协作式中止
    pub async fn cancel(&self, task_id: Uuid) -> Result<(), QueueError> {
        let snapshot = {
            let mut state = self.state.lock();
            let SchedulerState {
                tasks,
                domains,
                delayed,
                busy_keys,
                ..
            } = &mut *state;
            let entry = tasks.get_mut(&task_id).ok_or(QueueError::NotFound(task_id))?;
            let was_queued = entry.task.state == TaskState::Queued;
            entry.task.cancel()?;
            entry.cancel.cancel();
            if was_queued {
                if let Some(queue) = domains.get_mut(&entry.task.domain) {
                    queue.ready.retain(|id| *id != task_id);
                }
                // 退避中的任务占用着键
                if delayed.iter().any(|(_, id)| *id == task_id) {
                    delayed.retain(|(_, id)| *id != task_id);
                    busy_keys.remove(&entry.task.key());
                }
            }
            entry.task.clone()
        };
        info!(task_id = %task_id, "Task cancelled");
        self.persist(&snapshot).await;
        self.notify_all();
        Ok(())
    }

    /// 查询任务状态
    pub async fn status(&self, task_id: Uuid) -> Result<CrawlTask, QueueError> {
        let cached = self
            .state
            .lock()
            .tasks
            .get(&task_id)
            .map(|e| e.task.clone());
        match cached {
            Some(task) => Ok(task),
            None => self
                .repository
                .find_by_id(task_id)
                .await?
                .ok_or(QueueError::NotFound(task_id)),
        }
    }

    /// 等待任务进入终态
    pub async fn wait_for(&self, task_id: Uuid, timeout: Duration) -> Result<CrawlTask, QueueError> {
        let deadline = Instant::now() + timeout;
        loop {
            let notified = self.changed.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            let task = self.status(task_id).await?;
            if task.state.is_terminal() {
                return Ok(task);
            }
            if tokio::time::timeout_at(deadline, notified).await.is_err() {
                return Err(QueueError::WaitTimeout(task_id));
            }
        }
    }

    /// 排队中（含退避）与运行中的任务数
    pub fn pending(&self) -> usize {
        self.state
            .lock()
            .tasks
            .values()
            .filter(|e| !e.task.state.is_terminal())
            .count()
    }
}

/// 记录非法的状态迁移，返回迁移是否生效
fn settle(task_id: Uuid, transition: Result<(), DomainError>) -> bool {
    match transition {
        Ok(()) => true,
        Err(e) => {
            warn!(task_id = %task_id, error = %e, "Unexpected task transition");
            false
        }
    }
}

#[cfg(test)]
#[path = "scheduler_test.rs"]
mod tests;
