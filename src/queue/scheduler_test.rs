// Copyright (c) 2025 Kirky.X
//
// Licensed under the MIT License
// See LICENSE file in the project root for full license information.

use super::*;
use crate::engines::traits::FetchError;
use crate::infrastructure::memory_store::InMemoryStore;
use serde_json::Value;

fn config(per_domain: usize, delay: Duration) -> SchedulerConfig {
    SchedulerConfig {
        max_parallel: 4,
        per_domain_parallel: per_domain,
        domain_delay: delay,
        cooldown: Duration::from_secs(60),
        retry: RetryPolicy {
            max_attempts: 3,
            initial_backoff: Duration::from_millis(10),
            max_backoff: Duration::from_secs(1),
            enable_jitter: false,
            ..RetryPolicy::default()
        },
    }
}

fn scheduler(per_domain: usize, delay: Duration) -> Scheduler {
    Scheduler::new(config(per_domain, delay), Arc::new(InMemoryStore::new()))
}

fn server_error() -> CrawlError {
    CrawlError::Fetch(FetchError::Status {
        status: 500,
        retry_after: None,
    })
}

async fn next_within(s: &Scheduler, ms: u64) -> Option<Dispatched> {
    let shutdown = CancellationToken::new();
    tokio::time::timeout(Duration::from_millis(ms), s.next(&shutdown))
        .await
        .ok()
        .flatten()
}

#[tokio::test]
async fn test_fifo_and_per_domain_limit() {
    let s = scheduler(1, Duration::ZERO);
    let a = s.submit(TaskKind::ListMonitor, "a", "x.gov.cn", Value::Null).await.unwrap();
    let b = s.submit(TaskKind::ListMonitor, "b", "x.gov.cn", Value::Null).await.unwrap();
    let c = s.submit(TaskKind::ListMonitor, "c", "y.gov.cn", Value::Null).await.unwrap();

    let first = next_within(&s, 100).await.unwrap();
    assert_eq!(first.task.id, a);
    assert_eq!(first.task.state, TaskState::Running);
    // x.gov.cn 已满，只能派发 y.gov.cn
    let second = next_within(&s, 100).await.unwrap();
    assert_eq!(second.task.id, c);
    assert!(next_within(&s, 50).await.is_none());

    s.complete(a, Ok(())).await;
    let third = next_within(&s, 100).await.unwrap();
    assert_eq!(third.task.id, b);
    assert_eq!(s.status(a).await.unwrap().state, TaskState::Succeeded);
}

#[tokio::test]
async fn test_same_key_never_runs_concurrently() {
    let s = scheduler(2, Duration::ZERO);
    let first = s.submit(TaskKind::Extract, "ann-1", "x.gov.cn", Value::Null).await.unwrap();
    let second = s.submit(TaskKind::Extract, "ann-1", "x.gov.cn", Value::Null).await.unwrap();
    let other = s.submit(TaskKind::Extract, "ann-2", "x.gov.cn", Value::Null).await.unwrap();

    assert_eq!(next_within(&s, 100).await.unwrap().task.id, first);
    assert_eq!(next_within(&s, 100).await.unwrap().task.id, other);
    assert!(next_within(&s, 50).await.is_none());

    s.complete(first, Ok(())).await;
    assert_eq!(next_within(&s, 100).await.unwrap().task.id, second);
}

#[tokio::test]
async fn test_transient_errors_retry_until_success() {
    let s = scheduler(1, Duration::ZERO);
    let id = s.submit(TaskKind::AnnouncementFetch, "t", "x.gov.cn", Value::Null).await.unwrap();

    for _ in 0..2 {
        let d = next_within(&s, 500).await.unwrap();
        s.complete(d.task.id, Err(server_error())).await;
        let task = s.status(id).await.unwrap();
        assert_eq!(task.state, TaskState::Queued);
        assert_eq!(task.last_error_kind, Some(ErrorKind::Transient));
    }
    let d = next_within(&s, 500).await.unwrap();
    assert_eq!(d.task.attempts, 3);
    s.complete(id, Ok(())).await;

    let task = s.wait_for(id, Duration::from_secs(1)).await.unwrap();
    assert_eq!(task.state, TaskState::Succeeded);
    assert_eq!(task.attempts, 3);
}

#[tokio::test]
async fn test_retry_budget_exhausted() {
    let s = scheduler(1, Duration::ZERO);
    let id = s.submit(TaskKind::AnnouncementFetch, "t", "x.gov.cn", Value::Null).await.unwrap();
    for _ in 0..3 {
        let d = next_within(&s, 500).await.unwrap();
        s.complete(d.task.id, Err(server_error())).await;
    }
    let task = s.status(id).await.unwrap();
    assert_eq!(task.state, TaskState::Failed);
    assert_eq!(task.attempts, 3);
    assert!(task.last_error.unwrap().contains("500"));
}

#[tokio::test]
async fn test_permanent_error_is_final() {
    let s = scheduler(1, Duration::ZERO);
    let id = s.submit(TaskKind::AnnouncementFetch, "t", "x.gov.cn", Value::Null).await.unwrap();
    let d = next_within(&s, 100).await.unwrap();
    s.complete(
        d.task.id,
        Err(CrawlError::Fetch(FetchError::Status {
            status: 404,
            retry_after: None,
        })),
    )
    .await;
    let task = s.status(id).await.unwrap();
    assert_eq!(task.state, TaskState::Failed);
    assert_eq!(task.attempts, 1);
    assert_eq!(task.last_error_kind, Some(ErrorKind::Permanent));
}

#[tokio::test]
async fn test_cancel_queued_and_running() {
    let s = scheduler(1, Duration::ZERO);
    let running = s.submit(TaskKind::ListMonitor, "a", "x.gov.cn", Value::Null).await.unwrap();
    let queued = s.submit(TaskKind::ListMonitor, "b", "x.gov.cn", Value::Null).await.unwrap();

    let d = next_within(&s, 100).await.unwrap();
    s.cancel(queued).await.unwrap();
    assert_eq!(s.status(queued).await.unwrap().state, TaskState::Cancelled);

    s.cancel(running).await.unwrap();
    assert!(d.cancel.is_cancelled());
    s.complete(running, Err(CrawlError::Cancelled)).await;
    assert_eq!(s.status(running).await.unwrap().state, TaskState::Cancelled);

    assert!(next_within(&s, 50).await.is_none());
    assert!(matches!(s.cancel(running).await, Err(QueueError::Domain(_))));
    assert!(matches!(
        s.cancel(Uuid::new_v4()).await,
        Err(QueueError::NotFound(_))
    ));
    assert_eq!(s.pending(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_rate_limited_domain_cools_down() {
    let s = scheduler(1, Duration::ZERO);
    let id = s.submit(TaskKind::ListMonitor, "a", "x.gov.cn", Value::Null).await.unwrap();
    s.submit(TaskKind::ListMonitor, "b", "x.gov.cn", Value::Null).await.unwrap();

    let d = next_within(&s, 100).await.unwrap();
    let start = Instant::now();
    s.complete(
        d.task.id,
        Err(CrawlError::Fetch(FetchError::Status {
            status: 429,
            retry_after: Some(Duration::from_secs(5)),
        })),
    )
    .await;
    assert_eq!(s.status(id).await.unwrap().state, TaskState::Queued);

    let shutdown = CancellationToken::new();
    let next = s.next(&shutdown).await.unwrap();
    assert!(Instant::now() - start >= Duration::from_secs(5));
    // 重试的任务保持在队首
    assert_eq!(next.task.id, id);
}

#[tokio::test(start_paused = true)]
async fn test_domain_delay_between_dispatches() {
    let s = scheduler(4, Duration::from_millis(1000));
    for target in ["a", "b", "c"] {
        s.submit(TaskKind::ListMonitor, target, "x.gov.cn", Value::Null).await.unwrap();
    }
    let shutdown = CancellationToken::new();
    let mut stamps = Vec::new();
    for _ in 0..3 {
        s.next(&shutdown).await.unwrap();
        stamps.push(Instant::now());
    }
    for pair in stamps.windows(2) {
        assert!(pair[1] - pair[0] >= Duration::from_millis(500));
    }
}

#[tokio::test]
async fn test_warning_ring_and_shutdown() {
    let s = scheduler(1, Duration::ZERO);
    let id = s.submit(TaskKind::Extract, "a", "x.gov.cn", Value::Null).await.unwrap();
    let warnings: Vec<String> = (0..25).map(|i| format!("w{}", i)).collect();
    s.push_warnings(id, &warnings);
    assert_eq!(s.status(id).await.unwrap().warnings.len(), 20);

    let shutdown = CancellationToken::new();
    s.next(&shutdown).await.unwrap();
    shutdown.cancel();
    assert!(s.next(&shutdown).await.is_none());
}

#[test]
fn test_settle_reports_rejected_transitions() {
    let mut task = CrawlTask::new(TaskKind::Extract, "a", "x.gov.cn", Value::Null);
    task.start().unwrap();
    assert!(settle(task.id, task.succeed()));
    assert_eq!(task.state, TaskState::Succeeded);

    // 终态任务不能再取消或失败，状态保持不变
    assert!(!settle(task.id, task.cancel()));
    assert!(!settle(task.id, task.fail(ErrorKind::Permanent, "late error")));
    assert_eq!(task.state, TaskState::Succeeded);
}
