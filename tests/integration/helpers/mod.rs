// Copyright (c) 2025 Kirky.X
//
// Licensed under the MIT License
// See LICENSE file in the project root for full license information.

use axum_test::TestServer;
use gongkao_crawler::application::job_service::JobService;
use gongkao_crawler::auth::manager::AuthManager;
use gongkao_crawler::config::settings::{DatabaseSettings, FetcherSettings};
use gongkao_crawler::domain::models::announcement::Announcement;
use gongkao_crawler::domain::models::selector_catalog::SelectorCatalog;
use gongkao_crawler::domain::models::source::Source;
use gongkao_crawler::domain::repositories::source_repository::SourceRepository;
use gongkao_crawler::domain::services::position_service::PositionService;
use gongkao_crawler::engines::reqwest_engine::ReqwestEngine;
use gongkao_crawler::engines::router::Fetcher;
use gongkao_crawler::infrastructure::database::connection;
use gongkao_crawler::infrastructure::database::entities::announcement as announcement_entity;
use gongkao_crawler::infrastructure::repositories::session_repo_impl::SessionRepositoryImpl;
use gongkao_crawler::infrastructure::repositories::sink_impl::DatabaseSink;
use gongkao_crawler::infrastructure::repositories::source_repo_impl::SourceRepositoryImpl;
use gongkao_crawler::infrastructure::repositories::task_repo_impl::TaskRepositoryImpl;
use gongkao_crawler::infrastructure::storage::InMemoryStorage;
use gongkao_crawler::parsers::ParserRegistry;
use gongkao_crawler::presentation::routes;
use gongkao_crawler::queue::limiter::DomainLimiter;
use gongkao_crawler::queue::scheduler::{Scheduler, SchedulerConfig};
use gongkao_crawler::sources::fenbi::FenbiSource;
use gongkao_crawler::utils::retry_policy::RetryPolicy;
use gongkao_crawler::workers::manager::WorkerManager;
use gongkao_crawler::workers::pipeline::PipelineExecutor;
use gongkao_crawler::workers::worker::TaskTimeouts;
use sea_orm::{ColumnTrait, DatabaseConnection, EntityTrait, QueryFilter};
use std::sync::Arc;
use std::time::Duration;
use wiremock::MockServer;

#[allow(dead_code)]
pub struct TestApp {
    pub server: TestServer,
    pub db: Arc<DatabaseConnection>,
    pub sink: Arc<DatabaseSink>,
    pub sources: Arc<SourceRepositoryImpl>,
    pub scheduler: Arc<Scheduler>,
    pub workers: WorkerManager,
}

impl TestApp {
    /// 启动完整应用：sqlite内存库、仅HTTP层的抓取器、两个工作器
    ///
    /// 粉笔接口与详情页指向 `mock` 服务
    pub async fn start(mock: &MockServer) -> Self {
        Self::build(mock, 2).await
    }

    /// 不启动工作器，任务停留在排队状态
    pub async fn without_workers(mock: &MockServer) -> Self {
        Self::build(mock, 0).await
    }

    async fn build(mock: &MockServer, workers: usize) -> Self {
        let db = Arc::new(
            connection::connect_and_migrate(&DatabaseSettings {
                url: "sqlite::memory:".to_string(),
                max_connections: None,
                min_connections: None,
                connect_timeout: None,
                idle_timeout: None,
            })
            .await
            .expect("Failed to set up database"),
        );
        let sink = Arc::new(DatabaseSink::new(db.clone()));
        let sources = Arc::new(SourceRepositoryImpl::new(db.clone()));
        let sessions = Arc::new(SessionRepositoryImpl::new(db.clone()));

        let fetcher_settings = FetcherSettings::default();
        let fetcher = Arc::new(Fetcher::new(
            vec![Arc::new(ReqwestEngine::new(&fetcher_settings))],
            Arc::new(DomainLimiter::new(Duration::ZERO, Duration::from_secs(60))),
            Arc::new(SelectorCatalog::default()),
            &fetcher_settings,
        ));
        let auth = Arc::new(AuthManager::new(fetcher.clone(), sessions).unwrap());
        let positions = Arc::new(PositionService::new(
            fetcher.clone(),
            Arc::new(InMemoryStorage::new()),
            Arc::new(ParserRegistry::standard()),
            None,
        ));
        let executor = Arc::new(
            PipelineExecutor::new(
                fetcher.clone(),
                sink.clone(),
                sources.clone(),
                auth.clone(),
                positions,
            )
            .with_fenbi(FenbiSource::with_endpoints(
                fetcher,
                format!("{}/api/exam", mock.uri()),
                format!("{}/detail", mock.uri()),
            )),
        );

        let scheduler = Arc::new(Scheduler::new(
            SchedulerConfig {
                max_parallel: 2,
                per_domain_parallel: 2,
                domain_delay: Duration::ZERO,
                cooldown: Duration::from_secs(1),
                retry: RetryPolicy {
                    max_attempts: 3,
                    initial_backoff: Duration::from_millis(20),
                    max_backoff: Duration::from_millis(200),
                    enable_jitter: false,
                    ..RetryPolicy::default()
                },
            },
            Arc::new(TaskRepositoryImpl::new(db.clone())),
        ));
        let mut manager = WorkerManager::new(
            scheduler.clone(),
            executor,
            TaskTimeouts {
                list_monitor: Duration::from_secs(10),
                announcement_fetch: Duration::from_secs(10),
                extract: Duration::from_secs(10),
            },
        );
        manager.start_workers(workers);

        let jobs = Arc::new(JobService::new(
            scheduler.clone(),
            sources.clone(),
            sink.clone(),
        ));
        let server = TestServer::new(routes::routes(jobs, auth)).unwrap();

        Self {
            server,
            db,
            sink,
            sources,
            scheduler,
            workers: manager,
        }
    }

    pub async fn add_source(&self, source: Source) -> Source {
        self.sources.create(&source).await.unwrap()
    }

    pub async fn announcements(&self) -> Vec<Announcement> {
        announcement_entity::Entity::find()
            .all(self.db.as_ref())
            .await
            .unwrap()
            .into_iter()
            .map(|m| Announcement::try_from(m).unwrap())
            .collect()
    }

    pub async fn announcement_by_url(&self, url: &str) -> Option<Announcement> {
        announcement_entity::Entity::find()
            .filter(announcement_entity::Column::Url.eq(url))
            .one(self.db.as_ref())
            .await
            .unwrap()
            .map(|m| Announcement::try_from(m).unwrap())
    }

    /// 等待全部任务（含后续任务）进入终态
    pub async fn wait_idle(&self, timeout: Duration) {
        let deadline = tokio::time::Instant::now() + timeout;
        let mut idle_rounds = 0;
        while idle_rounds < 3 {
            assert!(
                tokio::time::Instant::now() < deadline,
                "tasks still pending: {}",
                self.scheduler.pending()
            );
            if self.scheduler.pending() == 0 {
                idle_rounds += 1;
            } else {
                idle_rounds = 0;
            }
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
    }
}
