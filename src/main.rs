// Copyright (c) 2025 Kirky.X
//
// Licensed under the MIT License
// See LICENSE file in the project root for full license information.

use gongkao_crawler::application::job_service::JobService;
use gongkao_crawler::auth::manager::AuthManager;
use gongkao_crawler::config::settings::Settings;
use gongkao_crawler::domain::models::selector_catalog::SelectorCatalog;
use gongkao_crawler::domain::services::llm_service::{LLMService, LLMServiceTrait};
use gongkao_crawler::domain::services::position_service::PositionService;
use gongkao_crawler::engines::browser_engine::BrowserEngine;
use gongkao_crawler::engines::reqwest_engine::ReqwestEngine;
use gongkao_crawler::engines::router::Fetcher;
use gongkao_crawler::engines::tls_engine::TlsEngine;
use gongkao_crawler::engines::traits::FetchEngine;
use gongkao_crawler::infrastructure::database::connection;
use gongkao_crawler::infrastructure::metrics::init_metrics;
use gongkao_crawler::infrastructure::repositories::session_repo_impl::SessionRepositoryImpl;
use gongkao_crawler::infrastructure::repositories::sink_impl::DatabaseSink;
use gongkao_crawler::infrastructure::repositories::source_repo_impl::SourceRepositoryImpl;
use gongkao_crawler::infrastructure::repositories::task_repo_impl::TaskRepositoryImpl;
use gongkao_crawler::infrastructure::storage::LocalStorage;
use gongkao_crawler::parsers::ParserRegistry;
use gongkao_crawler::presentation::routes;
use gongkao_crawler::queue::limiter::DomainLimiter;
use gongkao_crawler::queue::scheduler::{Scheduler, SchedulerConfig};
use gongkao_crawler::utils::telemetry;
use gongkao_crawler::workers::manager::WorkerManager;
use gongkao_crawler::workers::pipeline::PipelineExecutor;
use gongkao_crawler::workers::worker::TaskTimeouts;
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing::{info, warn};

/// 主函数
///
/// 应用程序入口点，负责初始化所有组件并启动服务
#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // 1. Load configuration
    let settings = Settings::new()?;
    telemetry::init_telemetry(&settings.logging);
    info!("Starting gongkao-crawler...");
    init_metrics(&settings.metrics)?;

    // 2. Connect to database
    let db = Arc::new(connection::connect_and_migrate(&settings.database).await?);
    info!("Database connection established");

    let sink = Arc::new(DatabaseSink::new(db.clone()));
    let sources = Arc::new(SourceRepositoryImpl::new(db.clone()));
    let sessions = Arc::new(SessionRepositoryImpl::new(db.clone()));
    let tasks = Arc::new(TaskRepositoryImpl::new(db.clone()));

    // 3. Fetcher tiers
    let catalog = Arc::new(SelectorCatalog::load(settings.catalog_path.as_deref())?);
    let limiter = Arc::new(DomainLimiter::new(
        settings.scheduler.domain_delay(),
        settings.scheduler.cooldown(),
    ));
    let mut engines: Vec<Arc<dyn FetchEngine>> = vec![
        Arc::new(ReqwestEngine::new(&settings.fetcher)),
        Arc::new(TlsEngine::new(&settings.fetcher)),
    ];
    if settings.fetcher.browser_enabled {
        engines.push(Arc::new(BrowserEngine::new(&settings.fetcher)));
    } else {
        warn!("Browser tier disabled");
    }
    let fetcher = Arc::new(Fetcher::new(engines, limiter, catalog, &settings.fetcher));

    // 4. Auth and extraction
    let auth = Arc::new(AuthManager::new(fetcher.clone(), sessions)?);
    let llm = LLMService::from_settings(&settings.llm)
        .map(|service| Arc::new(service) as Arc<dyn LLMServiceTrait>);
    if llm.is_none() {
        info!("LLM api key not configured, LLM extraction disabled");
    }
    let positions = Arc::new(PositionService::new(
        fetcher.clone(),
        Arc::new(LocalStorage::from_settings(&settings.storage)),
        Arc::new(ParserRegistry::standard()),
        llm,
    ));

    // 5. Scheduler and workers
    let scheduler = Arc::new(Scheduler::new(
        SchedulerConfig::from_settings(&settings.scheduler),
        tasks,
    ));
    let executor = Arc::new(PipelineExecutor::new(
        fetcher,
        sink.clone(),
        sources.clone(),
        auth.clone(),
        positions,
    ));
    let mut worker_manager = WorkerManager::new(
        scheduler.clone(),
        executor,
        TaskTimeouts::from_settings(&settings.scheduler),
    );
    worker_manager.start_workers(settings.scheduler.max_parallel.max(1));

    // 6. Start HTTP server
    let jobs = Arc::new(JobService::new(scheduler, sources, sink));
    let app = routes::routes(jobs, auth);

    let addr = format!("{}:{}", settings.server.host, settings.server.port);
    let listener = TcpListener::bind(&addr).await?;
    info!("Server listening on {}", addr);

    let shutdown = worker_manager.shutdown_token();
    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            tokio::select! {
                _ = tokio::signal::ctrl_c() => info!("Shutdown signal received"),
                _ = shutdown.cancelled() => {}
            }
        })
        .await?;

    worker_manager.shutdown().await;
    Ok(())
}
