// Copyright (c) 2025 Kirky.X
//
// Licensed under the MIT License
// See LICENSE file in the project root for full license information.

use crate::application::job_service::JobService;
use crate::auth::manager::AuthManager;
use crate::presentation::handlers::{auth_handler, job_handler};
use axum::{
    routing::{get, post},
    Extension, Router,
};
use std::sync::Arc;
use tower_http::trace::TraceLayer;

/// 创建应用路由
///
/// # 参数
///
/// * `jobs` - 任务提交服务
/// * `auth` - 登录与会话管理
///
/// # 返回值
///
/// 返回配置好的路由
pub fn routes(jobs: Arc<JobService>, auth: Arc<AuthManager>) -> Router {
    let public_routes = Router::new()
        .route("/health", get(health_check))
        .route("/v1/version", get(version));

    let job_routes = Router::new()
        .route("/v1/jobs/list-monitor", post(job_handler::submit_list_monitor))
        .route("/v1/jobs/rss", post(job_handler::submit_rss_crawl))
        .route("/v1/jobs/wechat-mp", post(job_handler::submit_wechat_mp_crawl))
        .route("/v1/jobs/fenbi", post(job_handler::submit_fenbi_crawl))
        .route("/v1/jobs/detail", post(job_handler::submit_detail_fetch))
        .route("/v1/jobs/extract", post(job_handler::submit_extract))
        .route(
            "/v1/tasks/{id}",
            get(job_handler::get_task).delete(job_handler::cancel_task),
        );

    let auth_routes = Router::new()
        .route(
            "/v1/auth/{provider}/cookies",
            post(auth_handler::import_cookies),
        )
        .route(
            "/v1/auth/{provider}/credential",
            post(auth_handler::save_credential),
        )
        .route("/v1/auth/{provider}/login", post(auth_handler::login))
        .route("/v1/auth/{provider}/qrcode", get(auth_handler::get_qrcode))
        .route(
            "/v1/auth/{provider}/qrcode/{uuid}",
            get(auth_handler::poll_login),
        )
        .route("/v1/auth/{provider}/status", get(auth_handler::status));

    Router::new()
        .merge(public_routes)
        .merge(job_routes)
        .merge(auth_routes)
        .layer(Extension(jobs))
        .layer(Extension(auth))
        .layer(TraceLayer::new_for_http())
}

/// 健康检查端点
pub async fn health_check() -> &'static str {
    "OK"
}

/// 版本信息端点
pub async fn version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}
