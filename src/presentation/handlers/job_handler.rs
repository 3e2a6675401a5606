// Copyright (c) 2025 Kirky.X
//
// Licensed under the MIT License
// See LICENSE file in the project root for full license information.

use crate::application::dto::job_request::{
    AnnouncementJobRequest, FenbiCrawlRequest, JobAccepted, SourceJobRequest,
};
use crate::application::dto::task_status::TaskStatusDto;
use crate::application::job_service::JobService;
use crate::presentation::errors::AppError;
use axum::extract::{Extension, Path};
use axum::http::StatusCode;
use axum::Json;
use std::sync::Arc;
use uuid::Uuid;
use validator::Validate;

type Accepted = (StatusCode, Json<JobAccepted>);

fn accepted(task_id: Uuid) -> Accepted {
    (
        StatusCode::ACCEPTED,
        Json(JobAccepted {
            task_ids: vec![task_id],
        }),
    )
}

pub async fn submit_list_monitor(
    Extension(jobs): Extension<Arc<JobService>>,
    Json(payload): Json<SourceJobRequest>,
) -> Result<Accepted, AppError> {
    payload.validate()?;
    Ok(accepted(jobs.submit_list_monitor(payload.source_id).await?))
}

pub async fn submit_rss_crawl(
    Extension(jobs): Extension<Arc<JobService>>,
    Json(payload): Json<SourceJobRequest>,
) -> Result<Accepted, AppError> {
    Ok(accepted(jobs.submit_rss_crawl(payload.source_id).await?))
}

pub async fn submit_wechat_mp_crawl(
    Extension(jobs): Extension<Arc<JobService>>,
    Json(payload): Json<SourceJobRequest>,
) -> Result<Accepted, AppError> {
    Ok(accepted(jobs.submit_wechat_mp_crawl(payload.source_id).await?))
}

/// 粉笔分页抓取，每页返回一个任务ID
pub async fn submit_fenbi_crawl(
    Extension(jobs): Extension<Arc<JobService>>,
    Json(payload): Json<FenbiCrawlRequest>,
) -> Result<Accepted, AppError> {
    let accepted = jobs.submit_fenbi_crawl(&payload).await?;
    Ok((StatusCode::ACCEPTED, Json(accepted)))
}

pub async fn submit_detail_fetch(
    Extension(jobs): Extension<Arc<JobService>>,
    Json(payload): Json<AnnouncementJobRequest>,
) -> Result<Accepted, AppError> {
    Ok(accepted(
        jobs.submit_detail_fetch(payload.announcement_id).await?,
    ))
}

pub async fn submit_extract(
    Extension(jobs): Extension<Arc<JobService>>,
    Json(payload): Json<AnnouncementJobRequest>,
) -> Result<Accepted, AppError> {
    Ok(accepted(jobs.submit_extract(payload.announcement_id).await?))
}

/// 任务状态，含最近的告警
pub async fn get_task(
    Extension(jobs): Extension<Arc<JobService>>,
    Path(id): Path<Uuid>,
) -> Result<Json<TaskStatusDto>, AppError> {
    Ok(Json(jobs.get_task_status(id).await?))
}

pub async fn cancel_task(
    Extension(jobs): Extension<Arc<JobService>>,
    Path(id): Path<Uuid>,
) -> Result<StatusCode, AppError> {
    jobs.cancel_task(id).await?;
    Ok(StatusCode::NO_CONTENT)
}
