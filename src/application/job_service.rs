// Copyright (c) 2025 Kirky.X
//
// Licensed under the MIT License
// See LICENSE file in the project root for full license information.

use crate::application::dto::job_request::{FenbiCrawlRequest, JobAccepted};
use crate::application::dto::task_status::TaskStatusDto;
use crate::domain::models::announcement::{Announcement, CrawlStatus};
use crate::domain::models::crawl_task::TaskKind;
use crate::domain::models::source::{Source, SourceKind};
use crate::domain::repositories::sink::Sink;
use crate::domain::repositories::source_repository::SourceRepository;
use crate::domain::repositories::RepositoryError;
use crate::queue::scheduler::{QueueError, Scheduler};
use crate::sources::fenbi_catalog::{exam_type_id, region_id};
use crate::workers::pipeline::{domain_of, FollowUp, TaskParams};
use metrics::counter;
use std::sync::Arc;
use thiserror::Error;
use tracing::{info, instrument};
use uuid::Uuid;
use validator::Validate;

#[derive(Error, Debug)]
pub enum JobError {
    #[error("Validation failed: {0}")]
    Validation(String),
    #[error("Not found: {0}")]
    NotFound(String),
    #[error("Repository error: {0}")]
    Repository(#[from] RepositoryError),
    #[error(transparent)]
    Queue(QueueError),
}

impl From<QueueError> for JobError {
    fn from(e: QueueError) -> Self {
        match e {
            QueueError::NotFound(id) => JobError::NotFound(format!("task {}", id)),
            QueueError::Domain(e) => JobError::Validation(e.to_string()),
            other => JobError::Queue(other),
        }
    }
}

/// 任务提交服务
///
/// 对外的任务入口：校验请求、定位数据源或公告，然后交给调度器
pub struct JobService {
    scheduler: Arc<Scheduler>,
    sources: Arc<dyn SourceRepository>,
    sink: Arc<dyn Sink>,
}

impl JobService {
    pub fn new(
        scheduler: Arc<Scheduler>,
        sources: Arc<dyn SourceRepository>,
        sink: Arc<dyn Sink>,
    ) -> Self {
        Self {
            scheduler,
            sources,
            sink,
        }
    }

    pub fn scheduler(&self) -> &Arc<Scheduler> {
        &self.scheduler
    }

    async fn active_source(&self, source_id: Uuid) -> Result<Source, JobError> {
        let source = self
            .sources
            .find_by_id(source_id)
            .await?
            .ok_or_else(|| JobError::NotFound(format!("source {}", source_id)))?;
        if !source.is_active() {
            return Err(JobError::Validation(format!(
                "source {} is {}",
                source.id, source.status
            )));
        }
        Ok(source)
    }

    async fn announcement(&self, announcement_id: Uuid) -> Result<Announcement, JobError> {
        self.sink
            .get_announcement(announcement_id)
            .await?
            .ok_or_else(|| JobError::NotFound(format!("announcement {}", announcement_id)))
    }

    async fn submit(
        &self,
        kind: TaskKind,
        target: String,
        domain: String,
        params: TaskParams,
    ) -> Result<Uuid, JobError> {
        let id = self
            .scheduler
            .submit(kind, target, domain, params.to_value())
            .await?;
        counter!("crawl_tasks_submitted_total", "kind" => kind.to_string()).increment(1);
        Ok(id)
    }

    async fn submit_follow_up(&self, follow_up: FollowUp) -> Result<Uuid, JobError> {
        self.submit(
            follow_up.kind,
            follow_up.target,
            follow_up.domain,
            follow_up.params,
        )
        .await
    }

    /// 提交数据源发现任务
    #[instrument(skip(self))]
    pub async fn submit_list_monitor(&self, source_id: Uuid) -> Result<Uuid, JobError> {
        let source = self.active_source(source_id).await?;
        let id = self
            .submit(
                TaskKind::ListMonitor,
                source.id.to_string(),
                domain_of(&source.endpoint),
                TaskParams::for_source(source.id),
            )
            .await?;
        info!(task_id = %id, source = %source.name, "List monitor submitted");
        Ok(id)
    }

    async fn submit_source_of_kind(
        &self,
        source_id: Uuid,
        kind: SourceKind,
    ) -> Result<Uuid, JobError> {
        let source = self.active_source(source_id).await?;
        if source.kind != kind {
            return Err(JobError::Validation(format!(
                "source {} is {}, expected {}",
                source.id, source.kind, kind
            )));
        }
        self.submit_list_monitor(source.id).await
    }

    pub async fn submit_rss_crawl(&self, source_id: Uuid) -> Result<Uuid, JobError> {
        self.submit_source_of_kind(source_id, SourceKind::Rss).await
    }

    pub async fn submit_wechat_mp_crawl(&self, source_id: Uuid) -> Result<Uuid, JobError> {
        self.submit_source_of_kind(source_id, SourceKind::WechatMp)
            .await
    }

    /// 提交粉笔分页抓取
    ///
    /// 地区与考试类型代码必须在字典内（`all` 不限），
    /// 页码区间内每页一个发现任务，使用第一个启用的粉笔数据源
    ///
    /// # 返回值
    ///
    /// 按页码顺序返回任务ID
    #[instrument(skip(self), fields(region = %request.region_code, exam_type = %request.exam_type_code, year = request.year))]
    pub async fn submit_fenbi_crawl(
        &self,
        request: &FenbiCrawlRequest,
    ) -> Result<JobAccepted, JobError> {
        request
            .validate()
            .map_err(|e| JobError::Validation(e.to_string()))?;
        region_id(&request.region_code).map_err(|e| JobError::Validation(e.to_string()))?;
        exam_type_id(&request.exam_type_code).map_err(|e| JobError::Validation(e.to_string()))?;

        let source = self
            .sources
            .find_active_by_kind(SourceKind::Fenbi)
            .await?
            .into_iter()
            .next()
            .ok_or_else(|| JobError::NotFound("active fenbi source".to_string()))?;
        let domain = domain_of(&source.endpoint);

        let mut task_ids = Vec::new();
        for page in request.page_start..=request.page_end {
            let params = TaskParams {
                source_id: Some(source.id),
                region: Some(request.region_code.clone()),
                exam_type: Some(request.exam_type_code.clone()),
                year: Some(request.year),
                page: Some(page),
                ..Default::default()
            };
            let target = format!(
                "{}:{}:{}:{}:{}",
                source.id, request.region_code, request.exam_type_code, request.year, page
            );
            task_ids.push(
                self.submit(TaskKind::ListMonitor, target, domain.clone(), params)
                    .await?,
            );
        }
        info!(pages = task_ids.len(), "Fenbi crawl submitted");
        Ok(JobAccepted { task_ids })
    }

    /// 提交公告详情抓取
    pub async fn submit_detail_fetch(&self, announcement_id: Uuid) -> Result<Uuid, JobError> {
        let announcement = self.announcement(announcement_id).await?;
        self.submit_follow_up(FollowUp::detail_fetch(&announcement))
            .await
    }

    /// 提交职位抽取，公告必须已抓取正文
    pub async fn submit_extract(&self, announcement_id: Uuid) -> Result<Uuid, JobError> {
        let announcement = self.announcement(announcement_id).await?;
        if matches!(
            announcement.crawl_status,
            CrawlStatus::PendingDetail | CrawlStatus::Failed
        ) {
            return Err(JobError::Validation(format!(
                "announcement {} is {}",
                announcement.id, announcement.crawl_status
            )));
        }
        self.submit_follow_up(FollowUp::extract(&announcement)).await
    }

    pub async fn cancel_task(&self, task_id: Uuid) -> Result<(), JobError> {
        self.scheduler.cancel(task_id).await?;
        Ok(())
    }

    pub async fn get_task_status(&self, task_id: Uuid) -> Result<TaskStatusDto, JobError> {
        Ok(self.scheduler.status(task_id).await?.into())
    }
}
