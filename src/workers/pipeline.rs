// Copyright (c) 2025 Kirky.X
//
// Licensed under the MIT License
// See LICENSE file in the project root for full license information.

use crate::auth::manager::AuthManager;
use crate::domain::models::announcement::{Announcement, CrawlStatus};
use crate::domain::models::article::Article;
use crate::domain::models::crawl_event::CrawlEvent;
use crate::domain::models::crawl_task::{CrawlTask, TaskKind};
use crate::domain::models::session::Provider;
use crate::domain::models::source::{Source, SourceKind};
use crate::domain::repositories::sink::Sink;
use crate::domain::repositories::source_repository::SourceRepository;
use crate::domain::repositories::RepositoryError;
use crate::domain::services::dedup_service::DedupService;
use crate::domain::services::extraction_service::extract_page;
use crate::domain::services::position_service::PositionService;
use crate::engines::router::Fetcher;
use crate::engines::traits::FetchRequest;
use crate::sources::fenbi::FenbiSource;
use crate::sources::js_eval::BoaEvaluator;
use crate::sources::list_monitor::{CrawledSet, ListMonitor};
use crate::sources::rss::RssSource;
use crate::sources::wechat_article::WechatArticleSource;
use crate::sources::wechat_mp::WechatMpSource;
use crate::sources::Discovery;
use crate::utils::errors::{CrawlError, ErrorKind};
use crate::utils::url_utils::host_of;
use async_trait::async_trait;
use chrono::{Datelike, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{info, instrument, warn};
use url::Url;
use uuid::Uuid;

/// 无法解析域名时使用的调度域
const UNKNOWN_DOMAIN: &str = "unknown";

/// 任务参数
///
/// 以JSON保存在任务上，各任务类型只读取自己需要的字段
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TaskParams {
    pub source_id: Option<Uuid>,
    pub announcement_id: Option<Uuid>,
    pub url: Option<String>,
    pub title: Option<String>,
    /// 粉笔地区代码
    pub region: Option<String>,
    /// 粉笔考试类型代码
    pub exam_type: Option<String>,
    pub year: Option<i32>,
    pub page: Option<u32>,
}

impl TaskParams {
    pub fn for_source(source_id: Uuid) -> Self {
        Self {
            source_id: Some(source_id),
            ..Default::default()
        }
    }

    pub fn for_announcement(announcement_id: Uuid) -> Self {
        Self {
            announcement_id: Some(announcement_id),
            ..Default::default()
        }
    }

    pub fn to_value(&self) -> serde_json::Value {
        serde_json::to_value(self).unwrap_or(serde_json::Value::Null)
    }

    pub fn from_task(task: &CrawlTask) -> Result<Self, CrawlError> {
        if task.params.is_null() {
            return Ok(Self::default());
        }
        serde_json::from_value(task.params.clone())
            .map_err(|e| CrawlError::Validation(format!("invalid task params: {}", e)))
    }

    fn source_id(&self) -> Result<Uuid, CrawlError> {
        self.source_id
            .ok_or_else(|| CrawlError::Validation("missing source_id".to_string()))
    }

    fn announcement_id(&self, task: &CrawlTask) -> Result<Uuid, CrawlError> {
        self.announcement_id
            .or_else(|| Uuid::parse_str(&task.target).ok())
            .ok_or_else(|| CrawlError::Validation("missing announcement_id".to_string()))
    }
}

/// 任务完成后需要提交的后续任务
#[derive(Debug, Clone, PartialEq)]
pub struct FollowUp {
    pub kind: TaskKind,
    pub target: String,
    pub domain: String,
    pub params: TaskParams,
}

impl FollowUp {
    pub fn detail_fetch(announcement: &Announcement) -> Self {
        Self {
            kind: TaskKind::DetailFetch,
            target: announcement.id.to_string(),
            domain: domain_of(&announcement.url),
            params: TaskParams::for_announcement(announcement.id),
        }
    }

    pub fn extract(announcement: &Announcement) -> Self {
        Self {
            kind: TaskKind::Extract,
            target: announcement.id.to_string(),
            domain: domain_of(announcement.effective_url()),
            params: TaskParams::for_announcement(announcement.id),
        }
    }
}

/// 单个任务的执行报告
#[derive(Debug, Default)]
pub struct TaskReport {
    pub warnings: Vec<String>,
    pub follow_ups: Vec<FollowUp>,
}

/// 调度域：URL的主机名
pub fn domain_of(url: &str) -> String {
    host_of(url).unwrap_or_else(|| UNKNOWN_DOMAIN.to_string())
}

/// 任务执行器
#[async_trait]
pub trait TaskExecutor: Send + Sync {
    /// 执行任务；瞬时错误由调度器按策略重试
    async fn execute(
        &self,
        task: &CrawlTask,
        cancel: &CancellationToken,
    ) -> Result<TaskReport, CrawlError>;
}

/// 抓取流水线
///
/// 发现 → 详情抓取（第一遍抽取）→ 去重发布 → 职位抽取（第二遍）。
/// 每一步作为独立任务运行，前一步在报告中给出后续任务。
pub struct PipelineExecutor {
    fetcher: Arc<Fetcher>,
    sink: Arc<dyn Sink>,
    sources: Arc<dyn SourceRepository>,
    auth: Arc<AuthManager>,
    dedup: Arc<DedupService>,
    positions: Arc<PositionService>,
    /// 已保存候选与已访问分页，保存成功后才标记
    crawled: Arc<CrawledSet>,
    list_monitor: ListMonitor,
    rss: RssSource,
    fenbi: FenbiSource,
    wechat_article: WechatArticleSource,
    wechat_mp: WechatMpSource,
}

impl PipelineExecutor {
    pub fn new(
        fetcher: Arc<Fetcher>,
        sink: Arc<dyn Sink>,
        sources: Arc<dyn SourceRepository>,
        auth: Arc<AuthManager>,
        positions: Arc<PositionService>,
    ) -> Self {
        let crawled = Arc::new(CrawledSet::new());
        Self {
            list_monitor: ListMonitor::new(fetcher.clone(), crawled.clone()),
            rss: RssSource::new(fetcher.clone(), crawled.clone()),
            crawled,
            fenbi: FenbiSource::new(fetcher.clone()),
            wechat_article: WechatArticleSource::new(fetcher.clone())
                .with_evaluator(Arc::new(BoaEvaluator::default())),
            wechat_mp: WechatMpSource::new(fetcher.clone()),
            dedup: Arc::new(DedupService::new(sink.clone())),
            fetcher,
            sink,
            sources,
            auth,
            positions,
        }
    }

    pub fn with_fenbi(mut self, fenbi: FenbiSource) -> Self {
        self.fenbi = fenbi;
        self
    }

    pub fn with_wechat_mp(mut self, wechat_mp: WechatMpSource) -> Self {
        self.wechat_mp = wechat_mp;
        self
    }

    pub fn dedup(&self) -> &Arc<DedupService> {
        &self.dedup
    }

    async fn record(&self, event: CrawlEvent) {
        if let Err(e) = self.sink.record_crawl_event(&event).await {
            warn!(error = %e, "Failed to record crawl event");
        }
    }

    async fn load_source(&self, source_id: Uuid) -> Result<Source, CrawlError> {
        self.sources
            .find_by_id(source_id)
            .await?
            .ok_or(CrawlError::Repository(RepositoryError::NotFound))
    }

    async fn load_announcement(&self, id: Uuid) -> Result<Announcement, CrawlError> {
        self.sink
            .get_announcement(id)
            .await?
            .ok_or(CrawlError::Repository(RepositoryError::NotFound))
    }

    async fn fenbi_jar(&self) -> Option<crate::auth::cookies::SessionJar> {
        self.auth
            .session_jar(Provider::Fenbi)
            .await
            .ok()
            .map(|(jar, _)| jar)
    }

    /// 数据源发现
    async fn run_list_monitor(
        &self,
        task: &CrawlTask,
        params: &TaskParams,
        cancel: &CancellationToken,
    ) -> Result<TaskReport, CrawlError> {
        let source = self.load_source(params.source_id()?).await?;
        if !source.is_active() {
            return Err(CrawlError::Validation(format!(
                "source {} is {}",
                source.id, source.status
            )));
        }

        let mut report = TaskReport::default();
        let discovery = match source.kind {
            SourceKind::ListPage => self.list_monitor.discover(&source, None, cancel).await?,
            SourceKind::Rss => self.rss.discover(&source, cancel).await?,
            SourceKind::Fenbi => self.discover_fenbi(&source, params, cancel).await?,
            SourceKind::WechatMp => self.discover_wechat_mp(&source, cancel).await?,
            SourceKind::WechatArticle => {
                // 单篇文章源，直接抓取入口文章
                report.follow_ups.push(FollowUp {
                    kind: TaskKind::AnnouncementFetch,
                    target: source.endpoint.clone(),
                    domain: domain_of(&source.endpoint),
                    params: TaskParams {
                        source_id: Some(source.id),
                        url: Some(source.endpoint.clone()),
                        ..Default::default()
                    },
                });
                return Ok(report);
            }
        };

        let mut created = 0usize;
        for candidate in &discovery.candidates {
            let (stored, is_new) = self.sink.save_candidate(candidate).await?;
            if is_new {
                created += 1;
            }
            // 上次运行保存后中断的候选仍需抓取详情
            if stored.crawl_status == CrawlStatus::PendingDetail {
                report.follow_ups.push(FollowUp::detail_fetch(&stored));
            }
        }
        self.sources.mark_crawled(source.id, Utc::now()).await?;
        // 后续任务随报告一起交出后才算已抓取
        self.crawled
            .extend(discovery.candidates.iter().map(|c| c.url.as_str()));
        discovery.commit_pages(&self.crawled);
        self.record(
            CrawlEvent::new(
                "source_crawled",
                format!(
                    "found {}, new {}, pages {}",
                    discovery.total_found, created, discovery.pages_visited
                ),
            )
            .for_source(source.id)
            .for_task(task.id),
        )
        .await;
        info!(
            source_id = %source.id,
            kind = %source.kind,
            found = discovery.total_found,
            new = created,
            "Source discovery finished"
        );
        report.warnings = discovery.warnings;
        Ok(report)
    }

    async fn discover_fenbi(
        &self,
        source: &Source,
        params: &TaskParams,
        cancel: &CancellationToken,
    ) -> Result<Discovery, CrawlError> {
        let region = params
            .region
            .clone()
            .or_else(|| source.param_str("region"))
            .unwrap_or_else(|| "all".to_string());
        let exam_type = params
            .exam_type
            .clone()
            .or_else(|| source.param_str("exam_type"))
            .unwrap_or_else(|| "all".to_string());
        let year = params
            .year
            .or_else(|| source.param_str("year").and_then(|y| y.parse().ok()))
            .unwrap_or_else(|| Utc::now().year());
        let page = params.page.unwrap_or(1);

        let jar = self.fenbi_jar().await;
        let result = self
            .fenbi
            .crawl_page(source.id, &region, &exam_type, year, page, jar.as_ref(), cancel)
            .await?;
        Ok(Discovery {
            total_found: result.items.len(),
            candidates: result.items,
            pages_visited: 1,
            has_next_page: result.has_next_page,
            crawled_pages: Vec::new(),
            warnings: Vec::new(),
        })
    }

    async fn discover_wechat_mp(
        &self,
        source: &Source,
        cancel: &CancellationToken,
    ) -> Result<Discovery, CrawlError> {
        let (jar, session) = self.auth.session_jar(Provider::Wechat).await?;
        let token = session
            .token
            .ok_or_else(|| CrawlError::AuthExpired("wechat session has no token".to_string()))?;
        match self.wechat_mp.discover(source, &jar, &token, cancel).await {
            Ok(discovery) => {
                if let Err(e) = self.auth.persist_jar(Provider::Wechat).await {
                    warn!(error = %e, "Failed to persist wechat cookies");
                }
                Ok(discovery)
            }
            Err(e) => {
                let error = CrawlError::from(e);
                if error.kind() == ErrorKind::AuthExpired {
                    self.auth.invalidate(Provider::Wechat).await?;
                }
                Err(error)
            }
        }
    }

    /// 粉笔详情页：提取原文链接并解析短链
    async fn resolve_original(
        &self,
        announcement: &mut Announcement,
        report: &mut TaskReport,
        cancel: &CancellationToken,
    ) -> Result<String, CrawlError> {
        if !announcement.url.starts_with(self.fenbi.detail_base()) {
            return Ok(announcement.url.clone());
        }
        let jar = self.fenbi_jar().await;
        let detail = self
            .fenbi
            .fetch_detail(&announcement.url, jar.as_ref(), cancel)
            .await?;
        if announcement.title.trim().is_empty() && !detail.title.is_empty() {
            announcement.title = detail.title;
        }
        let Some(link) = detail.original_url else {
            report
                .warnings
                .push(format!("no original link on {}", announcement.url));
            return Ok(announcement.url.clone());
        };
        let resolved = self
            .fetcher
            .resolve_short_url(&link, jar.as_ref(), cancel)
            .await?
            .unwrap_or(link);
        info!(from = %announcement.url, to = %resolved, "Resolved original link");
        announcement.final_url = Some(resolved.clone());
        Ok(resolved)
    }

    /// 抓取页面、第一遍抽取并发布；写入成功时追加职位抽取任务
    async fn fetch_and_emit(
        &self,
        task: &CrawlTask,
        mut announcement: Announcement,
        page_url: &str,
        report: &mut TaskReport,
        cancel: &CancellationToken,
    ) -> Result<(), CrawlError> {
        let response = self
            .fetcher
            .fetch(&FetchRequest::get(page_url), None, cancel)
            .await?;
        let base = Url::parse(&response.final_url)
            .map_err(|e| CrawlError::Parse(format!("{}: {}", response.final_url, e)))?;
        let html = response.text();
        let fallback_title = announcement.title.clone();
        extract_page(&html, &base, &fallback_title, self.fetcher.catalog())
            .apply_to(&mut announcement);
        if response.final_url != announcement.url {
            announcement.final_url = Some(response.final_url.clone());
        }

        let announcement_id = announcement.id;
        match self.dedup.emit_announcement(announcement, Some(task.id)).await {
            Ok((stored, outcome)) => {
                if outcome.is_written() {
                    report.follow_ups.push(FollowUp::extract(&stored));
                }
                Ok(())
            }
            Err(CrawlError::Validation(message)) => {
                if let Err(e) = self
                    .sink
                    .update_crawl_status(announcement_id, CrawlStatus::Failed)
                    .await
                {
                    warn!(error = %e, "Failed to mark announcement failed");
                }
                self.record(
                    CrawlEvent::new("announcement_rejected", message.clone())
                        .for_announcement(announcement_id)
                        .for_task(task.id),
                )
                .await;
                Err(CrawlError::Validation(message))
            }
            Err(e) => Err(e),
        }
    }

    async fn run_detail_fetch(
        &self,
        task: &CrawlTask,
        params: &TaskParams,
        cancel: &CancellationToken,
    ) -> Result<TaskReport, CrawlError> {
        let mut announcement = self.load_announcement(params.announcement_id(task)?).await?;
        let mut report = TaskReport::default();
        let page_url = self
            .resolve_original(&mut announcement, &mut report, cancel)
            .await?;
        self.fetch_and_emit(task, announcement, &page_url, &mut report, cancel)
            .await?;
        Ok(report)
    }

    /// 按URL直接抓取一篇公告（公众号文章等）
    async fn run_announcement_fetch(
        &self,
        task: &CrawlTask,
        params: &TaskParams,
        cancel: &CancellationToken,
    ) -> Result<TaskReport, CrawlError> {
        let source = self.load_source(params.source_id()?).await?;
        let url = params.url.clone().unwrap_or_else(|| task.target.clone());
        let mut title = params.title.clone().unwrap_or_default();
        let mut report = TaskReport::default();

        if host_of(&url).is_some_and(|h| h == "mp.weixin.qq.com") {
            match self.wechat_article.fetch_info(&url, None, cancel).await {
                Ok(info) => {
                    if title.is_empty() {
                        title = info.title.clone();
                    }
                    self.record(
                        CrawlEvent::new(
                            "wechat_biz_resolved",
                            format!("biz={} method={}", info.biz, info.method),
                        )
                        .for_source(source.id)
                        .for_task(task.id),
                    )
                    .await;
                }
                Err(e) => {
                    let error = CrawlError::from(e);
                    if error.kind() == ErrorKind::Cancelled {
                        return Err(error);
                    }
                    report.warnings.push(format!("biz lookup failed: {}", error));
                }
            }
        }

        let candidate = Announcement::from_article(&Article::new(source.id, &url, title));
        let (stored, _) = self.sink.save_candidate(&candidate).await?;
        self.fetch_and_emit(task, stored, &url, &mut report, cancel)
            .await?;
        Ok(report)
    }

    async fn run_extract(
        &self,
        task: &CrawlTask,
        params: &TaskParams,
        cancel: &CancellationToken,
    ) -> Result<TaskReport, CrawlError> {
        let announcement = self.load_announcement(params.announcement_id(task)?).await?;
        if announcement.crawl_status == CrawlStatus::PendingDetail {
            return Err(CrawlError::Validation(format!(
                "announcement {} has not been fetched",
                announcement.id
            )));
        }
        let extraction = self.positions.extract(&announcement, cancel).await?;
        if cancel.is_cancelled() {
            return Err(CrawlError::Cancelled);
        }
        if !extraction.attachments.is_empty() {
            let mut updated = announcement.clone();
            for downloaded in &extraction.attachments {
                if let Some(a) = updated.attachments.iter_mut().find(|a| a.url == downloaded.url) {
                    a.local_path = downloaded.local_path.clone();
                    a.bytes_hash = downloaded.bytes_hash.clone();
                }
            }
            self.sink.upsert_announcement(&updated).await?;
        }
        self.dedup
            .emit_positions(announcement.id, &extraction.positions, Some(task.id))
            .await?;
        Ok(TaskReport {
            warnings: extraction.warnings,
            follow_ups: Vec::new(),
        })
    }
}

#[async_trait]
impl TaskExecutor for PipelineExecutor {
    #[instrument(skip_all, fields(task_id = %task.id, kind = %task.kind, target = %task.target))]
    async fn execute(
        &self,
        task: &CrawlTask,
        cancel: &CancellationToken,
    ) -> Result<TaskReport, CrawlError> {
        if cancel.is_cancelled() {
            return Err(CrawlError::Cancelled);
        }
        let params = TaskParams::from_task(task)?;
        match task.kind {
            TaskKind::ListMonitor => self.run_list_monitor(task, &params, cancel).await,
            TaskKind::DetailFetch => self.run_detail_fetch(task, &params, cancel).await,
            TaskKind::AnnouncementFetch => self.run_announcement_fetch(task, &params, cancel).await,
            TaskKind::Extract => self.run_extract(task, &params, cancel).await,
        }
    }
}

#[cfg(test)]
#[path = "pipeline_test.rs"]
mod tests;
