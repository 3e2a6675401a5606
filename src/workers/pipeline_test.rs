// Copyright (c) 2025 Kirky.X
//
// Licensed under the MIT License
// See LICENSE file in the project root for full license information.

use super::*;
use crate::domain::models::source::SourceSelectors;
use crate::infrastructure::memory_store::InMemoryStore;
use crate::infrastructure::storage::InMemoryStorage;
use crate::parsers::ParserRegistry;
use serde_json::json;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

const LIST_HTML: &str = r#"<html><body><ul class="news">
    <li><a href="/notice/1.html">2025年省考招录公告</a><span>2025-03-01</span></li>
    <li><a href="/notice/2.html">2025年遴选公告</a><span>2025-03-02</span></li>
</ul></body></html>"#;

fn notice_html() -> String {
    format!(
        r#"<html><head><title>招录公告 - 人事考试网</title></head><body>
        <h1>2025年某市公务员招录公告</h1>
        <div class="content"><p>{}</p>
        <table>
            <tr><td>部门名称</td><td>职位名称</td><td>招录人数</td><td>学历</td></tr>
            <tr><td>某市统计局</td><td>统计员</td><td>2</td><td>本科</td></tr>
            <tr><td>某市财政局</td><td>会计</td><td>1</td><td>大专</td></tr>
        </table></div></body></html>"#,
        "公告正文内容".repeat(30)
    )
}

fn short_page(chars: usize) -> String {
    format!(
        "<html><head><title>招录公告</title></head><body><p>{}</p></body></html>",
        "字".repeat(chars)
    )
}

fn html(body: impl Into<String>) -> ResponseTemplate {
    ResponseTemplate::new(200).set_body_raw(body.into().into_bytes(), "text/html; charset=utf-8")
}

struct Harness {
    store: Arc<InMemoryStore>,
    executor: PipelineExecutor,
    fetcher: Arc<Fetcher>,
}

fn harness() -> Harness {
    let store = Arc::new(InMemoryStore::new());
    let fetcher = Arc::new(Fetcher::http_only_for_tests());
    let auth = Arc::new(AuthManager::new(fetcher.clone(), store.clone()).unwrap());
    let positions = Arc::new(PositionService::new(
        fetcher.clone(),
        Arc::new(InMemoryStorage::new()),
        Arc::new(ParserRegistry::standard()),
        None,
    ));
    let executor = PipelineExecutor::new(
        fetcher.clone(),
        store.clone(),
        store.clone(),
        auth,
        positions,
    );
    Harness {
        store,
        executor,
        fetcher,
    }
}

fn task_for(kind: TaskKind, target: &str, params: TaskParams) -> CrawlTask {
    let mut task = CrawlTask::new(kind, target, "127.0.0.1", params.to_value());
    task.start().unwrap();
    task
}

async fn add_source(store: &InMemoryStore, source: Source) -> Source {
    store.create(&source).await.unwrap()
}

#[tokio::test]
async fn test_list_monitor_saves_candidates_once() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/list.html"))
        .respond_with(html(LIST_HTML))
        .mount(&server)
        .await;

    let h = harness();
    let source = add_source(
        &h.store,
        Source::new("人事考试网", SourceKind::ListPage, format!("{}/list.html", server.uri()))
            .with_selectors(SourceSelectors {
                list: Some(".news a".to_string()),
                ..Default::default()
            }),
    )
    .await;
    let task = task_for(
        TaskKind::ListMonitor,
        &source.id.to_string(),
        TaskParams::for_source(source.id),
    );

    let report = h.executor.execute(&task, &CancellationToken::new()).await.unwrap();
    assert_eq!(report.follow_ups.len(), 2);
    assert!(report
        .follow_ups
        .iter()
        .all(|f| f.kind == TaskKind::DetailFetch && f.domain == "127.0.0.1"));
    assert_eq!(h.store.announcement_count(), 2);
    let first = &h.store.announcements()[0];
    assert_eq!(first.crawl_status, CrawlStatus::PendingDetail);
    assert!(first.publish_date.is_some());

    // 第二次扫描没有新链接
    let report = h.executor.execute(&task, &CancellationToken::new()).await.unwrap();
    assert!(report.follow_ups.is_empty());
    let source = SourceRepository::find_by_id(h.store.as_ref(), source.id)
        .await
        .unwrap()
        .unwrap();
    assert!(source.last_crawled_at.is_some());
    assert!(h.store.events().iter().any(|e| e.event_type == "source_crawled"));
}

#[tokio::test]
async fn test_detail_fetch_then_extract() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/notice/1.html"))
        .respond_with(html(notice_html()))
        .mount(&server)
        .await;

    let h = harness();
    let source = add_source(
        &h.store,
        Source::new("人事考试网", SourceKind::ListPage, server.uri()),
    )
    .await;
    let candidate = Announcement::from_article(&Article::new(
        source.id,
        &format!("{}/notice/1.html", server.uri()),
        "招录公告",
    ));
    h.store.save_candidate(&candidate).await.unwrap();

    let detail = task_for(
        TaskKind::DetailFetch,
        &candidate.id.to_string(),
        TaskParams::for_announcement(candidate.id),
    );
    let report = h.executor.execute(&detail, &CancellationToken::new()).await.unwrap();
    assert_eq!(report.follow_ups, vec![FollowUp::extract(&candidate)]);

    let stored = h.store.get_announcement(candidate.id).await.unwrap().unwrap();
    assert_eq!(stored.title, "2025年某市公务员招录公告");
    assert_eq!(stored.crawl_status, CrawlStatus::Fetched);
    assert!(!stored.content_hash.is_empty());

    let extract = task_for(
        TaskKind::Extract,
        &candidate.id.to_string(),
        TaskParams::for_announcement(candidate.id),
    );
    h.executor.execute(&extract, &CancellationToken::new()).await.unwrap();
    let positions = h.store.list_positions(candidate.id).await.unwrap();
    assert_eq!(positions.len(), 2);
    assert!(positions.iter().all(|p| p.announcement_id == candidate.id));
    let stored = h.store.get_announcement(candidate.id).await.unwrap().unwrap();
    assert_eq!(stored.crawl_status, CrawlStatus::Extracted);

    // 内容未变时不再提交抽取
    let report = h.executor.execute(&detail, &CancellationToken::new()).await.unwrap();
    assert!(report.follow_ups.is_empty());
}

#[tokio::test]
async fn test_validity_gate_on_body_length() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/short.html"))
        .respond_with(html(short_page(40)))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/enough.html"))
        .respond_with(html(short_page(50)))
        .mount(&server)
        .await;

    let h = harness();
    let source = add_source(
        &h.store,
        Source::new("人事考试网", SourceKind::ListPage, server.uri()),
    )
    .await;

    let mut ids = Vec::new();
    for page in ["short", "enough"] {
        let candidate = Announcement::from_article(&Article::new(
            source.id,
            &format!("{}/{}.html", server.uri(), page),
            "",
        ));
        h.store.save_candidate(&candidate).await.unwrap();
        ids.push(candidate.id);
    }

    let rejected = h
        .executor
        .execute(
            &task_for(TaskKind::DetailFetch, &ids[0].to_string(), TaskParams::for_announcement(ids[0])),
            &CancellationToken::new(),
        )
        .await;
    assert!(matches!(rejected, Err(CrawlError::Validation(_))));
    let stored = h.store.get_announcement(ids[0]).await.unwrap().unwrap();
    assert_eq!(stored.crawl_status, CrawlStatus::Failed);

    let accepted = h
        .executor
        .execute(
            &task_for(TaskKind::DetailFetch, &ids[1].to_string(), TaskParams::for_announcement(ids[1])),
            &CancellationToken::new(),
        )
        .await
        .unwrap();
    assert_eq!(accepted.follow_ups.len(), 1);
    let stored = h.store.get_announcement(ids[1]).await.unwrap().unwrap();
    assert_eq!(stored.title, "招录公告");
}

#[tokio::test]
async fn test_fenbi_page_and_detail_resolve_original_link() {
    let server = MockServer::start().await;
    let uri = server.uri();
    Mock::given(method("POST"))
        .and(path("/api/exam"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "code": 1,
            "msg": "",
            "data": {
                "total": 1,
                "articles": [{
                    "id": 101,
                    "title": "2025年陕西选调公告",
                    "issueTime": 1735660800000i64,
                    "tagsList": [{"type": 1, "id": 3268, "name": "陕西"}]
                }]
            }
        })))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/detail/101"))
        .respond_with(html(format!(
            r#"<html><body><div class="content"><p>原文网址：<a href="{0}/s/abc">{0}/s/abc</a></p></div></body></html>"#,
            uri
        )))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/s/abc"))
        .respond_with(ResponseTemplate::new(302).insert_header("Location", "/origin/1.html"))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/origin/1.html"))
        .respond_with(html(notice_html()))
        .mount(&server)
        .await;

    let h = harness();
    let executor = h.executor.with_fenbi(FenbiSource::with_endpoints(
        h.fetcher.clone(),
        format!("{}/api/exam", uri),
        format!("{}/detail", uri),
    ));
    let source = add_source(
        &h.store,
        Source::new("粉笔", SourceKind::Fenbi, uri.clone()).with_params(json!({
            "region": "shaanxi",
            "exam_type": "xuandiao",
            "year": 2025
        })),
    )
    .await;

    let list = task_for(
        TaskKind::ListMonitor,
        &source.id.to_string(),
        TaskParams {
            page: Some(1),
            ..TaskParams::for_source(source.id)
        },
    );
    let report = executor.execute(&list, &CancellationToken::new()).await.unwrap();
    assert_eq!(report.follow_ups.len(), 1);
    let candidate = h.store.announcements().remove(0);
    assert_eq!(candidate.region_code.as_deref(), Some("shaanxi"));
    assert_eq!(candidate.url, format!("{}/detail/101", uri));

    let detail = task_for(
        TaskKind::DetailFetch,
        &candidate.id.to_string(),
        TaskParams::for_announcement(candidate.id),
    );
    let report = executor.execute(&detail, &CancellationToken::new()).await.unwrap();
    assert!(report.warnings.is_empty());
    let stored = h.store.get_announcement(candidate.id).await.unwrap().unwrap();
    assert_eq!(
        stored.final_url.as_deref(),
        Some(format!("{}/origin/1.html", uri).as_str())
    );
    assert_eq!(stored.region_code.as_deref(), Some("shaanxi"));
    assert_eq!(stored.crawl_status, CrawlStatus::Fetched);
}

#[tokio::test]
async fn test_extract_requires_fetched_announcement() {
    let h = harness();
    let candidate = Announcement::from_article(&Article::new(
        Uuid::new_v4(),
        "https://a.gov.cn/1.html",
        "公告",
    ));
    h.store.save_candidate(&candidate).await.unwrap();
    let task = task_for(
        TaskKind::Extract,
        &candidate.id.to_string(),
        TaskParams::for_announcement(candidate.id),
    );
    let result = h.executor.execute(&task, &CancellationToken::new()).await;
    assert!(matches!(result, Err(CrawlError::Validation(_))));

    let missing = task_for(TaskKind::Extract, &Uuid::new_v4().to_string(), TaskParams::default());
    let result = h.executor.execute(&missing, &CancellationToken::new()).await;
    assert_eq!(result.unwrap_err().kind(), ErrorKind::Permanent);
}

#[tokio::test]
async fn test_wechat_mp_without_session_is_auth_expired() {
    let h = harness();
    let source = add_source(
        &h.store,
        Source::new("公众号", SourceKind::WechatMp, "https://mp.weixin.qq.com")
            .with_params(json!({"fakeid": "MzA1"})),
    )
    .await;
    let task = task_for(
        TaskKind::ListMonitor,
        &source.id.to_string(),
        TaskParams::for_source(source.id),
    );
    let result = h.executor.execute(&task, &CancellationToken::new()).await;
    assert_eq!(result.unwrap_err().kind(), ErrorKind::AuthExpired);
}

#[tokio::test]
async fn test_cancelled_before_start() {
    let h = harness();
    let task = task_for(TaskKind::Extract, "x", TaskParams::default());
    let cancel = CancellationToken::new();
    cancel.cancel();
    assert!(matches!(
        h.executor.execute(&task, &cancel).await,
        Err(CrawlError::Cancelled)
    ));
}

/// 第 N 次保存候选时失败一次的汇聚端
struct FailingCandidateSink {
    inner: Arc<InMemoryStore>,
    fail_on: usize,
    calls: std::sync::atomic::AtomicUsize,
}

#[async_trait]
impl Sink for FailingCandidateSink {
    async fn upsert_announcement(
        &self,
        announcement: &Announcement,
    ) -> Result<Announcement, RepositoryError> {
        self.inner.upsert_announcement(announcement).await
    }

    async fn upsert_positions(
        &self,
        announcement_id: Uuid,
        positions: &[crate::domain::models::position::Position],
    ) -> Result<usize, RepositoryError> {
        self.inner.upsert_positions(announcement_id, positions).await
    }

    async fn record_crawl_event(&self, event: &CrawlEvent) -> Result<(), RepositoryError> {
        self.inner.record_crawl_event(event).await
    }

    async fn save_candidate(
        &self,
        announcement: &Announcement,
    ) -> Result<(Announcement, bool), RepositoryError> {
        let call = self
            .calls
            .fetch_add(1, std::sync::atomic::Ordering::SeqCst);
        if call == self.fail_on {
            return Err(RepositoryError::Serialization("disk full".into()));
        }
        self.inner.save_candidate(announcement).await
    }

    async fn get_announcement(&self, id: Uuid) -> Result<Option<Announcement>, RepositoryError> {
        self.inner.get_announcement(id).await
    }

    async fn find_by_source_url(
        &self,
        source_id: Uuid,
        url: &str,
    ) -> Result<Option<Announcement>, RepositoryError> {
        self.inner.find_by_source_url(source_id, url).await
    }

    async fn find_by_content_hash(
        &self,
        content_hash: &str,
    ) -> Result<Option<Announcement>, RepositoryError> {
        self.inner.find_by_content_hash(content_hash).await
    }

    async fn update_crawl_status(
        &self,
        id: Uuid,
        status: CrawlStatus,
    ) -> Result<(), RepositoryError> {
        self.inner.update_crawl_status(id, status).await
    }

    async fn list_positions(
        &self,
        announcement_id: Uuid,
    ) -> Result<Vec<crate::domain::models::position::Position>, RepositoryError> {
        self.inner.list_positions(announcement_id).await
    }
}

#[tokio::test]
async fn test_list_monitor_retry_after_save_failure_keeps_candidates() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/list.html"))
        .respond_with(html(LIST_HTML))
        .mount(&server)
        .await;

    let store = Arc::new(InMemoryStore::new());
    let sink = Arc::new(FailingCandidateSink {
        inner: store.clone(),
        fail_on: 1,
        calls: std::sync::atomic::AtomicUsize::new(0),
    });
    let fetcher = Arc::new(Fetcher::http_only_for_tests());
    let auth = Arc::new(AuthManager::new(fetcher.clone(), store.clone()).unwrap());
    let positions = Arc::new(PositionService::new(
        fetcher.clone(),
        Arc::new(InMemoryStorage::new()),
        Arc::new(ParserRegistry::standard()),
        None,
    ));
    let executor = PipelineExecutor::new(fetcher, sink, store.clone(), auth, positions);

    let source = add_source(
        &store,
        Source::new("人事考试网", SourceKind::ListPage, format!("{}/list.html", server.uri()))
            .with_selectors(SourceSelectors {
                list: Some(".news a".to_string()),
                ..Default::default()
            }),
    )
    .await;
    let task = task_for(
        TaskKind::ListMonitor,
        &source.id.to_string(),
        TaskParams::for_source(source.id),
    );

    // 第二个候选保存失败，整个任务失败
    assert!(executor.execute(&task, &CancellationToken::new()).await.is_err());
    assert_eq!(store.announcement_count(), 1);

    // 重试时两个候选都要进入详情抓取，包括上次已保存的那个
    let report = executor.execute(&task, &CancellationToken::new()).await.unwrap();
    assert_eq!(store.announcement_count(), 2);
    assert_eq!(report.follow_ups.len(), 2);
    assert!(report.follow_ups.iter().all(|f| f.kind == TaskKind::DetailFetch));

    // 全部落库后不再重复发现
    let report = executor.execute(&task, &CancellationToken::new()).await.unwrap();
    assert!(report.follow_ups.is_empty());
}
