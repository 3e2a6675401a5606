// Copyright (c) 2025 Kirky.X
//
// Licensed under the MIT License
// See LICENSE file in the project root for full license information.

use super::helpers::TestApp;
use axum::http::StatusCode;
use gongkao_crawler::application::dto::job_request::JobAccepted;
use gongkao_crawler::application::dto::task_status::TaskStatusDto;
use gongkao_crawler::domain::models::announcement::{Announcement, CrawlStatus};
use gongkao_crawler::domain::models::article::Article;
use gongkao_crawler::domain::models::crawl_task::TaskState;
use gongkao_crawler::domain::models::source::{Source, SourceKind, SourceSelectors};
use gongkao_crawler::domain::repositories::sink::Sink;
use serde_json::json;
use std::time::Duration;
use wiremock::matchers::{body_partial_json, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn html(body: impl Into<String>) -> ResponseTemplate {
    ResponseTemplate::new(200).set_body_raw(body.into().into_bytes(), "text/html; charset=utf-8")
}

fn notice_page(chars: usize) -> String {
    format!(
        "<html><head><title>招录公告</title></head><body><p>{}</p></body></html>",
        "字".repeat(chars)
    )
}

async fn task_state(app: &TestApp, id: uuid::Uuid) -> TaskStatusDto {
    app.server
        .get(&format!("/v1/tasks/{}", id))
        .await
        .json::<TaskStatusDto>()
}

#[tokio::test]
async fn test_fenbi_page_maps_codes_and_reverse_maps_region() {
    let mock = MockServer::start().await;
    let articles: Vec<_> = (1..=15)
        .map(|i| {
            json!({
                "id": 1000 + i,
                "title": format!("2025年陕西省选调生招录公告（第{}批）", i),
                "issueTime": 1735660800000i64,
                "tagsList": [{"type": 1, "id": 3268, "name": "陕西"}]
            })
        })
        .collect();
    Mock::given(method("POST"))
        .and(path("/api/exam"))
        .and(body_partial_json(json!({
            "districtId": "3268",
            "examType": "4",
            "year": "2025"
        })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "code": 1,
            "msg": "",
            "data": {"total": 15, "articles": articles}
        })))
        .expect(1)
        .mount(&mock)
        .await;

    let app = TestApp::start(&mock).await;
    app.add_source(Source::new("粉笔", SourceKind::Fenbi, mock.uri()))
        .await;

    let response = app
        .server
        .post("/v1/jobs/fenbi")
        .json(&json!({
            "region_code": "shaanxi",
            "exam_type_code": "xuandiao",
            "year": 2025,
            "page_start": 1,
            "page_end": 1
        }))
        .await;
    response.assert_status(StatusCode::ACCEPTED);
    let accepted = response.json::<JobAccepted>();
    assert_eq!(accepted.task_ids.len(), 1);

    let task = app
        .scheduler
        .wait_for(accepted.task_ids[0], Duration::from_secs(10))
        .await
        .unwrap();
    assert_eq!(task.state, TaskState::Succeeded);

    let announcements = app.announcements().await;
    assert_eq!(announcements.len(), 15);
    assert!(announcements
        .iter()
        .all(|a| a.region_code.as_deref() == Some("shaanxi")));
}

#[tokio::test]
async fn test_list_monitor_rejects_short_body_and_emits_long_one() {
    let mock = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/list.html"))
        .respond_with(html(
            r#"<html><body><ul class="news">
                <li><a href="/notice/short.html">2025年事业单位招聘公告</a></li>
                <li><a href="/notice/long.html">2025年公务员招录公告</a></li>
            </ul></body></html>"#,
        ))
        .mount(&mock)
        .await;
    Mock::given(method("GET"))
        .and(path("/notice/short.html"))
        .respond_with(html(notice_page(40)))
        .mount(&mock)
        .await;
    Mock::given(method("GET"))
        .and(path("/notice/long.html"))
        .respond_with(html(notice_page(50)))
        .mount(&mock)
        .await;

    let app = TestApp::start(&mock).await;
    let source = app
        .add_source(
            Source::new(
                "人事考试网",
                SourceKind::ListPage,
                format!("{}/list.html", mock.uri()),
            )
            .with_selectors(SourceSelectors {
                list: Some(".news a".to_string()),
                ..Default::default()
            }),
        )
        .await;

    app.server
        .post("/v1/jobs/list-monitor")
        .json(&json!({ "source_id": source.id }))
        .await
        .assert_status(StatusCode::ACCEPTED);
    app.wait_idle(Duration::from_secs(15)).await;

    let short = app
        .announcement_by_url(&format!("{}/notice/short.html", mock.uri()))
        .await
        .unwrap();
    assert_eq!(short.crawl_status, CrawlStatus::Failed);

    let long = app
        .announcement_by_url(&format!("{}/notice/long.html", mock.uri()))
        .await
        .unwrap();
    assert_eq!(long.title, "招录公告");
    assert!(long.content_text.chars().count() >= 50);
    assert!(matches!(
        long.crawl_status,
        CrawlStatus::Fetched | CrawlStatus::Extracted
    ));
}

#[tokio::test]
async fn test_transient_errors_retry_and_not_found_fails_once() {
    let mock = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/notice/flaky.html"))
        .respond_with(ResponseTemplate::new(500))
        .up_to_n_times(2)
        .expect(2)
        .mount(&mock)
        .await;
    Mock::given(method("GET"))
        .and(path("/notice/flaky.html"))
        .respond_with(html(notice_page(80)))
        .mount(&mock)
        .await;
    Mock::given(method("GET"))
        .and(path("/notice/missing.html"))
        .respond_with(ResponseTemplate::new(404))
        .expect(1)
        .mount(&mock)
        .await;

    let app = TestApp::start(&mock).await;
    let source = app
        .add_source(Source::new("人事考试网", SourceKind::ListPage, mock.uri()))
        .await;
    let flaky = Announcement::from_article(&Article::new(
        source.id,
        &format!("{}/notice/flaky.html", mock.uri()),
        "招录公告",
    ));
    let missing = Announcement::from_article(&Article::new(
        source.id,
        &format!("{}/notice/missing.html", mock.uri()),
        "招聘公告",
    ));
    let (flaky, _) = app.sink.save_candidate(&flaky).await.unwrap();
    let (missing, _) = app.sink.save_candidate(&missing).await.unwrap();

    let mut task_ids = Vec::new();
    for announcement in [&flaky, &missing] {
        let accepted = app
            .server
            .post("/v1/jobs/detail")
            .json(&json!({ "announcement_id": announcement.id }))
            .await
            .json::<JobAccepted>();
        task_ids.push(accepted.task_ids[0]);
    }

    let flaky_task = app
        .scheduler
        .wait_for(task_ids[0], Duration::from_secs(10))
        .await
        .unwrap();
    assert_eq!(flaky_task.state, TaskState::Succeeded);
    assert_eq!(flaky_task.attempts, 3);
    let stored = app.sink.get_announcement(flaky.id).await.unwrap().unwrap();
    assert_ne!(stored.crawl_status, CrawlStatus::Failed);
    assert_ne!(stored.crawl_status, CrawlStatus::PendingDetail);

    app.scheduler
        .wait_for(task_ids[1], Duration::from_secs(10))
        .await
        .unwrap();
    let missing_status = task_state(&app, task_ids[1]).await;
    assert_eq!(missing_status.state, TaskState::Failed);
    assert_eq!(missing_status.attempts, 1);
    assert!(missing_status.last_error.is_some());
}
