// Copyright (c) 2025 Kirky.X
//
// Licensed under the MIT License
// See LICENSE file in the project root for full license information.

use super::helpers::TestApp;
use axum::http::StatusCode;
use gongkao_crawler::application::dto::job_request::JobAccepted;
use gongkao_crawler::application::dto::task_status::TaskStatusDto;
use gongkao_crawler::domain::models::crawl_task::{TaskKind, TaskState};
use gongkao_crawler::domain::models::source::{Source, SourceKind};
use serde_json::json;
use uuid::Uuid;
use wiremock::MockServer;

#[tokio::test]
async fn test_submit_query_and_cancel_task() {
    let mock = MockServer::start().await;
    let app = TestApp::without_workers(&mock).await;
    let source = app
        .add_source(Source::new(
            "人事考试网",
            SourceKind::ListPage,
            "https://rsks.example.gov.cn/list.html",
        ))
        .await;

    let response = app
        .server
        .post("/v1/jobs/list-monitor")
        .json(&json!({ "source_id": source.id }))
        .await;
    response.assert_status(StatusCode::ACCEPTED);
    let task_id = response.json::<JobAccepted>().task_ids[0];

    let status = app
        .server
        .get(&format!("/v1/tasks/{}", task_id))
        .await
        .json::<TaskStatusDto>();
    assert_eq!(status.kind, TaskKind::ListMonitor);
    assert_eq!(status.state, TaskState::Queued);
    assert_eq!(status.target, source.id.to_string());

    app.server
        .delete(&format!("/v1/tasks/{}", task_id))
        .await
        .assert_status(StatusCode::NO_CONTENT);
    let status = app
        .server
        .get(&format!("/v1/tasks/{}", task_id))
        .await
        .json::<TaskStatusDto>();
    assert_eq!(status.state, TaskState::Cancelled);
}

#[tokio::test]
async fn test_fenbi_submission_creates_one_task_per_page() {
    let mock = MockServer::start().await;
    let app = TestApp::without_workers(&mock).await;
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
            "page_end": 3
        }))
        .await;
    response.assert_status(StatusCode::ACCEPTED);
    assert_eq!(response.json::<JobAccepted>().task_ids.len(), 3);
}

#[tokio::test]
async fn test_invalid_requests_are_rejected() {
    let mock = MockServer::start().await;
    let app = TestApp::without_workers(&mock).await;
    app.add_source(Source::new("粉笔", SourceKind::Fenbi, mock.uri()))
        .await;

    // 页码倒置
    app.server
        .post("/v1/jobs/fenbi")
        .json(&json!({
            "region_code": "shaanxi",
            "year": 2025,
            "page_start": 3,
            "page_end": 1
        }))
        .await
        .assert_status(StatusCode::BAD_REQUEST);

    app.server
        .post("/v1/jobs/fenbi")
        .json(&json!({
            "region_code": "atlantis",
            "year": 2025
        }))
        .await
        .assert_status(StatusCode::BAD_REQUEST);

    app.server
        .post("/v1/jobs/list-monitor")
        .json(&json!({ "source_id": Uuid::new_v4() }))
        .await
        .assert_status(StatusCode::NOT_FOUND);

    app.server
        .post("/v1/jobs/extract")
        .json(&json!({ "announcement_id": Uuid::new_v4() }))
        .await
        .assert_status(StatusCode::NOT_FOUND);

    app.server
        .get(&format!("/v1/tasks/{}", Uuid::new_v4()))
        .await
        .assert_status(StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_source_kind_must_match_job() {
    let mock = MockServer::start().await;
    let app = TestApp::without_workers(&mock).await;
    let list = app
        .add_source(Source::new(
            "人事考试网",
            SourceKind::ListPage,
            "https://rsks.example.gov.cn/list.html",
        ))
        .await;

    app.server
        .post("/v1/jobs/rss")
        .json(&json!({ "source_id": list.id }))
        .await
        .assert_status(StatusCode::BAD_REQUEST);
    app.server
        .post("/v1/jobs/wechat-mp")
        .json(&json!({ "source_id": list.id }))
        .await
        .assert_status(StatusCode::BAD_REQUEST);
}
