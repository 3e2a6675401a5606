// Copyright (c) 2025 Kirky.X
//
// Licensed under the MIT License
// See LICENSE file in the project root for full license information.

use super::helpers::TestApp;
use axum::http::StatusCode;
use gongkao_crawler::application::dto::auth_request::SessionStatusDto;
use serde_json::json;
use wiremock::MockServer;

#[tokio::test]
async fn test_import_cookies_then_status() {
    let mock = MockServer::start().await;
    let app = TestApp::without_workers(&mock).await;

    let before = app
        .server
        .get("/v1/auth/fenbi/status")
        .await
        .json::<SessionStatusDto>();
    assert!(!before.logged_in);

    let imported = app
        .server
        .post("/v1/auth/fenbi/cookies")
        .json(&json!({ "cookies": "sess=abc123; userid=42" }))
        .await;
    imported.assert_status(StatusCode::OK);
    assert!(imported.json::<SessionStatusDto>().logged_in);

    let after = app
        .server
        .get("/v1/auth/fenbi/status")
        .await
        .json::<SessionStatusDto>();
    assert!(after.logged_in);
    assert!(after.expires_at.is_some());
    assert!(!after.has_token);

    let wechat = app
        .server
        .post("/v1/auth/wechat/cookies")
        .json(&json!({ "cookies": "slave_sid=xyz", "token": "12345" }))
        .await
        .json::<SessionStatusDto>();
    assert!(wechat.has_token);
}

#[tokio::test]
async fn test_auth_errors_map_to_status_codes() {
    let mock = MockServer::start().await;
    let app = TestApp::without_workers(&mock).await;

    app.server
        .post("/v1/auth/fenbi/cookies")
        .json(&json!({ "cookies": "" }))
        .await
        .assert_status(StatusCode::BAD_REQUEST);

    app.server
        .get("/v1/auth/weibo/status")
        .await
        .assert_status(StatusCode::BAD_REQUEST);

    // 未保存凭据
    app.server
        .post("/v1/auth/fenbi/login")
        .await
        .assert_status(StatusCode::NOT_FOUND);

    app.server
        .post("/v1/auth/wechat/login")
        .await
        .assert_status(StatusCode::BAD_REQUEST);

    app.server
        .get("/v1/auth/fenbi/qrcode")
        .await
        .assert_status(StatusCode::BAD_REQUEST);

    app.server
        .get("/v1/auth/wechat/qrcode/unknown-uuid")
        .await
        .assert_status(StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_save_credential() {
    let mock = MockServer::start().await;
    let app = TestApp::without_workers(&mock).await;

    app.server
        .post("/v1/auth/fenbi/credential")
        .json(&json!({ "phone": "13800000000", "password": "secret" }))
        .await
        .assert_status(StatusCode::NO_CONTENT);

    app.server
        .post("/v1/auth/fenbi/credential")
        .json(&json!({ "phone": "1", "password": "secret" }))
        .await
        .assert_status(StatusCode::BAD_REQUEST);
}
