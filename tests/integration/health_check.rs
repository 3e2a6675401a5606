// Copyright (c) 2025 Kirky.X
//
// Licensed under the MIT License
// See LICENSE file in the project root for full license information.

use super::helpers::TestApp;
use axum::http::StatusCode;
use wiremock::MockServer;

/// 健康检查测试
///
/// 验证健康检查与版本端点是否正常工作
#[tokio::test]
async fn health_check_works() {
    let mock = MockServer::start().await;
    let app = TestApp::without_workers(&mock).await;

    let response = app.server.get("/health").await;
    response.assert_status(StatusCode::OK);
    response.assert_text("OK");

    app.server
        .get("/v1/version")
        .await
        .assert_text(env!("CARGO_PKG_VERSION"));
}
