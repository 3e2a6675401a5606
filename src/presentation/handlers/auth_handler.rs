// Copyright (c) 2025 Kirky.X
//
// Licensed under the MIT License
// See LICENSE file in the project root for full license information.

use crate::application::dto::auth_request::{
    CredentialRequest, ImportCookiesRequest, SessionStatusDto,
};
use crate::auth::manager::AuthManager;
use crate::auth::wechat_login::{PollResult, QrCode};
use crate::domain::models::session::Provider;
use crate::presentation::errors::AppError;
use axum::extract::{Extension, Path};
use axum::http::StatusCode;
use axum::Json;
use chrono::Utc;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::info;
use validator::Validate;

fn provider(raw: &str) -> Result<Provider, AppError> {
    Ok(raw.parse::<Provider>()?)
}

/// 导入运营人员粘贴的Cookie串
pub async fn import_cookies(
    Extension(auth): Extension<Arc<AuthManager>>,
    Path(raw): Path<String>,
    Json(payload): Json<ImportCookiesRequest>,
) -> Result<Json<SessionStatusDto>, AppError> {
    payload.validate()?;
    let provider = provider(&raw)?;
    let session = auth
        .import_cookies_with_token(provider, &payload.cookies, payload.token)
        .await?;
    info!(%provider, "Cookies imported via API");
    Ok(Json(SessionStatusDto::from_session(
        provider,
        Some(session),
        Utc::now(),
    )))
}

pub async fn save_credential(
    Extension(auth): Extension<Arc<AuthManager>>,
    Path(raw): Path<String>,
    Json(payload): Json<CredentialRequest>,
) -> Result<StatusCode, AppError> {
    payload.validate()?;
    auth.save_credential(provider(&raw)?, &payload.phone, &payload.password)
        .await?;
    Ok(StatusCode::NO_CONTENT)
}

/// 使用已保存的凭据登录
pub async fn login(
    Extension(auth): Extension<Arc<AuthManager>>,
    Path(raw): Path<String>,
) -> Result<Json<SessionStatusDto>, AppError> {
    let provider = provider(&raw)?;
    let session = auth.login(provider, &CancellationToken::new()).await?;
    Ok(Json(SessionStatusDto::from_session(
        provider,
        Some(session),
        Utc::now(),
    )))
}

pub async fn get_qrcode(
    Extension(auth): Extension<Arc<AuthManager>>,
    Path(raw): Path<String>,
) -> Result<Json<QrCode>, AppError> {
    let qr = auth
        .get_qrcode(provider(&raw)?, &CancellationToken::new())
        .await?;
    Ok(Json(qr))
}

pub async fn poll_login(
    Extension(auth): Extension<Arc<AuthManager>>,
    Path((raw, uuid)): Path<(String, String)>,
) -> Result<Json<PollResult>, AppError> {
    provider(&raw)?;
    Ok(Json(
        auth.poll_login(&uuid, &CancellationToken::new()).await?,
    ))
}

pub async fn status(
    Extension(auth): Extension<Arc<AuthManager>>,
    Path(raw): Path<String>,
) -> Result<Json<SessionStatusDto>, AppError> {
    let provider = provider(&raw)?;
    let session = auth.status(provider).await?;
    Ok(Json(SessionStatusDto::from_session(
        provider,
        session,
        Utc::now(),
    )))
}
