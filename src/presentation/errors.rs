// Copyright (c) 2025 Kirky.X
//
// Licensed under the MIT License
// See LICENSE file in the project root for full license information.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;

use crate::application::job_service::JobError;
use crate::auth::AuthError;
use crate::domain::models::DomainError;
use crate::domain::repositories::RepositoryError;

/// 应用错误类型
///
/// 封装所有可能的应用层错误，提供统一的错误处理接口
#[derive(Debug)]
pub struct AppError(anyhow::Error);

impl AppError {
    fn status(&self) -> StatusCode {
        if let Some(e) = self.0.downcast_ref::<JobError>() {
            return match e {
                JobError::Validation(_) => StatusCode::BAD_REQUEST,
                JobError::NotFound(_) | JobError::Repository(RepositoryError::NotFound) => {
                    StatusCode::NOT_FOUND
                }
                _ => StatusCode::INTERNAL_SERVER_ERROR,
            };
        }
        if let Some(e) = self.0.downcast_ref::<AuthError>() {
            return match e {
                AuthError::EmptyCookies | AuthError::Unsupported(..) | AuthError::QrCode(_) => {
                    StatusCode::BAD_REQUEST
                }
                AuthError::NoSession(_) | AuthError::MissingCredential(_) => {
                    StatusCode::NOT_FOUND
                }
                AuthError::SessionExpired(_) | AuthError::LoginFailed(_) => {
                    StatusCode::UNAUTHORIZED
                }
                AuthError::Fetch(_) => StatusCode::BAD_GATEWAY,
                AuthError::Encryption(_) | AuthError::Repository(_) => {
                    StatusCode::INTERNAL_SERVER_ERROR
                }
            };
        }
        if self.0.downcast_ref::<validator::ValidationErrors>().is_some()
            || self.0.downcast_ref::<DomainError>().is_some()
        {
            return StatusCode::BAD_REQUEST;
        }
        match self.0.downcast_ref::<RepositoryError>() {
            Some(RepositoryError::NotFound) => StatusCode::NOT_FOUND,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            tracing::error!(error = %self.0, "Request failed");
        }
        let body = Json(json!({ "error": self.0.to_string() }));
        (status, body).into_response()
    }
}

impl<E> From<E> for AppError
where
    E: Into<anyhow::Error>,
{
    fn from(err: E) -> Self {
        Self(err.into())
    }
}
