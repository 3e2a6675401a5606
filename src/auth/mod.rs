// Copyright (c) 2025 Kirky.X
//
// Licensed under the MIT License
// See LICENSE file in the project root for full license information.

pub mod cookies;
pub mod fenbi_login;
pub mod manager;
pub mod wechat_login;

use crate::domain::models::session::Provider;
use crate::domain::repositories::RepositoryError;
use crate::engines::traits::FetchError;
use crate::utils::errors::CrawlError;
use thiserror::Error;

/// 认证错误类型
#[derive(Error, Debug)]
pub enum AuthError {
    #[error("No session for {0}")]
    NoSession(Provider),

    #[error("Session for {0} is expired or invalid")]
    SessionExpired(Provider),

    #[error("No credential saved for {0}")]
    MissingCredential(Provider),

    #[error("Empty cookie string")]
    EmptyCookies,

    #[error("Login failed: {0}")]
    LoginFailed(String),

    #[error("{0} does not support {1}")]
    Unsupported(Provider, &'static str),

    #[error("QR code error: {0}")]
    QrCode(String),

    #[error("Password encryption failed: {0}")]
    Encryption(String),

    #[error(transparent)]
    Fetch(#[from] FetchError),

    #[error(transparent)]
    Repository(#[from] RepositoryError),
}

impl From<AuthError> for CrawlError {
    fn from(e: AuthError) -> Self {
        match e {
            AuthError::Fetch(e) => CrawlError::Fetch(e),
            AuthError::Repository(e) => CrawlError::Repository(e),
            AuthError::Encryption(msg) => CrawlError::Fatal(msg),
            other => CrawlError::AuthExpired(other.to_string()),
        }
    }
}
