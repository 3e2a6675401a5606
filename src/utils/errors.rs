// Copyright (c) 2025 Kirky.X
//
// Licensed under the MIT License
// See LICENSE file in the project root for full license information.

use crate::domain::models::DomainError;
use crate::domain::repositories::storage_repository::StorageError;
use crate::domain::repositories::RepositoryError;
use crate::engines::traits::FetchError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::time::Duration;
use thiserror::Error;

/// 错误分类，调度器据此决定是否重试
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// 超时、DNS、连接重置、5xx、429、TLS握手失败
    Transient,
    /// WAF/反爬拦截，抓取阶梯已耗尽
    Blocked,
    /// 会话失效
    AuthExpired,
    /// 4xx（408/429除外）
    Permanent,
    /// 解析失败
    ParseFailure,
    /// 校验失败
    ValidationFailure,
    /// 协作式取消
    Cancelled,
    /// 程序错误
    Fatal,
}

impl ErrorKind {
    /// 是否允许按退避策略重试
    pub fn is_retryable(self) -> bool {
        matches!(self, ErrorKind::Transient | ErrorKind::Blocked)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ErrorKind::Transient => "transient",
            ErrorKind::Blocked => "blocked",
            ErrorKind::AuthExpired => "auth_expired",
            ErrorKind::Permanent => "permanent",
            ErrorKind::ParseFailure => "parse_failure",
            ErrorKind::ValidationFailure => "validation_failure",
            ErrorKind::Cancelled => "cancelled",
            ErrorKind::Fatal => "fatal",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ErrorKind {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "transient" => Ok(ErrorKind::Transient),
            "blocked" => Ok(ErrorKind::Blocked),
            "auth_expired" => Ok(ErrorKind::AuthExpired),
            "permanent" => Ok(ErrorKind::Permanent),
            "parse_failure" => Ok(ErrorKind::ParseFailure),
            "validation_failure" => Ok(ErrorKind::ValidationFailure),
            "cancelled" => Ok(ErrorKind::Cancelled),
            "fatal" => Ok(ErrorKind::Fatal),
            other => Err(DomainError::UnknownValue(other.to_string())),
        }
    }
}

/// 任务执行错误
#[derive(Error, Debug)]
pub enum CrawlError {
    #[error("抓取失败: {0}")]
    Fetch(#[from] FetchError),

    #[error("会话已失效: {0}")]
    AuthExpired(String),

    #[error("解析失败: {0}")]
    Parse(String),

    #[error("校验失败: {0}")]
    Validation(String),

    #[error("任务已取消")]
    Cancelled,

    #[error("仓库错误: {0}")]
    Repository(#[from] RepositoryError),

    #[error("存储错误: {0}")]
    Storage(#[from] StorageError),

    #[error("内部错误: {0}")]
    Fatal(String),
}

impl CrawlError {
    /// 错误分类
    pub fn kind(&self) -> ErrorKind {
        match self {
            CrawlError::Fetch(e) => e.kind(),
            CrawlError::AuthExpired(_) => ErrorKind::AuthExpired,
            CrawlError::Parse(_) => ErrorKind::ParseFailure,
            CrawlError::Validation(_) => ErrorKind::ValidationFailure,
            CrawlError::Cancelled => ErrorKind::Cancelled,
            CrawlError::Repository(RepositoryError::NotFound) => ErrorKind::Permanent,
            CrawlError::Repository(RepositoryError::Database(_)) => ErrorKind::Transient,
            CrawlError::Repository(RepositoryError::Serialization(_)) => ErrorKind::Fatal,
            CrawlError::Storage(_) => ErrorKind::Transient,
            CrawlError::Fatal(_) => ErrorKind::Fatal,
        }
    }

    /// 429 响应携带的冷却提示
    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            CrawlError::Fetch(e) => e.retry_after(),
            _ => None,
        }
    }

    /// 是否为限流响应（429）
    pub fn is_rate_limited(&self) -> bool {
        matches!(self, CrawlError::Fetch(e) if e.is_rate_limited())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_classification() {
        let server_error = CrawlError::from(FetchError::Status {
            status: 500,
            retry_after: None,
        });
        assert_eq!(server_error.kind(), ErrorKind::Transient);

        let not_found = CrawlError::from(FetchError::Status {
            status: 404,
            retry_after: None,
        });
        assert_eq!(not_found.kind(), ErrorKind::Permanent);

        let throttled = CrawlError::from(FetchError::Status {
            status: 429,
            retry_after: Some(Duration::from_secs(12)),
        });
        assert_eq!(throttled.kind(), ErrorKind::Transient);
        assert!(throttled.is_rate_limited());
        assert_eq!(throttled.retry_after(), Some(Duration::from_secs(12)));

        let request_timeout = CrawlError::from(FetchError::Status {
            status: 408,
            retry_after: None,
        });
        assert_eq!(request_timeout.kind(), ErrorKind::Transient);
    }

    #[test]
    fn test_non_fetch_classification() {
        assert_eq!(CrawlError::Cancelled.kind(), ErrorKind::Cancelled);
        assert_eq!(
            CrawlError::AuthExpired("token".into()).kind(),
            ErrorKind::AuthExpired
        );
        assert_eq!(
            CrawlError::from(FetchError::Blocked("环境异常".into())).kind(),
            ErrorKind::Blocked
        );
        assert!(!ErrorKind::ParseFailure.is_retryable());
        assert!(ErrorKind::Blocked.is_retryable());
    }
}
