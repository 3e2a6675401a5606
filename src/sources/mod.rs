// Copyright (c) 2025 Kirky.X
//
// Licensed under the MIT License
// See LICENSE file in the project root for full license information.

pub mod fenbi;
pub mod fenbi_catalog;
pub mod js_eval;
pub mod list_monitor;
pub mod rss;
pub mod wechat_article;
pub mod wechat_mp;

use crate::auth::AuthError;
use crate::domain::models::announcement::Announcement;
use crate::engines::traits::FetchError;
use crate::utils::errors::CrawlError;
use list_monitor::CrawledSet;
use thiserror::Error;

/// 数据源适配器错误
#[derive(Error, Debug)]
pub enum SourceError {
    #[error(transparent)]
    Fetch(#[from] FetchError),

    #[error(transparent)]
    Auth(#[from] AuthError),

    /// 提供方接口返回业务错误
    #[error("API error: code={code}, msg={message}")]
    Api { code: i64, message: String },

    /// 公众平台 token 过期
    #[error("Token expired, please re-login")]
    TokenExpired,

    #[error("Unknown code: {0}")]
    UnknownCode(String),

    #[error("Missing parameter: {0}")]
    MissingParam(&'static str),

    #[error("Parse error: {0}")]
    Parse(String),

    #[error("Not found: {0}")]
    NotFound(String),
}

impl From<SourceError> for CrawlError {
    fn from(e: SourceError) -> Self {
        match e {
            SourceError::Fetch(e) => CrawlError::Fetch(e),
            SourceError::Auth(e) => e.into(),
            SourceError::TokenExpired => CrawlError::AuthExpired(e.to_string()),
            SourceError::Api { code, ref message } if code == 401 || message.contains("登录") => {
                CrawlError::AuthExpired(e.to_string())
            }
            SourceError::Api { .. } => CrawlError::Fetch(FetchError::Blocked(e.to_string())),
            SourceError::UnknownCode(_) | SourceError::MissingParam(_) => {
                CrawlError::Validation(e.to_string())
            }
            SourceError::Parse(msg) => CrawlError::Parse(msg),
            SourceError::NotFound(msg) => CrawlError::Parse(msg),
        }
    }
}

/// 一次发现的结果
#[derive(Debug, Default)]
pub struct Discovery {
    /// 新发现的候选公告（待抓取详情）
    pub candidates: Vec<Announcement>,
    /// 页面上找到的条目总数（含已见过的）
    pub total_found: usize,
    pub pages_visited: usize,
    pub has_next_page: bool,
    /// 本次成功访问的后续分页，候选保存后再标记
    pub crawled_pages: Vec<String>,
    pub warnings: Vec<String>,
}

impl Discovery {
    /// 候选全部落库后，把本次访问的分页记入已抓取集合
    pub fn commit_pages(&self, crawled: &CrawledSet) {
        crawled.extend(&self.crawled_pages);
    }
}
