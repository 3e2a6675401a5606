// Copyright (c) 2025 Kirky.X
//
// Licensed under the MIT License
// See LICENSE file in the project root for full license information.

use crate::utils::url_utils::{normalize_url, url_hash};
use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// 候选文章
///
/// 在列表页或订阅源中发现、尚未抓取详情的链接，以URL哈希为键。
/// 只有被提升为公告后才会持久化。
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Article {
    pub url: String,
    pub title: String,
    pub publish_date: Option<NaiveDate>,
    pub source_id: Uuid,
    pub discovered_at: DateTime<Utc>,
    /// 摘要（订阅源、公众号文章列表提供）
    pub summary: Option<String>,
    /// 提供方侧的标识（粉笔文章ID、公众号 aid、订阅源 GUID）
    pub external_id: Option<String>,
}

impl Article {
    pub fn new(source_id: Uuid, url: &str, title: impl Into<String>) -> Self {
        Self {
            url: normalize_url(url),
            title: title.into(),
            publish_date: None,
            source_id,
            discovered_at: Utc::now(),
            summary: None,
            external_id: None,
        }
    }

    pub fn with_publish_date(mut self, date: Option<NaiveDate>) -> Self {
        self.publish_date = date;
        self
    }

    /// URL哈希，列表页去重的键
    pub fn url_hash(&self) -> String {
        url_hash(&self.url)
    }
}
