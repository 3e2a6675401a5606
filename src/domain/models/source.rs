// Copyright (c) 2025 Kirky.X
//
// Licensed under the MIT License
// See LICENSE file in the project root for full license information.

use super::DomainError;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

/// 数据源实体
///
/// 运营人员配置的监控来源：列表页URL及可选选择器，或结构化提供方绑定
/// （粉笔地区+考试类型+年份、微信公众号 biz/fakeid、RSS订阅地址）。
/// 核心模块只读取数据源，从不创建。
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Source {
    pub id: Uuid,
    pub name: String,
    pub kind: SourceKind,
    /// 列表页URL、订阅地址或公众号文章URL
    pub endpoint: String,
    /// 针对该数据源的选择器覆盖
    pub selectors: Option<SourceSelectors>,
    /// 提供方绑定参数（粉笔 region/exam_type/year，微信 biz/fakeid 等）
    pub params: serde_json::Value,
    /// 抓取频率（秒）
    pub crawl_frequency_secs: i64,
    pub status: SourceStatus,
    pub last_crawled_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

/// 数据源类型
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceKind {
    /// 政府网站列表页
    ListPage,
    /// 粉笔考试资讯接口
    Fenbi,
    /// 微信公众号文章
    WechatArticle,
    /// 微信公众平台（需登录）
    WechatMp,
    /// RSS/Atom 订阅源
    Rss,
}

impl SourceKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            SourceKind::ListPage => "list_page",
            SourceKind::Fenbi => "fenbi",
            SourceKind::WechatArticle => "wechat_article",
            SourceKind::WechatMp => "wechat_mp",
            SourceKind::Rss => "rss",
        }
    }
}

impl fmt::Display for SourceKind {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SourceKind {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "list_page" => Ok(SourceKind::ListPage),
            "fenbi" => Ok(SourceKind::Fenbi),
            "wechat_article" => Ok(SourceKind::WechatArticle),
            "wechat_mp" => Ok(SourceKind::WechatMp),
            "rss" => Ok(SourceKind::Rss),
            other => Err(DomainError::UnknownValue(other.to_string())),
        }
    }
}

/// 数据源状态
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum SourceStatus {
    #[default]
    Active,
    Paused,
    Error,
}

impl fmt::Display for SourceStatus {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            SourceStatus::Active => write!(f, "active"),
            SourceStatus::Paused => write!(f, "paused"),
            SourceStatus::Error => write!(f, "error"),
        }
    }
}

impl FromStr for SourceStatus {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "active" => Ok(SourceStatus::Active),
            "paused" => Ok(SourceStatus::Paused),
            "error" => Ok(SourceStatus::Error),
            other => Err(DomainError::UnknownValue(other.to_string())),
        }
    }
}

/// 数据源级别的选择器覆盖
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct SourceSelectors {
    /// 列表项链接选择器
    pub list: Option<String>,
    /// 下一页链接选择器
    pub next_page: Option<String>,
    /// 分页URL模板，`{page}` 为页码占位符
    pub pagination_pattern: Option<String>,
    /// 最多翻页数
    pub max_pages: Option<u32>,
    pub title: Option<String>,
    pub body: Option<String>,
    pub date: Option<String>,
}

impl Source {
    /// 创建一个新的数据源
    ///
    /// # 参数
    ///
    /// * `name` - 数据源名称
    /// * `kind` - 数据源类型
    /// * `endpoint` - 入口地址
    ///
    /// # 返回值
    ///
    /// 返回状态为 Active 的数据源
    pub fn new(name: impl Into<String>, kind: SourceKind, endpoint: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            name: name.into(),
            kind,
            endpoint: endpoint.into(),
            selectors: None,
            params: serde_json::Value::Object(Default::default()),
            crawl_frequency_secs: 3600,
            status: SourceStatus::Active,
            last_crawled_at: None,
            created_at: Utc::now(),
        }
    }

    pub fn with_selectors(mut self, selectors: SourceSelectors) -> Self {
        self.selectors = Some(selectors);
        self
    }

    pub fn with_params(mut self, params: serde_json::Value) -> Self {
        self.params = params;
        self
    }

    /// 读取字符串类型的绑定参数
    pub fn param_str(&self, key: &str) -> Option<String> {
        self.params
            .get(key)
            .and_then(|v| match v {
                serde_json::Value::String(s) => Some(s.clone()),
                serde_json::Value::Number(n) => Some(n.to_string()),
                _ => None,
            })
            .filter(|s| !s.is_empty())
    }

    pub fn is_active(&self) -> bool {
        self.status == SourceStatus::Active
    }
}
