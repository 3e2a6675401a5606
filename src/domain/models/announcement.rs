// Copyright (c) 2025 Kirky.X
//
// Licensed under the MIT License
// See LICENSE file in the project root for full license information.

use super::article::Article;
use super::DomainError;
use crate::utils::text::{char_len, collapse_whitespace};
use crate::utils::url_utils::normalize_url;
use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

/// 公告正文的最小字符数，低于此值不予发布
pub const MIN_CONTENT_CHARS: usize = 50;

/// 公告实体
///
/// 一条招录公告的规范化记录。唯一性：(source_id, url)；
/// content_hash 用于跨来源去重。
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Announcement {
    pub id: Uuid,
    pub source_id: Uuid,
    pub url: String,
    /// 重定向解析后的最终URL
    pub final_url: Option<String>,
    pub title: String,
    pub content_text: String,
    pub content_html: String,
    pub publish_date: Option<NaiveDate>,
    pub region_code: Option<String>,
    pub exam_type_code: Option<String>,
    pub year: Option<i32>,
    /// 提供方侧的标识（粉笔文章ID等）
    pub external_id: Option<String>,
    pub attachments: Vec<Attachment>,
    pub content_hash: String,
    pub crawl_status: CrawlStatus,
    /// 内容与已有公告相同但URL不同时指向已有公告
    pub duplicate_of: Option<Uuid>,
    pub crawled_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// 公告抓取状态
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum CrawlStatus {
    /// 已发现，等待抓取详情
    #[default]
    PendingDetail,
    /// 已抓取正文
    Fetched,
    /// 已完成职位抽取
    Extracted,
    Failed,
}

impl fmt::Display for CrawlStatus {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            CrawlStatus::PendingDetail => write!(f, "pending_detail"),
            CrawlStatus::Fetched => write!(f, "fetched"),
            CrawlStatus::Extracted => write!(f, "extracted"),
            CrawlStatus::Failed => write!(f, "failed"),
        }
    }
}

impl FromStr for CrawlStatus {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending_detail" => Ok(CrawlStatus::PendingDetail),
            "fetched" => Ok(CrawlStatus::Fetched),
            "extracted" => Ok(CrawlStatus::Extracted),
            "failed" => Ok(CrawlStatus::Failed),
            other => Err(DomainError::UnknownValue(other.to_string())),
        }
    }
}

/// 公告附件
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Attachment {
    pub url: String,
    pub name: String,
    pub kind: AttachmentKind,
    /// 下载后的本地路径，抽取完成后删除
    pub local_path: Option<String>,
    pub bytes_hash: Option<String>,
}

/// 附件类型
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AttachmentKind {
    Pdf,
    Excel,
    Word,
    Image,
    Other,
}

impl AttachmentKind {
    /// 根据URL或文件名中的扩展名判断附件类型（大小写不敏感）
    pub fn from_url(url: &str) -> Self {
        let lower = url.to_lowercase();
        let path = lower.split(['?', '#']).next().unwrap_or_default();
        let ext = path.rsplit('.').next().unwrap_or_default();
        match ext {
            "pdf" => AttachmentKind::Pdf,
            "xls" | "xlsx" | "et" => AttachmentKind::Excel,
            "doc" | "docx" | "wps" => AttachmentKind::Word,
            "png" | "jpg" | "jpeg" | "gif" | "bmp" => AttachmentKind::Image,
            _ => {
                // 查询参数里的文件名，如 download.jsp?file=职位表.xlsx
                if lower.contains(".pdf") {
                    AttachmentKind::Pdf
                } else if lower.contains(".xls") {
                    AttachmentKind::Excel
                } else if lower.contains(".doc") {
                    AttachmentKind::Word
                } else {
                    AttachmentKind::Other
                }
            }
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            AttachmentKind::Pdf => "pdf",
            AttachmentKind::Excel => "excel",
            AttachmentKind::Word => "word",
            AttachmentKind::Image => "image",
            AttachmentKind::Other => "other",
        }
    }
}

impl Attachment {
    pub fn new(url: impl Into<String>, name: impl Into<String>) -> Self {
        let url = url.into();
        let kind = AttachmentKind::from_url(&url);
        Self {
            url,
            name: name.into(),
            kind,
            local_path: None,
            bytes_hash: None,
        }
    }
}

impl Announcement {
    /// 由候选文章创建待抓取详情的公告
    ///
    /// # 参数
    ///
    /// * `article` - 列表页或订阅源发现的候选文章
    ///
    /// # 返回值
    ///
    /// 返回状态为 PendingDetail 的公告
    pub fn from_article(article: &Article) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            source_id: article.source_id,
            url: normalize_url(&article.url),
            final_url: None,
            title: article.title.clone(),
            content_text: String::new(),
            content_html: String::new(),
            publish_date: article.publish_date,
            region_code: None,
            exam_type_code: None,
            year: None,
            external_id: article.external_id.clone(),
            attachments: Vec::new(),
            content_hash: String::new(),
            crawl_status: CrawlStatus::PendingDetail,
            duplicate_of: None,
            crawled_at: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// 发布前的有效性校验：标题非空且正文不少于50个字符
    pub fn validate(&self) -> Result<(), DomainError> {
        if self.title.trim().is_empty() {
            return Err(DomainError::ValidationError("empty title".to_string()));
        }
        let len = char_len(self.content_text.trim());
        if len < MIN_CONTENT_CHARS {
            return Err(DomainError::ValidationError(format!(
                "content too short: {} < {}",
                len, MIN_CONTENT_CHARS
            )));
        }
        Ok(())
    }

    /// 重新计算内容哈希
    pub fn refresh_content_hash(&mut self) {
        self.content_hash = content_hash(&self.content_text);
    }

    /// 下游使用的URL：优先最终URL
    pub fn effective_url(&self) -> &str {
        self.final_url.as_deref().unwrap_or(&self.url)
    }
}

/// 内容哈希
///
/// `hex(SHA-256(lowercase(collapse_ws(text))))`，对规范化文本确定
pub fn content_hash(text: &str) -> String {
    let normalized = collapse_whitespace(text).to_lowercase();
    let mut hasher = Sha256::new();
    hasher.update(normalized.as_bytes());
    hex::encode(hasher.finalize())
}
