// Copyright (c) 2025 Kirky.X
//
// Licensed under the MIT License
// See LICENSE file in the project root for full license information.

use super::fenbi_catalog::{exam_type_code_by_tag, exam_type_id, region_code_by_id, region_id};
use super::SourceError;
use crate::auth::cookies::SessionJar;
use crate::auth::fenbi_login::{api_headers, FENBI_API_QUERY, FENBI_EXAM_API_URL};
use crate::domain::models::announcement::Announcement;
use crate::domain::models::article::Article;
use crate::engines::router::Fetcher;
use crate::engines::traits::{FetchBody, FetchRequest};
use chrono::{DateTime, FixedOffset, NaiveDate};
use once_cell::sync::Lazy;
use regex::Regex;
use scraper::{Html, Selector};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument};
use uuid::Uuid;

/// 每页条数
pub const FENBI_PAGE_SIZE: usize = 15;
pub const FENBI_DETAIL_URL: &str = "https://www.fenbi.com/page/exam-information-detail";
pub const FENBI_LIST_URL: &str = "https://www.fenbi.com/page/exams-information-list";

const TAG_REGION: i64 = 1;
const TAG_EXAM_TYPE: i64 = 2;
const TAG_YEAR: i64 = 3;

static SHORT_URL_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"https?://t\.fenbi\.com/s/[A-Za-z0-9]+").unwrap());
static ORIGIN_PARAGRAPH_RES: Lazy<Vec<Regex>> = Lazy::new(|| {
    [
        r"原文网址[^<]*</[^>]+>[^<]*<[^>]+>[^<]*<[^>]+>[^<]*<p[^>]*>(https?://[^<]+)</p>",
        r"原文网址.*?<p[^>]*>(https?://[^<]+)</p>",
    ]
    .iter()
    .map(|p| Regex::new(p).unwrap())
    .collect()
});
static LABELLED_LINK_RES: Lazy<Vec<Regex>> = Lazy::new(|| {
    ["原文网址", "原文链接", "来源", "原文地址"]
        .iter()
        .map(|label| {
            Regex::new(&format!(r#"{}[：:]\s*<a[^>]*href=["']([^"']+)["']"#, label)).unwrap()
        })
        .collect()
});

/// 毫秒时间戳转上海日期（UTC+8）
pub fn issue_date(issue_time_ms: i64) -> Option<NaiveDate> {
    if issue_time_ms <= 0 {
        return None;
    }
    let shanghai = FixedOffset::east_opt(8 * 3600)?;
    DateTime::from_timestamp_millis(issue_time_ms).map(|t| t.with_timezone(&shanghai).date_naive())
}

/// 公告查询请求体
#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ExamQuery {
    pub district_id: String,
    pub exam_type: String,
    pub year: String,
    pub enroll_status: Option<i32>,
    pub recruit_num_code: Option<i32>,
    pub start: usize,
    pub len: usize,
    pub need_total: bool,
}

impl ExamQuery {
    /// 构造分页查询，`start = (page - 1) · 15`
    pub fn new(region: &str, exam_type: &str, year: i32, page: u32) -> Result<Self, SourceError> {
        let page = page.max(1) as usize;
        Ok(Self {
            district_id: region_id(region)?.unwrap_or_default().to_string(),
            exam_type: exam_type_id(exam_type)?.unwrap_or_default().to_string(),
            year: year.to_string(),
            enroll_status: None,
            recruit_num_code: None,
            start: (page - 1) * FENBI_PAGE_SIZE,
            len: FENBI_PAGE_SIZE,
            need_total: true,
        })
    }
}

#[derive(Debug, Deserialize)]
struct ExamResponse {
    code: i64,
    #[serde(default)]
    msg: String,
    #[serde(default)]
    data: Option<ExamData>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ExamData {
    #[serde(default)]
    stick_top_articles: Vec<ExamArticle>,
    #[serde(default)]
    articles: Vec<ExamArticle>,
    #[serde(default)]
    total: usize,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ExamArticle {
    id: i64,
    #[serde(default)]
    title: String,
    #[serde(default)]
    issue_time: i64,
    #[serde(default)]
    tags_list: Vec<ExamTag>,
}

#[derive(Debug, Clone, Deserialize)]
struct ExamTag {
    #[serde(default)]
    id: Option<i64>,
    #[serde(rename = "type")]
    kind: i64,
    #[serde(default)]
    name: String,
}

/// 一页查询结果
#[derive(Debug)]
pub struct FenbiPage {
    pub items: Vec<Announcement>,
    pub total: usize,
    pub current_page: u32,
    pub has_next_page: bool,
}

/// 详情页解析结果
#[derive(Debug, Clone, PartialEq)]
pub struct FenbiDetail {
    pub title: String,
    /// 原文链接（短链接或外部链接）
    pub original_url: Option<String>,
}

/// 解析查询接口响应
///
/// 置顶文章合并在普通文章之前并按ID去重；地区与考试类型由标签反查
pub fn parse_exam_response(
    body: &[u8],
    source_id: Uuid,
    region: &str,
    exam_type: &str,
    year: i32,
    page: u32,
    detail_base: &str,
) -> Result<FenbiPage, SourceError> {
    let response: ExamResponse =
        serde_json::from_slice(body).map_err(|e| SourceError::Parse(e.to_string()))?;
    if response.code != 1 {
        return Err(SourceError::Api {
            code: response.code,
            message: response.msg,
        });
    }
    let data = response.data.unwrap_or_default();

    let mut seen = HashSet::new();
    let mut items = Vec::new();
    for article in data.stick_top_articles.iter().chain(data.articles.iter()) {
        if !seen.insert(article.id) {
            continue;
        }
        let url = format!("{}/{}", detail_base.trim_end_matches('/'), article.id);
        let mut candidate = Article::new(source_id, &url, article.title.trim())
            .with_publish_date(issue_date(article.issue_time));
        candidate.external_id = Some(article.id.to_string());

        let mut announcement = Announcement::from_article(&candidate);
        announcement.region_code = non_all(region);
        announcement.exam_type_code = non_all(exam_type);
        announcement.year = Some(year);
        for tag in &article.tags_list {
            match tag.kind {
                TAG_REGION => {
                    let id = tag.id.map(|i| i.to_string()).unwrap_or_default();
                    if !id.is_empty() {
                        announcement.region_code = Some(region_code_by_id(&id));
                    }
                }
                TAG_EXAM_TYPE => {
                    let id = tag.id.map(|i| i.to_string());
                    announcement.exam_type_code =
                        Some(exam_type_code_by_tag(&tag.name, id.as_deref()));
                }
                TAG_YEAR => {
                    if let Ok(y) = tag.name.trim().parse::<i32>() {
                        announcement.year = Some(y);
                    }
                }
                _ => {}
            }
        }
        items.push(announcement);
    }

    let total_pages = data.total.div_ceil(FENBI_PAGE_SIZE);
    Ok(FenbiPage {
        items,
        total: data.total,
        current_page: page,
        has_next_page: (page as usize) < total_pages,
    })
}

fn non_all(code: &str) -> Option<String> {
    let code = code.trim();
    (!code.is_empty() && !code.eq_ignore_ascii_case("all")).then(|| code.to_string())
}

fn is_external(href: &str) -> bool {
    href.starts_with("http://") || href.starts_with("https://")
}

/// 从详情页HTML中查找原文链接
///
/// 依次尝试：短链接、`原文网址` 段落、文本含 原文/来源 的链接、
/// 带标签的链接、正文区域内的外部链接
pub fn find_original_link(html: &str) -> Option<String> {
    if let Some(m) = SHORT_URL_RE.find(html) {
        return Some(m.as_str().to_string());
    }

    for re in ORIGIN_PARAGRAPH_RES.iter() {
        if let Some(url) = re.captures(html).and_then(|c| c.get(1)) {
            let url = url.as_str().trim();
            if is_external(url) && !url.contains("www.fenbi.com") && !url.contains("fbstatic") {
                return Some(url.to_string());
            }
        }
    }

    let document = Html::parse_document(html);
    if let Ok(anchors) = Selector::parse("a[href]") {
        for a in document.select(&anchors) {
            let text: String = a.text().collect();
            let href = a.value().attr("href").unwrap_or_default();
            if (text.contains("原文") || text.contains("来源")) && is_external(href) {
                return Some(href.to_string());
            }
        }
    }

    for re in LABELLED_LINK_RES.iter() {
        if let Some(url) = re.captures(html).and_then(|c| c.get(1)) {
            if is_external(url.as_str()) {
                return Some(url.as_str().to_string());
            }
        }
    }

    if let Ok(content_links) =
        Selector::parse(".content a[href], .detail-content a[href], .article-content a[href]")
    {
        for a in document.select(&content_links) {
            let href = a.value().attr("href").unwrap_or_default();
            if is_external(href) && !href.contains("fenbi.com") {
                return Some(href.to_string());
            }
        }
    }
    None
}

fn detail_title(html: &str) -> String {
    let document = Html::parse_document(html);
    Selector::parse("h1, .detail-title, .title")
        .ok()
        .and_then(|s| document.select(&s).next().map(|e| e.text().collect::<String>()))
        .map(|t| t.trim().to_string())
        .unwrap_or_default()
}

/// 粉笔考试资讯适配器
pub struct FenbiSource {
    fetcher: Arc<Fetcher>,
    api_url: String,
    detail_base: String,
}

impl FenbiSource {
    pub fn new(fetcher: Arc<Fetcher>) -> Self {
        Self::with_endpoints(fetcher, FENBI_EXAM_API_URL, FENBI_DETAIL_URL)
    }

    pub fn with_endpoints(
        fetcher: Arc<Fetcher>,
        api_url: impl Into<String>,
        detail_base: impl Into<String>,
    ) -> Self {
        Self {
            fetcher,
            api_url: api_url.into(),
            detail_base: detail_base.into(),
        }
    }

    /// 详情页地址前缀，公告URL以此开头即为粉笔详情页
    pub fn detail_base(&self) -> &str {
        &self.detail_base
    }

    /// 查询一页公告
    ///
    /// # 参数
    ///
    /// * `source_id` - 粉笔数据源ID
    /// * `region` - 地区代码（如 `shaanxi`），`all` 不限
    /// * `exam_type` - 考试类型代码（如 `xuandiao`），`all` 不限
    /// * `year` - 年份
    /// * `page` - 页码，从1开始
    #[allow(clippy::too_many_arguments)]
    #[instrument(skip(self, jar, cancel))]
    pub async fn crawl_page(
        &self,
        source_id: Uuid,
        region: &str,
        exam_type: &str,
        year: i32,
        page: u32,
        jar: Option<&SessionJar>,
        cancel: &CancellationToken,
    ) -> Result<FenbiPage, SourceError> {
        let query = ExamQuery::new(region, exam_type, year, page)?;
        let payload =
            serde_json::to_value(&query).map_err(|e| SourceError::Parse(e.to_string()))?;
        let request = FetchRequest::post(
            format!("{}?{}", self.api_url, FENBI_API_QUERY),
            FetchBody::Json(payload),
        )
        .headers(api_headers("application/json"))
        .expect_json();

        let response = self.fetcher.fetch(&request, jar, cancel).await?;
        let page_result = parse_exam_response(
            &response.body,
            source_id,
            region,
            exam_type,
            year,
            page,
            &self.detail_base,
        )?;
        info!(
            total = page_result.total,
            items = page_result.items.len(),
            has_next = page_result.has_next_page,
            "Crawled Fenbi API page"
        );
        Ok(page_result)
    }

    /// 抓取详情页并提取原文链接
    #[instrument(skip(self, jar, cancel))]
    pub async fn fetch_detail(
        &self,
        detail_url: &str,
        jar: Option<&SessionJar>,
        cancel: &CancellationToken,
    ) -> Result<FenbiDetail, SourceError> {
        let request = FetchRequest::get(detail_url)
            .header(
                "Accept",
                "text/html,application/xhtml+xml,application/xml;q=0.9,image/webp,*/*;q=0.8",
            )
            .header("Referer", FENBI_LIST_URL);
        let response = self.fetcher.fetch(&request, jar, cancel).await?;
        let html = response.text();
        let detail = FenbiDetail {
            title: detail_title(&html),
            original_url: find_original_link(&html),
        };
        debug!(original_url = ?detail.original_url, "Parsed Fenbi detail page");
        Ok(detail)
    }
}
