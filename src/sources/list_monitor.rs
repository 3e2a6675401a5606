// Copyright (c) 2025 Kirky.X
//
// Licensed under the MIT License
// See LICENSE file in the project root for full license information.

use super::{Discovery, SourceError};
use crate::auth::cookies::SessionJar;
use crate::domain::models::announcement::Announcement;
use crate::domain::models::article::Article;
use crate::domain::models::selector_catalog::SelectorCatalog;
use crate::domain::models::source::Source;
use crate::engines::router::Fetcher;
use crate::engines::traits::FetchRequest;
use crate::utils::text::{char_len, collapse_whitespace, find_date};
use crate::utils::url_utils::{resolve_url, url_hash};
use chrono::NaiveDate;
use parking_lot::RwLock;
use scraper::{ElementRef, Html, Selector};
use std::collections::HashSet;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};
use url::Url;

/// 默认最多翻页数
pub const DEFAULT_MAX_PAGES: u32 = 5;

/// 已抓取URL集合（URL哈希）
///
/// 读多写少，用读写锁保护
#[derive(Debug, Default)]
pub struct CrawledSet {
    hashes: RwLock<HashSet<String>>,
}

impl CrawledSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn contains(&self, url: &str) -> bool {
        self.hashes.read().contains(&url_hash(url))
    }

    /// 标记为已抓取，返回是否为首次标记
    pub fn mark(&self, url: &str) -> bool {
        self.hashes.write().insert(url_hash(url))
    }

    /// 批量导入已知URL
    pub fn extend<I, S>(&self, urls: I)
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut hashes = self.hashes.write();
        hashes.extend(urls.into_iter().map(|u| url_hash(u.as_ref())));
    }

    pub fn len(&self) -> usize {
        self.hashes.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.hashes.read().is_empty()
    }
}

/// 单个列表页的解析结果
#[derive(Debug, Default)]
pub struct PageScan {
    pub articles: Vec<Article>,
    /// 命中的选择器
    pub selector: Option<String>,
    pub next_page: Option<String>,
}

/// 构造选择器阶梯
///
/// 配置了非 `a` 的选择器时先用它，再用兜底列表；否则先兜底列表，最后用 `a`
pub fn selector_ladder(configured: Option<&str>, catalog: &SelectorCatalog) -> Vec<String> {
    let configured = configured.map(str::trim).filter(|s| !s.is_empty());
    let mut ladder = Vec::with_capacity(catalog.list_fallbacks.len() + 1);
    match configured {
        Some(sel) if sel != "a" => {
            ladder.push(sel.to_string());
            ladder.extend(catalog.list_fallbacks.iter().cloned());
        }
        _ => {
            ladder.extend(catalog.list_fallbacks.iter().cloned());
            ladder.push("a".to_string());
        }
    }
    ladder
}

fn usable_href(href: &str) -> bool {
    let href = href.trim();
    !href.is_empty() && !href.starts_with('#') && !href.to_ascii_lowercase().starts_with("javascript:")
}

fn element_text(el: &ElementRef) -> String {
    collapse_whitespace(&el.text().collect::<String>())
}

fn sibling_date(el: &ElementRef) -> Option<NaiveDate> {
    let parent = el.parent().and_then(ElementRef::wrap)?;
    parent
        .children()
        .filter_map(ElementRef::wrap)
        .filter(|sib| sib.id() != el.id())
        .find_map(|sib| find_date(&element_text(&sib)))
}

/// 查找链接附近的发布日期：自身文本 → 父元素 → 兄弟元素
///
/// 兄弟元素也包括父元素的兄弟（表格中相邻的单元格）
fn nearby_date(anchor: &ElementRef) -> Option<NaiveDate> {
    if let Some(date) = find_date(&element_text(anchor)) {
        return Some(date);
    }
    let parent = anchor.parent().and_then(ElementRef::wrap)?;
    if let Some(date) = find_date(&element_text(&parent)) {
        return Some(date);
    }
    sibling_date(anchor).or_else(|| sibling_date(&parent))
}

fn collect_articles(
    document: &Html,
    selector: &Selector,
    page_url: &Url,
    source: &Source,
    min_title_chars: usize,
) -> Vec<Article> {
    let mut seen = HashSet::new();
    let mut articles = Vec::new();
    for anchor in document.select(selector) {
        let Some(href) = anchor.value().attr("href").filter(|h| usable_href(h)) else {
            continue;
        };
        let Ok(url) = resolve_url(page_url, href.trim()) else {
            continue;
        };
        if !matches!(url.scheme(), "http" | "https") {
            continue;
        }

        let mut title = element_text(&anchor);
        if title.is_empty() {
            title = anchor
                .value()
                .attr("title")
                .map(collapse_whitespace)
                .unwrap_or_default();
        }
        if char_len(&title) < min_title_chars {
            continue;
        }

        let article = Article::new(source.id, url.as_str(), title).with_publish_date(nearby_date(&anchor));
        if seen.insert(article.url_hash()) {
            articles.push(article);
        }
    }
    articles
}

fn find_next_page(
    document: &Html,
    page_url: &Url,
    configured: Option<&str>,
    catalog: &SelectorCatalog,
) -> Option<String> {
    let resolve = |href: &str| {
        usable_href(href)
            .then(|| resolve_url(page_url, href.trim()).ok())
            .flatten()
            .map(|u| u.to_string())
    };

    let selectors = configured
        .map(str::to_string)
        .into_iter()
        .chain(catalog.next_page_selectors.iter().cloned());
    for sel in selectors {
        let Ok(selector) = Selector::parse(&sel) else {
            continue;
        };
        // 第一个命中的元素决定结果
        if let Some(el) = document.select(&selector).next() {
            return el.value().attr("href").and_then(resolve);
        }
    }

    let anchors = Selector::parse("a[href]").ok()?;
    document.select(&anchors).find_map(|a| {
        let text = element_text(&a);
        catalog
            .next_page_tokens
            .iter()
            .any(|token| text.contains(token.as_str()))
            .then(|| a.value().attr("href").and_then(resolve))
            .flatten()
    })
}

/// 解析一个列表页：按选择器阶梯提取链接，并查找下一页
pub fn scan_page(html: &str, page_url: &Url, source: &Source, catalog: &SelectorCatalog) -> PageScan {
    let document = Html::parse_document(html);
    let selectors = source.selectors.clone().unwrap_or_default();

    let mut scan = PageScan::default();
    for sel in selector_ladder(selectors.list.as_deref(), catalog) {
        let Ok(selector) = Selector::parse(&sel) else {
            debug!(selector = %sel, "Skipping invalid list selector");
            continue;
        };
        let articles = collect_articles(
            &document,
            &selector,
            page_url,
            source,
            catalog.min_link_title_chars,
        );
        if !articles.is_empty() {
            scan.articles = articles;
            scan.selector = Some(sel);
            break;
        }
    }

    if selectors.pagination_pattern.is_none() {
        scan.next_page = find_next_page(&document, page_url, selectors.next_page.as_deref(), catalog);
    }
    scan
}

/// 按分页模板生成第2页起的URL
pub fn pattern_pages(pattern: &str, max_pages: u32) -> Vec<String> {
    if !pattern.contains("{page}") {
        return Vec::new();
    }
    (2..=max_pages)
        .map(|page| pattern.replace("{page}", &page.to_string()))
        .collect()
}

/// 列表页监控
pub struct ListMonitor {
    fetcher: Arc<Fetcher>,
    crawled: Arc<CrawledSet>,
}

impl ListMonitor {
    pub fn new(fetcher: Arc<Fetcher>, crawled: Arc<CrawledSet>) -> Self {
        Self { fetcher, crawled }
    }

    /// 访问列表页及其后续分页，返回未见过的候选公告
    ///
    /// 首页失败返回错误；后续分页失败记为警告。
    /// 这里只读已抓取集合，由调用方在候选保存成功后标记
    #[instrument(skip(self, source, jar, cancel), fields(source_id = %source.id))]
    pub async fn discover(
        &self,
        source: &Source,
        jar: Option<&SessionJar>,
        cancel: &CancellationToken,
    ) -> Result<Discovery, SourceError> {
        let selectors = source.selectors.clone().unwrap_or_default();
        let max_pages = selectors.max_pages.unwrap_or(DEFAULT_MAX_PAGES).max(1);
        let catalog = self.fetcher.catalog().clone();

        let mut pending: Vec<String> = match selectors.pagination_pattern.as_deref() {
            Some(pattern) => pattern_pages(pattern, max_pages).into_iter().rev().collect(),
            None => Vec::new(),
        };
        let mut next = Some(source.endpoint.clone());
        let mut discovery = Discovery::default();
        let mut visited = HashSet::new();
        let mut seen_articles = HashSet::new();

        while let Some(page_url) = next.take().or_else(|| pending.pop()) {
            if discovery.pages_visited as u32 >= max_pages {
                discovery.has_next_page = true;
                break;
            }
            if !visited.insert(url_hash(&page_url)) {
                continue;
            }
            let first = discovery.pages_visited == 0;
            if !first && self.crawled.contains(&page_url) {
                debug!(url = %page_url, "Next page already crawled");
                continue;
            }

            let response = match self
                .fetcher
                .fetch(&FetchRequest::get(page_url.as_str()), jar, cancel)
                .await
            {
                Ok(r) => r,
                Err(e) if first => return Err(e.into()),
                Err(e) => {
                    warn!(url = %page_url, error = %e, "Failed to visit list page");
                    discovery.warnings.push(format!("{}: {}", page_url, e));
                    continue;
                }
            };
            discovery.pages_visited += 1;
            if !first {
                discovery.crawled_pages.push(page_url.clone());
            }

            let base = Url::parse(&response.final_url)
                .or_else(|_| Url::parse(&page_url))
                .map_err(|e| SourceError::Parse(e.to_string()))?;
            let scan = scan_page(&response.text(), &base, source, &catalog);
            discovery.total_found += scan.articles.len();
            for article in scan.articles {
                let known = self.crawled.contains(&article.url);
                if !known && seen_articles.insert(url_hash(&article.url)) {
                    discovery.candidates.push(Announcement::from_article(&article));
                }
            }
            next = scan.next_page;
        }

        info!(
            total_found = discovery.total_found,
            new_articles = discovery.candidates.len(),
            pages = discovery.pages_visited,
            "List monitor crawl completed"
        );
        Ok(discovery)
    }
}
