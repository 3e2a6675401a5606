// Copyright (c) 2025 Kirky.X
//
// Licensed under the MIT License
// See LICENSE file in the project root for full license information.

use crate::domain::models::announcement::{Announcement, Attachment, CrawlStatus};
use crate::domain::models::selector_catalog::SelectorCatalog;
use crate::utils::text::{char_len, clean_text, find_date, parse_date, take_chars};
use crate::utils::url_utils::{normalize_url, resolve_url};
use chrono::{NaiveDate, Utc};
use ego_tree::NodeId;
use scraper::{ElementRef, Html, Node, Selector};
use std::collections::HashSet;
use tracing::debug;
use url::Url;

/// 日期正则在正文中的搜索范围（字符数）
const DATE_SCAN_CHARS: usize = 1000;

/// 公告页抽取结果
#[derive(Debug, Clone, PartialEq, Default)]
pub struct PageExtraction {
    pub title: String,
    pub content_text: String,
    /// 选中正文元素的原始HTML
    pub content_html: String,
    pub publish_date: Option<NaiveDate>,
    pub attachments: Vec<Attachment>,
}

impl PageExtraction {
    /// 把抽取结果写入公告，状态置为已抓取并刷新内容哈希
    pub fn apply_to(self, announcement: &mut Announcement) {
        if !self.title.is_empty() {
            announcement.title = self.title;
        }
        announcement.content_text = self.content_text;
        announcement.content_html = self.content_html;
        if self.publish_date.is_some() {
            announcement.publish_date = self.publish_date;
        }
        announcement.attachments = self.attachments;
        announcement.crawl_status = CrawlStatus::Fetched;
        announcement.crawled_at = Some(Utc::now());
        announcement.refresh_content_hash();
    }
}

const BLOCK_TAGS: [&str; 20] = [
    "p", "div", "br", "li", "tr", "table", "section", "article", "h1", "h2", "h3", "h4", "h5",
    "h6", "ul", "ol", "blockquote", "pre", "dd", "dt",
];

/// 剔除干扰元素后的文档视图
struct PageView<'a> {
    document: &'a Html,
    removed: HashSet<NodeId>,
}

impl<'a> PageView<'a> {
    fn new(document: &'a Html, catalog: &SelectorCatalog) -> Self {
        let mut removed = HashSet::new();
        for raw in &catalog.remove_selectors {
            if let Ok(selector) = Selector::parse(raw) {
                removed.extend(document.select(&selector).map(|el| el.id()));
            }
        }
        Self { document, removed }
    }

    fn is_removed(&self, element: &ElementRef) -> bool {
        self.removed.contains(&element.id())
            || element
                .ancestors()
                .any(|node| self.removed.contains(&node.id()))
    }

    /// 按选择器查找未被剔除的元素
    fn select(&self, raw: &str) -> Vec<ElementRef<'a>> {
        match Selector::parse(raw) {
            Ok(selector) => self
                .document
                .select(&selector)
                .filter(|el| !self.is_removed(el))
                .collect(),
            Err(_) => {
                debug!(selector = raw, "Invalid selector in catalog");
                Vec::new()
            }
        }
    }

    /// 元素的纯文本，块级元素之间换行，跳过被剔除的子树
    fn text_of(&self, element: ElementRef) -> String {
        let mut out = String::new();
        self.collect_text(element, &mut out);
        clean_text(&out)
    }

    fn collect_text(&self, element: ElementRef, out: &mut String) {
        for child in element.children() {
            match child.value() {
                Node::Text(text) => out.push_str(text),
                Node::Element(el) => {
                    if self.removed.contains(&child.id()) {
                        continue;
                    }
                    let Some(child_el) = ElementRef::wrap(child) else {
                        continue;
                    };
                    let name = el.name();
                    let block = BLOCK_TAGS.contains(&name);
                    if block {
                        out.push('\n');
                    }
                    self.collect_text(child_el, out);
                    if block {
                        out.push('\n');
                    } else if matches!(name, "td" | "th") {
                        out.push(' ');
                    }
                }
                _ => {}
            }
        }
    }
}

fn inline_text(element: &ElementRef) -> String {
    element
        .text()
        .collect::<String>()
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
}

fn extract_title(
    view: &PageView,
    catalog: &SelectorCatalog,
    fallback_title: &str,
) -> String {
    for raw in &catalog.title_selectors {
        if let Some(title) = view
            .select(raw)
            .iter()
            .map(inline_text)
            .find(|t| char_len(t) > 3)
        {
            return title;
        }
    }

    let page_title = view
        .select("title")
        .first()
        .map(inline_text)
        .unwrap_or_default();
    if !page_title.is_empty() {
        let cut = catalog
            .title_separators
            .iter()
            .filter_map(|sep| page_title.find(sep.as_str()))
            .min();
        match cut {
            Some(idx) if idx > 0 => {
                let head = page_title[..idx].trim();
                if char_len(head) > 3 {
                    return head.to_string();
                }
            }
            Some(_) => {}
            None => return page_title,
        }
    }
    fallback_title.trim().to_string()
}

fn extract_body<'a>(view: &PageView<'a>, catalog: &SelectorCatalog) -> (String, String) {
    for raw in &catalog.body_selectors {
        for element in view.select(raw) {
            let text = view.text_of(element);
            if char_len(&text) > catalog.min_body_chars {
                return (text, element.html());
            }
        }
    }
    match view.select("body").first() {
        Some(body) => (view.text_of(*body), body.html()),
        None => {
            let root = view.document.root_element();
            (view.text_of(root), root.html())
        }
    }
}

fn extract_date(view: &PageView, catalog: &SelectorCatalog) -> Option<NaiveDate> {
    for raw in &catalog.date_selectors {
        if let Some(date) = view.select(raw).iter().find_map(|el| {
            let text = inline_text(el);
            find_date(&text).or_else(|| el.value().attr("datetime").and_then(parse_date))
        }) {
            return Some(date);
        }
    }

    for name in &catalog.date_meta_names {
        let raw = format!("meta[name='{0}'], meta[property='{0}']", name);
        if let Some(date) = view.select(&raw).iter().find_map(|el| {
            el.value()
                .attr("content")
                .and_then(|c| parse_date(c).or_else(|| find_date(c)))
        }) {
            return Some(date);
        }
    }

    let body_text = view
        .select("body")
        .first()
        .map(|body| view.text_of(*body))
        .unwrap_or_default();
    find_date(take_chars(&body_text, DATE_SCAN_CHARS))
}

fn last_segment_name(url: &Url) -> String {
    let segment = url
        .path_segments()
        .and_then(|mut segments| segments.next_back())
        .unwrap_or_default();
    urlencoding::decode(segment)
        .map(|s| s.into_owned())
        .unwrap_or_else(|_| segment.to_string())
}

fn extract_attachments(view: &PageView, catalog: &SelectorCatalog, base: &Url) -> Vec<Attachment> {
    let mut seen = HashSet::new();
    let mut attachments = Vec::new();
    for anchor in view.select("a[href]") {
        let Some(href) = anchor.value().attr("href") else {
            continue;
        };
        let lower = href.to_lowercase();
        if !catalog
            .attachment_extensions
            .iter()
            .any(|ext| lower.contains(&ext.to_lowercase()))
        {
            continue;
        }
        let Ok(url) = resolve_url(base, href.trim()) else {
            continue;
        };
        let normalized = normalize_url(url.as_str());
        if !seen.insert(normalized.clone()) {
            continue;
        }
        let text = inline_text(&anchor);
        let name = if text.is_empty() {
            last_segment_name(&url)
        } else {
            text
        };
        attachments.push(Attachment::new(normalized, name));
    }
    attachments
}

/// 公告页抽取（第一遍）
///
/// 剔除脚本、导航等干扰元素后按目录中的选择器依次抽取标题、正文、发布日期与附件。
///
/// # 参数
///
/// * `html` - 详情页HTML
/// * `page_url` - 页面最终URL，用于解析相对链接
/// * `fallback_title` - 列表页上的候选标题，`<title>` 不可用时使用
/// * `catalog` - 选择器目录
pub fn extract_page(
    html: &str,
    page_url: &Url,
    fallback_title: &str,
    catalog: &SelectorCatalog,
) -> PageExtraction {
    let document = Html::parse_document(html);
    let view = PageView::new(&document, catalog);

    let title = extract_title(&view, catalog, fallback_title);
    let (content_text, content_html) = extract_body(&view, catalog);
    let publish_date = extract_date(&view, catalog);
    let attachments = extract_attachments(&view, catalog, page_url);

    PageExtraction {
        title,
        content_text,
        content_html,
        publish_date,
        attachments,
    }
}

#[cfg(test)]
#[path = "extraction_service_test.rs"]
mod tests;
