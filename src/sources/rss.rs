// Copyright (c) 2025 Kirky.X
//
// Licensed under the MIT License
// See LICENSE file in the project root for full license information.

use super::list_monitor::CrawledSet;
use super::{Discovery, SourceError};
use crate::domain::models::announcement::Announcement;
use crate::domain::models::article::Article;
use crate::domain::models::source::Source;
use crate::engines::router::Fetcher;
use crate::engines::traits::FetchRequest;
use chrono::{DateTime, FixedOffset, NaiveDate, NaiveDateTime};
use once_cell::sync::Lazy;
use quick_xml::events::{BytesDecl, BytesEnd, BytesStart, BytesText, Event};
use quick_xml::{Reader, Writer};
use regex::Regex;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::HashSet;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument};

static IMG_SRC_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r#"<img[^>]+src=["']([^"']+)["']"#).unwrap());

/// 归一化后的订阅源
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ParsedFeed {
    pub title: String,
    pub link: String,
    pub description: String,
    pub icon_url: String,
    pub items: Vec<ParsedItem>,
}

/// 归一化后的订阅条目
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ParsedItem {
    pub guid: String,
    pub title: String,
    pub link: String,
    pub description: String,
    /// 正文HTML（`content:encoded` 或 Atom `content`），原样保留
    pub content: String,
    pub author: String,
    pub image_url: String,
    pub pub_date: Option<DateTime<FixedOffset>>,
}

/// 极简XML节点树
#[derive(Debug, Default)]
struct XmlNode {
    name: String,
    attrs: Vec<(String, String)>,
    text: String,
    children: Vec<XmlNode>,
}

impl XmlNode {
    fn child(&self, name: &str) -> Option<&XmlNode> {
        self.children.iter().find(|c| c.name == name)
    }

    fn children_named<'a>(&'a self, name: &'a str) -> impl Iterator<Item = &'a XmlNode> + 'a {
        self.children.iter().filter(move |c| c.name == name)
    }

    fn child_text(&self, name: &str) -> String {
        self.child(name)
            .map(|c| c.text.trim().to_string())
            .unwrap_or_default()
    }

    fn attr(&self, name: &str) -> Option<&str> {
        self.attrs
            .iter()
            .find(|(k, _)| k == name)
            .map(|(_, v)| v.as_str())
    }
}

fn element(start: &BytesStart) -> XmlNode {
    let attrs = start
        .attributes()
        .flatten()
        .map(|attr| {
            let key = String::from_utf8_lossy(attr.key.local_name().as_ref()).into_owned();
            // calamine enables quick-xml's `encoding` feature, which hides
            // `Attribute::unescape_value`; this is its UTF-8 equivalent.
            let value = std::str::from_utf8(&attr.value)
                .ok()
                .and_then(|s| quick_xml::escape::unescape(s).ok().map(|v| v.into_owned()))
                .unwrap_or_else(|| String::from_utf8_lossy(&attr.value).into_owned());
            (key, value)
        })
        .collect();
    XmlNode {
        name: String::from_utf8_lossy(start.local_name().as_ref()).into_owned(),
        attrs,
        ..Default::default()
    }
}

/// 解析为节点树，返回根元素（命名空间前缀被去掉）
fn parse_tree(content: &str) -> Result<XmlNode, SourceError> {
    let mut reader = Reader::from_str(content);
    reader.trim_text(true);

    let mut stack: Vec<XmlNode> = vec![XmlNode::default()];
    loop {
        match reader.read_event() {
            Ok(Event::Start(start)) => stack.push(element(&start)),
            Ok(Event::Empty(start)) => {
                let node = element(&start);
                if let Some(parent) = stack.last_mut() {
                    parent.children.push(node);
                }
            }
            Ok(Event::End(_)) => {
                if stack.len() > 1 {
                    if let Some(node) = stack.pop() {
                        if let Some(parent) = stack.last_mut() {
                            parent.children.push(node);
                        }
                    }
                }
            }
            Ok(Event::Text(text)) => {
                let value = text
                    .unescape()
                    .map(|v| v.into_owned())
                    .unwrap_or_else(|_| String::from_utf8_lossy(&text).into_owned());
                if let Some(node) = stack.last_mut() {
                    node.text.push_str(&value);
                }
            }
            Ok(Event::CData(data)) => {
                if let Some(node) = stack.last_mut() {
                    node.text.push_str(&String::from_utf8_lossy(&data));
                }
            }
            Ok(Event::Eof) => break,
            Ok(_) => {}
            Err(e) => {
                return Err(SourceError::Parse(format!(
                    "invalid XML at position {}: {}",
                    reader.buffer_position(),
                    e
                )))
            }
        }
    }

    stack
        .into_iter()
        .next()
        .and_then(|doc| doc.children.into_iter().next())
        .ok_or_else(|| SourceError::Parse("empty feed document".to_string()))
}

/// 解析发布时间
///
/// 支持 RFC1123(Z)、RFC3339(Nano) 及常见宽松格式；无时区的时间按北京时间处理
pub fn parse_pub_date(raw: &str) -> Option<DateTime<FixedOffset>> {
    let raw = raw.trim();
    if raw.is_empty() {
        return None;
    }
    if let Ok(dt) = DateTime::parse_from_rfc2822(raw) {
        return Some(dt);
    }
    if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
        return Some(dt);
    }
    if let Ok(dt) = DateTime::parse_from_str(raw, "%Y-%m-%dT%H:%M:%S%:z") {
        return Some(dt);
    }
    let utc = FixedOffset::east_opt(0)?;
    if let Ok(naive) = NaiveDateTime::parse_from_str(raw, "%Y-%m-%dT%H:%M:%SZ") {
        return naive.and_local_timezone(utc).single();
    }
    let shanghai = FixedOffset::east_opt(8 * 3600)?;
    if let Ok(naive) = NaiveDateTime::parse_from_str(raw, "%Y-%m-%d %H:%M:%S") {
        return naive.and_local_timezone(shanghai).single();
    }
    if let Ok(date) = NaiveDate::parse_from_str(raw, "%Y-%m-%d") {
        return date.and_hms_opt(0, 0, 0)?.and_local_timezone(shanghai).single();
    }
    debug!(date = raw, "Failed to parse feed date");
    None
}

/// 去掉残留的 CDATA 包裹并反转义
fn clean_html(raw: &str) -> String {
    if raw.is_empty() {
        return String::new();
    }
    let decoded = html_escape::decode_html_entities(raw);
    decoded
        .trim()
        .trim_start_matches("<![CDATA[")
        .trim_end_matches("]]>")
        .trim()
        .to_string()
}

fn fallback_guid(title: &str, pub_date: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(title.as_bytes());
    hasher.update(pub_date.as_bytes());
    hex::encode(hasher.finalize())
}

fn rss_image(item: &XmlNode, content: &str, description: &str) -> String {
    if let Some(enclosure) = item.child("enclosure") {
        if enclosure.attr("type").is_some_and(|t| t.starts_with("image/")) {
            if let Some(url) = enclosure.attr("url") {
                return url.to_string();
            }
        }
    }
    first_image(&[content, description])
}

fn first_image(fragments: &[&str]) -> String {
    fragments
        .iter()
        .find_map(|html| IMG_SRC_RE.captures(html).and_then(|c| c.get(1)))
        .map(|m| m.as_str().to_string())
        .unwrap_or_default()
}

fn from_rss(root: &XmlNode) -> Result<ParsedFeed, SourceError> {
    let channel = root
        .child("channel")
        .ok_or_else(|| SourceError::Parse("RSS feed without channel".to_string()))?;

    let mut feed = ParsedFeed {
        title: channel.child_text("title"),
        link: channel.child_text("link"),
        description: channel.child_text("description"),
        icon_url: channel
            .child("image")
            .map(|img| img.child_text("url"))
            .unwrap_or_default(),
        items: Vec::new(),
    };

    for item in channel.children_named("item") {
        let title = html_escape::decode_html_entities(&item.child_text("title")).into_owned();
        let link = item.child_text("link");
        let raw_date = item.child_text("pubDate");
        let description = clean_html(&item.child_text("description"));
        let content = clean_html(&item.child_text("encoded"));
        let guid = Some(item.child_text("guid"))
            .filter(|g| !g.is_empty())
            .or_else(|| Some(link.clone()).filter(|l| !l.is_empty()))
            .unwrap_or_else(|| fallback_guid(&title, &raw_date));
        let author = Some(item.child_text("author"))
            .filter(|a| !a.is_empty())
            .unwrap_or_else(|| item.child_text("creator"));

        feed.items.push(ParsedItem {
            image_url: rss_image(item, &content, &description),
            guid,
            title,
            link,
            description,
            content,
            author,
            pub_date: parse_pub_date(&raw_date),
        });
    }

    if feed.title.is_empty() && feed.items.is_empty() {
        return Err(SourceError::Parse("not a valid RSS feed".to_string()));
    }
    Ok(feed)
}

fn alternate_link(node: &XmlNode) -> String {
    node.children_named("link")
        .find(|l| matches!(l.attr("rel"), None | Some("") | Some("alternate")))
        .and_then(|l| l.attr("href"))
        .unwrap_or_default()
        .to_string()
}

fn from_atom(root: &XmlNode) -> Result<ParsedFeed, SourceError> {
    let mut feed = ParsedFeed {
        title: root.child_text("title"),
        link: alternate_link(root),
        description: root.child_text("subtitle"),
        icon_url: root.child_text("icon"),
        items: Vec::new(),
    };

    for entry in root.children_named("entry") {
        let published = entry.child_text("published");
        let raw_date = if published.is_empty() {
            entry.child_text("updated")
        } else {
            published
        };
        let content = clean_html(&entry.child_text("content"));
        let description = clean_html(&entry.child_text("summary"));
        feed.items.push(ParsedItem {
            guid: entry.child_text("id"),
            title: html_escape::decode_html_entities(&entry.child_text("title")).into_owned(),
            link: alternate_link(entry),
            author: entry
                .child("author")
                .map(|a| a.child_text("name"))
                .unwrap_or_default(),
            image_url: first_image(&[&content, &description]),
            description,
            content,
            pub_date: parse_pub_date(&raw_date),
        });
    }

    if feed.title.is_empty() && feed.items.is_empty() {
        return Err(SourceError::Parse("not a valid Atom feed".to_string()));
    }
    Ok(feed)
}

/// 解析 RSS 2.0 或 Atom
pub fn parse_feed(content: &str) -> Result<ParsedFeed, SourceError> {
    let root = parse_tree(content)?;
    match root.name.as_str() {
        "rss" => from_rss(&root),
        "feed" => from_atom(&root),
        other => Err(SourceError::Parse(format!(
            "failed to parse as RSS or Atom feed: root <{}>",
            other
        ))),
    }
}

fn write_text<W: std::io::Write>(
    writer: &mut Writer<W>,
    name: &str,
    text: &str,
) -> Result<(), quick_xml::Error> {
    writer.write_event(Event::Start(BytesStart::new(name)))?;
    writer.write_event(Event::Text(BytesText::new(text)))?;
    writer.write_event(Event::End(BytesEnd::new(name)))?;
    Ok(())
}

fn write_feed(feed: &ParsedFeed) -> Result<Vec<u8>, quick_xml::Error> {
    let mut writer = Writer::new_with_indent(Vec::new(), b' ', 2);
    writer.write_event(Event::Decl(BytesDecl::new("1.0", Some("utf-8"), None)))?;

    let mut rss = BytesStart::new("rss");
    rss.push_attribute(("version", "2.0"));
    rss.push_attribute(("xmlns:content", "http://purl.org/rss/1.0/modules/content/"));
    writer.write_event(Event::Start(rss))?;
    writer.write_event(Event::Start(BytesStart::new("channel")))?;
    write_text(&mut writer, "title", &feed.title)?;
    write_text(&mut writer, "link", &feed.link)?;
    write_text(&mut writer, "description", &feed.description)?;
    if !feed.icon_url.is_empty() {
        writer.write_event(Event::Start(BytesStart::new("image")))?;
        write_text(&mut writer, "url", &feed.icon_url)?;
        write_text(&mut writer, "title", &feed.title)?;
        write_text(&mut writer, "link", &feed.link)?;
        writer.write_event(Event::End(BytesEnd::new("image")))?;
    }

    for item in &feed.items {
        writer.write_event(Event::Start(BytesStart::new("item")))?;
        write_text(&mut writer, "title", &item.title)?;
        write_text(&mut writer, "link", &item.link)?;
        if !item.description.is_empty() {
            write_text(&mut writer, "description", &item.description)?;
        }
        if !item.content.is_empty() {
            write_text(&mut writer, "content:encoded", &item.content)?;
        }
        if !item.author.is_empty() {
            write_text(&mut writer, "author", &item.author)?;
        }
        let mut guid = BytesStart::new("guid");
        guid.push_attribute(("isPermaLink", "false"));
        writer.write_event(Event::Start(guid))?;
        writer.write_event(Event::Text(BytesText::new(&item.guid)))?;
        writer.write_event(Event::End(BytesEnd::new("guid")))?;
        if let Some(date) = item.pub_date {
            write_text(&mut writer, "pubDate", &date.to_rfc2822())?;
        }
        if !item.image_url.is_empty() {
            let mut enclosure = BytesStart::new("enclosure");
            enclosure.push_attribute(("url", item.image_url.as_str()));
            enclosure.push_attribute(("type", "image/jpeg"));
            writer.write_event(Event::Empty(enclosure))?;
        }
        writer.write_event(Event::End(BytesEnd::new("item")))?;
    }

    writer.write_event(Event::End(BytesEnd::new("channel")))?;
    writer.write_event(Event::End(BytesEnd::new("rss")))?;
    Ok(writer.into_inner())
}

/// 将订阅源序列化为 RSS 2.0
pub fn render_feed(feed: &ParsedFeed) -> Result<String, SourceError> {
    let bytes = write_feed(feed).map_err(|e| SourceError::Parse(e.to_string()))?;
    String::from_utf8(bytes).map_err(|e| SourceError::Parse(e.to_string()))
}

/// RSS/Atom 订阅适配器
pub struct RssSource {
    fetcher: Arc<Fetcher>,
    crawled: Arc<CrawledSet>,
}

impl RssSource {
    pub fn new(fetcher: Arc<Fetcher>, crawled: Arc<CrawledSet>) -> Self {
        Self { fetcher, crawled }
    }

    /// 抓取并解析订阅源
    pub async fn fetch_feed(
        &self,
        feed_url: &str,
        cancel: &CancellationToken,
    ) -> Result<ParsedFeed, SourceError> {
        let request = FetchRequest::get(feed_url)
            .header("Accept", "application/rss+xml, application/xml, text/xml, */*");
        let response = self.fetcher.fetch(&request, None, cancel).await?;
        parse_feed(&response.text())
    }

    /// 发现订阅源中的新条目
    #[instrument(skip(self, source, cancel), fields(source_id = %source.id))]
    pub async fn discover(
        &self,
        source: &Source,
        cancel: &CancellationToken,
    ) -> Result<Discovery, SourceError> {
        let feed = self.fetch_feed(&source.endpoint, cancel).await?;
        let mut discovery = Discovery {
            total_found: feed.items.len(),
            pages_visited: 1,
            ..Default::default()
        };
        let shanghai = FixedOffset::east_opt(8 * 3600);
        let mut seen = HashSet::new();

        for item in feed.items {
            if item.link.is_empty() || item.title.trim().is_empty() {
                discovery
                    .warnings
                    .push(format!("skipped feed item without link or title: {}", item.guid));
                continue;
            }
            if self.crawled.contains(&item.link) || !seen.insert(item.link.clone()) {
                continue;
            }
            let publish_date = match (item.pub_date, shanghai) {
                (Some(dt), Some(tz)) => Some(dt.with_timezone(&tz).date_naive()),
                _ => None,
            };
            let mut article =
                Article::new(source.id, &item.link, item.title.trim()).with_publish_date(publish_date);
            article.summary = (!item.description.is_empty()).then_some(item.description);
            article.external_id = Some(item.guid);
            discovery.candidates.push(Announcement::from_article(&article));
        }

        info!(
            feed = %feed.title,
            total = discovery.total_found,
            new_items = discovery.candidates.len(),
            "Parsed feed"
        );
        Ok(discovery)
    }
}
