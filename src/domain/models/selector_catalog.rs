// Copyright (c) 2025 Kirky.X
//
// Licensed under the MIT License
// See LICENSE file in the project root for full license information.

use serde::{Deserialize, Serialize};
use std::path::Path;
use thiserror::Error;

/// 选择器目录加载错误
#[derive(Error, Debug)]
pub enum CatalogError {
    #[error("failed to read catalog: {0}")]
    Io(#[from] std::io::Error),
    #[error("invalid catalog: {0}")]
    Yaml(#[from] serde_yaml::Error),
}

fn strings(items: &[&str]) -> Vec<String> {
    items.iter().map(|s| s.to_string()).collect()
}

/// 启发式选择器目录
///
/// 列表页、公告页与微信文章使用的有序选择器和正则。代码只负责按序尝试，
/// 具体条目是数据，可由YAML文件整体或部分覆盖。
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct SelectorCatalog {
    /// 列表页兜底选择器
    pub list_fallbacks: Vec<String>,
    /// 下一页链接选择器
    pub next_page_selectors: Vec<String>,
    /// 下一页链接文本
    pub next_page_tokens: Vec<String>,
    /// 列表项标题最少字符数
    pub min_link_title_chars: usize,
    /// 公告页需剔除的元素
    pub remove_selectors: Vec<String>,
    pub title_selectors: Vec<String>,
    /// `<title>` 截断分隔符
    pub title_separators: Vec<String>,
    pub body_selectors: Vec<String>,
    /// 正文候选的最少字符数
    pub min_body_chars: usize,
    pub date_selectors: Vec<String>,
    /// 发布日期 meta 名称
    pub date_meta_names: Vec<String>,
    /// 附件扩展名
    pub attachment_extensions: Vec<String>,
    /// 反爬拦截页标记
    pub block_markers: Vec<String>,
    /// 仅靠JS渲染的页面标记
    pub js_only_markers: Vec<String>,
    /// 微信 biz 正则，按序尝试，第一个捕获组为结果
    pub biz_patterns: Vec<String>,
}

impl Default for SelectorCatalog {
    fn default() -> Self {
        Self {
            list_fallbacks: strings(&[
                ".list-item a",
                ".article-list a",
                ".news-list a",
                "ul.list li a",
                ".content-list a",
                "table.list a",
                ".zwlb a",
                ".list_con a",
            ]),
            next_page_selectors: strings(&[
                "a.next",
                ".pagination .next a",
                "a[class*='next']",
                ".page-next a",
                ".pager-next a",
            ]),
            next_page_tokens: strings(&["下一页", "下页", "»", ">", "Next"]),
            min_link_title_chars: 3,
            remove_selectors: strings(&[
                "script", "style", "nav", "header", "footer", "aside", ".sidebar", ".comment",
                ".ad",
            ]),
            title_selectors: strings(&[
                "h1",
                ".article-title",
                ".news-title",
                ".content-title",
                ".detail-title",
                "#title",
                ".title",
            ]),
            title_separators: strings(&[" - ", " | ", "_", "–"]),
            body_selectors: strings(&[
                "article",
                ".article-content",
                ".content",
                ".post-content",
                "#content",
                ".main-content",
                ".detail-content",
                ".news-content",
                ".zwContent",
                ".TRS_Editor",
                ".pages_content",
                ".content_txt",
                ".Custom_UnifyPageContent",
            ]),
            min_body_chars: 100,
            date_selectors: strings(&[
                ".publish-date",
                ".date",
                ".time",
                ".article-time",
                ".news-date",
                "time",
                ".pubdate",
                ".info-time",
            ]),
            date_meta_names: strings(&["publishdate", "article:published_time", "PubDate"]),
            attachment_extensions: strings(&[".pdf", ".xls", ".xlsx", ".doc", ".docx"]),
            block_markers: strings(&["环境异常", "去验证"]),
            js_only_markers: strings(&[
                "请开启JavaScript",
                "请启用JavaScript",
                "enable JavaScript",
                "JavaScript is required",
            ]),
            biz_patterns: strings(&[
                r#"window\.biz\s*=\s*["']([^"']+)["']"#,
                r#"var\s+__biz\s*=\s*["']([^"']+)["']"#,
                r#"__biz=([A-Za-z0-9+/=]+)"#,
                r#""biz"\s*:\s*"([^"]+)""#,
                r#"data-biz=["']([^"']+)["']"#,
            ]),
        }
    }
}

impl SelectorCatalog {
    /// 从YAML文件加载目录，未出现的字段使用内置默认值
    pub fn from_yaml_file(path: impl AsRef<Path>) -> Result<Self, CatalogError> {
        let content = std::fs::read_to_string(path)?;
        Self::from_yaml_str(&content)
    }

    pub fn from_yaml_str(content: &str) -> Result<Self, CatalogError> {
        Ok(serde_yaml::from_str(content)?)
    }

    /// 可选路径加载，未配置时返回内置目录
    pub fn load(path: Option<&str>) -> Result<Self, CatalogError> {
        match path {
            Some(p) => Self::from_yaml_file(p),
            None => Ok(Self::default()),
        }
    }

    /// 页面是否为反爬拦截页
    pub fn is_block_page(&self, body: &str) -> bool {
        self.block_markers.iter().any(|m| body.contains(m.as_str()))
    }

    /// 页面是否需要JS渲染
    pub fn is_js_only_page(&self, body: &str) -> bool {
        self.js_only_markers.iter().any(|m| body.contains(m.as_str()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_yaml_override_is_partial() {
        let yaml = "list_fallbacks:\n  - \".gl-list a\"\nmin_body_chars: 80\n";
        let catalog = SelectorCatalog::from_yaml_str(yaml).unwrap();
        assert_eq!(catalog.list_fallbacks, vec![".gl-list a".to_string()]);
        assert_eq!(catalog.min_body_chars, 80);
        assert_eq!(catalog.title_selectors[0], "h1");
        assert_eq!(catalog.next_page_tokens.len(), 5);
    }

    #[test]
    fn test_block_markers() {
        let catalog = SelectorCatalog::default();
        assert!(catalog.is_block_page("<p>当前环境异常，完成验证后即可继续访问</p>"));
        assert!(catalog.is_block_page("<a>去验证</a>"));
        assert!(!catalog.is_block_page("<p>正常页面</p>"));
    }
}
