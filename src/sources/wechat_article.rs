// Copyright (c) 2025 Kirky.X
//
// Licensed under the MIT License
// See LICENSE file in the project root for full license information.

use super::js_eval::ScriptEvaluator;
use super::SourceError;
use crate::auth::cookies::SessionJar;
use crate::domain::models::selector_catalog::SelectorCatalog;
use crate::engines::router::Fetcher;
use crate::engines::traits::{EscalationHint, FetchError, FetchRequest, FetchTier};
use crate::utils::url_utils::query_param;
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

pub const WECHAT_ARTICLE_HOST: &str = "mp.weixin.qq.com";

static OG_TITLE_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"<meta\s+property=["']og:title["']\s+content=["']([^"']+)["']"#).unwrap()
});
static TITLE_TAG_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)<title>([^<]+)</title>").unwrap());
static OG_AUTHOR_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"<meta\s+property=["']og:article:author["']\s+content=["']([^"']+)["']"#).unwrap()
});
static NICKNAME_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"var\s+nickname\s*=\s*(?:htmlDecode\()?["']([^"']+)["']"#).unwrap()
});
static NICK_NAME_FIELD_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r#"(?:nick_name|user_name)\s*[:=]\s*["']([^"']+)["']"#).unwrap());

/// biz 的获取方式
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExtractionMethod {
    UrlParam,
    Regex,
    JsEngine,
    Browser,
}

impl ExtractionMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            ExtractionMethod::UrlParam => "url_param",
            ExtractionMethod::Regex => "regex",
            ExtractionMethod::JsEngine => "js_engine",
            ExtractionMethod::Browser => "browser",
        }
    }
}

impl fmt::Display for ExtractionMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 公众号文章信息
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WechatArticleInfo {
    /// 公众号标识（base64）
    pub biz: String,
    pub title: String,
    /// 公众号名称
    pub author: String,
    pub article_url: String,
    pub method: ExtractionMethod,
}

/// 文章页元信息：标题与作者
pub fn page_meta(html: &str) -> (String, String) {
    let capture = |re: &Regex| {
        re.captures(html)
            .and_then(|c| c.get(1))
            .map(|m| html_escape::decode_html_entities(m.as_str().trim()).into_owned())
            .filter(|s| !s.is_empty())
    };
    let title = capture(&OG_TITLE_RE)
        .or_else(|| capture(&TITLE_TAG_RE))
        .unwrap_or_default();
    let author = capture(&OG_AUTHOR_RE)
        .or_else(|| capture(&NICKNAME_RE))
        .or_else(|| capture(&NICK_NAME_FIELD_RE))
        .unwrap_or_default();
    (title, author)
}

/// 按目录中的正则依次查找 biz
pub fn regex_biz(html: &str, catalog: &SelectorCatalog) -> Option<String> {
    catalog.biz_patterns.iter().find_map(|pattern| {
        let re = Regex::new(pattern).ok()?;
        re.captures(html)
            .and_then(|c| c.get(1))
            .map(|m| m.as_str().trim().to_string())
            .filter(|s| !s.is_empty())
    })
}

/// 校验公众号文章URL
pub fn validate_article_url(url: &str) -> Result<(), SourceError> {
    let host = crate::utils::url_utils::host_of(url)
        .ok_or_else(|| SourceError::Parse(format!("invalid URL: {}", url)))?;
    if host != WECHAT_ARTICLE_HOST {
        return Err(SourceError::Parse(format!("not a WeChat article URL: {}", url)));
    }
    Ok(())
}

/// 微信公众号文章适配器
///
/// biz 获取顺序：URL参数 → HTTP+正则 → 脚本引擎 → 无头浏览器，
/// 第一个非空结果生效。遇到验证页时跳过正则，脚本引擎仍在验证页上执行。
pub struct WechatArticleSource {
    fetcher: Arc<Fetcher>,
    evaluator: Option<Arc<dyn ScriptEvaluator>>,
}

impl WechatArticleSource {
    pub fn new(fetcher: Arc<Fetcher>) -> Self {
        Self {
            fetcher,
            evaluator: None,
        }
    }

    pub fn with_evaluator(mut self, evaluator: Arc<dyn ScriptEvaluator>) -> Self {
        self.evaluator = Some(evaluator);
        self
    }

    fn info(
        &self,
        biz: String,
        article_url: &str,
        html: Option<&str>,
        method: ExtractionMethod,
    ) -> WechatArticleInfo {
        let (title, author) = html.map(page_meta).unwrap_or_default();
        info!(biz = %biz, method = %method, title = %title, "Resolved WeChat article biz");
        WechatArticleInfo {
            biz,
            title,
            author,
            article_url: article_url.to_string(),
            method,
        }
    }

    /// 从HTTP层页面取 biz：正则，然后脚本引擎
    ///
    /// 验证页上只跑脚本引擎，元信息不取自验证页
    async fn biz_from_page(
        &self,
        html: &str,
        article_url: &str,
        blocked: bool,
    ) -> Option<WechatArticleInfo> {
        let page = (!blocked).then_some(html);
        if !blocked {
            if let Some(biz) = regex_biz(html, self.fetcher.catalog()) {
                return Some(self.info(biz, article_url, page, ExtractionMethod::Regex));
            }
        }
        let evaluator = self.evaluator.as_ref()?;
        match evaluator.eval_scripts_extract(html, "biz").await {
            Ok(Some(biz)) => Some(self.info(biz, article_url, page, ExtractionMethod::JsEngine)),
            Ok(None) => {
                debug!(blocked, "Script engine found no biz");
                None
            }
            Err(e) => {
                warn!(error = %e, "Script engine failed");
                None
            }
        }
    }

    /// 解析文章信息
    ///
    /// # 参数
    ///
    /// * `article_url` - `mp.weixin.qq.com` 文章链接（完整或 `/s/xxx` 短链）
    ///
    /// # 返回值
    ///
    /// 返回 biz、标题、作者以及获取方式
    #[instrument(skip(self, jar, cancel))]
    pub async fn fetch_info(
        &self,
        article_url: &str,
        jar: Option<&SessionJar>,
        cancel: &CancellationToken,
    ) -> Result<WechatArticleInfo, SourceError> {
        validate_article_url(article_url)?;
        let url_biz = query_param(article_url, "__biz");

        let request = FetchRequest::get(article_url)
            .header(
                "Accept",
                "text/html,application/xhtml+xml,application/xml;q=0.9,image/webp,*/*;q=0.8",
            )
            .header("Accept-Language", "zh-CN,zh;q=0.9,en;q=0.8")
            .hint(EscalationHint::Only(FetchTier::Http))
            .keep_block_page();

        let last_error = match self.fetcher.fetch(&request, jar, cancel).await {
            Ok(response) => {
                let block = self.fetcher.detect_block(&request, &response);
                let html = response.text();
                let page = block.is_none().then_some(html.as_str());
                if let Some(biz) = url_biz {
                    return Ok(self.info(biz, article_url, page, ExtractionMethod::UrlParam));
                }
                if let Some(info) = self.biz_from_page(&html, article_url, block.is_some()).await {
                    return Ok(info);
                }
                block.map(FetchError::Blocked)
            }
            Err(FetchError::Cancelled) => return Err(FetchError::Cancelled.into()),
            Err(e) => {
                if let Some(biz) = url_biz {
                    return Ok(self.info(biz, article_url, None, ExtractionMethod::UrlParam));
                }
                debug!(error = %e, "Plain fetch did not yield the article page");
                Some(e)
            }
        };

        if !self.fetcher.has_tier(FetchTier::Browser) {
            return Err(match last_error {
                Some(e) => e.into(),
                None => SourceError::NotFound(format!("biz not found in {}", article_url)),
            });
        }

        let request = FetchRequest::get(article_url)
            .hint(EscalationHint::Only(FetchTier::Browser))
            .browser_var("window.biz")
            .browser_var("document.title");
        let response = self.fetcher.fetch(&request, jar, cancel).await?;
        let html = response.text();
        let biz = response
            .vars
            .get("window.biz")
            .cloned()
            .or_else(|| regex_biz(&html, self.fetcher.catalog()))
            .ok_or_else(|| SourceError::NotFound(format!("biz not found in {}", article_url)))?;

        let mut info = self.info(biz, article_url, Some(&html), ExtractionMethod::Browser);
        if info.title.is_empty() {
            if let Some(title) = response.vars.get("document.title") {
                info.title = html_escape::decode_html_entities(title).into_owned();
            }
        }
        Ok(info)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::settings::FetcherSettings;
    use crate::engines::traits::{FetchEngine, FetchResponse};
    use crate::queue::limiter::DomainLimiter;
    use crate::sources::js_eval::BoaEvaluator;
    use crate::utils::url_utils::host_of;
    use async_trait::async_trait;
    use std::collections::HashMap;
    use std::time::Duration;

    /// 对任何URL都返回同一页面的HTTP层
    struct StaticPage(&'static str);

    #[async_trait]
    impl FetchEngine for StaticPage {
        async fn fetch(
            &self,
            request: &FetchRequest,
            _jar: Option<&SessionJar>,
            _cancel: &CancellationToken,
        ) -> Result<FetchResponse, FetchError> {
            let mut headers = HashMap::new();
            headers.insert("content-type".to_string(), "text/html; charset=utf-8".to_string());
            Ok(FetchResponse {
                status: 200,
                final_url: request.url.clone(),
                headers,
                body: bytes::Bytes::from_static(self.0.as_bytes()),
                tier: FetchTier::Http,
                vars: HashMap::new(),
                elapsed_ms: 1,
            })
        }

        fn tier(&self) -> FetchTier {
            FetchTier::Http
        }

        fn name(&self) -> &'static str {
            "static"
        }
    }

    fn source_serving(page: &'static str) -> WechatArticleSource {
        let fetcher = Fetcher::new(
            vec![Arc::new(StaticPage(page))],
            Arc::new(DomainLimiter::new(Duration::ZERO, Duration::from_secs(60))),
            Arc::new(SelectorCatalog::default()),
            &FetcherSettings::default(),
        );
        WechatArticleSource::new(Arc::new(fetcher)).with_evaluator(Arc::new(BoaEvaluator::default()))
    }

    const BLOCKED_WITH_SCRIPT: &str = r#"<html><head><title>验证</title>
        <script>var biz = "MzkxMjM0NTY3OA==";</script></head>
        <body><p>当前环境异常，完成验证后即可继续访问。</p><a>去验证</a></body></html>"#;

    const JS_ONLY_PAGE: &str = r#"<html><head>
        <meta property="og:title" content="Foo">
        <meta property="og:article:author" content="陕西人事考试">
        <script>var biz = "MzA1NDIzNDIxNA==";</script>
        </head><body><div id="js_content">正文</div></body></html>"#;

    #[test]
    fn test_regex_patterns_in_order() {
        let catalog = SelectorCatalog::default();
        let html = r#"<script>var __biz = "VAR_BIZ"; window.biz = "WINDOW_BIZ";</script>"#;
        assert_eq!(regex_biz(html, &catalog).as_deref(), Some("WINDOW_BIZ"));

        let html = r#"<a href="/s?__biz=MzI0NjE2OTA3MQ==&mid=1">x</a>"#;
        assert_eq!(regex_biz(html, &catalog).as_deref(), Some("MzI0NjE2OTA3MQ=="));

        let html = r#"<div data-biz="DATA_BIZ"></div>"#;
        assert_eq!(regex_biz(html, &catalog).as_deref(), Some("DATA_BIZ"));

        // 未加引号的 var 声明留给脚本引擎
        assert_eq!(regex_biz(JS_ONLY_PAGE, &catalog), None);
    }

    #[test]
    fn test_page_meta_unescapes() {
        let html = r#"<title> A &amp; B </title><script>var nickname = htmlDecode("人社&amp;考试");</script>"#;
        let (title, author) = page_meta(html);
        assert_eq!(title, "A & B");
        assert_eq!(author, "人社&考试");
    }

    #[test]
    fn test_rejects_non_wechat_url() {
        assert!(validate_article_url("https://example.com/s/abc").is_err());
        assert!(validate_article_url("https://mp.weixin.qq.com/s/abc").is_ok());
        assert_eq!(host_of("https://mp.weixin.qq.com/s/abc").as_deref(), Some(WECHAT_ARTICLE_HOST));
    }

    #[tokio::test]
    async fn test_script_engine_resolves_var_biz() {
        let biz = BoaEvaluator::default()
            .eval_scripts_extract(JS_ONLY_PAGE, "biz")
            .await
            .unwrap();
        assert_eq!(biz.as_deref(), Some("MzA1NDIzNDIxNA=="));
        let (title, author) = page_meta(JS_ONLY_PAGE);
        assert_eq!(title, "Foo");
        assert_eq!(author, "陕西人事考试");
    }

    #[tokio::test]
    async fn test_block_page_still_goes_through_script_engine() {
        let source = source_serving(BLOCKED_WITH_SCRIPT);
        let info = source
            .fetch_info("https://mp.weixin.qq.com/s/abcdef", None, &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(info.biz, "MzkxMjM0NTY3OA==");
        assert_eq!(info.method, ExtractionMethod::JsEngine);
        // 标题不取自验证页
        assert!(info.title.is_empty());
    }

    #[tokio::test]
    async fn test_block_page_without_script_reports_blocked() {
        let source = source_serving("<html><body><p>当前环境异常</p><a>去验证</a></body></html>");
        let err = source
            .fetch_info("https://mp.weixin.qq.com/s/abcdef", None, &CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, SourceError::Fetch(FetchError::Blocked(_))));
    }

    #[tokio::test]
    async fn test_regular_page_prefers_regex() {
        let source = source_serving(
            r#"<html><head><title>招录公告</title></head><body><p>正文</p>
            <script>window.biz = "MzA5OTg3NjU0Mw==";</script></body></html>"#,
        );
        let info = source
            .fetch_info("https://mp.weixin.qq.com/s/abcdef", None, &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(info.method, ExtractionMethod::Regex);
        assert_eq!(info.biz, "MzA5OTg3NjU0Mw==");
        assert_eq!(info.title, "招录公告");
    }
}
