// Copyright (c) 2025 Kirky.X
//
// Licensed under the MIT License
// See LICENSE file in the project root for full license information.

use crate::auth::cookies::SessionJar;
use crate::config::settings::FetcherSettings;
use crate::domain::models::selector_catalog::SelectorCatalog;
use crate::engines::circuit_breaker::CircuitBreaker;
use crate::engines::traits::{
    EscalationHint, FetchEngine, FetchError, FetchRequest, FetchResponse, FetchTier,
};
use crate::queue::limiter::DomainLimiter;
use crate::utils::url_utils::{host_of, normalize_url};
use metrics::counter;
use scraper::{Html, Selector};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

/// 短链接解析的最大跳转次数
pub const SHORT_URL_MAX_HOPS: usize = 10;

/// 抓取器
///
/// 按层级排列的回退阶梯：标准HTTP → 浏览器级TLS客户端 → 无头浏览器。
/// 根据调用方提示或响应内容（拦截页标记、空DOM、JSON接口返回HTML等）
/// 自动升级，每一层请求前都遵守域名级限流。
pub struct Fetcher {
    /// 引擎列表，按层级升序
    engines: Vec<Arc<dyn FetchEngine>>,
    /// 熔断器
    circuit_breaker: CircuitBreaker,
    limiter: Arc<DomainLimiter>,
    catalog: Arc<SelectorCatalog>,
    tls_domains: Vec<String>,
}

impl Fetcher {
    /// 创建新的抓取器
    ///
    /// # 参数
    ///
    /// * `engines` - 各层引擎，顺序无关
    /// * `limiter` - 域名级限流器
    /// * `catalog` - 选择器目录（拦截标记）
    /// * `settings` - 抓取器配置
    pub fn new(
        mut engines: Vec<Arc<dyn FetchEngine>>,
        limiter: Arc<DomainLimiter>,
        catalog: Arc<SelectorCatalog>,
        settings: &FetcherSettings,
    ) -> Self {
        engines.sort_by_key(|e| e.tier());
        Self {
            engines,
            circuit_breaker: CircuitBreaker::default(),
            limiter,
            catalog,
            tls_domains: settings
                .tls_domains
                .iter()
                .map(|d| d.to_ascii_lowercase())
                .collect(),
        }
    }

    pub fn limiter(&self) -> &Arc<DomainLimiter> {
        &self.limiter
    }

    /// 选择器目录，适配器与抽取器共享
    pub fn catalog(&self) -> &Arc<SelectorCatalog> {
        &self.catalog
    }

    pub fn has_tier(&self, tier: FetchTier) -> bool {
        self.engines.iter().any(|e| e.tier() == tier)
    }

    fn is_tls_domain(&self, host: &str) -> bool {
        self.tls_domains
            .iter()
            .any(|d| host == d || host.ends_with(&format!(".{}", d)))
    }

    /// 本次请求要尝试的引擎
    fn plan(&self, request: &FetchRequest, host: &str) -> Vec<Arc<dyn FetchEngine>> {
        let (from, only) = match request.hint {
            EscalationHint::Auto => {
                if self.is_tls_domain(host) {
                    (FetchTier::TlsClient, false)
                } else {
                    (FetchTier::Http, false)
                }
            }
            EscalationHint::StartAt(tier) => (tier, false),
            EscalationHint::Only(tier) => (tier, true),
        };
        self.engines
            .iter()
            .filter(|e| if only { e.tier() == from } else { e.tier() >= from })
            .cloned()
            .collect()
    }

    /// 执行请求
    ///
    /// # 参数
    ///
    /// * `request` - 抓取请求
    /// * `jar` - 会话Cookie罐
    /// * `cancel` - 取消令牌
    ///
    /// # 返回值
    ///
    /// * `Ok(FetchResponse)` - 成功的响应，最终URL已规范化
    /// * `Err(FetchError)` - 状态码错误、拦截（阶梯耗尽）、网络错误或取消
    ///
    /// 请求设置 `keep_block_page` 时，最后一层的拦截页作为 `Ok` 返回，
    /// 由调用方用 [`Fetcher::detect_block`] 自行判断
    #[instrument(skip(self, request, jar, cancel), fields(url = %request.url))]
    pub async fn fetch(
        &self,
        request: &FetchRequest,
        jar: Option<&SessionJar>,
        cancel: &CancellationToken,
    ) -> Result<FetchResponse, FetchError> {
        let host = host_of(&request.url)
            .ok_or_else(|| FetchError::InvalidUrl(request.url.clone()))?;
        let plan = self.plan(request, &host);
        if plan.is_empty() {
            return Err(FetchError::Blocked(format!(
                "no fetch tier available for {:?}",
                request.hint
            )));
        }

        let mut last_block: Option<String> = None;
        let last_index = plan.len() - 1;
        for (index, engine) in plan.iter().enumerate() {
            let breaker_key = format!("{}:{}", engine.tier(), host);
            if index < last_index && self.circuit_breaker.is_open(&breaker_key) {
                debug!("Skipping open circuit {}", breaker_key);
                continue;
            }
            if cancel.is_cancelled() {
                return Err(FetchError::Cancelled);
            }

            self.limiter.wait_turn(&host, cancel).await?;
            let tier = engine.tier().as_str();
            let mut response = match engine.fetch(request, jar, cancel).await {
                Ok(r) => r,
                Err(FetchError::Cancelled) => return Err(FetchError::Cancelled),
                Err(e) => {
                    counter!("fetch_requests_total", "tier" => tier, "outcome" => "error")
                        .increment(1);
                    self.circuit_breaker.record_failure(&breaker_key);
                    warn!(tier, error = %e, "Fetch failed");
                    return Err(e);
                }
            };

            if response.status == 429 {
                counter!("fetch_requests_total", "tier" => tier, "outcome" => "rate_limited")
                    .increment(1);
                let retry_after = response.retry_after();
                self.limiter.penalize(&host, retry_after);
                return Err(FetchError::Status {
                    status: 429,
                    retry_after,
                });
            }

            if let Some(reason) = self.detect_block(request, &response) {
                counter!("fetch_requests_total", "tier" => tier, "outcome" => "blocked")
                    .increment(1);
                self.circuit_breaker.record_failure(&breaker_key);
                if request.keep_block_page && index == last_index {
                    info!(tier, reason = %reason, "Response blocked, returning block page");
                    response.final_url = normalize_url(&response.final_url);
                    return Ok(response);
                }
                info!(tier, reason = %reason, "Response blocked, escalating");
                last_block = Some(reason);
                continue;
            }

            if response.status >= 400 && !request.allow_error_status {
                counter!("fetch_requests_total", "tier" => tier, "outcome" => "status_error")
                    .increment(1);
                // 服务端错误不代表该层不可用
                if response.status < 500 {
                    self.circuit_breaker.record_success(&breaker_key);
                }
                return Err(FetchError::Status {
                    status: response.status,
                    retry_after: response.retry_after(),
                });
            }

            counter!("fetch_requests_total", "tier" => tier, "outcome" => "ok").increment(1);
            self.circuit_breaker.record_success(&breaker_key);
            response.final_url = normalize_url(&response.final_url);
            return Ok(response);
        }

        Err(FetchError::Blocked(
            last_block.unwrap_or_else(|| "all fetch tiers exhausted".to_string()),
        ))
    }

    /// 根据响应内容判断是否被拦截
    ///
    /// 返回拦截原因：拦截页标记、JSON接口返回HTML、403/412 的HTML页面、
    /// 仅靠JS渲染的页面或空DOM
    pub fn detect_block(&self, request: &FetchRequest, response: &FetchResponse) -> Option<String> {
        if response.is_redirect() {
            return None;
        }
        let is_html = response.is_html();
        if !is_html && !request.expect_json {
            return None;
        }

        let text = response.text();
        if self.catalog.is_block_page(&text) {
            return Some("anti-bot verification page".to_string());
        }
        if request.expect_json {
            if serde_json::from_str::<serde_json::Value>(text.trim()).is_err() {
                return Some("non-JSON body for JSON endpoint".to_string());
            }
            return None;
        }
        if matches!(response.status, 403 | 412) {
            return Some(format!("WAF status {}", response.status));
        }
        if response.tier == FetchTier::Browser || !response.is_success() {
            return None;
        }
        if self.catalog.is_js_only_page(&text) {
            return Some("JavaScript-only page".to_string());
        }
        if is_empty_dom(&text) {
            return Some("empty DOM".to_string());
        }
        None
    }

    /// 解析短链接
    ///
    /// 逐跳跟随重定向（最多10次），返回最终URL；最终URL与原始URL相同时
    /// 视为非重定向，返回 `None`
    #[instrument(skip(self, jar, cancel))]
    pub async fn resolve_short_url(
        &self,
        url: &str,
        jar: Option<&SessionJar>,
        cancel: &CancellationToken,
    ) -> Result<Option<String>, FetchError> {
        let original = normalize_url(url);
        let mut current = original.clone();

        for _ in 0..SHORT_URL_MAX_HOPS {
            let request = FetchRequest::get(current.clone())
                .no_redirects()
                .allow_error_status()
                .hint(EscalationHint::Only(FetchTier::Http));
            let response = match self.fetch(&request, jar, cancel).await {
                Ok(r) => r,
                Err(FetchError::Cancelled) => return Err(FetchError::Cancelled),
                // 落地站点可能拒绝连接，已知的最后一跳即为结果
                Err(e) if current != original => {
                    debug!("Stopped following redirects at {}: {}", current, e);
                    break;
                }
                Err(e) => return Err(e),
            };

            if !response.is_redirect() {
                break;
            }
            let Some(location) = response.header("location") else {
                break;
            };
            let base = url::Url::parse(&current)
                .map_err(|e| FetchError::InvalidUrl(format!("{}: {}", current, e)))?;
            let next = base
                .join(location)
                .map_err(|e| FetchError::InvalidUrl(format!("{}: {}", location, e)))?;
            current = normalize_url(next.as_str());
        }

        if current == original {
            Ok(None)
        } else {
            Ok(Some(current))
        }
    }
}

/// `<body>` 中没有可见文本也没有图片/iframe
fn is_empty_dom(html: &str) -> bool {
    let document = Html::parse_document(html);
    let (Ok(body_sel), Ok(media_sel)) = (
        Selector::parse("body"),
        Selector::parse("img, iframe, embed, object"),
    ) else {
        return false;
    };
    let Some(body) = document.select(&body_sel).next() else {
        return true;
    };
    let has_text = body.text().any(|t| !t.trim().is_empty());
    !has_text && body.select(&media_sel).next().is_none()
}

#[cfg(test)]
impl Fetcher {
    /// 仅含标准HTTP层、无域名间隔的抓取器
    pub(crate) fn http_only_for_tests() -> Self {
        use crate::engines::reqwest_engine::ReqwestEngine;
        use std::time::Duration;

        let settings = FetcherSettings::default();
        let engine: Arc<dyn FetchEngine> = Arc::new(ReqwestEngine::new(&settings));
        Self::new(
            vec![engine],
            Arc::new(DomainLimiter::new(Duration::ZERO, Duration::from_secs(60))),
            Arc::new(SelectorCatalog::default()),
            &settings,
        )
    }
}

#[cfg(test)]
#[path = "router_test.rs"]
mod tests;
