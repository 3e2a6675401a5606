// Copyright (c) 2025 Kirky.X
//
// Licensed under the MIT License
// See LICENSE file in the project root for full license information.

use crate::auth::cookies::SessionJar;
use crate::config::settings::FetcherSettings;
use crate::engines::traits::{FetchEngine, FetchError, FetchRequest, FetchResponse, FetchTier};
use crate::utils::url_utils::normalize_url;
use async_trait::async_trait;
use bytes::Bytes;
use chromiumoxide::cdp::browser_protocol::network::CookieParam;
use chromiumoxide::{Browser, BrowserConfig, Page};
use futures::StreamExt;
use std::collections::HashMap;
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// 页面加载后等待脚本执行的时间
const SETTLE_DELAY: Duration = Duration::from_secs(2);

/// 无头浏览器引擎
///
/// 阶梯的最后一层。每次调用启动独立的Chromium子进程（或连接远程调试端点），
/// 在限定时间内执行页面，返回最终URL、HTML以及调用方指定的页面变量。
/// 超时或取消时子进程被终止。
pub struct BrowserEngine {
    user_agent: String,
    timeout: Duration,
    remote_debugging_url: Option<String>,
}

impl BrowserEngine {
    pub fn new(settings: &FetcherSettings) -> Self {
        Self {
            user_agent: settings.user_agent.clone(),
            timeout: Duration::from_secs(settings.browser_timeout_secs),
            remote_debugging_url: settings.remote_debugging_url.clone(),
        }
    }

    async fn open_browser(&self) -> Result<(Browser, tokio::task::JoinHandle<()>), FetchError> {
        let (browser, mut handler) = if let Some(ref url) = self.remote_debugging_url {
            info!("Connecting to remote Chrome instance at: {}", url);
            Browser::connect(url)
                .await
                .map_err(|e| FetchError::Browser(format!("connect failed: {}", e)))?
        } else {
            let config = BrowserConfig::builder()
                .no_sandbox()
                .request_timeout(self.timeout)
                .arg("--disable-gpu")
                .arg("--disable-dev-shm-usage")
                .build()
                .map_err(FetchError::Browser)?;
            Browser::launch(config)
                .await
                .map_err(|e| FetchError::Browser(format!("launch failed: {}", e)))?
        };

        // Spawn a handler to process browser events
        let handle = tokio::spawn(async move {
            while let Some(h) = handler.next().await {
                if h.is_err() {
                    break;
                }
            }
        });
        Ok((browser, handle))
    }

    async fn render(
        &self,
        browser: &Browser,
        request: &FetchRequest,
        jar: Option<&SessionJar>,
    ) -> Result<(Page, String, String, HashMap<String, String>), FetchError> {
        let page = browser
            .new_page("about:blank")
            .await
            .map_err(|e| FetchError::Browser(e.to_string()))?;
        page.set_user_agent(self.user_agent.as_str())
            .await
            .map_err(|e| FetchError::Browser(e.to_string()))?;

        if let (Some(jar), Ok(target)) = (jar, url::Url::parse(&request.url)) {
            let params: Vec<CookieParam> = jar
                .cookies_for(&target)
                .into_iter()
                .filter_map(|(name, value)| {
                    CookieParam::builder()
                        .name(name)
                        .value(value)
                        .url(target.as_str())
                        .build()
                        .ok()
                })
                .collect();
            if !params.is_empty() {
                page.set_cookies(params)
                    .await
                    .map_err(|e| FetchError::Browser(e.to_string()))?;
            }
        }

        page.goto(request.url.as_str())
            .await
            .map_err(|e| FetchError::Browser(e.to_string()))?;
        tokio::time::sleep(SETTLE_DELAY).await;

        let mut vars = HashMap::new();
        for expr in &request.browser_vars {
            let script = format!(
                "(() => {{ try {{ const v = {}; return v == null ? null : String(v); }} catch (e) {{ return null; }} }})()",
                expr
            );
            match page.evaluate(script).await {
                Ok(result) => {
                    if let Ok(Some(value)) = result.into_value::<Option<String>>() {
                        if !value.is_empty() {
                            vars.insert(expr.clone(), value);
                        }
                    }
                }
                Err(e) => debug!("Evaluating {} failed: {}", expr, e),
            }
        }

        let final_url = page
            .url()
            .await
            .map_err(|e| FetchError::Browser(e.to_string()))?
            .unwrap_or_else(|| request.url.clone());
        let content = page
            .content()
            .await
            .map_err(|e| FetchError::Browser(e.to_string()))?;
        Ok((page, final_url, content, vars))
    }
}

#[async_trait]
impl FetchEngine for BrowserEngine {
    /// 执行浏览器渲染抓取
    ///
    /// # 参数
    ///
    /// * `request` - 抓取请求，`browser_vars` 为需读取的页面变量表达式
    /// * `jar` - 会话Cookie罐，Cookie会注入页面
    /// * `cancel` - 取消令牌，触发时终止浏览器子进程
    ///
    /// # 返回值
    ///
    /// * `Ok(FetchResponse)` - 渲染后的页面
    /// * `Err(FetchError)` - 启动失败、超时或取消
    async fn fetch(
        &self,
        request: &FetchRequest,
        jar: Option<&SessionJar>,
        cancel: &CancellationToken,
    ) -> Result<FetchResponse, FetchError> {
        let start = Instant::now();
        let timeout = request.timeout.unwrap_or(self.timeout);
        let (mut browser, handler) = self.open_browser().await?;

        let outcome = tokio::select! {
            _ = cancel.cancelled() => Err(FetchError::Cancelled),
            result = tokio::time::timeout(timeout, self.render(&browser, request, jar)) => {
                result.unwrap_or(Err(FetchError::Timeout))
            }
        };

        let outcome = match outcome {
            Ok((page, final_url, content, vars)) => {
                if self.remote_debugging_url.is_some() {
                    let _ = page.close().await;
                }
                Ok((final_url, content, vars))
            }
            Err(e) => Err(e),
        };

        if self.remote_debugging_url.is_none() {
            if let Some(Err(e)) = browser.kill().await {
                warn!("Failed to kill browser process: {}", e);
            }
        }
        handler.abort();

        let (final_url, content, vars) = outcome?;
        Ok(FetchResponse {
            status: 200,
            final_url: normalize_url(&final_url),
            headers: HashMap::from([(
                "content-type".to_string(),
                "text/html; charset=utf-8".to_string(),
            )]),
            body: Bytes::from(content),
            tier: FetchTier::Browser,
            vars,
            elapsed_ms: start.elapsed().as_millis() as u64,
        })
    }

    fn tier(&self) -> FetchTier {
        FetchTier::Browser
    }

    /// 获取引擎名称
    fn name(&self) -> &'static str {
        "chromium"
    }
}
