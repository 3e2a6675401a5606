// Copyright (c) 2025 Kirky.X
//
// Licensed under the MIT License
// See LICENSE file in the project root for full license information.

use crate::auth::cookies::SessionJar;
use crate::config::settings::FetcherSettings;
use crate::engines::traits::{
    header_map, FetchBody, FetchEngine, FetchError, FetchRequest, FetchResponse, FetchTier,
};
use crate::utils::url_utils::normalize_url;
use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use reqwest::redirect::Policy;
use std::collections::HashMap;
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;

const DEFAULT_ACCEPT: &str =
    "text/html,application/xhtml+xml,application/xml;q=0.9,image/avif,image/webp,*/*;q=0.8";
const DEFAULT_ACCEPT_LANGUAGE: &str = "zh-CN,zh;q=0.9,en;q=0.8";

/// 标准HTTP抓取引擎
///
/// 基于reqwest实现，阶梯的第一层。每次请求构建独立的客户端，
/// Cookie由调用方传入的会话罐提供。
pub struct ReqwestEngine {
    user_agent: String,
    default_timeout: Duration,
    default_max_redirects: usize,
}

impl ReqwestEngine {
    pub fn new(settings: &FetcherSettings) -> Self {
        Self {
            user_agent: settings.user_agent.clone(),
            default_timeout: Duration::from_secs(settings.timeout_secs),
            default_max_redirects: settings.max_redirects,
        }
    }

    fn build_headers(&self, request: &FetchRequest) -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert(
            reqwest::header::ACCEPT,
            HeaderValue::from_static(DEFAULT_ACCEPT),
        );
        headers.insert(
            reqwest::header::ACCEPT_LANGUAGE,
            HeaderValue::from_static(DEFAULT_ACCEPT_LANGUAGE),
        );
        for (k, v) in &request.headers {
            if let (Ok(k), Ok(v)) = (
                HeaderName::from_bytes(k.as_bytes()),
                HeaderValue::from_str(v),
            ) {
                headers.insert(k, v);
            }
        }
        headers
    }
}

#[async_trait]
impl FetchEngine for ReqwestEngine {
    /// 执行HTTP请求
    ///
    /// # 参数
    ///
    /// * `request` - 抓取请求
    /// * `jar` - 会话Cookie罐
    /// * `cancel` - 取消令牌，触发时中止进行中的请求
    ///
    /// # 返回值
    ///
    /// * `Ok(FetchResponse)` - 抓取响应
    /// * `Err(FetchError)` - 抓取过程中出现的错误
    async fn fetch(
        &self,
        request: &FetchRequest,
        jar: Option<&SessionJar>,
        cancel: &CancellationToken,
    ) -> Result<FetchResponse, FetchError> {
        let url = url::Url::parse(&request.url)
            .map_err(|e| FetchError::InvalidUrl(format!("{}: {}", request.url, e)))?;

        let max_redirects = request.max_redirects.unwrap_or(self.default_max_redirects);
        let policy = if max_redirects == 0 {
            Policy::none()
        } else {
            Policy::limited(max_redirects)
        };

        let mut builder = reqwest::Client::builder()
            .user_agent(&self.user_agent)
            .timeout(request.timeout.unwrap_or(self.default_timeout))
            .redirect(policy);
        builder = match jar {
            Some(jar) => builder.cookie_provider(jar.jar()),
            None => builder.cookie_store(true),
        };
        let client = builder.build()?;

        let mut rb = client
            .request(request.method.clone(), url)
            .headers(self.build_headers(request));
        rb = match &request.body {
            Some(FetchBody::Form(pairs)) => rb.form(pairs),
            Some(FetchBody::Json(value)) => rb.json(value),
            Some(FetchBody::Raw { content_type, data }) => rb
                .header(reqwest::header::CONTENT_TYPE, content_type.as_str())
                .body(data.clone()),
            None => rb,
        };

        let start = Instant::now();
        let send = async {
            let response = rb.send().await.map_err(map_reqwest_error)?;
            let status = response.status().as_u16();
            let final_url = normalize_url(response.url().as_str());
            let headers = header_map(response.headers());
            let body = response.bytes().await.map_err(map_reqwest_error)?;
            Ok::<_, FetchError>((status, final_url, headers, body))
        };

        let (status, final_url, headers, body) = tokio::select! {
            _ = cancel.cancelled() => return Err(FetchError::Cancelled),
            result = send => result?,
        };

        Ok(FetchResponse {
            status,
            final_url,
            headers,
            body,
            tier: FetchTier::Http,
            vars: HashMap::new(),
            elapsed_ms: start.elapsed().as_millis() as u64,
        })
    }

    fn tier(&self) -> FetchTier {
        FetchTier::Http
    }

    /// 获取引擎名称
    fn name(&self) -> &'static str {
        "reqwest"
    }
}

fn map_reqwest_error(e: reqwest::Error) -> FetchError {
    if e.is_timeout() {
        FetchError::Timeout
    } else {
        FetchError::RequestFailed(e)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn engine() -> ReqwestEngine {
        ReqwestEngine::new(&FetcherSettings::default())
    }

    #[tokio::test]
    async fn test_sends_chrome_user_agent_and_session_cookies() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/page"))
            .and(header("cookie", "sess=abc"))
            .respond_with(
                ResponseTemplate::new(200)
                    .insert_header("content-type", "text/html; charset=utf-8")
                    .set_body_string("<html><body>招录公告</body></html>"),
            )
            .mount(&server)
            .await;

        let host = url::Url::parse(&server.uri()).unwrap();
        let jar = SessionJar::new(vec![format!(
            "{}:{}",
            host.host_str().unwrap(),
            host.port().unwrap()
        )]);
        jar.set_cookies("sess=abc");

        let response = engine()
            .fetch(
                &FetchRequest::get(format!("{}/page", server.uri())),
                Some(&jar),
                &CancellationToken::new(),
            )
            .await
            .unwrap();
        assert_eq!(response.status, 200);
        assert!(response.text().contains("招录公告"));
        assert_eq!(response.tier, FetchTier::Http);

        // UA 含逗号，按完整头值检查
        let requests = server.received_requests().await.unwrap();
        let user_agent = requests[0]
            .headers
            .iter()
            .find(|(name, _)| name.as_str().eq_ignore_ascii_case("user-agent"))
            .map(|(_, values)| values.iter().map(|v| v.as_str()).collect::<Vec<_>>().join(","))
            .unwrap_or_default();
        assert!(user_agent.contains("Chrome/"), "user-agent: {}", user_agent);
    }

    #[tokio::test]
    async fn test_no_redirects_returns_location() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/s/abc"))
            .respond_with(
                ResponseTemplate::new(302).insert_header("location", "/landing"),
            )
            .mount(&server)
            .await;

        let response = engine()
            .fetch(
                &FetchRequest::get(format!("{}/s/abc", server.uri())).no_redirects(),
                None,
                &CancellationToken::new(),
            )
            .await
            .unwrap();
        assert_eq!(response.status, 302);
        assert_eq!(response.header("location"), Some("/landing"));
    }

    #[tokio::test]
    async fn test_cancellation_aborts_request() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_delay(Duration::from_secs(5)))
            .mount(&server)
            .await;

        let cancel = CancellationToken::new();
        cancel.cancel();
        let result = engine()
            .fetch(&FetchRequest::get(server.uri()), None, &cancel)
            .await;
        assert!(matches!(result, Err(FetchError::Cancelled)));
    }
}
