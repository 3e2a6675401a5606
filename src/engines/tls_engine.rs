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
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;
use tracing::debug;

/// 浏览器级TLS指纹引擎
///
/// 通过 FlareSolverr 兼容的边车服务发起请求，由边车完成与桌面版Chrome
/// 一致的 ClientHello 与 HTTP/2 伪首部顺序。用于 `job.snhrm.com` 这类
/// 基于TLS指纹拦截的站点。
pub struct TlsEngine {
    client: reqwest::Client,
    base_url: String,
    default_timeout: Duration,
}

#[derive(Serialize)]
struct SidecarRequest<'a> {
    cmd: &'static str,
    url: &'a str,
    #[serde(rename = "maxTimeout")]
    max_timeout: u64,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    cookies: Vec<SidecarCookie>,
    #[serde(rename = "postData", skip_serializing_if = "Option::is_none")]
    post_data: Option<String>,
}

#[derive(Serialize, Deserialize, Debug)]
struct SidecarCookie {
    name: String,
    value: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    domain: Option<String>,
}

#[derive(Deserialize, Debug)]
struct SidecarResponse {
    status: String,
    #[serde(default)]
    message: String,
    solution: Option<SidecarSolution>,
}

#[derive(Deserialize, Debug)]
struct SidecarSolution {
    url: String,
    status: u16,
    #[serde(default)]
    headers: serde_json::Value,
    #[serde(default)]
    response: String,
    #[serde(default)]
    cookies: Vec<SidecarCookie>,
}

impl TlsEngine {
    pub fn new(settings: &FetcherSettings) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: settings.tls_sidecar_url.clone(),
            default_timeout: Duration::from_secs(settings.timeout_secs),
        }
    }
}

#[async_trait]
impl FetchEngine for TlsEngine {
    async fn fetch(
        &self,
        request: &FetchRequest,
        jar: Option<&SessionJar>,
        cancel: &CancellationToken,
    ) -> Result<FetchResponse, FetchError> {
        let target = url::Url::parse(&request.url)
            .map_err(|e| FetchError::InvalidUrl(format!("{}: {}", request.url, e)))?;
        let start = Instant::now();
        let timeout = request.timeout.unwrap_or(self.default_timeout);

        let cookies = jar
            .map(|j| {
                j.cookies_for(&target)
                    .into_iter()
                    .map(|(name, value)| SidecarCookie {
                        name,
                        value,
                        domain: None,
                    })
                    .collect()
            })
            .unwrap_or_default();

        let (cmd, post_data) = if request.method == reqwest::Method::POST {
            (
                "request.post",
                Some(
                    request
                        .body
                        .as_ref()
                        .and_then(|b| b.to_form_string())
                        .unwrap_or_default(),
                ),
            )
        } else {
            ("request.get", None)
        };

        let body = SidecarRequest {
            cmd,
            url: target.as_str(),
            max_timeout: timeout.as_millis() as u64,
            cookies,
            post_data,
        };

        let call = async {
            let resp = self
                .client
                .post(&self.base_url)
                .timeout(timeout + Duration::from_secs(5))
                .json(&body)
                .send()
                .await
                .map_err(|e| FetchError::Sidecar(e.to_string()))?;
            resp.json::<SidecarResponse>()
                .await
                .map_err(|e| FetchError::Sidecar(format!("invalid sidecar response: {}", e)))
        };

        let sidecar = tokio::select! {
            _ = cancel.cancelled() => return Err(FetchError::Cancelled),
            result = call => result?,
        };

        if sidecar.status != "ok" {
            return Err(FetchError::Sidecar(sidecar.message));
        }
        let solution = sidecar
            .solution
            .ok_or_else(|| FetchError::Sidecar("sidecar returned no solution".to_string()))?;

        let final_url = normalize_url(&solution.url);
        if let (Some(jar), Ok(url)) = (jar, url::Url::parse(&final_url)) {
            for cookie in &solution.cookies {
                jar.add_cookie(&cookie.name, &cookie.value, &url);
            }
            debug!("Merged {} sidecar cookies", solution.cookies.len());
        }

        let mut headers = HashMap::new();
        if let serde_json::Value::Object(map) = solution.headers {
            for (k, v) in map {
                if let Some(s) = v.as_str() {
                    headers.insert(k.to_ascii_lowercase(), s.to_string());
                }
            }
        }

        Ok(FetchResponse {
            status: solution.status,
            final_url,
            headers,
            body: Bytes::from(solution.response),
            tier: FetchTier::TlsClient,
            vars: HashMap::new(),
            elapsed_ms: start.elapsed().as_millis() as u64,
        })
    }

    fn tier(&self) -> FetchTier {
        FetchTier::TlsClient
    }

    fn name(&self) -> &'static str {
        "tls_sidecar"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use wiremock::matchers::{body_partial_json, method};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn engine_for(server: &MockServer) -> TlsEngine {
        TlsEngine::new(&FetcherSettings {
            tls_sidecar_url: format!("{}/v1", server.uri()),
            ..FetcherSettings::default()
        })
    }

    #[tokio::test]
    async fn test_get_through_sidecar_merges_cookies() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(body_partial_json(json!({
                "cmd": "request.get",
                "url": "https://job.snhrm.com/notice/1.html"
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "status": "ok",
                "message": "",
                "solution": {
                    "url": "https://job.snhrm.com:443/notice/1.html",
                    "status": 200,
                    "headers": {"Content-Type": "text/html; charset=utf-8"},
                    "response": "<html><body>陕西省事业单位公开招聘公告</body></html>",
                    "cookies": [{"name": "acw_tc", "value": "xyz", "domain": "job.snhrm.com"}],
                    "userAgent": "Mozilla/5.0"
                }
            })))
            .mount(&server)
            .await;

        let jar = SessionJar::new(vec!["job.snhrm.com".to_string()]);
        let response = engine_for(&server)
            .fetch(
                &FetchRequest::get("https://job.snhrm.com/notice/1.html"),
                Some(&jar),
                &CancellationToken::new(),
            )
            .await
            .unwrap();

        assert_eq!(response.status, 200);
        assert_eq!(response.tier, FetchTier::TlsClient);
        assert_eq!(response.final_url, "https://job.snhrm.com/notice/1.html");
        assert!(response.text().contains("公开招聘"));
        assert_eq!(jar.cookie("acw_tc").as_deref(), Some("xyz"));
    }

    #[tokio::test]
    async fn test_sidecar_error_is_reported() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "status": "error",
                "message": "Error solving the challenge",
                "solution": null
            })))
            .mount(&server)
            .await;

        let result = engine_for(&server)
            .fetch(
                &FetchRequest::get("https://job.snhrm.com/"),
                None,
                &CancellationToken::new(),
            )
            .await;
        assert!(matches!(result, Err(FetchError::Sidecar(msg)) if msg.contains("challenge")));
    }
}
