// Copyright (c) 2025 Kirky.X
//
// Licensed under the MIT License
// See LICENSE file in the project root for full license information.

use crate::auth::cookies::SessionJar;
use crate::utils::errors::ErrorKind;
use crate::utils::text_encoding::decode_bytes;
use async_trait::async_trait;
use bytes::Bytes;
use serde::de::DeserializeOwned;
use std::collections::HashMap;
use std::fmt;
use std::time::Duration;
use thiserror::Error;
use tokio_util::sync::CancellationToken;

/// 抓取错误类型
#[derive(Error, Debug)]
pub enum FetchError {
    /// 请求失败（连接、DNS、TLS握手等）
    #[error("Request failed: {0}")]
    RequestFailed(#[from] reqwest::Error),
    /// 非成功状态码
    #[error("HTTP status {status}")]
    Status {
        status: u16,
        retry_after: Option<Duration>,
    },
    /// 被WAF或反爬机制拦截
    #[error("Blocked: {0}")]
    Blocked(String),
    /// 超时
    #[error("Timeout")]
    Timeout,
    /// 已取消
    #[error("Cancelled")]
    Cancelled,
    /// 无头浏览器错误
    #[error("Browser error: {0}")]
    Browser(String),
    /// TLS 边车错误
    #[error("TLS sidecar error: {0}")]
    Sidecar(String),
    /// 非法URL
    #[error("Invalid url: {0}")]
    InvalidUrl(String),
}

impl FetchError {
    /// 错误分类
    ///
    /// 5xx、408、429 与网络层错误为瞬时错误，其余 4xx 为永久错误
    pub fn kind(&self) -> ErrorKind {
        match self {
            FetchError::RequestFailed(e) => {
                if e.is_builder() {
                    ErrorKind::Permanent
                } else if let Some(status) = e.status() {
                    classify_status(status.as_u16())
                } else {
                    ErrorKind::Transient
                }
            }
            FetchError::Status { status, .. } => classify_status(*status),
            FetchError::Blocked(_) => ErrorKind::Blocked,
            FetchError::Timeout => ErrorKind::Transient,
            FetchError::Cancelled => ErrorKind::Cancelled,
            FetchError::Browser(_) => ErrorKind::Transient,
            FetchError::Sidecar(_) => ErrorKind::Transient,
            FetchError::InvalidUrl(_) => ErrorKind::Permanent,
        }
    }

    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            FetchError::Status { retry_after, .. } => *retry_after,
            _ => None,
        }
    }

    pub fn is_rate_limited(&self) -> bool {
        matches!(self, FetchError::Status { status: 429, .. })
    }

    pub fn status(&self) -> Option<u16> {
        match self {
            FetchError::Status { status, .. } => Some(*status),
            FetchError::RequestFailed(e) => e.status().map(|s| s.as_u16()),
            _ => None,
        }
    }
}

fn classify_status(status: u16) -> ErrorKind {
    match status {
        408 | 429 => ErrorKind::Transient,
        500..=599 => ErrorKind::Transient,
        400..=499 => ErrorKind::Permanent,
        _ => ErrorKind::Permanent,
    }
}

/// 抓取阶梯层级，按升级顺序排列
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum FetchTier {
    /// 标准HTTP客户端
    Http,
    /// 浏览器级TLS指纹客户端
    TlsClient,
    /// 无头浏览器
    Browser,
}

impl FetchTier {
    pub const ALL: [FetchTier; 3] = [FetchTier::Http, FetchTier::TlsClient, FetchTier::Browser];

    pub fn as_str(&self) -> &'static str {
        match self {
            FetchTier::Http => "http",
            FetchTier::TlsClient => "tls_client",
            FetchTier::Browser => "browser",
        }
    }
}

impl fmt::Display for FetchTier {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 调用方给出的升级提示
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum EscalationHint {
    /// 由内容策略自动决定
    #[default]
    Auto,
    /// 从指定层级开始，失败后继续升级
    StartAt(FetchTier),
    /// 只使用指定层级
    Only(FetchTier),
}

/// 请求体
#[derive(Debug, Clone)]
pub enum FetchBody {
    Form(Vec<(String, String)>),
    Json(serde_json::Value),
    Raw { content_type: String, data: Bytes },
}

impl FetchBody {
    /// 表单编码后的字符串（TLS 边车需要）
    pub fn to_form_string(&self) -> Option<String> {
        match self {
            FetchBody::Form(pairs) => serde_urlencoded::to_string(pairs).ok(),
            FetchBody::Json(v) => Some(v.to_string()),
            FetchBody::Raw { data, .. } => Some(String::from_utf8_lossy(data).into_owned()),
        }
    }
}

/// 抓取请求
#[derive(Debug, Clone)]
pub struct FetchRequest {
    pub method: reqwest::Method,
    pub url: String,
    /// 有序请求头，顺序即发送顺序
    pub headers: Vec<(String, String)>,
    pub body: Option<FetchBody>,
    /// 最大重定向次数，0 表示不跟随
    pub max_redirects: Option<usize>,
    pub timeout: Option<Duration>,
    pub hint: EscalationHint,
    /// 期望JSON响应，返回HTML视为被拦截
    pub expect_json: bool,
    /// 为真时 4xx/5xx 作为响应返回而不是错误
    pub allow_error_status: bool,
    /// 浏览器层需要读取的页面变量，如 `window.biz`
    pub browser_vars: Vec<String>,
    /// 最后一层仍被拦截时把拦截页作为响应返回
    pub keep_block_page: bool,
}

impl FetchRequest {
    pub fn get(url: impl Into<String>) -> Self {
        Self {
            method: reqwest::Method::GET,
            url: url.into(),
            headers: Vec::new(),
            body: None,
            max_redirects: None,
            timeout: None,
            hint: EscalationHint::Auto,
            expect_json: false,
            allow_error_status: false,
            browser_vars: Vec::new(),
            keep_block_page: false,
        }
    }

    pub fn post(url: impl Into<String>, body: FetchBody) -> Self {
        Self {
            method: reqwest::Method::POST,
            body: Some(body),
            ..Self::get(url)
        }
    }

    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        let name = name.into();
        self.headers.retain(|(k, _)| !k.eq_ignore_ascii_case(&name));
        self.headers.push((name, value.into()));
        self
    }

    pub fn headers<I, K, V>(mut self, headers: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        for (k, v) in headers {
            self = self.header(k, v);
        }
        self
    }

    pub fn max_redirects(mut self, n: usize) -> Self {
        self.max_redirects = Some(n);
        self
    }

    pub fn no_redirects(self) -> Self {
        self.max_redirects(0)
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn hint(mut self, hint: EscalationHint) -> Self {
        self.hint = hint;
        self
    }

    pub fn expect_json(mut self) -> Self {
        self.expect_json = true;
        self
    }

    pub fn allow_error_status(mut self) -> Self {
        self.allow_error_status = true;
        self
    }

    pub fn keep_block_page(mut self) -> Self {
        self.keep_block_page = true;
        self
    }

    pub fn browser_var(mut self, expr: impl Into<String>) -> Self {
        self.browser_vars.push(expr.into());
        self
    }

    /// 查找请求头（大小写不敏感）
    pub fn header_value(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }
}

/// 抓取响应
#[derive(Debug, Clone)]
pub struct FetchResponse {
    /// HTTP状态码
    pub status: u16,
    /// 规范化后的最终URL
    pub final_url: String,
    /// 响应头（名称小写）
    pub headers: HashMap<String, String>,
    pub body: Bytes,
    /// 实际完成请求的层级
    pub tier: FetchTier,
    /// 浏览器层读取到的页面变量
    pub vars: HashMap<String, String>,
    /// 响应时间（毫秒）
    pub elapsed_ms: u64,
}

impl FetchResponse {
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(&name.to_ascii_lowercase()).map(String::as_str)
    }

    pub fn content_type(&self) -> Option<&str> {
        self.header("content-type")
    }

    /// 按声明或探测的字符集解码为文本
    pub fn text(&self) -> String {
        decode_bytes(&self.body, self.content_type())
    }

    pub fn json<T: DeserializeOwned>(&self) -> Result<T, serde_json::Error> {
        serde_json::from_slice(&self.body)
    }

    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    pub fn is_redirect(&self) -> bool {
        (300..400).contains(&self.status)
    }

    /// 是否为HTML响应（未声明类型时按内容判断）
    pub fn is_html(&self) -> bool {
        match self.content_type() {
            Some(ct) => ct.contains("html"),
            None => {
                let head = &self.body[..self.body.len().min(512)];
                let head = String::from_utf8_lossy(head).to_ascii_lowercase();
                head.contains("<html") || head.contains("<!doctype")
            }
        }
    }

    /// Retry-After 头（秒）
    pub fn retry_after(&self) -> Option<Duration> {
        self.header("retry-after")
            .and_then(|v| v.trim().parse::<u64>().ok())
            .map(Duration::from_secs)
    }
}

/// 抓取引擎特质
///
/// 每个实现对应阶梯中的一层。引擎本身无状态，会话Cookie通过参数传入。
#[async_trait]
pub trait FetchEngine: Send + Sync {
    /// 执行请求
    ///
    /// # 参数
    ///
    /// * `request` - 抓取请求
    /// * `jar` - 会话Cookie罐（可选）
    /// * `cancel` - 取消令牌
    ///
    /// # 返回值
    ///
    /// * `Ok(FetchResponse)` - 任意状态码的响应
    /// * `Err(FetchError)` - 传输层错误、超时或取消
    async fn fetch(
        &self,
        request: &FetchRequest,
        jar: Option<&SessionJar>,
        cancel: &CancellationToken,
    ) -> Result<FetchResponse, FetchError>;

    /// 引擎所在层级
    fn tier(&self) -> FetchTier;

    /// 引擎名称
    fn name(&self) -> &'static str;
}

/// 将响应头转换为小写键的映射
pub fn header_map(headers: &reqwest::header::HeaderMap) -> HashMap<String, String> {
    let mut out = HashMap::new();
    for (k, v) in headers {
        if let Ok(v) = v.to_str() {
            out.entry(k.as_str().to_ascii_lowercase())
                .and_modify(|existing: &mut String| {
                    existing.push_str(", ");
                    existing.push_str(v);
                })
                .or_insert_with(|| v.to_string());
        }
    }
    out
}
