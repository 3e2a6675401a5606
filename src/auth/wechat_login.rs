// Copyright (c) 2025 Kirky.X
//
// Licensed under the MIT License
// See LICENSE file in the project root for full license information.

use super::AuthError;
use crate::auth::cookies::SessionJar;
use crate::engines::router::Fetcher;
use crate::engines::traits::{FetchBody, FetchRequest};
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use chrono::Utc;
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::fmt;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

pub const WECHAT_MP_BASE_URL: &str = "https://mp.weixin.qq.com";
/// 二维码有效期（秒）
pub const QR_EXPIRES_IN_SECS: u64 = 300;
/// 小于该字节数的二维码响应视为错误页
const MIN_QR_BYTES: usize = 100;

static REDIRECT_TOKEN_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r#"token=([^&\s"']+)"#).unwrap());
pub static HOME_TOKEN_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"token=(\d+)").unwrap());
static NICKNAME_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r#"nickname\s*[:=]\s*["']([^"']+)["']"#).unwrap());
static FAKEID_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r#"fakeid\s*[:=]\s*["']([^"']+)["']"#).unwrap());

/// 公众平台接口通用请求头
pub fn mp_headers(referer: &str) -> Vec<(String, String)> {
    vec![
        (
            "Accept".to_string(),
            "application/json, text/javascript, */*; q=0.01".to_string(),
        ),
        (
            "Accept-Language".to_string(),
            "zh-CN,zh;q=0.9,en;q=0.8".to_string(),
        ),
        ("X-Requested-With".to_string(), "XMLHttpRequest".to_string()),
        ("Referer".to_string(), referer.to_string()),
    ]
}

/// 扫码登录状态
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LoginStatus {
    Waiting,
    Scanned,
    Confirmed,
    Cancelled,
    Expired,
    Error,
}

impl LoginStatus {
    /// 轮询接口状态码映射
    pub fn from_code(code: i64) -> Self {
        match code {
            2 | 4 => LoginStatus::Scanned,
            1 | 3 => LoginStatus::Confirmed,
            -1 => LoginStatus::Cancelled,
            _ => LoginStatus::Waiting,
        }
    }

    pub fn message(&self) -> &'static str {
        match self {
            LoginStatus::Waiting => "等待扫码",
            LoginStatus::Scanned => "已扫码，请在手机上确认",
            LoginStatus::Confirmed => "登录成功",
            LoginStatus::Cancelled => "用户取消登录",
            LoginStatus::Expired => "二维码已过期",
            LoginStatus::Error => "登录失败",
        }
    }

    pub fn is_final(&self) -> bool {
        !matches!(self, LoginStatus::Waiting | LoginStatus::Scanned)
    }
}

impl fmt::Display for LoginStatus {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let s = match self {
            LoginStatus::Waiting => "waiting",
            LoginStatus::Scanned => "scanned",
            LoginStatus::Confirmed => "confirmed",
            LoginStatus::Cancelled => "cancelled",
            LoginStatus::Expired => "expired",
            LoginStatus::Error => "error",
        };
        f.write_str(s)
    }
}

/// 登录二维码
#[derive(Debug, Clone, Serialize)]
pub struct QrCode {
    /// `data:image/{png|jpeg|gif};base64,...`
    pub qrcode_url: String,
    pub uuid: String,
    pub expires_in: u64,
    #[serde(skip)]
    pub fingerprint: String,
}

/// 轮询结果
#[derive(Debug, Clone, Serialize)]
pub struct PollResult {
    pub status: LoginStatus,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub token: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cookies: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub account_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub account_id: Option<String>,
}

impl PollResult {
    pub fn of(status: LoginStatus) -> Self {
        Self {
            status,
            message: status.message().to_string(),
            token: None,
            cookies: None,
            account_name: None,
            account_id: None,
        }
    }
}

#[derive(Debug, Default, Deserialize)]
pub struct BaseResp {
    #[serde(default)]
    pub ret: i64,
    #[serde(default)]
    pub err_msg: String,
}

#[derive(Debug, Deserialize)]
struct AskResponse {
    #[serde(default)]
    status: i64,
}

#[derive(Debug, Deserialize)]
struct BizLoginResponse {
    #[serde(default)]
    base_resp: BaseResp,
    #[serde(default)]
    redirect_url: String,
}

/// 每次登录尝试的随机串（纳秒时间戳）
fn nonce() -> String {
    Utc::now()
        .timestamp_nanos_opt()
        .unwrap_or_else(|| Utc::now().timestamp_micros() * 1000)
        .to_string()
}

/// 从跳转URL中提取 token
pub fn token_from_redirect(redirect_url: &str) -> Option<String> {
    REDIRECT_TOKEN_RE
        .captures(redirect_url)
        .and_then(|c| c.get(1))
        .map(|m| m.as_str().to_string())
}

/// 公众平台扫码登录
pub struct WechatLogin {
    base_url: String,
}

impl Default for WechatLogin {
    fn default() -> Self {
        Self::new(WECHAT_MP_BASE_URL)
    }
}

impl WechatLogin {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
        }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn home_referer(&self) -> String {
        format!("{}/", self.base_url)
    }

    /// 获取登录二维码
    ///
    /// 1. 访问首页建立会话Cookie
    /// 2. `startlogin` 携带本次尝试的 fingerprint
    /// 3. 拉取二维码图片（uuid 优先取Cookie）
    #[instrument(skip_all)]
    pub async fn get_qrcode(
        &self,
        fetcher: &Fetcher,
        jar: &SessionJar,
        cancel: &CancellationToken,
    ) -> Result<QrCode, AuthError> {
        let home = FetchRequest::get(self.home_referer()).allow_error_status();
        let response = fetcher.fetch(&home, Some(jar), cancel).await?;
        debug!(status = response.status, "MP home page visited");

        let fingerprint = nonce();
        let form = [
            ("fingerprint", fingerprint.as_str()),
            ("token", ""),
            ("lang", "zh_CN"),
            ("f", "json"),
            ("ajax", "1"),
            ("redirect_url", ""),
            ("login_type", "3"),
        ]
        .iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect();
        let start = FetchRequest::post(
            format!("{}/cgi-bin/bizlogin?action=startlogin", self.base_url),
            FetchBody::Form(form),
        )
        .headers(mp_headers(&self.home_referer()))
        .allow_error_status();
        fetcher.fetch(&start, Some(jar), cancel).await?;

        let uuid = jar.cookie("uuid").unwrap_or_else(nonce);
        let qr_url = format!(
            "{}/cgi-bin/scanloginqrcode?action=getqrcode&uuid={}&random={}",
            self.base_url,
            urlencoding::encode(&uuid),
            Utc::now().timestamp_millis()
        );
        let qr_request = FetchRequest::get(qr_url)
            .header("Referer", self.home_referer())
            .header(
                "Accept",
                "image/webp,image/apng,image/svg+xml,image/*,*/*;q=0.8",
            );
        let response = fetcher.fetch(&qr_request, Some(jar), cancel).await?;

        if response.body.len() < MIN_QR_BYTES {
            warn!(size = response.body.len(), "QR code response too small");
            return Err(AuthError::QrCode(format!(
                "response too small ({} bytes)",
                response.body.len()
            )));
        }

        let content_type = response.content_type().unwrap_or_default();
        let image_type = if content_type.contains("jpeg") || content_type.contains("jpg") {
            "jpeg"
        } else if content_type.contains("gif") {
            "gif"
        } else {
            "png"
        };
        info!(uuid = %uuid, size = response.body.len(), "QR code fetched");
        Ok(QrCode {
            qrcode_url: format!(
                "data:image/{};base64,{}",
                image_type,
                STANDARD.encode(&response.body)
            ),
            uuid,
            expires_in: QR_EXPIRES_IN_SECS,
            fingerprint,
        })
    }

    /// 轮询扫码状态，确认后完成登录并提取 token
    #[instrument(skip(self, fetcher, jar, cancel))]
    pub async fn poll(
        &self,
        fetcher: &Fetcher,
        jar: &SessionJar,
        fingerprint: &str,
        cancel: &CancellationToken,
    ) -> Result<PollResult, AuthError> {
        let url = format!(
            "{}/cgi-bin/scanloginqrcode?action=ask&fingerprint={}&lang=zh_CN&f=json&ajax=1",
            self.base_url,
            urlencoding::encode(fingerprint)
        );
        let request = FetchRequest::get(url)
            .headers(mp_headers(&self.home_referer()))
            .expect_json();
        let response = fetcher.fetch(&request, Some(jar), cancel).await?;
        let ask: AskResponse = response
            .json()
            .map_err(|e| AuthError::LoginFailed(format!("unexpected ask response: {}", e)))?;

        let status = LoginStatus::from_code(ask.status);
        if status != LoginStatus::Confirmed {
            return Ok(PollResult::of(status));
        }

        match self.complete_login(fetcher, jar, fingerprint, cancel).await {
            Ok(result) => Ok(result),
            Err(AuthError::LoginFailed(msg)) => {
                warn!("Completing MP login failed: {}", msg);
                let mut result = PollResult::of(LoginStatus::Error);
                result.message = format!("登录完成失败: {}", msg);
                Ok(result)
            }
            Err(e) => Err(e),
        }
    }

    async fn complete_login(
        &self,
        fetcher: &Fetcher,
        jar: &SessionJar,
        fingerprint: &str,
        cancel: &CancellationToken,
    ) -> Result<PollResult, AuthError> {
        let form = [
            ("userlang", "zh_CN"),
            ("redirect_url", ""),
            ("cookie_forbidden", "0"),
            ("cookie_cleaned", "0"),
            ("plugin_used", "0"),
            ("login_type", "3"),
            ("fingerprint", fingerprint),
            ("token", ""),
            ("lang", "zh_CN"),
            ("f", "json"),
            ("ajax", "1"),
        ]
        .iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect();
        let request = FetchRequest::post(
            format!("{}/cgi-bin/bizlogin?action=login", self.base_url),
            FetchBody::Form(form),
        )
        .headers(mp_headers(&self.home_referer()))
        .expect_json();
        let response = fetcher.fetch(&request, Some(jar), cancel).await?;
        let body: BizLoginResponse = response
            .json()
            .map_err(|e| AuthError::LoginFailed(format!("unexpected login response: {}", e)))?;
        if body.base_resp.ret != 0 {
            return Err(AuthError::LoginFailed(body.base_resp.err_msg));
        }

        let token = match token_from_redirect(&body.redirect_url) {
            Some(token) => Some(token),
            None => self.token_from_home(fetcher, jar, cancel).await?,
        };
        let Some(token) = token else {
            return Err(AuthError::LoginFailed("token not found".to_string()));
        };

        let (account_name, account_id) = self.account_info(fetcher, jar, &token, cancel).await;
        info!(account = ?account_name, "MP login confirmed");

        let mut result = PollResult::of(LoginStatus::Confirmed);
        result.token = Some(token);
        result.cookies = Some(jar.cookie_string());
        result.account_name = account_name;
        result.account_id = account_id;
        Ok(result)
    }

    /// 从后台首页正文中提取 token
    pub async fn token_from_home(
        &self,
        fetcher: &Fetcher,
        jar: &SessionJar,
        cancel: &CancellationToken,
    ) -> Result<Option<String>, AuthError> {
        let request = FetchRequest::get(format!(
            "{}/cgi-bin/home?t=home/index&lang=zh_CN",
            self.base_url
        ))
        .allow_error_status();
        let response = fetcher.fetch(&request, Some(jar), cancel).await?;
        let text = response.text();
        let from_body = HOME_TOKEN_RE
            .captures(&text)
            .and_then(|c| c.get(1))
            .map(|m| m.as_str().to_string());
        Ok(from_body.or_else(|| token_from_redirect(&response.final_url)))
    }

    /// 登录后读取账号昵称与 fakeid，失败时返回空
    async fn account_info(
        &self,
        fetcher: &Fetcher,
        jar: &SessionJar,
        token: &str,
        cancel: &CancellationToken,
    ) -> (Option<String>, Option<String>) {
        let request = FetchRequest::get(format!(
            "{}/cgi-bin/settingpage?t=setting/index&action=index&token={}&lang=zh_CN",
            self.base_url, token
        ))
        .allow_error_status();
        let Ok(response) = fetcher.fetch(&request, Some(jar), cancel).await else {
            return (None, None);
        };
        let text = response.text();
        let capture = |re: &Regex| {
            re.captures(&text)
                .and_then(|c| c.get(1))
                .map(|m| m.as_str().to_string())
        };
        (capture(&NICKNAME_RE), capture(&FAKEID_RE))
    }

    /// 主动探测会话：带 token 调用 `searchbiz`，`base_resp.ret == 0` 视为有效
    pub async fn probe(
        &self,
        fetcher: &Fetcher,
        jar: &SessionJar,
        token: &str,
        cancel: &CancellationToken,
    ) -> Result<bool, AuthError> {
        #[derive(Deserialize)]
        struct ProbeResponse {
            #[serde(default)]
            base_resp: Option<BaseResp>,
        }

        let request = FetchRequest::get(format!(
            "{}/cgi-bin/searchbiz?action=search_biz&begin=0&count=1&query=gwy&token={}&lang=zh_CN&f=json&ajax=1",
            self.base_url, token
        ))
        .headers(mp_headers(&self.home_referer()))
        .expect_json()
        .allow_error_status();
        let response = fetcher.fetch(&request, Some(jar), cancel).await?;
        Ok(response
            .json::<ProbeResponse>()
            .ok()
            .and_then(|r| r.base_resp)
            .is_some_and(|b| b.ret == 0))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_code_mapping() {
        assert_eq!(LoginStatus::from_code(0), LoginStatus::Waiting);
        assert_eq!(LoginStatus::from_code(2), LoginStatus::Scanned);
        assert_eq!(LoginStatus::from_code(4), LoginStatus::Scanned);
        assert_eq!(LoginStatus::from_code(1), LoginStatus::Confirmed);
        assert_eq!(LoginStatus::from_code(3), LoginStatus::Confirmed);
        assert_eq!(LoginStatus::from_code(-1), LoginStatus::Cancelled);
        assert_eq!(LoginStatus::from_code(99), LoginStatus::Waiting);
        assert!(LoginStatus::Cancelled.is_final());
        assert!(!LoginStatus::Scanned.is_final());
    }

    #[test]
    fn test_token_extraction() {
        assert_eq!(
            token_from_redirect("/cgi-bin/home?t=home/index&lang=zh_CN&token=123456789").as_deref(),
            Some("123456789")
        );
        assert_eq!(token_from_redirect("/cgi-bin/home"), None);
        let html = r#"<a href="/cgi-bin/appmsg?token=987654&lang=zh_CN">"#;
        assert_eq!(
            HOME_TOKEN_RE.captures(html).map(|c| c[1].to_string()).as_deref(),
            Some("987654")
        );
    }
}
