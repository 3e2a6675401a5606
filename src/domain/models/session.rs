// Copyright (c) 2025 Kirky.X
//
// Licensed under the MIT License
// See LICENSE file in the project root for full license information.

use super::DomainError;
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// 需要登录的内容提供方
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Provider {
    Fenbi,
    Wechat,
}

impl Provider {
    pub fn as_str(&self) -> &'static str {
        match self {
            Provider::Fenbi => "fenbi",
            Provider::Wechat => "wechat",
        }
    }

    /// Cookie 需要安装到的全部域名
    pub fn cookie_domains(&self) -> &'static [&'static str] {
        match self {
            Provider::Fenbi => &["www.fenbi.com", "login.fenbi.com", "tiku.fenbi.com"],
            Provider::Wechat => &["mp.weixin.qq.com"],
        }
    }
}

impl fmt::Display for Provider {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Provider {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "fenbi" => Ok(Provider::Fenbi),
            "wechat" | "wechat_mp" | "weixin" => Ok(Provider::Wechat),
            other => Err(DomainError::UnknownValue(other.to_string())),
        }
    }
}

/// 提供方会话
///
/// 每个提供方一条，保存序列化的Cookie、令牌与有效期
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Session {
    pub provider: Provider,
    /// `name=value; name=value` 形式的Cookie串
    pub cookies: String,
    pub token: Option<String>,
    pub expires_at: DateTime<Utc>,
    pub last_validated_at: Option<DateTime<Utc>>,
    /// 最近一次校验的结论
    pub valid: bool,
    /// 登录后抓取的账号信息（昵称、fakeid 等）
    pub account: Option<serde_json::Value>,
    pub updated_at: DateTime<Utc>,
}

impl Session {
    /// 创建新的会话
    ///
    /// # 参数
    ///
    /// * `provider` - 提供方
    /// * `cookies` - Cookie串
    /// * `lifetime` - 有效时长
    pub fn new(provider: Provider, cookies: impl Into<String>, lifetime: Duration) -> Self {
        let now = Utc::now();
        Self {
            provider,
            cookies: cookies.into(),
            token: None,
            expires_at: now + lifetime,
            last_validated_at: None,
            valid: true,
            account: None,
            updated_at: now,
        }
    }

    pub fn with_token(mut self, token: Option<String>) -> Self {
        self.token = token;
        self
    }

    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at <= now
    }

    /// 发起认证请求前的本地检查：有Cookie、未过期、未被判定失效
    pub fn is_usable(&self, now: DateTime<Utc>) -> bool {
        self.valid && !self.cookies.trim().is_empty() && !self.is_expired(now)
    }

    pub fn invalidate(&mut self) {
        self.valid = false;
        self.updated_at = Utc::now();
    }

    pub fn mark_validated(&mut self, valid: bool) {
        let now = Utc::now();
        self.valid = valid;
        self.last_validated_at = Some(now);
        self.updated_at = now;
    }
}

/// 登录凭据
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Credential {
    pub provider: Provider,
    pub phone: String,
    pub password: String,
    pub updated_at: DateTime<Utc>,
}

impl Credential {
    pub fn new(provider: Provider, phone: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            provider,
            phone: phone.into(),
            password: password.into(),
            updated_at: Utc::now(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_expired_session_is_not_usable() {
        let mut session = Session::new(Provider::Fenbi, "sess=abc; userid=1", Duration::days(30));
        assert!(session.is_usable(Utc::now()));
        session.expires_at = Utc::now() - Duration::seconds(1);
        assert!(!session.is_usable(Utc::now()));
    }

    #[test]
    fn test_empty_or_invalidated_session_is_not_usable() {
        let empty = Session::new(Provider::Wechat, " ", Duration::hours(24));
        assert!(!empty.is_usable(Utc::now()));

        let mut invalid = Session::new(Provider::Wechat, "slave_sid=x", Duration::hours(24));
        invalid.invalidate();
        assert!(!invalid.is_usable(Utc::now()));
    }

    #[test]
    fn test_provider_parsing() {
        assert_eq!("Fenbi".parse::<Provider>().unwrap(), Provider::Fenbi);
        assert_eq!("wechat_mp".parse::<Provider>().unwrap(), Provider::Wechat);
        assert!("qq".parse::<Provider>().is_err());
    }
}
