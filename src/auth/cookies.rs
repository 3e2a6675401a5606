// Copyright (c) 2025 Kirky.X
//
// Licensed under the MIT License
// See LICENSE file in the project root for full license information.

use crate::domain::models::session::Provider;
use reqwest::cookie::{CookieStore, Jar};
use std::collections::BTreeMap;
use std::sync::Arc;
use url::Url;

/// 解析 `name=value; name=value` 形式的Cookie串
///
/// 分隔符两侧的空白被忽略，空片段与无名片段被丢弃，值中的 `=` 保留
pub fn parse_cookie_string(raw: &str) -> BTreeMap<String, String> {
    raw.split(';')
        .filter_map(|segment| {
            let segment = segment.trim();
            if segment.is_empty() {
                return None;
            }
            let (name, value) = segment.split_once('=').unwrap_or((segment, ""));
            let name = name.trim();
            if name.is_empty() {
                return None;
            }
            Some((name.to_string(), value.trim().to_string()))
        })
        .collect()
}

/// 序列化Cookie映射，按名称排序
pub fn serialize_cookies(cookies: &BTreeMap<String, String>) -> String {
    cookies
        .iter()
        .map(|(k, v)| format!("{}={}", k, v))
        .collect::<Vec<_>>()
        .join("; ")
}

/// 会话Cookie罐
///
/// 会话持有Cookie罐，抓取器每次调用时借用。内部 `Jar` 自带读写锁：
/// 登录与响应合并为写，每个外发请求为读。Cookie按域名隔离，
/// `set_cookies` 会安装到该会话的全部已知域名。
#[derive(Clone)]
pub struct SessionJar {
    jar: Arc<Jar>,
    domains: Arc<Vec<String>>,
}

impl std::fmt::Debug for SessionJar {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionJar")
            .field("domains", &self.domains)
            .finish()
    }
}

impl Default for SessionJar {
    fn default() -> Self {
        Self::new(Vec::new())
    }
}

impl SessionJar {
    /// 创建Cookie罐
    ///
    /// # 参数
    ///
    /// * `domains` - 已知域名（主机名），`set_cookies` 时逐一安装
    pub fn new(domains: Vec<String>) -> Self {
        Self {
            jar: Arc::new(Jar::default()),
            domains: Arc::new(domains),
        }
    }

    /// 使用提供方默认域名创建
    pub fn for_provider(provider: Provider) -> Self {
        Self::new(
            provider
                .cookie_domains()
                .iter()
                .map(|d| d.to_string())
                .collect(),
        )
    }

    pub fn jar(&self) -> Arc<Jar> {
        self.jar.clone()
    }

    pub fn domains(&self) -> &[String] {
        &self.domains
    }

    fn domain_url(domain: &str) -> Option<Url> {
        Url::parse(&format!("https://{}/", domain)).ok()
    }

    /// 解析Cookie串并安装到全部已知域名
    pub fn set_cookies(&self, raw: &str) {
        let cookies = parse_cookie_string(raw);
        for domain in self.domains.iter() {
            if let Some(url) = Self::domain_url(domain) {
                for (name, value) in &cookies {
                    self.jar
                        .add_cookie_str(&format!("{}={}; Path=/", name, value), &url);
                }
            }
        }
    }

    /// 合并单个响应中的Cookie
    pub fn add_cookie(&self, name: &str, value: &str, url: &Url) {
        self.jar
            .add_cookie_str(&format!("{}={}; Path=/", name, value), url);
    }

    /// 读取指定URL会携带的Cookie
    pub fn cookies_for(&self, url: &Url) -> BTreeMap<String, String> {
        self.jar
            .cookies(url)
            .and_then(|v| v.to_str().ok().map(parse_cookie_string))
            .unwrap_or_default()
    }

    /// 汇总全部已知域名下的Cookie
    pub fn cookie_map(&self) -> BTreeMap<String, String> {
        let mut merged = BTreeMap::new();
        for domain in self.domains.iter() {
            if let Some(url) = Self::domain_url(domain) {
                merged.extend(self.cookies_for(&url));
            }
        }
        merged
    }

    /// 完整Cookie串，用于持久化
    pub fn cookie_string(&self) -> String {
        serialize_cookies(&self.cookie_map())
    }

    pub fn cookie(&self, name: &str) -> Option<String> {
        self.cookie_map().remove(name).filter(|v| !v.is_empty())
    }

    pub fn is_empty(&self) -> bool {
        self.cookie_map().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_tolerates_whitespace_and_empty_segments() {
        let parsed = parse_cookie_string(" sess = abc ;; userid=42;  ; token=a=b ;=orphan");
        assert_eq!(parsed.len(), 3);
        assert_eq!(parsed["sess"], "abc");
        assert_eq!(parsed["userid"], "42");
        assert_eq!(parsed["token"], "a=b");
    }

    #[test]
    fn test_serialize_then_parse_round_trip() {
        let mut cookies = BTreeMap::new();
        cookies.insert("sess".to_string(), "s3cr3t".to_string());
        cookies.insert("userid".to_string(), "1001".to_string());
        cookies.insert("persistent".to_string(), "".to_string());
        assert_eq!(parse_cookie_string(&serialize_cookies(&cookies)), cookies);
    }

    #[test]
    fn test_set_cookies_installs_on_every_domain() {
        let jar = SessionJar::for_provider(Provider::Fenbi);
        jar.set_cookies("sess=abc; userid=7");

        for domain in Provider::Fenbi.cookie_domains() {
            let url = Url::parse(&format!("https://{}/api", domain)).unwrap();
            let cookies = jar.cookies_for(&url);
            assert_eq!(cookies.get("sess").map(String::as_str), Some("abc"));
        }
        assert_eq!(jar.cookie("userid").as_deref(), Some("7"));
        assert_eq!(jar.cookie_string(), "sess=abc; userid=7");

        let other = Url::parse("https://mp.weixin.qq.com/").unwrap();
        assert!(jar.cookies_for(&other).is_empty());
    }
}
