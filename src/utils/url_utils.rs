// Copyright (c) 2025 Kirky.X
//
// Licensed under the MIT License
// See LICENSE file in the project root for full license information.

use sha2::{Digest, Sha256};
use url::{ParseError, Url};

/// 将可能为相对路径的URL转换为绝对路径URL
pub fn resolve_url(base_url: &Url, path: &str) -> Result<Url, ParseError> {
    base_url.join(path)
}

/// 规范化URL
///
/// 去除显式的默认端口（HTTPS的443、HTTP的80）。部分WAF会拒绝
/// 带有显式默认端口的URL。无法解析的输入原样返回。
///
/// 该函数是幂等的：`normalize_url(normalize_url(s)) == normalize_url(s)`
pub fn normalize_url(raw: &str) -> String {
    let trimmed = raw.trim();
    let Ok(mut url) = Url::parse(trimmed) else {
        return trimmed.to_string();
    };

    // url crate already drops default ports on parse; this covers
    // schemes it does not know about plus explicit port rewrites.
    let default_port = match url.scheme() {
        "https" => Some(443),
        "http" => Some(80),
        _ => None,
    };
    if url.port().is_some() && url.port() == default_port {
        let _ = url.set_port(None);
    }

    let normalized = url.to_string();
    // Url::to_string appends "/" to a bare host; keep the caller's form
    if !trimmed.ends_with('/') && url.path() == "/" && url.query().is_none() && url.fragment().is_none()
    {
        return normalized.trim_end_matches('/').to_string();
    }
    normalized
}

/// 提取URL主机名，作为限流和调度的域名键
pub fn host_of(raw: &str) -> Option<String> {
    Url::parse(raw)
        .ok()
        .and_then(|u| u.host_str().map(|h| h.to_ascii_lowercase()))
}

/// URL哈希（SHA-256 十六进制）
pub fn url_hash(raw: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(normalize_url(raw).as_bytes());
    hex::encode(hasher.finalize())
}

/// 获取URL查询参数
pub fn query_param(raw: &str, name: &str) -> Option<String> {
    Url::parse(raw).ok().and_then(|u| {
        u.query_pairs()
            .find(|(k, _)| k == name)
            .map(|(_, v)| v.into_owned())
            .filter(|v| !v.is_empty())
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resolve_absolute_url() {
        let base = Url::parse("http://example.com/a/b").unwrap();
        let path = "http://t.co/c";
        assert_eq!(resolve_url(&base, path).unwrap().as_str(), "http://t.co/c");
    }

    #[test]
    fn test_resolve_relative_url() {
        let base = Url::parse("http://example.com/a/b").unwrap();
        assert_eq!(
            resolve_url(&base, "c").unwrap().as_str(),
            "http://example.com/a/c"
        );
        assert_eq!(
            resolve_url(&base, "/c").unwrap().as_str(),
            "http://example.com/c"
        );
    }

    #[test]
    fn test_normalize_strips_default_https_port() {
        assert_eq!(
            normalize_url("https://example.com:443/path"),
            "https://example.com/path"
        );
        assert_eq!(
            normalize_url("http://example.com:80/a?b=1"),
            "http://example.com/a?b=1"
        );
    }

    #[test]
    fn test_normalize_keeps_custom_port() {
        assert_eq!(
            normalize_url("https://example.com:8443/path"),
            "https://example.com:8443/path"
        );
        // 443 on plain http is not a default port
        assert_eq!(
            normalize_url("http://example.com:443/path"),
            "http://example.com:443/path"
        );
    }

    #[test]
    fn test_normalize_is_idempotent() {
        let inputs = [
            "https://example.com:443/path",
            "https://example.com:8443/path",
            "https://example.com:443",
            "https://example.com/",
            "http://job.snhrm.com:80/list?page=2#top",
            "not a url",
            "  https://Example.com:443/A  ",
        ];
        for input in inputs {
            let once = normalize_url(input);
            assert_eq!(normalize_url(&once), once, "input: {}", input);
        }
    }

    #[test]
    fn test_host_and_query_param() {
        assert_eq!(
            host_of("https://MP.weixin.qq.com/s?__biz=abc").as_deref(),
            Some("mp.weixin.qq.com")
        );
        assert_eq!(
            query_param("https://mp.weixin.qq.com/s?__biz=MzA1NDIz&mid=1", "__biz").as_deref(),
            Some("MzA1NDIz")
        );
        assert_eq!(query_param("https://mp.weixin.qq.com/s?__biz=", "__biz"), None);
    }
}
