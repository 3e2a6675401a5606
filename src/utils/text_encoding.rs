// Copyright (c) 2025 Kirky.X
//
// Licensed under the MIT License
// See LICENSE file in the project root for full license information.

use chardetng::EncodingDetector;
use encoding_rs::{Encoding, UTF_8};
use once_cell::sync::Lazy;
use regex::bytes::Regex;
use tracing::debug;

static META_CHARSET_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"(?i)<meta[^>]+charset\s*=\s*["']?\s*([a-zA-Z0-9_\-]+)"#).unwrap()
});

/// 从Content-Type头中提取charset
pub fn charset_from_content_type(content_type: &str) -> Option<&'static Encoding> {
    content_type
        .split(';')
        .filter_map(|part| part.trim().strip_prefix("charset="))
        .find_map(|label| Encoding::for_label(label.trim_matches('"').as_bytes()))
}

/// 将响应字节解码为UTF-8文本
///
/// 解码顺序：BOM → Content-Type charset → HTML meta charset → UTF-8校验 → chardetng 检测。
/// 政府网站常见 GBK/GB2312 页面未声明编码，最后一步负责兜底。
///
/// # 参数
///
/// * `bytes` - 原始响应体
/// * `content_type` - 响应的Content-Type头（可选）
///
/// # 返回值
///
/// 解码后的字符串，非法字节被替换为U+FFFD
pub fn decode_bytes(bytes: &[u8], content_type: Option<&str>) -> String {
    if let Some((encoding, bom_len)) = Encoding::for_bom(bytes) {
        let (text, _) = encoding.decode_without_bom_handling(&bytes[bom_len..]);
        return text.into_owned();
    }

    if let Some(encoding) = content_type.and_then(charset_from_content_type) {
        let (text, _, _) = encoding.decode(bytes);
        return text.into_owned();
    }

    let head = &bytes[..bytes.len().min(2048)];
    if let Some(encoding) = META_CHARSET_RE
        .captures(head)
        .and_then(|c| c.get(1))
        .and_then(|m| Encoding::for_label(m.as_bytes()))
    {
        let (text, _, _) = encoding.decode(bytes);
        return text.into_owned();
    }

    if let Ok(text) = std::str::from_utf8(bytes) {
        return text.to_string();
    }

    let mut detector = EncodingDetector::new();
    detector.feed(bytes, true);
    let encoding = detector.guess(Some(b"cn".as_slice()), true);
    debug!("Detected encoding {} for undeclared body", encoding.name());
    let (text, _, _) = encoding.decode(bytes);
    text.into_owned()
}

/// 判断是否为UTF-8编码
pub fn is_utf8(encoding: &'static Encoding) -> bool {
    encoding == UTF_8
}
