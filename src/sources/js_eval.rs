// Copyright (c) 2025 Kirky.X
//
// Licensed under the MIT License
// See LICENSE file in the project root for full license information.

use super::SourceError;
use async_trait::async_trait;
use boa_engine::{Context, Source};
use once_cell::sync::Lazy;
use regex::Regex;
use std::time::Duration;
use tracing::debug;

static SCRIPT_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?is)<script([^>]*)>(.*?)</script>").unwrap());
static SCRIPT_TYPE_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r#"(?i)type\s*=\s*["']([^"']+)["']"#).unwrap());

/// 浏览器环境的最小模拟
///
/// `window` 即全局对象，因此顶层 `var x` 同时可通过 `window.x` 读取
const PRELUDE: &str = r#"
var window = globalThis;
var self = globalThis;
var top = globalThis;
var parent = globalThis;
function __noop() {}
function __element() {
  return { style: {}, dataset: {}, setAttribute: __noop, getAttribute: function () { return null; },
           appendChild: __noop, removeChild: __noop, addEventListener: __noop, innerHTML: "", textContent: "" };
}
var document = {
  title: "", cookie: "", referrer: "", readyState: "complete",
  documentElement: __element(), body: __element(), head: __element(),
  getElementById: function () { return null; },
  getElementsByTagName: function () { return []; },
  getElementsByClassName: function () { return []; },
  querySelector: function () { return null; },
  querySelectorAll: function () { return []; },
  createElement: __element,
  addEventListener: __noop, removeEventListener: __noop, write: __noop
};
var navigator = { userAgent: "Mozilla/5.0", language: "zh-CN", platform: "Win32" };
var location = { href: "", protocol: "https:", host: "mp.weixin.qq.com", hostname: "mp.weixin.qq.com",
                 pathname: "/s", search: "", hash: "", replace: __noop, reload: __noop };
var localStorage = { getItem: function () { return null; }, setItem: __noop, removeItem: __noop };
var sessionStorage = localStorage;
var console = { log: __noop, warn: __noop, error: __noop, info: __noop, debug: __noop };
function setTimeout() { return 0; }
function setInterval() { return 0; }
function clearTimeout() {}
function clearInterval() {}
function addEventListener() {}
"#;

/// 脚本求值器
///
/// 执行页面内嵌的 `<script>`，返回指定全局变量的字符串值。
/// 没有JS虚拟机的实现可以不提供该组件，调用方直接跳到浏览器层。
#[async_trait]
pub trait ScriptEvaluator: Send + Sync {
    async fn eval_scripts_extract(
        &self,
        html: &str,
        var_name: &str,
    ) -> Result<Option<String>, SourceError>;
}

/// 基于 boa 的脚本求值器
///
/// boa 的 `Context` 不是 `Send`，求值在阻塞线程池中完成
pub struct BoaEvaluator {
    timeout: Duration,
    loop_limit: u64,
}

impl Default for BoaEvaluator {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(5),
            loop_limit: 1_000_000,
        }
    }
}

impl BoaEvaluator {
    pub fn new(timeout: Duration, loop_limit: u64) -> Self {
        Self {
            timeout,
            loop_limit,
        }
    }
}

/// 提取可执行的内联脚本（跳过外链、JSON与模板）
pub fn inline_scripts(html: &str) -> Vec<String> {
    SCRIPT_RE
        .captures_iter(html)
        .filter_map(|caps| {
            let attrs = caps.get(1).map(|m| m.as_str()).unwrap_or_default();
            let body = caps.get(2).map(|m| m.as_str()).unwrap_or_default();
            if body.trim().is_empty() {
                return None;
            }
            if let Some(kind) = SCRIPT_TYPE_RE.captures(attrs).and_then(|c| c.get(1)) {
                let kind = kind.as_str().to_ascii_lowercase();
                if !kind.contains("javascript") && kind != "module" {
                    return None;
                }
            }
            Some(body.to_string())
        })
        .collect()
}

fn read_global(context: &mut Context, name_literal: &str) -> Option<String> {
    let probe = format!(
        "(function () {{ var v = globalThis[{}]; return v == null ? \"\" : String(v); }})()",
        name_literal
    );
    let value = context.eval(Source::from_bytes(probe.as_bytes())).ok()?;
    let text = value.to_string(context).ok()?.to_std_string_escaped();
    (!text.is_empty()).then_some(text)
}

/// 依次执行脚本，变量首次出现非空值时返回
///
/// 只执行包含变量名或 `window.` 的脚本；单个脚本出错时跳过
pub fn eval_scripts_blocking(html: &str, var_name: &str, loop_limit: u64) -> Option<String> {
    let name = var_name.trim().trim_start_matches("window.");
    if name.is_empty() {
        return None;
    }
    let name_literal = serde_json::to_string(name).ok()?;

    let mut context = Context::default();
    context
        .runtime_limits_mut()
        .set_loop_iteration_limit(loop_limit);
    context.eval(Source::from_bytes(PRELUDE.as_bytes())).ok()?;

    for script in inline_scripts(html) {
        if !script.contains(name) && !script.contains("window.") {
            continue;
        }
        if let Err(e) = context.eval(Source::from_bytes(script.as_bytes())) {
            debug!("Script execution failed: {}", e);
            continue;
        }
        if let Some(value) = read_global(&mut context, &name_literal) {
            return Some(value);
        }
    }
    None
}

#[async_trait]
impl ScriptEvaluator for BoaEvaluator {
    async fn eval_scripts_extract(
        &self,
        html: &str,
        var_name: &str,
    ) -> Result<Option<String>, SourceError> {
        let html = html.to_string();
        let var_name = var_name.to_string();
        let loop_limit = self.loop_limit;
        let task = tokio::task::spawn_blocking(move || {
            eval_scripts_blocking(&html, &var_name, loop_limit)
        });
        match tokio::time::timeout(self.timeout, task).await {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(e)) => Err(SourceError::Parse(format!("script evaluation panicked: {}", e))),
            Err(_) => {
                debug!("Script evaluation timed out");
                Ok(None)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_inline_scripts_skip_external_and_json() {
        let html = r#"
            <script src="https://res.wx.qq.com/a.js"></script>
            <script type="application/json">{"biz": "x"}</script>
            <script type="text/javascript">var a = 1;</script>
            <script>window.b = 2;</script>"#;
        let scripts = inline_scripts(html);
        assert_eq!(scripts.len(), 2);
        assert!(scripts[0].contains("var a"));
    }

    #[test]
    fn test_top_level_var_is_visible_on_window() {
        let html = r#"<script>var biz = "MzA1NDIzNDIxNA==";</script>"#;
        assert_eq!(
            eval_scripts_blocking(html, "biz", 10_000).as_deref(),
            Some("MzA1NDIzNDIxNA==")
        );
        assert_eq!(
            eval_scripts_blocking(html, "window.biz", 10_000).as_deref(),
            Some("MzA1NDIzNDIxNA==")
        );
    }

    #[test]
    fn test_computed_assignment_and_broken_scripts() {
        let html = r#"
            <script>window.biz = undefinedFunction();</script>
            <script>
              var parts = ["MzA1", "NDIz", "NDIx", "NA=="];
              document.getElementById("x");
              window.biz = parts.join("");
            </script>"#;
        assert_eq!(
            eval_scripts_blocking(html, "biz", 10_000).as_deref(),
            Some("MzA1NDIzNDIxNA==")
        );
    }

    #[test]
    fn test_runaway_loop_is_bounded() {
        let html = r#"<script>while (true) {}</script><script>window.biz = "ok";</script>"#;
        assert_eq!(eval_scripts_blocking(html, "biz", 1_000).as_deref(), Some("ok"));
    }

    #[tokio::test]
    async fn test_missing_variable_yields_none() {
        let evaluator = BoaEvaluator::default();
        let value = evaluator
            .eval_scripts_extract("<script>window.other = 1;</script>", "biz")
            .await
            .unwrap();
        assert_eq!(value, None);
    }
}
