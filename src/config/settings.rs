// Copyright (c) 2025 Kirky.X
//
// Licensed under the MIT License
// See LICENSE file in the project root for full license information.

use config::{Config, ConfigError, Environment, File};
use serde::Deserialize;
use std::time::Duration;

/// 默认桌面版Chrome的User-Agent
pub const DEFAULT_USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36";

/// 应用程序配置设置
///
/// 包含服务器、数据库、调度、抓取、LLM、存储、日志与指标等配置项
#[derive(Debug, Clone, Deserialize)]
pub struct Settings {
    /// 服务器配置
    pub server: ServerSettings,
    /// 数据库配置
    pub database: DatabaseSettings,
    /// 调度器配置
    #[serde(default)]
    pub scheduler: SchedulerSettings,
    /// 抓取器配置
    #[serde(default)]
    pub fetcher: FetcherSettings,
    /// LLM 配置
    #[serde(default)]
    pub llm: LlmSettings,
    /// 附件存储配置
    #[serde(default)]
    pub storage: StorageSettings,
    /// 日志配置
    #[serde(default)]
    pub logging: LoggingSettings,
    /// 指标配置
    #[serde(default)]
    pub metrics: MetricsSettings,
    /// 选择器目录文件（YAML），缺省使用内置目录
    #[serde(default)]
    pub catalog_path: Option<String>,
}

/// 服务器配置设置
#[derive(Debug, Clone, Deserialize)]
pub struct ServerSettings {
    /// 服务器监听主机地址
    pub host: String,
    /// 服务器监听端口
    pub port: u16,
}

/// 数据库配置设置
#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseSettings {
    /// 数据库连接URL
    pub url: String,
    /// 最大连接数
    pub max_connections: Option<u32>,
    /// 最小连接数
    pub min_connections: Option<u32>,
    /// 连接超时时间（秒）
    pub connect_timeout: Option<u64>,
    /// 空闲连接超时时间（秒）
    pub idle_timeout: Option<u64>,
}

/// 调度器配置设置
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SchedulerSettings {
    /// 全局并发（工作器数量）
    pub max_parallel: usize,
    /// 同一域名的并发上限
    pub per_domain_parallel: usize,
    /// 同一域名两次派发之间的最小间隔（毫秒，±50%抖动）
    pub domain_delay_ms: u64,
    /// 最大尝试次数
    pub retry_max: u32,
    /// 退避基数（毫秒）
    pub retry_base_ms: u64,
    /// 退避上限（秒）
    pub retry_cap_secs: u64,
    /// 429 未携带 Retry-After 时的冷却时间（秒）
    pub cooldown_secs: u64,
    pub list_monitor_timeout_secs: u64,
    pub announcement_fetch_timeout_secs: u64,
    pub extract_timeout_secs: u64,
}

impl Default for SchedulerSettings {
    fn default() -> Self {
        Self {
            max_parallel: 8,
            per_domain_parallel: 2,
            domain_delay_ms: 1000,
            retry_max: 3,
            retry_base_ms: 1000,
            retry_cap_secs: 300,
            cooldown_secs: 60,
            list_monitor_timeout_secs: 300,
            announcement_fetch_timeout_secs: 120,
            extract_timeout_secs: 600,
        }
    }
}

impl SchedulerSettings {
    pub fn domain_delay(&self) -> Duration {
        Duration::from_millis(self.domain_delay_ms)
    }

    pub fn cooldown(&self) -> Duration {
        Duration::from_secs(self.cooldown_secs)
    }
}

/// 抓取器配置设置
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct FetcherSettings {
    /// 默认User-Agent
    pub user_agent: String,
    /// 单次请求超时（秒）
    pub timeout_secs: u64,
    /// 最大重定向次数
    pub max_redirects: usize,
    /// TLS 指纹客户端（FlareSolverr 兼容边车）地址
    pub tls_sidecar_url: String,
    /// 已知进行TLS指纹识别的域名，直接从TLS层开始
    pub tls_domains: Vec<String>,
    /// 是否启用无头浏览器层
    pub browser_enabled: bool,
    /// 浏览器执行页面的时间上限（秒）
    pub browser_timeout_secs: u64,
    /// 远程调试端点，设置后连接已有浏览器而不是启动子进程
    pub remote_debugging_url: Option<String>,
}

impl Default for FetcherSettings {
    fn default() -> Self {
        Self {
            user_agent: DEFAULT_USER_AGENT.to_string(),
            timeout_secs: 30,
            max_redirects: 10,
            tls_sidecar_url: "http://localhost:8191/v1".to_string(),
            tls_domains: vec!["job.snhrm.com".to_string()],
            browser_enabled: true,
            browser_timeout_secs: 30,
            remote_debugging_url: None,
        }
    }
}

/// LLM 配置设置
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LlmSettings {
    /// API 密钥，未设置时跳过LLM抽取
    pub api_key: Option<String>,
    pub model: String,
    pub api_base_url: String,
    /// 输入正文最大字符数
    pub max_input_chars: usize,
    pub temperature: f32,
    pub timeout_secs: u64,
}

impl Default for LlmSettings {
    fn default() -> Self {
        Self {
            api_key: None,
            model: "gpt-4o-mini".to_string(),
            api_base_url: "https://api.openai.com/v1".to_string(),
            max_input_chars: 16000,
            temperature: 0.1,
            timeout_secs: 60,
        }
    }
}

/// 附件存储配置设置
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct StorageSettings {
    /// 附件临时目录
    pub attachment_dir: String,
}

impl Default for StorageSettings {
    fn default() -> Self {
        Self {
            attachment_dir: "./storage/attachments".to_string(),
        }
    }
}

/// 日志配置设置
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LoggingSettings {
    pub level: String,
    /// text 或 json
    pub format: String,
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: "text".to_string(),
        }
    }
}

/// 指标配置设置
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct MetricsSettings {
    pub enabled: bool,
    pub listen: String,
}

impl Default for MetricsSettings {
    fn default() -> Self {
        Self {
            enabled: false,
            listen: "0.0.0.0:9000".to_string(),
        }
    }
}

impl Settings {
    /// 创建新的配置实例
    ///
    /// 依次加载内置默认值、`config/default`、`config/{APP_ENVIRONMENT}`
    /// 以及 `GONGKAO__` 前缀的环境变量
    ///
    /// # Returns
    ///
    /// * `Ok(Settings)` - 成功加载的配置
    /// * `Err(ConfigError)` - 配置加载失败
    pub fn new() -> Result<Self, ConfigError> {
        let env = std::env::var("APP_ENVIRONMENT").unwrap_or_else(|_| "default".to_string());
        let builder = Self::defaults()?
            .add_source(File::with_name("config/default").required(false))
            .add_source(File::with_name(&format!("config/{}", env)).required(false))
            .add_source(
                Environment::with_prefix("GONGKAO")
                    .separator("__")
                    .list_separator(",")
                    .with_list_parse_key("fetcher.tls_domains")
                    .try_parsing(true),
            );

        builder.build()?.try_deserialize()
    }

    fn defaults() -> Result<config::ConfigBuilder<config::builder::DefaultState>, ConfigError> {
        Config::builder()
            .set_default("server.host", "0.0.0.0")?
            .set_default("server.port", 3000)?
            .set_default("database.url", "sqlite::memory:")?
            // Default DB pool settings
            .set_default("database.max_connections", 20)?
            .set_default("database.min_connections", 1)?
            .set_default("database.connect_timeout", 10)?
            .set_default("database.idle_timeout", 300)
    }

    /// 仅包含内置默认值的配置，用于测试与嵌入式运行
    pub fn default_settings() -> Result<Self, ConfigError> {
        Self::defaults()?.build()?.try_deserialize()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_match_documented_values() {
        let settings = Settings::default_settings().unwrap();
        assert_eq!(settings.server.port, 3000);
        assert_eq!(settings.database.url, "sqlite::memory:");
        assert_eq!(settings.scheduler.max_parallel, 8);
        assert_eq!(settings.scheduler.retry_max, 3);
        assert_eq!(settings.scheduler.retry_cap_secs, 300);
        assert_eq!(settings.fetcher.max_redirects, 10);
        assert_eq!(settings.fetcher.tls_domains, vec!["job.snhrm.com".to_string()]);
        assert!(settings.llm.api_key.is_none());
        assert_eq!(settings.logging.format, "text");
        assert!(!settings.metrics.enabled);
    }

    #[test]
    fn test_partial_section_override_keeps_defaults() {
        let settings: Settings = Settings::defaults()
            .unwrap()
            .set_override("scheduler.max_parallel", 2)
            .unwrap()
            .set_override("llm.model", "qwen-plus")
            .unwrap()
            .build()
            .unwrap()
            .try_deserialize()
            .unwrap();
        assert_eq!(settings.scheduler.max_parallel, 2);
        assert_eq!(settings.scheduler.domain_delay_ms, 1000);
        assert_eq!(settings.llm.model, "qwen-plus");
        assert_eq!(settings.llm.max_input_chars, 16000);
    }
}
