// Copyright (c) 2025 Kirky.X
//
// Licensed under the MIT License
// See LICENSE file in the project root for full license information.

use crate::config::settings::SchedulerSettings;
use crate::utils::errors::ErrorKind;
use chrono::{DateTime, Utc};
use std::time::Duration;

/// 重试策略配置
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// 最大尝试次数（包含首次执行）
    pub max_attempts: u32,
    /// 初始退避时间
    pub initial_backoff: Duration,
    /// 最大退避时间
    pub max_backoff: Duration,
    /// 退避乘数
    pub backoff_multiplier: f64,
    /// 抖动因子 (0.0-1.0)
    pub jitter_factor: f64,
    /// 是否启用抖动
    pub enable_jitter: bool,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_backoff: Duration::from_secs(1),
            max_backoff: Duration::from_secs(300),
            backoff_multiplier: 2.0,
            jitter_factor: 0.1,
            enable_jitter: true,
        }
    }
}

impl RetryPolicy {
    /// 根据调度器配置创建重试策略
    pub fn from_settings(settings: &SchedulerSettings) -> Self {
        Self {
            max_attempts: settings.retry_max,
            initial_backoff: Duration::from_millis(settings.retry_base_ms),
            max_backoff: Duration::from_secs(settings.retry_cap_secs),
            ..Self::default()
        }
    }

    /// 计算退避时间
    ///
    /// `attempt` 为已经执行过的次数，退避为 `base·2^attempt`，上限为 `max_backoff`
    pub fn calculate_backoff(&self, attempt: u32) -> Duration {
        let exponent = attempt.min(30) as i32;
        let backoff_secs = self.initial_backoff.as_secs_f64() * self.backoff_multiplier.powi(exponent);

        // 限制最大退避时间
        let capped_backoff = backoff_secs.min(self.max_backoff.as_secs_f64());

        // 添加抖动
        let final_backoff = if self.enable_jitter && capped_backoff > 0.0 {
            let jitter_range = capped_backoff * self.jitter_factor;
            let jitter = rand::random_range(-jitter_range..=jitter_range);
            (capped_backoff + jitter).clamp(0.0, self.max_backoff.as_secs_f64())
        } else {
            capped_backoff
        };

        Duration::from_secs_f64(final_backoff)
    }

    /// 计算下次重试时间
    pub fn next_retry_time(&self, attempt: u32, base_time: DateTime<Utc>) -> DateTime<Utc> {
        let backoff = self.calculate_backoff(attempt);
        base_time + chrono::Duration::milliseconds(backoff.as_millis() as i64)
    }

    /// 根据错误类型判断是否应该重试
    ///
    /// 仅瞬时错误与被拦截（阶梯已耗尽）的错误允许重试
    pub fn should_retry(&self, attempts: u32, kind: ErrorKind) -> bool {
        attempts < self.max_attempts && kind.is_retryable()
    }
}
