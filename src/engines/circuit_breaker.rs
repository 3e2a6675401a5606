// Copyright (c) 2025 Kirky.X
//
// Licensed under the MIT License
// See LICENSE file in the project root for full license information.

use metrics::{counter, gauge};
use parking_lot::Mutex;
use std::collections::{HashMap, VecDeque};
use std::time::{Duration, Instant};

/// 熔断器配置
#[derive(Clone, Debug)]
pub struct CircuitConfig {
    /// 失败阈值
    pub failure_threshold: u32,
    /// 恢复超时时间
    pub recovery_timeout: Duration,
    /// 失败时间窗口
    pub failure_window: Duration,
}

impl Default for CircuitConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            recovery_timeout: Duration::from_secs(30),
            failure_window: Duration::from_secs(60),
        }
    }
}

/// 熔断器状态枚举
#[derive(Clone, Copy, PartialEq, Debug)]
pub enum Status {
    /// 关闭状态
    Closed,
    /// 打开状态
    Open,
    /// 半开状态
    HalfOpen,
}

#[derive(Debug)]
struct CircuitState {
    status: Status,
    failure_timestamps: VecDeque<Instant>,
    last_failure: Option<Instant>,
}

impl Default for CircuitState {
    fn default() -> Self {
        Self {
            status: Status::Closed,
            failure_timestamps: VecDeque::new(),
            last_failure: None,
        }
    }
}

/// 熔断器
///
/// 以 `层级:域名` 为键，某一层对某个域名连续失败时暂时跳过该层，
/// 直接升级到下一层
pub struct CircuitBreaker {
    states: Mutex<HashMap<String, CircuitState>>,
    config: CircuitConfig,
}

impl Default for CircuitBreaker {
    fn default() -> Self {
        Self::new(CircuitConfig::default())
    }
}

impl CircuitBreaker {
    pub fn new(config: CircuitConfig) -> Self {
        Self {
            states: Mutex::new(HashMap::new()),
            config,
        }
    }

    /// 检查熔断器是否打开
    ///
    /// 打开状态超过恢复时间后转为半开，放行一次试探请求
    pub fn is_open(&self, key: &str) -> bool {
        let mut states = self.states.lock();
        let Some(state) = states.get_mut(key) else {
            return false;
        };

        match state.status {
            Status::Closed | Status::HalfOpen => false,
            Status::Open => {
                if state
                    .last_failure
                    .is_some_and(|t| t.elapsed() > self.config.recovery_timeout)
                {
                    state.status = Status::HalfOpen;
                    update_status_metric(key, Status::HalfOpen);
                    return false;
                }
                counter!("circuit_breaker_rejected_total", "key" => key.to_string()).increment(1);
                true
            }
        }
    }

    /// 记录成功
    pub fn record_success(&self, key: &str) {
        let mut states = self.states.lock();
        if let Some(state) = states.get_mut(key) {
            if state.status != Status::Closed {
                state.status = Status::Closed;
                update_status_metric(key, Status::Closed);
            }
            state.failure_timestamps.clear();
        }
    }

    /// 记录失败
    pub fn record_failure(&self, key: &str) {
        let mut states = self.states.lock();
        let state = states.entry(key.to_string()).or_default();

        let now = Instant::now();
        state.last_failure = Some(now);
        state.failure_timestamps.push_back(now);

        // 移除超出时间窗口的失败记录
        while let Some(front) = state.failure_timestamps.front() {
            if now.duration_since(*front) > self.config.failure_window {
                state.failure_timestamps.pop_front();
            } else {
                break;
            }
        }

        match state.status {
            Status::Closed => {
                if state.failure_timestamps.len() >= self.config.failure_threshold as usize {
                    state.status = Status::Open;
                    update_status_metric(key, Status::Open);
                }
            }
            Status::HalfOpen => {
                state.status = Status::Open;
                update_status_metric(key, Status::Open);
            }
            Status::Open => {}
        }
    }

    pub fn status(&self, key: &str) -> Status {
        self.states
            .lock()
            .get(key)
            .map(|s| s.status)
            .unwrap_or(Status::Closed)
    }
}

fn update_status_metric(key: &str, status: Status) {
    let val = match status {
        Status::Closed => 0.0,
        Status::Open => 1.0,
        Status::HalfOpen => 0.5,
    };
    gauge!("circuit_breaker_status", "key" => key.to_string()).set(val);
}
