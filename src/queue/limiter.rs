// Copyright (c) 2025 Kirky.X
//
// Licensed under the MIT License
// See LICENSE file in the project root for full license information.

use crate::engines::traits::FetchError;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::time::Duration;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::info;

/// 429 后间隔放大的上限倍数
const MAX_DELAY_MULTIPLIER: u32 = 8;

#[derive(Debug)]
struct DomainState {
    /// 下一个可用的请求时刻
    next_slot: Instant,
    /// 冷却结束时刻，之前不允许请求
    cooldown_until: Option<Instant>,
    /// 间隔放大倍数，冷却窗口结束后复位
    multiplier: u32,
    inflated_until: Option<Instant>,
}

/// 域名级限流器
///
/// 同一域名的相邻请求间隔不小于 `delay·(1±0.5)` 的抖动值；
/// 收到 429 后该域名进入冷却，并在冷却窗口内成倍放大间隔
pub struct DomainLimiter {
    delay: Duration,
    default_cooldown: Duration,
    state: Mutex<HashMap<String, DomainState>>,
}

impl DomainLimiter {
    pub fn new(delay: Duration, default_cooldown: Duration) -> Self {
        Self {
            delay,
            default_cooldown,
            state: Mutex::new(HashMap::new()),
        }
    }

    /// 带抖动的间隔，范围 [0.5, 1.5]·delay·multiplier
    fn jittered_gap(&self, multiplier: u32) -> Duration {
        if self.delay.is_zero() {
            return Duration::ZERO;
        }
        let factor: f64 = rand::random_range(0.5..=1.5);
        self.delay.mul_f64(factor * multiplier as f64)
    }

    /// 预约下一个请求时刻
    fn reserve(&self, host: &str) -> Instant {
        let now = Instant::now();
        let mut state = self.state.lock();
        let entry = state.entry(host.to_string()).or_insert(DomainState {
            next_slot: now,
            cooldown_until: None,
            multiplier: 1,
            inflated_until: None,
        });

        if entry.inflated_until.is_some_and(|t| now >= t) {
            entry.multiplier = 1;
            entry.inflated_until = None;
        }

        let mut slot = entry.next_slot.max(now);
        if let Some(until) = entry.cooldown_until {
            if until > slot {
                slot = until;
            } else {
                entry.cooldown_until = None;
            }
        }
        entry.next_slot = slot + self.jittered_gap(entry.multiplier);
        slot
    }

    /// 等待轮到该域名
    ///
    /// # 参数
    ///
    /// * `host` - 域名
    /// * `cancel` - 取消令牌
    ///
    /// # 返回值
    ///
    /// 取消时返回 `FetchError::Cancelled`
    pub async fn wait_turn(&self, host: &str, cancel: &CancellationToken) -> Result<(), FetchError> {
        let slot = self.reserve(host);
        if slot <= Instant::now() {
            return Ok(());
        }
        tokio::select! {
            _ = cancel.cancelled() => Err(FetchError::Cancelled),
            _ = tokio::time::sleep_until(slot) => Ok(()),
        }
    }

    /// 记录 429：冷却 `retry_after`（缺省为配置的冷却时间），并放大间隔
    pub fn penalize(&self, host: &str, retry_after: Option<Duration>) {
        let cooldown = retry_after.unwrap_or(self.default_cooldown);
        let now = Instant::now();
        let until = now + cooldown;
        let mut state = self.state.lock();
        let entry = state.entry(host.to_string()).or_insert(DomainState {
            next_slot: now,
            cooldown_until: None,
            multiplier: 1,
            inflated_until: None,
        });
        entry.cooldown_until = Some(entry.cooldown_until.map_or(until, |t| t.max(until)));
        entry.multiplier = (entry.multiplier * 2).min(MAX_DELAY_MULTIPLIER);
        entry.inflated_until = Some(until + cooldown);
        info!(
            host,
            cooldown_secs = cooldown.as_secs(),
            multiplier = entry.multiplier,
            "Domain cooled down after 429"
        );
    }

    /// 域名是否处于冷却中
    pub fn is_cooling_down(&self, host: &str) -> bool {
        let now = Instant::now();
        self.state
            .lock()
            .get(host)
            .and_then(|s| s.cooldown_until)
            .is_some_and(|t| t > now)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn test_min_gap_between_requests() {
        let limiter = DomainLimiter::new(Duration::from_millis(1000), Duration::from_secs(60));
        let cancel = CancellationToken::new();
        let mut stamps = Vec::new();
        for _ in 0..6 {
            limiter.wait_turn("www.gov.cn", &cancel).await.unwrap();
            stamps.push(Instant::now());
        }
        for pair in stamps.windows(2) {
            assert!(pair[1] - pair[0] >= Duration::from_millis(500));
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_domains_are_independent() {
        let limiter = DomainLimiter::new(Duration::from_secs(10), Duration::from_secs(60));
        let cancel = CancellationToken::new();
        let start = Instant::now();
        limiter.wait_turn("a.gov.cn", &cancel).await.unwrap();
        limiter.wait_turn("b.gov.cn", &cancel).await.unwrap();
        assert!(Instant::now() - start < Duration::from_millis(1));
    }

    #[tokio::test(start_paused = true)]
    async fn test_penalize_blocks_until_cooldown_ends() {
        let limiter = DomainLimiter::new(Duration::from_millis(100), Duration::from_secs(60));
        let cancel = CancellationToken::new();
        limiter.penalize("www.fenbi.com", Some(Duration::from_secs(5)));
        assert!(limiter.is_cooling_down("www.fenbi.com"));

        let start = Instant::now();
        limiter.wait_turn("www.fenbi.com", &cancel).await.unwrap();
        assert!(Instant::now() - start >= Duration::from_secs(5));
        assert!(!limiter.is_cooling_down("www.fenbi.com"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_while_waiting() {
        let limiter = DomainLimiter::new(Duration::from_secs(30), Duration::from_secs(60));
        let cancel = CancellationToken::new();
        limiter.wait_turn("a.gov.cn", &cancel).await.unwrap();
        cancel.cancel();
        let result = limiter.wait_turn("a.gov.cn", &cancel).await;
        assert!(matches!(result, Err(FetchError::Cancelled)));
    }
}
