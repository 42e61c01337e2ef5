// Copyright (c) 2025 Kirky.X
//
// Licensed under the MIT License
// See LICENSE file in the project root for full license information.

use dashmap::DashMap;
use governor::clock::DefaultClock;
use governor::state::keyed::DefaultKeyedStateStore;
use governor::{Quota, RateLimiter};
use metrics::gauge;
use parking_lot::Mutex;
use std::num::NonZeroU32;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tokio::time::Instant;

type DomainRateLimiter = RateLimiter<String, DefaultKeyedStateStore<String>, DefaultClock>;

/// 限速配置
#[derive(Debug, Clone)]
pub struct ThrottleConfig {
    /// 单域名同时在途的抓取上限
    pub per_domain_concurrency: usize,
    /// 单域名每分钟请求预算，None 表示不设窗口预算
    pub requests_per_minute: Option<u32>,
    /// 基础请求间隔，同时是自适应延迟的下界
    pub download_delay: Duration,
    /// 是否启用自适应限速
    pub autothrottle: bool,
    /// 自适应延迟的起始值
    pub start_delay: Duration,
    /// 自适应延迟的上界
    pub max_delay: Duration,
    /// 目标并发度，延迟向 latency / target 收敛
    pub target_concurrency: f64,
}

impl Default for ThrottleConfig {
    fn default() -> Self {
        Self {
            per_domain_concurrency: 8,
            requests_per_minute: Some(120),
            download_delay: Duration::from_secs(1),
            autothrottle: true,
            start_delay: Duration::from_secs(5),
            max_delay: Duration::from_secs(60),
            target_concurrency: 1.0,
        }
    }
}

/// 单域名的延迟状态
struct DelayState {
    /// 当前请求间隔
    current: Duration,
    /// 延迟下界（基础间隔，可被 robots 的 crawl-delay 抬高）
    floor: Duration,
    /// 下一个允许发起请求的时间点
    next_slot: Option<Instant>,
}

impl DelayState {
    fn new(config: &ThrottleConfig) -> Self {
        let current = if config.autothrottle {
            config.start_delay.max(config.download_delay)
        } else {
            config.download_delay
        };
        Self {
            current,
            floor: config.download_delay,
            next_slot: None,
        }
    }

    /// 预订下一个请求槽位，返回需要等待的时长
    fn reserve(&mut self, now: Instant) -> Duration {
        let start = match self.next_slot {
            Some(slot) if slot > now => slot,
            _ => now,
        };
        self.next_slot = Some(start + self.current);
        start - now
    }

    /// 按自适应规则更新延迟
    ///
    /// 延迟向 latency / target_concurrency 收敛；慢响应和出错的
    /// 响应只会抬高延迟，快的成功响应才允许回落。
    fn update(&mut self, latency: Duration, ok: bool, config: &ThrottleConfig) {
        if !config.autothrottle {
            return;
        }
        let target = latency.div_f64(config.target_concurrency.max(0.1));
        let mut next = (self.current + target) / 2;
        if !ok {
            next = next.max(self.current);
        }
        self.current = next.clamp(self.floor, config.max_delay);
    }
}

/// 发放出去的抓取许可
///
/// 持有期间占用一个域名并发槽位，落下时自动归还。
pub struct ThrottlePermit {
    _permit: OwnedSemaphorePermit,
}

/// 域名限速器
///
/// 礼貌性约束的三层闸门，全部以域名为键：
/// 1. 并发上限 —— 每个域名一把信号量；
/// 2. 窗口预算 —— 每分钟请求数的令牌桶；
/// 3. 请求间隔 —— 自适应延迟，慢响应时增长、快成功时衰减。
///
/// `acquire` 依次通过三层后返回许可；调用方在拿到响应后用
/// `record_response` 反馈延迟调整所需的观测值。
pub struct DomainThrottle {
    config: ThrottleConfig,
    semaphores: DashMap<String, Arc<Semaphore>>,
    limiter: Option<DomainRateLimiter>,
    delays: DashMap<String, Arc<Mutex<DelayState>>>,
}

impl DomainThrottle {
    /// 用指定配置创建域名限速器
    pub fn new(config: ThrottleConfig) -> Self {
        let limiter = config
            .requests_per_minute
            .and_then(NonZeroU32::new)
            .map(|rpm| RateLimiter::keyed(Quota::per_minute(rpm)));
        Self {
            config,
            semaphores: DashMap::new(),
            limiter,
            delays: DashMap::new(),
        }
    }

    /// 获取对指定域名发起一次抓取的许可
    ///
    /// 依次等待并发槽位、窗口预算和请求间隔。返回的许可在
    /// 落下前占用该域名的一个并发槽位。
    pub async fn acquire(&self, domain: &str) -> ThrottlePermit {
        let semaphore = self
            .semaphores
            .entry(domain.to_string())
            .or_insert_with(|| Arc::new(Semaphore::new(self.config.per_domain_concurrency)))
            .clone();
        let permit = semaphore
            .acquire_owned()
            .await
            .expect("domain semaphore closed");

        if let Some(limiter) = &self.limiter {
            limiter.until_key_ready(&domain.to_string()).await;
        }

        let wait = {
            let delay = self.delay_state(domain);
            let mut state = delay.lock();
            state.reserve(Instant::now())
        };
        if !wait.is_zero() {
            tokio::time::sleep(wait).await;
        }

        ThrottlePermit { _permit: permit }
    }

    /// 反馈一次响应的观测值，驱动自适应延迟
    ///
    /// # 参数
    ///
    /// * `domain` - 域名
    /// * `latency` - 本次请求耗时
    /// * `ok` - 是否为成功（2xx）响应
    pub fn record_response(&self, domain: &str, latency: Duration, ok: bool) {
        let delay = self.delay_state(domain);
        let current = {
            let mut state = delay.lock();
            state.update(latency, ok, &self.config);
            state.current
        };
        gauge!("crawl_throttle_delay_seconds", "domain" => domain.to_string())
            .set(current.as_secs_f64());
    }

    /// 抬高域名的延迟下界
    ///
    /// robots.txt 的 crawl-delay 走这里生效，只升不降。
    pub fn raise_delay_floor(&self, domain: &str, floor: Duration) {
        let delay = self.delay_state(domain);
        let mut state = delay.lock();
        if floor > state.floor {
            state.floor = floor;
        }
        if state.current < state.floor {
            state.current = state.floor;
        }
    }

    /// 域名当前的请求间隔
    pub fn current_delay(&self, domain: &str) -> Duration {
        self.delay_state(domain).lock().current
    }

    fn delay_state(&self, domain: &str) -> Arc<Mutex<DelayState>> {
        self.delays
            .entry(domain.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(DelayState::new(&self.config))))
            .clone()
    }
}
