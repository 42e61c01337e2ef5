// Copyright (c) 2025 Kirky.X
//
// Licensed under the MIT License
// See LICENSE file in the project root for full license information.

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::Serialize;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;

use crate::config::settings::Settings;
use crate::utils::retry_policy::RetryPolicy;

/// 全局上限
#[derive(Debug, Clone, Default)]
pub struct RunLimits {
    /// 总抓取页数上限
    pub max_total_pages: Option<u64>,
    /// 定稿记录数上限
    pub max_records: Option<u64>,
    /// 每个分组的列表页数上限
    pub max_pages_per_group: Option<u64>,
}

/// 运行共享状态
///
/// 一次运行内全部工作器共享的计数器和策略。所有计数器只做
/// 单操作原子更新，预算检查用检查并递增保证不超限。
pub struct RunState {
    /// 全局上限
    limits: RunLimits,
    /// 无法提取记录编号时是否按错误处理
    pub strict_identity: bool,
    /// 抓取重试策略
    pub retry: RetryPolicy,
    /// 单次请求超时
    pub request_timeout: Duration,
    /// 请求使用的User-Agent
    pub user_agent: String,
    /// 连续连接失败多少次判定渲染端故障
    pub outage_threshold: u32,
    /// 分组允许清单
    group_allow_list: Option<Vec<String>>,

    pages_fetched: AtomicU64,
    pages_failed: AtomicU64,
    records_finalized: AtomicU64,
    records_skipped: AtomicU64,
    records_dropped: AtomicU64,
    records_abandoned: AtomicU64,
    group_pages: DashMap<String, u64>,
    connect_failures: DashMap<String, u32>,
    aborted: AtomicBool,
    started_at: DateTime<Utc>,
}

impl RunState {
    /// 从配置构建运行状态
    pub fn from_settings(settings: &Settings) -> Self {
        Self::new(
            RunLimits {
                max_total_pages: settings.limits.max_total_pages,
                max_records: settings.limits.max_records,
                max_pages_per_group: settings.limits.max_pages_per_group,
            },
            settings.crawl.strict_identity,
            RetryPolicy {
                max_retries: settings.fetch.max_retries,
                initial_backoff: Duration::from_millis(settings.fetch.initial_backoff_ms),
                max_backoff: Duration::from_millis(settings.fetch.max_backoff_ms),
                ..Default::default()
            },
            Duration::from_secs(settings.fetch.timeout_secs),
            settings.fetch.user_agent.clone(),
            settings.fetch.outage_threshold,
            settings.site.groups.clone(),
        )
    }

    /// 用显式参数构建运行状态
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        limits: RunLimits,
        strict_identity: bool,
        retry: RetryPolicy,
        request_timeout: Duration,
        user_agent: String,
        outage_threshold: u32,
        group_allow_list: Option<Vec<String>>,
    ) -> Self {
        Self {
            limits,
            strict_identity,
            retry,
            request_timeout,
            user_agent,
            outage_threshold,
            group_allow_list,
            pages_fetched: AtomicU64::new(0),
            pages_failed: AtomicU64::new(0),
            records_finalized: AtomicU64::new(0),
            records_skipped: AtomicU64::new(0),
            records_dropped: AtomicU64::new(0),
            records_abandoned: AtomicU64::new(0),
            group_pages: DashMap::new(),
            connect_failures: DashMap::new(),
            aborted: AtomicBool::new(false),
            started_at: Utc::now(),
        }
    }

    /// 申请抓取一个页面的预算
    ///
    /// # 返回值
    ///
    /// 预算未用尽时计数并返回 true；到达总页数上限时返回 false，
    /// 这是有意的提前停止而不是错误
    pub fn try_begin_page(&self) -> bool {
        match self.limits.max_total_pages {
            None => {
                self.pages_fetched.fetch_add(1, Ordering::Relaxed);
                true
            }
            Some(max) => self
                .pages_fetched
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| {
                    (n < max).then_some(n + 1)
                })
                .is_ok(),
        }
    }

    /// 记录一次抓取失败
    pub fn page_failed(&self) {
        self.pages_failed.fetch_add(1, Ordering::Relaxed);
    }

    /// 申请一个定稿名额
    ///
    /// 定稿上限的检查并递增是原子的：并发定稿的竞争者不会超限。
    ///
    /// # 返回值
    ///
    /// * `Some(n)` - 申请成功，n 为当前定稿总数
    /// * `None` - 定稿数已到上限，记录不应再导出
    pub fn try_claim_record_slot(&self) -> Option<u64> {
        match self.limits.max_records {
            None => Some(self.records_finalized.fetch_add(1, Ordering::SeqCst) + 1),
            Some(max) => self
                .records_finalized
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| {
                    (n < max).then_some(n + 1)
                })
                .ok()
                .map(|n| n + 1),
        }
    }

    /// 定稿数是否已到上限
    pub fn records_limit_reached(&self, finalized: u64) -> bool {
        self.limits.max_records.is_some_and(|max| finalized >= max)
    }

    /// 记录一条被放弃的记录
    pub fn record_skipped(&self) {
        self.records_skipped.fetch_add(1, Ordering::Relaxed);
    }

    /// 记录一个因无法提取编号被丢弃的任务
    pub fn record_dropped(&self) {
        self.records_dropped.fetch_add(1, Ordering::Relaxed);
    }

    /// 记录硬停止时被遗弃的半成品记录数
    pub fn records_abandoned_add(&self, count: u64) {
        self.records_abandoned.fetch_add(count, Ordering::Relaxed);
    }

    /// 分组是否在允许清单内
    pub fn group_allowed(&self, group: Option<&str>) -> bool {
        match (&self.group_allow_list, group) {
            (None, _) => true,
            (Some(_), None) => true,
            (Some(list), Some(group)) => list.iter().any(|g| g == group),
        }
    }

    /// 申请分组的一个列表页预算
    pub fn try_begin_group_page(&self, group: Option<&str>) -> bool {
        let Some(max) = self.limits.max_pages_per_group else {
            if let Some(group) = group {
                *self.group_pages.entry(group.to_string()).or_insert(0) += 1;
            }
            return true;
        };
        let Some(group) = group else {
            return true;
        };
        let mut pages = self.group_pages.entry(group.to_string()).or_insert(0);
        if *pages < max {
            *pages += 1;
            true
        } else {
            false
        }
    }

    /// 记录一次域名连接失败
    ///
    /// # 返回值
    ///
    /// 连续失败数到达阈值时返回 true，表示渲染端故障需要上报
    pub fn record_connect_failure(&self, domain: &str) -> bool {
        let mut failures = self.connect_failures.entry(domain.to_string()).or_insert(0);
        *failures += 1;
        *failures >= self.outage_threshold
    }

    /// 记录一次域名连接成功，清零连续失败数
    pub fn record_connect_success(&self, domain: &str) {
        if let Some(mut failures) = self.connect_failures.get_mut(domain) {
            *failures = 0;
        }
    }

    /// 标记运行被中止
    pub fn mark_aborted(&self) {
        self.aborted.store(true, Ordering::SeqCst);
    }

    /// 运行是否被中止
    pub fn is_aborted(&self) -> bool {
        self.aborted.load(Ordering::SeqCst)
    }

    /// 生成当前的统计快照
    pub fn snapshot(&self, identities_seen: u64) -> RunStats {
        RunStats {
            started_at: self.started_at,
            finished_at: Utc::now(),
            pages_fetched: self.pages_fetched.load(Ordering::Relaxed),
            pages_failed: self.pages_failed.load(Ordering::Relaxed),
            records_finalized: self.records_finalized.load(Ordering::Relaxed),
            records_skipped: self.records_skipped.load(Ordering::Relaxed),
            records_dropped: self.records_dropped.load(Ordering::Relaxed),
            records_abandoned: self.records_abandoned.load(Ordering::Relaxed),
            groups_processed: self.group_pages.len() as u64,
            identities_seen,
            aborted: self.is_aborted(),
        }
    }
}

/// 一次运行的统计结果
#[derive(Debug, Clone, Serialize)]
pub struct RunStats {
    /// 运行开始时间
    pub started_at: DateTime<Utc>,
    /// 运行结束时间
    pub finished_at: DateTime<Utc>,
    /// 抓取的页面数
    pub pages_fetched: u64,
    /// 重试耗尽后仍失败的页面数
    pub pages_failed: u64,
    /// 定稿并导出的记录数
    pub records_finalized: u64,
    /// 被放弃的记录数
    pub records_skipped: u64,
    /// 因无法提取编号被丢弃的任务数
    pub records_dropped: u64,
    /// 硬停止时被遗弃的半成品记录数
    pub records_abandoned: u64,
    /// 处理过的分组数
    pub groups_processed: u64,
    /// 发现的不同记录标识数
    pub identities_seen: u64,
    /// 运行是否被中止
    pub aborted: bool,
}
