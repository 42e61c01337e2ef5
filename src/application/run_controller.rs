// Copyright (c) 2025 Kirky.X
//
// Licensed under the MIT License
// See LICENSE file in the project root for full license information.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

use crate::application::run_state::{RunState, RunStats};
use crate::config::settings::Settings;
use crate::domain::models::task::{CrawlTask, PageType, CTX_GROUP};
use crate::domain::services::exporter::Exporter;
use crate::domain::services::parser_registry::ParserRegistry;
use crate::domain::services::record_assembler::RecordAssembler;
use crate::engines::router::EngineRouter;
use crate::queue::dedup_guard::DedupGuard;
use crate::queue::frontier::Frontier;
use crate::queue::throttle::{DomainThrottle, ThrottleConfig};
use crate::utils::robots::RobotsChecker;
use crate::workers::fetch_worker::FetchWorker;
use crate::workers::manager::WorkerManager;

/// 种子入口
///
/// 一个起始列表页URL及其可选的分组标注。
#[derive(Debug, Clone)]
pub struct Seed {
    /// 列表页URL
    pub url: String,
    /// 分组（体裁）名
    pub group: Option<String>,
}

impl Seed {
    /// 无分组标注的种子
    pub fn bare(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            group: None,
        }
    }

    /// 带分组标注的种子
    pub fn grouped(url: impl Into<String>, group: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            group: Some(group.into()),
        }
    }
}

/// 运行控制手柄
///
/// 可克隆的轻量句柄，用于从信号处理等外部位置触发协作停止。
#[derive(Clone)]
pub struct RunHandle {
    frontier: Arc<Frontier>,
}

impl RunHandle {
    /// 协作停止：不再发放任务，在途任务自然完成
    pub fn stop(&self) {
        info!("cooperative stop requested");
        self.frontier.close();
    }
}

/// 运行控制器
///
/// 一次采集运行的所有者：装配共享组件、播种边界队列、启动
/// 工作器池，最后收尾并给出统计。全局上限、计数器和临时响应
/// 缓存的清理都归它管；清理在所有退出路径上执行，包括因上限
/// 或渲染端故障的提前终止。
pub struct RunController {
    frontier: Arc<Frontier>,
    dedup: Arc<DedupGuard>,
    assembler: Arc<RecordAssembler>,
    registry: Arc<ParserRegistry>,
    router: Arc<EngineRouter>,
    throttle: Arc<DomainThrottle>,
    robots: Option<Arc<RobotsChecker>>,
    exporter: Arc<dyn Exporter>,
    state: Arc<RunState>,
    manager: WorkerManager,
    stats_handle: Option<JoinHandle<()>>,
    cache_dir: Option<PathBuf>,
    worker_count: usize,
    shutdown_grace: Duration,
    stats_interval: Duration,
    cleaned_up: bool,
}

impl RunController {
    /// 装配一次运行
    ///
    /// # 参数
    ///
    /// * `settings` - 应用配置
    /// * `registry` - 页面解析器注册表
    /// * `router` - 引擎路由器
    /// * `exporter` - 最终记录的去向
    pub fn new(
        settings: &Settings,
        registry: Arc<ParserRegistry>,
        router: Arc<EngineRouter>,
        exporter: Arc<dyn Exporter>,
    ) -> Self {
        let throttle = Arc::new(DomainThrottle::new(ThrottleConfig {
            per_domain_concurrency: settings.throttle.per_domain_concurrency,
            requests_per_minute: settings.throttle.requests_per_minute,
            download_delay: Duration::from_millis(settings.throttle.download_delay_ms),
            autothrottle: settings.throttle.autothrottle,
            start_delay: Duration::from_millis(settings.throttle.start_delay_ms),
            max_delay: Duration::from_millis(settings.throttle.max_delay_ms),
            target_concurrency: settings.throttle.target_concurrency,
        }));

        let robots = settings
            .crawl
            .obey_robots
            .then(|| Arc::new(RobotsChecker::new()));

        Self {
            frontier: Arc::new(Frontier::new()),
            dedup: Arc::new(DedupGuard::new()),
            assembler: Arc::new(RecordAssembler::new()),
            registry,
            router,
            throttle,
            robots,
            exporter,
            state: Arc::new(RunState::from_settings(settings)),
            manager: WorkerManager::new(),
            stats_handle: None,
            cache_dir: settings.fetch.cache_dir.as_ref().map(PathBuf::from),
            worker_count: settings.crawl.workers,
            shutdown_grace: Duration::from_secs(settings.crawl.shutdown_grace_secs),
            stats_interval: Duration::from_secs(settings.crawl.stats_interval_secs),
            cleaned_up: false,
        }
    }

    /// 播种并启动运行
    ///
    /// 不在允许清单内的分组种子被直接丢弃；每个种子消耗所属
    /// 分组的一个列表页预算。
    pub fn start(&mut self, seeds: &[Seed]) {
        let mut seeded = 0usize;
        for seed in seeds {
            if !self.state.group_allowed(seed.group.as_deref()) {
                info!(url = %seed.url, "seed group not in allow-list, skipping");
                continue;
            }
            if !self.state.try_begin_group_page(seed.group.as_deref()) {
                info!(url = %seed.url, "group page budget exhausted, skipping seed");
                continue;
            }
            let mut task = CrawlTask::new(PageType::Listing, seed.url.clone());
            if let Some(group) = &seed.group {
                task = task.with_context(CTX_GROUP, group.clone());
            }
            if self.frontier.push(task).is_ok() {
                seeded += 1;
            }
        }
        info!("{} seed listing pages queued", seeded);

        let frontier = self.frontier.clone();
        let dedup = self.dedup.clone();
        let assembler = self.assembler.clone();
        let registry = self.registry.clone();
        let router = self.router.clone();
        let throttle = self.throttle.clone();
        let robots = self.robots.clone();
        let exporter = self.exporter.clone();
        let state = self.state.clone();
        let make_worker = move || {
            FetchWorker::new(
                frontier.clone(),
                dedup.clone(),
                assembler.clone(),
                registry.clone(),
                router.clone(),
                throttle.clone(),
                robots.clone(),
                exporter.clone(),
                state.clone(),
            )
        };
        self.manager.start_workers(self.worker_count, make_worker);

        self.stats_handle = Some(self.spawn_stats_tick());
    }

    /// 获取运行控制手柄
    pub fn handle(&self) -> RunHandle {
        RunHandle {
            frontier: self.frontier.clone(),
        }
    }

    /// 协作停止
    pub fn stop(&self) {
        self.handle().stop();
    }

    /// 等待运行结束并返回统计
    ///
    /// 正常路径下等到队列静止；协作停止后给在途任务一个宽限期，
    /// 超时则硬停止并把剩余的半成品记录计为遗弃。无论哪条路径，
    /// 临时响应缓存都会被清理。
    pub async fn await_completion(mut self) -> RunStats {
        let stop_signal = {
            let frontier = self.frontier.clone();
            async move { frontier.wait_closed().await }
        };
        let clean = self
            .manager
            .join_with_grace(stop_signal, self.shutdown_grace)
            .await;
        if !clean {
            warn!("hard stop: abandoning in-flight partial records");
        }

        if let Some(handle) = self.stats_handle.take() {
            handle.abort();
        }

        let abandoned = self.assembler.drain_abandoned();
        if !abandoned.is_empty() {
            warn!("{} partial records abandoned without finalizing", abandoned.len());
            self.state.records_abandoned_add(abandoned.len() as u64);
        }

        self.cleanup_cache();

        let stats = self.state.snapshot(self.dedup.len() as u64);
        info!(
            "run finished: {} finalized, {} skipped, {} pages fetched, {} groups, aborted={}",
            stats.records_finalized,
            stats.records_skipped,
            stats.pages_fetched,
            stats.groups_processed,
            stats.aborted
        );
        stats
    }

    /// 周期统计日志
    fn spawn_stats_tick(&self) -> JoinHandle<()> {
        let state = self.state.clone();
        let dedup = self.dedup.clone();
        let assembler = self.assembler.clone();
        let frontier = self.frontier.clone();
        let interval = self.stats_interval;

        tokio::spawn(async move {
            let mut tick = tokio::time::interval(interval);
            tick.tick().await; // 跳过立即触发的第一次
            loop {
                tick.tick().await;
                let stats = state.snapshot(dedup.len() as u64);
                info!(
                    "progress: {} finalized, {} skipped, {} pages, {} pending tasks, {} open records",
                    stats.records_finalized,
                    stats.records_skipped,
                    stats.pages_fetched,
                    frontier.pending(),
                    assembler.open_count()
                );
            }
        })
    }

    /// 删除临时响应缓存目录
    fn cleanup_cache(&mut self) {
        if self.cleaned_up {
            return;
        }
        self.cleaned_up = true;
        let Some(dir) = &self.cache_dir else {
            return;
        };
        match std::fs::remove_dir_all(dir) {
            Ok(()) => info!("response cache '{}' has been removed", dir.display()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                info!("no response cache found to remove");
            }
            Err(e) => error!("failed to remove response cache '{}': {}", dir.display(), e),
        }
    }
}

impl Drop for RunController {
    fn drop(&mut self) {
        // 提前退出（错误、panic 传播）时也保证缓存被清理
        self.cleanup_cache();
    }
}
