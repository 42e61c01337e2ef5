// Copyright 2025 Kirky.X
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

use anyhow::Result;
use metrics::counter;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::sleep;
use tracing::{debug, error, info, instrument, warn};
use uuid::Uuid;

use crate::application::run_state::RunState;
use crate::domain::models::record::RecordIdentity;
use crate::domain::models::task::{CrawlTask, PageType, StageOutcome};
use crate::domain::services::exporter::Exporter;
use crate::domain::services::parser_registry::ParserRegistry;
use crate::domain::services::record_assembler::{AssemblerError, RecordAssembler};
use crate::engines::router::EngineRouter;
use crate::engines::traits::{EngineError, FetchRequest, FetchResponse};
use crate::queue::dedup_guard::DedupGuard;
use crate::queue::frontier::Frontier;
use crate::queue::throttle::DomainThrottle;
use crate::utils::robots::RobotsChecker;
use crate::utils::url_utils;

/// 抓取工作器
///
/// 工作器之间完全对称、任务之间无状态：循环从边界队列取任务，
/// 经过限速闸门抓取页面，分发给对应的解析器，再把派生任务推回
/// 队列、把字段更新交给装配器。所有共享状态都在队列、去重护卫
/// 和装配器各自的同步原语后面。
pub struct FetchWorker {
    worker_id: Uuid,
    frontier: Arc<Frontier>,
    dedup: Arc<DedupGuard>,
    assembler: Arc<RecordAssembler>,
    registry: Arc<ParserRegistry>,
    router: Arc<EngineRouter>,
    throttle: Arc<DomainThrottle>,
    robots: Option<Arc<RobotsChecker>>,
    exporter: Arc<dyn Exporter>,
    state: Arc<RunState>,
}

impl FetchWorker {
    /// 创建新的抓取工作器实例
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        frontier: Arc<Frontier>,
        dedup: Arc<DedupGuard>,
        assembler: Arc<RecordAssembler>,
        registry: Arc<ParserRegistry>,
        router: Arc<EngineRouter>,
        throttle: Arc<DomainThrottle>,
        robots: Option<Arc<RobotsChecker>>,
        exporter: Arc<dyn Exporter>,
        state: Arc<RunState>,
    ) -> Self {
        Self {
            worker_id: Uuid::new_v4(),
            frontier,
            dedup,
            assembler,
            registry,
            router,
            throttle,
            robots,
            exporter,
            state,
        }
    }

    /// 运行工作器循环
    ///
    /// 队列排干或关闭后自然退出。
    pub async fn run(self) {
        info!("Fetch worker {} started", self.worker_id);

        while let Some(task) = self.frontier.pop().await {
            if let Err(e) = self.process_task(task).await {
                error!("Error processing task: {}", e);
            }
            // 派生任务已在 process_task 内入队，此刻宣告完成是安全的
            self.frontier.task_done();
        }

        info!("Fetch worker {} stopped", self.worker_id);
    }

    #[instrument(skip(self, task), fields(task_id = %task.id, url = %task.url, page_type = %task.page_type))]
    async fn process_task(&self, task: CrawlTask) -> Result<()> {
        // 总页数预算：到达上限是有意的提前停止
        if !self.state.try_begin_page() {
            info!("total page budget exhausted, closing frontier");
            self.frontier.close();
            self.abandon_record(&task);
            return Ok(());
        }

        let Some(domain) = url_utils::domain_key(&task.url) else {
            warn!("task has an unparsable url, dropping");
            self.abandon_record(&task);
            return Ok(());
        };

        if !self.robots_allow(&task, &domain).await {
            info!("robots.txt disallows url, dropping");
            self.abandon_record(&task);
            return Ok(());
        }

        let mut request = FetchRequest::new(task.url.clone(), self.state.request_timeout);
        if let Some(wait_ms) = task.wait_ms() {
            request = request.with_wait(Duration::from_millis(wait_ms));
        }

        let permit = self.throttle.acquire(&domain).await;
        let fetched = self.fetch_with_retry(&request, &domain).await;
        drop(permit);

        let response = match fetched {
            Ok(response) => response,
            Err(e) => {
                self.handle_fetch_failure(&task, e).await;
                return Ok(());
            }
        };

        counter!("crawl_pages_fetched_total").increment(1);
        self.dispatch_to_parser(&task, &response).await;
        Ok(())
    }

    /// 抓取并按策略重试
    ///
    /// 瞬时故障（超时、5xx、429）指数退避后重试；连续的连接层
    /// 故障按渲染端故障上报并关闭队列；重试耗尽交回调用方降级。
    async fn fetch_with_retry(
        &self,
        request: &FetchRequest,
        domain: &str,
    ) -> Result<FetchResponse, EngineError> {
        let policy = &self.state.retry;
        let mut attempt: u32 = 0;

        loop {
            attempt += 1;
            match self.router.route(request).await {
                Ok(response) => {
                    let latency = Duration::from_millis(response.elapsed_ms);
                    let ok = response.is_success();
                    self.throttle.record_response(domain, latency, ok);

                    if ok {
                        self.state.record_connect_success(domain);
                        return Ok(response);
                    }

                    let err = EngineError::Status(response.status);
                    if err.is_retryable() && policy.should_retry(attempt) {
                        let backoff = policy.calculate_backoff(attempt);
                        warn!(
                            "fetch got status {}, retry {}/{} in {:?}",
                            response.status, attempt, policy.max_retries, backoff
                        );
                        sleep(backoff).await;
                        continue;
                    }
                    return Err(err);
                }
                Err(e) => {
                    // 失败的请求按悲观耗时反馈，抬高自适应延迟
                    self.throttle.record_response(domain, request.timeout, false);

                    if e.is_connectivity() && self.state.record_connect_failure(domain) {
                        error!(
                            "persistent connectivity failure for {}, escalating renderer outage",
                            domain
                        );
                        self.state.mark_aborted();
                        self.frontier.close();
                        return Err(e);
                    }

                    if e.is_retryable() && policy.should_retry(attempt) {
                        let backoff = policy.calculate_backoff(attempt);
                        warn!(
                            "fetch failed ({}), retry {}/{} in {:?}",
                            e, attempt, policy.max_retries, backoff
                        );
                        sleep(backoff).await;
                        continue;
                    }
                    return Err(e);
                }
            }
        }
    }

    /// 把响应分发给注册的解析器并处理产出
    async fn dispatch_to_parser(&self, task: &CrawlTask, response: &FetchResponse) {
        let Some(parser) = self.registry.get(task.page_type) else {
            warn!("no parser registered for {}, dropping task", task.page_type);
            self.abandon_record(task);
            return;
        };

        let output = match parser.parse(&response.body, task) {
            Ok(output) => output,
            Err(e) => {
                // 单页解析失败只影响本记录，绝不让运行中止
                warn!("parse failed: {}", e);
                self.abandon_record(task);
                return;
            }
        };

        if let Some(identity) = &task.record_id {
            if let Err(e) = self
                .assembler
                .update(identity, task.page_type, output.fields)
            {
                warn!("field update rejected: {}", e);
                return;
            }
        }

        self.route_derived_tasks(task, output.tasks);

        match output.outcome {
            StageOutcome::Continue => {}
            StageOutcome::Terminal => {
                if let Some(identity) = task.record_id.clone() {
                    self.finalize_record(&identity).await;
                }
            }
            StageOutcome::Skip => {
                if let Some(identity) = &task.record_id {
                    self.assembler.discard(identity);
                    self.state.record_skipped();
                    counter!("crawl_records_skipped_total").increment(1);
                    info!(identity = %identity, "record skipped by parser");
                }
            }
        }
    }

    /// 把解析器派生的任务过滤后推入队列
    ///
    /// 详情任务先补齐记录编号再过去重护卫，竞争的重复标识恰好
    /// 放行一个；新的列表任务受分组允许清单和分组页数预算约束。
    fn route_derived_tasks(&self, parent: &CrawlTask, tasks: Vec<CrawlTask>) {
        for task in tasks {
            let task = task.inherit_context(parent);
            match task.page_type {
                PageType::Detail => {
                    let identity = task
                        .record_id
                        .clone()
                        .or_else(|| RecordIdentity::from_detail_url(&task.url));
                    let Some(identity) = identity else {
                        if self.state.strict_identity {
                            error!("cannot derive record identity from {}", task.url);
                        } else {
                            debug!("cannot derive record identity from {}, dropping", task.url);
                        }
                        self.state.record_dropped();
                        continue;
                    };

                    if !self.dedup.mark_seen(identity.clone()) {
                        debug!(identity = %identity, "duplicate detail task suppressed");
                        continue;
                    }
                    self.push(task.with_record_id(identity));
                }
                PageType::Listing => {
                    let group = task.group().map(str::to_string);
                    if !self.state.group_allowed(group.as_deref()) {
                        debug!(group = ?group, "group not in allow-list, dropping listing task");
                        continue;
                    }
                    if !self.state.try_begin_group_page(group.as_deref()) {
                        info!(group = ?group, "group page budget exhausted, stopping pagination");
                        continue;
                    }
                    self.push(task);
                }
                _ => self.push(task),
            }
        }
    }

    fn push(&self, task: CrawlTask) {
        if self.frontier.push(task).is_err() {
            debug!("frontier closed, derived task dropped");
        }
    }

    /// 定稿并导出一条记录
    ///
    /// 定稿名额先于导出原子申请，竞争的并发定稿不会超过
    /// 记录数上限。
    async fn finalize_record(&self, identity: &RecordIdentity) {
        let record = match self.assembler.finalize(identity) {
            Ok(record) => record,
            Err(AssemblerError::AlreadyFinalized(id)) => {
                warn!(identity = %id, "duplicate finalize suppressed");
                return;
            }
            Err(AssemblerError::UnknownRecord(id)) => {
                warn!(identity = %id, "no partial record to finalize");
                return;
            }
        };

        let Some(finalized) = self.state.try_claim_record_slot() else {
            info!(identity = %identity, "record limit reached, record not exported");
            self.state.records_abandoned_add(1);
            self.frontier.close();
            return;
        };

        if let Err(e) = self.exporter.emit(record).await {
            error!(identity = %identity, "export failed: {}", e);
            return;
        }
        counter!("crawl_records_finalized_total").increment(1);
        if self.state.records_limit_reached(finalized) {
            info!("record limit reached, closing frontier");
            self.frontier.close();
        }
    }

    /// 重试耗尽后的降级处理
    ///
    /// 预告片阶段是可选的：抓取失败时记录按已有字段定稿；
    /// 其余阶段失败则放弃整条记录。工作器本身永不因此退出。
    async fn handle_fetch_failure(&self, task: &CrawlTask, err: EngineError) {
        self.state.page_failed();
        counter!("crawl_fetch_failures_total").increment(1);

        match (&task.record_id, task.page_type) {
            (Some(identity), PageType::Trailer) => {
                warn!(
                    identity = %identity,
                    "trailer fetch failed ({}), finalizing without trailer fields", err
                );
                self.finalize_record(identity).await;
            }
            (Some(identity), _) => {
                warn!(
                    identity = %identity,
                    "fetch failed after retries ({}), skipping record", err
                );
                self.assembler.discard(identity);
                self.state.record_skipped();
                counter!("crawl_records_skipped_total").increment(1);
            }
            (None, page_type) => {
                warn!("fetch failed after retries ({}), dropping {} page", err, page_type);
            }
        }
    }

    /// 放弃任务所属的记录（如果有）
    fn abandon_record(&self, task: &CrawlTask) {
        if let Some(identity) = &task.record_id {
            self.assembler.discard(identity);
            self.state.record_skipped();
            counter!("crawl_records_skipped_total").increment(1);
        }
    }

    /// robots.txt检查，失败时放行
    async fn robots_allow(&self, task: &CrawlTask, domain: &str) -> bool {
        let Some(robots) = &self.robots else {
            return true;
        };

        if let Ok(Some(delay)) = robots
            .get_crawl_delay(&task.url, &self.state.user_agent)
            .await
        {
            self.throttle.raise_delay_floor(domain, delay);
        }

        robots
            .is_allowed(&task.url, &self.state.user_agent)
            .await
            .unwrap_or(true)
    }
}
