// Copyright (c) 2025 Kirky.X
//
// Licensed under the MIT License
// See LICENSE file in the project root for full license information.

use parking_lot::Mutex;
use std::cmp::Ordering;
use std::collections::BinaryHeap;
use thiserror::Error;
use tokio::sync::Notify;

use crate::domain::models::task::CrawlTask;

/// 队列错误类型
#[derive(Error, Debug, PartialEq, Eq)]
pub enum FrontierError {
    /// 队列已关闭，不再接收任务
    #[error("frontier closed")]
    Closed,
}

/// 堆内条目
///
/// 优先级高者先出队，同优先级按入队顺序先进先出。
struct QueuedTask {
    priority: i32,
    seq: u64,
    task: CrawlTask,
}

impl PartialEq for QueuedTask {
    fn eq(&self, other: &Self) -> bool {
        self.priority == other.priority && self.seq == other.seq
    }
}

impl Eq for QueuedTask {}

impl PartialOrd for QueuedTask {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for QueuedTask {
    fn cmp(&self, other: &Self) -> Ordering {
        self.priority
            .cmp(&other.priority)
            .then_with(|| other.seq.cmp(&self.seq))
    }
}

struct FrontierState {
    heap: BinaryHeap<QueuedTask>,
    next_seq: u64,
    in_flight: usize,
    closed: bool,
    pushed_total: u64,
}

/// 任务边界队列
///
/// 工作器共享的优先级队列。链延续任务通过更高的基础优先级
/// 先于新的列表任务出队。`pop` 在队列空但尚未排干时协作地
/// 挂起等待，不忙等。
///
/// 终止条件（静止检测）：堆空且没有已出队但未调用
/// `task_done` 的任务，此时所有等待者收到 `None`。`close`
/// 是有意的提前停止（到达全局上限、致命的渲染端故障），
/// 不是错误。
pub struct Frontier {
    state: Mutex<FrontierState>,
    notify: Notify,
    close_notify: Notify,
}

impl Default for Frontier {
    fn default() -> Self {
        Self::new()
    }
}

impl Frontier {
    /// 创建新的边界队列
    pub fn new() -> Self {
        Self {
            state: Mutex::new(FrontierState {
                heap: BinaryHeap::new(),
                next_seq: 0,
                in_flight: 0,
                closed: false,
                pushed_total: 0,
            }),
            notify: Notify::new(),
            close_notify: Notify::new(),
        }
    }

    /// 入队一个任务
    ///
    /// # 返回值
    ///
    /// * `Ok(())` - 任务已入队
    /// * `Err(FrontierError::Closed)` - 队列已关闭，任务被丢弃
    pub fn push(&self, task: CrawlTask) -> Result<(), FrontierError> {
        {
            let mut state = self.state.lock();
            if state.closed {
                return Err(FrontierError::Closed);
            }
            let seq = state.next_seq;
            state.next_seq += 1;
            state.pushed_total += 1;
            state.heap.push(QueuedTask {
                priority: task.priority,
                seq,
                task,
            });
        }
        self.notify.notify_one();
        Ok(())
    }

    /// 出队一个任务
    ///
    /// 队列空但仍有在途任务时挂起等待；排干或关闭后对所有
    /// 等待者返回 `None`。取走任务后必须在处理完成时调用
    /// `task_done`，否则静止检测永远不会触发。
    pub async fn pop(&self) -> Option<CrawlTask> {
        loop {
            let notified = self.notify.notified();
            {
                let mut state = self.state.lock();
                if let Some(queued) = state.heap.pop() {
                    state.in_flight += 1;
                    return Some(queued.task);
                }
                if state.closed || state.in_flight == 0 {
                    drop(state);
                    // 让其他等待者也观察到排干状态
                    self.notify.notify_waiters();
                    return None;
                }
            }
            notified.await;
        }
    }

    /// 宣告一个已出队任务处理完毕
    ///
    /// 任务派生的新任务必须在调用本方法之前入队，否则会出现
    /// 假性静止。
    pub fn task_done(&self) {
        let drained = {
            let mut state = self.state.lock();
            state.in_flight = state.in_flight.saturating_sub(1);
            state.in_flight == 0 && state.heap.is_empty()
        };
        if drained {
            self.notify.notify_waiters();
        }
    }

    /// 关闭队列
    ///
    /// 停止接收和发放任务。已经出队的任务允许自然完成。
    pub fn close(&self) {
        self.state.lock().closed = true;
        self.notify.notify_waiters();
        self.close_notify.notify_waiters();
    }

    /// 队列是否已关闭
    pub fn is_closed(&self) -> bool {
        self.state.lock().closed
    }

    /// 等待队列被关闭
    ///
    /// 硬停止的宽限期从关闭时刻起算，正常排干的运行不受
    /// 宽限期约束。
    pub async fn wait_closed(&self) {
        loop {
            let notified = self.close_notify.notified();
            if self.state.lock().closed {
                return;
            }
            notified.await;
        }
    }

    /// 尚未完成的任务总数（排队中 + 在途）
    pub fn pending(&self) -> usize {
        let state = self.state.lock();
        state.heap.len() + state.in_flight
    }

    /// 累计入队的任务数
    pub fn pushed_total(&self) -> u64 {
        self.state.lock().pushed_total
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::models::task::PageType;
    use std::sync::Arc;
    use std::time::Duration;

    fn task(page_type: PageType, url: &str) -> CrawlTask {
        CrawlTask::new(page_type, url)
    }

    #[tokio::test]
    async fn test_chain_tasks_pop_before_listing_tasks() {
        let frontier = Frontier::new();
        frontier.push(task(PageType::Listing, "http://s/l1")).unwrap();
        frontier.push(task(PageType::Detail, "http://s/d1")).unwrap();
        frontier.push(task(PageType::Trailer, "http://s/t1")).unwrap();
        frontier.push(task(PageType::BoxOffice, "http://s/b1")).unwrap();

        let order: Vec<PageType> = [
            frontier.pop().await.unwrap().page_type,
            frontier.pop().await.unwrap().page_type,
            frontier.pop().await.unwrap().page_type,
            frontier.pop().await.unwrap().page_type,
        ]
        .to_vec();

        assert_eq!(
            order,
            vec![
                PageType::Trailer,
                PageType::BoxOffice,
                PageType::Detail,
                PageType::Listing
            ]
        );
    }

    #[tokio::test]
    async fn test_same_priority_is_fifo() {
        let frontier = Frontier::new();
        frontier.push(task(PageType::Detail, "http://s/first")).unwrap();
        frontier.push(task(PageType::Detail, "http://s/second")).unwrap();

        assert_eq!(frontier.pop().await.unwrap().url, "http://s/first");
        assert_eq!(frontier.pop().await.unwrap().url, "http://s/second");
    }

    #[tokio::test]
    async fn test_empty_frontier_drains_immediately() {
        let frontier = Frontier::new();
        assert!(frontier.pop().await.is_none());
    }

    #[tokio::test]
    async fn test_pop_waits_for_in_flight_producer() {
        let frontier = Arc::new(Frontier::new());
        frontier.push(task(PageType::Listing, "http://s/l1")).unwrap();

        let producer = frontier.clone();
        let popped = producer.pop().await.unwrap();
        assert_eq!(popped.url, "http://s/l1");

        // 另一个工作器此刻出队会挂起：队列空但 l1 仍在途
        let waiter = frontier.clone();
        let handle = tokio::spawn(async move { waiter.pop().await });
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(!handle.is_finished());

        // l1 派生一个任务后完成，等待者应取到派生任务
        producer.push(task(PageType::Detail, "http://s/d1")).unwrap();
        producer.task_done();

        let derived = handle.await.unwrap().unwrap();
        assert_eq!(derived.url, "http://s/d1");

        producer.task_done();
        assert!(frontier.pop().await.is_none());
    }

    #[tokio::test]
    async fn test_close_rejects_push_and_releases_waiters() {
        let frontier = Arc::new(Frontier::new());
        frontier.push(task(PageType::Listing, "http://s/l1")).unwrap();
        let _held = frontier.pop().await.unwrap();

        let waiter = frontier.clone();
        let handle = tokio::spawn(async move { waiter.pop().await });
        tokio::time::sleep(Duration::from_millis(20)).await;

        frontier.close();
        assert!(handle.await.unwrap().is_none());
        assert_eq!(
            frontier.push(task(PageType::Detail, "http://s/d1")),
            Err(FrontierError::Closed)
        );
    }
}
