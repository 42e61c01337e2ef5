// Copyright (c) 2025 Kirky.X
//
// Licensed under the MIT License
// See LICENSE file in the project root for full license information.

use futures::future::join_all;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{info, warn};

use crate::workers::fetch_worker::FetchWorker;

/// 工作管理器
///
/// 持有工作器任务句柄，负责启动和带宽限期的收尾。
#[derive(Default)]
pub struct WorkerManager {
    handles: Vec<JoinHandle<()>>,
}

impl WorkerManager {
    /// 创建新的工作管理器
    pub fn new() -> Self {
        Self::default()
    }

    /// 启动工作进程
    ///
    /// 创建并启动指定数量的工作进程
    ///
    /// # 参数
    ///
    /// * `count` - 要启动的工作进程数量
    /// * `make_worker` - 工作器构造闭包
    pub fn start_workers(&mut self, count: usize, mut make_worker: impl FnMut() -> FetchWorker) {
        for _ in 0..count {
            let worker = make_worker();
            // We spawn the worker loop on a separate task to avoid blocking
            // the loop that spawns workers.
            let handle = tokio::spawn(async move {
                worker.run().await;
            });
            self.handles.push(handle);
        }
        info!("{} fetch workers started", count);
    }

    /// 等待全部工作器退出
    ///
    /// 正常排干的运行不设时限；`stop_signal` 触发（队列被关闭）
    /// 后才开始计宽限期，超时强制中止剩余工作器。强制中止会把
    /// 在途的半成品记录留给装配器统计为遗弃。
    ///
    /// # 参数
    ///
    /// * `stop_signal` - 停止被请求时完成的Future
    /// * `grace` - 停止后允许在途任务收尾的宽限期
    ///
    /// # 返回值
    ///
    /// 工作器自然退出返回 true，被强制中止返回 false
    pub async fn join_with_grace(
        &mut self,
        stop_signal: impl std::future::Future<Output = ()>,
        grace: Duration,
    ) -> bool {
        let mut handles = std::mem::take(&mut self.handles);
        let mut join = join_all(handles.iter_mut());

        let mut stop_requested = false;
        tokio::select! {
            _ = &mut join => {}
            _ = stop_signal => {
                stop_requested = true;
            }
        }
        if !stop_requested {
            return true;
        }

        match tokio::time::timeout(grace, join).await {
            Ok(_) => true,
            Err(_) => {
                warn!("workers did not stop within grace period, aborting");
                for handle in &handles {
                    handle.abort();
                }
                false
            }
        }
    }
}
