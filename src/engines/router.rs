// Copyright (c) 2025 Kirky.X
//
// Licensed under the MIT License
// See LICENSE file in the project root for full license information.

use crate::engines::traits::{EngineError, FetchEngine, FetchRequest, FetchResponse};
use metrics::counter;
use std::sync::Arc;
use tracing::{debug, warn};

/// 引擎路由器
///
/// 按支持分数为每个请求挑选合适的抓取引擎：普通页面走HTTP
/// 引擎，带渲染等待提示的页面走渲染服务。首选引擎失败时按
/// 分数降序逐个回退。
pub struct EngineRouter {
    /// 引擎列表
    engines: Vec<Arc<dyn FetchEngine>>,
}

impl EngineRouter {
    /// 创建新的引擎路由器
    ///
    /// # 参数
    ///
    /// * `engines` - 可用的引擎列表，至少一个
    pub fn new(engines: Vec<Arc<dyn FetchEngine>>) -> Self {
        Self { engines }
    }

    /// 为请求路由并执行抓取
    ///
    /// # 返回值
    ///
    /// * `Ok(FetchResponse)` - 第一个成功引擎的响应
    /// * `Err(EngineError)` - 所有引擎都失败时返回最后的错误
    pub async fn route(&self, request: &FetchRequest) -> Result<FetchResponse, EngineError> {
        let mut ranked: Vec<&Arc<dyn FetchEngine>> = self.engines.iter().collect();
        ranked.sort_by_key(|engine| std::cmp::Reverse(engine.support_score(request)));

        let mut last_error = EngineError::AllEnginesFailed;
        for engine in ranked {
            debug!(engine = engine.name(), url = %request.url, "routing fetch");
            match engine.fetch(request).await {
                Ok(response) => {
                    counter!("crawl_engine_fetches_total", "engine" => engine.name()).increment(1);
                    return Ok(response);
                }
                Err(e) => {
                    counter!("crawl_engine_failures_total", "engine" => engine.name()).increment(1);
                    warn!(engine = engine.name(), url = %request.url, "engine failed: {}", e);
                    last_error = e;
                }
            }
        }
        Err(last_error)
    }
}
