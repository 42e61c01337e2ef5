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

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Duration;
use thiserror::Error;

/// 引擎错误类型
#[derive(Error, Debug)]
pub enum EngineError {
    /// 请求失败
    #[error("Request failed: {0}")]
    RequestFailed(#[from] reqwest::Error),
    /// 非成功状态码
    #[error("HTTP status {0}")]
    Status(u16),
    /// 超时
    #[error("Timeout")]
    Timeout,
    /// 渲染服务返回错误
    #[error("Render service error: {0}")]
    RenderService(String),
    /// 本地IO错误（响应缓存）
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    /// 所有引擎都失败
    #[error("All engines failed")]
    AllEnginesFailed,
    /// 其他错误
    #[error("Other error: {0}")]
    Other(String),
}

impl EngineError {
    /// 判断错误是否可重试
    ///
    /// 超时、连接失败、429 和 5xx 属于瞬时故障，值得退避重试；
    /// 其余错误重试没有意义。
    pub fn is_retryable(&self) -> bool {
        match self {
            EngineError::RequestFailed(e) => {
                e.is_timeout() || e.is_connect() || e.status().is_some_and(|s| s.is_server_error())
            }
            EngineError::Timeout => true,
            EngineError::Status(code) => *code == 429 || (500..600).contains(code),
            EngineError::RenderService(_) => true,
            _ => false,
        }
    }

    /// 判断错误是否属于连接层故障
    ///
    /// 连接层故障（DNS、拒绝连接）连续出现时会被上报为
    /// 渲染端故障，由运行控制器决定是否中止整个运行。
    pub fn is_connectivity(&self) -> bool {
        match self {
            EngineError::RequestFailed(e) => e.is_connect(),
            EngineError::Timeout => false,
            _ => false,
        }
    }
}

/// 抓取请求
#[derive(Debug, Clone)]
pub struct FetchRequest {
    /// 目标URL
    pub url: String,
    /// 请求头
    pub headers: HashMap<String, String>,
    /// 超时时间
    pub timeout: Duration,
    /// 渲染等待时长，需要JS渲染的页面带上这个提示
    pub wait: Option<Duration>,
}

impl FetchRequest {
    /// 用默认头和超时构造请求
    pub fn new(url: impl Into<String>, timeout: Duration) -> Self {
        Self {
            url: url.into(),
            headers: HashMap::new(),
            timeout,
            wait: None,
        }
    }

    /// 附加渲染等待提示
    pub fn with_wait(mut self, wait: Duration) -> Self {
        self.wait = Some(wait);
        self
    }
}

/// 抓取响应
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FetchResponse {
    /// HTTP状态码
    pub status: u16,
    /// 渲染后的页面内容
    pub body: String,
    /// 内容类型
    pub content_type: String,
    /// 响应头
    pub headers: HashMap<String, String>,
    /// 响应耗时（毫秒）
    pub elapsed_ms: u64,
}

impl FetchResponse {
    /// 是否为成功响应
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

/// 抓取引擎特质
///
/// 渲染边界：给定URL返回渲染后的HTML。是否执行JS是实现的
/// 选择，编排核心把引擎当作不透明的协作方。
#[async_trait]
pub trait FetchEngine: Send + Sync {
    /// 执行抓取
    async fn fetch(&self, request: &FetchRequest) -> Result<FetchResponse, EngineError>;

    /// 计算对请求的支持分数（0-100）
    fn support_score(&self, request: &FetchRequest) -> u8;

    /// 引擎名称
    fn name(&self) -> &'static str;
}
