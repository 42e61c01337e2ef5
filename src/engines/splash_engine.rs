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

use crate::engines::traits::{EngineError, FetchEngine, FetchRequest, FetchResponse};
use async_trait::async_trait;
use std::time::Instant;
use url::Url;

/// 渲染服务引擎
///
/// 把需要JS渲染的页面委托给外部渲染服务的 `render.html`
/// 接口（Splash风格：`render.html?url=…&wait=…`）。JS执行
/// 语义完全属于协作方，这里只是不透明的HTTP管道。
pub struct SplashEngine {
    endpoint: Url,
    user_agent: String,
}

impl SplashEngine {
    /// 创建新的渲染服务引擎
    ///
    /// # 参数
    ///
    /// * `endpoint` - 渲染服务根地址
    /// * `user_agent` - 透传给目标站点的User-Agent
    pub fn new(endpoint: Url, user_agent: impl Into<String>) -> Self {
        Self {
            endpoint,
            user_agent: user_agent.into(),
        }
    }

    fn render_url(&self, request: &FetchRequest) -> Result<Url, EngineError> {
        let mut url = self
            .endpoint
            .join("render.html")
            .map_err(|e| EngineError::RenderService(format!("invalid endpoint: {}", e)))?;
        {
            let mut query = url.query_pairs_mut();
            query.append_pair("url", &request.url);
            if let Some(wait) = request.wait {
                query.append_pair("wait", &format!("{:.1}", wait.as_secs_f64()));
            }
        }
        Ok(url)
    }
}

#[async_trait]
impl FetchEngine for SplashEngine {
    async fn fetch(&self, request: &FetchRequest) -> Result<FetchResponse, EngineError> {
        let render_url = self.render_url(request)?;

        let client = reqwest::Client::builder()
            .user_agent(&self.user_agent)
            .timeout(request.timeout + request.wait.unwrap_or_default())
            .build()?;

        let start = Instant::now();
        let response = client.get(render_url).send().await?;
        let status = response.status().as_u16();

        // 渲染服务自身出错时整个抓取算失败，可重试
        if !(200..300).contains(&status) {
            return Err(EngineError::RenderService(format!(
                "render service returned {}",
                status
            )));
        }

        let body = response.text().await?;

        Ok(FetchResponse {
            status,
            body,
            content_type: "text/html".to_string(),
            headers: std::collections::HashMap::new(),
            elapsed_ms: start.elapsed().as_millis() as u64,
        })
    }

    /// 带渲染等待提示的请求优先选择渲染引擎
    fn support_score(&self, request: &FetchRequest) -> u8 {
        if request.wait.is_some() {
            return 100;
        }
        30
    }

    fn name(&self) -> &'static str {
        "splash"
    }
}
