// Copyright (c) 2025 Kirky.X
//
// Licensed under the MIT License
// See LICENSE file in the project root for full license information.

use crate::engines::traits::{EngineError, FetchEngine, FetchRequest, FetchResponse};
use async_trait::async_trait;
use sha2::{Digest, Sha256};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, warn};

/// 带响应缓存的引擎装饰器
///
/// 把成功响应以URL的SHA-256为键落在临时目录里，命中时不再
/// 发起网络请求。缓存是运行期的临时产物，运行控制器在结束时
/// 负责删除整个目录。
pub struct CachingEngine {
    inner: Arc<dyn FetchEngine>,
    dir: PathBuf,
}

impl CachingEngine {
    /// 用内层引擎和缓存目录创建装饰器
    pub fn new(inner: Arc<dyn FetchEngine>, dir: impl Into<PathBuf>) -> Self {
        Self {
            inner,
            dir: dir.into(),
        }
    }

    fn cache_path(&self, url: &str) -> PathBuf {
        let digest = Sha256::digest(url.as_bytes());
        self.dir.join(format!("{}.json", hex::encode(digest)))
    }

    async fn load(&self, path: &Path) -> Option<FetchResponse> {
        let bytes = tokio::fs::read(path).await.ok()?;
        serde_json::from_slice(&bytes).ok()
    }

    async fn store(&self, path: &Path, response: &FetchResponse) {
        let result = async {
            tokio::fs::create_dir_all(&self.dir).await?;
            let bytes = serde_json::to_vec(response)
                .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))?;
            tokio::fs::write(path, bytes).await
        }
        .await;
        if let Err(e) = result {
            // 缓存写失败只降级为直连，不影响抓取本身
            warn!("failed to write response cache {}: {}", path.display(), e);
        }
    }
}

#[async_trait]
impl FetchEngine for CachingEngine {
    async fn fetch(&self, request: &FetchRequest) -> Result<FetchResponse, EngineError> {
        let path = self.cache_path(&request.url);
        if let Some(cached) = self.load(&path).await {
            debug!(url = %request.url, "response cache hit");
            return Ok(cached);
        }

        let response = self.inner.fetch(request).await?;
        if response.is_success() {
            self.store(&path, &response).await;
        }
        Ok(response)
    }

    fn support_score(&self, request: &FetchRequest) -> u8 {
        self.inner.support_score(request)
    }

    fn name(&self) -> &'static str {
        "cache"
    }
}
