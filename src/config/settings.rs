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

use config::{Config, ConfigError, Environment, File};
use serde::Deserialize;

/// 应用程序配置设置
///
/// 包含采集、抓取、限速、全局上限和站点相关的所有配置项
#[derive(Debug, Deserialize)]
pub struct Settings {
    /// 采集运行配置
    pub crawl: CrawlSettings,
    /// 抓取引擎配置
    pub fetch: FetchSettings,
    /// 限速配置
    pub throttle: ThrottleSettings,
    /// 全局上限配置
    #[serde(default)]
    pub limits: LimitSettings,
    /// 站点配置
    pub site: SiteSettings,
}

/// 采集运行配置
#[derive(Debug, Deserialize)]
pub struct CrawlSettings {
    /// 种子列表页URL
    pub seeds: Vec<String>,
    /// 工作器数量
    pub workers: usize,
    /// 是否遵守robots.txt
    pub obey_robots: bool,
    /// 无法从详情URL提取记录编号时是否按错误处理
    pub strict_identity: bool,
    /// 协作停止后的硬停止宽限期（秒）
    pub shutdown_grace_secs: u64,
    /// 周期统计日志的间隔（秒）
    pub stats_interval_secs: u64,
}

/// 抓取引擎配置
#[derive(Debug, Deserialize)]
pub struct FetchSettings {
    /// User-Agent
    pub user_agent: String,
    /// 单次请求超时（秒）
    pub timeout_secs: u64,
    /// 外部渲染服务地址，空表示只用普通HTTP
    pub render_endpoint: Option<String>,
    /// 临时响应缓存目录，空表示不缓存
    pub cache_dir: Option<String>,
    /// 单任务最大重试次数
    pub max_retries: u32,
    /// 重试初始退避（毫秒）
    pub initial_backoff_ms: u64,
    /// 重试最大退避（毫秒）
    pub max_backoff_ms: u64,
    /// 连续连接失败多少次判定渲染端故障
    pub outage_threshold: u32,
}

/// 限速配置
#[derive(Debug, Deserialize)]
pub struct ThrottleSettings {
    /// 单域名同时在途的抓取上限
    pub per_domain_concurrency: usize,
    /// 单域名每分钟请求预算，缺省不设预算
    pub requests_per_minute: Option<u32>,
    /// 基础请求间隔（毫秒）
    pub download_delay_ms: u64,
    /// 是否启用自适应限速
    pub autothrottle: bool,
    /// 自适应延迟起始值（毫秒）
    pub start_delay_ms: u64,
    /// 自适应延迟上界（毫秒）
    pub max_delay_ms: u64,
    /// 自适应目标并发度
    pub target_concurrency: f64,
}

/// 全局上限配置
#[derive(Debug, Default, Deserialize)]
pub struct LimitSettings {
    /// 总抓取页数上限，缺省不设
    pub max_total_pages: Option<u64>,
    /// 定稿记录数上限，缺省不设
    pub max_records: Option<u64>,
    /// 每个分组的列表页数上限，缺省不设
    pub max_pages_per_group: Option<u64>,
}

/// 站点配置
#[derive(Debug, Deserialize)]
pub struct SiteSettings {
    /// 相对链接解析用的站点根地址
    pub base_url: String,
    /// 年份截止线，早于该年的记录在详情阶段被放弃
    pub year_cutoff: Option<i32>,
    /// 分组（体裁）允许清单，缺省不过滤
    pub groups: Option<Vec<String>>,
}

impl Settings {
    /// 创建新的配置实例
    ///
    /// 从环境变量加载配置，支持默认值
    ///
    /// # Returns
    ///
    /// * `Ok(Settings)` - 成功加载的配置
    /// * `Err(ConfigError)` - 配置加载失败
    pub fn new() -> Result<Self, ConfigError> {
        let env = std::env::var("APP_ENVIRONMENT").unwrap_or_else(|_| "default".to_string());
        let builder = Config::builder()
            // Default crawl settings
            .set_default("crawl.seeds", Vec::<String>::new())?
            .set_default("crawl.workers", 4)?
            .set_default("crawl.obey_robots", true)?
            .set_default("crawl.strict_identity", false)?
            .set_default("crawl.shutdown_grace_secs", 30)?
            .set_default("crawl.stats_interval_secs", 10)?
            // Default fetch settings
            .set_default("fetch.user_agent", "Mozilla/5.0 (compatible; cinecrawl/1.0)")?
            .set_default("fetch.timeout_secs", 30)?
            .set_default("fetch.max_retries", 3)?
            .set_default("fetch.initial_backoff_ms", 1000)?
            .set_default("fetch.max_backoff_ms", 60000)?
            .set_default("fetch.outage_threshold", 8)?
            // Default throttle settings (mirrors the polite profile for
            // slow public sites: low concurrency, autothrottle on)
            .set_default("throttle.per_domain_concurrency", 8)?
            .set_default("throttle.download_delay_ms", 1000)?
            .set_default("throttle.autothrottle", true)?
            .set_default("throttle.start_delay_ms", 5000)?
            .set_default("throttle.max_delay_ms", 60000)?
            .set_default("throttle.target_concurrency", 1.0)?
            // Default site settings
            .set_default("site.base_url", "https://www.allocine.fr/")?
            .set_default("site.year_cutoff", 2000)?
            .add_source(File::with_name("config/default").required(false))
            .add_source(File::with_name(&format!("config/{}", env)).required(false))
            .add_source(
                Environment::with_prefix("CINECRAWL")
                    .separator("__")
                    .try_parsing(true)
                    .list_separator(",")
                    .with_list_parse_key("crawl.seeds")
                    .with_list_parse_key("site.groups"),
            );

        builder.build()?.try_deserialize()
    }
}

#[cfg(test)]
#[path = "settings_test.rs"]
mod tests;
