// Copyright (c) 2025 Kirky.X
//
// Licensed under the MIT License
// See LICENSE file in the project root for full license information.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

use crate::domain::models::record::RecordIdentity;

/// 页面类型枚举
///
/// 一条记录的采集链按固定顺序经过四种页面：
/// Listing（列表页）→ Detail（详情页）→ BoxOffice（票房页）→ Trailer（预告片页）。
/// 列表页本身不属于任何记录，只负责发现详情链接和下一页。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum PageType {
    /// 列表页，发现详情链接和分页链接
    #[default]
    Listing,
    /// 详情页，记录链的第一个阶段
    Detail,
    /// 票房页，记录链的第二个阶段
    BoxOffice,
    /// 预告片页，记录链的最后一个阶段（可选）
    Trailer,
}

impl PageType {
    /// 任务的基础优先级
    ///
    /// 链延续任务（Detail/BoxOffice/Trailer）优先于新的列表任务，
    /// 保证在途的记录链先被排干，限制同时打开的半成品记录数量。
    /// 数值越大优先级越高，越深的阶段越先执行。
    pub fn base_priority(&self) -> i32 {
        match self {
            PageType::Listing => 0,
            PageType::Detail => 10,
            PageType::BoxOffice => 20,
            PageType::Trailer => 30,
        }
    }

    /// 是否属于某条记录链的延续阶段
    pub fn is_chain_stage(&self) -> bool {
        !matches!(self, PageType::Listing)
    }
}

impl fmt::Display for PageType {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            PageType::Listing => write!(f, "listing"),
            PageType::Detail => write!(f, "detail"),
            PageType::BoxOffice => write!(f, "box_office"),
            PageType::Trailer => write!(f, "trailer"),
        }
    }
}

impl FromStr for PageType {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "listing" => Ok(PageType::Listing),
            "detail" => Ok(PageType::Detail),
            "box_office" => Ok(PageType::BoxOffice),
            "trailer" => Ok(PageType::Trailer),
            _ => Err(()),
        }
    }
}

/// 阶段结果枚举
///
/// 解析器对一个页面给出的三种结论：
/// 继续（还有后续阶段）、终止（记录在此定稿）、放弃（记录被整体丢弃）。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StageOutcome {
    /// 链继续，后续阶段的任务已经派生
    Continue,
    /// 链在此终止，记录可以定稿
    Terminal,
    /// 记录被放弃，不产生任何导出
    Skip,
}

/// 采集任务
///
/// 队列中的一个工作单元。入队后不可变，恰好被一个工作器消费一次。
/// `record_id` 在列表阶段派生详情任务时确定，之后沿整条链传递；
/// `context` 携带链上各阶段共享的键值（分组名、渲染等待时间等）。
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CrawlTask {
    /// 任务唯一标识符，仅用于日志关联
    pub id: Uuid,
    /// 目标URL
    pub url: String,
    /// 页面类型，决定由哪个解析器处理
    pub page_type: PageType,
    /// 所属记录标识，列表任务为空
    pub record_id: Option<RecordIdentity>,
    /// 随链传递的上下文键值
    pub context: HashMap<String, String>,
    /// 调度优先级，数值越大越先执行
    pub priority: i32,
    /// 已尝试的抓取次数
    pub attempt_count: u32,
}

/// 上下文键：列表分组（体裁）名称
pub const CTX_GROUP: &str = "group";
/// 上下文键：渲染等待毫秒数
pub const CTX_WAIT_MS: &str = "wait_ms";

impl CrawlTask {
    /// 创建一个新的采集任务
    ///
    /// # 参数
    ///
    /// * `page_type` - 页面类型
    /// * `url` - 目标URL
    ///
    /// # 返回值
    ///
    /// 返回优先级为页面类型基础优先级的新任务
    pub fn new(page_type: PageType, url: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            url: url.into(),
            page_type,
            record_id: None,
            context: HashMap::new(),
            priority: page_type.base_priority(),
            attempt_count: 0,
        }
    }

    /// 绑定记录标识
    pub fn with_record_id(mut self, record_id: RecordIdentity) -> Self {
        self.record_id = Some(record_id);
        self
    }

    /// 附加一个上下文键值
    pub fn with_context(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.context.insert(key.into(), value.into());
        self
    }

    /// 继承另一任务的上下文，已有的键不被覆盖
    pub fn inherit_context(mut self, other: &CrawlTask) -> Self {
        for (k, v) in &other.context {
            self.context.entry(k.clone()).or_insert_with(|| v.clone());
        }
        self
    }

    /// 覆盖调度优先级
    pub fn with_priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }

    /// 读取渲染等待毫秒数（来自上下文）
    pub fn wait_ms(&self) -> Option<u64> {
        self.context.get(CTX_WAIT_MS).and_then(|v| v.parse().ok())
    }

    /// 读取所属分组名（来自上下文）
    pub fn group(&self) -> Option<&str> {
        self.context.get(CTX_GROUP).map(|s| s.as_str())
    }
}
