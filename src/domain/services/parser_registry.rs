// Copyright (c) 2025 Kirky.X
//
// Licensed under the MIT License
// See LICENSE file in the project root for full license information.

use std::collections::HashMap;
use std::sync::Arc;
use thiserror::Error;

use crate::domain::models::record::FieldValue;
use crate::domain::models::task::{CrawlTask, PageType, StageOutcome};

/// 解析错误类型
#[derive(Error, Debug)]
pub enum ParseError {
    /// 无法从URL派生记录标识（严格模式下上报）
    #[error("missing record identity in {0}")]
    MissingIdentity(String),

    /// 文档结构整体无法解析
    #[error("malformed document: {0}")]
    Malformed(String),
}

/// 解析产出
///
/// 一个页面解析后的三部分结果：字段更新、派生任务和阶段结论。
/// 派生的详情任务在进入队列前还要经过去重护卫的过滤，
/// 去重发生在编排核心而不是解析器里，解析器保持纯函数。
#[derive(Debug)]
pub struct ParseOutput {
    /// 对所属记录的字段更新
    pub fields: Vec<(String, FieldValue)>,
    /// 派生出的后续任务
    pub tasks: Vec<CrawlTask>,
    /// 本阶段的结论
    pub outcome: StageOutcome,
}

impl ParseOutput {
    /// 链继续的产出
    pub fn advancing(fields: Vec<(String, FieldValue)>, tasks: Vec<CrawlTask>) -> Self {
        Self {
            fields,
            tasks,
            outcome: StageOutcome::Continue,
        }
    }

    /// 链在此终止的产出
    pub fn terminal(fields: Vec<(String, FieldValue)>) -> Self {
        Self {
            fields,
            tasks: Vec::new(),
            outcome: StageOutcome::Terminal,
        }
    }

    /// 放弃记录的产出
    pub fn skip() -> Self {
        Self {
            fields: Vec::new(),
            tasks: Vec::new(),
            outcome: StageOutcome::Skip,
        }
    }
}

/// 页面解析器接口
///
/// 每种页面类型注册一个实现。解析器是纯函数：输入HTML和任务
/// 上下文，输出字段更新和派生任务，不做网络和存储访问，
/// 用罐装HTML即可单独测试。
///
/// 实现约定：页面里预期的片段缺失时用文档化的默认值代替
/// （空串、零、"Non disponible"），绝不因为一个可选片段
/// 缺失而让整条链中止。
pub trait PageParser: Send + Sync {
    /// 解析一个页面
    ///
    /// # 参数
    ///
    /// * `html` - 渲染后的页面内容
    /// * `task` - 产生该页面的任务（URL与上下文）
    ///
    /// # 返回值
    ///
    /// * `Ok(ParseOutput)` - 解析产出
    /// * `Err(ParseError)` - 文档整体不可用
    fn parse(&self, html: &str, task: &CrawlTask) -> Result<ParseOutput, ParseError>;
}

/// 页面解析器注册表
///
/// 按页面类型分发的解析器集合，编排核心通过它调用站点相关
/// 的提取逻辑，自身不含任何选择器。
#[derive(Default)]
pub struct ParserRegistry {
    parsers: HashMap<PageType, Arc<dyn PageParser>>,
}

impl ParserRegistry {
    /// 创建空的注册表
    pub fn new() -> Self {
        Self::default()
    }

    /// 注册一个页面类型的解析器，重复注册时后者生效
    pub fn register(&mut self, page_type: PageType, parser: Arc<dyn PageParser>) {
        self.parsers.insert(page_type, parser);
    }

    /// 查找页面类型对应的解析器
    pub fn get(&self, page_type: PageType) -> Option<Arc<dyn PageParser>> {
        self.parsers.get(&page_type).cloned()
    }
}
