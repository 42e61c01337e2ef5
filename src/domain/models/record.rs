// Copyright (c) 2025 Kirky.X
//
// Licensed under the MIT License
// See LICENSE file in the project root for full license information.

use chrono::{DateTime, Utc};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

use crate::domain::models::task::PageType;

/// 详情URL中记录编号的识别模式
///
/// 依次尝试：查询参数 `id=`、路径中的 `_gen_cfilm=` 片段、
/// 路径末段的纯数字。标题不参与识别，因为标题会冲突且不稳定。
static IDENTITY_PATTERNS: Lazy<Vec<Regex>> = Lazy::new(|| {
    vec![
        Regex::new(r"[?&]id=(\d+)").expect("invalid identity pattern"),
        Regex::new(r"_gen_cfilm=(\d+)").expect("invalid identity pattern"),
        Regex::new(r"/(\d+)(?:\.html?)?/?$").expect("invalid identity pattern"),
    ]
});

/// 记录标识
///
/// 从详情URL内嵌的站点自有编号派生的稳定键。
/// 同一个标识在一次运行中至多对应一条在途记录。
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RecordIdentity(String);

impl RecordIdentity {
    /// 用已知编号构造记录标识
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// 从详情URL派生记录标识
    ///
    /// # 参数
    ///
    /// * `url` - 详情页URL
    ///
    /// # 返回值
    ///
    /// * `Some(RecordIdentity)` - 成功提取编号
    /// * `None` - URL中没有可识别的编号，任务无法去重和装配
    pub fn from_detail_url(url: &str) -> Option<Self> {
        IDENTITY_PATTERNS
            .iter()
            .find_map(|re| re.captures(url))
            .and_then(|caps| caps.get(1))
            .map(|m| Self(m.as_str().to_string()))
    }

    /// 标识的字符串形式
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for RecordIdentity {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// 字段值
///
/// 记录字段的三种载体。合并策略：标量后写覆盖（链的阶段顺序固定，
/// 等价于后阶段覆盖前阶段的默认值）；列表做保序去重并集。
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum FieldValue {
    /// 文本字段
    Text(String),
    /// 数值字段
    Number(f64),
    /// 列表字段（演员、体裁等）
    List(Vec<String>),
}

impl FieldValue {
    /// 把另一个值合并进当前值
    pub fn merge(&mut self, incoming: FieldValue) {
        match (self, incoming) {
            (FieldValue::List(existing), FieldValue::List(new_items)) => {
                for item in new_items {
                    if !existing.contains(&item) {
                        existing.push(item);
                    }
                }
            }
            (slot, incoming) => *slot = incoming,
        }
    }
}

impl From<&str> for FieldValue {
    fn from(value: &str) -> Self {
        FieldValue::Text(value.to_string())
    }
}

impl From<String> for FieldValue {
    fn from(value: String) -> Self {
        FieldValue::Text(value)
    }
}

impl From<f64> for FieldValue {
    fn from(value: f64) -> Self {
        FieldValue::Number(value)
    }
}

impl From<Vec<String>> for FieldValue {
    fn from(value: Vec<String>) -> Self {
        FieldValue::List(value)
    }
}

/// 累积中的记录
///
/// 由装配器独占持有，按阶段合并解析器产出的字段更新，
/// 同时记下各阶段贡献的先后顺序。
#[derive(Debug, Clone)]
pub struct PartialRecord {
    /// 记录标识
    identity: RecordIdentity,
    /// 已合并的字段
    fields: BTreeMap<String, FieldValue>,
    /// 按贡献顺序排列的已参与阶段
    stage_sequence: Vec<PageType>,
    /// 记录首次出现的时间
    opened_at: DateTime<Utc>,
}

impl PartialRecord {
    /// 为指定标识打开一条新的累积记录
    pub fn open(identity: RecordIdentity) -> Self {
        Self {
            identity,
            fields: BTreeMap::new(),
            stage_sequence: Vec::new(),
            opened_at: Utc::now(),
        }
    }

    /// 合并一个阶段的字段更新
    pub fn apply(&mut self, stage: PageType, updates: Vec<(String, FieldValue)>) {
        if !self.stage_sequence.contains(&stage) {
            self.stage_sequence.push(stage);
        }
        for (key, value) in updates {
            match self.fields.get_mut(&key) {
                Some(existing) => existing.merge(value),
                None => {
                    self.fields.insert(key, value);
                }
            }
        }
    }

    /// 记录标识
    pub fn identity(&self) -> &RecordIdentity {
        &self.identity
    }

    /// 按贡献顺序排列的阶段
    pub fn stage_sequence(&self) -> &[PageType] {
        &self.stage_sequence
    }

    /// 冻结为最终记录
    pub fn freeze(self) -> FinalizedRecord {
        FinalizedRecord {
            identity: self.identity,
            fields: self.fields,
            stage_sequence: self.stage_sequence,
            opened_at: self.opened_at,
            finalized_at: Utc::now(),
        }
    }
}

/// 最终记录
///
/// 链走完后冻结的快照，交给导出器，此后不再变化。
#[derive(Debug, Clone, Serialize)]
pub struct FinalizedRecord {
    /// 记录标识
    pub identity: RecordIdentity,
    /// 定稿的字段集合
    pub fields: BTreeMap<String, FieldValue>,
    /// 各阶段的贡献顺序
    pub stage_sequence: Vec<PageType>,
    /// 记录打开时间
    pub opened_at: DateTime<Utc>,
    /// 记录定稿时间
    pub finalized_at: DateTime<Utc>,
}

impl FinalizedRecord {
    /// 读取一个文本字段
    pub fn text(&self, key: &str) -> Option<&str> {
        match self.fields.get(key) {
            Some(FieldValue::Text(s)) => Some(s.as_str()),
            _ => None,
        }
    }

    /// 读取一个列表字段
    pub fn list(&self, key: &str) -> Option<&[String]> {
        match self.fields.get(key) {
            Some(FieldValue::List(items)) => Some(items.as_slice()),
            _ => None,
        }
    }
}
