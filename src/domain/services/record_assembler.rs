// Copyright (c) 2025 Kirky.X
//
// Licensed under the MIT License
// See LICENSE file in the project root for full license information.

use dashmap::{DashMap, DashSet};
use thiserror::Error;
use tracing::debug;

use crate::domain::models::record::{FieldValue, FinalizedRecord, PartialRecord, RecordIdentity};
use crate::domain::models::task::PageType;

/// 装配错误类型
#[derive(Error, Debug)]
pub enum AssemblerError {
    /// 记录已经定稿，重复定稿被拒绝
    #[error("record {0} already finalized")]
    AlreadyFinalized(RecordIdentity),

    /// 没有这个标识的在途记录
    #[error("no open record for {0}")]
    UnknownRecord(RecordIdentity),
}

/// 记录装配器
///
/// 按记录标识合并各阶段解析器产出的字段更新，并保证每条记录
/// 恰好定稿一次。链顺序不变量（同一标识的任务不会被两个工作器
/// 同时持有）使得这里只需要单个操作级别的原子性。
#[derive(Default)]
pub struct RecordAssembler {
    /// 在途的累积记录
    open: DashMap<RecordIdentity, PartialRecord>,
    /// 已定稿（或已放弃）的标识，拒绝重复定稿
    closed: DashSet<RecordIdentity>,
}

impl RecordAssembler {
    /// 创建新的记录装配器
    pub fn new() -> Self {
        Self::default()
    }

    /// 合并一个阶段的字段更新
    ///
    /// 标识对应的记录不存在时自动打开。记录已经定稿时更新被
    /// 丢弃并返回错误，由调用方决定日志级别。
    ///
    /// # 参数
    ///
    /// * `identity` - 记录标识
    /// * `stage` - 产生更新的页面阶段
    /// * `updates` - 字段更新
    pub fn update(
        &self,
        identity: &RecordIdentity,
        stage: PageType,
        updates: Vec<(String, FieldValue)>,
    ) -> Result<(), AssemblerError> {
        if self.closed.contains(identity) {
            return Err(AssemblerError::AlreadyFinalized(identity.clone()));
        }
        self.open
            .entry(identity.clone())
            .or_insert_with(|| PartialRecord::open(identity.clone()))
            .apply(stage, updates);
        Ok(())
    }

    /// 定稿一条记录
    ///
    /// 把累积记录冻结为最终记录并移出在途集合。同一标识的第二次
    /// 定稿返回 `AlreadyFinalized`。
    ///
    /// # 返回值
    ///
    /// * `Ok(FinalizedRecord)` - 冻结后的记录
    /// * `Err(AssemblerError)` - 重复定稿或标识未知
    pub fn finalize(&self, identity: &RecordIdentity) -> Result<FinalizedRecord, AssemblerError> {
        match self.open.remove(identity) {
            Some((_, partial)) => {
                self.closed.insert(identity.clone());
                Ok(partial.freeze())
            }
            None => {
                if self.closed.contains(identity) {
                    Err(AssemblerError::AlreadyFinalized(identity.clone()))
                } else {
                    Err(AssemblerError::UnknownRecord(identity.clone()))
                }
            }
        }
    }

    /// 放弃一条记录
    ///
    /// `Skip` 结论走这里：丢弃累积内容，不产生导出。返回是否
    /// 确实存在被丢弃的在途记录。
    pub fn discard(&self, identity: &RecordIdentity) -> bool {
        self.closed.insert(identity.clone());
        let existed = self.open.remove(identity).is_some();
        if existed {
            debug!(identity = %identity, "partial record discarded");
        }
        existed
    }

    /// 当前在途记录数
    pub fn open_count(&self) -> usize {
        self.open.len()
    }

    /// 取走全部在途记录的标识
    ///
    /// 硬停止时用于统计被遗弃的半成品记录。
    pub fn drain_abandoned(&self) -> Vec<RecordIdentity> {
        let identities: Vec<RecordIdentity> =
            self.open.iter().map(|entry| entry.key().clone()).collect();
        for identity in &identities {
            self.open.remove(identity);
        }
        identities
    }
}
