// Copyright (c) 2025 Kirky.X
//
// Licensed under the MIT License
// See LICENSE file in the project root for full license information.

use async_trait::async_trait;
use std::sync::Mutex;
use thiserror::Error;
use tracing::info;

use crate::domain::models::record::FinalizedRecord;

/// 导出错误类型
#[derive(Error, Debug)]
pub enum ExportError {
    #[error("serialization failed: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("export sink failed: {0}")]
    Sink(String),
}

/// 导出器接口
///
/// 最终记录的去向。每个存活的标识至多调用一次 `emit`，
/// 记录之间的先后顺序不作保证。关系型存储、CSV之类的落地
/// 属于外部协作方，在这里实现该接口接入。
#[async_trait]
pub trait Exporter: Send + Sync {
    /// 接收一条最终记录
    async fn emit(&self, record: FinalizedRecord) -> Result<(), ExportError>;
}

/// JSON行导出器
///
/// 每条记录一行JSON写到标准输出，供命令行管道消费。
#[derive(Default)]
pub struct JsonLinesExporter;

impl JsonLinesExporter {
    /// 创建新的JSON行导出器
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl Exporter for JsonLinesExporter {
    async fn emit(&self, record: FinalizedRecord) -> Result<(), ExportError> {
        let line = serde_json::to_string(&record)?;
        println!("{}", line);
        info!(identity = %record.identity, "record exported");
        Ok(())
    }
}

/// 收集导出器
///
/// 把记录留在内存里，用于测试和程序内消费。
#[derive(Default)]
pub struct CollectingExporter {
    records: Mutex<Vec<FinalizedRecord>>,
}

impl CollectingExporter {
    /// 创建新的收集导出器
    pub fn new() -> Self {
        Self::default()
    }

    /// 已收集的记录数
    pub fn len(&self) -> usize {
        self.records.lock().expect("exporter lock poisoned").len()
    }

    /// 是否还没有收到记录
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// 取走全部已收集的记录
    pub fn take(&self) -> Vec<FinalizedRecord> {
        std::mem::take(&mut *self.records.lock().expect("exporter lock poisoned"))
    }
}

#[async_trait]
impl Exporter for CollectingExporter {
    async fn emit(&self, record: FinalizedRecord) -> Result<(), ExportError> {
        self.records
            .lock()
            .expect("exporter lock poisoned")
            .push(record);
        Ok(())
    }
}
