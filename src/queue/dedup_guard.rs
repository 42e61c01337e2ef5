// Copyright (c) 2025 Kirky.X
//
// Licensed under the MIT License
// See LICENSE file in the project root for full license information.

use dashmap::DashSet;

use crate::domain::models::record::RecordIdentity;

/// 去重护卫
///
/// 跟踪已经被调度过详情阶段的记录标识，保证每个标识至多被
/// 处理一次。`mark_seen` 是原子的检查并置位：并发的竞争者中
/// 恰好一个得到 true。一次运行内没有移除操作，集合随发现的
/// 标识数线性增长，这是用内存换去重正确性的有意取舍。
#[derive(Default)]
pub struct DedupGuard {
    visited: DashSet<RecordIdentity>,
}

impl DedupGuard {
    /// 创建新的去重护卫
    pub fn new() -> Self {
        Self::default()
    }

    /// 标识是否已被调度过
    pub fn seen(&self, identity: &RecordIdentity) -> bool {
        self.visited.contains(identity)
    }

    /// 标记标识为已调度
    ///
    /// # 返回值
    ///
    /// 当且仅当本次调用是第一个标记者时返回 true
    pub fn mark_seen(&self, identity: RecordIdentity) -> bool {
        self.visited.insert(identity)
    }

    /// 已发现的不同标识数
    pub fn len(&self) -> usize {
        self.visited.len()
    }

    /// 是否还没有任何标识
    pub fn is_empty(&self) -> bool {
        self.visited.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn test_first_marker_wins() {
        let guard = DedupGuard::new();
        let id = RecordIdentity::new("23503");

        assert!(!guard.seen(&id));
        assert!(guard.mark_seen(id.clone()));
        assert!(guard.seen(&id));
        assert!(!guard.mark_seen(id));
        assert_eq!(guard.len(), 1);
    }

    #[tokio::test]
    async fn test_concurrent_mark_seen_exactly_one_true() {
        let guard = Arc::new(DedupGuard::new());
        let mut handles = Vec::new();

        for _ in 0..64 {
            let guard = guard.clone();
            handles.push(tokio::spawn(async move {
                guard.mark_seen(RecordIdentity::new("race"))
            }));
        }

        let mut winners = 0;
        for handle in handles {
            if handle.await.unwrap() {
                winners += 1;
            }
        }

        assert_eq!(winners, 1);
        assert_eq!(guard.len(), 1);
    }
}
