//! AnalysisStore：进程内 run_id -> Run 映射
//!
//! 外层 RwLock 只保护映射本身（插入 / 删除 / 列表），每个条目自带一把 RwLock，
//! 并发 Run 之间只在各自条目上互斥。条目附带 CancellationToken，remove 时取消后台任务。
//! update 在条目已被删除时返回 false，后台任务据此丢弃迟到的写回。

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::RwLock;
use tokio_util::sync::CancellationToken;

use crate::core::run::{Run, RunId, RunSummary};

struct RunEntry {
    run: RwLock<Run>,
    cancel: CancellationToken,
}

#[derive(Clone, Default)]
pub struct AnalysisStore {
    inner: Arc<RwLock<HashMap<RunId, Arc<RunEntry>>>>,
}

impl AnalysisStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// 插入新 Run，返回其取消令牌
    pub async fn insert(&self, run: Run) -> CancellationToken {
        let cancel = CancellationToken::new();
        let id = run.run_id.clone();
        let entry = Arc::new(RunEntry {
            run: RwLock::new(run),
            cancel: cancel.clone(),
        });
        self.inner.write().await.insert(id, entry);
        cancel
    }

    async fn entry(&self, id: &str) -> Option<Arc<RunEntry>> {
        self.inner.read().await.get(id).cloned()
    }

    /// 完整快照（含对话）
    pub async fn get(&self, id: &str) -> Option<Run> {
        let entry = self.entry(id).await?;
        let run = entry.run.read().await;
        Some(run.clone())
    }

    pub async fn summary(&self, id: &str) -> Option<RunSummary> {
        let entry = self.entry(id).await?;
        let run = entry.run.read().await;
        Some(run.summary())
    }

    /// 在条目锁内修改 Run；条目不存在（已删除）时不执行 f 并返回 false
    pub async fn update<F>(&self, id: &str, f: F) -> bool
    where
        F: FnOnce(&mut Run),
    {
        let Some(entry) = self.entry(id).await else {
            return false;
        };
        let mut run = entry.run.write().await;
        // 持有条目锁期间再确认一次，避免与 remove 交错
        if !self.inner.read().await.contains_key(id) {
            return false;
        }
        f(&mut *run);
        true
    }

    /// 删除并取消后台任务；未知 id 返回 false
    pub async fn remove(&self, id: &str) -> bool {
        match self.inner.write().await.remove(id) {
            Some(entry) => {
                entry.cancel.cancel();
                true
            }
            None => false,
        }
    }

    /// 所有 Run 的摘要，按创建时间排序
    pub async fn list(&self) -> Vec<RunSummary> {
        let entries: Vec<Arc<RunEntry>> = self.inner.read().await.values().cloned().collect();
        let mut out = Vec::with_capacity(entries.len());
        for e in entries {
            out.push(e.run.read().await.summary());
        }
        out.sort_by_key(|s| s.created_at);
        out
    }

    pub async fn len(&self) -> usize {
        self.inner.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.inner.read().await.is_empty()
    }
}
