//! 任务注册表：共享hash中的 任务ID -> Worker序号
//!
//! 注册表是建议性的，某个Worker进程退出后其条目会残留，
//! 由0号Worker在启动时按启用任务列表清理。

use crontab_core::{traits::KeyValueStore, SchedulerResult};
use std::collections::HashSet;
use std::sync::Arc;
use tracing::{info, warn};

#[derive(Clone)]
pub struct TaskRegistry {
    store: Arc<dyn KeyValueStore>,
    key: String,
}

impl TaskRegistry {
    pub fn new(store: Arc<dyn KeyValueStore>, key: impl Into<String>) -> Self {
        Self {
            store,
            key: key.into(),
        }
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    pub async fn register(&self, task_id: i64, ordinal: u32) -> SchedulerResult<()> {
        self.store
            .hset(&self.key, &task_id.to_string(), &ordinal.to_string())
            .await
    }

    /// 任务当前登记的Worker序号
    pub async fn owner(&self, task_id: i64) -> SchedulerResult<Option<u32>> {
        let value = self.store.hget(&self.key, &task_id.to_string()).await?;
        Ok(value.and_then(|v| match v.parse() {
            Ok(ordinal) => Some(ordinal),
            Err(_) => {
                warn!("注册表中任务 {} 的Worker序号无效: {}", task_id, v);
                None
            }
        }))
    }

    pub async fn deregister(&self, task_id: i64) -> SchedulerResult<bool> {
        self.store.hdel(&self.key, &task_id.to_string()).await
    }

    pub async fn ordinals(&self) -> SchedulerResult<Vec<u32>> {
        Ok(self
            .store
            .hvals(&self.key)
            .await?
            .iter()
            .filter_map(|v| v.parse().ok())
            .collect())
    }

    pub async fn task_ids(&self) -> SchedulerResult<Vec<i64>> {
        Ok(self
            .store
            .hkeys(&self.key)
            .await?
            .iter()
            .filter_map(|k| k.parse().ok())
            .collect())
    }

    /// 该Worker是否没有登记任何任务
    pub async fn is_empty_process(&self, ordinal: u32) -> SchedulerResult<bool> {
        Ok(!self.ordinals().await?.contains(&ordinal))
    }

    /// `0..worker_count` 中的每个序号都已登记任务
    pub async fn all_occupied(&self, worker_count: u32) -> SchedulerResult<bool> {
        let occupied: HashSet<u32> = self.ordinals().await?.into_iter().collect();
        Ok((0..worker_count).all(|ordinal| occupied.contains(&ordinal)))
    }

    /// 删除不在启用列表中的条目，返回被删除的任务ID
    pub async fn remove_stale_entries(&self, enabled_ids: &[i64]) -> SchedulerResult<Vec<i64>> {
        let enabled: HashSet<String> = enabled_ids.iter().map(|id| id.to_string()).collect();
        let mut removed = Vec::new();

        for field in self.store.hkeys(&self.key).await? {
            if enabled.contains(&field) {
                continue;
            }
            self.store.hdel(&self.key, &field).await?;
            if let Ok(id) = field.parse() {
                removed.push(id);
            }
        }

        if !removed.is_empty() {
            removed.sort_unstable();
            info!("清理注册表中的过期条目: {:?}", removed);
        }
        Ok(removed)
    }
}
