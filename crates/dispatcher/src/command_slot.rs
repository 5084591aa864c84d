use crontab_core::{traits::KeyValueStore, SchedulerResult};
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

/// 命令槽中的命令默认存活5秒
pub const DEFAULT_COMMAND_TTL: Duration = Duration::from_secs(5);

/// 共享存储中的单条命令槽
///
/// 后写入的命令直接覆盖前一条，没有排队；未被处理的命令在TTL到期后丢弃。
#[derive(Clone)]
pub struct CommandSlot {
    store: Arc<dyn KeyValueStore>,
    key: String,
    ttl: Duration,
}

impl CommandSlot {
    pub fn new(store: Arc<dyn KeyValueStore>, key: impl Into<String>) -> Self {
        Self {
            store,
            key: key.into(),
            ttl: DEFAULT_COMMAND_TTL,
        }
    }

    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.ttl = ttl;
        self
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    pub async fn write(&self, raw: &str) -> SchedulerResult<()> {
        debug!("写入命令槽 {}: {}", self.key, raw);
        self.store.set_with_ttl(&self.key, raw, self.ttl).await
    }

    pub async fn read(&self) -> SchedulerResult<Option<String>> {
        Ok(self
            .store
            .get(&self.key)
            .await?
            .filter(|raw| !raw.trim().is_empty()))
    }

    pub async fn clear(&self) -> SchedulerResult<()> {
        self.store.del(&self.key).await?;
        Ok(())
    }
}
