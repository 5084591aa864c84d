//! 共享键值存储接口
//!
//! 分布式锁、任务注册表和命令槽都只依赖这组最小操作，语义与Redis一致：
//! - `pttl` 键不存在返回 `-2`，键存在但没有过期时间返回 `-1`
//! - `pexpire` 传入零时长会立即删除键

use async_trait::async_trait;
use std::time::Duration;

use crate::SchedulerResult;

/// `pttl` 对不存在的键的返回值
pub const TTL_MISSING_KEY: i64 = -2;
/// `pttl` 对没有过期时间的键的返回值
pub const TTL_NO_EXPIRY: i64 = -1;

#[async_trait]
pub trait KeyValueStore: Send + Sync {
    async fn get(&self, key: &str) -> SchedulerResult<Option<String>>;

    async fn set(&self, key: &str, value: &str) -> SchedulerResult<()>;

    /// 仅在键不存在时写入，返回是否写入成功
    async fn set_nx(&self, key: &str, value: &str) -> SchedulerResult<bool>;

    /// 原子地"不存在则写入并设置过期时间"
    async fn set_nx_px(&self, key: &str, value: &str, ttl: Duration) -> SchedulerResult<bool>;

    async fn del(&self, key: &str) -> SchedulerResult<bool>;

    /// 设置毫秒级过期时间，返回键是否存在
    async fn pexpire(&self, key: &str, ttl: Duration) -> SchedulerResult<bool>;

    /// 剩余毫秒数，参见 [`TTL_MISSING_KEY`] 与 [`TTL_NO_EXPIRY`]
    async fn pttl(&self, key: &str) -> SchedulerResult<i64>;

    async fn hset(&self, key: &str, field: &str, value: &str) -> SchedulerResult<()>;

    async fn hget(&self, key: &str, field: &str) -> SchedulerResult<Option<String>>;

    async fn hdel(&self, key: &str, field: &str) -> SchedulerResult<bool>;

    async fn hkeys(&self, key: &str) -> SchedulerResult<Vec<String>>;

    async fn hvals(&self, key: &str) -> SchedulerResult<Vec<String>>;

    /// 写入并设置过期时间
    async fn set_with_ttl(&self, key: &str, value: &str, ttl: Duration) -> SchedulerResult<()> {
        self.set(key, value).await?;
        self.pexpire(key, ttl).await?;
        Ok(())
    }
}
