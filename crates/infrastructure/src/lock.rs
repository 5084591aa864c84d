//! 基于共享键值存储的分布式建议锁
//!
//! 锁键为 `Lock:{name}`，值为过期时刻（毫秒时间戳），键本身带同样长度的TTL。
//! 锁只在调用方之间协作生效，没有持有者标识，也没有fencing token。

use crontab_core::{
    now_timestamp_millis,
    traits::{KeyValueStore, TTL_NO_EXPIRY},
    SchedulerError, SchedulerResult,
};
use futures::FutureExt;
use std::any::Any;
use std::collections::HashMap;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::{debug, error, warn};

pub const LOCK_KEY_PREFIX: &str = "Lock:";

/// 加锁参数
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LockOptions {
    /// 最长等待时间，零表示只尝试一次
    pub timeout: Duration,
    /// 锁的存活时间
    pub expire: Duration,
    /// 两次尝试之间的间隔
    pub poll_interval: Duration,
}

impl Default for LockOptions {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(10),
            expire: Duration::from_secs(15),
            poll_interval: Duration::from_millis(100),
        }
    }
}

impl LockOptions {
    /// `on_lock` 包裹命令处理时使用的参数
    pub fn guarded() -> Self {
        Self {
            timeout: Duration::from_secs(30),
            expire: Duration::from_secs(60),
            poll_interval: Duration::from_millis(30),
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_expire(mut self, expire: Duration) -> Self {
        self.expire = expire;
        self
    }

    pub fn with_poll_interval(mut self, poll_interval: Duration) -> Self {
        self.poll_interval = poll_interval;
        self
    }
}

/// `on_lock` 的结果
#[derive(Debug, Clone, PartialEq)]
pub enum LockOutcome<T> {
    /// 拿到锁并且临界区执行成功
    Completed(T),
    /// 在等待时间内没有拿到锁
    NotAcquired,
    /// 加锁出错，或临界区返回错误/发生panic
    Failed(String),
}

impl<T> LockOutcome<T> {
    pub fn is_completed(&self) -> bool {
        matches!(self, LockOutcome::Completed(_))
    }

    pub fn completed(self) -> Option<T> {
        match self {
            LockOutcome::Completed(value) => Some(value),
            _ => None,
        }
    }
}

pub struct DistributedLock {
    store: Arc<dyn KeyValueStore>,
    /// 本地持有的锁：锁名 -> 过期时刻（毫秒）
    held: Mutex<HashMap<String, i64>>,
}

impl DistributedLock {
    pub fn new(store: Arc<dyn KeyValueStore>) -> Self {
        Self {
            store,
            held: Mutex::new(HashMap::new()),
        }
    }

    pub fn key(name: &str) -> String {
        format!("{LOCK_KEY_PREFIX}{name}")
    }

    /// 尝试加锁，超时返回 `Ok(false)`
    pub async fn lock(&self, name: &str, options: LockOptions) -> SchedulerResult<bool> {
        let key = Self::key(name);
        let timeout_at = Instant::now() + options.timeout;

        loop {
            let expire_at = now_timestamp_millis() + options.expire.as_millis() as i64;

            if self
                .store
                .set_nx_px(&key, &expire_at.to_string(), options.expire)
                .await?
            {
                if self.store.pttl(&key).await? == TTL_NO_EXPIRY {
                    self.claim(&key, expire_at, options.expire).await?;
                }
                self.held.lock().await.insert(name.to_string(), expire_at);
                return Ok(true);
            }

            // 键存在却没有TTL：上一个持有者写入后没来得及设置过期时间就退出了
            if self.store.pttl(&key).await? == TTL_NO_EXPIRY {
                warn!("锁 {} 没有过期时间，接管该锁", name);
                self.claim(&key, expire_at, options.expire).await?;
                self.held.lock().await.insert(name.to_string(), expire_at);
                return Ok(true);
            }

            if self.is_stale(&key).await? {
                debug!("锁 {} 已过期，标记清理", name);
                self.store.pexpire(&key, Duration::ZERO).await?;
            }

            let now = Instant::now();
            if options.timeout.is_zero() || now >= timeout_at {
                return Ok(false);
            }

            let wait = (options.poll_interval + Self::jitter(options.poll_interval))
                .min(timeout_at - now);
            tokio::time::sleep(wait).await;
        }
    }

    /// 释放本地持有的锁，未持有时不做任何操作
    pub async fn unlock(&self, name: &str) -> SchedulerResult<bool> {
        if self.held.lock().await.remove(name).is_none() {
            return Ok(false);
        }
        self.store.del(&Self::key(name)).await?;
        Ok(true)
    }

    /// 释放所有本地持有的锁，全部成功时返回 true
    pub async fn unlock_all(&self) -> bool {
        let names: Vec<String> = self.held.lock().await.keys().cloned().collect();
        let mut all_released = true;
        for name in names {
            if let Err(e) = self.unlock(&name).await {
                warn!("释放锁 {} 失败: {}", name, e);
                all_released = false;
            }
        }
        all_released
    }

    pub async fn is_locking(&self, name: &str) -> bool {
        self.held.lock().await.contains_key(name)
    }

    /// 在锁内执行 `body`，无论成功、失败还是panic都会释放锁
    pub async fn on_lock<T, F>(&self, name: &str, options: LockOptions, body: F) -> LockOutcome<T>
    where
        F: Future<Output = SchedulerResult<T>>,
    {
        match self.lock(name, options).await {
            Ok(true) => {}
            Ok(false) => {
                let err = SchedulerError::LockTimeout {
                    name: name.to_string(),
                };
                // 单次尝试的锁每个轮询周期都会失败，降低日志级别
                if options.timeout.is_zero() {
                    debug!("{}", err);
                } else {
                    warn!("{}", err);
                    metrics::counter!("crontab_lock_timeouts_total", "name" => name.to_string())
                        .increment(1);
                }
                return LockOutcome::NotAcquired;
            }
            Err(e) => {
                error!("加锁 {} 失败: {}", name, e);
                return LockOutcome::Failed(e.to_string());
            }
        }

        let result = AssertUnwindSafe(body).catch_unwind().await;

        if let Err(e) = self.unlock(name).await {
            warn!("释放锁 {} 失败: {}", name, e);
        }

        match result {
            Ok(Ok(value)) => LockOutcome::Completed(value),
            Ok(Err(e)) => {
                error!("锁 {} 内执行失败: {}", name, e);
                LockOutcome::Failed(e.to_string())
            }
            Err(panic) => {
                let message = panic_message(panic.as_ref());
                error!("锁 {} 内执行发生panic: {}", name, message);
                LockOutcome::Failed(message)
            }
        }
    }

    async fn claim(&self, key: &str, expire_at: i64, expire: Duration) -> SchedulerResult<()> {
        self.store.set(key, &expire_at.to_string()).await?;
        self.store.pexpire(key, expire).await?;
        Ok(())
    }

    /// 存储的过期时刻已过或无法解析时视为过期
    async fn is_stale(&self, key: &str) -> SchedulerResult<bool> {
        Ok(match self.store.get(key).await? {
            Some(value) => match value.parse::<i64>() {
                Ok(expire_at) => expire_at < now_timestamp_millis(),
                Err(_) => true,
            },
            None => false,
        })
    }

    fn jitter(poll_interval: Duration) -> Duration {
        use rand::Rng;
        let max = (poll_interval.as_millis() / 4) as u64;
        if max == 0 {
            return Duration::ZERO;
        }
        Duration::from_millis(rand::rng().random_range(0..=max))
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}
