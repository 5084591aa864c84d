//! 基于Redis的共享键值存储

use async_trait::async_trait;
use crontab_core::{traits::KeyValueStore, SchedulerError, SchedulerResult};
use redis::aio::ConnectionManager;
use std::time::Duration;
use tracing::{info, instrument};

fn kv_error(err: redis::RedisError) -> SchedulerError {
    SchedulerError::key_value(err.to_string())
}

/// 通过 `ConnectionManager` 访问Redis，连接断开后自动重连
#[derive(Clone)]
pub struct RedisKeyValueStore {
    conn: ConnectionManager,
}

impl RedisKeyValueStore {
    pub async fn connect(url: &str) -> SchedulerResult<Self> {
        info!("连接Redis: {}", url);

        let client = redis::Client::open(url).map_err(kv_error)?;
        let mut conn = client.get_connection_manager().await.map_err(kv_error)?;

        let _: String = redis::cmd("PING")
            .query_async(&mut conn)
            .await
            .map_err(kv_error)?;

        info!("Redis连接成功");
        Ok(Self { conn })
    }

    async fn query<T: redis::FromRedisValue>(&self, cmd: &redis::Cmd) -> SchedulerResult<T> {
        let mut conn = self.conn.clone();
        cmd.query_async(&mut conn).await.map_err(kv_error)
    }
}

#[async_trait]
impl KeyValueStore for RedisKeyValueStore {
    #[instrument(skip(self))]
    async fn get(&self, key: &str) -> SchedulerResult<Option<String>> {
        self.query(redis::cmd("GET").arg(key)).await
    }

    #[instrument(skip(self, value))]
    async fn set(&self, key: &str, value: &str) -> SchedulerResult<()> {
        self.query(redis::cmd("SET").arg(key).arg(value)).await
    }

    #[instrument(skip(self, value))]
    async fn set_nx(&self, key: &str, value: &str) -> SchedulerResult<bool> {
        self.query(redis::cmd("SETNX").arg(key).arg(value)).await
    }

    #[instrument(skip(self, value))]
    async fn set_nx_px(&self, key: &str, value: &str, ttl: Duration) -> SchedulerResult<bool> {
        // SET NX PX 成功返回OK，键已存在返回nil
        let reply: Option<String> = self
            .query(
                redis::cmd("SET")
                    .arg(key)
                    .arg(value)
                    .arg("NX")
                    .arg("PX")
                    .arg(ttl.as_millis().max(1) as u64),
            )
            .await?;
        Ok(reply.is_some())
    }

    #[instrument(skip(self))]
    async fn del(&self, key: &str) -> SchedulerResult<bool> {
        let removed: i64 = self.query(redis::cmd("DEL").arg(key)).await?;
        Ok(removed > 0)
    }

    #[instrument(skip(self))]
    async fn pexpire(&self, key: &str, ttl: Duration) -> SchedulerResult<bool> {
        self.query(redis::cmd("PEXPIRE").arg(key).arg(ttl.as_millis() as u64))
            .await
    }

    #[instrument(skip(self))]
    async fn pttl(&self, key: &str) -> SchedulerResult<i64> {
        self.query(redis::cmd("PTTL").arg(key)).await
    }

    #[instrument(skip(self, value))]
    async fn hset(&self, key: &str, field: &str, value: &str) -> SchedulerResult<()> {
        let _: i64 = self
            .query(redis::cmd("HSET").arg(key).arg(field).arg(value))
            .await?;
        Ok(())
    }

    #[instrument(skip(self))]
    async fn hget(&self, key: &str, field: &str) -> SchedulerResult<Option<String>> {
        self.query(redis::cmd("HGET").arg(key).arg(field)).await
    }

    #[instrument(skip(self))]
    async fn hdel(&self, key: &str, field: &str) -> SchedulerResult<bool> {
        let removed: i64 = self.query(redis::cmd("HDEL").arg(key).arg(field)).await?;
        Ok(removed > 0)
    }

    #[instrument(skip(self))]
    async fn hkeys(&self, key: &str) -> SchedulerResult<Vec<String>> {
        self.query(redis::cmd("HKEYS").arg(key)).await
    }

    #[instrument(skip(self))]
    async fn hvals(&self, key: &str) -> SchedulerResult<Vec<String>> {
        self.query(redis::cmd("HVALS").arg(key)).await
    }
}
