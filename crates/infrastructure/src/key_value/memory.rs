//! 进程内键值存储
//!
//! 与Redis的过期语义一致，供单进程部署和测试使用。

use async_trait::async_trait;
use crontab_core::{
    traits::{KeyValueStore, TTL_MISSING_KEY, TTL_NO_EXPIRY},
    SchedulerError, SchedulerResult,
};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use tokio::time::Instant;

#[derive(Debug, Clone)]
enum StoredValue {
    Text(String),
    Hash(HashMap<String, String>),
}

#[derive(Debug, Clone)]
struct Entry {
    value: StoredValue,
    deadline: Option<Instant>,
}

impl Entry {
    fn text(value: &str) -> Self {
        Self {
            value: StoredValue::Text(value.to_string()),
            deadline: None,
        }
    }

    fn is_expired(&self, now: Instant) -> bool {
        self.deadline.is_some_and(|d| d <= now)
    }
}

fn wrong_type(key: &str) -> SchedulerError {
    SchedulerError::key_value(format!(
        "WRONGTYPE Operation against a key holding the wrong kind of value: {key}"
    ))
}

/// 取出未过期的条目，已过期的顺便删除
fn live<'a>(entries: &'a mut HashMap<String, Entry>, key: &str) -> Option<&'a mut Entry> {
    let now = Instant::now();
    if entries.get(key).is_some_and(|e| e.is_expired(now)) {
        entries.remove(key);
    }
    entries.get_mut(key)
}

#[derive(Debug, Clone, Default)]
pub struct InMemoryKeyValueStore {
    entries: Arc<RwLock<HashMap<String, Entry>>>,
}

impl InMemoryKeyValueStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// 当前未过期的键数量
    pub async fn len(&self) -> usize {
        let now = Instant::now();
        self.entries
            .read()
            .await
            .values()
            .filter(|e| !e.is_expired(now))
            .count()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}

#[async_trait]
impl KeyValueStore for InMemoryKeyValueStore {
    async fn get(&self, key: &str) -> SchedulerResult<Option<String>> {
        let mut entries = self.entries.write().await;
        match live(&mut entries, key) {
            None => Ok(None),
            Some(Entry {
                value: StoredValue::Text(v),
                ..
            }) => Ok(Some(v.clone())),
            Some(_) => Err(wrong_type(key)),
        }
    }

    async fn set(&self, key: &str, value: &str) -> SchedulerResult<()> {
        // SET 会清除原有的过期时间
        self.entries
            .write()
            .await
            .insert(key.to_string(), Entry::text(value));
        Ok(())
    }

    async fn set_nx(&self, key: &str, value: &str) -> SchedulerResult<bool> {
        let mut entries = self.entries.write().await;
        if live(&mut entries, key).is_some() {
            return Ok(false);
        }
        entries.insert(key.to_string(), Entry::text(value));
        Ok(true)
    }

    async fn set_nx_px(&self, key: &str, value: &str, ttl: Duration) -> SchedulerResult<bool> {
        let mut entries = self.entries.write().await;
        if live(&mut entries, key).is_some() {
            return Ok(false);
        }
        let mut entry = Entry::text(value);
        entry.deadline = Some(Instant::now() + ttl);
        entries.insert(key.to_string(), entry);
        Ok(true)
    }

    async fn del(&self, key: &str) -> SchedulerResult<bool> {
        let mut entries = self.entries.write().await;
        let existed = live(&mut entries, key).is_some();
        entries.remove(key);
        Ok(existed)
    }

    async fn pexpire(&self, key: &str, ttl: Duration) -> SchedulerResult<bool> {
        let mut entries = self.entries.write().await;
        if ttl.is_zero() {
            let existed = live(&mut entries, key).is_some();
            entries.remove(key);
            return Ok(existed);
        }
        match live(&mut entries, key) {
            Some(entry) => {
                entry.deadline = Some(Instant::now() + ttl);
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn pttl(&self, key: &str) -> SchedulerResult<i64> {
        let mut entries = self.entries.write().await;
        Ok(match live(&mut entries, key) {
            None => TTL_MISSING_KEY,
            Some(Entry { deadline: None, .. }) => TTL_NO_EXPIRY,
            Some(Entry {
                deadline: Some(deadline),
                ..
            }) => deadline
                .saturating_duration_since(Instant::now())
                .as_millis() as i64,
        })
    }

    async fn hset(&self, key: &str, field: &str, value: &str) -> SchedulerResult<()> {
        let mut entries = self.entries.write().await;
        match live(&mut entries, key) {
            Some(Entry {
                value: StoredValue::Hash(map),
                ..
            }) => {
                map.insert(field.to_string(), value.to_string());
            }
            Some(_) => return Err(wrong_type(key)),
            None => {
                let mut map = HashMap::new();
                map.insert(field.to_string(), value.to_string());
                entries.insert(
                    key.to_string(),
                    Entry {
                        value: StoredValue::Hash(map),
                        deadline: None,
                    },
                );
            }
        }
        Ok(())
    }

    async fn hget(&self, key: &str, field: &str) -> SchedulerResult<Option<String>> {
        let mut entries = self.entries.write().await;
        match live(&mut entries, key) {
            None => Ok(None),
            Some(Entry {
                value: StoredValue::Hash(map),
                ..
            }) => Ok(map.get(field).cloned()),
            Some(_) => Err(wrong_type(key)),
        }
    }

    async fn hdel(&self, key: &str, field: &str) -> SchedulerResult<bool> {
        let mut entries = self.entries.write().await;
        let (removed, now_empty) = match live(&mut entries, key) {
            None => return Ok(false),
            Some(Entry {
                value: StoredValue::Hash(map),
                ..
            }) => {
                let removed = map.remove(field).is_some();
                (removed, map.is_empty())
            }
            Some(_) => return Err(wrong_type(key)),
        };
        // 与Redis一致：最后一个字段删除后键也随之消失
        if now_empty {
            entries.remove(key);
        }
        Ok(removed)
    }

    async fn hkeys(&self, key: &str) -> SchedulerResult<Vec<String>> {
        let mut entries = self.entries.write().await;
        match live(&mut entries, key) {
            None => Ok(Vec::new()),
            Some(Entry {
                value: StoredValue::Hash(map),
                ..
            }) => Ok(map.keys().cloned().collect()),
            Some(_) => Err(wrong_type(key)),
        }
    }

    async fn hvals(&self, key: &str) -> SchedulerResult<Vec<String>> {
        let mut entries = self.entries.write().await;
        match live(&mut entries, key) {
            None => Ok(Vec::new()),
            Some(Entry {
                value: StoredValue::Hash(map),
                ..
            }) => Ok(map.values().cloned().collect()),
            Some(_) => Err(wrong_type(key)),
        }
    }
}
