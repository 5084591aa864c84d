use crontab_core::traits::{KeyValueStore, TTL_MISSING_KEY, TTL_NO_EXPIRY};
use crontab_infrastructure::{DistributedLock, LockOptions, RedisKeyValueStore, TaskRegistry};
use std::sync::Arc;
use std::time::Duration;
use testcontainers::{runners::AsyncRunner, ImageExt};
use testcontainers_modules::redis::Redis;

#[tokio::test]
#[ignore] // 需要Docker
async fn test_redis_store_semantics() {
    let container = Redis::default().with_tag("7-alpine").start().await.unwrap();
    let port = container.get_host_port_ipv4(6379).await.unwrap();
    let store = RedisKeyValueStore::connect(&format!("redis://127.0.0.1:{port}"))
        .await
        .unwrap();

    assert!(store.set_nx("k", "a").await.unwrap());
    assert!(!store.set_nx("k", "b").await.unwrap());
    assert_eq!(store.pttl("k").await.unwrap(), TTL_NO_EXPIRY);
    assert!(store.pexpire("k", Duration::from_secs(5)).await.unwrap());
    assert!(store.pttl("k").await.unwrap() > 0);
    assert!(store.del("k").await.unwrap());
    assert_eq!(store.pttl("k").await.unwrap(), TTL_MISSING_KEY);

    assert!(store
        .set_nx_px("px", "v", Duration::from_secs(5))
        .await
        .unwrap());
    assert!(!store
        .set_nx_px("px", "v", Duration::from_secs(5))
        .await
        .unwrap());

    store.hset("h", "1", "0").await.unwrap();
    assert_eq!(store.hget("h", "1").await.unwrap().as_deref(), Some("0"));
    assert_eq!(store.hvals("h").await.unwrap(), vec!["0".to_string()]);
    assert!(store.hdel("h", "1").await.unwrap());
}

#[tokio::test]
#[ignore] // 需要Docker
async fn test_lock_and_registry_over_redis() {
    let container = Redis::default().with_tag("7-alpine").start().await.unwrap();
    let port = container.get_host_port_ipv4(6379).await.unwrap();
    let store: Arc<dyn KeyValueStore> = Arc::new(
        RedisKeyValueStore::connect(&format!("redis://127.0.0.1:{port}"))
            .await
            .unwrap(),
    );

    let a = DistributedLock::new(store.clone());
    let b = DistributedLock::new(store.clone());
    let single = LockOptions::default().with_timeout(Duration::ZERO);
    assert!(a.lock("action", single).await.unwrap());
    assert!(!b.lock("action", single).await.unwrap());
    assert!(a.unlock("action").await.unwrap());
    assert!(b.lock("action", single).await.unwrap());

    let registry = TaskRegistry::new(store, "crontab_worker");
    registry.register(1, 0).await.unwrap();
    assert!(!registry.is_empty_process(0).await.unwrap());
    assert!(registry.all_occupied(1).await.unwrap());
}
