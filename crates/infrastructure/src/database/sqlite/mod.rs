pub mod sqlite_task_log_repository;
pub mod sqlite_task_repository;

pub use sqlite_task_log_repository::SqliteTaskLogRepository;
pub use sqlite_task_repository::SqliteTaskRepository;

use crontab_core::{config::DatabaseConfig, SchedulerResult};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::{Row, SqlitePool};
use std::str::FromStr;
use std::time::Duration;
use tracing::info;

pub struct DatabaseManager {
    pool: SqlitePool,
}

impl DatabaseManager {
    pub async fn new(config: &DatabaseConfig) -> SchedulerResult<Self> {
        info!("连接数据库: {}", config.url);

        let connect_options = SqliteConnectOptions::from_str(&config.url)?
            .create_if_missing(true)
            .journal_mode(sqlx::sqlite::SqliteJournalMode::Wal)
            .busy_timeout(Duration::from_secs(config.connection_timeout_seconds));

        let pool = SqlitePoolOptions::new()
            .max_connections(config.max_connections)
            .min_connections(config.min_connections)
            .acquire_timeout(Duration::from_secs(config.connection_timeout_seconds))
            .idle_timeout(Duration::from_secs(config.idle_timeout_seconds))
            .max_lifetime(Duration::from_secs(1800))
            .connect_with(connect_options)
            .await?;

        Ok(Self { pool })
    }

    /// 内存数据库，只保留一个永不回收的连接，否则数据会随连接关闭而丢失
    pub async fn in_memory() -> SchedulerResult<Self> {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .min_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect("sqlite::memory:")
            .await?;

        Ok(Self { pool })
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    pub fn task_repository(&self, table: impl Into<String>) -> SqliteTaskRepository {
        SqliteTaskRepository::new(self.pool.clone(), table)
    }

    pub fn task_log_repository(&self, table: impl Into<String>) -> SqliteTaskLogRepository {
        SqliteTaskLogRepository::new(self.pool.clone(), table)
    }

    pub async fn health_check(&self) -> SchedulerResult<()> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }

    pub async fn close(&self) {
        self.pool.close().await;
    }
}

/// 检查表是否已存在
pub(crate) async fn table_exists(pool: &SqlitePool, table: &str) -> SchedulerResult<bool> {
    let row = sqlx::query("SELECT COUNT(*) AS cnt FROM sqlite_master WHERE type = 'table' AND name = ?")
        .bind(table)
        .fetch_one(pool)
        .await?;
    let count: i64 = row.try_get("cnt")?;
    Ok(count > 0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_in_memory_manager() {
        let manager = DatabaseManager::in_memory().await.unwrap();
        assert!(manager.health_check().await.is_ok());
        assert!(!table_exists(manager.pool(), "task_definitions").await.unwrap());

        let repo = manager.task_repository("task_definitions");
        crontab_core::traits::TaskRepository::ensure_table(&repo)
            .await
            .unwrap();
        assert!(table_exists(manager.pool(), "task_definitions").await.unwrap());
        manager.close().await;
    }

    #[tokio::test]
    async fn test_file_database_created() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("crontab.db");

        let config = DatabaseConfig {
            url: format!("sqlite://{}", path.display()),
            ..Default::default()
        };
        let manager = DatabaseManager::new(&config).await.unwrap();
        assert!(manager.health_check().await.is_ok());
        manager.close().await;
        assert!(path.exists());
    }
}
