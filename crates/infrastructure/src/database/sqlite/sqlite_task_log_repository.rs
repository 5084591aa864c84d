use async_trait::async_trait;
use crontab_core::{
    models::{NewExecutionRecord, TaskExecutionRecord},
    traits::TaskLogRepository,
    SchedulerResult,
};
use sqlx::{sqlite::SqliteRow, Row, SqlitePool};
use tracing::{info, instrument};

use super::table_exists;

pub struct SqliteTaskLogRepository {
    pool: SqlitePool,
    table: String,
}

impl SqliteTaskLogRepository {
    pub fn new(pool: SqlitePool, table: impl Into<String>) -> Self {
        Self {
            pool,
            table: table.into(),
        }
    }

    fn row_to_record(row: &SqliteRow) -> SchedulerResult<TaskExecutionRecord> {
        let return_code: i64 = row.try_get("return_code")?;
        Ok(TaskExecutionRecord {
            id: row.try_get("id")?,
            task_id: row.try_get("task_id")?,
            target: row.try_get("target")?,
            parameter: row.try_get("parameter")?,
            exception: row.try_get("exception")?,
            return_code: return_code as i32,
            running_time: row.try_get("running_time")?,
            create_time: row.try_get("create_time")?,
            update_time: row.try_get("update_time")?,
        })
    }
}

#[async_trait]
impl TaskLogRepository for SqliteTaskLogRepository {
    #[instrument(skip(self), fields(table = %self.table))]
    async fn ensure_table(&self) -> SchedulerResult<()> {
        if table_exists(&self.pool, &self.table).await? {
            return Ok(());
        }

        let table = &self.table;
        let create = format!(
            r#"
            CREATE TABLE IF NOT EXISTS {table} (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                task_id INTEGER NOT NULL,
                target TEXT NOT NULL,
                parameter TEXT,
                exception TEXT NOT NULL DEFAULT '',
                return_code INTEGER NOT NULL DEFAULT 0,
                running_time REAL NOT NULL DEFAULT 0,
                create_time INTEGER NOT NULL,
                update_time INTEGER NOT NULL
            )
            "#
        );
        sqlx::query(&create).execute(&self.pool).await?;

        for column in ["create_time", "task_id"] {
            let index = format!(
                "CREATE INDEX IF NOT EXISTS idx_{table}_{column} ON {table}({column})"
            );
            sqlx::query(&index).execute(&self.pool).await?;
        }

        info!("执行日志表 {} 已创建", table);
        Ok(())
    }

    #[instrument(skip(self, record), fields(task_id = record.task_id))]
    async fn append(&self, record: &NewExecutionRecord) -> SchedulerResult<i64> {
        let sql = format!(
            "INSERT INTO {} (task_id, target, parameter, exception, return_code, running_time, \
             create_time, update_time) VALUES (?, ?, ?, ?, ?, ?, ?, ?)",
            self.table
        );

        let result = sqlx::query(&sql)
            .bind(record.task_id)
            .bind(&record.target)
            .bind(&record.parameter)
            .bind(&record.exception)
            .bind(i64::from(record.return_code))
            .bind(NewExecutionRecord::round_running_time(record.running_time))
            .bind(record.create_time)
            .bind(record.create_time)
            .execute(&self.pool)
            .await?;

        Ok(result.last_insert_rowid())
    }

    #[instrument(skip(self))]
    async fn find_by_task(&self, task_id: i64) -> SchedulerResult<Vec<TaskExecutionRecord>> {
        let sql = format!(
            "SELECT id, task_id, target, parameter, exception, return_code, running_time, \
             create_time, update_time FROM {} WHERE task_id = ? ORDER BY id ASC",
            self.table
        );
        let rows = sqlx::query(&sql)
            .bind(task_id)
            .fetch_all(&self.pool)
            .await?;

        rows.iter().map(Self::row_to_record).collect()
    }

    #[instrument(skip(self))]
    async fn count_by_task(&self, task_id: i64) -> SchedulerResult<i64> {
        let sql = format!("SELECT COUNT(*) AS cnt FROM {} WHERE task_id = ?", self.table);
        let row = sqlx::query(&sql)
            .bind(task_id)
            .fetch_one(&self.pool)
            .await?;
        Ok(row.try_get("cnt")?)
    }
}
