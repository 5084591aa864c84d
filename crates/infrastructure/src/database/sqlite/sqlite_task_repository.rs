use async_trait::async_trait;
use crontab_core::{
    models::{NewTask, TaskDefinition, TaskKind, TaskPatch, TaskStatus},
    traits::TaskRepository,
    SchedulerError, SchedulerResult,
};
use sqlx::{sqlite::SqliteRow, QueryBuilder, Row, Sqlite, SqlitePool};
use tracing::{debug, info, instrument};

use super::table_exists;

const TASK_COLUMNS: &str = "id, title, type, rule, target, parameter, running_times, \
     last_running_time, remark, sort, status, create_time, update_time, singleton";

pub struct SqliteTaskRepository {
    pool: SqlitePool,
    table: String,
}

impl SqliteTaskRepository {
    /// `table` 为带前缀的完整表名，调用方负责保证其只包含字母数字与下划线
    pub fn new(pool: SqlitePool, table: impl Into<String>) -> Self {
        Self {
            pool,
            table: table.into(),
        }
    }

    pub fn table(&self) -> &str {
        &self.table
    }

    fn row_to_task(row: &SqliteRow) -> SchedulerResult<TaskDefinition> {
        let kind_code: i64 = row.try_get("type")?;
        let status_code: i64 = row.try_get("status")?;
        let singleton: i64 = row.try_get("singleton")?;

        Ok(TaskDefinition {
            id: row.try_get("id")?,
            title: row.try_get("title")?,
            kind: TaskKind::from_code(kind_code).ok_or_else(|| {
                SchedulerError::Serialization(format!("未知的任务类型: {kind_code}"))
            })?,
            rule: row.try_get("rule")?,
            target: row.try_get("target")?,
            parameter: row.try_get("parameter")?,
            singleton: singleton != 0,
            // 非0/1的状态一律视为禁用
            status: TaskStatus::from_code(status_code).unwrap_or(TaskStatus::Disabled),
            sort: row.try_get("sort")?,
            running_times: row.try_get("running_times")?,
            last_running_time: row.try_get("last_running_time")?,
            remark: row.try_get("remark")?,
            create_time: row.try_get("create_time")?,
            update_time: row.try_get("update_time")?,
        })
    }
}

#[async_trait]
impl TaskRepository for SqliteTaskRepository {
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
                title TEXT NOT NULL,
                type INTEGER NOT NULL DEFAULT 1,
                rule TEXT NOT NULL,
                target TEXT NOT NULL DEFAULT '',
                parameter TEXT,
                running_times INTEGER NOT NULL DEFAULT 0,
                last_running_time INTEGER NOT NULL DEFAULT 0,
                remark TEXT,
                sort INTEGER NOT NULL DEFAULT 0,
                status INTEGER NOT NULL DEFAULT 0,
                create_time INTEGER NOT NULL,
                update_time INTEGER NOT NULL,
                -- 1 表示只执行一次，0 表示按规则持续执行
                singleton INTEGER NOT NULL DEFAULT 0
            )
            "#
        );
        sqlx::query(&create).execute(&self.pool).await?;

        for column in ["title", "create_time", "status", "type"] {
            let index = format!(
                "CREATE INDEX IF NOT EXISTS idx_{table}_{column} ON {table}({column})"
            );
            sqlx::query(&index).execute(&self.pool).await?;
        }

        info!("任务表 {} 已创建", table);
        Ok(())
    }

    #[instrument(skip(self, task), fields(title = %task.title))]
    async fn insert(&self, task: &NewTask, now: i64) -> SchedulerResult<i64> {
        let sql = format!(
            "INSERT INTO {} (title, type, rule, target, parameter, remark, sort, status, \
             create_time, update_time, singleton) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
            self.table
        );

        let result = sqlx::query(&sql)
            .bind(&task.title)
            .bind(task.kind.code())
            .bind(&task.rule)
            .bind(&task.target)
            .bind(&task.parameter)
            .bind(&task.remark)
            .bind(task.sort.unwrap_or(0))
            .bind(task.status.code())
            .bind(now)
            .bind(now)
            .bind(i64::from(task.singleton.unwrap_or(false)))
            .execute(&self.pool)
            .await?;

        let id = result.last_insert_rowid();
        debug!("新增任务 {}", id);
        Ok(id)
    }

    #[instrument(skip(self))]
    async fn find_by_id(&self, id: i64) -> SchedulerResult<Option<TaskDefinition>> {
        let sql = format!("SELECT {TASK_COLUMNS} FROM {} WHERE id = ?", self.table);
        let row = sqlx::query(&sql)
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;

        row.as_ref().map(Self::row_to_task).transpose()
    }

    #[instrument(skip(self))]
    async fn find_enabled_by_id(&self, id: i64) -> SchedulerResult<Option<TaskDefinition>> {
        let sql = format!(
            "SELECT {TASK_COLUMNS} FROM {} WHERE id = ? AND status = ?",
            self.table
        );
        let row = sqlx::query(&sql)
            .bind(id)
            .bind(TaskStatus::Enabled.code())
            .fetch_optional(&self.pool)
            .await?;

        row.as_ref().map(Self::row_to_task).transpose()
    }

    #[instrument(skip(self))]
    async fn status_of(&self, id: i64) -> SchedulerResult<Option<TaskStatus>> {
        let sql = format!("SELECT status FROM {} WHERE id = ?", self.table);
        let row = sqlx::query(&sql)
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;

        match row {
            Some(row) => {
                let code: i64 = row.try_get("status")?;
                Ok(Some(
                    TaskStatus::from_code(code).unwrap_or(TaskStatus::Disabled),
                ))
            }
            None => Ok(None),
        }
    }

    #[instrument(skip(self))]
    async fn enabled_ids(&self) -> SchedulerResult<Vec<i64>> {
        let sql = format!("SELECT id FROM {} WHERE status = ? ORDER BY id", self.table);
        let rows = sqlx::query(&sql)
            .bind(TaskStatus::Enabled.code())
            .fetch_all(&self.pool)
            .await?;

        rows.iter()
            .map(|row| row.try_get::<i64, _>("id").map_err(SchedulerError::from))
            .collect()
    }

    #[instrument(skip(self))]
    async fn enabled_at_offset(&self, offset: u32) -> SchedulerResult<Option<TaskDefinition>> {
        let sql = format!(
            "SELECT {TASK_COLUMNS} FROM {} WHERE status = ? \
             ORDER BY sort DESC, id ASC LIMIT 1 OFFSET ?",
            self.table
        );
        let row = sqlx::query(&sql)
            .bind(TaskStatus::Enabled.code())
            .bind(i64::from(offset))
            .fetch_optional(&self.pool)
            .await?;

        row.as_ref().map(Self::row_to_task).transpose()
    }

    #[instrument(skip(self))]
    async fn list(&self) -> SchedulerResult<Vec<TaskDefinition>> {
        let sql = format!(
            "SELECT {TASK_COLUMNS} FROM {} ORDER BY sort DESC, id ASC",
            self.table
        );
        let rows = sqlx::query(&sql).fetch_all(&self.pool).await?;
        rows.iter().map(Self::row_to_task).collect()
    }

    #[instrument(skip(self, patch), fields(id = patch.id))]
    async fn update(&self, patch: &TaskPatch, now: i64) -> SchedulerResult<bool> {
        let mut builder: QueryBuilder<Sqlite> =
            QueryBuilder::new(format!("UPDATE {} SET update_time = ", self.table));
        builder.push_bind(now);

        if let Some(title) = &patch.title {
            builder.push(", title = ").push_bind(title.clone());
        }
        if let Some(kind) = patch.kind {
            builder.push(", type = ").push_bind(kind.code());
        }
        if let Some(rule) = &patch.rule {
            builder.push(", rule = ").push_bind(rule.clone());
        }
        if let Some(target) = &patch.target {
            builder.push(", target = ").push_bind(target.clone());
        }
        if let Some(parameter) = &patch.parameter {
            builder.push(", parameter = ").push_bind(parameter.clone());
        }
        if let Some(singleton) = patch.singleton {
            builder.push(", singleton = ").push_bind(i64::from(singleton));
        }
        if let Some(status) = patch.status {
            builder.push(", status = ").push_bind(status.code());
        }
        if let Some(sort) = patch.sort {
            builder.push(", sort = ").push_bind(sort);
        }
        if let Some(remark) = &patch.remark {
            builder.push(", remark = ").push_bind(remark.clone());
        }

        builder.push(" WHERE id = ").push_bind(patch.id);

        let result = builder.build().execute(&self.pool).await?;
        Ok(result.rows_affected() > 0)
    }

    #[instrument(skip(self))]
    async fn set_status(&self, id: i64, status: TaskStatus, now: i64) -> SchedulerResult<bool> {
        let sql = format!(
            "UPDATE {} SET status = ?, update_time = ? WHERE id = ?",
            self.table
        );
        let result = sqlx::query(&sql)
            .bind(status.code())
            .bind(now)
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    #[instrument(skip(self))]
    async fn delete(&self, id: i64) -> SchedulerResult<bool> {
        let sql = format!("DELETE FROM {} WHERE id = ?", self.table);
        let result = sqlx::query(&sql).bind(id).execute(&self.pool).await?;
        Ok(result.rows_affected() > 0)
    }

    #[instrument(skip(self))]
    async fn record_run(&self, id: i64, ran_at: i64) -> SchedulerResult<()> {
        let sql = format!(
            "UPDATE {} SET running_times = running_times + 1, last_running_time = ? WHERE id = ?",
            self.table
        );
        sqlx::query(&sql)
            .bind(ran_at)
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}
