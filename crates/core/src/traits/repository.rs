//! 数据仓储层接口定义
//!
//! - `TaskRepository` 任务定义的读写
//! - `TaskLogRepository` 执行日志的追加与查询
//!
//! 时间参数均为秒级Unix时间戳，由调用方传入以保证同一操作内时间一致。

use async_trait::async_trait;

use crate::{
    models::{NewExecutionRecord, NewTask, TaskDefinition, TaskExecutionRecord, TaskPatch, TaskStatus},
    SchedulerResult,
};

#[async_trait]
pub trait TaskRepository: Send + Sync {
    /// 表不存在时创建（含索引）
    async fn ensure_table(&self) -> SchedulerResult<()>;

    /// 插入新任务，返回自增ID
    async fn insert(&self, task: &NewTask, now: i64) -> SchedulerResult<i64>;

    async fn find_by_id(&self, id: i64) -> SchedulerResult<Option<TaskDefinition>>;

    /// 仅返回处于启用状态的任务
    async fn find_enabled_by_id(&self, id: i64) -> SchedulerResult<Option<TaskDefinition>>;

    async fn status_of(&self, id: i64) -> SchedulerResult<Option<TaskStatus>>;

    async fn enabled_ids(&self) -> SchedulerResult<Vec<i64>>;

    /// 启用任务按 `sort DESC, id ASC` 排序后取第 `offset` 个
    async fn enabled_at_offset(&self, offset: u32) -> SchedulerResult<Option<TaskDefinition>>;

    async fn list(&self) -> SchedulerResult<Vec<TaskDefinition>>;

    /// 按补丁更新，返回是否命中行
    async fn update(&self, patch: &TaskPatch, now: i64) -> SchedulerResult<bool>;

    async fn set_status(&self, id: i64, status: TaskStatus, now: i64) -> SchedulerResult<bool>;

    async fn delete(&self, id: i64) -> SchedulerResult<bool>;

    /// 单条UPDATE语句：`running_times + 1` 并记录最近执行时间
    async fn record_run(&self, id: i64, ran_at: i64) -> SchedulerResult<()>;
}

#[async_trait]
pub trait TaskLogRepository: Send + Sync {
    async fn ensure_table(&self) -> SchedulerResult<()>;

    async fn append(&self, record: &NewExecutionRecord) -> SchedulerResult<i64>;

    /// 按ID升序返回某任务的执行记录
    async fn find_by_task(&self, task_id: i64) -> SchedulerResult<Vec<TaskExecutionRecord>>;

    async fn count_by_task(&self, task_id: i64) -> SchedulerResult<i64>;
}
