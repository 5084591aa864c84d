pub mod config;
pub mod errors;
pub mod models;
pub mod traits;

pub use config::AppConfig;
pub use errors::*;
pub use models::{
    Command, CommandMethod, CommandRequest, NewExecutionRecord, NewTask, TaskDefinition,
    TaskExecutionRecord, TaskKind, TaskPatch, TaskStatus,
};
pub use traits::{
    ExpressionEvaluator, KeyValueStore, TaskHandler, TaskLogRepository, TaskRepository,
};

/// 当前Unix时间戳（秒）
pub fn now_timestamp() -> i64 {
    chrono::Utc::now().timestamp()
}

/// 当前Unix时间戳（毫秒）
pub fn now_timestamp_millis() -> i64 {
    chrono::Utc::now().timestamp_millis()
}
