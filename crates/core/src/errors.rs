use thiserror::Error;

/// 调度器错误类型定义
#[derive(Debug, Error)]
pub enum SchedulerError {
    #[error("数据库错误: {0}")]
    Database(#[from] sqlx::Error),

    #[error("键值存储错误: {0}")]
    KeyValue(String),

    #[error("获取锁超时: {name}")]
    LockTimeout { name: String },

    #[error("任务未找到: {id}")]
    TaskNotFound { id: i64 },

    #[error("无效的CRON表达式: {expr} - {message}")]
    InvalidCron { expr: String, message: String },

    #[error("命令解析失败: {0}")]
    CommandDecode(String),

    #[error("{0}")]
    TargetResolution(String),

    #[error("任务执行错误: {0}")]
    TaskExecution(String),

    #[error("网络错误: {0}")]
    Network(String),

    #[error("序列化错误: {0}")]
    Serialization(String),

    #[error("配置错误: {0}")]
    Configuration(String),

    #[error("内部错误: {0}")]
    Internal(String),
}

impl SchedulerError {
    pub fn key_value<S: Into<String>>(msg: S) -> Self {
        Self::KeyValue(msg.into())
    }

    pub fn task_execution<S: Into<String>>(msg: S) -> Self {
        Self::TaskExecution(msg.into())
    }

    pub fn command_decode<S: Into<String>>(msg: S) -> Self {
        Self::CommandDecode(msg.into())
    }

    /// 无法解析到可调用的类方法时使用的固定错误
    pub fn target_not_found() -> Self {
        Self::TargetResolution(TARGET_NOT_FOUND_MESSAGE.to_string())
    }
}

/// 目标类或方法不存在时写入执行日志的固定文案
pub const TARGET_NOT_FOUND_MESSAGE: &str = "方法或类不存在或者错误";

impl From<serde_json::Error> for SchedulerError {
    fn from(err: serde_json::Error) -> Self {
        Self::Serialization(err.to_string())
    }
}

/// 统一的Result类型
pub type SchedulerResult<T> = std::result::Result<T, SchedulerError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_target_not_found_message() {
        let err = SchedulerError::target_not_found();
        assert_eq!(err.to_string(), TARGET_NOT_FOUND_MESSAGE);
    }

    #[test]
    fn test_json_error_conversion() {
        let err: SchedulerError = serde_json::from_str::<serde_json::Value>("{")
            .unwrap_err()
            .into();
        assert!(matches!(err, SchedulerError::Serialization(_)));
    }
}
