//! 配置管理
//!
//! 配置按以下顺序加载，后者覆盖前者：
//! 1. 内置默认值
//! 2. TOML配置文件
//! 3. 环境变量（前缀 `CRONTAB_`，层级分隔符 `__`，如 `CRONTAB_TASK__COUNT=8`）

pub mod models;

pub use models::{
    AppConfig, DatabaseConfig, LoggingConfig, RedisConfig, TaskConfig, WorkerConfig,
};

#[cfg(test)]
mod config_test;
