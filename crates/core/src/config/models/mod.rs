pub mod app_config;
pub mod database;
pub mod observability;
pub mod task_worker;

pub use app_config::AppConfig;
pub use database::{DatabaseConfig, RedisConfig};
pub use observability::LoggingConfig;
pub use task_worker::{TaskConfig, WorkerConfig};
