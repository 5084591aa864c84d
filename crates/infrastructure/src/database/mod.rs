pub mod sqlite;

pub use sqlite::{DatabaseManager, SqliteTaskLogRepository, SqliteTaskRepository};
