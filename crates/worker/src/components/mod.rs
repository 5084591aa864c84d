pub mod schedule_handle;
pub mod task_pool;

pub use schedule_handle::{ScheduleHandle, TaskTick};
pub use task_pool::{PoolEntry, TaskPool};
