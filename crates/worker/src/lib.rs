pub mod components;
pub mod engine;
pub mod executors;
pub mod handler_registry;


pub use components::{PoolEntry, ScheduleHandle, TaskPool, TaskTick};
pub use engine::{CommandOutcome, EngineContext, EngineSettings, SchedulerEngine, ACTION_LOCK};
pub use executors::{
    ClassMethodExecutor, EvalExecutor, ExecutionReport, HttpExecutor, ShellExecutor, TaskExecutor,
    TaskRunner,
};
pub use handler_registry::{handler_key, HandlerRegistry};
