pub mod app;
pub mod shutdown;

pub use app::{Application, Ordinals, WorkerPool, BUILTIN_ECHO};
pub use shutdown::ShutdownManager;
