pub mod key_value;
pub mod repository;
pub mod task_handler;

pub use key_value::*;
pub use repository::*;
pub use task_handler::*;
