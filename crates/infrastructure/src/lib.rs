pub mod database;
pub mod key_value;
pub mod lock;
pub mod registry;

pub use database::*;
pub use key_value::*;
pub use lock::{DistributedLock, LockOptions, LockOutcome, LOCK_KEY_PREFIX};
pub use registry::TaskRegistry;
