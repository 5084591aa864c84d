//! 命令通道与cron规则
//!
//! - `cron_rule`: 5段/6段cron表达式的规范化与计算
//! - `command_slot`: 共享存储中保存最新一条命令的槽位
//! - `server` / `client`: 以换行分隔的TCP命令协议

pub mod client;
pub mod command_slot;
pub mod cron_rule;
pub mod server;

pub use client::CommandClient;
pub use command_slot::{CommandSlot, DEFAULT_COMMAND_TTL};
pub use cron_rule::CronRule;
pub use server::{CommandServer, ACK};
