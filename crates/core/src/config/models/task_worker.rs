use serde::{Deserialize, Serialize};
use std::time::Duration;

/// 任务与工作池配置（对应配置文件的 `[task]` 段）
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TaskConfig {
    /// 命令服务监听地址
    pub listen: String,
    /// Worker数量，每个Worker启动时认领一个任务
    pub count: u32,
    /// 表名前缀
    pub prefix: String,
    pub crontab_table: String,
    pub crontab_table_log: String,
    /// 任务注册表（hash）的键
    pub crontab_redis_key: String,
    /// 命令槽的键
    pub crontab_redis_action: String,
    /// 开启后每次执行结果都会以info级别输出
    pub debug: bool,
    /// 是否写入执行日志表
    pub write_log: bool,
}

impl Default for TaskConfig {
    fn default() -> Self {
        Self {
            listen: "0.0.0.0:12345".to_string(),
            count: 4,
            prefix: String::new(),
            crontab_table: "task_definitions".to_string(),
            crontab_table_log: "task_execution_log".to_string(),
            crontab_redis_key: "crontab_worker".to_string(),
            crontab_redis_action: "crontab_action".to_string(),
            debug: false,
            write_log: true,
        }
    }
}

impl TaskConfig {
    /// 带前缀的任务表名
    pub fn task_table(&self) -> String {
        format!("{}{}", self.prefix, self.crontab_table)
    }

    /// 带前缀的执行日志表名
    pub fn log_table(&self) -> String {
        format!("{}{}", self.prefix, self.crontab_table_log)
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        if self.listen.is_empty() {
            return Err(anyhow::anyhow!("监听地址不能为空"));
        }

        if self.count == 0 {
            return Err(anyhow::anyhow!("Worker数量必须大于0"));
        }

        // 表名会直接拼接进SQL语句
        for table in [self.task_table(), self.log_table()] {
            if table.is_empty()
                || !table
                    .chars()
                    .all(|c| c.is_ascii_alphanumeric() || c == '_')
            {
                return Err(anyhow::anyhow!("表名格式无效: {}", table));
            }
        }

        if self.crontab_redis_key.is_empty() || self.crontab_redis_action.is_empty() {
            return Err(anyhow::anyhow!("Redis键名不能为空"));
        }

        if self.crontab_redis_key == self.crontab_redis_action {
            return Err(anyhow::anyhow!("注册表键与命令槽键不能相同"));
        }

        Ok(())
    }
}

/// Worker运行参数（对应配置文件的 `[worker]` 段）
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkerConfig {
    /// 命令槽轮询间隔
    pub dispatch_interval_ms: u64,
    /// 每次轮询争抢 action 锁的等待时间，0 表示只尝试一次
    pub action_lock_timeout_ms: u64,
    pub action_lock_expire_seconds: u64,
    /// 命令槽写入后的存活时间
    pub command_ttl_seconds: u64,
    /// CommandExec 类型任务的命令前缀，为空时直接执行目标
    pub command_wrapper: String,
    pub http_timeout_seconds: u64,
    /// 是否允许执行 EvalExpr 类型任务
    pub enable_eval: bool,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            dispatch_interval_ms: 100,
            action_lock_timeout_ms: 0,
            action_lock_expire_seconds: 60,
            command_ttl_seconds: 5,
            command_wrapper: String::new(),
            http_timeout_seconds: 30,
            enable_eval: false,
        }
    }
}

impl WorkerConfig {
    pub fn dispatch_interval(&self) -> Duration {
        Duration::from_millis(self.dispatch_interval_ms)
    }

    pub fn command_ttl(&self) -> Duration {
        Duration::from_secs(self.command_ttl_seconds)
    }

    pub fn http_timeout(&self) -> Duration {
        Duration::from_secs(self.http_timeout_seconds)
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        if self.dispatch_interval_ms == 0 {
            return Err(anyhow::anyhow!("命令轮询间隔必须大于0"));
        }

        if self.action_lock_expire_seconds == 0 {
            return Err(anyhow::anyhow!("action锁过期时间必须大于0"));
        }

        if self.command_ttl_seconds == 0 {
            return Err(anyhow::anyhow!("命令存活时间必须大于0"));
        }

        if self.http_timeout_seconds == 0 {
            return Err(anyhow::anyhow!("HTTP超时时间必须大于0"));
        }

        Ok(())
    }
}
