//! 单个Worker的调度引擎
//!
//! 每个Worker拥有自己的任务池和事件循环：
//! - 启动时按序号认领一个启用的任务
//! - 定时争抢 `action` 锁，处理命令槽中的命令
//! - 收到定时器通知后执行任务并记录结果
//!
//! Worker之间只通过共享键值存储和数据库协作。

mod commands;
mod execution;

use std::sync::Arc;
use std::time::Duration;

use crontab_core::{
    AppConfig, Command, SchedulerError, SchedulerResult, TaskLogRepository, TaskRepository,
    traits::KeyValueStore,
};
use crontab_dispatcher::CommandSlot;
use crontab_infrastructure::{DistributedLock, LockOptions, LockOutcome, TaskRegistry};
use tokio::sync::{broadcast, mpsc};
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

use crate::components::{TaskPool, TaskTick};
use crate::executors::TaskRunner;

/// 处理命令槽前需要持有的锁
pub const ACTION_LOCK: &str = "action";

/// 引擎运行参数
#[derive(Debug, Clone)]
pub struct EngineSettings {
    /// 工作池中的Worker总数
    pub worker_count: u32,
    /// 开启后每次执行都以info级别输出
    pub debug: bool,
    pub write_log: bool,
    pub dispatch_interval: Duration,
    pub action_lock: LockOptions,
    /// 命令处理器使用的锁参数
    pub command_lock: LockOptions,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            worker_count: 4,
            debug: false,
            write_log: true,
            dispatch_interval: Duration::from_millis(100),
            action_lock: LockOptions::default()
                .with_timeout(Duration::ZERO)
                .with_expire(Duration::from_secs(60)),
            command_lock: LockOptions::guarded(),
        }
    }
}

impl EngineSettings {
    pub fn from_config(config: &AppConfig) -> Self {
        Self {
            worker_count: config.task.count,
            debug: config.task.debug,
            write_log: config.task.write_log,
            dispatch_interval: config.worker.dispatch_interval(),
            action_lock: LockOptions::default()
                .with_timeout(Duration::from_millis(config.worker.action_lock_timeout_ms))
                .with_expire(Duration::from_secs(config.worker.action_lock_expire_seconds)),
            command_lock: LockOptions::guarded(),
        }
    }
}

/// 同一工作池内所有Worker共享的依赖
#[derive(Clone)]
pub struct EngineContext {
    pub store: Arc<dyn KeyValueStore>,
    pub tasks: Arc<dyn TaskRepository>,
    pub logs: Arc<dyn TaskLogRepository>,
    pub registry: TaskRegistry,
    pub slot: CommandSlot,
    pub runner: Arc<TaskRunner>,
}

/// 命令处理结果
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CommandOutcome {
    /// 本Worker完成了处理
    Applied,
    /// 命令无法生效（参数无效、全部Worker已占用、任务不存在等）
    Rejected(String),
    /// 应由其他Worker处理，命令留在槽中
    NotResponsible,
}

impl CommandOutcome {
    /// 处理完成后是否清空命令槽
    pub fn clears_slot(&self) -> bool {
        !matches!(self, CommandOutcome::NotResponsible)
    }
}

pub struct SchedulerEngine {
    ordinal: u32,
    settings: EngineSettings,
    ctx: EngineContext,
    lock: Arc<DistributedLock>,
    pool: TaskPool,
    tick_tx: mpsc::UnboundedSender<TaskTick>,
    tick_rx: Option<mpsc::UnboundedReceiver<TaskTick>>,
}

impl SchedulerEngine {
    pub fn new(ordinal: u32, settings: EngineSettings, ctx: EngineContext) -> Self {
        let (tick_tx, tick_rx) = mpsc::unbounded_channel();
        let lock = Arc::new(DistributedLock::new(Arc::clone(&ctx.store)));
        Self {
            ordinal,
            settings,
            ctx,
            lock,
            pool: TaskPool::new(),
            tick_tx,
            tick_rx: Some(tick_rx),
        }
    }

    pub fn ordinal(&self) -> u32 {
        self.ordinal
    }

    pub fn settings(&self) -> &EngineSettings {
        &self.settings
    }

    pub fn pool(&self) -> &TaskPool {
        &self.pool
    }

    /// 建表、清理注册表并认领一个任务，返回认领到的任务ID
    pub async fn start(&mut self) -> SchedulerResult<Option<i64>> {
        self.ctx.tasks.ensure_table().await?;
        self.ctx.logs.ensure_table().await?;

        if self.ordinal == 0 {
            let enabled = self.ctx.tasks.enabled_ids().await?;
            let removed = self.ctx.registry.remove_stale_entries(&enabled).await?;
            if !removed.is_empty() {
                info!("清理注册表中未启用的任务: {:?}", removed);
            }
        }

        let Some(task) = self.ctx.tasks.enabled_at_offset(self.ordinal).await? else {
            info!("Worker {} 没有可认领的任务", self.ordinal);
            return Ok(None);
        };

        let task_id = task.id;
        if !self.start_task(task) {
            return Ok(None);
        }
        self.ctx.registry.register(task_id, self.ordinal).await?;
        info!("Worker {} 认领任务 {}", self.ordinal, task_id);
        Ok(Some(task_id))
    }

    /// Worker事件循环，收到关闭信号后销毁所有句柄并释放锁
    pub async fn run(&mut self, mut shutdown: broadcast::Receiver<()>) -> SchedulerResult<()> {
        let mut ticks = self
            .tick_rx
            .take()
            .ok_or_else(|| SchedulerError::Internal("Worker事件循环已在运行".to_string()))?;

        let mut dispatch = tokio::time::interval(self.settings.dispatch_interval);
        dispatch.set_missed_tick_behavior(MissedTickBehavior::Delay);

        info!("Worker {} 开始运行", self.ordinal);

        loop {
            tokio::select! {
                _ = dispatch.tick() => {
                    if let Some(outcome) = self.dispatch_once().await {
                        debug!("Worker {} 命令处理结果: {:?}", self.ordinal, outcome);
                    }
                }
                Some(tick) = ticks.recv() => {
                    self.on_tick(tick).await;
                }
                _ = shutdown.recv() => {
                    info!("Worker {} 收到关闭信号", self.ordinal);
                    break;
                }
            }
        }

        self.tick_rx = Some(ticks);
        self.shutdown().await;
        Ok(())
    }

    /// 尝试获取 `action` 锁并处理命令槽中的命令
    ///
    /// 没拿到锁或槽为空时返回 `None`。
    pub async fn dispatch_once(&mut self) -> Option<CommandOutcome> {
        let lock = Arc::clone(&self.lock);
        let action_lock = self.settings.action_lock;

        match lock.on_lock(ACTION_LOCK, action_lock, self.process_slot()).await {
            LockOutcome::Completed(outcome) => outcome,
            LockOutcome::NotAcquired => None,
            LockOutcome::Failed(reason) => {
                warn!("Worker {} 处理命令槽失败: {}", self.ordinal, reason);
                None
            }
        }
    }

    async fn process_slot(&mut self) -> SchedulerResult<Option<CommandOutcome>> {
        let Some(raw) = self.ctx.slot.read().await? else {
            return Ok(None);
        };

        let request = match Command::decode(&raw).and_then(Command::into_request) {
            Ok(request) => request,
            Err(e) => {
                warn!("丢弃无法解析的命令: {}", e);
                metrics::counter!("crontab_commands_dropped_total").increment(1);
                self.ctx.slot.clear().await?;
                return Ok(Some(CommandOutcome::Rejected(e.to_string())));
            }
        };

        let method = request.method();
        let outcome = self.handle_command(request).await;
        metrics::counter!(
            "crontab_commands_dispatched_total",
            "method" => method.as_str(),
            "outcome" => outcome_label(&outcome)
        )
        .increment(1);

        if outcome.clears_slot() {
            self.ctx.slot.clear().await?;
        }
        Ok(Some(outcome))
    }

    async fn on_tick(&mut self, tick: TaskTick) {
        if !self.pool.is_current(&tick) {
            debug!("丢弃已销毁句柄的通知: {:?}", tick);
            return;
        }
        // 执行期间到点的触发会再发一次通知，不会累积
        if let Some(entry) = self.pool.get(tick.task_id) {
            entry.handle.acknowledge();
        }
        self.execute_task(tick.task_id).await;
    }

    async fn shutdown(&mut self) {
        let destroyed = self.pool.destroy_all();
        if !self.lock.unlock_all().await {
            warn!("Worker {} 释放锁时出现错误", self.ordinal);
        }
        info!("Worker {} 已停止，销毁定时器 {} 个", self.ordinal, destroyed);
    }
}

fn outcome_label(outcome: &CommandOutcome) -> &'static str {
    match outcome {
        CommandOutcome::Applied => "applied",
        CommandOutcome::Rejected(_) => "rejected",
        CommandOutcome::NotResponsible => "not_responsible",
    }
}
