#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use crontab_core::{
    config::WorkerConfig, traits::KeyValueStore, Command, NewTask, TaskDefinition,
    TaskLogRepository, TaskRepository,
};
use crontab_dispatcher::CommandSlot;
use crontab_infrastructure::{DatabaseManager, InMemoryKeyValueStore, TaskRegistry};
use crontab_worker::{EngineContext, EngineSettings, HandlerRegistry, SchedulerEngine, TaskRunner};

pub const REGISTRY_KEY: &str = "crontab_worker";
pub const ACTION_KEY: &str = "crontab_action";

/// 一个工作池所需的共享依赖：内存键值存储 + 内存SQLite
pub struct Harness {
    pub store: Arc<dyn KeyValueStore>,
    pub tasks: Arc<dyn TaskRepository>,
    pub logs: Arc<dyn TaskLogRepository>,
    pub registry: TaskRegistry,
    pub slot: CommandSlot,
    pub handlers: HandlerRegistry,
    pub worker_config: WorkerConfig,
    _db: DatabaseManager,
}

impl Harness {
    pub async fn new() -> Self {
        let worker_config = WorkerConfig {
            // CommandExec 任务在测试中直接回显目标
            command_wrapper: "echo".to_string(),
            ..WorkerConfig::default()
        };

        let store: Arc<dyn KeyValueStore> = Arc::new(InMemoryKeyValueStore::new());
        let db = DatabaseManager::in_memory().await.unwrap();
        let tasks: Arc<dyn TaskRepository> = Arc::new(db.task_repository("task_definitions"));
        let logs: Arc<dyn TaskLogRepository> =
            Arc::new(db.task_log_repository("task_execution_log"));
        tasks.ensure_table().await.unwrap();
        logs.ensure_table().await.unwrap();

        Self {
            registry: TaskRegistry::new(Arc::clone(&store), REGISTRY_KEY),
            slot: CommandSlot::new(Arc::clone(&store), ACTION_KEY),
            store,
            tasks,
            logs,
            handlers: HandlerRegistry::new(),
            worker_config,
            _db: db,
        }
    }

    pub fn context(&self) -> EngineContext {
        EngineContext {
            store: Arc::clone(&self.store),
            tasks: Arc::clone(&self.tasks),
            logs: Arc::clone(&self.logs),
            registry: self.registry.clone(),
            slot: self.slot.clone(),
            runner: Arc::new(TaskRunner::new(
                &self.worker_config,
                self.handlers.clone(),
                None,
            )),
        }
    }

    pub fn settings(worker_count: u32) -> EngineSettings {
        EngineSettings {
            worker_count,
            dispatch_interval: Duration::from_millis(20),
            ..EngineSettings::default()
        }
    }

    pub fn engine(&self, ordinal: u32, worker_count: u32) -> SchedulerEngine {
        SchedulerEngine::new(ordinal, Self::settings(worker_count), self.context())
    }

    pub fn engine_with(&self, ordinal: u32, settings: EngineSettings) -> SchedulerEngine {
        SchedulerEngine::new(ordinal, settings, self.context())
    }

    /// 启动 `count` 个Worker并各自认领任务
    pub async fn start_engines(&self, count: u32) -> Vec<SchedulerEngine> {
        let mut engines = Vec::new();
        for ordinal in 0..count {
            let mut engine = self.engine(ordinal, count);
            engine.start().await.unwrap();
            engines.push(engine);
        }
        engines
    }

    pub async fn seed(&self, task: NewTask) -> i64 {
        self.tasks.insert(&task, 1_700_000_000).await.unwrap()
    }

    pub async fn send(&self, command: &Command) {
        self.slot.write(&command.encode().unwrap()).await.unwrap();
    }

    pub async fn task(&self, id: i64) -> TaskDefinition {
        self.tasks.find_by_id(id).await.unwrap().unwrap()
    }
}
