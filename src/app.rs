use std::sync::Arc;

use anyhow::{Context, Result};
use crontab_core::{
    traits::FnTaskHandler, AppConfig, ExpressionEvaluator, KeyValueStore, TaskLogRepository,
    TaskRepository,
};
use crontab_dispatcher::{CommandServer, CommandSlot};
use crontab_infrastructure::{
    DatabaseManager, InMemoryKeyValueStore, RedisKeyValueStore, TaskRegistry,
};
use crontab_worker::{
    EngineContext, EngineSettings, HandlerRegistry, SchedulerEngine, TaskRunner,
};
use futures::future::join_all;
use tracing::{error, info, warn};

use crate::shutdown::ShutdownManager;

/// 内置的回显处理器，返回收到的参数
pub const BUILTIN_ECHO: &str = "crontab\\Builtin::echo";

/// 本进程承载的Worker序号
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Ordinals {
    /// `0..task.count` 全部在本进程中运行
    All,
    /// 只运行指定序号，其余Worker由其他进程承载
    Single(u32),
}

impl Ordinals {
    pub fn resolve(&self, worker_count: u32) -> Vec<u32> {
        match self {
            Ordinals::All => (0..worker_count).collect(),
            Ordinals::Single(ordinal) => vec![*ordinal],
        }
    }

    /// 命令服务由承载0号Worker的进程监听
    pub fn hosts_listener(&self) -> bool {
        matches!(self, Ordinals::All | Ordinals::Single(0))
    }
}

/// 主应用程序
pub struct Application {
    config: AppConfig,
    store: Arc<dyn KeyValueStore>,
    database: DatabaseManager,
    handlers: HandlerRegistry,
    evaluator: Option<Arc<dyn ExpressionEvaluator>>,
}

impl Application {
    /// 按配置连接键值存储和数据库
    pub async fn new(config: AppConfig) -> Result<Self> {
        info!("初始化应用程序");

        let store: Arc<dyn KeyValueStore> = if config.redis.in_memory {
            warn!("使用进程内键值存储，只能在单进程中运行全部Worker");
            Arc::new(InMemoryKeyValueStore::new())
        } else {
            Arc::new(
                RedisKeyValueStore::connect(&config.redis.url)
                    .await
                    .with_context(|| format!("连接Redis失败: {}", config.redis.url))?,
            )
        };

        // 内存数据库只能有一个连接
        let database = if config.database.url.contains(":memory:") {
            DatabaseManager::in_memory().await
        } else {
            DatabaseManager::new(&config.database).await
        };
        let database =
            database.with_context(|| format!("连接数据库失败: {}", config.database.url))?;

        Self::with_backends(config, store, database).await
    }

    /// 使用已经建立好的存储
    pub async fn with_backends(
        config: AppConfig,
        store: Arc<dyn KeyValueStore>,
        database: DatabaseManager,
    ) -> Result<Self> {
        let handlers = HandlerRegistry::new();
        handlers
            .register(
                BUILTIN_ECHO,
                Arc::new(FnTaskHandler::new("回显参数", |args| {
                    Ok(serde_json::Value::Array(args).to_string())
                })),
            )
            .await
            .context("注册内置处理器失败")?;

        Ok(Self {
            config,
            store,
            database,
            handlers,
            evaluator: None,
        })
    }

    /// 提供表达式求值器，配合 `worker.enable_eval` 使用
    pub fn with_evaluator(mut self, evaluator: Arc<dyn ExpressionEvaluator>) -> Self {
        self.evaluator = Some(evaluator);
        self
    }

    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    /// 类方法任务的处理器注册表，启动前注册
    pub fn handlers(&self) -> &HandlerRegistry {
        &self.handlers
    }

    pub fn task_repository(&self) -> Arc<dyn TaskRepository> {
        Arc::new(self.database.task_repository(self.config.task.task_table()))
    }

    pub fn task_log_repository(&self) -> Arc<dyn TaskLogRepository> {
        Arc::new(self.database.task_log_repository(self.config.task.log_table()))
    }

    pub fn command_slot(&self) -> CommandSlot {
        CommandSlot::new(
            Arc::clone(&self.store),
            self.config.task.crontab_redis_action.clone(),
        )
        .with_ttl(self.config.worker.command_ttl())
    }

    pub fn engine_context(&self) -> EngineContext {
        EngineContext {
            store: Arc::clone(&self.store),
            tasks: self.task_repository(),
            logs: self.task_log_repository(),
            registry: TaskRegistry::new(
                Arc::clone(&self.store),
                self.config.task.crontab_redis_key.clone(),
            ),
            slot: self.command_slot(),
            runner: Arc::new(TaskRunner::new(
                &self.config.worker,
                self.handlers.clone(),
                self.evaluator.clone(),
            )),
        }
    }

    /// 在配置的地址上绑定命令服务
    pub async fn bind_command_server(&self) -> Result<CommandServer> {
        CommandServer::bind(&self.config.task.listen, self.command_slot())
            .await
            .with_context(|| format!("绑定命令服务失败: {}", self.config.task.listen))
    }

    /// 运行工作池直到收到关闭信号
    pub async fn run(&self, ordinals: Ordinals, shutdown: ShutdownManager) -> Result<()> {
        let server = if ordinals.hosts_listener() {
            Some(self.bind_command_server().await?)
        } else {
            None
        };
        self.run_with_server(server, ordinals, shutdown).await
    }

    pub async fn run_with_server(
        &self,
        server: Option<CommandServer>,
        ordinals: Ordinals,
        shutdown: ShutdownManager,
    ) -> Result<()> {
        let host = hostname::get()
            .ok()
            .and_then(|name| name.into_string().ok())
            .unwrap_or_else(|| "unknown".to_string());
        info!("启动工作池: host={}, workers={:?}", host, ordinals);

        let pool = WorkerPool::start(
            self.engine_context(),
            EngineSettings::from_config(&self.config),
            ordinals.resolve(self.config.task.count),
        )
        .await?;

        let server_handle = match server {
            Some(server) => {
                let addr = server.local_addr()?;
                info!("命令服务监听: {}", addr);
                let shutdown_rx = shutdown.subscribe().await;
                Some(tokio::spawn(server.run(shutdown_rx)))
            }
            None => None,
        };

        pool.run(&shutdown).await;

        if let Some(handle) = server_handle {
            match handle.await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => error!("命令服务异常退出: {}", e),
                Err(e) => error!("命令服务任务失败: {}", e),
            }
        }

        self.database.close().await;
        info!("工作池已停止");
        Ok(())
    }
}

/// 同一进程中运行的一组Worker
pub struct WorkerPool {
    engines: Vec<SchedulerEngine>,
}

impl WorkerPool {
    /// 创建Worker并按序号依次认领任务
    pub async fn start(
        ctx: EngineContext,
        settings: EngineSettings,
        ordinals: Vec<u32>,
    ) -> Result<Self> {
        let mut engines = Vec::with_capacity(ordinals.len());
        for ordinal in ordinals {
            if ordinal >= settings.worker_count {
                return Err(anyhow::anyhow!(
                    "Worker序号 {} 超出范围 0..{}",
                    ordinal,
                    settings.worker_count
                ));
            }

            let mut engine = SchedulerEngine::new(ordinal, settings.clone(), ctx.clone());
            engine
                .start()
                .await
                .with_context(|| format!("Worker {ordinal} 启动失败"))?;
            engines.push(engine);
        }

        Ok(Self { engines })
    }

    pub fn len(&self) -> usize {
        self.engines.len()
    }

    pub fn is_empty(&self) -> bool {
        self.engines.is_empty()
    }

    /// 每个Worker一个事件循环，全部退出后返回
    pub async fn run(self, shutdown: &ShutdownManager) {
        let mut handles = Vec::with_capacity(self.engines.len());
        for mut engine in self.engines {
            let shutdown_rx = shutdown.subscribe().await;
            handles.push(tokio::spawn(async move {
                let ordinal = engine.ordinal();
                if let Err(e) = engine.run(shutdown_rx).await {
                    error!("Worker {} 运行失败: {}", ordinal, e);
                }
            }));
        }

        for result in join_all(handles).await {
            if let Err(e) = result {
                error!("Worker任务异常结束: {}", e);
            }
        }
    }
}
