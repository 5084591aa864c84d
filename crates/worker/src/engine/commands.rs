use std::sync::Arc;

use crontab_core::{
    now_timestamp, CommandRequest, NewTask, SchedulerError, SchedulerResult, TaskPatch, TaskStatus,
};
use crontab_dispatcher::CronRule;
use crontab_infrastructure::LockOutcome;
use tracing::{info, instrument, warn};

use super::{CommandOutcome, SchedulerEngine};

enum Holder {
    /// 句柄在本Worker的任务池中
    This,
    /// 已登记但句柄不在本Worker
    Elsewhere,
    /// 没有登记
    Unassigned,
}

impl SchedulerEngine {
    /// 在对应方法的锁内处理一条命令
    ///
    /// 没拿到锁说明其他Worker正在处理同类命令，视为不归本Worker处理；
    /// 处理过程出错时命令作废。
    #[instrument(skip(self, request), fields(ordinal = self.ordinal, method = %request.method()))]
    pub async fn handle_command(&mut self, request: CommandRequest) -> CommandOutcome {
        let lock = Arc::clone(&self.lock);
        let lock_name = request.method().lock_name();
        let options = self.settings.command_lock;

        match lock.on_lock(lock_name, options, self.apply(request)).await {
            LockOutcome::Completed(outcome) => outcome,
            LockOutcome::NotAcquired => CommandOutcome::NotResponsible,
            LockOutcome::Failed(reason) => CommandOutcome::Rejected(reason),
        }
    }

    async fn apply(&mut self, request: CommandRequest) -> SchedulerResult<CommandOutcome> {
        match request {
            CommandRequest::Create(task) => self.apply_create(task).await,
            CommandRequest::Update(patch) => self.apply_update(patch).await,
            CommandRequest::Delete { id } => self.apply_delete(id).await,
            CommandRequest::Reload { id } => self.apply_reload(id).await,
        }
    }

    async fn apply_create(&mut self, task: NewTask) -> SchedulerResult<CommandOutcome> {
        if let Err(reason) = task.validate() {
            return Ok(CommandOutcome::Rejected(reason));
        }
        if let Err(e) = CronRule::validate(&task.rule) {
            return Ok(CommandOutcome::Rejected(e.to_string()));
        }
        if self
            .ctx
            .registry
            .all_occupied(self.settings.worker_count)
            .await?
        {
            warn!("所有Worker均已占用，拒绝创建任务: {}", task.title);
            return Ok(CommandOutcome::Rejected("所有Worker均已占用".to_string()));
        }
        if !self.is_idle().await? {
            return Ok(CommandOutcome::NotResponsible);
        }

        let id = self.ctx.tasks.insert(&task, now_timestamp()).await?;
        info!("Worker {} 创建任务 {}: {}", self.ordinal, id, task.title);

        self.activate(id).await?;
        Ok(CommandOutcome::Applied)
    }

    async fn apply_update(&mut self, patch: TaskPatch) -> SchedulerResult<CommandOutcome> {
        let id = patch.id;
        if let Some(rule) = &patch.rule {
            if let Err(e) = CronRule::validate(rule) {
                return Ok(CommandOutcome::Rejected(e.to_string()));
            }
        }

        match self.holder_of(id).await? {
            Holder::Unassigned => {
                if self
                    .ctx
                    .registry
                    .all_occupied(self.settings.worker_count)
                    .await?
                {
                    return Ok(CommandOutcome::Rejected("所有Worker均已占用".to_string()));
                }
                if !self.is_idle().await? {
                    return Ok(CommandOutcome::NotResponsible);
                }
            }
            Holder::Elsewhere => return Ok(CommandOutcome::NotResponsible),
            Holder::This => {
                self.pool.remove(id);
            }
        }

        if !self.ctx.tasks.update(&patch, now_timestamp()).await? {
            // 注册表中残留的条目一并清理
            self.ctx.registry.deregister(id).await?;
            return Ok(CommandOutcome::Rejected(
                SchedulerError::TaskNotFound { id }.to_string(),
            ));
        }
        info!("Worker {} 更新任务 {}", self.ordinal, id);

        self.activate(id).await?;
        Ok(CommandOutcome::Applied)
    }

    async fn apply_delete(&mut self, id: i64) -> SchedulerResult<CommandOutcome> {
        match self.holder_of(id).await? {
            Holder::Unassigned => {}
            Holder::Elsewhere => return Ok(CommandOutcome::NotResponsible),
            Holder::This => {
                self.pool.remove(id);
                self.ctx.registry.deregister(id).await?;
            }
        }

        if !self.ctx.tasks.delete(id).await? {
            return Ok(CommandOutcome::Rejected(
                SchedulerError::TaskNotFound { id }.to_string(),
            ));
        }
        info!("Worker {} 删除任务 {}", self.ordinal, id);
        Ok(CommandOutcome::Applied)
    }

    async fn apply_reload(&mut self, id: i64) -> SchedulerResult<CommandOutcome> {
        match self.holder_of(id).await? {
            Holder::Unassigned => {
                if self
                    .ctx
                    .registry
                    .all_occupied(self.settings.worker_count)
                    .await?
                {
                    return Ok(CommandOutcome::Rejected("所有Worker均已占用".to_string()));
                }
                if !self.is_idle().await? {
                    return Ok(CommandOutcome::NotResponsible);
                }
            }
            Holder::Elsewhere => return Ok(CommandOutcome::NotResponsible),
            Holder::This => {
                self.pool.remove(id);
            }
        }

        if !self
            .ctx
            .tasks
            .set_status(id, TaskStatus::Enabled, now_timestamp())
            .await?
        {
            self.ctx.registry.deregister(id).await?;
            return Ok(CommandOutcome::Rejected(
                SchedulerError::TaskNotFound { id }.to_string(),
            ));
        }
        info!("Worker {} 重新加载任务 {}", self.ordinal, id);

        self.activate(id).await?;
        Ok(CommandOutcome::Applied)
    }

    /// 由哪个Worker处理已有任务的命令
    ///
    /// 句柄在谁的任务池里就由谁处理；注册表只用来判断任务是否已分配，
    /// 其中记录的序号不作为依据。
    async fn holder_of(&self, id: i64) -> SchedulerResult<Holder> {
        if self.pool.contains(id) {
            return Ok(Holder::This);
        }
        Ok(match self.ctx.registry.owner(id).await? {
            Some(owner) => {
                if owner == self.ordinal {
                    warn!("注册表记录任务 {} 属于Worker {}，但任务池中没有句柄", id, owner);
                }
                Holder::Elsewhere
            }
            None => Holder::Unassigned,
        })
    }

    /// 本Worker是否没有在注册表中登记任何任务
    async fn is_idle(&self) -> SchedulerResult<bool> {
        self.ctx.registry.is_empty_process(self.ordinal).await
    }

    /// 按数据库中的最新状态启动句柄并登记，未启用的任务从注册表移除
    async fn activate(&mut self, id: i64) -> SchedulerResult<()> {
        match self.ctx.tasks.find_enabled_by_id(id).await? {
            Some(task) => {
                if self.start_task(task) {
                    self.ctx.registry.register(id, self.ordinal).await?;
                } else {
                    self.ctx.registry.deregister(id).await?;
                }
            }
            None => {
                self.ctx.registry.deregister(id).await?;
            }
        }
        Ok(())
    }
}
