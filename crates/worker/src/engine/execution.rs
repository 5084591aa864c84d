use std::time::Instant;

use crontab_core::{now_timestamp, NewExecutionRecord, TaskDefinition, TaskStatus};
use crontab_dispatcher::CronRule;
use tracing::{debug, error, info, warn};

use super::SchedulerEngine;
use crate::components::ScheduleHandle;
use crate::executors::ExecutionReport;

impl SchedulerEngine {
    /// 执行任务池中的任务
    ///
    /// 任务不在池中或已被禁用时跳过并返回 `None`。执行失败不会向上传播，
    /// 只体现在返回的结果和执行日志中。
    pub async fn execute_task(&mut self, task_id: i64) -> Option<ExecutionReport> {
        let task = match self.pool.get(task_id) {
            Some(entry) => entry.task.clone(),
            None => {
                debug!("任务 {} 不在Worker {} 的任务池中", task_id, self.ordinal);
                return None;
            }
        };

        if !self.can_run(task_id).await {
            debug!("任务 {} 未启用，跳过本次执行", task_id);
            return None;
        }

        let started_at = now_timestamp();
        let timer = Instant::now();
        let report = self.ctx.runner.run(&task).await;
        let elapsed = timer.elapsed().as_secs_f64();

        let result = if report.success { "成功" } else { "失败" };
        if self.settings.debug {
            info!(
                "执行定时器任务#{} {} {} {}",
                task.id, task.rule, task.target, result
            );
        } else {
            debug!(
                "执行定时器任务#{} {} {} {}",
                task.id, task.rule, task.target, result
            );
        }

        metrics::counter!(
            "crontab_task_executions_total",
            "kind" => task.kind.as_str(),
            "result" => if report.success { "success" } else { "failure" }
        )
        .increment(1);
        metrics::histogram!("crontab_task_duration_seconds", "kind" => task.kind.as_str())
            .record(elapsed);

        if let Err(e) = self.ctx.tasks.record_run(task_id, started_at).await {
            error!("更新任务 {} 执行次数失败: {}", task_id, e);
        }

        if self.settings.write_log {
            self.append_log(&task, &report, elapsed, started_at).await;
        }

        if task.singleton {
            self.finish_singleton(task_id).await;
        }

        Some(report)
    }

    /// 每次执行前重新读取任务状态
    async fn can_run(&self, task_id: i64) -> bool {
        match self.ctx.tasks.status_of(task_id).await {
            Ok(status) => status == Some(TaskStatus::Enabled),
            Err(e) => {
                warn!("读取任务 {} 状态失败: {}", task_id, e);
                false
            }
        }
    }

    async fn append_log(
        &self,
        task: &TaskDefinition,
        report: &ExecutionReport,
        elapsed: f64,
        started_at: i64,
    ) {
        let record = NewExecutionRecord {
            task_id: task.id,
            target: task.target.clone(),
            parameter: task.parameter.clone(),
            exception: report.output.clone(),
            return_code: report.return_code(),
            running_time: NewExecutionRecord::round_running_time(elapsed),
            create_time: started_at,
        };

        if let Err(e) = self.ctx.logs.append(&record).await {
            error!("写入任务 {} 执行日志失败: {}", task.id, e);
        }
    }

    /// 单次任务执行后销毁句柄、禁用任务并注销
    async fn finish_singleton(&mut self, task_id: i64) {
        self.pool.remove(task_id);

        if let Err(e) = self
            .ctx
            .tasks
            .set_status(task_id, TaskStatus::Disabled, now_timestamp())
            .await
        {
            error!("禁用单次任务 {} 失败: {}", task_id, e);
        }

        if let Err(e) = self.ctx.registry.deregister(task_id).await {
            warn!("注销单次任务 {} 失败: {}", task_id, e);
        }

        if self.settings.debug {
            info!("定时器销毁: 任务#{}", task_id);
        }
    }

    /// 为任务创建调度句柄并放入任务池
    ///
    /// 规则无法解析时不启动，返回 `false`。
    pub(crate) fn start_task(&mut self, task: TaskDefinition) -> bool {
        let rule = match CronRule::parse(&task.rule) {
            Ok(rule) => rule,
            Err(e) => {
                warn!("任务 {} 的执行规则无效，未启动: {}", task.id, e);
                return false;
            }
        };

        let generation = self.pool.next_generation();
        let handle = ScheduleHandle::spawn(task.id, generation, rule, self.tick_tx.clone());
        debug!(
            "Worker {} 启动任务 {} 的定时器: {}",
            self.ordinal, task.id, task.rule
        );
        self.pool.insert(task, handle);
        true
    }
}
