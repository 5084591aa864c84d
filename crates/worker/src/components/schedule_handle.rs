use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use chrono::Local;
use crontab_dispatcher::CronRule;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

/// 调度句柄到点后发给所属Worker的通知
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TaskTick {
    pub task_id: i64,
    /// 句柄的代数，用于丢弃已销毁句柄残留的通知
    pub generation: u64,
}

/// 某个任务在某个Worker内的定时器
///
/// 后台任务按本地时区计算下一次触发时刻，睡眠到点后发送 [`TaskTick`]。
/// 执行本身由Worker的事件循环完成，句柄只负责计时。
///
/// 每个句柄最多只有一个未被取走的通知，Worker忙碌期间错过的触发会合并为一次。
#[derive(Debug)]
pub struct ScheduleHandle {
    task_id: i64,
    generation: u64,
    rule: CronRule,
    pending: Arc<AtomicBool>,
    timer: JoinHandle<()>,
}

impl ScheduleHandle {
    pub fn spawn(
        task_id: i64,
        generation: u64,
        rule: CronRule,
        ticks: mpsc::UnboundedSender<TaskTick>,
    ) -> Self {
        let timer_rule = rule.clone();
        let pending = Arc::new(AtomicBool::new(false));
        let timer_pending = Arc::clone(&pending);
        let timer = tokio::spawn(async move {
            let mut last_fire = Local::now();
            loop {
                let from = Local::now().max(last_fire);
                let Some(next) = timer_rule.next_after(&from) else {
                    warn!("任务 {} 的规则 {} 没有后续触发时间", task_id, timer_rule.expression());
                    break;
                };

                let wait = (next - Local::now()).to_std().unwrap_or_default();
                tokio::time::sleep(wait).await;
                last_fire = next;

                if timer_pending.swap(true, Ordering::AcqRel) {
                    debug!("任务 {} 上一次通知尚未处理，跳过本次触发", task_id);
                    continue;
                }

                if ticks.send(TaskTick { task_id, generation }).is_err() {
                    debug!("任务 {} 的接收端已关闭，定时器退出", task_id);
                    break;
                }
            }
        });

        Self {
            task_id,
            generation,
            rule,
            pending,
            timer,
        }
    }

    /// Worker取走通知后调用，之后的触发才会再次发送
    pub fn acknowledge(&self) {
        self.pending.store(false, Ordering::Release);
    }

    /// 是否有已发送但未被取走的通知
    pub fn is_pending(&self) -> bool {
        self.pending.load(Ordering::Acquire)
    }

    pub fn task_id(&self) -> i64 {
        self.task_id
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn rule(&self) -> &CronRule {
        &self.rule
    }

    /// 停止计时，可重复调用
    pub fn destroy(&self) {
        self.timer.abort();
    }

    pub fn is_finished(&self) -> bool {
        self.timer.is_finished()
    }
}

impl Drop for ScheduleHandle {
    fn drop(&mut self) {
        self.timer.abort();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn test_handle_ticks_every_second() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let rule = CronRule::parse("* * * * * *").unwrap();
        let handle = ScheduleHandle::spawn(7, 3, rule, tx);

        let tick = tokio::time::timeout(Duration::from_secs(3), rx.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(tick, TaskTick { task_id: 7, generation: 3 });
        assert_eq!(handle.task_id(), 7);
        assert_eq!(handle.generation(), 3);
        assert_eq!(handle.rule().expression(), "* * * * * *");
    }

    #[tokio::test]
    async fn test_missed_fires_are_coalesced() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let rule = CronRule::parse("* * * * * *").unwrap();
        let handle = ScheduleHandle::spawn(9, 1, rule, tx);

        // 模拟Worker忙于执行任务，期间不取通知
        tokio::time::sleep(Duration::from_millis(3500)).await;

        let mut queued = Vec::new();
        while let Ok(tick) = rx.try_recv() {
            queued.push(tick);
        }
        assert_eq!(queued.len(), 1);
        assert!(handle.is_pending());

        handle.acknowledge();
        assert!(!handle.is_pending());
        let next = tokio::time::timeout(Duration::from_secs(3), rx.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(next.task_id, 9);
    }

    #[tokio::test]
    async fn test_destroy_stops_ticks() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let rule = CronRule::parse("* * * * * *").unwrap();
        let handle = ScheduleHandle::spawn(1, 1, rule, tx);

        handle.destroy();
        handle.destroy();
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(handle.is_finished());

        // 发送端随后台任务一起释放
        let next = tokio::time::timeout(Duration::from_millis(1500), rx.recv()).await;
        assert!(matches!(next, Ok(None)));
    }

    #[tokio::test]
    async fn test_drop_aborts_timer() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let rule = CronRule::parse("* * * * * *").unwrap();
        drop(ScheduleHandle::spawn(1, 1, rule, tx));

        let next = tokio::time::timeout(Duration::from_millis(1500), rx.recv()).await;
        assert!(matches!(next, Ok(None)));
    }
}
