use std::collections::HashMap;

use crontab_core::TaskDefinition;

use super::schedule_handle::{ScheduleHandle, TaskTick};

/// 任务池中的一项：定义快照与运行中的句柄
#[derive(Debug)]
pub struct PoolEntry {
    pub task: TaskDefinition,
    pub handle: ScheduleHandle,
}

/// 单个Worker持有的调度句柄
///
/// 槽位向量 + ID索引 + 空闲链表，移除后的槽位会被复用。
/// 每个句柄带一个递增的代数，用来识别已销毁句柄遗留的通知。
#[derive(Debug, Default)]
pub struct TaskPool {
    slots: Vec<Option<PoolEntry>>,
    index: HashMap<i64, usize>,
    free: Vec<usize>,
    next_generation: u64,
}

impl TaskPool {
    pub fn new() -> Self {
        Self::default()
    }

    /// 为下一个句柄分配代数
    pub fn next_generation(&mut self) -> u64 {
        self.next_generation += 1;
        self.next_generation
    }

    /// 放入任务，同一任务已存在时销毁旧句柄并原位替换
    pub fn insert(&mut self, task: TaskDefinition, handle: ScheduleHandle) {
        let id = task.id;
        let entry = PoolEntry { task, handle };

        if let Some(&slot) = self.index.get(&id) {
            if let Some(old) = self.slots[slot].replace(entry) {
                old.handle.destroy();
            }
            return;
        }

        let slot = match self.free.pop() {
            Some(slot) => {
                self.slots[slot] = Some(entry);
                slot
            }
            None => {
                self.slots.push(Some(entry));
                self.slots.len() - 1
            }
        };
        self.index.insert(id, slot);
    }

    pub fn get(&self, task_id: i64) -> Option<&PoolEntry> {
        let slot = *self.index.get(&task_id)?;
        self.slots.get(slot)?.as_ref()
    }

    pub fn contains(&self, task_id: i64) -> bool {
        self.index.contains_key(&task_id)
    }

    /// 销毁句柄并移出任务池
    pub fn remove(&mut self, task_id: i64) -> Option<TaskDefinition> {
        let slot = self.index.remove(&task_id)?;
        let entry = self.slots.get_mut(slot)?.take()?;
        self.free.push(slot);
        entry.handle.destroy();
        Some(entry.task)
    }

    /// 通知是否来自任务当前的句柄
    pub fn is_current(&self, tick: &TaskTick) -> bool {
        self.get(tick.task_id)
            .is_some_and(|entry| entry.handle.generation() == tick.generation)
    }

    /// 销毁所有句柄，返回销毁数量
    pub fn destroy_all(&mut self) -> usize {
        let ids = self.task_ids();
        for id in &ids {
            self.remove(*id);
        }
        ids.len()
    }

    pub fn len(&self) -> usize {
        self.index.len()
    }

    pub fn is_empty(&self) -> bool {
        self.index.is_empty()
    }

    pub fn task_ids(&self) -> Vec<i64> {
        let mut ids: Vec<i64> = self.index.keys().copied().collect();
        ids.sort_unstable();
        ids
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crontab_core::{TaskKind, TaskStatus};
    use crontab_dispatcher::CronRule;
    use tokio::sync::mpsc;

    fn definition(id: i64) -> TaskDefinition {
        TaskDefinition {
            id,
            title: format!("task-{id}"),
            kind: TaskKind::ShellExec,
            rule: "0 0 1 1 *".to_string(),
            target: "true".to_string(),
            parameter: None,
            singleton: false,
            status: TaskStatus::Enabled,
            sort: 0,
            running_times: 0,
            last_running_time: 0,
            remark: None,
            create_time: 0,
            update_time: 0,
        }
    }

    fn spawn(pool: &mut TaskPool, id: i64, tx: &mpsc::UnboundedSender<TaskTick>) -> u64 {
        let generation = pool.next_generation();
        let rule = CronRule::parse("0 0 1 1 *").unwrap();
        pool.insert(
            definition(id),
            ScheduleHandle::spawn(id, generation, rule, tx.clone()),
        );
        generation
    }

    #[tokio::test]
    async fn test_insert_get_remove() {
        let (tx, _rx) = mpsc::unbounded_channel();
        let mut pool = TaskPool::new();

        spawn(&mut pool, 10, &tx);
        spawn(&mut pool, 20, &tx);

        assert_eq!(pool.len(), 2);
        assert!(pool.contains(10));
        assert_eq!(pool.get(20).unwrap().task.id, 20);
        assert_eq!(pool.task_ids(), vec![10, 20]);

        let removed = pool.remove(10).unwrap();
        assert_eq!(removed.id, 10);
        assert!(!pool.contains(10));
        assert!(pool.remove(10).is_none());
        assert_eq!(pool.len(), 1);
    }

    #[tokio::test]
    async fn test_slot_reuse_after_remove() {
        let (tx, _rx) = mpsc::unbounded_channel();
        let mut pool = TaskPool::new();

        spawn(&mut pool, 1, &tx);
        spawn(&mut pool, 2, &tx);
        pool.remove(1);
        spawn(&mut pool, 3, &tx);

        assert_eq!(pool.slots.len(), 2);
        assert!(pool.free.is_empty());
        assert_eq!(pool.task_ids(), vec![2, 3]);
    }

    #[tokio::test]
    async fn test_replace_invalidates_old_generation() {
        let (tx, _rx) = mpsc::unbounded_channel();
        let mut pool = TaskPool::new();

        let first = spawn(&mut pool, 5, &tx);
        let second = spawn(&mut pool, 5, &tx);

        assert_ne!(first, second);
        assert_eq!(pool.len(), 1);
        assert!(!pool.is_current(&TaskTick { task_id: 5, generation: first }));
        assert!(pool.is_current(&TaskTick { task_id: 5, generation: second }));
        assert!(!pool.is_current(&TaskTick { task_id: 6, generation: second }));
    }

    #[tokio::test]
    async fn test_destroy_all() {
        let (tx, _rx) = mpsc::unbounded_channel();
        let mut pool = TaskPool::new();

        for id in 1..=3 {
            spawn(&mut pool, id, &tx);
        }

        assert_eq!(pool.destroy_all(), 3);
        assert!(pool.is_empty());
        assert_eq!(pool.destroy_all(), 0);
    }
}
