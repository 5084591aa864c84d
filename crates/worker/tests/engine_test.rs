mod common;

use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use common::Harness;
use crontab_core::{
    traits::FnTaskHandler, Command, NewTask, SchedulerResult, TaskHandler, TaskKind, TaskStatus,
    TARGET_NOT_FOUND_MESSAGE,
};
use crontab_worker::{CommandOutcome, EngineSettings};
use serde_json::Value;
use tokio::sync::broadcast;
use tokio::time::Instant;

fn every_second(title: &str, kind: TaskKind, target: &str) -> NewTask {
    NewTask::new(title, kind, "* * * * * *", target)
}

/// 第一次调用耗时超过多个触发周期，之后立即返回
#[derive(Default)]
struct SlowFirstCall {
    started: Mutex<Vec<Instant>>,
}

#[async_trait]
impl TaskHandler for SlowFirstCall {
    async fn invoke(&self, _args: Vec<Value>) -> SchedulerResult<String> {
        let first = {
            let mut started = self.started.lock().unwrap();
            started.push(Instant::now());
            started.len() == 1
        };
        if first {
            tokio::time::sleep(Duration::from_millis(2300)).await;
        }
        Ok(String::new())
    }
}

#[tokio::test]
async fn test_startup_claims_task_by_offset() {
    let harness = Harness::new().await;
    let id1 = harness.seed(every_second("a", TaskKind::ShellExec, "true").with_sort(10)).await;
    let id2 = harness.seed(every_second("b", TaskKind::ShellExec, "true").with_sort(9)).await;
    let id3 = harness.seed(every_second("c", TaskKind::ShellExec, "true").with_sort(1)).await;
    let id4 = harness.seed(every_second("d", TaskKind::ShellExec, "true").with_sort(1)).await;
    let id5 = harness.seed(every_second("e", TaskKind::ShellExec, "true").with_sort(8)).await;

    let expected = [id1, id2, id5, id3, id4];
    for (ordinal, expected_id) in expected.iter().enumerate() {
        let mut engine = harness.engine(ordinal as u32, 6);
        let claimed = engine.start().await.unwrap();
        assert_eq!(claimed, Some(*expected_id));
        assert_eq!(engine.pool().task_ids(), vec![*expected_id]);
        assert_eq!(
            harness.registry.owner(*expected_id).await.unwrap(),
            Some(ordinal as u32)
        );
    }

    // 任务数少于Worker数时多出的Worker保持空闲
    let mut idle = harness.engine(5, 6);
    assert_eq!(idle.start().await.unwrap(), None);
    assert!(idle.pool().is_empty());
    assert!(harness.registry.is_empty_process(5).await.unwrap());
}

#[tokio::test]
async fn test_startup_skips_disabled_tasks() {
    let harness = Harness::new().await;
    harness
        .seed(every_second("off", TaskKind::ShellExec, "true").with_status(TaskStatus::Disabled))
        .await;
    let on = harness.seed(every_second("on", TaskKind::ShellExec, "true")).await;

    let mut engine = harness.engine(0, 2);
    assert_eq!(engine.start().await.unwrap(), Some(on));
}

#[tokio::test]
async fn test_ordinal_zero_purges_stale_registry_entries() {
    let harness = Harness::new().await;
    let enabled = harness.seed(every_second("on", TaskKind::ShellExec, "true")).await;
    let disabled = harness
        .seed(every_second("off", TaskKind::ShellExec, "true").with_status(TaskStatus::Disabled))
        .await;

    harness.registry.register(disabled, 1).await.unwrap();
    harness.registry.register(99, 2).await.unwrap();

    // 非0号Worker不做清理
    let mut engine1 = harness.engine(1, 3);
    engine1.start().await.unwrap();
    assert_eq!(harness.registry.owner(99).await.unwrap(), Some(2));

    let mut engine0 = harness.engine(0, 3);
    assert_eq!(engine0.start().await.unwrap(), Some(enabled));

    let mut ids = harness.registry.task_ids().await.unwrap();
    ids.sort_unstable();
    assert_eq!(ids, vec![enabled]);
}

#[tokio::test]
async fn test_create_and_execute_records_each_run() {
    let harness = Harness::new().await;
    let mut engine = harness.engine(0, 1);
    engine.start().await.unwrap();

    let task = every_second("t1", TaskKind::CommandExec, "run-report");
    harness.send(&Command::create(&task).unwrap()).await;
    assert_eq!(engine.dispatch_once().await, Some(CommandOutcome::Applied));

    let created = harness.tasks.list().await.unwrap();
    assert_eq!(created.len(), 1);
    let id = created[0].id;
    assert_eq!(created[0].title, "t1");
    assert!(created[0].create_time > 0);
    assert!(engine.pool().contains(id));
    assert_eq!(harness.registry.owner(id).await.unwrap(), Some(0));

    for run in 1..=2 {
        let report = engine.execute_task(id).await.unwrap();
        assert!(report.success, "{}", report.output);
        assert_eq!(report.output, "run-report");
        assert_eq!(harness.task(id).await.running_times, run);
    }

    let records = harness.logs.find_by_task(id).await.unwrap();
    assert_eq!(records.len(), 2);
    for record in &records {
        assert_eq!(record.return_code, 0);
        assert!(record.running_time >= 0.0);
        assert_eq!(record.exception, "run-report");
        assert_eq!(record.target, "run-report");
    }
    assert!(harness.task(id).await.last_running_time > 0);
}

#[tokio::test]
async fn test_run_loop_executes_on_ticks() {
    let harness = Harness::new().await;
    let id = harness
        .seed(every_second("t1", TaskKind::CommandExec, "run-report"))
        .await;

    let mut engine = harness.engine(0, 1);
    assert_eq!(engine.start().await.unwrap(), Some(id));

    let (shutdown_tx, shutdown_rx) = broadcast::channel(1);
    let worker = tokio::spawn(async move {
        engine.run(shutdown_rx).await.unwrap();
        engine
    });

    tokio::time::sleep(Duration::from_millis(2600)).await;
    shutdown_tx.send(()).unwrap();
    let engine = worker.await.unwrap();

    assert!(engine.pool().is_empty());
    let runs = harness.logs.count_by_task(id).await.unwrap();
    assert!(runs >= 1, "expected at least one run, got {runs}");
    assert_eq!(harness.task(id).await.running_times, runs);
}

#[tokio::test]
async fn test_slow_task_does_not_replay_missed_fires() {
    let harness = Harness::new().await;
    let handler = Arc::new(SlowFirstCall::default());
    harness
        .handlers
        .register("app\\task\\Slow::run", handler.clone())
        .await
        .unwrap();
    harness
        .seed(every_second("slow", TaskKind::ClassMethod, "app\\task\\Slow::run"))
        .await;

    let mut engine = harness.engine(0, 1);
    engine.start().await.unwrap();

    let (shutdown_tx, shutdown_rx) = broadcast::channel(1);
    let worker = tokio::spawn(async move {
        engine.run(shutdown_rx).await.unwrap();
    });

    tokio::time::sleep(Duration::from_millis(5000)).await;
    shutdown_tx.send(()).unwrap();
    worker.await.unwrap();

    let started = handler.started.lock().unwrap().clone();
    assert!(started.len() >= 2, "expected the slow run and a follow-up");
    // 慢执行期间错过的触发只补一次，之后按规则间隔执行
    for pair in started.windows(2).skip(1) {
        let gap = pair[1] - pair[0];
        assert!(gap >= Duration::from_millis(300), "back-to-back run after {gap:?}");
    }
}

#[tokio::test]
async fn test_singleton_runs_once_then_disables() {
    let harness = Harness::new().await;
    let id = harness
        .seed(every_second("once", TaskKind::ShellExec, "echo once").with_singleton(true))
        .await;

    let mut engine = harness.engine(0, 2);
    engine.start().await.unwrap();
    assert_eq!(harness.registry.owner(id).await.unwrap(), Some(0));

    let report = engine.execute_task(id).await.unwrap();
    assert!(report.success);

    assert!(!engine.pool().contains(id));
    let task = harness.task(id).await;
    assert_eq!(task.status, TaskStatus::Disabled);
    assert_eq!(task.running_times, 1);
    assert_eq!(harness.registry.owner(id).await.unwrap(), None);
    assert!(harness.registry.is_empty_process(0).await.unwrap());

    assert!(engine.execute_task(id).await.is_none());
    assert_eq!(harness.logs.count_by_task(id).await.unwrap(), 1);
}

#[tokio::test]
async fn test_disabled_task_is_skipped() {
    let harness = Harness::new().await;
    let id = harness.seed(every_second("t", TaskKind::ShellExec, "echo hi")).await;

    let mut engine = harness.engine(0, 1);
    engine.start().await.unwrap();

    harness
        .tasks
        .set_status(id, TaskStatus::Disabled, 1_700_000_100)
        .await
        .unwrap();

    assert!(engine.execute_task(id).await.is_none());
    assert_eq!(harness.task(id).await.running_times, 0);
    assert_eq!(harness.logs.count_by_task(id).await.unwrap(), 0);
}

#[tokio::test]
async fn test_failures_are_logged_with_return_code_one() {
    let harness = Harness::new().await;
    let shell = harness
        .seed(every_second("fails", TaskKind::ShellExec, "echo broken; exit 2").with_sort(2))
        .await;
    let class = harness
        .seed(every_second("missing", TaskKind::ClassMethod, "app\\Missing::run").with_sort(1))
        .await;

    let mut engines = harness.start_engines(2).await;

    let report = engines[0].execute_task(shell).await.unwrap();
    assert!(!report.success);
    let record = &harness.logs.find_by_task(shell).await.unwrap()[0];
    assert_eq!(record.return_code, 1);
    assert!(record.exception.contains("broken"));

    let report = engines[1].execute_task(class).await.unwrap();
    assert!(!report.success);
    let record = &harness.logs.find_by_task(class).await.unwrap()[0];
    assert_eq!(record.return_code, 1);
    assert_eq!(record.exception, TARGET_NOT_FOUND_MESSAGE);

    // 失败同样计入执行次数
    assert_eq!(harness.task(shell).await.running_times, 1);
    assert_eq!(harness.task(class).await.running_times, 1);
}

#[tokio::test]
async fn test_class_method_task_uses_registered_handler() {
    let harness = Harness::new().await;
    harness
        .handlers
        .register(
            "app\\task\\Report::daily",
            Arc::new(FnTaskHandler::new("日报", |args| {
                Ok(format!("rows={}", args.len()))
            })),
        )
        .await
        .unwrap();

    let id = harness
        .seed(
            every_second("report", TaskKind::ClassMethod, "app\\task\\Report\\daily")
                .with_parameter(r#"["2024-01-01", 10]"#),
        )
        .await;

    let mut engine = harness.engine(0, 1);
    engine.start().await.unwrap();

    let report = engine.execute_task(id).await.unwrap();
    assert!(report.success);
    assert_eq!(report.output, "rows=2");

    let record = &harness.logs.find_by_task(id).await.unwrap()[0];
    assert_eq!(record.exception, "rows=2");
    assert_eq!(record.parameter.as_deref(), Some(r#"["2024-01-01", 10]"#));
}

#[tokio::test]
async fn test_write_log_disabled() {
    let harness = Harness::new().await;
    let id = harness.seed(every_second("quiet", TaskKind::ShellExec, "echo hi")).await;

    let settings = EngineSettings {
        write_log: false,
        ..Harness::settings(1)
    };
    let mut engine = harness.engine_with(0, settings);
    engine.start().await.unwrap();

    assert!(engine.execute_task(id).await.unwrap().success);
    assert_eq!(harness.logs.count_by_task(id).await.unwrap(), 0);
    assert_eq!(harness.task(id).await.running_times, 1);
}

#[tokio::test]
async fn test_invalid_rule_is_not_started() {
    let harness = Harness::new().await;
    let id = harness
        .seed(NewTask::new("bad", TaskKind::ShellExec, "not a rule", "echo hi"))
        .await;

    let mut engine = harness.engine(0, 1);
    assert_eq!(engine.start().await.unwrap(), None);
    assert!(!engine.pool().contains(id));
    assert_eq!(harness.registry.owner(id).await.unwrap(), None);
}

#[tokio::test]
async fn test_run_stops_on_shutdown_and_can_restart() {
    let harness = Harness::new().await;
    let mut engine = harness.engine(0, 1);

    let (shutdown_tx, shutdown_rx) = broadcast::channel(1);
    shutdown_tx.send(()).unwrap();
    engine.run(shutdown_rx).await.unwrap();

    // 事件循环退出后可以再次运行
    let second_rx = shutdown_tx.subscribe();
    shutdown_tx.send(()).unwrap();
    engine.run(second_rx).await.unwrap();
}
