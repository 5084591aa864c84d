use std::collections::HashMap;
use std::panic::AssertUnwindSafe;
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use crontab_core::{
    config::WorkerConfig, ExpressionEvaluator, SchedulerError, SchedulerResult, TaskDefinition,
    TaskKind,
};
use futures::FutureExt;
use serde_json::Value;
use tokio::process::Command;
use tracing::{debug, error, info};

use crate::handler_registry::HandlerRegistry;

/// 某一类任务目标的执行器
///
/// 成功时返回捕获的输出，失败时返回的错误文本会写入执行日志。
#[async_trait]
pub trait TaskExecutor: Send + Sync {
    async fn execute(&self, task: &TaskDefinition) -> SchedulerResult<String>;

    fn name(&self) -> &str;
}

/// Shell任务执行器
///
/// `CommandExec` 与 `ShellExec` 共用，区别只在于前者会拼接命令前缀。
pub struct ShellExecutor {
    wrapper: Option<String>,
}

impl ShellExecutor {
    /// 直接执行目标命令
    pub fn new() -> Self {
        Self { wrapper: None }
    }

    /// 目标命令前拼接 `wrapper`，目标中已包含前缀时不重复拼接
    pub fn with_wrapper(wrapper: impl Into<String>) -> Self {
        let wrapper = wrapper.into().trim().to_string();
        Self {
            wrapper: (!wrapper.is_empty()).then_some(wrapper),
        }
    }

    pub fn command_line(&self, target: &str) -> String {
        let target = target.trim();
        match &self.wrapper {
            Some(wrapper) if !target.contains(wrapper.as_str()) => format!("{wrapper} {target}"),
            _ => target.to_string(),
        }
    }
}

impl Default for ShellExecutor {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(windows)]
fn shell_command(line: &str) -> Command {
    let mut cmd = Command::new("cmd");
    cmd.arg("/C").arg(line);
    cmd
}

#[cfg(not(windows))]
fn shell_command(line: &str) -> Command {
    let mut cmd = Command::new("sh");
    cmd.arg("-c").arg(line);
    cmd
}

#[async_trait]
impl TaskExecutor for ShellExecutor {
    async fn execute(&self, task: &TaskDefinition) -> SchedulerResult<String> {
        let command_line = self.command_line(&task.target);
        if command_line.is_empty() {
            return Err(SchedulerError::task_execution("命令为空"));
        }

        debug!("执行Shell任务: task_id={}, command={}", task.id, command_line);

        let mut cmd = shell_command(&command_line);
        cmd.stdin(Stdio::null());
        cmd.stdout(Stdio::piped());
        cmd.stderr(Stdio::piped());
        cmd.kill_on_drop(true);

        let output = cmd
            .output()
            .await
            .map_err(|e| SchedulerError::TaskExecution(format!("启动Shell命令失败: {e}")))?;

        let stdout = String::from_utf8_lossy(&output.stdout);
        let stderr = String::from_utf8_lossy(&output.stderr);

        let mut captured = stdout.trim_end().to_string();
        if !stderr.trim().is_empty() {
            if !captured.is_empty() {
                captured.push('\n');
            }
            captured.push_str(stderr.trim_end());
        }

        if output.status.success() {
            Ok(captured)
        } else {
            let exit_code = output.status.code();
            let message = if captured.is_empty() {
                format!("命令执行失败，退出码: {exit_code:?}")
            } else {
                format!("命令执行失败，退出码: {exit_code:?}\n{captured}")
            };
            Err(SchedulerError::TaskExecution(message))
        }
    }

    fn name(&self) -> &str {
        "shell"
    }
}

/// HTTP任务执行器，GET目标地址，状态码200视为成功
pub struct HttpExecutor {
    client: reqwest::Client,
    timeout: Duration,
}

impl HttpExecutor {
    pub fn new(timeout: Duration) -> Self {
        Self {
            client: reqwest::Client::new(),
            timeout,
        }
    }
}

impl Default for HttpExecutor {
    fn default() -> Self {
        Self::new(Duration::from_secs(30))
    }
}

#[async_trait]
impl TaskExecutor for HttpExecutor {
    async fn execute(&self, task: &TaskDefinition) -> SchedulerResult<String> {
        let url = task.target.trim();
        debug!("执行HTTP任务: task_id={}, url={}", task.id, url);

        let response = self
            .client
            .get(url)
            .timeout(self.timeout)
            .send()
            .await
            .map_err(|e| SchedulerError::Network(format!("请求 {url} 失败: {e}")))?;

        let status = response.status();
        if status == reqwest::StatusCode::OK {
            Ok(String::new())
        } else {
            Err(SchedulerError::TaskExecution(format!(
                "HTTP状态码: {}",
                status.as_u16()
            )))
        }
    }

    fn name(&self) -> &str {
        "http"
    }
}

/// 把任务参数解析为位置参数
///
/// 参数为JSON数组时按元素展开；`null`、空对象或空文本视为无参数；其他值作为唯一参数。
pub fn positional_args(parameter: Option<&str>) -> SchedulerResult<Vec<Value>> {
    let Some(raw) = parameter.map(str::trim).filter(|raw| !raw.is_empty()) else {
        return Ok(Vec::new());
    };

    let value: Value = serde_json::from_str(raw)
        .map_err(|e| SchedulerError::TaskExecution(format!("参数不是有效的JSON: {e}")))?;

    Ok(match value {
        Value::Null => Vec::new(),
        Value::Array(items) => items,
        Value::Object(map) if map.is_empty() => Vec::new(),
        other => vec![other],
    })
}

/// 类方法任务执行器，在 [`HandlerRegistry`] 中查找处理器
pub struct ClassMethodExecutor {
    handlers: HandlerRegistry,
}

impl ClassMethodExecutor {
    pub fn new(handlers: HandlerRegistry) -> Self {
        Self { handlers }
    }
}

#[async_trait]
impl TaskExecutor for ClassMethodExecutor {
    async fn execute(&self, task: &TaskDefinition) -> SchedulerResult<String> {
        let handler = self
            .handlers
            .get(&task.target)
            .await
            .ok_or_else(SchedulerError::target_not_found)?;
        let args = positional_args(task.parameter.as_deref())?;
        handler.invoke(args).await
    }

    fn name(&self) -> &str {
        "class"
    }
}

/// 表达式任务执行器，需要显式开启并提供求值器
pub struct EvalExecutor {
    evaluator: Option<Arc<dyn ExpressionEvaluator>>,
    enabled: bool,
}

impl EvalExecutor {
    pub fn new(evaluator: Option<Arc<dyn ExpressionEvaluator>>, enabled: bool) -> Self {
        Self { evaluator, enabled }
    }
}

#[async_trait]
impl TaskExecutor for EvalExecutor {
    async fn execute(&self, task: &TaskDefinition) -> SchedulerResult<String> {
        if !self.enabled {
            return Err(SchedulerError::task_execution("表达式任务未启用"));
        }
        let evaluator = self
            .evaluator
            .as_ref()
            .ok_or_else(|| SchedulerError::task_execution("未提供表达式求值器"))?;
        evaluator
            .evaluate(&task.target, task.parameter.as_deref())
            .await
    }

    fn name(&self) -> &str {
        "eval"
    }
}

/// 一次执行的结果
#[derive(Debug, Clone, PartialEq)]
pub struct ExecutionReport {
    pub success: bool,
    /// 成功时为捕获的输出，失败时为错误信息
    pub output: String,
}

impl ExecutionReport {
    pub fn succeeded(output: impl Into<String>) -> Self {
        Self {
            success: true,
            output: output.into(),
        }
    }

    pub fn failed(message: impl Into<String>) -> Self {
        Self {
            success: false,
            output: message.into(),
        }
    }

    /// 执行日志中的返回码：0 成功，1 失败
    pub fn return_code(&self) -> i32 {
        if self.success {
            0
        } else {
            1
        }
    }
}

/// 按任务类型分派到对应执行器
pub struct TaskRunner {
    executors: HashMap<TaskKind, Arc<dyn TaskExecutor>>,
}

impl TaskRunner {
    pub fn new(
        config: &WorkerConfig,
        handlers: HandlerRegistry,
        evaluator: Option<Arc<dyn ExpressionEvaluator>>,
    ) -> Self {
        let mut executors: HashMap<TaskKind, Arc<dyn TaskExecutor>> = HashMap::new();
        executors.insert(
            TaskKind::CommandExec,
            Arc::new(ShellExecutor::with_wrapper(config.command_wrapper.clone())),
        );
        executors.insert(
            TaskKind::ClassMethod,
            Arc::new(ClassMethodExecutor::new(handlers)),
        );
        executors.insert(
            TaskKind::UrlFetch,
            Arc::new(HttpExecutor::new(config.http_timeout())),
        );
        executors.insert(
            TaskKind::EvalExpr,
            Arc::new(EvalExecutor::new(evaluator, config.enable_eval)),
        );
        executors.insert(TaskKind::ShellExec, Arc::new(ShellExecutor::new()));

        info!("任务执行器初始化完成: {} 种类型", executors.len());
        Self { executors }
    }

    /// 替换某类任务的执行器
    pub fn with_executor(mut self, kind: TaskKind, executor: Arc<dyn TaskExecutor>) -> Self {
        self.executors.insert(kind, executor);
        self
    }

    pub fn executor(&self, kind: TaskKind) -> Option<&Arc<dyn TaskExecutor>> {
        self.executors.get(&kind)
    }

    /// 执行任务目标，错误和panic都转成失败结果
    pub async fn run(&self, task: &TaskDefinition) -> ExecutionReport {
        let Some(executor) = self.executors.get(&task.kind) else {
            return ExecutionReport::failed(format!("不支持的任务类型: {}", task.kind));
        };

        match AssertUnwindSafe(executor.execute(task)).catch_unwind().await {
            Ok(Ok(output)) => ExecutionReport::succeeded(output),
            Ok(Err(e)) => ExecutionReport::failed(e.to_string()),
            Err(panic) => {
                let message = panic
                    .downcast_ref::<&str>()
                    .map(|s| s.to_string())
                    .or_else(|| panic.downcast_ref::<String>().cloned())
                    .unwrap_or_else(|| "unknown panic".to_string());
                error!(
                    "执行器 {} 发生panic: task_id={}, {}",
                    executor.name(),
                    task.id,
                    message
                );
                ExecutionReport::failed(message)
            }
        }
    }
}
