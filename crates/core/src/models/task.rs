use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;

use super::lenient;

/// 任务定义
///
/// 对应任务表中的一行。除 `kind`/`target`/`parameter` 外的字段对调度核心都是不透明的，
/// 只有 `rule` 会在启动调度句柄时被解析。
///
/// # 字段说明
///
/// - `kind`: 目标类型，决定 `target` 如何被执行
/// - `rule`: 5段或6段cron表达式
/// - `parameter`: 与类型相关的参数（JSON文本），可为空
/// - `singleton`: 为 `true` 时任务只执行一次，随后自动禁用
/// - `running_times` / `last_running_time`: 执行次数与最近一次执行时间（秒级时间戳）
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskDefinition {
    pub id: i64,
    pub title: String,
    #[serde(rename = "type")]
    pub kind: TaskKind,
    pub rule: String,
    pub target: String,
    pub parameter: Option<String>,
    pub singleton: bool,
    pub status: TaskStatus,
    pub sort: i64,
    pub running_times: i64,
    pub last_running_time: i64,
    pub remark: Option<String>,
    pub create_time: i64,
    pub update_time: i64,
}

impl TaskDefinition {
    pub fn is_enabled(&self) -> bool {
        self.status == TaskStatus::Enabled
    }
}

/// 任务目标类型
///
/// 数值编码与任务表 `type` 列一致。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TaskKind {
    /// 通过命令前缀执行的命令
    CommandExec,
    /// 调用已注册的 `Namespace\Class::method` 处理器
    ClassMethod,
    /// HTTP GET，状态码200视为成功
    UrlFetch,
    /// 表达式求值，默认关闭
    EvalExpr,
    /// 直接执行shell命令
    ShellExec,
}

impl TaskKind {
    pub fn code(self) -> i64 {
        match self {
            TaskKind::CommandExec => 1,
            TaskKind::ClassMethod => 2,
            TaskKind::UrlFetch => 3,
            TaskKind::EvalExpr => 4,
            TaskKind::ShellExec => 5,
        }
    }

    pub fn from_code(code: i64) -> Option<Self> {
        match code {
            1 => Some(TaskKind::CommandExec),
            2 => Some(TaskKind::ClassMethod),
            3 => Some(TaskKind::UrlFetch),
            4 => Some(TaskKind::EvalExpr),
            5 => Some(TaskKind::ShellExec),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            TaskKind::CommandExec => "command",
            TaskKind::ClassMethod => "class",
            TaskKind::UrlFetch => "url",
            TaskKind::EvalExpr => "eval",
            TaskKind::ShellExec => "shell",
        }
    }
}

impl fmt::Display for TaskKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl Serialize for TaskKind {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_i64(self.code())
    }
}

impl<'de> Deserialize<'de> for TaskKind {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let code = lenient::int(deserializer)?;
        TaskKind::from_code(code)
            .ok_or_else(|| serde::de::Error::custom(format!("未知的任务类型: {code}")))
    }
}

/// 任务状态
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum TaskStatus {
    Disabled,
    #[default]
    Enabled,
}

impl TaskStatus {
    pub fn code(self) -> i64 {
        match self {
            TaskStatus::Disabled => 0,
            TaskStatus::Enabled => 1,
        }
    }

    pub fn from_code(code: i64) -> Option<Self> {
        match code {
            0 => Some(TaskStatus::Disabled),
            1 => Some(TaskStatus::Enabled),
            _ => None,
        }
    }
}

impl Serialize for TaskStatus {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_i64(self.code())
    }
}

impl<'de> Deserialize<'de> for TaskStatus {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let code = lenient::int(deserializer)?;
        TaskStatus::from_code(code)
            .ok_or_else(|| serde::de::Error::custom(format!("未知的任务状态: {code}")))
    }
}

/// 创建任务的参数（`crontabCreate` 的 args）
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewTask {
    pub title: String,
    #[serde(rename = "type")]
    pub kind: TaskKind,
    pub rule: String,
    pub target: String,
    #[serde(default, deserialize_with = "lenient::opt_json_text")]
    pub parameter: Option<String>,
    #[serde(default, deserialize_with = "lenient::opt_flag")]
    pub singleton: Option<bool>,
    #[serde(default)]
    pub status: TaskStatus,
    #[serde(default, deserialize_with = "lenient::opt_int")]
    pub sort: Option<i64>,
    #[serde(default)]
    pub remark: Option<String>,
}

impl NewTask {
    pub fn new(
        title: impl Into<String>,
        kind: TaskKind,
        rule: impl Into<String>,
        target: impl Into<String>,
    ) -> Self {
        Self {
            title: title.into(),
            kind,
            rule: rule.into(),
            target: target.into(),
            parameter: None,
            singleton: None,
            status: TaskStatus::Enabled,
            sort: None,
            remark: None,
        }
    }

    pub fn with_parameter(mut self, parameter: impl Into<String>) -> Self {
        self.parameter = Some(parameter.into());
        self
    }

    pub fn with_singleton(mut self, singleton: bool) -> Self {
        self.singleton = Some(singleton);
        self
    }

    pub fn with_sort(mut self, sort: i64) -> Self {
        self.sort = Some(sort);
        self
    }

    pub fn with_status(mut self, status: TaskStatus) -> Self {
        self.status = status;
        self
    }

    pub fn validate(&self) -> Result<(), String> {
        if self.title.trim().is_empty() {
            return Err("任务标题不能为空".to_string());
        }
        if self.rule.trim().is_empty() {
            return Err("执行规则不能为空".to_string());
        }
        if self.target.trim().is_empty() {
            return Err("调用目标不能为空".to_string());
        }
        Ok(())
    }
}

/// 更新任务的参数（`crontabUpdate` 的 args），未给出的字段保持不变
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TaskPatch {
    #[serde(deserialize_with = "lenient::int")]
    pub id: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub kind: Option<TaskKind>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rule: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target: Option<String>,
    #[serde(
        default,
        deserialize_with = "lenient::opt_json_text",
        skip_serializing_if = "Option::is_none"
    )]
    pub parameter: Option<String>,
    #[serde(
        default,
        deserialize_with = "lenient::opt_flag",
        skip_serializing_if = "Option::is_none"
    )]
    pub singleton: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<TaskStatus>,
    #[serde(
        default,
        deserialize_with = "lenient::opt_int",
        skip_serializing_if = "Option::is_none"
    )]
    pub sort: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub remark: Option<String>,
}

impl TaskPatch {
    pub fn new(id: i64) -> Self {
        Self {
            id,
            ..Default::default()
        }
    }

    pub fn with_status(mut self, status: TaskStatus) -> Self {
        self.status = Some(status);
        self
    }

    pub fn with_rule(mut self, rule: impl Into<String>) -> Self {
        self.rule = Some(rule.into());
        self
    }

    pub fn with_title(mut self, title: impl Into<String>) -> Self {
        self.title = Some(title.into());
        self
    }

    pub fn is_empty(&self) -> bool {
        self.title.is_none()
            && self.kind.is_none()
            && self.rule.is_none()
            && self.target.is_none()
            && self.parameter.is_none()
            && self.singleton.is_none()
            && self.status.is_none()
            && self.sort.is_none()
            && self.remark.is_none()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_kind_codes() {
        for code in 1..=5 {
            let kind = TaskKind::from_code(code).unwrap();
            assert_eq!(kind.code(), code);
        }
        assert!(TaskKind::from_code(0).is_none());
        assert!(TaskKind::from_code(6).is_none());
    }

    #[test]
    fn test_new_task_from_loose_json() {
        let task: NewTask = serde_json::from_value(json!({
            "title": "备份",
            "type": "5",
            "rule": "0 */5 * * * *",
            "target": "echo hi",
            "parameter": {"a": 1},
            "singleton": "1",
            "sort": "3"
        }))
        .unwrap();

        assert_eq!(task.kind, TaskKind::ShellExec);
        assert_eq!(task.parameter.as_deref(), Some(r#"{"a":1}"#));
        assert_eq!(task.singleton, Some(true));
        assert_eq!(task.sort, Some(3));
        assert_eq!(task.status, TaskStatus::Enabled);
    }

    #[test]
    fn test_new_task_unknown_kind_rejected() {
        let result: Result<NewTask, _> = serde_json::from_value(json!({
            "title": "x", "type": 9, "rule": "* * * * * *", "target": "t"
        }));
        assert!(result.is_err());
    }

    #[test]
    fn test_new_task_validate() {
        let task = NewTask::new("", TaskKind::ShellExec, "* * * * * *", "ls");
        assert!(task.validate().is_err());
        let task = NewTask::new("ok", TaskKind::ShellExec, "* * * * * *", "ls");
        assert!(task.validate().is_ok());
    }

    #[test]
    fn test_patch_with_string_id() {
        let patch: TaskPatch =
            serde_json::from_value(json!({"id": "5", "status": 0})).unwrap();
        assert_eq!(patch.id, 5);
        assert_eq!(patch.status, Some(TaskStatus::Disabled));
        assert!(patch.rule.is_none());
        assert!(!patch.is_empty());
        assert!(TaskPatch::new(5).is_empty());
    }
}
