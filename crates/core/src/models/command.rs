use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;

use super::{NewTask, TaskPatch};
use crate::{SchedulerError, SchedulerResult};

/// 运维命令方法
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CommandMethod {
    #[serde(rename = "crontabCreate")]
    CrontabCreate,
    #[serde(rename = "crontabUpdate")]
    CrontabUpdate,
    #[serde(rename = "crontabDelete")]
    CrontabDelete,
    #[serde(rename = "crontabReload")]
    CrontabReload,
}

impl CommandMethod {
    pub fn as_str(self) -> &'static str {
        match self {
            CommandMethod::CrontabCreate => "crontabCreate",
            CommandMethod::CrontabUpdate => "crontabUpdate",
            CommandMethod::CrontabDelete => "crontabDelete",
            CommandMethod::CrontabReload => "crontabReload",
        }
    }

    /// 处理该命令时使用的锁名
    pub fn lock_name(self) -> &'static str {
        match self {
            CommandMethod::CrontabCreate => "create",
            CommandMethod::CrontabUpdate => "update",
            CommandMethod::CrontabDelete => "delete",
            CommandMethod::CrontabReload => "reload",
        }
    }
}

impl fmt::Display for CommandMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 线上传输的命令：`{"method": "...", "args": {...}}`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Command {
    pub method: CommandMethod,
    #[serde(default = "empty_args")]
    pub args: Value,
}

fn empty_args() -> Value {
    Value::Object(Default::default())
}

#[derive(Deserialize)]
struct IdArgs {
    #[serde(deserialize_with = "super::lenient::int")]
    id: i64,
}

/// 解析后的命令
#[derive(Debug, Clone, PartialEq)]
pub enum CommandRequest {
    Create(NewTask),
    Update(TaskPatch),
    Delete { id: i64 },
    Reload { id: i64 },
}

impl CommandRequest {
    pub fn method(&self) -> CommandMethod {
        match self {
            CommandRequest::Create(_) => CommandMethod::CrontabCreate,
            CommandRequest::Update(_) => CommandMethod::CrontabUpdate,
            CommandRequest::Delete { .. } => CommandMethod::CrontabDelete,
            CommandRequest::Reload { .. } => CommandMethod::CrontabReload,
        }
    }

    pub fn task_id(&self) -> Option<i64> {
        match self {
            CommandRequest::Create(_) => None,
            CommandRequest::Update(patch) => Some(patch.id),
            CommandRequest::Delete { id } | CommandRequest::Reload { id } => Some(*id),
        }
    }
}

impl Command {
    pub fn new(method: CommandMethod, args: Value) -> Self {
        Self { method, args }
    }

    pub fn create(task: &NewTask) -> SchedulerResult<Self> {
        Ok(Self::new(
            CommandMethod::CrontabCreate,
            serde_json::to_value(task)?,
        ))
    }

    pub fn update(patch: &TaskPatch) -> SchedulerResult<Self> {
        Ok(Self::new(
            CommandMethod::CrontabUpdate,
            serde_json::to_value(patch)?,
        ))
    }

    pub fn delete(id: i64) -> Self {
        Self::new(CommandMethod::CrontabDelete, serde_json::json!({ "id": id }))
    }

    pub fn reload(id: i64) -> Self {
        Self::new(CommandMethod::CrontabReload, serde_json::json!({ "id": id }))
    }

    /// 从命令槽中的原始文本解析命令
    pub fn decode(raw: &str) -> SchedulerResult<Self> {
        serde_json::from_str(raw.trim())
            .map_err(|e| SchedulerError::command_decode(format!("{e}: {raw}")))
    }

    /// 编码为单行JSON（不含换行）
    pub fn encode(&self) -> SchedulerResult<String> {
        Ok(serde_json::to_string(self)?)
    }

    /// 按方法解析参数
    pub fn into_request(self) -> SchedulerResult<CommandRequest> {
        let method = self.method;
        let decode_err =
            |e: serde_json::Error| SchedulerError::command_decode(format!("{method} 参数无效: {e}"));

        Ok(match method {
            CommandMethod::CrontabCreate => {
                CommandRequest::Create(serde_json::from_value(self.args).map_err(decode_err)?)
            }
            CommandMethod::CrontabUpdate => {
                CommandRequest::Update(serde_json::from_value(self.args).map_err(decode_err)?)
            }
            CommandMethod::CrontabDelete => {
                let IdArgs { id } = serde_json::from_value(self.args).map_err(decode_err)?;
                CommandRequest::Delete { id }
            }
            CommandMethod::CrontabReload => {
                let IdArgs { id } = serde_json::from_value(self.args).map_err(decode_err)?;
                CommandRequest::Reload { id }
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{TaskKind, TaskStatus};

    #[test]
    fn test_decode_update() {
        let command =
            Command::decode(r#"{"method":"crontabUpdate","args":{"id":5,"status":0}}"#).unwrap();
        assert_eq!(command.method, CommandMethod::CrontabUpdate);

        match command.into_request().unwrap() {
            CommandRequest::Update(patch) => {
                assert_eq!(patch.id, 5);
                assert_eq!(patch.status, Some(TaskStatus::Disabled));
            }
            other => panic!("unexpected request: {other:?}"),
        }
    }

    #[test]
    fn test_decode_unknown_method() {
        let result = Command::decode(r#"{"method":"crontabPause","args":{"id":1}}"#);
        assert!(matches!(result, Err(SchedulerError::CommandDecode(_))));
    }

    #[test]
    fn test_decode_garbage() {
        assert!(Command::decode("not json").is_err());
    }

    #[test]
    fn test_delete_requires_id() {
        let command = Command::new(CommandMethod::CrontabDelete, serde_json::json!({}));
        assert!(command.into_request().is_err());
    }

    #[test]
    fn test_create_encode_decode() {
        let task = NewTask::new("echo", TaskKind::ShellExec, "* * * * * *", "echo hi");
        let line = Command::create(&task).unwrap().encode().unwrap();
        assert!(!line.contains('\n'));

        let request = Command::decode(&line).unwrap().into_request().unwrap();
        assert_eq!(request, CommandRequest::Create(task));
        assert_eq!(request.method().lock_name(), "create");
    }

    #[test]
    fn test_reload_with_string_id() {
        let request = Command::decode(r#"{"method":"crontabReload","args":{"id":"7"}}"#)
            .unwrap()
            .into_request()
            .unwrap();
        assert_eq!(request, CommandRequest::Reload { id: 7 });
        assert_eq!(request.task_id(), Some(7));
    }
}
