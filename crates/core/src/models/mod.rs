pub mod command;
pub mod task;
pub mod task_log;

pub use command::{Command, CommandMethod, CommandRequest};
pub use task::{NewTask, TaskDefinition, TaskKind, TaskPatch, TaskStatus};
pub use task_log::{NewExecutionRecord, TaskExecutionRecord};

/// 命令参数里的整数字段既可能是数字也可能是字符串（如 `"id": "5"`）
pub(crate) mod lenient {
    use serde::{Deserialize, Deserializer};

    #[derive(Deserialize)]
    #[serde(untagged)]
    enum IntOrString {
        Int(i64),
        Text(String),
    }

    impl IntOrString {
        fn into_i64<E: serde::de::Error>(self) -> Result<i64, E> {
            match self {
                IntOrString::Int(v) => Ok(v),
                IntOrString::Text(s) => s
                    .trim()
                    .parse()
                    .map_err(|_| E::custom(format!("无效的整数: {s}"))),
            }
        }
    }

    pub fn int<'de, D: Deserializer<'de>>(deserializer: D) -> Result<i64, D::Error> {
        IntOrString::deserialize(deserializer)?.into_i64()
    }

    pub fn opt_int<'de, D: Deserializer<'de>>(
        deserializer: D,
    ) -> Result<Option<i64>, D::Error> {
        Option::<IntOrString>::deserialize(deserializer)?
            .map(IntOrString::into_i64)
            .transpose()
    }

    /// 参数字段可以是JSON文本，也可以是任意JSON值，统一存为文本
    pub fn opt_json_text<'de, D: Deserializer<'de>>(
        deserializer: D,
    ) -> Result<Option<String>, D::Error> {
        let value = Option::<serde_json::Value>::deserialize(deserializer)?;
        Ok(match value {
            None | Some(serde_json::Value::Null) => None,
            Some(serde_json::Value::String(s)) => Some(s),
            Some(other) => Some(other.to_string()),
        })
    }

    /// 布尔字段兼容 `true`/`false`、`0`/`1` 与 `"0"`/`"1"`
    pub fn opt_flag<'de, D: Deserializer<'de>>(
        deserializer: D,
    ) -> Result<Option<bool>, D::Error> {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum Flag {
            Bool(bool),
            Int(i64),
            Text(String),
        }

        Ok(match Option::<Flag>::deserialize(deserializer)? {
            None => None,
            Some(Flag::Bool(b)) => Some(b),
            Some(Flag::Int(i)) => Some(i != 0),
            Some(Flag::Text(s)) => match s.trim() {
                "1" | "true" => Some(true),
                "0" | "false" | "" => Some(false),
                other => {
                    return Err(serde::de::Error::custom(format!("无效的布尔值: {other}")))
                }
            },
        })
    }
}
