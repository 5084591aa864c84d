//! 可调用目标的扩展点
//!
//! `ClassMethod` 类型的任务通过 `Namespace\Class::method` 形式的键在注册表中查找
//! [`TaskHandler`]；`EvalExpr` 类型的任务交给嵌入方提供的 [`ExpressionEvaluator`]。

use async_trait::async_trait;
use serde_json::Value;

use crate::SchedulerResult;

#[async_trait]
pub trait TaskHandler: Send + Sync {
    /// 按位置参数调用，返回值写入执行日志
    async fn invoke(&self, args: Vec<Value>) -> SchedulerResult<String>;

    fn description(&self) -> &str {
        ""
    }
}

#[async_trait]
pub trait ExpressionEvaluator: Send + Sync {
    async fn evaluate(&self, expression: &str, parameter: Option<&str>)
        -> SchedulerResult<String>;
}

/// 用闭包实现的处理器
pub struct FnTaskHandler<F> {
    description: String,
    func: F,
}

impl<F> FnTaskHandler<F>
where
    F: Fn(Vec<Value>) -> SchedulerResult<String> + Send + Sync,
{
    pub fn new(description: impl Into<String>, func: F) -> Self {
        Self {
            description: description.into(),
            func,
        }
    }
}

#[async_trait]
impl<F> TaskHandler for FnTaskHandler<F>
where
    F: Fn(Vec<Value>) -> SchedulerResult<String> + Send + Sync,
{
    async fn invoke(&self, args: Vec<Value>) -> SchedulerResult<String> {
        (self.func)(args)
    }

    fn description(&self) -> &str {
        &self.description
    }
}
