use std::collections::HashMap;
use std::sync::Arc;

use crontab_core::{SchedulerError, SchedulerResult, TaskHandler};
use tokio::sync::RwLock;
use tracing::debug;

/// 把任务目标规范化为 `Namespace\Class::method` 形式的键
///
/// 接受 `Namespace\Class::method` 和 `Namespace\Class\method` 两种写法，
/// 类名开头的 `\` 会被去掉。类名或方法名为空时返回 `None`。
pub fn handler_key(target: &str) -> Option<String> {
    let target = target.trim();
    let (class, method) = match target.rsplit_once("::") {
        Some(parts) => parts,
        None => target.rsplit_once('\\')?,
    };

    let class = class.trim().trim_start_matches('\\');
    let method = method.trim();
    if class.is_empty() || method.is_empty() || method.contains('\\') {
        return None;
    }

    Some(format!("{class}::{method}"))
}

/// `ClassMethod` 类型任务的处理器注册表
#[derive(Clone, Default)]
pub struct HandlerRegistry {
    handlers: Arc<RwLock<HashMap<String, Arc<dyn TaskHandler>>>>,
}

impl HandlerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// 注册处理器，同名处理器会被替换
    pub async fn register(
        &self,
        target: &str,
        handler: Arc<dyn TaskHandler>,
    ) -> SchedulerResult<()> {
        let key = handler_key(target)
            .ok_or_else(|| SchedulerError::Configuration(format!("无效的处理器名称: {target}")))?;
        debug!("注册处理器: {}", key);
        self.handlers.write().await.insert(key, handler);
        Ok(())
    }

    pub async fn get(&self, target: &str) -> Option<Arc<dyn TaskHandler>> {
        let key = handler_key(target)?;
        self.handlers.read().await.get(&key).cloned()
    }

    pub async fn contains(&self, target: &str) -> bool {
        self.get(target).await.is_some()
    }

    pub async fn unregister(&self, target: &str) -> bool {
        match handler_key(target) {
            Some(key) => self.handlers.write().await.remove(&key).is_some(),
            None => false,
        }
    }

    pub async fn list(&self) -> Vec<String> {
        let mut keys: Vec<String> = self.handlers.read().await.keys().cloned().collect();
        keys.sort();
        keys
    }

    pub async fn count(&self) -> usize {
        self.handlers.read().await.len()
    }
}
