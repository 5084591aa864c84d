use serde::{Deserialize, Serialize};

/// 任务执行记录，每次调用追加一行
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskExecutionRecord {
    pub id: i64,
    pub task_id: i64,
    pub target: String,
    pub parameter: Option<String>,
    /// 捕获的输出或失败信息
    pub exception: String,
    /// 0 成功，1 失败
    pub return_code: i32,
    /// 执行耗时（秒，保留6位小数）
    pub running_time: f64,
    pub create_time: i64,
    pub update_time: i64,
}

impl TaskExecutionRecord {
    pub fn is_success(&self) -> bool {
        self.return_code == 0
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct NewExecutionRecord {
    pub task_id: i64,
    pub target: String,
    pub parameter: Option<String>,
    pub exception: String,
    pub return_code: i32,
    pub running_time: f64,
    pub create_time: i64,
}

impl NewExecutionRecord {
    /// 执行耗时统一保留6位小数
    pub fn round_running_time(seconds: f64) -> f64 {
        (seconds * 1_000_000.0).round() / 1_000_000.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_round_running_time() {
        assert_eq!(NewExecutionRecord::round_running_time(0.1234567), 0.123457);
        assert_eq!(NewExecutionRecord::round_running_time(2.0), 2.0);
    }
}
