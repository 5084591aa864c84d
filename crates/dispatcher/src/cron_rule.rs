use chrono::{DateTime, TimeZone};
use cron::Schedule;
use std::str::FromStr;

use crontab_core::{SchedulerError, SchedulerResult};

/// 任务执行规则
///
/// 支持crontab风格的5段表达式（分 时 日 月 周）和带秒的6段表达式，
/// 星期字段沿用crontab约定：0和7都表示周日。
#[derive(Debug, Clone)]
pub struct CronRule {
    expression: String,
    normalized: String,
    schedule: Schedule,
}

impl CronRule {
    pub fn parse(expression: &str) -> SchedulerResult<Self> {
        let normalized = Self::normalize(expression)?;
        let schedule = Schedule::from_str(&normalized).map_err(|e| SchedulerError::InvalidCron {
            expr: expression.to_string(),
            message: e.to_string(),
        })?;

        Ok(Self {
            expression: expression.to_string(),
            normalized,
            schedule,
        })
    }

    pub fn validate(expression: &str) -> SchedulerResult<()> {
        Self::parse(expression).map(|_| ())
    }

    /// 转换为 `cron` 库使用的格式：补齐秒字段，星期改为 1(周日)-7(周六)
    pub fn normalize(expression: &str) -> SchedulerResult<String> {
        let invalid = |message: String| SchedulerError::InvalidCron {
            expr: expression.to_string(),
            message,
        };

        let mut fields: Vec<String> = expression.split_whitespace().map(String::from).collect();
        match fields.len() {
            5 => fields.insert(0, "0".to_string()),
            6 | 7 => {}
            n => return Err(invalid(format!("字段数量必须为5或6，实际为{n}"))),
        }

        fields[5] = shift_day_of_week(&fields[5]).map_err(invalid)?;
        Ok(fields.join(" "))
    }

    pub fn expression(&self) -> &str {
        &self.expression
    }

    pub fn normalized(&self) -> &str {
        &self.normalized
    }

    /// 严格晚于 `from` 的下一个触发时刻
    pub fn next_after<Tz: TimeZone>(&self, from: &DateTime<Tz>) -> Option<DateTime<Tz>> {
        self.schedule.after(from).next()
    }

    pub fn upcoming<Tz: TimeZone>(&self, from: &DateTime<Tz>, count: usize) -> Vec<DateTime<Tz>> {
        self.schedule.after(from).take(count).collect()
    }
}

fn shift_day(value: &str) -> Result<String, String> {
    match value.parse::<u32>() {
        Ok(day @ 0..=6) => Ok((day + 1).to_string()),
        Ok(7) => Ok("1".to_string()),
        Ok(day) => Err(format!("星期取值超出范围: {day}")),
        // SUN-SAT 等名称原样保留
        Err(_) => Ok(value.to_string()),
    }
}

fn shift_day_of_week(field: &str) -> Result<String, String> {
    let mut items = Vec::new();

    for item in field.split(',') {
        let (range, step) = match item.split_once('/') {
            Some((range, step)) => (range, Some(step)),
            None => (item, None),
        };

        let shifted = match range.split_once('-') {
            _ if range == "*" || range == "?" => range.to_string(),
            Some((start, end)) => {
                let start = shift_day(start)?;
                if end == "7" {
                    if start == "1" {
                        "1-7".to_string()
                    } else {
                        // 如 5-7（周五到周日）需要拆成 6-7,1
                        if step.is_some() {
                            return Err(format!("不支持带步长的跨周日范围: {item}"));
                        }
                        items.push(format!("{start}-7"));
                        items.push("1".to_string());
                        continue;
                    }
                } else {
                    format!("{start}-{}", shift_day(end)?)
                }
            }
            None => shift_day(range)?,
        };

        items.push(match step {
            Some(step) => format!("{shifted}/{step}"),
            None => shifted,
        });
    }

    Ok(items.join(","))
}
