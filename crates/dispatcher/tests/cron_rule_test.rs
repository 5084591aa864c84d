use chrono::{Datelike, TimeZone, Timelike, Utc, Weekday};
use crontab_core::SchedulerError;
use crontab_dispatcher::CronRule;

#[test]
fn test_five_field_rule_gets_seconds() {
    assert_eq!(CronRule::normalize("*/5 * * * *").unwrap(), "0 */5 * * * *");
    assert_eq!(CronRule::normalize("0 2 * * *").unwrap(), "0 0 2 * * *");
}

#[test]
fn test_six_field_rule_kept() {
    assert_eq!(CronRule::normalize("*/3 * * * * *").unwrap(), "*/3 * * * * *");
    let rule = CronRule::parse("*/3 * * * * *").unwrap();
    assert_eq!(rule.expression(), "*/3 * * * * *");
}

#[test]
fn test_invalid_rules() {
    for expr in ["", "invalid", "* * * *", "0 0 0 32 * *", "* * * * 9"] {
        let result = CronRule::parse(expr);
        assert!(
            matches!(result, Err(SchedulerError::InvalidCron { .. })),
            "{expr} should be rejected"
        );
    }
}

#[test]
fn test_every_second() {
    let rule = CronRule::parse("* * * * * *").unwrap();
    let from = Utc.with_ymd_and_hms(2024, 1, 1, 12, 0, 0).unwrap();
    let next = rule.upcoming(&from, 3);
    assert_eq!(next.len(), 3);
    assert_eq!(next[0].second(), 1);
    assert_eq!(next[2].second(), 3);
}

#[test]
fn test_next_after_is_strict() {
    let rule = CronRule::parse("0 * * * *").unwrap();
    let on_the_hour = Utc.with_ymd_and_hms(2024, 1, 1, 12, 0, 0).unwrap();
    let next = rule.next_after(&on_the_hour).unwrap();
    assert_eq!(next.hour(), 13);
    assert_eq!(next.minute(), 0);
}

#[test]
fn test_weekday_rule_uses_crontab_numbering() {
    // 2024-01-06 是周六
    let saturday = Utc.with_ymd_and_hms(2024, 1, 6, 12, 0, 0).unwrap();
    let rule = CronRule::parse("0 9 * * 1-5").unwrap();
    let next = rule.next_after(&saturday).unwrap();
    assert_eq!(next.weekday(), Weekday::Mon);
    assert_eq!(next.hour(), 9);

    let sunday_rule = CronRule::parse("30 8 * * 0").unwrap();
    let next = sunday_rule.next_after(&saturday).unwrap();
    assert_eq!(next.weekday(), Weekday::Sun);
    assert_eq!(next.minute(), 30);
}
