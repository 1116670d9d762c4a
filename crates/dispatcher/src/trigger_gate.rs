//! 默认的触发闸门
//!
//! 支持 `daily`、`weekly`、`interval`、`once` 四种模式；
//! 时区支持 `UTC`/`Z` 以及固定偏移 `±HH:MM`。

use chrono::{DateTime, Datelike, FixedOffset, NaiveDate, NaiveTime, Offset, Utc};

use mission_core::models::{DueCheck, MissionSchedule, TriggerMode, TriggerSpec};
use mission_core::traits::TriggerGate;
use mission_core::{MissionError, MissionResult};

#[derive(Debug, Clone, Copy, Default)]
pub struct ClockTriggerGate;

impl ClockTriggerGate {
    pub fn new() -> Self {
        Self
    }
}

impl TriggerGate for ClockTriggerGate {
    fn is_due(&self, schedule: &MissionSchedule, now: DateTime<Utc>) -> MissionResult<DueCheck> {
        let trigger = &schedule.trigger;
        let offset = parse_timezone(&trigger.timezone)?;
        let local = now.with_timezone(&offset);
        let today = local.date_naive();

        let (due, day) = match trigger.mode {
            TriggerMode::Interval => (interval_due(schedule, now)?, None),
            TriggerMode::Daily => (local.time() >= fire_time(trigger)?, Some(today)),
            TriggerMode::Weekly => {
                let weekday = local.weekday().num_days_from_sunday() as u8;
                let due = trigger.weekdays.contains(&weekday) && local.time() >= fire_time(trigger)?;
                (due, Some(today))
            }
            TriggerMode::Once => {
                let date = parse_date(trigger)?;
                let time = match trigger.time {
                    Some(_) => fire_time(trigger)?,
                    None => NaiveTime::MIN,
                };
                (today == date && local.time() >= time, Some(date))
            }
        };

        Ok(DueCheck {
            due,
            mode: trigger.mode,
            day_stamp: day.map(|d| d.format("%Y-%m-%d").to_string()),
            timezone: trigger.timezone.clone(),
        })
    }
}

fn interval_due(schedule: &MissionSchedule, now: DateTime<Utc>) -> MissionResult<bool> {
    let minutes = schedule
        .trigger
        .interval_minutes
        .filter(|m| *m > 0)
        .ok_or_else(|| MissionError::InvalidTrigger("interval 模式缺少间隔分钟数".to_string()))?;
    Ok(match schedule.last_run_at {
        Some(last) => now - last >= chrono::Duration::minutes(i64::from(minutes)),
        None => true,
    })
}

fn fire_time(trigger: &TriggerSpec) -> MissionResult<NaiveTime> {
    let raw = trigger
        .time
        .as_deref()
        .ok_or_else(|| MissionError::InvalidTrigger(format!("{} 模式缺少触发时间", trigger.mode.as_str())))?;
    NaiveTime::parse_from_str(raw.trim(), "%H:%M")
        .map_err(|e| MissionError::InvalidTrigger(format!("无效的触发时间 {raw}: {e}")))
}

fn parse_date(trigger: &TriggerSpec) -> MissionResult<NaiveDate> {
    let raw = trigger
        .date
        .as_deref()
        .ok_or_else(|| MissionError::InvalidTrigger("once 模式缺少日期".to_string()))?;
    NaiveDate::parse_from_str(raw.trim(), "%Y-%m-%d")
        .map_err(|e| MissionError::InvalidTrigger(format!("无效的日期 {raw}: {e}")))
}

/// 解析 `UTC`、`Z`、`+08:00`、`UTC-05:30` 等形式
pub fn parse_timezone(raw: &str) -> MissionResult<FixedOffset> {
    let trimmed = raw.trim();
    let upper = trimmed.to_ascii_uppercase();
    let rest = match upper.as_str() {
        "" | "UTC" | "Z" | "GMT" => return Ok(utc_offset()),
        other => other
            .strip_prefix("UTC")
            .or_else(|| other.strip_prefix("GMT"))
            .unwrap_or(other),
    };

    let invalid = || MissionError::InvalidTrigger(format!("不支持的时区: {raw}"));
    let (sign, body) = match rest.as_bytes().first() {
        Some(b'+') => (1, &rest[1..]),
        Some(b'-') => (-1, &rest[1..]),
        _ => return Err(invalid()),
    };
    if !body.is_ascii() {
        return Err(invalid());
    }
    let (hours, minutes) = match body.split_once(':') {
        Some((h, m)) => (h, m),
        None if body.len() == 4 => body.split_at(2),
        None => (body, "0"),
    };
    let is_number = |part: &str| !part.is_empty() && part.bytes().all(|b| b.is_ascii_digit());
    if !is_number(hours) || !is_number(minutes) {
        return Err(invalid());
    }
    let hours: i32 = hours.parse().map_err(|_| invalid())?;
    let minutes: i32 = minutes.parse().map_err(|_| invalid())?;
    if hours > 14 || minutes > 59 {
        return Err(invalid());
    }
    FixedOffset::east_opt(sign * (hours * 3600 + minutes * 60)).ok_or_else(invalid)
}

fn utc_offset() -> FixedOffset {
    Utc.fix()
}
