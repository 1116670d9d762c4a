use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::run_record::RunStatus;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum TriggerMode {
    Daily,
    Weekly,
    Interval,
    Once,
}

impl TriggerMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            TriggerMode::Daily => "daily",
            TriggerMode::Weekly => "weekly",
            TriggerMode::Interval => "interval",
            TriggerMode::Once => "once",
        }
    }

    /// 除 interval 以外的模式都按本地日历日归属一次运行
    pub fn is_day_scoped(&self) -> bool {
        !matches!(self, TriggerMode::Interval)
    }
}

impl std::str::FromStr for TriggerMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "daily" => Ok(TriggerMode::Daily),
            "weekly" => Ok(TriggerMode::Weekly),
            "interval" => Ok(TriggerMode::Interval),
            "once" => Ok(TriggerMode::Once),
            other => Err(format!("未知的触发模式: {other}")),
        }
    }
}

/// 调度触发配置
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct TriggerSpec {
    pub mode: TriggerMode,
    /// 本地时间 `HH:MM`，interval 模式忽略
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub time: Option<String>,
    #[serde(default = "default_timezone")]
    pub timezone: String,
    /// weekly 模式下的星期（0 = 周日）
    #[serde(default)]
    pub weekdays: Vec<u8>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub interval_minutes: Option<u32>,
    /// once 模式下的本地日期 `YYYY-MM-DD`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub date: Option<String>,
}

fn default_timezone() -> String {
    "UTC".to_string()
}

impl TriggerSpec {
    pub fn daily(time: &str) -> Self {
        Self {
            mode: TriggerMode::Daily,
            time: Some(time.to_string()),
            timezone: default_timezone(),
            weekdays: Vec::new(),
            interval_minutes: None,
            date: None,
        }
    }

    pub fn interval(minutes: u32) -> Self {
        Self {
            mode: TriggerMode::Interval,
            time: None,
            timezone: default_timezone(),
            weekdays: Vec::new(),
            interval_minutes: Some(minutes),
            date: None,
        }
    }
}

/// 任务的调度记录
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct MissionSchedule {
    pub id: String,
    pub user_id: String,
    pub mission_id: String,
    pub enabled: bool,
    pub trigger: TriggerSpec,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_sent_local_date: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_run_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_run_status: Option<RunStatus>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub disabled_reason: Option<String>,
    #[serde(default)]
    pub run_count: u64,
    #[serde(default)]
    pub success_count: u64,
    #[serde(default)]
    pub failure_count: u64,
    #[serde(default)]
    pub version: u64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl MissionSchedule {
    pub fn new(
        id: impl Into<String>,
        user_id: impl Into<String>,
        mission_id: impl Into<String>,
        trigger: TriggerSpec,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id: id.into(),
            user_id: user_id.into(),
            mission_id: mission_id.into(),
            enabled: true,
            trigger,
            last_sent_local_date: None,
            last_run_at: None,
            last_run_status: None,
            disabled_reason: None,
            run_count: 0,
            success_count: 0,
            failure_count: 0,
            version: 1,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn bump_version(&mut self, now: DateTime<Utc>) {
        self.version = (self.version + 1).max(1);
        self.updated_at = now;
    }
}

/// 触发闸门的判定结果
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DueCheck {
    pub due: bool,
    pub mode: TriggerMode,
    pub day_stamp: Option<String>,
    pub timezone: String,
}

impl DueCheck {
    pub fn not_due(mode: TriggerMode, timezone: impl Into<String>) -> Self {
        Self {
            due: false,
            mode,
            day_stamp: None,
            timezone: timezone.into(),
        }
    }
}
