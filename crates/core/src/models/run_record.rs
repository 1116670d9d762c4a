use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// 单次执行尝试的结果分类
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum RunStatus {
    Success,
    Error,
    Skipped,
}

impl RunStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            RunStatus::Success => "success",
            RunStatus::Error => "error",
            RunStatus::Skipped => "skipped",
        }
    }

    /// success 和 skipped 都表示该 runKey 已经被满足
    pub fn is_satisfied(&self) -> bool {
        matches!(self, RunStatus::Success | RunStatus::Skipped)
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum RunSource {
    Scheduler,
    Trigger,
}

/// 运行日志中的一行，追加后不再修改
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct RunRecord {
    pub ts: DateTime<Utc>,
    pub schedule_id: String,
    pub mission_id: String,
    pub tenant_id: String,
    pub source: RunSource,
    pub status: RunStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub run_key: String,
    pub attempt: u32,
    #[serde(default)]
    pub duration_ms: u64,
    #[serde(default)]
    pub outputs_ok: u32,
    #[serde(default)]
    pub outputs_failed: u32,
}

/// 某个 runKey 在持久化日志中的汇总视图
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct RunKeyHistory {
    pub attempts: u32,
    pub success_count: u32,
    pub error_count: u32,
    pub skipped_count: u32,
    pub latest_ts: Option<DateTime<Utc>>,
    pub latest_status: Option<RunStatus>,
}

impl RunKeyHistory {
    /// 按时间顺序从日志记录折叠出汇总
    pub fn from_records<'a>(run_key: &str, records: impl IntoIterator<Item = &'a RunRecord>) -> Self {
        let mut history = RunKeyHistory::default();
        for record in records.into_iter().filter(|r| r.run_key == run_key) {
            history.attempts += 1;
            match record.status {
                RunStatus::Success => history.success_count += 1,
                RunStatus::Error => history.error_count += 1,
                RunStatus::Skipped => history.skipped_count += 1,
            }
            history.latest_ts = Some(record.ts);
            history.latest_status = Some(record.status);
        }
        history
    }

    pub fn is_empty(&self) -> bool {
        self.attempts == 0
    }
}
