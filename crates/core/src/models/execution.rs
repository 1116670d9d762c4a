use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::run_record::{RunSource, RunStatus};
use super::schedule::TriggerMode;

/// 传给执行引擎的上下文
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionContext {
    pub schedule_id: String,
    pub tenant_id: String,
    pub run_key: String,
    pub attempt: u32,
    pub mode: TriggerMode,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub day_stamp: Option<String>,
    pub timezone: String,
    pub source: RunSource,
    pub scheduled_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct OutputResult {
    #[serde(default)]
    pub channel: String,
    pub ok: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// 执行引擎返回的结果
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionOutcome {
    pub ok: bool,
    #[serde(default)]
    pub skipped: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    #[serde(default)]
    pub outputs: Vec<OutputResult>,
    #[serde(default)]
    pub traces: Vec<Value>,
}

impl ExecutionOutcome {
    pub fn success() -> Self {
        Self {
            ok: true,
            ..Self::default()
        }
    }

    pub fn failure(reason: impl Into<String>) -> Self {
        Self {
            ok: false,
            reason: Some(reason.into()),
            ..Self::default()
        }
    }

    pub fn skipped(reason: impl Into<String>) -> Self {
        Self {
            ok: true,
            skipped: true,
            reason: Some(reason.into()),
            ..Self::default()
        }
    }

    pub fn status(&self) -> RunStatus {
        if self.skipped {
            RunStatus::Skipped
        } else if self.ok {
            RunStatus::Success
        } else {
            RunStatus::Error
        }
    }

    pub fn output_counts(&self) -> (u32, u32) {
        let ok = self.outputs.iter().filter(|o| o.ok).count() as u32;
        (ok, self.outputs.len() as u32 - ok)
    }
}

/// 死信记录：耗尽重试预算的运行
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct DeadLetterRecord {
    pub ts: DateTime<Utc>,
    pub schedule_id: String,
    pub mission_id: String,
    pub tenant_id: String,
    pub run_key: String,
    pub attempt: u32,
    pub reason: String,
    pub outputs_ok: u32,
    pub outputs_failed: u32,
    #[serde(default)]
    pub metadata: Value,
}
