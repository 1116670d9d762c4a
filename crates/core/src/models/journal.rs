use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::diff::{DiffIssue, DiffOperation};

/// 操作日志条目：每次 diff 应用调用（无论成功与否）一行
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct JournalEntry {
    pub ts: DateTime<Utc>,
    pub tenant_id: String,
    pub mission_id: String,
    pub actor: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expected_version: Option<u64>,
    pub previous_version: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub next_version: Option<u64>,
    pub ok: bool,
    pub operation_count: usize,
    pub issue_count: usize,
    pub operations: Vec<DiffOperation>,
    pub issues: Vec<DiffIssue>,
}
