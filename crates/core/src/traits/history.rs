use async_trait::async_trait;

use crate::models::{JournalEntry, RunKeyHistory, RunRecord};
use crate::MissionResult;

/// 运行历史存储
///
/// 重试次数和退避状态全部由这里的持久化日志推导，进程重启后依然成立。
#[async_trait]
pub trait RunHistoryStore: Send + Sync {
    async fn append(&self, record: &RunRecord) -> MissionResult<()>;

    async fn run_key_history(
        &self,
        tenant_id: &str,
        schedule_id: &str,
        run_key: &str,
    ) -> MissionResult<RunKeyHistory>;

    /// 最近的若干条记录，按时间正序
    async fn recent(
        &self,
        tenant_id: &str,
        schedule_id: &str,
        limit: usize,
    ) -> MissionResult<Vec<RunRecord>>;
}

/// 操作日志：每次 diff 应用一行，按租户分文件
#[async_trait]
pub trait OperationJournal: Send + Sync {
    async fn append(&self, entry: &JournalEntry) -> MissionResult<()>;

    /// 最近的若干条记录，按时间正序；`mission_id` 为空时返回该租户全部记录
    async fn entries(
        &self,
        tenant_id: &str,
        mission_id: Option<&str>,
        limit: usize,
    ) -> MissionResult<Vec<JournalEntry>>;
}
