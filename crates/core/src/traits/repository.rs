//! 持久化层接口定义
//!
//! 任务和调度文档都只能通过带版本检查的 `save` 写入：
//! `expected_version` 为写入前存储中的版本号，不一致时返回
//! [`MissionError::VersionConflict`](crate::MissionError::VersionConflict)，
//! `None` 表示新建，存储中已存在同 id 文档时同样视为冲突。

use async_trait::async_trait;

use crate::models::{Mission, MissionSchedule};
use crate::MissionResult;

/// 任务文档仓储接口
#[async_trait]
pub trait MissionRepository: Send + Sync {
    async fn get(&self, tenant_id: &str, mission_id: &str) -> MissionResult<Option<Mission>>;

    /// 比较并交换写入
    async fn save(&self, mission: &Mission, expected_version: Option<u64>) -> MissionResult<()>;

    async fn list(&self, tenant_id: &str) -> MissionResult<Vec<Mission>>;
}

/// 调度记录仓储接口
#[async_trait]
pub trait ScheduleRepository: Send + Sync {
    /// 所有启用中的调度，顺序不做保证
    async fn list_enabled(&self) -> MissionResult<Vec<MissionSchedule>>;

    async fn get(&self, tenant_id: &str, schedule_id: &str)
        -> MissionResult<Option<MissionSchedule>>;

    async fn find_by_mission(
        &self,
        tenant_id: &str,
        mission_id: &str,
    ) -> MissionResult<Option<MissionSchedule>>;

    /// 比较并交换写入
    async fn save(
        &self,
        schedule: &MissionSchedule,
        expected_version: Option<u64>,
    ) -> MissionResult<()>;
}
