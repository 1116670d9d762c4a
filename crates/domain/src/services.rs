//! # 领域服务
//!
//! [`MissionService`] 把纯函数的差量引擎和持久化层串起来：
//! 读取快照 → 应用操作 → 比较并交换写入 → 写操作日志 → 同步调度记录。
//! 调度器的运行记账也走同一条带版本检查的写路径。

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde_json::Value;
use tracing::{debug, info, warn};

use mission_core::models::{
    DiffOperation, JournalEntry, Mission, MissionNode, MissionSchedule, RunStatus, TriggerMode,
    TriggerSpec,
};
use mission_core::traits::{MissionRepository, OperationJournal, ScheduleRepository};
use mission_core::{Clock, MissionError, MissionResult};

use crate::diff_engine::{apply_diff, ApplyResult};
use crate::snapshot_diff::derive_operations;

/// 版本冲突时记账写入的最大尝试次数
const MAX_BOOKKEEPING_ATTEMPTS: usize = 3;

/// 触发节点被删除后调度记录上的停用原因
const TRIGGER_REMOVED: &str = "trigger_removed";

/// 一次调度运行的记账信息
#[derive(Debug, Clone, Copy)]
pub struct RunBookkeeping {
    pub status: RunStatus,
    pub at: DateTime<Utc>,
}

pub struct MissionService {
    missions: Arc<dyn MissionRepository>,
    schedules: Arc<dyn ScheduleRepository>,
    journal: Arc<dyn OperationJournal>,
    clock: Arc<dyn Clock>,
}

impl MissionService {
    pub fn new(
        missions: Arc<dyn MissionRepository>,
        schedules: Arc<dyn ScheduleRepository>,
        journal: Arc<dyn OperationJournal>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            missions,
            schedules,
            journal,
            clock,
        }
    }

    pub fn missions(&self) -> &Arc<dyn MissionRepository> {
        &self.missions
    }

    pub async fn get(&self, tenant_id: &str, mission_id: &str) -> MissionResult<Option<Mission>> {
        self.missions.get(tenant_id, mission_id).await
    }

    /// 新建任务，版本号从 1 开始
    pub async fn create(&self, mut mission: Mission) -> MissionResult<Mission> {
        let now = self.clock.now();
        mission.version = 1;
        mission.created_at = now;
        mission.updated_at = now;
        self.missions.save(&mission, None).await?;
        info!("创建任务 {} (租户 {})", mission.id, mission.user_id);

        if let Err(e) = self.sync_schedule(&mission).await {
            warn!("同步任务 {} 的调度失败: {}", mission.id, e);
        }
        Ok(mission)
    }

    /// 应用显式的操作列表
    pub async fn apply(
        &self,
        tenant_id: &str,
        mission_id: &str,
        operations: Vec<DiffOperation>,
        expected_version: Option<u64>,
        actor: &str,
    ) -> MissionResult<ApplyResult> {
        let current = self.load(tenant_id, mission_id).await?;
        self.apply_loaded(&current, operations, expected_version, actor)
            .await
    }

    /// 整文档保存：先推导成操作再走同一条校验路径
    pub async fn replace(
        &self,
        tenant_id: &str,
        mission_id: &str,
        next: &Mission,
        expected_version: Option<u64>,
        actor: &str,
    ) -> MissionResult<ApplyResult> {
        let current = self.load(tenant_id, mission_id).await?;
        let operations = derive_operations(&current, next);
        debug!(
            "整文档保存任务 {} 推导出 {} 个操作",
            mission_id,
            operations.len()
        );
        self.apply_loaded(&current, operations, expected_version, actor)
            .await
    }

    async fn apply_loaded(
        &self,
        current: &Mission,
        operations: Vec<DiffOperation>,
        expected_version: Option<u64>,
        actor: &str,
    ) -> MissionResult<ApplyResult> {
        let now = self.clock.now();
        let mut result = apply_diff(current, &operations, expected_version, now);

        if let Some(next) = result.mission.as_ref() {
            match self.missions.save(next, Some(current.version)).await {
                Ok(()) => {}
                Err(MissionError::VersionConflict { actual, .. }) => {
                    // 读取之后被其他写入抢先，按冲突返回给调用方重新读取
                    warn!(
                        "任务 {} 写入时发生版本冲突: 读取版本 {}, 存储版本 {}",
                        current.id, current.version, actual
                    );
                    result = ApplyResult::conflict(current.version, actual);
                }
                Err(e) => return Err(e),
            }
        }

        let entry = JournalEntry {
            ts: now,
            tenant_id: current.user_id.clone(),
            mission_id: current.id.clone(),
            actor: actor.to_string(),
            expected_version,
            previous_version: current.version,
            next_version: result.mission.as_ref().map(|m| m.version),
            ok: result.ok,
            operation_count: operations.len(),
            issue_count: result.issues.len(),
            operations,
            issues: result.issues.clone(),
        };
        if let Err(e) = self.journal.append(&entry).await {
            warn!("写入任务 {} 的操作日志失败: {}", current.id, e);
        }

        match result.mission.as_ref() {
            Some(next) => {
                info!(
                    event = "diff_applied",
                    mission.id = %next.id,
                    tenant.id = %next.user_id,
                    version = next.version,
                    applied = result.applied_count,
                    "任务变更已提交"
                );
                if let Err(e) = self.sync_schedule(next).await {
                    warn!("同步任务 {} 的调度失败: {}", next.id, e);
                }
            }
            None => {
                debug!(
                    "任务 {} 变更被拒绝，问题数: {}",
                    current.id,
                    result.issues.len()
                );
            }
        }

        Ok(result)
    }

    /// 调度器记账：运行次数、成功失败次数、最近运行时间和状态
    ///
    /// 与用户编辑共用比较并交换写入，冲突时重新读取后重试。
    /// 任务已不存在时返回 `Ok(None)`。
    pub async fn record_run_outcome(
        &self,
        tenant_id: &str,
        mission_id: &str,
        bookkeeping: RunBookkeeping,
    ) -> MissionResult<Option<Mission>> {
        let mut last_conflict = None;
        for _ in 0..MAX_BOOKKEEPING_ATTEMPTS {
            let Some(mut mission) = self.missions.get(tenant_id, mission_id).await? else {
                return Ok(None);
            };
            let previous = mission.version;

            mission.run_count += 1;
            match bookkeeping.status {
                RunStatus::Success => mission.success_count += 1,
                RunStatus::Error => mission.failure_count += 1,
                RunStatus::Skipped => {}
            }
            mission.last_run_at = Some(bookkeeping.at);
            mission.last_run_status = Some(bookkeeping.status);
            mission.bump_version(self.clock.now());

            match self.missions.save(&mission, Some(previous)).await {
                Ok(()) => return Ok(Some(mission)),
                Err(e) if e.is_version_conflict() => {
                    debug!("任务 {} 记账冲突，重新读取后重试", mission_id);
                    last_conflict = Some(e);
                }
                Err(e) => return Err(e),
            }
        }
        Err(last_conflict.unwrap_or_else(|| {
            MissionError::Internal(format!("任务 {mission_id} 记账失败"))
        }))
    }

    /// 根据任务的调度触发节点创建、更新或停用调度记录
    pub async fn sync_schedule(&self, mission: &Mission) -> MissionResult<Option<MissionSchedule>> {
        let now = self.clock.now();
        let existing = self
            .schedules
            .find_by_mission(&mission.user_id, &mission.id)
            .await?;

        let Some(trigger_node) = mission.schedule_trigger() else {
            return match existing {
                Some(mut schedule)
                    if schedule.enabled
                        || schedule.disabled_reason.as_deref() != Some(TRIGGER_REMOVED) =>
                {
                    let previous = schedule.version;
                    schedule.enabled = false;
                    schedule.disabled_reason = Some(TRIGGER_REMOVED.to_string());
                    schedule.bump_version(now);
                    self.schedules.save(&schedule, Some(previous)).await?;
                    info!("任务 {} 的调度触发节点已删除，停用调度 {}", mission.id, schedule.id);
                    Ok(Some(schedule))
                }
                other => Ok(other),
            };
        };

        let trigger = trigger_spec_from_node(trigger_node, mission.settings.timezone.as_deref())?;

        match existing {
            Some(mut schedule) => {
                let enabled = mission.is_active();
                if schedule.trigger == trigger && schedule.enabled == enabled {
                    return Ok(Some(schedule));
                }
                let previous = schedule.version;
                schedule.trigger = trigger;
                schedule.enabled = enabled;
                schedule.disabled_reason = if enabled {
                    None
                } else {
                    Some(format!("mission_{}", mission.status.as_str()))
                };
                schedule.bump_version(now);
                self.schedules.save(&schedule, Some(previous)).await?;
                debug!("更新调度 {} (任务 {})", schedule.id, mission.id);
                Ok(Some(schedule))
            }
            None => {
                let mut schedule = MissionSchedule::new(
                    uuid::Uuid::new_v4().to_string(),
                    mission.user_id.clone(),
                    mission.id.clone(),
                    trigger,
                    now,
                );
                schedule.enabled = mission.is_active();
                self.schedules.save(&schedule, None).await?;
                info!("为任务 {} 创建调度 {}", mission.id, schedule.id);
                Ok(Some(schedule))
            }
        }
    }

    async fn load(&self, tenant_id: &str, mission_id: &str) -> MissionResult<Mission> {
        self.missions
            .get(tenant_id, mission_id)
            .await?
            .ok_or_else(|| MissionError::MissionNotFound {
                id: mission_id.to_string(),
            })
    }
}

/// 从调度触发节点的属性解析触发配置
///
/// 识别 `triggerMode`、`triggerTime`、`triggerTimezone`、`triggerWeekdays`、
/// `triggerIntervalMinutes`、`triggerDate`；时区缺省时使用任务设置中的时区。
pub fn trigger_spec_from_node(
    node: &MissionNode,
    fallback_timezone: Option<&str>,
) -> MissionResult<TriggerSpec> {
    let mode: TriggerMode = node
        .attribute_str("triggerMode")
        .unwrap_or("daily")
        .parse()
        .map_err(MissionError::InvalidTrigger)?;

    let timezone = node
        .attribute_str("triggerTimezone")
        .or(fallback_timezone)
        .unwrap_or("UTC")
        .to_string();

    let weekdays = match node.attributes.get("triggerWeekdays") {
        Some(Value::Array(values)) => values
            .iter()
            .map(|v| {
                v.as_u64()
                    .filter(|d| *d <= 6)
                    .map(|d| d as u8)
                    .ok_or_else(|| MissionError::InvalidTrigger(format!("无效的星期值: {v}")))
            })
            .collect::<MissionResult<Vec<u8>>>()?,
        Some(other) => {
            return Err(MissionError::InvalidTrigger(format!(
                "triggerWeekdays 必须是数组: {other}"
            )))
        }
        None => Vec::new(),
    };

    let interval_minutes = node
        .attributes
        .get("triggerIntervalMinutes")
        .and_then(Value::as_u64)
        .map(|m| m.min(u32::MAX as u64) as u32);

    let trigger = TriggerSpec {
        mode,
        time: node.attribute_str("triggerTime").map(str::to_string),
        timezone,
        weekdays,
        interval_minutes,
        date: node.attribute_str("triggerDate").map(str::to_string),
    };

    match trigger.mode {
        TriggerMode::Interval if trigger.interval_minutes.unwrap_or(0) == 0 => Err(
            MissionError::InvalidTrigger("interval 模式需要 triggerIntervalMinutes".to_string()),
        ),
        TriggerMode::Daily | TriggerMode::Weekly if trigger.time.is_none() => Err(
            MissionError::InvalidTrigger(format!("{} 模式需要 triggerTime", trigger.mode.as_str())),
        ),
        TriggerMode::Weekly if trigger.weekdays.is_empty() => Err(MissionError::InvalidTrigger(
            "weekly 模式需要 triggerWeekdays".to_string(),
        )),
        TriggerMode::Once if trigger.date.is_none() => Err(MissionError::InvalidTrigger(
            "once 模式需要 triggerDate".to_string(),
        )),
        _ => Ok(trigger),
    }
}
