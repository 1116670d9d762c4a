//! 调度 tick 引擎
//!
//! 每个 tick 按 id 排序遍历启用中的调度：到期判定 → 日锁 → 孤儿检查 →
//! 计算 runKey → 查询运行历史 → 配额检查 → 执行 → 记账。
//! 重试次数和退避全部由运行历史推导，不依赖内存计数器。

use std::collections::HashMap;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Instant;

use chrono::{DateTime, Duration, Utc};
use futures::FutureExt;
use metrics::{counter, histogram};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tokio::sync::broadcast;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, info_span, warn, Instrument};

use mission_core::config::SchedulerConfig;
use mission_core::models::{
    DeadLetterRecord, DueCheck, ExecutionContext, Mission, MissionSchedule, RunRecord, RunSource,
    RunStatus, TriggerMode,
};
use mission_core::traits::{
    DeadLetterSink, ExecutionEngine, RunHistoryStore, ScheduleRepository, TriggerGate,
};
use mission_core::{Clock, MissionError, MissionResult};
use mission_domain::{MissionService, RunBookkeeping};
use mission_infrastructure::StructuredLogger;

use crate::retry_policy::{RetryConfig, RunDecision};
use crate::tick_state::{SchedulerStatus, TickStart, TickState};

/// 调度记录写入遇到版本冲突时的最大尝试次数
const MAX_SCHEDULE_WRITE_ATTEMPTS: usize = 3;

const MISSION_MISSING: &str = "mission_missing";

/// 调度器的外部依赖
#[derive(Clone)]
pub struct SchedulerDeps {
    pub schedules: Arc<dyn ScheduleRepository>,
    pub missions: Arc<MissionService>,
    pub history: Arc<dyn RunHistoryStore>,
    pub engine: Arc<dyn ExecutionEngine>,
    pub gate: Arc<dyn TriggerGate>,
    pub dead_letters: Arc<dyn DeadLetterSink>,
    pub clock: Arc<dyn Clock>,
}

/// 单个调度在一次 tick 中的处理结果
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TickAction {
    NotDue,
    DayLocked,
    Disabled,
    Satisfied,
    BackingOff,
    Exhausted,
    Deferred,
    Executed,
    Failed,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScheduleOutcome {
    pub schedule_id: String,
    pub tenant_id: String,
    pub mission_id: String,
    pub action: TickAction,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub run_key: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub attempt: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<RunStatus>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
}

impl ScheduleOutcome {
    fn new(schedule: &MissionSchedule, action: TickAction) -> Self {
        Self {
            schedule_id: schedule.id.clone(),
            tenant_id: schedule.user_id.clone(),
            mission_id: schedule.mission_id.clone(),
            action,
            run_key: None,
            attempt: None,
            status: None,
            detail: None,
        }
    }

    fn with_run_key(mut self, run_key: &str) -> Self {
        self.run_key = Some(run_key.to_string());
        self
    }

    fn with_detail(mut self, detail: impl Into<String>) -> Self {
        self.detail = Some(detail.into());
        self
    }
}

/// 一次 tick 的报告
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TickReport {
    pub tick: Option<u64>,
    pub started_at: DateTime<Utc>,
    pub duration_ms: u64,
    pub skipped_overlap: bool,
    pub watchdog_reset: bool,
    pub due_count: usize,
    pub run_count: usize,
    pub deferred_count: usize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub outcomes: Vec<ScheduleOutcome>,
}

impl TickReport {
    fn overlapped(started_at: DateTime<Utc>) -> Self {
        Self {
            tick: None,
            started_at,
            duration_ms: 0,
            skipped_overlap: true,
            watchdog_reset: false,
            due_count: 0,
            run_count: 0,
            deferred_count: 0,
            error: None,
            outcomes: Vec::new(),
        }
    }

    pub fn outcome(&self, schedule_id: &str) -> Option<&ScheduleOutcome> {
        self.outcomes.iter().find(|o| o.schedule_id == schedule_id)
    }

    fn count(&self, action: TickAction) -> usize {
        self.outcomes.iter().filter(|o| o.action == action).count()
    }
}

/// 全局和单租户的每 tick 运行配额
struct RunBudget {
    max_total: usize,
    max_per_tenant: usize,
    total: usize,
    per_tenant: HashMap<String, usize>,
}

impl RunBudget {
    fn new(config: &SchedulerConfig) -> Self {
        Self {
            max_total: config.max_runs_per_tick,
            max_per_tenant: config.max_runs_per_tenant_per_tick,
            total: 0,
            per_tenant: HashMap::new(),
        }
    }

    fn try_take(&mut self, tenant_id: &str) -> Result<(), &'static str> {
        if self.total >= self.max_total {
            return Err("max_runs_per_tick");
        }
        let used = self.per_tenant.entry(tenant_id.to_string()).or_insert(0);
        if *used >= self.max_per_tenant {
            return Err("max_runs_per_tenant_per_tick");
        }
        *used += 1;
        self.total += 1;
        Ok(())
    }
}

/// 未正常结束的 tick 在析构时释放在途标记
struct InFlightGuard<'a> {
    state: &'a TickState,
    tick: u64,
}

impl Drop for InFlightGuard<'_> {
    fn drop(&mut self) {
        self.state.abandon(self.tick);
    }
}

/// 一次执行尝试的分类结果
struct AttemptResult {
    status: RunStatus,
    reason: Option<String>,
    outputs_ok: u32,
    outputs_failed: u32,
    duration_ms: u64,
}

pub struct MissionScheduler {
    config: SchedulerConfig,
    deps: SchedulerDeps,
    state: TickState,
}

impl MissionScheduler {
    pub fn new(config: SchedulerConfig, deps: SchedulerDeps) -> Self {
        let config = config.clamped();
        info!(
            "调度器配置: tick_interval={}s, max_runs_per_tick={}, max_runs_per_tenant_per_tick={}, max_retries={}",
            config.tick_interval_seconds,
            config.max_runs_per_tick,
            config.max_runs_per_tenant_per_tick,
            config.max_retries
        );
        Self {
            state: TickState::new(config.enabled),
            config,
            deps,
        }
    }

    pub fn config(&self) -> &SchedulerConfig {
        &self.config
    }

    pub fn status(&self) -> SchedulerStatus {
        self.state.snapshot()
    }

    /// 按固定间隔触发 tick，直到收到关闭信号
    ///
    /// 每个 tick 在独立任务中执行，上一个 tick 未结束时新的 tick 会被跳过。
    pub async fn run(self: Arc<Self>, mut shutdown_rx: broadcast::Receiver<()>) {
        if !self.config.enabled {
            info!("调度器已禁用，不启动调度循环");
            return;
        }

        let mut interval =
            tokio::time::interval(std::time::Duration::from_secs(self.config.tick_interval_seconds));
        interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
        self.state.set_timer_active(true);
        info!("调度循环已启动，间隔 {}s", self.config.tick_interval_seconds);

        loop {
            tokio::select! {
                _ = interval.tick() => {
                    let scheduler = Arc::clone(&self);
                    tokio::spawn(async move {
                        scheduler.tick().await;
                    });
                }
                _ = shutdown_rx.recv() => {
                    info!("收到关闭信号，停止调度循环");
                    break;
                }
            }
        }

        self.state.set_timer_active(false);
    }

    /// 执行一次完整的 tick
    pub async fn tick(&self) -> TickReport {
        let started_at = self.deps.clock.now();
        let watchdog = Duration::seconds(self.config.watchdog_timeout_seconds as i64);

        let (tick, watchdog_reset) = match self.state.try_begin(started_at, watchdog) {
            TickStart::Started { tick } => (tick, false),
            TickStart::Recovered { tick, stuck_tick } => {
                warn!(
                    "tick {} 超过看门狗超时 {}s 仍未结束，视为崩溃并清除",
                    stuck_tick, self.config.watchdog_timeout_seconds
                );
                (tick, true)
            }
            TickStart::Overlapped => {
                counter!("mission_scheduler_overlap_skips_total").increment(1);
                debug!("上一个 tick 仍在执行，跳过本次 tick");
                return TickReport::overlapped(started_at);
            }
        };
        let _guard = InFlightGuard {
            state: &self.state,
            tick,
        };
        counter!("mission_scheduler_ticks_total").increment(1);

        let timer = Instant::now();
        let result = self
            .process(started_at)
            .instrument(info_span!("scheduler_tick", tick = tick))
            .await;
        let duration_ms = timer.elapsed().as_millis() as u64;

        let mut report = TickReport {
            tick: Some(tick),
            started_at,
            duration_ms,
            skipped_overlap: false,
            watchdog_reset,
            due_count: 0,
            run_count: 0,
            deferred_count: 0,
            error: None,
            outcomes: Vec::new(),
        };
        match result {
            Ok((due_count, outcomes)) => {
                report.due_count = due_count;
                report.outcomes = outcomes;
                report.error = report
                    .outcomes
                    .iter()
                    .rev()
                    .find(|o| o.action == TickAction::Failed)
                    .and_then(|o| o.detail.clone());
            }
            Err(e) => {
                error!("调度 tick {} 失败: {}", tick, e);
                report.error = Some(e.to_string());
            }
        }
        report.run_count = report.count(TickAction::Executed);
        report.deferred_count = report.count(TickAction::Deferred);

        histogram!("mission_scheduler_tick_duration_ms").record(duration_ms as f64);
        StructuredLogger::log_tick_completed(
            tick,
            report.due_count,
            report.run_count,
            report.deferred_count,
            duration_ms,
        );
        self.state.finish(
            tick,
            duration_ms,
            report.due_count,
            report.run_count,
            report.error.clone(),
        );
        report
    }

    async fn process(&self, now: DateTime<Utc>) -> MissionResult<(usize, Vec<ScheduleOutcome>)> {
        let mut schedules = self.deps.schedules.list_enabled().await?;
        schedules.sort_by(|a, b| a.id.cmp(&b.id).then_with(|| a.user_id.cmp(&b.user_id)));
        debug!("本次 tick 共 {} 个启用中的调度", schedules.len());

        let mut budget = RunBudget::new(&self.config);
        let mut due_count = 0;
        let mut outcomes = Vec::with_capacity(schedules.len());

        for schedule in schedules {
            let check = match self.deps.gate.is_due(&schedule, now) {
                Ok(check) => check,
                Err(e) => {
                    warn!("调度 {} 到期判定失败: {}", schedule.id, e);
                    outcomes.push(
                        ScheduleOutcome::new(&schedule, TickAction::Failed).with_detail(e.to_string()),
                    );
                    continue;
                }
            };
            if !check.due {
                outcomes.push(ScheduleOutcome::new(&schedule, TickAction::NotDue));
                continue;
            }
            due_count += 1;

            let outcome = match self.process_due(&schedule, &check, now, &mut budget).await {
                Ok(outcome) => outcome,
                Err(e) => {
                    error!("处理调度 {} 失败: {}", schedule.id, e);
                    ScheduleOutcome::new(&schedule, TickAction::Failed).with_detail(e.to_string())
                }
            };
            outcomes.push(outcome);
        }

        Ok((due_count, outcomes))
    }

    async fn process_due(
        &self,
        schedule: &MissionSchedule,
        check: &DueCheck,
        now: DateTime<Utc>,
        budget: &mut RunBudget,
    ) -> MissionResult<ScheduleOutcome> {
        if check.mode.is_day_scoped()
            && check.day_stamp.is_some()
            && schedule.last_sent_local_date == check.day_stamp
        {
            return Ok(ScheduleOutcome::new(schedule, TickAction::DayLocked));
        }

        let mission = match self
            .deps
            .missions
            .get(&schedule.user_id, &schedule.mission_id)
            .await?
        {
            Some(mission) if mission.is_active() => mission,
            Some(mission) => {
                let reason = format!("mission_{}", mission.status.as_str());
                self.disable_schedule(schedule, &reason).await?;
                return Ok(ScheduleOutcome::new(schedule, TickAction::Disabled).with_detail(reason));
            }
            None => {
                self.disable_schedule(schedule, MISSION_MISSING).await?;
                return Ok(
                    ScheduleOutcome::new(schedule, TickAction::Disabled).with_detail(MISSION_MISSING)
                );
            }
        };

        let run_key = run_key_for(schedule, check, now);
        let retry = RetryConfig::from(
            &self
                .config
                .with_retry_override(mission.settings.retry.as_ref()),
        );
        let history = self
            .deps
            .history
            .run_key_history(&schedule.user_id, &schedule.id, &run_key)
            .await?;

        let attempt = match retry.decide(&history, now) {
            RunDecision::Run { attempt } => attempt,
            RunDecision::Satisfied => {
                return Ok(ScheduleOutcome::new(schedule, TickAction::Satisfied).with_run_key(&run_key));
            }
            RunDecision::BackingOff { retry_at } => {
                debug!("调度 {} 的 {} 处于退避期，{} 后重试", schedule.id, run_key, retry_at);
                return Ok(ScheduleOutcome::new(schedule, TickAction::BackingOff)
                    .with_run_key(&run_key)
                    .with_detail(retry_at.to_rfc3339()));
            }
            RunDecision::Exhausted { attempts } => {
                return Ok(ScheduleOutcome::new(schedule, TickAction::Exhausted)
                    .with_run_key(&run_key)
                    .with_detail(format!("attempts={attempts}")));
            }
        };

        if let Err(cap) = budget.try_take(&schedule.user_id) {
            debug!("调度 {} 达到配额 {}，推迟到下一个 tick", schedule.id, cap);
            return Ok(ScheduleOutcome::new(schedule, TickAction::Deferred)
                .with_run_key(&run_key)
                .with_detail(cap));
        }

        let context = ExecutionContext {
            schedule_id: schedule.id.clone(),
            tenant_id: schedule.user_id.clone(),
            run_key: run_key.clone(),
            attempt,
            mode: check.mode,
            day_stamp: check.day_stamp.clone(),
            timezone: check.timezone.clone(),
            source: RunSource::Scheduler,
            scheduled_at: now,
        };
        let result = self.execute(&mission, &context).await;
        let terminal = result.status == RunStatus::Error && retry.is_terminal_attempt(attempt);
        counter!("mission_scheduler_runs_total", "status" => result.status.as_str()).increment(1);

        let record = RunRecord {
            ts: self.deps.clock.now(),
            schedule_id: schedule.id.clone(),
            mission_id: mission.id.clone(),
            tenant_id: schedule.user_id.clone(),
            source: RunSource::Scheduler,
            status: result.status,
            error: result.reason.clone().filter(|_| result.status == RunStatus::Error),
            run_key: run_key.clone(),
            attempt,
            duration_ms: result.duration_ms,
            outputs_ok: result.outputs_ok,
            outputs_failed: result.outputs_failed,
        };
        match self.deps.history.append(&record).await {
            Ok(()) => StructuredLogger::log_run_recorded(&record),
            Err(e) => StructuredLogger::log_storage_failure("run_history", "append", &e),
        }

        if terminal {
            counter!("mission_dead_letters_total").increment(1);
            self.deps.dead_letters.record(DeadLetterRecord {
                ts: record.ts,
                schedule_id: schedule.id.clone(),
                mission_id: mission.id.clone(),
                tenant_id: schedule.user_id.clone(),
                run_key: run_key.clone(),
                attempt,
                reason: result
                    .reason
                    .clone()
                    .unwrap_or_else(|| "execution failed".to_string()),
                outputs_ok: result.outputs_ok,
                outputs_failed: result.outputs_failed,
                metadata: json!({
                    "mode": check.mode.as_str(),
                    "dayStamp": check.day_stamp,
                    "timezone": check.timezone,
                    "maxAttempts": retry.max_attempts(),
                    "durationMs": result.duration_ms,
                }),
            });
        }

        self.record_bookkeeping(schedule, check, &mission, result.status, terminal, now)
            .await;

        let mut outcome = ScheduleOutcome::new(schedule, TickAction::Executed).with_run_key(&run_key);
        outcome.attempt = Some(attempt);
        outcome.status = Some(result.status);
        outcome.detail = result.reason;
        Ok(outcome)
    }

    /// 调用执行引擎；返回错误或 panic 都归类为 error
    async fn execute(&self, mission: &Mission, context: &ExecutionContext) -> AttemptResult {
        let started = Instant::now();
        let result = AssertUnwindSafe(self.deps.engine.execute(mission, context))
            .catch_unwind()
            .await;
        let duration_ms = started.elapsed().as_millis() as u64;

        match result {
            Ok(Ok(outcome)) => {
                let (outputs_ok, outputs_failed) = outcome.output_counts();
                AttemptResult {
                    status: outcome.status(),
                    reason: outcome.reason,
                    outputs_ok,
                    outputs_failed,
                    duration_ms,
                }
            }
            Ok(Err(e)) => {
                warn!("任务 {} 执行出错: {}", mission.id, e);
                AttemptResult {
                    status: RunStatus::Error,
                    reason: Some(e.to_string()),
                    outputs_ok: 0,
                    outputs_failed: 0,
                    duration_ms,
                }
            }
            Err(panic) => {
                let message = panic
                    .downcast_ref::<String>()
                    .cloned()
                    .or_else(|| panic.downcast_ref::<&str>().map(|s| s.to_string()))
                    .unwrap_or_else(|| "unknown panic".to_string());
                error!("任务 {} 执行时发生 panic: {}", mission.id, message);
                AttemptResult {
                    status: RunStatus::Error,
                    reason: Some(format!("panic: {message}")),
                    outputs_ok: 0,
                    outputs_failed: 0,
                    duration_ms,
                }
            }
        }
    }

    /// 更新任务和调度上的运行统计，写入失败只记录日志
    async fn record_bookkeeping(
        &self,
        schedule: &MissionSchedule,
        check: &DueCheck,
        mission: &Mission,
        status: RunStatus,
        terminal: bool,
        now: DateTime<Utc>,
    ) {
        let bookkeeping = RunBookkeeping { status, at: now };
        match self
            .deps
            .missions
            .record_run_outcome(&schedule.user_id, &mission.id, bookkeeping)
            .await
        {
            Ok(Some(_)) => {}
            Ok(None) => warn!("任务 {} 在执行期间被删除，跳过记账", mission.id),
            Err(e) => StructuredLogger::log_storage_failure("mission", "record_run_outcome", &e),
        }

        // 失败但还有重试机会时不锁定当天
        let lock_day = check.mode.is_day_scoped() && (status != RunStatus::Error || terminal);
        let day_stamp = check.day_stamp.clone().filter(|_| lock_day);
        let updated = self
            .update_schedule(schedule, |s| {
                s.run_count += 1;
                match status {
                    RunStatus::Success => s.success_count += 1,
                    RunStatus::Error => s.failure_count += 1,
                    RunStatus::Skipped => {}
                }
                s.last_run_at = Some(now);
                s.last_run_status = Some(status);
                if let Some(day) = &day_stamp {
                    s.last_sent_local_date = Some(day.clone());
                }
            })
            .await;
        if let Err(e) = updated {
            StructuredLogger::log_storage_failure("schedule", "record_run", &e);
        }
    }

    async fn disable_schedule(&self, schedule: &MissionSchedule, reason: &str) -> MissionResult<()> {
        let updated = self
            .update_schedule(schedule, |s| {
                s.enabled = false;
                s.disabled_reason = Some(reason.to_string());
            })
            .await?;
        if updated.is_some() {
            StructuredLogger::log_schedule_disabled(
                &schedule.id,
                &schedule.mission_id,
                &schedule.user_id,
                reason,
            );
        }
        Ok(())
    }

    /// 重新读取调度记录后修改并比较交换写入，冲突时重试
    async fn update_schedule<F>(
        &self,
        schedule: &MissionSchedule,
        mutate: F,
    ) -> MissionResult<Option<MissionSchedule>>
    where
        F: Fn(&mut MissionSchedule),
    {
        let mut last_conflict = None;
        for _ in 0..MAX_SCHEDULE_WRITE_ATTEMPTS {
            let Some(mut current) = self
                .deps
                .schedules
                .get(&schedule.user_id, &schedule.id)
                .await?
            else {
                return Ok(None);
            };
            let previous = current.version;
            mutate(&mut current);
            current.bump_version(self.deps.clock.now());

            match self.deps.schedules.save(&current, Some(previous)).await {
                Ok(()) => return Ok(Some(current)),
                Err(e) if e.is_version_conflict() => {
                    debug!("调度 {} 写入冲突，重新读取后重试", schedule.id);
                    last_conflict = Some(e);
                }
                Err(e) => return Err(e),
            }
        }
        Err(last_conflict
            .unwrap_or_else(|| MissionError::Internal(format!("调度 {} 写入失败", schedule.id))))
    }
}

/// 计算一次逻辑运行的幂等键
///
/// 按日归属的模式使用 `scheduleId:mode:dayStamp`，
/// interval 模式使用一分钟粒度的时间桶 `scheduleId:interval:<floor(now/60s)>`。
pub fn run_key_for(schedule: &MissionSchedule, check: &DueCheck, now: DateTime<Utc>) -> String {
    match (check.mode, check.day_stamp.as_deref()) {
        (TriggerMode::Interval, _) | (_, None) => {
            format!("{}:interval:{}", schedule.id, now.timestamp().div_euclid(60))
        }
        (mode, Some(day)) => format!("{}:{}:{}", schedule.id, mode.as_str(), day),
    }
}
