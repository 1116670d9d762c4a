//! 调度器 tick 状态与看门狗
//!
//! 状态由调度器实例持有；同一时刻最多一个 tick 在执行。
//! 在途标记超过看门狗超时后视为崩溃的 tick，被清除后允许新的 tick 开始。

use std::sync::{Mutex, MutexGuard};

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

/// 只读的调度器状态快照
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct SchedulerStatus {
    pub enabled: bool,
    pub timer_active: bool,
    pub tick_in_flight: bool,
    pub total_tick_count: u64,
    pub overlap_skip_count: u64,
    pub watchdog_reset_count: u64,
    pub last_tick_started_at: Option<DateTime<Utc>>,
    pub last_tick_duration_ms: Option<u64>,
    pub last_due_count: usize,
    pub last_run_count: usize,
    pub last_error: Option<String>,
}

/// 尝试开始 tick 的结果
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TickStart {
    Started { tick: u64 },
    /// 看门狗清除了卡住的在途标记后开始
    Recovered { tick: u64, stuck_tick: u64 },
    Overlapped,
}

#[derive(Debug, Clone, Copy)]
struct InFlight {
    tick: u64,
    started_at: DateTime<Utc>,
}

#[derive(Debug, Default)]
pub struct TickState {
    inner: Mutex<TickStateInner>,
}

#[derive(Debug, Default)]
struct TickStateInner {
    enabled: bool,
    timer_active: bool,
    in_flight: Option<InFlight>,
    total_tick_count: u64,
    overlap_skip_count: u64,
    watchdog_reset_count: u64,
    last_tick_started_at: Option<DateTime<Utc>>,
    last_tick_duration_ms: Option<u64>,
    last_due_count: usize,
    last_run_count: usize,
    last_error: Option<String>,
}

impl TickState {
    pub fn new(enabled: bool) -> Self {
        Self {
            inner: Mutex::new(TickStateInner {
                enabled,
                ..TickStateInner::default()
            }),
        }
    }

    fn lock(&self) -> MutexGuard<'_, TickStateInner> {
        // 状态只包含计数器，锁中毒后继续使用内部数据
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn set_timer_active(&self, active: bool) {
        self.lock().timer_active = active;
    }

    pub fn try_begin(&self, now: DateTime<Utc>, watchdog: Duration) -> TickStart {
        let mut state = self.lock();
        let mut stuck_tick = None;

        if let Some(in_flight) = state.in_flight {
            if now - in_flight.started_at < watchdog {
                state.overlap_skip_count += 1;
                return TickStart::Overlapped;
            }
            state.watchdog_reset_count += 1;
            stuck_tick = Some(in_flight.tick);
        }

        state.total_tick_count += 1;
        let tick = state.total_tick_count;
        state.in_flight = Some(InFlight {
            tick,
            started_at: now,
        });
        state.last_tick_started_at = Some(now);

        match stuck_tick {
            Some(stuck_tick) => TickStart::Recovered { tick, stuck_tick },
            None => TickStart::Started { tick },
        }
    }

    /// 结束 tick；被看门狗替换掉的旧 tick 不会覆盖新 tick 的在途标记
    pub fn finish(
        &self,
        tick: u64,
        duration_ms: u64,
        due_count: usize,
        run_count: usize,
        error: Option<String>,
    ) {
        let mut state = self.lock();
        if state.in_flight.map(|f| f.tick) == Some(tick) {
            state.in_flight = None;
        }
        state.last_tick_duration_ms = Some(duration_ms);
        state.last_due_count = due_count;
        state.last_run_count = run_count;
        state.last_error = error;
    }

    /// 未正常结束（例如 future 被丢弃）时只清除在途标记
    pub fn abandon(&self, tick: u64) {
        let mut state = self.lock();
        if state.in_flight.map(|f| f.tick) == Some(tick) {
            state.in_flight = None;
        }
    }

    pub fn snapshot(&self) -> SchedulerStatus {
        let state = self.lock();
        SchedulerStatus {
            enabled: state.enabled,
            timer_active: state.timer_active,
            tick_in_flight: state.in_flight.is_some(),
            total_tick_count: state.total_tick_count,
            overlap_skip_count: state.overlap_skip_count,
            watchdog_reset_count: state.watchdog_reset_count,
            last_tick_started_at: state.last_tick_started_at,
            last_tick_duration_ms: state.last_tick_duration_ms,
            last_due_count: state.last_due_count,
            last_run_count: state.last_run_count,
            last_error: state.last_error.clone(),
        }
    }
}
