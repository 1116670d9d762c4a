//! 调度分发层
//!
//! 负责按固定间隔驱动调度 tick：到期判定、幂等键、基于运行历史的
//! 重试退避、每 tick 的运行配额以及 tick 看门狗。

pub mod retry_policy;
pub mod scheduler;
pub mod tick_state;
pub mod trigger_gate;

pub use retry_policy::{RetryConfig, RunDecision};
pub use scheduler::{
    run_key_for, MissionScheduler, ScheduleOutcome, SchedulerDeps, TickAction, TickReport,
};
pub use tick_state::{SchedulerStatus, TickStart, TickState};
pub use trigger_gate::{parse_timezone, ClockTriggerGate};
