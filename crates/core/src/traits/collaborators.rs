//! 外部协作方接口：执行引擎、触发闸门、死信接收端
//!
//! 核心只依赖这些契约，工具、模型、渠道等具体逻辑都在实现方内部。

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::models::{DeadLetterRecord, DueCheck, ExecutionContext, ExecutionOutcome, Mission, MissionSchedule};
use crate::MissionResult;

/// 执行引擎，单次运行的超时由实现方负责
#[async_trait]
pub trait ExecutionEngine: Send + Sync {
    async fn execute(
        &self,
        mission: &Mission,
        context: &ExecutionContext,
    ) -> MissionResult<ExecutionOutcome>;
}

/// 时区感知的到期判定，调度器把它当作纯函数使用
pub trait TriggerGate: Send + Sync {
    fn is_due(&self, schedule: &MissionSchedule, now: DateTime<Utc>) -> MissionResult<DueCheck>;
}

/// 死信接收端，`record` 不能阻塞调度 tick
pub trait DeadLetterSink: Send + Sync {
    fn record(&self, record: DeadLetterRecord);
}
