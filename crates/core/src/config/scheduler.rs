use serde::{Deserialize, Serialize};

use crate::models::RetryPolicy;

/// 调度器可调参数
///
/// 来自配置的值一律不可信，引擎只使用 [`SchedulerConfig::clamped`] 之后的副本。
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulerConfig {
    pub enabled: bool,
    pub tick_interval_seconds: u64,
    pub max_runs_per_tick: usize,
    pub max_runs_per_tenant_per_tick: usize,
    pub max_retries: u32,
    pub retry_base_delay_seconds: u64,
    pub retry_max_delay_seconds: u64,
    pub history_scan_lines: usize,
    pub watchdog_timeout_seconds: u64,
}

pub const TICK_INTERVAL_RANGE: (u64, u64) = (5, 3600);
pub const MAX_RUNS_PER_TICK_RANGE: (usize, usize) = (1, 500);
pub const MAX_RUNS_PER_TENANT_RANGE: (usize, usize) = (1, 100);
pub const MAX_RETRIES_RANGE: (u32, u32) = (0, 10);
pub const RETRY_BASE_DELAY_RANGE: (u64, u64) = (1, 3600);
pub const RETRY_MAX_DELAY_CEILING: u64 = 86_400;
pub const HISTORY_SCAN_LINES_RANGE: (usize, usize) = (50, 20_000);
pub const WATCHDOG_TIMEOUT_RANGE: (u64, u64) = (60, 86_400);

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            tick_interval_seconds: 30,
            max_runs_per_tick: 25,
            max_runs_per_tenant_per_tick: 3,
            max_retries: 3,
            retry_base_delay_seconds: 60,
            retry_max_delay_seconds: 3600,
            history_scan_lines: 2000,
            watchdog_timeout_seconds: 900,
        }
    }
}

impl SchedulerConfig {
    /// 把所有参数夹紧到安全范围
    pub fn clamped(&self) -> Self {
        let retry_base_delay_seconds = self
            .retry_base_delay_seconds
            .clamp(RETRY_BASE_DELAY_RANGE.0, RETRY_BASE_DELAY_RANGE.1);
        Self {
            enabled: self.enabled,
            tick_interval_seconds: self
                .tick_interval_seconds
                .clamp(TICK_INTERVAL_RANGE.0, TICK_INTERVAL_RANGE.1),
            max_runs_per_tick: self
                .max_runs_per_tick
                .clamp(MAX_RUNS_PER_TICK_RANGE.0, MAX_RUNS_PER_TICK_RANGE.1),
            max_runs_per_tenant_per_tick: self
                .max_runs_per_tenant_per_tick
                .clamp(MAX_RUNS_PER_TENANT_RANGE.0, MAX_RUNS_PER_TENANT_RANGE.1),
            max_retries: self.max_retries.clamp(MAX_RETRIES_RANGE.0, MAX_RETRIES_RANGE.1),
            retry_base_delay_seconds,
            retry_max_delay_seconds: self
                .retry_max_delay_seconds
                .clamp(retry_base_delay_seconds, RETRY_MAX_DELAY_CEILING),
            history_scan_lines: self
                .history_scan_lines
                .clamp(HISTORY_SCAN_LINES_RANGE.0, HISTORY_SCAN_LINES_RANGE.1),
            watchdog_timeout_seconds: self
                .watchdog_timeout_seconds
                .clamp(WATCHDOG_TIMEOUT_RANGE.0, WATCHDOG_TIMEOUT_RANGE.1),
        }
    }

    /// 读取扁平的 `SCHEDULER_*` 环境变量覆盖配置，无法解析的值被忽略
    pub fn apply_env_overrides(&mut self) {
        self.apply_overrides(|key| std::env::var(key).ok());
    }

    /// 与 [`apply_env_overrides`](Self::apply_env_overrides) 相同，但从给定的查找函数读取
    pub fn apply_overrides<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        fn parse<T: std::str::FromStr>(value: Option<String>) -> Option<T> {
            value.and_then(|v| v.trim().parse().ok())
        }

        if let Some(v) = parse(lookup("SCHEDULER_ENABLED")) {
            self.enabled = v;
        }
        if let Some(v) = parse(lookup("SCHEDULER_TICK_INTERVAL_SECONDS")) {
            self.tick_interval_seconds = v;
        }
        if let Some(v) = parse(lookup("SCHEDULER_MAX_RUNS_PER_TICK")) {
            self.max_runs_per_tick = v;
        }
        if let Some(v) = parse(lookup("SCHEDULER_MAX_RUNS_PER_TENANT_PER_TICK")) {
            self.max_runs_per_tenant_per_tick = v;
        }
        if let Some(v) = parse(lookup("SCHEDULER_MAX_RETRIES")) {
            self.max_retries = v;
        }
        if let Some(v) = parse(lookup("SCHEDULER_RETRY_BASE_DELAY_SECONDS")) {
            self.retry_base_delay_seconds = v;
        }
        if let Some(v) = parse(lookup("SCHEDULER_RETRY_MAX_DELAY_SECONDS")) {
            self.retry_max_delay_seconds = v;
        }
        if let Some(v) = parse(lookup("SCHEDULER_HISTORY_SCAN_LINES")) {
            self.history_scan_lines = v;
        }
        if let Some(v) = parse(lookup("SCHEDULER_WATCHDOG_TIMEOUT_SECONDS")) {
            self.watchdog_timeout_seconds = v;
        }
    }

    /// 合并单个任务的重试策略覆盖项，结果同样被夹紧
    pub fn with_retry_override(&self, policy: Option<&RetryPolicy>) -> Self {
        let Some(policy) = policy else {
            return self.clone();
        };
        Self {
            max_retries: policy.max_retries.unwrap_or(self.max_retries),
            retry_base_delay_seconds: policy
                .base_delay_seconds
                .unwrap_or(self.retry_base_delay_seconds),
            retry_max_delay_seconds: policy
                .max_delay_seconds
                .unwrap_or(self.retry_max_delay_seconds),
            ..self.clone()
        }
        .clamped()
    }
}
