use chrono::{DateTime, Duration, Utc};

use mission_core::config::SchedulerConfig;
use mission_core::models::{RunKeyHistory, RunStatus};

/// 重试策略配置
///
/// 重试上限和退避时间完全由运行历史推导，不依赖内存中的计数器，
/// 进程重启后退避状态保持不变。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryConfig {
    /// 首次尝试之后允许的重试次数
    pub max_retries: u32,
    /// 基础重试间隔（秒）
    pub base_delay_seconds: u64,
    /// 最大重试间隔（秒）
    pub max_delay_seconds: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self::from(&SchedulerConfig::default())
    }
}

impl From<&SchedulerConfig> for RetryConfig {
    fn from(config: &SchedulerConfig) -> Self {
        Self {
            max_retries: config.max_retries,
            base_delay_seconds: config.retry_base_delay_seconds,
            max_delay_seconds: config.retry_max_delay_seconds,
        }
    }
}

/// 针对某个 runKey 的调度决定
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunDecision {
    /// 需要执行，`attempt` 从 1 开始
    Run { attempt: u32 },
    /// 最近一次结果是 success 或 skipped
    Satisfied,
    /// 上次失败，退避时间未到
    BackingOff { retry_at: DateTime<Utc> },
    /// 重试预算已耗尽
    Exhausted { attempts: u32 },
}

impl RetryConfig {
    /// 包含首次尝试在内的最大尝试次数
    pub fn max_attempts(&self) -> u32 {
        self.max_retries.saturating_add(1)
    }

    /// 计算指数退避间隔：`base * 2^attempts`，不超过最大间隔
    pub fn backoff_delay(&self, attempts: u32) -> Duration {
        let factor = 1u64.checked_shl(attempts).unwrap_or(u64::MAX);
        let seconds = self
            .base_delay_seconds
            .saturating_mul(factor)
            .min(self.max_delay_seconds);
        Duration::seconds(i64::try_from(seconds).unwrap_or(i64::MAX))
    }

    /// 某次尝试失败后是否已经是最后一次
    pub fn is_terminal_attempt(&self, attempt: u32) -> bool {
        attempt >= self.max_attempts()
    }

    pub fn decide(&self, history: &RunKeyHistory, now: DateTime<Utc>) -> RunDecision {
        let Some(latest_status) = history.latest_status else {
            return RunDecision::Run { attempt: 1 };
        };

        match latest_status {
            RunStatus::Success | RunStatus::Skipped => RunDecision::Satisfied,
            RunStatus::Error => {
                if history.attempts >= self.max_attempts() {
                    return RunDecision::Exhausted {
                        attempts: history.attempts,
                    };
                }
                let retry_at = history
                    .latest_ts
                    .map(|ts| ts + self.backoff_delay(history.attempts))
                    .unwrap_or(now);
                if now >= retry_at {
                    RunDecision::Run {
                        attempt: history.attempts + 1,
                    }
                } else {
                    RunDecision::BackingOff { retry_at }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> RetryConfig {
        RetryConfig {
            max_retries: 3,
            base_delay_seconds: 60,
            max_delay_seconds: 600,
        }
    }

    fn failed(attempts: u32, latest_ts: DateTime<Utc>) -> RunKeyHistory {
        RunKeyHistory {
            attempts,
            error_count: attempts,
            latest_ts: Some(latest_ts),
            latest_status: Some(RunStatus::Error),
            ..RunKeyHistory::default()
        }
    }

    #[test]
    fn test_backoff_is_non_decreasing_and_capped() {
        let config = config();
        let delays: Vec<i64> = (0..70).map(|n| config.backoff_delay(n).num_seconds()).collect();
        assert_eq!(&delays[..5], &[60, 120, 240, 480, 600]);
        assert!(delays.windows(2).all(|w| w[0] <= w[1]));
        assert!(delays.iter().all(|d| *d <= 600));
    }

    #[test]
    fn test_empty_history_runs_first_attempt() {
        let decision = config().decide(&RunKeyHistory::default(), Utc::now());
        assert_eq!(decision, RunDecision::Run { attempt: 1 });
    }

    #[test]
    fn test_satisfied_statuses() {
        for status in [RunStatus::Success, RunStatus::Skipped] {
            let history = RunKeyHistory {
                attempts: 2,
                latest_status: Some(status),
                latest_ts: Some(Utc::now()),
                ..RunKeyHistory::default()
            };
            assert_eq!(config().decide(&history, Utc::now()), RunDecision::Satisfied);
        }
    }

    #[test]
    fn test_error_waits_for_backoff() {
        let failed_at = Utc::now();
        let history = failed(1, failed_at);

        let early = config().decide(&history, failed_at + Duration::seconds(119));
        assert_eq!(
            early,
            RunDecision::BackingOff {
                retry_at: failed_at + Duration::seconds(120)
            }
        );

        let ready = config().decide(&history, failed_at + Duration::seconds(120));
        assert_eq!(ready, RunDecision::Run { attempt: 2 });
    }

    #[test]
    fn test_ceiling_counts_first_attempt() {
        let config = config();
        assert_eq!(config.max_attempts(), 4);
        assert!(!config.is_terminal_attempt(3));
        assert!(config.is_terminal_attempt(4));

        let history = failed(4, Utc::now() - Duration::days(1));
        assert_eq!(
            config.decide(&history, Utc::now()),
            RunDecision::Exhausted { attempts: 4 }
        );
    }

    #[test]
    fn test_zero_retries_exhausts_after_first_failure() {
        let config = RetryConfig {
            max_retries: 0,
            ..config()
        };
        let history = failed(1, Utc::now() - Duration::days(1));
        assert_eq!(
            config.decide(&history, Utc::now()),
            RunDecision::Exhausted { attempts: 1 }
        );
    }
}
