use std::time::{Duration, Instant};

use async_trait::async_trait;
use serde::Serialize;
use tracing::{error, info};

use mission_core::config::ExecutionConfig;
use mission_core::models::{ExecutionContext, ExecutionOutcome, Mission};
use mission_core::traits::ExecutionEngine;
use mission_core::{MissionError, MissionResult};

#[derive(Serialize)]
struct ExecuteRequest<'a> {
    mission: &'a Mission,
    context: &'a ExecutionContext,
}

/// 通过 HTTP 调用外部执行服务
///
/// 请求体为 `{mission, context}`，响应体为 [`ExecutionOutcome`]。
/// 传输错误和非 2xx 状态都返回 [`MissionError::Execution`]。
pub struct HttpExecutionEngine {
    client: reqwest::Client,
    endpoint: String,
    timeout: Duration,
}

impl HttpExecutionEngine {
    pub fn new(config: &ExecutionConfig) -> Self {
        Self {
            client: reqwest::Client::new(),
            endpoint: config.endpoint.clone(),
            timeout: Duration::from_secs(config.timeout_seconds),
        }
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }
}

#[async_trait]
impl ExecutionEngine for HttpExecutionEngine {
    async fn execute(
        &self,
        mission: &Mission,
        context: &ExecutionContext,
    ) -> MissionResult<ExecutionOutcome> {
        let start_time = Instant::now();
        info!(
            "执行任务: mission={}, run_key={}, attempt={}, endpoint={}",
            mission.id, context.run_key, context.attempt, self.endpoint
        );

        let response = self
            .client
            .post(&self.endpoint)
            .timeout(self.timeout)
            .json(&ExecuteRequest { mission, context })
            .send()
            .await
            .map_err(|e| {
                error!("执行请求失败: mission={}, error={}", mission.id, e);
                MissionError::Execution(format!("执行请求失败: {e}"))
            })?;

        let status = response.status();
        if !status.is_success() {
            let body = response
                .text()
                .await
                .unwrap_or_else(|e| format!("读取响应体失败: {e}"));
            return Err(MissionError::Execution(format!(
                "执行服务返回 {}: {}",
                status.as_u16(),
                body
            )));
        }

        let outcome: ExecutionOutcome = response
            .json()
            .await
            .map_err(|e| MissionError::Execution(format!("解析执行结果失败: {e}")))?;

        info!(
            "任务执行完成: mission={}, ok={}, skipped={}, duration={}ms",
            mission.id,
            outcome.ok,
            outcome.skipped,
            start_time.elapsed().as_millis()
        );
        Ok(outcome)
    }
}
