use std::net::SocketAddr;

use anyhow::Result;
use tracing::{error, info, warn};

use mission_core::models::{DeadLetterRecord, RunRecord};

/// 安装 Prometheus 指标导出器，`listen` 形如 `0.0.0.0:9090`
pub fn init_metrics(listen: &str) -> Result<()> {
    let addr: SocketAddr = listen
        .parse()
        .map_err(|e| anyhow::anyhow!("无效的指标监听地址 {}: {}", listen, e))?;

    let (recorder, exporter) = metrics_exporter_prometheus::PrometheusBuilder::new()
        .with_http_listener(addr)
        .build()
        .map_err(|e| anyhow::anyhow!("Failed to create Prometheus exporter: {}", e))?;

    metrics::set_global_recorder(recorder)
        .map_err(|e| anyhow::anyhow!("Failed to install metrics recorder: {}", e))?;
    tokio::spawn(async move {
        if let Err(e) = exporter.await {
            error!("Prometheus exporter stopped: {:?}", e);
        }
    });

    info!("Metrics initialized with Prometheus exporter on {}", addr);
    Ok(())
}

/// Structured logging utilities
pub struct StructuredLogger;

impl StructuredLogger {
    /// Log a run-history append
    pub fn log_run_recorded(record: &RunRecord) {
        info!(
            event = "run_recorded",
            schedule.id = %record.schedule_id,
            mission.id = %record.mission_id,
            tenant.id = %record.tenant_id,
            run.key = %record.run_key,
            run.attempt = record.attempt,
            run.status = record.status.as_str(),
            run.duration_ms = record.duration_ms,
            run.outputs_ok = record.outputs_ok,
            run.outputs_failed = record.outputs_failed,
            run.error = record.error.as_deref().unwrap_or(""),
            "Run recorded"
        );
    }

    /// Log a terminal failure handed to the dead-letter sink
    pub fn log_dead_letter_recorded(record: &DeadLetterRecord) {
        warn!(
            event = "dead_letter_recorded",
            schedule.id = %record.schedule_id,
            mission.id = %record.mission_id,
            tenant.id = %record.tenant_id,
            run.key = %record.run_key,
            run.attempt = record.attempt,
            reason = %record.reason,
            "Run dead-lettered"
        );
    }

    /// Log a schedule the scheduler switched off
    pub fn log_schedule_disabled(schedule_id: &str, mission_id: &str, tenant_id: &str, reason: &str) {
        warn!(
            event = "schedule_disabled",
            schedule.id = schedule_id,
            mission.id = mission_id,
            tenant.id = tenant_id,
            reason = reason,
            "Schedule disabled"
        );
    }

    /// Log the end of a scheduler tick
    pub fn log_tick_completed(
        tick: u64,
        due_count: usize,
        run_count: usize,
        deferred_count: usize,
        duration_ms: u64,
    ) {
        info!(
            event = "tick_completed",
            tick = tick,
            tick.due = due_count,
            tick.runs = run_count,
            tick.deferred = deferred_count,
            tick.duration_ms = duration_ms,
            "Scheduler tick completed"
        );
    }

    /// Log a bookkeeping write that failed without aborting the tick
    pub fn log_storage_failure(component: &str, operation: &str, error: &dyn std::error::Error) {
        error!(
            event = "storage_failure",
            component = component,
            operation = operation,
            error = %error,
            "Storage operation failed"
        );
    }
}
