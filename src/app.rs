use std::sync::Arc;

use anyhow::{Context, Result};
use tokio::sync::broadcast;
use tracing::info;

use mission_core::config::AppConfig;
use mission_core::models::{JournalEntry, RunKeyHistory};
use mission_core::traits::{ExecutionEngine, OperationJournal, RunHistoryStore};
use mission_core::{Clock, SystemClock};
use mission_dispatcher::{ClockTriggerGate, MissionScheduler, SchedulerDeps, TickReport};
use mission_domain::MissionService;
use mission_infrastructure::{FileStorage, HttpExecutionEngine};

/// 主应用程序：把文件存储、领域服务和调度器装配在一起
pub struct Application {
    storage: FileStorage,
    service: Arc<MissionService>,
    scheduler: Arc<MissionScheduler>,
}

impl Application {
    /// 使用配置中的 HTTP 执行引擎创建应用
    pub fn new(config: &AppConfig) -> Result<Self> {
        let engine = Arc::new(HttpExecutionEngine::new(&config.execution));
        info!("执行引擎地址: {}", engine.endpoint());
        Self::with_engine(config, engine, Arc::new(SystemClock))
    }

    pub fn with_engine(
        config: &AppConfig,
        engine: Arc<dyn ExecutionEngine>,
        clock: Arc<dyn Clock>,
    ) -> Result<Self> {
        std::fs::create_dir_all(&config.storage.data_dir).with_context(|| {
            format!("创建数据目录失败: {}", config.storage.data_dir.display())
        })?;
        info!("数据目录: {}", config.storage.data_dir.display());

        let storage = FileStorage::open(&config.storage, &config.scheduler);
        let service = Arc::new(MissionService::new(
            storage.missions.clone(),
            storage.schedules.clone(),
            storage.journal.clone(),
            clock.clone(),
        ));
        let scheduler = Arc::new(MissionScheduler::new(
            config.scheduler.clone(),
            SchedulerDeps {
                schedules: storage.schedules.clone(),
                missions: service.clone(),
                history: storage.run_history.clone(),
                engine,
                gate: Arc::new(ClockTriggerGate::new()),
                dead_letters: storage.dead_letters.clone(),
                clock,
            },
        ));

        Ok(Self {
            storage,
            service,
            scheduler,
        })
    }

    pub fn service(&self) -> &Arc<MissionService> {
        &self.service
    }

    pub fn scheduler(&self) -> &Arc<MissionScheduler> {
        &self.scheduler
    }

    /// 运行调度循环直到收到关闭信号
    pub async fn run(&self, shutdown_rx: broadcast::Receiver<()>) -> Result<()> {
        Arc::clone(&self.scheduler).run(shutdown_rx).await;
        self.storage.dead_letters.flush().await;
        let status = self.scheduler.status();
        info!(
            "调度循环已停止: ticks={}, overlap_skips={}, watchdog_resets={}",
            status.total_tick_count, status.overlap_skip_count, status.watchdog_reset_count
        );
        Ok(())
    }

    /// 执行一次 tick，返回前等待死信落盘
    pub async fn tick_once(&self) -> TickReport {
        let report = self.scheduler.tick().await;
        self.storage.dead_letters.flush().await;
        report
    }

    pub async fn run_key_history(
        &self,
        tenant_id: &str,
        schedule_id: &str,
        run_key: &str,
    ) -> Result<RunKeyHistory> {
        self.storage
            .run_history
            .run_key_history(tenant_id, schedule_id, run_key)
            .await
            .with_context(|| format!("读取运行历史失败: {tenant_id}/{schedule_id}"))
    }

    pub async fn journal(
        &self,
        tenant_id: &str,
        mission_id: Option<&str>,
        limit: usize,
    ) -> Result<Vec<JournalEntry>> {
        self.storage
            .journal
            .entries(tenant_id, mission_id, limit)
            .await
            .with_context(|| format!("读取操作日志失败: {tenant_id}"))
    }
}
