use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use mission_core::config::AppConfig;
use serde_json::json;
use tokio::signal;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

mod app;
mod shutdown;

use app::Application;
use shutdown::ShutdownManager;

#[derive(Debug, Parser)]
#[command(name = "missions", version, about = "任务编排核心：差量应用、运行历史与定时调度")]
struct Cli {
    /// 配置文件路径，默认查找 config/missions.toml 和 missions.toml
    #[arg(short, long, value_name = "FILE", global = true)]
    config: Option<String>,

    /// 日志级别，覆盖配置文件中的 observability.log_level
    #[arg(short = 'l', long, value_name = "LEVEL", global = true)]
    log_level: Option<String>,

    #[arg(long, value_enum, default_value_t = LogFormat::Pretty, global = true)]
    log_format: LogFormat,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum LogFormat {
    Json,
    Pretty,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// 启动调度循环，直到收到 Ctrl+C 或 SIGTERM
    Run,
    /// 执行一次 tick 并以 JSON 输出报告
    Tick,
    /// 查看某个 runKey 的运行历史汇总
    History {
        tenant: String,
        schedule: String,
        run_key: String,
    },
    /// 查看租户的操作日志
    Journal {
        tenant: String,
        #[arg(long)]
        mission: Option<String>,
        #[arg(long, default_value_t = 20)]
        limit: usize,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let config = AppConfig::load(cli.config.as_deref()).with_context(|| {
        format!(
            "加载配置失败: {}",
            cli.config.as_deref().unwrap_or("<默认路径>")
        )
    })?;

    let log_level = cli
        .log_level
        .clone()
        .unwrap_or_else(|| config.observability.log_level.clone());
    init_logging(&log_level, cli.log_format)?;

    let app = Application::new(&config)?;

    match cli.command {
        Commands::Run => run_scheduler(app, &config).await?,
        Commands::Tick => {
            let report = app.tick_once().await;
            print_json(&report)?;
        }
        Commands::History {
            tenant,
            schedule,
            run_key,
        } => {
            let history = app.run_key_history(&tenant, &schedule, &run_key).await?;
            print_json(&json!({
                "tenantId": tenant,
                "scheduleId": schedule,
                "runKey": run_key,
                "history": history,
            }))?;
        }
        Commands::Journal {
            tenant,
            mission,
            limit,
        } => {
            let entries = app.journal(&tenant, mission.as_deref(), limit).await?;
            print_json(&entries)?;
        }
    }

    Ok(())
}

async fn run_scheduler(app: Application, config: &AppConfig) -> Result<()> {
    info!("启动任务编排调度器");

    if let Some(listen) = config.observability.metrics_listen.as_deref() {
        mission_infrastructure::init_metrics(listen).context("初始化指标导出器失败")?;
    }

    let shutdown_manager = ShutdownManager::new();
    let shutdown_rx = shutdown_manager.subscribe();
    let app_handle = tokio::spawn(async move {
        if let Err(e) = app.run(shutdown_rx).await {
            error!("应用运行失败: {e}");
        }
    });

    wait_for_shutdown_signal().await;
    info!("收到关闭信号，开始优雅关闭...");
    shutdown_manager.shutdown();

    match tokio::time::timeout(Duration::from_secs(30), app_handle).await {
        Ok(Ok(())) => info!("调度器已优雅关闭"),
        Ok(Err(e)) => error!("调度器关闭时发生错误: {e}"),
        Err(_) => warn!("调度器关闭超时，强制退出"),
    }
    Ok(())
}

fn print_json<T: serde::Serialize + ?Sized>(value: &T) -> Result<()> {
    let output = serde_json::to_string_pretty(value).context("序列化输出失败")?;
    println!("{output}");
    Ok(())
}

/// 初始化日志系统，日志写到 stderr，stdout 只留给命令输出
fn init_logging(log_level: &str, log_format: LogFormat) -> Result<()> {
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(log_level));

    let registry = tracing_subscriber::registry().with(env_filter);

    match log_format {
        LogFormat::Json => registry
            .with(
                tracing_subscriber::fmt::layer()
                    .json()
                    .with_writer(std::io::stderr),
            )
            .try_init()
            .context("初始化JSON日志格式失败")?,
        LogFormat::Pretty => registry
            .with(
                tracing_subscriber::fmt::layer()
                    .pretty()
                    .with_writer(std::io::stderr),
            )
            .try_init()
            .context("初始化Pretty日志格式失败")?,
    }

    Ok(())
}

/// 等待 Ctrl+C 或 SIGTERM
async fn wait_for_shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!("安装Ctrl+C信号处理器失败: {e}");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                error!("安装SIGTERM信号处理器失败: {e}");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("收到Ctrl+C信号");
        },
        _ = terminate => {
            info!("收到SIGTERM信号");
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_subcommands() {
        let cli = Cli::try_parse_from(["missions", "tick"]).unwrap();
        assert!(matches!(cli.command, Commands::Tick));
        assert_eq!(cli.log_format, LogFormat::Pretty);

        let cli = Cli::try_parse_from([
            "missions",
            "journal",
            "tenant-a",
            "--mission",
            "m1",
            "--limit",
            "5",
            "--log-format",
            "json",
        ])
        .unwrap();
        assert_eq!(cli.log_format, LogFormat::Json);
        match cli.command {
            Commands::Journal {
                tenant,
                mission,
                limit,
            } => {
                assert_eq!(tenant, "tenant-a");
                assert_eq!(mission.as_deref(), Some("m1"));
                assert_eq!(limit, 5);
            }
            other => panic!("unexpected command: {other:?}"),
        }
    }

    #[test]
    fn test_sample_config_parses() {
        let config = AppConfig::from_toml(include_str!("../config/missions.toml")).unwrap();
        assert_eq!(config.scheduler, config.scheduler.clamped());
        assert!(config.observability.metrics_listen.is_none());
    }

    #[test]
    fn test_history_requires_run_key() {
        assert!(Cli::try_parse_from(["missions", "history", "tenant-a", "s1"]).is_err());
        let cli = Cli::try_parse_from(["missions", "-c", "x.toml", "history", "t", "s", "k"]).unwrap();
        assert_eq!(cli.config.as_deref(), Some("x.toml"));
    }
}
