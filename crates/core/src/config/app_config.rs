use anyhow::{Context, Result};
use config::{Config as ConfigBuilder, Environment, File, FileFormat};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use super::scheduler::SchedulerConfig;

/// 存储配置
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// 任务、调度、运行日志、操作日志、死信的根目录
    pub data_dir: PathBuf,
    /// 运行日志超过该字节数时触发轮转
    pub history_max_bytes: u64,
    /// 轮转后保留的行数
    pub history_keep_lines: usize,
}

pub const MIN_HISTORY_MAX_BYTES: u64 = 64 * 1024;
pub const MIN_HISTORY_KEEP_LINES: usize = 100;

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("data"),
            history_max_bytes: 2 * 1024 * 1024,
            history_keep_lines: 1000,
        }
    }
}

impl StorageConfig {
    pub fn validate(&self) -> Result<()> {
        if self.data_dir.as_os_str().is_empty() {
            return Err(anyhow::anyhow!("数据目录不能为空"));
        }
        Ok(())
    }

    pub fn history_max_bytes(&self) -> u64 {
        self.history_max_bytes.max(MIN_HISTORY_MAX_BYTES)
    }

    pub fn history_keep_lines(&self) -> usize {
        self.history_keep_lines.max(MIN_HISTORY_KEEP_LINES)
    }
}

/// 执行引擎（HTTP）配置
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExecutionConfig {
    pub endpoint: String,
    pub timeout_seconds: u64,
}

impl Default for ExecutionConfig {
    fn default() -> Self {
        Self {
            endpoint: "http://127.0.0.1:8787/execute".to_string(),
            timeout_seconds: 120,
        }
    }
}

impl ExecutionConfig {
    pub fn validate(&self) -> Result<()> {
        if !(self.endpoint.starts_with("http://") || self.endpoint.starts_with("https://")) {
            return Err(anyhow::anyhow!("执行引擎地址无效: {}", self.endpoint));
        }
        if self.timeout_seconds == 0 {
            return Err(anyhow::anyhow!("执行超时时间必须大于0"));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ObservabilityConfig {
    pub log_level: String,
    /// Prometheus 指标监听地址，例如 `0.0.0.0:9464`；为空时不导出
    pub metrics_listen: Option<String>,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            metrics_listen: None,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub storage: StorageConfig,
    pub scheduler: SchedulerConfig,
    pub execution: ExecutionConfig,
    pub observability: ObservabilityConfig,
}

impl AppConfig {
    /// 加载顺序：TOML 文件 → `MISSIONS__*` 环境变量 → 扁平的 `SCHEDULER_*` 环境变量
    pub fn load(config_path: Option<&str>) -> Result<Self> {
        let mut builder = ConfigBuilder::builder();

        if let Some(path) = config_path {
            if Path::new(path).exists() {
                builder = builder.add_source(File::new(path, FileFormat::Toml));
            } else {
                return Err(anyhow::anyhow!("配置文件不存在: {}", path));
            }
        } else {
            let default_paths = ["config/missions.toml", "missions.toml"];
            if let Some(path) = default_paths.iter().find(|p| Path::new(p).exists()) {
                builder = builder.add_source(File::new(path, FileFormat::Toml));
            }
        }

        builder = builder.add_source(
            Environment::with_prefix("MISSIONS")
                .prefix_separator("__")
                .separator("__")
                .try_parsing(true),
        );

        let mut config: AppConfig = builder
            .build()
            .context("构建配置失败")?
            .try_deserialize()
            .context("反序列化配置失败")?;

        config.scheduler.apply_env_overrides();
        config.validate()?;

        Ok(config)
    }

    pub fn from_toml(toml_str: &str) -> Result<Self> {
        let config: AppConfig = toml::from_str(toml_str).context("解析TOML配置失败")?;
        config.validate()?;
        Ok(config)
    }

    pub fn to_toml(&self) -> Result<String> {
        toml::to_string_pretty(self).context("序列化配置为TOML失败")
    }

    pub fn validate(&self) -> Result<()> {
        self.storage.validate()?;
        self.execution.validate()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_from_toml_partial_sections_use_defaults() {
        let config = AppConfig::from_toml(
            r#"
            [storage]
            data_dir = "/var/lib/missions"

            [scheduler]
            max_runs_per_tick = 1
            "#,
        )
        .unwrap();

        assert_eq!(config.storage.data_dir, PathBuf::from("/var/lib/missions"));
        assert_eq!(config.storage.history_keep_lines, 1000);
        assert_eq!(config.scheduler.max_runs_per_tick, 1);
        assert_eq!(config.scheduler.max_retries, 3);
        assert_eq!(config.execution, ExecutionConfig::default());
    }

    #[test]
    fn test_invalid_endpoint_rejected() {
        let result = AppConfig::from_toml(
            r#"
            [execution]
            endpoint = "ftp://nowhere"
            "#,
        );
        assert!(result.is_err());
    }

    #[test]
    fn test_toml_round_trip() {
        let config = AppConfig::default();
        let text = config.to_toml().unwrap();
        assert_eq!(AppConfig::from_toml(&text).unwrap(), config);
    }

    #[test]
    fn test_load_from_file() {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        writeln!(file, "[scheduler]\ntick_interval_seconds = 45").unwrap();

        let config = AppConfig::load(file.path().to_str()).unwrap();
        assert_eq!(config.scheduler.tick_interval_seconds, 45);
    }

    #[test]
    fn test_load_missing_file_fails() {
        assert!(AppConfig::load(Some("/definitely/not/here.toml")).is_err());
    }

    #[test]
    fn test_storage_minimums() {
        let storage = StorageConfig {
            history_max_bytes: 10,
            history_keep_lines: 3,
            ..StorageConfig::default()
        };
        assert_eq!(storage.history_max_bytes(), MIN_HISTORY_MAX_BYTES);
        assert_eq!(storage.history_keep_lines(), MIN_HISTORY_KEEP_LINES);
    }
}
