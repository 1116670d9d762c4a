//! 配置模型
//!
//! - [`AppConfig`]：由 `config` crate 从 TOML 文件和环境变量组装
//! - [`SchedulerConfig`]：调度器可调参数，使用前必须经过 `clamped()`

pub mod app_config;
pub mod scheduler;

pub use app_config::*;
pub use scheduler::*;
