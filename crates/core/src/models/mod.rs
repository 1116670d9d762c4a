//! # 数据模型
//!
//! 任务编排核心的数据结构：版本化的任务文档、图变更操作、调度记录、
//! 运行日志行、操作日志行以及执行引擎的输入输出。
//!
//! 所有模型都实现了 `serde` 序列化，JSON 字段统一使用 camelCase，
//! 与运行日志 / 操作日志的 JSON-lines 文件格式一致。

pub mod diff;
pub mod execution;
pub mod journal;
pub mod mission;
pub mod run_record;
pub mod schedule;

pub use diff::*;
pub use execution::*;
pub use journal::*;
pub use mission::*;
pub use run_record::*;
pub use schedule::*;
