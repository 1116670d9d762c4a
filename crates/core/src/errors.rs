use thiserror::Error;

/// 任务编排核心错误类型定义
///
/// 图变更的校验问题不会走这里，而是以 `DiffIssue` 的形式随 `ApplyResult` 返回。
#[derive(Debug, Error)]
pub enum MissionError {
    #[error("任务未找到: {id}")]
    MissionNotFound { id: String },

    #[error("调度未找到: {id}")]
    ScheduleNotFound { id: String },

    #[error("版本冲突: 期望版本 {expected}, 实际版本 {actual}")]
    VersionConflict { expected: u64, actual: u64 },

    #[error("IO错误: {0}")]
    Io(#[from] std::io::Error),

    #[error("序列化错误: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("存储错误: {0}")]
    Storage(String),

    #[error("配置错误: {0}")]
    Configuration(String),

    #[error("执行引擎错误: {0}")]
    Execution(String),

    #[error("无效的触发器配置: {0}")]
    InvalidTrigger(String),

    #[error("内部错误: {0}")]
    Internal(String),
}

impl MissionError {
    /// 版本冲突可以通过重新读取后重试来解决，其余错误不行
    pub fn is_version_conflict(&self) -> bool {
        matches!(self, MissionError::VersionConflict { .. })
    }
}

/// 统一的Result类型
pub type MissionResult<T> = std::result::Result<T, MissionError>;
