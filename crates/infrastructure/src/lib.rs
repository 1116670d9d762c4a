pub mod dead_letter;
pub mod http_execution;
pub mod journal;
pub mod jsonl;
pub mod mission_store;
pub mod observability;
pub mod run_history;
pub mod storage;

pub use dead_letter::FileDeadLetterSink;
pub use http_execution::HttpExecutionEngine;
pub use journal::FileOperationJournal;
pub use jsonl::JsonlWriter;
pub use mission_store::{FileMissionRepository, FileScheduleRepository};
pub use observability::*;
pub use run_history::{FileRunHistoryStore, RunHistoryLimits};
pub use storage::FileStorage;
