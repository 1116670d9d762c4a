//! 数据目录布局
//!
//! ```text
//! <data_dir>/
//!   missions/<tenant>/<mission>.json
//!   schedules/<tenant>/<schedule>.json
//!   run-history/<tenant>/<schedule>.jsonl
//!   journal/<tenant>.jsonl
//!   dead-letters/<tenant>.jsonl
//! ```

use std::path::Path;
use std::sync::Arc;

use mission_core::config::{SchedulerConfig, StorageConfig};

use crate::dead_letter::FileDeadLetterSink;
use crate::journal::FileOperationJournal;
use crate::jsonl::JsonlWriter;
use crate::mission_store::{FileMissionRepository, FileScheduleRepository};
use crate::run_history::{FileRunHistoryStore, RunHistoryLimits};

/// 共享同一个写入队列的全部文件存储
pub struct FileStorage {
    pub missions: Arc<FileMissionRepository>,
    pub schedules: Arc<FileScheduleRepository>,
    pub run_history: Arc<FileRunHistoryStore>,
    pub journal: Arc<FileOperationJournal>,
    pub dead_letters: Arc<FileDeadLetterSink>,
}

impl FileStorage {
    pub fn open(storage: &StorageConfig, scheduler: &SchedulerConfig) -> Self {
        let root: &Path = &storage.data_dir;
        let writer = Arc::new(JsonlWriter::new());
        let limits = RunHistoryLimits {
            scan_lines: scheduler.clamped().history_scan_lines,
            max_bytes: storage.history_max_bytes(),
            keep_lines: storage.history_keep_lines(),
        };

        Self {
            missions: Arc::new(FileMissionRepository::new(
                root.join("missions"),
                writer.clone(),
            )),
            schedules: Arc::new(FileScheduleRepository::new(
                root.join("schedules"),
                writer.clone(),
            )),
            run_history: Arc::new(FileRunHistoryStore::new(
                root.join("run-history"),
                writer.clone(),
                limits,
            )),
            journal: Arc::new(FileOperationJournal::new(root.join("journal"), writer.clone())),
            dead_letters: Arc::new(FileDeadLetterSink::new(root.join("dead-letters"), writer)),
        }
    }
}
