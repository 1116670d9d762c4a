//! 死信文件：`<root>/<tenant>.jsonl`
//!
//! `record` 在调度 tick 中同步调用，实际写入放到后台任务里完成。
//! 进程退出前调用 [`FileDeadLetterSink::flush`] 等待尚未完成的写入。

use std::path::PathBuf;
use std::sync::{Arc, Mutex};

use tokio::runtime::Handle;
use tokio::task::JoinHandle;
use tracing::{debug, error, warn};

use mission_core::models::DeadLetterRecord;
use mission_core::traits::DeadLetterSink;

use crate::jsonl::{encode_component, JsonlWriter};
use crate::observability::StructuredLogger;

pub struct FileDeadLetterSink {
    root: PathBuf,
    writer: Arc<JsonlWriter>,
    pending: Mutex<Vec<JoinHandle<()>>>,
}

impl FileDeadLetterSink {
    pub fn new(root: impl Into<PathBuf>, writer: Arc<JsonlWriter>) -> Self {
        Self {
            root: root.into(),
            writer,
            pending: Mutex::new(Vec::new()),
        }
    }

    pub fn path_for(&self, tenant_id: &str) -> PathBuf {
        self.root
            .join(format!("{}.jsonl", encode_component(tenant_id)))
    }

    /// 等待所有已提交的死信写入完成
    pub async fn flush(&self) {
        let handles = match self.pending.lock() {
            Ok(mut pending) => std::mem::take(&mut *pending),
            Err(poisoned) => std::mem::take(&mut *poisoned.into_inner()),
        };
        if handles.is_empty() {
            return;
        }
        debug!("等待 {} 条死信写入完成", handles.len());
        for handle in handles {
            if let Err(e) = handle.await {
                error!("死信写入任务异常结束: {}", e);
            }
        }
    }

    fn track(&self, handle: JoinHandle<()>) {
        let mut pending = match self.pending.lock() {
            Ok(pending) => pending,
            Err(poisoned) => poisoned.into_inner(),
        };
        pending.retain(|h| !h.is_finished());
        pending.push(handle);
    }
}

impl DeadLetterSink for FileDeadLetterSink {
    fn record(&self, record: DeadLetterRecord) {
        StructuredLogger::log_dead_letter_recorded(&record);

        let Ok(handle) = Handle::try_current() else {
            warn!(
                "没有可用的运行时，死信记录未落盘: schedule={} run_key={}",
                record.schedule_id, record.run_key
            );
            return;
        };

        let path = self.path_for(&record.tenant_id);
        let writer = self.writer.clone();
        let task = handle.spawn(async move {
            if let Err(e) = writer.append(&path, &record).await {
                error!(
                    "写入死信失败 {}: schedule={} run_key={} error={}",
                    path.display(),
                    record.schedule_id,
                    record.run_key,
                    e
                );
            }
        });
        self.track(task);
    }
}
