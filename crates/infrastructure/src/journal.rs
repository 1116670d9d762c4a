//! 操作日志：`<root>/<tenant>.jsonl`，每次差量应用一行

use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;

use mission_core::models::JournalEntry;
use mission_core::traits::OperationJournal;
use mission_core::MissionResult;

use crate::jsonl::{self, encode_component, JsonlWriter};

pub struct FileOperationJournal {
    root: PathBuf,
    writer: Arc<JsonlWriter>,
}

impl FileOperationJournal {
    pub fn new(root: impl Into<PathBuf>, writer: Arc<JsonlWriter>) -> Self {
        Self {
            root: root.into(),
            writer,
        }
    }

    pub fn path_for(&self, tenant_id: &str) -> PathBuf {
        self.root
            .join(format!("{}.jsonl", encode_component(tenant_id)))
    }
}

#[async_trait]
impl OperationJournal for FileOperationJournal {
    async fn append(&self, entry: &JournalEntry) -> MissionResult<()> {
        self.writer
            .append(&self.path_for(&entry.tenant_id), entry)
            .await
    }

    async fn entries(
        &self,
        tenant_id: &str,
        mission_id: Option<&str>,
        limit: usize,
    ) -> MissionResult<Vec<JournalEntry>> {
        let path = self.path_for(tenant_id);
        let lines = jsonl::read_lines(&path).await?;
        let mut entries: Vec<JournalEntry> = jsonl::parse_lines(&path, &lines);
        entries.retain(|entry| {
            entry.tenant_id == tenant_id && mission_id.map_or(true, |id| entry.mission_id == id)
        });
        let skip = entries.len().saturating_sub(limit);
        entries.drain(..skip);
        Ok(entries)
    }
}
