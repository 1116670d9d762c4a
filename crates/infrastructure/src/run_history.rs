//! 基于 JSON Lines 文件的运行历史
//!
//! 布局：`<root>/<tenant>/<schedule>.jsonl`。旧版本把日志写在
//! `<root>/<schedule>.jsonl`，首次访问时把属于该租户的行迁移到新路径。
//!
//! 查询只扫描末尾 `scan_lines` 行；文件超过 `max_bytes` 后轮转，
//! 保留最近 `keep_lines` 行，以及与最新一行同一个 runKey 的所有更早记录，
//! 保证进行中的 runKey 的尝试次数不会因为轮转而丢失。

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use tokio::fs;
use tracing::{debug, info, warn};

use mission_core::models::{RunKeyHistory, RunRecord};
use mission_core::traits::RunHistoryStore;
use mission_core::{MissionError, MissionResult};

use crate::jsonl::{self, encode_component, JsonlWriter};

#[derive(Debug, Clone, Copy)]
pub struct RunHistoryLimits {
    pub scan_lines: usize,
    pub max_bytes: u64,
    pub keep_lines: usize,
}

pub struct FileRunHistoryStore {
    root: PathBuf,
    writer: Arc<JsonlWriter>,
    limits: RunHistoryLimits,
    migrated: Mutex<HashSet<PathBuf>>,
}

impl FileRunHistoryStore {
    pub fn new(root: impl Into<PathBuf>, writer: Arc<JsonlWriter>, limits: RunHistoryLimits) -> Self {
        Self {
            root: root.into(),
            writer,
            limits,
            migrated: Mutex::new(HashSet::new()),
        }
    }

    pub fn path_for(&self, tenant_id: &str, schedule_id: &str) -> PathBuf {
        self.root
            .join(encode_component(tenant_id))
            .join(format!("{}.jsonl", encode_component(schedule_id)))
    }

    fn legacy_path_for(&self, schedule_id: &str) -> PathBuf {
        self.root
            .join(format!("{}.jsonl", encode_component(schedule_id)))
    }

    /// 已迁移的路径会被缓存，后续访问不再检查旧文件
    async fn ensure_migrated(&self, tenant_id: &str, schedule_id: &str) -> MissionResult<PathBuf> {
        let path = self.path_for(tenant_id, schedule_id);
        if self.is_migrated(&path)? {
            return Ok(path);
        }

        let legacy = self.legacy_path_for(schedule_id);
        // 锁住旧文件：多个租户可能争用同一个旧文件
        let _legacy_guard = self.writer.lock(&legacy).await?;
        let _guard = self.writer.lock(&path).await?;

        let legacy_lines = jsonl::read_lines(&legacy).await?;
        if !legacy_lines.is_empty() {
            let (mine, others): (Vec<String>, Vec<String>) = legacy_lines
                .into_iter()
                .partition(|line| line_belongs_to(line, tenant_id));

            if !mine.is_empty() {
                let mut merged = mine;
                let moved = merged.len();
                // 旧文件中的记录更早，放在前面
                merged.extend(jsonl::read_lines(&path).await?);
                jsonl::rewrite_lines(&path, &merged).await?;
                info!(
                    "迁移运行历史: {} -> {} ({} 行)",
                    legacy.display(),
                    path.display(),
                    moved
                );
            }

            if others.is_empty() {
                fs::remove_file(&legacy).await?;
            } else {
                jsonl::rewrite_lines(&legacy, &others).await?;
            }
        }

        self.migrated
            .lock()
            .map_err(|e| MissionError::Internal(format!("迁移状态锁已损坏: {e}")))?
            .insert(path.clone());
        Ok(path)
    }

    fn is_migrated(&self, path: &Path) -> MissionResult<bool> {
        Ok(self
            .migrated
            .lock()
            .map_err(|e| MissionError::Internal(format!("迁移状态锁已损坏: {e}")))?
            .contains(path))
    }

    async fn scan(&self, tenant_id: &str, schedule_id: &str) -> MissionResult<Vec<RunRecord>> {
        let path = self.ensure_migrated(tenant_id, schedule_id).await?;
        let lines = jsonl::tail_lines(&path, self.limits.scan_lines).await?;
        let mut records: Vec<RunRecord> = jsonl::parse_lines(&path, &lines);
        records.retain(|r| r.tenant_id == tenant_id && r.schedule_id == schedule_id);
        Ok(records)
    }

    /// 超过大小阈值时轮转，调用方持有该路径的锁
    async fn rotate_if_needed(&self, path: &Path) -> MissionResult<()> {
        if jsonl::file_len(path).await? <= self.limits.max_bytes {
            return Ok(());
        }
        let lines = jsonl::read_lines(path).await?;
        let kept = retain_for_rotation(path, lines, self.limits.keep_lines);
        jsonl::rewrite_lines(path, &kept).await?;
        debug!("运行历史已轮转: {} 保留 {} 行", path.display(), kept.len());
        Ok(())
    }
}

fn line_belongs_to(line: &str, tenant_id: &str) -> bool {
    match serde_json::from_str::<RunRecord>(line) {
        Ok(record) => record.tenant_id == tenant_id,
        // 无法解析的行没有归属，随第一个迁移的租户一起移走
        Err(_) => true,
    }
}

/// 保留最近 `keep_lines` 行，以及与最新记录同一 runKey 的更早行
fn retain_for_rotation(path: &Path, lines: Vec<String>, keep_lines: usize) -> Vec<String> {
    if lines.len() <= keep_lines {
        return lines;
    }
    let newest_key = lines
        .iter()
        .rev()
        .find_map(|line| serde_json::from_str::<RunRecord>(line).ok())
        .map(|record| record.run_key);

    let cutoff = lines.len() - keep_lines;
    let mut kept = Vec::with_capacity(keep_lines + 8);
    for (index, line) in lines.into_iter().enumerate() {
        if index >= cutoff {
            kept.push(line);
            continue;
        }
        let same_key = match (&newest_key, serde_json::from_str::<RunRecord>(&line)) {
            (Some(key), Ok(record)) => record.run_key == *key,
            _ => false,
        };
        if same_key {
            kept.push(line);
        }
    }
    if kept.is_empty() {
        warn!("轮转后运行历史为空: {}", path.display());
    }
    kept
}

#[async_trait]
impl RunHistoryStore for FileRunHistoryStore {
    async fn append(&self, record: &RunRecord) -> MissionResult<()> {
        let path = self
            .ensure_migrated(&record.tenant_id, &record.schedule_id)
            .await?;
        let _guard = self.writer.lock(&path).await?;
        jsonl::append_unlocked(&path, record).await?;
        if let Err(e) = self.rotate_if_needed(&path).await {
            warn!("运行历史轮转失败 {}: {}", path.display(), e);
        }
        Ok(())
    }

    async fn run_key_history(
        &self,
        tenant_id: &str,
        schedule_id: &str,
        run_key: &str,
    ) -> MissionResult<RunKeyHistory> {
        let records = self.scan(tenant_id, schedule_id).await?;
        Ok(RunKeyHistory::from_records(run_key, &records))
    }

    async fn recent(
        &self,
        tenant_id: &str,
        schedule_id: &str,
        limit: usize,
    ) -> MissionResult<Vec<RunRecord>> {
        let mut records = self.scan(tenant_id, schedule_id).await?;
        let skip = records.len().saturating_sub(limit);
        records.drain(..skip);
        Ok(records)
    }
}
