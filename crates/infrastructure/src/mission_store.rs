//! 基于 JSON 文件的任务和调度仓储
//!
//! 每个文档一个文件：`<root>/<tenant>/<id>.json`。写入在路径锁内比较版本号，
//! 一致时以临时文件 + 改名的方式落盘，实现比较并交换语义。

use std::marker::PhantomData;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::Serialize;
use tokio::fs;
use tracing::{debug, warn};

use mission_core::models::{Mission, MissionSchedule};
use mission_core::traits::{MissionRepository, ScheduleRepository};
use mission_core::{MissionError, MissionResult};

use crate::jsonl::{self, encode_component, JsonlWriter};

trait Document {
    fn version(&self) -> u64;
    fn tenant_id(&self) -> &str;
}

impl Document for Mission {
    fn version(&self) -> u64 {
        self.version
    }

    fn tenant_id(&self) -> &str {
        &self.user_id
    }
}

impl Document for MissionSchedule {
    fn version(&self) -> u64 {
        self.version
    }

    fn tenant_id(&self) -> &str {
        &self.user_id
    }
}

struct DocumentStore<T> {
    root: PathBuf,
    writer: Arc<JsonlWriter>,
    _marker: PhantomData<fn() -> T>,
}

impl<T> DocumentStore<T>
where
    T: Serialize + DeserializeOwned + Document,
{
    fn new(root: PathBuf, writer: Arc<JsonlWriter>) -> Self {
        Self {
            root,
            writer,
            _marker: PhantomData,
        }
    }

    fn tenant_dir(&self, tenant_id: &str) -> PathBuf {
        self.root.join(encode_component(tenant_id))
    }

    fn path_for(&self, tenant_id: &str, id: &str) -> PathBuf {
        self.tenant_dir(tenant_id)
            .join(format!("{}.json", encode_component(id)))
    }

    async fn read(&self, path: &Path) -> MissionResult<Option<T>> {
        match fs::read(path).await {
            Ok(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    /// 文档里记录的租户必须与请求的租户一致，否则视为不存在
    async fn get(&self, tenant_id: &str, id: &str) -> MissionResult<Option<T>> {
        let path = self.path_for(tenant_id, id);
        Ok(self
            .read(&path)
            .await?
            .filter(|doc| owned_by(doc, tenant_id, &path)))
    }

    async fn save(
        &self,
        tenant_id: &str,
        id: &str,
        document: &T,
        expected_version: Option<u64>,
    ) -> MissionResult<()> {
        let path = self.path_for(tenant_id, id);
        let _guard = self.writer.lock(&path).await?;

        let stored = match self.read(&path).await? {
            Some(doc) if doc.tenant_id() != tenant_id => {
                return Err(MissionError::Storage(format!(
                    "文档 {} 属于其他租户",
                    path.display()
                )))
            }
            other => other.map(|doc| doc.version()),
        };
        match (stored, expected_version) {
            (None, None) => {}
            (Some(actual), Some(expected)) if actual == expected => {}
            (actual, expected) => {
                return Err(MissionError::VersionConflict {
                    expected: expected.unwrap_or(0),
                    actual: actual.unwrap_or(0),
                })
            }
        }

        let bytes = serde_json::to_vec_pretty(document)?;
        jsonl::write_atomic(&path, &bytes).await?;
        debug!("写入文档 {} (版本 {})", path.display(), document.version());
        Ok(())
    }

    async fn list_dir(&self, dir: PathBuf) -> MissionResult<Vec<T>> {
        let mut entries = match fs::read_dir(&dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };

        let mut documents = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if path.extension().and_then(|ext| ext.to_str()) != Some("json") {
                continue;
            }
            match self.read(&path).await {
                Ok(Some(doc)) => documents.push(doc),
                Ok(None) => {}
                Err(e) => warn!("跳过无法读取的文档 {}: {}", path.display(), e),
            }
        }
        Ok(documents)
    }

    async fn list_tenant(&self, tenant_id: &str) -> MissionResult<Vec<T>> {
        let dir = self.tenant_dir(tenant_id);
        let mut documents = self.list_dir(dir.clone()).await?;
        documents.retain(|doc| owned_by(doc, tenant_id, &dir));
        Ok(documents)
    }

    async fn list_all(&self) -> MissionResult<Vec<T>> {
        let mut tenants = match fs::read_dir(&self.root).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };

        let mut documents = Vec::new();
        while let Some(entry) = tenants.next_entry().await? {
            if entry.file_type().await?.is_dir() {
                documents.extend(self.list_dir(entry.path()).await?);
            }
        }
        Ok(documents)
    }
}

fn owned_by<T: Document>(doc: &T, tenant_id: &str, path: &Path) -> bool {
    if doc.tenant_id() == tenant_id {
        return true;
    }
    warn!(
        "忽略租户不匹配的文档 {}: 期望 {}, 实际 {}",
        path.display(),
        tenant_id,
        doc.tenant_id()
    );
    false
}

/// 任务文档仓储：`<root>/<tenant>/<mission>.json`
pub struct FileMissionRepository {
    store: DocumentStore<Mission>,
}

impl FileMissionRepository {
    pub fn new(root: impl Into<PathBuf>, writer: Arc<JsonlWriter>) -> Self {
        Self {
            store: DocumentStore::new(root.into(), writer),
        }
    }
}

#[async_trait]
impl MissionRepository for FileMissionRepository {
    async fn get(&self, tenant_id: &str, mission_id: &str) -> MissionResult<Option<Mission>> {
        self.store.get(tenant_id, mission_id).await
    }

    async fn save(&self, mission: &Mission, expected_version: Option<u64>) -> MissionResult<()> {
        self.store
            .save(&mission.user_id, &mission.id, mission, expected_version)
            .await
    }

    async fn list(&self, tenant_id: &str) -> MissionResult<Vec<Mission>> {
        let mut missions = self.store.list_tenant(tenant_id).await?;
        missions.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(missions)
    }
}

/// 调度记录仓储：`<root>/<tenant>/<schedule>.json`
pub struct FileScheduleRepository {
    store: DocumentStore<MissionSchedule>,
}

impl FileScheduleRepository {
    pub fn new(root: impl Into<PathBuf>, writer: Arc<JsonlWriter>) -> Self {
        Self {
            store: DocumentStore::new(root.into(), writer),
        }
    }
}

#[async_trait]
impl ScheduleRepository for FileScheduleRepository {
    async fn list_enabled(&self) -> MissionResult<Vec<MissionSchedule>> {
        let mut schedules = self.store.list_all().await?;
        schedules.retain(|s| s.enabled);
        Ok(schedules)
    }

    async fn get(
        &self,
        tenant_id: &str,
        schedule_id: &str,
    ) -> MissionResult<Option<MissionSchedule>> {
        self.store.get(tenant_id, schedule_id).await
    }

    async fn find_by_mission(
        &self,
        tenant_id: &str,
        mission_id: &str,
    ) -> MissionResult<Option<MissionSchedule>> {
        let schedules = self.store.list_tenant(tenant_id).await?;
        Ok(schedules.into_iter().find(|s| s.mission_id == mission_id))
    }

    async fn save(
        &self,
        schedule: &MissionSchedule,
        expected_version: Option<u64>,
    ) -> MissionResult<()> {
        self.store
            .save(&schedule.user_id, &schedule.id, schedule, expected_version)
            .await
    }
}
