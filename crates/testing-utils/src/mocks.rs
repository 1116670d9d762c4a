//! In-memory implementations of the storage and collaborator traits
//!
//! These doubles keep the same contracts as the file-backed stores
//! (compare-and-swap saves, chronological logs) so scheduler and service
//! tests exercise the real rules without touching the filesystem.

use async_trait::async_trait;
use mission_core::models::{
    DeadLetterRecord, ExecutionContext, ExecutionOutcome, JournalEntry, Mission, MissionSchedule,
    RunKeyHistory, RunRecord,
};
use mission_core::traits::{
    DeadLetterSink, ExecutionEngine, MissionRepository, OperationJournal, RunHistoryStore,
    ScheduleRepository,
};
use mission_core::{MissionError, MissionResult};
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::Duration;

fn check_version(stored: Option<u64>, expected: Option<u64>) -> MissionResult<()> {
    match (stored, expected) {
        (None, None) => Ok(()),
        (Some(actual), Some(expected)) if actual == expected => Ok(()),
        (Some(actual), expected) => Err(MissionError::VersionConflict {
            expected: expected.unwrap_or(0),
            actual,
        }),
        (None, Some(expected)) => Err(MissionError::VersionConflict {
            expected,
            actual: 0,
        }),
    }
}

/// In-memory mission store keyed by `(tenant, mission_id)`
#[derive(Debug, Clone, Default)]
pub struct InMemoryMissionRepository {
    missions: Arc<Mutex<HashMap<(String, String), Mission>>>,
}

impl InMemoryMissionRepository {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_missions(missions: Vec<Mission>) -> Self {
        let repo = Self::new();
        for mission in missions {
            repo.insert(mission);
        }
        repo
    }

    /// Insert or overwrite without a version check
    pub fn insert(&self, mission: Mission) {
        self.missions
            .lock()
            .unwrap()
            .insert((mission.user_id.clone(), mission.id.clone()), mission);
    }

    pub fn remove(&self, tenant_id: &str, mission_id: &str) {
        self.missions
            .lock()
            .unwrap()
            .remove(&(tenant_id.to_string(), mission_id.to_string()));
    }

    pub fn snapshot(&self, tenant_id: &str, mission_id: &str) -> Option<Mission> {
        self.missions
            .lock()
            .unwrap()
            .get(&(tenant_id.to_string(), mission_id.to_string()))
            .cloned()
    }

    pub fn count(&self) -> usize {
        self.missions.lock().unwrap().len()
    }
}

#[async_trait]
impl MissionRepository for InMemoryMissionRepository {
    async fn get(&self, tenant_id: &str, mission_id: &str) -> MissionResult<Option<Mission>> {
        Ok(self.snapshot(tenant_id, mission_id))
    }

    async fn save(&self, mission: &Mission, expected_version: Option<u64>) -> MissionResult<()> {
        let mut missions = self.missions.lock().unwrap();
        let key = (mission.user_id.clone(), mission.id.clone());
        check_version(missions.get(&key).map(|m| m.version), expected_version)?;
        missions.insert(key, mission.clone());
        Ok(())
    }

    async fn list(&self, tenant_id: &str) -> MissionResult<Vec<Mission>> {
        let missions = self.missions.lock().unwrap();
        let mut result: Vec<Mission> = missions
            .values()
            .filter(|m| m.user_id == tenant_id)
            .cloned()
            .collect();
        result.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(result)
    }
}

/// In-memory schedule store keyed by `(tenant, schedule_id)`
#[derive(Debug, Clone, Default)]
pub struct InMemoryScheduleRepository {
    schedules: Arc<Mutex<HashMap<(String, String), MissionSchedule>>>,
}

impl InMemoryScheduleRepository {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_schedules(schedules: Vec<MissionSchedule>) -> Self {
        let repo = Self::new();
        for schedule in schedules {
            repo.insert(schedule);
        }
        repo
    }

    pub fn insert(&self, schedule: MissionSchedule) {
        self.schedules
            .lock()
            .unwrap()
            .insert((schedule.user_id.clone(), schedule.id.clone()), schedule);
    }

    pub fn snapshot(&self, tenant_id: &str, schedule_id: &str) -> Option<MissionSchedule> {
        self.schedules
            .lock()
            .unwrap()
            .get(&(tenant_id.to_string(), schedule_id.to_string()))
            .cloned()
    }

    pub fn all(&self) -> Vec<MissionSchedule> {
        self.schedules.lock().unwrap().values().cloned().collect()
    }
}

#[async_trait]
impl ScheduleRepository for InMemoryScheduleRepository {
    async fn list_enabled(&self) -> MissionResult<Vec<MissionSchedule>> {
        Ok(self.all().into_iter().filter(|s| s.enabled).collect())
    }

    async fn get(
        &self,
        tenant_id: &str,
        schedule_id: &str,
    ) -> MissionResult<Option<MissionSchedule>> {
        Ok(self.snapshot(tenant_id, schedule_id))
    }

    async fn find_by_mission(
        &self,
        tenant_id: &str,
        mission_id: &str,
    ) -> MissionResult<Option<MissionSchedule>> {
        let schedules = self.schedules.lock().unwrap();
        Ok(schedules
            .values()
            .find(|s| s.user_id == tenant_id && s.mission_id == mission_id)
            .cloned())
    }

    async fn save(
        &self,
        schedule: &MissionSchedule,
        expected_version: Option<u64>,
    ) -> MissionResult<()> {
        let mut schedules = self.schedules.lock().unwrap();
        let key = (schedule.user_id.clone(), schedule.id.clone());
        check_version(schedules.get(&key).map(|s| s.version), expected_version)?;
        schedules.insert(key, schedule.clone());
        Ok(())
    }
}

/// Append-only run history kept in insertion order; appends can be made to fail
#[derive(Debug, Clone, Default)]
pub struct InMemoryRunHistory {
    records: Arc<Mutex<Vec<RunRecord>>>,
    fail_appends: Arc<Mutex<bool>>,
}

impl InMemoryRunHistory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn records(&self) -> Vec<RunRecord> {
        self.records.lock().unwrap().clone()
    }

    pub fn records_for(&self, schedule_id: &str) -> Vec<RunRecord> {
        self.records()
            .into_iter()
            .filter(|r| r.schedule_id == schedule_id)
            .collect()
    }

    /// Make every subsequent append return a storage error
    pub fn fail_appends(&self, fail: bool) {
        *self.fail_appends.lock().unwrap() = fail;
    }
}

#[async_trait]
impl RunHistoryStore for InMemoryRunHistory {
    async fn append(&self, record: &RunRecord) -> MissionResult<()> {
        if *self.fail_appends.lock().unwrap() {
            return Err(MissionError::Storage("run history unavailable".to_string()));
        }
        self.records.lock().unwrap().push(record.clone());
        Ok(())
    }

    async fn run_key_history(
        &self,
        tenant_id: &str,
        schedule_id: &str,
        run_key: &str,
    ) -> MissionResult<RunKeyHistory> {
        let records = self.records.lock().unwrap();
        Ok(RunKeyHistory::from_records(
            run_key,
            records
                .iter()
                .filter(|r| r.tenant_id == tenant_id && r.schedule_id == schedule_id),
        ))
    }

    async fn recent(
        &self,
        tenant_id: &str,
        schedule_id: &str,
        limit: usize,
    ) -> MissionResult<Vec<RunRecord>> {
        let records = self.records.lock().unwrap();
        let matching: Vec<RunRecord> = records
            .iter()
            .filter(|r| r.tenant_id == tenant_id && r.schedule_id == schedule_id)
            .cloned()
            .collect();
        let skip = matching.len().saturating_sub(limit);
        Ok(matching.into_iter().skip(skip).collect())
    }
}

/// Operation journal double; can be switched into a failing mode
#[derive(Debug, Clone, Default)]
pub struct InMemoryOperationJournal {
    entries: Arc<Mutex<Vec<JournalEntry>>>,
    fail_appends: Arc<Mutex<bool>>,
}

impl InMemoryOperationJournal {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn all(&self) -> Vec<JournalEntry> {
        self.entries.lock().unwrap().clone()
    }

    /// Make every subsequent append return a storage error
    pub fn fail_appends(&self, fail: bool) {
        *self.fail_appends.lock().unwrap() = fail;
    }
}

#[async_trait]
impl OperationJournal for InMemoryOperationJournal {
    async fn append(&self, entry: &JournalEntry) -> MissionResult<()> {
        if *self.fail_appends.lock().unwrap() {
            return Err(MissionError::Storage("journal unavailable".to_string()));
        }
        self.entries.lock().unwrap().push(entry.clone());
        Ok(())
    }

    async fn entries(
        &self,
        tenant_id: &str,
        mission_id: Option<&str>,
        limit: usize,
    ) -> MissionResult<Vec<JournalEntry>> {
        let entries = self.entries.lock().unwrap();
        let matching: Vec<JournalEntry> = entries
            .iter()
            .filter(|e| e.tenant_id == tenant_id)
            .filter(|e| mission_id.map_or(true, |id| e.mission_id == id))
            .cloned()
            .collect();
        let skip = matching.len().saturating_sub(limit);
        Ok(matching.into_iter().skip(skip).collect())
    }
}

/// Dead-letter sink that keeps every record for assertions
#[derive(Debug, Clone, Default)]
pub struct RecordingDeadLetterSink {
    records: Arc<Mutex<Vec<DeadLetterRecord>>>,
}

impl RecordingDeadLetterSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn records(&self) -> Vec<DeadLetterRecord> {
        self.records.lock().unwrap().clone()
    }
}

impl DeadLetterSink for RecordingDeadLetterSink {
    fn record(&self, record: DeadLetterRecord) {
        self.records.lock().unwrap().push(record);
    }
}

/// A scripted response for one execution call
#[derive(Debug, Clone)]
pub enum ScriptedRun {
    Outcome(ExecutionOutcome),
    /// The engine returns `Err(MissionError::Execution)`
    Fail(String),
    /// The engine panics while executing
    Panic(String),
    /// Sleep before returning the outcome
    Delayed(Duration, ExecutionOutcome),
}

/// A call observed by [`ScriptedExecutionEngine`]
#[derive(Debug, Clone)]
pub struct ExecutionCall {
    pub mission_id: String,
    pub context: ExecutionContext,
}

/// Execution engine returning scripted results per mission
///
/// Missions without a queued script get the default outcome (success).
#[derive(Debug, Clone)]
pub struct ScriptedExecutionEngine {
    scripts: Arc<Mutex<HashMap<String, VecDeque<ScriptedRun>>>>,
    default: Arc<Mutex<ScriptedRun>>,
    calls: Arc<Mutex<Vec<ExecutionCall>>>,
}

impl Default for ScriptedExecutionEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl ScriptedExecutionEngine {
    pub fn new() -> Self {
        Self {
            scripts: Arc::new(Mutex::new(HashMap::new())),
            default: Arc::new(Mutex::new(ScriptedRun::Outcome(ExecutionOutcome::success()))),
            calls: Arc::new(Mutex::new(Vec::new())),
        }
    }

    pub fn push(&self, mission_id: &str, run: ScriptedRun) {
        self.scripts
            .lock()
            .unwrap()
            .entry(mission_id.to_string())
            .or_default()
            .push_back(run);
    }

    pub fn set_default(&self, run: ScriptedRun) {
        *self.default.lock().unwrap() = run;
    }

    pub fn calls(&self) -> Vec<ExecutionCall> {
        self.calls.lock().unwrap().clone()
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().unwrap().len()
    }

    pub fn calls_for(&self, mission_id: &str) -> Vec<ExecutionCall> {
        self.calls()
            .into_iter()
            .filter(|c| c.mission_id == mission_id)
            .collect()
    }

    fn next_run(&self, mission_id: &str) -> ScriptedRun {
        let scripted = self
            .scripts
            .lock()
            .unwrap()
            .get_mut(mission_id)
            .and_then(VecDeque::pop_front);
        scripted.unwrap_or_else(|| self.default.lock().unwrap().clone())
    }
}

#[async_trait]
impl ExecutionEngine for ScriptedExecutionEngine {
    async fn execute(
        &self,
        mission: &Mission,
        context: &ExecutionContext,
    ) -> MissionResult<ExecutionOutcome> {
        self.calls.lock().unwrap().push(ExecutionCall {
            mission_id: mission.id.clone(),
            context: context.clone(),
        });

        match self.next_run(&mission.id) {
            ScriptedRun::Outcome(outcome) => Ok(outcome),
            ScriptedRun::Fail(reason) => Err(MissionError::Execution(reason)),
            ScriptedRun::Panic(message) => panic!("{}", message),
            ScriptedRun::Delayed(delay, outcome) => {
                tokio::time::sleep(delay).await;
                Ok(outcome)
            }
        }
    }
}
