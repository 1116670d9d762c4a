use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use mission_core::config::ExecutionConfig;
use mission_core::models::{
    DeadLetterRecord, ExecutionContext, ExecutionOutcome, JournalEntry, RunSource, TriggerMode,
};
use mission_core::traits::{
    DeadLetterSink, ExecutionEngine, MissionRepository, OperationJournal, ScheduleRepository,
};
use mission_core::MissionError;
use mission_infrastructure::{
    jsonl, FileDeadLetterSink, FileMissionRepository, FileOperationJournal,
    FileScheduleRepository, HttpExecutionEngine, JsonlWriter,
};
use mission_testing_utils::{MissionBuilder, ScheduleBuilder, TestEnv};
use tempfile::TempDir;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;

#[tokio::test]
async fn test_mission_repository_compare_and_swap() {
    let dir = TempDir::new().unwrap();
    let repo = FileMissionRepository::new(dir.path(), Arc::new(JsonlWriter::new()));
    let mut mission = MissionBuilder::new("m1", "tenant-a").with_linear_graph().build();

    repo.save(&mission, None).await.unwrap();
    // 已存在时再次新建视为冲突
    assert!(repo.save(&mission, None).await.unwrap_err().is_version_conflict());

    mission.bump_version(Utc::now());
    repo.save(&mission, Some(1)).await.unwrap();

    let err = repo.save(&mission, Some(1)).await.unwrap_err();
    assert!(matches!(
        err,
        MissionError::VersionConflict {
            expected: 1,
            actual: 2
        }
    ));

    let stored = repo.get("tenant-a", "m1").await.unwrap().unwrap();
    assert_eq!(stored, mission);
    assert!(repo.get("tenant-b", "m1").await.unwrap().is_none());
    assert_eq!(repo.list("tenant-a").await.unwrap().len(), 1);
    assert!(repo.list("nobody").await.unwrap().is_empty());
}

#[tokio::test]
async fn test_schedule_repository_lists_enabled_across_tenants() {
    let dir = TempDir::new().unwrap();
    let repo = FileScheduleRepository::new(dir.path(), Arc::new(JsonlWriter::new()));

    repo.save(&ScheduleBuilder::new("s1", "tenant-a", "m1").build(), None)
        .await
        .unwrap();
    repo.save(&ScheduleBuilder::new("s2", "tenant-b", "m2").build(), None)
        .await
        .unwrap();
    repo.save(
        &ScheduleBuilder::new("s3", "tenant-b", "m3")
            .with_enabled(false)
            .build(),
        None,
    )
    .await
    .unwrap();

    let mut ids: Vec<String> = repo
        .list_enabled()
        .await
        .unwrap()
        .into_iter()
        .map(|s| s.id)
        .collect();
    ids.sort();
    assert_eq!(ids, vec!["s1", "s2"]);

    let found = repo.find_by_mission("tenant-b", "m3").await.unwrap().unwrap();
    assert_eq!(found.id, "s3");
    assert!(repo.find_by_mission("tenant-a", "m3").await.unwrap().is_none());
}

fn journal_entry(tenant: &str, mission: &str, ok: bool) -> JournalEntry {
    JournalEntry {
        ts: Utc::now(),
        tenant_id: tenant.to_string(),
        mission_id: mission.to_string(),
        actor: "user:alice".to_string(),
        expected_version: Some(1),
        previous_version: 1,
        next_version: ok.then_some(2),
        ok,
        operation_count: 0,
        issue_count: 0,
        operations: Vec::new(),
        issues: Vec::new(),
    }
}

#[tokio::test]
async fn test_journal_is_scoped_per_tenant() {
    let dir = TempDir::new().unwrap();
    let journal = FileOperationJournal::new(dir.path(), Arc::new(JsonlWriter::new()));

    journal.append(&journal_entry("tenant-a", "m1", true)).await.unwrap();
    journal.append(&journal_entry("tenant-a", "m2", false)).await.unwrap();
    journal.append(&journal_entry("tenant-a", "m1", false)).await.unwrap();
    journal.append(&journal_entry("tenant-b", "m1", true)).await.unwrap();

    let all = journal.entries("tenant-a", None, 10).await.unwrap();
    assert_eq!(all.len(), 3);

    let m1 = journal.entries("tenant-a", Some("m1"), 10).await.unwrap();
    assert_eq!(m1.iter().map(|e| e.ok).collect::<Vec<_>>(), vec![true, false]);

    let latest = journal.entries("tenant-a", None, 1).await.unwrap();
    assert_eq!(latest[0].mission_id, "m1");
    assert!(!latest[0].ok);

    assert!(dir.path().join("tenant-b.jsonl").exists());
}

#[tokio::test]
async fn test_lookalike_tenant_ids_stay_isolated() {
    let dir = TempDir::new().unwrap();
    let writer = Arc::new(JsonlWriter::new());
    let missions = FileMissionRepository::new(dir.path().join("missions"), writer.clone());

    let slash = MissionBuilder::new("m1", "acme/ops").with_label("slash").build();
    missions.save(&slash, None).await.unwrap();

    assert!(missions.get("acme_ops", "m1").await.unwrap().is_none());
    assert!(missions.list("acme_ops").await.unwrap().is_empty());

    // 另一个租户可以建同名任务，互不覆盖
    let underscore = MissionBuilder::new("m1", "acme_ops").with_label("underscore").build();
    missions.save(&underscore, None).await.unwrap();
    assert_eq!(missions.get("acme/ops", "m1").await.unwrap().unwrap().label, "slash");
    assert_eq!(
        missions.get("acme_ops", "m1").await.unwrap().unwrap().label,
        "underscore"
    );

    let journal = FileOperationJournal::new(dir.path().join("journal"), writer.clone());
    journal.append(&journal_entry("acme/ops", "m1", true)).await.unwrap();
    assert!(journal.entries("acme_ops", None, 10).await.unwrap().is_empty());
    assert_eq!(journal.entries("acme/ops", None, 10).await.unwrap().len(), 1);

    let sink = FileDeadLetterSink::new(dir.path().join("dead-letters"), writer);
    assert_ne!(sink.path_for("acme/ops"), sink.path_for("acme_ops"));
}

#[tokio::test]
async fn test_dead_letter_flush_waits_for_pending_writes() {
    let dir = TempDir::new().unwrap();
    let sink = FileDeadLetterSink::new(dir.path(), Arc::new(JsonlWriter::new()));

    for attempt in 1..=3 {
        sink.record(DeadLetterRecord {
            ts: Utc::now(),
            schedule_id: "s1".to_string(),
            mission_id: "m1".to_string(),
            tenant_id: "tenant-a".to_string(),
            run_key: format!("s1:daily:2026-05-0{attempt}"),
            attempt,
            reason: "timeout".to_string(),
            outputs_ok: 0,
            outputs_failed: 0,
            metadata: serde_json::json!({}),
        });
    }
    sink.flush().await;

    let path = sink.path_for("tenant-a");
    let lines = jsonl::read_lines(&path).await.unwrap();
    assert_eq!(lines.len(), 3);
}

#[tokio::test]
async fn test_dead_letter_sink_writes_in_background() {
    let dir = TempDir::new().unwrap();
    let sink = FileDeadLetterSink::new(dir.path(), Arc::new(JsonlWriter::new()));
    let path = sink.path_for("tenant-a");

    sink.record(DeadLetterRecord {
        ts: Utc::now(),
        schedule_id: "s1".to_string(),
        mission_id: "m1".to_string(),
        tenant_id: "tenant-a".to_string(),
        run_key: "s1:daily:2026-05-04".to_string(),
        attempt: 4,
        reason: "retry budget exhausted".to_string(),
        outputs_ok: 0,
        outputs_failed: 2,
        metadata: serde_json::json!({"lastError": "timeout"}),
    });

    let written = TestEnv::wait_for(
        || {
            let path = path.clone();
            async move { !jsonl::read_lines(&path).await.unwrap_or_default().is_empty() }
        },
        Duration::from_secs(5),
    )
    .await;
    assert!(written);

    let lines = jsonl::read_lines(&path).await.unwrap();
    let records: Vec<DeadLetterRecord> = jsonl::parse_lines(&path, &lines);
    assert_eq!(records[0].attempt, 4);
    assert_eq!(records[0].outputs_failed, 2);
}

fn context() -> ExecutionContext {
    ExecutionContext {
        schedule_id: "s1".to_string(),
        tenant_id: "tenant-a".to_string(),
        run_key: "s1:daily:2026-05-04".to_string(),
        attempt: 1,
        mode: TriggerMode::Daily,
        day_stamp: Some("2026-05-04".to_string()),
        timezone: "UTC".to_string(),
        source: RunSource::Scheduler,
        scheduled_at: Utc::now(),
    }
}

/// 单次应答的最小 HTTP 服务，返回请求体
async fn serve_once(status_line: &'static str, body: String) -> (String, tokio::task::JoinHandle<String>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let handle = tokio::spawn(async move {
        let (mut socket, _) = listener.accept().await.unwrap();
        let mut buffer = Vec::new();
        let mut chunk = [0u8; 4096];
        let request_body = loop {
            let n = socket.read(&mut chunk).await.unwrap();
            buffer.extend_from_slice(&chunk[..n]);
            let text = String::from_utf8_lossy(&buffer).to_string();
            if let Some(split) = text.find("\r\n\r\n") {
                let headers = text[..split].to_ascii_lowercase();
                let length = headers
                    .lines()
                    .find_map(|l| l.strip_prefix("content-length:"))
                    .and_then(|v| v.trim().parse::<usize>().ok())
                    .unwrap_or(0);
                if buffer.len() >= split + 4 + length {
                    break text[split + 4..].to_string();
                }
            }
            if n == 0 {
                break String::new();
            }
        };
        let response = format!(
            "{status_line}\r\ncontent-type: application/json\r\ncontent-length: {}\r\nconnection: close\r\n\r\n{}",
            body.len(),
            body
        );
        socket.write_all(response.as_bytes()).await.unwrap();
        socket.shutdown().await.ok();
        request_body
    });
    (format!("http://{addr}/execute"), handle)
}

#[tokio::test]
async fn test_http_engine_posts_mission_and_context() {
    let outcome = ExecutionOutcome::skipped("nothing new");
    let (endpoint, server) =
        serve_once("HTTP/1.1 200 OK", serde_json::to_string(&outcome).unwrap()).await;
    let engine = HttpExecutionEngine::new(&ExecutionConfig {
        endpoint,
        timeout_seconds: 5,
    });
    let mission = MissionBuilder::new("m1", "tenant-a").build();

    let result = engine.execute(&mission, &context()).await.unwrap();
    assert_eq!(result, outcome);

    let request: serde_json::Value = serde_json::from_str(&server.await.unwrap()).unwrap();
    assert_eq!(request["mission"]["id"], "m1");
    assert_eq!(request["context"]["runKey"], "s1:daily:2026-05-04");
}

#[tokio::test]
async fn test_http_engine_maps_server_error_to_execution_error() {
    let (endpoint, _server) =
        serve_once("HTTP/1.1 500 Internal Server Error", "{\"error\":\"down\"}".to_string()).await;
    let engine = HttpExecutionEngine::new(&ExecutionConfig {
        endpoint,
        timeout_seconds: 5,
    });
    let mission = MissionBuilder::new("m1", "tenant-a").build();

    let err = engine.execute(&mission, &context()).await.unwrap_err();
    assert!(matches!(err, MissionError::Execution(message) if message.contains("500")));
}
