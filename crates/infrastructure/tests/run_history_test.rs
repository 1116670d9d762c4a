use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use mission_core::models::{RunRecord, RunSource, RunStatus};
use mission_core::traits::RunHistoryStore;
use mission_infrastructure::jsonl;
use mission_infrastructure::{FileRunHistoryStore, JsonlWriter, RunHistoryLimits};
use mission_testing_utils::utc;
use tempfile::TempDir;

fn limits() -> RunHistoryLimits {
    RunHistoryLimits {
        scan_lines: 2000,
        max_bytes: 2 * 1024 * 1024,
        keep_lines: 1000,
    }
}

fn record(tenant: &str, run_key: &str, status: RunStatus, attempt: u32, ts: DateTime<Utc>) -> RunRecord {
    RunRecord {
        ts,
        schedule_id: "sched-1".to_string(),
        mission_id: "m1".to_string(),
        tenant_id: tenant.to_string(),
        source: RunSource::Scheduler,
        status,
        error: (status == RunStatus::Error).then(|| "boom".to_string()),
        run_key: run_key.to_string(),
        attempt,
        duration_ms: 10,
        outputs_ok: 0,
        outputs_failed: 0,
    }
}

#[tokio::test]
async fn test_history_survives_reopen() {
    let dir = TempDir::new().unwrap();
    let t0 = utc("2026-05-04T08:00:00Z");
    let key = "sched-1:daily:2026-05-04";

    {
        let store = FileRunHistoryStore::new(dir.path(), Arc::new(JsonlWriter::new()), limits());
        store.append(&record("t1", key, RunStatus::Error, 1, t0)).await.unwrap();
        store
            .append(&record("t1", "sched-1:daily:2026-05-03", RunStatus::Success, 1, t0))
            .await
            .unwrap();
        store
            .append(&record("t1", key, RunStatus::Error, 2, t0 + Duration::minutes(2)))
            .await
            .unwrap();
    }

    // 新实例只依赖磁盘内容
    let store = FileRunHistoryStore::new(dir.path(), Arc::new(JsonlWriter::new()), limits());
    let history = store.run_key_history("t1", "sched-1", key).await.unwrap();
    assert_eq!(history.attempts, 2);
    assert_eq!(history.error_count, 2);
    assert_eq!(history.success_count, 0);
    assert_eq!(history.latest_status, Some(RunStatus::Error));
    assert_eq!(history.latest_ts, Some(t0 + Duration::minutes(2)));

    let other = store.run_key_history("t2", "sched-1", key).await.unwrap();
    assert!(other.is_empty());

    assert!(dir.path().join("t1").join("sched-1.jsonl").exists());
}

#[tokio::test]
async fn test_torn_trailing_line_does_not_block_history() {
    let dir = TempDir::new().unwrap();
    let t0 = utc("2026-05-04T08:00:00Z");
    let key = "sched-1:daily:2026-05-04";
    let store = FileRunHistoryStore::new(dir.path(), Arc::new(JsonlWriter::new()), limits());
    store.append(&record("t1", key, RunStatus::Error, 1, t0)).await.unwrap();

    // 进程在写入中文错误信息时崩溃，留下半个 UTF-8 字符
    let path = store.path_for("t1", "sched-1");
    let mut bytes = std::fs::read(&path).unwrap();
    bytes.extend_from_slice(b"{\"error\":\"\xE9\x94");
    std::fs::write(&path, &bytes).unwrap();

    let history = store.run_key_history("t1", "sched-1", key).await.unwrap();
    assert_eq!(history.attempts, 1);
    assert_eq!(history.latest_status, Some(RunStatus::Error));

    // 后续追加的记录不会被拼进坏行
    store
        .append(&record("t1", key, RunStatus::Success, 2, t0 + Duration::minutes(2)))
        .await
        .unwrap();
    let history = store.run_key_history("t1", "sched-1", key).await.unwrap();
    assert_eq!(history.attempts, 2);
    assert_eq!(history.latest_status, Some(RunStatus::Success));
}

#[tokio::test]
async fn test_scan_window_bounds_history() {
    let dir = TempDir::new().unwrap();
    let store = FileRunHistoryStore::new(
        dir.path(),
        Arc::new(JsonlWriter::new()),
        RunHistoryLimits {
            scan_lines: 3,
            ..limits()
        },
    );
    let t0 = utc("2026-05-04T08:00:00Z");
    for i in 0..5 {
        store
            .append(&record("t1", "k", RunStatus::Error, i + 1, t0 + Duration::minutes(i as i64)))
            .await
            .unwrap();
    }

    let history = store.run_key_history("t1", "sched-1", "k").await.unwrap();
    assert_eq!(history.attempts, 3);

    let recent = store.recent("t1", "sched-1", 2).await.unwrap();
    assert_eq!(recent.iter().map(|r| r.attempt).collect::<Vec<_>>(), vec![4, 5]);
}

#[tokio::test]
async fn test_rotation_keeps_in_progress_run_key() {
    let dir = TempDir::new().unwrap();
    let store = FileRunHistoryStore::new(
        dir.path(),
        Arc::new(JsonlWriter::new()),
        RunHistoryLimits {
            scan_lines: 2000,
            max_bytes: 1,
            keep_lines: 3,
        },
    );
    let t0 = utc("2026-05-04T08:00:00Z");
    let path = store.path_for("t1", "sched-1");

    // 先直接写出一段未轮转的日志：进行中的 runKey 位于最前面
    let mut seeded = vec![serde_json::to_string(&record("t1", "current", RunStatus::Error, 1, t0)).unwrap()];
    for i in 0..6 {
        seeded.push(
            serde_json::to_string(&record("t1", &format!("old-{i}"), RunStatus::Success, 1, t0))
                .unwrap(),
        );
    }
    jsonl::rewrite_lines(&path, &seeded).await.unwrap();

    store
        .append(&record("t1", "current", RunStatus::Error, 2, t0 + Duration::minutes(5)))
        .await
        .unwrap();

    let lines = jsonl::read_lines(&path).await.unwrap();
    let records: Vec<RunRecord> = jsonl::parse_lines(&path, &lines);
    let keys: Vec<&str> = records.iter().map(|r| r.run_key.as_str()).collect();
    assert_eq!(keys, vec!["current", "old-4", "old-5", "current"]);

    let history = store.run_key_history("t1", "sched-1", "current").await.unwrap();
    assert_eq!(history.attempts, 2);
}

#[tokio::test]
async fn test_legacy_log_is_migrated_per_tenant() {
    let dir = TempDir::new().unwrap();
    let t0 = utc("2026-05-04T08:00:00Z");
    let legacy = dir.path().join("sched-1.jsonl");
    let lines: Vec<String> = vec![
        serde_json::to_string(&record("t1", "k", RunStatus::Error, 1, t0)).unwrap(),
        serde_json::to_string(&record("t2", "k", RunStatus::Success, 1, t0)).unwrap(),
    ];
    jsonl::rewrite_lines(&legacy, &lines).await.unwrap();

    let store = FileRunHistoryStore::new(dir.path(), Arc::new(JsonlWriter::new()), limits());
    store
        .append(&record("t1", "k", RunStatus::Error, 2, t0 + Duration::minutes(1)))
        .await
        .unwrap();

    let history = store.run_key_history("t1", "sched-1", "k").await.unwrap();
    assert_eq!(history.attempts, 2);
    assert_eq!(history.latest_ts, Some(t0 + Duration::minutes(1)));

    // 其他租户的行仍留在旧文件中，等待该租户首次访问
    assert_eq!(jsonl::read_lines(&legacy).await.unwrap().len(), 1);
    let other = store.run_key_history("t2", "sched-1", "k").await.unwrap();
    assert_eq!(other.success_count, 1);
    assert!(!legacy.exists());
}

#[tokio::test]
async fn test_concurrent_appends_are_all_counted() {
    let dir = TempDir::new().unwrap();
    let store = Arc::new(FileRunHistoryStore::new(
        dir.path(),
        Arc::new(JsonlWriter::new()),
        limits(),
    ));
    let t0 = utc("2026-05-04T08:00:00Z");

    let mut handles = Vec::new();
    for i in 0..20 {
        let store = store.clone();
        handles.push(tokio::spawn(async move {
            store
                .append(&record("t1", "k", RunStatus::Error, i + 1, t0))
                .await
                .unwrap();
        }));
    }
    for handle in handles {
        handle.await.unwrap();
    }

    let history = store.run_key_history("t1", "sched-1", "k").await.unwrap();
    assert_eq!(history.attempts, 20);
}
