use super::*;
use chrono::Utc;
use serde_json::json;

fn sample_run(flow_name: &str) -> Run {
    Run {
        id: Uuid::new_v4(),
        flow_name: flow_name.to_string(),
        event: [("k".to_string(), json!("v"))].into_iter().collect(),
        vars: HashMap::new(),
        status: RunStatus::Running,
        started_at: Utc::now(),
        ended_at: None,
        steps: None,
    }
}

fn sample_step(run_id: Uuid, name: &str) -> StepRun {
    StepRun {
        id: Uuid::new_v4(),
        run_id,
        step_name: name.to_string(),
        status: StepStatus::Succeeded,
        started_at: Utc::now(),
        ended_at: Some(Utc::now()),
        error: None,
        outputs: Some([("text".to_string(), json!("hi"))].into_iter().collect()),
    }
}

/// Contract suite run against every backend
async fn exercise_contract(storage: &dyn Storage) {
    // save + get round-trips
    let run = sample_run("contract");
    storage.save_run(&run).await.unwrap();
    let loaded = storage.get_run(run.id).await.unwrap().unwrap();
    assert_eq!(loaded.id, run.id);
    assert_eq!(loaded.flow_name, run.flow_name);
    assert_eq!(loaded.event, run.event);
    assert_eq!(loaded.status, RunStatus::Running);

    // get of unknown id is None
    assert!(storage.get_run(Uuid::new_v4()).await.unwrap().is_none());

    // try_insert_run refuses duplicates
    assert!(!storage.try_insert_run(&run).await.unwrap());
    let fresh = sample_run("contract");
    assert!(storage.try_insert_run(&fresh).await.unwrap());

    // steps come back in insertion order
    storage.save_step(&sample_step(run.id, "first")).await.unwrap();
    storage.save_step(&sample_step(run.id, "second")).await.unwrap();
    storage.save_step(&sample_step(run.id, "third")).await.unwrap();
    let steps = storage.get_steps(run.id).await.unwrap();
    assert_eq!(
        steps.iter().map(|s| s.step_name.as_str()).collect::<Vec<_>>(),
        vec!["first", "second", "third"]
    );
    assert_eq!(steps[0].outputs.as_ref().unwrap().get("text").unwrap(), "hi");

    // delete_run cascades to steps
    storage.delete_run(run.id).await.unwrap();
    assert!(storage.get_run(run.id).await.unwrap().is_none());
    assert!(storage.get_steps(run.id).await.unwrap().is_empty());

    // waits: register then resolve removes
    storage.register_wait("tok-1", Some(12345)).await.unwrap();
    let reg = storage.resolve_wait("tok-1").await.unwrap().unwrap();
    assert_eq!(reg.token, "tok-1");
    assert_eq!(reg.wake_at, Some(12345));
    assert!(storage.resolve_wait("tok-1").await.unwrap().is_none());

    // paused runs: save, load, fetch-and-delete exactly once
    storage
        .save_paused_run("tok-2", json!({"step": 3}))
        .await
        .unwrap();
    let paused = storage.load_paused_runs().await.unwrap();
    assert_eq!(paused.get("tok-2").unwrap(), &json!({"step": 3}));

    let taken = storage.fetch_and_delete_paused_run("tok-2").await.unwrap();
    assert_eq!(taken, Some(json!({"step": 3})));
    let again = storage.fetch_and_delete_paused_run("tok-2").await.unwrap();
    assert!(again.is_none());

    // delete_paused_run on an unknown token is a no-op
    storage.delete_paused_run("ghost").await.unwrap();
}

#[tokio::test]
async fn test_memory_contract() {
    let storage = MemoryStorage::new();
    exercise_contract(&storage).await;
}

#[tokio::test]
async fn test_sqlite_contract() {
    let dir = tempfile::tempdir().unwrap();
    let dsn = dir.path().join("flow.db");
    let storage = SqliteStorage::new(dsn.to_str().unwrap()).await.unwrap();
    exercise_contract(&storage).await;
}

#[tokio::test]
async fn test_memory_list_runs_most_recent_first() {
    let storage = MemoryStorage::new();

    let mut old = sample_run("list");
    old.started_at = Utc::now() - chrono::Duration::seconds(60);
    let new = sample_run("list");

    storage.save_run(&old).await.unwrap();
    storage.save_run(&new).await.unwrap();

    let runs = storage.list_runs().await.unwrap();
    assert_eq!(runs.len(), 2);
    assert_eq!(runs[0].id, new.id);
    assert_eq!(runs[1].id, old.id);
}

#[tokio::test]
async fn test_get_latest_run_by_flow_name() {
    let storage = MemoryStorage::new();

    let mut old = sample_run("target");
    old.started_at = Utc::now() - chrono::Duration::seconds(60);
    let new = sample_run("target");
    let other = sample_run("other");

    storage.save_run(&old).await.unwrap();
    storage.save_run(&new).await.unwrap();
    storage.save_run(&other).await.unwrap();

    let latest = storage
        .get_latest_run_by_flow_name("target")
        .await
        .unwrap()
        .unwrap();
    assert_eq!(latest.id, new.id);

    assert!(storage
        .get_latest_run_by_flow_name("missing")
        .await
        .unwrap()
        .is_none());
}

#[tokio::test]
async fn test_sqlite_save_run_upserts_status() {
    let dir = tempfile::tempdir().unwrap();
    let dsn = dir.path().join("flow.db");
    let storage = SqliteStorage::new(dsn.to_str().unwrap()).await.unwrap();

    let mut run = sample_run("upsert");
    storage.save_run(&run).await.unwrap();

    run.status = RunStatus::Succeeded;
    run.ended_at = Some(Utc::now());
    storage.save_run(&run).await.unwrap();

    let loaded = storage.get_run(run.id).await.unwrap().unwrap();
    assert_eq!(loaded.status, RunStatus::Succeeded);
    assert!(loaded.ended_at.is_some());
}

#[tokio::test]
async fn test_sqlite_rejects_path_traversal() {
    assert!(SqliteStorage::new("../evil.db").await.is_err());
}

#[tokio::test]
async fn test_create_storage_from_config() {
    let config = crate::config::StorageConfig {
        driver: "memory".to_string(),
        dsn: String::new(),
    };
    assert!(create_storage_from_config(&config).await.is_ok());

    let bad = crate::config::StorageConfig {
        driver: "etcd".to_string(),
        dsn: String::new(),
    };
    assert!(create_storage_from_config(&bad).await.is_err());
}
