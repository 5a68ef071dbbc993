use super::*;

#[test]
fn test_default_config() {
    let config = Config::default();
    assert_eq!(config.storage.driver, "sqlite");
    assert_eq!(config.flows_dir(), "flows");
    assert_eq!(config.http_addr(), "127.0.0.1:3330");
    assert_eq!(
        config.max_concurrent_tasks(),
        crate::constants::DEFAULT_MAX_CONCURRENT_TASKS
    );
}

#[test]
fn test_load_from_json() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("flow.config.json");
    std::fs::write(
        &path,
        r#"{
            "storage": {"driver": "memory", "dsn": ""},
            "http": {"addr": "0.0.0.0:8080"},
            "flowsDir": "my-flows",
            "limits": {"max_concurrent_tasks": 8}
        }"#,
    )
    .unwrap();

    let config = Config::load(&path).unwrap();
    assert_eq!(config.storage.driver, "memory");
    assert_eq!(config.http_addr(), "0.0.0.0:8080");
    assert_eq!(config.flows_dir(), "my-flows");
    assert_eq!(config.max_concurrent_tasks(), 8);
}

#[test]
fn test_load_invalid_json_is_config_error() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("flow.config.json");
    std::fs::write(&path, "{not json").unwrap();

    let err = Config::load(&path).unwrap_err();
    assert!(matches!(err, BeemFlowError::Config(_)));
}

#[test]
fn test_missing_file_is_config_error() {
    assert!(Config::load("/nonexistent/flow.config.json").is_err());
}

#[test]
fn test_partial_config_uses_defaults() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("flow.config.json");
    std::fs::write(&path, r#"{"storage": {"driver": "memory", "dsn": ""}}"#).unwrap();

    let config = Config::load(&path).unwrap();
    assert_eq!(config.flows_dir(), "flows");
    assert_eq!(config.http_addr(), "127.0.0.1:3330");
}
