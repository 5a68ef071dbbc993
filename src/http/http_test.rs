use super::*;
use axum::body::Body;
use axum::http::Request;
use tower::ServiceExt;

async fn body_json(response: Response) -> Value {
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    serde_json::from_slice(&bytes).unwrap()
}

fn test_state(flows_dir: &std::path::Path) -> AppState {
    AppState {
        engine: Engine::for_testing(),
        config: Arc::new(Config {
            flows_dir: Some(flows_dir.to_str().unwrap().to_string()),
            ..Config::default()
        }),
    }
}

fn write_flow(dir: &std::path::Path, name: &str, content: &str) {
    std::fs::write(
        dir.join(format!("{}.flow.yaml", name)),
        content,
    )
    .unwrap();
}

fn post_json(uri: &str, body: Value) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri(uri)
        .header("content-type", "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

#[tokio::test]
async fn test_health() {
    let dir = tempfile::tempdir().unwrap();
    let app = router(test_state(dir.path()));

    let response = app
        .oneshot(Request::builder().uri("/health").body(Body::empty()).unwrap())
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(body_json(response).await["status"], "ok");
}

#[tokio::test]
async fn test_start_run_succeeds() {
    let dir = tempfile::tempdir().unwrap();
    write_flow(
        dir.path(),
        "hello",
        "name: hello\nsteps:\n  - id: s1\n    use: core.echo\n    with: {text: \"{{ event.who }}\"}\n",
    );
    let app = router(test_state(dir.path()));

    let response = app
        .oneshot(post_json(
            "/runs",
            json!({"flow_name": "hello", "event": {"who": "world"}}),
        ))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await;
    assert_eq!(body["status"], "SUCCEEDED");
    assert_eq!(body["outputs"]["s1"]["text"], "world");
    assert!(body["run_id"].is_string());
}

#[tokio::test]
async fn test_start_run_unknown_flow_is_404() {
    let dir = tempfile::tempdir().unwrap();
    let app = router(test_state(dir.path()));

    let response = app
        .oneshot(post_json("/runs", json!({"flow_name": "missing"})))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_start_run_rejects_path_like_names() {
    let dir = tempfile::tempdir().unwrap();
    let app = router(test_state(dir.path()));

    let response = app
        .oneshot(post_json("/runs", json!({"flow_name": "../etc/passwd"})))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_pause_resume_over_http() {
    let dir = tempfile::tempdir().unwrap();
    write_flow(
        dir.path(),
        "gated",
        r#"name: gated
steps:
  - id: gate
    await_event:
      source: bus
      match:
        token: "{{ event.token }}"
  - id: done
    use: core.echo
    with: {text: "{{ gate.answer }}"}
"#,
    );
    let state = test_state(dir.path());

    let response = router(state.clone())
        .oneshot(post_json(
            "/runs",
            json!({"flow_name": "gated", "event": {"token": "t-1"}}),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await;
    assert_eq!(body["status"], "WAITING");
    assert_eq!(body["token"], "t-1");

    let response = router(state.clone())
        .oneshot(post_json("/resume/t-1", json!({"answer": "yes"})))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await;
    assert_eq!(body["status"], "SUCCEEDED");
    assert_eq!(body["outputs"]["done"]["text"], "yes");
}

#[tokio::test]
async fn test_resume_unknown_token_is_404() {
    let dir = tempfile::tempdir().unwrap();
    let app = router(test_state(dir.path()));

    let response = app
        .oneshot(post_json("/resume/ghost", json!({})))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_runs_listing_and_delete() {
    let dir = tempfile::tempdir().unwrap();
    write_flow(
        dir.path(),
        "quick",
        "name: quick\nsteps:\n  - id: s1\n    use: core.echo\n    with: {text: hi}\n",
    );
    let state = test_state(dir.path());

    let response = router(state.clone())
        .oneshot(post_json("/runs", json!({"flow_name": "quick"})))
        .await
        .unwrap();
    let run_id = body_json(response).await["run_id"].as_str().unwrap().to_string();

    let response = router(state.clone())
        .oneshot(Request::builder().uri("/runs").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(body_json(response).await.as_array().unwrap().len(), 1);

    let response = router(state.clone())
        .oneshot(
            Request::builder()
                .uri(format!("/runs/{}", run_id))
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await;
    assert_eq!(body["status"], "SUCCEEDED");
    assert!(body["steps"].is_array());

    let response = router(state.clone())
        .oneshot(
            Request::builder()
                .method("DELETE")
                .uri(format!("/runs/{}", run_id))
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NO_CONTENT);

    let response = router(state)
        .oneshot(
            Request::builder()
                .uri(format!("/runs/{}", run_id))
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_publish_event_accepted() {
    let dir = tempfile::tempdir().unwrap();
    let app = router(test_state(dir.path()));

    let response = app
        .oneshot(post_json(
            "/events",
            json!({"topic": "orders", "payload": {"id": 1}}),
        ))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::ACCEPTED);
}
