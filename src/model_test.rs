use crate::model::*;

fn parse_step(yaml: &str) -> std::result::Result<Step, serde_yaml::Error> {
    serde_yaml::from_str(yaml)
}

#[test]
fn test_call_step_resolves() {
    let step = parse_step("id: s1\nuse: core.echo\nwith:\n  text: hi\n").unwrap();
    match &step.kind {
        StepKind::Call { use_, with, retry } => {
            assert_eq!(use_, "core.echo");
            assert_eq!(with.get("text").unwrap(), "hi");
            assert!(retry.is_none());
        }
        other => panic!("expected Call, got {:?}", other),
    }
}

#[test]
fn test_foreach_step_resolves() {
    let yaml = r#"
id: fan
foreach: "{{ items }}"
as: item
do:
  - id: inner
    use: core.echo
    with:
      text: "{{ item }}"
"#;
    let step = parse_step(yaml).unwrap();
    match &step.kind {
        StepKind::Foreach {
            expr,
            bind,
            parallel,
            body,
        } => {
            assert_eq!(expr, "{{ items }}");
            assert_eq!(bind, "item");
            assert!(!parallel);
            assert_eq!(body.len(), 1);
        }
        other => panic!("expected Foreach, got {:?}", other),
    }
}

#[test]
fn test_parallel_step_resolves() {
    let yaml = r#"
id: both
parallel: true
steps:
  - id: a
    use: core.echo
    with: {text: a}
  - id: b
    use: core.echo
    with: {text: b}
"#;
    let step = parse_step(yaml).unwrap();
    match &step.kind {
        StepKind::Parallel { steps } => assert_eq!(steps.len(), 2),
        other => panic!("expected Parallel, got {:?}", other),
    }
}

#[test]
fn test_await_event_step_resolves() {
    let yaml = r#"
id: gate
await_event:
  source: bus
  match:
    token: "{{ event.token }}"
  timeout: 1h
"#;
    let step = parse_step(yaml).unwrap();
    match &step.kind {
        StepKind::AwaitEvent(spec) => {
            assert_eq!(spec.source, "bus");
            assert_eq!(spec.timeout.as_deref(), Some("1h"));
            assert!(spec.match_.contains_key("token"));
        }
        other => panic!("expected AwaitEvent, got {:?}", other),
    }
}

#[test]
fn test_ambiguous_step_rejected() {
    let yaml = r#"
id: bad
use: core.echo
wait:
  seconds: 5
"#;
    let err = parse_step(yaml).unwrap_err().to_string();
    assert!(err.contains("ambiguous"), "unexpected error: {}", err);
}

#[test]
fn test_foreach_without_as_rejected() {
    let yaml = r#"
id: bad
foreach: "{{ items }}"
do:
  - id: inner
    use: core.echo
"#;
    assert!(parse_step(yaml).is_err());
}

#[test]
fn test_steps_without_parallel_flag_rejected() {
    let yaml = r#"
id: bad
steps:
  - id: inner
    use: core.echo
"#;
    let err = parse_step(yaml).unwrap_err().to_string();
    assert!(err.contains("parallel"), "unexpected error: {}", err);
}

#[test]
fn test_empty_wait_rejected() {
    let yaml = "id: bad\nwait: {}\n";
    assert!(parse_step(yaml).is_err());
}

#[test]
fn test_core_wait_maps_to_durable_wait() {
    let yaml = "id: nap\nuse: core.wait\nwith:\n  seconds: 3\n";
    let step = parse_step(yaml).unwrap();
    match &step.kind {
        StepKind::Wait(spec) => assert_eq!(spec.seconds, Some(3)),
        other => panic!("expected Wait, got {:?}", other),
    }
}

#[test]
fn test_step_roundtrips_through_raw() {
    let yaml = "id: s1\nif: \"{{ go }}\"\nuse: core.echo\nwith:\n  text: hi\nretry:\n  attempts: 3\n  delay_sec: 1\n";
    let step = parse_step(yaml).unwrap();
    let json = serde_json::to_value(&step).unwrap();
    assert_eq!(json.get("use").unwrap(), "core.echo");
    assert_eq!(json.get("if").unwrap(), "{{ go }}");
    let back: Step = serde_json::from_value(json).unwrap();
    assert_eq!(back.id, "s1");
    match back.kind {
        StepKind::Call { retry, .. } => {
            assert_eq!(
                retry,
                Some(RetrySpec {
                    attempts: 3,
                    delay_sec: 1
                })
            );
        }
        other => panic!("expected Call, got {:?}", other),
    }
}

#[test]
fn test_can_pause_detects_nested_awaits() {
    let yaml = r#"
id: outer
foreach: "{{ items }}"
as: item
do:
  - id: gate
    await_event:
      source: bus
      match:
        token: "{{ item }}"
"#;
    let step = parse_step(yaml).unwrap();
    assert!(step.can_pause());

    let plain = parse_step("id: s\nuse: core.echo\n").unwrap();
    assert!(!plain.can_pause());
}

#[test]
fn test_trigger_topics() {
    let single: Trigger = serde_yaml::from_str("topic.a").unwrap();
    assert_eq!(single.topics(), vec!["topic.a"]);

    let multi: Trigger = serde_yaml::from_str("[topic.a, topic.b]").unwrap();
    assert_eq!(multi.topics(), vec!["topic.a", "topic.b"]);
}

#[test]
fn test_run_status_terminal() {
    assert!(RunStatus::Succeeded.is_terminal());
    assert!(RunStatus::Failed.is_terminal());
    assert!(RunStatus::Skipped.is_terminal());
    assert!(!RunStatus::Waiting.is_terminal());
    assert!(!RunStatus::Running.is_terminal());
}

#[test]
fn test_path_seg_serialization() {
    let path: StepPath = vec![PathSeg::Steps(1), PathSeg::Iter(2), PathSeg::Do(0)];
    let json = serde_json::to_string(&path).unwrap();
    let back: StepPath = serde_json::from_str(&json).unwrap();
    assert_eq!(back, path);
}
