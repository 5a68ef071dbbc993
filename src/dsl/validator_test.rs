use super::Validator;
use crate::Flow;

fn parse(yaml: &str) -> Flow {
    serde_yaml::from_str(yaml).unwrap()
}

#[test]
fn test_valid_flow_passes() {
    let flow = parse(
        r#"
name: ok
steps:
  - id: s1
    use: core.echo
    with: {text: hi}
  - id: s2
    depends_on: [s1]
    use: core.echo
    with: {text: "{{ s1.text }}"}
"#,
    );
    assert!(Validator::validate(&flow).is_ok());
}

#[test]
fn test_empty_name_rejected() {
    let flow = parse("name: \"\"\nsteps:\n  - id: s1\n    use: core.echo\n");
    assert!(Validator::validate(&flow).is_err());
}

#[test]
fn test_empty_steps_rejected() {
    let flow = parse("name: empty\nsteps: []\n");
    assert!(Validator::validate(&flow).is_err());
}

#[test]
fn test_duplicate_ids_rejected() {
    let flow = parse(
        "name: dup\nsteps:\n  - id: s1\n    use: core.echo\n  - id: s1\n    use: core.echo\n",
    );
    let err = Validator::validate(&flow).unwrap_err().to_string();
    assert!(err.contains("Duplicate"), "unexpected error: {}", err);
}

#[test]
fn test_unknown_depends_on_rejected() {
    let flow = parse(
        "name: dep\nsteps:\n  - id: s1\n    depends_on: [ghost]\n    use: core.echo\n",
    );
    assert!(Validator::validate(&flow).is_err());
}

#[test]
fn test_dependency_cycle_rejected() {
    let flow = parse(
        r#"
name: cyc
steps:
  - id: a
    depends_on: [b]
    use: core.echo
  - id: b
    depends_on: [a]
    use: core.echo
"#,
    );
    let err = Validator::validate(&flow).unwrap_err().to_string();
    assert!(err.contains("Circular"), "unexpected error: {}", err);
}

#[test]
fn test_condition_requires_template_syntax() {
    let flow = parse(
        "name: c\nsteps:\n  - id: s1\n    if: \"just text\"\n    use: core.echo\n",
    );
    assert!(Validator::validate(&flow).is_err());
}

#[test]
fn test_foreach_expr_requires_template_syntax() {
    let flow = parse(
        r#"
name: f
steps:
  - id: fan
    foreach: "not a template"
    as: x
    do:
      - id: inner
        use: core.echo
"#,
    );
    assert!(Validator::validate(&flow).is_err());
}

#[test]
fn test_await_event_requires_token_in_match() {
    let flow = parse(
        r#"
name: a
steps:
  - id: gate
    await_event:
      source: bus
      match:
        kind: approval
"#,
    );
    let err = Validator::validate(&flow).unwrap_err().to_string();
    assert!(err.contains("token"), "unexpected error: {}", err);
}

#[test]
fn test_await_event_inside_parallel_rejected() {
    let flow = parse(
        r#"
name: p
steps:
  - id: block
    parallel: true
    steps:
      - id: gate
        await_event:
          source: bus
          match:
            token: t
"#,
    );
    let err = Validator::validate(&flow).unwrap_err().to_string();
    assert!(err.contains("parallel"), "unexpected error: {}", err);
}

#[test]
fn test_await_event_inside_foreach_allowed() {
    let flow = parse(
        r#"
name: f
steps:
  - id: fan
    foreach: "{{ list('a') }}"
    as: x
    do:
      - id: gate
        await_event:
          source: bus
          match:
            token: "{{ x }}"
"#,
    );
    assert!(Validator::validate(&flow).is_ok());
}

#[test]
fn test_zero_retry_attempts_rejected() {
    let flow = parse(
        r#"
name: r
steps:
  - id: s1
    use: core.echo
    retry:
      attempts: 0
      delay_sec: 1
"#,
    );
    assert!(Validator::validate(&flow).is_err());
}

#[test]
fn test_pausing_catch_handler_rejected() {
    let flow = parse(
        r#"
name: c
steps:
  - id: s1
    use: core.echo
catch:
  s1:
    id: cleanup
    wait:
      seconds: 5
"#,
    );
    let err = Validator::validate(&flow).unwrap_err().to_string();
    assert!(err.contains("cannot pause"), "unexpected error: {}", err);
}

#[test]
fn test_wildcard_catch_allowed() {
    let flow = parse(
        r#"
name: c
steps:
  - id: s1
    use: core.echo
catch:
  "*":
    id: cleanup
    use: core.log
    with:
      message: "failed"
"#,
    );
    assert!(Validator::validate(&flow).is_ok());
}
