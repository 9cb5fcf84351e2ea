//! Command surface tests: command lines in, result records out

use harbor_foundation::{AuditEvent, AuditQuery, HarborConfig, SecurityMode};
use harbor_runtime::backend::testing::FakeBackend;
use harbor_runtime::{Dispatcher, LifecycleController};
use serde_json::{json, Value};
use std::sync::Arc;

fn dispatcher(mode: SecurityMode) -> (Dispatcher, Arc<FakeBackend>) {
    let backend = Arc::new(FakeBackend::container());
    let controller = LifecycleController::builder(HarborConfig::new().with_mode(mode))
        .backend(backend.clone())
        .build()
        .unwrap();
    (Dispatcher::new(controller), backend)
}

async fn run(d: &Dispatcher, line: &str) -> Value {
    serde_json::to_value(d.dispatch_line(line).await).unwrap()
}

#[tokio::test]
async fn test_full_scenario_through_commands() {
    let (d, _backend) = dispatcher(SecurityMode::Moderate);

    let created = run(&d, "create name=A memory=512 cpu=1").await;
    assert_eq!(created["success"], true, "{}", created);
    assert_eq!(created["operation"], "create");
    assert_eq!(created["resource"]["state"], "created");
    assert_eq!(created["resource"]["resourceLimits"]["memoryMb"], 512);

    assert_eq!(run(&d, "start name=A").await["success"], true);

    let exec = run(&d, r#"execute name=A command="echo test""#).await;
    assert_eq!(exec["success"], true);
    assert_eq!(exec["exitCode"], 0);
    assert!(exec["stdout"].as_str().unwrap().contains("test"));

    assert_eq!(run(&d, "stop name=A").await["success"], true);
    assert_eq!(run(&d, "remove name=A").await["success"], true);

    let list = run(&d, "list").await;
    assert_eq!(list["success"], true);
    assert_eq!(list["count"], 0);
}

#[tokio::test]
async fn test_errors_become_result_records() {
    let (d, _backend) = dispatcher(SecurityMode::Moderate);

    let missing = run(&d, "start name=ghost").await;
    assert_eq!(missing["success"], false);
    assert_eq!(missing["operation"], "start");
    assert_eq!(missing["errorKind"], "resource_not_found");

    let no_name = run(&d, "create memory=512").await;
    assert_eq!(no_name["errorKind"], "validation_error");

    let unknown = run(&d, "teleport name=A").await;
    assert_eq!(unknown["success"], false);
    assert!(unknown["error"].as_str().unwrap().contains("unknown operation"));

    let unbalanced = run(&d, "create name='A").await;
    assert_eq!(unbalanced["operation"], "create");
    assert_eq!(unbalanced["success"], false);

    let bad_kind = run(&d, "create name=A kind=lambda").await;
    assert_eq!(bad_kind["errorKind"], "validation_error");
}

#[tokio::test]
async fn test_double_start_reports_state_conflict() {
    let (d, _backend) = dispatcher(SecurityMode::Moderate);
    run(&d, "create name=web").await;
    run(&d, "start name=web").await;

    let again = run(&d, "start name=web").await;
    assert_eq!(again["success"], false);
    assert_eq!(again["errorKind"], "state_conflict");

    let skipped = run(&d, "start_if_stopped name=web").await;
    assert_eq!(skipped["success"], true);
    assert_eq!(skipped["skipped"], true);
}

#[tokio::test]
async fn test_nonzero_exit_is_unsuccessful_with_output() {
    let (d, backend) = dispatcher(SecurityMode::Moderate);
    backend.reply_to_exec(
        "false",
        harbor_task::CommandOutput {
            exit_code: 1,
            stdout: String::new(),
            stderr: "failed\n".to_string(),
            duration_ms: 1,
        },
    );
    run(&d, "create name=web").await;
    run(&d, "start name=web").await;

    let result = run(&d, "execute name=web command=false").await;
    assert_eq!(result["success"], false);
    assert_eq!(result["exitCode"], 1);
    assert_eq!(result["stderr"], "failed\n");
}

#[tokio::test]
async fn test_strict_and_permissive_templates() {
    let line = "create name=x image=registry.example/unknown:1";

    let (strict, _backend) = dispatcher(SecurityMode::Strict);
    let rejected = run(&strict, line).await;
    assert_eq!(rejected["errorKind"], "security_violation");

    let audit = run(&strict, "security_audit limit=5").await;
    assert_eq!(audit["policy"]["mode"], "strict");
    let events: Vec<_> = audit["entries"]
        .as_array()
        .unwrap()
        .iter()
        .map(|e| e["event"].as_str().unwrap().to_string())
        .collect();
    assert!(events.contains(&"security_violation".to_string()));

    let (permissive, _backend) = dispatcher(SecurityMode::Permissive);
    assert_eq!(run(&permissive, line).await["success"], true);
}

#[tokio::test]
async fn test_script_file_outside_allowed_paths_is_rejected() {
    let (d, backend) = dispatcher(SecurityMode::Moderate);
    run(&d, "create name=web").await;
    run(&d, "start name=web").await;

    let result = run(&d, "execute_script name=web file=/etc/shadow").await;
    assert_eq!(result["success"], false);
    assert_eq!(result["errorKind"], "security_violation");
    assert_eq!(backend.count("write_file"), 0);

    let violations = d.controller().audit().query(
        &AuditQuery::new()
            .with_events(vec![AuditEvent::SecurityViolation])
            .with_resource("web"),
    );
    assert_eq!(violations.len(), 1);
    assert_eq!(violations[0].details["operation"], "execute_script");
    assert_eq!(violations[0].details["subject"]["hostPath"], "/etc/shadow");
}

#[tokio::test]
async fn test_checkpoint_protocol_through_commands() {
    let (d, _backend) = dispatcher(SecurityMode::Moderate);

    let submitted = run(&d, r#"checkpoint_submit operation=ANALYZE context='{"doc": 7}'"#).await;
    assert_eq!(submitted["success"], true);
    let id = submitted["taskId"].as_str().unwrap().to_string();
    assert!(id.starts_with("task_"));

    let pending = run(&d, &format!("checkpoint_poll id={}", id)).await;
    assert_eq!(pending["success"], true);
    assert_eq!(pending["status"], "processing");
    assert_eq!(pending["done"], false);
    assert_eq!(pending["taskOperation"], "ANALYZE");
    assert_eq!(pending["progress"]["percentage"], 0.0);

    let listed = run(&d, "checkpoint_list").await;
    assert_eq!(listed["count"], 1);

    let completed = run(
        &d,
        &format!(r#"checkpoint_complete id={} result='{{"score": 0.9}}'"#, id),
    )
    .await;
    assert_eq!(completed["success"], true);

    let done = run(&d, &format!("checkpoint_poll id={}", id)).await;
    assert_eq!(done["done"], true);
    assert_eq!(done["result"], json!({"score": 0.9}));

    let gone = run(&d, &format!("checkpoint_poll id={}", id)).await;
    assert_eq!(gone["success"], false);
    assert_eq!(gone["status"], "not_found");
}

#[tokio::test]
async fn test_unknown_checkpoint_is_not_an_exception() {
    let (d, _backend) = dispatcher(SecurityMode::Moderate);
    let result = run(&d, "checkpoint_poll id=task_0_deadbeef").await;
    assert_eq!(result["success"], false);
    assert_eq!(result["status"], "not_found");

    let complete = run(&d, "checkpoint_complete id=task_0_deadbeef result=1").await;
    assert_eq!(complete["errorKind"], "checkpoint_not_found");
}

#[tokio::test]
async fn test_clone_and_status_commands() {
    let (d, _backend) = dispatcher(SecurityMode::Moderate);
    run(&d, "create name=base auto_recover").await;

    let cloned = run(&d, "clone source=base name=copy").await;
    assert_eq!(cloned["success"], true);
    assert_eq!(cloned["resource"]["clonedFrom"], "base");
    assert_eq!(cloned["resource"]["copyOnWrite"], true);
    assert_eq!(cloned["resource"]["autoRecover"], true);

    let status = run(&d, "status").await;
    assert_eq!(status["resources"], 2);
    assert_eq!(status["byState"]["created"], 2);
    assert_eq!(status["securityMode"], "moderate");

    let cleanup = run(&d, "cleanup").await;
    assert_eq!(cleanup["success"], true);
    assert_eq!(cleanup["removed"], json!(["base", "copy"]));
}

#[tokio::test]
async fn test_help_lists_operations() {
    let (d, _backend) = dispatcher(SecurityMode::Moderate);
    let help = run(&d, "help").await;
    let ops = help["operations"].as_array().unwrap();
    assert!(ops.contains(&json!("checkpoint_poll")));
    assert!(ops.contains(&json!("execute_script")));
}
