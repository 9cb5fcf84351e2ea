//! Script runtime deployment and progress-tracked script execution

use harbor_foundation::{Error, HarborConfig, ResourceKind, SecurityMode};
use harbor_runtime::backend::testing::FakeBackend;
use harbor_runtime::script::{FINISH_MARKER, START_MARKER};
use harbor_runtime::{CreateRequest, LifecycleController, ScriptRequest};
use harbor_task::CommandOutput;
use std::io::Write;
use std::sync::Arc;
use std::time::Duration;
use tempfile::NamedTempFile;

const PROGRESS_OUTPUT: &str = "CHECKPOINT harbor.start percent=0\n\
building\n\
CHECKPOINT build percent=50 message=halfway\n\
CHECKPOINT harbor.finish percent=100 status=0\n";

fn runtime_binary() -> NamedTempFile {
    let mut file = NamedTempFile::new().unwrap();
    writeln!(file, "#!/bin/sh").unwrap();
    file
}

async fn running_with_runtime() -> (LifecycleController, Arc<FakeBackend>, NamedTempFile) {
    let backend = Arc::new(FakeBackend::container());
    let controller = LifecycleController::builder(HarborConfig::new().with_mode(SecurityMode::Permissive))
        .backend(backend.clone())
        .build()
        .unwrap();
    controller
        .create(CreateRequest::new("job", ResourceKind::Container))
        .await
        .unwrap();
    controller.start("job").await.unwrap();

    let binary = runtime_binary();
    let record = controller
        .deploy_runtime("job", binary.path().to_str().unwrap())
        .await
        .unwrap();
    assert!(record.flags.script_runtime_deployed);
    assert_eq!(
        record.flags.deployed_path.as_deref(),
        Some("/opt/harbor/bin/runtime")
    );
    (controller, backend, binary)
}

#[tokio::test]
async fn test_script_requires_deployed_runtime() {
    let backend = Arc::new(FakeBackend::container());
    let c = LifecycleController::builder(HarborConfig::new())
        .backend(backend)
        .build()
        .unwrap();
    c.create(CreateRequest::new("job", ResourceKind::Container))
        .await
        .unwrap();
    c.start("job").await.unwrap();

    let err = c
        .execute_script(ScriptRequest::new("job", "echo hi"))
        .await
        .unwrap_err();
    assert!(matches!(err, Error::Validation(_)));
}

#[tokio::test]
async fn test_deploy_runtime_checks_binary() {
    let backend = Arc::new(FakeBackend::container());
    let c = LifecycleController::builder(HarborConfig::new().with_mode(SecurityMode::Strict))
        .backend(backend.clone())
        .build()
        .unwrap();
    c.create(CreateRequest::new("job", ResourceKind::Container))
        .await
        .unwrap();
    c.start("job").await.unwrap();

    // Not in the strict allowlist
    let binary = runtime_binary();
    let err = c
        .deploy_runtime("job", binary.path().to_str().unwrap())
        .await
        .unwrap_err();
    assert_eq!(err.kind(), "security_violation");
    assert_eq!(backend.count("copy_to"), 0);
}

#[tokio::test]
async fn test_deploy_runtime_missing_host_file() {
    let backend = Arc::new(FakeBackend::container());
    let c = LifecycleController::builder(HarborConfig::new().with_mode(SecurityMode::Permissive))
        .backend(backend)
        .build()
        .unwrap();
    c.create(CreateRequest::new("job", ResourceKind::Container))
        .await
        .unwrap();
    c.start("job").await.unwrap();

    let err = c
        .deploy_runtime("job", "/nonexistent/harbor-runtime")
        .await
        .unwrap_err();
    assert!(matches!(err, Error::Validation(_)));
}

#[tokio::test]
async fn test_script_without_progress() {
    let (c, backend, _binary) = running_with_runtime().await;

    let outcome = c
        .execute_script(ScriptRequest::new("job", "echo plain"))
        .await
        .unwrap();
    assert!(outcome.task_id.is_none());
    assert!(outcome.checkpoints.is_empty());

    // Uploaded unwrapped and run without streaming
    let uploaded = backend.file("fake-job", &outcome.script_path).unwrap();
    assert_eq!(uploaded, "echo plain");
    assert_eq!(backend.count("exec_streaming"), 0);
}

#[tokio::test]
async fn test_script_progress_is_streamed_into_task() {
    let (c, backend, _binary) = running_with_runtime().await;
    backend.reply_to_exec(
        "harbor-script-",
        CommandOutput {
            exit_code: 0,
            stdout: PROGRESS_OUTPUT.to_string(),
            stderr: String::new(),
            duration_ms: 5,
        },
    );
    let mut live = c.subscribe_checkpoints();

    let outcome = c
        .execute_script(
            ScriptRequest::new("job", "echo building\ncheckpoint build percent=50 message=halfway")
                .with_progress(true)
                .with_timeout(Duration::from_secs(5)),
        )
        .await
        .unwrap();

    let names: Vec<_> = outcome.checkpoints.iter().map(|r| r.name.as_str()).collect();
    assert_eq!(names, vec![START_MARKER, "build", FINISH_MARKER]);

    // The uploaded body carries the checkpoint helper
    let uploaded = backend.file("fake-job", &outcome.script_path).unwrap();
    assert!(uploaded.contains("checkpoint() {"));

    let first = live.recv().await.unwrap();
    assert_eq!(first.resource, "job");
    assert_eq!(first.record.name, START_MARKER);

    let task_id = outcome.task_id.unwrap();
    let poll = c.checkpoint_poll(task_id.as_str()).await;
    assert!(poll.done);
    assert_eq!(poll.status, "completed");
    assert_eq!(poll.result.unwrap()["exitCode"], 0);
    assert!(c.checkpoint_poll(task_id.as_str()).await.is_not_found());
}

#[tokio::test]
async fn test_failing_script_marks_task_error() {
    let (c, backend, _binary) = running_with_runtime().await;
    backend.reply_to_exec(
        "harbor-script-",
        CommandOutput {
            exit_code: 2,
            stdout: "CHECKPOINT harbor.finish percent=100 status=2\n".to_string(),
            stderr: "boom\n".to_string(),
            duration_ms: 5,
        },
    );

    let outcome = c
        .execute_script(ScriptRequest::new("job", "exit 2").with_progress(true))
        .await
        .unwrap();
    assert_eq!(outcome.output.exit_code, 2);

    let poll = c
        .checkpoint_poll(outcome.task_id.unwrap().as_str())
        .await;
    assert_eq!(poll.status, "error");
    assert!(poll.error.unwrap().contains("code 2"));
}

#[tokio::test]
async fn test_submitted_script_completes_in_background() {
    let (c, backend, _binary) = running_with_runtime().await;
    backend.delay_on("exec_streaming", Duration::from_millis(50));
    backend.reply_to_exec(
        "harbor-script-",
        CommandOutput {
            exit_code: 0,
            stdout: PROGRESS_OUTPUT.to_string(),
            stderr: String::new(),
            duration_ms: 50,
        },
    );

    let task_id = c
        .submit_script(ScriptRequest::new("job", "sleep 1").with_progress(true))
        .await
        .unwrap();

    let first = c.checkpoint_poll(task_id.as_str()).await;
    assert_eq!(first.status, "processing");
    assert!(!first.done);

    let mut last = first;
    for _ in 0..100 {
        tokio::time::sleep(Duration::from_millis(10)).await;
        last = c.checkpoint_poll(task_id.as_str()).await;
        if last.done {
            break;
        }
    }
    assert!(last.done);
    assert_eq!(last.status, "completed");
}

#[tokio::test]
async fn test_banned_script_is_blocked() {
    let (c, backend, _binary) = running_with_runtime().await;
    let err = c
        .execute_script(ScriptRequest::new("job", "nohup ./miner &"))
        .await
        .unwrap_err();
    assert_eq!(err.kind(), "security_violation");
    assert_eq!(backend.count("write_file"), 0);
}
