//! Checkpoint integration tests - executor output relayed into the broker
//!
//! `cargo test -p harbor-task --test checkpoint_test`

use async_trait::async_trait;
use harbor_foundation::Result;
use harbor_task::{
    CheckpointBroker, CommandRunner, LocalExecutor, ProgressReporter, ProgressStream, RunOptions,
    TaskJob, TaskWorker,
};
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;

struct SlowAnalyzer;

#[async_trait]
impl TaskWorker for SlowAnalyzer {
    async fn run(&self, job: &TaskJob, progress: &ProgressReporter) -> Result<Value> {
        progress.report(25.0, "dispatched").await;
        tokio::time::sleep(Duration::from_millis(100)).await;
        progress.report(75.0, "processing response").await;
        Ok(json!({"analyzed": job.context["target"]}))
    }
}

#[tokio::test]
async fn test_analyze_scenario() {
    let broker = CheckpointBroker::new();
    let id = broker
        .submit("ANALYZE", json!({"target": "src/"}), Arc::new(SlowAnalyzer))
        .await;

    let early = broker.poll(id.as_str()).await;
    assert_eq!(early.status, "processing");
    assert!(!early.done);

    tokio::time::sleep(Duration::from_millis(300)).await;

    let done = broker.poll(id.as_str()).await;
    assert!(done.done);
    assert_eq!(done.result, Some(json!({"analyzed": "src/"})));
    assert!(broker.poll(id.as_str()).await.is_not_found());
}

#[cfg(unix)]
#[tokio::test]
async fn test_script_output_drives_task_progress_live() {
    let broker = CheckpointBroker::new();
    let id = broker.open("script", Value::Null, None).await;

    let stream = ProgressStream::new();
    let mut observer = stream.subscribe();
    let relay = broker.relay(&id, stream.subscribe());

    let (tx, rx) = mpsc::unbounded_channel();
    let pump = {
        let stream = stream.clone();
        tokio::spawn(async move { stream.pump(rx).await })
    };

    let exec = LocalExecutor::new();
    let script = "echo 'CHECKPOINT fetch percent=30'; \
                  sleep 0.3; \
                  echo 'CHECKPOINT build {\"percent\": 80, \"message\": \"building\"}'";
    let run = tokio::spawn(async move {
        exec.run_streaming(
            "sh",
            &["-c".to_string(), script.to_string()],
            &RunOptions::with_timeout(Duration::from_secs(10)),
            tx,
        )
        .await
    });

    // The first checkpoint arrives while the script is still sleeping
    let first = observer.recv().await.unwrap();
    assert_eq!(first.name, "fetch");
    assert!(!run.is_finished());

    let output = run.await.unwrap().unwrap();
    assert!(output.success());

    let seen = pump.await.unwrap();
    assert_eq!(seen.len(), 2);
    drop(stream);
    relay.await.unwrap();

    let task = broker.get(id.as_str()).await.unwrap();
    assert_eq!(task.progress.percentage, 80.0);
    assert_eq!(task.progress.message, "building");

    broker
        .complete_externally(id.as_str(), json!({"exitCode": output.exit_code}))
        .await
        .unwrap();
    let done = broker.poll(id.as_str()).await;
    assert_eq!(done.result.unwrap()["exitCode"], 0);
}
