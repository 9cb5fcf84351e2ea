//! Non-interactive and line modes

use harbor_runtime::{Dispatcher, HealthMonitor, OperationResult};
use serde_json::Value;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::info;

const MIN_POLL_INTERVAL: Duration = Duration::from_millis(1);

/// Run one operation from command line words and print its result
pub async fn run_once(dispatcher: &Dispatcher, words: &[String]) -> anyhow::Result<bool> {
    let line = join_words(words)?;
    let result = dispatcher.dispatch_line(&line).await;
    print_json(&result)?;
    Ok(result.success)
}

/// Dispatch stdin lines until EOF, `exit` or Ctrl-C
pub async fn run_shell(dispatcher: &Dispatcher, health: bool) -> anyhow::Result<()> {
    let monitor = health.then(|| HealthMonitor::from_config(dispatcher.controller().clone()).spawn());
    let mut lines = BufReader::new(tokio::io::stdin()).lines();

    loop {
        let line = tokio::select! {
            line = lines.next_line() => line?,
            _ = tokio::signal::ctrl_c() => {
                info!("Interrupted");
                None
            }
        };
        let Some(line) = line else { break };

        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        if matches!(line, "exit" | "quit") {
            break;
        }

        let result = dispatcher.dispatch_line(line).await;
        println!("{}", serde_json::to_string(&result)?);
    }

    if let Some(handle) = monitor {
        handle.shutdown().await;
    }
    Ok(())
}

/// Submit an operation that returns a `taskId`, then follow the task
pub async fn run_and_wait(
    dispatcher: &Dispatcher,
    words: &[String],
    interval: Duration,
) -> anyhow::Result<bool> {
    let line = join_words(words)?;
    let submitted = dispatcher.dispatch_line(&line).await;
    if !submitted.success {
        print_json(&submitted)?;
        return Ok(false);
    }

    let Some(task_id) = submitted.get("taskId").and_then(Value::as_str).map(str::to_string) else {
        print_json(&submitted)?;
        anyhow::bail!("'{}' did not return a task id", submitted.operation);
    };
    info!(task = %task_id, "Following task");

    let result = wait_for_task(dispatcher, &task_id, interval).await;
    print_json(&result)?;
    Ok(result.success)
}

/// Poll until the task reaches a terminal state; the final poll retires it
pub async fn wait_for_task(dispatcher: &Dispatcher, task_id: &str, interval: Duration) -> OperationResult {
    let line = format!("checkpoint_poll id={}", task_id);
    let mut ticker = tokio::time::interval(interval.max(MIN_POLL_INTERVAL));
    let mut last_percent = None;

    loop {
        ticker.tick().await;
        let result = dispatcher.dispatch_line(&line).await;
        let done = result.get("done").and_then(Value::as_bool).unwrap_or(true);
        if done || !result.success {
            return result;
        }

        if let Some(progress) = result.get("progress") {
            let percent = progress.get("percentage").and_then(Value::as_f64);
            if percent != last_percent {
                let message = progress.get("message").and_then(Value::as_str).unwrap_or("");
                info!(task = %task_id, percentage = percent.unwrap_or(0.0), "{}", message);
                last_percent = percent;
            }
        }
    }
}

/// Re-quote words so values split by the invoking shell survive parsing
pub fn join_words(words: &[String]) -> anyhow::Result<String> {
    shlex::try_join(words.iter().map(String::as_str))
        .map_err(|e| anyhow::anyhow!("Cannot quote command: {}", e))
}

pub fn print_json<T: serde::Serialize + ?Sized>(value: &T) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}
