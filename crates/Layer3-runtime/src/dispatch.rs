//! Command dispatcher - the string command surface
//!
//! A command is an operation keyword followed by `key=value` parameters;
//! values may be quoted to admit spaces, and a bare `flag` means
//! `flag=true`:
//!
//! ```text
//! create name=web kind=container memory=512 cpu=1 template=alpine:latest
//! execute name=web command="echo test" timeout=10
//! execute_script name=web file=./job.sh progress async
//! checkpoint_poll id=task_1718000000000_1a2b3c4d
//! ```
//!
//! Every operation answers with an [`OperationResult`]. This is the single
//! place where an [`Error`] is turned into `success: false`.

use crate::controller::{CreateRequest, LifecycleController, ScriptRequest};
use harbor_foundation::{parse_memory_mb, Error, ResourceKind, ResourceLimits, Result};
use serde::Serialize;
use serde_json::{json, Map, Value};
use std::collections::BTreeMap;
use std::time::Duration;
use tracing::{debug, error};

/// Operations understood by [`Dispatcher::dispatch`]
pub const OPERATIONS: &[&str] = &[
    "create",
    "start",
    "stop",
    "pause",
    "resume",
    "save_state",
    "restore_state",
    "remove",
    "restart",
    "start_if_stopped",
    "stop_if_running",
    "info",
    "clone",
    "execute",
    "execute_script",
    "deploy_runtime",
    "copy_to",
    "copy_from",
    "status",
    "list",
    "cleanup",
    "checkpoint_submit",
    "checkpoint_poll",
    "checkpoint_complete",
    "checkpoint_list",
    "security_audit",
    "help",
];

const DEFAULT_AUDIT_LIMIT: usize = 20;

/// Keys owned by the result envelope; payload fields never override them
const ENVELOPE_KEYS: &[&str] = &["success", "operation", "output", "error", "errorKind"];

// ============================================================================
// Parsing
// ============================================================================

#[derive(Debug, Clone, PartialEq)]
pub struct ParsedCommand {
    pub operation: String,
    pub params: BTreeMap<String, String>,
}

/// Split a command line into its operation and parameters
pub fn parse_command(line: &str) -> Result<ParsedCommand> {
    let tokens = shlex::split(line)
        .ok_or_else(|| Error::Validation("unbalanced quotes in command".to_string()))?;
    let mut tokens = tokens.into_iter();
    let operation = tokens
        .next()
        .map(|op| normalize_operation(&op))
        .ok_or_else(|| Error::Validation("empty command".to_string()))?;

    let mut params = BTreeMap::new();
    for token in tokens {
        let (key, value) = match token.split_once('=') {
            Some((key, value)) => (key.trim().to_string(), value.to_string()),
            None => (token.trim().to_string(), "true".to_string()),
        };
        if key.is_empty() {
            return Err(Error::Validation(format!(
                "parameter '{}' has no name",
                token
            )));
        }
        params.insert(key, value);
    }

    Ok(ParsedCommand { operation, params })
}

fn normalize_operation(op: &str) -> String {
    op.trim().to_ascii_lowercase().replace('-', "_")
}

/// Typed access to a parameter map, with aliases
struct Params<'a>(&'a BTreeMap<String, String>);

impl<'a> Params<'a> {
    fn optional(&self, keys: &[&str]) -> Option<&'a str> {
        keys.iter()
            .find_map(|k| self.0.get(*k))
            .map(String::as_str)
    }

    fn required(&self, keys: &[&str]) -> Result<&'a str> {
        match self.optional(keys) {
            Some(value) if !value.trim().is_empty() => Ok(value),
            _ => Err(Error::Validation(format!(
                "missing required parameter '{}'",
                keys.first().copied().unwrap_or("?")
            ))),
        }
    }

    fn flag(&self, key: &str) -> Result<bool> {
        match self.optional(&[key]) {
            None => Ok(false),
            Some(raw) => match raw.trim().to_ascii_lowercase().as_str() {
                "true" | "yes" | "1" | "on" => Ok(true),
                "false" | "no" | "0" | "off" => Ok(false),
                other => Err(Error::Validation(format!(
                    "'{}' is not a boolean for '{}'",
                    other, key
                ))),
            },
        }
    }

    fn number<T: std::str::FromStr>(&self, keys: &[&str]) -> Result<Option<T>> {
        self.optional(keys)
            .map(|raw| {
                raw.trim().parse::<T>().map_err(|_| {
                    Error::Validation(format!("'{}' is not a valid number for '{}'", raw, keys[0]))
                })
            })
            .transpose()
    }

    fn json(&self, key: &str) -> Result<Option<Value>> {
        self.optional(&[key])
            .map(|raw| {
                serde_json::from_str(raw).map_err(|e| {
                    Error::Validation(format!("'{}' is not valid JSON: {}", key, e))
                })
            })
            .transpose()
    }

    /// `timeout` in seconds or `timeout_ms`
    fn timeout(&self) -> Result<Option<Duration>> {
        if let Some(ms) = self.number::<u64>(&["timeout_ms"])? {
            return Ok(Some(Duration::from_millis(ms)));
        }
        Ok(self
            .number::<f64>(&["timeout"])?
            .filter(|secs| secs.is_finite() && *secs > 0.0)
            .map(Duration::from_secs_f64))
    }

    fn limits(&self) -> Result<ResourceLimits> {
        let defaults = ResourceLimits::default();
        let memory_mb = match self.optional(&["memory", "memory_mb", "mem"]) {
            Some(raw) => parse_memory_mb(raw)?,
            None => defaults.memory_mb,
        };
        let cpus = self
            .number::<f64>(&["cpu", "cpus"])?
            .unwrap_or(defaults.cpus);
        Ok(ResourceLimits::new(memory_mb, cpus))
    }
}

// ============================================================================
// Results
// ============================================================================

/// Uniform answer to every operation
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct OperationResult {
    pub success: bool,
    pub operation: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub output: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_kind: Option<String>,
    #[serde(flatten)]
    pub data: Map<String, Value>,
}

impl OperationResult {
    pub fn ok(operation: &str, output: impl Into<String>) -> Self {
        Self {
            success: true,
            operation: operation.to_string(),
            output: Some(output.into()),
            error: None,
            error_kind: None,
            data: Map::new(),
        }
    }

    pub fn failure(operation: &str, error: &Error) -> Self {
        Self {
            success: false,
            operation: operation.to_string(),
            output: None,
            error: Some(error.to_string()),
            error_kind: Some(error.kind().to_string()),
            data: Map::new(),
        }
    }

    /// Merge the fields of `payload` into the result
    fn with<T: Serialize>(mut self, payload: &T) -> Result<Self> {
        match serde_json::to_value(payload)? {
            Value::Object(map) => {
                for (key, value) in map {
                    if !ENVELOPE_KEYS.contains(&key.as_str()) {
                        self.data.insert(key, value);
                    }
                }
            }
            other => {
                self.data.insert("result".to_string(), other);
            }
        }
        Ok(self)
    }

    fn field(mut self, key: &str, value: Value) -> Self {
        self.data.insert(key.to_string(), value);
        self
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.data.get(key)
    }
}

// ============================================================================
// Dispatcher
// ============================================================================

#[derive(Clone)]
pub struct Dispatcher {
    controller: LifecycleController,
}

impl Dispatcher {
    pub fn new(controller: LifecycleController) -> Self {
        Self { controller }
    }

    pub fn controller(&self) -> &LifecycleController {
        &self.controller
    }

    /// Parse and run one command line
    pub async fn dispatch_line(&self, line: &str) -> OperationResult {
        match parse_command(line) {
            Ok(command) => self.dispatch(&command.operation, &command.params).await,
            Err(e) => {
                let operation = line
                    .split_whitespace()
                    .next()
                    .map(normalize_operation)
                    .unwrap_or_default();
                OperationResult::failure(&operation, &e)
            }
        }
    }

    pub async fn dispatch(&self, operation: &str, params: &BTreeMap<String, String>) -> OperationResult {
        let operation = normalize_operation(operation);
        match self.run(&operation, Params(params)).await {
            Ok(result) => result,
            Err(e) => {
                if e.is_user_facing() {
                    debug!(operation = %operation, "Operation failed: {}", e);
                } else {
                    error!(operation = %operation, "Operation failed: {}", e);
                }
                OperationResult::failure(&operation, &e)
            }
        }
    }

    async fn run(&self, op: &str, params: Params<'_>) -> Result<OperationResult> {
        let c = &self.controller;
        match op {
            "create" => {
                let name = params.required(&["name"])?;
                let kind = match params.optional(&["kind", "type"]) {
                    Some(raw) => raw.parse::<ResourceKind>()?,
                    None => ResourceKind::default(),
                };
                let mut request = CreateRequest::new(name, kind)
                    .with_limits(params.limits()?)
                    .privileged(params.flag("privileged")?)
                    .auto_recover(params.flag("auto_recover")?);
                if let Some(template) = params.optional(&["template", "image", "os"]) {
                    request = request.with_template(template);
                }
                let record = c.create(request).await?;
                OperationResult::ok(op, format!("Created {} '{}'", record.kind, record.name))
                    .with(&json!({ "resource": record }))
            }

            "start" | "stop" | "pause" | "resume" | "save_state" | "restore_state" | "restart" => {
                let name = params.required(&["name"])?;
                let record = match op {
                    "start" => c.start(name).await?,
                    "stop" => c.stop(name).await?,
                    "pause" => c.pause(name).await?,
                    "resume" => c.resume(name).await?,
                    "save_state" => c.save_state(name).await?,
                    "restore_state" => c.restore_state(name).await?,
                    _ => c.restart(name).await?,
                };
                OperationResult::ok(op, format!("'{}' is now {}", record.name, record.state))
                    .with(&json!({ "resource": record }))
            }

            "start_if_stopped" | "stop_if_running" => {
                let name = params.required(&["name"])?;
                let outcome = if op == "start_if_stopped" {
                    c.start_if_stopped(name).await?
                } else {
                    c.stop_if_running(name).await?
                };
                let output = if outcome.skipped {
                    format!("'{}' already {}; skipped", name, outcome.record.state)
                } else {
                    format!("'{}' is now {}", name, outcome.record.state)
                };
                OperationResult::ok(op, output).with(&json!({
                    "resource": outcome.record,
                    "skipped": outcome.skipped,
                }))
            }

            "remove" => {
                let name = params.required(&["name"])?;
                let outcome = c.remove(name).await?;
                OperationResult::ok(op, format!("Removed '{}'", name)).with(&json!({
                    "resource": outcome.record,
                    "stoppedFirst": outcome.stopped_first,
                }))
            }

            "info" => {
                let record = c.info(params.required(&["name"])?)?;
                OperationResult::ok(op, format!("'{}' is {}", record.name, record.state))
                    .with(&json!({ "resource": record }))
            }

            "clone" => {
                let source = params.required(&["source", "from"])?;
                let name = params.required(&["name", "to"])?;
                let record = c
                    .clone_resource(source, name, params.flag("full")?)
                    .await?;
                let mode = match record.copy_on_write {
                    Some(true) => "copy-on-write",
                    _ => "full copy",
                };
                OperationResult::ok(op, format!("Cloned '{}' to '{}' ({})", source, name, mode))
                    .with(&json!({ "resource": record }))
            }

            "execute" => {
                let name = params.required(&["name"])?;
                let command = params.required(&["command", "cmd"])?;
                let output = c.execute(name, command, params.timeout()?).await?;
                let mut result = OperationResult::ok(op, output.stdout.clone()).with(&output)?;
                if !output.success() {
                    result.success = false;
                    result.error = Some(format!("command exited with code {}", output.exit_code));
                    result.error_kind = Some("nonzero_exit".to_string());
                }
                Ok(result)
            }

            "execute_script" => {
                let name = params.required(&["name"])?;
                let script = match params.optional(&["script"]) {
                    Some(script) => script.to_string(),
                    None => {
                        let file = params.required(&["file"])?;
                        c.read_script_file(name, file).await?
                    }
                };
                let mut request =
                    ScriptRequest::new(name, script).with_progress(params.flag("progress")?);
                if let Some(timeout) = params.timeout()? {
                    request = request.with_timeout(timeout);
                }

                if params.flag("async")? {
                    let task_id = c.submit_script(request).await?;
                    return Ok(OperationResult::ok(op, format!("Script submitted as {}", task_id))
                        .field("taskId", json!(task_id)));
                }

                let outcome = c.execute_script(request).await?;
                let mut result =
                    OperationResult::ok(op, outcome.output.stdout.clone()).with(&outcome)?;
                if !outcome.output.success() {
                    result.success = false;
                    result.error = Some(format!(
                        "script exited with code {}",
                        outcome.output.exit_code
                    ));
                    result.error_kind = Some("nonzero_exit".to_string());
                }
                Ok(result)
            }

            "deploy_runtime" => {
                let name = params.required(&["name"])?;
                let binary = params.required(&["binary", "path"])?;
                let record = c.deploy_runtime(name, binary).await?;
                OperationResult::ok(op, format!("Script runtime deployed to '{}'", name))
                    .with(&json!({ "resource": record }))
            }

            "copy_to" | "copy_from" => {
                let name = params.required(&["name"])?;
                let src = params.required(&["src", "source"])?;
                let dest = params.required(&["dest", "destination"])?;
                if op == "copy_to" {
                    c.copy_to(name, src, dest).await?;
                } else {
                    c.copy_from(name, src, dest).await?;
                }
                Ok(OperationResult::ok(op, format!("Copied {} -> {}", src, dest))
                    .field("src", json!(src))
                    .field("dest", json!(dest)))
            }

            "status" => {
                let status = c.status().await;
                OperationResult::ok(
                    op,
                    format!("{} of {} resources tracked", status.resources, status.capacity),
                )
                .with(&status)
            }

            "list" => {
                let resources = c.list();
                OperationResult::ok(op, format!("{} resource(s)", resources.len()))
                    .with(&json!({ "count": resources.len(), "resources": resources }))
            }

            "cleanup" => {
                let report = c.cleanup().await;
                let mut result = OperationResult::ok(
                    op,
                    format!("Removed {} resource(s)", report.removed.len()),
                )
                .with(&report)?;
                if !report.is_clean() {
                    result.success = false;
                    result.error = Some(format!(
                        "{} resource(s) could not be removed",
                        report.failed.len()
                    ));
                    result.error_kind = Some("partial_failure".to_string());
                }
                Ok(result)
            }

            "checkpoint_submit" => {
                let operation = params.required(&["operation", "op"])?;
                let context = params.json("context")?.unwrap_or_else(|| json!({}));
                let deadline_ms = params.number::<u64>(&["deadline_ms", "deadline"])?;
                let task_id = c.checkpoint_submit(operation, context, deadline_ms).await?;
                Ok(OperationResult::ok(op, format!("Submitted {}", task_id))
                    .field("taskId", json!(task_id)))
            }

            "checkpoint_poll" => {
                let id = params.required(&["id", "task_id", "taskId"])?;
                let poll = c.checkpoint_poll(id).await;
                if poll.is_not_found() {
                    return Ok(OperationResult::failure(op, &Error::CheckpointNotFound(id.to_string()))
                        .with(&poll)?);
                }
                let mut result = OperationResult::ok(op, poll.status.clone()).with(&poll)?;
                if let Some(task_operation) = poll.operation {
                    result = result.field("taskOperation", json!(task_operation));
                }
                if let Some(task_error) = poll.error {
                    result = result.field("taskError", json!(task_error));
                }
                Ok(result)
            }

            "checkpoint_complete" => {
                let id = params.required(&["id", "task_id", "taskId"])?;
                let result = params.json("result")?.unwrap_or(Value::Null);
                c.checkpoint_complete(id, result).await?;
                Ok(OperationResult::ok(op, format!("Completed {}", id)).field("taskId", json!(id)))
            }

            "checkpoint_list" => {
                let tasks = c.checkpoint_list().await;
                OperationResult::ok(op, format!("{} task(s)", tasks.len()))
                    .with(&json!({ "count": tasks.len(), "tasks": tasks }))
            }

            "security_audit" => {
                let limit = params
                    .number::<usize>(&["limit", "n"])?
                    .unwrap_or(DEFAULT_AUDIT_LIMIT);
                let report = c.security_audit(limit);
                OperationResult::ok(op, format!("{} audit entries", report.entries.len()))
                    .with(&report)
            }

            "help" => Ok(OperationResult::ok(op, OPERATIONS.join(" "))
                .field("operations", json!(OPERATIONS))),

            other => Err(Error::Validation(format!(
                "unknown operation '{}'; try 'help'",
                other
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_quoted_values_and_flags() {
        let cmd = parse_command(r#"execute name=web command="echo hello world" progress"#).unwrap();
        assert_eq!(cmd.operation, "execute");
        assert_eq!(cmd.params["name"], "web");
        assert_eq!(cmd.params["command"], "echo hello world");
        assert_eq!(cmd.params["progress"], "true");
    }

    #[test]
    fn test_parse_bare_keywords() {
        let cmd = parse_command("status").unwrap();
        assert_eq!(cmd.operation, "status");
        assert!(cmd.params.is_empty());

        assert_eq!(parse_command("  Start-If-Stopped name=a").unwrap().operation, "start_if_stopped");
    }

    #[test]
    fn test_parse_value_keeps_later_equals() {
        let cmd = parse_command("execute name=a command='FOO=1 env'").unwrap();
        assert_eq!(cmd.params["command"], "FOO=1 env");
    }

    #[test]
    fn test_parse_errors() {
        assert!(parse_command("").is_err());
        assert!(parse_command("create name='web").is_err());
        assert!(parse_command("create =web").is_err());
    }

    #[test]
    fn test_params_aliases_and_types() {
        let cmd = parse_command("create name=a type=vm mem=2g cpus=1.5 timeout=2.5").unwrap();
        let params = Params(&cmd.params);
        assert_eq!(params.optional(&["kind", "type"]), Some("vm"));
        let limits = params.limits().unwrap();
        assert_eq!(limits.memory_mb, 2048);
        assert_eq!(limits.cpus, 1.5);
        assert_eq!(params.timeout().unwrap(), Some(Duration::from_millis(2500)));
        assert!(!params.flag("privileged").unwrap());
        assert!(params.required(&["template"]).is_err());
    }

    #[test]
    fn test_envelope_keys_are_not_overridden() {
        let result = OperationResult::ok("checkpoint_poll", "processing")
            .with(&json!({ "success": false, "operation": "ANALYZE", "done": false }))
            .unwrap();
        assert!(result.success);
        assert_eq!(result.operation, "checkpoint_poll");
        assert_eq!(result.get("done"), Some(&json!(false)));

        let value = serde_json::to_value(&result).unwrap();
        assert_eq!(value["success"], true);
        assert_eq!(value["output"], "processing");
        assert!(value.get("error").is_none());
    }

    #[test]
    fn test_failure_carries_error_kind() {
        let result = OperationResult::failure("start", &Error::ResourceNotFound("x".into()));
        let value = serde_json::to_value(&result).unwrap();
        assert_eq!(value["success"], false);
        assert_eq!(value["errorKind"], "resource_not_found");
        assert_eq!(value["error"], "Resource not found: x");
    }
}
