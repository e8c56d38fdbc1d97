//! Command Execution (§4.7, C8): `execute_command` as a built-in
//! [`Tool`], streaming stdout/stderr while still producing a captured
//! result, with cooperative cancellation and the critical shutdown-
//! ordering rule: kill the process, wait for it to exit, THEN join the
//! reader tasks — never the other way around, or the readers deadlock
//! blocked on a pipe read that only unblocks when the OS closes the write
//! end on process exit.

use std::collections::HashMap;
use std::process::Stdio;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use serde_json::Value;
use tokio::io::AsyncReadExt;
use tokio::process::Command as TokioCommand;
use tokio::sync::mpsc;

use crate::channels::Scope;
use crate::error::{Error, Result};
use crate::event::{AgentEvent, OutputStream};
use crate::tools::{Tool, ToolContext};
use crate::types::ArgNode;

/// Byte bound for a single `CommandOutput` flush (§4.7: "≤1 KiB").
const FLUSH_BYTES: usize = 1024;
/// Time bound for a single `CommandOutput` flush (§4.7: "≤100 ms").
const FLUSH_INTERVAL: Duration = Duration::from_millis(100);

/// Registry of running commands' per-execution cancellation scopes, so the
/// dedicated cancel-intake worker (§4.7) can cancel a specific `exec_id`
/// without touching the turn-wide scope.
#[derive(Clone, Default)]
pub struct CommandRegistry {
    active: std::sync::Arc<Mutex<HashMap<String, Scope>>>,
}

impl CommandRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn register(&self, exec_id: String, scope: Scope) {
        self.active
            .lock()
            .expect("command registry lock poisoned")
            .insert(exec_id, scope);
    }

    fn unregister(&self, exec_id: &str) {
        self.active
            .lock()
            .expect("command registry lock poisoned")
            .remove(exec_id);
    }

    /// Cancel a specific running command. Returns `false` if no command
    /// with that id is currently tracked (already finished, or unknown).
    pub fn cancel(&self, exec_id: &str) -> bool {
        match self
            .active
            .lock()
            .expect("command registry lock poisoned")
            .get(exec_id)
        {
            Some(scope) => {
                scope.cancel();
                true
            }
            None => false,
        }
    }
}

enum WaitOutcome {
    Completed(std::io::Result<std::process::ExitStatus>),
    Interrupted,
}

/// The built-in `execute_command` tool.
pub struct ExecuteCommandTool {
    registry: CommandRegistry,
    command_timeout: Duration,
    next_id: AtomicU64,
    schema: Value,
}

impl ExecuteCommandTool {
    pub fn new(registry: CommandRegistry, command_timeout: Duration) -> Self {
        Self {
            registry,
            command_timeout,
            next_id: AtomicU64::new(0),
            schema: serde_json::json!({
                "type": "object",
                "properties": {
                    "command": {"type": "string"},
                    "working_dir": {"type": "string"}
                },
                "required": ["command"]
            }),
        }
    }

    pub fn registry(&self) -> &CommandRegistry {
        &self.registry
    }
}

#[async_trait]
impl Tool for ExecuteCommandTool {
    fn name(&self) -> &str {
        "execute_command"
    }

    fn description(&self) -> &str {
        "Runs a shell command inside the workspace, streaming its output."
    }

    fn schema(&self) -> &Value {
        &self.schema
    }

    async fn execute(&self, ctx: &ToolContext, args: &ArgNode) -> Result<String> {
        let command = args
            .field("command")
            .map(|n| n.as_display_string())
            .filter(|s| !s.is_empty())
            .ok_or_else(|| Error::invalid_input("execute_command requires a 'command' argument"))?;
        let working_dir = args
            .field("working_dir")
            .map(|n| n.as_display_string())
            .unwrap_or_else(|| ".".to_string());
        let resolved_dir = ctx.workspace.resolve(&working_dir)?;

        let exec_id = format!("cmd-{}", self.next_id.fetch_add(1, Ordering::SeqCst));
        let _ = ctx
            .events
            .send(AgentEvent::CommandExecutionStart {
                exec_id: exec_id.clone(),
                command: command.clone(),
            })
            .await;

        let exec_scope = Scope::new();
        self.registry.register(exec_id.clone(), exec_scope.clone());

        let spawn_result = TokioCommand::new("sh")
            .arg("-c")
            .arg(&command)
            .current_dir(&resolved_dir)
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn();

        let mut child = match spawn_result {
            Ok(child) => child,
            Err(err) => {
                self.registry.unregister(&exec_id);
                let _ = ctx
                    .events
                    .send(AgentEvent::CommandExecutionFailed {
                        exec_id: exec_id.clone(),
                        error: err.to_string(),
                    })
                    .await;
                return Err(Error::tool(format!("failed to launch command: {err}")));
            }
        };

        let stdout = child.stdout.take().expect("stdout piped");
        let stderr = child.stderr.take().expect("stderr piped");

        let stdout_task = tokio::spawn(capture_stream(
            stdout,
            OutputStream::Stdout,
            exec_id.clone(),
            ctx.events.clone(),
        ));
        let stderr_task = tokio::spawn(capture_stream(
            stderr,
            OutputStream::Stderr,
            exec_id.clone(),
            ctx.events.clone(),
        ));

        let start = Instant::now();
        let outcome = {
            let cancelled_by_scope = exec_scope.cancelled();
            let cancelled_by_turn = ctx.scope.cancelled();
            let timeout = tokio::time::sleep(self.command_timeout);
            tokio::pin!(cancelled_by_scope, cancelled_by_turn, timeout);

            tokio::select! {
                status = child.wait() => WaitOutcome::Completed(status),
                _ = &mut cancelled_by_scope => WaitOutcome::Interrupted,
                _ = &mut cancelled_by_turn => WaitOutcome::Interrupted,
                _ = &mut timeout => WaitOutcome::Interrupted,
            }
        };

        self.registry.unregister(&exec_id);

        match outcome {
            WaitOutcome::Completed(status) => {
                // Process already exited, pipes already closed from the
                // write side: safe to join the readers now.
                let stdout_text = stdout_task.await.unwrap_or_default();
                let stderr_text = stderr_task.await.unwrap_or_default();
                let duration = start.elapsed();
                let exit_code = status.ok().and_then(|s| s.code()).unwrap_or(-1);
                let _ = ctx
                    .events
                    .send(AgentEvent::CommandExecutionComplete {
                        exec_id: exec_id.clone(),
                        exit_code,
                        duration,
                    })
                    .await;
                let combined = format!("{stdout_text}{stderr_text}");
                if exit_code == 0 {
                    Ok(combined)
                } else {
                    Err(Error::tool(format!(
                        "command exited with status {exit_code}: {combined}"
                    )))
                }
            }
            WaitOutcome::Interrupted => {
                // Critical ordering: kill, THEN wait for exit, THEN join
                // readers. Reversing this deadlocks (see module docs).
                let _ = child.start_kill();
                let _ = child.wait().await;
                let _ = stdout_task.await.unwrap_or_default();
                let _ = stderr_task.await.unwrap_or_default();
                let _ = ctx
                    .events
                    .send(AgentEvent::CommandExecutionCancelled {
                        exec_id: exec_id.clone(),
                    })
                    .await;
                Err(Error::CommandTerminated(
                    exec_id.clone(),
                    "canceled by user".to_string(),
                ))
            }
        }
    }
}

async fn capture_stream<R>(
    mut reader: R,
    stream: OutputStream,
    exec_id: String,
    events: mpsc::Sender<AgentEvent>,
) -> String
where
    R: tokio::io::AsyncRead + Unpin,
{
    let mut buf: Vec<u8> = Vec::with_capacity(FLUSH_BYTES);
    let mut captured = String::new();
    let mut tick = tokio::time::interval(FLUSH_INTERVAL);
    tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    let mut chunk = [0u8; 512];

    loop {
        tokio::select! {
            read = reader.read(&mut chunk) => {
                match read {
                    Ok(0) => break,
                    Ok(n) => {
                        buf.extend_from_slice(&chunk[..n]);
                        if buf.len() >= FLUSH_BYTES {
                            flush(&mut buf, &mut captured, stream, &exec_id, &events).await;
                        }
                    }
                    Err(_) => break,
                }
            }
            _ = tick.tick() => {
                if !buf.is_empty() {
                    flush(&mut buf, &mut captured, stream, &exec_id, &events).await;
                }
            }
        }
    }

    if !buf.is_empty() {
        flush(&mut buf, &mut captured, stream, &exec_id, &events).await;
    }
    captured
}

async fn flush(
    buf: &mut Vec<u8>,
    captured: &mut String,
    stream: OutputStream,
    exec_id: &str,
    events: &mpsc::Sender<AgentEvent>,
) {
    let text = String::from_utf8_lossy(buf).into_owned();
    buf.clear();
    captured.push_str(&text);
    let _ = events
        .send(AgentEvent::CommandOutput {
            exec_id: exec_id.to_string(),
            stream,
            text,
        })
        .await;
}
