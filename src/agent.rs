//! The Agent Loop (§4.8, C10): the single logical task that owns memory,
//! the tool/approval/command registries, and the channel bundle, driving one
//! turn to completion at a time per §5's "parallel-capable but
//! loop-linearized" scheduling model.

use std::sync::Arc;

use log::{debug, error, info, warn};
use tokio::sync::mpsc;

use crate::approval::ApprovalManager;
use crate::channels::{channel_pair, AgentChannels, ExecutorHandle, Scope};
use crate::command::{CommandRegistry, ExecuteCommandTool};
use crate::config::AgentConfig;
use crate::context::ContextManager;
use crate::error::{Error, ErrorKind, Result};
use crate::event::{AgentEvent, ApprovalResponse, Input, ParsedSegment};
use crate::memory::Memory;
use crate::parser::Parsers;
use crate::provider::ProviderAdapter;
use crate::recovery::{render_recovery_message, ErrorRingBuffer};
use crate::tools::{Tool, ToolContext, ToolRegistry};
use crate::types::Message;
use crate::workspace::WorkspaceGuard;

/// Assembles the runtime, then hands back an [`ExecutorHandle`] wired to a
/// background task running the loop.
pub struct AgentBuilder {
    config: AgentConfig,
    provider: Arc<dyn ProviderAdapter>,
    tools: ToolRegistry,
    context_manager: Option<ContextManager>,
}

impl AgentBuilder {
    pub fn new(config: AgentConfig, provider: Arc<dyn ProviderAdapter>) -> Self {
        Self {
            config,
            provider,
            tools: ToolRegistry::new(),
            context_manager: None,
        }
    }

    pub fn with_tool(mut self, tool: Arc<dyn Tool>) -> Result<Self> {
        self.tools.register(tool)?;
        Ok(self)
    }

    /// Override the default strategy chain entirely. If never called,
    /// `spawn()` builds the §4.3-required chain: `ToolCallSummarizer`
    /// seeded from `config.summarization_exclusions`/
    /// `summarization_recent_buffer`.
    pub fn with_context_manager(mut self, manager: ContextManager) -> Self {
        self.context_manager = Some(manager);
        self
    }

    /// Builds the agent, registering the built-in `execute_command` tool
    /// (§4.7) wired to a fresh [`CommandRegistry`], and spawns its run loop.
    pub fn spawn(self) -> Result<ExecutorHandle> {
        let workspace = WorkspaceGuard::new(&self.config.workspace_root)?;
        let command_registry = CommandRegistry::new();
        let mut tools = self.tools;
        tools.register(Arc::new(ExecuteCommandTool::new(
            command_registry.clone(),
            self.config.command_timeout,
        )))?;

        let approval = Arc::new(ApprovalManager::new(
            self.config.auto_approve.clone(),
            self.config.command_whitelist.clone(),
        ));

        let context_manager = self.context_manager.unwrap_or_else(|| {
            ContextManager::new().with_strategy(Box::new(crate::context::ToolCallSummarizer::new(
                self.config.summarization_recent_buffer,
                self.config.summarization_exclusions.clone(),
            )))
        });

        let agent = Agent {
            config: self.config,
            memory: Memory::new(),
            context_manager,
            provider: self.provider,
            tools,
            approval,
            command_registry,
            workspace,
        };

        let event_capacity = agent.config.event_channel_capacity;
        let (channels, handle) = channel_pair(event_capacity);
        tokio::spawn(agent.run(channels));
        Ok(handle)
    }
}

struct Agent {
    config: AgentConfig,
    memory: Memory,
    context_manager: ContextManager,
    provider: Arc<dyn ProviderAdapter>,
    tools: ToolRegistry,
    approval: Arc<ApprovalManager>,
    command_registry: CommandRegistry,
    workspace: WorkspaceGuard,
}

impl Agent {
    async fn run(self, mut channels: AgentChannels) {
        let scope = Scope::new();
        let cancel_scope = scope.clone();
        let command_registry_for_cancel = self.command_registry.clone();
        let mut cancel_rx = std::mem::replace(&mut channels.cancel, mpsc::channel(1).1);
        let cancel_worker = tokio::spawn(async move {
            while let Some(request) = cancel_rx.recv().await {
                match request {
                    None => {
                        debug!("cancel-intake: cancelling current turn scope");
                        cancel_scope.cancel();
                    }
                    Some(exec_id) => {
                        debug!("cancel-intake: cancelling command {exec_id}");
                        command_registry_for_cancel.cancel(&exec_id);
                    }
                }
            }
        });

        let approval_for_drain = self.approval.clone();
        let mut approval_rx = std::mem::replace(&mut channels.approval, mpsc::channel(1).1);
        let approval_worker = tokio::spawn(async move {
            while let Some((id, response)) = approval_rx.recv().await {
                approval_for_drain.resolve(&id, response);
            }
        });

        info!("agent started");

        loop {
            tokio::select! {
                biased;
                _ = &mut channels.shutdown => {
                    info!("shutdown requested");
                    break;
                }
                maybe_input = channels.input.recv() => {
                    match maybe_input {
                        Some(Input::UserInput(text)) => {
                            match Message::user(text) {
                                Ok(msg) => {
                                    self.memory.add(msg);
                                    self.run_turn(&scope, &mut channels).await;
                                }
                                Err(err) => {
                                    let _ = channels.event.send(AgentEvent::Error {
                                        kind: "invalid-input".to_string(),
                                        message: err.to_string(),
                                    }).await;
                                }
                            }
                        }
                        Some(Input::Interrupt) => {
                            warn!("interrupt received, cancelling current turn");
                            scope.cancel();
                        }
                        Some(Input::Cancel(target)) => {
                            match target {
                                None => scope.cancel(),
                                Some(exec_id) => {
                                    self.command_registry.cancel(&exec_id);
                                }
                            }
                        }
                        None => {
                            info!("input channel closed, shutting down");
                            break;
                        }
                    }
                }
            }
        }

        cancel_worker.abort();
        approval_worker.abort();
        let _ = channels.event.send(AgentEvent::StatusShutdown).await;
        drop(channels.event);
        let _ = channels.done.send(());
        info!("agent stopped");
    }

    /// One full turn: §4.8's `iterate()` pseudocode.
    async fn run_turn(&self, scope: &Scope, channels: &mut AgentChannels) {
        let mut ephemeral_error: Option<Error> = None;
        let mut ring = ErrorRingBuffer::new();

        loop {
            if scope.is_cancelled() {
                let _ = channels
                    .event
                    .send(AgentEvent::Error {
                        kind: "scope-cancelled".to_string(),
                        message: Error::ScopeCancelled.to_string(),
                    })
                    .await;
                return;
            }

            let (messages, ctx_events) = self
                .context_manager
                .run(self.memory.get_all(), self.config.context_token_budget);
            for event in ctx_events {
                let _ = channels.event.send(event).await;
            }
            self.memory.replace_all(messages);
            self.memory.prune(self.config.context_token_budget);

            let mut prompt = self.memory.get_all();
            if let Some(err) = &ephemeral_error {
                prompt.push(Message::system(render_recovery_message(err)));
            }

            let stream_result = self.provider.stream_completion(&prompt, scope.clone()).await;
            let mut stream = match stream_result {
                Ok(stream) => stream,
                Err(err) => {
                    error!("provider transport failure: {err}");
                    let _ = channels
                        .event
                        .send(AgentEvent::Error {
                            kind: "terminal".to_string(),
                            message: err.to_string(),
                        })
                        .await;
                    return;
                }
            };

            let mut parsers = Parsers::new();
            let mut segment_state = SegmentState::default();
            let mut tool_handled = false;

            use futures::StreamExt;
            while let Some(chunk) = stream.next().await {
                if let Some(err) = &chunk.error {
                    error!("provider stream error: {err}");
                    let _ = channels
                        .event
                        .send(AgentEvent::Error {
                            kind: "terminal".to_string(),
                            message: err.clone(),
                        })
                        .await;
                    return;
                }

                for segment in parsers.feed(&chunk) {
                    if let Some(body) = self
                        .handle_segment(
                            segment,
                            &mut segment_state,
                            channels,
                        )
                        .await
                    {
                        let outcome = self
                            .handle_tool_call_body(
                                &body,
                                scope,
                                channels,
                                &mut ring,
                            )
                            .await;
                        match outcome {
                            TurnOutcome::Continue(next_error) => {
                                ephemeral_error = next_error;
                                tool_handled = true;
                            }
                            TurnOutcome::Breaker => {
                                return;
                            }
                            TurnOutcome::EndTurn => {
                                return;
                            }
                        }
                        break;
                    }
                }

                if tool_handled {
                    break;
                }

                if chunk.finished {
                    break;
                }
            }

            if tool_handled {
                // One tool call handled this iteration; loop back to
                // rebuild the prompt for the next iteration (unless the
                // tool already returned, which exits via TurnOutcome above).
                continue;
            }

            let flushed = parsers.flush();
            for segment in flushed.segments {
                self.emit_for_segment(segment, &mut segment_state, channels)
                    .await;
            }
            if segment_state.in_message {
                let _ = channels.event.send(AgentEvent::MessageEnd).await;
                segment_state.in_message = false;
            }

            if let Some(body) = flushed.unterminated_tool_call_body {
                debug!("stream ended with an unterminated tool call body: {body}");
            }

            // Stream ended without a complete tool call (§4.8's final branch).
            let no_tool_call = Error::NoToolCall;
            warn!("no tool call produced this iteration");
            let tripped = ring.record(&no_tool_call.to_string());
            if tripped {
                error!("circuit breaker tripped: identical error repeated");
                let _ = channels
                    .event
                    .send(AgentEvent::Error {
                        kind: "identical-error-repeated".to_string(),
                        message: no_tool_call.to_string(),
                    })
                    .await;
                return;
            }
            ephemeral_error = Some(no_tool_call);
        }
    }

    /// Translate one [`ParsedSegment`] into the richer [`AgentEvent`]s,
    /// returning `Some(body)` when this segment is a `ToolCallEnd` (so the
    /// caller can act on the body after emitting the event).
    async fn handle_segment(
        &self,
        segment: ParsedSegment,
        state: &mut SegmentState,
        channels: &mut AgentChannels,
    ) -> Option<String> {
        match segment {
            ParsedSegment::ToolCallEnd(body) => {
                // Name never resolved mid-buffer (malformed/unusual
                // ordering): emit the deferred ToolCallStart with None now.
                if state.tool_call_start_pending {
                    let _ = channels.event.send(AgentEvent::ToolCallStart(None)).await;
                    state.tool_call_start_pending = false;
                }
                let _ = channels.event.send(AgentEvent::ToolCallEnd).await;
                Some(body)
            }
            other => {
                self.emit_for_segment(other, state, channels).await;
                None
            }
        }
    }

    /// Emits the `MessageStart`/`MessageEnd` bracketing events around runs of
    /// `MessageDelta` (§3's `AgentEvent` list; §8 scenario 1), in addition to
    /// the segment's own translated event. `AgentEvent::ToolCallStart` is
    /// deferred until the tool name resolves (SPEC_FULL.md's supplement on
    /// `ToolCallStart` naming).
    async fn emit_for_segment(
        &self,
        segment: ParsedSegment,
        state: &mut SegmentState,
        channels: &mut AgentChannels,
    ) {
        let leaves_message = !matches!(segment, ParsedSegment::MessageDelta(_));
        if leaves_message && state.in_message {
            let _ = channels.event.send(AgentEvent::MessageEnd).await;
            state.in_message = false;
        }

        match segment {
            ParsedSegment::ThinkingStart => {
                let _ = channels.event.send(AgentEvent::ThinkingStart).await;
            }
            ParsedSegment::ThinkingDelta(text) => {
                let _ = channels.event.send(AgentEvent::ThinkingDelta(text)).await;
            }
            ParsedSegment::ThinkingEnd => {
                let _ = channels.event.send(AgentEvent::ThinkingEnd).await;
            }
            ParsedSegment::MessageDelta(text) => {
                if !state.in_message {
                    let _ = channels.event.send(AgentEvent::MessageStart).await;
                    state.in_message = true;
                }
                let _ = channels.event.send(AgentEvent::MessageDelta(text)).await;
            }
            ParsedSegment::ToolCallStart => {
                // Held back until the name resolves (via ToolCallDelta) or
                // ToolCallEnd arrives first; see `handle_segment`.
                state.tool_call_start_pending = true;
            }
            ParsedSegment::ToolCallDelta(name) => {
                if state.tool_call_start_pending {
                    let _ = channels
                        .event
                        .send(AgentEvent::ToolCallStart(Some(name)))
                        .await;
                    state.tool_call_start_pending = false;
                } else {
                    let _ = channels.event.send(AgentEvent::ToolCallDelta).await;
                }
            }
            ParsedSegment::ToolCallEnd(_) => {
                // Normally intercepted in `handle_segment` so the body can
                // be dispatched; reached here only via `flush()`, where a
                // tool call completing in the flushed tail has no dispatch
                // path left (the iteration already ended) and is emitted
                // for observability only (§4.8: text after a closing
                // `</tool>` is not executed twice).
                if state.tool_call_start_pending {
                    let _ = channels.event.send(AgentEvent::ToolCallStart(None)).await;
                    state.tool_call_start_pending = false;
                }
                let _ = channels.event.send(AgentEvent::ToolCallEnd).await;
            }
        }
    }

    /// Parse, approve, and execute a completed tool-call body. Returns what
    /// the turn loop should do next.
    async fn handle_tool_call_body(
        &self,
        body: &str,
        scope: &Scope,
        channels: &mut AgentChannels,
        ring: &mut ErrorRingBuffer,
    ) -> TurnOutcome {
        let tool_call = match crate::parser::parse_tool_call(body) {
            Ok(call) => call,
            Err(err) => {
                warn!("tool call body failed to parse: {err}");
                return self.track_recoverable(err, channels, ring).await;
            }
        };

        let tool = match self.tools.lookup(&tool_call.tool_name) {
            Some(tool) => tool,
            None => {
                let names = self.tools.names().join(", ");
                warn!("unknown tool requested: {}", tool_call.tool_name);
                let err = Error::unknown_tool(format!("{} (available: {names})", tool_call.tool_name));
                return self.track_recoverable(err, channels, ring).await;
            }
        };

        let command_preview = if tool_call.tool_name == "execute_command" {
            tool_call
                .arguments
                .field("command")
                .map(|n| n.as_display_string())
        } else {
            None
        };

        let (id, _unused_rx) = self.approval.open();
        let granted = if self
            .approval
            .auto_grant(&tool_call.tool_name, command_preview.as_deref())
        {
            // Auto-granted: still resolve and announce via ToolApprovalGranted
            // (§4.6 scenario 6), but never emit ToolApprovalRequest.
            self.approval.resolve(&id, ApprovalResponse::Granted);
            let _ = channels
                .event
                .send(AgentEvent::ToolApprovalGranted { id })
                .await;
            true
        } else {
            let _ = channels
                .event
                .send(AgentEvent::ToolApprovalRequest {
                    id: id.clone(),
                    tool_name: tool_call.tool_name.clone(),
                    args_summary: tool_call.arguments.as_display_string(),
                    preview: command_preview.clone(),
                })
                .await;
            let response = self
                .approval
                .await_response(&id, _unused_rx, self.config.approval_timeout)
                .await;
            match response {
                ApprovalResponse::Granted => {
                    let _ = channels
                        .event
                        .send(AgentEvent::ToolApprovalGranted { id })
                        .await;
                    true
                }
                ApprovalResponse::Denied => {
                    let _ = channels
                        .event
                        .send(AgentEvent::ToolApprovalDenied { id })
                        .await;
                    false
                }
            }
        };

        if !granted {
            let err = Error::tool_denied(format!("'{}' was not approved", tool_call.tool_name));
            return self.track_recoverable(err, channels, ring).await;
        }

        let ctx = ToolContext {
            scope: scope.clone(),
            events: channels.event.clone(),
            workspace: self.workspace.clone(),
        };

        let result = tool.execute(&ctx, &tool_call.arguments).await;
        match result {
            Ok(output) => {
                let _ = channels
                    .event
                    .send(AgentEvent::ToolResult {
                        name: tool_call.tool_name.clone(),
                        output: output.clone(),
                        is_error: false,
                    })
                    .await;
                ring.reset();
                if tool.is_loop_breaking() {
                    info!("loop-breaking tool '{}' completed, ending turn", tool_call.tool_name);
                    let _ = channels.event.send(AgentEvent::TurnEnd).await;
                    TurnOutcome::EndTurn
                } else {
                    match Message::tool_result(&tool_call.tool_name, output) {
                        Ok(msg) => self.memory.add(msg),
                        Err(err) => warn!("failed to render empty tool result: {err}"),
                    }
                    TurnOutcome::Continue(None)
                }
            }
            Err(err) => {
                warn!("tool '{}' execution failed: {err}", tool_call.tool_name);
                let _ = channels
                    .event
                    .send(AgentEvent::ToolResult {
                        name: tool_call.tool_name.clone(),
                        output: err.to_string(),
                        is_error: true,
                    })
                    .await;
                self.track_recoverable(err, channels, ring).await
            }
        }
    }

    async fn track_recoverable(
        &self,
        err: Error,
        channels: &mut AgentChannels,
        ring: &mut ErrorRingBuffer,
    ) -> TurnOutcome {
        debug_assert_eq!(err.kind(), ErrorKind::Recoverable);
        if !err.feeds_circuit_breaker() {
            return TurnOutcome::Continue(Some(err));
        }
        let rendered = err.to_string();
        if ring.record(&rendered) {
            error!("circuit breaker tripped: {rendered}");
            let _ = channels
                .event
                .send(AgentEvent::Error {
                    kind: "identical-error-repeated".to_string(),
                    message: rendered,
                })
                .await;
            return TurnOutcome::Breaker;
        }
        TurnOutcome::Continue(Some(err))
    }
}

enum TurnOutcome {
    /// Keep iterating; `Some(err)` becomes next iteration's ephemeral error.
    Continue(Option<Error>),
    /// Circuit breaker tripped; the turn (and the error event) is already
    /// handled, caller returns.
    Breaker,
    /// A loop-breaking tool completed successfully; turn is over.
    EndTurn,
}

/// Per-iteration state threaded through segment translation: whether
/// `AgentEvent::ToolCallStart` is still owed (SPEC_FULL.md's
/// ToolCallStart-naming supplement defers it until the name resolves or
/// `ToolCallEnd` arrives first) and whether a `MessageStart` has been
/// emitted without its matching `MessageEnd` yet.
#[derive(Default)]
struct SegmentState {
    tool_call_start_pending: bool,
    in_message: bool,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::provider::ChunkStream;
    use crate::types::ContentChunk;
    use async_trait::async_trait;
    use futures::stream;
    use futures::StreamExt as _;
    use std::time::Duration as StdDuration;

    struct ScriptedProvider {
        responses: std::sync::Mutex<Vec<Vec<ContentChunk>>>,
    }

    #[async_trait]
    impl ProviderAdapter for ScriptedProvider {
        async fn stream_completion(&self, _messages: &[Message], _scope: Scope) -> Result<ChunkStream> {
            let mut guard = self.responses.lock().unwrap();
            let next = if guard.is_empty() {
                vec![ContentChunk::finish(None)]
            } else {
                guard.remove(0)
            };
            Ok(stream::iter(next).boxed())
        }
    }

    struct Completion;

    #[async_trait]
    impl Tool for Completion {
        fn name(&self) -> &str {
            "task_completion"
        }
        fn description(&self) -> &str {
            "ends the turn"
        }
        fn schema(&self) -> &serde_json::Value {
            static SCHEMA: std::sync::OnceLock<serde_json::Value> = std::sync::OnceLock::new();
            SCHEMA.get_or_init(|| serde_json::json!({}))
        }
        async fn execute(&self, _ctx: &ToolContext, _args: &crate::types::ArgNode) -> Result<String> {
            Ok("done".to_string())
        }
        fn is_loop_breaking(&self) -> bool {
            true
        }
    }

    fn tool_call_chunk(tool: &str) -> ContentChunk {
        ContentChunk::delta(format!(
            "<tool><tool_name>{tool}</tool_name><arguments></arguments></tool>"
        ))
    }

    #[tokio::test]
    async fn a_loop_breaking_tool_call_ends_the_turn_and_emits_turn_end() {
        let config = AgentConfig::builder()
            .base_url("http://localhost:1234/v1")
            .model("test-model")
            .workspace_root(std::env::temp_dir())
            .auto_approve("task_completion", true)
            .build()
            .unwrap();

        let provider = Arc::new(ScriptedProvider {
            responses: std::sync::Mutex::new(vec![vec![
                tool_call_chunk("task_completion"),
                ContentChunk::finish(None),
            ]]),
        });

        let handle = AgentBuilder::new(config, provider)
            .with_tool(Arc::new(Completion))
            .unwrap()
            .spawn()
            .unwrap();

        handle
            .input
            .send(Input::UserInput("hello".to_string()))
            .await
            .unwrap();

        let mut handle = handle;
        let mut saw_turn_end = false;
        let mut saw_tool_result = false;
        let deadline = tokio::time::Instant::now() + StdDuration::from_secs(2);
        while tokio::time::Instant::now() < deadline {
            match tokio::time::timeout(StdDuration::from_millis(200), handle.event.recv()).await {
                Ok(Some(AgentEvent::TurnEnd)) => {
                    saw_turn_end = true;
                    break;
                }
                Ok(Some(AgentEvent::ToolResult { is_error, .. })) => {
                    saw_tool_result = !is_error;
                }
                Ok(Some(_)) => {}
                Ok(None) => break,
                Err(_) => continue,
            }
        }
        assert!(saw_turn_end);
        assert!(saw_tool_result);
    }

    #[tokio::test]
    async fn five_consecutive_no_tool_call_iterations_trip_the_breaker() {
        let config = AgentConfig::builder()
            .base_url("http://localhost:1234/v1")
            .model("test-model")
            .workspace_root(std::env::temp_dir())
            .build()
            .unwrap();

        // Every call to stream_completion returns plain text with no tool
        // call, five times in a row (plus a couple extra finishes that are
        // never reached once the breaker trips).
        let responses: Vec<Vec<ContentChunk>> = (0..6)
            .map(|_| vec![ContentChunk::delta("no tool here"), ContentChunk::finish(None)])
            .collect();
        let provider = Arc::new(ScriptedProvider {
            responses: std::sync::Mutex::new(responses),
        });

        let handle = AgentBuilder::new(config, provider).spawn().unwrap();
        handle
            .input
            .send(Input::UserInput("hello".to_string()))
            .await
            .unwrap();

        let mut handle = handle;
        let mut tripped = false;
        let deadline = tokio::time::Instant::now() + StdDuration::from_secs(2);
        while tokio::time::Instant::now() < deadline {
            match tokio::time::timeout(StdDuration::from_millis(200), handle.event.recv()).await {
                Ok(Some(AgentEvent::Error { kind, .. })) if kind == "identical-error-repeated" => {
                    tripped = true;
                    break;
                }
                Ok(Some(_)) => {}
                Ok(None) => break,
                Err(_) => continue,
            }
        }
        assert!(tripped);
    }
}
