//! # agentcore-rt
//!
//! An event-driven core runtime for streaming LLM agents: a long-lived loop
//! that coordinates a provider (streaming LLM backend), a parser pipeline
//! that extracts structured tool invocations from streaming text, a
//! tool-execution subsystem with user approval and cooperative cancellation,
//! a conversation memory with token-budgeted pruning plus pluggable context
//! summarization, and a self-healing error recovery mechanism with a
//! circuit breaker.
//!
//! ## Architecture
//!
//! - **agent**: the event loop (`Agent`/`AgentBuilder`) that owns memory,
//!   the tool/approval/command registries, and the channel bundle.
//! - **channels**: the channel bundle connecting the agent to its executor,
//!   plus the cooperative cancellation primitive (`Scope`).
//! - **types**: messages, streamed content chunks, and the tool-call
//!   argument tree.
//! - **event**: the parser-level (`ParsedSegment`) and agent-level
//!   (`AgentEvent`) event types, plus the `Input` envelope.
//! - **parser**: the two-stage streaming parser (thinking/message split,
//!   then tool-call extraction) and the XML tool-call body parser.
//! - **memory**: conversation history with recency-based token pruning.
//! - **context**: the pluggable context-summarization strategy chain.
//! - **tools**: the tool registry and `Tool` trait.
//! - **command**: the built-in `execute_command` tool and its streaming
//!   cancellation-aware execution.
//! - **approval**: the tool-approval request/response protocol.
//! - **workspace**: the workspace-root containment guard.
//! - **recovery**: ephemeral error recovery messages and the circuit
//!   breaker's ring buffer.
//! - **provider**: the `ProviderAdapter` trait and an illustrative
//!   HTTP/SSE-backed implementation for local OpenAI-compatible servers.
//! - **retry**: exponential backoff with jitter, used by the provider
//!   adapter and available to callers with similar needs.
//! - **config**: `AgentConfig`/`AgentConfigBuilder` and provider helpers.
//! - **error**: the crate's error taxonomy.
//!
//! ## Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use agentcore_rt::{AgentBuilder, AgentConfig, HttpProvider, Input};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = AgentConfig::builder()
//!         .base_url("http://localhost:1234/v1")
//!         .model("qwen2.5-32b-instruct")
//!         .workspace_root(std::env::current_dir()?)
//!         .build()?;
//!
//!     let provider = Arc::new(HttpProvider::new(&config.base_url, &config.model));
//!     let mut executor = AgentBuilder::new(config, provider).spawn()?;
//!
//!     executor.input.send(Input::UserInput("list the files here".into())).await?;
//!     while let Some(event) = executor.event.recv().await {
//!         println!("{event:?}");
//!     }
//!
//!     Ok(())
//! }
//! ```

// ============================================================================
// MODULE DECLARATIONS
// ============================================================================

mod agent;
mod approval;
mod channels;
mod command;
mod config;
mod context;
mod error;
mod event;
mod memory;
mod parser;
mod provider;
mod recovery;
mod retry;
mod tools;
mod types;
mod workspace;

// ============================================================================
// PUBLIC EXPORTS
// ============================================================================

pub use agent::{AgentBuilder};

pub use channels::{channel_pair, AgentChannels, CancelRequest, ExecutorHandle, Scope};

pub use approval::{ApprovalManager, CommandPattern, PatternKind};

pub use command::{CommandRegistry, ExecuteCommandTool};

pub use config::{
    get_base_url, get_model, AgentConfig, AgentConfigBuilder, Provider, DEFAULT_APPROVAL_TIMEOUT,
    DEFAULT_COMMAND_TIMEOUT, DEFAULT_CONTEXT_TOKEN_BUDGET,
};

pub use context::{ContextManager, SummarizationStrategy, ToolCallSummarizer};

pub use error::{Error, ErrorKind, Result};

pub use event::{AgentEvent, ApprovalResponse, Input, OutputStream, ParsedSegment};

pub use memory::{estimate_tokens, Memory};

pub use parser::{parse_tool_call, FlushResult, Parsers};

pub use provider::{ChunkStream, HttpProvider, ProviderAdapter};

pub use recovery::{render_recovery_message, ErrorRingBuffer};

pub use retry::{retry_with_backoff, RetryPolicy};

pub use tools::{Tool, ToolContext, ToolRegistry, DEFAULT_LOOP_BREAKING_TOOLS};

pub use types::{
    ArgNode, ChunkKind, ContentChunk, Message, Role, Scalar, ToolCall, ToolMetadata, Usage,
};

pub use workspace::WorkspaceGuard;

// ============================================================================
// CONVENIENCE PRELUDE
// ============================================================================

/// The most commonly used types for typical usage:
/// `use agentcore_rt::prelude::*;`.
pub mod prelude {
    pub use crate::{
        AgentBuilder, AgentConfig, AgentEvent, ApprovalResponse, ContentChunk, Error, Input,
        Memory, Message, ProviderAdapter, Result, Role, Tool, ToolContext, ToolRegistry,
    };
}
