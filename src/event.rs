//! Event and envelope types that flow on the agent's channels (§3, §4.10).
//!
//! [`ParsedSegment`] is the parser layer's output — pure, boundary-invariant
//! classification of streamed bytes. [`AgentEvent`] is the richer, agent-
//! level event the executor actually observes; the agent loop is what
//! translates segments into events (enriching `ToolCallStart` with a
//! resolved name, attaching tool results, command lifecycle, etc. — see
//! `agent.rs`). [`Input`] is what flows the other direction.

use std::time::Duration;

/// One unit of output from the streaming parsers (§4.1). Pure data: the same
/// byte sequence always produces the same segment sequence regardless of how
/// it was chunked.
#[derive(Debug, Clone, PartialEq)]
pub enum ParsedSegment {
    ThinkingStart,
    ThinkingDelta(String),
    ThinkingEnd,
    MessageDelta(String),
    ToolCallStart,
    /// Carries the tool name once it becomes extractable from the buffered
    /// body (see §4.1); not guaranteed to fire if the body never yields a
    /// complete `<tool_name>...</tool_name>` element before `ToolCallEnd`.
    ToolCallDelta(String),
    /// Carries the full buffered `<tool>...</tool>` body.
    ToolCallEnd(String),
}

/// Which stream a piece of command output came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputStream {
    Stdout,
    Stderr,
}

/// The tagged event envelope delivered to the executor on the `event`
/// channel (§3 `AgentEvent`, §4.10).
#[derive(Debug, Clone, PartialEq)]
pub enum AgentEvent {
    ThinkingStart,
    ThinkingDelta(String),
    ThinkingEnd,
    MessageStart,
    MessageDelta(String),
    MessageEnd,
    /// Carries the resolved tool name when known at emission time (see
    /// SPEC_FULL.md's resolution of the ToolCallStart/name ambiguity).
    ToolCallStart(Option<String>),
    ToolCallDelta,
    ToolCallEnd,
    ToolResult {
        name: String,
        output: String,
        is_error: bool,
    },
    ToolApprovalRequest {
        id: String,
        tool_name: String,
        args_summary: String,
        preview: Option<String>,
    },
    ToolApprovalGranted {
        id: String,
    },
    ToolApprovalDenied {
        id: String,
    },
    ToolRejected {
        id: String,
        reason: String,
    },
    CommandExecutionStart {
        exec_id: String,
        command: String,
    },
    CommandOutput {
        exec_id: String,
        stream: OutputStream,
        text: String,
    },
    CommandExecutionComplete {
        exec_id: String,
        exit_code: i32,
        duration: Duration,
    },
    CommandExecutionFailed {
        exec_id: String,
        error: String,
    },
    CommandExecutionCancelled {
        exec_id: String,
    },
    ContextSummarizationStart {
        strategy: String,
        before_tokens: usize,
    },
    ContextSummarizationComplete {
        strategy: String,
        after_tokens: usize,
        saved: usize,
    },
    ContextSummarizationError {
        strategy: String,
        error: String,
    },
    TurnEnd,
    Error {
        kind: String,
        message: String,
    },
    StatusShutdown,
}

/// Input envelope accepted on the `input` channel (§3, §4.10).
#[derive(Debug, Clone, PartialEq)]
pub enum Input {
    UserInput(String),
    Cancel(Option<String>),
    Interrupt,
}

/// Approval decisions accepted on the `approval` channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApprovalResponse {
    Granted,
    Denied,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn segments_compare_by_value() {
        assert_eq!(
            ParsedSegment::MessageDelta("hi".into()),
            ParsedSegment::MessageDelta("hi".into())
        );
        assert_ne!(ParsedSegment::ThinkingStart, ParsedSegment::ThinkingEnd);
    }
}
