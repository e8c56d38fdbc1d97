//! # Error Types for the Agent Runtime Core
//!
//! This module defines the error taxonomy used throughout the crate (see
//! spec §7): a `thiserror`-derived enum covering transport, parsing, tool,
//! and configuration failures, plus an [`ErrorKind`] classification that
//! tells the agent loop whether an error is terminal (ends the turn and
//! propagates) or recoverable (feeds the ephemeral error-recovery prompt and
//! the circuit breaker).
//!
//! ## Design Philosophy
//!
//! - **Explicit Error Handling**: every fallible operation returns
//!   `Result<T>`; no panics in non-test code.
//! - **No Silent Failures**: all errors are propagated explicitly.
//! - **Rich Context**: each variant carries enough detail to render the
//!   spec's deterministic recovery messages (§4.9) without re-deriving them
//!   elsewhere.
//! - **Easy Conversion**: `#[from]` on `Http`/`Json` keeps `?` ergonomic for
//!   provider and parsing code.
//!
//! ## Usage
//!
//! ```ignore
//! use agentcore_rt::{Error, Result};
//!
//! fn example() -> Result<()> {
//!     if some_condition {
//!         return Err(Error::config("Invalid model name"));
//!     }
//!     let response = http_client.get(url).send().await?; // Auto-converts to Error::Http
//!     let json = serde_json::from_str(data)?; // Auto-converts to Error::Json
//!     Ok(())
//! }
//! ```

use thiserror::Error;

// ============================================================================
// TYPE ALIASES
// ============================================================================

/// Type alias for `Result<T, Error>` used throughout the crate.
pub type Result<T> = std::result::Result<T, Error>;

// ============================================================================
// ERROR KIND (terminal vs. recoverable classification)
// ============================================================================

/// The semantic classification from spec §7 — not a type name, a behavior
/// tag. The agent loop uses this to decide whether an error ends the turn
/// immediately (`Terminal`) or feeds the ephemeral recovery prompt and the
/// circuit breaker (`Recoverable`).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// provider transport failure (after internal retries), scope
    /// cancellation, breaker trip, or unrecoverable registry misconfiguration.
    Terminal,
    /// no tool call in response, tool body parse failure, unknown tool name,
    /// tool execution error (including denial and cancellation).
    Recoverable,
}

// ============================================================================
// ERROR ENUM
// ============================================================================

/// Comprehensive error type covering all failure modes in the runtime.
#[derive(Error, Debug)]
pub enum Error {
    /// HTTP request failed due to network issues, connection problems, or
    /// HTTP-level errors. Wraps `reqwest::Error`; auto-converted via `?`.
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    /// JSON serialization or deserialization failed. Wraps
    /// `serde_json::Error`; auto-converted via `?`.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Invalid configuration provided when building `AgentConfig` or
    /// `AgentOptions`-equivalent types (missing required fields, invalid
    /// URL, invalid timeout/budget values).
    #[error("Invalid configuration: {0}")]
    Config(String),

    /// Error response received from the model server's API (request
    /// succeeded at the transport level, but the backend rejected it).
    #[error("API error: {0}")]
    Api(String),

    /// Failure while processing the streaming response (malformed SSE,
    /// connection interrupted mid-stream, unexpected end of stream).
    #[error("Streaming error: {0}")]
    Stream(String),

    /// Tool execution or registration failed: handler returned an error,
    /// name collision at registration, or lookup failure outside the
    /// registry's own unknown-tool path.
    #[error("Tool execution error: {0}")]
    Tool(String),

    /// Invalid input supplied by the caller (empty prompt, malformed
    /// parameter, out-of-range value).
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Request exceeded the configured timeout duration.
    #[error("Request timeout")]
    Timeout,

    /// The buffered `<tool>...</tool>` body could not be parsed as XML,
    /// even after the ampersand-escaping retry (§4.1).
    #[error("invalid tool call: {0}")]
    ParseFailure(String),

    /// The stream ended without ever producing a closing `</tool>`.
    #[error("no tool call was produced; you must call a tool")]
    NoToolCall,

    /// A parsed tool name is not present in the registry.
    #[error("unknown tool: {0}")]
    UnknownTool(String),

    /// Approval was denied or expired.
    #[error("tool denied: {0}")]
    ToolDenied(String),

    /// A file or working-directory argument resolved outside the workspace
    /// root (§4.11).
    #[error("path outside workspace: {0}")]
    PathOutsideWorkspace(String),

    /// A running command was cancelled, by user request or by hitting its
    /// configured timeout.
    #[error("command {0}: {1}")]
    CommandTerminated(String, String),

    /// The circuit breaker observed 5 consecutive identical recoverable
    /// errors and tripped the turn.
    #[error("identical error repeated: {0}")]
    BreakerTripped(String),

    /// The agent scope was cancelled (shutdown or explicit interrupt) while
    /// a turn was in flight.
    #[error("scope cancelled")]
    ScopeCancelled,

    /// Miscellaneous error that doesn't fit other categories.
    #[error("Error: {0}")]
    Other(String),
}

// ============================================================================
// CONVENIENCE CONSTRUCTORS
// ============================================================================

impl Error {
    pub fn config(msg: impl Into<String>) -> Self {
        Error::Config(msg.into())
    }

    pub fn api(msg: impl Into<String>) -> Self {
        Error::Api(msg.into())
    }

    pub fn stream(msg: impl Into<String>) -> Self {
        Error::Stream(msg.into())
    }

    pub fn tool(msg: impl Into<String>) -> Self {
        Error::Tool(msg.into())
    }

    pub fn invalid_input(msg: impl Into<String>) -> Self {
        Error::InvalidInput(msg.into())
    }

    pub fn other(msg: impl Into<String>) -> Self {
        Error::Other(msg.into())
    }

    pub fn timeout() -> Self {
        Error::Timeout
    }

    pub fn parse_failure(msg: impl Into<String>) -> Self {
        Error::ParseFailure(msg.into())
    }

    pub fn unknown_tool(name: impl Into<String>) -> Self {
        Error::UnknownTool(name.into())
    }

    pub fn tool_denied(reason: impl Into<String>) -> Self {
        Error::ToolDenied(reason.into())
    }

    pub fn path_outside_workspace(path: impl Into<String>) -> Self {
        Error::PathOutsideWorkspace(path.into())
    }

    /// Classify this error per spec §7. Used by the agent loop to decide
    /// whether to propagate immediately or feed the recovery/breaker path.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::Http(_) | Error::Timeout | Error::ScopeCancelled | Error::BreakerTripped(_) => {
                ErrorKind::Terminal
            }

            Error::Json(_)
            | Error::Config(_)
            | Error::Api(_)
            | Error::Stream(_)
            | Error::Tool(_)
            | Error::InvalidInput(_)
            | Error::ParseFailure(_)
            | Error::NoToolCall
            | Error::UnknownTool(_)
            | Error::ToolDenied(_)
            | Error::PathOutsideWorkspace(_)
            | Error::CommandTerminated(_, _)
            | Error::Other(_) => ErrorKind::Recoverable,
        }
    }

    /// `true` for the subset of recoverable errors that the ring buffer and
    /// circuit breaker track (§4.9). `Config`/`Api`/`Stream` are recoverable
    /// in the taxonomy but don't participate in breaker tracking: they
    /// surface before a turn starts or from a misused API, not from the
    /// per-iteration tool cycle the breaker watches.
    pub fn feeds_circuit_breaker(&self) -> bool {
        matches!(
            self,
            Error::ParseFailure(_)
                | Error::NoToolCall
                | Error::UnknownTool(_)
                | Error::ToolDenied(_)
                | Error::Tool(_)
                | Error::PathOutsideWorkspace(_)
                | Error::CommandTerminated(_, _)
        )
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_config() {
        let err = Error::config("Invalid model");
        assert!(matches!(err, Error::Config(_)));
        assert_eq!(err.to_string(), "Invalid configuration: Invalid model");
    }

    #[test]
    fn test_error_api() {
        let err = Error::api("500 Internal Server Error");
        assert!(matches!(err, Error::Api(_)));
        assert_eq!(err.to_string(), "API error: 500 Internal Server Error");
    }

    #[test]
    fn test_error_stream() {
        let err = Error::stream("Connection lost");
        assert!(matches!(err, Error::Stream(_)));
        assert_eq!(err.to_string(), "Streaming error: Connection lost");
    }

    #[test]
    fn test_error_tool() {
        let err = Error::tool("Tool not found");
        assert!(matches!(err, Error::Tool(_)));
        assert_eq!(err.to_string(), "Tool execution error: Tool not found");
    }

    #[test]
    fn test_error_invalid_input() {
        let err = Error::invalid_input("Missing parameter");
        assert!(matches!(err, Error::InvalidInput(_)));
        assert_eq!(err.to_string(), "Invalid input: Missing parameter");
    }

    #[test]
    fn test_error_timeout() {
        let err = Error::timeout();
        assert!(matches!(err, Error::Timeout));
        assert_eq!(err.to_string(), "Request timeout");
    }

    #[test]
    fn test_error_other() {
        let err = Error::other("Something went wrong");
        assert!(matches!(err, Error::Other(_)));
        assert_eq!(err.to_string(), "Error: Something went wrong");
    }

    #[test]
    fn test_error_from_serde_json() {
        let json_err = serde_json::from_str::<serde_json::Value>("invalid json").unwrap_err();
        let err: Error = json_err.into();
        assert!(matches!(err, Error::Json(_)));
    }

    #[test]
    fn terminal_vs_recoverable_classification() {
        assert_eq!(Error::timeout().kind(), ErrorKind::Terminal);
        assert_eq!(Error::ScopeCancelled.kind(), ErrorKind::Terminal);
        assert_eq!(
            Error::BreakerTripped("x".into()).kind(),
            ErrorKind::Terminal
        );
        assert_eq!(Error::NoToolCall.kind(), ErrorKind::Recoverable);
        assert_eq!(Error::unknown_tool("nope").kind(), ErrorKind::Recoverable);
        assert_eq!(
            Error::tool_denied("user denied").kind(),
            ErrorKind::Recoverable
        );
    }

    #[test]
    fn breaker_tracks_only_turn_cycle_errors() {
        assert!(Error::NoToolCall.feeds_circuit_breaker());
        assert!(Error::unknown_tool("nope").feeds_circuit_breaker());
        assert!(!Error::config("x").feeds_circuit_breaker());
        assert!(!Error::api("x").feeds_circuit_breaker());
    }

    #[test]
    fn test_result_type_alias() {
        fn _returns_result() -> Result<i32> {
            Ok(42)
        }

        fn _returns_error() -> Result<i32> {
            Err(Error::timeout())
        }
    }
}
