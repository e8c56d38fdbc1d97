//! Ephemeral error recovery and the circuit breaker (§4.9, C9).
//!
//! Recovery messages are never persisted to [`crate::memory::Memory`] — they
//! exist only to be appended to the single outgoing prompt that follows a
//! recoverable error, then discarded. The ring buffer tracks exact-match
//! repetition of a recoverable error's rendered message across iterations of
//! the same turn; five identical entries in a row trips the breaker and ends
//! the turn with [`crate::error::Error::BreakerTripped`].

use crate::error::Error;

const RING_SIZE: usize = 5;

/// Fixed-size circular buffer of the last few recoverable error strings seen
/// in the current turn, used only to detect an unbroken run of identical
/// errors.
#[derive(Debug, Default)]
pub struct ErrorRingBuffer {
    slots: Vec<Option<String>>,
    next: usize,
    filled: usize,
}

impl ErrorRingBuffer {
    pub fn new() -> Self {
        Self {
            slots: vec![None; RING_SIZE],
            next: 0,
            filled: 0,
        }
    }

    /// Record one recoverable error's rendered message. Returns `true` if,
    /// after recording, the buffer holds `RING_SIZE` identical entries in a
    /// row — i.e. the breaker has tripped.
    pub fn record(&mut self, message: &str) -> bool {
        self.slots[self.next] = Some(message.to_string());
        self.next = (self.next + 1) % RING_SIZE;
        self.filled = (self.filled + 1).min(RING_SIZE);

        if self.filled < RING_SIZE {
            return false;
        }
        self.slots
            .iter()
            .all(|slot| slot.as_deref() == Some(message))
    }

    /// Reset on any successful iteration (§4.9: the run only counts
    /// *consecutive* identical errors).
    pub fn reset(&mut self) {
        self.slots = vec![None; RING_SIZE];
        self.next = 0;
        self.filled = 0;
    }
}

/// Render the ephemeral recovery prompt text appended for one recoverable
/// error (§4.9). Deterministic: the same error always renders the same text,
/// so the ring buffer's exact-match comparison is meaningful.
pub fn render_recovery_message(error: &Error) -> String {
    match error {
        Error::NoToolCall => {
            "Your previous response did not contain a tool call. You must call \
             exactly one tool to make progress; respond again with a single \
             <tool>...</tool> block."
                .to_string()
        }
        Error::ParseFailure(detail) => format!(
            "Your previous tool call could not be parsed: {detail}. Check that \
             the XML body is well-formed and try again."
        ),
        Error::UnknownTool(name) => format!(
            "'{name}' is not a registered tool. Choose one of the available \
             tools and try again."
        ),
        Error::ToolDenied(reason) => format!(
            "Your tool call was not approved: {reason}. Consider a different \
             approach or ask the user for clarification."
        ),
        Error::Tool(detail) => format!(
            "Your tool call failed during execution: {detail}. Adjust your \
             arguments or approach and try again."
        ),
        Error::PathOutsideWorkspace(path) => format!(
            "The path '{path}' is outside the workspace and cannot be accessed. \
             Use a path inside the workspace."
        ),
        Error::CommandTerminated(exec_id, reason) => format!(
            "Command execution '{exec_id}' did not complete: {reason}. Consider \
             a shorter-running command or a different approach."
        ),
        other => format!("An error occurred: {other}"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn five_identical_errors_in_a_row_trips_the_breaker() {
        let mut ring = ErrorRingBuffer::new();
        for _ in 0..4 {
            assert!(!ring.record("same"));
        }
        assert!(ring.record("same"));
    }

    #[test]
    fn a_differing_error_resets_the_run() {
        let mut ring = ErrorRingBuffer::new();
        for _ in 0..4 {
            assert!(!ring.record("same"));
        }
        assert!(!ring.record("different"));
        for _ in 0..3 {
            assert!(!ring.record("different"));
        }
        assert!(ring.record("different"));
    }

    #[test]
    fn explicit_reset_clears_the_run() {
        let mut ring = ErrorRingBuffer::new();
        for _ in 0..4 {
            ring.record("same");
        }
        ring.reset();
        for _ in 0..4 {
            assert!(!ring.record("same"));
        }
        assert!(ring.record("same"));
    }

    #[test]
    fn recovery_messages_are_deterministic() {
        let a = render_recovery_message(&Error::NoToolCall);
        let b = render_recovery_message(&Error::NoToolCall);
        assert_eq!(a, b);
        assert_ne!(
            render_recovery_message(&Error::unknown_tool("x")),
            render_recovery_message(&Error::unknown_tool("y"))
        );
    }
}
