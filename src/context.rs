//! Context Manager (§4.3, C5): a chain of summarization strategies run
//! synchronously before each provider call.

use std::collections::HashSet;

use crate::error::Result;
use crate::event::AgentEvent;
use crate::types::{Message, Role};

/// A pluggable summarization strategy. Implementations must preserve the
/// ordering of surviving messages and never touch system messages.
pub trait SummarizationStrategy: Send + Sync {
    fn name(&self) -> &str;

    /// Whether this strategy has anything to do given the current history
    /// and the turn's token budget. Called unconditionally every turn.
    fn should_run(&self, messages: &[Message], max_tokens: usize) -> bool;

    /// Produce the new message sequence. Only called when `should_run`
    /// returned `true`.
    fn summarize(&self, messages: &[Message]) -> Result<Vec<Message>>;
}

/// Orchestrates the strategy chain and wraps every invocation in
/// Start/Complete/Error events, including no-op runs (§4.3: "event emission
/// wraps every strategy execution even when it is a no-op").
#[derive(Default)]
pub struct ContextManager {
    strategies: Vec<Box<dyn SummarizationStrategy>>,
}

impl ContextManager {
    pub fn new() -> Self {
        Self {
            strategies: Vec::new(),
        }
    }

    pub fn with_strategy(mut self, strategy: Box<dyn SummarizationStrategy>) -> Self {
        self.strategies.push(strategy);
        self
    }

    /// Run every strategy in order over `messages`, returning the possibly
    /// rewritten sequence plus the events the agent loop should emit.
    pub fn run(&self, mut messages: Vec<Message>, max_tokens: usize) -> (Vec<Message>, Vec<AgentEvent>) {
        let mut events = Vec::new();

        for strategy in &self.strategies {
            let before_tokens: usize = messages.iter().map(Message::estimate_tokens).sum();
            events.push(AgentEvent::ContextSummarizationStart {
                strategy: strategy.name().to_string(),
                before_tokens,
            });

            if !strategy.should_run(&messages, max_tokens) {
                events.push(AgentEvent::ContextSummarizationComplete {
                    strategy: strategy.name().to_string(),
                    after_tokens: before_tokens,
                    saved: 0,
                });
                continue;
            }

            match strategy.summarize(&messages) {
                Ok(new_messages) => {
                    let after_tokens: usize =
                        new_messages.iter().map(Message::estimate_tokens).sum();
                    let saved = before_tokens.saturating_sub(after_tokens);
                    messages = new_messages;
                    events.push(AgentEvent::ContextSummarizationComplete {
                        strategy: strategy.name().to_string(),
                        after_tokens,
                        saved,
                    });
                }
                Err(err) => {
                    events.push(AgentEvent::ContextSummarizationError {
                        strategy: strategy.name().to_string(),
                        error: err.to_string(),
                    });
                }
            }
        }

        (messages, events)
    }
}

/// The required strategy from §4.3: collapse adjacent
/// (assistant tool-call, tool-result) pairs older than a buffer of the most
/// recent messages into one synthesized assistant summary message, unless
/// the tool is in the exclusion set.
pub struct ToolCallSummarizer {
    /// Number of most-recent messages exempt from summarization regardless
    /// of whether they form a summarizable pair.
    pub recent_buffer: usize,
    pub exclusions: HashSet<String>,
}

impl ToolCallSummarizer {
    pub fn new(recent_buffer: usize, exclusions: impl IntoIterator<Item = String>) -> Self {
        Self {
            recent_buffer,
            exclusions: exclusions.into_iter().collect(),
        }
    }

    /// Default exclusion set per §6: the default loop-breaking tool names.
    pub fn with_default_exclusions(recent_buffer: usize) -> Self {
        Self::new(
            recent_buffer,
            ["task_completion", "ask_question", "converse"].map(String::from),
        )
    }

    fn summarizable_indices(&self, messages: &[Message]) -> Vec<usize> {
        if messages.len() <= self.recent_buffer {
            return Vec::new();
        }
        let boundary = messages.len() - self.recent_buffer;
        let mut pairs = Vec::new();
        let mut i = 0;
        while i + 1 < boundary {
            let is_pair = messages[i].role == Role::Assistant
                && messages[i].metadata.is_some()
                && messages[i + 1].role == Role::User
                && messages[i + 1].metadata.is_some();
            if is_pair {
                let tool_name = &messages[i].metadata.as_ref().unwrap().tool_name;
                if !self.exclusions.contains(tool_name) {
                    pairs.push(i);
                    i += 2;
                    continue;
                }
            }
            i += 1;
        }
        pairs
    }
}

impl SummarizationStrategy for ToolCallSummarizer {
    fn name(&self) -> &str {
        "tool-call-summarization-with-exclusions"
    }

    fn should_run(&self, messages: &[Message], _max_tokens: usize) -> bool {
        !self.summarizable_indices(messages).is_empty()
    }

    fn summarize(&self, messages: &[Message]) -> Result<Vec<Message>> {
        let pair_starts: HashSet<usize> = self.summarizable_indices(messages).into_iter().collect();
        let mut out = Vec::with_capacity(messages.len());
        let mut i = 0;
        while i < messages.len() {
            if pair_starts.contains(&i) {
                let tool_name = &messages[i].metadata.as_ref().unwrap().tool_name;
                let summary = format!(
                    "[summarized] tool '{tool_name}' was called and returned a result earlier in this conversation"
                );
                out.push(Message::assistant(summary)?);
                i += 2;
            } else {
                out.push(messages[i].clone());
                i += 1;
            }
        }
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn call(tool: &str) -> Message {
        Message::assistant_tool_call(tool, "{}")
    }

    fn result(tool: &str) -> Message {
        Message::tool_result(tool, "ok").unwrap()
    }

    #[test]
    fn manager_wraps_every_strategy_even_as_a_noop() {
        struct NeverRuns;
        impl SummarizationStrategy for NeverRuns {
            fn name(&self) -> &str {
                "never-runs"
            }
            fn should_run(&self, _messages: &[Message], _max_tokens: usize) -> bool {
                false
            }
            fn summarize(&self, messages: &[Message]) -> Result<Vec<Message>> {
                Ok(messages.to_vec())
            }
        }
        let manager = ContextManager::new().with_strategy(Box::new(NeverRuns));
        let messages = vec![Message::user("hi").unwrap()];
        let (out, events) = manager.run(messages.clone(), 1000);
        assert_eq!(out, messages);
        assert!(matches!(
            events[0],
            AgentEvent::ContextSummarizationStart { .. }
        ));
        assert!(matches!(
            events[1],
            AgentEvent::ContextSummarizationComplete { saved: 0, .. }
        ));
    }

    #[test]
    fn summarizes_old_pairs_but_leaves_recent_buffer_alone() {
        let messages = vec![
            Message::system("sys"),
            call("list_files"),
            result("list_files"),
            call("list_files"),
            result("list_files"),
        ];
        let strat = ToolCallSummarizer::new(2, []);
        assert!(strat.should_run(&messages, 1000));
        let out = strat.summarize(&messages).unwrap();
        // first pair summarized (index 1..3), recent buffer (last 2 msgs) untouched.
        assert_eq!(out.len(), 4);
        assert!(out[1].content.contains("summarized"));
        assert_eq!(out[2], call("list_files"));
        assert_eq!(out[3], result("list_files"));
    }

    #[test]
    fn excluded_tool_names_are_never_summarized() {
        let messages = vec![
            Message::system("sys"),
            call("task_completion"),
            result("task_completion"),
            Message::user("more").unwrap(),
            Message::user("more").unwrap(),
            Message::user("more").unwrap(),
        ];
        let strat = ToolCallSummarizer::with_default_exclusions(0);
        assert!(!strat.should_run(&messages, 1000));
    }

    #[test]
    fn system_messages_are_never_part_of_a_pair() {
        let messages = vec![Message::system("sys"), Message::system("sys2")];
        let strat = ToolCallSummarizer::new(0, []);
        assert!(!strat.should_run(&messages, 1000));
    }
}
