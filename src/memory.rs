//! Conversation memory (§4.2, C4): an ordered message store guarded by a
//! read/write lock, with deterministic recency-based pruning that always
//! keeps system messages.

use std::sync::RwLock;

use crate::types::{Message, Role};

/// Per-message token overhead added to the character-based estimate, to
/// account for role/formatting tokens a real tokenizer would also spend.
const PER_MESSAGE_OVERHEAD: usize = 4;

/// Rough token estimate: `ceil(len / 4) + overhead`. Shared by
/// [`Message::estimate_tokens`] and the pruning algorithm below so both use
/// the exact same arithmetic.
pub fn estimate_tokens(content: &str) -> usize {
    content.len().div_ceil(4) + PER_MESSAGE_OVERHEAD
}

/// Ordered conversation store. Cheap to clone the handle (it's an `Arc` at
/// the `Agent` level); the lock is internal.
#[derive(Debug, Default)]
pub struct Memory {
    messages: RwLock<Vec<Message>>,
}

impl Memory {
    pub fn new() -> Self {
        Self {
            messages: RwLock::new(Vec::new()),
        }
    }

    pub fn add(&self, message: Message) {
        self.messages
            .write()
            .expect("memory lock poisoned")
            .push(message);
    }

    pub fn add_multiple(&self, messages: impl IntoIterator<Item = Message>) {
        let mut guard = self.messages.write().expect("memory lock poisoned");
        guard.extend(messages);
    }

    /// Deep copy of the full ordered history.
    pub fn get_all(&self) -> Vec<Message> {
        self.messages.read().expect("memory lock poisoned").clone()
    }

    pub fn get_recent(&self, n: usize) -> Vec<Message> {
        let guard = self.messages.read().expect("memory lock poisoned");
        let start = guard.len().saturating_sub(n);
        guard[start..].to_vec()
    }

    pub fn get_by_role(&self, role: Role) -> Vec<Message> {
        self.messages
            .read()
            .expect("memory lock poisoned")
            .iter()
            .filter(|m| m.role == role)
            .cloned()
            .collect()
    }

    pub fn count(&self) -> usize {
        self.messages.read().expect("memory lock poisoned").len()
    }

    pub fn clear(&self) {
        self.messages.write().expect("memory lock poisoned").clear();
    }

    /// Replace the stored history with the result of running the whole
    /// pipeline: a context-summarization pass (external, via
    /// [`crate::context::ContextManager`]) followed by [`prune`]. Kept as a
    /// thin wrapper so callers needing only pruning don't have to round-trip
    /// through `get_all`/replace themselves.
    pub fn prune(&self, max_tokens: usize) {
        let mut guard = self.messages.write().expect("memory lock poisoned");
        let pruned = prune_sequence(&guard, max_tokens);
        *guard = pruned;
    }

    /// Replace the full history (used by the context manager after running
    /// its strategy chain, and by pruning after it computes the new
    /// sequence with the lock released).
    pub fn replace_all(&self, messages: Vec<Message>) {
        *self.messages.write().expect("memory lock poisoned") = messages;
    }
}

/// The deterministic pruning algorithm from §4.2, extracted as a pure
/// function so it can be unit tested without going through the lock.
pub fn prune_sequence(messages: &[Message], max_tokens: usize) -> Vec<Message> {
    let (system, rest): (Vec<Message>, Vec<Message>) =
        messages.iter().cloned().partition(|m| m.role == Role::System);

    let system_tokens: usize = system.iter().map(Message::estimate_tokens).sum();
    let remaining_budget = max_tokens as i64 - system_tokens as i64;
    if remaining_budget < 0 {
        return system;
    }
    let remaining_budget = remaining_budget as usize;

    let mut kept_rev = Vec::new();
    let mut cumulative = 0usize;
    for msg in rest.iter().rev() {
        let tokens = msg.estimate_tokens();
        if cumulative + tokens > remaining_budget {
            break;
        }
        cumulative += tokens;
        kept_rev.push(msg.clone());
    }
    kept_rev.reverse();

    let mut result = system;
    result.extend(kept_rev);
    result
}
