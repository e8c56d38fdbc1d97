//! Core data types: conversation messages, provider content chunks, and the
//! argument tree used by tool invocations.
//!
//! These are intentionally plain data (no behavior beyond small invariant
//! checks) so every other module can treat them as values: clone freely,
//! compare in tests, and send across channels without lifetime headaches.

use std::fmt;

use crate::error::{Error, Result};

// ============================================================================
// MESSAGE
// ============================================================================

/// Who produced a [`Message`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Role {
    System,
    User,
    Assistant,
    Tool,
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Role::System => "system",
            Role::User => "user",
            Role::Assistant => "assistant",
            Role::Tool => "tool",
        };
        f.write_str(s)
    }
}

/// Metadata attached to a tool-result message: the name of the tool whose
/// output this message carries.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ToolMetadata {
    pub tool_name: String,
}

/// One entry in the conversation history.
///
/// Invariant: `content` is never empty for non-system messages (enforced by
/// the constructors below). System messages are immutable once added to
/// [`crate::memory::Memory`] — nothing in this type enforces that by itself;
/// it's a property of how `Memory::add` is used (system messages are never
/// replaced, only appended once at construction time).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    pub role: Role,
    pub content: String,
    pub metadata: Option<ToolMetadata>,
}

impl Message {
    /// Build a message, rejecting empty content for non-system roles.
    pub fn new(role: Role, content: impl Into<String>) -> Result<Self> {
        let content = content.into();
        if role != Role::System && content.is_empty() {
            return Err(Error::invalid_input(
                "message content must not be empty for non-system roles",
            ));
        }
        Ok(Message {
            role,
            content,
            metadata: None,
        })
    }

    /// System messages may be empty (e.g. a deliberately blank system
    /// prompt); this constructor skips the non-empty check.
    pub fn system(content: impl Into<String>) -> Self {
        Message {
            role: Role::System,
            content: content.into(),
            metadata: None,
        }
    }

    pub fn user(content: impl Into<String>) -> Result<Self> {
        Self::new(Role::User, content)
    }

    pub fn assistant(content: impl Into<String>) -> Result<Self> {
        Self::new(Role::Assistant, content)
    }

    /// A tool-result message: rendered as a user-role message carrying the
    /// originating tool's name, per §4.5 ("their text result is appended to
    /// memory as a user-role message with a prefix identifying the
    /// originating tool").
    pub fn tool_result(tool_name: impl Into<String>, content: impl Into<String>) -> Result<Self> {
        let tool_name = tool_name.into();
        let content = content.into();
        if content.is_empty() {
            return Err(Error::invalid_input(
                "tool result content must not be empty",
            ));
        }
        let rendered = format!("Tool '{tool_name}' result:\n{content}");
        Ok(Message {
            role: Role::User,
            content: rendered,
            metadata: Some(ToolMetadata { tool_name }),
        })
    }

    /// An assistant-role message recording that the model issued a tool
    /// call, rendered as a compact summary (see SPEC_FULL.md's supplement on
    /// recording the assistant's tool-call turn). Carries the tool name as
    /// metadata so [`crate::context`]'s summarization strategy can pair it
    /// with the following tool-result message without re-parsing text.
    pub fn assistant_tool_call(
        tool_name: impl Into<String>,
        args_summary: impl Into<String>,
    ) -> Self {
        let tool_name = tool_name.into();
        let content = format!(
            "Called tool '{tool_name}' with arguments: {}",
            args_summary.into()
        );
        Message {
            role: Role::Assistant,
            content,
            metadata: Some(ToolMetadata { tool_name }),
        }
    }

    /// Rough token estimate used by pruning: `ceil(len / 4) + overhead`.
    pub fn estimate_tokens(&self) -> usize {
        crate::memory::estimate_tokens(&self.content)
    }
}

// ============================================================================
// CONTENT CHUNK (provider layer)
// ============================================================================

/// The kind of content a [`ContentChunk`] carries.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChunkKind {
    Message,
    Thinking,
}

/// Token usage reported by a provider, present only on the finishing chunk
/// when the backend makes it available.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Usage {
    pub prompt_tokens: u64,
    pub completion_tokens: u64,
    pub total_tokens: u64,
}

/// One piece of a streamed provider response.
///
/// `role` is set only on the first chunk of a response (best-effort; the
/// parser does not depend on it). `finished` marks the terminal chunk;
/// `error` makes that terminal chunk carry a failure instead of content.
#[derive(Debug, Clone, PartialEq)]
pub struct ContentChunk {
    pub content: String,
    pub role: Option<Role>,
    pub kind: ChunkKind,
    pub finished: bool,
    pub error: Option<String>,
    pub usage: Option<Usage>,
}

impl ContentChunk {
    pub fn delta(content: impl Into<String>) -> Self {
        ContentChunk {
            content: content.into(),
            role: None,
            kind: ChunkKind::Message,
            finished: false,
            error: None,
            usage: None,
        }
    }

    pub fn finish(usage: Option<Usage>) -> Self {
        ContentChunk {
            content: String::new(),
            role: None,
            kind: ChunkKind::Message,
            finished: true,
            error: None,
            usage,
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        ContentChunk {
            content: String::new(),
            role: None,
            kind: ChunkKind::Message,
            finished: true,
            error: Some(message.into()),
            usage: None,
        }
    }
}

// ============================================================================
// ARGUMENT TREE (tool-call layer)
// ============================================================================

/// A scalar leaf value inferred from tool-call XML text.
///
/// Type inference rules (§4.1): lowercase `true`/`false` -> bool; `null` ->
/// Null; integer-shaped -> Int; decimal/exponent-shaped -> Float; otherwise
/// Str. CDATA content is always `Str`, never inferred.
#[derive(Debug, Clone, PartialEq)]
pub enum Scalar {
    Bool(bool),
    Int(i64),
    Float(f64),
    Null,
    Str(String),
}

impl Scalar {
    /// Infer a scalar from non-CDATA text.
    pub fn infer(raw: &str) -> Scalar {
        match raw {
            "true" => return Scalar::Bool(true),
            "false" => return Scalar::Bool(false),
            "null" => return Scalar::Null,
            _ => {}
        }
        if let Ok(i) = raw.parse::<i64>() {
            // Reject inputs with a leading '+' or leading zeros beyond a
            // single digit, which `str::parse` would otherwise accept as
            // integers but which read oddly as "integer-shaped" text, e.g.
            // phone numbers or zero-padded codes. Plain `-123`, `0`, `123`
            // are fine.
            let looks_numeric = raw == "0"
                || raw
                    .strip_prefix('-')
                    .unwrap_or(raw)
                    .chars()
                    .next()
                    .map(|c| c != '0')
                    .unwrap_or(false);
            if looks_numeric {
                return Scalar::Int(i);
            }
        }
        if looks_like_float(raw) {
            if let Ok(f) = raw.parse::<f64>() {
                return Scalar::Float(f);
            }
        }
        Scalar::Str(raw.to_string())
    }

    /// Always a string, bypassing type inference — used for CDATA leaves.
    pub fn literal(raw: impl Into<String>) -> Scalar {
        Scalar::Str(raw.into())
    }
}

fn looks_like_float(raw: &str) -> bool {
    let body = raw.strip_prefix('-').unwrap_or(raw);
    if body.is_empty() {
        return false;
    }
    let has_dot = body.contains('.');
    let has_exp = body.contains(['e', 'E']);
    if !has_dot && !has_exp {
        return false;
    }
    body.chars()
        .all(|c| c.is_ascii_digit() || c == '.' || c == 'e' || c == 'E' || c == '+' || c == '-')
}

/// A node in the parsed argument tree: a scalar, a record of named fields
/// (preserving declaration order), or an ordered list of sibling elements
/// that shared a tag name.
#[derive(Debug, Clone, PartialEq)]
pub enum ArgNode {
    Scalar(Scalar),
    Record(Vec<(String, ArgNode)>),
    List(Vec<ArgNode>),
}

impl ArgNode {
    /// Look up a direct field of a `Record` node by name.
    pub fn field(&self, name: &str) -> Option<&ArgNode> {
        match self {
            ArgNode::Record(fields) => fields.iter().find(|(n, _)| n == name).map(|(_, v)| v),
            _ => None,
        }
    }

    /// Render a leaf scalar as a display string, for summaries/previews.
    pub fn as_display_string(&self) -> String {
        match self {
            ArgNode::Scalar(Scalar::Str(s)) => s.clone(),
            ArgNode::Scalar(Scalar::Int(i)) => i.to_string(),
            ArgNode::Scalar(Scalar::Float(f)) => f.to_string(),
            ArgNode::Scalar(Scalar::Bool(b)) => b.to_string(),
            ArgNode::Scalar(Scalar::Null) => "null".to_string(),
            ArgNode::Record(_) => "{...}".to_string(),
            ArgNode::List(items) => format!("[{} items]", items.len()),
        }
    }
}

// ============================================================================
// TOOL CALL
// ============================================================================

/// A fully parsed tool invocation extracted from a `<tool>...</tool>` block.
#[derive(Debug, Clone, PartialEq)]
pub struct ToolCall {
    pub server_name: String,
    pub tool_name: String,
    pub arguments: ArgNode,
}
