//! Streaming parser pipeline (§4.1): turns provider [`ContentChunk`]s into
//! [`ParsedSegment`]s in two stages — thinking/message splitting, then
//! tool-call extraction over the message channel — followed by on-demand
//! XML parsing of a completed tool-call body.
//!
//! Each stage is a pure, boundary-invariant state machine; [`Parsers`] is
//! just the glue that threads a chunk through both of them and tracks the
//! provider-level thinking/message channel (`ContentChunk::kind`) alongside
//! the in-text `<thinking>` tag channel, since either can signal thinking
//! content depending on how the provider streams it.

pub mod thinking;
pub mod tool_call;
pub mod xml;

use crate::event::ParsedSegment;
use crate::types::{ChunkKind, ContentChunk};
use thinking::ThinkingSplitter;
use tool_call::ToolCallExtractor;

pub use xml::parse_tool_call;

/// Result of draining the pipeline at end-of-turn.
#[derive(Debug, Default)]
pub struct FlushResult {
    pub segments: Vec<ParsedSegment>,
    /// `Some(body)` when the stream ended while still inside a `<tool>`
    /// block that never closed (§4.1's "stream ends without `</tool>`"
    /// case). The agent loop turns this into `Error::NoToolCall`.
    pub unterminated_tool_call_body: Option<String>,
}

#[derive(Debug, Default)]
pub struct Parsers {
    thinking: ThinkingSplitter,
    tool_call: ToolCallExtractor,
    /// Tracks the provider's own thinking/message channel, independent of
    /// the in-text `<thinking>` tag channel tracked inside `thinking`.
    channel_in_thinking: bool,
}

impl Parsers {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed one provider chunk, returning the segments it produces.
    /// Error-carrying chunks produce no segments; the agent loop reads
    /// `chunk.error` directly.
    pub fn feed(&mut self, chunk: &ContentChunk) -> Vec<ParsedSegment> {
        if chunk.error.is_some() {
            return Vec::new();
        }

        match chunk.kind {
            ChunkKind::Thinking => {
                let mut segments = Vec::new();
                if !self.channel_in_thinking {
                    segments.push(ParsedSegment::ThinkingStart);
                    self.channel_in_thinking = true;
                }
                if !chunk.content.is_empty() {
                    segments.push(ParsedSegment::ThinkingDelta(chunk.content.clone()));
                }
                segments
            }
            ChunkKind::Message => {
                let mut segments = Vec::new();
                if self.channel_in_thinking {
                    segments.push(ParsedSegment::ThinkingEnd);
                    self.channel_in_thinking = false;
                }
                for seg in self.thinking.feed(&chunk.content) {
                    self.route_message_segment(seg, &mut segments);
                }
                segments
            }
        }
    }

    /// Drain both stages at the end of a turn. Must be called once the
    /// provider signals `finished`.
    pub fn flush(&mut self) -> FlushResult {
        let mut segments = Vec::new();
        if self.channel_in_thinking {
            segments.push(ParsedSegment::ThinkingEnd);
            self.channel_in_thinking = false;
        }
        for seg in self.thinking.flush() {
            self.route_message_segment(seg, &mut segments);
        }
        let unterminated_tool_call_body = self.tool_call.flush();
        FlushResult {
            segments,
            unterminated_tool_call_body,
        }
    }

    fn route_message_segment(&mut self, seg: ParsedSegment, out: &mut Vec<ParsedSegment>) {
        match seg {
            ParsedSegment::MessageDelta(text) => out.extend(self.tool_call.feed(&text)),
            other => out.push(other),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Role;

    #[test]
    fn routes_thinking_channel_chunks_without_tags() {
        let mut p = Parsers::new();
        let mut chunk = ContentChunk::delta("plan A");
        chunk.kind = ChunkKind::Thinking;
        let segs = p.feed(&chunk);
        assert_eq!(
            segs,
            vec![
                ParsedSegment::ThinkingStart,
                ParsedSegment::ThinkingDelta("plan A".into()),
            ]
        );

        let mut msg = ContentChunk::delta("hello");
        msg.kind = ChunkKind::Message;
        let segs = p.feed(&msg);
        assert_eq!(
            segs,
            vec![
                ParsedSegment::ThinkingEnd,
                ParsedSegment::MessageDelta("hello".into()),
            ]
        );
    }

    #[test]
    fn routes_inline_thinking_tags_inside_message_channel() {
        let mut p = Parsers::new();
        let mut chunk = ContentChunk::delta("<thinking>scratch</thinking>hi");
        chunk.kind = ChunkKind::Message;
        chunk.role = Some(Role::Assistant);
        let segs = p.feed(&chunk);
        assert_eq!(
            segs,
            vec![
                ParsedSegment::ThinkingStart,
                ParsedSegment::ThinkingDelta("scratch".into()),
                ParsedSegment::ThinkingEnd,
                ParsedSegment::MessageDelta("hi".into()),
            ]
        );
    }

    #[test]
    fn extracts_tool_call_from_message_channel() {
        let mut p = Parsers::new();
        let body = "<tool_name>t</tool_name><arguments><a>1</a></arguments>";
        let input = format!("<tool>{body}</tool>");
        let mut chunk = ContentChunk::delta(input);
        chunk.kind = ChunkKind::Message;
        let segs = p.feed(&chunk);
        assert_eq!(
            segs,
            vec![
                ParsedSegment::ToolCallStart,
                ParsedSegment::ToolCallDelta("t".into()),
                ParsedSegment::ToolCallEnd(body.into()),
            ]
        );
    }

    #[test]
    fn flush_reports_unterminated_tool_call() {
        let mut p = Parsers::new();
        let mut chunk = ContentChunk::delta("<tool><tool_name>t</tool_name>");
        chunk.kind = ChunkKind::Message;
        let _ = p.feed(&chunk);
        let flushed = p.flush();
        assert_eq!(
            flushed.unterminated_tool_call_body,
            Some("<tool_name>t</tool_name>".to_string())
        );
    }

    #[test]
    fn flush_closes_dangling_thinking_channel() {
        let mut p = Parsers::new();
        let mut chunk = ContentChunk::delta("still thinking");
        chunk.kind = ChunkKind::Thinking;
        let _ = p.feed(&chunk);
        let flushed = p.flush();
        assert_eq!(flushed.segments, vec![ParsedSegment::ThinkingEnd]);
    }
}
